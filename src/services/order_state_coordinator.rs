//! Order state coordinator
//!
//! Owns the payment lifecycle of an order: creates the debit at the gateway,
//! reconciles the asynchronous gateway callback, and performs refunds. The
//! callback is the only thing that marks a payment `completed`; the
//! synchronous debit answer only records the gateway's correlation ids.

use crate::database::repository::{
    CallbackSettlement, GatewayReference, OrderRepository, RefundOutcome, SettleOutcome,
    TransactionStore,
};
use crate::database::order_repository::{Order, OrderStatus};
use crate::database::payment_transaction_repository::{
    refund_merchant_transaction_id, PaymentTransaction, TransactionKind, TransactionStatus,
};
use crate::error::{AppError, AppErrorKind, AppResult, DomainError, ValidationError};
use crate::payments::error::PaymentError;
use crate::payments::gateway::PaymentGateway;
use crate::payments::types::{
    split_full_name, CallbackHeaders, CallbackPayload, Customer, DebitRequest, Money,
    RefundRequest, ReturnUrls, REFUND_SUFFIX,
};
use crate::services::notification::NotificationService;
use bigdecimal::BigDecimal;
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

pub const DEFAULT_CURRENCY: &str = "EUR";

#[derive(Debug, Clone)]
pub struct CreatePaymentRequest {
    pub order_id: Uuid,
    pub amount: BigDecimal,
    pub currency: String,
    /// Base of the shopper-facing success/cancel/error pages.
    pub return_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePaymentResponse {
    pub redirect_url: String,
    /// Merchant transaction id; the value the refund endpoint takes.
    pub transaction_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundResponse {
    pub message: String,
    pub uuid: Option<String>,
    pub purchase_id: Option<String>,
}

/// How a callback was handled. Every variant is acknowledged to the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackAck {
    Completed,
    Failed,
    AlreadyProcessed,
    AlreadyRefunded,
}

impl CallbackAck {
    pub fn message(&self) -> &'static str {
        match self {
            CallbackAck::Completed => "Payment completed",
            CallbackAck::Failed => "Payment failed",
            CallbackAck::AlreadyProcessed => "Already processed",
            CallbackAck::AlreadyRefunded => "Already refunded",
        }
    }
}

pub struct OrderStateCoordinator {
    orders: Arc<dyn OrderRepository>,
    transactions: Arc<dyn TransactionStore>,
    gateway: Arc<dyn PaymentGateway>,
    notifications: Arc<NotificationService>,
    callback_base_url: String,
}

impl OrderStateCoordinator {
    pub fn new(
        orders: Arc<dyn OrderRepository>,
        transactions: Arc<dyn TransactionStore>,
        gateway: Arc<dyn PaymentGateway>,
        notifications: Arc<NotificationService>,
        callback_base_url: impl Into<String>,
    ) -> Self {
        Self {
            orders,
            transactions,
            gateway,
            notifications,
            callback_base_url: callback_base_url.into(),
        }
    }

    /// Validate the order, record a `pending` debit and start it at the gateway.
    pub async fn create_payment(
        &self,
        request: CreatePaymentRequest,
    ) -> AppResult<CreatePaymentResponse> {
        let money = Money::new(request.amount, request.currency.trim().to_uppercase());
        money.validate_positive("amount")?;
        if request.return_url.trim().is_empty() {
            return Err(AppError::missing_field("returnUrl"));
        }

        let order = self
            .orders
            .find_by_id(request.order_id)
            .await?
            .ok_or_else(|| AppError::order_not_found(request.order_id.to_string()))?;

        if order.status != OrderStatus::Pending {
            return Err(AppError::new(AppErrorKind::Domain(
                DomainError::InvalidOrderState {
                    order_id: order.id.to_string(),
                    status: order.status.as_str().to_string(),
                },
            )));
        }

        let customer = customer_for(&order)?;
        if money.amount != order.total {
            warn!(
                order_id = %order.id,
                requested = %money.amount,
                order_total = %order.total,
                "Payment amount differs from order total"
            );
        }

        let debit = PaymentTransaction::new_debit(order.id, &money);
        let debit = self.transactions.create(&debit).await.map_err(|e| {
            if e.is_unique_violation() {
                AppError::new(AppErrorKind::Domain(DomainError::DuplicateTransaction {
                    merchant_transaction_id: order.id.to_string(),
                }))
            } else {
                e.into()
            }
        })?;

        info!(
            order_id = %order.id,
            transaction_id = %debit.id,
            amount = %money.amount,
            currency = %money.currency,
            "Debit transaction recorded, calling gateway"
        );

        let debit_request = DebitRequest {
            merchant_transaction_id: debit.merchant_transaction_id.clone(),
            money,
            customer,
            urls: ReturnUrls::for_order(
                &request.return_url,
                &self.callback_base_url,
                &order.id.to_string(),
            ),
            description: format!("Order {}", order.id),
        };

        let result = match self.gateway.debit(debit_request).await {
            Ok(result) if result.success => result,
            Ok(result) => {
                let message = result
                    .error_message
                    .unwrap_or_else(|| "Payment was declined".to_string());
                return Err(self
                    .fail_debit(
                        &debit,
                        PaymentError::GatewayRejected {
                            message,
                            gateway_code: None,
                        },
                    )
                    .await);
            }
            Err(e) => return Err(self.fail_debit(&debit, e).await),
        };

        let debit = self
            .transactions
            .record_gateway_reference(
                debit.id,
                &GatewayReference {
                    purchase_id: result.purchase_id,
                    uuid: result.uuid,
                    redirect_url: result.redirect_url,
                },
            )
            .await?;

        let redirect_url = debit.redirect_url.clone().ok_or_else(|| {
            AppError::from(PaymentError::InvalidResponse {
                message: "gateway accepted debit without redirect URL".to_string(),
            })
        })?;

        info!(
            order_id = %order.id,
            transaction_id = %debit.id,
            purchase_id = ?debit.bankart_transaction_id,
            "Debit accepted by gateway, awaiting callback"
        );

        Ok(CreatePaymentResponse {
            redirect_url,
            transaction_id: debit.merchant_transaction_id,
        })
    }

    async fn fail_debit(&self, debit: &PaymentTransaction, err: PaymentError) -> AppError {
        warn!(
            transaction_id = %debit.id,
            merchant_transaction_id = %debit.merchant_transaction_id,
            error = %err,
            "Gateway debit failed"
        );
        match self
            .transactions
            .mark_failed(debit.id, &err.to_string())
            .await
        {
            Ok(Some(_)) => {}
            Ok(None) => info!(
                transaction_id = %debit.id,
                "Debit already settled by callback, keeping its status"
            ),
            Err(db_err) => error!(
                transaction_id = %debit.id,
                error = %db_err,
                "Failed to mark debit transaction as failed"
            ),
        }
        err.into()
    }

    /// Verify a raw signed callback, then reconcile it.
    pub async fn handle_signed_callback(
        &self,
        body: &[u8],
        headers: &CallbackHeaders,
    ) -> AppResult<CallbackAck> {
        let verification = self.gateway.verify_callback(body, headers)?;
        if !verification.valid {
            let reason = verification
                .reason
                .unwrap_or_else(|| "signature mismatch".to_string());
            warn!(path = %headers.request_path, reason = %reason, "Rejected callback signature");
            return Err(AppError::new(AppErrorKind::Domain(
                DomainError::InvalidSignature { reason },
            )));
        }

        let payload = self.gateway.parse_callback(body)?;
        self.handle_callback(payload).await
    }

    /// Reconcile a gateway callback. Safe to call any number of times for the
    /// same payload; only the call that changes state sends emails.
    pub async fn handle_callback(&self, payload: CallbackPayload) -> AppResult<CallbackAck> {
        let is_refund = payload.merchant_transaction_id.ends_with(REFUND_SUFFIX);
        let base_id = payload.base_merchant_transaction_id().to_string();

        let debit = self.find_callback_transaction(&payload, &base_id).await?;
        let order = self
            .orders
            .find_by_id(debit.order_id)
            .await?
            .ok_or_else(|| {
                warn!(merchant_transaction_id = %base_id, "Callback for unknown order");
                AppError::order_not_found(debit.order_id.to_string())
            })?;

        match debit.status {
            TransactionStatus::Completed => {
                info!(
                    merchant_transaction_id = %base_id,
                    is_refund,
                    "Callback for completed transaction, nothing to do"
                );
                return Ok(CallbackAck::AlreadyProcessed);
            }
            TransactionStatus::Refunded => {
                info!(
                    merchant_transaction_id = %base_id,
                    is_refund,
                    "Callback for refunded transaction acknowledged"
                );
                return Ok(CallbackAck::AlreadyRefunded);
            }
            TransactionStatus::Pending | TransactionStatus::Failed => {}
        }

        let settlement = if payload.is_ok() {
            CallbackSettlement::completed(payload.uuid.clone())
        } else {
            CallbackSettlement::failed(payload.uuid.clone(), payload.failure_message())
        };

        match self
            .transactions
            .settle_callback(debit.id, &settlement)
            .await?
        {
            SettleOutcome::Applied { transaction, order } => {
                if payload.is_ok() {
                    info!(
                        order_id = %order.id,
                        transaction_id = %transaction.id,
                        "Payment completed"
                    );
                    self.notifications
                        .notify_payment_completed(&order, &transaction)
                        .await;
                    Ok(CallbackAck::Completed)
                } else {
                    warn!(
                        order_id = %order.id,
                        transaction_id = %transaction.id,
                        result = %payload.result,
                        error = ?transaction.error_message,
                        "Payment failed"
                    );
                    Ok(CallbackAck::Failed)
                }
            }
            SettleOutcome::AlreadyCompleted => {
                info!(order_id = %order.id, "Concurrent callback already completed the payment");
                Ok(CallbackAck::AlreadyProcessed)
            }
            SettleOutcome::AlreadyRefunded => Ok(CallbackAck::AlreadyRefunded),
        }
    }

    async fn find_callback_transaction(
        &self,
        payload: &CallbackPayload,
        base_id: &str,
    ) -> AppResult<PaymentTransaction> {
        if let Some(transaction) = self
            .transactions
            .find_by_merchant_transaction_id(base_id)
            .await?
        {
            return Ok(transaction);
        }

        if let Some(purchase_id) = payload.purchase_id.as_deref() {
            if let Some(transaction) = self
                .transactions
                .find_by_bankart_transaction_id(purchase_id)
                .await?
                .filter(|t| t.kind == TransactionKind::Debit)
            {
                return Ok(transaction);
            }
        }

        warn!(merchant_transaction_id = %base_id, "Callback for unknown transaction");
        Err(AppError::transaction_not_found(base_id))
    }

    /// Refund a completed debit identified by its merchant transaction id.
    pub async fn refund_payment(&self, merchant_transaction_id: &str) -> AppResult<RefundResponse> {
        let debit = self
            .transactions
            .find_by_merchant_transaction_id(merchant_transaction_id)
            .await?
            .ok_or_else(|| AppError::transaction_not_found(merchant_transaction_id))?;

        if debit.kind != TransactionKind::Debit || debit.status != TransactionStatus::Completed {
            return Err(refund_not_allowed(&debit));
        }

        let reference_uuid = debit.uuid.clone().ok_or_else(|| {
            AppError::new(AppErrorKind::Validation(ValidationError::InvalidPayload {
                reason: "transaction has no gateway uuid".to_string(),
            }))
        })?;

        let order = self
            .orders
            .find_by_id(debit.order_id)
            .await?
            .ok_or_else(|| AppError::order_not_found(debit.order_id.to_string()))?;

        let request = RefundRequest {
            merchant_transaction_id: refund_merchant_transaction_id(
                &debit.merchant_transaction_id,
            ),
            reference_uuid,
            money: debit.money(),
            callback_url: Some(format!(
                "{}/payment/callback",
                self.callback_base_url.trim_end_matches('/')
            )),
            description: format!("Refund for order {}", order.id),
        };

        let result = self.gateway.refund(request).await?;
        if !result.success {
            let message = result
                .error_message
                .unwrap_or_else(|| "Refund was declined".to_string());
            warn!(
                merchant_transaction_id = %merchant_transaction_id,
                message = %message,
                "Gateway declined refund"
            );
            return Err(PaymentError::GatewayRejected {
                message,
                gateway_code: None,
            }
            .into());
        }

        let record =
            PaymentTransaction::new_refund(&debit, result.purchase_id.clone(), result.uuid.clone());

        match self.transactions.record_refund(debit.id, &record).await? {
            RefundOutcome::Recorded { refund, order, .. } => {
                info!(
                    order_id = %order.id,
                    refund_id = %refund.id,
                    "Refund recorded"
                );
                self.notifications
                    .send_refund_confirmation(&order, &refund)
                    .await;
                Ok(RefundResponse {
                    message: "Refund processed successfully".to_string(),
                    uuid: result.uuid,
                    purchase_id: result.purchase_id,
                })
            }
            RefundOutcome::NotRefundable { status } => {
                error!(
                    merchant_transaction_id = %merchant_transaction_id,
                    status = status.as_str(),
                    refund_uuid = ?result.uuid,
                    "Gateway refunded a transaction that is no longer completed"
                );
                Err(AppError::new(AppErrorKind::Domain(
                    DomainError::RefundNotAllowed {
                        merchant_transaction_id: merchant_transaction_id.to_string(),
                        status: status.as_str().to_string(),
                    },
                )))
            }
        }
    }
}

fn refund_not_allowed(transaction: &PaymentTransaction) -> AppError {
    AppError::new(AppErrorKind::Domain(DomainError::RefundNotAllowed {
        merchant_transaction_id: transaction.merchant_transaction_id.clone(),
        status: transaction.status.as_str().to_string(),
    }))
}

/// Gateway customer block from the order's shipping address.
fn customer_for(order: &Order) -> AppResult<Customer> {
    let address = order
        .shipping_address
        .as_ref()
        .ok_or_else(|| AppError::missing_field("shippingAddress"))?;
    let (first_name, last_name) = split_full_name(&address.full_name);

    Ok(Customer {
        first_name,
        last_name,
        email: order.email.clone(),
        billing_address1: address.address.clone(),
        billing_city: address.city.clone(),
        billing_country: address.country.clone(),
        billing_postcode: address.postal_code.clone(),
        billing_phone: address.phone.clone(),
    })
}
