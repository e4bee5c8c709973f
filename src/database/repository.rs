//! Storage seams of the payment core.
//!
//! Both traits are object safe so the coordinator can run against Postgres in
//! production and the in-memory store in tests and `SKIP_EXTERNALS` mode.

use crate::database::error::DatabaseError;
use crate::database::order_repository::{Order, OrderStatus, PaymentStatus};
use crate::database::payment_transaction_repository::{PaymentTransaction, TransactionStatus};
use async_trait::async_trait;
use uuid::Uuid;

#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// Order with shipping address and items.
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Order>, DatabaseError>;

    async fn save(&self, order: &Order) -> Result<Order, DatabaseError>;
}

/// Changes a gateway callback applies to a transaction and its order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackSettlement {
    pub transaction_status: TransactionStatus,
    /// Replaces the stored gateway uuid when present.
    pub uuid: Option<String>,
    pub error_message: Option<String>,
    pub order_status: OrderStatus,
    pub payment_status: PaymentStatus,
}

impl CallbackSettlement {
    pub fn completed(uuid: Option<String>) -> Self {
        Self {
            transaction_status: TransactionStatus::Completed,
            uuid,
            error_message: None,
            order_status: OrderStatus::Processing,
            payment_status: PaymentStatus::Success,
        }
    }

    pub fn failed(uuid: Option<String>, message: impl Into<String>) -> Self {
        Self {
            transaction_status: TransactionStatus::Failed,
            uuid,
            error_message: Some(message.into()),
            order_status: OrderStatus::Cancelled,
            payment_status: PaymentStatus::Failed,
        }
    }
}

#[derive(Debug, Clone)]
pub enum SettleOutcome {
    /// This call changed the transaction (and its order).
    Applied {
        transaction: PaymentTransaction,
        order: Order,
    },
    AlreadyCompleted,
    AlreadyRefunded,
}

/// Identifiers returned by the gateway when it accepts a debit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GatewayReference {
    pub purchase_id: Option<String>,
    pub uuid: Option<String>,
    pub redirect_url: Option<String>,
}

#[derive(Debug, Clone)]
pub enum RefundOutcome {
    Recorded {
        debit: PaymentTransaction,
        refund: PaymentTransaction,
        order: Order,
    },
    /// The debit left `completed` before the refund could be recorded.
    NotRefundable { status: TransactionStatus },
}

#[async_trait]
pub trait TransactionStore: Send + Sync {
    /// Insert a new record. Fails with a unique violation when a non-failed
    /// record with the same merchant transaction id exists.
    async fn create(
        &self,
        transaction: &PaymentTransaction,
    ) -> Result<PaymentTransaction, DatabaseError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<PaymentTransaction>, DatabaseError>;

    /// Most recent record for the merchant transaction id.
    async fn find_by_merchant_transaction_id(
        &self,
        merchant_transaction_id: &str,
    ) -> Result<Option<PaymentTransaction>, DatabaseError>;

    async fn find_by_bankart_transaction_id(
        &self,
        bankart_transaction_id: &str,
    ) -> Result<Option<PaymentTransaction>, DatabaseError>;

    /// Full replace of the mutable fields, status included. Callers that race
    /// with callbacks use [`TransactionStore::record_gateway_reference`].
    async fn save(
        &self,
        transaction: &PaymentTransaction,
    ) -> Result<PaymentTransaction, DatabaseError>;

    /// Store the gateway's references for an accepted debit. Status and error
    /// message are left untouched so a callback that settled the record while
    /// the debit call was in flight is kept.
    async fn record_gateway_reference(
        &self,
        transaction_id: Uuid,
        reference: &GatewayReference,
    ) -> Result<PaymentTransaction, DatabaseError>;

    /// Apply a callback atomically unless the transaction is already
    /// `completed` or `refunded`.
    async fn settle_callback(
        &self,
        transaction_id: Uuid,
        settlement: &CallbackSettlement,
    ) -> Result<SettleOutcome, DatabaseError>;

    /// Flip the debit to `refunded`, mark the order `refunded` and insert the
    /// refund record, all or nothing.
    async fn record_refund(
        &self,
        debit_id: Uuid,
        refund: &PaymentTransaction,
    ) -> Result<RefundOutcome, DatabaseError>;

    /// Move a `pending` record to `failed`. Returns `None` when the record
    /// already left `pending`, e.g. because a callback settled it.
    async fn mark_failed(
        &self,
        transaction_id: Uuid,
        message: &str,
    ) -> Result<Option<PaymentTransaction>, DatabaseError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completed_settlement_moves_order_to_processing() {
        let settlement = CallbackSettlement::completed(Some("u-1".to_string()));
        assert_eq!(settlement.transaction_status, TransactionStatus::Completed);
        assert_eq!(settlement.order_status, OrderStatus::Processing);
        assert_eq!(settlement.payment_status, PaymentStatus::Success);
        assert_eq!(settlement.error_message, None);
    }

    #[test]
    fn failed_settlement_cancels_order() {
        let settlement = CallbackSettlement::failed(None, "declined");
        assert_eq!(settlement.transaction_status, TransactionStatus::Failed);
        assert_eq!(settlement.order_status, OrderStatus::Cancelled);
        assert_eq!(settlement.payment_status, PaymentStatus::Failed);
        assert_eq!(settlement.error_message.as_deref(), Some("declined"));
    }
}
