#![allow(dead_code)]

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use jewelry_backend::database::memory::InMemoryStore;
use jewelry_backend::database::order_repository::{Order, ShippingAddress};
use jewelry_backend::database::repository::{CallbackSettlement, TransactionStore};
use jewelry_backend::payments::error::{PaymentError, PaymentResult};
use jewelry_backend::payments::gateway::PaymentGateway;
use jewelry_backend::payments::types::{
    CallbackHeaders, CallbackPayload, CallbackVerification, DebitRequest, DebitResult,
    RefundRequest, RefundResult,
};
use jewelry_backend::services::notification::{
    EmailMessage, EmailSender, NotificationError, NotificationService, SentEmail,
};
use jewelry_backend::services::OrderStateCoordinator;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub const CALLBACK_BASE: &str = "https://shop.example.com";
pub const RETURN_URL: &str = "https://shop.example.com/checkout";
pub const ADMIN_EMAIL: &str = "admin@shop.example.com";
pub const CUSTOMER_EMAIL: &str = "ana.novak@example.com";

#[derive(Debug, Clone)]
pub enum Scripted {
    Accept,
    Decline(String),
    NetworkFailure,
    Timeout,
}

/// Gateway double with a fixed answer per operation and call recording.
pub struct ScriptedGateway {
    debit: Mutex<Scripted>,
    refund: Mutex<Scripted>,
    reject_signatures: AtomicBool,
    /// When set, the debit's callback is settled before the debit answers.
    early_callback: Mutex<Option<Arc<InMemoryStore>>>,
    debit_calls: AtomicUsize,
    refund_calls: AtomicUsize,
    pub debit_requests: Mutex<Vec<DebitRequest>>,
    pub refund_requests: Mutex<Vec<RefundRequest>>,
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self {
            debit: Mutex::new(Scripted::Accept),
            refund: Mutex::new(Scripted::Accept),
            reject_signatures: AtomicBool::new(false),
            early_callback: Mutex::new(None),
            debit_calls: AtomicUsize::new(0),
            refund_calls: AtomicUsize::new(0),
            debit_requests: Mutex::new(Vec::new()),
            refund_requests: Mutex::new(Vec::new()),
        }
    }

    pub fn script_debit(&self, outcome: Scripted) {
        *self.debit.lock().unwrap() = outcome;
    }

    pub fn script_refund(&self, outcome: Scripted) {
        *self.refund.lock().unwrap() = outcome;
    }

    pub fn reject_signatures(&self) {
        self.reject_signatures.store(true, Ordering::SeqCst);
    }

    /// Complete the payment in `store` while the debit call is still running,
    /// as a gateway does when its callback beats the synchronous answer.
    pub fn settle_during_debit(&self, store: Arc<InMemoryStore>) {
        *self.early_callback.lock().unwrap() = Some(store);
    }

    pub fn debit_calls(&self) -> usize {
        self.debit_calls.load(Ordering::SeqCst)
    }

    pub fn refund_calls(&self) -> usize {
        self.refund_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentGateway for ScriptedGateway {
    async fn debit(&self, request: DebitRequest) -> PaymentResult<DebitResult> {
        self.debit_calls.fetch_add(1, Ordering::SeqCst);
        let merchant_transaction_id = request.merchant_transaction_id.clone();
        self.debit_requests.lock().unwrap().push(request);

        let early_callback = self.early_callback.lock().unwrap().clone();
        if let Some(store) = early_callback {
            let debit = store
                .find_by_merchant_transaction_id(&merchant_transaction_id)
                .await
                .unwrap()
                .unwrap();
            store
                .settle_callback(debit.id, &CallbackSettlement::completed(Some("U1".into())))
                .await
                .unwrap();
        }

        let outcome = self.debit.lock().unwrap().clone();
        match outcome {
            Scripted::Accept => Ok(DebitResult {
                success: true,
                purchase_id: Some("P1".to_string()),
                uuid: Some("U1".to_string()),
                redirect_url: Some("https://gw/pay/1".to_string()),
                error_message: None,
            }),
            Scripted::Decline(message) => Ok(DebitResult {
                success: false,
                purchase_id: None,
                uuid: None,
                redirect_url: None,
                error_message: Some(message),
            }),
            Scripted::NetworkFailure => Err(PaymentError::NetworkError {
                message: "connection reset".to_string(),
            }),
            Scripted::Timeout => Err(PaymentError::Timeout { timeout_secs: 30 }),
        }
    }

    async fn refund(&self, request: RefundRequest) -> PaymentResult<RefundResult> {
        self.refund_calls.fetch_add(1, Ordering::SeqCst);
        self.refund_requests.lock().unwrap().push(request);
        let outcome = self.refund.lock().unwrap().clone();
        match outcome {
            Scripted::Accept => Ok(RefundResult {
                success: true,
                purchase_id: Some("P2".to_string()),
                uuid: Some("U2".to_string()),
                error_message: None,
            }),
            Scripted::Decline(message) => Ok(RefundResult {
                success: false,
                purchase_id: None,
                uuid: None,
                error_message: Some(message),
            }),
            Scripted::NetworkFailure => Err(PaymentError::NetworkError {
                message: "connection reset".to_string(),
            }),
            Scripted::Timeout => Err(PaymentError::Timeout { timeout_secs: 30 }),
        }
    }

    fn verify_callback(
        &self,
        _body: &[u8],
        _headers: &CallbackHeaders,
    ) -> PaymentResult<CallbackVerification> {
        if self.reject_signatures.load(Ordering::SeqCst) {
            Ok(CallbackVerification::invalid("signature mismatch"))
        } else {
            Ok(CallbackVerification::valid())
        }
    }
}

#[derive(Default)]
pub struct RecordingSender {
    sent: Mutex<Vec<EmailMessage>>,
    fail: AtomicBool,
}

impl RecordingSender {
    /// Make every following send fail after recording the attempt.
    pub fn fail_deliveries(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<EmailMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_to(&self, address: &str) -> Vec<EmailMessage> {
        self.sent()
            .into_iter()
            .filter(|m| m.to == address)
            .collect()
    }
}

#[async_trait]
impl EmailSender for RecordingSender {
    async fn send(&self, message: &EmailMessage) -> Result<SentEmail, NotificationError> {
        self.sent.lock().unwrap().push(message.clone());
        if self.fail.load(Ordering::SeqCst) {
            return Err(NotificationError::Delivery {
                message: "mail relay unavailable".to_string(),
            });
        }
        Ok(SentEmail {
            message_id: Some(format!("msg-{}", self.sent.lock().unwrap().len())),
        })
    }
}

pub struct Harness {
    pub coordinator: Arc<OrderStateCoordinator>,
    pub store: Arc<InMemoryStore>,
    pub gateway: Arc<ScriptedGateway>,
    pub emails: Arc<RecordingSender>,
}

impl Harness {
    pub fn new() -> Self {
        let store = Arc::new(InMemoryStore::new());
        let gateway = Arc::new(ScriptedGateway::new());
        let emails = Arc::new(RecordingSender::default());
        let notifications = Arc::new(NotificationService::new(emails.clone(), ADMIN_EMAIL));
        let coordinator = Arc::new(OrderStateCoordinator::new(
            store.clone(),
            store.clone(),
            gateway.clone(),
            notifications,
            CALLBACK_BASE,
        ));
        Self {
            coordinator,
            store,
            gateway,
            emails,
        }
    }

    pub async fn pending_order(&self, total: &str) -> Order {
        let order = Order::new_pending(CUSTOMER_EMAIL, Some(shipping()), dec(total));
        self.store.insert_order(order.clone()).await;
        order
    }
}

pub fn shipping() -> ShippingAddress {
    ShippingAddress {
        full_name: "Ana Novak".to_string(),
        address: "Presernova 10".to_string(),
        city: "Ljubljana".to_string(),
        country: "SI".to_string(),
        postal_code: "1000".to_string(),
        phone: "+38641555666".to_string(),
    }
}

pub fn dec(value: &str) -> BigDecimal {
    BigDecimal::from_str(value).unwrap()
}

pub fn callback(merchant_transaction_id: &str, result: &str, uuid: &str) -> CallbackPayload {
    CallbackPayload {
        merchant_transaction_id: merchant_transaction_id.to_string(),
        result: result.to_string(),
        status: None,
        uuid: Some(uuid.to_string()),
        purchase_id: None,
        transaction_type: Some("DEBIT".to_string()),
        message: None,
    }
}
