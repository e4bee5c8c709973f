//! Services module for business logic and integrations

pub mod notification;
pub mod order_state_coordinator;

pub use crate::services::notification::{EmailSender, NotificationService};
pub use crate::services::order_state_coordinator::{
    CallbackAck, CreatePaymentRequest, CreatePaymentResponse, OrderStateCoordinator,
    RefundResponse,
};
