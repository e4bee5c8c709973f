//! Customer and admin email notifications.
//!
//! Delivery is best effort: every failure is logged here and swallowed, so a
//! broken mail provider can never roll back or block a payment.

use crate::config::EmailConfig;
use crate::database::order_repository::Order;
use crate::database::payment_transaction_repository::PaymentTransaction;
use crate::logging::mask_email;
use crate::payments::types::format_amount;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

const SENDGRID_API_URL: &str = "https://api.sendgrid.com";

#[derive(Debug, Clone, Error)]
pub enum NotificationError {
    #[error("email delivery failed: {message}")]
    Delivery { message: String },

    #[error("email provider did not respond within {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("email provider rejected message: HTTP {status}")]
    Rejected { status: u16, body: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub text: String,
    pub html: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SentEmail {
    pub message_id: Option<String>,
}

/// Opaque outbound email capability.
#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send(&self, message: &EmailMessage) -> Result<SentEmail, NotificationError>;
}

/// SendGrid v3 `mail/send` API
pub struct SendGridEmailSender {
    client: reqwest::Client,
    api_key: String,
    from_address: String,
    base_url: String,
    timeout_secs: u64,
}

impl SendGridEmailSender {
    pub fn new(
        api_key: impl Into<String>,
        from_address: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, NotificationError> {
        Self::with_base_url(api_key, from_address, timeout, SENDGRID_API_URL)
    }

    pub fn with_base_url(
        api_key: impl Into<String>,
        from_address: impl Into<String>,
        timeout: Duration,
        base_url: impl Into<String>,
    ) -> Result<Self, NotificationError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| NotificationError::Delivery {
                message: format!("failed to initialize HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            api_key: api_key.into(),
            from_address: from_address.into(),
            base_url: base_url.into(),
            timeout_secs: timeout.as_secs(),
        })
    }
}

#[async_trait]
impl EmailSender for SendGridEmailSender {
    async fn send(&self, message: &EmailMessage) -> Result<SentEmail, NotificationError> {
        let payload = json!({
            "personalizations": [{ "to": [{ "email": message.to }] }],
            "from": { "email": self.from_address },
            "subject": message.subject,
            "content": [
                { "type": "text/plain", "value": message.text },
                { "type": "text/html", "value": message.html }
            ]
        });

        let response = self
            .client
            .post(format!(
                "{}/v3/mail/send",
                self.base_url.trim_end_matches('/')
            ))
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    NotificationError::Timeout {
                        timeout_secs: self.timeout_secs,
                    }
                } else {
                    NotificationError::Delivery {
                        message: e.to_string(),
                    }
                }
            })?;

        let status = response.status();
        let message_id = response
            .headers()
            .get("x-message-id")
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string());

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotificationError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        Ok(SentEmail { message_id })
    }
}

/// Writes emails to the log instead of sending them
#[derive(Debug, Clone, Copy, Default)]
pub struct LogEmailSender;

#[async_trait]
impl EmailSender for LogEmailSender {
    async fn send(&self, message: &EmailMessage) -> Result<SentEmail, NotificationError> {
        info!(
            to = %mask_email(&message.to),
            subject = %message.subject,
            "Email not sent (log-only mailer)"
        );
        Ok(SentEmail::default())
    }
}

/// Pick the sender for the configuration: SendGrid when a key is present.
pub fn email_sender_from_config(
    config: &EmailConfig,
) -> Result<Arc<dyn EmailSender>, NotificationError> {
    match &config.sendgrid_api_key {
        Some(api_key) => Ok(Arc::new(SendGridEmailSender::new(
            api_key.clone(),
            config.from_address.clone(),
            Duration::from_secs(config.timeout_secs),
        )?)),
        None => Ok(Arc::new(LogEmailSender)),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    OrderConfirmation,
    AdminPaidOrder,
    RefundConfirmation,
}

pub struct NotificationService {
    sender: Arc<dyn EmailSender>,
    admin_address: String,
}

impl NotificationService {
    pub fn new(sender: Arc<dyn EmailSender>, admin_address: impl Into<String>) -> Self {
        Self {
            sender,
            admin_address: admin_address.into(),
        }
    }

    /// Customer confirmation and admin notice for a completed payment, sent
    /// concurrently.
    pub async fn notify_payment_completed(&self, order: &Order, transaction: &PaymentTransaction) {
        futures::future::join(
            self.send_order_confirmation(order, transaction),
            self.notify_admin_paid_order(order, transaction),
        )
        .await;
    }

    pub async fn send_order_confirmation(&self, order: &Order, transaction: &PaymentTransaction) {
        let amount = format!("{} {}", format_amount(&transaction.amount), transaction.currency);
        let message = EmailMessage {
            to: order.email.clone(),
            subject: format!("Order confirmation #{}", order.id),
            text: format!(
                "Thank you for your order. We received your payment of {}. Order number: {}.",
                amount, order.id
            ),
            html: format!(
                "<p>Thank you for your order.</p><p>We received your payment of <strong>{}</strong>.</p><p>Order number: {}</p>",
                amount, order.id
            ),
        };
        self.deliver(NotificationType::OrderConfirmation, order, message)
            .await;
    }

    pub async fn notify_admin_paid_order(&self, order: &Order, transaction: &PaymentTransaction) {
        let amount = format!("{} {}", format_amount(&transaction.amount), transaction.currency);
        let message = EmailMessage {
            to: self.admin_address.clone(),
            subject: format!("New paid order #{}", order.id),
            text: format!(
                "Order {} was paid ({}). Customer: {}. Items: {}.",
                order.id,
                amount,
                order.email,
                order.items.len()
            ),
            html: format!(
                "<p>Order <strong>{}</strong> was paid ({}).</p><p>Customer: {}</p><p>Items: {}</p>",
                order.id,
                amount,
                order.email,
                order.items.len()
            ),
        };
        self.deliver(NotificationType::AdminPaidOrder, order, message)
            .await;
    }

    pub async fn send_refund_confirmation(&self, order: &Order, refund: &PaymentTransaction) {
        let amount = format!("{} {}", format_amount(&refund.amount), refund.currency);
        let message = EmailMessage {
            to: order.email.clone(),
            subject: format!("Refund for order #{}", order.id),
            text: format!(
                "Your payment of {} for order {} has been refunded.",
                amount, order.id
            ),
            html: format!(
                "<p>Your payment of <strong>{}</strong> for order {} has been refunded.</p>",
                amount, order.id
            ),
        };
        self.deliver(NotificationType::RefundConfirmation, order, message)
            .await;
    }

    async fn deliver(&self, kind: NotificationType, order: &Order, message: EmailMessage) {
        match self.sender.send(&message).await {
            Ok(sent) => info!(
                order_id = %order.id,
                notification = ?kind,
                to = %mask_email(&message.to),
                message_id = ?sent.message_id,
                "Notification sent"
            ),
            Err(e) => warn!(
                order_id = %order.id,
                notification = ?kind,
                to = %mask_email(&message.to),
                error = %e,
                "Notification failed"
            ),
        }
    }
}
