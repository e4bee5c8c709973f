use thiserror::Error;

pub type PaymentResult<T> = Result<T, PaymentError>;

#[derive(Debug, Clone, Error)]
pub enum PaymentError {
    #[error("Validation error: {message}")]
    ValidationError {
        message: String,
        field: Option<String>,
    },

    /// The gateway answered and said no (non-2xx, or `success: false`).
    #[error("Gateway rejected request: {message}")]
    GatewayRejected {
        message: String,
        gateway_code: Option<String>,
    },

    #[error("Network error: {message}")]
    NetworkError { message: String },

    #[error("Gateway did not respond within {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("Invalid gateway response: {message}")]
    InvalidResponse { message: String },

    #[error("Signature verification failed: {message}")]
    SignatureError { message: String },
}

impl PaymentError {
    /// Whether repeating the same request could succeed. Nothing in the payment
    /// core retries automatically; this only feeds the error body.
    pub fn is_retryable(&self) -> bool {
        match self {
            PaymentError::ValidationError { .. } => false,
            PaymentError::GatewayRejected { .. } => false,
            PaymentError::NetworkError { .. } => true,
            PaymentError::Timeout { .. } => true,
            PaymentError::InvalidResponse { .. } => false,
            PaymentError::SignatureError { .. } => false,
        }
    }

    /// Message the gateway itself supplied, if any.
    pub fn gateway_message(&self) -> Option<&str> {
        match self {
            PaymentError::GatewayRejected { message, .. } => Some(message.as_str()),
            _ => None,
        }
    }
}

impl From<PaymentError> for crate::error::AppError {
    fn from(err: PaymentError) -> Self {
        use crate::error::{AppError, AppErrorKind, DomainError, ExternalError, ValidationError};

        let kind = match &err {
            PaymentError::ValidationError { message, field } => match field {
                Some(field) if message.contains("required") => {
                    AppErrorKind::Validation(ValidationError::MissingField {
                        field: field.clone(),
                    })
                }
                _ => AppErrorKind::Validation(ValidationError::InvalidPayload {
                    reason: message.clone(),
                }),
            },
            PaymentError::Timeout { timeout_secs } => {
                AppErrorKind::External(ExternalError::Timeout {
                    service: "Payment gateway".to_string(),
                    timeout_secs: *timeout_secs,
                })
            }
            PaymentError::SignatureError { message } => {
                AppErrorKind::Domain(DomainError::InvalidSignature {
                    reason: message.clone(),
                })
            }
            PaymentError::GatewayRejected { .. }
            | PaymentError::NetworkError { .. }
            | PaymentError::InvalidResponse { .. } => {
                AppErrorKind::External(ExternalError::PaymentGateway {
                    message: err.gateway_message().map(|m| m.to_string()),
                    is_retryable: err.is_retryable(),
                })
            }
        };

        AppError::new(kind).with_context(err.to_string())
    }
}
