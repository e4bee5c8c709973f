//! Unified error handling for the payment backend
//!
//! Every layer converges on [`AppError`], which owns the mapping from error
//! kind to HTTP status, machine-readable code and user-facing message. Call
//! sites never inline user-facing text.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Error codes for programmatic handling by API clients
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorCode {
    // Domain errors (4xx)
    #[serde(rename = "ORDER_NOT_FOUND")]
    OrderNotFound,
    #[serde(rename = "TRANSACTION_NOT_FOUND")]
    TransactionNotFound,
    #[serde(rename = "DUPLICATE_TRANSACTION")]
    DuplicateTransaction,
    #[serde(rename = "INVALID_ORDER_STATE")]
    InvalidOrderState,
    #[serde(rename = "REFUND_NOT_ALLOWED")]
    RefundNotAllowed,
    #[serde(rename = "INVALID_SIGNATURE")]
    InvalidSignature,

    // Infrastructure errors (5xx)
    #[serde(rename = "DATABASE_ERROR")]
    DatabaseError,
    #[serde(rename = "CONFIGURATION_ERROR")]
    ConfigurationError,

    // External errors
    #[serde(rename = "PAYMENT_GATEWAY_ERROR")]
    PaymentGatewayError,
    #[serde(rename = "EXTERNAL_SERVICE_TIMEOUT")]
    ExternalServiceTimeout,

    // Generic
    #[serde(rename = "INTERNAL_ERROR")]
    InternalError,
    #[serde(rename = "VALIDATION_ERROR")]
    ValidationError,
}

/// Payment lifecycle business errors
#[derive(Debug, Clone)]
pub enum DomainError {
    /// Order with given id doesn't exist
    OrderNotFound { order_id: String },
    /// No payment transaction for the merchant transaction id
    TransactionNotFound { merchant_transaction_id: String },
    /// A non-failed transaction already exists for the merchant transaction id
    DuplicateTransaction { merchant_transaction_id: String },
    /// Order is not in a state that allows the requested payment operation
    InvalidOrderState { order_id: String, status: String },
    /// Only completed payments can be refunded
    RefundNotAllowed {
        merchant_transaction_id: String,
        status: String,
    },
    /// Inbound request signature did not match
    InvalidSignature { reason: String },
}

/// Infrastructure-level errors (database, configuration)
#[derive(Debug, Clone)]
pub enum InfrastructureError {
    /// Database connection or query failure
    Database { message: String, is_retryable: bool },
    /// Missing or invalid configuration
    Configuration { message: String },
}

/// External service errors
#[derive(Debug, Clone)]
pub enum ExternalError {
    /// The payment gateway rejected the request or answered with garbage.
    /// `message` is the gateway's own text when it provided one.
    PaymentGateway {
        message: Option<String>,
        is_retryable: bool,
    },
    /// External service timeout
    Timeout { service: String, timeout_secs: u64 },
}

/// Input validation errors
#[derive(Debug, Clone)]
pub enum ValidationError {
    /// Invalid amount (format or value)
    InvalidAmount { amount: String, reason: String },
    /// Unsupported or invalid currency
    InvalidCurrency { currency: String },
    /// Required field missing
    MissingField { field: String },
    /// Request body could not be understood
    InvalidPayload { reason: String },
}

/// Unified application error type
#[derive(Debug, Clone)]
pub struct AppError {
    pub kind: AppErrorKind,
    pub request_id: Option<String>,
    pub context: Option<String>,
}

#[derive(Debug, Clone)]
pub enum AppErrorKind {
    Domain(DomainError),
    Infrastructure(InfrastructureError),
    External(ExternalError),
    Validation(ValidationError),
}

impl AppError {
    pub fn new(kind: AppErrorKind) -> Self {
        Self {
            kind,
            request_id: None,
            context: None,
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn order_not_found(order_id: impl Into<String>) -> Self {
        Self::new(AppErrorKind::Domain(DomainError::OrderNotFound {
            order_id: order_id.into(),
        }))
    }

    pub fn transaction_not_found(merchant_transaction_id: impl Into<String>) -> Self {
        Self::new(AppErrorKind::Domain(DomainError::TransactionNotFound {
            merchant_transaction_id: merchant_transaction_id.into(),
        }))
    }

    pub fn missing_field(field: impl Into<String>) -> Self {
        Self::new(AppErrorKind::Validation(ValidationError::MissingField {
            field: field.into(),
        }))
    }

    /// Map error to HTTP status code
    pub fn status_code(&self) -> u16 {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::OrderNotFound { .. } => 404,
                DomainError::TransactionNotFound { .. } => 404,
                DomainError::DuplicateTransaction { .. } => 409, // Conflict
                DomainError::InvalidOrderState { .. } => 400,
                DomainError::RefundNotAllowed { .. } => 400,
                DomainError::InvalidSignature { .. } => 401,
            },
            AppErrorKind::Infrastructure(_) => 500,
            // Gateway failures are reported to the shopper as a bad request; the
            // shopper has to start the payment again.
            AppErrorKind::External(_) => 400,
            AppErrorKind::Validation(_) => 400,
        }
    }

    /// Get error code for client handling
    pub fn error_code(&self) -> ErrorCode {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::OrderNotFound { .. } => ErrorCode::OrderNotFound,
                DomainError::TransactionNotFound { .. } => ErrorCode::TransactionNotFound,
                DomainError::DuplicateTransaction { .. } => ErrorCode::DuplicateTransaction,
                DomainError::InvalidOrderState { .. } => ErrorCode::InvalidOrderState,
                DomainError::RefundNotAllowed { .. } => ErrorCode::RefundNotAllowed,
                DomainError::InvalidSignature { .. } => ErrorCode::InvalidSignature,
            },
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { .. } => ErrorCode::DatabaseError,
                InfrastructureError::Configuration { .. } => ErrorCode::ConfigurationError,
            },
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentGateway { .. } => ErrorCode::PaymentGatewayError,
                ExternalError::Timeout { .. } => ErrorCode::ExternalServiceTimeout,
            },
            AppErrorKind::Validation(_) => ErrorCode::ValidationError,
        }
    }

    /// Get user-friendly error message
    pub fn user_message(&self) -> String {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::OrderNotFound { .. } => "Order not found".to_string(),
                DomainError::TransactionNotFound { .. } => "Transaction not found".to_string(),
                DomainError::DuplicateTransaction { .. } => {
                    "A payment for this order is already in progress".to_string()
                }
                DomainError::InvalidOrderState { status, .. } => {
                    format!("Order is not in pending state (current: {})", status)
                }
                DomainError::RefundNotAllowed { status, .. } => {
                    format!("Transaction is not completed (current: {})", status)
                }
                DomainError::InvalidSignature { .. } => "Invalid signature".to_string(),
            },
            AppErrorKind::Infrastructure(_) => {
                "Service temporarily unavailable. Please try again later".to_string()
            }
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentGateway { message, .. } => message
                    .clone()
                    .filter(|m| !m.trim().is_empty())
                    .unwrap_or_else(|| "Payment processing failed".to_string()),
                ExternalError::Timeout {
                    service,
                    timeout_secs,
                } => format!(
                    "{} request timed out after {} seconds. Please try again",
                    service, timeout_secs
                ),
            },
            AppErrorKind::Validation(err) => match err {
                ValidationError::InvalidAmount { amount, reason } => {
                    format!("Invalid amount '{}': {}", amount, reason)
                }
                ValidationError::InvalidCurrency { currency } => {
                    format!("Invalid currency '{}'", currency)
                }
                ValidationError::MissingField { field } => {
                    format!("Required field '{}' is missing", field)
                }
                ValidationError::InvalidPayload { reason } => {
                    format!("Invalid request: {}", reason)
                }
            },
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        match &self.kind {
            AppErrorKind::Domain(_) => false,
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { is_retryable, .. } => *is_retryable,
                InfrastructureError::Configuration { .. } => false,
            },
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentGateway { is_retryable, .. } => *is_retryable,
                ExternalError::Timeout { .. } => true,
            },
            AppErrorKind::Validation(_) => false,
        }
    }

    /// Request field the error is about, when the client sent a bad one.
    pub fn field(&self) -> Option<&str> {
        match &self.kind {
            AppErrorKind::Validation(ValidationError::MissingField { field }) => Some(field),
            AppErrorKind::Validation(ValidationError::InvalidAmount { .. }) => Some("amount"),
            AppErrorKind::Validation(ValidationError::InvalidCurrency { .. }) => Some("currency"),
            _ => None,
        }
    }

    /// Not-found errors are the only callback failures the gateway should retry.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self.kind,
            AppErrorKind::Domain(DomainError::OrderNotFound { .. })
                | AppErrorKind::Domain(DomainError::TransactionNotFound { .. })
        )
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.context {
            Some(context) => write!(f, "{} ({})", self.user_message(), context),
            None => write!(f, "{}", self.user_message()),
        }
    }
}

impl std::error::Error for AppError {}

impl From<crate::config::ConfigError> for AppError {
    fn from(err: crate::config::ConfigError) -> Self {
        AppError::new(AppErrorKind::Infrastructure(
            InfrastructureError::Configuration {
                message: err.to_string(),
            },
        ))
    }
}

// From<DatabaseError> lives in database/error.rs, From<PaymentError> in payments/error.rs

/// JSON body of every failed API call.
#[derive(Debug, Serialize)]
struct ErrorBody<'a> {
    error: ErrorCode,
    message: String,
    request_id: Option<&'a str>,
    timestamp: String,
    retryable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    field: Option<&'a str>,
}

impl<'a> From<&'a AppError> for ErrorBody<'a> {
    fn from(err: &'a AppError) -> Self {
        Self {
            error: err.error_code(),
            message: err.user_message(),
            request_id: err.request_id.as_deref(),
            timestamp: Utc::now().to_rfc3339(),
            retryable: err.is_retryable(),
            field: err.field(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let code = self.error_code();

        // Context stays in the logs; the body only carries the user message.
        match &self.kind {
            AppErrorKind::Infrastructure(_) => tracing::error!(
                code = ?code,
                request_id = ?self.request_id,
                context = ?self.context,
                error = ?self.kind,
                "Request failed on storage or configuration"
            ),
            AppErrorKind::External(_) => tracing::warn!(
                code = ?code,
                request_id = ?self.request_id,
                context = ?self.context,
                retryable = self.is_retryable(),
                "Payment gateway call failed"
            ),
            AppErrorKind::Domain(DomainError::InvalidSignature { reason }) => tracing::warn!(
                request_id = ?self.request_id,
                reason = %reason,
                "Rejected unsigned or mis-signed request"
            ),
            _ => tracing::info!(
                code = ?code,
                request_id = ?self.request_id,
                status = status.as_u16(),
                "Request rejected"
            ),
        }

        (status, Json(ErrorBody::from(&self))).into_response()
    }
}

/// Result type for operations that can fail with AppError
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_errors_map_to_404() {
        let error = AppError::order_not_found("O1");
        assert_eq!(error.status_code(), 404);
        assert_eq!(error.error_code(), ErrorCode::OrderNotFound);
        assert!(error.is_not_found());

        let error = AppError::transaction_not_found("O1-refund");
        assert_eq!(error.status_code(), 404);
        assert!(error.is_not_found());
    }

    #[test]
    fn test_duplicate_transaction_is_conflict() {
        let error = AppError::new(AppErrorKind::Domain(DomainError::DuplicateTransaction {
            merchant_transaction_id: "O1".to_string(),
        }));

        assert_eq!(error.status_code(), 409);
        assert_eq!(error.error_code(), ErrorCode::DuplicateTransaction);
        assert!(!error.is_retryable());
    }

    #[test]
    fn test_gateway_error_uses_gateway_message() {
        let error = AppError::new(AppErrorKind::External(ExternalError::PaymentGateway {
            message: Some("Card declined".to_string()),
            is_retryable: false,
        }));
        assert_eq!(error.status_code(), 400);
        assert_eq!(error.user_message(), "Card declined");

        let error = AppError::new(AppErrorKind::External(ExternalError::PaymentGateway {
            message: None,
            is_retryable: false,
        }));
        assert_eq!(error.user_message(), "Payment processing failed");
    }

    #[test]
    fn test_signature_error_is_unauthorized() {
        let error = AppError::new(AppErrorKind::Domain(DomainError::InvalidSignature {
            reason: "mismatch".to_string(),
        }));
        assert_eq!(error.status_code(), 401);
        assert_eq!(error.user_message(), "Invalid signature");
    }

    #[test]
    fn test_validation_error() {
        let error = AppError::new(AppErrorKind::Validation(ValidationError::InvalidAmount {
            amount: "-1".to_string(),
            reason: "amount must be greater than zero".to_string(),
        }));

        assert_eq!(error.status_code(), 400);
        assert_eq!(error.error_code(), ErrorCode::ValidationError);
        assert!(!error.is_retryable());
    }

    async fn response_json(error: AppError) -> (StatusCode, serde_json::Value) {
        let response = error.into_response();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_response_body_carries_code_and_request_id() {
        let error = AppError::new(AppErrorKind::Domain(DomainError::RefundNotAllowed {
            merchant_transaction_id: "O1".to_string(),
            status: "pending".to_string(),
        }))
        .with_request_id("req_123");

        let (status, body) = response_json(error).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "REFUND_NOT_ALLOWED");
        assert_eq!(body["message"], "Transaction is not completed (current: pending)");
        assert_eq!(body["request_id"], "req_123");
        assert_eq!(body["retryable"], false);
        assert!(body["timestamp"].is_string());
        assert!(body.get("field").is_none());
    }

    #[tokio::test]
    async fn test_validation_response_names_the_field() {
        let (status, body) = response_json(AppError::missing_field("returnUrl")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["field"], "returnUrl");
        assert!(body["request_id"].is_null());
    }

    #[tokio::test]
    async fn test_storage_failure_hides_context() {
        let error = AppError::new(AppErrorKind::Infrastructure(InfrastructureError::Database {
            message: "connection refused".to_string(),
            is_retryable: true,
        }))
        .with_context("settle callback O1");

        let (status, body) = response_json(error).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "DATABASE_ERROR");
        assert_eq!(body["retryable"], true);
        assert!(!body.to_string().contains("settle callback"));
        assert!(!body.to_string().contains("connection refused"));
    }

    #[tokio::test]
    async fn test_gateway_timeout_response_is_retryable() {
        let error = AppError::new(AppErrorKind::External(ExternalError::Timeout {
            service: "Payment gateway".to_string(),
            timeout_secs: 20,
        }));
        let (status, body) = response_json(error).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "EXTERNAL_SERVICE_TIMEOUT");
        assert_eq!(body["retryable"], true);
    }

    #[test]
    fn test_context_is_appended_to_display() {
        let error = AppError::missing_field("shippingAddress").with_context("order O1");
        assert_eq!(
            error.to_string(),
            "Required field 'shippingAddress' is missing (order O1)"
        );
    }
}
