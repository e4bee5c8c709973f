//! Payment endpoints: create a debit, receive gateway callbacks, refund.

use crate::error::{AppError, AppErrorKind, AppResult, ValidationError};
use crate::middleware::logging::request_id;
use crate::payments::signature::SIGNATURE_HEADER;
use crate::payments::types::CallbackHeaders;
use crate::services::order_state_coordinator::{
    CreatePaymentRequest, CreatePaymentResponse, OrderStateCoordinator, RefundResponse,
    DEFAULT_CURRENCY,
};
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode, Uri},
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use bigdecimal::BigDecimal;
use serde::Deserialize;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Clone)]
pub struct PaymentState {
    pub coordinator: Arc<OrderStateCoordinator>,
}

/// Amount as sent by the storefront: a JSON number or a decimal string.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum AmountInput {
    Number(serde_json::Number),
    Text(String),
}

impl AmountInput {
    fn to_decimal(&self) -> AppResult<BigDecimal> {
        let text = match self {
            AmountInput::Number(n) => n.to_string(),
            AmountInput::Text(s) => s.trim().to_string(),
        };
        BigDecimal::from_str(&text).map_err(|_| {
            AppError::new(AppErrorKind::Validation(ValidationError::InvalidAmount {
                amount: text.clone(),
                reason: "not a decimal number".to_string(),
            }))
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreatePaymentBody {
    order_id: String,
    amount: AmountInput,
    #[serde(default)]
    currency: Option<String>,
    return_url: String,
}

impl CreatePaymentBody {
    fn into_request(self) -> AppResult<CreatePaymentRequest> {
        let order_id = Uuid::parse_str(self.order_id.trim()).map_err(|_| {
            AppError::new(AppErrorKind::Validation(ValidationError::InvalidPayload {
                reason: format!("orderId '{}' is not a valid id", self.order_id),
            }))
        })?;
        let currency = self
            .currency
            .filter(|c| !c.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_CURRENCY.to_string());

        Ok(CreatePaymentRequest {
            order_id,
            amount: self.amount.to_decimal()?,
            currency,
            return_url: self.return_url,
        })
    }
}

fn parse_body<T: serde::de::DeserializeOwned>(body: &[u8]) -> AppResult<T> {
    serde_json::from_slice(body).map_err(|e| {
        AppError::new(AppErrorKind::Validation(ValidationError::InvalidPayload {
            reason: e.to_string(),
        }))
    })
}

fn with_request_id(err: AppError, headers: &HeaderMap) -> AppError {
    match request_id(headers) {
        Some(id) => err.with_request_id(id),
        None => err,
    }
}

fn header_string(headers: &HeaderMap, name: impl header::AsHeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

fn callback_headers(headers: &HeaderMap, uri: &Uri) -> CallbackHeaders {
    CallbackHeaders {
        signature: header_string(headers, SIGNATURE_HEADER),
        date: header_string(headers, header::DATE),
        content_type: header_string(headers, header::CONTENT_TYPE),
        request_path: uri.path().to_string(),
    }
}

/// POST /payment
pub async fn create_payment(
    State(state): State<PaymentState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<CreatePaymentResponse>, AppError> {
    let request = parse_body::<CreatePaymentBody>(&body)
        .and_then(CreatePaymentBody::into_request)
        .map_err(|e| with_request_id(e, &headers))?;

    info!(order_id = %request.order_id, currency = %request.currency, "Create payment requested");

    state
        .coordinator
        .create_payment(request)
        .await
        .map(Json)
        .map_err(|e| with_request_id(e, &headers))
}

/// POST /payment/refund/{transactionId}
pub async fn refund_payment(
    State(state): State<PaymentState>,
    Path(transaction_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<RefundResponse>, AppError> {
    info!(merchant_transaction_id = %transaction_id, "Refund requested");

    state
        .coordinator
        .refund_payment(&transaction_id)
        .await
        .map(Json)
        .map_err(|e| with_request_id(e, &headers))
}

/// POST /payment/callback
pub async fn payment_callback(
    State(state): State<PaymentState>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    process_callback(&state, &uri, &headers, &body).await
}

/// POST /payment/{orderId}/callback
pub async fn order_payment_callback(
    State(state): State<PaymentState>,
    Path(order_id): Path<String>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    info!(order_id = %order_id, "Order callback received");
    process_callback(&state, &uri, &headers, &body).await
}

async fn process_callback(
    state: &PaymentState,
    uri: &Uri,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<(StatusCode, &'static str), AppError> {
    let callback_headers = callback_headers(headers, uri);

    match state
        .coordinator
        .handle_signed_callback(body, &callback_headers)
        .await
    {
        Ok(ack) => {
            info!(path = %uri.path(), outcome = ack.message(), "Callback acknowledged");
            Ok((StatusCode::OK, "OK"))
        }
        Err(e) => {
            warn!(path = %uri.path(), status = e.status_code(), error = %e, "Callback rejected");
            Err(with_request_id(e, headers))
        }
    }
}

pub fn router(state: PaymentState) -> Router {
    Router::new()
        .route("/payment", post(create_payment))
        .route("/payment/refund/{transaction_id}", post(refund_payment))
        .route("/payment/callback", post(payment_callback))
        .route("/payment/{order_id}/callback", post(order_payment_callback))
        .with_state(state)
}
