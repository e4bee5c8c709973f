use crate::payments::error::PaymentError;
use bigdecimal::{BigDecimal, RoundingMode};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Suffix appended to the merchant transaction id of refund requests.
pub const REFUND_SUFFIX: &str = "-refund";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Money {
    pub amount: BigDecimal,
    pub currency: String,
}

impl Money {
    pub fn new(amount: BigDecimal, currency: impl Into<String>) -> Self {
        Self {
            amount,
            currency: currency.into(),
        }
    }

    /// Parse a decimal from its text form. Floats are never used for money.
    pub fn parse(amount: &str, currency: impl Into<String>) -> Result<Self, PaymentError> {
        let parsed = BigDecimal::from_str(amount.trim()).map_err(|_| {
            PaymentError::ValidationError {
                message: format!("invalid decimal amount: {}", amount),
                field: Some("amount".to_string()),
            }
        })?;
        Ok(Self::new(parsed, currency))
    }

    /// Checks the amount the gateway would actually see, so a sub-cent
    /// value that rounds to `0.00` is rejected.
    pub fn validate_positive(&self, field: &str) -> Result<(), PaymentError> {
        if round_cents(&self.amount) <= BigDecimal::from(0) {
            return Err(PaymentError::ValidationError {
                message: "amount must be greater than zero".to_string(),
                field: Some(field.to_string()),
            });
        }
        let currency = self.currency.trim();
        if currency.is_empty() {
            return Err(PaymentError::ValidationError {
                message: "currency is required".to_string(),
                field: Some("currency".to_string()),
            });
        }
        if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(PaymentError::ValidationError {
                message: format!("currency must be a 3-letter ISO code: {}", currency),
                field: Some("currency".to_string()),
            });
        }
        Ok(())
    }

    /// Amount as sent to the gateway.
    pub fn gateway_amount(&self) -> String {
        format_amount(&self.amount)
    }
}

/// Render an amount with exactly two fraction digits, half-up.
///
/// `10` -> `"10.00"`, `10.5` -> `"10.50"`, `10.005` -> `"10.01"`.
pub fn format_amount(amount: &BigDecimal) -> String {
    // A zero loses its scale when displayed, so pad the fraction explicitly.
    let text = round_cents(amount).to_string();
    match text.split_once('.') {
        Some((whole, fraction)) => format!("{}.{:0<2}", whole, fraction),
        None => format!("{}.00", text),
    }
}

fn round_cents(amount: &BigDecimal) -> BigDecimal {
    amount.with_scale_round(2, RoundingMode::HalfUp)
}

/// Split "First Middle Last" into (`"First"`, `"Middle Last"`).
pub fn split_full_name(full_name: &str) -> (String, String) {
    let trimmed = full_name.trim();
    match trimmed.split_once(char::is_whitespace) {
        Some((first, rest)) => (first.to_string(), rest.trim().to_string()),
        None => (trimmed.to_string(), String::new()),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Customer {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub billing_address1: String,
    pub billing_city: String,
    pub billing_country: String,
    pub billing_postcode: String,
    pub billing_phone: String,
}

/// Where the gateway sends the shopper (and itself) once the payment settles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReturnUrls {
    pub success_url: String,
    pub cancel_url: String,
    pub error_url: String,
    pub callback_url: String,
}

impl ReturnUrls {
    /// Shopper-facing pages hang off `return_url`; the callback goes to the
    /// order-scoped endpoint under `callback_base_url`.
    pub fn for_order(return_url: &str, callback_base_url: &str, order_id: &str) -> Self {
        let return_url = return_url.trim_end_matches('/');
        Self {
            success_url: format!("{}/success", return_url),
            cancel_url: format!("{}/cancel", return_url),
            error_url: format!("{}/error", return_url),
            callback_url: format!(
                "{}/payment/{}/callback",
                callback_base_url.trim_end_matches('/'),
                order_id
            ),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DebitRequest {
    pub merchant_transaction_id: String,
    pub money: Money,
    pub customer: Customer,
    pub urls: ReturnUrls,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebitResult {
    pub success: bool,
    pub purchase_id: Option<String>,
    pub uuid: Option<String>,
    pub redirect_url: Option<String>,
    /// First gateway error message when `success` is false.
    pub error_message: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RefundRequest {
    pub merchant_transaction_id: String,
    /// Gateway uuid of the debit being refunded.
    pub reference_uuid: String,
    pub money: Money,
    pub callback_url: Option<String>,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefundResult {
    pub success: bool,
    pub purchase_id: Option<String>,
    pub uuid: Option<String>,
    pub error_message: Option<String>,
}

/// Body of the asynchronous notification the gateway posts back.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CallbackPayload {
    pub merchant_transaction_id: String,
    pub result: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub uuid: Option<String>,
    #[serde(default)]
    pub purchase_id: Option<String>,
    #[serde(default)]
    pub transaction_type: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl CallbackPayload {
    pub fn is_ok(&self) -> bool {
        self.result == "OK"
    }

    /// Merchant transaction id of the originating debit (refund suffix removed).
    pub fn base_merchant_transaction_id(&self) -> &str {
        self.merchant_transaction_id
            .strip_suffix(REFUND_SUFFIX)
            .unwrap_or(&self.merchant_transaction_id)
    }

    /// Text stored on a failed transaction.
    pub fn failure_message(&self) -> String {
        self.message
            .clone()
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| format!("Payment failed with result {}", self.result))
    }
}

/// Signature-related headers of an inbound callback.
#[derive(Debug, Clone, Default)]
pub struct CallbackHeaders {
    pub signature: Option<String>,
    pub date: Option<String>,
    pub content_type: Option<String>,
    pub request_path: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackVerification {
    pub valid: bool,
    pub reason: Option<String>,
}

impl CallbackVerification {
    pub fn valid() -> Self {
        Self {
            valid: true,
            reason: None,
        }
    }

    pub fn invalid(reason: impl Into<String>) -> Self {
        Self {
            valid: false,
            reason: Some(reason.into()),
        }
    }
}
