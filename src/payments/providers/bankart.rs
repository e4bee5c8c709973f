use crate::config::GatewayConfig;
use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::gateway::PaymentGateway;
use crate::payments::signature::{
    basic_auth_header, http_date, parse_http_date, sign, verify, CONTENT_TYPE_JSON,
    SIGNATURE_HEADER,
};
use crate::payments::types::{
    CallbackHeaders, CallbackVerification, Customer, DebitRequest, DebitResult, RefundRequest,
    RefundResult,
};
use crate::payments::utils::{GatewayHttpResponse, PaymentHttpClient};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{info, warn};

/// Client for the Bankart transaction API (`/transaction/{apiKey}/{action}`).
pub struct BankartGateway {
    config: GatewayConfig,
    http: PaymentHttpClient,
}

impl BankartGateway {
    pub fn new(config: GatewayConfig) -> PaymentResult<Self> {
        let http = PaymentHttpClient::new(config.timeout())?;
        Ok(Self { config, http })
    }

    fn endpoint(&self, action: &str) -> PaymentResult<reqwest::Url> {
        let raw = format!(
            "{}/transaction/{}/{}",
            self.config.base_url.trim_end_matches('/'),
            self.config.api_key,
            action
        );
        reqwest::Url::parse(&raw).map_err(|e| PaymentError::ValidationError {
            message: format!("invalid gateway URL {}: {}", raw, e),
            field: Some("BANKART_API_URL".to_string()),
        })
    }

    /// Headers for one signed POST. `request_path` is the path part of the
    /// endpoint URL, exactly as it appears on the request line.
    fn signed_headers(
        &self,
        request_path: &str,
        body: &[u8],
        date: &str,
    ) -> PaymentResult<Vec<(&'static str, String)>> {
        let signature = sign(
            &self.config.shared_secret,
            "POST",
            body,
            CONTENT_TYPE_JSON,
            date,
            request_path,
        )?;

        Ok(vec![
            ("Content-Type", CONTENT_TYPE_JSON.to_string()),
            (
                "Authorization",
                basic_auth_header(&self.config.username, &self.config.password),
            ),
            ("Date", date.to_string()),
            (SIGNATURE_HEADER, signature),
        ])
    }

    async fn send_signed<T: Serialize>(
        &self,
        action: &str,
        merchant_transaction_id: &str,
        payload: &T,
    ) -> PaymentResult<BankartResponse> {
        let body = serde_json::to_vec(payload).map_err(|e| PaymentError::ValidationError {
            message: format!("failed to encode {} request: {}", action, e),
            field: None,
        })?;
        let url = self.endpoint(action)?;
        let headers = self.signed_headers(url.path(), &body, &http_date(Utc::now()))?;

        info!(
            action = action,
            merchant_transaction_id = %merchant_transaction_id,
            "Sending gateway request"
        );

        let response = self.http.post_bytes(url, body, &headers).await?;
        Self::interpret(action, response)
    }

    fn interpret(action: &str, response: GatewayHttpResponse) -> PaymentResult<BankartResponse> {
        if !response.is_success() {
            let message = serde_json::from_str::<BankartResponse>(&response.body)
                .ok()
                .and_then(|parsed| parsed.first_error_message())
                .unwrap_or_else(|| format!("HTTP {}", response.status));
            warn!(
                action = action,
                status = response.status,
                message = %message,
                "Gateway returned non-success status"
            );
            return Err(PaymentError::GatewayRejected {
                message,
                gateway_code: Some(response.status.to_string()),
            });
        }

        serde_json::from_str::<BankartResponse>(&response.body).map_err(|e| {
            PaymentError::InvalidResponse {
                message: format!("invalid {} response JSON: {}", action, e),
            }
        })
    }
}

#[async_trait]
impl PaymentGateway for BankartGateway {
    async fn debit(&self, request: DebitRequest) -> PaymentResult<DebitResult> {
        request.money.validate_positive("amount")?;
        if request.customer.email.trim().is_empty() {
            return Err(PaymentError::ValidationError {
                message: "customer email is required".to_string(),
                field: Some("customer.email".to_string()),
            });
        }

        let payload = DebitBody {
            merchant_transaction_id: &request.merchant_transaction_id,
            amount: request.money.gateway_amount(),
            currency: &request.money.currency,
            success_url: &request.urls.success_url,
            cancel_url: &request.urls.cancel_url,
            error_url: &request.urls.error_url,
            callback_url: &request.urls.callback_url,
            description: &request.description,
            customer: &request.customer,
        };

        let raw = self
            .send_signed("debit", &request.merchant_transaction_id, &payload)
            .await?;

        if !raw.success {
            return Ok(DebitResult {
                success: false,
                purchase_id: raw.purchase_id.clone(),
                uuid: raw.uuid.clone(),
                redirect_url: None,
                error_message: raw.first_error_message(),
            });
        }

        let (purchase_id, uuid) = raw.require_ids("debit")?;
        let redirect_url = raw
            .redirect_url
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| PaymentError::InvalidResponse {
                message: format!(
                    "debit response without redirectUrl (returnType {})",
                    raw.return_type.as_deref().unwrap_or("unknown")
                ),
            })?;

        Ok(DebitResult {
            success: true,
            purchase_id: Some(purchase_id),
            uuid: Some(uuid),
            redirect_url: Some(redirect_url),
            error_message: None,
        })
    }

    async fn refund(&self, request: RefundRequest) -> PaymentResult<RefundResult> {
        request.money.validate_positive("amount")?;
        if request.reference_uuid.trim().is_empty() {
            return Err(PaymentError::ValidationError {
                message: "referenceUuid is required".to_string(),
                field: Some("referenceUuid".to_string()),
            });
        }

        let payload = RefundBody {
            merchant_transaction_id: &request.merchant_transaction_id,
            reference_uuid: &request.reference_uuid,
            amount: request.money.gateway_amount(),
            currency: &request.money.currency,
            callback_url: request.callback_url.as_deref(),
            description: &request.description,
        };

        let raw = self
            .send_signed("refund", &request.merchant_transaction_id, &payload)
            .await?;

        if !raw.success {
            return Ok(RefundResult {
                success: false,
                purchase_id: raw.purchase_id.clone(),
                uuid: raw.uuid.clone(),
                error_message: raw.first_error_message(),
            });
        }

        let (purchase_id, uuid) = raw.require_ids("refund")?;
        Ok(RefundResult {
            success: true,
            purchase_id: Some(purchase_id),
            uuid: Some(uuid),
            error_message: None,
        })
    }

    fn verify_callback(
        &self,
        body: &[u8],
        headers: &CallbackHeaders,
    ) -> PaymentResult<CallbackVerification> {
        if !self.config.verify_callback_signatures {
            return Ok(CallbackVerification::valid());
        }

        let Some(signature) = headers.signature.as_deref() else {
            return Ok(CallbackVerification::invalid("missing X-Signature header"));
        };
        let Some(date) = headers.date.as_deref() else {
            return Ok(CallbackVerification::invalid("missing Date header"));
        };
        let Some(sent_at) = parse_http_date(date) else {
            return Ok(CallbackVerification::invalid("unparseable Date header"));
        };
        let skew = (Utc::now() - sent_at).num_seconds().unsigned_abs();
        if skew > self.config.callback_max_skew_secs {
            warn!(
                date = %date,
                skew_secs = skew,
                max_skew_secs = self.config.callback_max_skew_secs,
                "Rejecting callback outside the allowed Date window"
            );
            return Ok(CallbackVerification::invalid("stale Date header"));
        }
        let content_type = headers.content_type.as_deref().unwrap_or(CONTENT_TYPE_JSON);

        if verify(
            &self.config.shared_secret,
            "POST",
            body,
            content_type,
            date,
            &headers.request_path,
            signature,
        ) {
            Ok(CallbackVerification::valid())
        } else {
            Ok(CallbackVerification::invalid("signature mismatch"))
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DebitBody<'a> {
    merchant_transaction_id: &'a str,
    amount: String,
    currency: &'a str,
    success_url: &'a str,
    cancel_url: &'a str,
    error_url: &'a str,
    callback_url: &'a str,
    description: &'a str,
    customer: &'a Customer,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RefundBody<'a> {
    merchant_transaction_id: &'a str,
    reference_uuid: &'a str,
    amount: String,
    currency: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    callback_url: Option<&'a str>,
    description: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BankartResponse {
    #[serde(default)]
    success: bool,
    uuid: Option<String>,
    purchase_id: Option<String>,
    return_type: Option<String>,
    redirect_url: Option<String>,
    #[serde(default)]
    errors: Vec<BankartErrorItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BankartErrorItem {
    error_message: Option<String>,
    #[allow(dead_code)]
    error_code: Option<JsonValue>,
    adapter_message: Option<String>,
}

impl BankartResponse {
    fn first_error_message(&self) -> Option<String> {
        self.errors.iter().find_map(|e| {
            e.error_message
                .clone()
                .or_else(|| e.adapter_message.clone())
                .filter(|m| !m.trim().is_empty())
        })
    }

    fn require_ids(&self, action: &str) -> PaymentResult<(String, String)> {
        match (&self.purchase_id, &self.uuid) {
            (Some(purchase_id), Some(uuid)) => Ok((purchase_id.clone(), uuid.clone())),
            _ => Err(PaymentError::InvalidResponse {
                message: format!("{} response without purchaseId or uuid", action),
            }),
        }
    }
}
