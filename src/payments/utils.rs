use crate::payments::error::{PaymentError, PaymentResult};
use reqwest::Client;
use std::time::Duration;

/// Raw gateway answer: status plus body text, before any interpretation.
#[derive(Debug, Clone)]
pub struct GatewayHttpResponse {
    pub status: u16,
    pub body: String,
}

impl GatewayHttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Thin wrapper over `reqwest` for the gateway's signed JSON calls.
///
/// The body is passed as bytes so the caller can sign exactly what is sent.
/// One attempt per call: a payment request must never be replayed blindly.
#[derive(Clone)]
pub struct PaymentHttpClient {
    client: Client,
    timeout: Duration,
}

impl PaymentHttpClient {
    pub fn new(timeout: Duration) -> PaymentResult<Self> {
        let client =
            Client::builder()
                .timeout(timeout)
                .build()
                .map_err(|e| PaymentError::NetworkError {
                    message: format!("failed to initialize HTTP client: {}", e),
                })?;

        Ok(Self { client, timeout })
    }

    pub async fn post_bytes(
        &self,
        url: reqwest::Url,
        body: Vec<u8>,
        headers: &[(&str, String)],
    ) -> PaymentResult<GatewayHttpResponse> {
        let mut request = self.client.post(url).timeout(self.timeout);
        for (name, value) in headers {
            request = request.header(*name, value.as_str());
        }

        let response = request.body(body).send().await.map_err(|e| {
            if e.is_timeout() {
                PaymentError::Timeout {
                    timeout_secs: self.timeout.as_secs(),
                }
            } else {
                PaymentError::NetworkError {
                    message: format!("gateway request failed: {}", e),
                }
            }
        })?;

        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| {
            if e.is_timeout() {
                PaymentError::Timeout {
                    timeout_secs: self.timeout.as_secs(),
                }
            } else {
                PaymentError::NetworkError {
                    message: format!("failed to read gateway response: {}", e),
                }
            }
        })?;

        Ok(GatewayHttpResponse { status, body })
    }
}
