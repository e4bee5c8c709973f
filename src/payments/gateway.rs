use crate::payments::error::PaymentResult;
use crate::payments::types::{
    CallbackHeaders, CallbackPayload, CallbackVerification, DebitRequest, DebitResult,
    RefundRequest, RefundResult,
};
use async_trait::async_trait;

/// Payment gateway operations the order coordinator depends on.
///
/// Implementations perform exactly one outbound call per invocation and never
/// retry on their own.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Start a hosted-payment-page debit.
    async fn debit(&self, request: DebitRequest) -> PaymentResult<DebitResult>;

    /// Refund a previously completed debit, referenced by its gateway uuid.
    async fn refund(&self, request: RefundRequest) -> PaymentResult<RefundResult>;

    /// Check the signature of a raw callback body.
    fn verify_callback(
        &self,
        body: &[u8],
        headers: &CallbackHeaders,
    ) -> PaymentResult<CallbackVerification>;

    fn parse_callback(&self, body: &[u8]) -> PaymentResult<CallbackPayload> {
        serde_json::from_slice(body).map_err(|e| {
            crate::payments::error::PaymentError::ValidationError {
                message: format!("invalid callback payload: {}", e),
                field: None,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::types::{Customer, Money, ReturnUrls};
    use bigdecimal::BigDecimal;

    struct MockGateway;

    #[async_trait]
    impl PaymentGateway for MockGateway {
        async fn debit(&self, request: DebitRequest) -> PaymentResult<DebitResult> {
            Ok(DebitResult {
                success: true,
                purchase_id: Some(format!("p-{}", request.merchant_transaction_id)),
                uuid: Some("mock-uuid".to_string()),
                redirect_url: Some("https://pay.example.com/hpp".to_string()),
                error_message: None,
            })
        }

        async fn refund(&self, request: RefundRequest) -> PaymentResult<RefundResult> {
            Ok(RefundResult {
                success: true,
                purchase_id: Some(format!("p-{}", request.merchant_transaction_id)),
                uuid: Some("mock-refund-uuid".to_string()),
                error_message: None,
            })
        }

        fn verify_callback(
            &self,
            _body: &[u8],
            _headers: &CallbackHeaders,
        ) -> PaymentResult<CallbackVerification> {
            Ok(CallbackVerification::valid())
        }
    }

    #[tokio::test]
    async fn trait_can_be_implemented_by_mock_gateway() {
        let gateway: Box<dyn PaymentGateway> = Box::new(MockGateway);
        let result = gateway
            .debit(DebitRequest {
                merchant_transaction_id: "O1".to_string(),
                money: Money::new(BigDecimal::from(100), "EUR"),
                customer: Customer {
                    first_name: "Ana".to_string(),
                    last_name: "Novak".to_string(),
                    email: "ana@example.com".to_string(),
                    billing_address1: "Main 1".to_string(),
                    billing_city: "Ljubljana".to_string(),
                    billing_country: "SI".to_string(),
                    billing_postcode: "1000".to_string(),
                    billing_phone: "+38640111222".to_string(),
                },
                urls: ReturnUrls::for_order("https://shop", "https://api", "O1"),
                description: "Order O1".to_string(),
            })
            .await
            .expect("debit should succeed");
        assert!(result.success);
        assert_eq!(result.purchase_id.as_deref(), Some("p-O1"));
    }

    #[test]
    fn default_parse_callback_reads_json() {
        let gateway = MockGateway;
        let payload = gateway
            .parse_callback(br#"{"merchantTransactionId":"O1","result":"OK"}"#)
            .unwrap();
        assert_eq!(payload.merchant_transaction_id, "O1");
        assert!(gateway.parse_callback(b"not json").is_err());
    }
}
