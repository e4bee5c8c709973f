//! HTTP API routes

pub mod payments;

use crate::health::{health_routes, HealthChecker};
use crate::middleware::logging::{request_logging_middleware, UuidRequestId};
use axum::Router;
use tower::ServiceBuilder;
use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};

pub use payments::{router as payment_routes, PaymentState};

/// Full application router with request-id and request logging layers.
pub fn app(payment_state: PaymentState, health: HealthChecker) -> Router {
    Router::new()
        .merge(payment_routes(payment_state))
        .merge(health_routes(health))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(UuidRequestId))
                .layer(axum::middleware::from_fn(request_logging_middleware))
                .layer(PropagateRequestIdLayer::x_request_id()),
        )
}
