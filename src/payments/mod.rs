//! Payment gateway integration: request signing, wire types and the
//! Bankart HTTP client.

pub mod error;
pub mod gateway;
pub mod providers;
pub mod signature;
pub mod types;
pub mod utils;

pub use error::{PaymentError, PaymentResult};
pub use gateway::PaymentGateway;
pub use providers::bankart::BankartGateway;
