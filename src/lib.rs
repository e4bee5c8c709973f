//! Jewelry shop backend: payment transaction lifecycle against a Bankart-style
//! card gateway (signed debit/refund requests, callback reconciliation).

pub mod api;
pub mod config;
pub mod database;
pub mod error;
pub mod health;
pub mod logging;
pub mod middleware;
pub mod payments;
pub mod services;
