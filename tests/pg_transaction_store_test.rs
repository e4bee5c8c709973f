//! Postgres transaction store tests
//!
//! Exercise the conditional updates and the partial unique index against a
//! real database. Run with `DATABASE_URL` pointing at a disposable database:
//!
//! ```text
//! cargo test --test pg_transaction_store_test -- --ignored
//! ```

mod common;

use bigdecimal::BigDecimal;
use common::{ScriptedGateway, ADMIN_EMAIL, CALLBACK_BASE, CUSTOMER_EMAIL, RETURN_URL};
use jewelry_backend::database::order_repository::{OrderStatus, PaymentStatus, PgOrderRepository};
use jewelry_backend::database::payment_transaction_repository::{
    PaymentTransaction, PgTransactionStore, TransactionKind, TransactionStatus,
};
use jewelry_backend::database::repository::{
    CallbackSettlement, GatewayReference, OrderRepository, RefundOutcome, SettleOutcome,
    TransactionStore,
};
use jewelry_backend::database::run_migrations;
use jewelry_backend::payments::types::Money;
use jewelry_backend::services::notification::NotificationService;
use jewelry_backend::services::{CreatePaymentRequest, OrderStateCoordinator};
use sqlx::PgPool;
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

async fn setup_test_db() -> PgPool {
    let database_url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| "postgresql://localhost/jewelry_test".to_string());

    let pool = PgPool::connect(&database_url)
        .await
        .expect("Failed to connect to test database");
    run_migrations(&pool)
        .await
        .expect("Failed to run migrations");
    pool
}

/// Insert a pending order with a shipping address and return its id.
async fn seed_order(pool: &PgPool, total: &str) -> Uuid {
    let id = Uuid::new_v4();
    let total = BigDecimal::from_str(total).unwrap();

    sqlx::query(
        "INSERT INTO orders (id, email, subtotal, total, status, payment_status)
         VALUES ($1, $2, $3, $3, 'pending', 'pending')",
    )
    .bind(id)
    .bind(CUSTOMER_EMAIL)
    .bind(&total)
    .execute(pool)
    .await
    .unwrap();

    sqlx::query(
        "INSERT INTO shipping_addresses
         (order_id, full_name, address, city, country, postal_code, phone)
         VALUES ($1, 'Ana Novak', 'Presernova 10', 'Ljubljana', 'SI', '1000', '+38641555666')",
    )
    .bind(id)
    .execute(pool)
    .await
    .unwrap();

    id
}

fn debit_for(order_id: Uuid, amount: &str) -> PaymentTransaction {
    PaymentTransaction::new_debit(order_id, &Money::parse(amount, "EUR").unwrap())
}

#[tokio::test]
#[ignore] // Requires database running
async fn test_active_debit_conflicts_until_failed() {
    let pool = setup_test_db().await;
    let store = PgTransactionStore::new(pool.clone());
    let order_id = seed_order(&pool, "49.99").await;

    let first = store.create(&debit_for(order_id, "49.99")).await.unwrap();
    let err = store
        .create(&debit_for(order_id, "49.99"))
        .await
        .unwrap_err();
    assert!(err.is_unique_violation());

    let failed = store.mark_failed(first.id, "declined").await.unwrap();
    assert_eq!(failed.map(|t| t.status), Some(TransactionStatus::Failed));

    let retry = store.create(&debit_for(order_id, "49.99")).await.unwrap();
    let latest = store
        .find_by_merchant_transaction_id(&order_id.to_string())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(latest.id, retry.id);
}

#[tokio::test]
#[ignore] // Requires database running
async fn test_second_payment_for_active_order_is_conflict() {
    let pool = setup_test_db().await;
    let order_id = seed_order(&pool, "25").await;
    let coordinator = OrderStateCoordinator::new(
        Arc::new(PgOrderRepository::new(pool.clone())),
        Arc::new(PgTransactionStore::new(pool.clone())),
        Arc::new(ScriptedGateway::new()),
        Arc::new(NotificationService::new(
            Arc::new(common::RecordingSender::default()),
            ADMIN_EMAIL,
        )),
        CALLBACK_BASE,
    );
    let request = CreatePaymentRequest {
        order_id,
        amount: BigDecimal::from(25),
        currency: "EUR".to_string(),
        return_url: RETURN_URL.to_string(),
    };

    coordinator.create_payment(request.clone()).await.unwrap();
    let err = coordinator.create_payment(request).await.unwrap_err();
    assert_eq!(err.status_code(), 409);
}

#[tokio::test]
#[ignore] // Requires database running
async fn test_settle_callback_applies_once() {
    let pool = setup_test_db().await;
    let store = PgTransactionStore::new(pool.clone());
    let order_id = seed_order(&pool, "49.99").await;
    let debit = store.create(&debit_for(order_id, "49.99")).await.unwrap();

    let outcome = store
        .settle_callback(debit.id, &CallbackSettlement::completed(Some("U1".into())))
        .await
        .unwrap();
    match outcome {
        SettleOutcome::Applied { transaction, order } => {
            assert_eq!(transaction.status, TransactionStatus::Completed);
            assert_eq!(transaction.uuid.as_deref(), Some("U1"));
            assert_eq!(order.status, OrderStatus::Processing);
            assert_eq!(order.payment_status, PaymentStatus::Success);
        }
        other => panic!("unexpected outcome: {:?}", other),
    }

    let again = store
        .settle_callback(debit.id, &CallbackSettlement::failed(None, "late failure"))
        .await
        .unwrap();
    assert!(matches!(again, SettleOutcome::AlreadyCompleted));

    let order = PgOrderRepository::new(pool.clone())
        .find_by_id(order_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(order.status, OrderStatus::Processing);
    let stored = store.find_by_id(debit.id).await.unwrap().unwrap();
    assert!(stored.error_message.is_none());
}

#[tokio::test]
#[ignore] // Requires database running
async fn test_settled_debit_keeps_status_through_late_debit_answer() {
    let pool = setup_test_db().await;
    let store = PgTransactionStore::new(pool.clone());
    let order_id = seed_order(&pool, "10").await;
    let debit = store.create(&debit_for(order_id, "10")).await.unwrap();
    store
        .settle_callback(debit.id, &CallbackSettlement::completed(Some("U1".into())))
        .await
        .unwrap();

    let stored = store
        .record_gateway_reference(
            debit.id,
            &GatewayReference {
                purchase_id: Some("P1".to_string()),
                uuid: Some("U-late".to_string()),
                redirect_url: Some("https://gw/pay/1".to_string()),
            },
        )
        .await
        .unwrap();
    assert_eq!(stored.status, TransactionStatus::Completed);
    assert_eq!(stored.uuid.as_deref(), Some("U1"));
    assert_eq!(stored.bankart_transaction_id.as_deref(), Some("P1"));

    assert!(store
        .mark_failed(debit.id, "timed out")
        .await
        .unwrap()
        .is_none());
    let stored = store.find_by_id(debit.id).await.unwrap().unwrap();
    assert_eq!(stored.status, TransactionStatus::Completed);
}

#[tokio::test]
#[ignore] // Requires database running
async fn test_record_refund_then_callback_is_already_refunded() {
    let pool = setup_test_db().await;
    let store = PgTransactionStore::new(pool.clone());
    let order_id = seed_order(&pool, "49.99").await;
    let debit = store.create(&debit_for(order_id, "49.99")).await.unwrap();

    let early = PaymentTransaction::new_refund(&debit, None, None);
    let outcome = store.record_refund(debit.id, &early).await.unwrap();
    assert!(matches!(
        outcome,
        RefundOutcome::NotRefundable {
            status: TransactionStatus::Pending
        }
    ));

    store
        .settle_callback(debit.id, &CallbackSettlement::completed(Some("U1".into())))
        .await
        .unwrap();

    let refund = PaymentTransaction::new_refund(&debit, Some("P2".into()), Some("U2".into()));
    match store.record_refund(debit.id, &refund).await.unwrap() {
        RefundOutcome::Recorded {
            debit,
            refund,
            order,
        } => {
            assert_eq!(debit.status, TransactionStatus::Refunded);
            assert_eq!(refund.kind, TransactionKind::Refund);
            assert_eq!(refund.status, TransactionStatus::Completed);
            assert_eq!(refund.merchant_transaction_id, format!("{}-refund", order_id));
            assert_eq!(order.status, OrderStatus::Refunded);
        }
        other => panic!("unexpected outcome: {:?}", other),
    }

    let again = PaymentTransaction::new_refund(&debit, None, None);
    assert!(matches!(
        store.record_refund(debit.id, &again).await.unwrap(),
        RefundOutcome::NotRefundable {
            status: TransactionStatus::Refunded
        }
    ));

    let late = store
        .settle_callback(debit.id, &CallbackSettlement::completed(Some("U1".into())))
        .await
        .unwrap();
    assert!(matches!(late, SettleOutcome::AlreadyRefunded));

    let refunds: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM payment_transactions WHERE order_id = $1 AND kind = 'refund'",
    )
    .bind(order_id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(refunds, 1);
}
