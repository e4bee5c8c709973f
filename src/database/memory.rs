//! In-memory order and transaction storage.
//!
//! One mutex guards both collections, so the compound operations are atomic
//! exactly like their Postgres counterparts. Used by `SKIP_EXTERNALS` mode and
//! by tests.

use crate::database::error::{DatabaseError, DatabaseErrorKind};
use crate::database::order_repository::{Order, OrderStatus};
use crate::database::payment_transaction_repository::{PaymentTransaction, TransactionStatus};
use crate::database::repository::{
    CallbackSettlement, GatewayReference, OrderRepository, RefundOutcome, SettleOutcome,
    TransactionStore,
};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Default)]
struct State {
    orders: HashMap<Uuid, Order>,
    /// Insertion order; later entries are newer.
    transactions: Vec<PaymentTransaction>,
    writes: u64,
}

impl State {
    fn transaction_mut(&mut self, id: Uuid) -> Result<&mut PaymentTransaction, DatabaseError> {
        self.transactions
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| DatabaseError::not_found("PaymentTransaction", id))
    }

    fn order_mut(&mut self, id: Uuid) -> Result<&mut Order, DatabaseError> {
        self.orders
            .get_mut(&id)
            .ok_or_else(|| DatabaseError::not_found("Order", id))
    }

    fn insert_transaction(
        &mut self,
        transaction: &PaymentTransaction,
    ) -> Result<PaymentTransaction, DatabaseError> {
        let active_duplicate = self.transactions.iter().any(|t| {
            t.merchant_transaction_id == transaction.merchant_transaction_id
                && t.status != TransactionStatus::Failed
        });
        if active_duplicate && transaction.status != TransactionStatus::Failed {
            return Err(DatabaseError::new(DatabaseErrorKind::UniqueViolation {
                constraint: "payment_transactions_active_merchant_id".to_string(),
            }));
        }

        let mut stored = transaction.clone();
        let now = Utc::now();
        stored.created_at = now;
        stored.updated_at = now;
        self.transactions.push(stored.clone());
        self.writes += 1;
        Ok(stored)
    }
}

#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an order (the order subsystem owns order creation).
    pub async fn insert_order(&self, order: Order) {
        let mut state = self.state.lock().await;
        state.orders.insert(order.id, order);
    }

    /// Every record for an order, oldest first.
    pub async fn transactions_for_order(&self, order_id: Uuid) -> Vec<PaymentTransaction> {
        let state = self.state.lock().await;
        state
            .transactions
            .iter()
            .filter(|t| t.order_id == order_id)
            .cloned()
            .collect()
    }

    /// Number of mutations applied through the store traits.
    pub async fn write_count(&self) -> u64 {
        self.state.lock().await.writes
    }
}

#[async_trait]
impl OrderRepository for InMemoryStore {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Order>, DatabaseError> {
        Ok(self.state.lock().await.orders.get(&id).cloned())
    }

    async fn save(&self, order: &Order) -> Result<Order, DatabaseError> {
        let mut state = self.state.lock().await;
        let stored = state.order_mut(order.id)?;
        *stored = order.clone();
        stored.updated_at = Utc::now();
        let saved = stored.clone();
        state.writes += 1;
        Ok(saved)
    }
}

#[async_trait]
impl TransactionStore for InMemoryStore {
    async fn create(
        &self,
        transaction: &PaymentTransaction,
    ) -> Result<PaymentTransaction, DatabaseError> {
        self.state.lock().await.insert_transaction(transaction)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<PaymentTransaction>, DatabaseError> {
        let state = self.state.lock().await;
        Ok(state.transactions.iter().find(|t| t.id == id).cloned())
    }

    async fn find_by_merchant_transaction_id(
        &self,
        merchant_transaction_id: &str,
    ) -> Result<Option<PaymentTransaction>, DatabaseError> {
        let state = self.state.lock().await;
        Ok(state
            .transactions
            .iter()
            .rev()
            .find(|t| t.merchant_transaction_id == merchant_transaction_id)
            .cloned())
    }

    async fn find_by_bankart_transaction_id(
        &self,
        bankart_transaction_id: &str,
    ) -> Result<Option<PaymentTransaction>, DatabaseError> {
        let state = self.state.lock().await;
        Ok(state
            .transactions
            .iter()
            .rev()
            .find(|t| t.bankart_transaction_id.as_deref() == Some(bankart_transaction_id))
            .cloned())
    }

    async fn save(
        &self,
        transaction: &PaymentTransaction,
    ) -> Result<PaymentTransaction, DatabaseError> {
        let mut state = self.state.lock().await;
        let stored = state.transaction_mut(transaction.id)?;
        stored.bankart_transaction_id = transaction.bankart_transaction_id.clone();
        stored.uuid = transaction.uuid.clone();
        stored.status = transaction.status;
        stored.redirect_url = transaction.redirect_url.clone();
        stored.error_message = transaction.error_message.clone();
        stored.updated_at = Utc::now();
        let saved = stored.clone();
        state.writes += 1;
        Ok(saved)
    }

    async fn record_gateway_reference(
        &self,
        transaction_id: Uuid,
        reference: &GatewayReference,
    ) -> Result<PaymentTransaction, DatabaseError> {
        let mut state = self.state.lock().await;
        let stored = state.transaction_mut(transaction_id)?;
        if reference.purchase_id.is_some() {
            stored.bankart_transaction_id = reference.purchase_id.clone();
        }
        if stored.uuid.is_none() {
            stored.uuid = reference.uuid.clone();
        }
        if reference.redirect_url.is_some() {
            stored.redirect_url = reference.redirect_url.clone();
        }
        stored.updated_at = Utc::now();
        let saved = stored.clone();
        state.writes += 1;
        Ok(saved)
    }

    async fn settle_callback(
        &self,
        transaction_id: Uuid,
        settlement: &CallbackSettlement,
    ) -> Result<SettleOutcome, DatabaseError> {
        let mut state = self.state.lock().await;

        let current = state.transaction_mut(transaction_id)?;
        match current.status {
            TransactionStatus::Completed => return Ok(SettleOutcome::AlreadyCompleted),
            TransactionStatus::Refunded => return Ok(SettleOutcome::AlreadyRefunded),
            TransactionStatus::Pending | TransactionStatus::Failed => {}
        }
        let order_id = current.order_id;
        // Check the order before touching anything so a failure writes nothing.
        state.order_mut(order_id)?;

        let now = Utc::now();
        let transaction = {
            let current = state.transaction_mut(transaction_id)?;
            current.status = settlement.transaction_status;
            if let Some(uuid) = &settlement.uuid {
                current.uuid = Some(uuid.clone());
            }
            current.error_message = settlement.error_message.clone();
            current.updated_at = now;
            current.clone()
        };

        let order = {
            let order = state.order_mut(order_id)?;
            order.status = settlement.order_status;
            order.payment_status = settlement.payment_status;
            order.updated_at = now;
            order.clone()
        };

        state.writes += 1;
        Ok(SettleOutcome::Applied { transaction, order })
    }

    async fn record_refund(
        &self,
        debit_id: Uuid,
        refund: &PaymentTransaction,
    ) -> Result<RefundOutcome, DatabaseError> {
        let mut state = self.state.lock().await;

        let debit = state.transaction_mut(debit_id)?;
        if debit.status != TransactionStatus::Completed {
            return Ok(RefundOutcome::NotRefundable {
                status: debit.status,
            });
        }
        let order_id = debit.order_id;
        state.order_mut(order_id)?;

        // Insert first: it is the only step left that can fail.
        let refund = state.insert_transaction(refund)?;

        let now = Utc::now();
        let debit = {
            let debit = state.transaction_mut(debit_id)?;
            debit.status = TransactionStatus::Refunded;
            debit.updated_at = now;
            debit.clone()
        };
        let order = {
            let order = state.order_mut(order_id)?;
            order.status = OrderStatus::Refunded;
            order.updated_at = now;
            order.clone()
        };

        state.writes += 1;
        Ok(RefundOutcome::Recorded {
            debit,
            refund,
            order,
        })
    }

    async fn mark_failed(
        &self,
        transaction_id: Uuid,
        message: &str,
    ) -> Result<Option<PaymentTransaction>, DatabaseError> {
        let mut state = self.state.lock().await;
        let stored = state.transaction_mut(transaction_id)?;
        if stored.status != TransactionStatus::Pending {
            return Ok(None);
        }
        stored.status = TransactionStatus::Failed;
        stored.error_message = Some(message.to_string());
        stored.updated_at = Utc::now();
        let saved = stored.clone();
        state.writes += 1;
        Ok(Some(saved))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::order_repository::PaymentStatus;
    use crate::payments::types::Money;
    use bigdecimal::BigDecimal;

    async fn store_with_order() -> (InMemoryStore, Order) {
        let store = InMemoryStore::new();
        let order = Order::new_pending("ana@example.com", None, BigDecimal::from(50));
        store.insert_order(order.clone()).await;
        (store, order)
    }

    fn debit_for(order: &Order) -> PaymentTransaction {
        PaymentTransaction::new_debit(order.id, &Money::parse("50", "EUR").unwrap())
    }

    #[tokio::test]
    async fn create_rejects_active_duplicate_but_allows_retry_after_failure() {
        let (store, order) = store_with_order().await;
        let first = store.create(&debit_for(&order)).await.unwrap();

        let err = store.create(&debit_for(&order)).await.unwrap_err();
        assert!(err.is_unique_violation());

        store.mark_failed(first.id, "declined").await.unwrap();
        let retry = store.create(&debit_for(&order)).await.unwrap();

        let latest = store
            .find_by_merchant_transaction_id(&order.id.to_string())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(latest.id, retry.id);
    }

    #[tokio::test]
    async fn settle_applies_once() {
        let (store, order) = store_with_order().await;
        let debit = store.create(&debit_for(&order)).await.unwrap();

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

        let writes = store.write_count().await;
        let again = store
            .settle_callback(debit.id, &CallbackSettlement::failed(None, "late failure"))
            .await
            .unwrap();
        assert!(matches!(again, SettleOutcome::AlreadyCompleted));
        assert_eq!(store.write_count().await, writes);
    }

    #[tokio::test]
    async fn settle_keeps_uuid_when_callback_has_none() {
        let (store, order) = store_with_order().await;
        let mut debit = store.create(&debit_for(&order)).await.unwrap();
        debit.uuid = Some("U0".to_string());
        TransactionStore::save(&store, &debit).await.unwrap();

        store
            .settle_callback(debit.id, &CallbackSettlement::failed(None, "declined"))
            .await
            .unwrap();
        let stored = TransactionStore::find_by_id(&store, debit.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.uuid.as_deref(), Some("U0"));
        assert_eq!(stored.error_message.as_deref(), Some("declined"));
    }

    #[tokio::test]
    async fn gateway_reference_does_not_touch_settled_status() {
        let (store, order) = store_with_order().await;
        let debit = store.create(&debit_for(&order)).await.unwrap();
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
        assert_eq!(stored.redirect_url.as_deref(), Some("https://gw/pay/1"));
    }

    #[tokio::test]
    async fn mark_failed_only_moves_pending_records() {
        let (store, order) = store_with_order().await;
        let debit = store.create(&debit_for(&order)).await.unwrap();
        store
            .settle_callback(debit.id, &CallbackSettlement::completed(None))
            .await
            .unwrap();
        let writes = store.write_count().await;

        let skipped = store.mark_failed(debit.id, "timed out").await.unwrap();
        assert!(skipped.is_none());
        assert_eq!(store.write_count().await, writes);

        let stored = TransactionStore::find_by_id(&store, debit.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, TransactionStatus::Completed);
        assert!(stored.error_message.is_none());

        let other = Order::new_pending("b@example.com", None, BigDecimal::from(5));
        store.insert_order(other.clone()).await;
        let pending = store.create(&debit_for(&other)).await.unwrap();
        let failed = store.mark_failed(pending.id, "declined").await.unwrap();
        assert_eq!(failed.map(|t| t.status), Some(TransactionStatus::Failed));
    }

    #[tokio::test]
    async fn refund_requires_completed_debit() {
        let (store, order) = store_with_order().await;
        let debit = store.create(&debit_for(&order)).await.unwrap();
        let refund = PaymentTransaction::new_refund(&debit, None, None);

        let outcome = store.record_refund(debit.id, &refund).await.unwrap();
        assert!(matches!(
            outcome,
            RefundOutcome::NotRefundable {
                status: TransactionStatus::Pending
            }
        ));
        assert_eq!(store.transactions_for_order(order.id).await.len(), 1);
    }

    #[tokio::test]
    async fn refund_updates_debit_order_and_inserts_record() {
        let (store, order) = store_with_order().await;
        let debit = store.create(&debit_for(&order)).await.unwrap();
        store
            .settle_callback(debit.id, &CallbackSettlement::completed(None))
            .await
            .unwrap();

        let refund = PaymentTransaction::new_refund(&debit, Some("P2".into()), Some("U2".into()));
        let outcome = store.record_refund(debit.id, &refund).await.unwrap();
        match outcome {
            RefundOutcome::Recorded {
                debit,
                refund,
                order,
            } => {
                assert_eq!(debit.status, TransactionStatus::Refunded);
                assert_eq!(order.status, OrderStatus::Refunded);
                assert_eq!(refund.uuid.as_deref(), Some("U2"));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(store.transactions_for_order(order.id).await.len(), 2);
    }

    #[tokio::test]
    async fn lookup_by_bankart_transaction_id() {
        let (store, order) = store_with_order().await;
        let debit = store.create(&debit_for(&order)).await.unwrap();
        store
            .record_gateway_reference(
                debit.id,
                &GatewayReference {
                    purchase_id: Some("P1".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let found = store.find_by_bankart_transaction_id("P1").await.unwrap();
        assert_eq!(found.map(|t| t.id), Some(debit.id));
        assert!(store
            .find_by_bankart_transaction_id("P9")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn order_save_replaces_stored_order() {
        let (store, mut order) = store_with_order().await;
        order.shipping_method = Some("express".to_string());

        let saved = OrderRepository::save(&store, &order).await.unwrap();
        assert_eq!(saved.shipping_method.as_deref(), Some("express"));

        let loaded = OrderRepository::find_by_id(&store, order.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.shipping_method.as_deref(), Some("express"));
        assert_eq!(store.write_count().await, 1);

        let unknown = Order::new_pending("x@example.com", None, BigDecimal::from(1));
        let err = OrderRepository::save(&store, &unknown).await.unwrap_err();
        assert!(matches!(err.kind, DatabaseErrorKind::NotFound { .. }));
    }
}
