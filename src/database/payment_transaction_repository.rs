use crate::database::error::DatabaseError;
use crate::database::order_repository::{
    load_order, unknown_value, update_order_status, OrderStatus,
};
use crate::database::repository::{
    CallbackSettlement, GatewayReference, RefundOutcome, SettleOutcome, TransactionStore,
};
use crate::payments::types::{Money, REFUND_SUFFIX};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{types::BigDecimal, FromRow, PgConnection, PgPool};
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
    Refunded,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Completed => "completed",
            TransactionStatus::Failed => "failed",
            TransactionStatus::Refunded => "refunded",
        }
    }

    pub fn from_db_status(value: &str) -> Result<Self, DatabaseError> {
        match value {
            "pending" => Ok(TransactionStatus::Pending),
            "completed" => Ok(TransactionStatus::Completed),
            "failed" => Ok(TransactionStatus::Failed),
            "refunded" => Ok(TransactionStatus::Refunded),
            other => Err(unknown_value("transaction status", other)),
        }
    }

    /// States a callback may no longer change.
    pub fn is_settled(&self) -> bool {
        matches!(
            self,
            TransactionStatus::Completed | TransactionStatus::Refunded
        )
    }

    /// Valid transitions of the transaction state machine.
    pub fn valid_transitions(&self) -> Vec<TransactionStatus> {
        match self {
            TransactionStatus::Pending => {
                vec![TransactionStatus::Completed, TransactionStatus::Failed]
            }
            TransactionStatus::Failed => vec![TransactionStatus::Completed],
            TransactionStatus::Completed => {
                vec![TransactionStatus::Refunded, TransactionStatus::Failed]
            }
            TransactionStatus::Refunded => vec![],
        }
    }

    pub fn can_transition_to(&self, next: TransactionStatus) -> bool {
        self.valid_transitions().contains(&next)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Debit,
    Refund,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Debit => "debit",
            TransactionKind::Refund => "refund",
        }
    }

    pub fn from_db_kind(value: &str) -> Result<Self, DatabaseError> {
        match value {
            "debit" => Ok(TransactionKind::Debit),
            "refund" => Ok(TransactionKind::Refund),
            other => Err(unknown_value("transaction kind", other)),
        }
    }
}

/// One gateway interaction (debit or refund) for an order
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentTransaction {
    pub id: Uuid,
    pub order_id: Uuid,
    pub kind: TransactionKind,
    pub merchant_transaction_id: String,
    /// Gateway purchase id
    pub bankart_transaction_id: Option<String>,
    /// Gateway transaction uuid
    pub uuid: Option<String>,
    pub amount: BigDecimal,
    pub currency: String,
    pub status: TransactionStatus,
    pub redirect_url: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PaymentTransaction {
    /// A `pending` debit keyed by the order id.
    pub fn new_debit(order_id: Uuid, money: &Money) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            order_id,
            kind: TransactionKind::Debit,
            merchant_transaction_id: order_id.to_string(),
            bankart_transaction_id: None,
            uuid: None,
            amount: money.amount.clone(),
            currency: money.currency.clone(),
            status: TransactionStatus::Pending,
            redirect_url: None,
            error_message: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// The completed refund record for `debit`, as confirmed by the gateway.
    pub fn new_refund(
        debit: &PaymentTransaction,
        purchase_id: Option<String>,
        uuid: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            order_id: debit.order_id,
            kind: TransactionKind::Refund,
            merchant_transaction_id: refund_merchant_transaction_id(
                &debit.merchant_transaction_id,
            ),
            bankart_transaction_id: purchase_id,
            uuid,
            amount: debit.amount.clone(),
            currency: debit.currency.clone(),
            status: TransactionStatus::Completed,
            redirect_url: None,
            error_message: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn money(&self) -> Money {
        Money::new(self.amount.clone(), self.currency.clone())
    }
}

pub fn refund_merchant_transaction_id(merchant_transaction_id: &str) -> String {
    format!("{}{}", merchant_transaction_id, REFUND_SUFFIX)
}

#[derive(Debug, FromRow)]
struct PaymentTransactionRow {
    id: Uuid,
    order_id: Uuid,
    kind: String,
    merchant_transaction_id: String,
    bankart_transaction_id: Option<String>,
    uuid: Option<String>,
    amount: BigDecimal,
    currency: String,
    status: String,
    redirect_url: Option<String>,
    error_message: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<PaymentTransactionRow> for PaymentTransaction {
    type Error = DatabaseError;

    fn try_from(row: PaymentTransactionRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            order_id: row.order_id,
            kind: TransactionKind::from_db_kind(&row.kind)?,
            merchant_transaction_id: row.merchant_transaction_id,
            bankart_transaction_id: row.bankart_transaction_id,
            uuid: row.uuid,
            amount: row.amount,
            currency: row.currency,
            status: TransactionStatus::from_db_status(&row.status)?,
            redirect_url: row.redirect_url,
            error_message: row.error_message,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn into_entity(
    row: Option<PaymentTransactionRow>,
) -> Result<Option<PaymentTransaction>, DatabaseError> {
    row.map(PaymentTransaction::try_from).transpose()
}

const TRANSACTION_COLUMNS: &str = "id, order_id, kind, merchant_transaction_id, \
                                   bankart_transaction_id, uuid, amount, currency, status, \
                                   redirect_url, error_message, created_at, updated_at";

/// Repository for payment transactions
pub struct PgTransactionStore {
    pool: PgPool,
}

impl PgTransactionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn current_status(
        conn: &mut PgConnection,
        id: Uuid,
    ) -> Result<TransactionStatus, DatabaseError> {
        let status: Option<String> =
            sqlx::query_scalar("SELECT status FROM payment_transactions WHERE id = $1")
                .bind(id)
                .fetch_optional(&mut *conn)
                .await
                .map_err(DatabaseError::from_sqlx)?;

        match status {
            Some(status) => TransactionStatus::from_db_status(&status),
            None => Err(DatabaseError::not_found("PaymentTransaction", id)),
        }
    }

    async fn insert_on(
        conn: &mut PgConnection,
        transaction: &PaymentTransaction,
    ) -> Result<PaymentTransaction, DatabaseError> {
        let row = sqlx::query_as::<_, PaymentTransactionRow>(&format!(
            "INSERT INTO payment_transactions
             (id, order_id, kind, merchant_transaction_id, bankart_transaction_id, uuid,
              amount, currency, status, redirect_url, error_message)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
             RETURNING {}",
            TRANSACTION_COLUMNS
        ))
        .bind(transaction.id)
        .bind(transaction.order_id)
        .bind(transaction.kind.as_str())
        .bind(&transaction.merchant_transaction_id)
        .bind(&transaction.bankart_transaction_id)
        .bind(&transaction.uuid)
        .bind(&transaction.amount)
        .bind(&transaction.currency)
        .bind(transaction.status.as_str())
        .bind(&transaction.redirect_url)
        .bind(&transaction.error_message)
        .fetch_one(&mut *conn)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        PaymentTransaction::try_from(row)
    }

    async fn find_one(
        &self,
        filter: &str,
        value: &str,
    ) -> Result<Option<PaymentTransaction>, DatabaseError> {
        let row = sqlx::query_as::<_, PaymentTransactionRow>(&format!(
            "SELECT {} FROM payment_transactions
             WHERE {} = $1
             ORDER BY created_at DESC
             LIMIT 1",
            TRANSACTION_COLUMNS, filter
        ))
        .bind(value)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        into_entity(row)
    }
}

#[async_trait]
impl TransactionStore for PgTransactionStore {
    async fn create(
        &self,
        transaction: &PaymentTransaction,
    ) -> Result<PaymentTransaction, DatabaseError> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(DatabaseError::from_sqlx)?;
        Self::insert_on(&mut *conn, transaction).await
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<PaymentTransaction>, DatabaseError> {
        let row = sqlx::query_as::<_, PaymentTransactionRow>(&format!(
            "SELECT {} FROM payment_transactions WHERE id = $1",
            TRANSACTION_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        into_entity(row)
    }

    async fn find_by_merchant_transaction_id(
        &self,
        merchant_transaction_id: &str,
    ) -> Result<Option<PaymentTransaction>, DatabaseError> {
        self.find_one("merchant_transaction_id", merchant_transaction_id)
            .await
    }

    async fn find_by_bankart_transaction_id(
        &self,
        bankart_transaction_id: &str,
    ) -> Result<Option<PaymentTransaction>, DatabaseError> {
        self.find_one("bankart_transaction_id", bankart_transaction_id)
            .await
    }

    async fn save(
        &self,
        transaction: &PaymentTransaction,
    ) -> Result<PaymentTransaction, DatabaseError> {
        let row = sqlx::query_as::<_, PaymentTransactionRow>(&format!(
            "UPDATE payment_transactions
             SET bankart_transaction_id = $2, uuid = $3, status = $4,
                 redirect_url = $5, error_message = $6, updated_at = NOW()
             WHERE id = $1
             RETURNING {}",
            TRANSACTION_COLUMNS
        ))
        .bind(transaction.id)
        .bind(&transaction.bankart_transaction_id)
        .bind(&transaction.uuid)
        .bind(transaction.status.as_str())
        .bind(&transaction.redirect_url)
        .bind(&transaction.error_message)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        into_entity(row)?
            .ok_or_else(|| DatabaseError::not_found("PaymentTransaction", transaction.id))
    }

    async fn record_gateway_reference(
        &self,
        transaction_id: Uuid,
        reference: &GatewayReference,
    ) -> Result<PaymentTransaction, DatabaseError> {
        let row = sqlx::query_as::<_, PaymentTransactionRow>(&format!(
            "UPDATE payment_transactions
             SET bankart_transaction_id = COALESCE($2, bankart_transaction_id),
                 uuid = COALESCE(uuid, $3),
                 redirect_url = COALESCE($4, redirect_url),
                 updated_at = NOW()
             WHERE id = $1
             RETURNING {}",
            TRANSACTION_COLUMNS
        ))
        .bind(transaction_id)
        .bind(&reference.purchase_id)
        .bind(&reference.uuid)
        .bind(&reference.redirect_url)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        into_entity(row)?
            .ok_or_else(|| DatabaseError::not_found("PaymentTransaction", transaction_id))
    }

    async fn settle_callback(
        &self,
        transaction_id: Uuid,
        settlement: &CallbackSettlement,
    ) -> Result<SettleOutcome, DatabaseError> {
        let mut tx = self.pool.begin().await.map_err(DatabaseError::from_sqlx)?;

        let updated = sqlx::query_as::<_, PaymentTransactionRow>(&format!(
            "UPDATE payment_transactions
             SET status = $2,
                 uuid = COALESCE($3, uuid),
                 error_message = $4,
                 updated_at = NOW()
             WHERE id = $1 AND status NOT IN ('completed', 'refunded')
             RETURNING {}",
            TRANSACTION_COLUMNS
        ))
        .bind(transaction_id)
        .bind(settlement.transaction_status.as_str())
        .bind(&settlement.uuid)
        .bind(&settlement.error_message)
        .fetch_optional(&mut *tx)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        let transaction = match into_entity(updated)? {
            Some(transaction) => transaction,
            None => {
                let status = Self::current_status(&mut *tx, transaction_id).await?;
                tx.rollback().await.map_err(DatabaseError::from_sqlx)?;
                debug!(
                    transaction_id = %transaction_id,
                    status = status.as_str(),
                    "Callback settlement skipped, transaction already settled"
                );
                return match status {
                    TransactionStatus::Refunded => Ok(SettleOutcome::AlreadyRefunded),
                    _ => Ok(SettleOutcome::AlreadyCompleted),
                };
            }
        };

        update_order_status(
            &mut *tx,
            transaction.order_id,
            settlement.order_status,
            Some(settlement.payment_status),
        )
        .await?;

        let order = load_order(&mut *tx, transaction.order_id)
            .await?
            .ok_or_else(|| DatabaseError::not_found("Order", transaction.order_id))?;

        tx.commit().await.map_err(DatabaseError::from_sqlx)?;
        Ok(SettleOutcome::Applied { transaction, order })
    }

    async fn record_refund(
        &self,
        debit_id: Uuid,
        refund: &PaymentTransaction,
    ) -> Result<RefundOutcome, DatabaseError> {
        let mut tx = self.pool.begin().await.map_err(DatabaseError::from_sqlx)?;

        let updated = sqlx::query_as::<_, PaymentTransactionRow>(&format!(
            "UPDATE payment_transactions
             SET status = 'refunded', updated_at = NOW()
             WHERE id = $1 AND status = 'completed'
             RETURNING {}",
            TRANSACTION_COLUMNS
        ))
        .bind(debit_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        let debit = match into_entity(updated)? {
            Some(debit) => debit,
            None => {
                let status = Self::current_status(&mut *tx, debit_id).await?;
                tx.rollback().await.map_err(DatabaseError::from_sqlx)?;
                return Ok(RefundOutcome::NotRefundable { status });
            }
        };

        update_order_status(
            &mut *tx,
            debit.order_id,
            OrderStatus::Refunded,
            None,
        )
        .await?;

        let refund = Self::insert_on(&mut *tx, refund).await?;

        let order = load_order(&mut *tx, debit.order_id)
            .await?
            .ok_or_else(|| DatabaseError::not_found("Order", debit.order_id))?;

        tx.commit().await.map_err(DatabaseError::from_sqlx)?;
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
        let row = sqlx::query_as::<_, PaymentTransactionRow>(&format!(
            "UPDATE payment_transactions
             SET status = 'failed', error_message = $2, updated_at = NOW()
             WHERE id = $1 AND status = 'pending'
             RETURNING {}",
            TRANSACTION_COLUMNS
        ))
        .bind(transaction_id)
        .bind(message)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        if let Some(failed) = into_entity(row)? {
            return Ok(Some(failed));
        }

        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(DatabaseError::from_sqlx)?;
        let status = Self::current_status(&mut *conn, transaction_id).await?;
        debug!(
            transaction_id = %transaction_id,
            status = status.as_str(),
            "Transaction no longer pending, not marking failed"
        );
        Ok(None)
    }
}
