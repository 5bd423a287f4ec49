use crate::error::{AppError, Result};
use crate::models::WalletTransaction;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

/// Repository for wallet balance movements.
pub struct TransactionRepository {
    pool: PgPool,
}

impl TransactionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Records a movement inside the caller's transaction.
    pub async fn insert(conn: &mut PgConnection, txn: &WalletTransaction) -> Result<WalletTransaction> {
        let row = sqlx::query_as::<_, WalletTransaction>(
            r#"
            INSERT INTO wallet_transactions (id, wallet_id, kind, amount, counterparty_wallet_id, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, wallet_id, kind, amount, counterparty_wallet_id, created_at
            "#,
        )
        .bind(txn.id)
        .bind(txn.wallet_id)
        .bind(txn.kind)
        .bind(txn.amount)
        .bind(txn.counterparty_wallet_id)
        .bind(txn.created_at)
        .fetch_one(conn)
        .await
        .map_err(AppError::Database)?;

        Ok(row)
    }

    /// Lists movements of one wallet, newest first.
    pub async fn list_by_wallet(
        &self,
        wallet_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<WalletTransaction>> {
        let rows = sqlx::query_as::<_, WalletTransaction>(
            r#"
            SELECT id, wallet_id, kind, amount, counterparty_wallet_id, created_at
            FROM wallet_transactions
            WHERE wallet_id = $1
            ORDER BY created_at DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(wallet_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(AppError::Database)?;

        Ok(rows)
    }

    pub async fn count_by_wallet(&self, wallet_id: Uuid) -> Result<i64> {
        let row: (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*)
            FROM wallet_transactions
            WHERE wallet_id = $1
            "#,
        )
        .bind(wallet_id)
        .fetch_one(&self.pool)
        .await
        .map_err(AppError::Database)?;

        Ok(row.0)
    }
}
