use crate::error::{AppError, Result};
use crate::models::Wallet;
use rust_decimal::Decimal;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

/// Repository for wallet rows.
///
/// Methods taking a `PgConnection` run inside the caller's transaction.
pub struct WalletRepository {
    pool: PgPool,
}

impl WalletRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Creates a new wallet.
    pub async fn create(&self, wallet: &Wallet) -> Result<Wallet> {
        let row = sqlx::query_as::<_, Wallet>(
            r#"
            INSERT INTO wallets (id, owner_id, currency, balance, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, owner_id, currency, balance, created_at, updated_at
            "#,
        )
        .bind(wallet.id)
        .bind(&wallet.owner_id)
        .bind(&wallet.currency)
        .bind(wallet.balance)
        .bind(wallet.created_at)
        .bind(wallet.updated_at)
        .fetch_one(&self.pool)
        .await
        .map_err(AppError::Database)?;

        Ok(row)
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<Wallet>> {
        let row = sqlx::query_as::<_, Wallet>(
            r#"
            SELECT id, owner_id, currency, balance, created_at, updated_at
            FROM wallets
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(AppError::Database)?;

        Ok(row)
    }

    /// Lists the caller's wallets, newest first.
    pub async fn list_by_owner(&self, owner_id: &str) -> Result<Vec<Wallet>> {
        let rows = sqlx::query_as::<_, Wallet>(
            r#"
            SELECT id, owner_id, currency, balance, created_at, updated_at
            FROM wallets
            WHERE owner_id = $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await
        .map_err(AppError::Database)?;

        Ok(rows)
    }

    /// Reads a wallet and holds its row lock until the transaction ends.
    pub async fn lock(conn: &mut PgConnection, id: Uuid) -> Result<Option<Wallet>> {
        let row = sqlx::query_as::<_, Wallet>(
            r#"
            SELECT id, owner_id, currency, balance, created_at, updated_at
            FROM wallets
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(id)
        .fetch_optional(conn)
        .await
        .map_err(AppError::Database)?;

        Ok(row)
    }

    /// Adds `delta` (possibly negative) to the balance of a locked wallet.
    pub async fn apply_delta(conn: &mut PgConnection, id: Uuid, delta: Decimal) -> Result<Wallet> {
        let row = sqlx::query_as::<_, Wallet>(
            r#"
            UPDATE wallets
            SET balance = balance + $2, updated_at = NOW()
            WHERE id = $1
            RETURNING id, owner_id, currency, balance, created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(delta)
        .fetch_one(conn)
        .await
        .map_err(AppError::Database)?;

        Ok(row)
    }
}
