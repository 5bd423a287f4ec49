use crate::error::{AppError, Result};
use crate::idempotency::record::IdempotencyRecord;
use crate::observability::get_metrics;
use async_trait::async_trait;
use chrono::Utc;
use redis::AsyncCommands;
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Result of looking up `(owner, key)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupOutcome {
    Absent,
    /// A record exists but its TTL has elapsed. Callers treat this like `Absent`.
    Expired,
    Hit(IdempotencyRecord),
}

/// Result of an atomic insert attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// A live record for the same `(owner, key)` won the race.
    AlreadyExists,
}

/// Durable keyed table of cached outcomes.
///
/// `try_insert` must be a single atomic operation against the
/// one-live-record-per-`(owner, key)` constraint. Implementations never update
/// a live record; an expired one may be replaced.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    async fn lookup(&self, owner: &str, key: &str) -> Result<LookupOutcome>;

    async fn try_insert(&self, record: &IdempotencyRecord) -> Result<InsertOutcome>;

    /// Deletes every record whose `expires_at` is in the past. Returns the count.
    async fn purge_expired(&self) -> Result<u64>;

    fn backend_name(&self) -> &'static str;
}

/// PostgreSQL-based idempotency storage.
///
/// Relies on the `uq_idempotency_keys_owner_key` unique constraint.
pub struct PostgresIdempotencyStore {
    pool: PgPool,
}

impl PostgresIdempotencyStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Finds the record for `(owner, key)` regardless of expiry.
    pub async fn find(&self, owner: &str, key: &str) -> Result<Option<IdempotencyRecord>> {
        let record = sqlx::query_as::<_, IdempotencyRecord>(
            r#"
            SELECT id, owner_id, idempotency_key, status_code, response_payload, content_type, created_at, expires_at
            FROM idempotency_keys
            WHERE owner_id = $1 AND idempotency_key = $2
            "#,
        )
        .bind(owner)
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(AppError::Database)?;

        Ok(record)
    }
}

#[async_trait]
impl IdempotencyStore for PostgresIdempotencyStore {
    async fn lookup(&self, owner: &str, key: &str) -> Result<LookupOutcome> {
        let now = Utc::now();
        let Some(record) = self.find(owner, key).await? else {
            return Ok(LookupOutcome::Absent);
        };

        if !record.is_expired_at(now) {
            return Ok(LookupOutcome::Hit(record));
        }

        // Delete by id so a replacement inserted meanwhile survives. Reclaiming is
        // best effort: `try_insert` overwrites an expired row on its own.
        if let Err(e) = sqlx::query("DELETE FROM idempotency_keys WHERE id = $1 AND expires_at < $2")
            .bind(record.id)
            .bind(now)
            .execute(&self.pool)
            .await
        {
            get_metrics().record_idempotency_store_error("reclaim");
            tracing::warn!(error = %e, record_id = %record.id, "Failed to reclaim expired idempotency record");
        }

        Ok(LookupOutcome::Expired)
    }

    async fn try_insert(&self, record: &IdempotencyRecord) -> Result<InsertOutcome> {
        // The conflict branch only fires for an expired row, so a live record is never touched.
        let inserted: Option<(uuid::Uuid,)> = sqlx::query_as(
            r#"
            INSERT INTO idempotency_keys (id, owner_id, idempotency_key, status_code, response_payload, content_type, created_at, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (owner_id, idempotency_key) DO UPDATE
            SET id = EXCLUDED.id,
                status_code = EXCLUDED.status_code,
                response_payload = EXCLUDED.response_payload,
                content_type = EXCLUDED.content_type,
                created_at = EXCLUDED.created_at,
                expires_at = EXCLUDED.expires_at
            WHERE idempotency_keys.expires_at < $9
            RETURNING id
            "#,
        )
        .bind(record.id)
        .bind(&record.owner)
        .bind(&record.key)
        .bind(record.status_code)
        .bind(&record.response_payload)
        .bind(&record.content_type)
        .bind(record.created_at)
        .bind(record.expires_at)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await
        .map_err(AppError::Database)?;

        Ok(match inserted {
            Some(_) => InsertOutcome::Inserted,
            None => InsertOutcome::AlreadyExists,
        })
    }

    async fn purge_expired(&self) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM idempotency_keys
            WHERE expires_at < $1
            "#,
        )
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(AppError::Database)?;

        Ok(result.rows_affected())
    }

    fn backend_name(&self) -> &'static str {
        "postgres"
    }
}

/// Redis-based idempotency storage.
///
/// `SET NX EX` gives the atomic conditional put; Redis evicts expired entries itself.
pub struct RedisIdempotencyStore {
    client: redis::Client,
    key_prefix: String,
}

impl RedisIdempotencyStore {
    pub fn new(client: redis::Client, key_prefix: impl Into<String>) -> Self {
        Self {
            client,
            key_prefix: key_prefix.into(),
        }
    }

    // Owner length is included so `("a:b", "c")` and `("a", "b:c")` never share a slot.
    fn make_key(&self, owner: &str, key: &str) -> String {
        format!("{}:{}:{}:{}", self.key_prefix, owner.len(), owner, key)
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(AppError::Redis)
    }
}

#[async_trait]
impl IdempotencyStore for RedisIdempotencyStore {
    async fn lookup(&self, owner: &str, key: &str) -> Result<LookupOutcome> {
        let mut conn = self.connection().await?;
        let value: Option<String> = conn
            .get(self.make_key(owner, key))
            .await
            .map_err(AppError::Redis)?;

        let Some(json) = value else {
            return Ok(LookupOutcome::Absent);
        };

        let record: IdempotencyRecord = serde_json::from_str(&json)?;
        if record.is_expired() {
            return Ok(LookupOutcome::Expired);
        }

        Ok(LookupOutcome::Hit(record))
    }

    async fn try_insert(&self, record: &IdempotencyRecord) -> Result<InsertOutcome> {
        let ttl_seconds = record.remaining_ttl_seconds(Utc::now()).max(1);
        let value = serde_json::to_string(record)?;

        let mut conn = self.connection().await?;
        let result: Option<String> = conn
            .set_options(
                self.make_key(&record.owner, &record.key),
                value,
                redis::SetOptions::default()
                    .conditional_set(redis::ExistenceCheck::NX)
                    .with_expiration(redis::SetExpiry::EX(ttl_seconds as usize)),
            )
            .await
            .map_err(AppError::Redis)?;

        Ok(match result {
            Some(_) => InsertOutcome::Inserted,
            None => InsertOutcome::AlreadyExists,
        })
    }

    async fn purge_expired(&self) -> Result<u64> {
        Ok(0)
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}

/// In-memory idempotency storage for tests and single-node development.
///
/// A single write lock makes `try_insert` atomic within the process.
#[derive(Clone, Default)]
pub struct InMemoryIdempotencyStore {
    records: Arc<RwLock<HashMap<(String, String), IdempotencyRecord>>>,
}

impl InMemoryIdempotencyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records, expired or not.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    /// Returns the stored record for `(owner, key)` regardless of expiry.
    pub async fn get(&self, owner: &str, key: &str) -> Option<IdempotencyRecord> {
        self.records
            .read()
            .await
            .get(&(owner.to_string(), key.to_string()))
            .cloned()
    }
}

#[async_trait]
impl IdempotencyStore for InMemoryIdempotencyStore {
    async fn lookup(&self, owner: &str, key: &str) -> Result<LookupOutcome> {
        let slot = (owner.to_string(), key.to_string());
        let expired_id = {
            let records = self.records.read().await;
            match records.get(&slot) {
                None => return Ok(LookupOutcome::Absent),
                Some(record) if !record.is_expired() => {
                    return Ok(LookupOutcome::Hit(record.clone()))
                }
                Some(record) => record.id,
            }
        };

        let mut records = self.records.write().await;
        if records.get(&slot).is_some_and(|r| r.id == expired_id) {
            records.remove(&slot);
        }

        Ok(LookupOutcome::Expired)
    }

    async fn try_insert(&self, record: &IdempotencyRecord) -> Result<InsertOutcome> {
        let mut records = self.records.write().await;
        let slot = (record.owner.clone(), record.key.clone());

        if records.get(&slot).is_some_and(|existing| !existing.is_expired()) {
            return Ok(InsertOutcome::AlreadyExists);
        }

        records.insert(slot, record.clone());
        Ok(InsertOutcome::Inserted)
    }

    async fn purge_expired(&self) -> Result<u64> {
        let now = Utc::now();
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|_, record| !record.is_expired_at(now));
        Ok((before - records.len()) as u64)
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
