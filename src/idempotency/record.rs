use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Replay window for a cached outcome. Fixed, not configurable per request.
pub const IDEMPOTENCY_TTL_HOURS: i64 = 24;

pub fn idempotency_ttl() -> Duration {
    Duration::hours(IDEMPOTENCY_TTL_HOURS)
}

/// Cached outcome of a successful mutating request.
///
/// Records are written once and never updated. They are scoped by
/// `(owner, key)`: the same client key used by two callers names two
/// different records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct IdempotencyRecord {
    pub id: Uuid,
    #[sqlx(rename = "owner_id")]
    pub owner: String,
    #[sqlx(rename = "idempotency_key")]
    pub key: String,
    pub status_code: i32,
    pub response_payload: String,
    pub content_type: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl IdempotencyRecord {
    pub fn new(
        owner: impl Into<String>,
        key: impl Into<String>,
        status_code: u16,
        response_payload: impl Into<String>,
        content_type: Option<String>,
    ) -> Self {
        Self::new_at(owner, key, status_code, response_payload, content_type, Utc::now())
    }

    /// Builds a record as if it had been created at `created_at`.
    pub fn new_at(
        owner: impl Into<String>,
        key: impl Into<String>,
        status_code: u16,
        response_payload: impl Into<String>,
        content_type: Option<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner: owner.into(),
            key: key.into(),
            status_code: i32::from(status_code),
            response_payload: response_payload.into(),
            content_type,
            created_at,
            expires_at: created_at + idempotency_ttl(),
        }
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Seconds left before expiry, never negative.
    pub fn remaining_ttl_seconds(&self, now: DateTime<Utc>) -> i64 {
        (self.expires_at - now).num_seconds().max(0)
    }
}
