pub mod classifier;
pub mod metrics;
pub mod middleware;
pub mod record;
pub mod storage;
pub mod sweeper;

pub use classifier::{classify, Eligibility, SkipReason, IDEMPOTENCY_KEY_HEADER};
pub use metrics::{IdempotencyMetrics, MetricsSnapshot};
pub use middleware::{
    idempotency_middleware, replay, IdempotencyState, ORIGINAL_AT_HEADER, REPLAYED_HEADER,
};
pub use record::{idempotency_ttl, IdempotencyRecord, IDEMPOTENCY_TTL_HOURS};
pub use storage::{
    IdempotencyStore, InMemoryIdempotencyStore, InsertOutcome, LookupOutcome,
    PostgresIdempotencyStore, RedisIdempotencyStore,
};
pub use sweeper::{IdempotencySweeper, SweeperHandle, SWEEP_INTERVAL};
