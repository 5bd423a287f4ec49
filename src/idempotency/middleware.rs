use std::sync::Arc;

use axum::{
    body::{Body, HttpBody},
    extract::{Request, State},
    http::{header::CONTENT_TYPE, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::auth::AuthenticatedCaller;
use crate::error::AppError;
use crate::idempotency::classifier::{classify, Eligibility};
use crate::idempotency::metrics::IdempotencyMetrics;
use crate::idempotency::record::IdempotencyRecord;
use crate::idempotency::storage::{IdempotencyStore, InsertOutcome, LookupOutcome};
use crate::observability::mask_sensitive;

/// `true` on a replayed response, `false` on a fresh execution of an eligible request.
pub const REPLAYED_HEADER: &str = "idempotent-replayed";

/// RFC 3339 creation time of the replayed record.
pub const ORIGINAL_AT_HEADER: &str = "idempotent-original-at";

const DEFAULT_MAX_CACHED_BODY_BYTES: usize = 1024 * 1024;

/// Store, counters and limits shared by every invocation of
/// [`idempotency_middleware`].
#[derive(Clone)]
pub struct IdempotencyState {
    pub store: Arc<dyn IdempotencyStore>,
    pub metrics: Arc<IdempotencyMetrics>,
    pub max_cached_body_bytes: usize,
}

impl IdempotencyState {
    pub fn new(store: Arc<dyn IdempotencyStore>) -> Self {
        Self {
            store,
            metrics: Arc::new(IdempotencyMetrics::new()),
            max_cached_body_bytes: DEFAULT_MAX_CACHED_BODY_BYTES,
        }
    }

    pub fn with_max_cached_body_bytes(mut self, limit: usize) -> Self {
        self.max_cached_body_bytes = limit;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<IdempotencyMetrics>) -> Self {
        self.metrics = metrics;
        self
    }
}

/// Replay-safety stage placed in front of mutating handlers.
///
/// Mount with `axum::middleware::from_fn_with_state`, inside the layer that
/// resolves [`AuthenticatedCaller`]. The handler is never held under a lock:
/// concurrent duplicates may both execute, but only the first successful
/// insert is cached and every caller receives that outcome.
pub async fn idempotency_middleware(
    State(state): State<IdempotencyState>,
    req: Request,
    next: Next,
) -> Response {
    let eligibility = classify(
        req.method(),
        req.headers(),
        req.extensions().get::<AuthenticatedCaller>(),
    );

    let (owner, key) = match eligibility {
        Eligibility::Eligible { owner, key } => (owner, key),
        Eligibility::Ineligible(reason) => {
            state.metrics.record_bypassed(reason.as_str());
            return next.run(req).await;
        }
    };
    state.metrics.record_eligible();

    match state.store.lookup(&owner, &key).await {
        Ok(LookupOutcome::Hit(record)) => {
            tracing::debug!(
                owner = %owner,
                key = %mask_sensitive(&key, 4),
                record_id = %record.id,
                "Replaying cached response"
            );
            state.metrics.record_replayed();
            return replay(&record);
        }
        Ok(LookupOutcome::Absent) | Ok(LookupOutcome::Expired) => {}
        Err(e) => {
            // Fail open: availability over deduplication.
            state.metrics.record_store_error("lookup");
            tracing::warn!(
                error = %e,
                backend = state.store.backend_name(),
                "Idempotency lookup failed, executing without deduplication"
            );
            return next.run(req).await;
        }
    }

    let response = next.run(req).await;

    if !response.status().is_success() {
        state.metrics.record_uncached("non_success_status");
        return response;
    }

    capture(&state, owner, key, response).await
}

/// Persists a successful outcome, or converges on the outcome of a concurrent winner.
async fn capture(state: &IdempotencyState, owner: String, key: String, response: Response) -> Response {
    let (mut parts, body) = response.into_parts();

    let within_limit = body
        .size_hint()
        .upper()
        .is_some_and(|len| len <= state.max_cached_body_bytes as u64);
    if !within_limit {
        state.metrics.record_uncached("body_too_large");
        tracing::warn!(
            limit = state.max_cached_body_bytes,
            "Response body exceeds cache limit, not caching"
        );
        mark_fresh(&mut parts.headers);
        return Response::from_parts(parts, body);
    }

    let bytes = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(e) => {
            state.metrics.record_uncached("body_error");
            tracing::warn!(
                error = %e,
                discarded_status = parts.status.as_u16(),
                "Failed to buffer handler response body, returning 500"
            );
            return AppError::Internal(anyhow::anyhow!("failed to buffer response body: {}", e))
                .into_response();
        }
    };

    let payload = match std::str::from_utf8(&bytes) {
        Ok(text) => text.to_owned(),
        Err(_) => {
            state.metrics.record_uncached("non_utf8_body");
            tracing::warn!("Response body is not UTF-8, not caching");
            mark_fresh(&mut parts.headers);
            return Response::from_parts(parts, Body::from(bytes));
        }
    };

    let content_type = parts
        .headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);

    let record = IdempotencyRecord::new(owner, key, parts.status.as_u16(), payload, content_type);

    match state.store.try_insert(&record).await {
        Ok(InsertOutcome::Inserted) => {
            state.metrics.record_cached();
        }
        Ok(InsertOutcome::AlreadyExists) => {
            // Lost the race. Replay the winner so every caller sees one outcome.
            match state.store.lookup(&record.owner, &record.key).await {
                Ok(LookupOutcome::Hit(winner)) => {
                    state.metrics.record_race_lost();
                    tracing::info!(
                        owner = %record.owner,
                        key = %mask_sensitive(&record.key, 4),
                        discarded_status = record.status_code,
                        winner_id = %winner.id,
                        "Lost idempotency insert race, replaying winning response"
                    );
                    return replay(&winner);
                }
                Ok(_) => {
                    state.metrics.record_uncached("winner_missing");
                    tracing::warn!(
                        owner = %record.owner,
                        key = %mask_sensitive(&record.key, 4),
                        "Winning idempotency record vanished, returning own response"
                    );
                }
                Err(e) => {
                    state.metrics.record_store_error("lookup");
                    tracing::warn!(error = %e, "Re-lookup after lost insert race failed");
                }
            }
        }
        Err(e) => {
            state.metrics.record_store_error("insert");
            tracing::warn!(
                error = %e,
                backend = state.store.backend_name(),
                "Failed to cache idempotent response"
            );
        }
    }

    mark_fresh(&mut parts.headers);
    Response::from_parts(parts, Body::from(bytes))
}

fn mark_fresh(headers: &mut axum::http::HeaderMap) {
    headers.insert(REPLAYED_HEADER, HeaderValue::from_static("false"));
}

/// Rebuilds the cached response verbatim, plus the replay metadata headers.
pub fn replay(record: &IdempotencyRecord) -> Response {
    let status = u16::try_from(record.status_code)
        .ok()
        .and_then(|code| StatusCode::from_u16(code).ok())
        .unwrap_or(StatusCode::OK);

    let mut response = Response::new(Body::from(record.response_payload.clone()));
    *response.status_mut() = status;

    let headers = response.headers_mut();
    if let Some(content_type) = record
        .content_type
        .as_deref()
        .and_then(|v| HeaderValue::from_str(v).ok())
    {
        headers.insert(CONTENT_TYPE, content_type);
    }
    headers.insert(REPLAYED_HEADER, HeaderValue::from_static("true"));
    if let Ok(original_at) = HeaderValue::from_str(&record.created_at.to_rfc3339()) {
        headers.insert(ORIGINAL_AT_HEADER, original_at);
    }

    response
}
