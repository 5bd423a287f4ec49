use axum::{
    extract::{MatchedPath, Request},
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use sqlx::PgPool;
use std::sync::Arc;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use super::handlers;
use crate::auth::{resolve_caller, CallerResolver};
use crate::idempotency::{idempotency_middleware, IdempotencyState};
use crate::observability::{get_metrics, HealthChecker, LatencyTimer};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub redis_client: Option<redis::Client>,
    pub idempotency: IdempotencyState,
    pub caller_resolver: CallerResolver,
    pub metrics_handle: Option<PrometheusHandle>,
    pub health_checker: Option<Arc<HealthChecker>>,
}

impl AppState {
    pub fn new(pool: PgPool, idempotency: IdempotencyState, caller_resolver: CallerResolver) -> Self {
        Self {
            pool,
            redis_client: None,
            idempotency,
            caller_resolver,
            metrics_handle: None,
            health_checker: None,
        }
    }

    pub fn with_redis(mut self, client: redis::Client) -> Self {
        self.redis_client = Some(client);
        self
    }

    /// Adds metrics handle to the state.
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics_handle = Some(handle);
        self
    }

    /// Adds health checker to the state.
    pub fn with_health_checker(mut self, checker: Arc<HealthChecker>) -> Self {
        self.health_checker = Some(checker);
        self
    }
}

/// Creates the main API router with all routes.
///
/// Wallet routes sit behind the idempotency stage, which itself runs after
/// caller resolution. Admin routes bypass idempotency.
pub fn create_router(state: AppState) -> Router {
    let wallet_routes = Router::new()
        .route("/wallets", post(handlers::create_wallet).get(handlers::list_wallets))
        .route("/wallets/:id", get(handlers::get_wallet))
        .route("/wallets/:id/transactions", get(handlers::list_wallet_transactions))
        .route("/wallets/:id/deposit", post(handlers::deposit))
        .route("/wallets/:id/withdraw", post(handlers::withdraw))
        .route("/transfers", post(handlers::create_transfer))
        .route_layer(middleware::from_fn_with_state(
            state.idempotency.clone(),
            idempotency_middleware,
        ));

    Router::new()
        // Health endpoints
        .route("/health", get(handlers::health_check))
        .route("/health/detailed", get(handlers::detailed_health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/live", get(handlers::liveness_check))
        // Metrics endpoint
        .route("/metrics", get(handlers::metrics_endpoint))
        // Idempotency admin endpoints
        .route("/admin/idempotency/purge", post(handlers::purge_idempotency_records))
        .route("/admin/idempotency/stats", get(handlers::idempotency_stats))
        .merge(wallet_routes)
        .layer(middleware::from_fn_with_state(
            state.caller_resolver.clone(),
            resolve_caller,
        ))
        .layer(middleware::from_fn(track_http_metrics))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .with_state(state)
}

async fn track_http_metrics(req: Request, next: Next) -> Response {
    let method = req.method().to_string();
    let path = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());
    let timer = LatencyTimer::new();

    let response = next.run(req).await;

    get_metrics().record_http_request(&method, &path, response.status().as_u16(), timer.elapsed_ms());
    response
}
