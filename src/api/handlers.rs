use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use uuid::Uuid;

use crate::api::requests::{
    AmountRequest, CreateWalletRequest, ListTransactionsQuery, TransferRequest, ValidationError,
};
use crate::api::responses::{
    ApiResponse, ErrorResponse, HealthResponse, PaginatedResponse, PurgeResponse, ServiceHealth,
    TransferResponse, ValidationErrorDetail, WalletResponse, WalletTransactionResponse,
};
use crate::auth::AuthenticatedCaller;
use crate::error::AppError;
use crate::idempotency::{IdempotencySweeper, MetricsSnapshot};
use crate::observability::AggregatedHealth;
use crate::services::WalletService;

use super::routes::AppState;

type HandlerResult<T> = Result<(StatusCode, Json<ApiResponse<T>>), Response>;

fn validation_failed(errors: Vec<ValidationError>) -> Response {
    let details: Vec<ValidationErrorDetail> = errors
        .into_iter()
        .map(|e| ValidationErrorDetail {
            field: e.field,
            message: e.message,
        })
        .collect();

    (
        StatusCode::BAD_REQUEST,
        Json(ApiResponse::<()>::error(
            ErrorResponse::new("VALIDATION_ERROR", "Request validation failed").with_details(details),
        )),
    )
        .into_response()
}

fn respond<T>(status: StatusCode, data: T) -> (StatusCode, Json<ApiResponse<T>>) {
    (status, Json(ApiResponse::success(data)))
}

/// Health check endpoint.
pub async fn health_check(State(state): State<AppState>) -> Json<ApiResponse<HealthResponse>> {
    let db_healthy = sqlx::query("SELECT 1")
        .fetch_one(&state.pool)
        .await
        .is_ok();

    let redis_healthy = match &state.redis_client {
        Some(client) => Some(client.get_multiplexed_async_connection().await.is_ok()),
        None => None,
    };

    let healthy = db_healthy && redis_healthy.unwrap_or(true);
    let response = HealthResponse {
        status: if healthy { "healthy".to_string() } else { "degraded".to_string() },
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: chrono::Utc::now(),
        services: ServiceHealth {
            database: db_healthy,
            redis: redis_healthy,
            idempotency_backend: state.idempotency.store.backend_name().to_string(),
        },
    };

    Json(ApiResponse::success(response))
}

/// Per-dependency health with latencies.
pub async fn detailed_health_check(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<AggregatedHealth>>, StatusCode> {
    let checker = state.health_checker.as_ref().ok_or(StatusCode::SERVICE_UNAVAILABLE)?;
    Ok(Json(ApiResponse::success(checker.check_all().await)))
}

/// Readiness check endpoint.
pub async fn readiness_check(State(state): State<AppState>) -> StatusCode {
    let ready = match &state.health_checker {
        Some(checker) => checker.is_ready().await,
        None => sqlx::query("SELECT 1").fetch_one(&state.pool).await.is_ok(),
    };

    if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// Liveness check endpoint.
pub async fn liveness_check(State(state): State<AppState>) -> StatusCode {
    let alive = state
        .health_checker
        .as_ref()
        .map_or(true, |checker| checker.is_alive());

    if alive {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// Prometheus scrape endpoint.
pub async fn metrics_endpoint(State(state): State<AppState>) -> Response {
    match &state.metrics_handle {
        Some(handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

// ============================================================================
// Wallet Handlers
// ============================================================================

pub async fn create_wallet(
    State(state): State<AppState>,
    caller: AuthenticatedCaller,
    Json(request): Json<CreateWalletRequest>,
) -> HandlerResult<WalletResponse> {
    request.validate().map_err(validation_failed)?;

    let wallet = WalletService::new(state.pool.clone())
        .create_wallet(&caller.id, &request.currency)
        .await
        .map_err(IntoResponse::into_response)?;

    Ok(respond(StatusCode::CREATED, WalletResponse::from(wallet)))
}

pub async fn list_wallets(
    State(state): State<AppState>,
    caller: AuthenticatedCaller,
) -> HandlerResult<Vec<WalletResponse>> {
    let wallets = WalletService::new(state.pool.clone())
        .list_wallets(&caller.id)
        .await
        .map_err(IntoResponse::into_response)?;

    Ok(respond(
        StatusCode::OK,
        wallets.into_iter().map(WalletResponse::from).collect(),
    ))
}

pub async fn get_wallet(
    State(state): State<AppState>,
    caller: AuthenticatedCaller,
    Path(id): Path<Uuid>,
) -> HandlerResult<WalletResponse> {
    let wallet = WalletService::new(state.pool.clone())
        .get_wallet(&caller.id, id)
        .await
        .map_err(IntoResponse::into_response)?;

    Ok(respond(StatusCode::OK, WalletResponse::from(wallet)))
}

pub async fn list_wallet_transactions(
    State(state): State<AppState>,
    caller: AuthenticatedCaller,
    Path(id): Path<Uuid>,
    Query(query): Query<ListTransactionsQuery>,
) -> HandlerResult<PaginatedResponse<WalletTransactionResponse>> {
    let (limit, offset) = query.bounds();
    let service = WalletService::new(state.pool.clone());

    let items = service
        .list_transactions(&caller.id, id, limit, offset)
        .await
        .map_err(IntoResponse::into_response)?;
    let total = service
        .count_transactions(id)
        .await
        .map_err(IntoResponse::into_response)?;

    let items = items.into_iter().map(WalletTransactionResponse::from).collect();
    Ok(respond(
        StatusCode::OK,
        PaginatedResponse::new(items, total, limit, offset),
    ))
}

pub async fn deposit(
    State(state): State<AppState>,
    caller: AuthenticatedCaller,
    Path(id): Path<Uuid>,
    Json(request): Json<AmountRequest>,
) -> HandlerResult<WalletTransactionResponse> {
    request.validate().map_err(validation_failed)?;

    let txn = WalletService::new(state.pool.clone())
        .deposit(&caller.id, id, request.amount)
        .await
        .map_err(IntoResponse::into_response)?;

    Ok(respond(StatusCode::OK, WalletTransactionResponse::from(txn)))
}

/// Withdraws funds; 422 when the balance cannot cover the amount.
pub async fn withdraw(
    State(state): State<AppState>,
    caller: AuthenticatedCaller,
    Path(id): Path<Uuid>,
    Json(request): Json<AmountRequest>,
) -> HandlerResult<WalletTransactionResponse> {
    request.validate().map_err(validation_failed)?;

    let txn = WalletService::new(state.pool.clone())
        .withdraw(&caller.id, id, request.amount)
        .await
        .map_err(IntoResponse::into_response)?;

    Ok(respond(StatusCode::OK, WalletTransactionResponse::from(txn)))
}

pub async fn create_transfer(
    State(state): State<AppState>,
    caller: AuthenticatedCaller,
    Json(request): Json<TransferRequest>,
) -> HandlerResult<TransferResponse> {
    request.validate().map_err(validation_failed)?;

    let result = WalletService::new(state.pool.clone())
        .transfer(
            &caller.id,
            request.from_wallet_id,
            request.to_wallet_id,
            request.amount,
        )
        .await
        .map_err(IntoResponse::into_response)?;

    Ok(respond(StatusCode::OK, TransferResponse::from(result)))
}

// ============================================================================
// Idempotency Admin Handlers
// ============================================================================

/// Runs one sweep immediately.
pub async fn purge_idempotency_records(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<PurgeResponse>>, AppError> {
    let purged = IdempotencySweeper::new(state.idempotency.store.clone())
        .run_once()
        .await?;

    Ok(Json(ApiResponse::success(PurgeResponse { purged })))
}

pub async fn idempotency_stats(State(state): State<AppState>) -> Json<ApiResponse<MetricsSnapshot>> {
    Json(ApiResponse::success(state.idempotency.metrics.snapshot()))
}
