use payment_api::api::{create_router, AppState};
use payment_api::auth::CallerResolver;
use payment_api::config::{IdempotencyBackend, Settings};
use payment_api::idempotency::{
    IdempotencyState, IdempotencyStore, IdempotencySweeper, InMemoryIdempotencyStore,
    PostgresIdempotencyStore, RedisIdempotencyStore,
};
use payment_api::observability::{init_logging, init_metrics, HealthChecker, LogConfig};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    // Load configuration
    let settings = Settings::new()?;
    init_logging(&LogConfig::from_settings(&settings.application));
    info!("Configuration loaded");

    let metrics_handle = init_metrics()?;

    // Connect to PostgreSQL
    info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(settings.database.pool_size)
        .acquire_timeout(Duration::from_secs(5))
        .connect(&settings.database.url)
        .await?;
    info!("Database connection established");

    // Run migrations
    info!("Running database migrations...");
    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Migrations applied successfully");

    let redis_client = match settings.idempotency.backend {
        IdempotencyBackend::Redis => {
            info!("Connecting to Redis...");
            let client = redis::Client::open(settings.redis.url.as_str())?;
            let mut con = client.get_multiplexed_async_connection().await?;
            let _: () = redis::cmd("PING").query_async(&mut con).await?;
            info!("Redis connection established");
            Some(client)
        }
        _ => None,
    };

    let store: Arc<dyn IdempotencyStore> = match (&settings.idempotency.backend, &redis_client) {
        (IdempotencyBackend::Redis, Some(client)) => Arc::new(RedisIdempotencyStore::new(
            client.clone(),
            settings.idempotency.redis_key_prefix.clone(),
        )),
        (IdempotencyBackend::Memory, _) => Arc::new(InMemoryIdempotencyStore::new()),
        _ => Arc::new(PostgresIdempotencyStore::new(pool.clone())),
    };
    info!(backend = store.backend_name(), "Idempotency store ready");

    let sweeper = settings
        .idempotency
        .sweeper_enabled
        .then(|| IdempotencySweeper::new(store.clone()).start());

    let idempotency = IdempotencyState::new(store)
        .with_max_cached_body_bytes(settings.idempotency.max_cached_body_bytes);
    let health_checker = Arc::new(HealthChecker::new(pool.clone(), redis_client.clone()));

    let mut state = AppState::new(
        pool,
        idempotency,
        CallerResolver::new(settings.auth.caller_header.clone()),
    )
    .with_metrics(metrics_handle)
    .with_health_checker(health_checker);
    if let Some(client) = redis_client {
        state = state.with_redis(client);
    }

    let addr = format!("{}:{}", settings.application.host, settings.application.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Payment API listening on {}", addr);

    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(sweeper) = sweeper {
        sweeper.shutdown().await;
    }
    info!("Shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
