use std::result::Result;
use std::{
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::{Duration, Instant},
};

use axum::{extract::Request, middleware::Next, response::Response};
use dotenvy::dotenv;
use sqlx::postgres::PgPoolOptions;
use tower::ServiceBuilder;
use tracing::warn;

use cernunnos::{
    allocator::Allocator,
    config::load_config,
    error::AppError,
    middleware::request_context_middleware,
    observability::{init_metrics, init_tracing},
    repositories::{
        PgDistributionRepository, PgProductRepository, PgReservationRepository,
        PgStorageRepository,
    },
    routes::create_router,
    services::{
        HealthCheckServiceImpl, ProductService, ReservationService, StorageService,
    },
    state::AppState,
    uow::PgUnitOfWorkFactory,
};

static ACTIVE_REQUESTS: AtomicUsize = AtomicUsize::new(0);

#[tokio::main]
async fn main() -> Result<(), AppError> {
    dotenv().ok();

    let config = load_config()?;

    init_tracing(config.environment.as_str());

    tracing::info!(
        app_name = %config.app.name,
        version = %config.app.version,
        environment = %config.environment.as_str(),
        "Starting cernunnos"
    );

    let metrics_handle = if config.observability.enable_metrics {
        Some(init_metrics()?)
    } else {
        None
    };

    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .min_connections(config.database.min_connections)
        .acquire_timeout(config.database.acquire_timeout())
        .max_lifetime(config.database.max_lifetime())
        .idle_timeout(config.database.idle_timeout())
        .connect_with(config.database.connect_options())
        .await
        .map_err(AppError::DatabaseError)?;

    tracing::info!("Database pool connected successfully");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(AppError::MigrationError)?;

    let storage_repo = Arc::new(PgStorageRepository::new(pool.clone()));
    let product_repo = Arc::new(PgProductRepository::new(pool.clone()));
    let distribution_repo = Arc::new(PgDistributionRepository::new());
    let reservation_repo = Arc::new(PgReservationRepository::new(pool.clone()));
    let uow_factory = Arc::new(PgUnitOfWorkFactory::new(pool.clone()));

    let allocator = Allocator::new(distribution_repo.clone());

    let storage_service = Arc::new(StorageService::new(storage_repo));
    let product_service = Arc::new(ProductService::new(product_repo));
    let reservation_service = Arc::new(ReservationService::new(
        uow_factory,
        allocator,
        distribution_repo,
        reservation_repo,
    ));

    let app_state = AppState {
        health_check_service: Arc::new(HealthCheckServiceImpl::new(
            pool.clone(),
            config.database.clone(),
        )),
        storage_service,
        product_service,
        reservation_service,
        config: config.clone(),
        start_time: Instant::now(),
        metrics_handle,
    };

    let app = create_router(app_state).layer(
        ServiceBuilder::new()
            .layer(axum::middleware::from_fn(request_context_middleware))
            .layer(axum::middleware::from_fn(request_counter_middleware)),
    );

    let addr: SocketAddr = config
        .server
        .bind_address()
        .parse()
        .map_err(|e| AppError::ConfigError(format!("Invalid bind address: {}", e)))?;

    tracing::info!("Server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| AppError::ConfigError(format!("Failed to bind: {}", e)))?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .map_err(|e| AppError::ConfigError(format!("Server error: {}", e)))?;

    tracing::info!("Draining active connections...");
    let drain_start = Instant::now();
    let drain_timeout = config.server.shutdown_timeout();

    loop {
        let active = ACTIVE_REQUESTS.load(Ordering::SeqCst);

        if active == 0 {
            tracing::info!("All connections drained successfully");
            break;
        }

        if drain_start.elapsed() > drain_timeout {
            tracing::warn!(
                "Drain timeout reached with {} active requests still pending",
                active
            );
            break;
        }

        tracing::debug!("Waiting for {} active connections to complete...", active);

        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    tracing::info!("Closing database pool...");
    pool.close().await;
    tracing::info!("Database pool closed");

    tracing::info!("Shutdown complete");
    Ok(())
}

async fn request_counter_middleware(request: Request, next: Next) -> Response {
    ACTIVE_REQUESTS.fetch_add(1, Ordering::SeqCst);

    let response = next.run(request).await;

    ACTIVE_REQUESTS.fetch_sub(1, Ordering::SeqCst);

    response
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
        tracing::info!("Received SIGINT (Ctrl+C)");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
        tracing::info!("Received SIGTERM");
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    warn!("Shutdown signal processed, starting graceful shutdown sequence...");
}
