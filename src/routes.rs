use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    extract::Request,
    http::{HeaderName, StatusCode},
    routing::{delete, get, post},
};
use tower::ServiceBuilder;
use tower_governor::{
    GovernorLayer, governor::GovernorConfigBuilder, key_extractor::PeerIpKeyExtractor,
};
use tower_http::{
    compression::CompressionLayer,
    limit::RequestBodyLimitLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::{DefaultOnResponse, TraceLayer},
};
use tracing::Level;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::config::create_cors_layer;
use crate::error::ApiError;
use crate::handlers;
use crate::models::*;
use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::health_check_handler,
        crate::handlers::metrics_handler,
        crate::handlers::list_storages_handler,
        crate::handlers::list_storage_products_handler,
        crate::handlers::list_products_handler,
        crate::handlers::list_reservations_handler,
        crate::handlers::reserve_handler,
        crate::handlers::cancel_reservation_handler,
        crate::handlers::release_reservation_handler,
    ),
    components(
        schemas(
            ApiError,
            HealthResponse,
            StorageAvailability,
            StoragesRequest,
            StorageDto,
            StoragesResponse,
            StorageProductsRequest,
            ProductsRequest,
            DistributionDto,
            ProductDto,
            ProductsResponse,
            ReservationsRequest,
            ReservationDto,
            ReservationsResponse,
            ReserveRequest,
            CancelRequest,
            ReleaseRequest,
            OkResponse,
        )
    ),
    tags(
        (name = "Storages", description = "Warehouse locations and their stock"),
        (name = "Products", description = "Product catalog and per-storage distribution"),
        (name = "Reservations", description = "Shipping reservation lifecycle: reserve, cancel, release"),
    ),
    info(
        title = "Cernunnos API",
        version = "0.1.0",
        description = "Warehouse inventory and shipping-reservation service"
    )
)]
struct ApiDoc;

pub fn create_router(state: AppState) -> Router {
    let x_request_id = HeaderName::from_static("x-request-id");

    let cors_layer = create_cors_layer(&state.config.cors)
        .expect("Failed to create CORS layer. Check your configuration.");

    let inner_layers = ServiceBuilder::new()
        .layer(RequestBodyLimitLayer::new(2 * 1024 * 1024))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            state.config.server.request_timeout(),
        ));

    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(50)
            .burst_size(100)
            .key_extractor(PeerIpKeyExtractor)
            .finish()
            .expect("Invalid rate limiter configuration"),
    );

    let outer_layers = ServiceBuilder::new()
        .layer(SetRequestIdLayer::new(
            x_request_id.clone(),
            MakeRequestUuid,
        ))
        .layer(PropagateRequestIdLayer::new(x_request_id.clone()))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &Request<Body>| {
                    let request_id = request
                        .headers()
                        .get("x-request-id")
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or("unknown");

                    tracing::info_span!(
                        "http_request",
                        method = %request.method(),
                        uri = %request.uri(),
                        request_id = %request_id,
                    )
                })
                .on_response(
                    DefaultOnResponse::new()
                        .level(Level::INFO)
                        .latency_unit(tower_http::LatencyUnit::Millis),
                ),
        )
        .layer(CompressionLayer::new());

    let api_routes = Router::new()
        .route("/storages", get(handlers::list_storages_handler))
        .route(
            "/storages/{storage_id}/products",
            get(handlers::list_storage_products_handler),
        )
        .route("/products", get(handlers::list_products_handler))
        .nest("/reservations", reservation_routes())
        .layer(inner_layers)
        .layer(GovernorLayer::new(governor_conf));

    Router::new()
        .route("/health", get(handlers::health_check_handler))
        .route("/metrics", get(handlers::metrics_handler))
        .merge(api_routes)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(outer_layers)
        .layer(cors_layer)
        .with_state(state)
}

fn reservation_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(handlers::list_reservations_handler))
        .route("/new", post(handlers::reserve_handler))
        .route("/cancel", delete(handlers::cancel_reservation_handler))
        .route("/release", delete(handlers::release_reservation_handler))
}
