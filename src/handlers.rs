use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::extractors::{OptionalJson, ValidatedJson};
use crate::models::{
    CancelRequest, HealthResponse, HealthStatus, OkResponse, ProductsRequest, ReleaseRequest,
    ReservationsRequest, ReserveRequest, StorageProductsRequest, StoragesRequest,
};
use crate::services::{FreeParams, ReserveParams};
use crate::state::AppState;

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "System is healthy or degraded", body = HealthResponse),
        (status = 503, description = "Service unhealthy")
    ),
    tag = "System"
)]
pub async fn health_check_handler(State(state): State<AppState>) -> impl IntoResponse {
    let system_health = state.health_check_service.check_full().await;

    let (http_status, db_status_str) = match &system_health.database {
        HealthStatus::Healthy => (StatusCode::OK, "Up"),
        HealthStatus::Degraded(reason) => {
            tracing::warn!("Health check degraded: {}", reason);
            (StatusCode::OK, "Degraded")
        }
        HealthStatus::Unhealthy(reason) => {
            tracing::error!("Health check failed: {}", reason);
            (StatusCode::SERVICE_UNAVAILABLE, "Down")
        }
    };

    let response = HealthResponse {
        status: match http_status {
            StatusCode::OK => "OK",
            _ => "ERROR",
        }
        .to_string(),
        database: db_status_str.to_string(),
        database_details: match &system_health.database {
            HealthStatus::Healthy => None,
            HealthStatus::Degraded(reason) | HealthStatus::Unhealthy(reason) => {
                Some(reason.clone())
            }
        },
        response_time_ms: system_health.response_time_ms,
        uptime_seconds: state.start_time.elapsed().as_secs(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    };

    (http_status, Json(response)).into_response()
}

#[utoipa::path(
    get,
    path = "/metrics",
    responses(
        (status = 200, description = "Prometheus scrape payload"),
        (status = 404, description = "Metrics disabled")
    ),
    tag = "System"
)]
pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    match &state.metrics_handle {
        Some(handle) => (StatusCode::OK, handle.render()).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

#[utoipa::path(
    get,
    path = "/storages",
    request_body(content = StoragesRequest, description = "Optional filters", content_type = "application/json"),
    responses(
        (status = 200, description = "Storages matching the filter", body = crate::models::StoragesResponse),
        (status = 400, description = "Malformed filter", body = crate::error::ApiError)
    ),
    tag = "Storages"
)]
pub async fn list_storages_handler(
    State(state): State<AppState>,
    OptionalJson(req): OptionalJson<StoragesRequest>,
) -> AppResult<impl IntoResponse> {
    let response = state.storage_service.storages(req).await?;
    Ok(Json(response))
}

#[utoipa::path(
    get,
    path = "/storages/{storage_id}/products",
    params(
        ("storage_id" = String, Path, description = "Storage UUID")
    ),
    request_body(content = StorageProductsRequest, description = "Optional filters", content_type = "application/json"),
    responses(
        (status = 200, description = "Products held by the storage", body = crate::models::ProductsResponse),
        (status = 400, description = "Invalid path or filter", body = crate::error::ApiError)
    ),
    tag = "Products"
)]
pub async fn list_storage_products_handler(
    State(state): State<AppState>,
    Path(storage_id): Path<String>,
    OptionalJson(req): OptionalJson<StorageProductsRequest>,
) -> AppResult<impl IntoResponse> {
    let storage_id = Uuid::parse_str(&storage_id)
        .map_err(|e| AppError::BadRequest(format!("invalid storage id in path: {e}")))?;

    let response = state
        .product_service
        .storage_products(storage_id, req)
        .await?;
    Ok(Json(response))
}

#[utoipa::path(
    get,
    path = "/products",
    request_body(content = ProductsRequest, description = "Optional filters", content_type = "application/json"),
    responses(
        (status = 200, description = "Products matching the filter", body = crate::models::ProductsResponse),
        (status = 400, description = "Malformed filter", body = crate::error::ApiError)
    ),
    tag = "Products"
)]
pub async fn list_products_handler(
    State(state): State<AppState>,
    OptionalJson(req): OptionalJson<ProductsRequest>,
) -> AppResult<impl IntoResponse> {
    let response = state.product_service.products(req).await?;
    Ok(Json(response))
}

#[utoipa::path(
    get,
    path = "/reservations",
    request_body(content = ReservationsRequest, description = "Optional filters", content_type = "application/json"),
    responses(
        (status = 200, description = "Reservations matching the filter", body = crate::models::ReservationsResponse),
        (status = 400, description = "Malformed filter", body = crate::error::ApiError)
    ),
    tag = "Reservations"
)]
pub async fn list_reservations_handler(
    State(state): State<AppState>,
    OptionalJson(req): OptionalJson<ReservationsRequest>,
) -> AppResult<impl IntoResponse> {
    let response = state.reservation_service.reservations(req).await?;
    Ok(Json(response))
}

#[utoipa::path(
    post,
    path = "/reservations/new",
    request_body = ReserveRequest,
    responses(
        (status = 200, description = "Products reserved", body = OkResponse),
        (status = 400, description = "Missing or malformed fields", body = crate::error::ApiError),
        (status = 507, description = "Not enough available stock", body = crate::error::ApiError)
    ),
    tag = "Reservations"
)]
pub async fn reserve_handler(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<ReserveRequest>,
) -> AppResult<impl IntoResponse> {
    let params = ReserveParams::from_request(req)?;
    state.reservation_service.reserve(params).await?;
    Ok(Json(OkResponse::ok()))
}

#[utoipa::path(
    delete,
    path = "/reservations/cancel",
    request_body = CancelRequest,
    responses(
        (status = 200, description = "Reservations cancelled, stock restocked", body = OkResponse),
        (status = 400, description = "Missing or malformed fields", body = crate::error::ApiError)
    ),
    tag = "Reservations"
)]
pub async fn cancel_reservation_handler(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<CancelRequest>,
) -> AppResult<impl IntoResponse> {
    let params = FreeParams::from_cancel(req)?;
    state.reservation_service.cancel(params).await?;
    Ok(Json(OkResponse::ok()))
}

#[utoipa::path(
    delete,
    path = "/reservations/release",
    request_body = ReleaseRequest,
    responses(
        (status = 200, description = "Reservations released, stock written off", body = OkResponse),
        (status = 400, description = "Missing or malformed fields", body = crate::error::ApiError)
    ),
    tag = "Reservations"
)]
pub async fn release_reservation_handler(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<ReleaseRequest>,
) -> AppResult<impl IntoResponse> {
    let params = FreeParams::from_release(req)?;
    state.reservation_service.release(params).await?;
    Ok(Json(OkResponse::ok()))
}
