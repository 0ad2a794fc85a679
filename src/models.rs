use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::error::{AppError, AppResult};

/// Upper bound and fallback for every list query.
pub const DEFAULT_LIMIT: u32 = 500;

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub database: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub database_details: Option<String>,

    pub response_time_ms: u64,
    pub uptime_seconds: u64,
    pub version: String,
    pub timestamp: String,
}

#[derive(Debug, Clone)]
pub enum HealthStatus {
    Healthy,
    Degraded(String),
    Unhealthy(String),
}

#[derive(Debug, Clone)]
pub struct SystemHealth {
    pub database: HealthStatus,
    pub overall: HealthStatus,
    pub response_time_ms: u64,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, sqlx::Type,
)]
#[sqlx(type_name = "storage_availability", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum StorageAvailability {
    Available,
    Busy,
    Unavailable,
}

#[derive(Debug, Clone, FromRow)]
pub struct Storage {
    pub id: Uuid,
    pub name: String,
    pub availability: StorageAvailability,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct Product {
    pub id: Uuid,
    pub name: String,
    pub size: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The counters this system defends: `amount = reserved + available` holds
/// on every committed row.
#[derive(Debug, Clone, FromRow)]
pub struct DistributionRow {
    pub storage_id: Uuid,
    pub product_id: Uuid,
    pub amount: i64,
    pub reserved: i64,
    pub available: i64,
}

/// Product joined with one of its distribution rows and the owning storage.
#[derive(Debug, Clone, FromRow)]
pub struct StorageProductRow {
    pub storage_id: Uuid,
    pub storage_name: String,
    pub availability: StorageAvailability,
    pub storage_created_at: DateTime<Utc>,
    pub storage_updated_at: DateTime<Utc>,
    pub product_id: Uuid,
    pub product_name: String,
    pub size: i64,
    pub product_created_at: DateTime<Utc>,
    pub product_updated_at: DateTime<Utc>,
    pub amount: i64,
    pub reserved: i64,
    pub available: i64,
}

/// Flat aggregate returned by the reservation read path: the reservation row
/// plus the storage, product and distribution it references.
#[derive(Debug, Clone, FromRow)]
pub struct ReservationDetailRow {
    pub storage_id: Uuid,
    pub product_id: Uuid,
    pub shipping_id: Uuid,
    pub reserved: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub storage_name: String,
    pub availability: StorageAvailability,
    pub product_name: String,
    pub size: i64,
    pub distribution_amount: i64,
    pub distribution_reserved: i64,
}

/// Per-storage sum of live reservations for one `(product, shipping)` pair.
#[derive(Debug, Clone, Copy)]
pub struct ReservedByStorage {
    pub storage_id: Uuid,
    pub reserved: i64,
}

#[derive(Debug, Clone, Default)]
pub struct StorageFilter {
    pub ids: Option<Vec<Uuid>>,
    pub with_busy: bool,
    pub with_unavailable: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ProductFilter {
    pub ids: Option<Vec<Uuid>>,
}

#[derive(Debug, Clone, Default)]
pub struct StorageProductFilter {
    pub ids: Option<Vec<Uuid>>,
    pub storage_id: Option<Uuid>,
    pub with_unavailable: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ReservationFilter {
    pub storage_id: Option<Uuid>,
    pub product_id: Option<Uuid>,
    pub shipping_id: Option<Uuid>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct Pagination {
    pub limit: u32,
    pub offset: u32,
}

impl Pagination {
    /// `limit = 0` and anything above `DEFAULT_LIMIT` both fall back to
    /// `DEFAULT_LIMIT`.
    pub fn normalize(&self) -> (i64, i64) {
        let limit = if self.limit == 0 || self.limit > DEFAULT_LIMIT {
            DEFAULT_LIMIT
        } else {
            self.limit
        };

        (limit as i64, self.offset as i64)
    }
}

// --- wire DTOs -------------------------------------------------------------

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct StoragesRequest {
    #[serde(default)]
    pub ids: Vec<String>,
    #[serde(default)]
    pub with_busy: bool,
    #[serde(default)]
    pub with_unavailable: bool,
    #[serde(default)]
    pub limit: u32,
    #[serde(default)]
    pub offset: u32,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct StorageDto {
    pub id: String,
    pub name: String,
    pub availability: StorageAvailability,
    pub created_at: u64,
    pub updated_at: u64,
}

impl From<Storage> for StorageDto {
    fn from(storage: Storage) -> Self {
        Self {
            id: storage.id.to_string(),
            name: storage.name,
            availability: storage.availability,
            created_at: unix_millis(storage.created_at),
            updated_at: unix_millis(storage.updated_at),
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct StoragesResponse {
    pub storages: Vec<StorageDto>,
    pub offset: u32,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct StorageProductsRequest {
    #[serde(default)]
    pub ids: Vec<String>,
    #[serde(default)]
    pub with_unavailable: bool,
    #[serde(default)]
    pub limit: u32,
    #[serde(default)]
    pub offset: u32,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct ProductsRequest {
    #[serde(default)]
    pub ids: Vec<String>,
    #[serde(default)]
    pub storage_id: Option<String>,
    #[serde(default)]
    pub with_unavailable: bool,
    #[serde(default)]
    pub limit: u32,
    #[serde(default)]
    pub offset: u32,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct DistributionDto {
    pub storage_id: String,
    pub amount: i64,
    pub reserved: i64,
    pub available: i64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ProductDto {
    pub id: String,
    pub name: String,
    pub size: i64,
    pub created_at: u64,
    pub updated_at: u64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub distribution: Vec<DistributionDto>,
}

impl From<Product> for ProductDto {
    fn from(product: Product) -> Self {
        Self {
            id: product.id.to_string(),
            name: product.name,
            size: product.size,
            created_at: unix_millis(product.created_at),
            updated_at: unix_millis(product.updated_at),
            distribution: Vec::new(),
        }
    }
}

impl From<StorageProductRow> for ProductDto {
    fn from(row: StorageProductRow) -> Self {
        Self {
            id: row.product_id.to_string(),
            name: row.product_name,
            size: row.size,
            created_at: unix_millis(row.product_created_at),
            updated_at: unix_millis(row.product_updated_at),
            distribution: vec![DistributionDto {
                storage_id: row.storage_id.to_string(),
                amount: row.amount,
                reserved: row.reserved,
                available: row.available,
            }],
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ProductsResponse {
    pub products: Vec<ProductDto>,
    pub offset: u32,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct ReservationsRequest {
    #[serde(default)]
    pub storage_id: Option<String>,
    #[serde(default)]
    pub product_id: Option<String>,
    #[serde(default)]
    pub shipping_id: Option<String>,
    #[serde(default)]
    pub limit: u32,
    #[serde(default)]
    pub offset: u32,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ReservationDto {
    pub storage_id: String,
    pub product_id: String,
    pub shipping_id: String,
    pub reserved: i64,
    pub created_at: u64,
    pub updated_at: u64,
}

impl From<ReservationDetailRow> for ReservationDto {
    fn from(row: ReservationDetailRow) -> Self {
        Self {
            storage_id: row.storage_id.to_string(),
            product_id: row.product_id.to_string(),
            shipping_id: row.shipping_id.to_string(),
            reserved: row.reserved,
            created_at: unix_millis(row.created_at),
            updated_at: unix_millis(row.updated_at),
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ReservationsResponse {
    pub reservations: Vec<ReservationDto>,
    pub offset: u32,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct ReserveRequest {
    #[serde(default)]
    pub products: Vec<String>,
    #[serde(default)]
    pub storage_id: Option<String>,
    #[serde(default)]
    pub shipping_id: Option<String>,
    #[serde(default)]
    pub amount: i64,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CancelRequest {
    #[serde(default)]
    pub products: Vec<String>,
    #[serde(default)]
    pub storage_id: Option<String>,
    #[serde(default)]
    pub shipping_id: Option<String>,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct ReleaseRequest {
    #[serde(default)]
    pub products: Vec<String>,
    #[serde(default)]
    pub storage_id: Option<String>,
    #[serde(default)]
    pub shipping_id: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OkResponse {
    pub ok: bool,
}

impl OkResponse {
    pub fn ok() -> Self {
        Self { ok: true }
    }
}

// --- id and timestamp mapping ----------------------------------------------

pub fn unix_millis(ts: DateTime<Utc>) -> u64 {
    ts.timestamp_millis().max(0) as u64
}

pub fn parse_ids(ids: &[String]) -> AppResult<Vec<Uuid>> {
    ids.iter()
        .map(|id| {
            Uuid::parse_str(id)
                .map_err(|e| AppError::UnexpectedData(format!("invalid id {id:?}: {e}")))
        })
        .collect()
}

/// Missing and empty both mean "not supplied"; anything else must parse.
pub fn parse_optional_id(id: Option<&str>) -> AppResult<Option<Uuid>> {
    match id {
        None => Ok(None),
        Some("") => Ok(None),
        Some(raw) => Uuid::parse_str(raw)
            .map(Some)
            .map_err(|e| AppError::UnexpectedData(format!("invalid id {raw:?}: {e}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn pagination_zero_limit_falls_back_to_default() {
        let (limit, offset) = Pagination { limit: 0, offset: 7 }.normalize();
        assert_eq!(limit, 500);
        assert_eq!(offset, 7);
    }

    #[test]
    fn pagination_oversized_limit_is_clamped() {
        let (limit, _) = Pagination {
            limit: 501,
            offset: 0,
        }
        .normalize();
        assert_eq!(limit, 500);
    }

    #[test]
    fn pagination_in_range_limit_is_kept() {
        let (limit, _) = Pagination {
            limit: 250,
            offset: 0,
        }
        .normalize();
        assert_eq!(limit, 250);
    }

    #[test]
    fn unix_millis_round_trips_known_instant() {
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        assert_eq!(unix_millis(ts), 1_714_564_800_000);
    }

    #[test]
    fn parse_ids_rejects_garbage() {
        let err = parse_ids(&["not-a-uuid".to_string()]).unwrap_err();
        assert!(matches!(err, AppError::UnexpectedData(_)));
    }

    #[test]
    fn parse_optional_id_treats_empty_as_absent() {
        assert!(parse_optional_id(Some("")).unwrap().is_none());
        assert!(parse_optional_id(None).unwrap().is_none());

        let id = Uuid::new_v4();
        assert_eq!(
            parse_optional_id(Some(&id.to_string())).unwrap(),
            Some(id)
        );
    }

    #[test]
    fn product_dto_from_storage_product_carries_distribution() {
        let now = Utc::now();
        let row = StorageProductRow {
            storage_id: Uuid::new_v4(),
            storage_name: "north".into(),
            availability: StorageAvailability::Available,
            storage_created_at: now,
            storage_updated_at: now,
            product_id: Uuid::new_v4(),
            product_name: "crate".into(),
            size: 3,
            product_created_at: now,
            product_updated_at: now,
            amount: 100,
            reserved: 40,
            available: 60,
        };

        let dto = ProductDto::from(row.clone());
        assert_eq!(dto.distribution.len(), 1);
        assert_eq!(dto.distribution[0].available, 60);
        assert_eq!(dto.distribution[0].storage_id, row.storage_id.to_string());
    }
}
