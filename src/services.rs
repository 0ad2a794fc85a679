use std::sync::Arc;

use chrono::Utc;
use sqlx::PgPool;
use tokio::time::timeout;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::allocator::Allocator;
use crate::config::DatabaseConfig;
use crate::error::{AppError, AppResult};
use crate::models::{
    CancelRequest, HealthStatus, Pagination, ProductDto, ProductFilter, ProductsRequest,
    ProductsResponse, ReleaseRequest, ReservationDto, ReservationFilter, ReservationsRequest,
    ReservationsResponse, ReserveRequest, StorageDto, StorageFilter, StorageProductFilter,
    StorageProductsRequest, StoragesRequest, StoragesResponse, SystemHealth, parse_ids,
    parse_optional_id,
};
use crate::repositories::{
    DistributionRepository, ProductRepository, ReservationRepository, StorageRepository,
};
use crate::uow::{UnitOfWork, UnitOfWorkFactory};

#[derive(Debug, Clone)]
pub struct ReserveParams {
    pub product_ids: Vec<Uuid>,
    pub storage_id: Option<Uuid>,
    pub shipping_id: Uuid,
    pub amount: i64,
}

impl ReserveParams {
    pub fn from_request(req: ReserveRequest) -> AppResult<Self> {
        Ok(Self {
            product_ids: parse_ids(&req.products)?,
            storage_id: parse_optional_id(req.storage_id.as_deref())?,
            shipping_id: parse_optional_id(req.shipping_id.as_deref())?.unwrap_or(Uuid::nil()),
            amount: req.amount,
        })
    }
}

#[derive(Debug, Clone)]
pub struct FreeParams {
    pub product_ids: Vec<Uuid>,
    pub storage_id: Option<Uuid>,
    pub shipping_id: Uuid,
}

impl FreeParams {
    pub fn from_cancel(req: CancelRequest) -> AppResult<Self> {
        Self::parse(req.products, req.storage_id, req.shipping_id)
    }

    pub fn from_release(req: ReleaseRequest) -> AppResult<Self> {
        Self::parse(req.products, req.storage_id, req.shipping_id)
    }

    fn parse(
        products: Vec<String>,
        storage_id: Option<String>,
        shipping_id: Option<String>,
    ) -> AppResult<Self> {
        Ok(Self {
            product_ids: parse_ids(&products)?,
            storage_id: parse_optional_id(storage_id.as_deref())?,
            shipping_id: parse_optional_id(shipping_id.as_deref())?.unwrap_or(Uuid::nil()),
        })
    }
}

fn validate_reserve(params: &ReserveParams) -> AppResult<()> {
    if params.product_ids.is_empty() {
        return Err(AppError::FieldRequired("products"));
    }
    if params.shipping_id.is_nil() {
        return Err(AppError::FieldRequired("shipping_id"));
    }
    if params.amount <= 0 {
        return Err(AppError::FieldRequired("amount"));
    }

    Ok(())
}

fn validate_free(params: &FreeParams) -> AppResult<()> {
    if params.product_ids.is_empty() {
        return Err(AppError::FieldRequired("products"));
    }
    if params.shipping_id.is_nil() {
        return Err(AppError::FieldRequired("shipping_id"));
    }

    Ok(())
}

/// The reservation engine: Reserve, Cancel and Release, each inside one
/// transaction scope.
pub struct ReservationService {
    uow_factory: Arc<dyn UnitOfWorkFactory>,
    allocator: Allocator,
    distribution_repo: Arc<dyn DistributionRepository>,
    reservation_repo: Arc<dyn ReservationRepository>,
}

impl ReservationService {
    pub fn new(
        uow_factory: Arc<dyn UnitOfWorkFactory>,
        allocator: Allocator,
        distribution_repo: Arc<dyn DistributionRepository>,
        reservation_repo: Arc<dyn ReservationRepository>,
    ) -> Self {
        Self {
            uow_factory,
            allocator,
            distribution_repo,
            reservation_repo,
        }
    }

    #[instrument(skip(self))]
    pub async fn reserve(&self, params: ReserveParams) -> AppResult<()> {
        validate_reserve(&params)?;

        let mut uow = self.uow_factory.create_uow().await?;
        let result = self.reserve_in(&mut uow, &params).await;
        uow.finish(result).await?;

        metrics::counter!("cernunnos_reservations_created_total")
            .increment(params.product_ids.len() as u64);
        info!(
            shipping_id = %params.shipping_id,
            products = params.product_ids.len(),
            amount = params.amount,
            "products reserved for shipping"
        );

        Ok(())
    }

    async fn reserve_in(&self, uow: &mut UnitOfWork<'_>, params: &ReserveParams) -> AppResult<()> {
        let now = Utc::now();

        for product_id in &params.product_ids {
            let slices = self
                .allocator
                .allocate(uow, *product_id, params.storage_id, params.amount)
                .await
                .map_err(|e| e.with_context(format!("allocate product {product_id}")))?;

            for slice in slices {
                self.distribution_repo
                    .add_reserved(uow, slice.storage_id, *product_id, slice.amount)
                    .await?;

                self.reservation_repo
                    .insert(
                        uow,
                        slice.storage_id,
                        *product_id,
                        params.shipping_id,
                        slice.amount,
                        now,
                    )
                    .await?;
            }
        }

        Ok(())
    }

    /// Returns reserved stock to `available` and drops the reservation rows.
    #[instrument(skip(self))]
    pub async fn cancel(&self, params: FreeParams) -> AppResult<()> {
        self.free(params, false).await?;
        metrics::counter!("cernunnos_reservations_cancelled_total").increment(1);
        Ok(())
    }

    /// Ships reserved stock out: `amount` shrinks, `available` is untouched.
    #[instrument(skip(self))]
    pub async fn release(&self, params: FreeParams) -> AppResult<()> {
        self.free(params, true).await?;
        metrics::counter!("cernunnos_reservations_released_total").increment(1);
        Ok(())
    }

    async fn free(&self, params: FreeParams, write_off: bool) -> AppResult<()> {
        validate_free(&params)?;

        let mut uow = self.uow_factory.create_uow().await?;
        let result = self.free_in(&mut uow, &params, write_off).await;
        uow.finish(result).await
    }

    async fn free_in(
        &self,
        uow: &mut UnitOfWork<'_>,
        params: &FreeParams,
        write_off: bool,
    ) -> AppResult<()> {
        for product_id in &params.product_ids {
            let held = self
                .reservation_repo
                .list_reserved_by_storage(uow, *product_id, params.shipping_id, params.storage_id)
                .await?;

            // An empty list means a concurrent call already completed this
            // key; that is a benign no-op for the product.
            for entry in held {
                self.distribution_repo
                    .lock_row(uow, entry.storage_id, *product_id)
                    .await?;

                self.distribution_repo
                    .free_reserved(uow, entry.storage_id, *product_id, entry.reserved, write_off)
                    .await?;

                self.reservation_repo
                    .delete_by_key(uow, entry.storage_id, *product_id, params.shipping_id)
                    .await?;
            }
        }

        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn reservations(&self, req: ReservationsRequest) -> AppResult<ReservationsResponse> {
        let filter = ReservationFilter {
            storage_id: parse_optional_id(req.storage_id.as_deref())?,
            product_id: parse_optional_id(req.product_id.as_deref())?,
            shipping_id: parse_optional_id(req.shipping_id.as_deref())?,
        };
        let (limit, offset) = Pagination {
            limit: req.limit,
            offset: req.offset,
        }
        .normalize();

        let rows = self.reservation_repo.query(&filter, limit, offset).await?;
        let reservations: Vec<ReservationDto> = rows.into_iter().map(Into::into).collect();

        Ok(ReservationsResponse {
            offset: reservations.len() as u32,
            reservations,
        })
    }
}

pub struct StorageService {
    storage_repo: Arc<dyn StorageRepository>,
}

impl StorageService {
    pub fn new(storage_repo: Arc<dyn StorageRepository>) -> Self {
        Self { storage_repo }
    }

    #[instrument(skip(self))]
    pub async fn storages(&self, req: StoragesRequest) -> AppResult<StoragesResponse> {
        let ids = parse_ids(&req.ids)?;
        let filter = StorageFilter {
            ids: (!ids.is_empty()).then_some(ids),
            with_busy: req.with_busy,
            with_unavailable: req.with_unavailable,
        };
        let (limit, offset) = Pagination {
            limit: req.limit,
            offset: req.offset,
        }
        .normalize();

        let storages = self.storage_repo.storages(&filter, limit, offset).await?;
        let storages: Vec<StorageDto> = storages.into_iter().map(Into::into).collect();

        Ok(StoragesResponse {
            offset: storages.len() as u32,
            storages,
        })
    }
}

pub struct ProductService {
    product_repo: Arc<dyn ProductRepository>,
}

impl ProductService {
    pub fn new(product_repo: Arc<dyn ProductRepository>) -> Self {
        Self { product_repo }
    }

    /// Catalog listing; with a storage filter each product carries its
    /// distribution block for that storage.
    #[instrument(skip(self))]
    pub async fn products(&self, req: ProductsRequest) -> AppResult<ProductsResponse> {
        let ids = parse_ids(&req.ids)?;
        let ids = (!ids.is_empty()).then_some(ids);
        let (limit, offset) = Pagination {
            limit: req.limit,
            offset: req.offset,
        }
        .normalize();

        if let Some(storage_id) = parse_optional_id(req.storage_id.as_deref())? {
            let filter = StorageProductFilter {
                ids,
                storage_id: Some(storage_id),
                with_unavailable: req.with_unavailable,
            };
            let rows = self
                .product_repo
                .storage_products(&filter, limit, offset)
                .await?;
            let products: Vec<ProductDto> = rows.into_iter().map(Into::into).collect();

            return Ok(ProductsResponse {
                offset: products.len() as u32,
                products,
            });
        }

        let filter = ProductFilter { ids };
        let rows = self.product_repo.products(&filter, limit, offset).await?;
        let products: Vec<ProductDto> = rows.into_iter().map(Into::into).collect();

        Ok(ProductsResponse {
            offset: products.len() as u32,
            products,
        })
    }

    #[instrument(skip(self))]
    pub async fn storage_products(
        &self,
        storage_id: Uuid,
        req: StorageProductsRequest,
    ) -> AppResult<ProductsResponse> {
        let ids = parse_ids(&req.ids)?;
        let filter = StorageProductFilter {
            ids: (!ids.is_empty()).then_some(ids),
            storage_id: Some(storage_id),
            with_unavailable: req.with_unavailable,
        };
        let (limit, offset) = Pagination {
            limit: req.limit,
            offset: req.offset,
        }
        .normalize();

        let rows = self
            .product_repo
            .storage_products(&filter, limit, offset)
            .await?;
        let products: Vec<ProductDto> = rows.into_iter().map(Into::into).collect();

        Ok(ProductsResponse {
            offset: products.len() as u32,
            products,
        })
    }
}

#[async_trait::async_trait]
pub trait HealthCheckService: Send + Sync {
    async fn check_db(&self) -> HealthStatus;
    async fn check_full(&self) -> SystemHealth;
}

pub struct HealthCheckServiceImpl {
    pool: PgPool,
    config: DatabaseConfig,
}

impl HealthCheckServiceImpl {
    pub fn new(pool: PgPool, config: DatabaseConfig) -> Self {
        Self { pool, config }
    }

    async fn try_acquire_conn(
        &self,
    ) -> Result<sqlx::pool::PoolConnection<sqlx::Postgres>, HealthStatus> {
        match timeout(
            self.config.health_check_acquire_timeout(),
            self.pool.acquire(),
        )
        .await
        {
            Ok(Ok(conn)) => Ok(conn),
            Ok(Err(e)) => Err(HealthStatus::Unhealthy(format!(
                "Failed to acquire connection: {}",
                e
            ))),
            Err(_) => Err(HealthStatus::Degraded(
                "Connection pool exhausted, acquire timeout".to_string(),
            )),
        }
    }

    async fn execute_health_query(
        &self,
        mut conn: sqlx::pool::PoolConnection<sqlx::Postgres>,
    ) -> HealthStatus {
        match timeout(
            self.config.health_check_timeout(),
            sqlx::query("SELECT 1").fetch_one(&mut *conn),
        )
        .await
        {
            Ok(Ok(_)) => HealthStatus::Healthy,
            Ok(Err(e)) => HealthStatus::Unhealthy(format!("Query failed: {}", e)),
            Err(_) => HealthStatus::Degraded("Query timeout - database under load".to_string()),
        }
    }
}

#[async_trait::async_trait]
impl HealthCheckService for HealthCheckServiceImpl {
    #[instrument(skip(self))]
    async fn check_db(&self) -> HealthStatus {
        let start = std::time::Instant::now();

        let conn = match self.try_acquire_conn().await {
            Ok(conn) => conn,
            Err(status) => {
                tracing::warn!(
                    health_status = ?status,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Health check failed at connection acquisition"
                );
                return status;
            }
        };

        let status = self.execute_health_query(conn).await;

        match &status {
            HealthStatus::Healthy => {
                tracing::debug!(
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Database health check passed"
                );
            }
            _ => {
                tracing::warn!(
                    health_status = ?status,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Database health check degraded"
                );
            }
        }

        status
    }

    async fn check_full(&self) -> SystemHealth {
        let start = std::time::Instant::now();

        let db_status = self.check_db().await;

        let overall = match &db_status {
            HealthStatus::Healthy => HealthStatus::Healthy,
            HealthStatus::Degraded(_) => {
                HealthStatus::Degraded("Database experiencing issues".to_string())
            }
            HealthStatus::Unhealthy(_) => {
                HealthStatus::Unhealthy("Database unavailable".to_string())
            }
        };

        SystemHealth {
            database: db_status,
            overall,
            response_time_ms: start.elapsed().as_millis() as u64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reserve_params(products: usize, shipping: Uuid, amount: i64) -> ReserveParams {
        ReserveParams {
            product_ids: (0..products).map(|_| Uuid::new_v4()).collect(),
            storage_id: None,
            shipping_id: shipping,
            amount,
        }
    }

    #[test]
    fn reserve_requires_products() {
        let err = validate_reserve(&reserve_params(0, Uuid::new_v4(), 10)).unwrap_err();
        assert!(matches!(err, AppError::FieldRequired("products")));
    }

    #[test]
    fn reserve_requires_shipping_id() {
        let err = validate_reserve(&reserve_params(1, Uuid::nil(), 10)).unwrap_err();
        assert!(matches!(err, AppError::FieldRequired("shipping_id")));
    }

    #[test]
    fn reserve_requires_positive_amount() {
        let err = validate_reserve(&reserve_params(1, Uuid::new_v4(), 0)).unwrap_err();
        assert!(matches!(err, AppError::FieldRequired("amount")));

        let err = validate_reserve(&reserve_params(1, Uuid::new_v4(), -1)).unwrap_err();
        assert!(matches!(err, AppError::FieldRequired("amount")));
    }

    #[test]
    fn reserve_accepts_valid_params() {
        assert!(validate_reserve(&reserve_params(2, Uuid::new_v4(), 10)).is_ok());
    }

    #[test]
    fn free_requires_products_and_shipping() {
        let err = validate_free(&FreeParams {
            product_ids: vec![],
            storage_id: None,
            shipping_id: Uuid::new_v4(),
        })
        .unwrap_err();
        assert!(matches!(err, AppError::FieldRequired("products")));

        let err = validate_free(&FreeParams {
            product_ids: vec![Uuid::new_v4()],
            storage_id: None,
            shipping_id: Uuid::nil(),
        })
        .unwrap_err();
        assert!(matches!(err, AppError::FieldRequired("shipping_id")));
    }

    #[test]
    fn reserve_params_parse_empty_shipping_as_nil() {
        let params = ReserveParams::from_request(ReserveRequest {
            products: vec![Uuid::new_v4().to_string()],
            storage_id: None,
            shipping_id: Some(String::new()),
            amount: 5,
        })
        .unwrap();

        assert!(params.shipping_id.is_nil());
        assert!(validate_reserve(&params).is_err());
    }

    #[test]
    fn reserve_params_reject_malformed_product_id() {
        let err = ReserveParams::from_request(ReserveRequest {
            products: vec!["garbage".to_string()],
            storage_id: None,
            shipping_id: Some(Uuid::new_v4().to_string()),
            amount: 5,
        })
        .unwrap_err();

        assert!(matches!(err, AppError::UnexpectedData(_)));
    }
}
