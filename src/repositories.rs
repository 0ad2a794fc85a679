use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{
    DistributionRow, Product, ProductFilter, ReservationDetailRow, ReservationFilter,
    ReservedByStorage, Storage, StorageFilter, StorageProductFilter, StorageProductRow,
};
use crate::uow::UnitOfWork;

/// Row-locked access to the `(storage, product)` counters. Every method runs
/// inside the caller's transaction scope.
#[async_trait]
pub trait DistributionRepository: Send + Sync {
    /// Candidate rows for an allocation: `available > 0`, largest capacity
    /// first, locked until the enclosing transaction terminates.
    async fn select_for_update(
        &self,
        uow: &mut UnitOfWork<'_>,
        product_id: Uuid,
        storage_id: Option<Uuid>,
    ) -> AppResult<Vec<DistributionRow>>;

    /// Lock a single row ahead of a counter mutation.
    async fn lock_row(
        &self,
        uow: &mut UnitOfWork<'_>,
        storage_id: Uuid,
        product_id: Uuid,
    ) -> AppResult<()>;

    /// `reserved += delta`, `available -= delta`. The caller guarantees
    /// `delta <= available`.
    async fn add_reserved(
        &self,
        uow: &mut UnitOfWork<'_>,
        storage_id: Uuid,
        product_id: Uuid,
        delta: i64,
    ) -> AppResult<()>;

    /// `reserved -= delta`, then either restock (`available += delta`) or
    /// write off (`amount -= delta`).
    async fn free_reserved(
        &self,
        uow: &mut UnitOfWork<'_>,
        storage_id: Uuid,
        product_id: Uuid,
        delta: i64,
        write_off: bool,
    ) -> AppResult<()>;
}

#[derive(Debug, Default)]
pub struct PgDistributionRepository;

impl PgDistributionRepository {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl DistributionRepository for PgDistributionRepository {
    async fn select_for_update(
        &self,
        uow: &mut UnitOfWork<'_>,
        product_id: Uuid,
        storage_id: Option<Uuid>,
    ) -> AppResult<Vec<DistributionRow>> {
        sqlx::query_as::<_, DistributionRow>(
            r#"
            SELECT storage_id, product_id, amount, reserved, available
            FROM products_distribution
            WHERE product_id = $1
              AND available > 0
              AND ($2::uuid IS NULL OR storage_id = $2)
            ORDER BY available DESC, storage_id ASC
            FOR UPDATE
            "#,
        )
        .bind(product_id)
        .bind(storage_id)
        .fetch_all(uow.connection())
        .await
        .map_err(|e| AppError::from(e).with_context("select distribution rows for update"))
    }

    async fn lock_row(
        &self,
        uow: &mut UnitOfWork<'_>,
        storage_id: Uuid,
        product_id: Uuid,
    ) -> AppResult<()> {
        sqlx::query(
            r#"
            SELECT storage_id
            FROM products_distribution
            WHERE storage_id = $1 AND product_id = $2
            FOR UPDATE
            "#,
        )
        .bind(storage_id)
        .bind(product_id)
        .execute(uow.connection())
        .await
        .map_err(|e| AppError::from(e).with_context("lock distribution row"))?;

        Ok(())
    }

    async fn add_reserved(
        &self,
        uow: &mut UnitOfWork<'_>,
        storage_id: Uuid,
        product_id: Uuid,
        delta: i64,
    ) -> AppResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE products_distribution
            SET reserved = reserved + $3, available = available - $3
            WHERE storage_id = $1 AND product_id = $2
            "#,
        )
        .bind(storage_id)
        .bind(product_id)
        .bind(delta)
        .execute(uow.connection())
        .await
        .map_err(|e| AppError::from(e).with_context("add reserved to distribution row"))?;

        if result.rows_affected() == 0 {
            return Err(AppError::DistributionMissing {
                storage_id,
                product_id,
            });
        }

        Ok(())
    }

    async fn free_reserved(
        &self,
        uow: &mut UnitOfWork<'_>,
        storage_id: Uuid,
        product_id: Uuid,
        delta: i64,
        write_off: bool,
    ) -> AppResult<()> {
        let query = if write_off {
            r#"
            UPDATE products_distribution
            SET reserved = reserved - $3, amount = amount - $3
            WHERE storage_id = $1 AND product_id = $2
            "#
        } else {
            r#"
            UPDATE products_distribution
            SET reserved = reserved - $3, available = available + $3
            WHERE storage_id = $1 AND product_id = $2
            "#
        };

        let result = sqlx::query(query)
            .bind(storage_id)
            .bind(product_id)
            .bind(delta)
            .execute(uow.connection())
            .await
            .map_err(|e| AppError::from(e).with_context("free reserved on distribution row"))?;

        if result.rows_affected() == 0 {
            return Err(AppError::DistributionMissing {
                storage_id,
                product_id,
            });
        }

        Ok(())
    }
}

/// CRUD over reservation rows plus the joined read path.
#[async_trait]
pub trait ReservationRepository: Send + Sync {
    async fn insert(
        &self,
        uow: &mut UnitOfWork<'_>,
        storage_id: Uuid,
        product_id: Uuid,
        shipping_id: Uuid,
        reserved: i64,
        now: DateTime<Utc>,
    ) -> AppResult<()>;

    /// Removes every reservation matching the key; zero matches is fine.
    async fn delete_by_key(
        &self,
        uow: &mut UnitOfWork<'_>,
        storage_id: Uuid,
        product_id: Uuid,
        shipping_id: Uuid,
    ) -> AppResult<()>;

    /// Live reservations for `(product, shipping)` summed per storage,
    /// ordered by storage id. The underlying rows are locked so concurrent
    /// Cancel/Release calls for the same key serialize.
    async fn list_reserved_by_storage(
        &self,
        uow: &mut UnitOfWork<'_>,
        product_id: Uuid,
        shipping_id: Uuid,
        storage_id: Option<Uuid>,
    ) -> AppResult<Vec<ReservedByStorage>>;

    /// Read path only: reservations joined to storages, products and their
    /// distribution row.
    async fn query(
        &self,
        filter: &ReservationFilter,
        limit: i64,
        offset: i64,
    ) -> AppResult<Vec<ReservationDetailRow>>;
}

pub struct PgReservationRepository {
    pool: PgPool,
}

impl PgReservationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ReservationRepository for PgReservationRepository {
    async fn insert(
        &self,
        uow: &mut UnitOfWork<'_>,
        storage_id: Uuid,
        product_id: Uuid,
        shipping_id: Uuid,
        reserved: i64,
        now: DateTime<Utc>,
    ) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO products_reservations
                (id, storage_id, product_id, shipping_id, reserved, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $6)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(storage_id)
        .bind(product_id)
        .bind(shipping_id)
        .bind(reserved)
        .bind(now)
        .execute(uow.connection())
        .await
        .map_err(|e| AppError::from(e).with_context("insert reservation row"))?;

        Ok(())
    }

    async fn delete_by_key(
        &self,
        uow: &mut UnitOfWork<'_>,
        storage_id: Uuid,
        product_id: Uuid,
        shipping_id: Uuid,
    ) -> AppResult<()> {
        sqlx::query(
            r#"
            DELETE FROM products_reservations
            WHERE storage_id = $1 AND product_id = $2 AND shipping_id = $3
            "#,
        )
        .bind(storage_id)
        .bind(product_id)
        .bind(shipping_id)
        .execute(uow.connection())
        .await
        .map_err(|e| AppError::from(e).with_context("delete reservation rows"))?;

        Ok(())
    }

    async fn list_reserved_by_storage(
        &self,
        uow: &mut UnitOfWork<'_>,
        product_id: Uuid,
        shipping_id: Uuid,
        storage_id: Option<Uuid>,
    ) -> AppResult<Vec<ReservedByStorage>> {
        let rows: Vec<(Uuid, i64)> = sqlx::query_as(
            r#"
            SELECT storage_id, reserved
            FROM products_reservations
            WHERE product_id = $1
              AND shipping_id = $2
              AND ($3::uuid IS NULL OR storage_id = $3)
            ORDER BY storage_id
            FOR UPDATE
            "#,
        )
        .bind(product_id)
        .bind(shipping_id)
        .bind(storage_id)
        .fetch_all(uow.connection())
        .await
        .map_err(|e| AppError::from(e).with_context("list reserved amounts by storage"))?;

        // Repeated reserves leave several rows per key; fold them per storage.
        let mut summed: Vec<ReservedByStorage> = Vec::new();
        for (storage_id, reserved) in rows {
            match summed.last_mut() {
                Some(last) if last.storage_id == storage_id => last.reserved += reserved,
                _ => summed.push(ReservedByStorage {
                    storage_id,
                    reserved,
                }),
            }
        }

        Ok(summed)
    }

    async fn query(
        &self,
        filter: &ReservationFilter,
        limit: i64,
        offset: i64,
    ) -> AppResult<Vec<ReservationDetailRow>> {
        sqlx::query_as::<_, ReservationDetailRow>(
            r#"
            SELECT
                r.storage_id, r.product_id, r.shipping_id, r.reserved,
                r.created_at, r.updated_at,
                s.name AS storage_name, s.availability,
                p.name AS product_name, p.size,
                pd.amount AS distribution_amount, pd.reserved AS distribution_reserved
            FROM products_reservations AS r
            INNER JOIN products AS p ON p.id = r.product_id
            INNER JOIN storages AS s ON s.id = r.storage_id
            INNER JOIN products_distribution AS pd
                ON pd.storage_id = r.storage_id AND pd.product_id = r.product_id
            WHERE ($1::uuid IS NULL OR r.storage_id = $1)
              AND ($2::uuid IS NULL OR r.product_id = $2)
              AND ($3::uuid IS NULL OR r.shipping_id = $3)
            ORDER BY r.storage_id, r.product_id, r.shipping_id, r.created_at
            LIMIT $4 OFFSET $5
            "#,
        )
        .bind(filter.storage_id)
        .bind(filter.product_id)
        .bind(filter.shipping_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::from(e).with_context("query reservations"))
    }
}

#[async_trait]
pub trait StorageRepository: Send + Sync {
    async fn storages(
        &self,
        filter: &StorageFilter,
        limit: i64,
        offset: i64,
    ) -> AppResult<Vec<Storage>>;
}

pub struct PgStorageRepository {
    pool: PgPool,
}

impl PgStorageRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl StorageRepository for PgStorageRepository {
    async fn storages(
        &self,
        filter: &StorageFilter,
        limit: i64,
        offset: i64,
    ) -> AppResult<Vec<Storage>> {
        sqlx::query_as::<_, Storage>(
            r#"
            SELECT id, name, availability, created_at, updated_at
            FROM storages
            WHERE ($1::uuid[] IS NULL OR id = ANY($1))
              AND ($2 OR availability <> 'busy')
              AND ($3 OR availability <> 'unavailable')
            ORDER BY id
            LIMIT $4 OFFSET $5
            "#,
        )
        .bind(filter.ids.as_deref())
        .bind(filter.with_busy)
        .bind(filter.with_unavailable)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::from(e).with_context("fetch storages"))
    }
}

#[async_trait]
pub trait ProductRepository: Send + Sync {
    async fn products(
        &self,
        filter: &ProductFilter,
        limit: i64,
        offset: i64,
    ) -> AppResult<Vec<Product>>;

    async fn storage_products(
        &self,
        filter: &StorageProductFilter,
        limit: i64,
        offset: i64,
    ) -> AppResult<Vec<StorageProductRow>>;
}

pub struct PgProductRepository {
    pool: PgPool,
}

impl PgProductRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProductRepository for PgProductRepository {
    async fn products(
        &self,
        filter: &ProductFilter,
        limit: i64,
        offset: i64,
    ) -> AppResult<Vec<Product>> {
        sqlx::query_as::<_, Product>(
            r#"
            SELECT id, name, size, created_at, updated_at
            FROM products
            WHERE ($1::uuid[] IS NULL OR id = ANY($1))
            ORDER BY id
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(filter.ids.as_deref())
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::from(e).with_context("fetch products"))
    }

    async fn storage_products(
        &self,
        filter: &StorageProductFilter,
        limit: i64,
        offset: i64,
    ) -> AppResult<Vec<StorageProductRow>> {
        sqlx::query_as::<_, StorageProductRow>(
            r#"
            SELECT
                s.id AS storage_id, s.name AS storage_name, s.availability,
                s.created_at AS storage_created_at, s.updated_at AS storage_updated_at,
                p.id AS product_id, p.name AS product_name, p.size,
                p.created_at AS product_created_at, p.updated_at AS product_updated_at,
                pd.amount, pd.reserved, pd.available
            FROM products AS p
            INNER JOIN products_distribution AS pd ON pd.product_id = p.id
            INNER JOIN storages AS s ON s.id = pd.storage_id
            WHERE ($1::uuid IS NULL OR s.id = $1)
              AND ($2::uuid[] IS NULL OR p.id = ANY($2))
              AND ($3 OR pd.available > 0)
            ORDER BY p.id, s.id
            LIMIT $4 OFFSET $5
            "#,
        )
        .bind(filter.storage_id)
        .bind(filter.ids.as_deref())
        .bind(filter.with_unavailable)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::from(e).with_context("fetch storage products"))
    }
}
