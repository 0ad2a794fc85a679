//! Seeds the database with a realistic spread of products, storages and
//! distributions. Product and storage batches fill in parallel; the first
//! failure cancels the sibling batch.

use chrono::Utc;
use dotenvy::dotenv;
use rand::RngExt;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use uuid::Uuid;

use cernunnos::config::load_config;
use cernunnos::error::AppError;
use cernunnos::models::StorageAvailability;
use cernunnos::observability::init_tracing;

const PRODUCT_COUNT: usize = 250;
const STORAGE_COUNT: usize = 85;

const PRODUCT_ADJECTIVES: &[&str] = &[
    "rustic", "sleek", "durable", "compact", "heavy", "refined", "practical", "ergonomic",
    "intelligent", "lightweight", "gorgeous", "incredible",
];
const PRODUCT_NOUNS: &[&str] = &[
    "chair", "lamp", "keyboard", "shelf", "gloves", "bottle", "wallet", "clock", "computer",
    "table", "shirt", "shoes",
];
const STORAGE_NOUNS: &[&str] = &[
    "harbor", "meadow", "summit", "quarry", "grove", "junction", "terrace", "crossing", "hollow",
    "ridge",
];

#[tokio::main]
async fn main() -> Result<(), AppError> {
    dotenv().ok();

    let config = load_config()?;
    init_tracing(config.environment.as_str());

    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect_with(config.database.connect_options())
        .await
        .map_err(AppError::DatabaseError)?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(AppError::MigrationError)?;

    let (products, storages) = tokio::try_join!(fill_products(&pool), fill_storages(&pool))?;

    tracing::info!(
        products = products.len(),
        storages = storages.len(),
        "base entities seeded"
    );

    distribute_products(&pool, &products, &storages).await?;

    tracing::info!("database fill complete");
    Ok(())
}

async fn fill_products(pool: &PgPool) -> Result<Vec<Uuid>, AppError> {
    let mut ids = Vec::with_capacity(PRODUCT_COUNT);

    for n in 0..PRODUCT_COUNT {
        let id = Uuid::new_v4();
        let (name, size) = {
            let mut rng = rand::rng();
            let adjective = PRODUCT_ADJECTIVES[rng.random_range(0..PRODUCT_ADJECTIVES.len())];
            let noun = PRODUCT_NOUNS[rng.random_range(0..PRODUCT_NOUNS.len())];
            (format!("{adjective} {noun} #{n}"), rng.random_range(0..250_i64))
        };

        sqlx::query(
            r#"
            INSERT INTO products (id, name, size, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $4)
            "#,
        )
        .bind(id)
        .bind(name)
        .bind(size)
        .bind(Utc::now())
        .execute(pool)
        .await
        .map_err(|e| AppError::from(e).with_context("insert seeded product"))?;

        ids.push(id);
    }

    Ok(ids)
}

async fn fill_storages(pool: &PgPool) -> Result<Vec<Uuid>, AppError> {
    let mut ids = Vec::with_capacity(STORAGE_COUNT);

    for n in 0..STORAGE_COUNT {
        let id = Uuid::new_v4();
        let (name, availability) = {
            let mut rng = rand::rng();
            let noun = STORAGE_NOUNS[rng.random_range(0..STORAGE_NOUNS.len())];
            let availability = match rng.random_range(0..10) {
                0 => StorageAvailability::Busy,
                1 => StorageAvailability::Unavailable,
                _ => StorageAvailability::Available,
            };
            (format!("{noun}-{n}"), availability)
        };

        sqlx::query(
            r#"
            INSERT INTO storages (id, name, availability, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $4)
            "#,
        )
        .bind(id)
        .bind(name)
        .bind(availability)
        .bind(Utc::now())
        .execute(pool)
        .await
        .map_err(|e| AppError::from(e).with_context("insert seeded storage"))?;

        ids.push(id);
    }

    Ok(ids)
}

async fn distribute_products(
    pool: &PgPool,
    products: &[Uuid],
    storages: &[Uuid],
) -> Result<(), AppError> {
    let mut free_space: Vec<i64> = {
        let mut rng = rand::rng();
        (0..storages.len())
            .map(|_| rng.random_range(1_000..100_000_i64))
            .collect()
    };

    for product_id in products {
        for (slot, storage_id) in storages.iter().enumerate() {
            let (skip, amount, reserved) = {
                let mut rng = rand::rng();
                let skip = rng.random_bool(0.5);
                let ceiling = (free_space[slot] / 3).max(1);
                let amount = rng.random_range(0..ceiling);
                let reserved = if amount > 0 {
                    rng.random_range(0..=amount)
                } else {
                    0
                };
                (skip, amount, reserved)
            };

            if skip || amount == 0 {
                continue;
            }

            free_space[slot] -= amount;

            sqlx::query(
                r#"
                INSERT INTO products_distribution
                    (storage_id, product_id, amount, reserved, available)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(storage_id)
            .bind(product_id)
            .bind(amount)
            .bind(reserved)
            .bind(amount - reserved)
            .execute(pool)
            .await
            .map_err(|e| AppError::from(e).with_context("insert seeded distribution"))?;

            if reserved > 0 {
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
                .bind(Uuid::new_v4())
                .bind(reserved)
                .bind(Utc::now())
                .execute(pool)
                .await
                .map_err(|e| AppError::from(e).with_context("insert seeded reservation"))?;
            }
        }
    }

    Ok(())
}
