mod common;

use uuid::Uuid;

use cernunnos::error::AppError;
use cernunnos::models::ReservationsRequest;
use cernunnos::services::{FreeParams, ReserveParams};

fn reserve(
    product: Uuid,
    storage: Option<Uuid>,
    shipping: Uuid,
    amount: i64,
) -> ReserveParams {
    ReserveParams {
        product_ids: vec![product],
        storage_id: storage,
        shipping_id: shipping,
        amount,
    }
}

fn free(product: Uuid, storage: Option<Uuid>, shipping: Uuid) -> FreeParams {
    FreeParams {
        product_ids: vec![product],
        storage_id: storage,
        shipping_id: shipping,
    }
}

#[tokio::test]
#[ignore = "Requires TEST_DATABASE_URL and Postgres running"]
async fn single_storage_reserve_updates_counters() {
    let pool = common::setup_test_db().await;
    let engine = common::reservation_service(&pool);

    let (s1, p1, sh1) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
    common::insert_storage(&pool, s1, "single-storage").await;
    common::insert_product(&pool, p1, "widget", 5).await;
    common::insert_distribution(&pool, s1, p1, 100, 0, 100).await;

    engine
        .reserve(reserve(p1, Some(s1), sh1, 40))
        .await
        .expect("reserve failed");

    assert_eq!(common::distribution(&pool, s1, p1).await, (100, 40, 60));
    assert_eq!(common::reservation_count(&pool, s1, p1, sh1).await, 1);
    common::assert_distribution_invariants(&pool, s1, p1).await;
}

#[tokio::test]
#[ignore = "Requires TEST_DATABASE_URL and Postgres running"]
async fn reserve_without_storage_picks_largest_available_first() {
    let pool = common::setup_test_db().await;
    let engine = common::reservation_service(&pool);

    let (s1, s2, p1, sh1) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
    common::insert_storage(&pool, s1, "small").await;
    common::insert_storage(&pool, s2, "large").await;
    common::insert_product(&pool, p1, "widget", 5).await;
    common::insert_distribution(&pool, s1, p1, 30, 0, 30).await;
    common::insert_distribution(&pool, s2, p1, 100, 0, 100).await;

    engine
        .reserve(reserve(p1, None, sh1, 90))
        .await
        .expect("reserve failed");

    // s2 has the larger capacity and absorbs the whole request.
    assert_eq!(common::distribution(&pool, s2, p1).await, (100, 90, 10));
    assert_eq!(common::distribution(&pool, s1, p1).await, (30, 0, 30));
    assert_eq!(common::reservation_count(&pool, s2, p1, sh1).await, 1);
    assert_eq!(common::reservation_count(&pool, s1, p1, sh1).await, 0);
}

#[tokio::test]
#[ignore = "Requires TEST_DATABASE_URL and Postgres running"]
async fn reserve_spills_into_second_storage() {
    let pool = common::setup_test_db().await;
    let engine = common::reservation_service(&pool);

    let (s1, s2, p1, sh1) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
    common::insert_storage(&pool, s1, "small").await;
    common::insert_storage(&pool, s2, "large").await;
    common::insert_product(&pool, p1, "widget", 5).await;
    common::insert_distribution(&pool, s1, p1, 30, 0, 30).await;
    common::insert_distribution(&pool, s2, p1, 100, 0, 100).await;

    engine
        .reserve(reserve(p1, None, sh1, 120))
        .await
        .expect("reserve failed");

    assert_eq!(common::distribution(&pool, s2, p1).await, (100, 100, 0));
    assert_eq!(common::distribution(&pool, s1, p1).await, (30, 20, 10));
    assert_eq!(common::reservation_count(&pool, s2, p1, sh1).await, 1);
    assert_eq!(common::reservation_count(&pool, s1, p1, sh1).await, 1);
    common::assert_distribution_invariants(&pool, s1, p1).await;
    common::assert_distribution_invariants(&pool, s2, p1).await;
}

#[tokio::test]
#[ignore = "Requires TEST_DATABASE_URL and Postgres running"]
async fn insufficient_stock_changes_nothing() {
    let pool = common::setup_test_db().await;
    let engine = common::reservation_service(&pool);

    let (s1, s2, p1, sh1) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
    common::insert_storage(&pool, s1, "a").await;
    common::insert_storage(&pool, s2, "b").await;
    common::insert_product(&pool, p1, "widget", 5).await;
    common::insert_distribution(&pool, s1, p1, 30, 0, 30).await;
    common::insert_distribution(&pool, s2, p1, 20, 0, 20).await;

    let err = engine
        .reserve(reserve(p1, None, sh1, 51))
        .await
        .expect_err("reserve should fail");
    assert_eq!(err.status_code().as_u16(), 507);

    assert_eq!(common::distribution(&pool, s1, p1).await, (30, 0, 30));
    assert_eq!(common::distribution(&pool, s2, p1).await, (20, 0, 20));
    assert_eq!(common::reservation_count(&pool, s1, p1, sh1).await, 0);
    assert_eq!(common::reservation_count(&pool, s2, p1, sh1).await, 0);
}

#[tokio::test]
#[ignore = "Requires TEST_DATABASE_URL and Postgres running"]
async fn explicit_storage_does_not_fall_back() {
    let pool = common::setup_test_db().await;
    let engine = common::reservation_service(&pool);

    let (s1, s2, p1, sh1) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
    common::insert_storage(&pool, s1, "target").await;
    common::insert_storage(&pool, s2, "plenty").await;
    common::insert_product(&pool, p1, "widget", 5).await;
    common::insert_distribution(&pool, s1, p1, 10, 0, 10).await;
    common::insert_distribution(&pool, s2, p1, 1000, 0, 1000).await;

    let err = engine
        .reserve(reserve(p1, Some(s1), sh1, 11))
        .await
        .expect_err("reserve should fail");
    assert!(matches!(
        err,
        AppError::WithContext { .. } | AppError::NotEnoughSpace { .. }
    ));
    assert_eq!(err.status_code().as_u16(), 507);

    assert_eq!(common::distribution(&pool, s2, p1).await, (1000, 0, 1000));
}

#[tokio::test]
#[ignore = "Requires TEST_DATABASE_URL and Postgres running"]
async fn cancel_returns_stock_and_deletes_reservation() {
    let pool = common::setup_test_db().await;
    let engine = common::reservation_service(&pool);

    let (s1, p1, sh1) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
    common::insert_storage(&pool, s1, "cancel-me").await;
    common::insert_product(&pool, p1, "widget", 5).await;
    common::insert_distribution(&pool, s1, p1, 100, 0, 100).await;

    engine
        .reserve(reserve(p1, Some(s1), sh1, 40))
        .await
        .expect("reserve failed");
    engine
        .cancel(free(p1, Some(s1), sh1))
        .await
        .expect("cancel failed");

    assert_eq!(common::distribution(&pool, s1, p1).await, (100, 0, 100));
    assert_eq!(common::reservation_count(&pool, s1, p1, sh1).await, 0);
    common::assert_distribution_invariants(&pool, s1, p1).await;
}

#[tokio::test]
#[ignore = "Requires TEST_DATABASE_URL and Postgres running"]
async fn release_writes_stock_off() {
    let pool = common::setup_test_db().await;
    let engine = common::reservation_service(&pool);

    let (s1, p1, sh1) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
    common::insert_storage(&pool, s1, "ship-from").await;
    common::insert_product(&pool, p1, "widget", 5).await;
    common::insert_distribution(&pool, s1, p1, 100, 0, 100).await;

    engine
        .reserve(reserve(p1, Some(s1), sh1, 40))
        .await
        .expect("reserve failed");
    engine
        .release(free(p1, Some(s1), sh1))
        .await
        .expect("release failed");

    // The reserved quantity leaves the building: amount shrinks, available
    // returns to its pre-reserve value.
    assert_eq!(common::distribution(&pool, s1, p1).await, (60, 0, 60));
    assert_eq!(common::reservation_count(&pool, s1, p1, sh1).await, 0);
    common::assert_distribution_invariants(&pool, s1, p1).await;
}

#[tokio::test]
#[ignore = "Requires TEST_DATABASE_URL and Postgres running"]
async fn cancel_of_unknown_key_is_a_noop() {
    let pool = common::setup_test_db().await;
    let engine = common::reservation_service(&pool);

    let (s1, p1) = (Uuid::new_v4(), Uuid::new_v4());
    common::insert_storage(&pool, s1, "untouched").await;
    common::insert_product(&pool, p1, "widget", 5).await;
    common::insert_distribution(&pool, s1, p1, 50, 0, 50).await;

    engine
        .cancel(free(p1, Some(s1), Uuid::new_v4()))
        .await
        .expect("cancel of unknown key should succeed");

    assert_eq!(common::distribution(&pool, s1, p1).await, (50, 0, 50));
}

#[tokio::test]
#[ignore = "Requires TEST_DATABASE_URL and Postgres running"]
async fn repeated_reserves_accumulate_and_cancel_together() {
    let pool = common::setup_test_db().await;
    let engine = common::reservation_service(&pool);

    let (s1, p1, sh1) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
    common::insert_storage(&pool, s1, "accumulate").await;
    common::insert_product(&pool, p1, "widget", 5).await;
    common::insert_distribution(&pool, s1, p1, 100, 0, 100).await;

    engine
        .reserve(reserve(p1, Some(s1), sh1, 10))
        .await
        .expect("first reserve failed");
    engine
        .reserve(reserve(p1, Some(s1), sh1, 15))
        .await
        .expect("second reserve failed");

    // Repeated reserves stay independent rows.
    assert_eq!(common::reservation_count(&pool, s1, p1, sh1).await, 2);
    assert_eq!(common::distribution(&pool, s1, p1).await, (100, 25, 75));
    common::assert_distribution_invariants(&pool, s1, p1).await;

    engine
        .cancel(free(p1, Some(s1), sh1))
        .await
        .expect("cancel failed");

    assert_eq!(common::reservation_count(&pool, s1, p1, sh1).await, 0);
    assert_eq!(common::distribution(&pool, s1, p1).await, (100, 0, 100));
}

#[tokio::test]
#[ignore = "Requires TEST_DATABASE_URL and Postgres running"]
async fn reserve_per_product_amount_applies_independently() {
    let pool = common::setup_test_db().await;
    let engine = common::reservation_service(&pool);

    let (s1, pa, pb, sh1) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
    common::insert_storage(&pool, s1, "multi-product").await;
    common::insert_product(&pool, pa, "alpha", 1).await;
    common::insert_product(&pool, pb, "beta", 2).await;
    common::insert_distribution(&pool, s1, pa, 50, 0, 50).await;
    common::insert_distribution(&pool, s1, pb, 50, 0, 50).await;

    engine
        .reserve(ReserveParams {
            product_ids: vec![pa, pb],
            storage_id: Some(s1),
            shipping_id: sh1,
            amount: 20,
        })
        .await
        .expect("reserve failed");

    // Each product gets its own independent amount.
    assert_eq!(common::distribution(&pool, s1, pa).await, (50, 20, 30));
    assert_eq!(common::distribution(&pool, s1, pb).await, (50, 20, 30));
}

#[tokio::test]
#[ignore = "Requires TEST_DATABASE_URL and Postgres running"]
async fn multi_product_shortfall_rolls_back_everything() {
    let pool = common::setup_test_db().await;
    let engine = common::reservation_service(&pool);

    let (s1, pa, pb, sh1) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
    common::insert_storage(&pool, s1, "atomic").await;
    common::insert_product(&pool, pa, "alpha", 1).await;
    common::insert_product(&pool, pb, "beta", 2).await;
    common::insert_distribution(&pool, s1, pa, 50, 0, 50).await;
    common::insert_distribution(&pool, s1, pb, 10, 0, 10).await;

    // pa can satisfy 20 but pb cannot; the whole scope must roll back.
    let err = engine
        .reserve(ReserveParams {
            product_ids: vec![pa, pb],
            storage_id: Some(s1),
            shipping_id: sh1,
            amount: 20,
        })
        .await
        .expect_err("reserve should fail");
    assert_eq!(err.status_code().as_u16(), 507);

    assert_eq!(common::distribution(&pool, s1, pa).await, (50, 0, 50));
    assert_eq!(common::distribution(&pool, s1, pb).await, (10, 0, 10));
    assert_eq!(common::reservation_count(&pool, s1, pa, sh1).await, 0);
}

#[tokio::test]
#[ignore = "Requires TEST_DATABASE_URL and Postgres running"]
async fn reservations_query_returns_created_rows() {
    let pool = common::setup_test_db().await;
    let engine = common::reservation_service(&pool);

    let (s1, p1, sh1) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
    common::insert_storage(&pool, s1, "queryable").await;
    common::insert_product(&pool, p1, "widget", 5).await;
    common::insert_distribution(&pool, s1, p1, 100, 0, 100).await;

    engine
        .reserve(reserve(p1, Some(s1), sh1, 40))
        .await
        .expect("reserve failed");

    let response = engine
        .reservations(ReservationsRequest {
            storage_id: Some(s1.to_string()),
            product_id: Some(p1.to_string()),
            shipping_id: Some(sh1.to_string()),
            limit: 0,
            offset: 0,
        })
        .await
        .expect("query failed");

    assert_eq!(response.reservations.len(), 1);
    assert_eq!(response.offset, 1);
    assert_eq!(response.reservations[0].reserved, 40);
    assert_eq!(response.reservations[0].shipping_id, sh1.to_string());
}

#[tokio::test]
#[ignore = "Requires TEST_DATABASE_URL and Postgres running"]
async fn concurrent_reserves_never_oversell() {
    let pool = common::setup_test_db().await;

    let (s1, p1) = (Uuid::new_v4(), Uuid::new_v4());
    common::insert_storage(&pool, s1, "contended").await;
    common::insert_product(&pool, p1, "widget", 5).await;
    common::insert_distribution(&pool, s1, p1, 100, 0, 100).await;

    let mut handles = Vec::new();
    for _ in 0..8 {
        let pool = pool.clone();
        handles.push(tokio::spawn(async move {
            let engine = common::reservation_service(&pool);
            engine
                .reserve(reserve(p1, Some(s1), Uuid::new_v4(), 20))
                .await
        }));
    }

    let mut succeeded = 0;
    for handle in handles {
        if handle.await.expect("task panicked").is_ok() {
            succeeded += 1;
        }
    }

    // 100 available, 20 apiece: at most five reserves can win.
    assert!(succeeded <= 5, "oversold: {succeeded} reserves succeeded");
    let (amount, reserved, available) = common::distribution(&pool, s1, p1).await;
    assert_eq!(amount, 100);
    assert_eq!(reserved, succeeded * 20);
    assert_eq!(available, 100 - succeeded * 20);
    common::assert_distribution_invariants(&pool, s1, p1).await;
}
