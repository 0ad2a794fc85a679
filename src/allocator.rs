use std::sync::Arc;

use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::DistributionRow;
use crate::repositories::DistributionRepository;
use crate::uow::UnitOfWork;

/// One slice of an allocation: how much of the requested amount a single
/// storage contributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageSlice {
    pub storage_id: Uuid,
    pub amount: i64,
}

/// Splits a requested amount across storages in descending-capacity order,
/// under row locks held by the enclosing transaction scope.
pub struct Allocator {
    distribution_repo: Arc<dyn DistributionRepository>,
}

impl Allocator {
    pub fn new(distribution_repo: Arc<dyn DistributionRepository>) -> Self {
        Self { distribution_repo }
    }

    /// Locks candidate rows and plans the split. When a storage id is given
    /// the candidate set is that single row; there is no fallback to other
    /// storages.
    pub async fn allocate(
        &self,
        uow: &mut UnitOfWork<'_>,
        product_id: Uuid,
        storage_id: Option<Uuid>,
        amount: i64,
    ) -> AppResult<Vec<StorageSlice>> {
        let rows = self
            .distribution_repo
            .select_for_update(uow, product_id, storage_id)
            .await?;

        plan(&rows, amount)
    }
}

/// Greedy walk over rows already ordered `available DESC, storage_id ASC`:
/// each row contributes `min(available, left)` and the walk stops as soon as
/// the remainder hits zero.
pub fn plan(rows: &[DistributionRow], amount: i64) -> AppResult<Vec<StorageSlice>> {
    let mut slices = Vec::new();
    let mut left = amount;

    for row in rows {
        if left == 0 {
            break;
        }

        let take = row.available.min(left);
        if take <= 0 {
            continue;
        }

        slices.push(StorageSlice {
            storage_id: row.storage_id,
            amount: take,
        });
        left -= take;
    }

    if left > 0 {
        return Err(AppError::NotEnoughSpace {
            requested: amount,
            available: amount - left,
        });
    }

    Ok(slices)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(storage_id: Uuid, available: i64) -> DistributionRow {
        DistributionRow {
            storage_id,
            product_id: Uuid::new_v4(),
            amount: available,
            reserved: 0,
            available,
        }
    }

    #[test]
    fn single_row_satisfies_request() {
        let s1 = Uuid::new_v4();
        let slices = plan(&[row(s1, 100)], 40).unwrap();

        assert_eq!(
            slices,
            vec![StorageSlice {
                storage_id: s1,
                amount: 40
            }]
        );
    }

    #[test]
    fn largest_row_is_drained_first() {
        let small = Uuid::new_v4();
        let large = Uuid::new_v4();
        // select_for_update orders by available DESC.
        let rows = [row(large, 100), row(small, 30)];

        let slices = plan(&rows, 90).unwrap();
        assert_eq!(
            slices,
            vec![StorageSlice {
                storage_id: large,
                amount: 90
            }]
        );
    }

    #[test]
    fn spill_continues_into_smaller_rows() {
        let large = Uuid::new_v4();
        let small = Uuid::new_v4();
        let rows = [row(large, 100), row(small, 30)];

        let slices = plan(&rows, 120).unwrap();
        assert_eq!(
            slices,
            vec![
                StorageSlice {
                    storage_id: large,
                    amount: 100
                },
                StorageSlice {
                    storage_id: small,
                    amount: 20
                },
            ]
        );
    }

    #[test]
    fn exact_capacity_is_allocatable() {
        let rows = [row(Uuid::new_v4(), 30), row(Uuid::new_v4(), 20)];
        let slices = plan(&rows, 50).unwrap();

        assert_eq!(slices.iter().map(|s| s.amount).sum::<i64>(), 50);
        assert_eq!(slices.len(), 2);
    }

    #[test]
    fn shortfall_fails_with_not_enough_space() {
        let rows = [row(Uuid::new_v4(), 30), row(Uuid::new_v4(), 20)];

        let err = plan(&rows, 51).unwrap_err();
        match err {
            AppError::NotEnoughSpace {
                requested,
                available,
            } => {
                assert_eq!(requested, 51);
                assert_eq!(available, 50);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn no_candidate_rows_fails() {
        let err = plan(&[], 1).unwrap_err();
        assert!(matches!(
            err,
            AppError::NotEnoughSpace {
                requested: 1,
                available: 0
            }
        ));
    }

    #[test]
    fn walk_stops_once_satisfied() {
        let first = Uuid::new_v4();
        let rows = [row(first, 50), row(Uuid::new_v4(), 40), row(Uuid::new_v4(), 30)];

        let slices = plan(&rows, 50).unwrap();
        assert_eq!(slices.len(), 1);
        assert_eq!(slices[0].storage_id, first);
    }
}
