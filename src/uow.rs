use std::ops::{Deref, DerefMut};

use sqlx::{PgConnection, Postgres, Transaction};

use crate::error::AppError;

/// Transaction scope for one engine operation. Every participant borrows the
/// same scope, so a nested call can never BEGIN or COMMIT on its own; the
/// creator owns the outcome.
pub struct UnitOfWork<'a> {
    tx: Option<Transaction<'a, Postgres>>,
    committed: bool,
    rolled_back: bool,
}

impl<'a> UnitOfWork<'a> {
    pub async fn begin(pool: &sqlx::PgPool) -> Result<Self, AppError> {
        let mut tx = pool.begin().await.map_err(AppError::DatabaseError)?;

        // The allocator's locked snapshot must stay stable for the whole scope.
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ")
            .execute(&mut *tx)
            .await
            .map_err(AppError::DatabaseError)?;

        Ok(Self {
            tx: Some(tx),
            committed: false,
            rolled_back: false,
        })
    }

    pub async fn commit(mut self) -> Result<(), AppError> {
        if self.committed || self.rolled_back {
            return Err(AppError::TransactionState("Transaction already finalized"));
        }

        let tx = self
            .tx
            .take()
            .ok_or(AppError::TransactionState("Transaction already consumed"))?;

        tx.commit().await.map_err(AppError::DatabaseError)?;

        self.committed = true;
        Ok(())
    }

    pub async fn rollback(mut self) -> Result<(), AppError> {
        if self.committed || self.rolled_back {
            return Err(AppError::TransactionState("Transaction already finalized"));
        }

        let tx = self
            .tx
            .take()
            .ok_or(AppError::TransactionState("Transaction already consumed"))?;

        tx.rollback().await.map_err(AppError::DatabaseError)?;

        self.rolled_back = true;
        Ok(())
    }

    /// Commit on success, roll back on failure. A failed rollback is joined
    /// onto the original error so both surface. A failed commit already
    /// aborts the transaction server-side, so it is returned as-is.
    pub async fn finish<T>(self, result: Result<T, AppError>) -> Result<T, AppError> {
        match result {
            Ok(value) => {
                self.commit().await?;
                Ok(value)
            }
            Err(err) => match self.rollback().await {
                Ok(()) => Err(err),
                Err(rollback) => Err(AppError::RollbackFailed {
                    source: Box::new(err),
                    rollback: Box::new(rollback),
                }),
            },
        }
    }

    pub fn connection(&mut self) -> &mut PgConnection {
        self.tx.as_mut().unwrap()
    }

    pub fn is_active(&self) -> bool {
        !self.committed && !self.rolled_back && self.tx.is_some()
    }
}

impl<'a> Deref for UnitOfWork<'a> {
    type Target = PgConnection;

    fn deref(&self) -> &Self::Target {
        self.tx.as_ref().unwrap()
    }
}

impl<'a> DerefMut for UnitOfWork<'a> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.tx.as_mut().unwrap()
    }
}

impl<'a> Drop for UnitOfWork<'a> {
    fn drop(&mut self) {
        if self.tx.is_some() && !std::thread::panicking() {
            tracing::warn!(
                "UnitOfWork dropped without explicit commit/rollback - potential data inconsistency. \
                Consider using explicit commit() or rollback()."
            );
        }
    }
}

#[async_trait::async_trait]
pub trait UnitOfWorkFactory: Send + Sync {
    async fn create_uow(&self) -> Result<UnitOfWork<'_>, AppError>;
}

pub struct PgUnitOfWorkFactory {
    pool: sqlx::PgPool,
}

impl PgUnitOfWorkFactory {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl UnitOfWorkFactory for PgUnitOfWorkFactory {
    async fn create_uow(&self) -> Result<UnitOfWork<'_>, AppError> {
        UnitOfWork::begin(&self.pool).await
    }
}
