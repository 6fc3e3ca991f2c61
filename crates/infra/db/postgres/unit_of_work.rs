use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use diesel::{Connection, PgConnection};
use thiserror::Error;

use super::postgres_connection::PgPoolSquad;

/// What a unit of work wants done with its transaction.
///
/// `Rollback` still hands a value back to the caller, so a closure can undo
/// its writes and report why without turning that into an error.
#[derive(Debug)]
pub enum TxOutcome<T> {
    Commit(T),
    Rollback(T),
}

#[derive(Debug, Error)]
enum TxError {
    #[error("rollback requested")]
    RolledBack,
    #[error(transparent)]
    Work(anyhow::Error),
    #[error(transparent)]
    Diesel(#[from] diesel::result::Error),
}

/// Runs `work` inside one database transaction on a blocking thread.
///
/// The transaction commits on `Ok(TxOutcome::Commit)` and rolls back on
/// `Ok(TxOutcome::Rollback)` or any error. Remote calls never belong inside `work`.
pub async fn run_in_transaction<T, F>(db_pool: Arc<PgPoolSquad>, work: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&mut PgConnection) -> Result<TxOutcome<T>> + Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let mut conn = db_pool
            .get()
            .context("unit_of_work: failed to acquire connection")?;

        let mut rolled_back = None;
        let result = conn.transaction::<T, TxError, _>(|conn| match work(conn) {
            Ok(TxOutcome::Commit(value)) => Ok(value),
            Ok(TxOutcome::Rollback(value)) => {
                rolled_back = Some(value);
                Err(TxError::RolledBack)
            }
            Err(err) => Err(TxError::Work(err)),
        });

        match result {
            Ok(value) => Ok(value),
            Err(TxError::RolledBack) => {
                rolled_back.ok_or_else(|| anyhow!("unit_of_work: rollback value missing"))
            }
            Err(TxError::Work(err)) => Err(err),
            Err(TxError::Diesel(err)) => {
                Err(anyhow::Error::new(err).context("unit_of_work: transaction failed"))
            }
        }
    })
    .await
    .context("unit_of_work: blocking task failed")?
}

/// Runs a read on a pooled connection on a blocking thread, without a transaction.
pub async fn run_blocking<T, F>(db_pool: Arc<PgPoolSquad>, work: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&mut PgConnection) -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let mut conn = db_pool
            .get()
            .context("unit_of_work: failed to acquire connection")?;
        work(&mut conn)
    })
    .await
    .context("unit_of_work: blocking task failed")?
}
