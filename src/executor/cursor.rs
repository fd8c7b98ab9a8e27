//! The execution handle and the transaction around one batch.

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::error::{QueryError, QueryResult};
use crate::sql::statement::{Batch, Compiled};

/// A non-autocommit database handle.
///
/// Implementations run one statement at a time; the caller owns
/// transaction boundaries.
#[async_trait]
pub trait Cursor: Send {
    async fn begin(&mut self) -> QueryResult<()>;

    /// Run a statement whose single column is a JSON document per row.
    async fn query(&mut self, statement: &Compiled) -> QueryResult<Vec<serde_json::Value>>;

    /// Run a statement for its side effects.
    async fn execute(&mut self, statement: &Compiled) -> QueryResult<u64>;

    async fn commit(&mut self) -> QueryResult<()>;

    async fn rollback(&mut self) -> QueryResult<()>;
}

/// Run `batch` in one transaction and return the rows of its last statement.
///
/// Commits on success. Any error rolls the transaction back before it is
/// returned.
pub async fn execute<C: Cursor + ?Sized>(
    cursor: &mut C,
    batch: &Batch,
) -> QueryResult<Vec<serde_json::Value>> {
    transaction(cursor, batch, None).await
}

/// Like [`execute`], but expects at most one row.
///
/// More than one row is a [`QueryError::MultipleResults`] and nothing is
/// committed.
pub async fn get<C: Cursor + ?Sized>(
    cursor: &mut C,
    batch: &Batch,
) -> QueryResult<Option<serde_json::Value>> {
    let mut rows = transaction(cursor, batch, Some(1)).await?;
    Ok(rows.pop())
}

async fn transaction<C: Cursor + ?Sized>(
    cursor: &mut C,
    batch: &Batch,
    max_rows: Option<usize>,
) -> QueryResult<Vec<serde_json::Value>> {
    let Some(main) = batch.main() else {
        return Ok(vec![]);
    };

    cursor.begin().await?;
    debug!(prelude = batch.prelude().len(), "transaction started");

    match run(cursor, batch.prelude(), main, max_rows).await {
        Ok(rows) => {
            cursor.commit().await?;
            info!(rows = rows.len(), "transaction committed");
            Ok(rows)
        }
        Err(err) => {
            warn!(error = %err, "rolling back");
            if let Err(rollback) = cursor.rollback().await {
                warn!(error = %rollback, "rollback failed");
            }
            Err(err)
        }
    }
}

async fn run<C: Cursor + ?Sized>(
    cursor: &mut C,
    prelude: &[Compiled],
    main: &Compiled,
    max_rows: Option<usize>,
) -> QueryResult<Vec<serde_json::Value>> {
    for statement in prelude {
        cursor.execute(statement).await?;
    }
    let rows = cursor.query(main).await?;
    match max_rows {
        Some(max) if rows.len() > max => Err(QueryError::MultipleResults(rows.len())),
        _ => Ok(rows),
    }
}
