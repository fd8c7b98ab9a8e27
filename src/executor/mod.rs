//! Running compiled batches.
//!
//! Every batch is one transaction: the session prelude, then the compiled
//! statement in a single round trip. Staged writes never need extra round
//! trips because they live in the statement's CTE chain.

mod connections;
mod cursor;
mod postgres;

pub use connections::{Connections, SharedCursor, UrlGuard};
pub use cursor::{execute, get, Cursor};
pub use postgres::PostgresCursor;

use crate::builder::Query;
use crate::compiler::CompileOptions;
use crate::error::QueryResult;
use crate::session::Session;
use crate::sql::statement::Batch;

/// Compiles with fixed options and runs against the current connection.
pub struct Executor {
    connections: Connections,
    options: CompileOptions,
}

impl Executor {
    pub fn new(url: impl Into<String>, options: CompileOptions) -> Self {
        Self {
            connections: Connections::new(url),
            options,
        }
    }

    pub fn connections(&self) -> &Connections {
        &self.connections
    }

    pub fn options(&self) -> &CompileOptions {
        &self.options
    }

    /// Compile `query` for `session`. Done before any await since builder
    /// graphs are not `Send`.
    pub fn prepare(&self, query: &Query<'_>, session: &Session) -> QueryResult<Batch> {
        query.prepare(session, &self.options)
    }

    pub async fn fetch_all(&self, batch: &Batch) -> QueryResult<Vec<serde_json::Value>> {
        let cursor = self.connections.cursor().await?;
        let mut cursor = cursor.lock().await;
        execute(&mut *cursor, batch).await
    }

    pub async fn get(&self, batch: &Batch) -> QueryResult<Option<serde_json::Value>> {
        let cursor = self.connections.cursor().await?;
        let mut cursor = cursor.lock().await;
        get(&mut *cursor, batch).await
    }
}
