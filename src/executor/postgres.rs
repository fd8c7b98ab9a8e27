//! [`Cursor`] over a `tokio-postgres` client.

use async_trait::async_trait;
use tokio_postgres::types::ToSql;
use tokio_postgres::{Client, NoTls};
use tracing::{trace, warn};

use super::cursor::Cursor;
use crate::error::{QueryError, QueryResult};
use crate::sql::statement::Compiled;

pub struct PostgresCursor {
    client: Client,
}

impl PostgresCursor {
    /// Connect and drive the connection on the current runtime.
    pub async fn connect(url: &str) -> QueryResult<Self> {
        let (client, connection) = tokio_postgres::connect(url, NoTls).await?;
        tokio::spawn(async move {
            if let Err(err) = connection.await {
                warn!(error = %err, "postgres connection closed");
            }
        });
        Ok(Self { client })
    }

    pub fn from_client(client: Client) -> Self {
        Self { client }
    }

    pub fn is_closed(&self) -> bool {
        self.client.is_closed()
    }
}

fn params(statement: &Compiled) -> Vec<&(dyn ToSql + Sync)> {
    statement
        .args
        .iter()
        .map(|arg| arg as &(dyn ToSql + Sync))
        .collect()
}

#[async_trait]
impl Cursor for PostgresCursor {
    async fn begin(&mut self) -> QueryResult<()> {
        self.client.batch_execute("BEGIN").await?;
        Ok(())
    }

    async fn query(&mut self, statement: &Compiled) -> QueryResult<Vec<serde_json::Value>> {
        trace!(sql = %statement.sql, args = statement.args.len(), "query");
        let rows = self
            .client
            .query(statement.sql.as_str(), &params(statement))
            .await?;
        rows.iter()
            .map(|row| row.try_get::<_, serde_json::Value>(0).map_err(QueryError::from))
            .collect()
    }

    async fn execute(&mut self, statement: &Compiled) -> QueryResult<u64> {
        trace!(sql = %statement.sql, args = statement.args.len(), "execute");
        if statement.args.is_empty() {
            self.client.batch_execute(&statement.sql).await?;
            return Ok(0);
        }
        Ok(self
            .client
            .execute(statement.sql.as_str(), &params(statement))
            .await?)
    }

    async fn commit(&mut self) -> QueryResult<()> {
        self.client.batch_execute("COMMIT").await?;
        Ok(())
    }

    async fn rollback(&mut self) -> QueryResult<()> {
        self.client.batch_execute("ROLLBACK").await?;
        Ok(())
    }
}
