//! Connections cached per URL, with a stack of current URLs.
//!
//! ```ignore
//! let connections = Connections::new("postgres://localhost/app");
//! {
//!     let _guard = connections.push("postgres://localhost/app_test");
//!     // statements here run against app_test
//! }
//! // back on app
//! ```

use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info};

use super::postgres::PostgresCursor;
use crate::error::{QueryError, QueryResult};

pub type SharedCursor = Arc<AsyncMutex<PostgresCursor>>;

#[derive(Default)]
pub struct Connections {
    urls: Mutex<Vec<String>>,
    cursors: DashMap<String, SharedCursor>,
}

impl Connections {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            urls: Mutex::new(vec![url.into()]),
            cursors: DashMap::new(),
        }
    }

    pub fn current_url(&self) -> QueryResult<String> {
        self.urls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .last()
            .cloned()
            .ok_or_else(|| QueryError::Connection("no database url configured".into()))
    }

    /// Make `url` current until the guard is dropped.
    pub fn push(&self, url: impl Into<String>) -> UrlGuard<'_> {
        let url = url.into();
        debug!(%url, "push database url");
        self.urls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(url);
        UrlGuard { connections: self }
    }

    fn pop(&self) {
        let popped = self
            .urls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop();
        debug!(url = ?popped, "pop database url");
    }

    /// The cursor for the current URL, connecting on first use.
    ///
    /// Callers hold the lock for a whole transaction, so two in-flight
    /// statements never share a connection.
    pub async fn cursor(&self) -> QueryResult<SharedCursor> {
        let url = self.current_url()?;
        let cached = self.cursors.get(&url).map(|entry| entry.value().clone());
        if let Some(cursor) = cached {
            if !cursor.lock().await.is_closed() {
                return Ok(cursor);
            }
            self.cursors.remove(&url);
        }

        info!(%url, "connecting");
        let cursor = Arc::new(AsyncMutex::new(PostgresCursor::connect(&url).await?));
        Ok(self.cursors.entry(url).or_insert(cursor).value().clone())
    }

    pub fn cached(&self) -> usize {
        self.cursors.len()
    }
}

/// Pops its URL off the stack when dropped.
#[must_use = "the url is popped as soon as the guard is dropped"]
pub struct UrlGuard<'a> {
    connections: &'a Connections,
}

impl Drop for UrlGuard<'_> {
    fn drop(&mut self) {
        self.connections.pop();
    }
}
