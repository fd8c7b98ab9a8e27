//! # querygraph
//!
//! Composable PostgreSQL queries that compile to a single statement.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                 Schema (relation descriptors)            │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [builder]
//! ┌─────────────────────────────────────────────────────────┐
//! │   QueryGraph: select / filter / insert / update /        │
//! │   delete / common / values nodes, plus branches          │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [compiler + filter]
//! ┌─────────────────────────────────────────────────────────┐
//! │   Statement AST: CTE chain, lateral joins, recursive     │
//! │   CTEs, row_to_json wrap                                 │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [session + sql rendering]
//! ┌─────────────────────────────────────────────────────────┐
//! │   Batch: SET LOCAL prelude + one SQL string with args    │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [executor]
//! ┌─────────────────────────────────────────────────────────┐
//! │   One transaction per batch, rows as JSON documents      │
//! └─────────────────────────────────────────────────────────┘
//! ```

pub mod builder;
pub mod compiler;
pub mod config;
pub mod error;
pub mod executor;
pub mod filter;
pub mod model;
pub mod session;
pub mod sql;

/// Re-exports for convenient usage.
pub mod prelude {
    pub use crate::builder::{Changes, NodeHandle, Query, QueryGraph};
    pub use crate::compiler::CompileOptions;
    pub use crate::error::{QueryError, QueryResult};
    pub use crate::executor::{Cursor, Executor};
    pub use crate::filter::{Filter, Operand, Predicate};
    pub use crate::model::{Column, Relation, Schema, Selection, SelectionSpec};
    pub use crate::session::Session;
    pub use crate::sql::{Batch, Compiled, Placeholder, Value};
}
