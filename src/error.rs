//! Error types for building, compiling and executing queries.

use thiserror::Error;

use crate::builder::NodeHandle;
use crate::model::RelationId;

/// Errors raised while building, compiling or executing a query.
///
/// Builder-time variants are returned before any SQL exists. Compile-time
/// variants abort the whole compile. Execution errors are returned after
/// the transaction has been rolled back.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("unknown column '{column}' on relation '{relation}'")]
    UnknownColumn { column: String, relation: String },

    #[error("unknown relation '{0}'")]
    UnknownRelation(String),

    #[error("invalid filter lookup '{lookup}' at '{segment}': {reason}")]
    InvalidFilterLookup {
        lookup: String,
        segment: String,
        reason: String,
    },

    #[error("conflicting arguments: {0}")]
    ConflictingArguments(String),

    #[error("invalid value for column '{column}': {reason}")]
    InvalidValue { column: String, reason: String },

    #[error("cannot insert into {0}: only a bare relation is insertable")]
    NotInsertable(String),

    #[error("cannot update or delete {0}: expected a relation or a filtered relation")]
    NotMutable(String),

    #[error("column '{column}' on relation '{relation}' is not a relation")]
    NotARelation { column: String, relation: String },

    #[error("unsupported lookup '{name}': {reason}")]
    UnsupportedLookup { name: String, reason: String },

    #[error("invalid schema: {0}")]
    InvalidSchema(String),

    #[error("invalid session: {0}")]
    InvalidSession(String),

    #[error("expected at most one row, got {0}")]
    MultipleResults(usize),

    #[error("query node {0} does not belong to this graph")]
    UnknownQueryNode(NodeHandle),

    #[error("relation {0} does not belong to this schema")]
    UnknownRelationId(RelationId),

    #[error("database error: {0}")]
    Database(#[from] tokio_postgres::Error),

    #[error("connection error: {0}")]
    Connection(String),
}

impl QueryError {
    pub(crate) fn unknown_column(column: &str, relation: &str) -> Self {
        QueryError::UnknownColumn {
            column: column.into(),
            relation: relation.into(),
        }
    }

    pub(crate) fn invalid_value(column: &str, reason: impl Into<String>) -> Self {
        QueryError::InvalidValue {
            column: column.into(),
            reason: reason.into(),
        }
    }
}

pub type QueryResult<T> = Result<T, QueryError>;
