//! Builder graph nodes.
//!
//! Nodes are immutable once pushed into a [`QueryGraph`](super::QueryGraph)
//! and are addressed by [`NodeHandle`]. The compiler matches on
//! [`QueryNode`] exhaustively, so a new variant cannot be added without
//! teaching the compiler about it.

use std::fmt;

use indexmap::IndexMap;

use crate::filter::Predicate;
use crate::model::{RelationId, Selection};
use crate::sql::value::Value;

/// Identity of a node within one graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeHandle {
    pub(crate) graph: usize,
    pub(crate) index: usize,
}

impl fmt::Display for NodeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.index)
    }
}

/// What a node reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Source {
    Relation(RelationId),
    Node(NodeHandle),
}

/// One column value of an insert or update.
#[derive(Debug, Clone, PartialEq)]
pub enum PayloadValue {
    Value(Value),
    /// Scalar sub-select (already wrapped to return one column).
    Query(NodeHandle),
    /// Primary key of the parent insert, for rows staged through a reverse column.
    ParentKey,
}

/// The data written by an insert or update.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Values(IndexMap<String, PayloadValue>),
    /// Whole rows from another query (`INSERT ... SELECT`, `UPDATE ... SET (..) = (SELECT ..)`).
    Query(NodeHandle),
}

/// ORDER BY entry of a select node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ordering {
    pub column: String,
    pub descending: bool,
}

impl Ordering {
    /// Parse `"title"` / `"-title"`.
    pub fn parse(spec: &str) -> Self {
        match spec.strip_prefix('-') {
            Some(column) => Self {
                column: column.into(),
                descending: true,
            },
            None => Self {
                column: spec.into(),
                descending: false,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum QueryNode {
    Select {
        source: Source,
        selection: Selection,
        ordering: Vec<Ordering>,
        limit: Option<u64>,
        offset: Option<u64>,
    },
    Insert {
        relation: RelationId,
        payload: Payload,
        /// Inserts into related relations through reverse columns, compiled
        /// once this insert has an alias.
        reverse: IndexMap<String, Vec<NodeHandle>>,
    },
    Update {
        relation: RelationId,
        payload: Payload,
        predicate: Option<Predicate>,
    },
    Delete {
        relation: RelationId,
        predicate: Option<Predicate>,
    },
    Filter {
        source: Source,
        predicate: Predicate,
    },
    /// Statements run for their side effects; the last one is the result.
    Common { subqueries: Vec<NodeHandle> },
    Values {
        columns: Vec<String>,
        rows: Vec<Vec<Value>>,
    },
}

impl QueryNode {
    pub fn select(source: Source, selection: Selection) -> Self {
        QueryNode::Select {
            source,
            selection,
            ordering: vec![],
            limit: None,
            offset: None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            QueryNode::Select { .. } => "select",
            QueryNode::Insert { .. } => "insert",
            QueryNode::Update { .. } => "update",
            QueryNode::Delete { .. } => "delete",
            QueryNode::Filter { .. } => "filter",
            QueryNode::Common { .. } => "common",
            QueryNode::Values { .. } => "values",
        }
    }

    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            QueryNode::Insert { .. } | QueryNode::Update { .. } | QueryNode::Delete { .. }
        )
    }
}
