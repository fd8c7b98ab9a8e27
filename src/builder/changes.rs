//! Column changes for inserts and updates.

use indexmap::IndexMap;

use super::graph::Query;
use super::node::NodeHandle;
use crate::sql::value::Value;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Change {
    Value(Value),
    /// Insert a related row first and store its key (forward column).
    Nested(Changes),
    /// Store the result of a sub-query.
    Query(NodeHandle),
    /// Insert related rows pointing back at this one (reverse column).
    Many(Vec<Changes>),
}

/// Column values for an insert or update, or a whole-row source query.
///
/// ```ignore
/// let planet = Changes::new()
///     .set("name", "Tatooine")
///     .nested("film", Changes::new().set("title", "A New Hope"));
/// graph.table("planet")?.insert(planet)?;
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Changes {
    pub(crate) entries: IndexMap<String, Change>,
    pub(crate) source: Option<NodeHandle>,
}

impl Changes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.entries
            .insert(column.into(), Change::Value(value.into()));
        self
    }

    pub fn nested(mut self, column: impl Into<String>, changes: Changes) -> Self {
        self.entries.insert(column.into(), Change::Nested(changes));
        self
    }

    pub fn query(mut self, column: impl Into<String>, query: &Query<'_>) -> Self {
        self.entries
            .insert(column.into(), Change::Query(query.handle()));
        self
    }

    pub fn many(mut self, column: impl Into<String>, rows: Vec<Changes>) -> Self {
        self.entries.insert(column.into(), Change::Many(rows));
        self
    }

    /// Take whole rows from `query` instead of column values.
    pub fn from_query(query: &Query<'_>) -> Self {
        Self {
            entries: IndexMap::new(),
            source: Some(query.handle()),
        }
    }

    /// Objects become nested inserts, arrays of objects become reverse
    /// inserts, anything else is a plain value.
    pub fn from_json(map: serde_json::Map<String, serde_json::Value>) -> Self {
        let mut changes = Self::new();
        for (column, value) in map {
            changes = match value {
                serde_json::Value::Object(obj) => changes.nested(column, Self::from_json(obj)),
                serde_json::Value::Array(items)
                    if !items.is_empty() && items.iter().all(|i| i.is_object()) =>
                {
                    let rows = items
                        .into_iter()
                        .filter_map(|i| match i {
                            serde_json::Value::Object(obj) => Some(Self::from_json(obj)),
                            _ => None,
                        })
                        .collect();
                    changes.many(column, rows)
                }
                other => changes.set(column, Value::from_json(other)),
            };
        }
        changes
    }

    pub fn contains(&self, column: &str) -> bool {
        self.entries.contains_key(column)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.source.is_none()
    }
}
