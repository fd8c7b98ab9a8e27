//! Predicate trees built from lookup keys.

use indexmap::{IndexMap, IndexSet};

use super::lookup::LookupPath;
use crate::builder::NodeHandle;
use crate::model::{ColumnKind, Relation};
use crate::sql::expr::Expr;
use crate::sql::value::Value;

/// Right-hand side of a lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// Bound as a positional parameter.
    Value(Value),
    /// Already-compiled fragment, spliced as-is (e.g. a correlated column).
    Expr(Expr),
    /// A sub-select built on the same graph.
    Query(NodeHandle),
}

impl From<Value> for Operand {
    fn from(value: Value) -> Self {
        Operand::Value(value)
    }
}

impl From<Expr> for Operand {
    fn from(expr: Expr) -> Self {
        Operand::Expr(expr)
    }
}

impl From<NodeHandle> for Operand {
    fn from(handle: NodeHandle) -> Self {
        Operand::Query(handle)
    }
}

macro_rules! operand_from_value {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Operand {
                fn from(v: $ty) -> Self {
                    Operand::Value(Value::from(v))
                }
            }
        )*
    };
}

operand_from_value!(i64, i32, f64, bool, &str, String, serde_json::Value);

impl<T: Into<Value>> From<Vec<T>> for Operand {
    fn from(items: Vec<T>) -> Self {
        Operand::Value(Value::from(items))
    }
}

impl<T: Into<Value>> From<Option<T>> for Operand {
    fn from(opt: Option<T>) -> Self {
        Operand::Value(Value::from(opt))
    }
}

/// Boolean composition of lookups.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Lookup { key: String, operand: Operand },
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
}

impl Predicate {
    pub fn lookup(key: impl Into<String>, operand: impl Into<Operand>) -> Self {
        Predicate::Lookup {
            key: key.into(),
            operand: operand.into(),
        }
    }

    /// AND, flattening nested conjunctions.
    pub fn and(self, other: Predicate) -> Self {
        match (self, other) {
            (Predicate::And(mut left), Predicate::And(right)) => {
                left.extend(right);
                Predicate::And(left)
            }
            (Predicate::And(mut left), right) => {
                left.push(right);
                Predicate::And(left)
            }
            (left, Predicate::And(mut right)) => {
                right.insert(0, left);
                Predicate::And(right)
            }
            (left, right) => Predicate::And(vec![left, right]),
        }
    }

    /// OR, flattening nested disjunctions.
    pub fn or(self, other: Predicate) -> Self {
        match (self, other) {
            (Predicate::Or(mut left), Predicate::Or(right)) => {
                left.extend(right);
                Predicate::Or(left)
            }
            (Predicate::Or(mut left), right) => {
                left.push(right);
                Predicate::Or(left)
            }
            (left, right) => Predicate::Or(vec![left, right]),
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Self {
        Predicate::Not(Box::new(self))
    }

    /// Columns of `relation` itself that this predicate reads.
    ///
    /// The leaf field for plain lookups; for joins, the first join column
    /// when it is a stored foreign key, or the primary key for a reverse
    /// join. Malformed keys are skipped here and reported by compilation.
    pub fn primary_columns(&self, relation: &Relation) -> IndexSet<String> {
        let mut out = IndexSet::new();
        self.collect_primary_columns(relation, &mut out);
        out
    }

    fn collect_primary_columns(&self, relation: &Relation, out: &mut IndexSet<String>) {
        match self {
            Predicate::Lookup { key, .. } => {
                let Ok(path) = LookupPath::parse(key) else {
                    return;
                };
                let first = path.joins.first().unwrap_or(&path.field);
                match relation.column(first).map(|c| &c.kind) {
                    Some(ColumnKind::Reverse { .. }) => {
                        out.insert(relation.primary_key().to_string());
                    }
                    Some(_) => {
                        out.insert(first.clone());
                    }
                    None => {}
                }
            }
            Predicate::And(items) | Predicate::Or(items) => {
                for item in items {
                    item.collect_primary_columns(relation, out);
                }
            }
            Predicate::Not(inner) => inner.collect_primary_columns(relation, out),
        }
    }

    /// Sub-select handles referenced by operands.
    pub fn subqueries(&self) -> Vec<NodeHandle> {
        match self {
            Predicate::Lookup {
                operand: Operand::Query(handle),
                ..
            } => vec![*handle],
            Predicate::Lookup { .. } => vec![],
            Predicate::And(items) | Predicate::Or(items) => {
                items.iter().flat_map(Predicate::subqueries).collect()
            }
            Predicate::Not(inner) => inner.subqueries(),
        }
    }
}

/// Ordered map of lookup key to operand; entries are ANDed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter(IndexMap<String, Operand>);

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, operand: impl Into<Operand>) -> Self {
        self.0.insert(key.into(), operand.into());
        self
    }

    /// Build from a decoded JSON object; every value becomes a parameter.
    pub fn from_json(map: serde_json::Map<String, serde_json::Value>) -> Self {
        Self(
            map.into_iter()
                .map(|(k, v)| (k, Operand::Value(Value::from_json(v))))
                .collect(),
        )
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Filter> for Predicate {
    fn from(filter: Filter) -> Self {
        Predicate::And(
            filter
                .0
                .into_iter()
                .map(|(key, operand)| Predicate::Lookup { key, operand })
                .collect(),
        )
    }
}
