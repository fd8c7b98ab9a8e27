//! Lookup key grammar: `[join "__"]* field ["__" op]`.

use std::fmt;

use crate::error::{QueryError, QueryResult};

const SEPARATOR: &str = "__";

/// Comparison applied to the leaf field of a lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Operator {
    #[default]
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    In,
    /// LIKE-contains
    Contains,
    NotIn,
    /// IS NULL when the operand is true, IS NOT NULL when false
    IsNull,
    /// Array overlap (`&&`)
    Overlap,
}

impl Operator {
    pub fn from_suffix(suffix: &str) -> Option<Self> {
        Some(match suffix {
            "eq" => Operator::Eq,
            "ne" => Operator::Ne,
            "lt" => Operator::Lt,
            "gt" => Operator::Gt,
            "le" => Operator::Le,
            "ge" => Operator::Ge,
            "in" => Operator::In,
            "ct" => Operator::Contains,
            "ni" => Operator::NotIn,
            "nu" => Operator::IsNull,
            "ov" => Operator::Overlap,
            _ => return None,
        })
    }

    pub fn suffix(&self) -> &'static str {
        match self {
            Operator::Eq => "eq",
            Operator::Ne => "ne",
            Operator::Lt => "lt",
            Operator::Gt => "gt",
            Operator::Le => "le",
            Operator::Ge => "ge",
            Operator::In => "in",
            Operator::Contains => "ct",
            Operator::NotIn => "ni",
            Operator::IsNull => "nu",
            Operator::Overlap => "ov",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.suffix())
    }
}

/// A parsed lookup key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupPath {
    /// Relation columns traversed before the leaf, outermost first.
    pub joins: Vec<String>,
    pub field: String,
    pub op: Operator,
}

impl LookupPath {
    /// Split a key such as `actors__address__country__ct`.
    ///
    /// A trailing segment that names an operator is taken as the operator;
    /// the remaining last segment is the field and everything before it is
    /// a join.
    pub fn parse(key: &str) -> QueryResult<Self> {
        let mut segments: Vec<&str> = key.split(SEPARATOR).collect();

        if let Some(empty) = segments.iter().find(|s| s.is_empty()) {
            return Err(QueryError::InvalidFilterLookup {
                lookup: key.into(),
                segment: (*empty).into(),
                reason: "empty segment".into(),
            });
        }

        let op = match segments.last().and_then(|s| Operator::from_suffix(s)) {
            Some(op) if segments.len() > 1 => {
                segments.pop();
                op
            }
            _ => Operator::Eq,
        };

        let field = segments.pop().map(String::from).unwrap_or_default();
        Ok(Self {
            joins: segments.into_iter().map(String::from).collect(),
            field,
            op,
        })
    }
}
