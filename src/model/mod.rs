//! Schema-side types: relation descriptors and selection trees.

pub mod relation;
pub mod selection;

pub use relation::{Column, ColumnKind, Relation, RelationId, Schema};
pub use selection::{Lookup, Selection, SelectionSpec};
