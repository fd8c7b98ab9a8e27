//! Selection trees: the nested shape a caller wants back.

use indexmap::{IndexMap, IndexSet};
use serde::Deserialize;

use crate::builder::NodeHandle;

/// How a relation column in a selection is fetched.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup {
    /// Fetch the related rows with the given shape.
    Nested(Selection),
    /// Fetch the related rows through an independently built query.
    Query(NodeHandle),
    /// Walk a self-referencing relation column transitively.
    Recursive {
        selection: Selection,
        max_depth: Option<u32>,
    },
}

/// Scalar fields plus relation lookups, in insertion order.
///
/// A name is either a field or a lookup, never both. Lookups win: adding a
/// lookup drops a same-named field, and adding a field that is already a
/// lookup does nothing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Selection {
    fields: IndexSet<String>,
    lookups: IndexMap<String, Lookup>,
}

impl Selection {
    /// Empty selection (`SELECT *`).
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fields<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut selection = Self::new();
        for name in names {
            selection.add_field(name);
        }
        selection
    }

    pub fn field(mut self, name: impl Into<String>) -> Self {
        self.add_field(name);
        self
    }

    pub fn lookup(mut self, name: impl Into<String>, selection: Selection) -> Self {
        self.add_lookup(name, Lookup::Nested(selection));
        self
    }

    pub fn lookup_query(mut self, name: impl Into<String>, query: NodeHandle) -> Self {
        self.add_lookup(name, Lookup::Query(query));
        self
    }

    pub fn recursive(
        mut self,
        name: impl Into<String>,
        selection: Selection,
        max_depth: Option<u32>,
    ) -> Self {
        self.add_lookup(
            name,
            Lookup::Recursive {
                selection,
                max_depth,
            },
        );
        self
    }

    pub fn add_field(&mut self, name: impl Into<String>) {
        let name = name.into();
        if !self.lookups.contains_key(&name) {
            self.fields.insert(name);
        }
    }

    pub fn add_lookup(&mut self, name: impl Into<String>, lookup: Lookup) {
        let name = name.into();
        self.fields.shift_remove(&name);
        self.lookups.insert(name, lookup);
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(String::as_str)
    }

    pub fn lookups(&self) -> impl Iterator<Item = (&str, &Lookup)> {
        self.lookups.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Fields followed by lookup names.
    pub fn all_names(&self) -> IndexSet<String> {
        self.fields
            .iter()
            .chain(self.lookups.keys())
            .cloned()
            .collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains(name) || self.lookups.contains_key(name)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.lookups.is_empty()
    }
}

/// Serde form of a selection, as accepted by the command line.
///
/// Either a bare list of field names or
/// `{"fields": [...], "lookups": {"name": <spec>}, "recursive": true, "max_depth": 3}`.
/// `recursive` and `max_depth` only apply to lookup values.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum SelectionSpec {
    Fields(Vec<String>),
    Tree {
        #[serde(default)]
        fields: Vec<String>,
        #[serde(default)]
        lookups: IndexMap<String, SelectionSpec>,
        #[serde(default)]
        recursive: bool,
        #[serde(default)]
        max_depth: Option<u32>,
    },
}

impl SelectionSpec {
    fn into_lookup(self) -> Lookup {
        match self {
            SelectionSpec::Tree {
                recursive: true,
                max_depth,
                fields,
                lookups,
            } => Lookup::Recursive {
                selection: SelectionSpec::Tree {
                    fields,
                    lookups,
                    recursive: false,
                    max_depth: None,
                }
                .into(),
                max_depth,
            },
            other => Lookup::Nested(other.into()),
        }
    }
}

impl From<SelectionSpec> for Selection {
    fn from(spec: SelectionSpec) -> Self {
        match spec {
            SelectionSpec::Fields(fields) => Selection::fields(fields),
            SelectionSpec::Tree {
                fields, lookups, ..
            } => {
                let mut selection = Selection::fields(fields);
                for (name, nested) in lookups {
                    selection.add_lookup(name, nested.into_lookup());
                }
                selection
            }
        }
    }
}
