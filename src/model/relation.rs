//! Relation descriptors and the schema that owns them.
//!
//! A schema is loaded once and shared read-only by every query built against
//! it. Relations are addressed by [`RelationId`], a stable index into the
//! schema, so builder nodes never own relation metadata.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;

use crate::error::{QueryError, QueryResult};

/// How a column relates to other relations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnKind {
    /// Plain stored value.
    Scalar,
    /// Stored foreign key holding the primary key of a row in `relation`.
    Forward { relation: String },
    /// Virtual one-to-many: rows of `relation` whose `column` holds this row's key.
    Reverse { relation: String, column: String },
}

/// A column of a relation.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "ColumnDef")]
pub struct Column {
    pub name: String,
    pub nullable: bool,
    pub unique: bool,
    pub primary_key: bool,
    pub kind: ColumnKind,
    /// Declared PostgreSQL type, used to type otherwise untyped parameters.
    pub data_type: Option<String>,
}

impl Column {
    pub fn scalar(name: &str) -> Self {
        Self {
            name: name.into(),
            nullable: false,
            unique: false,
            primary_key: false,
            kind: ColumnKind::Scalar,
            data_type: None,
        }
    }

    pub fn primary(name: &str) -> Self {
        Self {
            primary_key: true,
            unique: true,
            ..Self::scalar(name)
        }
    }

    pub fn forward(name: &str, relation: &str) -> Self {
        Self {
            kind: ColumnKind::Forward {
                relation: relation.into(),
            },
            ..Self::scalar(name)
        }
    }

    pub fn reverse(name: &str, relation: &str, column: &str) -> Self {
        Self {
            nullable: true,
            kind: ColumnKind::Reverse {
                relation: relation.into(),
                column: column.into(),
            },
            ..Self::scalar(name)
        }
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn typed(mut self, data_type: &str) -> Self {
        self.data_type = Some(data_type.into());
        self
    }

    /// The related relation, for forward and reverse columns.
    pub fn related_relation(&self) -> Option<&str> {
        match &self.kind {
            ColumnKind::Scalar => None,
            ColumnKind::Forward { relation } | ColumnKind::Reverse { relation, .. } => {
                Some(relation)
            }
        }
    }

    pub fn is_reverse(&self) -> bool {
        matches!(self.kind, ColumnKind::Reverse { .. })
    }

    pub fn is_forward(&self) -> bool {
        matches!(self.kind, ColumnKind::Forward { .. })
    }
}

/// On-disk column shape.
#[derive(Debug, Deserialize)]
struct ColumnDef {
    name: String,
    #[serde(default)]
    nullable: bool,
    #[serde(default)]
    unique: bool,
    #[serde(default)]
    primary_key: bool,
    references: Option<String>,
    reverse: Option<ReverseDef>,
    #[serde(rename = "type")]
    data_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ReverseDef {
    relation: String,
    column: String,
}

impl TryFrom<ColumnDef> for Column {
    type Error = String;

    fn try_from(def: ColumnDef) -> Result<Self, Self::Error> {
        let kind = match (def.references, def.reverse) {
            (Some(_), Some(_)) => {
                return Err(format!(
                    "column '{}' cannot be both a reference and a reverse relation",
                    def.name
                ))
            }
            (Some(relation), None) => ColumnKind::Forward { relation },
            (None, Some(ReverseDef { relation, column })) => {
                ColumnKind::Reverse { relation, column }
            }
            (None, None) => ColumnKind::Scalar,
        };
        Ok(Column {
            name: def.name,
            nullable: def.nullable,
            unique: def.unique || def.primary_key,
            primary_key: def.primary_key,
            kind,
            data_type: def.data_type,
        })
    }
}

/// A table: name plus ordered columns.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Relation {
    pub name: String,
    #[serde(rename = "column", default)]
    pub columns: Vec<Column>,
}

impl Relation {
    pub fn new(name: &str, columns: Vec<Column>) -> Self {
        Self {
            name: name.into(),
            columns,
        }
    }

    /// The flagged primary key column, or `id`.
    pub fn primary_key(&self) -> &str {
        self.columns
            .iter()
            .find(|c| c.primary_key)
            .map(|c| c.name.as_str())
            .unwrap_or("id")
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn require_column(&self, name: &str) -> QueryResult<&Column> {
        self.column(name)
            .ok_or_else(|| QueryError::unknown_column(name, &self.name))
    }
}

static NEXT_SCHEMA_ID: AtomicUsize = AtomicUsize::new(0);

/// `integer`, `double precision`, `varchar(20)`, `numeric(10, 2)`, `public.mood[]`
static DATA_TYPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_.]*( [A-Za-z_][A-Za-z0-9_]*)*(\(\d+(, ?\d+)?\))?(\[\])*$")
        .expect("valid regex")
});

/// Stable identity of a relation within its [`Schema`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RelationId {
    schema: usize,
    index: usize,
}

impl fmt::Display for RelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.index)
    }
}

#[derive(Debug, Deserialize)]
struct SchemaDef {
    #[serde(rename = "relation", default)]
    relations: Vec<Relation>,
}

/// Every relation the compiler may touch, indexed by name.
#[derive(Debug, Clone)]
pub struct Schema {
    id: usize,
    relations: Vec<Relation>,
    index: HashMap<String, RelationId>,
}

impl Schema {
    /// Build and validate a schema.
    pub fn new(relations: Vec<Relation>) -> QueryResult<Self> {
        let id = NEXT_SCHEMA_ID.fetch_add(1, Ordering::Relaxed);
        let mut index = HashMap::new();
        for (i, relation) in relations.iter().enumerate() {
            let relation_id = RelationId {
                schema: id,
                index: i,
            };
            if index.insert(relation.name.clone(), relation_id).is_some() {
                return Err(QueryError::InvalidSchema(format!(
                    "duplicate relation '{}'",
                    relation.name
                )));
            }
        }
        let schema = Self {
            id,
            relations,
            index,
        };
        schema.validate()?;
        Ok(schema)
    }

    /// Parse a schema from TOML (`[[relation]]` tables with `[[relation.column]]` entries).
    pub fn from_toml(source: &str) -> QueryResult<Self> {
        let def: SchemaDef =
            toml::from_str(source).map_err(|e| QueryError::InvalidSchema(e.to_string()))?;
        Self::new(def.relations)
    }

    /// Check that every relation link resolves.
    pub fn validate(&self) -> QueryResult<()> {
        for relation in &self.relations {
            let mut seen = HashSet::new();
            for column in &relation.columns {
                if !seen.insert(column.name.as_str()) {
                    return Err(invalid(format!(
                        "duplicate column '{}' on '{}'",
                        column.name, relation.name
                    )));
                }
                if let Some(data_type) = &column.data_type {
                    if !DATA_TYPE.is_match(data_type) {
                        return Err(invalid(format!(
                            "'{}.{}' has an invalid type '{}'",
                            relation.name, column.name, data_type
                        )));
                    }
                }
            }

            if relation.columns.iter().filter(|c| c.primary_key).count() > 1 {
                return Err(invalid(format!(
                    "relation '{}' has more than one primary key",
                    relation.name
                )));
            }
            if relation.column(relation.primary_key()).is_none() {
                return Err(invalid(format!(
                    "relation '{}' has no primary key column '{}'",
                    relation.name,
                    relation.primary_key()
                )));
            }

            for column in &relation.columns {
                match &column.kind {
                    ColumnKind::Scalar => {}
                    ColumnKind::Forward { relation: target } => {
                        if self.get(target).is_none() {
                            return Err(invalid(format!(
                                "'{}.{}' references unknown relation '{}'",
                                relation.name, column.name, target
                            )));
                        }
                    }
                    ColumnKind::Reverse {
                        relation: target,
                        column: via,
                    } => {
                        let related = self.get(target).ok_or_else(|| {
                            invalid(format!(
                                "'{}.{}' reverses unknown relation '{}'",
                                relation.name, column.name, target
                            ))
                        })?;
                        let points_back = matches!(
                            related.column(via).map(|c| &c.kind),
                            Some(ColumnKind::Forward { relation: back }) if *back == relation.name
                        );
                        if !points_back {
                            return Err(invalid(format!(
                                "'{}.{}' needs '{}.{}' to reference '{}'",
                                relation.name, column.name, target, via, relation.name
                            )));
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// The relation behind `id`; ids handed out by another schema are rejected.
    pub fn relation(&self, id: RelationId) -> QueryResult<&Relation> {
        if id.schema != self.id {
            return Err(QueryError::UnknownRelationId(id));
        }
        self.relations
            .get(id.index)
            .ok_or(QueryError::UnknownRelationId(id))
    }

    pub fn relations(&self) -> impl Iterator<Item = &Relation> {
        self.relations.iter()
    }

    pub fn lookup(&self, name: &str) -> Option<RelationId> {
        self.index.get(name).copied()
    }

    pub fn get(&self, name: &str) -> Option<&Relation> {
        self.index.get(name).map(|id| &self.relations[id.index])
    }

    pub fn resolve(&self, name: &str) -> QueryResult<RelationId> {
        self.lookup(name)
            .ok_or_else(|| QueryError::UnknownRelation(name.into()))
    }
}

fn invalid(msg: String) -> QueryError {
    QueryError::InvalidSchema(msg)
}
