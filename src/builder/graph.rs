//! The query builder graph.
//!
//! A [`QueryGraph`] is an append-only arena of [`QueryNode`]s. A [`Query`]
//! is a cheap view into it: a root plus the branches that must be staged
//! before the root runs. Every builder operation pushes new nodes and
//! returns a new `Query`; nothing already in the graph changes.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;

use indexmap::IndexMap;
use tracing::trace;

use super::changes::{Change, Changes};
use super::node::{NodeHandle, Ordering, Payload, PayloadValue, QueryNode, Source};
use crate::error::{QueryError, QueryResult};
use crate::filter::Predicate;
use crate::model::{ColumnKind, Lookup, RelationId, Schema, Selection};
use crate::sql::value::Value;

static NEXT_GRAPH_ID: AtomicUsize = AtomicUsize::new(0);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Insert,
    Update,
}

/// Arena of builder nodes for one request.
#[derive(Debug)]
pub struct QueryGraph {
    id: usize,
    schema: Arc<Schema>,
    nodes: RefCell<Vec<Rc<QueryNode>>>,
}

impl QueryGraph {
    pub fn new(schema: impl Into<Arc<Schema>>) -> Self {
        Self {
            id: NEXT_GRAPH_ID.fetch_add(1, AtomicOrdering::Relaxed),
            schema: schema.into(),
            nodes: RefCell::new(Vec::new()),
        }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn len(&self) -> usize {
        self.nodes.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.borrow().is_empty()
    }

    pub(crate) fn push(&self, node: QueryNode) -> NodeHandle {
        let mut nodes = self.nodes.borrow_mut();
        let handle = NodeHandle {
            graph: self.id,
            index: nodes.len(),
        };
        trace!(%handle, kind = node.kind(), "push query node");
        nodes.push(Rc::new(node));
        handle
    }

    /// Look up a node; handles from other graphs are rejected.
    pub fn node(&self, handle: NodeHandle) -> QueryResult<Rc<QueryNode>> {
        if handle.graph != self.id {
            return Err(QueryError::UnknownQueryNode(handle));
        }
        self.nodes
            .borrow()
            .get(handle.index)
            .cloned()
            .ok_or(QueryError::UnknownQueryNode(handle))
    }

    /// Start a query on a relation.
    pub fn table(&self, name: &str) -> QueryResult<Query<'_>> {
        let relation = self.schema.resolve(name)?;
        Ok(Query {
            graph: self,
            root: Source::Relation(relation),
            branches: vec![],
        })
    }

    /// Run every query in order; the last one is the result.
    pub fn common<'g>(&'g self, queries: &[Query<'g>]) -> QueryResult<Query<'g>> {
        if queries.is_empty() {
            return Err(QueryError::ConflictingArguments(
                "common() needs at least one query".into(),
            ));
        }
        let subqueries = queries.iter().map(Query::handle).collect();
        let handle = self.push(QueryNode::Common { subqueries });
        Ok(Query {
            graph: self,
            root: Source::Node(handle),
            branches: vec![],
        })
    }

    /// A literal row set, usable as a select source or insert source.
    pub fn values(&self, columns: &[&str], rows: Vec<Vec<Value>>) -> QueryResult<Query<'_>> {
        if columns.is_empty() {
            return Err(QueryError::invalid_value("values", "no columns given"));
        }
        if rows.is_empty() {
            return Err(QueryError::invalid_value("values", "no rows given"));
        }
        if let Some((i, row)) = rows.iter().enumerate().find(|(_, r)| r.len() != columns.len()) {
            return Err(QueryError::invalid_value(
                "values",
                format!(
                    "row {} has {} values, expected {}",
                    i,
                    row.len(),
                    columns.len()
                ),
            ));
        }
        let handle = self.push(QueryNode::Values {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rows,
        });
        Ok(Query {
            graph: self,
            root: Source::Node(handle),
            branches: vec![],
        })
    }

    /// The relation whose rows `source` produces, if it is backed by one.
    pub fn relation_of(&self, source: Source) -> QueryResult<Option<RelationId>> {
        let mut current = source;
        loop {
            let handle = match current {
                Source::Relation(id) => return Ok(Some(id)),
                Source::Node(handle) => handle,
            };
            current = match &*self.node(handle)? {
                QueryNode::Select { source, .. } | QueryNode::Filter { source, .. } => *source,
                QueryNode::Insert { relation, .. }
                | QueryNode::Update { relation, .. }
                | QueryNode::Delete { relation, .. } => return Ok(Some(*relation)),
                QueryNode::Common { subqueries } => match subqueries.last() {
                    Some(last) => Source::Node(*last),
                    None => return Ok(None),
                },
                QueryNode::Values { .. } => return Ok(None),
            };
        }
    }

    /// Check a selection against the relation it will be read from.
    fn validate_selection(&self, relation: RelationId, selection: &Selection) -> QueryResult<()> {
        let relation = self.schema.relation(relation)?;
        for name in selection.field_names() {
            relation.require_column(name)?;
        }
        for (name, lookup) in selection.lookups() {
            let column = relation.require_column(name)?;
            let Some(target) = column.related_relation() else {
                return Err(QueryError::NotARelation {
                    column: name.into(),
                    relation: relation.name.clone(),
                });
            };
            let target_id = self.schema.resolve(target)?;
            match lookup {
                Lookup::Nested(nested) => self.validate_selection(target_id, nested)?,
                Lookup::Query(handle) => {
                    self.node(*handle)?;
                }
                Lookup::Recursive { selection, .. } => {
                    if target != relation.name {
                        return Err(QueryError::UnsupportedLookup {
                            name: name.into(),
                            reason: format!(
                                "recursive lookups need a self-referencing column, '{}' points at '{}'",
                                name, target
                            ),
                        });
                    }
                    self.validate_selection(target_id, selection)?;
                }
            }
        }
        Ok(())
    }

    /// Resolve changes into a node payload plus any reverse-relation inserts.
    fn build_payload(
        &self,
        relation_id: RelationId,
        changes: Changes,
        mode: Mode,
    ) -> QueryResult<(Payload, IndexMap<String, Vec<NodeHandle>>)> {
        if let Some(source) = changes.source {
            if !changes.entries.is_empty() {
                return Err(QueryError::ConflictingArguments(
                    "column values cannot be combined with a source query".into(),
                ));
            }
            self.node(source)?;
            return Ok((Payload::Query(source), IndexMap::new()));
        }

        let relation = self.schema.relation(relation_id)?;
        let mut values = IndexMap::new();
        let mut reverse = IndexMap::new();

        for (name, change) in changes.entries {
            let column = relation.require_column(&name)?;
            match change {
                Change::Value(value) => {
                    if column.is_reverse() {
                        return Err(QueryError::invalid_value(
                            &name,
                            "reverse relations take a list of rows",
                        ));
                    }
                    values.insert(name, PayloadValue::Value(value));
                }
                Change::Nested(nested) => {
                    let ColumnKind::Forward { relation: target } = &column.kind else {
                        return Err(QueryError::invalid_value(
                            &name,
                            "nested rows need a forward relation column",
                        ));
                    };
                    let target_id = self.schema.resolve(target)?;
                    let (payload, rev) = self.build_payload(target_id, nested, Mode::Insert)?;
                    let insert = self.push(QueryNode::Insert {
                        relation: target_id,
                        payload,
                        reverse: rev,
                    });
                    values.insert(name, PayloadValue::Query(self.key_of(insert)?));
                }
                Change::Query(handle) => {
                    if column.is_reverse() {
                        return Err(QueryError::invalid_value(
                            &name,
                            "reverse relations take a list of rows",
                        ));
                    }
                    values.insert(name, PayloadValue::Query(self.scalar(handle)?));
                }
                Change::Many(rows) => {
                    if mode == Mode::Update {
                        return Err(QueryError::invalid_value(
                            &name,
                            "related rows can only be added on insert",
                        ));
                    }
                    let ColumnKind::Reverse {
                        relation: target,
                        column: via,
                    } = &column.kind
                    else {
                        return Err(QueryError::invalid_value(
                            &name,
                            "a list of rows needs a reverse relation column",
                        ));
                    };
                    let target_id = self.schema.resolve(target)?;
                    let mut handles = Vec::with_capacity(rows.len());
                    for row in rows {
                        if row.contains(via) {
                            return Err(QueryError::ConflictingArguments(format!(
                                "'{}' is set from the parent row of '{}'",
                                via, name
                            )));
                        }
                        let (payload, rev) = self.build_payload(target_id, row, Mode::Insert)?;
                        let Payload::Values(mut child) = payload else {
                            return Err(QueryError::ConflictingArguments(format!(
                                "rows added through '{}' cannot come from a query",
                                name
                            )));
                        };
                        child.insert(via.clone(), PayloadValue::ParentKey);
                        handles.push(self.push(QueryNode::Insert {
                            relation: target_id,
                            payload: Payload::Values(child),
                            reverse: rev,
                        }));
                    }
                    reverse.insert(name, handles);
                }
            }
        }

        Ok((Payload::Values(values), reverse))
    }

    /// Mutations can only be referenced through their committed keys.
    fn scalar(&self, handle: NodeHandle) -> QueryResult<NodeHandle> {
        if self.node(handle)?.is_mutation() {
            self.key_of(handle)
        } else {
            Ok(handle)
        }
    }

    /// `Select(handle, primary key)`
    fn key_of(&self, handle: NodeHandle) -> QueryResult<NodeHandle> {
        let relation = self
            .relation_of(Source::Node(handle))?
            .ok_or_else(|| QueryError::invalid_value("values", "has no primary key"))?;
        let pk = self.schema.relation(relation)?.primary_key().to_string();
        Ok(self.push(QueryNode::select(
            Source::Node(handle),
            Selection::fields([pk]),
        )))
    }
}

/// A persistent view into a [`QueryGraph`].
#[derive(Debug, Clone)]
pub struct Query<'g> {
    pub(crate) graph: &'g QueryGraph,
    pub(crate) root: Source,
    pub(crate) branches: Vec<NodeHandle>,
}

/// The select-shaped parts of a root, for rebuilding it.
struct SelectParts {
    source: Source,
    selection: Selection,
    ordering: Vec<Ordering>,
    limit: Option<u64>,
    offset: Option<u64>,
}

impl SelectParts {
    fn into_node(self) -> QueryNode {
        QueryNode::Select {
            source: self.source,
            selection: self.selection,
            ordering: self.ordering,
            limit: self.limit,
            offset: self.offset,
        }
    }
}

impl<'g> Query<'g> {
    pub fn graph(&self) -> &'g QueryGraph {
        self.graph
    }

    pub fn root(&self) -> Source {
        self.root
    }

    pub fn branches(&self) -> &[NodeHandle] {
        &self.branches
    }

    fn with_node(&self, node: QueryNode) -> Self {
        Self {
            graph: self.graph,
            root: Source::Node(self.graph.push(node)),
            branches: self.branches.clone(),
        }
    }

    fn root_node(&self) -> QueryResult<Option<Rc<QueryNode>>> {
        match self.root {
            Source::Relation(_) => Ok(None),
            Source::Node(handle) => self.graph.node(handle).map(Some),
        }
    }

    fn describe(&self) -> String {
        match self.root_node() {
            Ok(Some(node)) => format!("a {} query", node.kind()),
            Ok(None) | Err(_) => "this query".into(),
        }
    }

    fn select_parts(&self) -> QueryResult<SelectParts> {
        Ok(match self.root_node()?.as_deref() {
            Some(QueryNode::Select {
                source,
                selection,
                ordering,
                limit,
                offset,
            }) => SelectParts {
                source: *source,
                selection: selection.clone(),
                ordering: ordering.clone(),
                limit: *limit,
                offset: *offset,
            },
            _ => SelectParts {
                source: self.root,
                selection: Selection::new(),
                ordering: vec![],
                limit: None,
                offset: None,
            },
        })
    }

    /// A single handle standing for this query, branches included.
    pub fn handle(&self) -> NodeHandle {
        let root = match self.root {
            Source::Node(handle) => handle,
            Source::Relation(_) => self.graph.push(QueryNode::select(self.root, Selection::new())),
        };
        if self.branches.is_empty() {
            return root;
        }
        let mut subqueries = self.branches.clone();
        subqueries.push(root);
        self.graph.push(QueryNode::Common { subqueries })
    }

    /// Replace the selection of this query.
    pub fn select(&self, selection: Selection) -> QueryResult<Self> {
        let mut parts = self.select_parts()?;
        if let Some(relation) = self.graph.relation_of(parts.source)? {
            self.graph.validate_selection(relation, &selection)?;
        }
        parts.selection = selection;
        Ok(self.with_node(parts.into_node()))
    }

    /// Restrict the rows of this query.
    ///
    /// On an update or delete root the predicate is ANDed into its WHERE.
    pub fn filter(&self, predicate: impl Into<Predicate>) -> QueryResult<Self> {
        let predicate = predicate.into();
        for handle in predicate.subqueries() {
            self.graph.node(handle)?;
        }
        let node = match self.root_node()?.as_deref() {
            Some(QueryNode::Update {
                relation,
                payload,
                predicate: existing,
            }) => QueryNode::Update {
                relation: *relation,
                payload: payload.clone(),
                predicate: Some(and_predicates(existing.clone(), predicate)),
            },
            Some(QueryNode::Delete {
                relation,
                predicate: existing,
            }) => QueryNode::Delete {
                relation: *relation,
                predicate: Some(and_predicates(existing.clone(), predicate)),
            },
            _ => QueryNode::Filter {
                source: self.root,
                predicate,
            },
        };
        Ok(self.with_node(node))
    }

    /// Insert one row into the root relation.
    pub fn insert(&self, changes: Changes) -> QueryResult<Self> {
        let Source::Relation(relation) = self.root else {
            return Err(QueryError::NotInsertable(self.describe()));
        };
        let (payload, reverse) = self.graph.build_payload(relation, changes, Mode::Insert)?;
        Ok(self.with_node(QueryNode::Insert {
            relation,
            payload,
            reverse,
        }))
    }

    /// Update the rows of a relation or filtered relation.
    pub fn update(&self, changes: Changes) -> QueryResult<Self> {
        let (relation, predicate) = self.mutation_target()?;
        let (payload, _) = self.graph.build_payload(relation, changes, Mode::Update)?;
        Ok(self.with_node(QueryNode::Update {
            relation,
            payload,
            predicate,
        }))
    }

    /// Delete the rows of a relation or filtered relation.
    pub fn delete(&self) -> QueryResult<Self> {
        let (relation, predicate) = self.mutation_target()?;
        Ok(self.with_node(QueryNode::Delete {
            relation,
            predicate,
        }))
    }

    /// Collapse a chain of filters over a relation into one predicate.
    fn mutation_target(&self) -> QueryResult<(RelationId, Option<Predicate>)> {
        let mut predicates = Vec::new();
        let mut current = self.root;
        loop {
            match current {
                Source::Relation(relation) => {
                    predicates.reverse();
                    let predicate = predicates.into_iter().reduce(Predicate::and);
                    return Ok((relation, predicate));
                }
                Source::Node(handle) => match &*self.graph.node(handle)? {
                    QueryNode::Filter { source, predicate } => {
                        predicates.push(predicate.clone());
                        current = *source;
                    }
                    other => {
                        return Err(QueryError::NotMutable(format!("a {} query", other.kind())))
                    }
                },
            }
        }
    }

    /// Stage this query's root and branches, then continue from `other`.
    pub fn branch(&self, other: &Query<'g>) -> Self {
        let mut branches = self.branches.clone();
        if let Source::Node(handle) = self.root {
            branches.push(handle);
        }
        branches.extend(other.branches.iter().copied());
        Self {
            graph: self.graph,
            root: other.root,
            branches,
        }
    }

    /// Order by a column; a leading `-` sorts descending.
    pub fn order_by(&self, spec: &str) -> QueryResult<Self> {
        let mut parts = self.select_parts()?;
        let ordering = Ordering::parse(spec);
        if let Some(relation) = self.graph.relation_of(parts.source)? {
            let relation = self.graph.schema().relation(relation)?;
            let column = relation.require_column(&ordering.column)?;
            if column.is_reverse() {
                return Err(QueryError::invalid_value(
                    &ordering.column,
                    "cannot order by a reverse relation",
                ));
            }
        }
        parts.ordering.push(ordering);
        Ok(self.with_node(parts.into_node()))
    }

    pub fn limit(&self, limit: u64) -> QueryResult<Self> {
        let mut parts = self.select_parts()?;
        parts.limit = Some(limit);
        Ok(self.with_node(parts.into_node()))
    }

    pub fn offset(&self, offset: u64) -> QueryResult<Self> {
        let mut parts = self.select_parts()?;
        parts.offset = Some(offset);
        Ok(self.with_node(parts.into_node()))
    }
}

fn and_predicates(existing: Option<Predicate>, predicate: Predicate) -> Predicate {
    match existing {
        Some(existing) => existing.and(predicate),
        None => predicate,
    }
}
