//! Lowering builder nodes to statements.
//!
//! Select and filter chains flatten into a single scan. Anything that must
//! run exactly once (mutations, branches, every member of a `Common` but
//! the last) is staged into the CTE chain and read back by alias.

use std::collections::HashMap;

use indexmap::IndexMap;
use tracing::debug;

use super::alias::Aliases;
use super::chain::{CteChain, CteEntry};
use super::lateral::Outer;
use super::pushdown::{push_down, Requirements};
use crate::builder::{NodeHandle, Ordering, Payload, PayloadValue, QueryGraph, QueryNode, Source};
use crate::error::{QueryError, QueryResult};
use crate::filter::{compile_predicate, Predicate, PredicateContext};
use crate::model::{Column, Lookup, Relation, RelationId, Schema, Selection};
use crate::sql::dml::{Assignments, Delete, Insert, Returning, Update};
use crate::sql::expr::{cast, row_to_json, table_col, Expr, OrderByExpr};
use crate::sql::query::{FromItem, Select, SelectExpr, Union, With};
use crate::sql::statement::Statement;
use crate::sql::value::Value;

/// Where a scan reads its rows from.
#[derive(Debug, Clone)]
pub(super) enum Base {
    Relation(RelationId),
    /// A statement already in the CTE chain.
    Staged(String),
    Values {
        columns: Vec<String>,
        rows: Vec<Vec<Value>>,
        /// Declared type per column, from the relation the rows are written to.
        types: Vec<Option<String>>,
    },
    /// Rows added through a reverse column of a staged insert.
    Union {
        members: Vec<String>,
        relation: RelationId,
    },
    /// The working table of a recursive walk.
    Recursive { name: String, relation: RelationId },
}

/// A select/filter chain collapsed into one scan description.
#[derive(Debug, Clone)]
pub(super) struct Flattened {
    pub base: Base,
    pub selection: Selection,
    pub ordering: Vec<Ordering>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    pub predicates: Vec<Predicate>,
}

impl Flattened {
    pub fn of(base: Base, selection: Selection) -> Self {
        Self {
            base,
            selection,
            ordering: vec![],
            limit: None,
            offset: None,
            predicates: vec![],
        }
    }
}

/// A lowered scan plus what is needed to correlate against it.
#[derive(Debug)]
pub(super) struct Scan {
    pub select: Select,
    pub relation: Relation,
    pub qualifier: String,
    /// Staged alias the scan reads, for push-down.
    pub staged: Option<String>,
}

#[derive(Debug, Clone)]
struct ParentRef {
    alias: String,
    key: String,
}

/// The SET / VALUES part shared by inserts and updates.
enum Resolved {
    Columns(Vec<(String, Expr)>),
    Query {
        columns: Vec<String>,
        query: Statement,
    },
}

/// State of one compilation. Discarded afterwards.
pub(crate) struct Compiler<'g> {
    pub(super) graph: &'g QueryGraph,
    pub(super) schema: &'g Schema,
    pub(super) aliases: Aliases,
    chain: CteChain,
    requirements: Requirements,
    staged: HashMap<NodeHandle, String>,
    /// Paged selects staged as raw rows, read back under a later filter.
    pages: HashMap<NodeHandle, String>,
    /// `(parent alias, reverse column)` to the staged child inserts.
    overrides: HashMap<(String, String), Vec<String>>,
    parents: Vec<ParentRef>,
}

impl<'g> Compiler<'g> {
    pub fn new(graph: &'g QueryGraph) -> Self {
        Self {
            graph,
            schema: graph.schema(),
            aliases: Aliases::default(),
            chain: CteChain::default(),
            requirements: Requirements::default(),
            staged: HashMap::new(),
            pages: HashMap::new(),
            overrides: HashMap::new(),
            parents: Vec::new(),
        }
    }

    /// Stage branches, lower the root and wrap the result as JSON rows.
    pub fn compile(mut self, root: Source, branches: &[NodeHandle]) -> QueryResult<Statement> {
        for &branch in branches {
            self.stage(branch)?;
        }
        let terminal = self.scan(root, &[])?;

        push_down(&mut self.chain, &mut self.requirements);
        debug!(
            ctes = self.chain.len(),
            branches = branches.len(),
            "compiled query graph"
        );

        let wrap = Select::new()
            .select(vec![row_to_json("x")])
            .from(FromItem::subquery(terminal.select, "x"));
        if self.chain.is_empty() {
            return Ok(wrap.into());
        }
        Ok(With {
            recursive: false,
            ctes: self.chain.into_ctes(),
            body: Box::new(wrap.into()),
        }
        .into())
    }

    // ---------------------------------------------------------------------
    // Staging
    // ---------------------------------------------------------------------

    /// Put `handle` into the CTE chain, at most once.
    pub(super) fn stage(&mut self, handle: NodeHandle) -> QueryResult<String> {
        if let Some(alias) = self.staged.get(&handle) {
            return Ok(alias.clone());
        }
        let node = self.graph.node(handle)?;

        let (statement, relation, qualifier, base) = match &*node {
            QueryNode::Insert {
                relation, payload, ..
            } => {
                let relation = self.schema.relation(*relation)?.clone();
                let statement = self.render_insert(&relation, payload)?;
                (statement, relation, None, None)
            }
            QueryNode::Update {
                relation,
                payload,
                predicate,
            } => {
                let relation = self.schema.relation(*relation)?.clone();
                let statement = self.render_update(&relation, payload, predicate.as_ref())?;
                (statement, relation, None, None)
            }
            QueryNode::Delete {
                relation,
                predicate,
            } => {
                let relation = self.schema.relation(*relation)?.clone();
                let mut delete = Delete::from(relation.name.as_str())
                    .returning(Returning::columns([relation.primary_key()]));
                if let Some(predicate) = predicate {
                    delete = delete.filter(self.mutation_where(&relation, predicate)?);
                }
                (delete.into(), relation, None, None)
            }
            QueryNode::Common { subqueries } => {
                let mut last = None;
                for &subquery in subqueries {
                    last = Some(self.stage(subquery)?);
                }
                let alias = last.ok_or_else(|| {
                    QueryError::ConflictingArguments("common() needs at least one query".into())
                })?;
                self.staged.insert(handle, alias.clone());
                return Ok(alias);
            }
            QueryNode::Select { .. } | QueryNode::Filter { .. } | QueryNode::Values { .. } => {
                let scan = self.scan(Source::Node(handle), &[])?;
                (
                    Statement::Select(scan.select),
                    scan.relation,
                    Some(scan.qualifier),
                    scan.staged,
                )
            }
        };

        let alias = self.aliases.cte();
        debug!(%handle, %alias, kind = node.kind(), "staged");
        self.chain.push(CteEntry {
            alias: alias.clone(),
            statement,
            relation: relation.clone(),
            qualifier,
            base,
        });
        self.staged.insert(handle, alias.clone());

        match &*node {
            QueryNode::Insert {
                reverse, payload, ..
            } => {
                if let Payload::Values(values) = payload {
                    self.link_forward(&alias, &relation, values)?;
                }
                self.stage_reverse(&alias, &relation, reverse)?;
            }
            QueryNode::Update {
                payload: Payload::Values(values),
                ..
            } => self.link_forward(&alias, &relation, values)?,
            _ => {}
        }
        Ok(alias)
    }

    /// Forward columns of a staged insert or update that a nested insert
    /// fills read that insert back, since rows written in one statement are
    /// invisible to its table scans.
    fn link_forward(
        &mut self,
        alias: &str,
        relation: &Relation,
        values: &IndexMap<String, PayloadValue>,
    ) -> QueryResult<()> {
        for (column, value) in values {
            let PayloadValue::Query(handle) = value else {
                continue;
            };
            if !relation.column(column).is_some_and(Column::is_forward) {
                continue;
            }
            let node = self.graph.node(*handle)?;
            let QueryNode::Select {
                source: Source::Node(inner),
                ..
            } = &*node
            else {
                continue;
            };
            if !self.graph.node(*inner)?.is_mutation() {
                continue;
            }
            if let Some(staged) = self.staged.get(inner).cloned() {
                self.overrides
                    .insert((alias.to_string(), column.clone()), vec![staged]);
            }
        }
        Ok(())
    }

    /// Child inserts of a reverse column, compiled now that the parent has an alias.
    fn stage_reverse(
        &mut self,
        parent: &str,
        relation: &Relation,
        reverse: &IndexMap<String, Vec<NodeHandle>>,
    ) -> QueryResult<()> {
        if reverse.is_empty() {
            return Ok(());
        }
        self.parents.push(ParentRef {
            alias: parent.to_string(),
            key: relation.primary_key().to_string(),
        });
        for (column, children) in reverse {
            let mut members = Vec::with_capacity(children.len());
            for &child in children {
                members.push(self.stage(child)?);
            }
            self.overrides
                .insert((parent.to_string(), column.clone()), members);
        }
        self.parents.pop();
        Ok(())
    }

    pub(super) fn override_members(&self, staged: Option<&str>, column: &str) -> Option<Vec<String>> {
        let alias = staged?;
        self.overrides
            .get(&(alias.to_string(), column.to_string()))
            .cloned()
    }

    /// Record that a reader of `staged` uses `column`.
    pub(super) fn need(&mut self, staged: Option<&str>, column: &str) {
        if let Some(alias) = staged {
            self.requirements.require(alias, column);
        }
    }

    // ---------------------------------------------------------------------
    // Scans
    // ---------------------------------------------------------------------

    pub(super) fn scan(&mut self, source: Source, scope: &[String]) -> QueryResult<Scan> {
        let flat = self.flatten(source)?;
        self.build(flat, scope)
    }

    /// Walk a select/filter chain down to its base.
    ///
    /// The outermost select supplies the shape; inner selections are
    /// superseded. A paged select under a filter or another select is
    /// staged so the paging applies first.
    pub(super) fn flatten(&mut self, source: Source) -> QueryResult<Flattened> {
        self.flatten_within(source, false)
    }

    /// As [`flatten`](Self::flatten); `enclosed` is set when the chain
    /// already sits under a page, so any further page is staged as well.
    fn flatten_within(&mut self, source: Source, enclosed: bool) -> QueryResult<Flattened> {
        let mut outer: Option<(Selection, Vec<Ordering>, Option<u64>, Option<u64>)> = None;
        let mut predicates = Vec::new();
        let mut current = source;

        let base = loop {
            let handle = match current {
                Source::Relation(id) => break Base::Relation(id),
                Source::Node(handle) => handle,
            };
            if let Some(alias) = self.staged.get(&handle) {
                break Base::Staged(alias.clone());
            }
            let node = self.graph.node(handle)?;
            match &*node {
                QueryNode::Select {
                    source,
                    selection,
                    ordering,
                    limit,
                    offset,
                } => {
                    let paged = limit.is_some() || offset.is_some();
                    if paged && (enclosed || outer.is_some() || !predicates.is_empty()) {
                        let page = self.stage_page(handle, *source, ordering, *limit, *offset)?;
                        if outer.is_none() {
                            outer = Some((selection.clone(), ordering.clone(), None, None));
                        }
                        break Base::Staged(page);
                    }
                    if outer.is_none() {
                        outer = Some((selection.clone(), ordering.clone(), *limit, *offset));
                    }
                    current = *source;
                }
                QueryNode::Filter { source, predicate } => {
                    predicates.push(predicate.clone());
                    current = *source;
                }
                QueryNode::Insert { .. } | QueryNode::Update { .. } | QueryNode::Delete { .. } => {
                    break Base::Staged(self.stage(handle)?);
                }
                QueryNode::Common { subqueries } => {
                    let Some((last, rest)) = subqueries.split_last() else {
                        return Err(QueryError::ConflictingArguments(
                            "common() needs at least one query".into(),
                        ));
                    };
                    for &subquery in rest {
                        self.stage(subquery)?;
                    }
                    current = Source::Node(*last);
                }
                QueryNode::Values { columns, rows } => {
                    break Base::Values {
                        columns: columns.clone(),
                        rows: rows.clone(),
                        types: vec![None; columns.len()],
                    }
                }
            }
        };

        // Filters were collected outermost first.
        predicates.reverse();
        let (selection, ordering, limit, offset) = outer.unwrap_or_default();
        Ok(Flattened {
            base,
            selection,
            ordering,
            limit,
            offset,
            predicates,
        })
    }

    /// Stage the rows of a paged select, without its selection.
    ///
    /// Lookups of the page stay with its readers, so filters over the page
    /// correlate against stored columns rather than rendered JSON.
    fn stage_page(
        &mut self,
        handle: NodeHandle,
        source: Source,
        ordering: &[Ordering],
        limit: Option<u64>,
        offset: Option<u64>,
    ) -> QueryResult<String> {
        if let Some(alias) = self.pages.get(&handle) {
            return Ok(alias.clone());
        }
        let mut flat = self.flatten_within(source, true)?;
        flat.selection = Selection::new();
        flat.ordering = ordering.to_vec();
        flat.limit = limit;
        flat.offset = offset;
        let scan = self.build(flat, &[])?;

        let alias = self.aliases.cte();
        debug!(%handle, %alias, "staged page");
        if let Some(base) = &scan.staged {
            let inherited: Vec<_> = self
                .overrides
                .iter()
                .filter(|((parent, _), _)| parent == base)
                .map(|((_, column), members)| ((alias.clone(), column.clone()), members.clone()))
                .collect();
            self.overrides.extend(inherited);
        }
        self.chain.push(CteEntry {
            alias: alias.clone(),
            statement: Statement::Select(scan.select),
            relation: scan.relation,
            qualifier: Some(scan.qualifier),
            base: scan.staged,
        });
        self.pages.insert(handle, alias.clone());
        Ok(alias)
    }

    /// Lower a flattened chain into a SELECT.
    pub(super) fn build(&mut self, flat: Flattened, scope: &[String]) -> QueryResult<Scan> {
        let (from, qualifier, relation, staged) = match flat.base {
            Base::Relation(id) => {
                let relation = self.schema.relation(id)?.clone();
                let qualifier = self.aliases.qualify(&relation.name, scope);
                (table_item(&relation.name, &qualifier), qualifier, relation, None)
            }
            Base::Staged(alias) => {
                let relation = self
                    .chain
                    .get(&alias)
                    .map(|e| e.relation.clone())
                    .unwrap_or_else(|| Relation::new(&alias, vec![]));
                let qualifier = self.aliases.qualify(&alias, scope);
                (table_item(&alias, &qualifier), qualifier, relation, Some(alias))
            }
            Base::Values {
                columns,
                rows,
                types,
            } => {
                let alias = self.aliases.values();
                // Parameters of the first row fix the column types.
                let types: Vec<Option<String>> = types
                    .into_iter()
                    .enumerate()
                    .map(|(i, declared)| declared.or_else(|| values_type(&rows, i)))
                    .collect();
                let rows: Vec<Vec<Expr>> = rows
                    .into_iter()
                    .enumerate()
                    .map(|(r, row)| {
                        row.into_iter()
                            .zip(&types)
                            .map(|(value, data_type)| match data_type {
                                Some(data_type) if r == 0 => cast(Expr::Param(value), data_type),
                                _ => Expr::Param(value),
                            })
                            .collect()
                    })
                    .collect();
                let relation = Relation::new(
                    &alias,
                    columns.iter().map(|c| Column::scalar(c)).collect(),
                );
                let from = FromItem::Subquery {
                    statement: Box::new(Statement::Values(rows)),
                    alias: alias.clone(),
                    columns,
                };
                (from, alias, relation, None)
            }
            Base::Union { members, relation } => {
                let alias = self.aliases.union();
                let parts = members
                    .iter()
                    .map(|member| {
                        self.requirements.require_all(member);
                        Statement::Select(Select::new().from(FromItem::table(member)))
                    })
                    .collect();
                let from = FromItem::subquery(Union::all(parts), &alias);
                (from, alias, self.schema.relation(relation)?.clone(), None)
            }
            Base::Recursive { name, relation } => (
                FromItem::table(&name),
                name,
                self.schema.relation(relation)?.clone(),
                None,
            ),
        };

        let mut inner_scope = scope.to_vec();
        inner_scope.push(qualifier.clone());

        let mut select = Select::new().from(from);

        let schema = self.schema;
        for predicate in &flat.predicates {
            for column in predicate.primary_columns(&relation) {
                self.need(staged.as_deref(), &column);
            }
            let condition =
                compile_predicate(self, schema, predicate, &relation, &qualifier, &inner_scope)?;
            select.and_where(condition);
        }

        if flat.selection.is_empty() {
            if let Some(alias) = &staged {
                self.requirements.require_all(alias);
            }
        }

        let outer = Outer {
            relation: &relation,
            qualifier: &qualifier,
            staged: staged.as_deref(),
            scope: &inner_scope,
        };
        let mut projection = Vec::new();
        for name in flat.selection.field_names() {
            let column = relation.require_column(name)?;
            if column.is_reverse() {
                let (join, item) =
                    self.lookup(&outer, name, &Lookup::Nested(Selection::new()))?;
                select = select.join(join);
                projection.push(item);
            } else {
                self.need(outer.staged, name);
                projection.push(SelectExpr::new(table_col(&qualifier, name)));
            }
        }
        for (name, lookup) in flat.selection.lookups() {
            let (join, item) = self.lookup(&outer, name, lookup)?;
            select = select.join(join);
            projection.push(item);
        }
        select.projection = projection;

        let mut order_by = Vec::with_capacity(flat.ordering.len());
        for ordering in &flat.ordering {
            self.need(staged.as_deref(), &ordering.column);
            let expr = table_col(&qualifier, &ordering.column);
            order_by.push(if ordering.descending {
                OrderByExpr::desc(expr)
            } else {
                OrderByExpr::new(expr)
            });
        }
        select.order_by = order_by;
        select.limit = flat.limit;
        select.offset = flat.offset;

        Ok(Scan {
            select,
            relation,
            qualifier,
            staged,
        })
    }

    /// A one-column sub-select for a value or predicate operand.
    ///
    /// A mutation without a selection yields its primary key.
    pub(super) fn subquery_statement(&mut self, handle: NodeHandle) -> QueryResult<Statement> {
        let node = self.graph.node(handle)?;
        let mut flat = self.flatten(Source::Node(handle))?;
        if node.is_mutation() && flat.selection.is_empty() {
            if let Some(relation) = self.graph.relation_of(Source::Node(handle))? {
                let pk = self.schema.relation(relation)?.primary_key().to_string();
                flat.selection = Selection::fields([pk]);
            }
        }
        Ok(Statement::Select(self.build(flat, &[])?.select))
    }

    // ---------------------------------------------------------------------
    // Mutations
    // ---------------------------------------------------------------------

    fn render_insert(&mut self, relation: &Relation, payload: &Payload) -> QueryResult<Statement> {
        let returning = Returning::columns([relation.primary_key()]);
        let insert = match self.resolve_payload(relation, payload)? {
            Resolved::Columns(columns) if columns.is_empty() => Insert::into(relation.name.as_str()),
            Resolved::Columns(columns) => {
                let (names, values): (Vec<_>, Vec<_>) = columns.into_iter().unzip();
                Insert::into(relation.name.as_str())
                    .columns(names)
                    .values(values)
            }
            Resolved::Query { columns, query } => Insert::into(relation.name.as_str())
                .columns(columns)
                .from_select(query),
        };
        Ok(insert.returning(returning).into())
    }

    fn render_update(
        &mut self,
        relation: &Relation,
        payload: &Payload,
        predicate: Option<&Predicate>,
    ) -> QueryResult<Statement> {
        let set = match self.resolve_payload(relation, payload)? {
            Resolved::Columns(columns) if columns.is_empty() => {
                return Err(QueryError::invalid_value(&relation.name, "nothing to update"))
            }
            Resolved::Columns(columns) => Assignments::Columns(columns),
            Resolved::Query { columns, query } => Assignments::Query {
                columns,
                query: Box::new(query),
            },
        };
        let mut update = Update::table(relation.name.as_str())
            .returning(Returning::columns([relation.primary_key()]));
        update.set = set;
        if let Some(predicate) = predicate {
            update = update.filter(self.mutation_where(relation, predicate)?);
        }
        Ok(update.into())
    }

    fn mutation_where(&mut self, relation: &Relation, predicate: &Predicate) -> QueryResult<Expr> {
        let schema = self.schema;
        let scope = vec![relation.name.clone()];
        compile_predicate(self, schema, predicate, relation, &relation.name, &scope)
    }

    /// Value resolution shared by INSERT and UPDATE.
    fn resolve_payload(&mut self, relation: &Relation, payload: &Payload) -> QueryResult<Resolved> {
        match payload {
            Payload::Values(values) => {
                let mut columns = Vec::with_capacity(values.len());
                for (name, value) in values {
                    columns.push((name.clone(), self.payload_value(name, value)?));
                }
                Ok(Resolved::Columns(columns))
            }
            Payload::Query(handle) => {
                let mut flat = self.flatten(Source::Node(*handle))?;
                if let Base::Values { columns, types, .. } = &mut flat.base {
                    for (column, declared) in columns.iter().zip(types.iter_mut()) {
                        *declared = relation.column(column).and_then(|c| c.data_type.clone());
                    }
                }
                let mut scan = self.build(flat, &[])?;
                let columns: Vec<String> = if scan.select.is_star() {
                    let names: Vec<String> = scan
                        .relation
                        .columns
                        .iter()
                        .filter(|c| !c.is_reverse())
                        .map(|c| c.name.clone())
                        .collect();
                    scan.select.projection = names
                        .iter()
                        .map(|n| SelectExpr::new(table_col(&scan.qualifier, n)))
                        .collect();
                    names
                } else {
                    scan.select.output_names().into_iter().collect()
                };
                for column in &columns {
                    let target = relation.require_column(column)?;
                    if target.is_reverse() {
                        return Err(QueryError::invalid_value(
                            column,
                            "reverse relations cannot be written from a query",
                        ));
                    }
                }
                Ok(Resolved::Query {
                    columns,
                    query: Statement::Select(scan.select),
                })
            }
        }
    }

    fn payload_value(&mut self, column: &str, value: &PayloadValue) -> QueryResult<Expr> {
        match value {
            PayloadValue::Value(value) => Ok(Expr::Param(value.clone())),
            PayloadValue::Query(handle) => {
                Ok(Expr::Subquery(Box::new(self.subquery_statement(*handle)?)))
            }
            PayloadValue::ParentKey => {
                let parent = self.parents.last().cloned().ok_or_else(|| {
                    QueryError::invalid_value(column, "parent key used outside a reverse insert")
                })?;
                self.requirements.require(&parent.alias, &parent.key);
                let key = Select::new()
                    .select(vec![table_col(&parent.alias, &parent.key)])
                    .from(FromItem::table(&parent.alias));
                Ok(Expr::Subquery(Box::new(key.into())))
            }
        }
    }
}

impl PredicateContext for Compiler<'_> {
    fn join_qualifier(&mut self, relation: &str, scope: &[String]) -> String {
        self.aliases.qualify(relation, scope)
    }

    fn subquery(&mut self, handle: NodeHandle) -> QueryResult<Statement> {
        self.subquery_statement(handle)
    }
}

/// The one type shared by the non-null values of a VALUES column.
///
/// Integers mixed with floats read as `double precision`; any other mix is
/// left for the server to resolve.
fn values_type(rows: &[Vec<Value>], index: usize) -> Option<String> {
    let numeric = |t: &str| t == "bigint" || t == "double precision";
    let mut found: Option<String> = None;
    for value in rows.iter().filter_map(|row| row.get(index)) {
        let Some(data_type) = value.sql_type() else {
            continue;
        };
        found = match found {
            None => Some(data_type),
            Some(seen) if seen == data_type => Some(seen),
            Some(seen) if numeric(&seen) && numeric(&data_type) => {
                Some("double precision".into())
            }
            Some(_) => return None,
        };
    }
    found
}

fn table_item(name: &str, qualifier: &str) -> FromItem {
    if name == qualifier {
        FromItem::table(name)
    } else {
        FromItem::aliased(name, qualifier)
    }
}
