//! Relation lookups as lateral joins.
//!
//! Forward columns surface as one nested object, reverse columns as an
//! array, recursive walks as an array ordered by depth:
//!
//! ```text
//! LEFT JOIN LATERAL (SELECT .. FROM "address" WHERE "address"."id" = "actor"."address") AS "j1" ON TRUE
//!     -> row_to_json("j1") AS "address"
//!
//! LEFT JOIN LATERAL (SELECT coalesce(array_agg(row_to_json("a1")), '{}') AS "value"
//!                    FROM (SELECT .. FROM "actor" WHERE "actor"."movie" = "movie"."id") AS "a1") AS "j1" ON TRUE
//!     -> "j1"."value" AS "actors"
//! ```

use super::strategy::{Base, Compiler, Flattened};
use crate::builder::Source;
use crate::error::{QueryError, QueryResult};
use crate::model::{Column, ColumnKind, Lookup, Relation, RelationId, Selection};
use crate::sql::expr::{
    array_agg, coalesce, lit_int, lit_str, row_to_json, table_col, table_star, BinaryOperator,
    Expr, ExprExt, OrderByExpr,
};
use crate::sql::query::{Cte, FromItem, Join, JoinType, Select, SelectExpr, Union, With};

/// The row a lookup is correlated with.
pub(super) struct Outer<'a> {
    pub relation: &'a Relation,
    pub qualifier: &'a str,
    pub staged: Option<&'a str>,
    /// Qualifiers visible to the lookup, the outer one included.
    pub scope: &'a [String],
}

impl Compiler<'_> {
    /// Compile one lookup into a join plus the projected item.
    pub(super) fn lookup(
        &mut self,
        outer: &Outer<'_>,
        name: &str,
        lookup: &Lookup,
    ) -> QueryResult<(Join, SelectExpr)> {
        let column = outer.relation.require_column(name)?;
        let Some(target_name) = column.related_relation() else {
            return Err(QueryError::NotARelation {
                column: name.into(),
                relation: outer.relation.name.clone(),
            });
        };
        let target = self.schema.resolve(target_name)?;
        let lateral = self.aliases.lateral();

        let flat = match lookup {
            Lookup::Nested(selection) => {
                let base = match self.override_members(outer.staged, name) {
                    Some(members) => Base::Union {
                        members,
                        relation: target,
                    },
                    None => Base::Relation(target),
                };
                Flattened::of(base, selection.clone())
            }
            Lookup::Query(handle) => self.flatten(Source::Node(*handle))?,
            Lookup::Recursive {
                selection,
                max_depth,
            } => {
                return self.recursive(outer, name, column, target, selection, *max_depth, lateral)
            }
        };

        let mut inner = self.build(flat, outer.scope)?;
        match &column.kind {
            ColumnKind::Reverse { column: via, .. } => {
                let pk = outer.relation.primary_key();
                self.need(outer.staged, pk);
                self.need(inner.staged.as_deref(), via);
                inner
                    .select
                    .and_where(table_col(&inner.qualifier, via).eq(table_col(outer.qualifier, pk)));

                let rows = self.aliases.aggregate();
                let aggregate = Select::new()
                    .select(vec![aggregate_rows(&rows, vec![]).alias("value")])
                    .from(FromItem::subquery(inner.select, &rows));
                Ok((
                    Join::left_lateral(aggregate, &lateral),
                    table_col(&lateral, "value").alias(name),
                ))
            }
            _ => {
                let pk = inner.relation.primary_key().to_string();
                self.need(outer.staged, name);
                self.need(inner.staged.as_deref(), &pk);
                inner
                    .select
                    .and_where(table_col(&inner.qualifier, &pk).eq(table_col(outer.qualifier, name)));
                Ok((
                    Join::left_lateral(inner.select, &lateral),
                    row_to_json(&lateral).alias(name),
                ))
            }
        }
    }

    /// Walk a self-referencing column with `WITH RECURSIVE`.
    ///
    /// The root pass selects the rows linked to the outer row; the
    /// recursive term joins the relation back onto the working table on the
    /// same link. Rows carry a `depth` starting at 1. Cyclic data needs
    /// `max_depth`.
    #[allow(clippy::too_many_arguments)]
    fn recursive(
        &mut self,
        outer: &Outer<'_>,
        name: &str,
        column: &Column,
        target: RelationId,
        selection: &Selection,
        max_depth: Option<u32>,
        lateral: String,
    ) -> QueryResult<(Join, SelectExpr)> {
        let relation = self.schema.relation(target)?.clone();
        if relation.name != outer.relation.name {
            return Err(QueryError::UnsupportedLookup {
                name: name.into(),
                reason: format!("'{}' does not reference '{}'", name, outer.relation.name),
            });
        }
        let pk = relation.primary_key().to_string();
        let reverse = column.is_reverse();
        let via = match &column.kind {
            ColumnKind::Reverse { column, .. } => column.clone(),
            _ => name.to_string(),
        };
        // Row `row` is linked to the row `from` it was reached from.
        let link = |row: &str, from: &str| {
            if reverse {
                table_col(row, &via).eq(table_col(from, &pk))
            } else {
                table_col(row, &pk).eq(table_col(from, &via))
            }
        };
        self.need(outer.staged, if reverse { &pk } else { &via });

        let working = self.aliases.recursive();
        let first = self.aliases.relation();
        let next = self.aliases.relation();
        let depth = table_col(&working, "depth");

        let root = Select::new()
            .select(vec![
                SelectExpr::new(table_star(&first)),
                lit_int(1).alias("depth"),
            ])
            .from(FromItem::aliased(&relation.name, &first))
            .filter(link(&first, outer.qualifier));

        let mut step = Select::new()
            .select(vec![
                SelectExpr::new(table_star(&next)),
                Expr::BinaryOp {
                    left: Box::new(depth.clone()),
                    op: BinaryOperator::Plus,
                    right: Box::new(lit_int(1)),
                }
                .alias("depth"),
            ])
            .from(FromItem::aliased(&relation.name, &next))
            .join(Join {
                join_type: JoinType::Inner,
                lateral: false,
                item: FromItem::table(&working),
                on: Some(link(&next, &working)),
            });
        if let Some(max_depth) = max_depth {
            step = step.filter(depth.lt(lit_int(i64::from(max_depth))));
        }

        let mut scope = outer.scope.to_vec();
        scope.push(working.clone());
        let mut walked = self.build(
            Flattened::of(
                Base::Recursive {
                    name: working.clone(),
                    relation: target,
                },
                selection.clone(),
            ),
            &scope,
        )?;
        if !walked.select.is_star() {
            walked
                .select
                .projection
                .push(SelectExpr::new(table_col(&walked.qualifier, "depth")));
        }

        let rows = self.aliases.aggregate();
        let aggregate = Select::new()
            .select(vec![aggregate_rows(
                &rows,
                vec![OrderByExpr::new(table_col(&rows, "depth"))],
            )
            .alias("value")])
            .from(FromItem::subquery(walked.select, &rows));

        let with = With {
            recursive: true,
            ctes: vec![Cte::new(
                &working,
                Union::all(vec![root.into(), step.into()]),
            )],
            body: Box::new(aggregate.into()),
        };
        Ok((
            Join::left_lateral(with, &lateral),
            table_col(&lateral, "value").alias(name),
        ))
    }
}

/// `coalesce(array_agg(row_to_json("a1") [ORDER BY ..]), '{}')`
fn aggregate_rows(alias: &str, order_by: Vec<OrderByExpr>) -> Expr {
    coalesce(vec![array_agg(row_to_json(alias), order_by), lit_str("{}")])
}
