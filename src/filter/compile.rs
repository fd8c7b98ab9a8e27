//! Compile predicates into WHERE expressions.
//!
//! Each join segment of a lookup becomes a correlated
//! `EXISTS (SELECT 1 FROM <related> WHERE <link> AND <inner>)`, nested
//! right-to-left around the leaf comparison. Operand values are always bound
//! as parameters.

use super::lookup::{LookupPath, Operator};
use super::predicate::{Operand, Predicate};
use crate::builder::NodeHandle;
use crate::error::{QueryError, QueryResult};
use crate::model::{ColumnKind, Relation, Schema};
use crate::sql::expr::{exists, lit_bool, lit_int, param, table_col, Expr, ExprExt};
use crate::sql::query::{FromItem, Select};
use crate::sql::statement::Statement;
use crate::sql::value::Value;

/// What the predicate compiler needs from the surrounding compilation.
pub trait PredicateContext {
    /// Qualifier for `relation` joined inside a predicate. The bare name
    /// unless that name is already in `scope`.
    fn join_qualifier(&mut self, relation: &str, scope: &[String]) -> String;

    /// Compile a sub-select used as an operand. It must produce one column.
    fn subquery(&mut self, handle: NodeHandle) -> QueryResult<Statement>;
}

/// Compile `predicate` against `relation`, whose columns are qualified by
/// `qualifier`. `scope` lists the qualifiers of enclosing queries.
pub fn compile_predicate<C: PredicateContext + ?Sized>(
    ctx: &mut C,
    schema: &Schema,
    predicate: &Predicate,
    relation: &Relation,
    qualifier: &str,
    scope: &[String],
) -> QueryResult<Expr> {
    let mut scope = scope.to_vec();
    if !scope.iter().any(|s| s == qualifier) {
        scope.push(qualifier.to_string());
    }
    PredicateCompiler { ctx, schema }.compile(predicate, relation, qualifier, &scope)
}

struct PredicateCompiler<'a, C: ?Sized> {
    ctx: &'a mut C,
    schema: &'a Schema,
}

impl<C: PredicateContext + ?Sized> PredicateCompiler<'_, C> {
    fn compile(
        &mut self,
        predicate: &Predicate,
        relation: &Relation,
        qualifier: &str,
        scope: &[String],
    ) -> QueryResult<Expr> {
        match predicate {
            Predicate::Lookup { key, operand } => {
                self.lookup(key, operand, relation, qualifier, scope)
            }
            Predicate::And(items) => {
                let exprs = items
                    .iter()
                    .map(|item| self.compile(item, relation, qualifier, scope))
                    .collect::<QueryResult<Vec<_>>>()?;
                Ok(Expr::conjunction(exprs).unwrap_or_else(|| lit_bool(true)))
            }
            Predicate::Or(items) => {
                let exprs = items
                    .iter()
                    .map(|item| self.compile(item, relation, qualifier, scope))
                    .collect::<QueryResult<Vec<_>>>()?;
                Ok(Expr::disjunction(exprs).unwrap_or_else(|| lit_bool(false)))
            }
            Predicate::Not(inner) => Ok(self.compile(inner, relation, qualifier, scope)?.not()),
        }
    }

    fn lookup(
        &mut self,
        key: &str,
        operand: &Operand,
        relation: &Relation,
        qualifier: &str,
        scope: &[String],
    ) -> QueryResult<Expr> {
        let path = LookupPath::parse(key)?;
        let schema = self.schema;
        let mut scope = scope.to_vec();
        let mut hops: Vec<(FromItem, Expr)> = Vec::with_capacity(path.joins.len());
        let mut owner: &Relation = relation;
        let mut owner_qualifier = qualifier.to_string();

        for segment in &path.joins {
            let column = owner.column(segment).ok_or_else(|| {
                invalid(key, segment, format!("no column '{}' on '{}'", segment, owner.name))
            })?;
            let target_name = match &column.kind {
                ColumnKind::Scalar => {
                    return Err(invalid(
                        key,
                        segment,
                        format!("'{}.{}' is not a relation", owner.name, segment),
                    ))
                }
                ColumnKind::Forward { relation } | ColumnKind::Reverse { relation, .. } => {
                    relation
                }
            };
            let target = schema.get(target_name).ok_or_else(|| {
                invalid(key, segment, format!("unknown relation '{}'", target_name))
            })?;

            let join_qualifier = self.ctx.join_qualifier(&target.name, &scope);
            scope.push(join_qualifier.clone());

            let link = match &column.kind {
                ColumnKind::Reverse { column: via, .. } => table_col(&join_qualifier, via)
                    .eq(table_col(&owner_qualifier, owner.primary_key())),
                _ => table_col(&join_qualifier, target.primary_key())
                    .eq(table_col(&owner_qualifier, segment)),
            };
            let item = if join_qualifier == target.name {
                FromItem::table(&target.name)
            } else {
                FromItem::aliased(&target.name, &join_qualifier)
            };
            hops.push((item, link));

            owner = target;
            owner_qualifier = join_qualifier;
        }

        let mut condition = self.leaf(key, &path, operand, owner, &owner_qualifier)?;
        for (item, link) in hops.into_iter().rev() {
            let inner = Select::new()
                .select(vec![lit_int(1)])
                .from(item)
                .filter(link)
                .filter(condition);
            condition = exists(inner);
        }
        Ok(condition)
    }

    fn leaf(
        &mut self,
        key: &str,
        path: &LookupPath,
        operand: &Operand,
        relation: &Relation,
        qualifier: &str,
    ) -> QueryResult<Expr> {
        let field = path.field.as_str();
        let column = relation.column(field).ok_or_else(|| {
            invalid(key, field, format!("no column '{}' on '{}'", field, relation.name))
        })?;
        if column.is_reverse() {
            return Err(invalid(
                key,
                field,
                format!("'{}' is a reverse relation; add a field segment", field),
            ));
        }
        let target = table_col(qualifier, field);

        let rhs = match operand {
            Operand::Query(handle) => {
                let subquery = self.ctx.subquery(*handle)?;
                return match path.op {
                    Operator::Eq => Ok(target.eq(Expr::Subquery(Box::new(subquery)))),
                    Operator::In => Ok(target.in_subquery(subquery, false)),
                    Operator::NotIn => Ok(target.in_subquery(subquery, true)),
                    op => Err(invalid(
                        key,
                        op.suffix(),
                        "only eq, in and ni accept a sub-query".into(),
                    )),
                };
            }
            Operand::Value(value) => Rhs::Value(value),
            Operand::Expr(expr) => Rhs::Expr(expr),
        };

        match (path.op, rhs) {
            (Operator::Eq, Rhs::Value(Value::Null)) => Ok(target.is_null()),
            (Operator::Ne, Rhs::Value(Value::Null)) => Ok(target.is_not_null()),
            (Operator::Eq, other) => Ok(target.eq(other.to_expr())),
            (Operator::Ne, other) => Ok(target.ne(other.to_expr())),
            (Operator::Lt | Operator::Gt | Operator::Le | Operator::Ge, Rhs::Value(Value::Null)) => {
                Err(invalid(key, path.op.suffix(), "cannot order against null".into()))
            }
            (Operator::Lt, other) => Ok(target.lt(other.to_expr())),
            (Operator::Gt, other) => Ok(target.gt(other.to_expr())),
            (Operator::Le, other) => Ok(target.lte(other.to_expr())),
            (Operator::Ge, other) => Ok(target.gte(other.to_expr())),
            (op @ (Operator::In | Operator::NotIn), Rhs::Value(Value::Array(items))) => {
                let values = items.iter().cloned().map(Expr::Param).collect();
                Ok(if op == Operator::In {
                    target.in_list(values)
                } else {
                    target.not_in_list(values)
                })
            }
            (op @ (Operator::In | Operator::NotIn), Rhs::Expr(expr)) => {
                Ok(if op == Operator::In {
                    target.in_list(vec![expr.clone()])
                } else {
                    target.not_in_list(vec![expr.clone()])
                })
            }
            (op @ (Operator::In | Operator::NotIn), _) => {
                Err(invalid(key, op.suffix(), "expects a list".into()))
            }
            (Operator::Contains, Rhs::Value(Value::Text(text))) => Ok(
                target.like_escape(param(format!("%{}%", escape_like(text))), '\\'),
            ),
            (Operator::Contains, _) => Err(invalid(key, "ct", "expects text".into())),
            (Operator::IsNull, Rhs::Value(Value::Bool(true))) => Ok(target.is_null()),
            (Operator::IsNull, Rhs::Value(Value::Bool(false))) => Ok(target.is_not_null()),
            (Operator::IsNull, _) => Err(invalid(key, "nu", "expects a boolean".into())),
            (Operator::Overlap, Rhs::Value(value @ Value::Array(_))) => {
                Ok(target.overlaps(Expr::Param(value.clone())))
            }
            (Operator::Overlap, Rhs::Expr(expr)) => Ok(target.overlaps(expr.clone())),
            (Operator::Overlap, _) => Err(invalid(key, "ov", "expects a list".into())),
        }
    }
}

/// The right-hand side of a comparison, once sub-selects are split off.
#[derive(Clone, Copy)]
enum Rhs<'a> {
    Value(&'a Value),
    Expr(&'a Expr),
}

impl Rhs<'_> {
    fn to_expr(self) -> Expr {
        match self {
            Rhs::Value(value) => Expr::Param(value.clone()),
            Rhs::Expr(expr) => expr.clone(),
        }
    }
}

/// Escape LIKE metacharacters for use with `ESCAPE '\'`.
fn escape_like(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn invalid(lookup: &str, segment: &str, reason: String) -> QueryError {
    QueryError::InvalidFilterLookup {
        lookup: lookup.into(),
        segment: segment.into(),
        reason,
    }
}
