//! SELECT-side AST: projections, FROM items, lateral joins, CTEs and unions.

use indexmap::IndexSet;

use super::expr::{Expr, OrderByExpr};
use super::statement::Statement;
use super::token::{Token, TokenStream};

// =============================================================================
// Select Expression (column with optional alias)
// =============================================================================

/// A SELECT list item: expression with optional alias.
#[derive(Debug, Clone, PartialEq)]
#[must_use = "builders have no effect until used"]
pub struct SelectExpr {
    pub expr: Expr,
    pub alias: Option<String>,
}

impl SelectExpr {
    pub fn new(expr: Expr) -> Self {
        Self { expr, alias: None }
    }

    /// The column name this item produces in the result set, if it is knowable.
    pub fn output_name(&self) -> Option<&str> {
        match (&self.alias, &self.expr) {
            (Some(alias), _) => Some(alias),
            (None, Expr::Column { column, .. }) => Some(column),
            _ => None,
        }
    }

    pub fn to_tokens(&self) -> TokenStream {
        let mut ts = self.expr.to_tokens();
        if let Some(alias) = &self.alias {
            ts.space()
                .push(Token::As)
                .space()
                .push(Token::Ident(alias.clone()));
        }
        ts
    }
}

impl From<Expr> for SelectExpr {
    fn from(expr: Expr) -> Self {
        SelectExpr::new(expr)
    }
}

// =============================================================================
// FROM items
// =============================================================================

/// Something a SELECT reads rows from.
#[derive(Debug, Clone, PartialEq)]
pub enum FromItem {
    /// A table or CTE name: `"movie"` / `"movie" AS "r1"`
    Table { name: String, alias: Option<String> },
    /// A derived table: `(<statement>) AS "x"("a", "b")`
    Subquery {
        statement: Box<Statement>,
        alias: String,
        columns: Vec<String>,
    },
}

impl FromItem {
    pub fn table(name: &str) -> Self {
        FromItem::Table {
            name: name.into(),
            alias: None,
        }
    }

    pub fn aliased(name: &str, alias: &str) -> Self {
        FromItem::Table {
            name: name.into(),
            alias: Some(alias.into()),
        }
    }

    pub fn subquery(statement: impl Into<Statement>, alias: &str) -> Self {
        FromItem::Subquery {
            statement: Box::new(statement.into()),
            alias: alias.into(),
            columns: vec![],
        }
    }

    /// The name columns of this item are qualified with.
    pub fn qualifier(&self) -> &str {
        match self {
            FromItem::Table {
                alias: Some(alias), ..
            } => alias,
            FromItem::Table { name, .. } => name,
            FromItem::Subquery { alias, .. } => alias,
        }
    }

    pub fn to_tokens(&self) -> TokenStream {
        let mut ts = TokenStream::new();
        match self {
            FromItem::Table { name, alias } => {
                ts.push(Token::Ident(name.clone()));
                if let Some(alias) = alias {
                    ts.space()
                        .push(Token::As)
                        .space()
                        .push(Token::Ident(alias.clone()));
                }
            }
            FromItem::Subquery {
                statement,
                alias,
                columns,
            } => {
                ts.lparen()
                    .append(&statement.to_tokens())
                    .rparen()
                    .space()
                    .push(Token::As)
                    .space()
                    .push(Token::Ident(alias.clone()));
                if !columns.is_empty() {
                    ts.lparen();
                    ts.comma_separated(columns, |c| ident(c));
                    ts.rparen();
                }
            }
        }
        ts
    }
}

fn ident(name: &str) -> TokenStream {
    let mut ts = TokenStream::new();
    ts.push(Token::Ident(name.into()));
    ts
}

// =============================================================================
// Joins
// =============================================================================

/// Type of join.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinType {
    Inner,
    Left,
}

/// A JOIN clause, optionally LATERAL.
#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    pub join_type: JoinType,
    pub lateral: bool,
    pub item: FromItem,
    pub on: Option<Expr>,
}

impl Join {
    /// `LEFT JOIN LATERAL (<statement>) AS "alias" ON TRUE`
    pub fn left_lateral(statement: impl Into<Statement>, alias: &str) -> Self {
        Self {
            join_type: JoinType::Left,
            lateral: true,
            item: FromItem::subquery(statement, alias),
            on: Some(Expr::from(true)),
        }
    }

    pub fn to_tokens(&self) -> TokenStream {
        let mut ts = TokenStream::new();

        match self.join_type {
            JoinType::Inner => ts.push(Token::Inner),
            JoinType::Left => ts.push(Token::Left),
        };

        ts.space().push(Token::Join).space();
        if self.lateral {
            ts.push(Token::Lateral).space();
        }
        ts.append(&self.item.to_tokens());

        if let Some(on) = &self.on {
            ts.space().push(Token::On).space();
            ts.append(&on.to_tokens());
        }

        ts
    }
}

// =============================================================================
// SELECT
// =============================================================================

/// A SELECT statement. An empty projection renders as `*`.
#[derive(Debug, Clone, Default, PartialEq)]
#[must_use = "Select has no effect until rendered"]
pub struct Select {
    pub projection: Vec<SelectExpr>,
    pub from: Option<FromItem>,
    pub joins: Vec<Join>,
    pub where_clause: Option<Expr>,
    pub order_by: Vec<OrderByExpr>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

impl Select {
    /// Create a new empty query.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the SELECT list.
    pub fn select(mut self, exprs: Vec<impl Into<SelectExpr>>) -> Self {
        self.projection = exprs.into_iter().map(Into::into).collect();
        self
    }

    /// Set the FROM item.
    pub fn from(mut self, item: FromItem) -> Self {
        self.from = Some(item);
        self
    }

    /// Add a JOIN.
    pub fn join(mut self, join: Join) -> Self {
        self.joins.push(join);
        self
    }

    /// Add a WHERE condition, ANDed with any existing one.
    pub fn filter(mut self, condition: Expr) -> Self {
        self.and_where(condition);
        self
    }

    pub fn and_where(&mut self, condition: Expr) {
        self.where_clause = Expr::conjunction(self.where_clause.take().into_iter().chain([condition]));
    }

    /// Set the ORDER BY clause.
    pub fn order_by(mut self, exprs: Vec<OrderByExpr>) -> Self {
        self.order_by = exprs;
        self
    }

    /// Set LIMIT.
    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Set OFFSET.
    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Whether this select projects every column of its source.
    pub fn is_star(&self) -> bool {
        self.projection.is_empty()
            || self
                .projection
                .iter()
                .any(|p| matches!(p.expr, Expr::Star { .. }) && p.alias.is_none())
    }

    /// Names of the columns this select produces.
    pub fn output_names(&self) -> IndexSet<String> {
        self.projection
            .iter()
            .filter_map(|p| p.output_name().map(String::from))
            .collect()
    }

    /// Make sure `qualifier.column` is part of the projection.
    ///
    /// No-op when the select already projects `*` or a column of that name.
    pub fn ensure_column(&mut self, qualifier: &str, column: &str) {
        if self.is_star() || self.output_names().contains(column) {
            return;
        }
        self.projection.push(SelectExpr::new(Expr::Column {
            table: Some(qualifier.into()),
            column: column.into(),
        }));
    }

    pub fn to_tokens(&self) -> TokenStream {
        let mut ts = TokenStream::new();

        ts.push(Token::Select).space();

        if self.projection.is_empty() {
            ts.push(Token::Star);
        } else {
            ts.comma_separated(&self.projection, SelectExpr::to_tokens);
        }

        if let Some(from) = &self.from {
            ts.space().push(Token::From).space();
            ts.append(&from.to_tokens());
        }

        for join in &self.joins {
            ts.space();
            ts.append(&join.to_tokens());
        }

        if let Some(where_clause) = &self.where_clause {
            ts.space().push(Token::Where).space();
            ts.append(&where_clause.to_tokens());
        }

        if !self.order_by.is_empty() {
            ts.space().push(Token::OrderBy).space();
            ts.comma_separated(&self.order_by, OrderByExpr::to_tokens);
        }

        if let Some(limit) = self.limit {
            ts.space()
                .push(Token::Limit)
                .space()
                .push(Token::LitInt(limit as i64));
        }

        if let Some(offset) = self.offset {
            ts.space()
                .push(Token::Offset)
                .space()
                .push(Token::LitInt(offset as i64));
        }

        ts
    }
}

// =============================================================================
// CTE (Common Table Expression)
// =============================================================================

/// A Common Table Expression (one entry of a WITH clause).
#[derive(Debug, Clone, PartialEq)]
pub struct Cte {
    pub name: String,
    pub statement: Box<Statement>,
}

impl Cte {
    pub fn new(name: &str, statement: impl Into<Statement>) -> Self {
        Self {
            name: name.into(),
            statement: Box::new(statement.into()),
        }
    }

    pub fn to_tokens(&self) -> TokenStream {
        let mut ts = TokenStream::new();
        ts.push(Token::Ident(self.name.clone()))
            .space()
            .push(Token::As)
            .space()
            .lparen()
            .append(&self.statement.to_tokens())
            .rparen();

        ts
    }
}

/// `WITH [RECURSIVE] cte, ... <body>`
#[derive(Debug, Clone, PartialEq)]
pub struct With {
    pub recursive: bool,
    pub ctes: Vec<Cte>,
    pub body: Box<Statement>,
}

impl With {
    pub fn to_tokens(&self) -> TokenStream {
        let mut ts = TokenStream::new();
        if !self.ctes.is_empty() {
            ts.push(Token::With).space();
            if self.recursive {
                ts.push(Token::Recursive).space();
            }
            ts.comma_separated(&self.ctes, Cte::to_tokens);
            ts.space();
        }
        ts.append(&self.body.to_tokens());
        ts
    }
}

/// `member UNION [ALL] member ...`
#[derive(Debug, Clone, PartialEq)]
pub struct Union {
    pub members: Vec<Statement>,
    pub all: bool,
}

impl Union {
    pub fn all(members: Vec<Statement>) -> Self {
        Self { members, all: true }
    }

    pub fn to_tokens(&self) -> TokenStream {
        let mut ts = TokenStream::new();
        for (i, member) in self.members.iter().enumerate() {
            if i > 0 {
                ts.space().push(Token::Union).space();
                if self.all {
                    ts.push(Token::All).space();
                }
            }
            ts.append(&member.to_tokens());
        }
        ts
    }
}
