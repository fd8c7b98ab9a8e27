//! DML (Data Manipulation Language) support.
//!
//! INSERT, UPDATE and DELETE with PostgreSQL `RETURNING` lists. The
//! `RETURNING` list of a staged mutation is widened after the fact by
//! push-down, so it is modelled as a growable [`Returning`] rather than a
//! fixed expression list.
//!
//! ```ignore
//! let insert = Insert::into("movie")
//!     .columns(["title"])
//!     .values([param("A New Hope")])
//!     .returning(Returning::columns(["id"]));
//! ```

use indexmap::IndexSet;

use super::expr::Expr;
use super::statement::Statement;
use super::token::{Token, TokenStream};

// ============================================================================
// RETURNING
// ============================================================================

/// The `RETURNING` clause of a mutation.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Returning {
    #[default]
    Nothing,
    All,
    Columns(IndexSet<String>),
}

impl Returning {
    pub fn columns(cols: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Returning::Columns(cols.into_iter().map(Into::into).collect())
    }

    /// Widen the clause so that `column` is returned.
    pub fn require(&mut self, column: &str) {
        match self {
            Returning::All => {}
            Returning::Nothing => *self = Returning::columns([column]),
            Returning::Columns(cols) => {
                cols.insert(column.into());
            }
        }
    }

    /// Widen the clause to `RETURNING *`.
    pub fn require_all(&mut self) {
        *self = Returning::All;
    }

    fn to_tokens(&self) -> TokenStream {
        let mut ts = TokenStream::new();
        match self {
            Returning::Nothing => {}
            Returning::All => {
                ts.space().push(Token::Returning).space().push(Token::Star);
            }
            Returning::Columns(cols) => {
                ts.space().push(Token::Returning).space();
                for (i, col) in cols.iter().enumerate() {
                    if i > 0 {
                        ts.comma().space();
                    }
                    ts.push(Token::Ident(col.clone()));
                }
            }
        }
        ts
    }
}

// ============================================================================
// INSERT
// ============================================================================

/// Where the inserted rows come from.
#[derive(Debug, Clone, PartialEq)]
pub enum InsertSource {
    /// `VALUES (...), (...)`
    Values(Vec<Vec<Expr>>),
    /// `INSERT ... SELECT ...`
    Query(Box<Statement>),
    /// `DEFAULT VALUES`
    DefaultValues,
}

/// INSERT statement.
#[derive(Debug, Clone, PartialEq)]
#[must_use = "DML statements have no effect until rendered"]
pub struct Insert {
    pub table: String,
    pub columns: Vec<String>,
    pub source: InsertSource,
    pub returning: Returning,
}

impl Insert {
    /// Create a new INSERT statement.
    pub fn into(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: Vec::new(),
            source: InsertSource::DefaultValues,
            returning: Returning::Nothing,
        }
    }

    /// Set the columns to insert into.
    pub fn columns(mut self, cols: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.columns = cols.into_iter().map(Into::into).collect();
        self
    }

    /// Add a single row of values.
    pub fn values(mut self, vals: impl IntoIterator<Item = impl Into<Expr>>) -> Self {
        let row: Vec<Expr> = vals.into_iter().map(Into::into).collect();
        match &mut self.source {
            InsertSource::Values(rows) => rows.push(row),
            _ => self.source = InsertSource::Values(vec![row]),
        }
        self
    }

    /// Insert from a SELECT query.
    pub fn from_select(mut self, statement: impl Into<Statement>) -> Self {
        self.source = InsertSource::Query(Box::new(statement.into()));
        self
    }

    pub fn returning(mut self, returning: Returning) -> Self {
        self.returning = returning;
        self
    }

    pub fn to_tokens(&self) -> TokenStream {
        let mut ts = TokenStream::new();

        ts.push(Token::Insert)
            .space()
            .push(Token::Into)
            .space()
            .push(Token::Ident(self.table.clone()));

        if !self.columns.is_empty() && !matches!(self.source, InsertSource::DefaultValues) {
            ts.space().lparen();
            for (i, col) in self.columns.iter().enumerate() {
                if i > 0 {
                    ts.comma().space();
                }
                ts.push(Token::Ident(col.clone()));
            }
            ts.rparen();
        }

        match &self.source {
            InsertSource::Values(rows) => {
                ts.space().push(Token::Values).space();
                ts.append(&values_tokens(rows));
            }
            InsertSource::Query(statement) => {
                ts.space().append(&statement.to_tokens());
            }
            InsertSource::DefaultValues => {
                ts.space().push(Token::Default).space().push(Token::Values);
            }
        }

        ts.append(&self.returning.to_tokens());
        ts
    }
}

/// `(a, b), (c, d)`
pub(crate) fn values_tokens(rows: &[Vec<Expr>]) -> TokenStream {
    let mut ts = TokenStream::new();
    for (i, row) in rows.iter().enumerate() {
        if i > 0 {
            ts.comma().space();
        }
        ts.lparen();
        ts.comma_separated(row, Expr::to_tokens);
        ts.rparen();
    }
    ts
}

// ============================================================================
// UPDATE
// ============================================================================

/// The SET clause of an UPDATE.
#[derive(Debug, Clone, PartialEq)]
pub enum Assignments {
    /// `SET "a" = $1, "b" = $2`
    Columns(Vec<(String, Expr)>),
    /// `SET ("a", "b") = (SELECT ...)`
    Query {
        columns: Vec<String>,
        query: Box<Statement>,
    },
}

/// UPDATE statement.
#[derive(Debug, Clone, PartialEq)]
#[must_use = "DML statements have no effect until rendered"]
pub struct Update {
    pub table: String,
    pub set: Assignments,
    pub where_clause: Option<Expr>,
    pub returning: Returning,
}

impl Update {
    /// Create a new UPDATE statement.
    pub fn table(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            set: Assignments::Columns(Vec::new()),
            where_clause: None,
            returning: Returning::Nothing,
        }
    }

    /// Add a SET clause.
    pub fn set(mut self, column: impl Into<String>, value: impl Into<Expr>) -> Self {
        match &mut self.set {
            Assignments::Columns(cols) => cols.push((column.into(), value.into())),
            Assignments::Query { .. } => {
                self.set = Assignments::Columns(vec![(column.into(), value.into())])
            }
        }
        self
    }

    /// Set WHERE clause.
    pub fn filter(mut self, expr: Expr) -> Self {
        self.where_clause = Expr::conjunction(self.where_clause.take().into_iter().chain([expr]));
        self
    }

    pub fn returning(mut self, returning: Returning) -> Self {
        self.returning = returning;
        self
    }

    pub fn to_tokens(&self) -> TokenStream {
        let mut ts = TokenStream::new();

        ts.push(Token::Update)
            .space()
            .push(Token::Ident(self.table.clone()))
            .space()
            .push(Token::Set)
            .space();

        match &self.set {
            Assignments::Columns(cols) => {
                for (i, (col, val)) in cols.iter().enumerate() {
                    if i > 0 {
                        ts.comma().space();
                    }
                    ts.push(Token::Ident(col.clone()))
                        .space()
                        .push(Token::Eq)
                        .space()
                        .append(&val.to_tokens());
                }
            }
            Assignments::Query { columns, query } => {
                ts.lparen();
                for (i, col) in columns.iter().enumerate() {
                    if i > 0 {
                        ts.comma().space();
                    }
                    ts.push(Token::Ident(col.clone()));
                }
                ts.rparen()
                    .space()
                    .push(Token::Eq)
                    .space()
                    .lparen()
                    .append(&query.to_tokens())
                    .rparen();
            }
        }

        if let Some(where_clause) = &self.where_clause {
            ts.space().push(Token::Where).space();
            ts.append(&where_clause.to_tokens());
        }

        ts.append(&self.returning.to_tokens());
        ts
    }
}

// ============================================================================
// DELETE
// ============================================================================

/// DELETE statement.
#[derive(Debug, Clone, PartialEq)]
#[must_use = "DML statements have no effect until rendered"]
pub struct Delete {
    pub table: String,
    pub where_clause: Option<Expr>,
    pub returning: Returning,
}

impl Delete {
    /// Create a new DELETE statement.
    pub fn from(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            where_clause: None,
            returning: Returning::Nothing,
        }
    }

    /// Set WHERE clause.
    pub fn filter(mut self, expr: Expr) -> Self {
        self.where_clause = Expr::conjunction(self.where_clause.take().into_iter().chain([expr]));
        self
    }

    pub fn returning(mut self, returning: Returning) -> Self {
        self.returning = returning;
        self
    }

    pub fn to_tokens(&self) -> TokenStream {
        let mut ts = TokenStream::new();

        ts.push(Token::Delete)
            .space()
            .push(Token::From)
            .space()
            .push(Token::Ident(self.table.clone()));

        if let Some(where_clause) = &self.where_clause {
            ts.space().push(Token::Where).space();
            ts.append(&where_clause.to_tokens());
        }

        ts.append(&self.returning.to_tokens());
        ts
    }
}

// ============================================================================
// Tests
// ============================================================================
