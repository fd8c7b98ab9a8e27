//! Compilation of builder graphs into single PostgreSQL statements.
//!
//! ```text
//! Query (root + branches)
//!    │ stage branches ─────────────► CTE chain  "t1", "t2", ...
//!    │ flatten root chain
//!    ▼
//! scan ── lookups ──► LEFT JOIN LATERAL "j1", "j2", ...
//!    │
//!    │ push down required columns into the chain
//!    ▼
//! WITH ... SELECT row_to_json("x") FROM (<scan>) AS "x"
//! ```
//!
//! One [`Compiler`](strategy::Compiler) exists per call; aliases, the chain
//! and push-down state never outlive it, so compiling the same graph twice
//! yields the same SQL.

mod alias;
mod chain;
mod lateral;
mod pushdown;
mod strategy;

use serde::Deserialize;
use tracing::debug;

use crate::builder::Query;
use crate::error::QueryResult;
use crate::session::Session;
use crate::sql::statement::{Batch, Compiled, Statement};
use crate::sql::token::Placeholder;

/// Rendering options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CompileOptions {
    pub placeholder: Placeholder,
}

impl CompileOptions {
    pub fn with_placeholder(placeholder: Placeholder) -> Self {
        Self { placeholder }
    }
}

impl Query<'_> {
    /// Lower this query to a statement AST.
    pub fn to_statement(&self) -> QueryResult<Statement> {
        strategy::Compiler::new(self.graph()).compile(self.root(), self.branches())
    }

    /// Compile with `$n` placeholders.
    pub fn compile(&self) -> QueryResult<Compiled> {
        self.compile_with(&CompileOptions::default())
    }

    pub fn compile_with(&self, options: &CompileOptions) -> QueryResult<Compiled> {
        let compiled = self.to_statement()?.compile(options.placeholder);
        debug!(
            sql_len = compiled.sql.len(),
            args = compiled.args.len(),
            "rendered query"
        );
        Ok(compiled)
    }

    /// Compile and prefix the session's `SET LOCAL` statements.
    pub fn prepare(&self, session: &Session, options: &CompileOptions) -> QueryResult<Batch> {
        let statement = session.wrap(self.to_statement()?)?;
        Ok(statement.to_batch(options.placeholder))
    }
}
