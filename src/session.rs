//! Per-request role and variables, applied with `SET LOCAL`.
//!
//! Settings last until the end of the surrounding transaction, so the
//! executor always runs a wrapped statement inside `BEGIN ... COMMIT`.

use std::sync::LazyLock;

use indexmap::IndexMap;
use regex::Regex;
use serde::Deserialize;

use crate::error::{QueryError, QueryResult};
use crate::sql::statement::{SetLocal, Statement};
use crate::sql::value::Value;

/// `app.user_id`, `request.jwt.claims`, ...
static VARIABLE_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)*$").expect("valid regex")
});

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Session {
    pub role: Option<String>,
    pub variables: IndexMap<String, Value>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    pub fn variable(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.variables.insert(name.into(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.role.is_none() && self.variables.is_empty()
    }

    /// Prefix `statement` with this session's settings.
    ///
    /// An empty session returns the statement unchanged.
    pub fn wrap(&self, statement: Statement) -> QueryResult<Statement> {
        if self.is_empty() {
            return Ok(statement);
        }
        let mut parts = Vec::with_capacity(self.variables.len() + 2);
        if let Some(role) = &self.role {
            if role.is_empty() {
                return Err(QueryError::InvalidSession("empty role name".into()));
            }
            parts.push(Statement::SetLocal(SetLocal::Role(role.clone())));
        }
        for (name, value) in &self.variables {
            if !VARIABLE_NAME.is_match(name) {
                return Err(QueryError::InvalidSession(format!(
                    "invalid variable name '{}'",
                    name
                )));
            }
            if matches!(value, Value::Array(_) | Value::Json(_)) {
                return Err(QueryError::InvalidSession(format!(
                    "variable '{}' must be a scalar",
                    name
                )));
            }
            parts.push(Statement::SetLocal(SetLocal::Variable {
                name: name.clone(),
                value: value.clone(),
            }));
        }
        parts.push(statement);
        Ok(Statement::Multi(parts))
    }
}
