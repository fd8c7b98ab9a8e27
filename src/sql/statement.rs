//! Top-level statements and their rendered form.

use serde::Serialize;

use super::dml::{values_tokens, Delete, Insert, Update};
use super::expr::Expr;
use super::query::{Select, Union, With};
use super::token::{Placeholder, Token, TokenStream};
use super::value::Value;

/// `SET LOCAL ...` scoped to the current transaction.
#[derive(Debug, Clone, PartialEq)]
pub enum SetLocal {
    /// `SET LOCAL ROLE "name"`
    Role(String),
    /// `SET LOCAL "app"."user" TO 'value'`
    Variable { name: String, value: Value },
}

impl SetLocal {
    pub fn to_tokens(&self) -> TokenStream {
        let mut ts = TokenStream::new();
        ts.push(Token::Set).space().push(Token::Local).space();
        match self {
            SetLocal::Role(role) => {
                ts.push(Token::Role).space().push(Token::Ident(role.clone()));
            }
            SetLocal::Variable { name, value } => {
                for (i, part) in name.split('.').enumerate() {
                    if i > 0 {
                        ts.push(Token::Dot);
                    }
                    ts.push(Token::Ident(part.into()));
                }
                // SET does not accept bind parameters.
                ts.space()
                    .push(Token::To)
                    .space()
                    .push(Token::LitString(value.to_string()));
            }
        }
        ts
    }
}

/// Any statement the compiler can produce.
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Select(Select),
    Insert(Insert),
    Update(Update),
    Delete(Delete),
    /// Bare `VALUES (...), (...)`
    Values(Vec<Vec<Expr>>),
    Union(Union),
    With(With),
    SetLocal(SetLocal),
    /// Several statements executed in sequence within one transaction.
    Multi(Vec<Statement>),
}

impl Statement {
    pub fn to_tokens(&self) -> TokenStream {
        match self {
            Statement::Select(select) => select.to_tokens(),
            Statement::Insert(insert) => insert.to_tokens(),
            Statement::Update(update) => update.to_tokens(),
            Statement::Delete(delete) => delete.to_tokens(),
            Statement::Values(rows) => {
                let mut ts = TokenStream::new();
                ts.push(Token::Values).space().append(&values_tokens(rows));
                ts
            }
            Statement::Union(union) => union.to_tokens(),
            Statement::With(with) => with.to_tokens(),
            Statement::SetLocal(set) => set.to_tokens(),
            Statement::Multi(parts) => {
                let mut ts = TokenStream::new();
                for (i, part) in parts.iter().enumerate() {
                    if i > 0 {
                        ts.push(Token::Semicolon).space();
                    }
                    ts.append(&part.to_tokens());
                }
                ts
            }
        }
    }

    /// Render this statement as a single SQL text.
    pub fn compile(&self, placeholder: Placeholder) -> Compiled {
        let (sql, args) = self.to_tokens().render(placeholder);
        Compiled { sql, args }
    }

    /// Render this statement as an ordered batch, one entry per `Multi` part.
    ///
    /// Placeholders restart at `$1` in every part since each is sent separately.
    pub fn to_batch(&self, placeholder: Placeholder) -> Batch {
        let parts = match self {
            Statement::Multi(parts) => parts.iter().map(|p| p.compile(placeholder)).collect(),
            other => vec![other.compile(placeholder)],
        };
        Batch { parts }
    }
}

impl From<Select> for Statement {
    fn from(select: Select) -> Self {
        Statement::Select(select)
    }
}

impl From<Insert> for Statement {
    fn from(insert: Insert) -> Self {
        Statement::Insert(insert)
    }
}

impl From<Update> for Statement {
    fn from(update: Update) -> Self {
        Statement::Update(update)
    }
}

impl From<Delete> for Statement {
    fn from(delete: Delete) -> Self {
        Statement::Delete(delete)
    }
}

impl From<Union> for Statement {
    fn from(union: Union) -> Self {
        Statement::Union(union)
    }
}

impl From<With> for Statement {
    fn from(with: With) -> Self {
        Statement::With(with)
    }
}

/// Parameterized SQL text plus its positional arguments.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Compiled {
    pub sql: String,
    pub args: Vec<Value>,
}

/// Statements executed in order inside one transaction.
///
/// Only the last part returns rows.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Batch {
    pub parts: Vec<Compiled>,
}

impl Batch {
    /// Everything before the final statement.
    pub fn prelude(&self) -> &[Compiled] {
        match self.parts.split_last() {
            Some((_, rest)) => rest,
            None => &[],
        }
    }

    /// The statement whose rows are the result.
    pub fn main(&self) -> Option<&Compiled> {
        self.parts.last()
    }
}
