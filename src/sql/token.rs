//! SQL Tokens - the atomic units of SQL output.
//!
//! Every AST node renders to a [`TokenStream`]. Serialization happens in one
//! pass at the end so that placeholders are numbered in exactly the order
//! their arguments are collected.

use serde::{Deserialize, Serialize};

use super::value::Value;

/// Placeholder syntax for bound parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Placeholder {
    /// `$1, $2, ...` (native PostgreSQL protocol)
    #[default]
    Numbered,
    /// `%s` (DB-API style drivers)
    Format,
}

impl Placeholder {
    /// The marker for the `position`-th argument (1-based).
    pub fn marker(&self, position: usize) -> String {
        match self {
            Placeholder::Numbered => format!("${}", position),
            Placeholder::Format => "%s".into(),
        }
    }
}

/// One lexical element of rendered SQL.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    // === Keywords ===
    Select,
    From,
    Where,
    And,
    Or,
    Not,
    As,
    On,
    Join,
    Inner,
    Left,
    Lateral,
    OrderBy,
    Asc,
    Desc,
    Limit,
    Offset,
    In,
    Like,
    Escape,
    IsNull,
    IsNotNull,
    Exists,
    All,
    Union,
    With,
    Recursive,
    True,
    False,
    Cast,

    // === DML Keywords ===
    Insert,
    Into,
    Values,
    Default,
    Update,
    Set,
    Delete,
    Returning,

    // === Session Keywords ===
    Local,
    Role,
    To,

    // === Punctuation ===
    Comma,
    Dot,
    Star,
    LParen,
    RParen,
    Semicolon,

    // === Operators ===
    Eq,
    Ne,
    Lt,
    Gt,
    Lte,
    Gte,
    Plus,
    Overlap,

    // === Whitespace ===
    Space,

    // === Dynamic Content ===
    /// Quoted identifier (table, column, alias)
    Ident(String),
    /// Integer literal
    LitInt(i64),
    /// String literal
    LitString(String),
    /// NULL literal
    LitNull,
    /// Bound parameter, rendered as a placeholder
    Param(Value),

    /// Function name - rendered as-is
    FunctionName(String),
    /// Type name in a cast - rendered as-is
    TypeName(String),
}

impl Token {
    /// Serialize this token. Parameters render as the given marker.
    fn serialize_with(&self, marker: impl FnOnce() -> String) -> String {
        match self {
            Token::Select => "SELECT".into(),
            Token::From => "FROM".into(),
            Token::Where => "WHERE".into(),
            Token::And => "AND".into(),
            Token::Or => "OR".into(),
            Token::Not => "NOT".into(),
            Token::As => "AS".into(),
            Token::On => "ON".into(),
            Token::Join => "JOIN".into(),
            Token::Inner => "INNER".into(),
            Token::Left => "LEFT".into(),
            Token::Lateral => "LATERAL".into(),
            Token::OrderBy => "ORDER BY".into(),
            Token::Asc => "ASC".into(),
            Token::Desc => "DESC".into(),
            Token::Limit => "LIMIT".into(),
            Token::Offset => "OFFSET".into(),
            Token::In => "IN".into(),
            Token::Like => "LIKE".into(),
            Token::Escape => "ESCAPE".into(),
            Token::IsNull => "IS NULL".into(),
            Token::IsNotNull => "IS NOT NULL".into(),
            Token::Exists => "EXISTS".into(),
            Token::All => "ALL".into(),
            Token::Union => "UNION".into(),
            Token::With => "WITH".into(),
            Token::Recursive => "RECURSIVE".into(),
            Token::True => "TRUE".into(),
            Token::False => "FALSE".into(),
            Token::Cast => "CAST".into(),

            Token::Insert => "INSERT".into(),
            Token::Into => "INTO".into(),
            Token::Values => "VALUES".into(),
            Token::Default => "DEFAULT".into(),
            Token::Update => "UPDATE".into(),
            Token::Set => "SET".into(),
            Token::Delete => "DELETE".into(),
            Token::Returning => "RETURNING".into(),

            Token::Local => "LOCAL".into(),
            Token::Role => "ROLE".into(),
            Token::To => "TO".into(),

            Token::Comma => ",".into(),
            Token::Dot => ".".into(),
            Token::Star => "*".into(),
            Token::LParen => "(".into(),
            Token::RParen => ")".into(),
            Token::Semicolon => ";".into(),

            Token::Eq => "=".into(),
            Token::Ne => "<>".into(),
            Token::Lt => "<".into(),
            Token::Gt => ">".into(),
            Token::Lte => "<=".into(),
            Token::Gte => ">=".into(),
            Token::Plus => "+".into(),
            Token::Overlap => "&&".into(),

            Token::Space => " ".into(),

            Token::Ident(name) => quote_identifier(name),
            Token::LitInt(n) => n.to_string(),
            Token::LitString(s) => quote_string(s),
            Token::LitNull => "NULL".into(),
            Token::Param(_) => marker(),

            Token::FunctionName(name) => name.clone(),
            Token::TypeName(name) => name.clone(),
        }
    }
}

/// Quote an identifier, doubling embedded quotes.
pub fn quote_identifier(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Quote a string literal, doubling embedded single quotes.
pub fn quote_string(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

/// A stream of tokens that can be serialized to SQL.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TokenStream {
    tokens: Vec<Token>,
}

impl TokenStream {
    /// Create an empty token stream.
    pub fn new() -> Self {
        Self { tokens: vec![] }
    }

    /// Push a single token.
    pub fn push(&mut self, token: Token) -> &mut Self {
        self.tokens.push(token);
        self
    }

    /// Extend with multiple tokens.
    pub fn extend(&mut self, tokens: impl IntoIterator<Item = Token>) -> &mut Self {
        self.tokens.extend(tokens);
        self
    }

    /// Append another token stream.
    pub fn append(&mut self, other: &TokenStream) -> &mut Self {
        self.tokens.extend(other.tokens.iter().cloned());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Render to SQL text plus the positional arguments, in placeholder order.
    pub fn render(&self, placeholder: Placeholder) -> (String, Vec<Value>) {
        let mut sql = String::new();
        let mut args = Vec::new();
        for token in &self.tokens {
            if let Token::Param(value) = token {
                args.push(value.clone());
            }
            let position = args.len();
            sql.push_str(&token.serialize_with(|| placeholder.marker(position)));
        }
        (sql, args)
    }

    /// Serialize to SQL text with numbered placeholders.
    pub fn serialize(&self) -> String {
        self.render(Placeholder::Numbered).0
    }

    // Convenience methods for common tokens
    pub fn space(&mut self) -> &mut Self {
        self.push(Token::Space)
    }
    pub fn comma(&mut self) -> &mut Self {
        self.push(Token::Comma)
    }
    pub fn lparen(&mut self) -> &mut Self {
        self.push(Token::LParen)
    }
    pub fn rparen(&mut self) -> &mut Self {
        self.push(Token::RParen)
    }

    /// Append `items` separated by `", "`.
    pub fn comma_separated<T>(&mut self, items: &[T], f: impl Fn(&T) -> TokenStream) -> &mut Self {
        for (i, item) in items.iter().enumerate() {
            if i > 0 {
                self.comma().space();
            }
            self.append(&f(item));
        }
        self
    }
}
