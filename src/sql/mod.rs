//! SQL generation module.
//!
//! A type-safe PostgreSQL builder. It includes:
//!
//! - [`value`] - Bound argument values
//! - [`token`] - Token types and placeholder rendering
//! - [`expr`] - Expression AST and builder DSL
//! - [`query`] - SELECT, FROM items, lateral joins, CTEs
//! - [`dml`] - Data Manipulation Language (INSERT, UPDATE, DELETE)
//! - [`statement`] - Top-level statements and compiled batches

pub mod dml;
pub mod expr;
pub mod query;
pub mod statement;
pub mod token;
pub mod value;


// Re-export commonly used types at the sql module level
pub use dml::{Assignments, Delete, Insert, InsertSource, Returning, Update};
pub use expr::{
    array_agg, coalesce, col, exists, func, lit_bool, lit_int, lit_str, param, row_to_json, star,
    table_col, table_star, BinaryOperator, Expr, ExprExt, Literal, OrderByExpr, SortDir,
    UnaryOperator,
};
pub use query::{Cte, FromItem, Join, JoinType, Select, SelectExpr, Union, With};
pub use statement::{Batch, Compiled, SetLocal, Statement};
pub use token::{Placeholder, Token, TokenStream};
pub use value::Value;
