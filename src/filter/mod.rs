//! Predicate compiler: lookup keys to boolean SQL.

pub mod compile;
pub mod lookup;
pub mod predicate;

pub use compile::{compile_predicate, PredicateContext};
pub use lookup::{LookupPath, Operator};
pub use predicate::{Filter, Operand, Predicate};
