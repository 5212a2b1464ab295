//! Core of the lazy-dataframe SQL backend: an immutable DAG of named SQL
//! fragments, an expression tree that compiles to dialect-correct SQL text,
//! and the generator that linearizes a graph into executable statements.
//!
//! The core never talks to a database. Its only outputs are SQL strings and
//! placeholder-name-to-value maps; execution belongs to the caller.

pub mod dialect;
pub mod expr;
pub mod generate;
pub mod graph;
pub mod model;
pub mod template;
