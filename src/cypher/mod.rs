//! # Cypher Front-End
//!
//! Lexer and recursive-descent parser producing the clause-sequence AST
//! the planner consumes. Pure functions — no storage access, no state.

pub mod ast;
pub mod lexer;
pub mod parser;

use crate::Result;
use ast::Statement;

/// Parse a Cypher query string into an AST.
pub fn parse(query: &str) -> Result<Statement> {
    let tokens = lexer::tokenize(query)?;
    parser::parse_statement(&tokens)
}
