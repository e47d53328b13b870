//! Conflux configuration language.
//!
//! Parses `.cfx` files into a block AST and evaluates block bodies against
//! component argument schemas.
//!
//! # Pipeline
//!
//! - [`lexer`] — logos tokenization
//! - [`parser`] — hand-written recursive descent + Pratt expressions
//! - [`ast`] — blocks, attributes, expressions with spans and fingerprints
//! - [`value`] — the dynamic value union with coercion
//! - [`schema`] — component argument schemas and the coerced record
//! - [`eval`] — scope-based evaluation and reference extraction

pub mod ast;
pub mod error;
pub mod eval;
pub mod lexer;
pub mod parser;
pub mod schema;
pub mod span;
pub mod value;

pub use ast::{Attribute, Block, Body, Expr, ExprKind, File, Path, Stmt};
pub use error::EvalError;
pub use eval::{Scope, body_references, evaluate_block, evaluate_expr};
pub use parser::{ParseError, parse_expr_text, parse_file};
pub use schema::{ArgsSchema, Arguments, AttrSpec, BlockSpec};
pub use span::Span;
pub use value::{Capsule, Secret, Value, ValueKind};
