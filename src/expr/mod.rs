//! Text expression compiler
//!
//! Lets query operations be supplied as portable source text instead of
//! native closures. The compiler has a two-function surface:
//!
//! - [`parse_lambda`]: source text → [`Lambda`] tree
//! - [`evaluate`]: [`Lambda`] + arguments + scopes → value
//!
//! The grammar is a restricted, JavaScript-flavoured lambda syntax covering
//! member access, comparison, arithmetic, boolean logic and object/array
//! construction:
//!
//! ```text
//! x => x.id > 2
//! (acc, x) => acc + x.count
//! x => x.supplier == name && x.count >= min
//! p => { supplier: p.supplier, total: p.count * 2 }
//! ```
//!
//! Free identifiers that are not parameters resolve against [`Scope`]
//! bindings captured with the expression.

mod ast;
mod eval;
mod parser;

pub use ast::{is_identifier, BinaryOp, Expr, Lambda, UnaryOp};
pub use eval::{evaluate, Scope};
pub use parser::parse_lambda;
