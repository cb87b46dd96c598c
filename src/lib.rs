//! # querychain
//!
//! Deferred, composable queries over in-memory sequences.
//!
//! A [`Query`] records a chain of operator invocations without running them.
//! A terminal call (`to_array`, `first`, `count`, ...) hands the chain to a
//! [`QueryProvider`], which interprets it and returns the result. Operator
//! arguments are native closures or portable text lambdas such as
//! `"x => x.id > 2"`, so the same chain could be shipped to a remote backend.
//!
//! ## Modules
//!
//! - [`query`]: query builder, parts and the provider contract
//! - [`engine`]: the in-memory provider
//! - [`expr`]: text lambda parser and evaluator
//! - [`value`]: value semantics shared by the engine and the evaluator
//! - [`config`]: CLI configuration
//!
//! ## Quick Start
//!
//! ```rust
//! use querychain::{query_of, PartArgument};
//! use serde_json::json;
//!
//! let orders = vec![
//!     json!({"id": 1, "supplier": "QWE", "count": 4}),
//!     json!({"id": 2, "supplier": "BNM", "count": 67}),
//!     json!({"id": 3, "supplier": "BNM", "count": 13}),
//!     json!({"id": 4, "supplier": "TYU", "count": 8}),
//!     json!({"id": 5, "supplier": "FGH", "count": 34}),
//! ];
//!
//! let page = query_of(orders)
//!     .inline_count()
//!     .where_("o => o.id > 2")
//!     .skip(1)
//!     .take(2)
//!     .to_array()
//!     .unwrap();
//!
//! assert_eq!(page.inline_count, 3);
//! assert_eq!(page.value.len(), 2);
//! ```

pub mod config;
pub mod engine;
pub mod expr;
pub mod query;
pub mod value;

// Re-export top-level types for convenience
pub use engine::{query_of, LocalProvider};

pub use expr::{evaluate, parse_lambda, Lambda, Scope};

pub use query::{
    Counted, Execution, Grouping, PartArgument, PartChain, Plain, Query, QueryError, QueryFunc,
    QueryPart, QueryProvider, QueryResult, WithCount,
};

pub use value::ValueKind;
