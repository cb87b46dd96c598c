//! Local Sequence Engine
//!
//! The reference [`QueryProvider`](crate::query::QueryProvider): interprets a
//! part chain over an in-memory sequence.
//!
//! - **LocalProvider**: binds the source and implements the provider contract
//! - **Executor**: threads the working collection through the chain
//! - **Operators**: per-operator semantics

mod executor;
mod local;
mod operators;

pub use local::{query_of, LocalProvider};
pub use operators::convert;
