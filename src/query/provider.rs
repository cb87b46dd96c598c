//! Query provider contract
//!
//! The seam between building a query and executing it. A backend implements
//! three operations; operator semantics live in the builder and, for the local
//! backend, in [`crate::engine`].

use crate::query::builder::Query;
use crate::query::error::QueryResult;
use crate::query::part::{PartChain, QueryPart};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

/// Result of executing a chain: the primary value plus side-channel metadata
#[derive(Debug, Clone, PartialEq)]
pub struct Execution {
    /// Primary result (an array for chains ending in `toArray`, a scalar otherwise)
    pub value: Value,
    /// Inline count, when the chain requested one
    pub inline_count: Option<usize>,
}

impl Execution {
    /// Result without metadata
    pub fn plain(value: Value) -> Self {
        Self {
            value,
            inline_count: None,
        }
    }

    /// Result with an inline count
    pub fn counted(value: Value, inline_count: usize) -> Self {
        Self {
            value,
            inline_count: Some(inline_count),
        }
    }
}

/// Execution backend for queries
#[async_trait]
pub trait QueryProvider: Send + Sync {
    /// Create a query bound to this provider with the given chain
    fn create_query(self: Arc<Self>, parts: PartChain) -> Query;

    /// Execute a chain synchronously
    fn execute(&self, parts: &[QueryPart]) -> QueryResult<Execution>;

    /// Execute a chain, resolving later
    async fn execute_async(&self, parts: &[QueryPart]) -> QueryResult<Execution>;
}
