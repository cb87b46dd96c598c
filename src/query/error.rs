//! Query error types
//!
//! Defines all error conditions that can occur while building or executing a
//! query. Synchronous and asynchronous execution report the same variants.

use thiserror::Error;

/// Errors that can occur during query operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueryError {
    /// A part or part argument was built without its required fields
    #[error("Construction error: {0}")]
    Construction(String),

    /// Expression source text could not be parsed
    #[error("Parse error: {0}")]
    Parse(String),

    /// Unknown or misplaced operator tag
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// No element matched and no default was requested
    #[error("Sequence contains no matching element")]
    EmptySequence,

    /// `single` found more than one match
    #[error("Sequence contains more than one matching element")]
    MultipleMatch,

    /// `element_at` index outside the sequence
    #[error("Index {index} is out of range for a sequence of {len} elements")]
    IndexOutOfRange { index: usize, len: usize },

    /// A value could not be converted to the requested type
    #[error("Invalid cast: cannot convert {value} to {target}")]
    InvalidCast { value: String, target: String },

    /// A text expression failed while being evaluated
    #[error("Evaluation error: {0}")]
    Evaluation(String),

    /// The provider returned a value of the wrong shape for the terminal
    #[error("Invalid result: {0}")]
    InvalidResult(String),
}

impl QueryError {
    /// Build an invalid cast error for a value
    pub fn invalid_cast(value: &serde_json::Value, target: impl Into<String>) -> Self {
        QueryError::InvalidCast {
            value: crate::value::describe(value),
            target: target.into(),
        }
    }
}

impl From<serde_json::Error> for QueryError {
    fn from(err: serde_json::Error) -> Self {
        QueryError::InvalidResult(err.to_string())
    }
}

/// Result type for query operations
pub type QueryResult<T> = Result<T, QueryError>;
