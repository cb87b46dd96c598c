//! Local Sequence Provider
//!
//! Executes queries in memory over a bound source.

use crate::engine::executor;
use crate::query::{
    Execution, PartChain, Query, QueryError, QueryPart, QueryProvider, QueryResult,
};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::borrow::Cow;
use std::fmt;
use std::sync::{Arc, Mutex};

type OneShot = Box<dyn Iterator<Item = Value> + Send>;

/// Bound source of a local provider
#[derive(Clone)]
enum Source {
    /// Array shared read-only by every execution
    Shared(Arc<Vec<Value>>),
    /// Iterator drained by the first execution
    Once(Arc<Mutex<Option<OneShot>>>),
}

impl Source {
    /// Working collection for one execution; a shared array is lent, not copied
    fn items(&self) -> Cow<'_, [Value]> {
        match self {
            Source::Shared(items) => Cow::Borrowed(items.as_slice()),
            Source::Once(slot) => {
                let taken = match slot.lock() {
                    Ok(mut guard) => guard.take(),
                    Err(poisoned) => poisoned.into_inner().take(),
                };
                match taken {
                    Some(iter) => Cow::Owned(iter.collect()),
                    None => {
                        tracing::debug!("one-shot source already consumed");
                        Cow::Owned(Vec::new())
                    }
                }
            }
        }
    }
}

/// In-memory query provider
///
/// # Example
///
/// ```rust
/// use querychain::LocalProvider;
/// use serde_json::json;
///
/// let provider = LocalProvider::new(vec![json!(3), json!(1), json!(2)]);
/// let top = provider.query().order_by_descending("x => x").first().unwrap();
/// assert_eq!(top, json!(3));
/// ```
#[derive(Clone)]
pub struct LocalProvider {
    source: Source,
    trace_parts: bool,
}

impl LocalProvider {
    /// Provider over an array
    pub fn new(items: Vec<Value>) -> Self {
        Self {
            source: Source::Shared(Arc::new(items)),
            trace_parts: false,
        }
    }

    /// Provider over an iterator; only the first execution sees its elements
    pub fn once<I>(items: I) -> Self
    where
        I: IntoIterator<Item = Value>,
        I::IntoIter: Send + 'static,
    {
        let iter: OneShot = Box::new(items.into_iter());
        Self {
            source: Source::Once(Arc::new(Mutex::new(Some(iter)))),
            trace_parts: false,
        }
    }

    /// Provider over a JSON array
    ///
    /// Fails when the value is `null` or not an array.
    pub fn from_json(value: Value) -> QueryResult<Self> {
        match value {
            Value::Array(items) => Ok(Self::new(items)),
            Value::Null => Err(QueryError::Construction(
                "query source is null".to_string(),
            )),
            other => Err(QueryError::Construction(format!(
                "query source must be an array, got {}",
                crate::value::describe(&other)
            ))),
        }
    }

    /// Provider over serializable records
    pub fn from_serialize<T, I>(items: I) -> QueryResult<Self>
    where
        T: Serialize,
        I: IntoIterator<Item = T>,
    {
        let items = items
            .into_iter()
            .map(serde_json::to_value)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| QueryError::Construction(e.to_string()))?;
        Ok(Self::new(items))
    }

    /// Log every executed part's full description
    pub fn trace_parts(mut self, enabled: bool) -> Self {
        self.trace_parts = enabled;
        self
    }

    /// Empty query over this provider's source
    pub fn query(&self) -> Query {
        Arc::new(self.clone()).create_query(PartChain::new())
    }
}

impl FromIterator<Value> for LocalProvider {
    fn from_iter<I: IntoIterator<Item = Value>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl fmt::Debug for LocalProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let source = match &self.source {
            Source::Shared(items) => format!("shared({} items)", items.len()),
            Source::Once(_) => "once".to_string(),
        };
        f.debug_struct("LocalProvider")
            .field("source", &source)
            .field("trace_parts", &self.trace_parts)
            .finish()
    }
}

#[async_trait]
impl QueryProvider for LocalProvider {
    fn create_query(self: Arc<Self>, parts: PartChain) -> Query {
        Query::new(self, parts)
    }

    fn execute(&self, parts: &[QueryPart]) -> QueryResult<Execution> {
        executor::execute(parts, self.source.items(), self.trace_parts)
    }

    async fn execute_async(&self, parts: &[QueryPart]) -> QueryResult<Execution> {
        self.execute(parts)
    }
}

/// Query over a sequence, backed by a [`LocalProvider`]
pub fn query_of(items: impl IntoIterator<Item = Value>) -> Query {
    items.into_iter().collect::<LocalProvider>().query()
}
