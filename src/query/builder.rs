//! Query builder
//!
//! [`Query`] is an immutable descriptor: every chaining call returns a new
//! query whose part chain extends the previous one by one part, sharing the
//! prefix. Nothing runs until a terminal call hands the chain to the provider.
//!
//! # Example
//!
//! ```rust
//! use querychain::{query_of, PartArgument};
//! use serde_json::json;
//!
//! let orders = vec![
//!     json!({"supplier": "QWE", "count": 4}),
//!     json!({"supplier": "BNM", "count": 67}),
//!     json!({"supplier": "BNM", "count": 13}),
//! ];
//!
//! let counts = query_of(orders)
//!     .where_("o => o.count > 5")
//!     .order_by(PartArgument::lambda(|o| o["supplier"].clone()))
//!     .then_by_descending("o => o.count")
//!     .select("o => o.count")
//!     .to_array()
//!     .unwrap();
//!
//! assert_eq!(counts, vec![json!(67), json!(13)]);
//! ```

use crate::query::error::{QueryError, QueryResult};
use crate::query::part::{PartArgument, PartChain, QueryFunc, QueryPart};
use crate::query::provider::{Execution, QueryProvider};
use crate::value::ValueKind;
use futures_util::stream::{self, Stream, StreamExt};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// Marker: the chain carries no result metadata
#[derive(Debug, Clone, Copy, Default)]
pub struct Plain;

/// Marker: the chain requested an inline count
#[derive(Debug, Clone, Copy, Default)]
pub struct Counted;

/// A materialized result with its inline count attached alongside
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WithCount<T> {
    /// Primary result
    pub value: T,
    /// Element count captured by `inline_count`
    pub inline_count: usize,
}

impl<T> WithCount<T> {
    /// Transform the primary value, keeping the count
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> WithCount<U> {
        WithCount {
            value: f(self.value),
            inline_count: self.inline_count,
        }
    }
}

/// One group produced by `group_by`, as a typed value
///
/// Groups travel through the engine as `{"key": ..., "items": [...]}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Grouping<K = Value, T = Value> {
    /// Group key
    pub key: K,
    /// Members in source order
    pub items: Vec<T>,
}

/// Deferred query over a provider's source
pub struct Query<M = Plain> {
    provider: Arc<dyn QueryProvider>,
    parts: PartChain,
    marker: PhantomData<M>,
}

impl Query<Plain> {
    /// Create a query bound to a provider
    pub fn new(provider: Arc<dyn QueryProvider>, parts: PartChain) -> Self {
        Self {
            provider,
            parts,
            marker: PhantomData,
        }
    }
}

impl<M> Clone for Query<M> {
    fn clone(&self) -> Self {
        Self {
            provider: Arc::clone(&self.provider),
            parts: self.parts.clone(),
            marker: PhantomData,
        }
    }
}

impl<M> fmt::Debug for Query<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query").field("parts", &self.parts).finish()
    }
}

fn literal_array(items: impl IntoIterator<Item = Value>) -> PartArgument {
    PartArgument::literal(Value::Array(items.into_iter().collect()))
}

fn optional(arg: Option<PartArgument>) -> PartArgument {
    arg.unwrap_or_else(PartArgument::absent)
}

impl<M> Query<M> {
    /// Owning provider
    pub fn provider(&self) -> &Arc<dyn QueryProvider> {
        &self.provider
    }

    /// Part chain built so far
    pub fn parts(&self) -> &PartChain {
        &self.parts
    }

    /// New query with an arbitrary part appended
    pub fn append(&self, part: QueryPart) -> Query<M> {
        self.with_parts(self.parts.push(part))
    }

    fn with_parts<N>(&self, parts: PartChain) -> Query<N> {
        Query {
            provider: Arc::clone(&self.provider),
            parts,
            marker: PhantomData,
        }
    }

    fn chain(&self, func: QueryFunc, args: Vec<PartArgument>) -> Query<M> {
        self.append(QueryPart::of(func, args))
    }

    /// Keep elements matching a predicate `(item, index)`
    pub fn where_(&self, predicate: impl Into<PartArgument>) -> Query<M> {
        self.chain(QueryFunc::Where, vec![predicate.into()])
    }

    /// Project each element `(item, index)`
    pub fn select(&self, selector: impl Into<PartArgument>) -> Query<M> {
        self.chain(QueryFunc::Select, vec![selector.into()])
    }

    /// Project each element and flatten one level
    pub fn select_many(&self, selector: impl Into<PartArgument>) -> Query<M> {
        self.chain(QueryFunc::SelectMany, vec![selector.into()])
    }

    /// Convert every element to a kind; unconvertible values fail execution
    pub fn cast(&self, target: ValueKind) -> Query<M> {
        self.chain(QueryFunc::Cast, vec![PartArgument::literal(target.to_string())])
    }

    /// Keep elements of a runtime kind
    pub fn of_type(&self, kind: ValueKind) -> Query<M> {
        self.chain(QueryFunc::OfType, vec![PartArgument::literal(kind.to_string())])
    }

    /// Keep elements passing a type guard
    pub fn of_guarded_type(&self, guard: impl Into<PartArgument>) -> Query<M> {
        self.chain(QueryFunc::OfGuardedType, vec![guard.into()])
    }

    /// Remove duplicates under default equality
    pub fn distinct(&self) -> Query<M> {
        self.chain(QueryFunc::Distinct, Vec::new())
    }

    /// Remove duplicates under a comparer `(a, b)`
    pub fn distinct_with(&self, comparer: impl Into<PartArgument>) -> Query<M> {
        self.chain(QueryFunc::Distinct, vec![comparer.into()])
    }

    /// Set union
    pub fn union(&self, other: impl IntoIterator<Item = Value>) -> Query<M> {
        self.chain(QueryFunc::Union, vec![literal_array(other)])
    }

    /// Set union under a comparer
    pub fn union_with(
        &self,
        other: impl IntoIterator<Item = Value>,
        comparer: impl Into<PartArgument>,
    ) -> Query<M> {
        self.chain(QueryFunc::Union, vec![literal_array(other), comparer.into()])
    }

    /// Set intersection
    pub fn intersect(&self, other: impl IntoIterator<Item = Value>) -> Query<M> {
        self.chain(QueryFunc::Intersect, vec![literal_array(other)])
    }

    /// Set intersection under a comparer
    pub fn intersect_with(
        &self,
        other: impl IntoIterator<Item = Value>,
        comparer: impl Into<PartArgument>,
    ) -> Query<M> {
        self.chain(QueryFunc::Intersect, vec![literal_array(other), comparer.into()])
    }

    /// Set difference
    pub fn except(&self, other: impl IntoIterator<Item = Value>) -> Query<M> {
        self.chain(QueryFunc::Except, vec![literal_array(other)])
    }

    /// Set difference under a comparer
    pub fn except_with(
        &self,
        other: impl IntoIterator<Item = Value>,
        comparer: impl Into<PartArgument>,
    ) -> Query<M> {
        self.chain(QueryFunc::Except, vec![literal_array(other), comparer.into()])
    }

    /// Append another sequence
    pub fn concat(&self, other: impl IntoIterator<Item = Value>) -> Query<M> {
        self.chain(QueryFunc::Concat, vec![literal_array(other)])
    }

    /// Combine pairwise `(a, b)` up to the shorter length
    pub fn zip(
        &self,
        other: impl IntoIterator<Item = Value>,
        selector: impl Into<PartArgument>,
    ) -> Query<M> {
        self.chain(QueryFunc::Zip, vec![literal_array(other), selector.into()])
    }

    /// Inner join on matching keys, emitting `selector(left, right)`
    pub fn join(
        &self,
        other: impl IntoIterator<Item = Value>,
        left_key: impl Into<PartArgument>,
        right_key: impl Into<PartArgument>,
        selector: impl Into<PartArgument>,
    ) -> Query<M> {
        self.chain(
            QueryFunc::Join,
            vec![
                literal_array(other),
                left_key.into(),
                right_key.into(),
                selector.into(),
            ],
        )
    }

    /// Inner join with a key comparer
    pub fn join_with(
        &self,
        other: impl IntoIterator<Item = Value>,
        left_key: impl Into<PartArgument>,
        right_key: impl Into<PartArgument>,
        selector: impl Into<PartArgument>,
        comparer: impl Into<PartArgument>,
    ) -> Query<M> {
        self.chain(
            QueryFunc::Join,
            vec![
                literal_array(other),
                left_key.into(),
                right_key.into(),
                selector.into(),
                comparer.into(),
            ],
        )
    }

    /// Group join, emitting `selector(left, matches)` for every left element
    pub fn group_join(
        &self,
        other: impl IntoIterator<Item = Value>,
        left_key: impl Into<PartArgument>,
        right_key: impl Into<PartArgument>,
        selector: impl Into<PartArgument>,
    ) -> Query<M> {
        self.chain(
            QueryFunc::GroupJoin,
            vec![
                literal_array(other),
                left_key.into(),
                right_key.into(),
                selector.into(),
            ],
        )
    }

    /// Group join with a key comparer
    pub fn group_join_with(
        &self,
        other: impl IntoIterator<Item = Value>,
        left_key: impl Into<PartArgument>,
        right_key: impl Into<PartArgument>,
        selector: impl Into<PartArgument>,
        comparer: impl Into<PartArgument>,
    ) -> Query<M> {
        self.chain(
            QueryFunc::GroupJoin,
            vec![
                literal_array(other),
                left_key.into(),
                right_key.into(),
                selector.into(),
                comparer.into(),
            ],
        )
    }

    /// Stable sort by a key, ascending
    pub fn order_by(&self, key: impl Into<PartArgument>) -> Query<M> {
        self.chain(QueryFunc::OrderBy, vec![key.into()])
    }

    /// Stable sort by a key, descending
    pub fn order_by_descending(&self, key: impl Into<PartArgument>) -> Query<M> {
        self.chain(QueryFunc::OrderByDescending, vec![key.into()])
    }

    /// Break ties of the active ordering, ascending
    pub fn then_by(&self, key: impl Into<PartArgument>) -> Query<M> {
        self.chain(QueryFunc::ThenBy, vec![key.into()])
    }

    /// Break ties of the active ordering, descending
    pub fn then_by_descending(&self, key: impl Into<PartArgument>) -> Query<M> {
        self.chain(QueryFunc::ThenByDescending, vec![key.into()])
    }

    /// Keep the first `count` elements
    pub fn take(&self, count: usize) -> Query<M> {
        self.chain(QueryFunc::Take, vec![PartArgument::literal(count)])
    }

    /// Drop the first `count` elements
    pub fn skip(&self, count: usize) -> Query<M> {
        self.chain(QueryFunc::Skip, vec![PartArgument::literal(count)])
    }

    /// Keep elements until the predicate first fails
    pub fn take_while(&self, predicate: impl Into<PartArgument>) -> Query<M> {
        self.chain(QueryFunc::TakeWhile, vec![predicate.into()])
    }

    /// Drop elements until the predicate first fails
    pub fn skip_while(&self, predicate: impl Into<PartArgument>) -> Query<M> {
        self.chain(QueryFunc::SkipWhile, vec![predicate.into()])
    }

    /// Partition by key into `{"key", "items"}` groups
    pub fn group_by(&self, key: impl Into<PartArgument>) -> Query<M> {
        self.chain(QueryFunc::GroupBy, vec![key.into()])
    }

    /// Partition by key and shape each group with `selector(key, items)`
    pub fn group_by_select(
        &self,
        key: impl Into<PartArgument>,
        selector: impl Into<PartArgument>,
    ) -> Query<M> {
        self.chain(QueryFunc::GroupBy, vec![key.into(), selector.into()])
    }

    /// Partition by key with an optional group selector and key comparer
    pub fn group_by_with(
        &self,
        key: impl Into<PartArgument>,
        selector: Option<PartArgument>,
        comparer: Option<PartArgument>,
    ) -> Query<M> {
        self.chain(
            QueryFunc::GroupBy,
            vec![key.into(), optional(selector), optional(comparer)],
        )
    }

    /// Reverse element order
    pub fn reverse(&self) -> Query<M> {
        self.chain(QueryFunc::Reverse, Vec::new())
    }

    /// Replace an empty sequence with a single default (or `null`)
    pub fn default_if_empty(&self, default: Option<Value>) -> Query<M> {
        let args = default.map(PartArgument::literal).into_iter().collect();
        self.chain(QueryFunc::DefaultIfEmpty, args)
    }

    /// Request the element count before paging as result metadata
    pub fn inline_count(&self) -> Query<Counted> {
        self.with_parts(self.parts.push(QueryPart::of(QueryFunc::InlineCount, Vec::new())))
    }

    fn terminal_parts(&self, func: QueryFunc, args: Vec<PartArgument>) -> Vec<QueryPart> {
        self.parts.push(QueryPart::of(func, args)).to_vec()
    }

    fn terminal(&self, func: QueryFunc, args: Vec<PartArgument>) -> QueryResult<Value> {
        let parts = self.terminal_parts(func, args);
        self.provider.execute(&parts).map(|execution| execution.value)
    }

    async fn terminal_async(&self, func: QueryFunc, args: Vec<PartArgument>) -> QueryResult<Value> {
        let parts = self.terminal_parts(func, args);
        self.provider
            .execute_async(&parts)
            .await
            .map(|execution| execution.value)
    }

    fn materialize(&self) -> QueryResult<Execution> {
        let parts = self.terminal_parts(QueryFunc::ToArray, Vec::new());
        self.provider.execute(&parts)
    }

    async fn materialize_async(&self) -> QueryResult<Execution> {
        let parts = self.terminal_parts(QueryFunc::ToArray, Vec::new());
        self.provider.execute_async(&parts).await
    }

    /// First element; fails on an empty sequence
    pub fn first(&self) -> QueryResult<Value> {
        self.terminal(QueryFunc::First, Vec::new())
    }

    /// Async twin of [`first`](Self::first)
    pub async fn first_async(&self) -> QueryResult<Value> {
        self.terminal_async(QueryFunc::First, Vec::new()).await
    }

    /// First match of a predicate; fails when nothing matches
    pub fn first_where(&self, predicate: impl Into<PartArgument>) -> QueryResult<Value> {
        self.terminal(QueryFunc::First, vec![predicate.into()])
    }

    /// Async twin of [`first_where`](Self::first_where)
    pub async fn first_where_async(&self, predicate: impl Into<PartArgument>) -> QueryResult<Value> {
        self.terminal_async(QueryFunc::First, vec![predicate.into()]).await
    }

    /// First element or `null`
    pub fn first_or_default(&self) -> QueryResult<Value> {
        self.terminal(QueryFunc::FirstOrDefault, Vec::new())
    }

    /// Async twin of [`first_or_default`](Self::first_or_default)
    pub async fn first_or_default_async(&self) -> QueryResult<Value> {
        self.terminal_async(QueryFunc::FirstOrDefault, Vec::new()).await
    }

    /// First match or `null`
    pub fn first_or_default_where(&self, predicate: impl Into<PartArgument>) -> QueryResult<Value> {
        self.terminal(QueryFunc::FirstOrDefault, vec![predicate.into()])
    }

    /// Async twin of [`first_or_default_where`](Self::first_or_default_where)
    pub async fn first_or_default_where_async(
        &self,
        predicate: impl Into<PartArgument>,
    ) -> QueryResult<Value> {
        self.terminal_async(QueryFunc::FirstOrDefault, vec![predicate.into()])
            .await
    }

    /// Last element; fails on an empty sequence
    pub fn last(&self) -> QueryResult<Value> {
        self.terminal(QueryFunc::Last, Vec::new())
    }

    /// Async twin of [`last`](Self::last)
    pub async fn last_async(&self) -> QueryResult<Value> {
        self.terminal_async(QueryFunc::Last, Vec::new()).await
    }

    /// Last match of a predicate
    pub fn last_where(&self, predicate: impl Into<PartArgument>) -> QueryResult<Value> {
        self.terminal(QueryFunc::Last, vec![predicate.into()])
    }

    /// Async twin of [`last_where`](Self::last_where)
    pub async fn last_where_async(&self, predicate: impl Into<PartArgument>) -> QueryResult<Value> {
        self.terminal_async(QueryFunc::Last, vec![predicate.into()]).await
    }

    /// Last element or `null`
    pub fn last_or_default(&self) -> QueryResult<Value> {
        self.terminal(QueryFunc::LastOrDefault, Vec::new())
    }

    /// Async twin of [`last_or_default`](Self::last_or_default)
    pub async fn last_or_default_async(&self) -> QueryResult<Value> {
        self.terminal_async(QueryFunc::LastOrDefault, Vec::new()).await
    }

    /// Last match or `null`
    pub fn last_or_default_where(&self, predicate: impl Into<PartArgument>) -> QueryResult<Value> {
        self.terminal(QueryFunc::LastOrDefault, vec![predicate.into()])
    }

    /// Async twin of [`last_or_default_where`](Self::last_or_default_where)
    pub async fn last_or_default_where_async(
        &self,
        predicate: impl Into<PartArgument>,
    ) -> QueryResult<Value> {
        self.terminal_async(QueryFunc::LastOrDefault, vec![predicate.into()])
            .await
    }

    /// The only element; fails on zero or several
    pub fn single(&self) -> QueryResult<Value> {
        self.terminal(QueryFunc::Single, Vec::new())
    }

    /// Async twin of [`single`](Self::single)
    pub async fn single_async(&self) -> QueryResult<Value> {
        self.terminal_async(QueryFunc::Single, Vec::new()).await
    }

    /// The only match of a predicate
    pub fn single_where(&self, predicate: impl Into<PartArgument>) -> QueryResult<Value> {
        self.terminal(QueryFunc::Single, vec![predicate.into()])
    }

    /// Async twin of [`single_where`](Self::single_where)
    pub async fn single_where_async(&self, predicate: impl Into<PartArgument>) -> QueryResult<Value> {
        self.terminal_async(QueryFunc::Single, vec![predicate.into()]).await
    }

    /// The only element or `null`; several elements still fail
    pub fn single_or_default(&self) -> QueryResult<Value> {
        self.terminal(QueryFunc::SingleOrDefault, Vec::new())
    }

    /// Async twin of [`single_or_default`](Self::single_or_default)
    pub async fn single_or_default_async(&self) -> QueryResult<Value> {
        self.terminal_async(QueryFunc::SingleOrDefault, Vec::new()).await
    }

    /// The only match or `null`; several matches still fail
    pub fn single_or_default_where(&self, predicate: impl Into<PartArgument>) -> QueryResult<Value> {
        self.terminal(QueryFunc::SingleOrDefault, vec![predicate.into()])
    }

    /// Async twin of [`single_or_default_where`](Self::single_or_default_where)
    pub async fn single_or_default_where_async(
        &self,
        predicate: impl Into<PartArgument>,
    ) -> QueryResult<Value> {
        self.terminal_async(QueryFunc::SingleOrDefault, vec![predicate.into()])
            .await
    }

    /// Element at a zero-based index; fails when out of range
    pub fn element_at(&self, index: usize) -> QueryResult<Value> {
        self.terminal(QueryFunc::ElementAt, vec![PartArgument::literal(index)])
    }

    /// Async twin of [`element_at`](Self::element_at)
    pub async fn element_at_async(&self, index: usize) -> QueryResult<Value> {
        self.terminal_async(QueryFunc::ElementAt, vec![PartArgument::literal(index)])
            .await
    }

    /// Element at a zero-based index or `null`
    pub fn element_at_or_default(&self, index: usize) -> QueryResult<Value> {
        self.terminal(QueryFunc::ElementAtOrDefault, vec![PartArgument::literal(index)])
    }

    /// Async twin of [`element_at_or_default`](Self::element_at_or_default)
    pub async fn element_at_or_default_async(&self, index: usize) -> QueryResult<Value> {
        self.terminal_async(QueryFunc::ElementAtOrDefault, vec![PartArgument::literal(index)])
            .await
    }

    /// Number of elements
    pub fn count(&self) -> QueryResult<usize> {
        as_count(self.terminal(QueryFunc::Count, Vec::new())?)
    }

    /// Async twin of [`count`](Self::count)
    pub async fn count_async(&self) -> QueryResult<usize> {
        as_count(self.terminal_async(QueryFunc::Count, Vec::new()).await?)
    }

    /// Number of elements matching a predicate
    pub fn count_where(&self, predicate: impl Into<PartArgument>) -> QueryResult<usize> {
        as_count(self.terminal(QueryFunc::Count, vec![predicate.into()])?)
    }

    /// Async twin of [`count_where`](Self::count_where)
    pub async fn count_where_async(&self, predicate: impl Into<PartArgument>) -> QueryResult<usize> {
        as_count(
            self.terminal_async(QueryFunc::Count, vec![predicate.into()])
                .await?,
        )
    }

    /// Check if the sequence has any element
    pub fn any(&self) -> QueryResult<bool> {
        as_bool(self.terminal(QueryFunc::Any, Vec::new())?)
    }

    /// Async twin of [`any`](Self::any)
    pub async fn any_async(&self) -> QueryResult<bool> {
        as_bool(self.terminal_async(QueryFunc::Any, Vec::new()).await?)
    }

    /// Check if any element matches a predicate
    pub fn any_where(&self, predicate: impl Into<PartArgument>) -> QueryResult<bool> {
        as_bool(self.terminal(QueryFunc::Any, vec![predicate.into()])?)
    }

    /// Async twin of [`any_where`](Self::any_where)
    pub async fn any_where_async(&self, predicate: impl Into<PartArgument>) -> QueryResult<bool> {
        as_bool(
            self.terminal_async(QueryFunc::Any, vec![predicate.into()])
                .await?,
        )
    }

    /// Check if every element matches a predicate
    pub fn all(&self, predicate: impl Into<PartArgument>) -> QueryResult<bool> {
        as_bool(self.terminal(QueryFunc::All, vec![predicate.into()])?)
    }

    /// Async twin of [`all`](Self::all)
    pub async fn all_async(&self, predicate: impl Into<PartArgument>) -> QueryResult<bool> {
        as_bool(
            self.terminal_async(QueryFunc::All, vec![predicate.into()])
                .await?,
        )
    }

    /// Check if the sequence contains an item
    pub fn contains(&self, item: impl Into<Value>) -> QueryResult<bool> {
        as_bool(self.terminal(QueryFunc::Contains, vec![PartArgument::literal(item)])?)
    }

    /// Async twin of [`contains`](Self::contains)
    pub async fn contains_async(&self, item: impl Into<Value>) -> QueryResult<bool> {
        as_bool(
            self.terminal_async(QueryFunc::Contains, vec![PartArgument::literal(item)])
                .await?,
        )
    }

    /// Check membership under a comparer
    pub fn contains_with(
        &self,
        item: impl Into<Value>,
        comparer: impl Into<PartArgument>,
    ) -> QueryResult<bool> {
        let args = vec![PartArgument::literal(item), comparer.into()];
        as_bool(self.terminal(QueryFunc::Contains, args)?)
    }

    /// Async twin of [`contains_with`](Self::contains_with)
    pub async fn contains_with_async(
        &self,
        item: impl Into<Value>,
        comparer: impl Into<PartArgument>,
    ) -> QueryResult<bool> {
        let args = vec![PartArgument::literal(item), comparer.into()];
        as_bool(self.terminal_async(QueryFunc::Contains, args).await?)
    }

    /// Check element-wise equality with another sequence
    pub fn sequence_equal(&self, other: impl IntoIterator<Item = Value>) -> QueryResult<bool> {
        as_bool(self.terminal(QueryFunc::SequenceEqual, vec![literal_array(other)])?)
    }

    /// Async twin of [`sequence_equal`](Self::sequence_equal)
    pub async fn sequence_equal_async(
        &self,
        other: impl IntoIterator<Item = Value>,
    ) -> QueryResult<bool> {
        as_bool(
            self.terminal_async(QueryFunc::SequenceEqual, vec![literal_array(other)])
                .await?,
        )
    }

    /// Check element-wise equality under a comparer
    pub fn sequence_equal_with(
        &self,
        other: impl IntoIterator<Item = Value>,
        comparer: impl Into<PartArgument>,
    ) -> QueryResult<bool> {
        let args = vec![literal_array(other), comparer.into()];
        as_bool(self.terminal(QueryFunc::SequenceEqual, args)?)
    }

    /// Async twin of [`sequence_equal_with`](Self::sequence_equal_with)
    pub async fn sequence_equal_with_async(
        &self,
        other: impl IntoIterator<Item = Value>,
        comparer: impl Into<PartArgument>,
    ) -> QueryResult<bool> {
        let args = vec![literal_array(other), comparer.into()];
        as_bool(self.terminal_async(QueryFunc::SequenceEqual, args).await?)
    }

    /// Smallest element; fails on an empty sequence
    pub fn min(&self) -> QueryResult<Value> {
        self.terminal(QueryFunc::Min, Vec::new())
    }

    /// Async twin of [`min`](Self::min)
    pub async fn min_async(&self) -> QueryResult<Value> {
        self.terminal_async(QueryFunc::Min, Vec::new()).await
    }

    /// Smallest selected value
    pub fn min_by(&self, selector: impl Into<PartArgument>) -> QueryResult<Value> {
        self.terminal(QueryFunc::Min, vec![selector.into()])
    }

    /// Async twin of [`min_by`](Self::min_by)
    pub async fn min_by_async(&self, selector: impl Into<PartArgument>) -> QueryResult<Value> {
        self.terminal_async(QueryFunc::Min, vec![selector.into()]).await
    }

    /// Largest element; fails on an empty sequence
    pub fn max(&self) -> QueryResult<Value> {
        self.terminal(QueryFunc::Max, Vec::new())
    }

    /// Async twin of [`max`](Self::max)
    pub async fn max_async(&self) -> QueryResult<Value> {
        self.terminal_async(QueryFunc::Max, Vec::new()).await
    }

    /// Largest selected value
    pub fn max_by(&self, selector: impl Into<PartArgument>) -> QueryResult<Value> {
        self.terminal(QueryFunc::Max, vec![selector.into()])
    }

    /// Async twin of [`max_by`](Self::max_by)
    pub async fn max_by_async(&self, selector: impl Into<PartArgument>) -> QueryResult<Value> {
        self.terminal_async(QueryFunc::Max, vec![selector.into()]).await
    }

    /// Numeric sum; `0` for an empty sequence
    pub fn sum(&self) -> QueryResult<f64> {
        as_number(self.terminal(QueryFunc::Sum, Vec::new())?)
    }

    /// Async twin of [`sum`](Self::sum)
    pub async fn sum_async(&self) -> QueryResult<f64> {
        as_number(self.terminal_async(QueryFunc::Sum, Vec::new()).await?)
    }

    /// Sum of selected values
    pub fn sum_by(&self, selector: impl Into<PartArgument>) -> QueryResult<f64> {
        as_number(self.terminal(QueryFunc::Sum, vec![selector.into()])?)
    }

    /// Async twin of [`sum_by`](Self::sum_by)
    pub async fn sum_by_async(&self, selector: impl Into<PartArgument>) -> QueryResult<f64> {
        as_number(
            self.terminal_async(QueryFunc::Sum, vec![selector.into()])
                .await?,
        )
    }

    /// Numeric mean; `0` for an empty sequence
    pub fn average(&self) -> QueryResult<f64> {
        as_number(self.terminal(QueryFunc::Average, Vec::new())?)
    }

    /// Async twin of [`average`](Self::average)
    pub async fn average_async(&self) -> QueryResult<f64> {
        as_number(self.terminal_async(QueryFunc::Average, Vec::new()).await?)
    }

    /// Mean of selected values
    pub fn average_by(&self, selector: impl Into<PartArgument>) -> QueryResult<f64> {
        as_number(self.terminal(QueryFunc::Average, vec![selector.into()])?)
    }

    /// Async twin of [`average_by`](Self::average_by)
    pub async fn average_by_async(&self, selector: impl Into<PartArgument>) -> QueryResult<f64> {
        as_number(
            self.terminal_async(QueryFunc::Average, vec![selector.into()])
                .await?,
        )
    }

    /// Left fold `func(acc, item)` from `seed` (default `0`), then `result(acc)`
    pub fn aggregate(
        &self,
        func: impl Into<PartArgument>,
        seed: Option<Value>,
        result: Option<PartArgument>,
    ) -> QueryResult<Value> {
        let args = aggregate_args(func.into(), seed, result);
        self.terminal(QueryFunc::Aggregate, args)
    }

    /// Async twin of [`aggregate`](Self::aggregate)
    pub async fn aggregate_async(
        &self,
        func: impl Into<PartArgument>,
        seed: Option<Value>,
        result: Option<PartArgument>,
    ) -> QueryResult<Value> {
        let args = aggregate_args(func.into(), seed, result);
        self.terminal_async(QueryFunc::Aggregate, args).await
    }

    /// Iterate results, executing the chain on the first call to `next`
    pub fn iter(&self) -> QueryIter {
        QueryIter {
            state: IterState::Pending {
                provider: Arc::clone(&self.provider),
                parts: self.terminal_parts(QueryFunc::ToArray, Vec::new()),
            },
        }
    }

    /// Asynchronous sequence of results, executing the chain on first poll
    pub fn into_stream(self) -> impl Stream<Item = QueryResult<Value>> + Send {
        let provider = self.provider;
        let parts = self
            .parts
            .push(QueryPart::of(QueryFunc::ToArray, Vec::new()))
            .to_vec();

        stream::once(async move { provider.execute_async(&parts).await })
            .map(|result| {
                let items: Vec<QueryResult<Value>> =
                    match result.and_then(|execution| into_items(execution.value)) {
                        Ok(items) => items.into_iter().map(Ok).collect(),
                        Err(e) => vec![Err(e)],
                    };
                stream::iter(items)
            })
            .flatten()
    }
}

impl Query<Plain> {
    /// Materialize the results
    pub fn to_array(&self) -> QueryResult<Vec<Value>> {
        into_items(self.materialize()?.value)
    }

    /// Async twin of [`to_array`](Self::to_array)
    pub async fn to_array_async(&self) -> QueryResult<Vec<Value>> {
        into_items(self.materialize_async().await?.value)
    }

    /// Materialize the results, reconstructing each element as `T`
    pub fn to_array_as<T: DeserializeOwned>(&self) -> QueryResult<Vec<T>> {
        reconstruct_all(self.to_array()?)
    }

    /// Async twin of [`to_array_as`](Self::to_array_as)
    pub async fn to_array_as_async<T: DeserializeOwned>(&self) -> QueryResult<Vec<T>> {
        reconstruct_all(self.to_array_async().await?)
    }
}

impl Query<Counted> {
    /// Materialize the results with the inline count alongside
    pub fn to_array(&self) -> QueryResult<WithCount<Vec<Value>>> {
        with_count(self.materialize()?)
    }

    /// Async twin of [`to_array`](Self::to_array)
    pub async fn to_array_async(&self) -> QueryResult<WithCount<Vec<Value>>> {
        with_count(self.materialize_async().await?)
    }

    /// Materialize as `T` with the inline count alongside
    pub fn to_array_as<T: DeserializeOwned>(&self) -> QueryResult<WithCount<Vec<T>>> {
        let counted = self.to_array()?;
        Ok(WithCount {
            value: reconstruct_all(counted.value)?,
            inline_count: counted.inline_count,
        })
    }

    /// Async twin of [`to_array_as`](Self::to_array_as)
    pub async fn to_array_as_async<T: DeserializeOwned>(&self) -> QueryResult<WithCount<Vec<T>>> {
        let counted = self.to_array_async().await?;
        Ok(WithCount {
            value: reconstruct_all(counted.value)?,
            inline_count: counted.inline_count,
        })
    }
}

impl<M> IntoIterator for Query<M> {
    type Item = QueryResult<Value>;
    type IntoIter = QueryIter;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<M> IntoIterator for &Query<M> {
    type Item = QueryResult<Value>;
    type IntoIter = QueryIter;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

enum IterState {
    Pending {
        provider: Arc<dyn QueryProvider>,
        parts: Vec<QueryPart>,
    },
    Running(std::vec::IntoIter<Value>),
    Done,
}

/// Lazy iterator over a query's results
///
/// An execution failure is yielded once as `Err`, then iteration ends.
pub struct QueryIter {
    state: IterState,
}

impl Iterator for QueryIter {
    type Item = QueryResult<Value>;

    fn next(&mut self) -> Option<Self::Item> {
        if let IterState::Pending { provider, parts } = &self.state {
            let result = provider
                .execute(parts)
                .and_then(|execution| into_items(execution.value));
            match result {
                Ok(items) => self.state = IterState::Running(items.into_iter()),
                Err(e) => {
                    self.state = IterState::Done;
                    return Some(Err(e));
                }
            }
        }

        match &mut self.state {
            IterState::Running(items) => items.next().map(Ok),
            _ => None,
        }
    }
}

fn aggregate_args(
    func: PartArgument,
    seed: Option<Value>,
    result: Option<PartArgument>,
) -> Vec<PartArgument> {
    vec![
        func,
        seed.map(PartArgument::literal).unwrap_or_else(PartArgument::absent),
        optional(result),
    ]
}

fn into_items(value: Value) -> QueryResult<Vec<Value>> {
    match value {
        Value::Array(items) => Ok(items),
        other => Err(QueryError::InvalidResult(format!(
            "expected an array, got {}",
            crate::value::describe(&other)
        ))),
    }
}

fn with_count(execution: Execution) -> QueryResult<WithCount<Vec<Value>>> {
    let inline_count = execution.inline_count.ok_or_else(|| {
        QueryError::InvalidResult("provider returned no inline count".to_string())
    })?;
    Ok(WithCount {
        value: into_items(execution.value)?,
        inline_count,
    })
}

/// Recast one element into a typed value
pub fn reconstruct<T: DeserializeOwned>(value: Value) -> QueryResult<T> {
    serde_json::from_value(value.clone())
        .map_err(|_| QueryError::invalid_cast(&value, std::any::type_name::<T>()))
}

fn reconstruct_all<T: DeserializeOwned>(items: Vec<Value>) -> QueryResult<Vec<T>> {
    items.into_iter().map(reconstruct).collect()
}

fn as_count(value: Value) -> QueryResult<usize> {
    value
        .as_u64()
        .map(|n| n as usize)
        .ok_or_else(|| QueryError::InvalidResult(format!("expected a count, got {}", value)))
}

fn as_bool(value: Value) -> QueryResult<bool> {
    value
        .as_bool()
        .ok_or_else(|| QueryError::InvalidResult(format!("expected a boolean, got {}", value)))
}

fn as_number(value: Value) -> QueryResult<f64> {
    value
        .as_f64()
        .ok_or_else(|| QueryError::InvalidResult(format!("expected a number, got {}", value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{query_of, LocalProvider};
    use crate::expr::Scope;
    use proptest::prelude::*;
    use serde_json::json;

    fn orders() -> Vec<Value> {
        vec![
            json!({"supplier": "QWE", "count": 4}),
            json!({"supplier": "BNM", "count": 67}),
            json!({"supplier": "BNM", "count": 13}),
            json!({"supplier": "TYU", "count": 8}),
            json!({"supplier": "FGH", "count": 34}),
            json!({"supplier": "FGH", "count": 86}),
        ]
    }

    fn ids(n: i64) -> Vec<Value> {
        (1..=n).map(|id| json!({ "id": id })).collect()
    }

    #[test]
    fn test_collect_returns_equal_sequence() {
        let source = orders();
        assert_eq!(query_of(source.clone()).to_array().unwrap(), source);
        assert!(query_of(Vec::new()).to_array().unwrap().is_empty());
    }

    #[test]
    fn test_order_by_then_by_descending() {
        let counts = query_of(orders())
            .order_by("o => o.supplier")
            .then_by_descending(PartArgument::lambda(|o| o["count"].clone()))
            .select("o => o.count")
            .to_array()
            .unwrap();
        assert_eq!(counts, vec![json!(67), json!(13), json!(86), json!(34), json!(4), json!(8)]);
    }

    #[test]
    fn test_then_by_without_order_by() {
        let result = query_of(orders()).then_by("o => o.count").to_array();
        assert!(matches!(result, Err(QueryError::UnsupportedOperation(_))));
    }

    #[test]
    fn test_join_counts_matches() {
        let joined = query_of(vec![json!("a"), json!("b")])
            .join(
                vec![json!("b"), json!("b"), json!("c")],
                "x => x",
                "y => y",
                "(l, r) => { left: l, right: r }",
            )
            .to_array()
            .unwrap();
        assert_eq!(joined.len(), 2);
        assert!(joined.iter().all(|pair| pair["left"] == json!("b")));
    }

    #[test]
    fn test_group_by_first_occurrence_order() {
        let words = ["x", "y", "x", "z", "x"].map(Value::from);
        let groups = query_of(words)
            .group_by("w => w")
            .to_array_as::<Grouping<String, String>>()
            .unwrap();

        let summary: Vec<(String, usize)> = groups
            .into_iter()
            .map(|group| (group.key, group.items.len()))
            .collect();
        assert_eq!(
            summary,
            vec![("x".to_string(), 3), ("y".to_string(), 1), ("z".to_string(), 1)]
        );
    }

    #[test]
    fn test_single() {
        assert_eq!(query_of(Vec::new()).single(), Err(QueryError::EmptySequence));
        assert_eq!(query_of(vec![json!(1), json!(2)]).single(), Err(QueryError::MultipleMatch));
        assert_eq!(query_of(vec![json!(42)]).single().unwrap(), json!(42));

        assert_eq!(query_of(Vec::new()).single_or_default().unwrap(), Value::Null);
        assert_eq!(
            query_of(vec![json!(1), json!(2)]).single_or_default(),
            Err(QueryError::MultipleMatch)
        );
        assert_eq!(
            query_of(vec![json!(1), json!(2)]).single_where("x => x > 1").unwrap(),
            json!(2)
        );
    }

    #[test]
    fn test_first_and_last() {
        let query = query_of(ids(5));
        assert_eq!(query.first().unwrap(), json!({"id": 1}));
        assert_eq!(query.last().unwrap(), json!({"id": 5}));
        assert_eq!(query.first_where("x => x.id > 3").unwrap(), json!({"id": 4}));
        assert_eq!(query.last_where("x => x.id < 3").unwrap(), json!({"id": 2}));
        assert_eq!(query.first_where("x => x.id > 9"), Err(QueryError::EmptySequence));
        assert_eq!(query.last_or_default_where("x => x.id > 9").unwrap(), Value::Null);
        assert_eq!(query_of(Vec::new()).first_or_default().unwrap(), Value::Null);
    }

    #[test]
    fn test_element_at() {
        let query = query_of(ids(5));
        assert_eq!(query.element_at(3).unwrap(), json!({"id": 4}));
        assert_eq!(
            query.element_at(10),
            Err(QueryError::IndexOutOfRange { index: 10, len: 5 })
        );
        assert_eq!(query.element_at_or_default(10).unwrap(), Value::Null);
    }

    #[test]
    fn test_numeric_terminals_on_empty() {
        let empty = query_of(Vec::new());
        assert_eq!(empty.average().unwrap(), 0.0);
        assert_eq!(empty.sum().unwrap(), 0.0);
        assert_eq!(empty.min(), Err(QueryError::EmptySequence));
        assert_eq!(empty.max(), Err(QueryError::EmptySequence));
    }

    #[test]
    fn test_numeric_terminals() {
        let query = query_of(orders());
        assert_eq!(query.sum_by("o => o.count").unwrap(), 212.0);
        assert_eq!(query.max_by("o => o.count").unwrap(), json!(86));
        assert_eq!(query.min_by("o => o.supplier").unwrap(), json!("BNM"));
        assert_eq!(
            query_of(vec![json!(1), json!(2)]).average().unwrap(),
            1.5
        );
        assert_eq!(
            query.aggregate("(acc, o) => acc + o.count", Some(json!(100)), None).unwrap(),
            json!(312)
        );
    }

    #[test]
    fn test_predicate_terminals() {
        let query = query_of(ids(5));
        assert_eq!(query.count().unwrap(), 5);
        assert_eq!(query.count_where("x => x.id % 2 == 0").unwrap(), 2);
        assert!(query.any().unwrap());
        assert!(!query_of(Vec::new()).any().unwrap());
        assert!(query.any_where("x => x.id == 5").unwrap());
        assert!(query.all("x => x.id > 0").unwrap());
        assert!(!query.all("x => x.id > 1").unwrap());
        assert!(query.contains(json!({"id": 3})).unwrap());
        assert!(query
            .contains_with(json!(3), "(x, wanted) => x.id == wanted")
            .unwrap());
        assert!(query.sequence_equal(ids(5)).unwrap());
        assert!(!query.sequence_equal(ids(4)).unwrap());
    }

    #[test]
    fn test_inline_count_before_paging() {
        let page = query_of(ids(5))
            .inline_count()
            .where_("x => x.id > 2")
            .skip(1)
            .take(2)
            .to_array()
            .unwrap();
        assert_eq!(page.inline_count, 3);
        assert_eq!(page.value, vec![json!({"id": 4}), json!({"id": 5})]);
    }

    #[test]
    fn test_inline_count_typed() {
        #[derive(Debug, PartialEq, Deserialize)]
        struct Row {
            id: i64,
        }

        let page = query_of(ids(5))
            .inline_count()
            .take(2)
            .to_array_as::<Row>()
            .unwrap();
        assert_eq!(page.inline_count, 5);
        assert_eq!(page.value, vec![Row { id: 1 }, Row { id: 2 }]);
        assert_eq!(page.map(|rows| rows.len()).value, 2);
    }

    #[test]
    fn test_queries_are_immutable() {
        let base = query_of(ids(5)).where_("x => x.id > 1");
        let taken = base.take(1);
        let reversed = base.reverse();

        assert_eq!(base.parts().len(), 1);
        assert!(taken.parts().starts_with(base.parts()));
        assert!(reversed.parts().starts_with(base.parts()));
        assert_eq!(base.count().unwrap(), 4);
        assert_eq!(taken.to_array().unwrap(), vec![json!({"id": 2})]);
        assert_eq!(reversed.first().unwrap(), json!({"id": 5}));
    }

    #[test]
    fn test_text_and_native_arguments_agree() {
        let text = query_of(orders())
            .where_("o => o.count > 10")
            .select("o => o.supplier")
            .to_array()
            .unwrap();
        let native = query_of(orders())
            .where_(PartArgument::predicate(|o| o["count"].as_i64().unwrap_or(0) > 10))
            .select(PartArgument::lambda(|o| o["supplier"].clone()))
            .to_array()
            .unwrap();
        assert_eq!(text, native);
    }

    #[test]
    fn test_scopes() {
        let argument = PartArgument::from_text("o => o.supplier == name").scope("name", "BNM");
        assert_eq!(query_of(orders()).count_where(argument).unwrap(), 2);

        let part = QueryPart::of(QueryFunc::Where, vec!["o => o.count >= min".into()])
            .with_scopes(vec![Scope::new("min", 34)]);
        assert_eq!(query_of(orders()).append(part).count().unwrap(), 3);

        let missing = query_of(orders()).where_("o => o.count > limit").to_array();
        assert!(matches!(missing, Err(QueryError::Evaluation(_))));
    }

    #[test]
    fn test_chaining_operators() {
        let numbers = query_of([3, 1, 3, 2].map(Value::from));
        assert_eq!(
            numbers.distinct().to_array().unwrap(),
            vec![json!(3), json!(1), json!(2)]
        );
        assert_eq!(
            numbers.union(vec![json!(4), json!(1)]).to_array().unwrap(),
            vec![json!(3), json!(1), json!(2), json!(4)]
        );
        assert_eq!(
            numbers.concat(vec![json!(9)]).count().unwrap(),
            5
        );
        assert_eq!(
            numbers
                .zip(vec![json!("a"), json!("b")], "(n, s) => s + n")
                .to_array()
                .unwrap(),
            vec![json!("a3"), json!("b1")]
        );
        assert_eq!(
            numbers.skip_while("x => x > 2").take_while("x => x < 3").to_array().unwrap(),
            vec![json!(1)]
        );
        assert_eq!(
            query_of(Vec::new()).default_if_empty(Some(json!(0))).to_array().unwrap(),
            vec![json!(0)]
        );
        assert_eq!(
            query_of(Vec::new()).default_if_empty(None).to_array().unwrap(),
            vec![Value::Null]
        );
    }

    #[test]
    fn test_type_operators() {
        let mixed = query_of(vec![json!(1), json!("2"), json!(null), json!(2.5), json!([1])]);
        assert_eq!(
            mixed.of_type(ValueKind::Number).to_array().unwrap(),
            vec![json!(1), json!(2.5)]
        );
        assert_eq!(
            mixed.of_type(ValueKind::Integer).to_array().unwrap(),
            vec![json!(1)]
        );
        assert_eq!(
            mixed.of_guarded_type("x => x != null").count().unwrap(),
            4
        );
        assert_eq!(
            query_of(vec![json!("1"), json!(2), json!(null)])
                .cast(ValueKind::Number)
                .to_array()
                .unwrap(),
            vec![json!(1), json!(2), Value::Null]
        );
        assert!(matches!(
            mixed.cast(ValueKind::Number).to_array(),
            Err(QueryError::InvalidCast { .. })
        ));
    }

    #[test]
    fn test_group_join_and_group_by_select() {
        let suppliers = vec![json!("BNM"), json!("ASD")];
        let totals = query_of(suppliers)
            .group_join(
                orders(),
                "s => s",
                "o => o.supplier",
                "(s, group) => { supplier: s, orders: group.length }",
            )
            .to_array()
            .unwrap();
        assert_eq!(
            totals,
            vec![
                json!({"supplier": "BNM", "orders": 2}),
                json!({"supplier": "ASD", "orders": 0})
            ]
        );

        let sizes = query_of(orders())
            .group_by_select("o => o.supplier", "(k, items) => items.length")
            .to_array()
            .unwrap();
        assert_eq!(sizes, vec![json!(1), json!(2), json!(1), json!(2)]);
    }

    #[test]
    fn test_comparer_operators() {
        let ignore_case = || {
            PartArgument::comparer(|a, b| match (a.as_str(), b.as_str()) {
                (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
                _ => a == b,
            })
        };
        let codes = query_of(["QWE", "bnm", "qwe", "TYU"].map(Value::from));

        assert_eq!(
            codes.distinct_with(ignore_case()).to_array().unwrap(),
            vec![json!("QWE"), json!("bnm"), json!("TYU")]
        );
        assert_eq!(
            codes.intersect_with(vec![json!("BNM"), json!("tyu")], ignore_case()).to_array().unwrap(),
            vec![json!("bnm"), json!("TYU")]
        );
        assert_eq!(
            codes.except_with(vec![json!("qwe")], ignore_case()).to_array().unwrap(),
            vec![json!("bnm"), json!("TYU")]
        );
        assert!(codes
            .sequence_equal_with(["qwe", "BNM", "QWE", "tyu"].map(Value::from), ignore_case())
            .unwrap());
        assert!(!codes.sequence_equal(["qwe", "BNM", "QWE", "tyu"].map(Value::from)).unwrap());

        let suppliers = vec![json!({"code": "bnm", "name": "Bonum"}), json!({"code": "fgh", "name": "Fugh"})];
        let named = query_of(orders())
            .join_with(
                suppliers.clone(),
                "o => o.supplier",
                "s => s.code",
                "(o, s) => s.name + ':' + o.count",
                ignore_case(),
            )
            .to_array()
            .unwrap();
        assert_eq!(
            named,
            vec![json!("Bonum:67"), json!("Bonum:13"), json!("Fugh:34"), json!("Fugh:86")]
        );

        let per_supplier = query_of(suppliers)
            .group_join_with(
                orders(),
                "s => s.code",
                "o => o.supplier",
                "(s, group) => { name: s.name, orders: group.length }",
                ignore_case(),
            )
            .to_array()
            .unwrap();
        assert_eq!(
            per_supplier,
            vec![json!({"name": "Bonum", "orders": 2}), json!({"name": "Fugh", "orders": 2})]
        );
    }

    #[test]
    fn test_optional_arguments() {
        let fold = "(acc, x) => acc == null ? 'seed-was-null' : acc";
        let query = query_of(ids(2));
        assert_eq!(
            query.aggregate(fold, Some(Value::Null), None).unwrap(),
            json!("seed-was-null")
        );
        assert_eq!(query.aggregate(fold, None, None).unwrap(), json!(0));

        let groups = query_of(orders())
            .group_by_with("o => o.supplier", None, None)
            .to_array_as::<Grouping>()
            .unwrap();
        assert_eq!(groups.len(), 4);
        assert_eq!(groups[0].key, json!("QWE"));

        let placeholder = vec![QueryPart::of(QueryFunc::Count, vec![PartArgument::absent()])];
        let execution = query.provider().execute(&placeholder).unwrap();
        assert_eq!(execution.value, json!(2));
    }

    #[test]
    fn test_cast_failure_on_wide_text() {
        let wide = Value::from(format!("ab{}", "中".repeat(25)));
        let result = query_of(vec![wide]).cast(ValueKind::Number).to_array();
        assert!(matches!(result, Err(QueryError::InvalidCast { .. })));

        let long = Value::from("中".repeat(100));
        let result = query_of(vec![long]).sum();
        assert!(matches!(result, Err(QueryError::InvalidCast { .. })));
    }

    #[test]
    fn test_reconstruction_failure() {
        #[derive(Debug, Deserialize)]
        #[allow(dead_code)]
        struct Row {
            id: i64,
        }

        let result = query_of(vec![json!({"name": "QWE"})]).to_array_as::<Row>();
        assert!(matches!(result, Err(QueryError::InvalidCast { .. })));
    }

    #[test]
    fn test_iteration_is_lazy() {
        let provider = LocalProvider::once((1..=3).map(Value::from));
        let query = provider.query();

        let pending = query.iter();
        assert_eq!(query.count().unwrap(), 3);
        assert_eq!(pending.count(), 0);

        let values: Vec<Value> = query_of(ids(2))
            .select("x => x.id")
            .into_iter()
            .collect::<QueryResult<_>>()
            .unwrap();
        assert_eq!(values, vec![json!(1), json!(2)]);
    }

    #[test]
    fn test_iteration_yields_error_once() {
        let mut iter = query_of(ids(2)).select("x => x.id / 0").iter();
        assert!(matches!(iter.next(), Some(Err(QueryError::Evaluation(_)))));
        assert!(iter.next().is_none());
    }

    #[test]
    fn test_terminal_not_last() {
        let query = query_of(ids(2)).append(QueryPart::of(QueryFunc::Count, Vec::new()));
        assert!(matches!(
            query.to_array(),
            Err(QueryError::UnsupportedOperation(_))
        ));
    }

    #[tokio::test]
    async fn test_async_parity() {
        let query = query_of(orders()).where_("o => o.count > 5");

        assert_eq!(query.to_array_async().await, query.to_array());
        assert_eq!(query.count_async().await, query.count());
        assert_eq!(query.first_async().await, query.first());
        assert_eq!(query.single_async().await, query.single());
        assert_eq!(query.last_or_default_async().await, query.last_or_default());
        assert_eq!(query.element_at_async(10).await, query.element_at(10));
        assert_eq!(query.sum_by_async("o => o.count").await, query.sum_by("o => o.count"));
        assert_eq!(query.average_by_async("o => o.count").await, query.average_by("o => o.count"));
        assert_eq!(query.max_by_async("o => o.supplier").await, query.max_by("o => o.supplier"));
        assert_eq!(query.any_where_async("o => o.count > 80").await, query.any_where("o => o.count > 80"));
        assert_eq!(query.all_async("o => o.count > 80").await, query.all("o => o.count > 80"));
        assert_eq!(query.contains_async(json!(1)).await, query.contains(json!(1)));
        assert_eq!(query.sequence_equal_async(orders()).await, query.sequence_equal(orders()));

        assert_eq!(query.first_or_default_async().await, query.first_or_default());
        assert_eq!(query.element_at_or_default_async(10).await, query.element_at_or_default(10));
        assert_eq!(query.single_or_default_async().await, Err(QueryError::MultipleMatch));
        assert_eq!(query.single_or_default_async().await, query.single_or_default());
        assert_eq!(
            query.aggregate_async("(acc, o) => acc + o.count", None, Some("acc => acc * 2".into())).await,
            query.aggregate("(acc, o) => acc + o.count", None, Some("acc => acc * 2".into()))
        );
        assert_eq!(
            query.aggregate_async("(acc, o) => acc + o.count", None, Some("acc => acc * 2".into())).await,
            Ok(json!(416))
        );

        let empty = query_of(Vec::new());
        assert_eq!(empty.min_async().await, empty.min());
        assert_eq!(empty.first_or_default_async().await, Ok(Value::Null));
        assert_eq!(empty.single_async().await, Err(QueryError::EmptySequence));
        assert_eq!(
            empty.aggregate_async("(a, x) => a + x", None, None).await,
            empty.aggregate("(a, x) => a + x", None, None)
        );

        let counted = query_of(ids(5)).inline_count().take(1);
        assert_eq!(counted.to_array_async().await, counted.to_array());
    }

    #[tokio::test]
    async fn test_stream() {
        let values: Vec<QueryResult<Value>> = query_of(ids(3))
            .select("x => x.id * 10")
            .into_stream()
            .collect()
            .await;
        assert_eq!(values, vec![Ok(json!(10)), Ok(json!(20)), Ok(json!(30))]);

        let failed: Vec<QueryResult<Value>> = query_of(ids(3))
            .select("x => x.missing - 1")
            .into_stream()
            .collect()
            .await;
        assert_eq!(failed.len(), 1);
        assert!(matches!(failed[0], Err(QueryError::Evaluation(_))));
    }

    proptest! {
        #[test]
        fn prop_order_by_is_stable(keys in prop::collection::vec(0i64..5, 0..40)) {
            let items: Vec<Value> = keys
                .iter()
                .enumerate()
                .map(|(tag, key)| json!({ "key": key, "tag": tag }))
                .collect();

            let mut expected = items.clone();
            expected.sort_by_key(|item| item["key"].as_i64());

            let sorted = query_of(items).order_by("x => x.key").to_array().unwrap();
            prop_assert_eq!(sorted, expected);
        }

        #[test]
        fn prop_distinct_keeps_first_occurrences(values in prop::collection::vec(0i64..8, 0..40)) {
            let mut expected: Vec<i64> = Vec::new();
            for value in &values {
                if !expected.contains(value) {
                    expected.push(*value);
                }
            }

            let distinct = query_of(values.iter().map(|v| Value::from(*v)))
                .distinct()
                .to_array()
                .unwrap();
            prop_assert_eq!(distinct, expected.into_iter().map(Value::from).collect::<Vec<_>>());
        }

        #[test]
        fn prop_skip_take_partition(len in 0usize..30, split in 0usize..35) {
            let query = query_of((0..len).map(Value::from));
            let mut rejoined = query.take(split).to_array().unwrap();
            rejoined.extend(query.skip(split).to_array().unwrap());
            prop_assert_eq!(rejoined, query.to_array().unwrap());
        }
    }
}
