//! Chain Executor
//!
//! Interprets a part chain front-to-back over a working collection that
//! borrows the source until the first part rewrites it:
//!
//! ```text
//! source → part 1 → part 2 → ... → terminal → Execution { value, inline_count }
//! ```
//!
//! A chain without a terminal part materializes the working collection.

use crate::engine::operators;
use crate::query::{Execution, QueryError, QueryFunc, QueryPart, QueryResult};
use crate::value::compare_values;
use serde_json::Value;
use std::borrow::Cow;
use std::cmp::Ordering;

/// Inline count side-channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InlineCount {
    Disabled,
    /// Enabled, waiting for the first paging part
    Pending,
    Captured(usize),
}

impl InlineCount {
    fn enable(&mut self) {
        if *self == Self::Disabled {
            *self = Self::Pending;
        }
    }

    fn before_paging(&mut self, len: usize) {
        if *self == Self::Pending {
            *self = Self::Captured(len);
        }
    }

    fn resolve(&self, len: usize) -> Option<usize> {
        match self {
            Self::Disabled => None,
            Self::Pending => Some(len),
            Self::Captured(count) => Some(*count),
        }
    }
}

/// Sort keys of the active ordering, one row per working element
#[derive(Debug, Default)]
struct SortState {
    keys: Vec<Vec<Value>>,
    descending: Vec<bool>,
}

impl SortState {
    fn start(len: usize) -> Self {
        Self {
            keys: vec![Vec::new(); len],
            descending: Vec::new(),
        }
    }

    /// Add a key column and stably re-sort by the composite key
    fn then(mut self, items: Vec<Value>, column: Vec<Value>, descending: bool) -> (Vec<Value>, Self) {
        for (row, key) in self.keys.iter_mut().zip(column) {
            row.push(key);
        }
        self.descending.push(descending);

        let mut rows: Vec<(Value, Vec<Value>)> = items.into_iter().zip(self.keys).collect();
        rows.sort_by(|a, b| compare_keys(&a.1, &b.1, &self.descending));
        let (items, keys) = rows.into_iter().unzip();

        (
            items,
            Self {
                keys,
                descending: self.descending,
            },
        )
    }
}

fn compare_keys(a: &[Value], b: &[Value], descending: &[bool]) -> Ordering {
    for ((x, y), desc) in a.iter().zip(b).zip(descending) {
        let order = compare_values(x, y);
        let order = if *desc { order.reverse() } else { order };
        if order != Ordering::Equal {
            return order;
        }
    }
    Ordering::Equal
}

/// State threaded through one execution
///
/// The working collection borrows the source until a part has to rewrite it.
struct Run<'a> {
    items: Cow<'a, [Value]>,
    ordering: Option<SortState>,
    count: InlineCount,
}

impl Run<'_> {
    fn apply(&mut self, func: QueryFunc, part: &QueryPart) -> QueryResult<()> {
        if func.is_paging() {
            self.count.before_paging(self.items.len());
        }

        let items = std::mem::take(&mut self.items);
        let ordering = self.ordering.take();

        self.items = match func {
            QueryFunc::OrderBy | QueryFunc::OrderByDescending => {
                let items = items.into_owned();
                let column = operators::sort_keys(part, &items)?;
                let descending = func == QueryFunc::OrderByDescending;
                let (sorted, state) = SortState::start(items.len()).then(items, column, descending);
                self.ordering = Some(state);
                Cow::Owned(sorted)
            }
            QueryFunc::ThenBy | QueryFunc::ThenByDescending => {
                let state = ordering.ok_or_else(|| {
                    QueryError::UnsupportedOperation(format!(
                        "{} requires a preceding orderBy",
                        func
                    ))
                })?;
                let items = items.into_owned();
                let column = operators::sort_keys(part, &items)?;
                let descending = func == QueryFunc::ThenByDescending;
                let (sorted, state) = state.then(items, column, descending);
                self.ordering = Some(state);
                Cow::Owned(sorted)
            }
            // Leaves the collection untouched, so an active ordering survives it
            QueryFunc::InlineCount => {
                self.count.enable();
                self.ordering = ordering;
                items
            }
            QueryFunc::Take => operators::take(part, items)?,
            QueryFunc::Skip => operators::skip(part, items)?,
            other => Cow::Owned(transform(other, part, items.into_owned())?),
        };
        Ok(())
    }
}

/// Chaining operators that build a new collection
fn transform(func: QueryFunc, part: &QueryPart, items: Vec<Value>) -> QueryResult<Vec<Value>> {
    match func {
        QueryFunc::Where => operators::filter(part, items),
        QueryFunc::Select => operators::select(part, items),
        QueryFunc::SelectMany => operators::select_many(part, items),
        QueryFunc::Cast => operators::cast(part, items),
        QueryFunc::OfType => operators::of_type(part, items),
        QueryFunc::OfGuardedType => operators::filter(part, items),
        QueryFunc::Distinct => operators::distinct(part, items),
        QueryFunc::Union => operators::union(part, items),
        QueryFunc::Intersect => operators::intersect(part, items),
        QueryFunc::Except => operators::except(part, items),
        QueryFunc::Concat => operators::concat(part, items),
        QueryFunc::Zip => operators::zip(part, items),
        QueryFunc::Join => operators::join(part, items),
        QueryFunc::GroupJoin => operators::group_join(part, items),
        QueryFunc::TakeWhile => operators::take_while(part, items),
        QueryFunc::SkipWhile => operators::skip_while(part, items),
        QueryFunc::GroupBy => operators::group_by(part, items),
        QueryFunc::Reverse => Ok(operators::reverse(items)),
        QueryFunc::DefaultIfEmpty => operators::default_if_empty(part, items),
        other => Err(QueryError::UnsupportedOperation(format!(
            "{} must be the last part of a query",
            other
        ))),
    }
}

/// Execute a chain over a source
pub(crate) fn execute(
    parts: &[QueryPart],
    source: Cow<'_, [Value]>,
    trace_parts: bool,
) -> QueryResult<Execution> {
    let mut run = Run {
        items: source,
        ordering: None,
        count: InlineCount::Disabled,
    };
    let last = parts.len().saturating_sub(1);

    for (position, part) in parts.iter().enumerate() {
        let func = part.func().ok_or_else(|| {
            QueryError::UnsupportedOperation(format!("Unknown operator: {}", part.kind()))
        })?;

        if trace_parts {
            tracing::debug!(part = %part.describe(), items = run.items.len(), "executing part");
        } else {
            tracing::debug!(op = %func, items = run.items.len(), "executing part");
        }

        if func.is_terminal() {
            if position != last {
                return Err(QueryError::UnsupportedOperation(format!(
                    "{} must be the last part of a query",
                    func
                )));
            }
            let inline_count = run.count.resolve(run.items.len());
            let value = operators::terminal(func, part, run.items)?;
            return Ok(Execution { value, inline_count });
        }

        run.apply(func, part)?;
    }

    let inline_count = run.count.resolve(run.items.len());
    Ok(Execution {
        value: Value::Array(run.items.into_owned()),
        inline_count,
    })
}
