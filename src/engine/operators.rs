//! Operator semantics
//!
//! Each chaining operator maps the working collection to a new one; each
//! terminal reduces it to a single value. Ordering and inline counting carry
//! state across parts and live in the executor instead.

use crate::expr::Scope;
use crate::query::{PartArgument, QueryError, QueryFunc, QueryPart, QueryResult};
use crate::value::{compare_values, describe, number, truthy, values_equal, ValueKind};
use serde_json::{json, Value};
use std::borrow::Cow;
use std::cmp::Ordering;

fn literal(part: &QueryPart, index: usize) -> QueryResult<Value> {
    part.call_arg(index, &[])
}

fn literal_index(part: &QueryPart, index: usize) -> QueryResult<usize> {
    let value = literal(part, index)?;
    value.as_u64().map(|n| n as usize).ok_or_else(|| {
        QueryError::Construction(format!(
            "{} expects a non-negative integer, got {}",
            part.kind(),
            describe(&value)
        ))
    })
}

fn literal_items(part: &QueryPart, index: usize) -> QueryResult<Vec<Value>> {
    match literal(part, index)? {
        Value::Array(items) => Ok(items),
        other => Err(QueryError::Construction(format!(
            "{} expects a sequence, got {}",
            part.kind(),
            describe(&other)
        ))),
    }
}

fn literal_kind(part: &QueryPart, index: usize) -> QueryResult<ValueKind> {
    let value = literal(part, index)?;
    value
        .as_str()
        .and_then(ValueKind::from_str)
        .ok_or_else(|| {
            QueryError::Construction(format!("{} got unknown kind {}", part.kind(), describe(&value)))
        })
}

/// Run the predicate at `index` against `(item, position)`
fn test(part: &QueryPart, index: usize, item: &Value, position: usize) -> QueryResult<bool> {
    let result = part.call_arg(index, &[item.clone(), Value::from(position)])?;
    Ok(truthy(&result))
}

/// Equality under an optional comparer argument
pub(crate) struct Equality<'a> {
    comparer: Option<&'a PartArgument>,
    scopes: &'a [Scope],
}

impl<'a> Equality<'a> {
    /// Comparer taken from the part's argument at `index`, if given
    pub(crate) fn of(part: &'a QueryPart, index: usize) -> Self {
        Self {
            comparer: part.optional_arg(index),
            scopes: part.scopes(),
        }
    }

    pub(crate) fn eq(&self, a: &Value, b: &Value) -> QueryResult<bool> {
        match self.comparer {
            Some(comparer) => {
                let result = comparer.call(&[a.clone(), b.clone()], self.scopes)?;
                Ok(truthy(&result))
            }
            None => Ok(values_equal(a, b)),
        }
    }

    fn position(&self, haystack: &[Value], needle: &Value) -> QueryResult<Option<usize>> {
        for (i, candidate) in haystack.iter().enumerate() {
            if self.eq(candidate, needle)? {
                return Ok(Some(i));
            }
        }
        Ok(None)
    }

    fn contains(&self, haystack: &[Value], needle: &Value) -> QueryResult<bool> {
        Ok(self.position(haystack, needle)?.is_some())
    }

    /// Keep the first occurrence of every element, in place
    fn dedup(&self, items: Vec<Value>) -> QueryResult<Vec<Value>> {
        let mut kept: Vec<Value> = Vec::with_capacity(items.len());
        for item in items {
            if !self.contains(&kept, &item)? {
                kept.push(item);
            }
        }
        Ok(kept)
    }
}

pub fn filter(part: &QueryPart, items: Vec<Value>) -> QueryResult<Vec<Value>> {
    let mut kept = Vec::with_capacity(items.len());
    for (i, item) in items.into_iter().enumerate() {
        if test(part, 0, &item, i)? {
            kept.push(item);
        }
    }
    Ok(kept)
}

pub fn select(part: &QueryPart, items: Vec<Value>) -> QueryResult<Vec<Value>> {
    items
        .into_iter()
        .enumerate()
        .map(|(i, item)| part.call_arg(0, &[item, Value::from(i)]))
        .collect()
}

/// Map and flatten one level; `null` results are dropped, scalars kept
pub fn select_many(part: &QueryPart, items: Vec<Value>) -> QueryResult<Vec<Value>> {
    let mut flat = Vec::new();
    for (i, item) in items.into_iter().enumerate() {
        match part.call_arg(0, &[item, Value::from(i)])? {
            Value::Array(inner) => flat.extend(inner),
            Value::Null => {}
            scalar => flat.push(scalar),
        }
    }
    Ok(flat)
}

pub fn cast(part: &QueryPart, items: Vec<Value>) -> QueryResult<Vec<Value>> {
    let target = literal_kind(part, 0)?;
    items.into_iter().map(|item| convert(item, target)).collect()
}

/// Convert a value to a kind; `null` converts to anything
pub fn convert(value: Value, target: ValueKind) -> QueryResult<Value> {
    if value.is_null() {
        return Ok(value);
    }

    let converted = match (target, &value) {
        (ValueKind::Number, Value::Number(_))
        | (ValueKind::String, Value::String(_))
        | (ValueKind::Boolean, Value::Bool(_))
        | (ValueKind::Array, Value::Array(_))
        | (ValueKind::Object, Value::Object(_)) => Some(value.clone()),
        (ValueKind::Number, Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|n| n.is_finite())
            .map(number),
        (ValueKind::Number | ValueKind::Integer, Value::Bool(b)) => Some(Value::from(i64::from(*b))),
        (ValueKind::Integer, Value::Number(n)) => {
            n.as_f64().filter(|f| f.fract() == 0.0).map(number)
        }
        (ValueKind::Integer, Value::String(s)) => s.trim().parse::<i64>().ok().map(Value::from),
        (ValueKind::String, Value::Number(n)) => Some(Value::String(n.to_string())),
        (ValueKind::String, Value::Bool(b)) => Some(Value::String(b.to_string())),
        (ValueKind::String, Value::Array(_) | Value::Object(_)) => {
            Some(Value::String(value.to_string()))
        }
        (ValueKind::Boolean, Value::String(s)) => match s.as_str() {
            "true" => Some(Value::Bool(true)),
            "false" => Some(Value::Bool(false)),
            _ => None,
        },
        (ValueKind::Boolean, Value::Number(_)) => Some(Value::Bool(truthy(&value))),
        _ => None,
    };

    converted.ok_or_else(|| QueryError::invalid_cast(&value, target.to_string()))
}

pub fn of_type(part: &QueryPart, items: Vec<Value>) -> QueryResult<Vec<Value>> {
    let kind = literal_kind(part, 0)?;
    Ok(items.into_iter().filter(|item| kind.matches(item)).collect())
}

pub fn distinct(part: &QueryPart, items: Vec<Value>) -> QueryResult<Vec<Value>> {
    Equality::of(part, 0).dedup(items)
}

pub fn union(part: &QueryPart, mut items: Vec<Value>) -> QueryResult<Vec<Value>> {
    items.extend(literal_items(part, 0)?);
    Equality::of(part, 1).dedup(items)
}

pub fn intersect(part: &QueryPart, items: Vec<Value>) -> QueryResult<Vec<Value>> {
    let other = literal_items(part, 0)?;
    let eq = Equality::of(part, 1);

    let mut kept: Vec<Value> = Vec::new();
    for item in items {
        if eq.contains(&other, &item)? && !eq.contains(&kept, &item)? {
            kept.push(item);
        }
    }
    Ok(kept)
}

pub fn except(part: &QueryPart, items: Vec<Value>) -> QueryResult<Vec<Value>> {
    let other = literal_items(part, 0)?;
    let eq = Equality::of(part, 1);

    let mut kept: Vec<Value> = Vec::new();
    for item in items {
        if !eq.contains(&other, &item)? && !eq.contains(&kept, &item)? {
            kept.push(item);
        }
    }
    Ok(kept)
}

pub fn concat(part: &QueryPart, mut items: Vec<Value>) -> QueryResult<Vec<Value>> {
    items.extend(literal_items(part, 0)?);
    Ok(items)
}

pub fn zip(part: &QueryPart, items: Vec<Value>) -> QueryResult<Vec<Value>> {
    let other = literal_items(part, 0)?;
    items
        .into_iter()
        .zip(other)
        .map(|(a, b)| part.call_arg(1, &[a, b]))
        .collect()
}

fn keys(part: &QueryPart, index: usize, items: &[Value]) -> QueryResult<Vec<Value>> {
    items
        .iter()
        .map(|item| part.call_arg(index, &[item.clone()]))
        .collect()
}

/// Nested-loop inner join; left order, then right order within a left element
pub fn join(part: &QueryPart, items: Vec<Value>) -> QueryResult<Vec<Value>> {
    let other = literal_items(part, 0)?;
    let left_keys = keys(part, 1, &items)?;
    let right_keys = keys(part, 2, &other)?;
    let eq = Equality::of(part, 4);

    let mut joined = Vec::new();
    for (left, left_key) in items.iter().zip(&left_keys) {
        for (right, right_key) in other.iter().zip(&right_keys) {
            if eq.eq(left_key, right_key)? {
                joined.push(part.call_arg(3, &[left.clone(), right.clone()])?);
            }
        }
    }
    Ok(joined)
}

/// One result per left element with its (possibly empty) group of matches
pub fn group_join(part: &QueryPart, items: Vec<Value>) -> QueryResult<Vec<Value>> {
    let other = literal_items(part, 0)?;
    let left_keys = keys(part, 1, &items)?;
    let right_keys = keys(part, 2, &other)?;
    let eq = Equality::of(part, 4);

    let mut joined = Vec::with_capacity(items.len());
    for (left, left_key) in items.into_iter().zip(&left_keys) {
        let mut matches = Vec::new();
        for (right, right_key) in other.iter().zip(&right_keys) {
            if eq.eq(left_key, right_key)? {
                matches.push(right.clone());
            }
        }
        joined.push(part.call_arg(3, &[left, Value::Array(matches)])?);
    }
    Ok(joined)
}

/// Sort key of every element, from the key selector
pub fn sort_keys(part: &QueryPart, items: &[Value]) -> QueryResult<Vec<Value>> {
    keys(part, 0, items)
}

/// Prefix of the working collection; a borrowed source stays borrowed
pub fn take<'a>(part: &QueryPart, items: Cow<'a, [Value]>) -> QueryResult<Cow<'a, [Value]>> {
    let count = literal_index(part, 0)?;
    Ok(match items {
        Cow::Borrowed(items) => Cow::Borrowed(&items[..count.min(items.len())]),
        Cow::Owned(mut items) => {
            items.truncate(count);
            Cow::Owned(items)
        }
    })
}

pub fn skip<'a>(part: &QueryPart, items: Cow<'a, [Value]>) -> QueryResult<Cow<'a, [Value]>> {
    let count = literal_index(part, 0)?;
    Ok(match items {
        Cow::Borrowed(items) => Cow::Borrowed(&items[count.min(items.len())..]),
        Cow::Owned(mut items) => {
            items.drain(..count.min(items.len()));
            Cow::Owned(items)
        }
    })
}

pub fn take_while(part: &QueryPart, items: Vec<Value>) -> QueryResult<Vec<Value>> {
    let mut kept = Vec::new();
    for (i, item) in items.into_iter().enumerate() {
        if !test(part, 0, &item, i)? {
            break;
        }
        kept.push(item);
    }
    Ok(kept)
}

pub fn skip_while(part: &QueryPart, mut items: Vec<Value>) -> QueryResult<Vec<Value>> {
    let mut start = items.len();
    for (i, item) in items.iter().enumerate() {
        if !test(part, 0, item, i)? {
            start = i;
            break;
        }
    }
    Ok(items.split_off(start))
}

/// Groups in first-occurrence key order
pub fn group_by(part: &QueryPart, items: Vec<Value>) -> QueryResult<Vec<Value>> {
    let eq = Equality::of(part, 2);

    let mut groups: Vec<(Value, Vec<Value>)> = Vec::new();
    for item in items {
        let key = part.call_arg(0, &[item.clone()])?;
        let mut slot = None;
        for (i, (existing, _)) in groups.iter().enumerate() {
            if eq.eq(existing, &key)? {
                slot = Some(i);
                break;
            }
        }
        match slot {
            Some(i) => groups[i].1.push(item),
            None => groups.push((key, vec![item])),
        }
    }

    let selector = part.optional_arg(1);
    groups
        .into_iter()
        .map(|(key, members)| match selector {
            Some(selector) => selector.call(&[key, Value::Array(members)], part.scopes()),
            None => Ok(json!({ "key": key, "items": members })),
        })
        .collect()
}

pub fn reverse(mut items: Vec<Value>) -> Vec<Value> {
    items.reverse();
    items
}

pub fn default_if_empty(part: &QueryPart, items: Vec<Value>) -> QueryResult<Vec<Value>> {
    if !items.is_empty() {
        return Ok(items);
    }
    let default = match part.optional_arg(0) {
        Some(default) => default.call(&[], part.scopes())?,
        None => Value::Null,
    };
    Ok(vec![default])
}

#[derive(Debug, Clone, Copy)]
enum Pick {
    First,
    Last,
    Single,
}

/// Reduce the working collection with a terminal operator
///
/// Only `toArray` takes ownership; every other terminal reads the collection
/// in place and clones just the value it returns.
pub fn terminal(func: QueryFunc, part: &QueryPart, items: Cow<'_, [Value]>) -> QueryResult<Value> {
    match func {
        QueryFunc::ToArray => Ok(Value::Array(items.into_owned())),
        QueryFunc::Contains => {
            let item = literal(part, 0)?;
            Equality::of(part, 1).contains(&items, &item).map(Value::Bool)
        }
        QueryFunc::SequenceEqual => sequence_equal(part, &items).map(Value::Bool),
        QueryFunc::Any => {
            if part.optional_arg(0).is_none() {
                return Ok(Value::Bool(!items.is_empty()));
            }
            for (i, item) in items.iter().enumerate() {
                if test(part, 0, item, i)? {
                    return Ok(Value::Bool(true));
                }
            }
            Ok(Value::Bool(false))
        }
        QueryFunc::All => {
            for (i, item) in items.iter().enumerate() {
                if !test(part, 0, item, i)? {
                    return Ok(Value::Bool(false));
                }
            }
            Ok(Value::Bool(true))
        }
        QueryFunc::Count => {
            if part.optional_arg(0).is_none() {
                return Ok(Value::from(items.len()));
            }
            let mut count = 0;
            for (i, item) in items.iter().enumerate() {
                if test(part, 0, item, i)? {
                    count += 1;
                }
            }
            Ok(Value::from(count))
        }
        QueryFunc::Min => extremum(part, &items, Ordering::Less),
        QueryFunc::Max => extremum(part, &items, Ordering::Greater),
        QueryFunc::Sum => Ok(number(numbers(part, &items)?.iter().sum())),
        QueryFunc::Average => {
            let values = numbers(part, &items)?;
            if values.is_empty() {
                return Ok(Value::from(0));
            }
            Ok(number(values.iter().sum::<f64>() / values.len() as f64))
        }
        QueryFunc::Aggregate => aggregate(part, &items),
        QueryFunc::First => singleton(part, &items, Pick::First, false),
        QueryFunc::FirstOrDefault => singleton(part, &items, Pick::First, true),
        QueryFunc::Last => singleton(part, &items, Pick::Last, false),
        QueryFunc::LastOrDefault => singleton(part, &items, Pick::Last, true),
        QueryFunc::Single => singleton(part, &items, Pick::Single, false),
        QueryFunc::SingleOrDefault => singleton(part, &items, Pick::Single, true),
        QueryFunc::ElementAt => element_at(part, &items, false),
        QueryFunc::ElementAtOrDefault => element_at(part, &items, true),
        other => Err(QueryError::UnsupportedOperation(format!(
            "{} is not a terminal operator",
            other
        ))),
    }
}

fn sequence_equal(part: &QueryPart, items: &[Value]) -> QueryResult<bool> {
    let other = literal_items(part, 0)?;
    if items.len() != other.len() {
        return Ok(false);
    }
    let eq = Equality::of(part, 1);
    for (a, b) in items.iter().zip(&other) {
        if !eq.eq(a, b)? {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Elements, or their projections when a selector is given
fn selected<'a>(part: &QueryPart, items: &'a [Value]) -> QueryResult<Cow<'a, [Value]>> {
    match part.optional_arg(0) {
        Some(selector) => items
            .iter()
            .map(|item| selector.call(&[item.clone()], part.scopes()))
            .collect::<QueryResult<Vec<_>>>()
            .map(Cow::Owned),
        None => Ok(Cow::Borrowed(items)),
    }
}

fn numbers(part: &QueryPart, items: &[Value]) -> QueryResult<Vec<f64>> {
    selected(part, items)?
        .iter()
        .map(|value| {
            value
                .as_f64()
                .ok_or_else(|| QueryError::invalid_cast(value, "number"))
        })
        .collect()
}

/// First element that orders `wanted` against every other
fn extremum(part: &QueryPart, items: &[Value], wanted: Ordering) -> QueryResult<Value> {
    let values = selected(part, items)?;
    let mut best: Option<&Value> = None;
    for value in values.iter() {
        best = match best {
            Some(current) if compare_values(value, current) != wanted => Some(current),
            _ => Some(value),
        };
    }
    best.cloned().ok_or(QueryError::EmptySequence)
}

fn aggregate(part: &QueryPart, items: &[Value]) -> QueryResult<Value> {
    let mut acc = match part.optional_arg(1) {
        Some(seed) => seed.call(&[], part.scopes())?,
        None => Value::from(0),
    };
    for item in items {
        acc = part.call_arg(0, &[acc, item.clone()])?;
    }

    match part.optional_arg(2) {
        Some(result) => result.call(&[acc], part.scopes()),
        None => Ok(acc),
    }
}

fn singleton(part: &QueryPart, items: &[Value], pick: Pick, or_default: bool) -> QueryResult<Value> {
    let matches: Vec<&Value> = match part.optional_arg(0) {
        Some(_) => {
            let mut matches = Vec::new();
            for (i, item) in items.iter().enumerate() {
                if test(part, 0, item, i)? {
                    matches.push(item);
                }
            }
            matches
        }
        None => items.iter().collect(),
    };

    let found = match pick {
        Pick::First => matches.first(),
        Pick::Last => matches.last(),
        Pick::Single => {
            if matches.len() > 1 {
                return Err(QueryError::MultipleMatch);
            }
            matches.first()
        }
    };

    match found {
        Some(value) => Ok((*value).clone()),
        None if or_default => Ok(Value::Null),
        None => Err(QueryError::EmptySequence),
    }
}

fn element_at(part: &QueryPart, items: &[Value], or_default: bool) -> QueryResult<Value> {
    let index = literal_index(part, 0)?;
    match items.get(index) {
        Some(value) => Ok(value.clone()),
        None if or_default => Ok(Value::Null),
        None => Err(QueryError::IndexOutOfRange {
            index,
            len: items.len(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn part(func: QueryFunc, args: Vec<PartArgument>) -> QueryPart {
        QueryPart::of(func, args)
    }

    fn nums(values: &[i64]) -> Vec<Value> {
        values.iter().map(|n| json!(n)).collect()
    }

    #[test]
    fn test_select_many_flattens_one_level() {
        let p = part(QueryFunc::SelectMany, vec!["x => x.tags".into()]);
        let items = vec![
            json!({"tags": ["a", "b"]}),
            json!({"tags": null}),
            json!({"tags": "c"}),
            json!({"tags": [["d"]]}),
        ];
        let flat = select_many(&p, items).unwrap();
        assert_eq!(flat, vec![json!("a"), json!("b"), json!("c"), json!(["d"])]);
    }

    #[test]
    fn test_convert() {
        assert_eq!(convert(json!("42"), ValueKind::Number).unwrap(), json!(42));
        assert_eq!(convert(json!("2.5"), ValueKind::Number).unwrap(), json!(2.5));
        assert_eq!(convert(json!(3.0), ValueKind::Integer).unwrap(), json!(3));
        assert_eq!(convert(json!(7), ValueKind::String).unwrap(), json!("7"));
        assert_eq!(convert(json!("true"), ValueKind::Boolean).unwrap(), json!(true));
        assert_eq!(convert(json!(null), ValueKind::Object).unwrap(), json!(null));

        assert!(matches!(
            convert(json!("abc"), ValueKind::Number),
            Err(QueryError::InvalidCast { .. })
        ));
        assert!(matches!(
            convert(json!(2.5), ValueKind::Integer),
            Err(QueryError::InvalidCast { .. })
        ));
        assert!(matches!(
            convert(json!([1]), ValueKind::Object),
            Err(QueryError::InvalidCast { .. })
        ));
    }

    #[test]
    fn test_set_operations() {
        let union_part = part(QueryFunc::Union, vec![PartArgument::literal(json!([3, 4, 4, 5]))]);
        assert_eq!(union(&union_part, nums(&[1, 2, 3, 1])).unwrap(), nums(&[1, 2, 3, 4, 5]));

        let intersect_part = part(QueryFunc::Intersect, vec![PartArgument::literal(json!([2, 3, 9]))]);
        assert_eq!(intersect(&intersect_part, nums(&[3, 1, 2, 3])).unwrap(), nums(&[3, 2]));

        let except_part = part(QueryFunc::Except, vec![PartArgument::literal(json!([2]))]);
        assert_eq!(except(&except_part, nums(&[1, 2, 1, 3])).unwrap(), nums(&[1, 3]));
    }

    #[test]
    fn test_set_operation_with_comparer() {
        let p = part(
            QueryFunc::Union,
            vec![
                PartArgument::literal(json!(["B", "c"])),
                "(a, b) => a.length == b.length".into(),
            ],
        );
        assert_eq!(union(&p, vec![json!("a")]).unwrap(), vec![json!("a")]);
    }

    #[test]
    fn test_comparer_set_operations() {
        let same_length =
            || PartArgument::comparer(|a, b| a.as_str().map(str::len) == b.as_str().map(str::len));
        let words = || vec![json!("ab"), json!("c"), json!("xy"), json!("def")];

        let p = part(QueryFunc::Distinct, vec![same_length()]);
        assert_eq!(distinct(&p, words()).unwrap(), vec![json!("ab"), json!("c"), json!("def")]);

        let p = part(
            QueryFunc::Intersect,
            vec![PartArgument::literal(json!(["zz"])), same_length()],
        );
        assert_eq!(intersect(&p, words()).unwrap(), vec![json!("ab")]);

        let p = part(
            QueryFunc::Except,
            vec![PartArgument::literal(json!(["q"])), same_length()],
        );
        assert_eq!(except(&p, words()).unwrap(), vec![json!("ab"), json!("def")]);

        let p = part(
            QueryFunc::SequenceEqual,
            vec![
                PartArgument::literal(json!(["AB", "C"])),
                "(a, b) => a.length == b.length".into(),
            ],
        );
        let same = terminal(QueryFunc::SequenceEqual, &p, vec![json!("xy"), json!("z")].into());
        assert_eq!(same.unwrap(), json!(true));
        let differs = terminal(QueryFunc::SequenceEqual, &p, vec![json!("xy"), json!("zz")].into());
        assert_eq!(differs.unwrap(), json!(false));
    }

    #[test]
    fn test_join_with_comparer() {
        let p = part(
            QueryFunc::Join,
            vec![
                PartArgument::literal(json!([{"code": "qwe"}, {"code": "bnm"}])),
                "o => o.supplier".into(),
                "s => s.code".into(),
                "(o, s) => o.id".into(),
                PartArgument::comparer(|a, b| match (a.as_str(), b.as_str()) {
                    (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
                    _ => false,
                }),
            ],
        );
        let orders = vec![
            json!({"id": 1, "supplier": "BNM"}),
            json!({"id": 2, "supplier": "TYU"}),
            json!({"id": 3, "supplier": "QWE"}),
        ];
        assert_eq!(join(&p, orders).unwrap(), nums(&[1, 3]));
    }

    #[test]
    fn test_group_join_with_comparer() {
        let p = part(
            QueryFunc::GroupJoin,
            vec![
                PartArgument::literal(json!([1, 4, 6, 7])),
                "l => l".into(),
                "r => r".into(),
                "(l, g) => g".into(),
                "(a, b) => a % 2 == b % 2".into(),
            ],
        );
        let joined = group_join(&p, nums(&[2, 3])).unwrap();
        assert_eq!(joined, vec![json!([4, 6]), json!([1, 7])]);
    }

    #[test]
    fn test_take_and_skip_keep_borrowed_source() {
        let items = nums(&[1, 2, 3, 4]);

        let take_two = part(QueryFunc::Take, vec![PartArgument::literal(2)]);
        let taken = take(&take_two, Cow::Borrowed(items.as_slice())).unwrap();
        assert_eq!(taken.as_ref(), &nums(&[1, 2])[..]);
        assert!(matches!(taken, Cow::Borrowed(_)));

        let skip_all = part(QueryFunc::Skip, vec![PartArgument::literal(9)]);
        let skipped = skip(&skip_all, Cow::Borrowed(items.as_slice())).unwrap();
        assert!(matches!(skipped, Cow::Borrowed(slice) if slice.is_empty()));

        let skip_one = part(QueryFunc::Skip, vec![PartArgument::literal(1)]);
        let owned = skip(&skip_one, Cow::Owned(items)).unwrap();
        assert_eq!(owned.into_owned(), nums(&[2, 3, 4]));
    }

    #[test]
    fn test_absent_arguments_are_not_null_literals() {
        let fold = "(acc, x) => acc == null ? 'seed-was-null' : acc";

        let p = part(
            QueryFunc::Aggregate,
            vec![fold.into(), PartArgument::literal(Value::Null), PartArgument::absent()],
        );
        let folded = terminal(QueryFunc::Aggregate, &p, nums(&[1]).into()).unwrap();
        assert_eq!(folded, json!("seed-was-null"));

        let p = part(
            QueryFunc::Aggregate,
            vec![fold.into(), PartArgument::absent(), PartArgument::absent()],
        );
        assert_eq!(terminal(QueryFunc::Aggregate, &p, nums(&[1]).into()).unwrap(), json!(0));

        for func in [QueryFunc::Count, QueryFunc::Any, QueryFunc::First, QueryFunc::Sum] {
            let p = part(func, vec![PartArgument::absent()]);
            let expected = match func {
                QueryFunc::Count => json!(3),
                QueryFunc::Any => json!(true),
                QueryFunc::First => json!(1),
                _ => json!(6),
            };
            assert_eq!(terminal(func, &p, nums(&[1, 2, 3]).into()).unwrap(), expected);
        }

        let p = part(QueryFunc::DefaultIfEmpty, vec![PartArgument::absent()]);
        assert_eq!(default_if_empty(&p, Vec::new()).unwrap(), vec![Value::Null]);
    }

    #[test]
    fn test_join_left_order_and_matches() {
        let p = part(
            QueryFunc::Join,
            vec![
                PartArgument::literal(json!(["b", "b", "c"])),
                "x => x".into(),
                "y => y".into(),
                "(l, r) => l + r".into(),
            ],
        );
        let joined = join(&p, vec![json!("a"), json!("b")]).unwrap();
        assert_eq!(joined, vec![json!("bb"), json!("bb")]);
    }

    #[test]
    fn test_group_join_keeps_unmatched() {
        let p = part(
            QueryFunc::GroupJoin,
            vec![
                PartArgument::literal(json!([{"k": 1, "v": "x"}, {"k": 1, "v": "y"}])),
                "l => l".into(),
                "r => r.k".into(),
                "(l, g) => { key: l, n: g.length }".into(),
            ],
        );
        let joined = group_join(&p, nums(&[1, 2])).unwrap();
        assert_eq!(joined, vec![json!({"key": 1, "n": 2}), json!({"key": 2, "n": 0})]);
    }

    #[test]
    fn test_group_by_with_selector_and_comparer() {
        let p = part(
            QueryFunc::GroupBy,
            vec![
                "w => w".into(),
                "(k, items) => k + ':' + items.length".into(),
                "(a, b) => a.length == b.length".into(),
            ],
        );
        let grouped = group_by(&p, vec![json!("ab"), json!("c"), json!("xy")]).unwrap();
        assert_eq!(grouped, vec![json!("ab:2"), json!("c:1")]);
    }

    #[test]
    fn test_while_operators_stop_at_first_failure() {
        let take_part = part(QueryFunc::TakeWhile, vec!["x => x < 3".into()]);
        assert_eq!(take_while(&take_part, nums(&[1, 2, 5, 1])).unwrap(), nums(&[1, 2]));

        let skip_part = part(QueryFunc::SkipWhile, vec!["x => x < 3".into()]);
        assert_eq!(skip_while(&skip_part, nums(&[1, 2, 5, 1])).unwrap(), nums(&[5, 1]));
        assert!(skip_while(&skip_part, nums(&[1, 2])).unwrap().is_empty());

        let indexed = part(QueryFunc::TakeWhile, vec!["(x, i) => i < 2".into()]);
        assert_eq!(take_while(&indexed, nums(&[9, 9, 9])).unwrap(), nums(&[9, 9]));
    }

    #[test]
    fn test_aggregate() {
        let p = part(QueryFunc::Aggregate, vec!["(acc, x) => acc + x".into()]);
        assert_eq!(terminal(QueryFunc::Aggregate, &p, nums(&[1, 2, 3]).into()).unwrap(), json!(6));

        let p = part(
            QueryFunc::Aggregate,
            vec![
                "(acc, x) => acc + x".into(),
                PartArgument::literal("n"),
                "acc => acc + '!'".into(),
            ],
        );
        assert_eq!(terminal(QueryFunc::Aggregate, &p, nums(&[1, 2]).into()).unwrap(), json!("n12!"));
    }

    #[test]
    fn test_numeric_terminals_reject_non_numbers() {
        let p = part(QueryFunc::Sum, Vec::new());
        let result = terminal(QueryFunc::Sum, &p, vec![json!(1), json!("2")].into());
        assert!(matches!(result, Err(QueryError::InvalidCast { .. })));
    }

    #[test]
    fn test_extremum_keeps_first() {
        let p = part(QueryFunc::Min, vec!["x => x.n".into()]);
        let items = vec![json!({"n": 2}), json!({"n": 1}), json!({"n": 1})];
        assert_eq!(terminal(QueryFunc::Min, &p, items.into()).unwrap(), json!(1));

        let p = part(QueryFunc::Max, Vec::new());
        assert_eq!(terminal(QueryFunc::Max, &p, nums(&[3, 9, 2]).into()).unwrap(), json!(9));
    }

    #[test]
    fn test_non_terminal_rejected() {
        let p = part(QueryFunc::Where, vec!["x => x".into()]);
        assert!(matches!(
            terminal(QueryFunc::Where, &p, Cow::Borrowed(&[])),
            Err(QueryError::UnsupportedOperation(_))
        ));
    }
}
