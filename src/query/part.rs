//! Query parts
//!
//! A query is an ordered chain of parts. Each part names one operator and
//! carries its arguments:
//!
//! - **QueryFunc**: the operator tags the local engine understands
//! - **PartArgument**: one expression payload in up to three forms
//!   (callable, parsed lambda, source text), each derived lazily and cached
//! - **QueryPart**: operator tag + arguments + shared scopes
//! - **PartChain**: immutable, structurally shared list of parts

use crate::expr::{evaluate, parse_lambda, Lambda, Scope};
use crate::query::error::{QueryError, QueryResult};
use serde_json::Value;
use std::fmt;
use std::sync::{Arc, OnceLock};

/// Callable form of a part argument: positional arguments and scope layers in,
/// value out
pub type Callable = Arc<dyn Fn(&[Value], &[&[Scope]]) -> QueryResult<Value> + Send + Sync>;

/// Operators understood by the local engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryFunc {
    Where,
    Select,
    SelectMany,
    Cast,
    OfType,
    OfGuardedType,
    Distinct,
    Union,
    Intersect,
    Except,
    Concat,
    Zip,
    Join,
    GroupJoin,
    OrderBy,
    OrderByDescending,
    ThenBy,
    ThenByDescending,
    Take,
    Skip,
    TakeWhile,
    SkipWhile,
    GroupBy,
    Reverse,
    DefaultIfEmpty,
    InlineCount,
    Contains,
    SequenceEqual,
    Any,
    All,
    Count,
    Min,
    Max,
    Sum,
    Average,
    Aggregate,
    First,
    FirstOrDefault,
    Last,
    LastOrDefault,
    Single,
    SingleOrDefault,
    ElementAt,
    ElementAtOrDefault,
    ToArray,
}

impl QueryFunc {
    const ALL: [QueryFunc; 45] = [
        Self::Where,
        Self::Select,
        Self::SelectMany,
        Self::Cast,
        Self::OfType,
        Self::OfGuardedType,
        Self::Distinct,
        Self::Union,
        Self::Intersect,
        Self::Except,
        Self::Concat,
        Self::Zip,
        Self::Join,
        Self::GroupJoin,
        Self::OrderBy,
        Self::OrderByDescending,
        Self::ThenBy,
        Self::ThenByDescending,
        Self::Take,
        Self::Skip,
        Self::TakeWhile,
        Self::SkipWhile,
        Self::GroupBy,
        Self::Reverse,
        Self::DefaultIfEmpty,
        Self::InlineCount,
        Self::Contains,
        Self::SequenceEqual,
        Self::Any,
        Self::All,
        Self::Count,
        Self::Min,
        Self::Max,
        Self::Sum,
        Self::Average,
        Self::Aggregate,
        Self::First,
        Self::FirstOrDefault,
        Self::Last,
        Self::LastOrDefault,
        Self::Single,
        Self::SingleOrDefault,
        Self::ElementAt,
        Self::ElementAtOrDefault,
        Self::ToArray,
    ];

    /// Operator tag as stored in a part
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Where => "where",
            Self::Select => "select",
            Self::SelectMany => "selectMany",
            Self::Cast => "cast",
            Self::OfType => "ofType",
            Self::OfGuardedType => "ofGuardedType",
            Self::Distinct => "distinct",
            Self::Union => "union",
            Self::Intersect => "intersect",
            Self::Except => "except",
            Self::Concat => "concat",
            Self::Zip => "zip",
            Self::Join => "join",
            Self::GroupJoin => "groupJoin",
            Self::OrderBy => "orderBy",
            Self::OrderByDescending => "orderByDescending",
            Self::ThenBy => "thenBy",
            Self::ThenByDescending => "thenByDescending",
            Self::Take => "take",
            Self::Skip => "skip",
            Self::TakeWhile => "takeWhile",
            Self::SkipWhile => "skipWhile",
            Self::GroupBy => "groupBy",
            Self::Reverse => "reverse",
            Self::DefaultIfEmpty => "defaultIfEmpty",
            Self::InlineCount => "inlineCount",
            Self::Contains => "contains",
            Self::SequenceEqual => "sequenceEqual",
            Self::Any => "any",
            Self::All => "all",
            Self::Count => "count",
            Self::Min => "min",
            Self::Max => "max",
            Self::Sum => "sum",
            Self::Average => "average",
            Self::Aggregate => "aggregate",
            Self::First => "first",
            Self::FirstOrDefault => "firstOrDefault",
            Self::Last => "last",
            Self::LastOrDefault => "lastOrDefault",
            Self::Single => "single",
            Self::SingleOrDefault => "singleOrDefault",
            Self::ElementAt => "elementAt",
            Self::ElementAtOrDefault => "elementAtOrDefault",
            Self::ToArray => "toArray",
        }
    }

    /// Parse from an operator tag
    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|func| func.as_str() == tag)
    }

    /// Parameter name a remote backend sends this operator under
    pub fn wire_name(&self) -> String {
        format!("${}", self.as_str())
    }

    /// Terminal operators end a chain and produce a scalar or a materialized array
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Contains
                | Self::SequenceEqual
                | Self::Any
                | Self::All
                | Self::Count
                | Self::Min
                | Self::Max
                | Self::Sum
                | Self::Average
                | Self::Aggregate
                | Self::First
                | Self::FirstOrDefault
                | Self::Last
                | Self::LastOrDefault
                | Self::Single
                | Self::SingleOrDefault
                | Self::ElementAt
                | Self::ElementAtOrDefault
                | Self::ToArray
        )
    }

    /// Paging operators fix the inline count
    pub fn is_paging(&self) -> bool {
        matches!(
            self,
            Self::Take | Self::Skip | Self::TakeWhile | Self::SkipWhile
        )
    }
}

impl fmt::Display for QueryFunc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One operator argument
///
/// Holds up to three equivalent forms of the same function. Whichever forms
/// are missing are derived on first access and cached:
///
/// - `func` from `exp` (evaluating the tree)
/// - `exp` from `exp_str` (parsing)
/// - `exp_str` from `exp` (rendering)
///
/// A native closure has no source text; its `exp`/`exp_str` are only
/// available when text was attached with [`PartArgument::with_source`].
pub struct PartArgument {
    func: OnceLock<Callable>,
    exp: OnceLock<Arc<Lambda>>,
    exp_str: OnceLock<String>,
    scopes: Vec<Scope>,
    absent: bool,
}

impl PartArgument {
    /// Create an argument from any combination of its forms
    ///
    /// Fails if none of the forms is given.
    pub fn new(
        func: Option<Callable>,
        exp: Option<Lambda>,
        exp_str: Option<String>,
        scopes: Vec<Scope>,
    ) -> QueryResult<Self> {
        if func.is_none() && exp.is_none() && exp_str.is_none() {
            return Err(QueryError::Construction(
                "part argument needs a callable or an expression".to_string(),
            ));
        }

        let argument = Self {
            func: OnceLock::new(),
            exp: OnceLock::new(),
            exp_str: OnceLock::new(),
            scopes,
            absent: false,
        };
        if let Some(func) = func {
            let _ = argument.func.set(func);
        }
        if let Some(exp) = exp {
            let _ = argument.exp.set(Arc::new(exp));
        }
        if let Some(exp_str) = exp_str {
            let _ = argument.exp_str.set(exp_str);
        }
        Ok(argument)
    }

    fn with_callable(func: Callable) -> Self {
        let argument = Self {
            func: OnceLock::new(),
            exp: OnceLock::new(),
            exp_str: OnceLock::new(),
            scopes: Vec::new(),
            absent: false,
        };
        let _ = argument.func.set(func);
        argument
    }

    /// Argument from source text, e.g. `"x => x.id > 2"`
    ///
    /// Parsing is deferred until the expression is first needed.
    pub fn from_text(source: impl Into<String>) -> Self {
        let argument = Self {
            func: OnceLock::new(),
            exp: OnceLock::new(),
            exp_str: OnceLock::new(),
            scopes: Vec::new(),
            absent: false,
        };
        let _ = argument.exp_str.set(source.into());
        argument
    }

    /// Argument from a parsed lambda
    pub fn from_lambda(lambda: Lambda) -> Self {
        let argument = Self {
            func: OnceLock::new(),
            exp: OnceLock::new(),
            exp_str: OnceLock::new(),
            scopes: Vec::new(),
            absent: false,
        };
        let _ = argument.exp.set(Arc::new(lambda));
        argument
    }

    /// Argument from a closure over all positional arguments
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(&[Value]) -> QueryResult<Value> + Send + Sync + 'static,
    {
        Self::with_callable(Arc::new(move |args: &[Value], _: &[&[Scope]]| f(args)))
    }

    /// Argument from a one-parameter closure
    pub fn lambda<F>(f: F) -> Self
    where
        F: Fn(&Value) -> Value + Send + Sync + 'static,
    {
        Self::from_fn(move |args| Ok(f(args.first().unwrap_or(&Value::Null))))
    }

    /// Argument from a two-parameter closure
    pub fn lambda2<F>(f: F) -> Self
    where
        F: Fn(&Value, &Value) -> Value + Send + Sync + 'static,
    {
        Self::from_fn(move |args| {
            let a = args.first().unwrap_or(&Value::Null);
            let b = args.get(1).unwrap_or(&Value::Null);
            Ok(f(a, b))
        })
    }

    /// Argument from a boolean predicate
    pub fn predicate<F>(f: F) -> Self
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        Self::lambda(move |v| Value::Bool(f(v)))
    }

    /// Argument from an equality comparer
    pub fn comparer<F>(f: F) -> Self
    where
        F: Fn(&Value, &Value) -> bool + Send + Sync + 'static,
    {
        Self::lambda2(move |a, b| Value::Bool(f(a, b)))
    }

    /// Constant argument; carries all three forms
    pub fn literal(value: impl Into<Value>) -> Self {
        let value = value.into();
        let lambda = Lambda::constant(value.clone());
        let source = lambda.to_string();

        let argument = Self::with_callable(Arc::new(
            move |_: &[Value], _: &[&[Scope]]| -> QueryResult<Value> { Ok(value.clone()) },
        ));
        let _ = argument.exp.set(Arc::new(lambda));
        let _ = argument.exp_str.set(source);
        argument
    }

    /// Placeholder for a skipped optional argument
    ///
    /// Renders and evaluates as `() => null` but is never mistaken for an
    /// explicit `null` literal.
    pub fn absent() -> Self {
        let mut argument = Self::literal(Value::Null);
        argument.absent = true;
        argument
    }

    /// Check if this argument stands in for a skipped optional argument
    pub fn is_absent(&self) -> bool {
        self.absent
    }

    /// Attach source text to an argument built from a closure
    pub fn with_source(self, source: impl Into<String>) -> Self {
        let _ = self.exp_str.set(source.into());
        self
    }

    /// Capture a named value for the text form
    pub fn scope(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.scopes.push(Scope::new(name, value));
        self
    }

    /// Captured scopes
    pub fn scopes(&self) -> &[Scope] {
        &self.scopes
    }

    /// Callable form, compiled from the expression on first access
    pub fn func(&self) -> QueryResult<&Callable> {
        if let Some(func) = self.func.get() {
            return Ok(func);
        }

        let lambda = Arc::clone(self.parsed()?);
        let compiled: Callable = Arc::new(move |args: &[Value], scopes: &[&[Scope]]| {
            evaluate(&lambda, args, scopes)
        });
        Ok(self.func.get_or_init(|| compiled))
    }

    /// Parsed form, parsed from the source text on first access
    pub fn exp(&self) -> QueryResult<&Lambda> {
        self.parsed().map(|lambda| lambda.as_ref())
    }

    fn parsed(&self) -> QueryResult<&Arc<Lambda>> {
        if let Some(exp) = self.exp.get() {
            return Ok(exp);
        }

        let source = self.exp_str.get().ok_or_else(|| {
            QueryError::Construction("argument has no expression source".to_string())
        })?;
        let parsed = parse_lambda(source)?;
        tracing::trace!(source = %source, "compiled text expression");

        Ok(self.exp.get_or_init(|| Arc::new(parsed)))
    }

    /// Source text form, rendered from the parsed form on first access
    pub fn exp_str(&self) -> QueryResult<&str> {
        if let Some(source) = self.exp_str.get() {
            return Ok(source);
        }

        let exp = self.exp.get().ok_or_else(|| {
            QueryError::Construction("native callable has no source text".to_string())
        })?;
        let rendered = exp.to_string();

        Ok(self.exp_str.get_or_init(|| rendered).as_str())
    }

    /// Invoke the argument; its own scopes shadow the part's scopes
    pub fn call(&self, args: &[Value], part_scopes: &[Scope]) -> QueryResult<Value> {
        let func = self.func()?;
        func(args, &[self.scopes.as_slice(), part_scopes])
    }
}

impl fmt::Debug for PartArgument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PartArgument")
            .field("func", &self.func.get().map(|_| "<callable>"))
            .field("exp", &self.exp.get())
            .field("exp_str", &self.exp_str.get())
            .field("scopes", &self.scopes)
            .field("absent", &self.absent)
            .finish()
    }
}

impl From<&str> for PartArgument {
    fn from(source: &str) -> Self {
        PartArgument::from_text(source)
    }
}

impl From<String> for PartArgument {
    fn from(source: String) -> Self {
        PartArgument::from_text(source)
    }
}

impl From<Lambda> for PartArgument {
    fn from(lambda: Lambda) -> Self {
        PartArgument::from_lambda(lambda)
    }
}

/// One operator invocation in a chain
#[derive(Debug, Clone)]
pub struct QueryPart {
    kind: String,
    args: Vec<Arc<PartArgument>>,
    scopes: Vec<Scope>,
}

impl QueryPart {
    /// Create a part from an operator tag
    ///
    /// Fails if the tag is empty.
    pub fn new(kind: impl Into<String>, args: Vec<PartArgument>) -> QueryResult<Self> {
        let kind = kind.into();
        if kind.is_empty() {
            return Err(QueryError::Construction(
                "query part needs an operator tag".to_string(),
            ));
        }

        Ok(Self {
            kind,
            args: args.into_iter().map(Arc::new).collect(),
            scopes: Vec::new(),
        })
    }

    /// Create a part for a known operator
    pub fn of(func: QueryFunc, args: Vec<PartArgument>) -> Self {
        Self {
            kind: func.as_str().to_string(),
            args: args.into_iter().map(Arc::new).collect(),
            scopes: Vec::new(),
        }
    }

    /// Attach scopes shared by all arguments
    pub fn with_scopes(mut self, scopes: Vec<Scope>) -> Self {
        self.scopes = scopes;
        self
    }

    /// Operator tag
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Known operator, if the tag is one
    pub fn func(&self) -> Option<QueryFunc> {
        QueryFunc::from_tag(&self.kind)
    }

    /// Arguments in order
    pub fn args(&self) -> &[Arc<PartArgument>] {
        &self.args
    }

    /// Shared scopes
    pub fn scopes(&self) -> &[Scope] {
        &self.scopes
    }

    /// Argument at a position, if present
    pub fn arg(&self, index: usize) -> Option<&PartArgument> {
        self.args.get(index).map(|arg| arg.as_ref())
    }

    /// Argument at a position, unless it is missing or stands in for a
    /// skipped optional argument
    pub fn optional_arg(&self, index: usize) -> Option<&PartArgument> {
        self.arg(index).filter(|arg| !arg.is_absent())
    }

    /// Invoke the argument at a position
    pub fn call_arg(&self, index: usize, args: &[Value]) -> QueryResult<Value> {
        let argument = self.arg(index).ok_or_else(|| {
            QueryError::Construction(format!("{} is missing argument {}", self.kind, index))
        })?;
        argument.call(args, &self.scopes)
    }

    /// Human-readable rendering, e.g. `where((x) => (x.id > 2))`
    pub fn describe(&self) -> String {
        let args: Vec<String> = self
            .args
            .iter()
            .map(|arg| {
                arg.exp_str()
                    .map(str::to_string)
                    .unwrap_or_else(|_| "<native>".to_string())
            })
            .collect();
        format!("{}({})", self.kind, args.join(", "))
    }
}

struct PartNode {
    part: QueryPart,
    prev: Option<Arc<PartNode>>,
    len: usize,
}

/// Immutable chain of parts
///
/// Appending returns a new chain that shares every existing node with the
/// chain it was built from.
#[derive(Clone, Default)]
pub struct PartChain {
    head: Option<Arc<PartNode>>,
}

impl PartChain {
    /// Empty chain
    pub fn new() -> Self {
        Self { head: None }
    }

    /// New chain with one more part at the end
    pub fn push(&self, part: QueryPart) -> Self {
        let len = self.len() + 1;
        Self {
            head: Some(Arc::new(PartNode {
                part,
                prev: self.head.clone(),
                len,
            })),
        }
    }

    /// Number of parts
    pub fn len(&self) -> usize {
        self.head.as_ref().map(|node| node.len).unwrap_or(0)
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// Last part
    pub fn last(&self) -> Option<&QueryPart> {
        self.head.as_ref().map(|node| &node.part)
    }

    /// Parts in chain order
    pub fn to_vec(&self) -> Vec<QueryPart> {
        let mut parts = Vec::with_capacity(self.len());
        let mut node = self.head.as_deref();
        while let Some(current) = node {
            parts.push(current.part.clone());
            node = current.prev.as_deref();
        }
        parts.reverse();
        parts
    }

    /// Check whether `prefix` is a shared prefix of this chain
    pub fn starts_with(&self, prefix: &PartChain) -> bool {
        let Some(target) = &prefix.head else {
            return true;
        };
        let mut node = self.head.as_ref();
        while let Some(current) = node {
            if Arc::ptr_eq(current, target) {
                return true;
            }
            node = current.prev.as_ref();
        }
        false
    }
}

impl fmt::Debug for PartChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.to_vec().iter().map(|part| part.describe()))
            .finish()
    }
}

impl FromIterator<QueryPart> for PartChain {
    fn from_iter<I: IntoIterator<Item = QueryPart>>(iter: I) -> Self {
        iter.into_iter()
            .fold(PartChain::new(), |chain, part| chain.push(part))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_argument_requires_a_form() {
        let result = PartArgument::new(None, None, None, Vec::new());
        assert!(matches!(result, Err(QueryError::Construction(_))));
    }

    #[test]
    fn test_text_argument_derives_all_forms() {
        let arg = PartArgument::from_text("x => x.id > 2");

        assert_eq!(arg.exp_str().unwrap(), "x => x.id > 2");
        assert_eq!(arg.exp().unwrap().params, vec!["x"]);
        assert_eq!(arg.call(&[json!({"id": 3})], &[]).unwrap(), json!(true));
    }

    #[test]
    fn test_forms_are_cached() {
        let arg = PartArgument::from_text("x => x + 1");

        let first = arg.exp().unwrap() as *const Lambda;
        let second = arg.exp().unwrap() as *const Lambda;
        assert_eq!(first, second);

        let f1 = Arc::as_ptr(arg.func().unwrap()) as *const ();
        let f2 = Arc::as_ptr(arg.func().unwrap()) as *const ();
        assert_eq!(f1, f2);
    }

    #[test]
    fn test_lambda_argument_renders_source() {
        let arg = PartArgument::from_lambda(parse_lambda("x => x.id * 2").unwrap());
        assert_eq!(arg.exp_str().unwrap(), "(x) => (x.id * 2)");
    }

    #[test]
    fn test_native_argument_has_no_source() {
        let arg = PartArgument::lambda(|x| x.clone());
        assert!(matches!(arg.exp_str(), Err(QueryError::Construction(_))));
        assert!(matches!(arg.exp(), Err(QueryError::Construction(_))));

        let arg = PartArgument::lambda(|x| x.clone()).with_source("x => x");
        assert_eq!(arg.exp_str().unwrap(), "x => x");
        assert_eq!(arg.call(&[json!(5)], &[]).unwrap(), json!(5));
    }

    #[test]
    fn test_native_and_text_forms_agree() {
        let native = PartArgument::predicate(|x| x["count"].as_i64().unwrap_or(0) > 10);
        let text = PartArgument::from_text("x => x.count > 10");

        for record in [json!({"count": 4}), json!({"count": 67}), json!({})] {
            assert_eq!(
                native.call(&[record.clone()], &[]).unwrap(),
                text.call(&[record], &[]).unwrap()
            );
        }
    }

    #[test]
    fn test_literal_argument() {
        let arg = PartArgument::literal(json!([1, 2]));
        assert_eq!(arg.call(&[], &[]).unwrap(), json!([1, 2]));
        assert_eq!(arg.exp_str().unwrap(), "() => [1, 2]");
    }

    #[test]
    fn test_scope_shadowing() {
        let arg = PartArgument::from_text("x => x > limit").scope("limit", 5);
        let part_scopes = [Scope::new("limit", 100)];
        assert_eq!(arg.call(&[json!(10)], &part_scopes).unwrap(), json!(true));
    }

    #[test]
    fn test_bad_source_fails_on_use() {
        let arg = PartArgument::from_text("x => ");
        assert!(matches!(arg.call(&[json!(1)], &[]), Err(QueryError::Parse(_))));
    }

    #[test]
    fn test_part_requires_kind() {
        assert!(matches!(
            QueryPart::new("", Vec::new()),
            Err(QueryError::Construction(_))
        ));
        let part = QueryPart::new("frobnicate", Vec::new()).unwrap();
        assert_eq!(part.func(), None);
    }

    #[test]
    fn test_part_describe() {
        let part = QueryPart::of(QueryFunc::Where, vec![PartArgument::from_text("x => x.id > 2")]);
        assert_eq!(part.describe(), "where(x => x.id > 2)");

        let part = QueryPart::of(QueryFunc::Select, vec![PartArgument::lambda(|x| x.clone())]);
        assert_eq!(part.describe(), "select(<native>)");
    }

    #[test]
    fn test_query_func_tags() {
        for func in QueryFunc::ALL {
            assert_eq!(QueryFunc::from_tag(func.as_str()), Some(func));
        }
        assert_eq!(QueryFunc::OrderByDescending.wire_name(), "$orderByDescending");
        assert!(QueryFunc::First.is_terminal());
        assert!(!QueryFunc::Where.is_terminal());
    }

    #[test]
    fn test_chain_shares_prefix() {
        let base = PartChain::new().push(QueryPart::of(QueryFunc::Reverse, Vec::new()));
        let left = base.push(QueryPart::of(QueryFunc::Distinct, Vec::new()));
        let right = base.push(QueryPart::of(QueryFunc::InlineCount, Vec::new()));

        assert_eq!(base.len(), 1);
        assert_eq!(left.len(), 2);
        assert!(left.starts_with(&base));
        assert!(right.starts_with(&base));
        assert!(!left.starts_with(&right));
        assert_eq!(
            right.to_vec().iter().map(|p| p.kind().to_string()).collect::<Vec<_>>(),
            vec!["reverse", "inlineCount"]
        );
    }
}
