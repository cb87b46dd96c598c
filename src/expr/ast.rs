//! Expression Abstract Syntax Tree
//!
//! Defines the tree a text lambda parses into. `Display` renders a tree back
//! to source text the parser accepts, so a parsed expression can always be
//! re-serialized.
//!
//! # Example Expressions
//!
//! ```text
//! x => x.id > 2
//! (acc, x) => acc + x.count
//! p => { supplier: p.supplier, total: p.count * p.price }
//! ```

use serde_json::Value;
use std::fmt;

/// A parsed lambda: parameter names plus a body expression
#[derive(Debug, Clone, PartialEq)]
pub struct Lambda {
    /// Positional parameter names
    pub params: Vec<String>,
    /// Body expression
    pub body: Expr,
}

impl Lambda {
    /// Create a lambda
    pub fn new(params: Vec<String>, body: Expr) -> Self {
        Self { params, body }
    }

    /// A parameterless lambda returning a constant
    pub fn constant(value: Value) -> Self {
        Self {
            params: Vec::new(),
            body: Expr::Literal(value),
        }
    }
}

impl fmt::Display for Lambda {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}) => {}", self.params.join(", "), self.body)
    }
}

/// Expression node
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Constant value
    Literal(Value),
    /// Parameter or scope reference
    Ident(String),
    /// `target.name`
    Member(Box<Expr>, String),
    /// `target[index]`
    Index(Box<Expr>, Box<Expr>),
    /// Prefix operator
    Unary(UnaryOp, Box<Expr>),
    /// Infix operator
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    /// `cond ? then : otherwise`
    Conditional(Box<Expr>, Box<Expr>, Box<Expr>),
    /// `{ key: expr, ... }`
    Object(Vec<(String, Expr)>),
    /// `[expr, ...]`
    Array(Vec<Expr>),
}

impl Expr {
    /// Build a binary node
    pub fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Self {
        Expr::Binary(op, Box::new(lhs), Box::new(rhs))
    }

    /// Build a unary node
    pub fn unary(op: UnaryOp, operand: Expr) -> Self {
        Expr::Unary(op, Box::new(operand))
    }

    /// Build a member access node
    pub fn member(target: Expr, name: impl Into<String>) -> Self {
        Expr::Member(Box::new(target), name.into())
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Literal(value) => write_literal(f, value),
            Expr::Ident(name) => write!(f, "{}", name),
            Expr::Member(target, name) => {
                if is_identifier(name) {
                    write!(f, "{}.{}", target, name)
                } else {
                    write!(f, "{}[{}]", target, quote(name))
                }
            }
            Expr::Index(target, index) => write!(f, "{}[{}]", target, index),
            Expr::Unary(op, operand) => write!(f, "({}{})", op, operand),
            Expr::Binary(op, lhs, rhs) => write!(f, "({} {} {})", lhs, op, rhs),
            Expr::Conditional(cond, then, otherwise) => {
                write!(f, "({} ? {} : {})", cond, then, otherwise)
            }
            Expr::Object(entries) => {
                write!(f, "{{")?;
                for (i, (key, value)) in entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    if is_identifier(key) {
                        write!(f, "{}: {}", key, value)?;
                    } else {
                        write!(f, "{}: {}", quote(key), value)?;
                    }
                }
                write!(f, "}}")
            }
            Expr::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
        }
    }
}

/// Literal values render as expressions so nested arrays and objects parse back
fn write_literal(f: &mut fmt::Formatter<'_>, value: &Value) -> fmt::Result {
    match value {
        Value::String(s) => write!(f, "{}", quote(s)),
        Value::Number(n) if n.as_f64().map(|v| v < 0.0).unwrap_or(false) => write!(f, "({})", n),
        Value::Array(items) => {
            write!(f, "[")?;
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write_literal(f, item)?;
            }
            write!(f, "]")
        }
        Value::Object(map) => {
            write!(f, "{{")?;
            for (i, (key, item)) in map.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}: ", quote(key))?;
                write_literal(f, item)?;
            }
            write!(f, "}}")
        }
        other => write!(f, "{}", other),
    }
}

fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

/// Check whether a name can be written as a bare identifier
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' || c == '$' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || c == '_' || c == '$')
        && !matches!(name, "true" | "false" | "null" | "undefined")
}

/// Prefix operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    /// Logical not
    Not,
    /// Numeric negation
    Neg,
}

impl fmt::Display for UnaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Not => write!(f, "!"),
            Self::Neg => write!(f, "-"),
        }
    }
}

/// Infix operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            Self::Or => "||",
            Self::And => "&&",
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Lte => "<=",
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Rem => "%",
        };
        write!(f, "{}", symbol)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_display_lambda() {
        let lambda = Lambda::new(
            vec!["x".to_string()],
            Expr::binary(
                BinaryOp::Gt,
                Expr::member(Expr::Ident("x".to_string()), "id"),
                Expr::Literal(json!(2)),
            ),
        );
        assert_eq!(lambda.to_string(), "(x) => (x.id > 2)");
    }

    #[test]
    fn test_display_literals() {
        assert_eq!(Lambda::constant(json!("a\"b")).to_string(), r#"() => "a\"b""#);
        assert_eq!(Lambda::constant(json!(-3)).to_string(), "() => (-3)");
        assert_eq!(
            Lambda::constant(json!([1, {"odd key": null}])).to_string(),
            r#"() => [1, {"odd key": null}]"#
        );
    }

    #[test]
    fn test_is_identifier() {
        assert!(is_identifier("supplier"));
        assert!(is_identifier("_x1"));
        assert!(!is_identifier("1x"));
        assert!(!is_identifier("odd key"));
        assert!(!is_identifier("null"));
    }
}
