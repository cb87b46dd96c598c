//! Expression Evaluator
//!
//! Evaluates a parsed [`Lambda`] against positional arguments and captured
//! scopes. Identifiers resolve to parameters first, then to scope bindings in
//! the order the scope layers are given.

use super::ast::{BinaryOp, Expr, Lambda, UnaryOp};
use crate::query::{QueryError, QueryResult};
use crate::value::{number, partial_compare, truthy, values_equal};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering;

/// A named external value captured for text expressions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scope {
    /// Name the expression refers to
    pub name: String,
    /// Bound value
    pub value: Value,
}

impl Scope {
    /// Create a scope binding
    pub fn new(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Evaluate a lambda
///
/// Missing positional arguments are `null`; extra ones are ignored.
pub fn evaluate(lambda: &Lambda, args: &[Value], scopes: &[&[Scope]]) -> QueryResult<Value> {
    let env = Env {
        params: &lambda.params,
        args,
        scopes,
    };
    env.eval(&lambda.body)
}

/// Name resolution for one evaluation
struct Env<'a> {
    params: &'a [String],
    args: &'a [Value],
    scopes: &'a [&'a [Scope]],
}

impl Env<'_> {
    fn lookup(&self, name: &str) -> QueryResult<Value> {
        if let Some(pos) = self.params.iter().position(|p| p == name) {
            return Ok(self.args.get(pos).cloned().unwrap_or(Value::Null));
        }

        self.scopes
            .iter()
            .flat_map(|layer| layer.iter())
            .find(|scope| scope.name == name)
            .map(|scope| scope.value.clone())
            .ok_or_else(|| QueryError::Evaluation(format!("Unknown identifier: {}", name)))
    }

    fn eval(&self, expr: &Expr) -> QueryResult<Value> {
        match expr {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Ident(name) => self.lookup(name),
            Expr::Member(target, name) => {
                let target = self.eval(target)?;
                Ok(member(&target, name))
            }
            Expr::Index(target, index) => {
                let target = self.eval(target)?;
                let index = self.eval(index)?;
                Ok(element(&target, &index))
            }
            Expr::Unary(op, operand) => {
                let operand = self.eval(operand)?;
                unary(*op, &operand)
            }
            Expr::Binary(BinaryOp::And, lhs, rhs) => {
                let lhs = self.eval(lhs)?;
                if truthy(&lhs) {
                    self.eval(rhs)
                } else {
                    Ok(lhs)
                }
            }
            Expr::Binary(BinaryOp::Or, lhs, rhs) => {
                let lhs = self.eval(lhs)?;
                if truthy(&lhs) {
                    Ok(lhs)
                } else {
                    self.eval(rhs)
                }
            }
            Expr::Binary(op, lhs, rhs) => {
                let lhs = self.eval(lhs)?;
                let rhs = self.eval(rhs)?;
                binary(*op, &lhs, &rhs)
            }
            Expr::Conditional(cond, then, otherwise) => {
                if truthy(&self.eval(cond)?) {
                    self.eval(then)
                } else {
                    self.eval(otherwise)
                }
            }
            Expr::Object(entries) => {
                let mut map = Map::new();
                for (key, value) in entries {
                    map.insert(key.clone(), self.eval(value)?);
                }
                Ok(Value::Object(map))
            }
            Expr::Array(items) => items
                .iter()
                .map(|item| self.eval(item))
                .collect::<QueryResult<Vec<_>>>()
                .map(Value::Array),
        }
    }
}

/// `target.name`; `length` is available on arrays and strings
fn member(target: &Value, name: &str) -> Value {
    match target {
        Value::Object(map) => map.get(name).cloned().unwrap_or(Value::Null),
        Value::Array(items) if name == "length" => Value::from(items.len()),
        Value::String(s) if name == "length" => Value::from(s.chars().count()),
        _ => Value::Null,
    }
}

/// `target[index]`
fn element(target: &Value, index: &Value) -> Value {
    match (target, index) {
        (Value::Array(items), Value::Number(n)) => n
            .as_u64()
            .and_then(|i| items.get(i as usize))
            .cloned()
            .unwrap_or(Value::Null),
        (Value::String(s), Value::Number(n)) => n
            .as_u64()
            .and_then(|i| s.chars().nth(i as usize))
            .map(|c| Value::String(c.to_string()))
            .unwrap_or(Value::Null),
        (_, Value::String(name)) => member(target, name),
        _ => Value::Null,
    }
}

fn unary(op: UnaryOp, operand: &Value) -> QueryResult<Value> {
    match op {
        UnaryOp::Not => Ok(Value::Bool(!truthy(operand))),
        UnaryOp::Neg => match operand {
            Value::Number(n) => match n.as_i64().and_then(i64::checked_neg) {
                Some(i) => Ok(Value::from(i)),
                None => Ok(number(-n.as_f64().unwrap_or(0.0))),
            },
            other => Err(QueryError::Evaluation(format!(
                "Cannot negate {}",
                crate::value::describe(other)
            ))),
        },
    }
}

fn binary(op: BinaryOp, lhs: &Value, rhs: &Value) -> QueryResult<Value> {
    let ordered = |test: fn(Ordering) -> bool| -> QueryResult<Value> {
        Ok(Value::Bool(partial_compare(lhs, rhs).map(test).unwrap_or(false)))
    };

    match op {
        BinaryOp::Eq => Ok(Value::Bool(values_equal(lhs, rhs))),
        BinaryOp::Ne => Ok(Value::Bool(!values_equal(lhs, rhs))),
        BinaryOp::Lt => ordered(|o| o == Ordering::Less),
        BinaryOp::Lte => ordered(|o| o != Ordering::Greater),
        BinaryOp::Gt => ordered(|o| o == Ordering::Greater),
        BinaryOp::Gte => ordered(|o| o != Ordering::Less),
        BinaryOp::Add => match (lhs, rhs) {
            (Value::String(_), _) | (_, Value::String(_)) => {
                Ok(Value::String(format!("{}{}", as_text(lhs), as_text(rhs))))
            }
            _ => arithmetic(op, lhs, rhs),
        },
        BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => {
            arithmetic(op, lhs, rhs)
        }
        BinaryOp::And | BinaryOp::Or => Err(QueryError::Evaluation(
            "Logical operators are evaluated lazily".to_string(),
        )),
    }
}

fn as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn arithmetic(op: BinaryOp, lhs: &Value, rhs: &Value) -> QueryResult<Value> {
    let (l, r) = match (lhs, rhs) {
        (Value::Number(l), Value::Number(r)) => (l, r),
        _ => {
            return Err(QueryError::Evaluation(format!(
                "Operator {} needs numbers, got {} and {}",
                op,
                crate::value::describe(lhs),
                crate::value::describe(rhs)
            )))
        }
    };

    if let (Some(a), Some(b)) = (l.as_i64(), r.as_i64()) {
        let exact = match op {
            BinaryOp::Add => a.checked_add(b),
            BinaryOp::Sub => a.checked_sub(b),
            BinaryOp::Mul => a.checked_mul(b),
            BinaryOp::Rem if b != 0 => a.checked_rem(b),
            _ => None,
        };
        if let Some(result) = exact {
            return Ok(Value::from(result));
        }
    }

    let a = l.as_f64().unwrap_or(f64::NAN);
    let b = r.as_f64().unwrap_or(f64::NAN);
    if matches!(op, BinaryOp::Div | BinaryOp::Rem) && b == 0.0 {
        return Err(QueryError::Evaluation("Division by zero".to_string()));
    }

    let result = match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div => a / b,
        _ => a % b,
    };
    Ok(number(result))
}
