//! Expression Parser
//!
//! Parses lambda source text into a [`Lambda`].
//!
//! # Supported Syntax
//!
//! ```text
//! lambda      := params "=>" expr
//! params      := ident | "(" [ident ("," ident)*] ")"
//! expr        := or ["?" expr ":" expr]
//! or          := and ("||" and)*
//! and         := equality ("&&" equality)*
//! equality    := relational (("==" | "===" | "!=" | "!==") relational)*
//! relational  := additive (("<" | "<=" | ">" | ">=") additive)*
//! additive    := term (("+" | "-") term)*
//! term        := unary (("*" | "/" | "%") unary)*
//! unary       := ("!" | "-") unary | postfix
//! postfix     := primary ("." ident | "[" expr "]")*
//! primary     := number | string | true | false | null | ident
//!              | "(" expr ")" | "{" entries "}" | "[" items "]"
//! ```
//!
//! A body starting with `{` is an object literal, not a statement block.

use nom::{
    branch::alt,
    bytes::complete::{tag, take_while},
    character::complete::{char, digit1, multispace0, one_of, satisfy},
    combinator::{map, opt, recognize},
    error::{Error, ErrorKind},
    multi::separated_list0,
    sequence::{delimited, pair, preceded, terminated, tuple},
    IResult,
};

use super::ast::{BinaryOp, Expr, Lambda, UnaryOp};
use crate::query::{QueryError, QueryResult};
use serde_json::Value;

/// Deepest nesting of brackets, prefix operators and conditionals accepted
pub const MAX_DEPTH: usize = 32;

/// Parse lambda source text
pub fn parse_lambda(input: &str) -> QueryResult<Lambda> {
    let source = input.trim();

    match parse_full_lambda(source) {
        Ok((remaining, lambda)) => {
            if remaining.trim().is_empty() {
                Ok(lambda)
            } else {
                Err(QueryError::Parse(format!(
                    "Unexpected input after expression: '{}'",
                    remaining.trim()
                )))
            }
        }
        Err(nom::Err::Failure(e)) if e.code == ErrorKind::TooLarge => Err(QueryError::Parse(
            format!("Expression nests deeper than {} levels", MAX_DEPTH),
        )),
        Err(e) => Err(QueryError::Parse(format!("'{}': {:?}", source, e))),
    }
}

/// Parse the full lambda
fn parse_full_lambda(input: &str) -> IResult<&str, Lambda> {
    let (input, _) = multispace0(input)?;
    let (input, params) = parse_params(input)?;
    let (input, _) = delimited(multispace0, tag("=>"), multispace0)(input)?;
    let (input, body) = parse_expr(input, 0)?;
    let (input, _) = multispace0(input)?;

    Ok((input, Lambda::new(params, body)))
}

/// Parse parameter list: a bare identifier or a parenthesized list
fn parse_params(input: &str) -> IResult<&str, Vec<String>> {
    alt((
        map(parse_identifier, |name| vec![name.to_string()]),
        delimited(
            pair(char('('), multispace0),
            separated_list0(
                delimited(multispace0, char(','), multispace0),
                map(parse_identifier, String::from),
            ),
            pair(multispace0, char(')')),
        ),
    ))(input)
}

/// Fail hard once nesting passes [`MAX_DEPTH`]
fn check_depth(input: &str, depth: usize) -> IResult<&str, ()> {
    if depth > MAX_DEPTH {
        return Err(nom::Err::Failure(Error::new(input, ErrorKind::TooLarge)));
    }
    Ok((input, ()))
}

/// Parse a full expression (conditional level)
fn parse_expr(input: &str, depth: usize) -> IResult<&str, Expr> {
    let (input, _) = check_depth(input, depth)?;
    let (input, cond) = parse_or(input, depth)?;

    let question: IResult<&str, char> = preceded(multispace0, char('?'))(input);
    match question {
        Ok((rest, _)) => {
            let (rest, _) = multispace0(rest)?;
            let (rest, then) = parse_expr(rest, depth + 1)?;
            let (rest, _) = preceded(multispace0, char(':'))(rest)?;
            let (rest, _) = multispace0(rest)?;
            let (rest, otherwise) = parse_expr(rest, depth + 1)?;
            Ok((
                rest,
                Expr::Conditional(Box::new(cond), Box::new(then), Box::new(otherwise)),
            ))
        }
        Err(_) => Ok((input, cond)),
    }
}

/// Parse a left-associative chain of binary operators
fn parse_left_assoc<'a>(
    input: &'a str,
    depth: usize,
    operand: fn(&'a str, usize) -> IResult<&'a str, Expr>,
    operator: fn(&'a str) -> IResult<&'a str, BinaryOp>,
) -> IResult<&'a str, Expr> {
    let (mut input, mut lhs) = operand(input, depth)?;

    loop {
        match preceded(multispace0, operator)(input) {
            Ok((rest, op)) => {
                let (rest, _) = multispace0(rest)?;
                let (rest, rhs) = operand(rest, depth)?;
                lhs = Expr::binary(op, lhs, rhs);
                input = rest;
            }
            Err(nom::Err::Error(_)) => return Ok((input, lhs)),
            Err(e) => return Err(e),
        }
    }
}

fn parse_or(input: &str, depth: usize) -> IResult<&str, Expr> {
    parse_left_assoc(input, depth, parse_and, |i| map(tag("||"), |_| BinaryOp::Or)(i))
}

fn parse_and(input: &str, depth: usize) -> IResult<&str, Expr> {
    parse_left_assoc(input, depth, parse_equality, |i| map(tag("&&"), |_| BinaryOp::And)(i))
}

fn parse_equality(input: &str, depth: usize) -> IResult<&str, Expr> {
    parse_left_assoc(input, depth, parse_relational, parse_equality_op)
}

fn parse_equality_op(input: &str) -> IResult<&str, BinaryOp> {
    alt((
        map(alt((tag("==="), tag("=="))), |_| BinaryOp::Eq),
        map(alt((tag("!=="), tag("!="))), |_| BinaryOp::Ne),
    ))(input)
}

fn parse_relational(input: &str, depth: usize) -> IResult<&str, Expr> {
    parse_left_assoc(input, depth, parse_additive, parse_relational_op)
}

fn parse_relational_op(input: &str) -> IResult<&str, BinaryOp> {
    alt((
        map(tag("<="), |_| BinaryOp::Lte),
        map(tag(">="), |_| BinaryOp::Gte),
        map(tag("<"), |_| BinaryOp::Lt),
        map(tag(">"), |_| BinaryOp::Gt),
    ))(input)
}

fn parse_additive(input: &str, depth: usize) -> IResult<&str, Expr> {
    parse_left_assoc(input, depth, parse_term, |i| {
        alt((
            map(char('+'), |_| BinaryOp::Add),
            map(char('-'), |_| BinaryOp::Sub),
        ))(i)
    })
}

fn parse_term(input: &str, depth: usize) -> IResult<&str, Expr> {
    parse_left_assoc(input, depth, parse_unary, |i| {
        alt((
            map(char('*'), |_| BinaryOp::Mul),
            map(char('/'), |_| BinaryOp::Div),
            map(char('%'), |_| BinaryOp::Rem),
        ))(i)
    })
}

/// Parse prefix operators
fn parse_unary(input: &str, depth: usize) -> IResult<&str, Expr> {
    let prefix: IResult<&str, char> = terminated(one_of("!-"), multispace0)(input);
    match prefix {
        Ok((rest, op)) => {
            let (rest, _) = check_depth(rest, depth + 1)?;
            let (rest, operand) = parse_unary(rest, depth + 1)?;
            let op = if op == '!' { UnaryOp::Not } else { UnaryOp::Neg };
            Ok((rest, Expr::unary(op, operand)))
        }
        Err(_) => parse_postfix(input, depth),
    }
}

/// Parse member access and indexing after a primary expression
fn parse_postfix(input: &str, depth: usize) -> IResult<&str, Expr> {
    let (mut input, mut expr) = parse_primary(input, depth)?;

    loop {
        let (rest, _) = multispace0(input)?;

        let dot: IResult<&str, char> = char('.')(rest);
        if let Ok((rest, _)) = dot {
            let (rest, _) = multispace0(rest)?;
            let (rest, name) = parse_identifier(rest)?;
            expr = Expr::member(expr, name);
            input = rest;
            continue;
        }

        let bracket: IResult<&str, char> = char('[')(rest);
        if let Ok((rest, _)) = bracket {
            let (rest, _) = multispace0(rest)?;
            let (rest, index) = parse_expr(rest, depth + 1)?;
            let (rest, _) = multispace0(rest)?;
            let (rest, _) = char(']')(rest)?;
            expr = Expr::Index(Box::new(expr), Box::new(index));
            input = rest;
            continue;
        }

        return Ok((input, expr));
    }
}

/// Parse a primary expression
fn parse_primary(input: &str, depth: usize) -> IResult<&str, Expr> {
    alt((
        map(parse_number, Expr::Literal),
        map(parse_string, |s| Expr::Literal(Value::String(s))),
        delimited(
            pair(char('('), multispace0),
            |i| parse_expr(i, depth + 1),
            pair(multispace0, char(')')),
        ),
        |i| parse_object(i, depth + 1),
        |i| parse_array(i, depth + 1),
        parse_word,
    ))(input)
}

/// Parse a keyword literal or an identifier reference
fn parse_word(input: &str) -> IResult<&str, Expr> {
    let (rest, word) = parse_identifier(input)?;
    let expr = match word {
        "true" => Expr::Literal(Value::Bool(true)),
        "false" => Expr::Literal(Value::Bool(false)),
        "null" | "undefined" => Expr::Literal(Value::Null),
        name => Expr::Ident(name.to_string()),
    };
    Ok((rest, expr))
}

/// Parse an object literal
fn parse_object(input: &str, depth: usize) -> IResult<&str, Expr> {
    let (input, _) = pair(char('{'), multispace0)(input)?;
    let (input, entries) = separated_list0(
        delimited(multispace0, char(','), multispace0),
        |i| parse_object_entry(i, depth),
    )(input)?;
    let (input, _) = multispace0(input)?;
    let (input, _) = opt(pair(char(','), multispace0))(input)?;
    let (input, _) = char('}')(input)?;

    Ok((input, Expr::Object(entries)))
}

/// Parse `key: expr` or the shorthand `key`
fn parse_object_entry(input: &str, depth: usize) -> IResult<&str, (String, Expr)> {
    let (input, key) = alt((map(parse_identifier, String::from), parse_string))(input)?;
    let (input, value) = opt(preceded(
        delimited(multispace0, char(':'), multispace0),
        |i| parse_expr(i, depth),
    ))(input)?;

    let value = value.unwrap_or_else(|| Expr::Ident(key.clone()));
    Ok((input, (key, value)))
}

/// Parse an array literal
fn parse_array(input: &str, depth: usize) -> IResult<&str, Expr> {
    let (input, _) = pair(char('['), multispace0)(input)?;
    let (input, items) = separated_list0(
        delimited(multispace0, char(','), multispace0),
        |i| parse_expr(i, depth),
    )(input)?;
    let (input, _) = multispace0(input)?;
    let (input, _) = char(']')(input)?;

    Ok((input, Expr::Array(items)))
}

/// Parse identifier (parameter, scope or member name)
fn parse_identifier(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        satisfy(|c: char| c.is_alphabetic() || c == '_' || c == '$'),
        take_while(|c: char| c.is_alphanumeric() || c == '_' || c == '$'),
    ))(input)
}

/// Parse an unsigned number; integers stay integers
fn parse_number(input: &str) -> IResult<&str, Value> {
    let (rest, text) = recognize(tuple((
        digit1,
        opt(pair(char('.'), digit1)),
        opt(tuple((one_of("eE"), opt(one_of("+-")), digit1))),
    )))(input)?;

    if let Ok(n) = text.parse::<i64>() {
        return Ok((rest, Value::from(n)));
    }

    match text.parse::<f64>() {
        Ok(n) => Ok((rest, Value::from(n))),
        Err(_) => Err(nom::Err::Error(Error::new(input, ErrorKind::Float))),
    }
}

/// Parse a single- or double-quoted string with backslash escapes
fn parse_string(input: &str) -> IResult<&str, String> {
    let quote = match input.chars().next() {
        Some(c @ ('\'' | '"')) => c,
        _ => return Err(nom::Err::Error(Error::new(input, ErrorKind::Char))),
    };

    let body = &input[1..];
    let mut out = String::new();
    let mut chars = body.char_indices();

    while let Some((i, c)) = chars.next() {
        if c == quote {
            return Ok((&body[i + 1..], out));
        }
        if c == '\\' {
            match chars.next() {
                Some((_, 'n')) => out.push('\n'),
                Some((_, 't')) => out.push('\t'),
                Some((_, 'r')) => out.push('\r'),
                Some((_, other)) => out.push(other),
                None => break,
            }
        } else {
            out.push(c);
        }
    }

    Err(nom::Err::Error(Error::new(input, ErrorKind::Char)))
}
