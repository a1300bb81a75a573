//! Value-expression parsing for parameter writes.
//!
//! `SetParameter` accepts a DSL *value expression* — not full method code —
//! evaluates it in an empty environment, and substitutes the result. The
//! grammar covers literals (numbers, durations, bools, strings, enum tags),
//! arithmetic, tuples, lists, and distribution literals.
//!
//! ```text
//! 0.8
//! 3 * 100ms
//! dist { 0.8 => true, 0.2 => false }
//! (true, 10ms)
//! ```

use nom::{
    branch::alt,
    bytes::complete::{tag, take_while},
    character::complete::{alpha1, alphanumeric1, char, digit1, multispace0},
    combinator::{all_consuming, map, opt, recognize},
    multi::{many0, separated_list0, separated_list1},
    sequence::{delimited, pair, preceded, separated_pair, tuple},
    IResult,
};

use crate::ast::{BinOp, DistArm, Expr, UnOp};
use crate::error::{Result, SdlError};
use crate::outcomes::Outcomes;
use crate::value::Value;

/// Parse and evaluate a self-contained value expression.
pub fn parse_value_expr(input: &str) -> Result<Value> {
    let expr = parse_expr(input)?;
    eval_const(&expr)
}

fn parse_expr(input: &str) -> Result<Expr> {
    match all_consuming(delimited(multispace0, additive, multispace0))(input) {
        Ok((_, e)) => Ok(e),
        Err(e) => Err(SdlError::InvalidArgument(format!(
            "malformed value expression {input:?}: {e}"
        ))),
    }
}

/// Constant-fold an expression with no environment. Identifiers and calls
/// are rejected: parameter expressions must be self-contained.
pub fn eval_const(expr: &Expr) -> Result<Value> {
    match expr {
        Expr::Literal { value } => Ok(value.clone()),
        Expr::Unary { op, operand } => {
            let v = eval_const(operand)?;
            match op {
                UnOp::Neg => match v {
                    Value::Int(n) => Ok(Value::Int(-n)),
                    Value::Float(x) => Ok(Value::Float(-x)),
                    Value::Duration(s) => Ok(Value::Duration(-s)),
                    other => Err(SdlError::Type(format!(
                        "cannot negate {}",
                        other.type_of()
                    ))),
                },
                UnOp::Not => Ok(Value::Bool(!v.as_bool()?)),
            }
        }
        Expr::Binary { op, lhs, rhs } => {
            let a = eval_const(lhs)?;
            let b = eval_const(rhs)?;
            apply_arith(*op, &a, &b)
        }
        Expr::Dist { arms } => {
            let mut o = Outcomes::new();
            for arm in arms {
                o.add(arm.weight, eval_const(&arm.value)?)?;
            }
            Ok(Value::Outcomes(o))
        }
        Expr::Tuple { items } => Ok(Value::Tuple(
            items.iter().map(eval_const).collect::<Result<_>>()?,
        )),
        Expr::List { items } => Ok(Value::List(
            items.iter().map(eval_const).collect::<Result<_>>()?,
        )),
        Expr::Ident { name } => Err(SdlError::InvalidArgument(format!(
            "value expressions must be self-contained; unknown name {name:?}"
        ))),
        _ => Err(SdlError::InvalidArgument(
            "only literal value expressions are allowed here".to_string(),
        )),
    }
}

/// Arithmetic over constant values, shared with the evaluator.
pub fn apply_arith(op: BinOp, a: &Value, b: &Value) -> Result<Value> {
    use BinOp::*;
    match op {
        And => Ok(Value::Bool(a.as_bool()? && b.as_bool()?)),
        Or => Ok(Value::Bool(a.as_bool()? || b.as_bool()?)),
        Eq => Ok(Value::Bool(a == b)),
        Ne => Ok(Value::Bool(a != b)),
        Lt | Le | Gt | Ge => {
            let (x, y) = (a.as_f64()?, b.as_f64()?);
            Ok(Value::Bool(match op {
                Lt => x < y,
                Le => x <= y,
                Gt => x > y,
                _ => x >= y,
            }))
        }
        Add | Sub | Mul | Div | Mod => numeric(op, a, b),
    }
}

fn numeric(op: BinOp, a: &Value, b: &Value) -> Result<Value> {
    use BinOp::*;
    if matches!(op, Div | Mod) {
        if b.as_f64()? == 0.0 {
            return Err(SdlError::InvalidArgument("division by zero".to_string()));
        }
    }
    let duration = matches!(a, Value::Duration(_)) || matches!(b, Value::Duration(_));
    let float = matches!(a, Value::Float(_)) || matches!(b, Value::Float(_));
    let (x, y) = (a.as_f64()?, b.as_f64()?);
    let r = match op {
        Add => x + y,
        Sub => x - y,
        Mul => x * y,
        Div => x / y,
        Mod => x % y,
        _ => unreachable!(),
    };
    if duration {
        Ok(Value::Duration(r))
    } else if float || matches!(op, Div) {
        Ok(Value::Float(r))
    } else {
        Ok(Value::Int(r as i64))
    }
}

// ─── Grammar ──────────────────────────────────────────────────

fn ws<'a, O>(
    inner: impl FnMut(&'a str) -> IResult<&'a str, O>,
) -> impl FnMut(&'a str) -> IResult<&'a str, O> {
    delimited(multispace0, inner, multispace0)
}

fn additive(input: &str) -> IResult<&str, Expr> {
    let (input, first) = multiplicative(input)?;
    let (input, rest) = many0(pair(ws(alt((char('+'), char('-')))), multiplicative))(input)?;
    Ok((input, fold_binary(first, rest)))
}

fn multiplicative(input: &str) -> IResult<&str, Expr> {
    let (input, first) = factor(input)?;
    let (input, rest) = many0(pair(ws(alt((char('*'), char('/'), char('%')))), factor))(input)?;
    Ok((input, fold_binary(first, rest)))
}

fn fold_binary(first: Expr, rest: Vec<(char, Expr)>) -> Expr {
    rest.into_iter().fold(first, |lhs, (op, rhs)| Expr::Binary {
        op: match op {
            '+' => BinOp::Add,
            '-' => BinOp::Sub,
            '*' => BinOp::Mul,
            '/' => BinOp::Div,
            _ => BinOp::Mod,
        },
        lhs: Box::new(lhs),
        rhs: Box::new(rhs),
    })
}

fn factor(input: &str) -> IResult<&str, Expr> {
    alt((
        map(preceded(ws(char('-')), factor), |e| Expr::Unary {
            op: UnOp::Neg,
            operand: Box::new(e),
        }),
        map(preceded(ws(char('!')), factor), |e| Expr::Unary {
            op: UnOp::Not,
            operand: Box::new(e),
        }),
        atom,
    ))(input)
}

fn atom(input: &str) -> IResult<&str, Expr> {
    ws(alt((
        dist_literal,
        number,
        string_literal,
        bool_or_enum_or_ident,
        list_literal,
        tuple_or_group,
    )))(input)
}

/// A number with an optional duration unit suffix. `10ms` is a Duration;
/// `10.5` a Float; `10` an Int.
fn number(input: &str) -> IResult<&str, Expr> {
    let (input, text) = recognize(tuple((digit1, opt(pair(char('.'), digit1)))))(input)?;
    let (input, unit) = opt(alt((
        tag("ns"),
        tag("us"),
        tag("ms"),
        tag("min"),
        tag("s"),
    )))(input)?;
    let raw: f64 = text.parse().unwrap_or(0.0);
    let expr = match unit {
        Some(u) => {
            let secs = match u {
                "ns" => raw * 1e-9,
                "us" => raw * 1e-6,
                "ms" => raw * 1e-3,
                "min" => raw * 60.0,
                _ => raw,
            };
            Expr::lit(Value::Duration(secs))
        }
        None if text.contains('.') => Expr::lit(Value::Float(raw)),
        None => Expr::lit(Value::Int(raw as i64)),
    };
    Ok((input, expr))
}

fn string_literal(input: &str) -> IResult<&str, Expr> {
    map(
        delimited(char('"'), take_while(|c| c != '"'), char('"')),
        |s: &str| Expr::lit(Value::String(s.to_string())),
    )(input)
}

fn identifier(input: &str) -> IResult<&str, &str> {
    recognize(pair(alpha1, many0(alt((alphanumeric1, tag("_"))))))(input)
}

fn bool_or_enum_or_ident(input: &str) -> IResult<&str, Expr> {
    let (input, name) = identifier(input)?;
    match name {
        "true" => return Ok((input, Expr::lit(Value::Bool(true)))),
        "false" => return Ok((input, Expr::lit(Value::Bool(false)))),
        "nil" => return Ok((input, Expr::lit(Value::Nil))),
        _ => {}
    }
    let (input, tag_part) = opt(preceded(char('.'), identifier))(input)?;
    let expr = match tag_part {
        Some(t) => Expr::lit(Value::Enum {
            name: name.to_string(),
            tag: t.to_string(),
        }),
        None => Expr::Ident {
            name: name.to_string(),
        },
    };
    Ok((input, expr))
}

fn list_literal(input: &str) -> IResult<&str, Expr> {
    map(
        delimited(
            char('['),
            separated_list0(ws(char(',')), additive),
            ws(char(']')),
        ),
        |items| Expr::List { items },
    )(input)
}

/// `( expr )` is a group; `( expr, expr, ... )` is a tuple.
fn tuple_or_group(input: &str) -> IResult<&str, Expr> {
    let (input, items) = delimited(
        char('('),
        separated_list1(ws(char(',')), additive),
        ws(char(')')),
    )(input)?;
    let expr = if items.len() == 1 {
        items.into_iter().next().unwrap_or(Expr::lit(Value::Nil))
    } else {
        Expr::Tuple { items }
    };
    Ok((input, expr))
}

/// `dist { w => expr, ... }`
fn dist_literal(input: &str) -> IResult<&str, Expr> {
    let (input, _) = tag("dist")(input)?;
    let (input, arms) = delimited(
        ws(char('{')),
        separated_list0(
            ws(char(',')),
            separated_pair(ws(weight), tag("=>"), additive),
        ),
        ws(char('}')),
    )(input)?;
    Ok((
        input,
        Expr::Dist {
            arms: arms
                .into_iter()
                .map(|(weight, value)| DistArm { weight, value })
                .collect(),
        },
    ))
}

fn weight(input: &str) -> IResult<&str, f64> {
    map(
        recognize(tuple((digit1, opt(pair(char('.'), digit1))))),
        |s: &str| s.parse().unwrap_or(0.0),
    )(input)
}
