//! Runtime tagged values.
//!
//! A `Value` is immutable after construction. The virtual-time delta a value's
//! producing expression accumulated is tracked by the evaluator frame, not
//! inside the value itself; the one exception is [`Value::Future`], which
//! carries the virtual completion time of its forked evaluation so `wait` can
//! join on it.

use serde::{Deserialize, Serialize};

use crate::error::{Result, SdlError};
use crate::outcomes::{AccessResult, Outcomes};
use crate::types::Type;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value")]
pub enum Value {
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    /// Seconds.
    Duration(f64),
    String(String),
    Enum {
        name: String,
        tag: String,
    },
    Tuple(Vec<Value>),
    List(Vec<Value>),
    Outcomes(Outcomes<Value>),
    /// Dotted instance path into the active system.
    ComponentRef(String),
    MethodRef {
        component: String,
        method: String,
    },
    /// Result of a `go` fork: the forked path's virtual completion time plus
    /// its result.
    Future {
        completes_at: f64,
        result: Box<Value>,
    },
}

impl Value {
    pub fn type_of(&self) -> Type {
        match self {
            Value::Nil => Type::Nil,
            Value::Bool(_) => Type::Bool,
            Value::Int(_) => Type::Int,
            Value::Float(_) => Type::Float,
            Value::Duration(_) => Type::Duration,
            Value::String(_) => Type::String,
            Value::Enum { name, .. } => Type::Enum {
                name: name.clone(),
                cases: Vec::new(),
            },
            Value::Tuple(items) => Type::Tuple(items.iter().map(Value::type_of).collect()),
            Value::List(items) => Type::List(Box::new(
                items.first().map(Value::type_of).unwrap_or(Type::Nil),
            )),
            Value::Outcomes(o) => Type::Outcomes(Box::new(
                o.buckets
                    .first()
                    .map(|b| b.value.type_of())
                    .unwrap_or(Type::Nil),
            )),
            Value::ComponentRef(path) => Type::Component(path.clone()),
            Value::MethodRef { .. } => Type::Method,
            Value::Future { .. } => Type::Future,
        }
    }

    pub fn as_bool(&self) -> Result<bool> {
        match self {
            Value::Bool(b) => Ok(*b),
            other => Err(SdlError::Type(format!(
                "expected Bool, got {}",
                other.type_of()
            ))),
        }
    }

    pub fn as_int(&self) -> Result<i64> {
        match self {
            Value::Int(n) => Ok(*n),
            other => Err(SdlError::Type(format!(
                "expected Int, got {}",
                other.type_of()
            ))),
        }
    }

    /// Numeric view: Int, Float, and Duration all coerce.
    pub fn as_f64(&self) -> Result<f64> {
        match self {
            Value::Int(n) => Ok(*n as f64),
            Value::Float(x) => Ok(*x),
            Value::Duration(s) => Ok(*s),
            other => Err(SdlError::Type(format!(
                "expected a numeric value, got {}",
                other.type_of()
            ))),
        }
    }

    /// Duration in seconds. Int/Float are read as seconds.
    pub fn as_duration(&self) -> Result<f64> {
        match self {
            Value::Duration(s) => Ok(*s),
            Value::Int(n) => Ok(*n as f64),
            Value::Float(x) => Ok(*x),
            other => Err(SdlError::Type(format!(
                "expected Duration, got {}",
                other.type_of()
            ))),
        }
    }

    pub fn as_outcomes(&self) -> Result<&Outcomes<Value>> {
        match self {
            Value::Outcomes(o) => Ok(o),
            other => Err(SdlError::Type(format!(
                "expected Outcomes, got {}",
                other.type_of()
            ))),
        }
    }

    /// An `(success, latency)` pair rendered as a Value.
    pub fn from_access(r: AccessResult) -> Value {
        Value::Tuple(vec![Value::Bool(r.success), Value::Duration(r.latency)])
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(n) => write!(f, "{n}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Duration(s) => write!(f, "{s}s"),
            Value::String(s) => write!(f, "{s:?}"),
            Value::Enum { name, tag } => write!(f, "{name}.{tag}"),
            Value::Tuple(items) => {
                write!(f, "(")?;
                for (i, v) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{v}")?;
                }
                write!(f, ")")
            }
            Value::List(items) => {
                write!(f, "[")?;
                for (i, v) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{v}")?;
                }
                write!(f, "]")
            }
            Value::Outcomes(o) => write!(f, "outcomes({} buckets)", o.len()),
            Value::ComponentRef(path) => write!(f, "&{path}"),
            Value::MethodRef { component, method } => write!(f, "&{component}.{method}"),
            Value::Future { completes_at, .. } => write!(f, "future(@{completes_at})"),
        }
    }
}
