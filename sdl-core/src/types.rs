//! Structural type model mirroring the runtime [`crate::value::Value`]
//! variants, plus the parametric forms used in declarations.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "of")]
pub enum Type {
    Nil,
    Bool,
    Int,
    Float,
    Duration,
    String,
    Enum { name: String, cases: Vec<String> },
    Tuple(Vec<Type>),
    List(Box<Type>),
    Outcomes(Box<Type>),
    Component(String),
    Method,
    Future,
}

impl std::fmt::Display for Type {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Type::Nil => write!(f, "Nil"),
            Type::Bool => write!(f, "Bool"),
            Type::Int => write!(f, "Int"),
            Type::Float => write!(f, "Float"),
            Type::Duration => write!(f, "Duration"),
            Type::String => write!(f, "String"),
            Type::Enum { name, .. } => write!(f, "{name}"),
            Type::Tuple(items) => {
                write!(f, "Tuple[")?;
                for (i, t) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{t}")?;
                }
                write!(f, "]")
            }
            Type::List(t) => write!(f, "List[{t}]"),
            Type::Outcomes(t) => write!(f, "Outcomes[{t}]"),
            Type::Component(name) => write!(f, "{name}"),
            Type::Method => write!(f, "Method"),
            Type::Future => write!(f, "Future"),
        }
    }
}
