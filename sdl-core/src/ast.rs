//! Typed AST consumed by the engine.
//!
//! The surface grammar and parser live outside the core; whatever parses SDL
//! source is expected to yield these types (the bundled [`crate::parser`]
//! seam accepts their serde form directly). The AST is self-describing:
//! every call site names its dependency slot and method, so the evaluator
//! and the static flow analyzer walk it without consulting external
//! configuration.
//!
//! ```text
//! Source → external parser → FileDecl
//!                               ↓
//!              system construction (instance graph)
//!                               ↓
//!          evaluator (sampled runs) + flow analyzer (static walk)
//! ```

use serde::{Deserialize, Serialize};

use crate::natives::NativeKind;
use crate::types::Type;
use crate::value::Value;

// ─── Declarations ─────────────────────────────────────────────

/// One loaded source file: component and system declarations.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FileDecl {
    pub path: String,
    #[serde(default)]
    pub components: Vec<ComponentDecl>,
    #[serde(default)]
    pub systems: Vec<SystemDecl>,
}

/// A component: typed parameters, dependency slots, and methods.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentDecl {
    pub name: String,
    #[serde(default)]
    pub params: Vec<ParamDecl>,
    #[serde(default)]
    pub uses: Vec<UsesDecl>,
    #[serde(default)]
    pub methods: Vec<MethodDecl>,
    /// Set for built-in analytic components; their methods dispatch to the
    /// native implementations instead of a body.
    #[serde(default)]
    pub native: Option<NativeKind>,
}

impl ComponentDecl {
    pub fn method(&self, name: &str) -> Option<&MethodDecl> {
        self.methods.iter().find(|m| m.name == name)
    }

    pub fn param(&self, name: &str) -> Option<&ParamDecl> {
        self.params.iter().find(|p| p.name == name)
    }

    pub fn uses_slot(&self, name: &str) -> Option<&UsesDecl> {
        self.uses.iter().find(|u| u.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamDecl {
    pub name: String,
    pub ty: Type,
    #[serde(default)]
    pub default: Option<Expr>,
}

/// A dependency slot: `uses db Database` binds instance-local name `db` to
/// some instance of component type `Database`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsesDecl {
    pub name: String,
    pub component_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodDecl {
    pub name: String,
    #[serde(default)]
    pub params: Vec<ParamDecl>,
    #[serde(default)]
    pub returns: Option<Type>,
    #[serde(default)]
    pub body: Vec<Stmt>,
}

/// A system: an ordered list of named component instances. Declaration order
/// is irrelevant for dependency resolution; forward references are resolved
/// in the binding pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemDecl {
    pub name: String,
    pub instances: Vec<InstanceDecl>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceDecl {
    pub name: String,
    pub component: String,
    /// Parameter overrides; expressions must be self-contained (they are
    /// evaluated in an empty environment).
    #[serde(default)]
    pub params: Vec<ParamBinding>,
    /// Dependency slot → instance name within the same system.
    #[serde(default)]
    pub bindings: Vec<DepBinding>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamBinding {
    pub name: String,
    pub expr: Expr,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepBinding {
    pub slot: String,
    pub target: String,
}

// ─── Statements ───────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "stmt")]
pub enum Stmt {
    Let {
        name: String,
        expr: Expr,
    },
    Assign {
        name: String,
        expr: Expr,
    },
    Expr {
        expr: Expr,
    },
    Return {
        #[serde(default)]
        expr: Option<Expr>,
    },
    If {
        cond: Expr,
        then_body: Vec<Stmt>,
        #[serde(default)]
        else_body: Vec<Stmt>,
    },
    /// Sequential repetition; the count may be deterministic or sampled once.
    For {
        count: Expr,
        body: Vec<Stmt>,
    },
    /// Advance virtual time by the evaluated duration.
    Delay {
        expr: Expr,
    },
    /// Join previously forked futures, advancing virtual time to the max of
    /// their completion times.
    Wait {
        futures: Vec<Expr>,
    },
}

// ─── Expressions ──────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnOp {
    Not,
    Neg,
}

/// Where a call is directed: a method on this component, or a method on a
/// bound dependency slot (`self.dep.method(...)`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "target")]
pub enum CallTarget {
    SelfMethod { method: String },
    Dependency { dep: String, method: String },
}

/// One arm of a distribution literal: `weight => value`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistArm {
    pub weight: f64,
    pub value: Expr,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "expr")]
pub enum Expr {
    Literal {
        value: Value,
    },
    Ident {
        name: String,
    },
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Unary {
        op: UnOp,
        operand: Box<Expr>,
    },
    /// Draw one bucket by weighted random from an Outcomes expression.
    Sample {
        operand: Box<Expr>,
    },
    Call {
        target: CallTarget,
        #[serde(default)]
        args: Vec<Expr>,
    },
    /// Fork: evaluate asynchronously, yield a FutureRef.
    Go {
        operand: Box<Expr>,
    },
    /// Distribution literal, e.g. `dist { 0.8 => true, 0.2 => false }`.
    Dist {
        arms: Vec<DistArm>,
    },
    Tuple {
        items: Vec<Expr>,
    },
    List {
        items: Vec<Expr>,
    },
}

impl Expr {
    pub fn lit(value: Value) -> Expr {
        Expr::Literal { value }
    }

    pub fn ident(name: &str) -> Expr {
        Expr::Ident {
            name: name.to_string(),
        }
    }

    pub fn call_dep(dep: &str, method: &str, args: Vec<Expr>) -> Expr {
        Expr::Call {
            target: CallTarget::Dependency {
                dep: dep.to_string(),
                method: method.to_string(),
            },
            args,
        }
    }

    pub fn call_self(method: &str, args: Vec<Expr>) -> Expr {
        Expr::Call {
            target: CallTarget::SelfMethod {
                method: method.to_string(),
            },
            args,
        }
    }
}
