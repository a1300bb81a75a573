//! Built-in analytic components.
//!
//! These do not simulate queues step-by-step; every method call derives an
//! outcome from closed-form models (M/M/c for contention) and the component's
//! current parameters, then samples it. The evaluator dispatches here when a
//! method call lands on a component whose declaration carries a
//! [`NativeKind`] marker.

mod network;
mod queueing;
mod storage;

pub use queueing::{erlang_c, mmc_utilization, mmc_wait_time};

use std::collections::HashMap;

use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

use crate::ast::{ComponentDecl, MethodDecl, ParamDecl, UsesDecl};
use crate::error::{Result, SdlError};
use crate::types::Type;
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NativeKind {
    Disk,
    Cache,
    HashIndex,
    BTreeIndex,
    LsmTree,
    Bitmap,
    Queue,
    ResourcePool,
    NetworkLink,
    Batcher,
}

pub type ParamMap = HashMap<String, Value>;

/// One native method invocation: the method name, evaluated arguments, the
/// instance's parameters, and (for index components) the parameters of the
/// bound `disk` dependency.
pub struct NativeCall<'a> {
    pub method: &'a str,
    pub args: &'a [Value],
    pub params: &'a ParamMap,
    pub disk: Option<&'a ParamMap>,
}

/// The sampled result of a native call: the value handed back to the caller
/// and the latency charged to the caller's virtual time.
pub struct NativeReturn {
    pub value: Value,
    pub latency: f64,
}

pub fn dispatch(kind: NativeKind, call: NativeCall<'_>, rng: &mut StdRng) -> Result<NativeReturn> {
    match kind {
        NativeKind::Disk => storage::disk(call, rng),
        NativeKind::Cache => storage::cache(call, rng),
        NativeKind::HashIndex | NativeKind::BTreeIndex | NativeKind::LsmTree
        | NativeKind::Bitmap => storage::index(kind, call, rng),
        NativeKind::Queue | NativeKind::ResourcePool => queueing::pool(kind, call, rng),
        NativeKind::NetworkLink => network::link(call, rng),
        NativeKind::Batcher => network::batcher(call),
    }
}

/// Probability that `method` on a native of `kind` returns `true`, when the
/// model makes that statically derivable. Consumed by the flow analyzer for
/// branch attribution.
pub fn truthiness(kind: NativeKind, method: &str, params: &ParamMap) -> Option<f64> {
    match (kind, method) {
        (NativeKind::Cache, "Read") => Some(p_f64(params, "HitRate", 0.8)),
        (NativeKind::Queue | NativeKind::ResourcePool, "Acquire" | "Enqueue") => {
            Some(queueing::success_probability(params))
        }
        (NativeKind::NetworkLink, _) => Some(1.0 - p_f64(params, "LossProb", 0.0)),
        _ => None,
    }
}

/// Current contention snapshot for resource-like natives; `None` for kinds
/// with no capacity model.
pub struct UtilizationSample {
    pub utilization: f64,
    pub capacity: f64,
    pub current_load: f64,
}

pub fn utilization(kind: NativeKind, params: &ParamMap) -> Option<UtilizationSample> {
    match kind {
        NativeKind::Queue | NativeKind::ResourcePool => Some(queueing::utilization_sample(params)),
        NativeKind::Disk => Some(storage::disk_utilization(params)),
        _ => None,
    }
}

/// Kinds whose contention model consumes the flow-derived arrival rate.
pub fn consumes_arrival_rate(kind: NativeKind) -> bool {
    matches!(
        kind,
        NativeKind::Disk | NativeKind::Queue | NativeKind::ResourcePool | NativeKind::Batcher
    )
}

// ─── Parameter access ─────────────────────────────────────────

pub(crate) fn p_f64(params: &ParamMap, name: &str, default: f64) -> f64 {
    params.get(name).and_then(|v| v.as_f64().ok()).unwrap_or(default)
}

pub(crate) fn p_u64(params: &ParamMap, name: &str, default: u64) -> u64 {
    params
        .get(name)
        .and_then(|v| v.as_int().ok())
        .map(|n| n.max(0) as u64)
        .unwrap_or(default)
}

pub(crate) fn p_str<'a>(params: &'a ParamMap, name: &str, default: &'a str) -> &'a str {
    match params.get(name) {
        Some(Value::String(s)) => s.as_str(),
        _ => default,
    }
}

pub(crate) fn unknown_method(kind: NativeKind, method: &str) -> SdlError {
    SdlError::NotFound(format!("native {kind:?} has no method {method}"))
}

// ─── Declarations ─────────────────────────────────────────────

fn param(name: &str, ty: Type, default: Value) -> ParamDecl {
    ParamDecl {
        name: name.to_string(),
        ty,
        default: Some(crate::ast::Expr::lit(default)),
    }
}

fn method(name: &str, returns: Type) -> MethodDecl {
    MethodDecl {
        name: name.to_string(),
        params: Vec::new(),
        returns: Some(returns),
        body: Vec::new(),
    }
}

/// Component declarations for every built-in, injected into the declaration
/// scope alongside loaded files so systems can `use` them by name.
pub fn builtin_decls() -> Vec<ComponentDecl> {
    let disk_uses = vec![UsesDecl {
        name: "disk".to_string(),
        component_type: "Disk".to_string(),
    }];
    let index_params = |extra: Vec<ParamDecl>| -> Vec<ParamDecl> {
        let mut ps = vec![
            param("NumRecords", Type::Int, Value::Int(1_000_000)),
            param("PageSize", Type::Int, Value::Int(4096)),
            param("RecordSize", Type::Int, Value::Int(128)),
        ];
        ps.extend(extra);
        ps
    };

    vec![
        ComponentDecl {
            name: "Disk".to_string(),
            params: vec![
                param("ReadP50", Type::Duration, Value::Duration(0.0005)),
                param("ReadP99", Type::Duration, Value::Duration(0.004)),
                param("WriteP50", Type::Duration, Value::Duration(0.001)),
                param("WriteP99", Type::Duration, Value::Duration(0.008)),
                param("FailureRate", Type::Float, Value::Float(0.0001)),
                param("ArrivalRate", Type::Float, Value::Float(0.0)),
                param("Size", Type::Int, Value::Int(1)),
            ],
            uses: Vec::new(),
            methods: vec![method("Read", Type::Bool), method("Write", Type::Bool)],
            native: Some(NativeKind::Disk),
        },
        ComponentDecl {
            name: "Cache".to_string(),
            params: vec![
                param("HitRate", Type::Float, Value::Float(0.8)),
                param("HitLatency", Type::Duration, Value::Duration(0.0002)),
                param("MissLatency", Type::Duration, Value::Duration(0.001)),
                param("WriteLatency", Type::Duration, Value::Duration(0.0005)),
            ],
            uses: Vec::new(),
            methods: vec![method("Read", Type::Bool), method("Write", Type::Bool)],
            native: Some(NativeKind::Cache),
        },
        ComponentDecl {
            name: "HashIndex".to_string(),
            params: index_params(vec![]),
            uses: disk_uses.clone(),
            methods: vec![method("Find", Type::Bool), method("Insert", Type::Bool)],
            native: Some(NativeKind::HashIndex),
        },
        ComponentDecl {
            name: "BTreeIndex".to_string(),
            params: index_params(vec![]),
            uses: disk_uses.clone(),
            methods: vec![method("Find", Type::Bool), method("Insert", Type::Bool)],
            native: Some(NativeKind::BTreeIndex),
        },
        ComponentDecl {
            name: "LSMTree".to_string(),
            params: index_params(vec![param(
                "Levels",
                Type::Int,
                Value::Int(4),
            )]),
            uses: disk_uses.clone(),
            methods: vec![method("Read", Type::Bool), method("Write", Type::Bool)],
            native: Some(NativeKind::LsmTree),
        },
        ComponentDecl {
            name: "Bitmap".to_string(),
            params: index_params(vec![]),
            uses: disk_uses,
            methods: vec![method("Get", Type::Bool), method("Set", Type::Bool)],
            native: Some(NativeKind::Bitmap),
        },
        ComponentDecl {
            name: "Queue".to_string(),
            params: vec![
                param("ArrivalRate", Type::Float, Value::Float(0.0)),
                param("Size", Type::Int, Value::Int(1)),
                param("AvgHoldTime", Type::Duration, Value::Duration(0.01)),
            ],
            uses: Vec::new(),
            methods: vec![method("Enqueue", Type::Bool), method("Dequeue", Type::Bool)],
            native: Some(NativeKind::Queue),
        },
        ComponentDecl {
            name: "ResourcePool".to_string(),
            params: vec![
                param("ArrivalRate", Type::Float, Value::Float(0.0)),
                param("Size", Type::Int, Value::Int(10)),
                param("AvgHoldTime", Type::Duration, Value::Duration(0.1)),
            ],
            uses: Vec::new(),
            methods: vec![method("Acquire", Type::Bool), method("Release", Type::Nil)],
            native: Some(NativeKind::ResourcePool),
        },
        ComponentDecl {
            name: "NetworkLink".to_string(),
            params: vec![
                param("BaseLatency", Type::Duration, Value::Duration(0.001)),
                param("Jitter", Type::Duration, Value::Duration(0.0005)),
                param("LossProb", Type::Float, Value::Float(0.0)),
            ],
            uses: Vec::new(),
            methods: vec![method("Send", Type::Bool)],
            native: Some(NativeKind::NetworkLink),
        },
        ComponentDecl {
            name: "Batcher".to_string(),
            params: vec![
                param("Mode", Type::String, Value::String("size".to_string())),
                param("BatchSize", Type::Int, Value::Int(16)),
                param("FlushInterval", Type::Duration, Value::Duration(0.01)),
                param("ArrivalRate", Type::Float, Value::Float(0.0)),
                param("DownstreamLatency", Type::Duration, Value::Duration(0.002)),
            ],
            uses: Vec::new(),
            methods: vec![method("Submit", Type::Bool)],
            native: Some(NativeKind::Batcher),
        },
    ]
}
