//! Structured trace capture. Each top-level call produces a tree of events
//! ordered by virtual timestamp; generator workers hand completed traces to
//! the metric tracer, and `ExecuteTrace` returns them verbatim.

use serde::{Deserialize, Serialize};

use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceKind {
    Enter,
    Exit,
    Go,
    Wait,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEvent {
    pub kind: TraceKind,
    pub id: u64,
    #[serde(default)]
    pub parent_id: Option<u64>,
    /// Virtual seconds since the start of the call.
    pub timestamp: f64,
    /// Virtual seconds spent inside the frame; set on `exit` events.
    #[serde(default)]
    pub duration: Option<f64>,
    /// Dotted instance path.
    pub component: String,
    pub method: String,
    #[serde(default)]
    pub args: Vec<Value>,
    #[serde(default)]
    pub return_value: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
}

impl TraceEvent {
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}
