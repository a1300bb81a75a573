//! SDL simulation and analysis engine.
//!
//! The crate is layered leaves-first: the outcomes algebra and value model at
//! the bottom, the AST-walking evaluator and system instance graph above
//! them, then the flow evaluator, traffic generators, and metric pipeline,
//! all coordinated per session by the [`canvas::Canvas`]. The RPC surface
//! lives in the companion `sdl-server` crate and delegates here.

pub mod ast;
pub mod canvas;
pub mod error;
pub mod eval;
pub mod expr;
pub mod flow;
pub mod generator;
pub mod metrics;
pub mod natives;
pub mod outcomes;
pub mod parser;
pub mod resolver;
pub mod system;
pub mod trace;
pub mod types;
pub mod value;

pub use canvas::{Canvas, CanvasManager};
pub use error::{Result, SdlError};
pub use outcomes::{AccessResult, Outcomes};
pub use value::Value;
