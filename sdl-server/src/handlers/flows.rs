//! Flow evaluation and the last flow snapshot.

use std::time::Duration;

use axum::extract::{Path, State};
use axum::Json;
use sdl_core::canvas::FlowState;
use sdl_core::flow::FlowOutcome;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

fn default_strategy() -> String {
    "runtime".to_string()
}

#[derive(Debug, Deserialize)]
pub struct EvaluateFlowsRequest {
    #[serde(default = "default_strategy")]
    pub strategy: String,
    /// Optional evaluation deadline; past it a partial snapshot is returned.
    #[serde(default)]
    pub deadline_ms: Option<u64>,
}

pub async fn evaluate(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<EvaluateFlowsRequest>,
) -> Result<Json<FlowOutcome>, AppError> {
    let canvas = state.manager.get(id).await?;
    let deadline = req.deadline_ms.map(Duration::from_millis);
    Ok(Json(canvas.evaluate_flows(&req.strategy, deadline).await?))
}

pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<FlowState>, AppError> {
    let canvas = state.manager.get(id).await?;
    Ok(Json(canvas.flow_state().await?))
}
