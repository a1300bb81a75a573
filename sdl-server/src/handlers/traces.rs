//! Debug tracing: run one call, or enumerate the static path tree.

use axum::extract::{Path, State};
use axum::Json;
use sdl_core::canvas::TraceResponse;
use sdl_core::flow::PathNode;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ExecuteTraceRequest {
    pub component: String,
    pub method: String,
    /// Fix the sampling RNG for reproducible traces.
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default)]
    pub deadline_ms: Option<u64>,
}

pub async fn execute(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<ExecuteTraceRequest>,
) -> Result<Json<TraceResponse>, AppError> {
    let canvas = state.manager.get(id).await?;
    let run = canvas.execute_trace(&req.component, &req.method, req.seed);
    let response = match req.deadline_ms {
        Some(ms) => tokio::time::timeout(std::time::Duration::from_millis(ms), run)
            .await
            .map_err(|_| {
                AppError(sdl_core::SdlError::DeadlineExceeded(format!(
                    "trace did not finish within {ms} ms"
                )))
            })??,
        None => run.await?,
    };
    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
pub struct TracePathsRequest {
    pub component: String,
    pub method: String,
    #[serde(default)]
    pub max_depth: Option<usize>,
}

pub async fn paths(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<TracePathsRequest>,
) -> Result<Json<PathNode>, AppError> {
    let canvas = state.manager.get(id).await?;
    Ok(Json(
        canvas
            .trace_all_paths(&req.component, &req.method, req.max_depth)
            .await?,
    ))
}
