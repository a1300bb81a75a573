//! Shared application state.

use std::sync::Arc;

use sdl_core::CanvasManager;

#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<CanvasManager>,
}

impl AppState {
    pub fn new(manager: Arc<CanvasManager>) -> Self {
        Self { manager }
    }
}
