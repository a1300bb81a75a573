pub mod canvases;
pub mod diagram;
pub mod flows;
pub mod generators;
pub mod health;
pub mod metrics;
pub mod parameters;
pub mod systems;
pub mod traces;
