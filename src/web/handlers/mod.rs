//! HTTP handlers.

pub mod admin;
pub mod callback;

pub use admin::*;
pub use callback::*;

use std::sync::Arc;

use crate::engine::Engine;

/// Shared state for all handlers.
pub struct AppState {
    pub engine: Arc<Engine>,
}

impl AppState {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self { engine }
    }
}
