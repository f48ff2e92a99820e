//! Application state for the API server

use crate::{Config, Orchestrator};
use std::sync::Arc;

/// Shared application state accessible to all route handlers
///
/// Cloned for each request; both fields are reference counted.
#[derive(Clone)]
pub struct AppState {
    /// The orchestrator that owns every download task
    pub orchestrator: Arc<Orchestrator>,

    /// Configuration the server was started with
    pub config: Arc<Config>,
}

impl AppState {
    /// Create a new AppState
    pub fn new(orchestrator: Arc<Orchestrator>, config: Arc<Config>) -> Self {
        Self {
            orchestrator,
            config,
        }
    }
}
