use std::sync::Arc;

use crate::pipeline::Orchestrator;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    /// Request body cap for document uploads.
    pub max_upload_bytes: usize,
}
