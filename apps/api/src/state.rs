use crate::transform::TransformService;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    /// Owns the LLM client and the history store.
    pub transform: TransformService,
}
