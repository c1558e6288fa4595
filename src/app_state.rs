//! Application state shared across every Axum handler.
//!
//! Holds the composed ingestion-core components as `Arc`s so each handler
//! gets cheap clones and shared ownership, the same composition-root style
//! the teacher's own `AppState` uses for its port fields.

use ingestion::{PipelineOrchestrator, ProgressBus, RecoveryController, UploadSessionManager};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub upload_sessions: Arc<UploadSessionManager>,
    pub progress_bus: Arc<ProgressBus>,
    pub pipeline: Arc<PipelineOrchestrator>,
    pub recovery: Arc<RecoveryController>,
    pub jwt_secret: Arc<str>,
    pub uploads_path: Arc<str>,
}

impl AppState {
    pub fn new(
        upload_sessions: Arc<UploadSessionManager>,
        progress_bus: Arc<ProgressBus>,
        pipeline: Arc<PipelineOrchestrator>,
        recovery: Arc<RecoveryController>,
        jwt_secret: impl Into<Arc<str>>,
        uploads_path: impl Into<Arc<str>>,
    ) -> Self {
        Self {
            upload_sessions,
            progress_bus,
            pipeline,
            recovery,
            jwt_secret: jwt_secret.into(),
            uploads_path: uploads_path.into(),
        }
    }
}
