//! Bootstrap module: the composition root wiring every ingestion-core
//! component together, following the same numbered, `info!`-logged
//! `bootstrap()` shape as the teacher's own `src/bootstrap.rs`.

use crate::app_state::AppState;
use crate::config::Config;
use ingestion::chunk_store::FilesystemChunkStore;
use ingestion::pipeline::{CleanupStageHandler, PipelineOrchestrator, StageHandler, StageName, StorageStageHandler, StubStageHandler};
use ingestion::progress_bus::ProgressBus;
use ingestion::recovery::RecoveryController;
use ingestion::upload_session::UploadSessionManager;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Assembles every ingestion component and returns the `AppState` Axum
/// hands to every handler.
pub async fn bootstrap(config: &Config) -> Result<AppState, Box<dyn std::error::Error + Send + Sync>> {
    info!("starting ingestion API bootstrap");

    info!("1. preparing uploads directory at {}", config.ingestion.uploads_path);
    tokio::fs::create_dir_all(&config.ingestion.uploads_path).await?;

    info!("2. constructing chunk store");
    let chunk_store: Arc<dyn ingestion::ChunkStore> =
        Arc::new(FilesystemChunkStore::new(&config.ingestion.uploads_path));

    info!("3. constructing progress bus");
    let progress_bus = ProgressBus::new();

    info!("4. registering post-assembly stage handlers");
    let handlers = build_stage_handlers(&config.ingestion.uploads_path, chunk_store.clone());

    info!("5. constructing pipeline orchestrator");
    let pipeline = Arc::new(PipelineOrchestrator::new(handlers, progress_bus.clone()));

    info!("6. constructing recovery controller");
    let recovery = Arc::new(RecoveryController::new(
        config.ingestion.retry_base_ms,
        config.ingestion.retry_max_ms,
        config.ingestion.retry_max_attempts,
    ));

    info!("7. constructing upload session manager");
    let upload_sessions = Arc::new(UploadSessionManager::new(
        chunk_store,
        progress_bus.clone(),
        pipeline.clone(),
        recovery.clone(),
        config.ingestion.clone(),
    ));

    info!("bootstrap completed successfully");
    Ok(AppState::new(
        upload_sessions,
        progress_bus,
        pipeline,
        recovery,
        config.auth.jwt_secret.as_str(),
        config.ingestion.uploads_path.as_str(),
    ))
}

/// Wires the `ocr`/`stt`/`embedding` stub handlers plus the real
/// `storage`/`cleanup` handlers. OCR/STT/embedding model calls are outside
/// this core's scope; the stubs preserve the weighted-progress contract a
/// real backend would participate in.
fn build_stage_handlers(
    uploads_path: &str,
    chunk_store: Arc<dyn ingestion::ChunkStore>,
) -> HashMap<StageName, Arc<dyn StageHandler>> {
    let mut handlers: HashMap<StageName, Arc<dyn StageHandler>> = HashMap::new();
    handlers.insert(
        StageName::Ocr,
        Arc::new(StubStageHandler::new("ocr", 4, Duration::from_millis(150))),
    );
    handlers.insert(
        StageName::Stt,
        Arc::new(StubStageHandler::new("stt", 4, Duration::from_millis(150))),
    );
    handlers.insert(
        StageName::Embedding,
        Arc::new(StubStageHandler::new("embedding", 2, Duration::from_millis(100))),
    );
    let final_dir = std::path::Path::new(uploads_path).join("files");
    handlers.insert(StageName::Storage, Arc::new(StorageStageHandler::new(final_dir)));
    handlers.insert(StageName::Cleanup, Arc::new(CleanupStageHandler::new(chunk_store)));
    handlers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bootstrap_with_default_config_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.ingestion.uploads_path = dir.path().to_string_lossy().to_string();

        let result = bootstrap(&config).await;
        assert!(result.is_ok(), "bootstrap should succeed with default config");
    }
}
