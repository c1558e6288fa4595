use async_trait::async_trait;
use kernel::FileId;

/// What a stage handler needs to run: the assembled file and whatever
/// metadata the triggering stage cares about (`toolResource`, content type).
#[derive(Clone)]
pub struct StageContext {
    pub file_id: FileId,
    pub file_path: std::path::PathBuf,
    pub content_type: Option<String>,
}

/// One processing stage's unit of work (OCR, STT, embedding, storage,
/// cleanup). Implementations report incremental progress through the
/// supplied callback so `PipelineOrchestrator` can fold it into the weighted
/// aggregate while the stage is still running.
#[async_trait]
pub trait StageHandler: Send + Sync {
    async fn run(
        &self,
        ctx: &StageContext,
        on_progress: &(dyn Fn(f64) + Send + Sync),
    ) -> Result<(), String>;
}
