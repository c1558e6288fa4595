use super::dto::Action;
use async_trait::async_trait;
use kernel::{FileId, IngestionError};

/// Anything that can own a recoverable operation and be told to retry it
/// after a delay, or give up. `UploadSessionManager` and
/// `PipelineOrchestrator` both implement this so `RecoveryController` stays
/// decoupled from what, specifically, it is retrying.
#[async_trait]
pub trait RecoveryTarget: Send + Sync {
    async fn retry(&self, file_id: &FileId, attempt: u32);
    async fn give_up(&self, file_id: &FileId, err: &IngestionError);
}

/// Runs `target`'s retry/give-up callback according to `action`, sleeping
/// for the backoff delay first when retrying.
pub async fn apply(target: &dyn RecoveryTarget, file_id: &FileId, err: &IngestionError, action: Action) {
    match action {
        Action::Retry { delay_ms, attempt } => {
            tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
            target.retry(file_id, attempt).await;
        }
        Action::Fail => target.give_up(file_id, err).await,
    }
}
