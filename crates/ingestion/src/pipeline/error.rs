use kernel::IngestionError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("no pipeline registered for file {0}")]
    UnknownPipeline(String),

    #[error("stage {stage} is not part of this pipeline")]
    UnknownStage { stage: String },

    #[error("stage handler failed: {0}")]
    HandlerFailed(String),
}

impl From<PipelineError> for IngestionError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::UnknownPipeline(id) => {
                IngestionError::NotFound(format!("no pipeline for file {id}"))
            }
            PipelineError::UnknownStage { stage } => {
                IngestionError::BadIndex(format!("unknown stage {stage}"))
            }
            PipelineError::HandlerFailed(msg) => IngestionError::Internal(msg),
        }
    }
}
