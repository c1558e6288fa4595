use kernel::IngestionError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChunkStoreError {
    #[error("invalid path component: {0}")]
    InvalidPath(String),

    #[error("chunk not found: file {file_id} index {index}")]
    ChunkNotFound { file_id: String, index: u64 },

    #[error("no prepared directory for file {0} (call prepare first)")]
    UnknownSession(String),

    #[error("assembled size mismatch: expected {expected}, got {actual}")]
    SizeMismatch { expected: u64, actual: u64 },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ChunkStoreError> for IngestionError {
    fn from(err: ChunkStoreError) -> Self {
        match err {
            ChunkStoreError::InvalidPath(msg) => IngestionError::BadIndex(msg),
            ChunkStoreError::ChunkNotFound { file_id, index } => {
                IngestionError::NotFound(format!("chunk {index} for file {file_id} not found"))
            }
            ChunkStoreError::UnknownSession(file_id) => {
                IngestionError::NotFound(format!("no chunk directory for file {file_id}"))
            }
            ChunkStoreError::SizeMismatch { expected, actual } => {
                IngestionError::SizeMismatch(format!("expected {expected} bytes, got {actual}"))
            }
            ChunkStoreError::Io(e) => IngestionError::IOError(e.to_string()),
        }
    }
}
