pub mod chunk_store;
pub mod config;
pub mod digest;
pub mod pipeline;
pub mod progress_bus;
pub mod recovery;
pub mod upload_session;

pub use chunk_store::{ChunkStore, FilesystemChunkStore};
pub use config::IngestionConfig;
pub use pipeline::PipelineOrchestrator;
pub use progress_bus::{ProgressBus, ProgressEvent, ProgressSink};
pub use recovery::RecoveryController;
pub use upload_session::UploadSessionManager;
