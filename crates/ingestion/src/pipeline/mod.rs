pub mod adapter;
pub mod dto;
pub mod error;
pub mod ports;
pub mod service;

pub use adapter::{CleanupStageHandler, StorageStageHandler, StubStageHandler};
pub use dto::{Pipeline, PipelineStatus, PipelineTrigger, Stage, StageName, StageStatus};
pub use error::PipelineError;
pub use ports::{StageContext, StageHandler};
pub use service::PipelineOrchestrator;
