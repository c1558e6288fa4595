pub mod dto;
pub mod service;

pub use dto::{
    FinalizeResult, InitRequest, InitResult, ResumeResult, UploadChunkResult, UploadMetadata, UploadSession,
    UploadSessionStatus,
};
pub use service::UploadSessionManager;
