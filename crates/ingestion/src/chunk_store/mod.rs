pub mod adapter;
pub mod dto;
pub mod error;
pub mod ports;

pub use adapter::FilesystemChunkStore;
pub use dto::AssembleResult;
pub use error::ChunkStoreError;
pub use ports::{ChunkResult, ChunkStore};
