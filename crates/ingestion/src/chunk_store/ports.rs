//! Trait shape lifted from `upload_artifact_chunks::ports::ChunkStorage`,
//! generalized to the filesystem contract spec.md §4.2/§6 calls for.

use super::dto::AssembleResult;
use super::error::ChunkStoreError;
use async_trait::async_trait;
use bytes::Bytes;
use std::path::PathBuf;

pub type ChunkResult<T> = Result<T, ChunkStoreError>;

#[async_trait]
pub trait ChunkStore: Send + Sync {
    /// Creates `<root>/temp/chunks/<ownerId>/<fileId>/`, idempotent.
    async fn prepare(&self, file_id: &str, owner_id: &str) -> ChunkResult<PathBuf>;

    /// Atomic replace: write to `chunk_<idx>.part`, fsync, rename.
    async fn write(&self, file_id: &str, index: u64, bytes: Bytes) -> ChunkResult<()>;

    async fn exists(&self, file_id: &str, index: u64) -> ChunkResult<bool>;

    async fn list(&self, file_id: &str) -> ChunkResult<Vec<u64>>;

    async fn read(&self, file_id: &str, index: u64) -> ChunkResult<Bytes>;

    /// Streams chunks in `order` to a new file, fsyncs, and verifies
    /// `size == expected_size`.
    async fn assemble(
        &self,
        file_id: &str,
        order: &[u64],
        out_path: &std::path::Path,
        expected_size: u64,
    ) -> ChunkResult<AssembleResult>;

    /// Removes all chunks and the directory. Must succeed even if partially
    /// populated; callers log failures but do not propagate them.
    async fn purge(&self, file_id: &str);
}
