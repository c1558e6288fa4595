//! Stage handlers. `Ocr`/`Stt`/`Embedding` are stubs standing in for the
//! actual model calls the spec's Non-goals explicitly exclude from this
//! core; they still report incremental progress so the weighted aggregate
//! behaves the way it would with a real backend. `Storage`/`Cleanup` are
//! real: move the assembled file into its final location and remove the
//! chunk scratch directory.

use super::ports::{StageContext, StageHandler};
use crate::chunk_store::ChunkStore;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// A stage that reports progress in a handful of discrete steps before
/// finishing, standing in for a real OCR/STT/embedding backend.
pub struct StubStageHandler {
    label: &'static str,
    steps: u32,
    step_delay: Duration,
}

impl StubStageHandler {
    pub fn new(label: &'static str, steps: u32, step_delay: Duration) -> Self {
        Self { label, steps, step_delay }
    }
}

#[async_trait]
impl StageHandler for StubStageHandler {
    async fn run(&self, ctx: &StageContext, on_progress: &(dyn Fn(f64) + Send + Sync)) -> Result<(), String> {
        debug!(stage = self.label, file_id = %ctx.file_id, "running stub stage handler");
        for step in 1..=self.steps.max(1) {
            tokio::time::sleep(self.step_delay).await;
            on_progress(step as f64 / self.steps.max(1) as f64);
        }
        Ok(())
    }
}

/// Moves the assembled file from the chunk store's scratch area into its
/// final resting place under `finalPath`.
pub struct StorageStageHandler {
    final_dir: std::path::PathBuf,
}

impl StorageStageHandler {
    pub fn new(final_dir: impl Into<std::path::PathBuf>) -> Self {
        Self { final_dir: final_dir.into() }
    }
}

#[async_trait]
impl StageHandler for StorageStageHandler {
    async fn run(&self, ctx: &StageContext, on_progress: &(dyn Fn(f64) + Send + Sync)) -> Result<(), String> {
        tokio::fs::create_dir_all(&self.final_dir).await.map_err(|e| e.to_string())?;
        let dest = self.final_dir.join(ctx.file_id.as_str());
        if ctx.file_path != dest {
            tokio::fs::copy(&ctx.file_path, &dest).await.map_err(|e| e.to_string())?;
        }
        on_progress(1.0);
        Ok(())
    }
}

/// Removes the chunk scratch directory now that the file has a durable
/// final copy.
pub struct CleanupStageHandler {
    chunk_store: Arc<dyn ChunkStore>,
}

impl CleanupStageHandler {
    pub fn new(chunk_store: Arc<dyn ChunkStore>) -> Self {
        Self { chunk_store }
    }
}

#[async_trait]
impl StageHandler for CleanupStageHandler {
    async fn run(&self, ctx: &StageContext, on_progress: &(dyn Fn(f64) + Send + Sync)) -> Result<(), String> {
        self.chunk_store.purge(ctx.file_id.as_str()).await;
        on_progress(1.0);
        Ok(())
    }
}
