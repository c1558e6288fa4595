use crate::pipeline::PipelineTrigger;
use kernel::FileId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use time::OffsetDateTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadSessionStatus {
    Receiving,
    Validating,
    Assembling,
    Completed,
    Failed,
    Cancelled,
}

impl UploadSessionStatus {
    /// `completed`, `cancelled`, or `failed` — no further transitions
    /// (spec.md §3). `init` on a terminal session's `fileId` resets it
    /// instead of returning `Conflict`.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UploadMetadata {
    pub tool_resource: Option<String>,
    pub content_type: Option<String>,
    pub agent_id: Option<String>,
}

impl UploadMetadata {
    pub fn trigger(&self) -> PipelineTrigger {
        PipelineTrigger { tool_resource: self.tool_resource.clone(), content_type: self.content_type.clone() }
    }
}

/// `fileId` is client-supplied (spec.md §6 `POST /init` body); `totalChunks`
/// is never taken from the client — the manager derives it from
/// `ceil(totalSize / chunkSize)` so a lying client cannot desynchronize the
/// two (spec.md §3 invariant).
#[derive(Debug, Clone, Deserialize)]
pub struct InitRequest {
    pub file_id: Option<String>,
    pub file_name: String,
    pub total_size: u64,
    pub checksum: Option<String>,
    #[serde(default)]
    pub metadata: UploadMetadata,
}

#[derive(Debug, Clone, Serialize)]
pub struct InitResult {
    pub file_id: FileId,
    pub chunk_size: u64,
    pub total_chunks: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct UploadChunkResult {
    pub received_chunks: u64,
    pub total_chunks: u64,
    pub progress: f64,
    pub already_received: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResumeResult {
    pub received_indices: Vec<u64>,
    pub missing_indices: Vec<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FinalizeResult {
    pub file_id: FileId,
    pub path: String,
    pub size: u64,
}

/// Session state tracked for the lifetime of one chunked upload. `received`
/// is a set rather than a counter so out-of-order and retried chunk uploads
/// are idempotent (spec.md §4.2 resume semantics).
#[derive(Debug, Clone)]
pub struct UploadSession {
    pub file_id: FileId,
    pub owner_id: String,
    pub file_name: String,
    pub total_size: u64,
    pub chunk_size: u64,
    pub total_chunks: u64,
    pub received: BTreeSet<u64>,
    /// Digest recorded only for chunks the client supplied a `chunkHash`
    /// for (spec.md §9 open question); used by `validate` to re-verify.
    pub chunk_digests: std::collections::HashMap<u64, String>,
    pub status: UploadSessionStatus,
    pub client_checksum: Option<String>,
    pub metadata: UploadMetadata,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
    pub error_history: Vec<String>,
    /// Set the moment `status` first becomes terminal; drives the sweeper's
    /// post-completion grace period (spec.md §3 lifecycle).
    pub terminal_at: Option<OffsetDateTime>,
}

impl UploadSession {
    pub fn progress(&self) -> f64 {
        if self.total_chunks == 0 {
            return 1.0;
        }
        self.received.len() as f64 / self.total_chunks as f64
    }

    pub fn is_complete(&self) -> bool {
        self.received.len() as u64 >= self.total_chunks
    }

    pub fn missing_indices(&self) -> Vec<u64> {
        (0..self.total_chunks).filter(|i| !self.received.contains(i)).collect()
    }
}
