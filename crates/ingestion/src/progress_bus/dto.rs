//! Wire-shaped progress events and the session snapshot the bus retains for
//! late subscribers.

use kernel::FileId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use time::OffsetDateTime;

/// Tagged union of everything a subscriber can observe for a file, matching
/// the `type` discriminant the push channel puts on the wire (spec.md §6):
/// `upload_started`, `upload_progress`, `upload_completed`, `upload_error`,
/// plus the bus-internal `Retry` variant folded into `upload_error` at the
/// wire boundary and `Pong` handled purely at the sink layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ProgressEvent {
    #[serde(rename = "upload_started")]
    Started {
        file_id: FileId,
        principal_id: String,
        timestamp: OffsetDateTime,
        file_name: String,
        total_chunks: u64,
    },
    #[serde(rename = "upload_progress")]
    Progress {
        file_id: FileId,
        principal_id: String,
        timestamp: OffsetDateTime,
        progress: f64,
        received: u64,
        total: u64,
        stage: Option<String>,
    },
    #[serde(rename = "upload_completed")]
    Completed {
        file_id: FileId,
        principal_id: String,
        timestamp: OffsetDateTime,
        path: String,
        size: u64,
    },
    #[serde(rename = "upload_error")]
    Error {
        file_id: FileId,
        principal_id: String,
        timestamp: OffsetDateTime,
        message: String,
        retryable: bool,
        error_history: Vec<String>,
    },
    #[serde(rename = "retry")]
    Retry {
        file_id: FileId,
        principal_id: String,
        timestamp: OffsetDateTime,
        attempt: u32,
        delay_ms: u64,
    },
    #[serde(rename = "pong")]
    Pong { timestamp: OffsetDateTime },
}

impl ProgressEvent {
    /// `None` for `Pong`, which is not addressed to any particular principal
    /// — it is a direct reply to a sink-level `ping`.
    pub fn principal_id(&self) -> Option<&str> {
        match self {
            ProgressEvent::Started { principal_id, .. }
            | ProgressEvent::Progress { principal_id, .. }
            | ProgressEvent::Completed { principal_id, .. }
            | ProgressEvent::Error { principal_id, .. }
            | ProgressEvent::Retry { principal_id, .. } => Some(principal_id),
            ProgressEvent::Pong { .. } => None,
        }
    }

    pub fn file_id(&self) -> Option<&FileId> {
        match self {
            ProgressEvent::Started { file_id, .. }
            | ProgressEvent::Progress { file_id, .. }
            | ProgressEvent::Completed { file_id, .. }
            | ProgressEvent::Error { file_id, .. }
            | ProgressEvent::Retry { file_id, .. } => Some(file_id),
            ProgressEvent::Pong { .. } => None,
        }
    }

    /// Oldest non-terminal `Progress` events are the only ones allowed to be
    /// dropped from a full sink buffer (design notes, §9); `Completed`/`Error`
    /// must never be dropped.
    pub fn is_droppable(&self) -> bool {
        matches!(self, ProgressEvent::Progress { .. })
    }
}

/// The last-known status of a session, retained by the bus 30s past
/// terminal so a late subscriber (or a `GET /status`) observes the final
/// state instead of nothing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    pub file_id: FileId,
    pub principal_id: String,
    pub status: String,
    pub last_event: ProgressEvent,
    pub started_at: OffsetDateTime,
    pub terminal_at: Option<OffsetDateTime>,
}

/// Metadata passed to `startSession`, mirroring `UploadSession.metadata`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SessionMeta {
    pub file_name: String,
    pub total_chunks: u64,
    pub extra: HashMap<String, String>,
}
