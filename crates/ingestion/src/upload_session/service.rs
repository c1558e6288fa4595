//! Chunked upload session lifecycle: init, chunk upload, resume, validate,
//! assemble, cancel. Grounded on
//! `artifact::features::upload_artifact_chunks::use_case`, generalized from
//! a repository-backed, package-manager-specific flow to an in-memory
//! session table driving the shared `ChunkStore`/`ProgressBus`/
//! `PipelineOrchestrator` ports.

use super::dto::{
    FinalizeResult, InitRequest, InitResult, ResumeResult, UploadChunkResult, UploadMetadata, UploadSession,
    UploadSessionStatus,
};
use crate::chunk_store::ChunkStore;
use crate::config::IngestionConfig;
use crate::digest;
use crate::pipeline::{PipelineOrchestrator, PipelineTrigger, StageContext, StageName};
use crate::progress_bus::{ProgressBus, SessionMeta};
use crate::recovery::{Action, RecoveryController};
use bytes::Bytes;
use dashmap::DashMap;
use kernel::{FileId, IngestionError};
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Completed sessions stay queryable for this long past their terminal
/// transition before the sweeper evicts them (spec.md §3 lifecycle).
const COMPLETION_GRACE: time::Duration = time::Duration::seconds(30);

/// Absolute lifetime of a session regardless of status (spec.md §3/§5).
const SESSION_TTL: time::Duration = time::Duration::hours(24);

/// How often the background sweep runs (spec.md §5: "a sweeper runs every 1h").
const SWEEP_INTERVAL: std::time::Duration = std::time::Duration::from_secs(3600);

pub struct UploadSessionManager {
    sessions: Arc<DashMap<FileId, UploadSession>>,
    chunk_store: Arc<dyn ChunkStore>,
    progress_bus: Arc<ProgressBus>,
    pipeline: Arc<PipelineOrchestrator>,
    recovery: Arc<RecoveryController>,
    config: IngestionConfig,
    sweep_cancel: std::sync::Mutex<Option<tokio::sync::oneshot::Sender<()>>>,
    _sweeper: JoinHandle<()>,
}

impl UploadSessionManager {
    pub fn new(
        chunk_store: Arc<dyn ChunkStore>,
        progress_bus: Arc<ProgressBus>,
        pipeline: Arc<PipelineOrchestrator>,
        recovery: Arc<RecoveryController>,
        config: IngestionConfig,
    ) -> Self {
        Self::with_sweep_interval(chunk_store, progress_bus, pipeline, recovery, config, SWEEP_INTERVAL)
    }

    /// Same as `new`, but with an overridable sweep period so tests can
    /// observe an eviction without waiting an hour.
    fn with_sweep_interval(
        chunk_store: Arc<dyn ChunkStore>,
        progress_bus: Arc<ProgressBus>,
        pipeline: Arc<PipelineOrchestrator>,
        recovery: Arc<RecoveryController>,
        config: IngestionConfig,
        sweep_interval: std::time::Duration,
    ) -> Self {
        let sessions: Arc<DashMap<FileId, UploadSession>> = Arc::new(DashMap::new());
        let sweeper = spawn_sweeper(
            sessions.clone(),
            chunk_store.clone(),
            progress_bus.clone(),
            pipeline.clone(),
            config.chunk_timeout_ms,
            sweep_interval,
        );
        Self {
            sessions,
            chunk_store,
            progress_bus,
            pipeline,
            recovery,
            config,
            sweep_cancel: std::sync::Mutex::new(Some(sweeper.0)),
            _sweeper: sweeper.1,
        }
    }

    fn owned_session(&self, file_id: &FileId, owner_id: &str) -> Result<dashmap::mapref::one::RefMut<'_, FileId, UploadSession>, IngestionError> {
        let session = self
            .sessions
            .get_mut(file_id)
            .ok_or_else(|| IngestionError::NotFound(format!("no upload session for file {file_id}")))?;
        if session.owner_id != owner_id {
            return Err(IngestionError::Unauthorized(format!("file {file_id} does not belong to this principal")));
        }
        Ok(session)
    }

    pub async fn init(&self, owner_id: impl Into<String>, req: InitRequest) -> Result<InitResult, IngestionError> {
        let owner_id = owner_id.into();

        if req.total_size > self.config.max_file_size() {
            return Err(IngestionError::SizeExceeded(format!(
                "file size {} exceeds maximum {}",
                req.total_size,
                self.config.max_file_size()
            )));
        }

        // totalChunks = ceil(size / chunkSize); a zero-byte file has no
        // chunks at all and is eligible for immediate assembly (spec.md §8
        // boundary behavior).
        let total_chunks = if req.total_size == 0 {
            0
        } else {
            req.total_size.div_ceil(self.config.chunk_size)
        };

        let file_id: FileId = match req.file_id {
            Some(id) => id.into(),
            None => FileId::generate(),
        };

        // Reject if fileId already has a live session; reset (drop the old
        // session and chunk state) if that session is terminal (spec.md §4.3).
        if let Some(existing) = self.sessions.get(&file_id) {
            if !existing.status.is_terminal() {
                return Err(IngestionError::Conflict(format!(
                    "upload session for file {file_id} already exists and is still in progress"
                )));
            }
            drop(existing);
            self.chunk_store.purge(file_id.as_str()).await;
            self.pipeline.remove(&file_id);
            self.sessions.remove(&file_id);
        }

        self.chunk_store.prepare(file_id.as_str(), &owner_id).await.map_err(IngestionError::from)?;

        let now = OffsetDateTime::now_utc();
        let session = UploadSession {
            file_id: file_id.clone(),
            owner_id: owner_id.clone(),
            file_name: req.file_name.clone(),
            total_size: req.total_size,
            chunk_size: self.config.chunk_size,
            total_chunks,
            received: Default::default(),
            chunk_digests: Default::default(),
            status: UploadSessionStatus::Receiving,
            client_checksum: req.checksum,
            metadata: req.metadata.clone(),
            created_at: now,
            updated_at: now,
            error_history: Vec::new(),
            terminal_at: None,
        };
        self.sessions.insert(file_id.clone(), session);

        self.pipeline.init(file_id.clone(), owner_id.clone(), &req.metadata.trigger());
        self.pipeline.start_stage(&file_id, StageName::Upload).ok();

        self.progress_bus.start_session(
            file_id.clone(),
            owner_id.clone(),
            SessionMeta { file_name: req.file_name, total_chunks, extra: Default::default() },
        );

        info!(file_id = %file_id, owner_id = %owner_id, total_chunks, "upload session initialized");
        Ok(InitResult { file_id, chunk_size: self.config.chunk_size, total_chunks })
    }

    pub async fn upload_chunk(
        &self,
        file_id: &FileId,
        owner_id: &str,
        index: u64,
        bytes: Bytes,
        client_chunk_checksum: Option<String>,
    ) -> Result<UploadChunkResult, IngestionError> {
        {
            let session = self.owned_session(file_id, owner_id)?;
            if session.status != UploadSessionStatus::Receiving {
                return Err(IngestionError::Conflict(format!(
                    "session for file {file_id} is not accepting chunks (status is not receiving)"
                )));
            }
            if index >= session.total_chunks {
                return Err(IngestionError::BadIndex(format!(
                    "chunk index {index} out of range (total_chunks={})",
                    session.total_chunks
                )));
            }
            // Already-received chunks are idempotent no-ops (spec.md §4.3):
            // report success without re-writing or re-hashing.
            if session.received.contains(&index) {
                return Ok(UploadChunkResult {
                    received_chunks: session.received.len() as u64,
                    total_chunks: session.total_chunks,
                    progress: session.progress(),
                    already_received: true,
                });
            }
        }

        if let Some(expected) = &client_chunk_checksum {
            let computed = digest::compute_digest(self.config.digest_algorithm, bytes.clone()).await;
            if computed != *expected {
                return Err(IngestionError::ChecksumMismatch(format!(
                    "chunk {index} checksum mismatch: expected {expected}, computed {computed}"
                )));
            }
        }

        self.chunk_store.write(file_id.as_str(), index, bytes).await.map_err(IngestionError::from)?;

        let (received, total, progress, owner) = {
            let mut session = self.owned_session(file_id, owner_id)?;
            session.received.insert(index);
            if let Some(digest) = client_chunk_checksum {
                session.chunk_digests.insert(index, digest);
            }
            session.updated_at = OffsetDateTime::now_utc();
            (session.received.len() as u64, session.total_chunks, session.progress(), session.owner_id.clone())
        };

        // Drive the pipeline's `upload` stage progress silently: the session
        // `received/total` fraction below is the one `Progress` event this
        // chunk publishes (spec.md §2 scenario 1), so the stage doesn't also
        // publish its own differently-scaled (weighted) reading.
        self.pipeline.update_stage_progress_silent(file_id, StageName::Upload, progress).ok();
        self.progress_bus.update_progress(
            file_id.clone(),
            owner,
            progress,
            received,
            total,
            Some(StageName::Upload.as_str().to_string()),
        );

        Ok(UploadChunkResult { received_chunks: received, total_chunks: total, progress, already_received: false })
    }

    pub async fn resume(&self, file_id: &FileId, owner_id: &str) -> Result<ResumeResult, IngestionError> {
        let session = self.owned_session(file_id, owner_id)?;
        let received_indices: Vec<u64> = session.received.iter().copied().collect();
        let missing_indices = session.missing_indices();
        Ok(ResumeResult { received_indices, missing_indices })
    }

    /// Re-digests every stored chunk that was uploaded with a client-supplied
    /// `chunkHash` and compares it to the digest recorded at upload time;
    /// returns `false` on the first mismatch. Chunks uploaded without a
    /// client digest are reported valid unconditionally (spec.md §9 open
    /// question, preserved as-is rather than tightened).
    pub async fn validate(&self, file_id: &FileId, owner_id: &str) -> Result<bool, IngestionError> {
        self.require_complete(file_id, owner_id).await?;

        let digests = {
            let session = self.owned_session(file_id, owner_id)?;
            session.chunk_digests.clone()
        };

        for (index, expected) in digests {
            let bytes = self.chunk_store.read(file_id.as_str(), index).await.map_err(IngestionError::from)?;
            let computed = digest::compute_digest(self.config.digest_algorithm, bytes).await;
            if computed != expected {
                return Ok(false);
            }
        }

        let mut session = self.owned_session(file_id, owner_id)?;
        session.status = UploadSessionStatus::Validating;
        Ok(true)
    }

    /// Gate used internally by `assemble`: every chunk index must be present
    /// both in the session's `received` set and on disk.
    async fn require_complete(&self, file_id: &FileId, owner_id: &str) -> Result<(), IngestionError> {
        let (is_complete, total) = {
            let session = self.owned_session(file_id, owner_id)?;
            (session.is_complete(), session.total_chunks)
        };
        if !is_complete {
            return Err(IngestionError::Conflict(format!(
                "file {file_id} has not received all {total} chunks yet"
            )));
        }
        self.verify_chunks_on_disk(file_id, total).await
    }

    /// Cross-checks the chunk store's on-disk index set against `total`,
    /// the disk-is-source-of-truth half of `require_complete`/`assemble`.
    async fn verify_chunks_on_disk(&self, file_id: &FileId, total: u64) -> Result<(), IngestionError> {
        let on_disk_indices = self.chunk_store.list(file_id.as_str()).await.map_err(IngestionError::from)?;
        if on_disk_indices.len() as u64 != total {
            return Err(IngestionError::Conflict(format!(
                "file {file_id} chunk store has {} chunks, session expects {total}",
                on_disk_indices.len()
            )));
        }
        Ok(())
    }

    pub async fn assemble(
        &self,
        file_id: &FileId,
        owner_id: &str,
        final_path: Option<&str>,
    ) -> Result<FinalizeResult, IngestionError> {
        // The status check and the flip to `Assembling` happen under the
        // same `owned_session` guard (one dashmap shard lock), so of two
        // concurrent callers for the same fileId, exactly one observes
        // `Receiving` and wins; the other sees `Conflict` (spec.md §4.3).
        let (order, expected_size, client_checksum, owner, content_type) = {
            let mut session = self.owned_session(file_id, owner_id)?;
            if session.status != UploadSessionStatus::Receiving {
                return Err(IngestionError::Conflict(format!(
                    "file {file_id} is not in a state that can be assembled (status is not receiving)"
                )));
            }
            if !session.is_complete() {
                return Err(IngestionError::Conflict(format!(
                    "file {file_id} has not received all {} chunks yet",
                    session.total_chunks
                )));
            }
            session.status = UploadSessionStatus::Assembling;
            let order: Vec<u64> = (0..session.total_chunks).collect();
            (
                order,
                session.total_size,
                session.client_checksum.clone(),
                session.owner_id.clone(),
                session.metadata.content_type.clone(),
            )
        };

        if let Err(err) = self.verify_chunks_on_disk(file_id, order.len() as u64).await {
            // The chunk store disagrees with the session; let the client
            // resume instead of stranding the session in `Assembling`.
            if let Some(mut session) = self.sessions.get_mut(file_id) {
                session.status = UploadSessionStatus::Receiving;
            }
            return Err(err);
        }

        self.pipeline.complete_stage(file_id, StageName::Upload).ok();
        self.pipeline.start_stage(file_id, StageName::Validation).ok();
        self.pipeline.complete_stage(file_id, StageName::Validation).ok();
        self.pipeline.start_stage(file_id, StageName::Processing).ok();

        let out_path = self.resolve_final_path(file_id, final_path)?;
        let assembled = self
            .chunk_store
            .assemble(file_id.as_str(), &order, &out_path, expected_size)
            .await
            .map_err(IngestionError::from)?;

        if let Some(expected) = client_checksum {
            let bytes = Bytes::from(tokio::fs::read(&assembled.path).await.map_err(IngestionError::from)?);
            let computed = digest::compute_digest(self.config.digest_algorithm, bytes).await;
            if computed != expected {
                self.error_session(file_id, &owner, "assembled file checksum mismatch".to_string(), false).await;
                return Err(IngestionError::ChecksumMismatch(format!(
                    "expected {expected}, computed {computed}"
                )));
            }
        }

        self.pipeline.complete_stage(file_id, StageName::Processing).ok();

        let ctx = StageContext { file_id: file_id.clone(), file_path: assembled.path.clone(), content_type };
        if !self.run_handler_stages_with_retry(file_id, &owner, ctx).await {
            return Err(IngestionError::Internal(format!(
                "post-assembly pipeline for file {file_id} failed permanently"
            )));
        }

        {
            let mut session = self.owned_session(file_id, owner_id)?;
            session.status = UploadSessionStatus::Completed;
            session.terminal_at = Some(OffsetDateTime::now_utc());
        }

        let path_str = assembled.path.to_string_lossy().to_string();
        self.progress_bus.complete_session(file_id.clone(), owner, path_str.clone(), assembled.size);

        info!(file_id = %file_id, size = assembled.size, "upload assembled and processed");
        Ok(FinalizeResult { file_id: file_id.clone(), path: path_str, size: assembled.size })
    }

    /// Drives the post-assembly handler stages, routing a handler failure
    /// through `RecoveryController` (spec.md §4.5): a retryable tag sleeps
    /// for the backoff delay and re-runs the remaining (non-`Completed`)
    /// stages; a terminal tag or an exhausted retry budget fails the
    /// session. Returns whether the pipeline ultimately succeeded.
    async fn run_handler_stages_with_retry(&self, file_id: &FileId, owner: &str, ctx: StageContext) -> bool {
        loop {
            match self.pipeline.run_handler_stages(file_id, ctx.clone()).await {
                Ok(()) => {
                    self.recovery.reset(file_id);
                    return true;
                }
                Err(crate::pipeline::PipelineError::HandlerFailed(stage)) => {
                    let message = self
                        .pipeline
                        .status(file_id)
                        .and_then(|p| p.errors.last().cloned())
                        .unwrap_or_else(|| format!("stage {stage} failed"));

                    match self.recovery.handle_message(file_id, &message) {
                        Action::Retry { delay_ms, attempt } => {
                            info!(file_id = %file_id, stage, attempt, delay_ms, "retrying failed pipeline stage");
                            tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
                            continue;
                        }
                        Action::Fail => {
                            if let Some(name) = StageName::parse(&stage) {
                                self.pipeline.handle_stage_error(file_id, name, message.clone(), false).ok();
                            }
                            self.error_session(file_id, owner, message, false).await;
                            self.recovery.reset(file_id);
                            return false;
                        }
                    }
                }
                Err(e) => {
                    warn!(file_id = %file_id, error = %e, "pipeline orchestration error, not retried");
                    self.error_session(file_id, owner, e.to_string(), false).await;
                    self.recovery.reset(file_id);
                    return false;
                }
            }
        }
    }

    /// Confines a client-supplied `finalPath` under `<uploads_path>/assembled`
    /// (spec.md §9 open question: the source takes `finalPath` unconstrained;
    /// here it is resolved relative to the assembled-files root and rejected
    /// if any component would escape it). Falls back to `fileId` when the
    /// client omits `finalPath`.
    fn resolve_final_path(&self, file_id: &FileId, final_path: Option<&str>) -> Result<std::path::PathBuf, IngestionError> {
        let base = std::path::PathBuf::from(&self.config.uploads_path).join("assembled");
        let relative = match final_path {
            None => return Ok(base.join(file_id.as_str())),
            Some(p) => p.trim_start_matches('/'),
        };

        let mut resolved = base.clone();
        for component in relative.split('/') {
            if component.is_empty() || component == "." || component == ".." {
                return Err(IngestionError::BadIndex(format!(
                    "finalPath {relative:?} is not a valid relative path"
                )));
            }
            resolved.push(component);
        }
        Ok(resolved)
    }

    pub async fn cancel(&self, file_id: &FileId, owner_id: &str) -> Result<(), IngestionError> {
        {
            let mut session = self.owned_session(file_id, owner_id)?;
            session.status = UploadSessionStatus::Cancelled;
        }
        self.chunk_store.purge(file_id.as_str()).await;
        self.pipeline.remove(file_id);
        self.error_session(file_id, owner_id, "upload cancelled by client".to_string(), false).await;
        self.sessions.remove(file_id);
        Ok(())
    }

    pub async fn error_session(&self, file_id: &FileId, owner_id: &str, message: String, retryable: bool) {
        let history = {
            if let Some(mut session) = self.sessions.get_mut(file_id) {
                session.error_history.push(message.clone());
                if !retryable {
                    session.status = UploadSessionStatus::Failed;
                    session.terminal_at.get_or_insert_with(OffsetDateTime::now_utc);
                }
                session.error_history.clone()
            } else {
                vec![message.clone()]
            }
        };
        self.progress_bus.error_session(file_id.clone(), owner_id.to_string(), message, retryable, history);
    }

    pub fn metadata(&self, file_id: &FileId) -> Option<UploadMetadata> {
        self.sessions.get(file_id).map(|s| s.metadata.clone())
    }
}

impl Drop for UploadSessionManager {
    fn drop(&mut self) {
        if let Ok(mut guard) = self.sweep_cancel.lock() {
            if let Some(tx) = guard.take() {
                let _ = tx.send(());
            }
        }
    }
}

/// Background sweep enforcing spec.md §5's two timeouts: a session stuck in
/// `receiving` past `chunk_timeout_ms` of inactivity fails with `Timeout`,
/// and any session (of any status) past the 24h absolute TTL, or a
/// `Completed` session past its 30s post-terminal grace period, is evicted
/// from the table. Runs hourly, same cancellable-task-plus-oneshot shape as
/// `ProgressBus`'s own sweeper.
fn spawn_sweeper(
    sessions: Arc<DashMap<FileId, UploadSession>>,
    chunk_store: Arc<dyn ChunkStore>,
    progress_bus: Arc<ProgressBus>,
    pipeline: Arc<PipelineOrchestrator>,
    chunk_timeout_ms: u64,
    sweep_interval: std::time::Duration,
) -> (tokio::sync::oneshot::Sender<()>, JoinHandle<()>) {
    let (cancel_tx, mut cancel_rx) = tokio::sync::oneshot::channel::<()>();
    let chunk_timeout = time::Duration::milliseconds(chunk_timeout_ms as i64);

    let handle = tokio::spawn(async move {
        let mut interval = tokio::time::interval(sweep_interval);
        loop {
            tokio::select! {
                biased;
                _ = &mut cancel_rx => {
                    info!("upload session sweeper cancelled");
                    break;
                }
                _ = interval.tick() => {
                    let now = OffsetDateTime::now_utc();
                    let mut timed_out = Vec::new();
                    let mut evicted = Vec::new();

                    for mut entry in sessions.iter_mut() {
                        let session = entry.value_mut();
                        if session.status == UploadSessionStatus::Receiving
                            && now - session.updated_at > chunk_timeout
                        {
                            session.status = UploadSessionStatus::Failed;
                            session.terminal_at = Some(now);
                            session.error_history.push("chunk inactivity timeout".to_string());
                            timed_out.push((session.file_id.clone(), session.owner_id.clone()));
                            continue;
                        }

                        let past_ttl = now - session.created_at > SESSION_TTL;
                        let past_grace = session.status == UploadSessionStatus::Completed
                            && session.terminal_at.is_some_and(|t| now - t > COMPLETION_GRACE);
                        if past_ttl || past_grace {
                            evicted.push(session.file_id.clone());
                        }
                    }

                    for (file_id, owner_id) in &timed_out {
                        warn!(file_id = %file_id, "session timed out from chunk inactivity");
                        progress_bus.error_session(
                            file_id.clone(),
                            owner_id.clone(),
                            "chunk inactivity timeout".to_string(),
                            false,
                            vec!["chunk inactivity timeout".to_string()],
                        );
                    }
                    evicted.extend(timed_out.into_iter().map(|(id, _)| id));

                    for file_id in evicted {
                        chunk_store.purge(file_id.as_str()).await;
                        pipeline.remove(&file_id);
                        sessions.remove(&file_id);
                    }
                    debug!(remaining = sessions.len(), "upload session sweep completed");
                }
            }
        }
    });

    (cancel_tx, handle)
}
