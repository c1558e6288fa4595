//! In-memory event bus fanning progress events to subscribers filtered by
//! principal. Grounded directly on
//! `kernel::infrastructure::InMemoryEventBus`: a per-subscriber channel with
//! a forwarding task and a cancellation handle, generalized from per-*event
//! type* fan-out to per-*principal* fan-out, since delivery here must be
//! filtered by `principalId` rather than by Rust type.

use super::dto::{ProgressEvent, SessionInfo, SessionMeta};
use super::ports::{ProgressSink, Subscription};
use dashmap::DashMap;
use kernel::FileId;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Per-sink channel capacity. When full, the oldest non-terminal `Progress`
/// event is the only kind allowed to be dropped (design notes, §9).
const SINK_CHANNEL_CAPACITY: usize = 64;

/// How long a terminal session's last snapshot is retained for late
/// subscribers / `GET /status` callers.
const TERMINAL_RETENTION: time::Duration = time::Duration::seconds(30);

/// Absolute TTL after which a session snapshot is evicted regardless of
/// status.
const SESSION_TTL: time::Duration = time::Duration::hours(24);

const SWEEP_INTERVAL: std::time::Duration = std::time::Duration::from_secs(60);

struct SubscriberEntry {
    id: String,
    principal_id: String,
    tx: mpsc::Sender<ProgressEvent>,
    is_active: Arc<AtomicBool>,
    _forwarder: JoinHandle<()>,
}

impl Subscription for SubscriberEntry {
    fn id(&self) -> &str {
        &self.id
    }

    fn principal_id(&self) -> &str {
        &self.principal_id
    }

    fn cancel(&self) {
        self.is_active.store(false, Ordering::SeqCst);
    }

    fn is_active(&self) -> bool {
        self.is_active.load(Ordering::SeqCst)
    }
}

pub struct ProgressBus {
    subscribers: DashMap<String, Vec<Arc<SubscriberEntry>>>,
    sessions: Arc<DashMap<FileId, SessionInfo>>,
    sweep_cancel: std::sync::Mutex<Option<tokio::sync::oneshot::Sender<()>>>,
    _sweeper: JoinHandle<()>,
}

impl ProgressBus {
    pub fn new() -> Arc<Self> {
        let subscribers: DashMap<String, Vec<Arc<SubscriberEntry>>> = DashMap::new();
        let sessions: Arc<DashMap<FileId, SessionInfo>> = Arc::new(DashMap::new());
        let (cancel_tx, mut cancel_rx) = tokio::sync::oneshot::channel::<()>();

        let sweep_sessions = sessions.clone();
        let sweeper = tokio::spawn(async move {
            let mut interval = tokio::time::interval(SWEEP_INTERVAL);
            loop {
                tokio::select! {
                    biased;
                    _ = &mut cancel_rx => {
                        info!("progress bus sweeper cancelled");
                        break;
                    }
                    _ = interval.tick() => {
                        let now = OffsetDateTime::now_utc();
                        sweep_sessions.retain(|_, info| {
                            if now - info.started_at > SESSION_TTL {
                                return false;
                            }
                            match info.terminal_at {
                                Some(terminal_at) => now - terminal_at <= TERMINAL_RETENTION,
                                None => true,
                            }
                        });
                        debug!(remaining = sweep_sessions.len(), "progress bus sweep completed");
                    }
                }
            }
        });

        Arc::new(Self {
            subscribers,
            sessions,
            sweep_cancel: std::sync::Mutex::new(Some(cancel_tx)),
            _sweeper: sweeper,
        })
    }

    pub fn subscribe(
        self: &Arc<Self>,
        principal_id: impl Into<String>,
        sink: Arc<dyn ProgressSink>,
    ) -> Arc<dyn Subscription> {
        let principal_id = principal_id.into();
        let (tx, mut rx) = mpsc::channel::<ProgressEvent>(SINK_CHANNEL_CAPACITY);
        let is_active = Arc::new(AtomicBool::new(true));
        let is_active_clone = is_active.clone();
        let id = uuid::Uuid::new_v4().to_string();

        let forwarder = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if !is_active_clone.load(Ordering::SeqCst) {
                    break;
                }
                if !sink.send(&event).await {
                    is_active_clone.store(false, Ordering::SeqCst);
                    break;
                }
            }
        });

        let entry = Arc::new(SubscriberEntry {
            id: id.clone(),
            principal_id: principal_id.clone(),
            tx,
            is_active,
            _forwarder: forwarder,
        });

        self.subscribers.entry(principal_id.clone()).or_default().push(entry.clone());
        info!(principal_id = %principal_id, subscription_id = %id, "subscriber registered");

        entry as Arc<dyn Subscription>
    }

    /// Idempotent: cancelling twice, or a handle already dead, is a no-op.
    pub fn unsubscribe(&self, subscription: &dyn Subscription) {
        subscription.cancel();
        if let Some(mut entries) = self.subscribers.get_mut(subscription.principal_id()) {
            entries.retain(|e| e.is_active());
        }
    }

    /// Best-effort delivery: a dead sink is pruned and does not fail the
    /// publish. `Pong` is never published here — it is a direct sink-layer
    /// reply and carries no `principalId`.
    pub fn publish(&self, event: ProgressEvent) {
        let Some(principal_id) = event.principal_id().map(str::to_string) else {
            warn!("attempted to publish an event with no principal, dropping");
            return;
        };

        self.record_session(&event);

        let Some(mut entries) = self.subscribers.get_mut(&principal_id) else {
            return;
        };

        entries.retain(|entry| {
            if !entry.is_active() {
                return false;
            }
            match entry.tx.try_send(event.clone()) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) if event.is_droppable() => {
                    debug!(
                        subscription_id = %entry.id,
                        "sink buffer full, dropping non-terminal progress event"
                    );
                    true
                }
                Err(mpsc::error::TrySendError::Full(ev)) => {
                    // Completed/Error must never be dropped; block briefly.
                    let tx = entry.tx.clone();
                    let entry_id = entry.id.clone();
                    tokio::spawn(async move {
                        if tx.send(ev).await.is_err() {
                            warn!(subscription_id = %entry_id, "failed to deliver terminal event, sink gone");
                        }
                    });
                    true
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            }
        });
    }

    fn record_session(&self, event: &ProgressEvent) {
        let (Some(file_id), Some(principal_id)) = (event.file_id(), event.principal_id()) else {
            return;
        };

        let now = OffsetDateTime::now_utc();
        let is_terminal = matches!(event, ProgressEvent::Completed { .. } | ProgressEvent::Error { .. });
        let status = match event {
            ProgressEvent::Started { .. } => "receiving",
            ProgressEvent::Progress { .. } => "receiving",
            ProgressEvent::Completed { .. } => "completed",
            ProgressEvent::Error { .. } => "failed",
            ProgressEvent::Retry { .. } => "receiving",
            ProgressEvent::Pong { .. } => return,
        };

        self.sessions
            .entry(file_id.clone())
            .and_modify(|info| {
                info.status = status.to_string();
                info.last_event = event.clone();
                if is_terminal {
                    info.terminal_at = Some(now);
                }
            })
            .or_insert_with(|| SessionInfo {
                file_id: file_id.clone(),
                principal_id: principal_id.to_string(),
                status: status.to_string(),
                last_event: event.clone(),
                started_at: now,
                terminal_at: if is_terminal { Some(now) } else { None },
            });
    }

    pub fn session_status(&self, file_id: &FileId) -> Option<SessionInfo> {
        self.sessions.get(file_id).map(|r| r.clone())
    }

    pub fn start_session(&self, file_id: FileId, principal_id: impl Into<String>, meta: SessionMeta) {
        let principal_id = principal_id.into();
        let event = ProgressEvent::Started {
            file_id,
            principal_id,
            timestamp: OffsetDateTime::now_utc(),
            file_name: meta.file_name,
            total_chunks: meta.total_chunks,
        };
        self.publish(event);
    }

    pub fn update_progress(
        &self,
        file_id: FileId,
        principal_id: impl Into<String>,
        progress: f64,
        received: u64,
        total: u64,
        stage: Option<String>,
    ) {
        let event = ProgressEvent::Progress {
            file_id,
            principal_id: principal_id.into(),
            timestamp: OffsetDateTime::now_utc(),
            progress,
            received,
            total,
            stage,
        };
        self.publish(event);
    }

    pub fn complete_session(&self, file_id: FileId, principal_id: impl Into<String>, path: String, size: u64) {
        let event = ProgressEvent::Completed {
            file_id,
            principal_id: principal_id.into(),
            timestamp: OffsetDateTime::now_utc(),
            path,
            size,
        };
        self.publish(event);
    }

    pub fn error_session(
        &self,
        file_id: FileId,
        principal_id: impl Into<String>,
        message: String,
        retryable: bool,
        error_history: Vec<String>,
    ) {
        let event = ProgressEvent::Error {
            file_id,
            principal_id: principal_id.into(),
            timestamp: OffsetDateTime::now_utc(),
            message,
            retryable,
            error_history,
        };
        self.publish(event);
    }
}

impl Drop for ProgressBus {
    fn drop(&mut self) {
        if let Ok(mut guard) = self.sweep_cancel.lock() {
            if let Some(tx) = guard.take() {
                let _ = tx.send(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct CountingSink {
        count: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl ProgressSink for CountingSink {
        async fn send(&self, _event: &ProgressEvent) -> bool {
            self.count.fetch_add(1, Ordering::SeqCst);
            true
        }
    }

    struct DeadSink;

    #[async_trait::async_trait]
    impl ProgressSink for DeadSink {
        async fn send(&self, _event: &ProgressEvent) -> bool {
            false
        }
    }

    #[tokio::test]
    async fn fan_out_isolation_between_principals() {
        let bus = ProgressBus::new();
        let count_a = Arc::new(AtomicUsize::new(0));
        let count_b = Arc::new(AtomicUsize::new(0));

        let _sub_a = bus.subscribe("A", Arc::new(CountingSink { count: count_a.clone() }));
        let _sub_b = bus.subscribe("B", Arc::new(CountingSink { count: count_b.clone() }));

        bus.start_session(FileId::from("f3"), "A", SessionMeta::default());
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        assert_eq!(count_a.load(Ordering::SeqCst), 1);
        assert_eq!(count_b.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn dead_sink_is_pruned_without_failing_publish() {
        let bus = ProgressBus::new();
        let _sub = bus.subscribe("A", Arc::new(DeadSink));
        bus.start_session(FileId::from("f1"), "A", SessionMeta::default());
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        // Publishing again should not panic even though the sink died.
        bus.update_progress(FileId::from("f1"), "A", 0.5, 1, 2, None);
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn session_status_retained_after_terminal_event() {
        let bus = ProgressBus::new();
        bus.start_session(FileId::from("f5"), "A", SessionMeta::default());
        bus.complete_session(FileId::from("f5"), "A", "/tmp/out".to_string(), 10);

        let info = bus.session_status(&FileId::from("f5")).expect("session retained");
        assert_eq!(info.status, "completed");
    }

    #[tokio::test]
    async fn unsubscribe_is_idempotent() {
        let bus = ProgressBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let sub = bus.subscribe("A", Arc::new(CountingSink { count }));
        bus.unsubscribe(sub.as_ref());
        bus.unsubscribe(sub.as_ref());
        assert!(!sub.is_active());
    }
}
