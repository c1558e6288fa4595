//! Exponential-backoff retry classification. Grounded on the teacher's
//! `upload_artifact` error-to-recovery mapping (manual `match` from error
//! enum to an HTTP/retry outcome), generalized into a standalone component
//! so both the upload session and the pipeline orchestrator can route their
//! recoverable failures through one policy.

use super::dto::{Action, RetryRecord};
use dashmap::{DashMap, mapref::entry::Entry};
use kernel::{FileId, IngestionError};
use rand::Rng;
use time::OffsetDateTime;
use tracing::{info, warn};

/// Classification tag assigned to a raw error message (spec.md §4.5's
/// table). Case-insensitive substring match, first row wins, top to bottom.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorTag {
    Network,
    Size,
    Format,
    Permission,
    Storage,
    Auth,
    Unknown,
}

impl ErrorTag {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorTag::Network => "network",
            ErrorTag::Size => "size",
            ErrorTag::Format => "format",
            ErrorTag::Permission => "permission",
            ErrorTag::Storage => "storage",
            ErrorTag::Auth => "auth",
            ErrorTag::Unknown => "unknown",
        }
    }

    /// Whether the spec's classification table marks this tag retryable.
    pub fn retryable(self) -> bool {
        !matches!(self, ErrorTag::Format | ErrorTag::Permission | ErrorTag::Auth)
    }
}

/// Case-insensitive substring classification, exactly the table in spec.md
/// §4.5. `format`/`permission`/`auth` are checked before `network`/`size`/
/// `storage` would otherwise be tempted to claim overlapping words (e.g. an
/// "unsupported format" message also containing no network/storage terms),
/// and the table is scanned top-to-bottom with the first match winning.
pub fn classify(message: &str) -> (ErrorTag, bool) {
    let lower = message.to_lowercase();
    const TABLE: &[(&[&str], ErrorTag)] = &[
        (&["network", "timeout", "connection"], ErrorTag::Network),
        (&["size", "limit"], ErrorTag::Size),
        (&["format", "type", "unsupported"], ErrorTag::Format),
        (&["permission", "access"], ErrorTag::Permission),
        (&["storage", "disk", "io"], ErrorTag::Storage),
        (&["authentication", "auth"], ErrorTag::Auth),
    ];
    for (needles, tag) in TABLE {
        if needles.iter().any(|n| lower.contains(n)) {
            return (*tag, tag.retryable());
        }
    }
    (ErrorTag::Unknown, ErrorTag::Unknown.retryable())
}

pub struct RecoveryController {
    base_delay_ms: u64,
    max_delay_ms: u64,
    max_attempts: u32,
    records: DashMap<FileId, RetryRecord>,
}

impl RecoveryController {
    pub fn new(base_delay_ms: u64, max_delay_ms: u64, max_attempts: u32) -> Self {
        Self { base_delay_ms, max_delay_ms, max_attempts, records: DashMap::new() }
    }

    /// Classifies `err` and decides whether the caller should retry. Errors
    /// outside `IngestionError::is_recoverable_candidate` (bad input,
    /// checksum mismatch, unauthorized, not-found, ...) fail immediately —
    /// retrying them cannot change the outcome. `IngestionError`'s own
    /// variants already pin down retryability precisely, so `classify` is
    /// consulted here only for its tag (logging/diagnostics); raw
    /// string-sourced errors (e.g. a stage handler's failure message) go
    /// through `handle_message` instead, which relies on `classify` for the
    /// retryable decision itself.
    pub fn handle(&self, file_id: &FileId, err: &IngestionError) -> Action {
        if !err.is_recoverable_candidate() {
            warn!(file_id = %file_id, kind = err.kind(), "non-recoverable error, failing immediately");
            return Action::Fail;
        }
        let (tag, _) = classify(&err.to_string());
        self.record_and_decide(file_id, tag)
    }

    /// Same retry bookkeeping as `handle`, but for callers that only have a
    /// raw error message (no `IngestionError` variant) — e.g. a
    /// `StageHandler::run` failure. Retryability comes entirely from
    /// `classify`'s table.
    pub fn handle_message(&self, file_id: &FileId, message: &str) -> Action {
        let (tag, retryable) = classify(message);
        if !retryable {
            warn!(file_id = %file_id, tag = tag.as_str(), "non-recoverable error, failing immediately");
            return Action::Fail;
        }
        self.record_and_decide(file_id, tag)
    }

    fn record_and_decide(&self, file_id: &FileId, tag: ErrorTag) -> Action {
        let now = OffsetDateTime::now_utc();
        let attempt = match self.records.entry(file_id.clone()) {
            Entry::Vacant(slot) => {
                slot.insert(RetryRecord::first(now));
                1
            }
            Entry::Occupied(mut slot) => {
                let record = slot.get_mut();
                record.attempts += 1;
                record.last_failure_at = now;
                record.attempts
            }
        };

        if attempt > self.max_attempts {
            warn!(file_id = %file_id, attempt, max = self.max_attempts, "retry budget exhausted, failing");
            self.records.remove(file_id);
            return Action::Fail;
        }

        let delay_ms = self.backoff_delay(attempt);
        info!(file_id = %file_id, attempt, delay_ms, tag = tag.as_str(), "scheduling retry");
        Action::Retry { delay_ms, attempt }
    }

    /// `delay = min(base * 2^(attempt-1), max)`, plus up to 10% jitter so
    /// concurrent retries for many files don't thunder in lockstep.
    fn backoff_delay(&self, attempt: u32) -> u64 {
        let exp = attempt.saturating_sub(1).min(20);
        let raw = self.base_delay_ms.saturating_mul(1u64 << exp);
        let capped = raw.min(self.max_delay_ms);
        let jitter_ceiling = capped / 10;
        let jitter = if jitter_ceiling > 0 { rand::thread_rng().gen_range(0..=jitter_ceiling) } else { 0 };
        capped.saturating_add(jitter)
    }

    pub fn reset(&self, file_id: &FileId) {
        self.records.remove(file_id);
    }

    pub fn attempts(&self, file_id: &FileId) -> u32 {
        self.records.get(file_id).map(|r| r.attempts).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_matches_the_spec_table() {
        assert_eq!(classify("connection timeout while uploading").0, ErrorTag::Network);
        assert_eq!(classify("file exceeds size limit").0, ErrorTag::Size);
        assert_eq!(classify("unsupported format").0, ErrorTag::Format);
        assert_eq!(classify("permission denied").0, ErrorTag::Permission);
        assert_eq!(classify("disk io error").0, ErrorTag::Storage);
        assert_eq!(classify("authentication failed").0, ErrorTag::Auth);
        assert_eq!(classify("something weird happened").0, ErrorTag::Unknown);
    }

    #[test]
    fn classify_retryability_matches_the_spec_table() {
        assert!(classify("network blip").1);
        assert!(classify("over the size limit").1);
        assert!(!classify("unsupported format").1);
        assert!(!classify("permission denied").1);
        assert!(classify("disk full").1);
        assert!(!classify("auth token expired").1);
        assert!(classify("mystery failure").1);
    }

    #[test]
    fn handle_message_retries_retryable_tags_and_fails_others() {
        let ctl = RecoveryController::new(1000, 30_000, 3);
        let retryable = ctl.handle_message(&FileId::from("f1"), "storage disk is full");
        assert!(matches!(retryable, Action::Retry { attempt: 1, .. }));

        let terminal = ctl.handle_message(&FileId::from("f2"), "permission denied by owner");
        assert_eq!(terminal, Action::Fail);
    }

    #[test]
    fn non_recoverable_error_fails_without_retry_record() {
        let ctl = RecoveryController::new(1000, 30_000, 3);
        let file_id = FileId::from("f1");
        let action = ctl.handle(&file_id, &IngestionError::ChecksumMismatch("bad".to_string()));
        assert_eq!(action, Action::Fail);
        assert_eq!(ctl.attempts(&file_id), 0);
    }

    #[test]
    fn recoverable_error_retries_until_budget_exhausted() {
        let ctl = RecoveryController::new(1000, 30_000, 2);
        let file_id = FileId::from("f1");

        let first = ctl.handle(&file_id, &IngestionError::IOError("disk busy".to_string()));
        assert!(matches!(first, Action::Retry { attempt: 1, .. }));

        let second = ctl.handle(&file_id, &IngestionError::IOError("disk busy".to_string()));
        assert!(matches!(second, Action::Retry { attempt: 2, .. }));

        let third = ctl.handle(&file_id, &IngestionError::IOError("disk busy".to_string()));
        assert_eq!(third, Action::Fail);
    }

    #[test]
    fn backoff_delay_is_monotonic_and_capped() {
        let ctl = RecoveryController::new(1000, 5_000, 10);
        let d1 = ctl.backoff_delay(1);
        let d2 = ctl.backoff_delay(2);
        let d3 = ctl.backoff_delay(10);
        assert!(d1 <= d2 || d2 <= 1_200);
        assert!(d3 <= 6_000);
    }

    #[test]
    fn reset_clears_retry_history() {
        let ctl = RecoveryController::new(1000, 30_000, 3);
        let file_id = FileId::from("f1");
        ctl.handle(&file_id, &IngestionError::Timeout);
        assert_eq!(ctl.attempts(&file_id), 1);
        ctl.reset(&file_id);
        assert_eq!(ctl.attempts(&file_id), 0);
    }
}
