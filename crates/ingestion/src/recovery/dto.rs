use time::OffsetDateTime;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Retry { delay_ms: u64, attempt: u32 },
    Fail,
}

/// Per-file retry bookkeeping. Cleared on success via
/// `RecoveryController::reset`, so a file that fails, retries, and then
/// succeeds starts from a clean slate if it ever fails again later.
#[derive(Debug, Clone)]
pub struct RetryRecord {
    pub attempts: u32,
    pub first_failure_at: OffsetDateTime,
    pub last_failure_at: OffsetDateTime,
}

impl RetryRecord {
    pub fn first(now: OffsetDateTime) -> Self {
        Self { attempts: 1, first_failure_at: now, last_failure_at: now }
    }
}
