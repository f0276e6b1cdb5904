pub mod backup;
pub mod monitor;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use sea_orm::DbErr;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The two job families the scheduler dispatches. Execution slots key on
/// (device, kind), so one backup and one poll may run against the same
/// device at the same time, but never two of either.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Backup,
    Poll,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Backup => "backup",
            JobKind::Poll => "poll",
        }
    }

    pub fn parse(raw: &str) -> Option<JobKind> {
        match raw {
            "backup" => Some(JobKind::Backup),
            "poll" => Some(JobKind::Poll),
            _ => None,
        }
    }
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cooperative cancellation: workers check the flag between network
/// operations and bail out with `JobError::Cancelled`. Session timeouts
/// bound how long a single blocking call can outlive the flag flip.
#[derive(Clone, Debug, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        CancelFlag(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Failure taxonomy for worker runs. Validation problems never reach a
/// worker; they are rejected by the registry before any network activity.
#[derive(Debug, Error)]
pub enum JobError {
    /// Credentials rejected by the device. Not retried: bad credentials
    /// do not fix themselves.
    #[error("authentication rejected: {0}")]
    AuthFailure(String),
    /// Connect or timeout failure after the bounded retry budget.
    #[error("device unreachable: {0}")]
    Unreachable(String),
    /// Persistence failed. Fatal to this run only; the slot is released
    /// so future scheduled runs can still attempt.
    #[error("storage error: {0}")]
    Storage(#[from] DbErr),
    #[error("job cancelled")]
    Cancelled,
}

/// Result of a completed backup capture.
#[derive(Clone, Debug)]
pub enum BackupOutcome {
    /// A new configuration version was appended.
    Success { version_id: i32, bytes: usize },
    /// The capture matched the latest stored version byte for byte; the
    /// store was left untouched.
    SuccessNoChange { version_id: i32 },
}
