//! Process-wide job and error history with push notification.
//!
//! Both ingestion paths report here. Every mutation rebuilds the full
//! [`StatusSnapshot`] and broadcasts it, so the dashboard sees intermediate
//! states of a multi-second poll cycle without polling.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Local};
use tokio::sync::broadcast;
use tracing::{debug, error};

use crate::status::types::{ErrorRecord, Origin, PrintJob, ServiceState, Stats, StatusSnapshot};
use crate::util::truncate_chars;

pub const JOB_CAPACITY: usize = 10;
pub const ERROR_CAPACITY: usize = 5;
pub const MAX_LABEL_CHARS: usize = 50;
pub const MAX_ERROR_CHARS: usize = 100;

const CHANNEL_CAPACITY: usize = 64;

#[derive(Debug)]
struct LedgerState {
    running: bool,
    state: ServiceState,
    stats: Stats,
    jobs: VecDeque<PrintJob>,
    errors: VecDeque<ErrorRecord>,
}

impl LedgerState {
    fn snapshot(&self) -> StatusSnapshot {
        let mut stats = self.stats.clone();
        stats.recent_jobs = self.jobs.iter().cloned().collect();
        stats.errors = self.errors.iter().cloned().collect();

        StatusSnapshot {
            running: self.running,
            status: self.state.label().to_string(),
            stats,
        }
    }
}

/// Bounded, most-recent-first record of jobs and errors plus live status.
#[derive(Debug)]
pub struct JobLedger {
    state: Mutex<LedgerState>,
    sender: broadcast::Sender<StatusSnapshot>,
}

impl Default for JobLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl JobLedger {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            state: Mutex::new(LedgerState {
                running: false,
                state: ServiceState::Stopped,
                stats: Stats::default(),
                jobs: VecDeque::with_capacity(JOB_CAPACITY),
                errors: VecDeque::with_capacity(ERROR_CAPACITY),
            }),
            sender,
        }
    }

    /// Receive a snapshot after every status change.
    pub fn subscribe(&self) -> broadcast::Receiver<StatusSnapshot> {
        self.sender.subscribe()
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        self.lock().snapshot()
    }

    pub fn state(&self) -> ServiceState {
        self.lock().state
    }

    pub fn set_running(&self, running: bool) {
        self.update(|s| s.running = running);
    }

    pub fn set_state(&self, state: ServiceState) {
        debug!(status = state.label(), "status_changed");
        self.update(|s| s.state = state);
    }

    /// Insert a job at the front, dropping the oldest beyond capacity.
    pub fn record_job(
        &self,
        label: &str,
        outcome: &str,
        artifact: Option<PathBuf>,
        origin: Origin,
        succeeded: bool,
    ) {
        let job = PrintJob {
            timestamp: Local::now(),
            label: truncate_chars(label, MAX_LABEL_CHARS),
            outcome: outcome.to_string(),
            can_reprint: artifact.as_deref().map_or(false, Path::exists),
            artifact,
            origin,
            succeeded,
        };

        self.update(|s| {
            if succeeded {
                s.stats.jobs_processed += 1;
            }
            s.jobs.push_front(job);
            s.jobs.truncate(JOB_CAPACITY);
        });
    }

    /// Insert an error at the front, dropping the oldest beyond capacity.
    pub fn record_error(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        error!(error = %message, "job_error_recorded");

        let record = ErrorRecord {
            timestamp: Local::now(),
            message: truncate_chars(message, MAX_ERROR_CHARS),
        };
        self.update(|s| {
            s.errors.push_front(record);
            s.errors.truncate(ERROR_CAPACITY);
        });
    }

    /// Search results of the current cycle.
    pub fn scan_complete(&self, found: usize, pending: usize) {
        self.update(|s| {
            s.stats.messages_found = found;
            s.stats.jobs_pending = pending;
        });
    }

    /// One pending candidate has been handled.
    pub fn message_handled(&self) {
        self.update(|s| s.stats.jobs_pending = s.stats.jobs_pending.saturating_sub(1));
    }

    pub fn cycle_complete(&self, next_check: DateTime<Local>) {
        self.update(|s| {
            s.stats.jobs_pending = 0;
            s.stats.last_check = Some(Local::now());
            s.stats.next_check = Some(next_check);
        });
    }

    /// Bring the next check forward to now.
    pub fn check_requested(&self) {
        self.update(|s| s.stats.next_check = Some(Local::now()));
    }

    pub fn cleanup_complete(&self, next_cleanup: Option<DateTime<Local>>) {
        self.update(|s| {
            s.stats.last_cleanup = Some(Local::now());
            s.stats.next_cleanup = next_cleanup;
        });
    }

    /// Refresh `can_reprint` after artifacts were removed from disk.
    pub fn refresh_reprintable(&self) {
        self.update(|s| {
            for job in s.jobs.iter_mut() {
                job.can_reprint = job.artifact.as_deref().map_or(false, Path::exists);
            }
        });
    }

    /// Mark every job as no longer reprintable.
    pub fn mark_artifacts_evicted(&self) {
        self.update(|s| {
            for job in s.jobs.iter_mut() {
                job.can_reprint = false;
            }
        });
    }

    fn update(&self, mutate: impl FnOnce(&mut LedgerState)) {
        let snapshot = {
            let mut state = self.lock();
            mutate(&mut state);
            state.snapshot()
        };
        // No subscribers is fine.
        let _ = self.sender.send(snapshot);
    }

    fn lock(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
