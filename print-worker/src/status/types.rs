//! Job, error and snapshot types shared with the dashboard.

use std::path::PathBuf;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// Where a print job came from; selects which print settings apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    #[serde(alias = "email")]
    Mailbox,
    Webhook,
}

/// Poller lifecycle state, shown to operators as a label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Stopped,
    Starting,
    Connecting,
    Connected,
    Scanning,
    Processing,
    Idle,
    Reconnecting,
    CleaningUp,
    WebhookOnly,
}

impl ServiceState {
    pub fn label(self) -> &'static str {
        match self {
            Self::Stopped => "Stopped",
            Self::Starting => "Starting...",
            Self::Connecting => "Connecting to mailbox...",
            Self::Connected => "Connected ✓",
            Self::Scanning => "Scanning inbox...",
            Self::Processing => "Processing messages...",
            Self::Idle => "Idle - Waiting for next check",
            Self::Reconnecting => "IMAP error - Reconnecting...",
            Self::CleaningUp => "Cleaning up old temp files...",
            Self::WebhookOnly => "Webhook only - Mailbox polling paused",
        }
    }
}

/// One completed or failed print attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrintJob {
    pub timestamp: DateTime<Local>,
    /// Subject or order label, truncated for display
    pub label: String,
    /// Outcome shown to the operator ("Auto-printed ✓", ...)
    pub outcome: String,
    /// Stored artifact backing the job
    pub artifact: Option<PathBuf>,
    pub origin: Origin,
    pub succeeded: bool,
    pub can_reprint: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub timestamp: DateTime<Local>,
    pub message: String,
}

/// Counters and recent history carried in every snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Stats {
    pub last_check: Option<DateTime<Local>>,
    pub next_check: Option<DateTime<Local>>,
    /// Candidates returned by the last mailbox search
    pub messages_found: usize,
    /// Successful prints since startup
    pub jobs_processed: u64,
    /// Candidates of the current cycle not yet handled
    pub jobs_pending: usize,
    pub last_cleanup: Option<DateTime<Local>>,
    pub next_cleanup: Option<DateTime<Local>>,
    /// Most recent first
    pub recent_jobs: Vec<PrintJob>,
    /// Most recent first
    pub errors: Vec<ErrorRecord>,
}

/// Full status pushed to observers on every change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub running: bool,
    pub status: String,
    pub stats: Stats,
}
