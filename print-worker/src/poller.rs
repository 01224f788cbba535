//! Mailbox polling loop.
//!
//! Each cycle reconnects, searches for messages whose subject contains the
//! configured filter, and handles every candidate not yet in the dedup
//! ledger strictly in order. IMAP calls block, so a whole cycle runs on one
//! blocking worker; the loop itself lives on the async runtime and sleeps
//! between cycles until the interval passes, a manual check is requested or
//! the service stops.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::mail::{normalize_message, MailboxError, MailboxSession, MailboxSettings};
use crate::pipeline::{local_after, print_settings, PrintPipeline};
use crate::status::{Origin, ServiceState};

/// Delay before reconnecting after a mailbox error.
pub const RECONNECT_BACKOFF: Duration = Duration::from_secs(10);

/// Sleep between checks of the operation mode while the poller is idled.
pub const WEBHOOK_ONLY_IDLE: Duration = Duration::from_secs(5);

#[derive(Error, Debug)]
pub enum PollError {
    #[error(transparent)]
    Mailbox(#[from] MailboxError),

    #[error("poll cycle worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

/// Running flag plus wake-up signal shared by the poller and its owner.
#[derive(Debug, Default)]
pub struct PollerSignal {
    running: AtomicBool,
    wake: Notify,
}

impl PollerSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Set the running flag; returns the previous value.
    pub fn set_running(&self, running: bool) -> bool {
        self.running.swap(running, Ordering::SeqCst)
    }

    /// Cut the current sleep short. A wake sent while a cycle is running is
    /// kept and ends the next sleep immediately.
    pub fn wake(&self) {
        self.wake.notify_one();
    }

    /// Sleep for `duration` unless woken first.
    pub async fn sleep(&self, duration: Duration) {
        if !self.is_running() {
            return;
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = self.wake.notified() => debug!("poller_woken"),
        }
    }
}

/// How a single candidate message was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOutcome {
    Printed,
    /// Print attempted and failed; still ledgered
    PrintFailed,
    /// Subject no longer matches the filter; ledgered without printing
    Skipped,
    /// Unparseable message; ledgered without printing
    Rejected,
    /// Left out of the ledger for a retry next cycle
    FetchFailed,
    StoreFailed,
}

/// Summary of one poll cycle.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub found: usize,
    pub pending: usize,
    pub outcomes: Vec<(String, MessageOutcome)>,
}

impl CycleReport {
    pub fn count(&self, outcome: MessageOutcome) -> usize {
        self.outcomes.iter().filter(|(_, o)| *o == outcome).count()
    }
}

pub struct MailboxPoller {
    pipeline: Arc<PrintPipeline>,
    signal: Arc<PollerSignal>,
}

impl MailboxPoller {
    pub fn new(pipeline: Arc<PrintPipeline>, signal: Arc<PollerSignal>) -> Self {
        Self { pipeline, signal }
    }

    /// Poll until the running flag is cleared.
    pub async fn run(self) {
        info!("poller_started");

        while self.signal.is_running() {
            let config = self.pipeline.config();
            let jobs = self.pipeline.jobs();

            let pipeline = Arc::clone(&self.pipeline);
            let cleanup_config = config.clone();
            match tokio::task::spawn_blocking(move || pipeline.cleanup_if_due(&cleanup_config)).await {
                Ok(Some(removed)) => info!(removed = removed, "poller_cleanup_complete"),
                Ok(None) => {}
                Err(e) => error!(error = %e, "poller_cleanup_failed"),
            }

            if !config.operation_mode.polls_mailbox() {
                jobs.set_state(ServiceState::WebhookOnly);
                self.signal.sleep(WEBHOOK_ONLY_IDLE).await;
                continue;
            }

            match self.run_cycle(config.clone()).await {
                Ok(report) => {
                    let interval = Duration::from_secs(config.poll_interval_seconds);
                    if let Some(next) = local_after(interval) {
                        jobs.cycle_complete(next);
                    }
                    jobs.set_state(ServiceState::Idle);

                    info!(
                        found = report.found,
                        pending = report.pending,
                        printed = report.count(MessageOutcome::Printed),
                        print_failed = report.count(MessageOutcome::PrintFailed),
                        fetch_failed = report.count(MessageOutcome::FetchFailed),
                        "poller_cycle_complete"
                    );

                    self.signal.sleep(interval).await;
                }
                Err(e) => {
                    jobs.record_error(format!("IMAP error: {}", e));
                    jobs.set_state(ServiceState::Reconnecting);
                    self.signal.sleep(RECONNECT_BACKOFF).await;
                }
            }
        }

        self.pipeline.jobs().set_state(ServiceState::Stopped);
        info!("poller_stopped");
    }

    /// Run one connect-search-process cycle on a blocking worker.
    pub async fn run_cycle(&self, config: Config) -> Result<CycleReport, PollError> {
        let pipeline = Arc::clone(&self.pipeline);
        let signal = Arc::clone(&self.signal);

        let report =
            tokio::task::spawn_blocking(move || poll_once(&pipeline, &config, &signal)).await??;
        Ok(report)
    }
}

/// Connect, search and handle every new candidate. Blocking.
pub fn poll_once(
    pipeline: &PrintPipeline,
    config: &Config,
    signal: &PollerSignal,
) -> Result<CycleReport, MailboxError> {
    let jobs = pipeline.jobs();

    info!(
        mailbox = %config.mailbox,
        subject_prefix = %config.subject_prefix,
        "poller_cycle_start"
    );

    jobs.set_state(ServiceState::Connecting);
    let mut session = pipeline.connector().connect(&MailboxSettings::from(config))?;
    jobs.set_state(ServiceState::Connected);

    let result = process_mailbox(pipeline, config, signal, session.as_mut());

    if let Err(e) = session.logout() {
        warn!(error = %e, "imap_logout_failed");
    }

    result
}

fn process_mailbox(
    pipeline: &PrintPipeline,
    config: &Config,
    signal: &PollerSignal,
    session: &mut dyn MailboxSession,
) -> Result<CycleReport, MailboxError> {
    let jobs = pipeline.jobs();

    jobs.set_state(ServiceState::Scanning);
    let found = session.search_subject(&config.subject_prefix)?;
    let pending: Vec<String> = found
        .iter()
        .filter(|id| !pipeline.dedup().contains(id))
        .cloned()
        .collect();

    jobs.scan_complete(found.len(), pending.len());
    if !pending.is_empty() {
        info!(found = found.len(), pending = pending.len(), "poller_new_messages");
    }

    jobs.set_state(ServiceState::Processing);

    let mut report = CycleReport {
        found: found.len(),
        pending: pending.len(),
        outcomes: Vec::with_capacity(pending.len()),
    };

    for id in pending {
        if !signal.is_running() {
            info!("poller_cycle_interrupted");
            break;
        }
        let outcome = process_message(pipeline, config, session, &id);
        debug!(message_id = %id, outcome = ?outcome, "poller_message_handled");
        report.outcomes.push((id, outcome));
        jobs.message_handled();
    }

    Ok(report)
}

/// Handle one candidate message.
///
/// The identifier is ledgered only once the message is fully handled:
/// printed (successfully or not), skipped as non-matching, or rejected as
/// unparseable. Fetch and store failures leave it eligible for retry.
pub fn process_message(
    pipeline: &PrintPipeline,
    config: &Config,
    session: &mut dyn MailboxSession,
    id: &str,
) -> MessageOutcome {
    let jobs = pipeline.jobs();

    let raw = match session.fetch(id) {
        Ok(raw) => raw,
        Err(e) => {
            warn!(message_id = id, error = %e, "message_fetch_failed");
            jobs.record_error(format!("Failed to fetch UID {}", id));
            return MessageOutcome::FetchFailed;
        }
    };

    let message = match normalize_message(id, &raw) {
        Ok(message) => message,
        Err(e) => {
            jobs.record_error(format!("Failed to parse UID {}: {}", id, e));
            record_handled(pipeline, id);
            return MessageOutcome::Rejected;
        }
    };

    if !subject_matches(&message.subject, &config.subject_prefix) {
        debug!(message_id = id, subject = %message.subject, "message_subject_mismatch");
        record_handled(pipeline, id);
        return MessageOutcome::Skipped;
    }

    let artifact = match pipeline.store().store(&message.subject, &message.html_body) {
        Ok(path) => path,
        Err(e) => {
            jobs.record_error(format!("Failed to store UID {}: {}", id, e));
            return MessageOutcome::StoreFailed;
        }
    };

    let options = print_settings(config, Origin::Mailbox);
    let printed = pipeline
        .print_job(&message.subject, &artifact, Origin::Mailbox, &options)
        .is_ok();

    let mut deleted = false;
    if printed && config.delete_email_after_print {
        match session.delete(id) {
            Ok(()) => {
                deleted = true;
                info!(message_id = id, subject = %message.subject, "message_deleted_after_print");
            }
            Err(e) => {
                warn!(message_id = id, error = %e, "message_delete_failed");
                jobs.record_error("Print succeeded but failed to delete email");
            }
        }
    }

    if !deleted {
        if let Err(e) = session.mark_seen(id) {
            debug!(message_id = id, error = %e, "message_mark_seen_failed");
        }
    }

    record_handled(pipeline, id);

    if printed {
        MessageOutcome::Printed
    } else {
        MessageOutcome::PrintFailed
    }
}

fn record_handled(pipeline: &PrintPipeline, id: &str) {
    if let Err(e) = pipeline.dedup().record(id) {
        pipeline
            .jobs()
            .record_error(format!("Failed to record UID {}: {}", id, e));
    }
}

/// Case-insensitive prefix match on trimmed values.
pub fn subject_matches(subject: &str, prefix: &str) -> bool {
    subject
        .trim()
        .to_uppercase()
        .starts_with(&prefix.trim().to_uppercase())
}
