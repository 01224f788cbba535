//! Shared components of both ingestion paths.
//!
//! One [`PrintPipeline`] is built at startup and shared (behind an `Arc`) by
//! the mailbox poller, the webhook receiver and the control surface, so all
//! of them see the same ledgers, store and config.

use std::path::Path;
use std::sync::{RwLock, RwLockReadGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Local};
use tracing::info;

use crate::config::{Config, ConfigError, ConfigOverlay};
use crate::mail::{DedupLedger, MailboxConnector};
use crate::print::{DocumentStore, PrintError, PrintMode, PrintOptions, Printer};
use crate::render::TemplateRenderer;
use crate::status::{JobLedger, Origin, ServiceState};

pub const OUTCOME_AUTO_PRINTED: &str = "Auto-printed ✓";
pub const OUTCOME_DIALOG_OPENED: &str = "Print dialog opened 🖨️";
pub const OUTCOME_FAILED: &str = "Print failed ✗";

/// Print settings for jobs of the given origin.
///
/// Mailbox jobs follow `auto_print_enabled` / `chrome_print_wait_seconds`,
/// webhook jobs `webhook_auto_print` / `webhook_print_wait_seconds`.
pub fn print_settings(config: &Config, origin: Origin) -> PrintOptions {
    let (auto_print, wait_seconds) = match origin {
        Origin::Mailbox => (config.auto_print_enabled, config.chrome_print_wait_seconds),
        Origin::Webhook => (config.webhook_auto_print, config.webhook_print_wait_seconds),
    };
    let browser = config.chrome_path.trim();

    PrintOptions {
        mode: PrintMode::from_auto_print(auto_print),
        wait: Duration::from_secs(wait_seconds),
        browser_path: (!browser.is_empty()).then(|| browser.into()),
    }
}

pub fn cleanup_interval(config: &Config) -> Duration {
    Duration::from_secs(config.temp_file_cleanup_hours.saturating_mul(3600))
}

/// Local time `after` from now, if representable.
pub fn local_after(after: Duration) -> Option<DateTime<Local>> {
    let delta = chrono::Duration::from_std(after).ok()?;
    Local::now().checked_add_signed(delta)
}

pub struct PrintPipeline {
    config: RwLock<Config>,
    jobs: JobLedger,
    dedup: DedupLedger,
    store: DocumentStore,
    templates: TemplateRenderer,
    printer: Box<dyn Printer>,
    connector: Box<dyn MailboxConnector>,
}

impl PrintPipeline {
    pub fn new(
        config: Config,
        dedup: DedupLedger,
        store: DocumentStore,
        templates: TemplateRenderer,
        printer: Box<dyn Printer>,
        connector: Box<dyn MailboxConnector>,
    ) -> Self {
        Self {
            config: RwLock::new(config),
            jobs: JobLedger::new(),
            dedup,
            store,
            templates,
            printer,
            connector,
        }
    }

    /// Snapshot of the current configuration.
    pub fn config(&self) -> Config {
        self.read_config().clone()
    }

    /// Apply an operator overlay. The config is replaced only if the result
    /// validates.
    pub fn update_config(&self, overlay: ConfigOverlay) -> Result<Config, ConfigError> {
        let mut guard = self.config.write().unwrap_or_else(PoisonError::into_inner);
        let mut updated = guard.clone();
        updated.apply(overlay);
        updated.validate()?;
        *guard = updated.clone();

        info!(
            operation_mode = ?updated.operation_mode,
            webhook_enabled = updated.webhook_enabled,
            poll_interval_seconds = updated.poll_interval_seconds,
            "config_updated"
        );
        Ok(updated)
    }

    pub fn jobs(&self) -> &JobLedger {
        &self.jobs
    }

    pub fn dedup(&self) -> &DedupLedger {
        &self.dedup
    }

    pub fn store(&self) -> &DocumentStore {
        &self.store
    }

    pub fn templates(&self) -> &TemplateRenderer {
        &self.templates
    }

    pub fn connector(&self) -> &dyn MailboxConnector {
        self.connector.as_ref()
    }

    pub fn print_settings(&self, origin: Origin) -> PrintOptions {
        print_settings(&self.read_config(), origin)
    }

    /// Print a stored artifact and record the outcome in the job ledger.
    ///
    /// A failure is recorded as both an error and a failed job. Blocks for
    /// the spool window in unattended mode.
    pub fn print_job(
        &self,
        label: &str,
        artifact: &Path,
        origin: Origin,
        options: &PrintOptions,
    ) -> Result<(), PrintError> {
        match self.printer.print(artifact, options) {
            Ok(()) => {
                let outcome = match options.mode {
                    PrintMode::Unattended => OUTCOME_AUTO_PRINTED,
                    PrintMode::Interactive => OUTCOME_DIALOG_OPENED,
                };
                info!(label = %label, origin = ?origin, outcome = outcome, "print_job_completed");
                self.jobs
                    .record_job(label, outcome, Some(artifact.to_path_buf()), origin, true);
                Ok(())
            }
            Err(e) => {
                let message = match options.mode {
                    PrintMode::Unattended => format!("Print failed: {}", e),
                    PrintMode::Interactive => format!("Failed to open dialog: {}", e),
                };
                self.jobs.record_error(message);
                self.jobs
                    .record_job(label, OUTCOME_FAILED, Some(artifact.to_path_buf()), origin, false);
                Err(e)
            }
        }
    }

    /// Print an artifact again without recording a new job.
    pub fn reprint(&self, artifact: &Path, origin: Origin) -> Result<(), PrintError> {
        let options = self.print_settings(origin);
        self.printer.print(artifact, &options)?;
        info!(artifact = %artifact.display(), origin = ?origin, "reprint_completed");
        Ok(())
    }

    /// Run an age-based cleanup pass when enabled and due.
    ///
    /// Returns the number of artifacts removed, or `None` if no pass ran.
    pub fn cleanup_if_due(&self, config: &Config) -> Option<usize> {
        if !config.temp_file_cleanup_enabled {
            return None;
        }
        let interval = cleanup_interval(config);
        if !self.store.cleanup_due(interval) {
            return None;
        }

        let previous = self.jobs.state();
        self.jobs.set_state(ServiceState::CleaningUp);
        let removed = self.store.evict_older_than(interval);
        self.jobs.refresh_reprintable();
        self.jobs.cleanup_complete(local_after(interval));
        self.jobs.set_state(previous);

        Some(removed)
    }

    /// Remove every artifact and mark all jobs non-reprintable.
    pub fn clear_cache(&self) -> usize {
        let removed = self.store.evict_all();
        self.jobs.mark_artifacts_evicted();

        let config = self.read_config();
        let next = config
            .temp_file_cleanup_enabled
            .then(|| local_after(cleanup_interval(&config)))
            .flatten();
        self.jobs.cleanup_complete(next);

        info!(removed = removed, "cache_cleared");
        removed
    }

    fn read_config(&self) -> RwLockReadGuard<'_, Config> {
        self.config.read().unwrap_or_else(PoisonError::into_inner)
    }
}
