//! Owned orchestrator handle.
//!
//! [`PrintService`] owns the poller task and exposes the lifecycle and
//! control operations the dashboard needs. It is cheap to clone; every clone
//! controls the same poller.

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{broadcast, Mutex};
use tokio::task::{JoinError, JoinHandle};
use tracing::{error, info};

use crate::config::{Config, ConfigError, ConfigOverlay};
use crate::mail::{self, MailboxError, MailboxSettings};
use crate::pipeline::PrintPipeline;
use crate::poller::{MailboxPoller, PollerSignal};
use crate::print::PrintError;
use crate::status::{Origin, ServiceState, StatusSnapshot};

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Service is not running")]
    NotRunning,

    #[error("IMAP username and password must be configured")]
    MissingCredentials,

    #[error("Print file not found or has been cleaned up")]
    ArtifactNotFound(PathBuf),

    #[error("{0}")]
    Print(#[from] PrintError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Mailbox(#[from] MailboxError),

    #[error("background task failed: {0}")]
    Worker(#[from] JoinError),
}

#[derive(Clone)]
pub struct PrintService {
    pipeline: Arc<PrintPipeline>,
    signal: Arc<PollerSignal>,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl PrintService {
    pub fn new(pipeline: Arc<PrintPipeline>) -> Self {
        Self {
            pipeline,
            signal: Arc::new(PollerSignal::new()),
            task: Arc::new(Mutex::new(None)),
        }
    }

    pub fn pipeline(&self) -> &Arc<PrintPipeline> {
        &self.pipeline
    }

    /// Start the poller. Returns `false` if it was already running.
    pub async fn start(&self) -> Result<bool, ServiceError> {
        let config = self.pipeline.config();
        if config.operation_mode.polls_mailbox() && !config.has_credentials() {
            return Err(ServiceError::MissingCredentials);
        }

        let mut task = self.task.lock().await;
        if self.signal.set_running(true) {
            return Ok(false);
        }

        let jobs = self.pipeline.jobs();
        jobs.set_running(true);
        jobs.set_state(ServiceState::Starting);

        let poller = MailboxPoller::new(Arc::clone(&self.pipeline), Arc::clone(&self.signal));
        *task = Some(tokio::spawn(poller.run()));

        info!(
            mailbox = %config.mailbox,
            operation_mode = ?config.operation_mode,
            "service_started"
        );
        Ok(true)
    }

    /// Stop the poller, wait for it to finish and evict every artifact.
    ///
    /// Returns `false` if it was not running.
    pub async fn stop(&self) -> bool {
        let mut task = self.task.lock().await;
        let was_running = self.signal.set_running(false);
        self.signal.wake();

        if let Some(handle) = task.take() {
            if let Err(e) = handle.await {
                error!(error = %e, "poller_task_failed");
            }
        }

        let pipeline = Arc::clone(&self.pipeline);
        match tokio::task::spawn_blocking(move || pipeline.store().evict_all()).await {
            Ok(removed) => info!(removed = removed, "service_artifacts_evicted"),
            Err(e) => error!(error = %e, "service_eviction_failed"),
        }

        let jobs = self.pipeline.jobs();
        jobs.mark_artifacts_evicted();
        jobs.set_running(false);
        jobs.set_state(ServiceState::Stopped);

        info!(was_running = was_running, "service_stopped");
        was_running
    }

    pub fn is_running(&self) -> bool {
        self.signal.is_running()
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        self.pipeline.jobs().snapshot()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusSnapshot> {
        self.pipeline.jobs().subscribe()
    }

    /// Wake the poller for an immediate mailbox check.
    pub fn trigger_now(&self) -> Result<(), ServiceError> {
        if !self.is_running() {
            return Err(ServiceError::NotRunning);
        }
        self.pipeline.jobs().check_requested();
        self.signal.wake();
        info!("manual_check_triggered");
        Ok(())
    }

    /// Evict every artifact; jobs stop being reprintable.
    pub async fn clear_cache(&self) -> Result<usize, ServiceError> {
        let pipeline = Arc::clone(&self.pipeline);
        Ok(tokio::task::spawn_blocking(move || pipeline.clear_cache()).await?)
    }

    /// Print a stored artifact again with the settings of `origin`.
    pub async fn reprint(&self, artifact: PathBuf, origin: Origin) -> Result<(), ServiceError> {
        let pipeline = Arc::clone(&self.pipeline);
        tokio::task::spawn_blocking(move || {
            let resolved = pipeline
                .store()
                .resolve(&artifact)
                .ok_or(ServiceError::ArtifactNotFound(artifact))?;
            pipeline.reprint(&resolved, origin)?;
            Ok::<(), ServiceError>(())
        })
        .await?
    }

    /// Current config with secrets masked.
    pub fn config_view(&self) -> Config {
        self.pipeline.config().masked()
    }

    /// Apply an overlay; the poller picks it up on its next cycle.
    pub async fn update_config(&self, overlay: ConfigOverlay) -> Result<Config, ServiceError> {
        let updated = self.pipeline.update_config(overlay)?;
        if self.is_running() {
            self.signal.wake();
        }
        Ok(updated.masked())
    }

    /// Check mailbox connectivity with the current config, optionally
    /// overlaid with unsaved values.
    pub async fn test_connection(&self, overlay: Option<ConfigOverlay>) -> Result<(), ServiceError> {
        let mut config = self.pipeline.config();
        if let Some(overlay) = overlay {
            config.apply(overlay);
        }
        let settings = MailboxSettings::from(&config);

        let pipeline = Arc::clone(&self.pipeline);
        tokio::task::spawn_blocking(move || mail::test_connection(pipeline.connector(), &settings))
            .await??;

        info!(host = %config.imap_host, "mailbox_connection_test_passed");
        Ok(())
    }
}
