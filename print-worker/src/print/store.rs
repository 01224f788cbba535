//! On-disk store for rendered HTML documents.
//!
//! Every print job is backed by one artifact under the jobs directory, named
//! `<sanitized-label>_<random8hex>.html`. Artifacts stay around so jobs can
//! be reprinted, until an age-based cleanup pass or a full eviction removes
//! them.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant, SystemTime};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::print::dispatcher::TEMP_FILE_PREFIX;
use crate::util::sanitize_label;

/// Name of the jobs directory inside the system temp directory.
pub const JOBS_DIR_NAME: &str = "flowprint_jobs";

const MAX_LABEL_CHARS: usize = 40;
const FALLBACK_LABEL: &str = "FlowPrint";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("failed to create directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to write file '{path}': {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Stores rendered documents and evicts them by age or wholesale.
#[derive(Debug)]
pub struct DocumentStore {
    jobs_dir: PathBuf,
    /// Shared temp area where the print dispatcher drops its copies.
    scratch_dir: PathBuf,
    tracked: Mutex<HashMap<PathBuf, SystemTime>>,
    last_cleanup: Mutex<Instant>,
}

impl DocumentStore {
    /// Store under `<system temp>/flowprint_jobs`, sweeping dispatcher
    /// leftovers from the system temp directory.
    pub fn open_default() -> Result<Self, StoreError> {
        let scratch = std::env::temp_dir();
        Self::open(scratch.join(JOBS_DIR_NAME), scratch)
    }

    pub fn open(jobs_dir: impl Into<PathBuf>, scratch_dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let jobs_dir = jobs_dir.into();
        fs::create_dir_all(&jobs_dir).map_err(|source| StoreError::CreateDirectory {
            path: jobs_dir.clone(),
            source,
        })?;

        Ok(Self {
            jobs_dir,
            scratch_dir: scratch_dir.into(),
            tracked: Mutex::new(HashMap::new()),
            last_cleanup: Mutex::new(Instant::now()),
        })
    }

    pub fn jobs_dir(&self) -> &Path {
        &self.jobs_dir
    }

    pub fn scratch_dir(&self) -> &Path {
        &self.scratch_dir
    }

    /// Write `html` to a fresh artifact named after `label`.
    pub fn store(&self, label: &str, html: &str) -> Result<PathBuf, StoreError> {
        let safe_label = sanitize_label(label, MAX_LABEL_CHARS, FALLBACK_LABEL);
        let suffix = hex::encode(rand::random::<[u8; 4]>());
        let path = self.jobs_dir.join(format!("{}_{}.html", safe_label, suffix));

        fs::write(&path, html).map_err(|source| StoreError::WriteFile {
            path: path.clone(),
            source,
        })?;

        self.tracked().insert(path.clone(), SystemTime::now());

        debug!(
            path = %path.display(),
            html_length = html.len(),
            "artifact_stored"
        );

        Ok(path)
    }

    /// Resolve a caller-supplied artifact reference.
    ///
    /// Returns the canonical path only if it exists and lives inside the jobs
    /// directory; anything else (evicted, deleted externally, or outside the
    /// store) is `None`.
    pub fn resolve(&self, reference: &Path) -> Option<PathBuf> {
        let root = self.jobs_dir.canonicalize().ok()?;
        let path = reference.canonicalize().ok()?;
        (path.starts_with(&root) && path.is_file()).then_some(path)
    }

    pub fn tracked_count(&self) -> usize {
        self.tracked().len()
    }

    /// Whether a cleanup pass is due; passes run at most once per `interval`.
    pub fn cleanup_due(&self, interval: Duration) -> bool {
        self.last_cleanup().elapsed() >= interval
    }

    /// Remove artifacts older than `max_age`.
    ///
    /// Covers tracked artifacts (by creation time) and, to recover files left
    /// by a previous run, any matching file on disk (by modification time).
    /// Returns the number of files removed.
    pub fn evict_older_than(&self, max_age: Duration) -> usize {
        let now = SystemTime::now();
        let cutoff = now.checked_sub(max_age).unwrap_or(SystemTime::UNIX_EPOCH);

        let mut candidates: HashSet<PathBuf> = self
            .tracked()
            .iter()
            .filter(|(_, created)| **created <= cutoff)
            .map(|(path, _)| path.clone())
            .collect();

        candidates.extend(
            self.on_disk_artifacts()
                .into_iter()
                .filter(|path| modified_at(path).map_or(false, |t| t <= cutoff)),
        );

        let removed = self.remove_all(candidates);
        *self.last_cleanup() = Instant::now();

        info!(
            removed = removed,
            max_age_seconds = max_age.as_secs(),
            "artifacts_evicted"
        );

        removed
    }

    /// Remove every tracked and matching on-disk artifact regardless of age.
    pub fn evict_all(&self) -> usize {
        let mut candidates: HashSet<PathBuf> = self.tracked().keys().cloned().collect();
        candidates.extend(self.on_disk_artifacts());

        let removed = self.remove_all(candidates);
        self.tracked().clear();
        *self.last_cleanup() = Instant::now();

        info!(removed = removed, "artifacts_evicted_all");

        removed
    }

    fn remove_all(&self, paths: HashSet<PathBuf>) -> usize {
        let mut removed = 0;
        let mut tracked = self.tracked();

        for path in paths {
            match fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "artifact_remove_failed");
                    continue;
                }
            }
            tracked.remove(&path);
        }

        removed
    }

    /// Artifacts in the jobs directory plus dispatcher copies in the scratch
    /// directory.
    fn on_disk_artifacts(&self) -> Vec<PathBuf> {
        let mut found = list_html_files(&self.jobs_dir, |_| true);
        found.extend(list_html_files(&self.scratch_dir, |name| {
            name.starts_with(TEMP_FILE_PREFIX)
        }));
        found
    }

    fn tracked(&self) -> MutexGuard<'_, HashMap<PathBuf, SystemTime>> {
        self.tracked.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn last_cleanup(&self) -> MutexGuard<'_, Instant> {
        self.last_cleanup.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn list_html_files(dir: &Path, accept: impl Fn(&str) -> bool) -> Vec<PathBuf> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            debug!(dir = %dir.display(), error = %e, "artifact_scan_skipped");
            return Vec::new();
        }
    };

    entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().map_or(false, |t| t.is_file()))
        .filter(|entry| {
            entry
                .file_name()
                .to_str()
                .map_or(false, |name| name.ends_with(".html") && accept(name))
        })
        .map(|entry| entry.path())
        .collect()
}

fn modified_at(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}
