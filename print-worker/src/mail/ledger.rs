//! Durable record of mailbox messages that have already been handled.
//!
//! The on-disk format is one identifier per line, append-only. The whole file
//! is loaded into memory once; after that `contains` never touches the disk.

use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("failed to read dedup ledger '{path}': {source}")]
    Load {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to append '{id}' to dedup ledger '{path}': {source}")]
    Append {
        id: String,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Append-only set of processed message identifiers.
#[derive(Debug)]
pub struct DedupLedger {
    path: PathBuf,
    seen: Mutex<HashSet<String>>,
}

impl DedupLedger {
    /// Open the ledger at `path`, loading every recorded identifier.
    ///
    /// A missing file is an empty ledger; it is created on the first
    /// [`record`](Self::record).
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, LedgerError> {
        let path = path.into();

        let seen: HashSet<String> = match fs::read(&path) {
            Ok(bytes) => String::from_utf8_lossy(&bytes)
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_string)
                .collect(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => HashSet::new(),
            Err(source) => return Err(LedgerError::Load { path, source }),
        };

        info!(
            path = %path.display(),
            entries = seen.len(),
            "dedup_ledger_loaded"
        );

        Ok(Self {
            path,
            seen: Mutex::new(seen),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn contains(&self, id: &str) -> bool {
        self.lock().contains(id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Record `id` as handled.
    ///
    /// Idempotent: an identifier already present is neither re-appended nor
    /// re-inserted. The lock is held across the append so concurrent callers
    /// cannot both write the same identifier.
    pub fn record(&self, id: &str) -> Result<(), LedgerError> {
        let mut seen = self.lock();
        if seen.contains(id) {
            return Ok(());
        }

        append_line(&self.path, id).map_err(|source| LedgerError::Append {
            id: id.to_string(),
            path: self.path.clone(),
            source,
        })?;

        seen.insert(id.to_string());
        debug!(message_id = id, "dedup_ledger_recorded");
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<String>> {
        self.seen.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn append_line(path: &Path, line: &str) -> io::Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{}", line)?;
    file.flush()
}
