//! Browser-driven printing.
//!
//! A document is printed by opening a copy of it, with a print-trigger
//! script injected, in a Chromium-family browser running on a dedicated
//! profile. Unattended jobs use kiosk printing and the browser is killed
//! after a fixed spool window; interactive jobs leave the print dialog open
//! for the operator.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::LazyLock;
use std::thread;
use std::time::Duration;

use regex::Regex;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Prefix of the per-print document copies written to the scratch directory.
pub const TEMP_FILE_PREFIX: &str = "flowprint_";

/// Browser profile directory, kept across prints.
pub const PROFILE_DIR_NAME: &str = "flowprint_chrome_profile";

/// Delay between page load and the print call.
const PRINT_DELAY_MS: u32 = 500;

const DEFAULT_BROWSER_PATHS: &[&str] = &[
    r"C:\Program Files\Google\Chrome\Application\chrome.exe",
    r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
    "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
    "/usr/bin/google-chrome",
    "/usr/bin/chromium-browser",
];

#[derive(Error, Debug)]
pub enum PrintError {
    #[error("could not find a browser; set chrome_path in settings")]
    BrowserNotFound,

    #[error("cannot read document '{path}': {source}")]
    ReadDocument {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot write print copy '{path}': {source}")]
    WriteTemp {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot launch browser '{browser}': {source}")]
    Launch {
        browser: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrintMode {
    /// Silent kiosk printing; the window closes itself afterwards.
    Unattended,
    /// Opens the browser's print dialog and leaves it to the operator.
    Interactive,
}

impl PrintMode {
    pub fn from_auto_print(auto_print: bool) -> Self {
        if auto_print {
            Self::Unattended
        } else {
            Self::Interactive
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrintOptions {
    pub mode: PrintMode,
    /// Spool window before the browser is terminated (unattended only).
    pub wait: Duration,
    /// Operator-supplied browser executable.
    pub browser_path: Option<PathBuf>,
}

/// Something that can print an HTML document on disk.
///
/// Implementations block the calling thread.
pub trait Printer: Send + Sync {
    fn print(&self, document: &Path, options: &PrintOptions) -> Result<(), PrintError>;
}

/// [`Printer`] that drives a locally installed Chrome or Chromium.
#[derive(Debug, Clone)]
pub struct ChromePrinter {
    scratch_dir: PathBuf,
    candidates: Vec<PathBuf>,
}

impl Default for ChromePrinter {
    fn default() -> Self {
        Self::new(std::env::temp_dir())
    }
}

impl ChromePrinter {
    pub fn new(scratch_dir: impl Into<PathBuf>) -> Self {
        Self {
            scratch_dir: scratch_dir.into(),
            candidates: DEFAULT_BROWSER_PATHS.iter().map(PathBuf::from).collect(),
        }
    }

    /// Replace the default install locations searched for a browser.
    pub fn with_candidates(mut self, candidates: Vec<PathBuf>) -> Self {
        self.candidates = candidates;
        self
    }

    /// The configured browser if it exists, else the first installed default.
    pub fn resolve_browser(&self, configured: Option<&Path>) -> Result<PathBuf, PrintError> {
        if let Some(path) = configured.filter(|p| p.exists()) {
            return Ok(path.to_path_buf());
        }
        if let Some(path) = configured {
            warn!(path = %path.display(), "configured_browser_missing");
        }

        self.candidates
            .iter()
            .find(|p| p.exists())
            .cloned()
            .ok_or(PrintError::BrowserNotFound)
    }

    fn write_print_copy(&self, html: &str) -> Result<PathBuf, PrintError> {
        let name = format!("{}{}.html", TEMP_FILE_PREFIX, hex::encode(rand::random::<[u8; 16]>()));
        let path = self.scratch_dir.join(name);
        fs::write(&path, html).map_err(|source| PrintError::WriteTemp {
            path: path.clone(),
            source,
        })?;
        Ok(path)
    }

    fn profile_dir(&self) -> PathBuf {
        self.scratch_dir.join(PROFILE_DIR_NAME)
    }
}

impl Printer for ChromePrinter {
    fn print(&self, document: &Path, options: &PrintOptions) -> Result<(), PrintError> {
        let browser = self.resolve_browser(options.browser_path.as_deref())?;

        let bytes = fs::read(document).map_err(|source| PrintError::ReadDocument {
            path: document.to_path_buf(),
            source,
        })?;
        let html = inject_print_script(
            &String::from_utf8_lossy(&bytes),
            options.mode == PrintMode::Unattended,
        );
        let copy = self.write_print_copy(&html)?;

        let profile = self.profile_dir();
        if let Err(e) = fs::create_dir_all(&profile) {
            warn!(path = %profile.display(), error = %e, "browser_profile_create_failed");
        }

        let mut command = Command::new(&browser);
        if options.mode == PrintMode::Unattended {
            command.arg("--kiosk-printing");
        }
        command
            .arg(format!("--user-data-dir={}", profile.display()))
            .arg(&copy)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        info!(
            browser = %browser.display(),
            document = %document.display(),
            mode = ?options.mode,
            "print_launching"
        );

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(source) => {
                remove_copy(&copy);
                return Err(PrintError::Launch { browser, source });
            }
        };

        match options.mode {
            PrintMode::Unattended => {
                thread::sleep(options.wait);
                if let Err(e) = child.kill() {
                    debug!(error = %e, "browser_kill_failed");
                }
                let _ = child.wait();
                remove_copy(&copy);
                info!(wait_seconds = options.wait.as_secs(), "print_unattended_complete");
            }
            PrintMode::Interactive => {
                // Reap the browser whenever the operator closes it.
                thread::spawn(move || {
                    let _ = child.wait();
                });
                info!("print_dialog_opened");
            }
        }

        Ok(())
    }
}

fn remove_copy(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "print_copy_remove_failed");
        }
    }
}

static RE_BODY_CLOSE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)</body\s*>").unwrap());
static RE_HTML_CLOSE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)</html\s*>").unwrap());

/// Insert the print-trigger script before the last `</body>`, else before
/// the last `</html>`, else at the end.
pub fn inject_print_script(html: &str, auto_close: bool) -> String {
    let close_call = if auto_close { "\n        window.close();" } else { "" };
    let script = format!(
        "\n<script>\nwindow.onload = function() {{\n    setTimeout(function() {{\n        window.print();{}\n    }}, {});\n}};\n</script>",
        close_call, PRINT_DELAY_MS
    );

    for re in [&*RE_BODY_CLOSE, &*RE_HTML_CLOSE] {
        if let Some(m) = re.find_iter(html).last() {
            let mut out = String::with_capacity(html.len() + script.len());
            out.push_str(&html[..m.start()]);
            out.push_str(&script);
            out.push_str(&html[m.start()..]);
            return out;
        }
    }

    let mut out = html.to_string();
    out.push_str(&script);
    out
}
