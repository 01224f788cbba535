//! Configuration module.
//!
//! Configuration starts from documented defaults, then a JSON file and
//! environment variables are layered on top field by field. Every layer is a
//! [`ConfigOverlay`], so runtime updates from the dashboard go through the
//! same path.

use std::env;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

/// Placeholder shown instead of secrets, and accepted back as "unchanged".
pub const MASKED_SECRET: &str = "***";

/// Default location of the optional JSON config file.
pub const DEFAULT_CONFIG_FILE: &str = "flowprint_config.json";

const MAX_PRINT_WAIT_SECONDS: u64 = 300;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("config validation failed: {0}")]
    Validation(String),
}

/// Which ingestion paths are active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OperationMode {
    /// Mailbox polling only; the webhook endpoint answers 403.
    #[default]
    EmailOnly,
    /// Webhooks only; the poller idles.
    WebhookOnly,
    EmailPrimary,
    WebhookPrimary,
}

impl OperationMode {
    pub fn polls_mailbox(self) -> bool {
        self != OperationMode::WebhookOnly
    }

    pub fn accepts_webhooks(self) -> bool {
        self != OperationMode::EmailOnly
    }
}

/// Application configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    // =========================================================================
    // Mailbox
    // =========================================================================
    /// IMAP server host
    pub imap_host: String,

    /// IMAP server port
    pub imap_port: u16,

    /// Connect over TLS (plain TCP otherwise)
    pub imap_use_ssl: bool,

    pub imap_username: String,

    pub imap_password: String,

    /// Mailbox (folder) to poll
    pub mailbox: String,

    /// Seconds to sleep between poll cycles
    pub poll_interval_seconds: u64,

    /// Subject filter; searched as a substring, confirmed as a
    /// case-insensitive prefix after fetch
    pub subject_prefix: String,

    /// Print unattended (true) or open the print dialog (false)
    pub auto_print_enabled: bool,

    pub delete_email_after_print: bool,

    /// File holding already-processed message identifiers
    pub printed_uids_file: PathBuf,

    // =========================================================================
    // Printing
    // =========================================================================
    /// Operator-supplied browser executable; empty means auto-detect
    pub chrome_path: String,

    /// Seconds to let the browser spool an unattended print job
    pub chrome_print_wait_seconds: u64,

    pub temp_file_cleanup_enabled: bool,

    /// Maximum artifact age, also the interval between cleanup passes
    pub temp_file_cleanup_hours: u64,

    // =========================================================================
    // Webhooks
    // =========================================================================
    pub webhook_enabled: bool,

    /// Shared secret for HMAC-SHA256 signature verification
    pub webhook_secret: String,

    /// Template used to render webhook orders
    pub webhook_template: String,

    pub webhook_auto_print: bool,

    pub webhook_print_wait_seconds: u64,

    /// Directory holding the print templates
    pub templates_dir: PathBuf,

    pub operation_mode: OperationMode,

    // =========================================================================
    // Web server
    // =========================================================================
    pub bind_address: String,

    pub port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            imap_host: "imap.gmail.com".to_string(),
            imap_port: 993,
            imap_use_ssl: true,
            imap_username: String::new(),
            imap_password: String::new(),
            mailbox: "Inbox".to_string(),
            poll_interval_seconds: 30,
            subject_prefix: "[PRINT PACK]".to_string(),
            auto_print_enabled: true,
            delete_email_after_print: false,
            printed_uids_file: PathBuf::from("printed_uids.txt"),
            chrome_path: String::new(),
            chrome_print_wait_seconds: 8,
            temp_file_cleanup_enabled: true,
            temp_file_cleanup_hours: 6,
            webhook_enabled: false,
            webhook_secret: String::new(),
            webhook_template: "default_packing_slip.html".to_string(),
            webhook_auto_print: true,
            webhook_print_wait_seconds: 8,
            templates_dir: PathBuf::from("print_templates"),
            operation_mode: OperationMode::EmailOnly,
            bind_address: "127.0.0.1".to_string(),
            port: 5000,
        }
    }
}

/// A partially-specified configuration; `None` leaves a field untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigOverlay {
    pub imap_host: Option<String>,
    pub imap_port: Option<u16>,
    pub imap_use_ssl: Option<bool>,
    pub imap_username: Option<String>,
    pub imap_password: Option<String>,
    pub mailbox: Option<String>,
    pub poll_interval_seconds: Option<u64>,
    pub subject_prefix: Option<String>,
    pub auto_print_enabled: Option<bool>,
    pub delete_email_after_print: Option<bool>,
    pub printed_uids_file: Option<PathBuf>,
    pub chrome_path: Option<String>,
    pub chrome_print_wait_seconds: Option<u64>,
    pub temp_file_cleanup_enabled: Option<bool>,
    pub temp_file_cleanup_hours: Option<u64>,
    pub webhook_enabled: Option<bool>,
    pub webhook_secret: Option<String>,
    pub webhook_template: Option<String>,
    pub webhook_auto_print: Option<bool>,
    pub webhook_print_wait_seconds: Option<u64>,
    pub templates_dir: Option<PathBuf>,
    pub operation_mode: Option<OperationMode>,
    pub bind_address: Option<String>,
    pub port: Option<u16>,
}

macro_rules! overlay_fields {
    ($target:expr, $overlay:expr, $($field:ident),+ $(,)?) => {
        $(
            if let Some(value) = $overlay.$field {
                $target.$field = value;
            }
        )+
    };
}

impl Config {
    /// Load configuration: defaults, then the JSON file named by
    /// `FLOWPRINT_CONFIG` (if present), then environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        let path = env::var("FLOWPRINT_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_FILE));

        let mut config = Config::default();

        if path.exists() {
            config.apply(ConfigOverlay::from_file(&path)?);
            info!(path = %path.display(), "config_file_loaded");
        }

        config.apply(ConfigOverlay::from_env());
        config.validate()?;

        Ok(config)
    }

    /// Overlay every `Some` field onto this config.
    ///
    /// Secrets equal to [`MASKED_SECRET`] are ignored, so a masked view sent
    /// back from the dashboard keeps the stored value.
    pub fn apply(&mut self, overlay: ConfigOverlay) {
        let ConfigOverlay {
            imap_password,
            webhook_secret,
            ..
        } = &overlay;

        if let Some(password) = imap_password {
            if password != MASKED_SECRET {
                self.imap_password = password.clone();
            }
        }
        if let Some(secret) = webhook_secret {
            if secret != MASKED_SECRET {
                self.webhook_secret = secret.clone();
            }
        }

        overlay_fields!(
            self,
            overlay,
            imap_host,
            imap_port,
            imap_use_ssl,
            imap_username,
            mailbox,
            poll_interval_seconds,
            subject_prefix,
            auto_print_enabled,
            delete_email_after_print,
            printed_uids_file,
            chrome_path,
            chrome_print_wait_seconds,
            temp_file_cleanup_enabled,
            temp_file_cleanup_hours,
            webhook_enabled,
            webhook_template,
            webhook_auto_print,
            webhook_print_wait_seconds,
            templates_dir,
            operation_mode,
            bind_address,
            port,
        );
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval_seconds == 0 {
            return Err(ConfigError::Validation(
                "poll_interval_seconds must be at least 1".to_string(),
            ));
        }
        if self.temp_file_cleanup_hours == 0 {
            return Err(ConfigError::Validation(
                "temp_file_cleanup_hours must be at least 1".to_string(),
            ));
        }
        for (name, value) in [
            ("chrome_print_wait_seconds", self.chrome_print_wait_seconds),
            ("webhook_print_wait_seconds", self.webhook_print_wait_seconds),
        ] {
            if value > MAX_PRINT_WAIT_SECONDS {
                return Err(ConfigError::Validation(format!(
                    "{} must not exceed {}",
                    name, MAX_PRINT_WAIT_SECONDS
                )));
            }
        }
        if self.mailbox.trim().is_empty() {
            return Err(ConfigError::Validation("mailbox must not be empty".to_string()));
        }
        if !is_bare_file_name(&self.webhook_template) {
            return Err(ConfigError::Validation(format!(
                "webhook_template '{}' must be a plain file name",
                self.webhook_template
            )));
        }
        Ok(())
    }

    /// Whether the mailbox credentials needed by the poller are present.
    pub fn has_credentials(&self) -> bool {
        !self.imap_username.trim().is_empty() && !self.imap_password.is_empty()
    }

    /// Whether the webhook endpoint should accept requests.
    pub fn webhook_active(&self) -> bool {
        self.webhook_enabled && self.operation_mode.accepts_webhooks()
    }

    /// Copy with secrets replaced by [`MASKED_SECRET`], for the dashboard.
    pub fn masked(&self) -> Config {
        let mut view = self.clone();
        if !view.imap_password.is_empty() {
            view.imap_password = MASKED_SECRET.to_string();
        }
        if !view.webhook_secret.is_empty() {
            view.webhook_secret = MASKED_SECRET.to_string();
        }
        view
    }
}

impl ConfigOverlay {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Read the `FLOWPRINT_*` environment variables (and `PORT`).
    pub fn from_env() -> Self {
        ConfigOverlay {
            imap_host: env_string("FLOWPRINT_IMAP_HOST"),
            imap_port: env_parse("FLOWPRINT_IMAP_PORT"),
            imap_use_ssl: env_parse("FLOWPRINT_IMAP_USE_SSL"),
            imap_username: env_string("FLOWPRINT_IMAP_USERNAME"),
            imap_password: env_string("FLOWPRINT_IMAP_PASSWORD"),
            mailbox: env_string("FLOWPRINT_MAILBOX"),
            poll_interval_seconds: env_parse("FLOWPRINT_POLL_INTERVAL_SECONDS"),
            subject_prefix: env_string("FLOWPRINT_SUBJECT_PREFIX"),
            auto_print_enabled: env_parse("FLOWPRINT_AUTO_PRINT"),
            delete_email_after_print: env_parse("FLOWPRINT_DELETE_AFTER_PRINT"),
            printed_uids_file: env_string("FLOWPRINT_PRINTED_UIDS_FILE").map(PathBuf::from),
            chrome_path: env_string("FLOWPRINT_CHROME_PATH"),
            chrome_print_wait_seconds: env_parse("FLOWPRINT_CHROME_PRINT_WAIT_SECONDS"),
            temp_file_cleanup_enabled: env_parse("FLOWPRINT_CLEANUP_ENABLED"),
            temp_file_cleanup_hours: env_parse("FLOWPRINT_CLEANUP_HOURS"),
            webhook_enabled: env_parse("FLOWPRINT_WEBHOOK_ENABLED"),
            webhook_secret: env_string("FLOWPRINT_WEBHOOK_SECRET"),
            webhook_template: env_string("FLOWPRINT_WEBHOOK_TEMPLATE"),
            webhook_auto_print: env_parse("FLOWPRINT_WEBHOOK_AUTO_PRINT"),
            webhook_print_wait_seconds: env_parse("FLOWPRINT_WEBHOOK_PRINT_WAIT_SECONDS"),
            templates_dir: env_string("FLOWPRINT_TEMPLATES_DIR").map(PathBuf::from),
            operation_mode: env_string("FLOWPRINT_OPERATION_MODE").and_then(|raw| {
                parse_mode(&raw).or_else(|| {
                    warn!(env_var = "FLOWPRINT_OPERATION_MODE", value = %raw, "Invalid operation mode, ignoring");
                    None
                })
            }),
            bind_address: env_string("FLOWPRINT_BIND_ADDRESS"),
            port: env_parse("PORT"),
        }
    }
}

fn parse_mode(raw: &str) -> Option<OperationMode> {
    serde_json::from_value(serde_json::Value::String(raw.trim().to_lowercase())).ok()
}

fn env_string(name: &str) -> Option<String> {
    env::var(name).ok()
}

/// Parse an environment variable, warning (and ignoring it) when malformed.
fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(env_var = name, value = %raw, "Invalid value, ignoring");
            None
        }
    }
}

/// True when `name` has no directory components.
pub fn is_bare_file_name(name: &str) -> bool {
    !name.is_empty()
        && Path::new(name).file_name().and_then(|n| n.to_str()) == Some(name)
        && name != ".."
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.poll_interval_seconds, 30);
        assert_eq!(config.subject_prefix, "[PRINT PACK]");
        assert!(!config.has_credentials());
    }

    #[test]
    fn test_overlay_applies_only_some_fields() {
        let mut config = Config::default();
        let overlay: ConfigOverlay =
            serde_json::from_str(r#"{"imap_host": "mail.example.com", "poll_interval_seconds": 5}"#)
                .unwrap();

        config.apply(overlay);

        assert_eq!(config.imap_host, "mail.example.com");
        assert_eq!(config.poll_interval_seconds, 5);
        assert_eq!(config.imap_port, 993);
        assert_eq!(config.mailbox, "Inbox");
    }

    #[test]
    fn test_masked_secret_keeps_existing_value() {
        let mut config = Config {
            imap_password: "hunter2".to_string(),
            webhook_secret: "shh".to_string(),
            ..Config::default()
        };

        let view = config.masked();
        assert_eq!(view.imap_password, MASKED_SECRET);
        assert_eq!(view.webhook_secret, MASKED_SECRET);

        config.apply(ConfigOverlay {
            imap_password: Some(MASKED_SECRET.to_string()),
            webhook_secret: Some("new-secret".to_string()),
            ..ConfigOverlay::default()
        });
        assert_eq!(config.imap_password, "hunter2");
        assert_eq!(config.webhook_secret, "new-secret");
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let config = Config {
            poll_interval_seconds: 0,
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));

        let config = Config {
            webhook_template: "../secrets.html".to_string(),
            ..Config::default()
        };
        assert!(config.validate().is_err());

        let config = Config {
            chrome_print_wait_seconds: 301,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_operation_mode() {
        assert_eq!(parse_mode("webhook_only"), Some(OperationMode::WebhookOnly));
        assert_eq!(parse_mode(" Email_Primary "), Some(OperationMode::EmailPrimary));
        assert_eq!(parse_mode("both"), None);

        let config = Config {
            webhook_enabled: true,
            ..Config::default()
        };
        assert!(!config.webhook_active());

        let config = Config {
            webhook_enabled: true,
            operation_mode: OperationMode::WebhookPrimary,
            ..Config::default()
        };
        assert!(config.webhook_active());
        assert!(config.operation_mode.polls_mailbox());
        assert!(!OperationMode::WebhookOnly.polls_mailbox());
    }

    #[test]
    fn test_env_parse() {
        env::set_var("FLOWPRINT_TEST_PORT", "8081");
        assert_eq!(env_parse::<u16>("FLOWPRINT_TEST_PORT"), Some(8081));
        env::set_var("FLOWPRINT_TEST_PORT", "not-a-port");
        assert_eq!(env_parse::<u16>("FLOWPRINT_TEST_PORT"), None);
        env::remove_var("FLOWPRINT_TEST_PORT");
        assert_eq!(env_parse::<u16>("FLOWPRINT_TEST_PORT"), None);
    }

    #[test]
    fn test_is_bare_file_name() {
        assert!(is_bare_file_name("default_packing_slip.html"));
        assert!(!is_bare_file_name("a/b.html"));
        assert!(!is_bare_file_name(".."));
        assert!(!is_bare_file_name(""));
    }
}
