//! FlowPrint - unattended printing of order documents.
//!
//! Orders reach the printer along two paths:
//! - Mailbox: a poller searches an IMAP folder for messages whose subject
//!   carries a configured prefix and prints each new message body
//! - Webhook: signed Shopify order payloads are rendered through a template
//!   and printed
//!
//! ## Architecture
//!
//! ```text
//! IMAP → MailboxPoller ─┐
//!                       ├→ DocumentStore → Printer → JobLedger → /api/events
//! Webhook → Template ───┘
//! ```

pub mod config;
pub mod mail;
pub mod pipeline;
pub mod poller;
pub mod print;
pub mod render;
pub mod service;
pub mod status;
pub mod util;
pub mod web;

// Re-export commonly used types
pub use config::{Config, ConfigError, ConfigOverlay, OperationMode};
pub use pipeline::PrintPipeline;
pub use poller::{MailboxPoller, PollerSignal};
pub use service::{PrintService, ServiceError};
pub use status::{Origin, StatusSnapshot};
pub use web::{router, AppState};
