//! Mailbox side of the pipeline.
//!
//! - [`client`]: IMAP session abstraction and implementation
//! - [`normalizer`]: raw message to subject + printable HTML
//! - [`ledger`]: durable set of already-handled message ids

pub mod client;
pub mod ledger;
pub mod normalizer;

pub use client::{
    test_connection, ImapConnector, MailboxConnector, MailboxError, MailboxSession,
    MailboxSettings,
};
pub use ledger::{DedupLedger, LedgerError};
pub use normalizer::{normalize_message, NormalizeError, NormalizedMessage};
