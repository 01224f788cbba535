//! Mailbox access over IMAP.
//!
//! The poller talks to the mailbox through [`MailboxConnector`] and
//! [`MailboxSession`], so tests can substitute an in-memory mailbox. The
//! production implementation is [`ImapConnector`], which uses the blocking
//! `imap` client: every call blocks the calling thread and must run on a
//! blocking worker.

use std::io::{self, Read, Write};
use std::net::TcpStream;

use native_tls::{TlsConnector, TlsStream};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::Config;

#[derive(Error, Debug)]
pub enum MailboxError {
    #[error("cannot create tls connector: {0}")]
    Tls(#[source] native_tls::Error),

    #[error("cannot connect to {host}:{port}: {source}")]
    Connect {
        host: String,
        port: u16,
        #[source]
        source: imap::Error,
    },

    #[error("cannot login as {user}: {source}")]
    Login {
        user: String,
        #[source]
        source: imap::Error,
    },

    #[error("cannot select mailbox {mailbox}: {source}")]
    Select {
        mailbox: String,
        #[source]
        source: imap::Error,
    },

    #[error("cannot search messages with query {query}: {source}")]
    Search {
        query: String,
        #[source]
        source: imap::Error,
    },

    #[error("cannot fetch message {id}: {source}")]
    Fetch {
        id: String,
        #[source]
        source: imap::Error,
    },

    #[error("message {0} returned no body")]
    EmptyFetch(String),

    #[error("cannot set flags {flags} on message {id}: {source}")]
    Flags {
        id: String,
        flags: String,
        #[source]
        source: imap::Error,
    },

    #[error("cannot expunge mailbox: {0}")]
    Expunge(#[source] imap::Error),

    #[error("cannot close imap session: {0}")]
    Logout(#[source] imap::Error),

    /// Used by non-IMAP implementations.
    #[error("{0}")]
    Other(String),
}

/// Connection parameters, taken from the config snapshot of a cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailboxSettings {
    pub host: String,
    pub port: u16,
    pub use_tls: bool,
    pub username: String,
    pub password: String,
    pub mailbox: String,
}

impl From<&Config> for MailboxSettings {
    fn from(config: &Config) -> Self {
        Self {
            host: config.imap_host.clone(),
            port: config.imap_port,
            use_tls: config.imap_use_ssl,
            username: config.imap_username.clone(),
            password: config.imap_password.clone(),
            mailbox: config.mailbox.clone(),
        }
    }
}

/// Opens authenticated sessions with the mailbox selected.
pub trait MailboxConnector: Send + Sync {
    fn connect(&self, settings: &MailboxSettings) -> Result<Box<dyn MailboxSession>, MailboxError>;
}

/// An authenticated session on the selected mailbox.
///
/// Identifiers are mailbox-stable message ids (IMAP UIDs rendered as text).
pub trait MailboxSession: Send {
    /// Ids of messages whose Subject contains `needle`.
    fn search_subject(&mut self, needle: &str) -> Result<Vec<String>, MailboxError>;

    /// Full raw RFC 5322 content of a message.
    fn fetch(&mut self, id: &str) -> Result<Vec<u8>, MailboxError>;

    fn mark_seen(&mut self, id: &str) -> Result<(), MailboxError>;

    /// Flag the message deleted and expunge it.
    fn delete(&mut self, id: &str) -> Result<(), MailboxError>;

    fn logout(self: Box<Self>) -> Result<(), MailboxError>;
}

/// TLS or plain TCP transport under the IMAP client.
#[derive(Debug)]
pub enum ImapSessionStream {
    Tls(TlsStream<TcpStream>),
    Tcp(TcpStream),
}

impl Read for ImapSessionStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Tls(stream) => stream.read(buf),
            Self::Tcp(stream) => stream.read(buf),
        }
    }
}

impl Write for ImapSessionStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Tls(stream) => stream.write(buf),
            Self::Tcp(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Tls(stream) => stream.flush(),
            Self::Tcp(stream) => stream.flush(),
        }
    }
}

pub type ImapSession = imap::Session<ImapSessionStream>;

/// [`MailboxConnector`] backed by a real IMAP server.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImapConnector;

impl MailboxConnector for ImapConnector {
    fn connect(&self, settings: &MailboxSettings) -> Result<Box<dyn MailboxSession>, MailboxError> {
        info!(
            host = %settings.host,
            port = settings.port,
            tls = settings.use_tls,
            mailbox = %settings.mailbox,
            "imap_connecting"
        );

        let client = if settings.use_tls {
            let tls = TlsConnector::builder().build().map_err(MailboxError::Tls)?;
            imap::ClientBuilder::new(&settings.host, settings.port).connect(|domain, tcp| {
                let stream = TlsConnector::connect(&tls, domain, tcp)?;
                Ok(ImapSessionStream::Tls(stream))
            })
        } else {
            imap::ClientBuilder::new(&settings.host, settings.port)
                .connect(|_, tcp| Ok(ImapSessionStream::Tcp(tcp)))
        }
        .map_err(|source| MailboxError::Connect {
            host: settings.host.clone(),
            port: settings.port,
            source,
        })?;

        let mut session = client
            .login(&settings.username, &settings.password)
            .map_err(|(source, _)| MailboxError::Login {
                user: settings.username.clone(),
                source,
            })?;

        session
            .select(&settings.mailbox)
            .map_err(|source| MailboxError::Select {
                mailbox: settings.mailbox.clone(),
                source,
            })?;

        info!(mailbox = %settings.mailbox, "imap_connected");

        Ok(Box::new(ImapMailbox { session }))
    }
}

/// Live IMAP session on the selected mailbox.
pub struct ImapMailbox {
    session: ImapSession,
}

impl MailboxSession for ImapMailbox {
    fn search_subject(&mut self, needle: &str) -> Result<Vec<String>, MailboxError> {
        let query = subject_query(needle);
        let mut uids: Vec<u32> = self
            .session
            .uid_search(&query)
            .map_err(|source| MailboxError::Search {
                query: query.clone(),
                source,
            })?
            .into_iter()
            .collect();
        uids.sort_unstable();

        debug!(query = %query, found = uids.len(), "imap_search_complete");

        Ok(uids.into_iter().map(|uid| uid.to_string()).collect())
    }

    fn fetch(&mut self, id: &str) -> Result<Vec<u8>, MailboxError> {
        let fetches = self
            .session
            .uid_fetch(id, "RFC822")
            .map_err(|source| MailboxError::Fetch {
                id: id.to_string(),
                source,
            })?;

        fetches
            .iter()
            .find_map(|fetch| fetch.body().map(<[u8]>::to_vec))
            .ok_or_else(|| MailboxError::EmptyFetch(id.to_string()))
    }

    fn mark_seen(&mut self, id: &str) -> Result<(), MailboxError> {
        self.add_flags(id, "\\Seen")
    }

    fn delete(&mut self, id: &str) -> Result<(), MailboxError> {
        self.add_flags(id, "\\Deleted")?;
        self.session.expunge().map_err(MailboxError::Expunge)?;
        Ok(())
    }

    fn logout(mut self: Box<Self>) -> Result<(), MailboxError> {
        self.session.logout().map_err(MailboxError::Logout)
    }
}

impl ImapMailbox {
    fn add_flags(&mut self, id: &str, flags: &str) -> Result<(), MailboxError> {
        self.session
            .uid_store(id, format!("+FLAGS ({})", flags))
            .map_err(|source| MailboxError::Flags {
                id: id.to_string(),
                flags: flags.to_string(),
                source,
            })?;
        Ok(())
    }
}

/// Build an IMAP `SUBJECT` search with the needle quoted.
pub fn subject_query(needle: &str) -> String {
    let escaped = needle.replace('\\', "\\\\").replace('"', "\\\"");
    format!("SUBJECT \"{}\"", escaped)
}

/// Connect, authenticate, select and log out again.
///
/// Used by the dashboard's "test connection" action.
pub fn test_connection(
    connector: &dyn MailboxConnector,
    settings: &MailboxSettings,
) -> Result<(), MailboxError> {
    let session = connector.connect(settings)?;
    if let Err(e) = session.logout() {
        warn!(error = %e, "imap_test_logout_failed");
    }
    Ok(())
}
