//! Job ledger and status reporting.

pub mod ledger;
pub mod types;

pub use ledger::JobLedger;
pub use types::{ErrorRecord, Origin, PrintJob, ServiceState, Stats, StatusSnapshot};
