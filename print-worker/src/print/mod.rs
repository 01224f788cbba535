//! Artifact storage and browser printing.

pub mod dispatcher;
pub mod store;

pub use dispatcher::{
    inject_print_script, ChromePrinter, PrintError, PrintMode, PrintOptions, Printer,
};
pub use store::{DocumentStore, StoreError};
