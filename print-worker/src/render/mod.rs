//! Template rendering for webhook orders.

pub mod helpers;
pub mod templates;

pub use helpers::{format_currency, format_date};
pub use templates::{TemplateError, TemplateRenderer, DEFAULT_TEMPLATE_NAME};
