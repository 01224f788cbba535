//! Formatting helpers exposed to templates.
//!
//! Every helper returns a JSON value, so the registry escapes its output
//! like any other interpolation.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use handlebars::{handlebars_helper, Handlebars};
use serde_json::Value;
use std::fmt::Write;

pub const DEFAULT_CURRENCY: &str = "USD";
pub const DEFAULT_DATE_FORMAT: &str = "%B %d, %Y";

/// Register all helpers on `registry`.
pub fn register(registry: &mut Handlebars<'_>) {
    registry.register_helper("format_currency", Box::new(format_currency_helper));
    registry.register_helper("format_date", Box::new(format_date_helper));
    registry.register_helper("multiply", Box::new(multiply_helper));
    registry.register_helper("is_positive", Box::new(is_positive_helper));
    registry.register_helper("title_case", Box::new(title_case_helper));
}

// {{format_currency amount [currency]}}
handlebars_helper!(format_currency_helper: |*args| {
    let amount = args.first().copied().unwrap_or(&Value::Null);
    let currency = args.get(1).and_then(|v| v.as_str()).unwrap_or(DEFAULT_CURRENCY);
    format_currency(amount, currency)
});

// {{format_date value [pattern]}}
handlebars_helper!(format_date_helper: |*args| {
    let value = args.first().copied().unwrap_or(&Value::Null);
    let pattern = args.get(1).and_then(|v| v.as_str()).unwrap_or(DEFAULT_DATE_FORMAT);
    format_date(value, pattern)
});

handlebars_helper!(multiply_helper: |a: Json, b: Json| {
    match (as_number(a), as_number(b)) {
        (Some(a), Some(b)) => Value::from(a * b),
        _ => Value::Null,
    }
});

handlebars_helper!(is_positive_helper: |x: Json| as_number(x).map_or(false, |n| n > 0.0));

handlebars_helper!(title_case_helper: |x: Json| title_case(&plain_string(x)));

pub fn currency_symbol(code: &str) -> &str {
    match code {
        "USD" => "$",
        "EUR" => "€",
        "GBP" => "£",
        "AUD" => "A$",
        other => other,
    }
}

/// `9.99` + `USD` → `$9.99`. Unknown codes are used verbatim as the
/// symbol; a non-numeric amount is returned as-is.
pub fn format_currency(amount: &Value, currency: &str) -> String {
    match as_number(amount) {
        Some(n) => format!("{}{:.2}", currency_symbol(currency), n),
        None => plain_string(amount),
    }
}

/// Format an ISO-8601 timestamp with a strftime pattern, falling back to
/// the raw value when it does not parse.
pub fn format_date(value: &Value, pattern: &str) -> String {
    let raw = plain_string(value);
    let Some(parsed) = parse_timestamp(&raw) else {
        return raw;
    };

    let mut out = String::new();
    match write!(out, "{}", parsed.format(pattern)) {
        Ok(()) => out,
        Err(_) => raw,
    }
}

fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.naive_local());
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(dt);
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

/// Capitalize each whitespace-separated word, lowercasing the rest.
pub fn title_case(value: &str) -> String {
    value
        .split(' ')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

/// Numbers and numeric strings, as order payloads carry prices as strings.
fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn plain_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
