//! Shopify order webhook receiver.
//!
//! Verify, parse, render, store and print, in that order. The signature is
//! checked against the raw body before anything is parsed.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};

use crate::pipeline::{print_settings, PrintPipeline};
use crate::print::{PrintError, PrintMode, StoreError};
use crate::render::TemplateError;
use crate::status::Origin;
use crate::web::handlers::{AppState, ErrorResponse};
use crate::web::signature::{verify_webhook_signature, SIGNATURE_HEADER};

const UNKNOWN_ORDER: &str = "unknown";

#[derive(Error, Debug)]
pub enum WebhookError {
    #[error("Webhooks are disabled")]
    Disabled,

    #[error("Invalid webhook signature")]
    SignatureInvalid,

    #[error("Invalid order payload: {0}")]
    MalformedPayload(#[source] serde_json::Error),

    #[error("Template rendering failed: {0}")]
    Render(#[from] TemplateError),

    #[error("Failed to store document: {0}")]
    Store(#[from] StoreError),

    #[error("Print failed: {0}")]
    Print(#[from] PrintError),

    #[error("Webhook worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

impl WebhookError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Disabled => StatusCode::FORBIDDEN,
            Self::SignatureInvalid => StatusCode::UNAUTHORIZED,
            Self::MalformedPayload(_) => StatusCode::BAD_REQUEST,
            Self::Render(_) | Self::Store(_) | Self::Print(_) | Self::Worker(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        (
            self.status_code(),
            Json(ErrorResponse {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}

/// Successful webhook response.
#[derive(Debug, Serialize, Deserialize)]
pub struct OrderReceipt {
    pub success: bool,
    pub order: String,
    pub message: String,
}

/// Handle one webhook delivery. Blocking: printing may wait for the spool
/// window.
pub fn receive_order(
    pipeline: &PrintPipeline,
    body: &[u8],
    signature: Option<&str>,
) -> Result<OrderReceipt, WebhookError> {
    let config = pipeline.config();
    let jobs = pipeline.jobs();

    if !config.webhook_active() {
        warn!(
            webhook_enabled = config.webhook_enabled,
            operation_mode = ?config.operation_mode,
            "webhook_disabled"
        );
        return Err(WebhookError::Disabled);
    }

    if !verify_webhook_signature(body, signature, Some(config.webhook_secret.as_str())) {
        warn!(body_length = body.len(), "webhook_signature_invalid");
        jobs.record_error("Webhook rejected: invalid signature");
        return Err(WebhookError::SignatureInvalid);
    }

    let order: Value = serde_json::from_slice(body).map_err(|e| {
        jobs.record_error(format!("Webhook rejected: invalid JSON: {}", e));
        WebhookError::MalformedPayload(e)
    })?;
    let order_name = order_name(&order);

    info!(order = %order_name, template = %config.webhook_template, "webhook_order_received");

    let html = pipeline
        .templates()
        .render(&config.webhook_template, &order)
        .map_err(|e| {
            jobs.record_error(format!("Webhook order {}: {}", order_name, e));
            WebhookError::from(e)
        })?;

    let artifact_label = format!("webhook_{}", order_name.trim_start_matches('#'));
    let artifact = pipeline.store().store(&artifact_label, &html).map_err(|e| {
        jobs.record_error(format!("Webhook order {}: {}", order_name, e));
        WebhookError::from(e)
    })?;

    let options = print_settings(&config, Origin::Webhook);
    pipeline.print_job(&format!("Order {}", order_name), &artifact, Origin::Webhook, &options)?;

    let message = match options.mode {
        PrintMode::Unattended => "Order printed",
        PrintMode::Interactive => "Print dialog opened",
    };

    Ok(OrderReceipt {
        success: true,
        order: order_name,
        message: message.to_string(),
    })
}

/// `name` (e.g. `#1001`), else `order_number`, else `id`.
fn order_name(order: &Value) -> String {
    ["name", "order_number", "id"]
        .iter()
        .filter_map(|key| order.get(*key))
        .find_map(|value| match value {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
        .unwrap_or_else(|| UNKNOWN_ORDER.to_string())
}

/// `POST /webhooks/shopify`
pub async fn shopify_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let topic = headers
        .get("x-shopify-topic")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();

    info!(
        body_length = body.len(),
        has_signature = signature.is_some(),
        topic = %topic,
        "shopify_webhook_received"
    );

    let pipeline = Arc::clone(state.service.pipeline());
    let result =
        tokio::task::spawn_blocking(move || receive_order(&pipeline, &body, signature.as_deref()))
            .await
            .map_err(WebhookError::from)
            .and_then(|r| r);

    match result {
        Ok(receipt) => {
            info!(order = %receipt.order, "shopify_webhook_processed");
            (StatusCode::OK, Json(receipt)).into_response()
        }
        Err(e) => e.into_response(),
    }
}
