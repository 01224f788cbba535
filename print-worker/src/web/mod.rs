//! HTTP surface: the Shopify webhook receiver, the dashboard control API and
//! the status event stream.

pub mod events;
pub mod handlers;
pub mod signature;
pub mod webhook;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

pub use events::{status_events, STATUS_EVENT};
pub use handlers::{AppState, ErrorResponse, HealthResponse};
pub use signature::{sign_body, verify_webhook_signature, SIGNATURE_HEADER};
pub use webhook::{receive_order, shopify_webhook, OrderReceipt, WebhookError};

/// Build the full router with request tracing.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/webhooks/shopify", post(shopify_webhook))
        .route("/api/status", get(handlers::get_status))
        .route("/api/start", post(handlers::start_service))
        .route("/api/stop", post(handlers::stop_service))
        .route("/api/manual-check", post(handlers::manual_check))
        .route("/api/clear-cache", post(handlers::clear_cache))
        .route("/api/reprint", post(handlers::reprint))
        .route(
            "/api/config",
            get(handlers::get_config).post(handlers::update_config),
        )
        .route("/api/test-connection", post(handlers::test_connection))
        .route("/api/templates", get(handlers::list_templates))
        .route(
            "/api/templates/:name",
            get(handlers::get_template).put(handlers::save_template),
        )
        .route("/api/events", get(status_events))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
