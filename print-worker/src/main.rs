//! FlowPrint server.
//!
//! Runs the mailbox poller and the HTTP surface (webhook receiver, control
//! API, status stream) in one process.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::{net::TcpListener, signal};
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use flowprint::mail::{DedupLedger, ImapConnector};
use flowprint::print::{ChromePrinter, DocumentStore};
use flowprint::render::TemplateRenderer;
use flowprint::{router, AppState, Config, OperationMode, PrintPipeline, PrintService};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize structured JSON logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().flatten_event(true))
        .init();

    info!("flowprint_starting");

    let config = Config::load().context("Failed to load configuration")?;
    info!(
        port = config.port,
        bind_address = %config.bind_address,
        operation_mode = ?config.operation_mode,
        imap_host = %config.imap_host,
        credentials_configured = config.has_credentials(),
        webhook_enabled = config.webhook_enabled,
        "config_loaded"
    );

    let dedup = DedupLedger::open(&config.printed_uids_file)
        .context("Failed to open processed message ledger")?;

    let store = DocumentStore::open_default().context("Failed to create jobs directory")?;
    let templates = TemplateRenderer::open(&config.templates_dir)
        .context("Failed to open templates directory")?;
    let printer = ChromePrinter::new(store.scratch_dir());

    let pipeline = Arc::new(PrintPipeline::new(
        config.clone(),
        dedup,
        store,
        templates,
        Box::new(printer),
        Box::new(ImapConnector),
    ));
    let service = PrintService::new(pipeline);

    if config.has_credentials() || config.operation_mode == OperationMode::WebhookOnly {
        service.start().await.context("Failed to start service")?;
    } else {
        info!("service_not_started_missing_credentials");
    }

    let app = router(AppState::new(service.clone()));

    let addr = format!("{}:{}", config.bind_address, config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    info!(address = %addr, "web_server_listening");

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    service.stop().await;

    info!("flowprint_shutdown_complete");

    Ok(())
}

/// Create a future that completes when a shutdown signal is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }

    info!("web_server_shutting_down");
}
