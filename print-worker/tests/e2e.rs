//! End-to-end flows through the mailbox poller and the HTTP surface, with an
//! in-memory mailbox and a recording printer.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

use flowprint::mail::{DedupLedger, MailboxConnector, MailboxError, MailboxSession, MailboxSettings};
use flowprint::pipeline::{OUTCOME_AUTO_PRINTED, OUTCOME_FAILED};
use flowprint::poller::{poll_once, MessageOutcome};
use flowprint::print::{DocumentStore, PrintError, PrintOptions, Printer};
use flowprint::render::TemplateRenderer;
use flowprint::web::{sign_body, SIGNATURE_HEADER};
use flowprint::{
    router, AppState, Config, OperationMode, Origin, PollerSignal, PrintPipeline, PrintService,
};

const WEBHOOK_SECRET: &str = "shpss_test_secret";

// =============================================================================
// Fakes
// =============================================================================

#[derive(Default)]
struct MailboxState {
    messages: BTreeMap<String, Vec<u8>>,
    failing_fetch: HashSet<String>,
    seen: Vec<String>,
    deleted: Vec<String>,
    connects: usize,
    refusing: bool,
}

#[derive(Clone, Default)]
struct FakeMailbox {
    state: Arc<Mutex<MailboxState>>,
}

impl FakeMailbox {
    fn add(&self, id: &str, subject: &str, html: &str) {
        let raw = format!(
            "Subject: {}\r\nContent-Type: text/html; charset=utf-8\r\n\r\n{}",
            subject, html
        );
        self.state
            .lock()
            .unwrap()
            .messages
            .insert(id.to_string(), raw.into_bytes());
    }

    fn fail_fetch(&self, id: &str, failing: bool) {
        let mut state = self.state.lock().unwrap();
        if failing {
            state.failing_fetch.insert(id.to_string());
        } else {
            state.failing_fetch.remove(id);
        }
    }

    fn refuse_connections(&self) {
        self.state.lock().unwrap().refusing = true;
    }

    fn seen(&self) -> Vec<String> {
        self.state.lock().unwrap().seen.clone()
    }

    fn deleted(&self) -> Vec<String> {
        self.state.lock().unwrap().deleted.clone()
    }
}

impl MailboxConnector for FakeMailbox {
    fn connect(&self, _settings: &MailboxSettings) -> Result<Box<dyn MailboxSession>, MailboxError> {
        let mut state = self.state.lock().unwrap();
        state.connects += 1;
        if state.refusing {
            return Err(MailboxError::Other("refused".to_string()));
        }
        Ok(Box::new(FakeSession {
            state: Arc::clone(&self.state),
        }))
    }
}

struct FakeSession {
    state: Arc<Mutex<MailboxState>>,
}

impl MailboxSession for FakeSession {
    fn search_subject(&mut self, needle: &str) -> Result<Vec<String>, MailboxError> {
        let needle = needle.to_uppercase();
        let state = self.state.lock().unwrap();
        Ok(state
            .messages
            .iter()
            .filter(|(_, raw)| String::from_utf8_lossy(raw).to_uppercase().contains(&needle))
            .map(|(id, _)| id.clone())
            .collect())
    }

    fn fetch(&mut self, id: &str) -> Result<Vec<u8>, MailboxError> {
        let state = self.state.lock().unwrap();
        if state.failing_fetch.contains(id) {
            return Err(MailboxError::Other("connection reset".to_string()));
        }
        state
            .messages
            .get(id)
            .cloned()
            .ok_or_else(|| MailboxError::EmptyFetch(id.to_string()))
    }

    fn mark_seen(&mut self, id: &str) -> Result<(), MailboxError> {
        self.state.lock().unwrap().seen.push(id.to_string());
        Ok(())
    }

    fn delete(&mut self, id: &str) -> Result<(), MailboxError> {
        let mut state = self.state.lock().unwrap();
        state.messages.remove(id);
        state.deleted.push(id.to_string());
        Ok(())
    }

    fn logout(self: Box<Self>) -> Result<(), MailboxError> {
        Ok(())
    }
}

#[derive(Clone, Default)]
struct FakePrinter {
    calls: Arc<Mutex<Vec<(PathBuf, PrintOptions)>>>,
    failing: Arc<AtomicBool>,
}

impl FakePrinter {
    fn calls(&self) -> Vec<(PathBuf, PrintOptions)> {
        self.calls.lock().unwrap().clone()
    }

    fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl Printer for FakePrinter {
    fn print(&self, document: &Path, options: &PrintOptions) -> Result<(), PrintError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(PrintError::BrowserNotFound);
        }
        self.calls
            .lock()
            .unwrap()
            .push((document.to_path_buf(), options.clone()));
        Ok(())
    }
}

// =============================================================================
// Harness
// =============================================================================

struct Harness {
    _dir: TempDir,
    config: Config,
    pipeline: Arc<PrintPipeline>,
    mailbox: FakeMailbox,
    printer: FakePrinter,
    signal: PollerSignal,
}

impl Harness {
    fn new(configure: impl FnOnce(&mut Config)) -> Self {
        let dir = TempDir::new().unwrap();

        let mut config = Config {
            imap_username: "orders@example.com".to_string(),
            imap_password: "app-password".to_string(),
            printed_uids_file: dir.path().join("printed_uids.txt"),
            templates_dir: dir.path().join("print_templates"),
            webhook_enabled: true,
            webhook_secret: WEBHOOK_SECRET.to_string(),
            operation_mode: OperationMode::EmailPrimary,
            ..Config::default()
        };
        configure(&mut config);

        let scratch = dir.path().join("scratch");
        std::fs::create_dir_all(&scratch).unwrap();

        let mailbox = FakeMailbox::default();
        let printer = FakePrinter::default();
        let pipeline = Arc::new(PrintPipeline::new(
            config.clone(),
            DedupLedger::open(&config.printed_uids_file).unwrap(),
            DocumentStore::open(dir.path().join("jobs"), scratch).unwrap(),
            TemplateRenderer::open(&config.templates_dir).unwrap(),
            Box::new(printer.clone()),
            Box::new(mailbox.clone()),
        ));

        let signal = PollerSignal::new();
        signal.set_running(true);

        Self {
            _dir: dir,
            config,
            pipeline,
            mailbox,
            printer,
            signal,
        }
    }

    fn poll(&self) -> flowprint::poller::CycleReport {
        poll_once(&self.pipeline, &self.config, &self.signal).unwrap()
    }

    fn service(&self) -> PrintService {
        PrintService::new(Arc::clone(&self.pipeline))
    }

    fn app(&self) -> Router {
        router(AppState::new(self.service()))
    }

    fn jobs_dir_entries(&self) -> usize {
        std::fs::read_dir(self.pipeline.store().jobs_dir())
            .unwrap()
            .count()
    }
}

fn order_payload() -> Vec<u8> {
    serde_json::to_vec(&json!({
        "name": "#1001",
        "currency": "USD",
        "line_items": [
            {"name": "Widget", "quantity": 2, "price": "9.99"}
        ]
    }))
    .unwrap()
}

fn webhook_request(body: Vec<u8>, signature: Option<String>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/webhooks/shopify")
        .header("content-type", "application/json")
        .header("x-shopify-topic", "orders/create");
    if let Some(signature) = signature {
        builder = builder.header(SIGNATURE_HEADER, signature);
    }
    builder.body(Body::from(body)).unwrap()
}

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

// =============================================================================
// Mailbox flow
// =============================================================================

#[test]
fn test_new_message_is_printed_once() {
    let h = Harness::new(|_| {});
    h.mailbox.add(
        "101",
        "[PRINT PACK] Order 1001",
        "<html><body><p>Pick list</p></body></html>",
    );

    let report = h.poll();
    assert_eq!(report.found, 1);
    assert_eq!(report.count(MessageOutcome::Printed), 1);

    let stats = h.pipeline.jobs().snapshot().stats;
    assert_eq!(stats.recent_jobs.len(), 1);
    assert_eq!(stats.jobs_processed, 1);

    let job = &stats.recent_jobs[0];
    assert_eq!(job.origin, Origin::Mailbox);
    assert_eq!(job.outcome, OUTCOME_AUTO_PRINTED);
    assert!(job.succeeded);
    assert!(job.can_reprint);

    let artifact = job.artifact.clone().unwrap();
    assert!(std::fs::read_to_string(&artifact).unwrap().contains("Pick list"));

    assert!(h.pipeline.dedup().contains("101"));
    assert_eq!(h.pipeline.dedup().len(), 1);
    assert_eq!(h.mailbox.seen(), vec!["101".to_string()]);
    assert_eq!(h.printer.calls().len(), 1);

    // Second cycle finds the message again but does not print it.
    let report = h.poll();
    assert_eq!(report.found, 1);
    assert_eq!(report.pending, 0);
    assert_eq!(h.printer.calls().len(), 1);
}

#[test]
fn test_ledger_survives_restart() {
    let h = Harness::new(|_| {});
    h.mailbox.add("7", "[PRINT PACK] Order 7", "<p>seven</p>");
    h.poll();

    let reopened = DedupLedger::open(&h.config.printed_uids_file).unwrap();
    assert!(reopened.contains("7"));
}

#[test]
fn test_fetch_failure_is_retried_next_cycle() {
    let h = Harness::new(|_| {});
    h.mailbox.add("102", "[PRINT PACK] Order 1002", "<p>retry</p>");
    h.mailbox.fail_fetch("102", true);

    let report = h.poll();
    assert_eq!(report.count(MessageOutcome::FetchFailed), 1);
    assert!(!h.pipeline.dedup().contains("102"));

    let stats = h.pipeline.jobs().snapshot().stats;
    assert_eq!(stats.errors[0].message, "Failed to fetch UID 102");
    assert!(stats.recent_jobs.is_empty());

    h.mailbox.fail_fetch("102", false);
    let report = h.poll();
    assert_eq!(report.count(MessageOutcome::Printed), 1);
    assert!(h.pipeline.dedup().contains("102"));
}

#[test]
fn test_subject_without_prefix_is_skipped_and_ledgered() {
    let h = Harness::new(|_| {});
    h.mailbox.add("103", "Fwd: [PRINT PACK] Order 1003", "<p>forwarded</p>");

    let report = h.poll();
    assert_eq!(report.count(MessageOutcome::Skipped), 1);
    assert!(h.pipeline.dedup().contains("103"));
    assert!(h.printer.calls().is_empty());
    assert!(h.pipeline.jobs().snapshot().stats.recent_jobs.is_empty());
}

#[test]
fn test_print_failure_is_recorded_and_not_retried() {
    let h = Harness::new(|_| {});
    h.printer.set_failing(true);
    h.mailbox.add("104", "[PRINT PACK] Order 1004", "<p>jammed</p>");

    let report = h.poll();
    assert_eq!(report.count(MessageOutcome::PrintFailed), 1);
    assert!(h.pipeline.dedup().contains("104"));

    let stats = h.pipeline.jobs().snapshot().stats;
    assert_eq!(stats.jobs_processed, 0);
    assert_eq!(stats.recent_jobs[0].outcome, OUTCOME_FAILED);
    assert!(!stats.recent_jobs[0].succeeded);
    assert!(stats.errors[0].message.starts_with("Print failed"));

    h.printer.set_failing(false);
    h.poll();
    assert!(h.printer.calls().is_empty());
}

#[test]
fn test_message_deleted_after_print() {
    let h = Harness::new(|config| config.delete_email_after_print = true);
    h.mailbox.add("105", "[PRINT PACK] Order 1005", "<p>gone</p>");

    let report = h.poll();
    assert_eq!(report.count(MessageOutcome::Printed), 1);
    assert_eq!(h.mailbox.deleted(), vec!["105".to_string()]);
    assert!(h.mailbox.seen().is_empty());
}

#[test]
fn test_interactive_mode_records_dialog_outcome() {
    let h = Harness::new(|config| config.auto_print_enabled = false);
    h.mailbox.add("106", "[PRINT PACK] Order 1006", "<p>dialog</p>");
    h.poll();

    let calls = h.printer.calls();
    assert_eq!(calls[0].1.mode, flowprint::print::PrintMode::Interactive);
    let job = &h.pipeline.jobs().snapshot().stats.recent_jobs[0];
    assert_eq!(job.outcome, flowprint::pipeline::OUTCOME_DIALOG_OPENED);
}

#[test]
fn test_stopped_signal_interrupts_cycle() {
    let h = Harness::new(|_| {});
    h.mailbox.add("1", "[PRINT PACK] One", "<p>1</p>");
    h.mailbox.add("2", "[PRINT PACK] Two", "<p>2</p>");
    h.signal.set_running(false);

    let report = h.poll();
    assert_eq!(report.pending, 2);
    assert!(report.outcomes.is_empty());
    assert!(h.pipeline.dedup().is_empty());
}

// =============================================================================
// Webhook flow
// =============================================================================

#[tokio::test]
async fn test_signed_webhook_is_rendered_and_printed() {
    let h = Harness::new(|_| {});
    let body = order_payload();
    let signature = sign_body(&body, WEBHOOK_SECRET);

    let response = h
        .app()
        .oneshot(webhook_request(body, Some(signature)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let receipt = body_json(response).await;
    assert_eq!(receipt["success"], true);
    assert_eq!(receipt["order"], "#1001");

    let stats = h.pipeline.jobs().snapshot().stats;
    assert_eq!(stats.recent_jobs.len(), 1);
    let job = &stats.recent_jobs[0];
    assert_eq!(job.origin, Origin::Webhook);
    assert_eq!(job.label, "Order #1001");

    let html = std::fs::read_to_string(job.artifact.as_ref().unwrap()).unwrap();
    assert!(html.contains("Widget"));
    assert!(html.contains("<strong>2</strong>"));
    assert!(html.contains("$9.99"));
    assert!(html.contains("$19.98"));

    let calls = h.printer.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(
        calls[0].1.wait.as_secs(),
        h.config.webhook_print_wait_seconds
    );
}

#[tokio::test]
async fn test_invalid_signature_is_rejected() {
    let h = Harness::new(|_| {});
    let body = order_payload();
    let signature = sign_body(&body, "some-other-secret");

    let response = h
        .app()
        .oneshot(webhook_request(body, Some(signature)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let stats = h.pipeline.jobs().snapshot().stats;
    assert!(stats.recent_jobs.is_empty());
    assert_eq!(stats.errors[0].message, "Webhook rejected: invalid signature");
    assert_eq!(h.jobs_dir_entries(), 0);
    assert!(h.printer.calls().is_empty());
}

#[tokio::test]
async fn test_missing_signature_is_rejected() {
    let h = Harness::new(|_| {});

    let response = h
        .app()
        .oneshot(webhook_request(order_payload(), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_malformed_payload_is_bad_request() {
    let h = Harness::new(|_| {});
    let body = b"{not json".to_vec();
    let signature = sign_body(&body, WEBHOOK_SECRET);

    let response = h
        .app()
        .oneshot(webhook_request(body, Some(signature)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(h.jobs_dir_entries(), 0);
}

#[tokio::test]
async fn test_missing_template_fails_without_job() {
    let h = Harness::new(|config| config.webhook_template = "missing.html".to_string());
    let body = order_payload();
    let signature = sign_body(&body, WEBHOOK_SECRET);

    let response = h
        .app()
        .oneshot(webhook_request(body, Some(signature)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let stats = h.pipeline.jobs().snapshot().stats;
    assert!(stats.recent_jobs.is_empty());
    assert!(stats.errors[0].message.contains("missing.html"));
    assert_eq!(h.jobs_dir_entries(), 0);
    assert!(h.printer.calls().is_empty());
}

#[tokio::test]
async fn test_webhook_disabled_in_email_only_mode() {
    let h = Harness::new(|config| config.operation_mode = OperationMode::EmailOnly);
    let body = order_payload();
    let signature = sign_body(&body, WEBHOOK_SECRET);

    let response = h
        .app()
        .oneshot(webhook_request(body, Some(signature)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert!(h.printer.calls().is_empty());
}

// =============================================================================
// Control surface
// =============================================================================

#[tokio::test]
async fn test_reprint_until_evicted() {
    let h = Harness::new(|_| {});
    let service = h.service();
    let app = router(AppState::new(service.clone()));

    let body = order_payload();
    let signature = sign_body(&body, WEBHOOK_SECRET);
    let response = app
        .clone()
        .oneshot(webhook_request(body, Some(signature)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let artifact = h.pipeline.jobs().snapshot().stats.recent_jobs[0]
        .artifact
        .clone()
        .unwrap();
    let reprint = json!({"temp_file": artifact, "origin": "webhook"});

    let response = app
        .clone()
        .oneshot(json_request("POST", "/api/reprint", reprint.clone()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(h.printer.calls().len(), 2);
    // Reprints do not add jobs.
    assert_eq!(h.pipeline.jobs().snapshot().stats.recent_jobs.len(), 1);

    let removed = service.clear_cache().await.unwrap();
    assert_eq!(removed, 1);
    assert!(!artifact.exists());
    assert!(!h.pipeline.jobs().snapshot().stats.recent_jobs[0].can_reprint);

    let response = app
        .oneshot(json_request("POST", "/api/reprint", reprint))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(h.printer.calls().len(), 2);
}

#[tokio::test]
async fn test_reprint_outside_jobs_dir_is_not_found() {
    let h = Harness::new(|_| {});
    let outside = h.config.printed_uids_file.clone();
    std::fs::write(&outside, "").unwrap();

    let response = h
        .app()
        .oneshot(json_request("POST", "/api/reprint", json!({"temp_file": outside})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert!(h.printer.calls().is_empty());
}

#[tokio::test]
async fn test_manual_check_requires_running_service() {
    let h = Harness::new(|_| {});

    let response = h
        .app()
        .oneshot(json_request("POST", "/api/manual-check", json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_start_requires_credentials() {
    let h = Harness::new(|config| config.imap_password.clear());

    let response = h
        .app()
        .oneshot(json_request("POST", "/api/start", json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(!h.service().is_running());
}

#[tokio::test]
async fn test_connect_failure_backs_off_until_stopped() {
    let h = Harness::new(|_| {});
    h.mailbox.refuse_connections();
    let service = h.service();

    assert!(service.start().await.unwrap());

    let reconnecting = async {
        loop {
            if service.snapshot().status == "IMAP error - Reconnecting..." {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(5), reconnecting)
        .await
        .unwrap();

    let stats = service.snapshot().stats;
    assert_eq!(stats.errors[0].message, "IMAP error: refused");
    assert!(stats.recent_jobs.is_empty());

    // The backoff sleep is cut short by stop.
    let stopped = tokio::time::timeout(Duration::from_secs(2), service.stop())
        .await
        .unwrap();
    assert!(stopped);
    assert_eq!(service.snapshot().status, "Stopped");
    assert_eq!(h.mailbox.state.lock().unwrap().connects, 1);
}

#[tokio::test]
async fn test_start_and_stop_service() {
    let h = Harness::new(|config| config.operation_mode = OperationMode::WebhookOnly);
    let service = h.service();

    assert!(service.start().await.unwrap());
    assert!(!service.start().await.unwrap());
    assert!(service.is_running());
    assert!(service.trigger_now().is_ok());

    assert!(service.stop().await);
    assert!(!service.is_running());

    let snapshot = service.snapshot();
    assert!(!snapshot.running);
    assert_eq!(snapshot.status, "Stopped");
}

#[tokio::test]
async fn test_status_endpoint() {
    let h = Harness::new(|_| {});

    let response = h
        .app()
        .oneshot(Request::get("/api/status").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let status = body_json(response).await;
    assert_eq!(status["running"], false);
    assert_eq!(status["status"], "Stopped");
    assert_eq!(status["stats"]["jobs_processed"], 0);
}

#[tokio::test]
async fn test_config_masks_secrets_and_validates_updates() {
    let h = Harness::new(|_| {});
    let app = h.app();

    let response = app
        .clone()
        .oneshot(Request::get("/api/config").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let config = body_json(response).await;
    assert_eq!(config["imap_password"], "***");
    assert_eq!(config["webhook_secret"], "***");

    let response = app
        .clone()
        .oneshot(json_request("POST", "/api/config", json!({"poll_interval_seconds": 0})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .oneshot(json_request("POST", "/api/config", json!({"poll_interval_seconds": 60})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(h.pipeline.config().poll_interval_seconds, 60);
    assert_eq!(h.pipeline.config().imap_password, "app-password");
}

#[tokio::test]
async fn test_template_endpoints() {
    let h = Harness::new(|_| {});
    let app = h.app();

    let response = app
        .clone()
        .oneshot(json_request(
            "PUT",
            "/api/templates/custom",
            json!({"content": "<p>{{order.name}}</p>"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["name"], "custom.html");

    let response = app
        .clone()
        .oneshot(Request::get("/api/templates").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let list = body_json(response).await;
    assert_eq!(
        list["templates"],
        json!(["custom.html", "default_packing_slip.html"])
    );

    let response = app
        .oneshot(
            Request::get("/api/templates/missing.html")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_health() {
    let h = Harness::new(|_| {});

    let response = h
        .app()
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], "ok");
}
