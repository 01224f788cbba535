//! Control surface handlers used by the dashboard.
//!
//! Thin wrappers over [`PrintService`]; every error is mapped to a status
//! code and an `{ "error": ... }` body.

use std::path::PathBuf;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::{Config, ConfigError, ConfigOverlay};
use crate::render::TemplateError;
use crate::service::{PrintService, ServiceError};
use crate::status::{Origin, StatusSnapshot};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub service: PrintService,
}

impl AppState {
    pub fn new(service: PrintService) -> Self {
        Self { service }
    }
}

// =============================================================================
// Response Types
// =============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ActionResponse {
    pub success: bool,
    pub message: String,
}

impl ActionResponse {
    fn ok(message: impl Into<String>) -> Json<Self> {
        Json(Self {
            success: true,
            message: message.into(),
        })
    }
}

fn error_response(status: StatusCode, message: String) -> Response {
    (status, Json(ErrorResponse { error: message })).into_response()
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = match &self {
            ServiceError::NotRunning => StatusCode::CONFLICT,
            ServiceError::MissingCredentials => StatusCode::BAD_REQUEST,
            ServiceError::ArtifactNotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::Config(ConfigError::Validation(_)) => StatusCode::BAD_REQUEST,
            ServiceError::Mailbox(_) => StatusCode::BAD_REQUEST,
            ServiceError::Print(_) | ServiceError::Config(_) | ServiceError::Worker(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        warn!(status = status.as_u16(), error = %self, "control_request_failed");
        error_response(status, self.to_string())
    }
}

impl IntoResponse for TemplateError {
    fn into_response(self) -> Response {
        let status = match &self {
            TemplateError::NotFound(_) => StatusCode::NOT_FOUND,
            TemplateError::InvalidName(_) => StatusCode::BAD_REQUEST,
            TemplateError::Render { .. } | TemplateError::Io { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        error_response(status, self.to_string())
    }
}

// =============================================================================
// Health Check
// =============================================================================

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

/// Health check endpoint.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

// =============================================================================
// Service Lifecycle
// =============================================================================

pub async fn get_status(State(state): State<AppState>) -> Json<StatusSnapshot> {
    Json(state.service.snapshot())
}

pub async fn start_service(State(state): State<AppState>) -> Result<Json<ActionResponse>, ServiceError> {
    let message = if state.service.start().await? {
        "Service started"
    } else {
        "Service already running"
    };
    Ok(ActionResponse::ok(message))
}

pub async fn stop_service(State(state): State<AppState>) -> Json<ActionResponse> {
    let message = if state.service.stop().await {
        "Service stopped"
    } else {
        "Service was not running"
    };
    ActionResponse::ok(message)
}

pub async fn manual_check(State(state): State<AppState>) -> Result<Json<ActionResponse>, ServiceError> {
    state.service.trigger_now()?;
    Ok(ActionResponse::ok("Inbox check triggered"))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ClearCacheResponse {
    pub success: bool,
    pub message: String,
    pub removed: usize,
}

pub async fn clear_cache(State(state): State<AppState>) -> Result<Json<ClearCacheResponse>, ServiceError> {
    let removed = state.service.clear_cache().await?;
    info!(removed = removed, "cache_cleared_manually");
    Ok(Json(ClearCacheResponse {
        success: true,
        message: "Cache cleared successfully".to_string(),
        removed,
    }))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReprintRequest {
    #[serde(default)]
    pub temp_file: Option<PathBuf>,
    #[serde(default = "default_origin", alias = "source")]
    pub origin: Origin,
}

fn default_origin() -> Origin {
    Origin::Mailbox
}

pub async fn reprint(
    State(state): State<AppState>,
    Json(request): Json<ReprintRequest>,
) -> Result<Json<ActionResponse>, ServiceError> {
    let artifact = request
        .temp_file
        .ok_or_else(|| ServiceError::ArtifactNotFound(PathBuf::new()))?;
    state.service.reprint(artifact, request.origin).await?;
    Ok(ActionResponse::ok("Job reprinted successfully"))
}

// =============================================================================
// Configuration
// =============================================================================

pub async fn get_config(State(state): State<AppState>) -> Json<Config> {
    Json(state.service.config_view())
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ConfigUpdateResponse {
    pub success: bool,
    pub message: String,
    pub config: Config,
}

pub async fn update_config(
    State(state): State<AppState>,
    Json(overlay): Json<ConfigOverlay>,
) -> Result<Json<ConfigUpdateResponse>, ServiceError> {
    let config = state.service.update_config(overlay).await?;
    Ok(Json(ConfigUpdateResponse {
        success: true,
        message: "Configuration saved successfully".to_string(),
        config,
    }))
}

/// Accepts an optional JSON overlay with unsaved settings.
pub async fn test_connection(State(state): State<AppState>, body: Bytes) -> Response {
    let overlay = if body.iter().all(u8::is_ascii_whitespace) {
        None
    } else {
        match serde_json::from_slice::<ConfigOverlay>(&body) {
            Ok(overlay) => Some(overlay),
            Err(e) => return error_response(StatusCode::BAD_REQUEST, e.to_string()),
        }
    };

    match state.service.test_connection(overlay).await {
        Ok(()) => ActionResponse::ok("Connection successful").into_response(),
        Err(e) => e.into_response(),
    }
}

// =============================================================================
// Templates
// =============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct TemplateList {
    pub templates: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TemplateContent {
    #[serde(default)]
    pub name: String,
    pub content: String,
}

pub async fn list_templates(State(state): State<AppState>) -> Result<Json<TemplateList>, TemplateError> {
    let templates = state.service.pipeline().templates().list()?;
    Ok(Json(TemplateList { templates }))
}

pub async fn get_template(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<TemplateContent>, TemplateError> {
    let content = state.service.pipeline().templates().load(&name)?;
    Ok(Json(TemplateContent { name, content }))
}

pub async fn save_template(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(body): Json<TemplateContent>,
) -> Result<Json<TemplateContent>, TemplateError> {
    let name = state.service.pipeline().templates().save(&name, &body.content)?;
    Ok(Json(TemplateContent {
        name,
        content: body.content,
    }))
}
