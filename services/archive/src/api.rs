use crate::archive::RecordingArchive;
use crate::config::ApiConfig;
use crate::error::ArchiveError;
use crate::filter_compiler::SearchFilters;
use crate::metadata_store::Page;
use crate::recording::{NewRecording, Recording};
use crate::s3_uploader::AudioUpload;
use anyhow::{Context, Result};
use axum::{
    extract::{DefaultBodyLimit, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, instrument, warn};

/// Largest page a client may request
const MAX_LIMIT: i64 = 500;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub archive: RecordingArchive,
}

/// Paging parameters for the recording list
#[derive(Debug, Deserialize)]
pub struct PageQuery {
    /// Maximum results
    #[serde(default = "default_limit")]
    pub limit: i64,
    /// Offset for pagination
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    50
}

/// Recording list response
#[derive(Debug, Serialize)]
pub struct RecordingListResponse {
    pub recordings: Vec<Recording>,
    pub has_more: bool,
}

/// Playback link for a recording
#[derive(Debug, Serialize)]
pub struct PlaybackResponse {
    pub id: i64,
    pub url: String,
}

/// Body of a create request: recording fields plus optional audio
#[derive(Debug, Deserialize)]
pub struct CreateRecordingRequest {
    #[serde(flatten)]
    pub recording: NewRecording,
    pub audio: Option<AudioPayload>,
}

/// Audio carried inline in a create request
#[derive(Debug, Deserialize)]
pub struct AudioPayload {
    pub data_base64: String,
    #[serde(default = "default_audio_format")]
    pub format: String,
}

fn default_audio_format() -> String {
    "mp3".to_string()
}

impl AudioPayload {
    fn decode(self) -> Result<AudioUpload, base64::DecodeError> {
        let data = STANDARD.decode(self.data_base64.trim())?;
        Ok(AudioUpload::new(data, self.format))
    }
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn error_response(status: StatusCode, error: &str, code: &str) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
            code: code.to_string(),
        }),
    )
}

/// Map a failed archive call to a generic API error
fn archive_error(err: ArchiveError, store_code: &str) -> ApiError {
    warn!(error = %err, "Request failed");

    match err {
        ArchiveError::MissingMediaLocation => error_response(
            StatusCode::BAD_REQUEST,
            "Recording requires audio or a media location",
            err.code(),
        ),
        ArchiveError::Upload(_) => {
            error_response(StatusCode::BAD_GATEWAY, "Failed to store audio", err.code())
        }
        ArchiveError::Store(_) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Recording archive request failed",
            store_code,
        ),
    }
}

fn not_found() -> ApiError {
    error_response(StatusCode::NOT_FOUND, "Recording not found", "NOT_FOUND")
}

/// Create the API router
pub fn create_router(state: AppState, config: &ApiConfig) -> Router {
    let cors = if config.cors_enabled {
        if config.cors_origins.is_empty() {
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        } else {
            let origins: Vec<_> = config
                .cors_origins
                .iter()
                .filter_map(|o| o.parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods(Any)
                .allow_headers(Any)
        }
    } else {
        CorsLayer::new()
    };

    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route(
            "/api/v1/recordings",
            get(list_recordings).post(create_recording),
        )
        .route("/api/v1/recordings/:id", get(get_recording))
        .route("/api/v1/recordings/:id/playback", get(get_playback_url))
        .layer(DefaultBodyLimit::max(config.max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "archive-service"
    }))
}

/// Readiness check endpoint
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.archive.ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "ready",
                "database": "connected"
            })),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "status": "not_ready",
                "database": "disconnected",
                "error": e.to_string()
            })),
        ),
    }
}

/// List recordings matching the query-string filters
#[instrument(skip(state))]
async fn list_recordings(
    State(state): State<AppState>,
    Query(filters): Query<SearchFilters>,
    Query(paging): Query<PageQuery>,
) -> Result<Json<RecordingListResponse>, ApiError> {
    let limit = paging.limit.clamp(1, MAX_LIMIT);
    let page = Page {
        limit: limit + 1, // Fetch one extra to check has_more
        offset: paging.offset.max(0),
    };

    let mut recordings = state
        .archive
        .search(&filters.normalized(), Some(page))
        .await
        .map_err(|e| archive_error(e, "QUERY_ERROR"))?;

    let has_more = recordings.len() > limit as usize;
    if has_more {
        recordings.pop();
    }

    Ok(Json(RecordingListResponse {
        recordings,
        has_more,
    }))
}

/// Get a single recording
#[instrument(skip(state))]
async fn get_recording(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Recording>, ApiError> {
    state
        .archive
        .get(id)
        .await
        .map_err(|e| archive_error(e, "QUERY_ERROR"))?
        .map(Json)
        .ok_or_else(not_found)
}

/// Get a playable URL for a recording
#[instrument(skip(state))]
async fn get_playback_url(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<PlaybackResponse>, ApiError> {
    let url = state
        .archive
        .playback_url(id)
        .await
        .map_err(|e| archive_error(e, "QUERY_ERROR"))?
        .ok_or_else(not_found)?;

    Ok(Json(PlaybackResponse { id, url }))
}

/// Add a recording, uploading inline audio first when present
#[instrument(skip(state, request))]
async fn create_recording(
    State(state): State<AppState>,
    Json(request): Json<CreateRecordingRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let audio = request
        .audio
        .map(AudioPayload::decode)
        .transpose()
        .map_err(|e| {
            warn!(error = %e, "Rejected audio payload");
            error_response(StatusCode::BAD_REQUEST, "Audio is not valid base64", "INVALID_AUDIO")
        })?;

    state
        .archive
        .add_recording(request.recording, audio)
        .await
        .map_err(|e| archive_error(e, "INSERT_ERROR"))?;

    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({ "status": "created" })),
    ))
}

/// Start the API server
pub async fn start_api_server(state: AppState, config: &ApiConfig) -> Result<()> {
    let router = create_router(state, config);
    let addr = format!("{}:{}", config.host, config.port);

    info!(address = %addr, "Starting recording archive API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, router)
        .await
        .context("API server error")?;

    Ok(())
}
