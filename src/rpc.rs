//! Thin RPC binding: an axum router exposing the file manager over HTTP.
//!
//! This is deliberately a binding layer, not a wire protocol definition —
//! request/response shapes are plain JSON and exist only to drive the
//! manager; nothing here encodes MEF3 semantics itself.
//!
//! The logical RPC surface is keyed by recording path, not by the internal
//! numeric `FileId` — a path is the only handle a client has before it has
//! opened anything. Since a path can itself contain `/`, every `{path}`
//! route segment below is one URL-encoded path (e.g. `/rec.mefd` becomes
//! `%2Frec.mefd`); axum percent-decodes it back to the real path before the
//! handler ever sees it.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, put};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tracing::{error, info};

use crate::error::CoreError;
use crate::manager::{FileInfo, FileManager};
use crate::types::FileId;

pub fn build_router(manager: Arc<FileManager>) -> Router {
    Router::new()
        .route("/files", get(list_files).post(open_file))
        .route("/files/{path}", delete(close_file))
        .route("/files/{path}/segment-size", put(set_segment_size))
        .route("/files/{path}/segment-count", get(segment_count))
        .route("/files/{path}/channels", put(set_channels))
        .route("/files/{path}/segments/{index}", get(get_segment))
        .route("/metrics", get(metrics))
        .route("/health", get(health))
        .layer(CorsLayer::permissive())
        .with_state(manager)
}

pub async fn serve(manager: Arc<FileManager>, bind_addr: &str, port: u16) -> std::io::Result<()> {
    let app = build_router(manager);
    let addr = format!("{bind_addr}:{port}");
    info!(%addr, "RPC listener starting");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await
}

struct ApiError(CoreError);

impl From<CoreError> for ApiError {
    fn from(e: CoreError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            CoreError::NotFound(_) | CoreError::NotOpen(_) => StatusCode::NOT_FOUND,
            CoreError::OutOfRange { .. }
            | CoreError::InvalidChannel(_)
            | CoreError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            CoreError::Corrupt(_, _) => StatusCode::UNPROCESSABLE_ENTITY,
            CoreError::Unsupported(_) => StatusCode::NOT_IMPLEMENTED,
            CoreError::Invalidated => StatusCode::CONFLICT,
            CoreError::Io(_, _) | CoreError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!(error = %self.0, "request failed");
        }
        (status, Json(serde_json::json!({ "error": self.0.to_string() }))).into_response()
    }
}

fn resolve(manager: &FileManager, path: &str) -> Result<FileId, ApiError> {
    Ok(manager.file_id_for_path(path)?)
}

#[derive(Deserialize)]
struct OpenFileRequest {
    path: String,
}

#[derive(Serialize)]
struct FileInfoResponse {
    path: String,
    channel_names: Vec<String>,
    start_us: i64,
    end_us: i64,
}

impl From<FileInfo> for FileInfoResponse {
    fn from(info: FileInfo) -> Self {
        FileInfoResponse {
            path: info.path,
            channel_names: info.channel_names,
            start_us: info.start_us,
            end_us: info.end_us,
        }
    }
}

async fn open_file(
    State(manager): State<Arc<FileManager>>,
    Json(body): Json<OpenFileRequest>,
) -> Result<(StatusCode, Json<FileInfoResponse>), ApiError> {
    let file_id = manager.open_file(body.path).await?;
    let info = manager.file_info(file_id)?;
    Ok((StatusCode::CREATED, Json(info.into())))
}

async fn close_file(
    State(manager): State<Arc<FileManager>>,
    Path(path): Path<String>,
) -> Result<StatusCode, ApiError> {
    let file_id = resolve(&manager, &path)?;
    manager.close_file(file_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_files(State(manager): State<Arc<FileManager>>) -> Json<Vec<String>> {
    let paths = manager
        .list_open_files()
        .into_iter()
        .map(|(_, path)| path)
        .collect();
    Json(paths)
}

#[derive(Deserialize)]
struct SegmentSizeRequest {
    segment_seconds: f64,
}

async fn set_segment_size(
    State(manager): State<Arc<FileManager>>,
    Path(path): Path<String>,
    Json(body): Json<SegmentSizeRequest>,
) -> Result<StatusCode, ApiError> {
    let file_id = resolve(&manager, &path)?;
    manager.set_segment_seconds(file_id, body.segment_seconds)?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Serialize)]
struct SegmentCountResponse {
    segment_count: u64,
}

async fn segment_count(
    State(manager): State<Arc<FileManager>>,
    Path(path): Path<String>,
) -> Result<Json<SegmentCountResponse>, ApiError> {
    let file_id = resolve(&manager, &path)?;
    let segment_count = manager.get_segment_count(file_id)?;
    Ok(Json(SegmentCountResponse { segment_count }))
}

#[derive(Deserialize)]
struct ChannelsRequest {
    channels: Vec<String>,
}

async fn set_channels(
    State(manager): State<Arc<FileManager>>,
    Path(path): Path<String>,
    Json(body): Json<ChannelsRequest>,
) -> Result<StatusCode, ApiError> {
    let file_id = resolve(&manager, &path)?;
    manager.set_active_channels(file_id, body.channels)?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Serialize)]
struct SegmentResponse {
    segment_index: u64,
    shape: (usize, usize),
    data: Vec<Vec<f64>>,
    channel_names: Vec<String>,
    sample_rates: Vec<f64>,
    t_start_us: i64,
    t_end_us: i64,
}

async fn get_segment(
    State(manager): State<Arc<FileManager>>,
    Path((path, index)): Path<(String, u64)>,
) -> Result<Json<SegmentResponse>, ApiError> {
    let file_id = resolve(&manager, &path)?;
    let chunk = manager.get_signal_segment(file_id, index).await?;
    Ok(Json(SegmentResponse {
        segment_index: index,
        shape: chunk.matrix.shape(),
        data: chunk.matrix.rows.clone(),
        channel_names: chunk.channel_names.clone(),
        sample_rates: chunk.sample_rates.clone(),
        t_start_us: chunk.t_start_us,
        t_end_us: chunk.t_end_us,
    }))
}

async fn metrics(State(manager): State<Arc<FileManager>>) -> Json<crate::metrics::MetricsSnapshot> {
    Json(manager.metrics_snapshot())
}

async fn health() -> StatusCode {
    StatusCode::OK
}
