//! HTTP routes for SIS:
//! - `POST /up`: multipart upload, answers `[{"Name", "MD5"}]`
//! - `POST /derect_up`: peer relay upload (field name = content key)
//! - `GET /simple_down?md5=`: first object under a key
//! - `GET /full_down?md5=&file_name=`: a named object
//! - `GET /stretch_simple_down?md5=&w=&h=`: first object, resized
//! - `GET /stretch_full_down?md5=&file_name=&w=&h=`: named object, resized
//! - `GET /health`

use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::Bytes,
    extract::{multipart::MultipartError, DefaultBodyLimit, Multipart, Query, State},
    http::{header, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use sis_store::backend::{
    encode_filename_header, FILENAME_HEADER, FULL_DOWN_PATH, SIMPLE_DOWN_PATH, UPLOAD_PATH,
};
use sis_store::{ContentKey, ContentStore, StoreError};
use thiserror::Error;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Shared state for handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<ContentStore>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(store: Arc<ContentStore>) -> Self {
        Self {
            store,
            start_time: Instant::now(),
        }
    }
}

pub fn router(state: AppState) -> Router {
    let body_limit = state.store.limits().max_upload_bytes;

    Router::new()
        .route("/up", post(upload))
        .route(UPLOAD_PATH, post(relay_upload))
        .route(SIMPLE_DOWN_PATH, get(simple_down))
        .route(FULL_DOWN_PATH, get(full_down))
        .route("/stretch_simple_down", get(stretch_simple_down))
        .route("/stretch_full_down", get(stretch_full_down))
        .route("/health", get(health))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Handler errors and their HTTP status.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Multipart(#[from] MultipartError),

    #[error("{0}")]
    BadRequest(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::Store(e) => match e {
                StoreError::NotFound { .. } => StatusCode::NOT_FOUND,
                StoreError::InvalidFilename(_)
                | StoreError::InvalidKey(_)
                | StoreError::InvalidDimensions { .. }
                | StoreError::TooManyPixels { .. } => StatusCode::BAD_REQUEST,
                StoreError::UnsupportedFormat(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
                StoreError::Decode(_) => StatusCode::UNPROCESSABLE_ENTITY,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Multipart(e) => e.status(),
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::debug!(error = %self, %status, "request rejected");
        }
        (status, self.to_string()).into_response()
    }
}

/// One entry of the `/up` response.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct UploadedFile {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "MD5")]
    pub md5: String,
}

#[derive(Debug, Deserialize)]
struct DownParams {
    md5: String,
    #[serde(default)]
    file_name: String,
    w: Option<u32>,
    h: Option<u32>,
}

impl DownParams {
    fn key(&self) -> Result<ContentKey, ApiError> {
        self.md5
            .parse()
            .map_err(|e| ApiError::Store(StoreError::InvalidKey(e)))
    }

    fn file_name(&self) -> Result<&str, ApiError> {
        if self.file_name.is_empty() {
            return Err(ApiError::BadRequest("file_name is required".to_string()));
        }
        Ok(&self.file_name)
    }

    fn dims(&self) -> Result<(u32, u32), ApiError> {
        match (self.w, self.h) {
            (Some(w), Some(h)) => Ok((w, h)),
            _ => Err(ApiError::BadRequest("w and h are required".to_string())),
        }
    }
}

/// Serve image bytes with a sniffed content type.
fn image_response(data: Bytes) -> Response {
    let mime = image::guess_format(&data)
        .map(|f| f.to_mime_type())
        .unwrap_or("application/octet-stream");
    ([(header::CONTENT_TYPE, mime)], data).into_response()
}

/// Browser-facing upload. Every file part is stored under its own filename.
async fn upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<Vec<UploadedFile>>, ApiError> {
    let mut uploaded = Vec::new();

    while let Some(field) = multipart.next_field().await? {
        let Some(filename) = field.file_name().map(str::to_string) else {
            continue;
        };
        let data = field.bytes().await?;
        let key = state.store.write(&data, &filename).await?;
        uploaded.push(UploadedFile {
            name: filename,
            md5: key.to_string(),
        });
    }

    Ok(Json(uploaded))
}

/// Upload from a peer's remote backend. The field name must be the content
/// key of the part's bytes.
async fn relay_upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<StatusCode, ApiError> {
    while let Some(field) = multipart.next_field().await? {
        let claimed: ContentKey = field
            .name()
            .unwrap_or_default()
            .parse()
            .map_err(|e| ApiError::Store(StoreError::InvalidKey(e)))?;
        let filename = field.file_name().unwrap_or_default().to_string();
        let data = field.bytes().await?;

        let actual = ContentKey::from_data(&data);
        if actual != claimed {
            return Err(ApiError::BadRequest(format!(
                "content key mismatch: claimed {claimed}, got {actual}"
            )));
        }

        state.store.write(&data, &filename).await?;
    }

    Ok(StatusCode::OK)
}

async fn simple_down(
    State(state): State<AppState>,
    Query(params): Query<DownParams>,
) -> Result<Response, ApiError> {
    let key = params.key()?;
    let object = state.store.read_original(&key, "").await?;

    let mut response = image_response(object.data);
    if let Ok(value) = HeaderValue::from_str(&encode_filename_header(&object.filename)) {
        response
            .headers_mut()
            .insert(HeaderName::from_static(FILENAME_HEADER), value);
    }
    Ok(response)
}

async fn full_down(
    State(state): State<AppState>,
    Query(params): Query<DownParams>,
) -> Result<Response, ApiError> {
    let key = params.key()?;
    let data = state.store.read(&key, params.file_name()?, None).await?;
    Ok(image_response(data))
}

async fn stretch_simple_down(
    State(state): State<AppState>,
    Query(params): Query<DownParams>,
) -> Result<Response, ApiError> {
    let key = params.key()?;
    let dims = params.dims()?;
    let data = state.store.read(&key, "", Some(dims)).await?;
    Ok(image_response(data))
}

async fn stretch_full_down(
    State(state): State<AppState>,
    Query(params): Query<DownParams>,
) -> Result<Response, ApiError> {
    let key = params.key()?;
    let dims = params.dims()?;
    let data = state.store.read(&key, params.file_name()?, Some(dims)).await?;
    Ok(image_response(data))
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let cache = state.store.cache();
    Json(serde_json::json!({
        "status": "healthy",
        "uptime_secs": state.start_time.elapsed().as_secs(),
        "version": env!("CARGO_PKG_VERSION"),
        "backend": state.store.backend().kind(),
        "cache": {
            "enabled": cache.is_enabled(),
            "entries": cache.len(),
            "used_bytes": cache.used(),
            "capacity_bytes": cache.capacity(),
        }
    }))
}
