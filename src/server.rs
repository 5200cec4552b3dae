//! HTTP API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/api/documents/upload` | Multipart upload (`file`, `title?`, `description?`, `owner?`) |
//! | `GET`  | `/api/documents` | List documents, newest first |
//! | `GET`  | `/api/documents/{id}` | Document metadata |
//! | `GET`  | `/api/documents/{id}/status` | Status, progress, and error message |
//! | `DELETE` | `/api/documents/{id}` | Delete a document with its chunks and vectors |
//! | `POST` | `/api/query` | Ask a question |
//! | `GET`  | `/api/query/health` | Vector index health |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "question must not be blank" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `payload_too_large` (413),
//! `unprocessable` (422), `internal` (500). A query whose pipeline failed is
//! answered with 500 and the [`QueryResult`] body, `error` populated.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use axum::{
    extract::{multipart::MultipartError, rejection::JsonRejection, DefaultBodyLimit, Multipart, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use grounded_core::index::VectorIndex;
use grounded_core::models::{Document, DocumentStatus, QueryResult};

use crate::app::Services;
use crate::config::Config;
use crate::rag::{QueryRequest, RagEngine};
use crate::repository::Repository;
use crate::upload::{UploadError, UploadRequest, UploadResponse, Uploader};

/// Multipart framing and form fields on top of the file itself.
const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

#[derive(Clone)]
struct AppState {
    repo: Repository,
    index: Arc<dyn VectorIndex>,
    uploader: Arc<Uploader>,
    engine: Arc<RagEngine>,
}

/// Build services from `config` and serve on `[server].bind` until Ctrl-C.
///
/// Queued ingestion jobs are drained before returning.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let services = Services::build(config).await?;
    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    println!("grounded listening on http://{}", listener.local_addr()?);

    axum::serve(listener, router(&services))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("draining ingestion queue");
    services.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}

/// The API router over already-built services.
pub fn router(services: &Services) -> Router {
    let state = AppState {
        repo: services.repo.clone(),
        index: Arc::clone(&services.index),
        uploader: Arc::clone(&services.uploader),
        engine: Arc::clone(&services.engine),
    };

    let body_limit = usize::try_from(services.config.upload.max_file_bytes)
        .unwrap_or(usize::MAX)
        .saturating_add(MULTIPART_OVERHEAD_BYTES);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/documents/upload", post(handle_upload))
        .route("/api/documents", get(handle_list_documents))
        .route(
            "/api/documents/{id}",
            get(handle_get_document).delete(handle_delete_document),
        )
        .route("/api/documents/{id}/status", get(handle_document_status))
        .route("/api/query", post(handle_query))
        .route("/api/query/health", get(handle_query_health))
        .route("/health", get(handle_health))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .with_state(state)
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn app_error(status: StatusCode, code: &str, message: impl Into<String>) -> AppError {
    AppError {
        status,
        code: code.to_string(),
        message: message.into(),
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    app_error(StatusCode::BAD_REQUEST, "bad_request", message)
}

fn not_found(message: impl Into<String>) -> AppError {
    app_error(StatusCode::NOT_FOUND, "not_found", message)
}

fn internal(err: impl std::fmt::Display) -> AppError {
    error!(error = %err, "request failed");
    app_error(StatusCode::INTERNAL_SERVER_ERROR, "internal", err.to_string())
}

impl From<UploadError> for AppError {
    fn from(err: UploadError) -> Self {
        match &err {
            UploadError::Empty | UploadError::UnsupportedType(_) => bad_request(err.to_string()),
            UploadError::TooLarge { .. } => app_error(
                StatusCode::PAYLOAD_TOO_LARGE,
                "payload_too_large",
                err.to_string(),
            ),
            UploadError::Extraction { document_id, .. } => app_error(
                StatusCode::UNPROCESSABLE_ENTITY,
                "unprocessable",
                format!("{} (document {})", err, document_id),
            ),
            UploadError::Internal(_) => internal(err),
        }
    }
}

impl From<MultipartError> for AppError {
    fn from(err: MultipartError) -> Self {
        if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
            app_error(
                StatusCode::PAYLOAD_TOO_LARGE,
                "payload_too_large",
                err.body_text(),
            )
        } else {
            bad_request(err.body_text())
        }
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /api/documents/upload ============

async fn handle_upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<UploadResponse>), AppError> {
    let mut request = UploadRequest::default();
    let mut has_file = false;

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                request.filename = field.file_name().unwrap_or_default().to_string();
                request.content_type = field.content_type().unwrap_or_default().to_string();
                request.bytes = field.bytes().await?.to_vec();
                has_file = true;
            }
            "title" => request.title = Some(field.text().await?),
            "description" => request.description = Some(field.text().await?),
            "owner" => request.owner = Some(field.text().await?),
            _ => {}
        }
    }

    if !has_file {
        return Err(bad_request("missing multipart field: file"));
    }

    let response = state.uploader.upload(request).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

// ============ Documents ============

async fn handle_list_documents(
    State(state): State<AppState>,
) -> Result<Json<Vec<Document>>, AppError> {
    state.repo.list_documents().await.map(Json).map_err(internal)
}

async fn load_document(repo: &Repository, id: &str) -> Result<Document, AppError> {
    repo.get_document(id)
        .await
        .map_err(internal)?
        .ok_or_else(|| not_found(format!("document not found: {}", id)))
}

async fn handle_get_document(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Document>, AppError> {
    load_document(&state.repo, &id).await.map(Json)
}

#[derive(Serialize)]
struct StatusResponse {
    document_id: String,
    status: DocumentStatus,
    message: String,
    total_chunks: i64,
    processed_chunks: i64,
    percentage: f64,
    error_message: Option<String>,
}

async fn handle_document_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<StatusResponse>, AppError> {
    let doc = load_document(&state.repo, &id).await?;
    let progress = state
        .repo
        .progress(&id)
        .await
        .map_err(internal)?
        .ok_or_else(|| not_found(format!("document not found: {}", id)))?;

    Ok(Json(StatusResponse {
        document_id: doc.id,
        status: doc.status,
        message: doc.status.message().to_string(),
        total_chunks: progress.total_chunks,
        processed_chunks: progress.processed_chunks,
        percentage: progress.percentage,
        error_message: doc.error_message,
    }))
}

async fn handle_delete_document(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    load_document(&state.repo, &id).await?;
    state.index.delete_document(&id).await.map_err(internal)?;
    if !state.repo.delete_document(&id).await.map_err(internal)? {
        return Err(not_found(format!("document not found: {}", id)));
    }
    info!(document_id = %id, "document deleted");
    Ok(StatusCode::NO_CONTENT)
}

// ============ Query ============

async fn handle_query(
    State(state): State<AppState>,
    body: Result<Json<QueryRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<QueryResult>), AppError> {
    let Json(request) = body.map_err(|e| bad_request(e.body_text()))?;
    request
        .validate()
        .map_err(|e| bad_request(e.message().to_string()))?;

    let result = state.engine.answer(&request).await;
    let status = if result.error.is_some() {
        StatusCode::INTERNAL_SERVER_ERROR
    } else {
        StatusCode::OK
    };
    Ok((status, Json(result)))
}

#[derive(Serialize)]
struct IndexHealthResponse {
    status: String,
    backend: String,
}

async fn handle_query_health(
    State(state): State<AppState>,
) -> (StatusCode, Json<IndexHealthResponse>) {
    let healthy = state.engine.is_healthy().await;
    let (status, label) = if healthy {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "unavailable")
    };
    (
        status,
        Json(IndexHealthResponse {
            status: label.to_string(),
            backend: state.engine.backend().to_string(),
        }),
    )
}
