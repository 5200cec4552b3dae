//! Synchronous half of a document upload.
//!
//! Validation, document creation, and text extraction happen while the
//! caller waits; chunking and embedding are handed to the [`IngestQueue`].
//! A rejected file never creates a document. A file that fails extraction
//! leaves a `FAILED` document behind so the reason is visible via status.

use serde::Serialize;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use grounded_core::models::{Document, DocumentStatus};
use grounded_core::status::StatusEvent;

use crate::config::UploadConfig;
use crate::extract::{self, normalize_content_type, MIME_DOCX, MIME_PDF, MIME_TEXT};
use crate::ingest::{IngestJob, IngestQueue};
use crate::repository::Repository;

pub const DEFAULT_OWNER: &str = "anonymous";

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("file is empty")]
    Empty,
    #[error("file size {size} bytes exceeds the maximum of {limit} bytes")]
    TooLarge { size: u64, limit: u64 },
    #[error("unsupported content type: {0}")]
    UnsupportedType(String),
    #[error("Text extraction failed: {message}")]
    Extraction {
        document_id: String,
        message: String,
    },
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// An uploaded file plus its form fields.
#[derive(Debug, Clone, Default)]
pub struct UploadRequest {
    pub filename: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub owner: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UploadResponse {
    pub document_id: String,
    pub filename: String,
    pub title: String,
    pub status: DocumentStatus,
    pub uploaded_at: i64,
    pub file_size_bytes: i64,
    pub message: String,
}

/// Guess a content type from the file extension.
///
/// Used when the client sends none or a generic `application/octet-stream`.
pub fn infer_content_type(filename: &str) -> Option<&'static str> {
    let ext = filename.rsplit_once('.')?.1.to_ascii_lowercase();
    match ext.as_str() {
        "pdf" => Some(MIME_PDF),
        "docx" => Some(MIME_DOCX),
        "txt" | "text" | "md" => Some(MIME_TEXT),
        _ => None,
    }
}

fn resolve_content_type(request: &UploadRequest) -> String {
    let declared = normalize_content_type(&request.content_type);
    if declared.is_empty() || declared == "application/octet-stream" {
        if let Some(inferred) = infer_content_type(&request.filename) {
            return inferred.to_string();
        }
    }
    declared
}

fn non_blank(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

pub struct Uploader {
    repo: Repository,
    queue: Arc<IngestQueue>,
    config: UploadConfig,
}

impl Uploader {
    pub fn new(repo: Repository, queue: Arc<IngestQueue>, config: UploadConfig) -> Self {
        Self {
            repo,
            queue,
            config,
        }
    }

    /// Check size and type before anything is stored.
    pub fn validate(&self, request: &UploadRequest) -> Result<String, UploadError> {
        if request.bytes.is_empty() {
            return Err(UploadError::Empty);
        }
        let size = request.bytes.len() as u64;
        if size > self.config.max_file_bytes {
            return Err(UploadError::TooLarge {
                size,
                limit: self.config.max_file_bytes,
            });
        }
        let content_type = resolve_content_type(request);
        let allowed = self
            .config
            .allowed_content_types
            .iter()
            .any(|t| normalize_content_type(t) == content_type);
        if !allowed {
            return Err(UploadError::UnsupportedType(request.content_type.clone()));
        }
        Ok(content_type)
    }

    pub async fn upload(&self, request: UploadRequest) -> Result<UploadResponse, UploadError> {
        let content_type = self.validate(&request)?;

        let filename = if request.filename.trim().is_empty() {
            "upload".to_string()
        } else {
            request.filename.clone()
        };
        let doc = Document {
            id: Uuid::new_v4().to_string(),
            title: non_blank(&request.title).unwrap_or_else(|| filename.clone()),
            filename,
            description: non_blank(&request.description),
            owner: non_blank(&request.owner).unwrap_or_else(|| DEFAULT_OWNER.to_string()),
            content_type: content_type.clone(),
            file_size_bytes: request.bytes.len() as i64,
            content_hash: String::new(),
            status: DocumentStatus::Uploading,
            total_chunks: 0,
            error_message: None,
            uploaded_at: chrono::Utc::now().timestamp(),
            processed_at: None,
        };
        self.repo.insert_document(&doc).await?;
        info!(
            document_id = %doc.id,
            filename = %doc.filename,
            content_type = %content_type,
            bytes = doc.file_size_bytes,
            "document uploaded"
        );

        let bytes = request.bytes;
        // A panicking parser counts as a failed extraction.
        let extracted =
            match tokio::task::spawn_blocking(move || extract::extract_text(&bytes, &content_type))
                .await
            {
                Ok(result) => result.map_err(|e| e.to_string()),
                Err(e) => Err(format!("extractor crashed: {}", e)),
            };
        let text = match extracted {
            Ok(text) if !text.trim().is_empty() => text,
            Ok(_) => return Err(self.fail_extraction(&doc.id, "no text found in document").await),
            Err(message) => return Err(self.fail_extraction(&doc.id, &message).await),
        };

        let hash = format!("{:x}", Sha256::digest(text.as_bytes()));
        self.repo.set_content_hash(&doc.id, &hash).await?;

        let job = IngestJob {
            document_id: doc.id.clone(),
            text,
        };
        if let Err(e) = self.queue.submit(job).await {
            let message = format!("Processing failed: {}", e);
            self.repo
                .apply_status(&doc.id, StatusEvent::Fail, Some(&message))
                .await?;
            return Err(UploadError::Internal(e));
        }

        Ok(UploadResponse {
            document_id: doc.id,
            filename: doc.filename,
            title: doc.title,
            status: DocumentStatus::Processing,
            uploaded_at: doc.uploaded_at,
            file_size_bytes: doc.file_size_bytes,
            message: DocumentStatus::Processing.message().to_string(),
        })
    }

    async fn fail_extraction(&self, document_id: &str, reason: &str) -> UploadError {
        let message = format!("Text extraction failed: {}", reason);
        warn!(document_id, error = %reason, "text extraction failed");
        if let Err(e) = self
            .repo
            .apply_status(document_id, StatusEvent::Fail, Some(&message))
            .await
        {
            return UploadError::Internal(e);
        }
        UploadError::Extraction {
            document_id: document_id.to_string(),
            message: reason.to_string(),
        }
    }
}
