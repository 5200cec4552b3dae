//! Core data models used throughout grounded.
//!
//! These types represent the documents, chunks, vector payloads, and query
//! results that flow through the ingestion and retrieval pipeline.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::RagError;

/// Lifecycle status of an uploaded document.
///
/// `UPLOADING → PROCESSING → {READY, FAILED}`. See [`crate::status`] for the
/// transition rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocumentStatus {
    Uploading,
    Processing,
    Ready,
    Failed,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Uploading => "UPLOADING",
            DocumentStatus::Processing => "PROCESSING",
            DocumentStatus::Ready => "READY",
            DocumentStatus::Failed => "FAILED",
        }
    }

    /// `true` for READY and FAILED.
    pub fn is_terminal(&self) -> bool {
        matches!(self, DocumentStatus::Ready | DocumentStatus::Failed)
    }

    /// Human-readable description shown by the status endpoint.
    pub fn message(&self) -> &'static str {
        match self {
            DocumentStatus::Uploading => "Document is being uploaded...",
            DocumentStatus::Processing => "Processing document (extracting, chunking, embedding)...",
            DocumentStatus::Ready => "Document is ready for queries",
            DocumentStatus::Failed => "Document processing failed",
        }
    }
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentStatus {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "UPLOADING" => Ok(DocumentStatus::Uploading),
            "PROCESSING" => Ok(DocumentStatus::Processing),
            "READY" => Ok(DocumentStatus::Ready),
            "FAILED" => Ok(DocumentStatus::Failed),
            other => Err(RagError::storage(format!(
                "unknown document status: {}",
                other
            ))),
        }
    }
}

/// An uploaded document and its ingestion bookkeeping.
///
/// Timestamps are Unix seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub title: String,
    pub filename: String,
    pub description: Option<String>,
    pub owner: String,
    pub content_type: String,
    pub file_size_bytes: i64,
    /// SHA-256 of the extracted text, empty until extraction succeeds.
    pub content_hash: String,
    pub status: DocumentStatus,
    /// Set once chunking completes; never decreases.
    pub total_chunks: i64,
    pub error_message: Option<String>,
    pub uploaded_at: i64,
    pub processed_at: Option<i64>,
}

/// A bounded slice of a document's text, the unit of embedding and retrieval.
///
/// `vector_id` is `None` while the chunk is pending and is set to the
/// vector record id once the chunk has been embedded and stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub chunk_index: i64,
    pub content: String,
    pub token_count: i64,
    pub vector_id: Option<String>,
    pub embedding_model: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

impl Chunk {
    /// Metadata bag stored alongside the chunk's vector.
    pub fn payload(&self) -> ChunkPayload {
        ChunkPayload {
            document_id: self.document_id.clone(),
            chunk_index: self.chunk_index,
            content: self.content.clone(),
            token_count: self.token_count,
        }
    }
}

/// Denormalized chunk data carried by a vector record.
///
/// Returned verbatim on search matches so the query path can build context
/// without a relational lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkPayload {
    pub document_id: String,
    pub chunk_index: i64,
    pub content: String,
    pub token_count: i64,
}

/// One retrieved chunk cited in a [`QueryResult`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceReference {
    pub document_id: String,
    pub document_title: Option<String>,
    pub chunk_index: i64,
    pub similarity_score: f32,
    pub excerpt: String,
    pub token_count: Option<i64>,
}

/// Answer to a single question, with confidence, sources, and timings.
///
/// Not persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    pub answer: Option<String>,
    pub confidence: f32,
    pub is_grounded: bool,
    pub sources: Vec<SourceReference>,
    pub chunks_retrieved: usize,
    pub retrieval_time_ms: u64,
    pub generation_time_ms: u64,
    pub total_time_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl QueryResult {
    /// Degraded result returned when any query stage fails.
    pub fn failed(error: impl Into<String>, total_time_ms: u64) -> Self {
        Self {
            answer: None,
            confidence: 0.0,
            is_grounded: false,
            sources: Vec::new(),
            chunks_retrieved: 0,
            retrieval_time_ms: 0,
            generation_time_ms: 0,
            total_time_ms,
            error: Some(error.into()),
        }
    }
}

/// Embedding progress of one document.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestProgress {
    pub total_chunks: i64,
    pub processed_chunks: i64,
    pub percentage: f64,
}

impl IngestProgress {
    /// Build a progress value, clamping `processed` into `[0, total]`.
    pub fn new(total_chunks: i64, processed_chunks: i64) -> Self {
        let total = total_chunks.max(0);
        let processed = processed_chunks.clamp(0, total);
        let percentage = if total > 0 {
            processed as f64 * 100.0 / total as f64
        } else {
            0.0
        };
        Self {
            total_chunks: total,
            processed_chunks: processed,
            percentage,
        }
    }
}
