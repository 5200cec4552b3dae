//! Vector index abstraction.
//!
//! The [`VectorIndex`] trait wraps a similarity store holding
//! `(id, vector, payload)` records. Implementations must:
//!
//! - return matches ordered by score, descending;
//! - clamp scores into `[0, 1]` whatever the native range of the store;
//! - apply the document filter *after* the top-`k` search, so a
//!   restrictive filter may return fewer than `k` matches;
//! - return the payload stored at upsert time verbatim.
//!
//! Deletions are administrative and may be eventually consistent.
//!
//! Implementations: [`memory::InMemoryVectorIndex`] here; SQLite and Qdrant
//! backends in the app crate.

pub mod memory;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::ChunkPayload;

/// One search hit.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorMatch {
    /// Vector record id (equal to the chunk id).
    pub id: String,
    /// Similarity in `[0, 1]`.
    pub score: f32,
    pub payload: ChunkPayload,
}

/// Abstract vector similarity store.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`upsert`](VectorIndex::upsert) | Insert or replace a record |
/// | [`search`](VectorIndex::search) | Top-`k` similarity search |
/// | [`exists`](VectorIndex::exists) | Check for a record id |
/// | [`delete_document`](VectorIndex::delete_document) | Drop all records of a document |
/// | [`delete_all`](VectorIndex::delete_all) | Drop every record |
/// | [`is_healthy`](VectorIndex::is_healthy) | Liveness probe |
///
/// Errors are [`VectorStoreFailure`](crate::ErrorKind::VectorStoreFailure).
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Short backend name for logs (`"memory"`, `"sqlite"`, `"qdrant"`).
    fn backend(&self) -> &str;

    async fn upsert(&self, id: &str, vector: &[f32], payload: &ChunkPayload) -> Result<()>;

    async fn search(
        &self,
        query: &[f32],
        k: usize,
        document_filter: Option<&str>,
    ) -> Result<Vec<VectorMatch>>;

    async fn exists(&self, id: &str) -> Result<bool>;

    async fn delete_document(&self, document_id: &str) -> Result<()>;

    async fn delete_all(&self) -> Result<()>;

    /// Never errors; an unreachable store reports `false`.
    async fn is_healthy(&self) -> bool;
}

/// Clamp a native similarity score into `[0, 1]`. NaN maps to `0`.
pub fn clamp_score(score: f32) -> f32 {
    if score.is_nan() {
        0.0
    } else {
        score.clamp(0.0, 1.0)
    }
}

/// Normalize raw top-`k` candidates into the [`VectorIndex::search`]
/// contract: clamp, filter by document, sort descending.
///
/// Blank filters are ignored.
pub fn finalize_matches(
    mut candidates: Vec<VectorMatch>,
    document_filter: Option<&str>,
) -> Vec<VectorMatch> {
    for m in candidates.iter_mut() {
        m.score = clamp_score(m.score);
    }
    if let Some(doc) = document_filter.filter(|d| !d.trim().is_empty()) {
        candidates.retain(|m| m.payload.document_id == doc);
    }
    candidates.sort_by(|a, b| b.score.total_cmp(&a.score));
    candidates
}
