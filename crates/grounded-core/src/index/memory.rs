//! In-memory [`VectorIndex`] for tests and ephemeral deployments.
//!
//! Records live in a `HashMap` behind `std::sync::RwLock`. Each entry holds
//! the vector and its payload together, so a concurrent search never sees a
//! vector without its metadata. Search is brute-force cosine similarity.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::error::{RagError, Result};
use crate::models::ChunkPayload;

use super::{finalize_matches, VectorIndex, VectorMatch};

struct Entry {
    vector: Vec<f32>,
    payload: ChunkPayload,
}

/// Process-local vector index.
pub struct InMemoryVectorIndex {
    entries: RwLock<HashMap<String, Entry>>,
}

impl InMemoryVectorIndex {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryVectorIndex {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned() -> RagError {
    RagError::vector_store("in-memory index lock poisoned")
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    fn backend(&self) -> &str {
        "memory"
    }

    async fn upsert(&self, id: &str, vector: &[f32], payload: &ChunkPayload) -> Result<()> {
        if vector.is_empty() {
            return Err(RagError::vector_store(format!("empty vector for {}", id)));
        }
        let mut entries = self.entries.write().map_err(|_| poisoned())?;
        entries.insert(
            id.to_string(),
            Entry {
                vector: vector.to_vec(),
                payload: payload.clone(),
            },
        );
        Ok(())
    }

    async fn search(
        &self,
        query: &[f32],
        k: usize,
        document_filter: Option<&str>,
    ) -> Result<Vec<VectorMatch>> {
        let entries = self.entries.read().map_err(|_| poisoned())?;
        let mut scored: Vec<VectorMatch> = entries
            .iter()
            .map(|(id, e)| VectorMatch {
                id: id.clone(),
                score: cosine_similarity(query, &e.vector),
                payload: e.payload.clone(),
            })
            .collect();
        drop(entries);

        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(k);
        Ok(finalize_matches(scored, document_filter))
    }

    async fn exists(&self, id: &str) -> Result<bool> {
        let entries = self.entries.read().map_err(|_| poisoned())?;
        Ok(entries.contains_key(id))
    }

    async fn delete_document(&self, document_id: &str) -> Result<()> {
        let mut entries = self.entries.write().map_err(|_| poisoned())?;
        entries.retain(|_, e| e.payload.document_id != document_id);
        Ok(())
    }

    async fn delete_all(&self) -> Result<()> {
        let mut entries = self.entries.write().map_err(|_| poisoned())?;
        entries.clear();
        Ok(())
    }

    async fn is_healthy(&self) -> bool {
        self.entries.read().is_ok()
    }
}
