//! Vector index backends.
//!
//! | Backend | Type | Storage |
//! |---------|------|---------|
//! | `sqlite` | [`SqliteVectorIndex`] | `chunk_vectors` table, brute-force cosine |
//! | `memory` | [`InMemoryVectorIndex`] | process memory, lost on restart |
//! | `qdrant` | [`QdrantVectorIndex`] | Qdrant REST API, payload stored natively |
//!
//! All backends store the chunk payload with the vector, so search results
//! carry everything context assembly needs.

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use sqlx::{Row, SqlitePool};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use grounded_core::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use grounded_core::error::Result as RagResult;
use grounded_core::index::memory::InMemoryVectorIndex;
use grounded_core::index::{finalize_matches, VectorIndex, VectorMatch};
use grounded_core::models::ChunkPayload;
use grounded_core::RagError;

use crate::config::VectorStoreConfig;

/// Build the backend selected by `config.backend`.
pub fn create_vector_index(
    config: &VectorStoreConfig,
    pool: SqlitePool,
) -> Result<Arc<dyn VectorIndex>> {
    match config.backend.as_str() {
        "sqlite" => Ok(Arc::new(SqliteVectorIndex::new(pool))),
        "memory" => Ok(Arc::new(InMemoryVectorIndex::new())),
        "qdrant" => Ok(Arc::new(QdrantVectorIndex::new(config)?)),
        other => anyhow::bail!("Unknown vector store backend: {}", other),
    }
}

// ============ SQLite Backend ============

fn sql_err(e: sqlx::Error) -> RagError {
    RagError::vector_store(e.to_string()).with_source(e)
}

/// Vectors stored as little-endian f32 BLOBs next to their payload.
///
/// Rows reference `chunks(id)` and are removed when their chunk is.
pub struct SqliteVectorIndex {
    pool: SqlitePool,
}

impl SqliteVectorIndex {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl VectorIndex for SqliteVectorIndex {
    fn backend(&self) -> &str {
        "sqlite"
    }

    async fn upsert(&self, id: &str, vector: &[f32], payload: &ChunkPayload) -> RagResult<()> {
        if vector.is_empty() {
            return Err(RagError::vector_store(format!("empty vector for {}", id)));
        }
        sqlx::query(
            r#"
            INSERT INTO chunk_vectors (chunk_id, document_id, chunk_index, content,
                                       token_count, dims, embedding)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(chunk_id) DO UPDATE SET
                document_id = excluded.document_id,
                chunk_index = excluded.chunk_index,
                content = excluded.content,
                token_count = excluded.token_count,
                dims = excluded.dims,
                embedding = excluded.embedding
            "#,
        )
        .bind(id)
        .bind(&payload.document_id)
        .bind(payload.chunk_index)
        .bind(&payload.content)
        .bind(payload.token_count)
        .bind(vector.len() as i64)
        .bind(vec_to_blob(vector))
        .execute(&self.pool)
        .await
        .map_err(sql_err)?;
        Ok(())
    }

    async fn search(
        &self,
        query: &[f32],
        k: usize,
        document_filter: Option<&str>,
    ) -> RagResult<Vec<VectorMatch>> {
        let rows = sqlx::query(
            "SELECT chunk_id, document_id, chunk_index, content, token_count, embedding FROM chunk_vectors",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(sql_err)?;

        let mut scored: Vec<VectorMatch> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                VectorMatch {
                    id: row.get("chunk_id"),
                    score: cosine_similarity(query, &blob_to_vec(&blob)),
                    payload: ChunkPayload {
                        document_id: row.get("document_id"),
                        chunk_index: row.get("chunk_index"),
                        content: row.get("content"),
                        token_count: row.get("token_count"),
                    },
                }
            })
            .collect();

        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(k);
        Ok(finalize_matches(scored, document_filter))
    }

    async fn exists(&self, id: &str) -> RagResult<bool> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunk_vectors WHERE chunk_id = ?")
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(sql_err)?;
        Ok(n > 0)
    }

    async fn delete_document(&self, document_id: &str) -> RagResult<()> {
        sqlx::query("DELETE FROM chunk_vectors WHERE document_id = ?")
            .bind(document_id)
            .execute(&self.pool)
            .await
            .map_err(sql_err)?;
        Ok(())
    }

    async fn delete_all(&self) -> RagResult<()> {
        sqlx::query("DELETE FROM chunk_vectors")
            .execute(&self.pool)
            .await
            .map_err(sql_err)?;
        Ok(())
    }

    async fn is_healthy(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }
}

// ============ Qdrant Backend ============

fn http_err(e: reqwest::Error) -> RagError {
    RagError::vector_store(format!("qdrant request failed: {}", e)).with_source(e)
}

#[derive(Debug, Deserialize)]
struct QdrantResponse<T> {
    result: T,
}

#[derive(Debug, Deserialize)]
struct ScoredPoint {
    id: serde_json::Value,
    score: f32,
    payload: Option<ChunkPayload>,
}

#[derive(Debug, Deserialize)]
struct RetrievedPoint {
    #[allow(dead_code)]
    id: serde_json::Value,
}

/// Qdrant collection accessed over its REST API.
///
/// The collection is created on first upsert with cosine distance and the
/// dimensionality of that first vector.
pub struct QdrantVectorIndex {
    client: reqwest::Client,
    url: String,
    collection: String,
    api_key: Option<String>,
    ready: AtomicBool,
}

impl QdrantVectorIndex {
    pub fn new(config: &VectorStoreConfig) -> Result<Self> {
        let url = config
            .url
            .clone()
            .ok_or_else(|| anyhow::anyhow!("vector_store.url required for qdrant backend"))?;
        let api_key = match &config.api_key_env {
            Some(var) => Some(
                std::env::var(var)
                    .map_err(|_| anyhow::anyhow!("{} environment variable not set", var))?,
            ),
            None => None,
        };
        Ok(Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(config.timeout_secs))
                .build()?,
            url: url.trim_end_matches('/').to_string(),
            collection: config.collection.clone(),
            api_key,
            ready: AtomicBool::new(false),
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let mut req = self
            .client
            .request(method, format!("{}/collections/{}{}", self.url, self.collection, path));
        if let Some(key) = &self.api_key {
            req = req.header("api-key", key);
        }
        req
    }

    async fn ensure_collection(&self, dims: usize) -> RagResult<()> {
        if self.ready.load(Ordering::Acquire) {
            return Ok(());
        }

        let resp = self
            .request(reqwest::Method::GET, "")
            .send()
            .await
            .map_err(http_err)?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            debug!(collection = %self.collection, dims, "creating qdrant collection");
            let body = serde_json::json!({
                "vectors": { "size": dims, "distance": "Cosine" }
            });
            let resp = self
                .request(reqwest::Method::PUT, "")
                .json(&body)
                .send()
                .await
                .map_err(http_err)?;
            // 409: another writer created it first
            if !resp.status().is_success() && resp.status() != reqwest::StatusCode::CONFLICT {
                return Err(status_err("create collection", resp).await);
            }
        } else if !resp.status().is_success() {
            return Err(status_err("get collection", resp).await);
        }

        self.ready.store(true, Ordering::Release);
        Ok(())
    }
}

async fn status_err(op: &str, resp: reqwest::Response) -> RagError {
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    RagError::vector_store(format!("qdrant {} failed ({}): {}", op, status, body))
}

fn point_id(id: &serde_json::Value) -> String {
    match id {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[async_trait]
impl VectorIndex for QdrantVectorIndex {
    fn backend(&self) -> &str {
        "qdrant"
    }

    async fn upsert(&self, id: &str, vector: &[f32], payload: &ChunkPayload) -> RagResult<()> {
        if vector.is_empty() {
            return Err(RagError::vector_store(format!("empty vector for {}", id)));
        }
        self.ensure_collection(vector.len()).await?;

        let body = serde_json::json!({
            "points": [{ "id": id, "vector": vector, "payload": payload }]
        });
        let resp = self
            .request(reqwest::Method::PUT, "/points?wait=true")
            .json(&body)
            .send()
            .await
            .map_err(http_err)?;
        if !resp.status().is_success() {
            return Err(status_err("upsert", resp).await);
        }
        Ok(())
    }

    async fn search(
        &self,
        query: &[f32],
        k: usize,
        document_filter: Option<&str>,
    ) -> RagResult<Vec<VectorMatch>> {
        let body = serde_json::json!({
            "vector": query,
            "limit": k,
            "with_payload": true,
        });
        let resp = self
            .request(reqwest::Method::POST, "/points/search")
            .json(&body)
            .send()
            .await
            .map_err(http_err)?;

        // No collection yet means nothing has been ingested.
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        if !resp.status().is_success() {
            return Err(status_err("search", resp).await);
        }

        let parsed: QdrantResponse<Vec<ScoredPoint>> = resp.json().await.map_err(http_err)?;
        let candidates = parsed
            .result
            .into_iter()
            .filter_map(|p| {
                let id = point_id(&p.id);
                match p.payload {
                    Some(payload) => Some(VectorMatch {
                        id,
                        score: p.score,
                        payload,
                    }),
                    None => {
                        warn!(point_id = %id, "qdrant point without payload skipped");
                        None
                    }
                }
            })
            .collect();

        Ok(finalize_matches(candidates, document_filter))
    }

    async fn exists(&self, id: &str) -> RagResult<bool> {
        let body = serde_json::json!({ "ids": [id], "with_payload": false });
        let resp = self
            .request(reqwest::Method::POST, "/points")
            .json(&body)
            .send()
            .await
            .map_err(http_err)?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(false);
        }
        if !resp.status().is_success() {
            return Err(status_err("retrieve", resp).await);
        }
        let parsed: QdrantResponse<Vec<RetrievedPoint>> = resp.json().await.map_err(http_err)?;
        Ok(!parsed.result.is_empty())
    }

    async fn delete_document(&self, document_id: &str) -> RagResult<()> {
        let body = serde_json::json!({
            "filter": {
                "must": [{ "key": "document_id", "match": { "value": document_id } }]
            }
        });
        let resp = self
            .request(reqwest::Method::POST, "/points/delete?wait=true")
            .json(&body)
            .send()
            .await
            .map_err(http_err)?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(());
        }
        if !resp.status().is_success() {
            return Err(status_err("delete points", resp).await);
        }
        Ok(())
    }

    async fn delete_all(&self) -> RagResult<()> {
        let resp = self
            .request(reqwest::Method::DELETE, "")
            .send()
            .await
            .map_err(http_err)?;
        self.ready.store(false, Ordering::Release);
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(());
        }
        if !resp.status().is_success() {
            return Err(status_err("delete collection", resp).await);
        }
        Ok(())
    }

    async fn is_healthy(&self) -> bool {
        let mut req = self.client.get(format!("{}/collections", self.url));
        if let Some(key) = &self.api_key {
            req = req.header("api-key", key);
        }
        match req.send().await {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                warn!(error = %e, "qdrant health check failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::Repository;
    use crate::testing::{new_document, temp_pool};
    use grounded_core::chunk::{Chunker, ChunkerConfig};
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn sqlite_index_roundtrip_and_cascade() {
        let (_dir, pool) = temp_pool().await;
        let repo = Repository::new(pool.clone());
        repo.insert_document(&new_document("d1", "Doc")).await.unwrap();
        let chunks = Chunker::new(ChunkerConfig {
            chunk_size_tokens: 4,
            overlap_tokens: 0,
        })
        .chunk("d1", "Alpha beta. Gamma delta. Epsilon.")
        .unwrap();
        repo.replace_chunks("d1", &chunks).await.unwrap();

        let index = SqliteVectorIndex::new(pool);
        index.upsert(&chunks[0].id, &[1.0, 0.0], &chunks[0].payload()).await.unwrap();
        index.upsert(&chunks[1].id, &[0.0, 1.0], &chunks[1].payload()).await.unwrap();

        let hits = index.search(&[1.0, 0.0], 5, None).await.unwrap();
        assert_eq!(hits[0].id, chunks[0].id);
        assert_eq!(hits[0].payload, chunks[0].payload());
        assert!((hits[0].score - 1.0).abs() < 1e-6);
        assert!(index.exists(&chunks[1].id).await.unwrap());

        let hits = index.search(&[1.0, 0.0], 5, Some("other")).await.unwrap();
        assert!(hits.is_empty());

        // deleting the document cascades through chunks to vectors
        repo.delete_document("d1").await.unwrap();
        assert!(!index.exists(&chunks[0].id).await.unwrap());
        assert!(index.is_healthy().await);
    }

    #[tokio::test]
    async fn sqlite_delete_all_clears_vectors_only() {
        let (_dir, pool) = temp_pool().await;
        let repo = Repository::new(pool.clone());
        repo.insert_document(&new_document("d1", "Doc")).await.unwrap();
        let chunks = Chunker::new(ChunkerConfig::default())
            .chunk("d1", "Only one chunk here.")
            .unwrap();
        repo.replace_chunks("d1", &chunks).await.unwrap();

        let index = SqliteVectorIndex::new(pool);
        index.upsert(&chunks[0].id, &[0.5, 0.5], &chunks[0].payload()).await.unwrap();
        index.delete_all().await.unwrap();

        assert!(index.search(&[0.5, 0.5], 5, None).await.unwrap().is_empty());
        assert_eq!(repo.list_chunks("d1").await.unwrap().len(), 1);
    }

    fn qdrant_config(url: &str) -> VectorStoreConfig {
        VectorStoreConfig {
            backend: "qdrant".to_string(),
            url: Some(url.to_string()),
            collection: "test".to_string(),
            ..Default::default()
        }
    }

    fn payload() -> ChunkPayload {
        ChunkPayload {
            document_id: "d1".to_string(),
            chunk_index: 0,
            content: "hello".to_string(),
            token_count: 2,
        }
    }

    #[tokio::test]
    async fn qdrant_creates_collection_then_upserts() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/collections/test"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/collections/test"))
            .and(body_partial_json(serde_json::json!({
                "vectors": { "size": 2, "distance": "Cosine" }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "result": true })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/collections/test/points"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "result": {} })))
            .expect(2)
            .mount(&server)
            .await;

        let index = QdrantVectorIndex::new(&qdrant_config(&server.uri())).unwrap();
        index.upsert("11111111-1111-1111-1111-111111111111", &[0.1, 0.2], &payload()).await.unwrap();
        index.upsert("22222222-2222-2222-2222-222222222222", &[0.3, 0.4], &payload()).await.unwrap();
    }

    #[tokio::test]
    async fn qdrant_search_clamps_and_filters() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/collections/test/points/search"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "result": [
                    { "id": "a", "score": 1.3, "payload": {
                        "document_id": "d1", "chunk_index": 0, "content": "x", "token_count": 1 } },
                    { "id": "b", "score": -0.2, "payload": {
                        "document_id": "d2", "chunk_index": 4, "content": "y", "token_count": 1 } },
                    { "id": "c", "score": 0.5 }
                ]
            })))
            .mount(&server)
            .await;

        let index = QdrantVectorIndex::new(&qdrant_config(&server.uri())).unwrap();
        let hits = index.search(&[1.0, 0.0], 3, None).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].score, 1.0);
        assert_eq!(hits[1].score, 0.0);

        let hits = index.search(&[1.0, 0.0], 3, Some("d2")).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].payload.chunk_index, 4);
    }

    #[tokio::test]
    async fn qdrant_missing_collection_searches_empty() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/collections/test/points/search"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        let index = QdrantVectorIndex::new(&qdrant_config(&server.uri())).unwrap();
        assert!(index.search(&[1.0], 5, None).await.unwrap().is_empty());
        assert!(!index.is_healthy().await);
    }

    #[tokio::test]
    async fn qdrant_server_error_is_vector_store_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/collections/test/points/search"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;
        let index = QdrantVectorIndex::new(&qdrant_config(&server.uri())).unwrap();
        let err = index.search(&[1.0], 5, None).await.unwrap_err();
        assert_eq!(err.kind(), grounded_core::ErrorKind::VectorStoreFailure);
    }
}
