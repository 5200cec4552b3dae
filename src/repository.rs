//! SQLite persistence for documents and chunks.
//!
//! Every mutation is its own statement or short write transaction, so a crash in
//! the middle of ingestion leaves the document in the last committed state
//! (e.g. PROCESSING with a correct chunk total).

use anyhow::{bail, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use grounded_core::models::{Chunk, Document, DocumentStatus, IngestProgress};
use grounded_core::status::{transition, StatusEvent};

const STATUS_UPDATE_ATTEMPTS: usize = 5;

/// Token count and document title for a stored chunk, used to enrich
/// source references.
#[derive(Debug, Clone)]
pub struct ChunkSource {
    pub token_count: i64,
    pub document_title: Option<String>,
}

/// Document and chunk storage over a [`SqlitePool`].
#[derive(Clone)]
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn insert_document(&self, doc: &Document) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO documents (id, title, filename, description, owner, content_type,
                                   file_size_bytes, content_hash, status, total_chunks,
                                   error_message, uploaded_at, processed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&doc.id)
        .bind(&doc.title)
        .bind(&doc.filename)
        .bind(&doc.description)
        .bind(&doc.owner)
        .bind(&doc.content_type)
        .bind(doc.file_size_bytes)
        .bind(&doc.content_hash)
        .bind(doc.status.as_str())
        .bind(doc.total_chunks)
        .bind(&doc.error_message)
        .bind(doc.uploaded_at)
        .bind(doc.processed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_document(&self, id: &str) -> Result<Option<Document>> {
        let row = sqlx::query("SELECT * FROM documents WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| document_from_row(&r)).transpose()
    }

    /// All documents, newest first.
    pub async fn list_documents(&self) -> Result<Vec<Document>> {
        let rows = sqlx::query("SELECT * FROM documents ORDER BY uploaded_at DESC, id ASC")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(document_from_row).collect()
    }

    /// Delete a document; chunks and sqlite vectors cascade. Returns `false`
    /// if no such document existed.
    pub async fn delete_document(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Apply a lifecycle event as one conditional update.
    ///
    /// The new status is written only if the stored status is still the
    /// one the transition was computed from; a concurrent change causes a
    /// re-read.
    ///
    /// Terminal events stamp `processed_at`. `error_message` replaces the
    /// stored message (so `Complete` clears it). Returns the new status, or
    /// `None` if the document does not exist.
    pub async fn apply_status(
        &self,
        id: &str,
        event: StatusEvent,
        error_message: Option<&str>,
    ) -> Result<Option<DocumentStatus>> {
        for _ in 0..STATUS_UPDATE_ATTEMPTS {
            let current: Option<String> =
                sqlx::query_scalar("SELECT status FROM documents WHERE id = ?")
                    .bind(id)
                    .fetch_optional(&self.pool)
                    .await?;
            let Some(current) = current else {
                return Ok(None);
            };

            let next = transition(current.parse::<DocumentStatus>()?, event)?;
            let processed_at = next
                .is_terminal()
                .then(|| chrono::Utc::now().timestamp());

            let result = sqlx::query(
                r#"
                UPDATE documents
                SET status = ?, error_message = ?, processed_at = COALESCE(?, processed_at)
                WHERE id = ? AND status = ?
                "#,
            )
            .bind(next.as_str())
            .bind(error_message)
            .bind(processed_at)
            .bind(id)
            .bind(&current)
            .execute(&self.pool)
            .await?;

            if result.rows_affected() > 0 {
                return Ok(Some(next));
            }
        }
        bail!(
            "status of document {} kept changing, gave up after {} attempts",
            id,
            STATUS_UPDATE_ATTEMPTS
        )
    }

    /// Record the chunk total. The stored value never decreases.
    pub async fn set_total_chunks(&self, id: &str, total: i64) -> Result<()> {
        sqlx::query("UPDATE documents SET total_chunks = MAX(total_chunks, ?) WHERE id = ?")
            .bind(total)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_content_hash(&self, id: &str, hash: &str) -> Result<()> {
        sqlx::query("UPDATE documents SET content_hash = ? WHERE id = ?")
            .bind(hash)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Replace all chunks of a document in one transaction.
    pub async fn replace_chunks(&self, document_id: &str, chunks: &[Chunk]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM chunks WHERE document_id = ?")
            .bind(document_id)
            .execute(&mut *tx)
            .await?;

        for chunk in chunks {
            let metadata_json = chunk
                .metadata
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?;
            sqlx::query(
                r#"
                INSERT INTO chunks (id, document_id, chunk_index, content, token_count,
                                    vector_id, embedding_model, metadata_json)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&chunk.id)
            .bind(document_id)
            .bind(chunk.chunk_index)
            .bind(&chunk.content)
            .bind(chunk.token_count)
            .bind(&chunk.vector_id)
            .bind(&chunk.embedding_model)
            .bind(metadata_json)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Mark a chunk as embedded.
    pub async fn attach_vector(&self, chunk_id: &str, vector_id: &str, model: &str) -> Result<()> {
        let result = sqlx::query("UPDATE chunks SET vector_id = ?, embedding_model = ? WHERE id = ?")
            .bind(vector_id)
            .bind(model)
            .bind(chunk_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            bail!("chunk not found: {}", chunk_id);
        }
        Ok(())
    }

    pub async fn list_chunks(&self, document_id: &str) -> Result<Vec<Chunk>> {
        let rows = sqlx::query("SELECT * FROM chunks WHERE document_id = ? ORDER BY chunk_index")
            .bind(document_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(chunk_from_row).collect()
    }

    /// Number of chunks of a document that carry a vector reference.
    pub async fn count_processed(&self, document_id: &str) -> Result<i64> {
        let n: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM chunks WHERE document_id = ? AND vector_id IS NOT NULL",
        )
        .bind(document_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(n)
    }

    /// Embedding progress, or `None` for an unknown document.
    ///
    /// Reads only committed rows, so it is safe while ingestion is running.
    pub async fn progress(&self, document_id: &str) -> Result<Option<IngestProgress>> {
        let total: Option<i64> = sqlx::query_scalar("SELECT total_chunks FROM documents WHERE id = ?")
            .bind(document_id)
            .fetch_optional(&self.pool)
            .await?;
        let Some(total) = total else {
            return Ok(None);
        };
        let processed = self.count_processed(document_id).await?;
        Ok(Some(IngestProgress::new(total, processed)))
    }

    pub async fn chunk_source(&self, chunk_id: &str) -> Result<Option<ChunkSource>> {
        let row = sqlx::query(
            r#"
            SELECT c.token_count, d.title
            FROM chunks c
            LEFT JOIN documents d ON d.id = c.document_id
            WHERE c.id = ?
            "#,
        )
        .bind(chunk_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| ChunkSource {
            token_count: r.get("token_count"),
            document_title: r.get("title"),
        }))
    }
}

fn document_from_row(row: &SqliteRow) -> Result<Document> {
    let status: String = row.get("status");
    Ok(Document {
        id: row.get("id"),
        title: row.get("title"),
        filename: row.get("filename"),
        description: row.get("description"),
        owner: row.get("owner"),
        content_type: row.get("content_type"),
        file_size_bytes: row.get("file_size_bytes"),
        content_hash: row.get("content_hash"),
        status: status.parse()?,
        total_chunks: row.get("total_chunks"),
        error_message: row.get("error_message"),
        uploaded_at: row.get("uploaded_at"),
        processed_at: row.get("processed_at"),
    })
}

fn chunk_from_row(row: &SqliteRow) -> Result<Chunk> {
    let metadata_json: Option<String> = row.get("metadata_json");
    let metadata = metadata_json
        .as_deref()
        .map(serde_json::from_str)
        .transpose()?;
    Ok(Chunk {
        id: row.get("id"),
        document_id: row.get("document_id"),
        chunk_index: row.get("chunk_index"),
        content: row.get("content"),
        token_count: row.get("token_count"),
        vector_id: row.get("vector_id"),
        embedding_model: row.get("embedding_model"),
        metadata,
    })
}
