//! Ingestion pipeline and background queue.
//!
//! One document runs through these stages:
//!
//! 1. status `PROCESSING`
//! 2. chunk the extracted text (zero chunks is fatal)
//! 3. record the chunk total and persist chunks as pending
//! 4. per chunk, sequentially: embed → upsert vector → attach vector reference.
//!    A failing chunk is logged and skipped. A cancelled retry stops the
//!    loop; the chunks not yet attempted count as failed.
//! 5. `READY` if enough chunks succeeded, otherwise `FAILED`
//!
//! Every status and count update commits on its own, so an interrupted run
//! leaves the last observed state behind.
//!
//! [`IngestQueue`] runs the pipeline on a pool of tokio workers fed by a
//! bounded channel; uploads enqueue and return.

use anyhow::{anyhow, Result};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use grounded_core::chunk::Chunker;
use grounded_core::index::VectorIndex;
use grounded_core::models::{Chunk, DocumentStatus, IngestProgress};
use grounded_core::status::StatusEvent;
use grounded_core::{ErrorKind, RagError};

use crate::embedding::EmbeddingGateway;
use crate::repository::Repository;

fn storage_err(e: anyhow::Error) -> RagError {
    RagError::storage(e.to_string()).with_source(e)
}

/// Final decision for a document whose chunks were all attempted.
///
/// `Err` carries the `FAILED` message.
pub fn completion_verdict(
    total: usize,
    succeeded: usize,
    min_success_ratio: f64,
) -> std::result::Result<(), String> {
    if succeeded == 0 {
        return Err(format!("Failed to process all {} chunks", total));
    }
    let ratio = succeeded as f64 / total.max(1) as f64;
    if ratio < min_success_ratio {
        return Err(format!(
            "Only {} of {} chunks processed (minimum success ratio {})",
            succeeded, total, min_success_ratio
        ));
    }
    Ok(())
}

/// What happened to one document.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestOutcome {
    pub status: DocumentStatus,
    pub total_chunks: usize,
    pub succeeded: usize,
    pub error_message: Option<String>,
}

impl IngestOutcome {
    fn failed(total_chunks: usize, succeeded: usize, message: String) -> Self {
        Self {
            status: DocumentStatus::Failed,
            total_chunks,
            succeeded,
            error_message: Some(message),
        }
    }
}

pub struct IngestionPipeline {
    repo: Repository,
    chunker: Chunker,
    gateway: EmbeddingGateway,
    index: Arc<dyn VectorIndex>,
    min_success_ratio: f64,
}

impl IngestionPipeline {
    pub fn new(
        repo: Repository,
        chunker: Chunker,
        gateway: EmbeddingGateway,
        index: Arc<dyn VectorIndex>,
        min_success_ratio: f64,
    ) -> Self {
        Self {
            repo,
            chunker,
            gateway,
            index,
            min_success_ratio,
        }
    }

    /// Run stages 1–5 for `document_id`.
    ///
    /// Never returns an error: every failure ends with the document marked
    /// `FAILED` and is reported in the outcome.
    pub async fn ingest(&self, document_id: &str, text: &str) -> IngestOutcome {
        match self.run(document_id, text).await {
            Ok(outcome) => outcome,
            Err(e) => {
                let message = format!("Processing failed: {}", e.message());
                error!(document_id, kind = %e.kind(), error = %e, "ingestion aborted");
                self.mark_failed(document_id, &message).await;
                IngestOutcome::failed(0, 0, message)
            }
        }
    }

    pub async fn progress(&self, document_id: &str) -> Result<Option<IngestProgress>> {
        self.repo.progress(document_id).await
    }

    async fn run(&self, document_id: &str, text: &str) -> Result<IngestOutcome, RagError> {
        let started = self
            .repo
            .apply_status(document_id, StatusEvent::Start, None)
            .await
            .map_err(storage_err)?;
        if started.is_none() {
            return Err(RagError::storage("document not found").with_document(document_id));
        }

        let chunks = self
            .chunker
            .chunk(document_id, text)
            .map_err(|e| e.with_document(document_id))?;
        if chunks.is_empty() {
            return Err(RagError::chunking("text produced no chunks").with_document(document_id));
        }
        let total = chunks.len();

        self.repo
            .set_total_chunks(document_id, total as i64)
            .await
            .map_err(storage_err)?;
        self.repo
            .replace_chunks(document_id, &chunks)
            .await
            .map_err(storage_err)?;
        info!(document_id, total_chunks = total, "document chunked");

        let mut succeeded = 0usize;
        for chunk in &chunks {
            match self.process_chunk(chunk).await {
                Ok(()) => {
                    succeeded += 1;
                    debug!(document_id, chunk_index = chunk.chunk_index, "chunk embedded");
                }
                Err(e) if e.kind() == ErrorKind::Cancelled => {
                    // later chunks would be cut short the same way
                    warn!(
                        document_id,
                        chunk_index = chunk.chunk_index,
                        succeeded,
                        error = %e,
                        "embedding cancelled, skipping remaining chunks"
                    );
                    break;
                }
                Err(e) => {
                    warn!(
                        document_id,
                        chunk_index = chunk.chunk_index,
                        kind = %e.kind(),
                        error = %e,
                        "chunk failed, continuing"
                    );
                }
            }
        }

        match completion_verdict(total, succeeded, self.min_success_ratio) {
            Ok(()) => {
                self.repo
                    .apply_status(document_id, StatusEvent::Complete, None)
                    .await
                    .map_err(storage_err)?;
                info!(
                    document_id,
                    succeeded,
                    failed = total - succeeded,
                    "document ready"
                );
                Ok(IngestOutcome {
                    status: DocumentStatus::Ready,
                    total_chunks: total,
                    succeeded,
                    error_message: None,
                })
            }
            Err(message) => {
                warn!(document_id, succeeded, total, "{}", message);
                self.mark_failed(document_id, &message).await;
                Ok(IngestOutcome::failed(total, succeeded, message))
            }
        }
    }

    async fn process_chunk(&self, chunk: &Chunk) -> Result<(), RagError> {
        let vector = self.gateway.embed(&chunk.content).await?;
        self.index
            .upsert(&chunk.id, &vector, &chunk.payload())
            .await?;
        self.repo
            .attach_vector(&chunk.id, &chunk.id, self.gateway.model_name())
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    async fn mark_failed(&self, document_id: &str, message: &str) {
        if let Err(e) = self
            .repo
            .apply_status(document_id, StatusEvent::Fail, Some(message))
            .await
        {
            error!(document_id, error = %e, "could not record failure");
        }
    }
}

// ============ Queue ============

/// A unit of background work: extracted text for an existing document.
#[derive(Debug, Clone)]
pub struct IngestJob {
    pub document_id: String,
    pub text: String,
}

/// Bounded job queue drained by a fixed set of workers.
///
/// Documents run concurrently across workers; chunks within a document are
/// processed sequentially by the pipeline.
pub struct IngestQueue {
    tx: Mutex<Option<mpsc::Sender<IngestJob>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl IngestQueue {
    pub fn start(pipeline: Arc<IngestionPipeline>, workers: usize, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel::<IngestJob>(capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));

        let handles = (0..workers.max(1))
            .map(|worker| {
                let rx = Arc::clone(&rx);
                let pipeline = Arc::clone(&pipeline);
                tokio::spawn(async move {
                    loop {
                        let job = rx.lock().await.recv().await;
                        let Some(job) = job else { break };
                        debug!(worker, document_id = %job.document_id, "ingest job picked up");
                        pipeline.ingest(&job.document_id, &job.text).await;
                    }
                    debug!(worker, "ingest worker stopped");
                })
            })
            .collect();

        Self {
            tx: Mutex::new(Some(tx)),
            workers: Mutex::new(handles),
        }
    }

    /// Enqueue a job. Waits only while the queue is at capacity.
    pub async fn submit(&self, job: IngestJob) -> Result<()> {
        let tx = self
            .tx
            .lock()
            .await
            .clone()
            .ok_or_else(|| anyhow!("ingestion queue is shut down"))?;
        tx.send(job)
            .await
            .map_err(|_| anyhow!("ingestion workers have stopped"))
    }

    /// Stop accepting jobs and wait for queued and in-flight jobs to finish.
    pub async fn shutdown(&self) {
        self.tx.lock().await.take();
        let handles: Vec<_> = self.workers.lock().await.drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "ingest worker panicked");
            }
        }
    }
}
