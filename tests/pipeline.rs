//! End-to-end tests of ingestion and answering with deterministic
//! providers, a temp SQLite database, and the real vector backends.

mod common;

use async_trait::async_trait;
use common::*;
use grounded::embedding::{EmbeddingGateway, RetryPolicy};
use grounded::ingest::IngestJob;
use grounded::rag::{QueryRequest, RagEngine};
use grounded::config::RetrievalConfig;
use grounded_core::index::memory::InMemoryVectorIndex;
use grounded_core::index::{VectorIndex, VectorMatch};
use grounded_core::models::{ChunkPayload, DocumentStatus};
use grounded_core::prompt::{GROUNDED_SYSTEM_PROMPT, UNGROUNDED_SYSTEM_PROMPT};
use std::sync::Arc;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

const FRUIT: &str = "Apples grow on trees in orchards. Bananas are yellow and curved. \
Cherries are small and red fruit. Dates come from palm trees. \
Elderberries make good syrup. Figs are sweet and soft inside.";

const SMALL_CHUNKS: &str = "[chunking]\nchunk_size_tokens = 10\noverlap_tokens = 0\n";

// ─── Ingestion ──────────────────────────────────────────────────────

#[tokio::test]
async fn chunk_failures_are_skipped_and_document_is_ready() {
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&tmp, SMALL_CHUNKS);
    let embedder = BagOfWords::failing_on(&[2, 3]);
    let s = services(&cfg, embedder.clone(), RecordingGenerator::new()).await;
    insert_document(&s, "fruit", "Fruit Guide").await;

    let outcome = s.pipeline.ingest("fruit", FRUIT).await;
    let total = outcome.total_chunks;
    assert!(total >= 4, "expected several chunks, got {}", total);
    assert_eq!(outcome.status, DocumentStatus::Ready);
    assert_eq!(outcome.succeeded, total - 2);

    let doc = s.repo.get_document("fruit").await.unwrap().unwrap();
    assert_eq!(doc.status, DocumentStatus::Ready);
    assert_eq!(doc.total_chunks, total as i64);
    assert!(doc.processed_at.is_some());
    assert!(doc.error_message.is_none());

    let chunks = s.repo.list_chunks("fruit").await.unwrap();
    assert_eq!(chunks.len(), total);
    let embedded = chunks.iter().filter(|c| c.vector_id.is_some()).count();
    assert_eq!(embedded, total - 2);
    assert!(chunks[1].vector_id.is_none());
    assert!(chunks[2].vector_id.is_none());
    assert_eq!(chunks[0].embedding_model.as_deref(), Some("bag-of-words"));

    let progress = s.pipeline.progress("fruit").await.unwrap().unwrap();
    assert_eq!(progress.total_chunks, total as i64);
    assert_eq!(progress.processed_chunks, (total - 2) as i64);
    let expected = (total - 2) as f64 * 100.0 / total as f64;
    assert!((progress.percentage - expected).abs() < 1e-9);

    assert!(s.index.exists(&chunks[0].id).await.unwrap());
    assert!(!s.index.exists(&chunks[1].id).await.unwrap());
    s.shutdown().await;
}

#[tokio::test]
async fn all_chunks_failing_marks_document_failed() {
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&tmp, SMALL_CHUNKS);
    let s = services(&cfg, BagOfWords::always_failing(), RecordingGenerator::new()).await;
    insert_document(&s, "fruit", "Fruit Guide").await;

    let outcome = s.pipeline.ingest("fruit", FRUIT).await;
    assert_eq!(outcome.status, DocumentStatus::Failed);
    assert_eq!(outcome.succeeded, 0);

    let doc = s.repo.get_document("fruit").await.unwrap().unwrap();
    assert_eq!(doc.status, DocumentStatus::Failed);
    assert_eq!(
        doc.error_message.as_deref(),
        Some(format!("Failed to process all {} chunks", outcome.total_chunks).as_str())
    );
    // chunk total survives the failure for progress reporting
    assert_eq!(doc.total_chunks, outcome.total_chunks as i64);
    let progress = s.pipeline.progress("fruit").await.unwrap().unwrap();
    assert_eq!(progress.processed_chunks, 0);
    assert_eq!(progress.percentage, 0.0);
    s.shutdown().await;
}

#[tokio::test]
async fn minimum_success_ratio_is_enforced() {
    let tmp = TempDir::new().unwrap();
    let extra = format!("{}\n[ingestion]\nmin_success_ratio = 0.9\n", SMALL_CHUNKS);
    let cfg = test_config(&tmp, &extra);
    let s = services(&cfg, BagOfWords::failing_on(&[1]), RecordingGenerator::new()).await;
    insert_document(&s, "fruit", "Fruit Guide").await;

    let outcome = s.pipeline.ingest("fruit", FRUIT).await;
    assert_eq!(outcome.status, DocumentStatus::Failed);
    let message = outcome.error_message.unwrap();
    assert!(message.starts_with("Only "), "{}", message);
    assert!(message.contains("minimum success ratio 0.9"), "{}", message);
    s.shutdown().await;
}

#[tokio::test]
async fn blank_text_fails_the_document() {
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&tmp, "");
    let embedder = BagOfWords::new();
    let s = services(&cfg, embedder.clone(), RecordingGenerator::new()).await;
    insert_document(&s, "blank", "Blank").await;

    let outcome = s.pipeline.ingest("blank", "   \n\t ").await;
    assert_eq!(outcome.status, DocumentStatus::Failed);

    let doc = s.repo.get_document("blank").await.unwrap().unwrap();
    assert_eq!(doc.status, DocumentStatus::Failed);
    assert!(doc
        .error_message
        .unwrap()
        .starts_with("Processing failed:"));
    assert_eq!(embedder.calls(), 0);
    s.shutdown().await;
}

#[tokio::test]
async fn cancelled_retries_fail_chunks_not_the_run() {
    let tmp = TempDir::new().unwrap();
    let mut cfg = test_config(&tmp, SMALL_CHUNKS);
    cfg.embedding.max_attempts = 3;
    cfg.embedding.backoff_base_ms = 60_000;
    let embedder = BagOfWords::always_failing();
    let s = services(&cfg, embedder.clone(), RecordingGenerator::new()).await;
    insert_document(&s, "fruit", "Fruit Guide").await;

    s.cancel_retries();
    let outcome = s.pipeline.ingest("fruit", FRUIT).await;
    assert_eq!(outcome.status, DocumentStatus::Failed);
    assert_eq!(outcome.succeeded, 0);
    assert_eq!(
        outcome.error_message.as_deref(),
        Some(format!("Failed to process all {} chunks", outcome.total_chunks).as_str())
    );
    // one attempt, then the backoff sleep is cut short and the rest skipped
    assert_eq!(embedder.calls(), 1);

    let doc = s.repo.get_document("fruit").await.unwrap().unwrap();
    assert_eq!(doc.total_chunks, outcome.total_chunks as i64);
    s.shutdown().await;
}

#[tokio::test]
async fn cancelled_retries_keep_chunks_already_embedded() {
    let tmp = TempDir::new().unwrap();
    let mut cfg = test_config(&tmp, SMALL_CHUNKS);
    cfg.embedding.max_attempts = 3;
    cfg.embedding.backoff_base_ms = 60_000;
    let embedder = BagOfWords::failing_from(2);
    let s = services(&cfg, embedder.clone(), RecordingGenerator::new()).await;
    insert_document(&s, "fruit", "Fruit Guide").await;

    s.cancel_retries();
    let outcome = s.pipeline.ingest("fruit", FRUIT).await;
    let total = outcome.total_chunks;
    assert!(total >= 4, "expected several chunks, got {}", total);
    assert_eq!(outcome.status, DocumentStatus::Ready);
    assert_eq!(outcome.succeeded, 1);
    assert_eq!(embedder.calls(), 2);

    let doc = s.repo.get_document("fruit").await.unwrap().unwrap();
    assert_eq!(doc.status, DocumentStatus::Ready);
    assert!(doc.error_message.is_none());

    let progress = s.pipeline.progress("fruit").await.unwrap().unwrap();
    assert_eq!(progress.processed_chunks, 1);
    assert_eq!(progress.total_chunks, total as i64);

    let chunks = s.repo.list_chunks("fruit").await.unwrap();
    assert!(s.index.exists(&chunks[0].id).await.unwrap());
    assert!(!s.index.exists(&chunks[1].id).await.unwrap());
    s.shutdown().await;
}

#[tokio::test]
async fn unknown_document_is_reported_not_raised() {
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&tmp, "");
    let s = services(&cfg, BagOfWords::new(), RecordingGenerator::new()).await;

    let outcome = s.pipeline.ingest("ghost", FRUIT).await;
    assert_eq!(outcome.status, DocumentStatus::Failed);
    assert!(s.pipeline.progress("ghost").await.unwrap().is_none());
    s.shutdown().await;
}

#[tokio::test]
async fn queue_runs_documents_in_background() {
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&tmp, "[ingestion]\nworkers = 2\nqueue_capacity = 1\n");
    let s = services(&cfg, BagOfWords::new(), RecordingGenerator::new()).await;

    for id in ["a", "b", "c"] {
        insert_document(&s, id, id).await;
        s.queue
            .submit(IngestJob {
                document_id: id.to_string(),
                text: format!("Document {} is about {}. It has one more sentence.", id, id),
            })
            .await
            .unwrap();
    }

    for id in ["a", "b", "c"] {
        let doc = wait_terminal(&s, id).await;
        assert_eq!(doc.status, DocumentStatus::Ready, "{}", id);
        assert_eq!(doc.total_chunks, 1);
    }

    s.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_workers_finish_every_document() {
    let tmp = TempDir::new().unwrap();
    let extra = format!(
        "{}\n[ingestion]\nworkers = 8\nqueue_capacity = 4\n",
        SMALL_CHUNKS
    );
    let cfg = test_config(&tmp, &extra);
    let s = Arc::new(services(&cfg, BagOfWords::new(), RecordingGenerator::new()).await);

    let ids: Vec<String> = (0..24).map(|i| format!("doc-{:02}", i)).collect();
    for id in &ids {
        insert_document(&s, id, id).await;
    }

    let done = CancellationToken::new();
    let poller = {
        let s = Arc::clone(&s);
        let ids = ids.clone();
        let done = done.clone();
        tokio::spawn(async move {
            let mut reads = 0usize;
            while !done.is_cancelled() {
                for id in &ids {
                    let p = s.repo.progress(id).await.unwrap().unwrap();
                    assert!(
                        (0.0..=100.0).contains(&p.percentage),
                        "{} reported {}%",
                        id,
                        p.percentage
                    );
                    assert!(p.processed_chunks >= 0);
                    reads += 1;
                }
                tokio::task::yield_now().await;
            }
            reads
        })
    };

    for id in &ids {
        s.queue
            .submit(IngestJob {
                document_id: id.clone(),
                text: FRUIT.to_string(),
            })
            .await
            .unwrap();
    }

    for id in &ids {
        let doc = wait_terminal(&s, id).await;
        assert_eq!(doc.status, DocumentStatus::Ready, "{}: {:?}", id, doc.error_message);
        assert!(doc.total_chunks >= 4);
        let p = s.repo.progress(id).await.unwrap().unwrap();
        assert_eq!(p.processed_chunks, doc.total_chunks);
        assert_eq!(p.percentage, 100.0);
    }

    done.cancel();
    assert!(poller.await.unwrap() > 0);
    s.shutdown().await;
}

// ─── Answering ──────────────────────────────────────────────────────

/// Returns the same matches for every search.
struct FixedIndex(Vec<VectorMatch>);

#[async_trait]
impl VectorIndex for FixedIndex {
    fn backend(&self) -> &str {
        "fixed"
    }
    async fn upsert(&self, _: &str, _: &[f32], _: &ChunkPayload) -> grounded_core::error::Result<()> {
        Ok(())
    }
    async fn search(
        &self,
        _: &[f32],
        k: usize,
        _: Option<&str>,
    ) -> grounded_core::error::Result<Vec<VectorMatch>> {
        Ok(self.0.iter().take(k).cloned().collect())
    }
    async fn exists(&self, _: &str) -> grounded_core::error::Result<bool> {
        Ok(false)
    }
    async fn delete_document(&self, _: &str) -> grounded_core::error::Result<()> {
        Ok(())
    }
    async fn delete_all(&self) -> grounded_core::error::Result<()> {
        Ok(())
    }
    async fn is_healthy(&self) -> bool {
        true
    }
}

fn hit(document_id: &str, chunk_index: i64, score: f32, content: &str) -> VectorMatch {
    VectorMatch {
        id: format!("{}-{}", document_id, chunk_index),
        score,
        payload: ChunkPayload {
            document_id: document_id.to_string(),
            chunk_index,
            content: content.to_string(),
            token_count: 5,
        },
    }
}

fn engine(index: Arc<dyn VectorIndex>, generator: Arc<RecordingGenerator>) -> RagEngine {
    let gateway = EmbeddingGateway::new(
        BagOfWords::new(),
        RetryPolicy::default(),
        CancellationToken::new(),
    );
    RagEngine::new(gateway, index, generator, RetrievalConfig::default())
}

#[tokio::test]
async fn strong_match_selects_grounded_prompt() {
    let index = Arc::new(FixedIndex(vec![
        hit("d1", 0, 0.94, "Leave is 25 days per year."),
        hit("d2", 3, 0.61, "Holidays are listed separately."),
    ]));
    let generator = RecordingGenerator::new();
    let rag = engine(index, generator.clone());

    let mut request = QueryRequest::new("How many leave days?");
    request.top_k = Some(5);
    request.confidence_threshold = Some(0.7);
    let result = rag.answer(&request).await;

    assert!(result.error.is_none());
    assert_eq!(result.confidence, 0.94);
    assert!(result.is_grounded);
    assert_eq!(result.chunks_retrieved, 2);
    assert_eq!(result.answer.as_deref(), Some("stub answer"));
    assert_eq!(result.sources.len(), 2);
    assert_eq!(result.sources[0].document_id, "d1");
    assert_eq!(result.sources[0].similarity_score, 0.94);
    assert!(result.sources[0].token_count.is_none());

    let (system, user) = generator.last_prompt().unwrap();
    assert_eq!(system, GROUNDED_SYSTEM_PROMPT);
    assert!(user.starts_with("[Document: d1 | Chunk 0 | Similarity: 0.94]\nLeave is 25 days per year."));
    assert!(user.ends_with("Question: How many leave days?\n\nAnswer: "));
}

#[tokio::test]
async fn weak_match_selects_ungrounded_prompt() {
    let index = Arc::new(FixedIndex(vec![hit("d1", 0, 0.42, "Unrelated text.")]));
    let generator = RecordingGenerator::new();
    let rag = engine(index, generator.clone());

    let result = rag.answer(&QueryRequest::new("What is the capital?")).await;
    assert_eq!(result.confidence, 0.42);
    assert!(!result.is_grounded);
    assert_eq!(generator.last_prompt().unwrap().0, UNGROUNDED_SYSTEM_PROMPT);
}

#[tokio::test]
async fn empty_corpus_still_generates() {
    let generator = RecordingGenerator::new();
    let rag = engine(Arc::new(InMemoryVectorIndex::new()), generator.clone());

    let result = rag.answer(&QueryRequest::new("What is X?")).await;
    assert!(result.error.is_none());
    assert_eq!(result.confidence, 0.0);
    assert!(!result.is_grounded);
    assert_eq!(result.chunks_retrieved, 0);
    assert!(result.sources.is_empty());
    assert_eq!(result.answer.as_deref(), Some("stub answer"));

    let (system, user) = generator.last_prompt().unwrap();
    assert_eq!(system, UNGROUNDED_SYSTEM_PROMPT);
    assert_eq!(
        user,
        "Question: What is X?\n\n(No relevant context found in documents)"
    );
}

#[tokio::test]
async fn generation_failure_degrades_to_error_result() {
    let index = Arc::new(FixedIndex(vec![hit("d1", 0, 0.9, "Some context.")]));
    let rag = engine(index, RecordingGenerator::failing());

    let result = rag.answer(&QueryRequest::new("Anything?")).await;
    assert!(result.answer.is_none());
    assert_eq!(result.confidence, 0.0);
    assert!(!result.is_grounded);
    assert!(result.sources.is_empty());
    let error = result.error.unwrap();
    assert!(error.starts_with("Failed to process query:"), "{}", error);
    assert!(error.contains("model overloaded"), "{}", error);
}

#[tokio::test]
async fn blank_question_degrades_to_error_result() {
    let generator = RecordingGenerator::new();
    let rag = engine(Arc::new(InMemoryVectorIndex::new()), generator.clone());

    let result = rag.answer(&QueryRequest::new("  ")).await;
    assert!(result.error.unwrap().contains("question must not be blank"));
    assert!(generator.last_prompt().is_none());
}

#[tokio::test]
async fn ingested_documents_are_retrieved_with_titles() {
    let tmp = TempDir::new().unwrap();
    let cfg = test_config(&tmp, "");
    let generator = RecordingGenerator::new();
    let s = services(&cfg, BagOfWords::new(), generator.clone()).await;

    insert_document(&s, "fruit", "Fruit Guide").await;
    insert_document(&s, "cars", "Car Manual").await;
    s.pipeline
        .ingest("fruit", "Apples grow on trees in orchards.")
        .await;
    s.pipeline
        .ingest("cars", "Engines need oil changes. Tyres need pressure checks.")
        .await;

    let mut request = QueryRequest::new("Apples grow on trees in orchards?");
    request.confidence_threshold = Some(0.0);
    let result = s.engine.answer(&request).await;
    assert!(result.error.is_none(), "{:?}", result.error);
    assert!(result.is_grounded);
    assert_eq!(result.sources[0].document_id, "fruit");
    assert_eq!(result.sources[0].document_title.as_deref(), Some("Fruit Guide"));
    assert!(result.sources[0].token_count.is_some());
    assert!(result.sources[0].excerpt.contains("Apples"));

    // document filter applies after the top-k search
    request.document_filter = Some("cars".to_string());
    let filtered = s.engine.answer(&request).await;
    assert!(filtered.sources.iter().all(|src| src.document_id == "cars"));

    // deleting the document removes its vectors
    s.index.delete_document("fruit").await.unwrap();
    assert!(s.repo.delete_document("fruit").await.unwrap());
    let after = s.engine.answer(&QueryRequest::new("apples orchards")).await;
    assert!(after.sources.iter().all(|src| src.document_id != "fruit"));

    s.shutdown().await;
}
