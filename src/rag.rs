//! Retrieval-augmented answering.
//!
//! [`RagEngine::answer`] embeds the question, searches the vector index,
//! scores confidence from the best match, assembles a bounded context, picks
//! the grounded or ungrounded system prompt, and calls the generator. Any
//! failure degrades to a [`QueryResult`] with `error` set; nothing is raised
//! to the caller.

use serde::Deserialize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

use grounded_core::context::{assemble_context, confidence, excerpt, is_grounded};
use grounded_core::generation::Generator;
use grounded_core::index::{VectorIndex, VectorMatch};
use grounded_core::models::{QueryResult, SourceReference};
use grounded_core::prompt::{system_prompt, user_message};
use grounded_core::RagError;

use crate::config::{RetrievalConfig, MAX_TOP_K};
use crate::embedding::EmbeddingGateway;
use crate::repository::Repository;

/// Body of `POST /api/query`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRequest {
    pub question: String,
    pub top_k: Option<usize>,
    pub confidence_threshold: Option<f32>,
    pub document_filter: Option<String>,
}

impl QueryRequest {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            ..Default::default()
        }
    }

    /// Reject blank questions and out-of-range parameters.
    pub fn validate(&self) -> Result<(), RagError> {
        if self.question.trim().is_empty() {
            return Err(RagError::empty_input("question must not be blank"));
        }
        if let Some(k) = self.top_k {
            if k == 0 || k > MAX_TOP_K {
                return Err(RagError::invalid_input(format!(
                    "topK must be between 1 and {}",
                    MAX_TOP_K
                )));
            }
        }
        if let Some(t) = self.confidence_threshold {
            if !(0.0..=1.0).contains(&t) {
                return Err(RagError::invalid_input(
                    "confidenceThreshold must be between 0 and 1",
                ));
            }
        }
        Ok(())
    }
}

fn elapsed_ms(since: Instant) -> u64 {
    since.elapsed().as_millis() as u64
}

pub struct RagEngine {
    gateway: EmbeddingGateway,
    index: Arc<dyn VectorIndex>,
    generator: Arc<dyn Generator>,
    repo: Option<Repository>,
    config: RetrievalConfig,
}

impl RagEngine {
    pub fn new(
        gateway: EmbeddingGateway,
        index: Arc<dyn VectorIndex>,
        generator: Arc<dyn Generator>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            gateway,
            index,
            generator,
            repo: None,
            config,
        }
    }

    /// Enrich source references with token counts and document titles.
    pub fn with_repository(mut self, repo: Repository) -> Self {
        self.repo = Some(repo);
        self
    }

    pub async fn is_healthy(&self) -> bool {
        self.index.is_healthy().await
    }

    pub fn backend(&self) -> &str {
        self.index.backend()
    }

    pub async fn answer(&self, request: &QueryRequest) -> QueryResult {
        let started = Instant::now();
        match self.run(request, started).await {
            Ok(result) => result,
            Err(e) => {
                error!(kind = %e.kind(), error = %e, "query failed");
                QueryResult::failed(format!("Failed to process query: {}", e), elapsed_ms(started))
            }
        }
    }

    async fn run(&self, request: &QueryRequest, started: Instant) -> Result<QueryResult, RagError> {
        request.validate()?;
        let top_k = request.top_k.unwrap_or(self.config.top_k);
        let threshold = request
            .confidence_threshold
            .unwrap_or(self.config.confidence_threshold);
        let filter = request
            .document_filter
            .as_deref()
            .filter(|f| !f.trim().is_empty());

        let query_vector = self.gateway.embed(&request.question).await?;
        let matches = self.index.search(&query_vector, top_k, filter).await?;
        let retrieval_time_ms = elapsed_ms(started);

        let confidence = confidence(&matches);
        let grounded = is_grounded(confidence, threshold);
        let context = assemble_context(&matches, self.config.max_context_tokens);
        info!(
            top_k,
            retrieved = matches.len(),
            confidence,
            grounded,
            context_tokens = context.estimated_tokens(),
            truncated = context.truncated,
            "retrieval complete"
        );

        let generation_started = Instant::now();
        let answer = self
            .generator
            .complete(
                system_prompt(grounded),
                &user_message(&request.question, &context.text),
            )
            .await
            .map_err(|e| RagError::generation(e.to_string()).with_source(e))?;
        let generation_time_ms = elapsed_ms(generation_started);

        let sources = self.source_references(&matches).await;

        Ok(QueryResult {
            answer: Some(answer),
            confidence,
            is_grounded: grounded,
            chunks_retrieved: matches.len(),
            sources,
            retrieval_time_ms,
            generation_time_ms,
            total_time_ms: elapsed_ms(started),
            error: None,
        })
    }

    async fn source_references(&self, matches: &[VectorMatch]) -> Vec<SourceReference> {
        let mut sources = Vec::with_capacity(matches.len());
        for m in matches {
            let stored = match &self.repo {
                Some(repo) => match repo.chunk_source(&m.id).await {
                    Ok(found) => found,
                    Err(e) => {
                        warn!(chunk_id = %m.id, error = %e, "source lookup failed");
                        None
                    }
                },
                None => None,
            };
            sources.push(SourceReference {
                document_id: m.payload.document_id.clone(),
                document_title: stored.as_ref().and_then(|s| s.document_title.clone()),
                chunk_index: m.payload.chunk_index,
                similarity_score: m.score,
                excerpt: excerpt(&m.payload.content, self.config.excerpt_chars),
                token_count: stored.map(|s| s.token_count),
            });
        }
        sources
    }
}
