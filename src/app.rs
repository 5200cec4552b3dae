//! Wiring of the long-lived services shared by the CLI and the HTTP server.

use anyhow::Result;
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use grounded_core::chunk::Chunker;
use grounded_core::embedding::Embedder;
use grounded_core::generation::Generator;
use grounded_core::index::VectorIndex;

use crate::config::Config;
use crate::db;
use crate::embedding::{create_embedder, EmbeddingGateway, RetryPolicy};
use crate::generation::create_generator;
use crate::ingest::{IngestQueue, IngestionPipeline};
use crate::migrate;
use crate::rag::RagEngine;
use crate::repository::Repository;
use crate::upload::Uploader;
use crate::vector_store::create_vector_index;

/// Everything a request or command needs, built once per process.
pub struct Services {
    pub config: Arc<Config>,
    pub pool: SqlitePool,
    pub repo: Repository,
    pub index: Arc<dyn VectorIndex>,
    pub pipeline: Arc<IngestionPipeline>,
    pub queue: Arc<IngestQueue>,
    pub uploader: Arc<Uploader>,
    pub engine: Arc<RagEngine>,
    cancel: CancellationToken,
}

impl Services {
    /// Connect to the database, apply migrations, and build the providers
    /// named in `config`.
    pub async fn build(config: &Config) -> Result<Self> {
        let embedder = create_embedder(&config.embedding)?;
        let generator = create_generator(&config.generation)?;
        Self::with_providers(config, embedder, generator).await
    }

    /// Like [`build`](Self::build) with caller-supplied embedding and
    /// generation providers.
    pub async fn with_providers(
        config: &Config,
        embedder: Arc<dyn Embedder>,
        generator: Arc<dyn Generator>,
    ) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate::apply(&pool).await?;

        let repo = Repository::new(pool.clone());
        let index = create_vector_index(&config.vector_store, pool.clone())?;
        let cancel = CancellationToken::new();
        let gateway = EmbeddingGateway::new(
            embedder,
            RetryPolicy::from_config(&config.embedding),
            cancel.clone(),
        );

        let pipeline = Arc::new(IngestionPipeline::new(
            repo.clone(),
            Chunker::new(config.chunking.chunker_config()),
            gateway.clone(),
            Arc::clone(&index),
            config.ingestion.min_success_ratio,
        ));
        let queue = Arc::new(IngestQueue::start(
            Arc::clone(&pipeline),
            config.ingestion.workers,
            config.ingestion.queue_capacity,
        ));
        let uploader = Arc::new(Uploader::new(
            repo.clone(),
            Arc::clone(&queue),
            config.upload.clone(),
        ));
        let engine = Arc::new(
            RagEngine::new(
                gateway,
                Arc::clone(&index),
                generator,
                config.retrieval.clone(),
            )
            .with_repository(repo.clone()),
        );

        info!(
            backend = index.backend(),
            embedding = %config.embedding.provider,
            generation = %config.generation.provider,
            workers = config.ingestion.workers,
            "services ready"
        );

        Ok(Self {
            config: Arc::new(config.clone()),
            pool,
            repo,
            index,
            pipeline,
            queue,
            uploader,
            engine,
            cancel,
        })
    }

    /// Drain queued ingestion jobs, then close the database.
    pub async fn shutdown(&self) {
        self.queue.shutdown().await;
        self.pool.close().await;
    }

    /// Interrupt embedding retries that are sleeping in backoff. An affected
    /// document stops embedding and ends `READY` or `FAILED` on the chunks
    /// it already has; the queue keeps running.
    pub fn cancel_retries(&self) {
        self.cancel.cancel();
    }
}
