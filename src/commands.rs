//! CLI command implementations.
//!
//! Summaries go to stdout; logs and progress go to stderr.

use anyhow::{bail, Context, Result};
use std::path::Path;
use std::time::Duration;
use tracing::warn;

use grounded_core::models::DocumentStatus;

use crate::app::Services;
use crate::config::Config;
use crate::db;
use crate::progress::{watch_document, ProgressMode};
use crate::rag::QueryRequest;
use crate::repository::Repository;
use crate::upload::{infer_content_type, UploadRequest};
use crate::vector_store::create_vector_index;

const WATCH_INTERVAL: Duration = Duration::from_millis(250);

pub struct IngestArgs {
    pub title: Option<String>,
    pub owner: Option<String>,
    pub content_type: Option<String>,
    pub wait: bool,
    pub progress: ProgressMode,
}

/// Upload a local file and run its ingestion to completion.
pub async fn run_ingest(config: &Config, path: &Path, args: IngestArgs) -> Result<()> {
    let bytes = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let content_type = args
        .content_type
        .or_else(|| infer_content_type(&filename).map(str::to_string))
        .unwrap_or_else(|| "application/octet-stream".to_string());

    let services = Services::build(config).await?;
    let request = UploadRequest {
        filename,
        content_type,
        bytes,
        title: args.title,
        description: None,
        owner: args.owner,
    };
    let response = match services.uploader.upload(request).await {
        Ok(r) => r,
        Err(e) => {
            services.shutdown().await;
            return Err(e.into());
        }
    };

    println!("ingest {}", response.filename);
    println!("  document: {}", response.document_id);
    println!("  title: {}", response.title);
    println!("  size: {} bytes", response.file_size_bytes);

    let watched = if args.wait {
        let reporter = args.progress.reporter();
        Some(
            watch_document(
                &services.repo,
                &response.document_id,
                reporter.as_ref(),
                WATCH_INTERVAL,
            )
            .await,
        )
    } else {
        None
    };
    drain(&services).await;

    let Some(watched) = watched else {
        println!("ok");
        return Ok(());
    };
    let doc = watched?;
    println!("  status: {}", doc.status);
    println!("  chunks: {}", doc.total_chunks);
    if doc.status == DocumentStatus::Failed {
        bail!(
            "ingestion failed: {}",
            doc.error_message.unwrap_or_default()
        );
    }
    println!("ok");
    Ok(())
}

/// Shut down, cancelling retry backoff on Ctrl-C so the exit is prompt.
async fn drain(services: &Services) {
    let shutdown = services.shutdown();
    tokio::pin!(shutdown);
    tokio::select! {
        _ = &mut shutdown => return,
        _ = tokio::signal::ctrl_c() => {
            warn!("interrupted, cancelling embedding retries");
            services.cancel_retries();
        }
    }
    shutdown.await;
}

pub async fn run_status(config: &Config, id: &str) -> Result<()> {
    let pool = db::connect(config).await?;
    let repo = Repository::new(pool.clone());

    let Some(doc) = repo.get_document(id).await? else {
        pool.close().await;
        bail!("document not found: {}", id);
    };
    let progress = repo.progress(id).await?;
    pool.close().await;

    println!("{}  {}", doc.id, doc.title);
    println!("  status: {} ({})", doc.status, doc.status.message());
    if let Some(p) = progress {
        println!(
            "  chunks: {} / {} ({:.1}%)",
            p.processed_chunks, p.total_chunks, p.percentage
        );
    }
    if let Some(err) = &doc.error_message {
        println!("  error: {}", err);
    }
    Ok(())
}

pub async fn run_documents(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let docs = Repository::new(pool.clone()).list_documents().await?;
    pool.close().await;

    if docs.is_empty() {
        println!("No documents.");
        return Ok(());
    }
    for doc in docs {
        println!(
            "{}  {:<10}  {:>5} chunks  {}",
            doc.id,
            doc.status.as_str(),
            doc.total_chunks,
            doc.title
        );
    }
    Ok(())
}

pub async fn run_delete(config: &Config, id: &str) -> Result<()> {
    let pool = db::connect(config).await?;
    let repo = Repository::new(pool.clone());
    let index = create_vector_index(&config.vector_store, pool.clone())?;

    if repo.get_document(id).await?.is_none() {
        pool.close().await;
        bail!("document not found: {}", id);
    }
    index.delete_document(id).await?;
    repo.delete_document(id).await?;
    pool.close().await;

    println!("deleted {}", id);
    Ok(())
}

pub struct QueryArgs {
    pub top_k: Option<usize>,
    pub threshold: Option<f32>,
    pub document: Option<String>,
    pub json: bool,
}

pub async fn run_query(config: &Config, question: &str, args: QueryArgs) -> Result<()> {
    let request = QueryRequest {
        question: question.to_string(),
        top_k: args.top_k,
        confidence_threshold: args.threshold,
        document_filter: args.document,
    };
    request.validate()?;

    let services = Services::build(config).await?;
    let result = services.engine.answer(&request).await;
    services.shutdown().await;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else if result.error.is_none() {
        println!("{}", result.answer.as_deref().unwrap_or_default());
        println!();
        println!(
            "confidence: {:.2} ({})",
            result.confidence,
            if result.is_grounded {
                "grounded"
            } else {
                "not grounded"
            }
        );
        println!(
            "timing: retrieval {}ms, generation {}ms, total {}ms",
            result.retrieval_time_ms, result.generation_time_ms, result.total_time_ms
        );
        for (i, source) in result.sources.iter().enumerate() {
            println!(
                "{}. [{:.2}] {} #{}",
                i + 1,
                source.similarity_score,
                source
                    .document_title
                    .as_deref()
                    .unwrap_or(&source.document_id),
                source.chunk_index
            );
            println!("    {}", source.excerpt);
        }
    }

    if let Some(err) = result.error {
        bail!(err);
    }
    Ok(())
}
