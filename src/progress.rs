//! Ingestion progress reporting for `grounded ingest --wait`.
//!
//! Progress is emitted on **stderr** so stdout remains parseable for scripts.
//! [`watch_document`] polls the repository until the document reaches a
//! terminal status, reporting each change in embedded-chunk count.

use anyhow::{anyhow, Result};
use std::io::Write;
use std::time::Duration;

use grounded_core::models::{Document, DocumentStatus};

use crate::repository::Repository;

/// A single progress event for one document.
#[derive(Clone, Debug)]
pub enum IngestProgressEvent {
    /// Chunks embedded so far.
    Embedding {
        document_id: String,
        processed: u64,
        total: u64,
        percentage: f64,
    },
    /// The document reached READY or FAILED.
    Finished {
        document_id: String,
        status: DocumentStatus,
    },
}

/// Reports ingestion progress. Implementations write to stderr (human or JSON).
pub trait IngestProgressReporter: Send + Sync {
    fn report(&self, event: IngestProgressEvent);
}

/// Human-friendly progress on stderr: "ingest 3f2a…  embedding  1,234 / 5,000 chunks (24.7%)".
pub struct StderrProgress;

impl IngestProgressReporter for StderrProgress {
    fn report(&self, event: IngestProgressEvent) {
        let line = match &event {
            IngestProgressEvent::Embedding {
                document_id,
                processed,
                total,
                percentage,
            } => format!(
                "ingest {}  embedding  {} / {} chunks ({:.1}%)\n",
                document_id,
                format_number(*processed),
                format_number(*total),
                percentage
            ),
            IngestProgressEvent::Finished {
                document_id,
                status,
            } => format!("ingest {}  {}\n", document_id, status),
        };
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl IngestProgressReporter for JsonProgress {
    fn report(&self, event: IngestProgressEvent) {
        let obj = match &event {
            IngestProgressEvent::Embedding {
                document_id,
                processed,
                total,
                percentage,
            } => serde_json::json!({
                "event": "progress",
                "document_id": document_id,
                "phase": "embedding",
                "processed": processed,
                "total": total,
                "percentage": percentage,
            }),
            IngestProgressEvent::Finished {
                document_id,
                status,
            } => serde_json::json!({
                "event": "finished",
                "document_id": document_id,
                "status": status,
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
            let _ = stderr.flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl IngestProgressReporter for NoProgress {
    fn report(&self, _event: IngestProgressEvent) {}
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn IngestProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

/// Poll `document_id` every `interval` until it is READY or FAILED.
///
/// Reports an `Embedding` event whenever the processed count changes and a
/// final `Finished` event. Returns the terminal document.
pub async fn watch_document(
    repo: &Repository,
    document_id: &str,
    reporter: &dyn IngestProgressReporter,
    interval: Duration,
) -> Result<Document> {
    let mut last_processed: Option<i64> = None;
    loop {
        let doc = repo
            .get_document(document_id)
            .await?
            .ok_or_else(|| anyhow!("document not found: {}", document_id))?;

        if let Some(progress) = repo.progress(document_id).await? {
            if progress.total_chunks > 0 && last_processed != Some(progress.processed_chunks) {
                last_processed = Some(progress.processed_chunks);
                reporter.report(IngestProgressEvent::Embedding {
                    document_id: document_id.to_string(),
                    processed: progress.processed_chunks as u64,
                    total: progress.total_chunks as u64,
                    percentage: progress.percentage,
                });
            }
        }

        if doc.status.is_terminal() {
            reporter.report(IngestProgressEvent::Finished {
                document_id: document_id.to_string(),
                status: doc.status,
            });
            return Ok(doc);
        }
        tokio::time::sleep(interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{new_document, temp_pool};
    use grounded_core::status::StatusEvent;
    use std::sync::Mutex;

    #[test]
    fn format_number_comma() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(1), "1");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1234), "1,234");
        assert_eq!(format_number(1_234_567), "1,234,567");
    }

    #[derive(Default)]
    struct Recording(Mutex<Vec<IngestProgressEvent>>);

    impl IngestProgressReporter for Recording {
        fn report(&self, event: IngestProgressEvent) {
            self.0.lock().unwrap().push(event);
        }
    }

    #[tokio::test]
    async fn watch_returns_terminal_document() {
        let (_dir, pool) = temp_pool().await;
        let repo = Repository::new(pool);
        repo.insert_document(&new_document("d1", "Doc")).await.unwrap();
        repo.apply_status("d1", StatusEvent::Fail, Some("Text extraction failed: x"))
            .await
            .unwrap();

        let recorder = Recording::default();
        let doc = watch_document(&repo, "d1", &recorder, Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(doc.status, DocumentStatus::Failed);

        let events = recorder.0.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert!(matches!(
            events[0],
            IngestProgressEvent::Finished {
                status: DocumentStatus::Failed,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn watch_unknown_document_errors() {
        let (_dir, pool) = temp_pool().await;
        let repo = Repository::new(pool);
        let err = watch_document(&repo, "nope", &NoProgress, Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not found"));
    }
}
