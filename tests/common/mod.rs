//! Shared fixtures for integration tests: deterministic providers and a
//! temp-dir configuration.

#![allow(dead_code)]

use anyhow::{bail, Result};
use async_trait::async_trait;
use grounded::app::Services;
use grounded::config::Config;
use grounded_core::embedding::Embedder;
use grounded_core::generation::Generator;
use grounded_core::models::{Document, DocumentStatus};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

pub const DIMS: usize = 32;

/// Hashes each lowercase word into one of [`DIMS`] buckets, so texts that
/// share words have positive cosine similarity.
///
/// Calls whose 1-based number is in `fail_calls` return an error.
pub struct BagOfWords {
    calls: AtomicUsize,
    fail_calls: HashSet<usize>,
    fail_from: Option<usize>,
    fail_all: bool,
}

impl BagOfWords {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            fail_calls: HashSet::new(),
            fail_from: None,
            fail_all: false,
        })
    }

    /// Succeeds until call `first_failing`, then fails every call.
    pub fn failing_from(first_failing: usize) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            fail_calls: HashSet::new(),
            fail_from: Some(first_failing),
            fail_all: false,
        })
    }

    pub fn failing_on(calls: &[usize]) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            fail_calls: calls.iter().copied().collect(),
            fail_from: None,
            fail_all: false,
        })
    }

    pub fn always_failing() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            fail_calls: HashSet::new(),
            fail_from: None,
            fail_all: true,
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

pub fn bag_of_words(text: &str) -> Vec<f32> {
    let mut v = vec![0.0f32; DIMS];
    for word in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
    {
        let bucket = word
            .to_lowercase()
            .bytes()
            .fold(17usize, |h, b| h.wrapping_mul(31).wrapping_add(b as usize))
            % DIMS;
        v[bucket] += 1.0;
    }
    v
}

#[async_trait]
impl Embedder for BagOfWords {
    fn model_name(&self) -> &str {
        "bag-of-words"
    }

    fn dims(&self) -> usize {
        DIMS
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let past_limit = self.fail_from.is_some_and(|first| call >= first);
        if self.fail_all || past_limit || self.fail_calls.contains(&call) {
            bail!("provider unavailable (call {})", call);
        }
        Ok(bag_of_words(text))
    }
}

/// Records every prompt and answers with a fixed string.
pub struct RecordingGenerator {
    pub prompts: Mutex<Vec<(String, String)>>,
    fail: bool,
}

impl RecordingGenerator {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            prompts: Mutex::new(Vec::new()),
            fail: false,
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            prompts: Mutex::new(Vec::new()),
            fail: true,
        })
    }

    pub fn last_prompt(&self) -> Option<(String, String)> {
        self.prompts.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl Generator for RecordingGenerator {
    fn model_name(&self) -> &str {
        "recording"
    }

    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> Result<String> {
        self.prompts
            .lock()
            .unwrap()
            .push((system_prompt.to_string(), user_prompt.to_string()));
        if self.fail {
            bail!("model overloaded");
        }
        Ok("stub answer".to_string())
    }
}

/// Config rooted in `tmp`, with fast single-attempt embedding. `extra` is
/// appended TOML.
pub fn test_config(tmp: &TempDir, extra: &str) -> Config {
    let text = format!(
        r#"
[db]
path = "{}/data/grounded.sqlite"

[embedding]
max_attempts = 1
backoff_base_ms = 1

[server]
bind = "127.0.0.1:0"

{}
"#,
        tmp.path().display(),
        extra
    );
    toml::from_str(&text).unwrap()
}

pub async fn services(
    config: &Config,
    embedder: Arc<BagOfWords>,
    generator: Arc<RecordingGenerator>,
) -> Services {
    Services::with_providers(config, embedder, generator)
        .await
        .unwrap()
}

/// Insert an UPLOADING document directly.
pub async fn insert_document(services: &Services, id: &str, title: &str) {
    services
        .repo
        .insert_document(&Document {
            id: id.to_string(),
            title: title.to_string(),
            filename: format!("{}.txt", id),
            description: None,
            owner: "tester".to_string(),
            content_type: "text/plain".to_string(),
            file_size_bytes: 0,
            content_hash: String::new(),
            status: DocumentStatus::Uploading,
            total_chunks: 0,
            error_message: None,
            uploaded_at: chrono::Utc::now().timestamp(),
            processed_at: None,
        })
        .await
        .unwrap();
}

/// Poll until the document is READY or FAILED.
pub async fn wait_terminal(services: &Services, id: &str) -> Document {
    for _ in 0..200 {
        let doc = services.repo.get_document(id).await.unwrap().unwrap();
        if doc.status.is_terminal() {
            return doc;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("document {} did not finish ingestion", id);
}
