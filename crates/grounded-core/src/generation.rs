//! Generation trait.
//!
//! [`Generator`] is the black-box `complete(system, user) -> text`
//! collaborator. Chat-completion implementations live in the app crate.

use anyhow::Result;
use async_trait::async_trait;

/// A language model that answers a single system + user prompt pair.
#[async_trait]
pub trait Generator: Send + Sync {
    fn model_name(&self) -> &str;
    async fn complete(&self, system_prompt: &str, user_prompt: &str) -> Result<String>;
}
