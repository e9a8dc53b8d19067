//! Fixed-response `LlmClient` for tests and offline development.

use async_trait::async_trait;

use super::{Completion, LlmClient, LlmOptions};
use crate::error::OrchestratorError;

pub struct MockLlm {
    content: String,
}

impl MockLlm {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
        }
    }
}

#[async_trait]
impl LlmClient for MockLlm {
    async fn complete(&self, _prompt: &str, _options: &LlmOptions) -> Result<Completion, OrchestratorError> {
        Ok(Completion {
            content: self.content.clone(),
            usage: None,
        })
    }
}
