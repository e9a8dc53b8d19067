//! LLM Client Abstraction (C5): a single `complete`/`stream` interface with
//! provider-agnostic options, fallback-chain advancement, rate-limit jitter
//! and context-overflow truncation (§4.5).

mod mock;
mod openai;

pub use mock::MockLlm;
pub use openai::ChatOpenAI;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::OrchestratorError;

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct LlmUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

#[derive(Clone, Debug)]
pub struct Completion {
    pub content: String,
    pub usage: Option<LlmUsage>,
}

/// One turn of conversation history, used only for context-overflow
/// truncation (§4.5 "truncate... from the oldest non-system turn").
#[derive(Clone, Debug)]
pub struct Turn {
    pub role: String,
    pub content: String,
}

pub type StreamCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Generation options recognized by every `LlmClient` implementation (§4.5).
#[derive(Clone, Default)]
pub struct LlmOptions {
    pub model: Option<String>,
    pub fallback_chain: Vec<(String, String)>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub stop: Vec<String>,
    pub tools: Option<serde_json::Value>,
    pub metadata: serde_json::Value,
    pub stream_callback: Option<StreamCallback>,
    pub history: Vec<Turn>,
}

impl std::fmt::Debug for LlmOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmOptions")
            .field("model", &self.model)
            .field("fallback_chain", &self.fallback_chain)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("stop", &self.stop)
            .field("has_stream_callback", &self.stream_callback.is_some())
            .finish()
    }
}

/// A single provider/model endpoint. `complete`/`stream` never retry or
/// advance a fallback chain themselves — that policy lives in
/// `complete_with_policy`, which composes many `LlmClient`s via a
/// `ProviderFactory`.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, prompt: &str, options: &LlmOptions) -> Result<Completion, OrchestratorError>;

    /// Default: call `complete` and invoke `stream_callback` once with the
    /// full content, for providers with no native token-level streaming.
    async fn stream(&self, prompt: &str, options: &LlmOptions) -> Result<Completion, OrchestratorError> {
        let completion = self.complete(prompt, options).await?;
        if let Some(cb) = &options.stream_callback {
            if !completion.content.is_empty() {
                cb(&completion.content);
            }
        }
        Ok(completion)
    }
}

/// Resolves a `(provider, model)` pair to a concrete client, so the
/// fallback chain in `LlmOptions` can be walked generically.
pub trait ProviderFactory: Send + Sync {
    fn client_for(&self, provider: &str, model: &str) -> Result<Arc<dyn LlmClient>, OrchestratorError>;
}

const MAX_RATE_LIMIT_RETRIES: u32 = 3;
const BASE_BACKOFF: Duration = Duration::from_millis(200);

fn truncate_oldest_non_system(history: &[Turn]) -> Vec<Turn> {
    let mut truncated = history.to_vec();
    if let Some(idx) = truncated.iter().position(|t| t.role != "system") {
        truncated.remove(idx);
    }
    truncated
}

/// Applies the §4.5 failure policy across a primary client and a fallback
/// chain: `rate_limited` retries in place with jittered backoff up to a
/// bounded budget; `timeout` and `provider_error` both advance to the next
/// `(provider, model)` pair; `context_overflow` truncates history from the
/// oldest non-system turn and retries once on the same client.
pub async fn complete_with_policy(
    factory: &dyn ProviderFactory,
    primary: Arc<dyn LlmClient>,
    primary_label: (String, String),
    prompt: &str,
    mut options: LlmOptions,
) -> Result<Completion, OrchestratorError> {
    let mut chain: Vec<(String, String, Arc<dyn LlmClient>)> =
        vec![(primary_label.0, primary_label.1, primary)];
    for (provider, model) in options.fallback_chain.clone() {
        let client = factory.client_for(&provider, &model)?;
        chain.push((provider, model, client));
    }

    let mut last_err = OrchestratorError::ProviderError("no provider attempted".into());
    for (provider, model, client) in chain {
        options.model = Some(model.clone());
        match attempt_with_retries(client.as_ref(), prompt, &mut options).await {
            Ok(completion) => return Ok(completion),
            Err(OrchestratorError::ProviderError(msg)) => {
                tracing::warn!(provider, model, error = %msg, "llm provider_error, advancing fallback chain");
                last_err = OrchestratorError::ProviderError(msg);
                continue;
            }
            Err(OrchestratorError::Timeout(msg)) => {
                tracing::warn!(provider, model, error = %msg, "llm timeout, advancing fallback chain");
                last_err = OrchestratorError::Timeout(msg);
                continue;
            }
            Err(other) => return Err(other),
        }
    }
    Err(last_err)
}

async fn attempt_with_retries(
    client: &dyn LlmClient,
    prompt: &str,
    options: &mut LlmOptions,
) -> Result<Completion, OrchestratorError> {
    let mut rate_limit_attempts = 0;
    let mut overflow_retried = false;

    loop {
        match client.complete(prompt, options).await {
            Ok(completion) => return Ok(completion),
            Err(OrchestratorError::RateLimited(msg)) => {
                rate_limit_attempts += 1;
                if rate_limit_attempts > MAX_RATE_LIMIT_RETRIES {
                    return Err(OrchestratorError::RateLimited(msg));
                }
                let jitter_ms = (rate_limit_attempts as u64 * 37) % 100;
                let backoff = BASE_BACKOFF * rate_limit_attempts + Duration::from_millis(jitter_ms);
                tokio::time::sleep(backoff).await;
            }
            Err(OrchestratorError::ContextOverflow(msg)) => {
                if overflow_retried {
                    return Err(OrchestratorError::ContextOverflow(msg));
                }
                overflow_retried = true;
                options.history = truncate_oldest_non_system(&options.history);
            }
            Err(other) => return Err(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyLlm {
        fail_times: AtomicU32,
        err: fn(String) -> OrchestratorError,
    }

    #[async_trait]
    impl LlmClient for FlakyLlm {
        async fn complete(&self, _prompt: &str, _options: &LlmOptions) -> Result<Completion, OrchestratorError> {
            if self.fail_times.load(Ordering::SeqCst) > 0 {
                self.fail_times.fetch_sub(1, Ordering::SeqCst);
                return Err((self.err)("transient".into()));
            }
            Ok(Completion {
                content: "ok".into(),
                usage: None,
            })
        }
    }

    struct NullFactory;
    impl ProviderFactory for NullFactory {
        fn client_for(&self, provider: &str, _model: &str) -> Result<Arc<dyn LlmClient>, OrchestratorError> {
            Err(OrchestratorError::ProviderError(format!("unknown provider {provider}")))
        }
    }

    #[tokio::test]
    async fn rate_limited_retries_then_succeeds() {
        let client: Arc<dyn LlmClient> = Arc::new(FlakyLlm {
            fail_times: AtomicU32::new(2),
            err: OrchestratorError::RateLimited,
        });
        let result = complete_with_policy(
            &NullFactory,
            client,
            ("openai".into(), "gpt".into()),
            "hi",
            LlmOptions::default(),
        )
        .await
        .unwrap();
        assert_eq!(result.content, "ok");
    }

    #[tokio::test]
    async fn provider_error_with_no_fallback_surfaces() {
        let client: Arc<dyn LlmClient> = Arc::new(FlakyLlm {
            fail_times: AtomicU32::new(99),
            err: OrchestratorError::ProviderError,
        });
        let err = complete_with_policy(
            &NullFactory,
            client,
            ("openai".into(), "gpt".into()),
            "hi",
            LlmOptions::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, OrchestratorError::ProviderError(_)));
    }

    struct TimeoutThenBackupFactory;
    impl ProviderFactory for TimeoutThenBackupFactory {
        fn client_for(&self, _provider: &str, _model: &str) -> Result<Arc<dyn LlmClient>, OrchestratorError> {
            Ok(Arc::new(FlakyLlm {
                fail_times: AtomicU32::new(0),
                err: OrchestratorError::Timeout,
            }))
        }
    }

    #[tokio::test]
    async fn timeout_advances_fallback_chain() {
        let client: Arc<dyn LlmClient> = Arc::new(FlakyLlm {
            fail_times: AtomicU32::new(99),
            err: OrchestratorError::Timeout,
        });
        let options = LlmOptions {
            fallback_chain: vec![("backup".into(), "gpt".into())],
            ..Default::default()
        };
        let result = complete_with_policy(
            &TimeoutThenBackupFactory,
            client,
            ("openai".into(), "gpt".into()),
            "hi",
            options,
        )
        .await
        .unwrap();
        assert_eq!(result.content, "ok");
    }

    #[tokio::test]
    async fn timeout_with_no_fallback_surfaces() {
        let client: Arc<dyn LlmClient> = Arc::new(FlakyLlm {
            fail_times: AtomicU32::new(99),
            err: OrchestratorError::Timeout,
        });
        let err = complete_with_policy(
            &NullFactory,
            client,
            ("openai".into(), "gpt".into()),
            "hi",
            LlmOptions::default(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, OrchestratorError::Timeout(_)));
    }

    #[tokio::test]
    async fn context_overflow_truncates_oldest_non_system_turn_once() {
        let client: Arc<dyn LlmClient> = Arc::new(FlakyLlm {
            fail_times: AtomicU32::new(1),
            err: OrchestratorError::ContextOverflow,
        });
        let options = LlmOptions {
            history: vec![
                Turn { role: "system".into(), content: "sys".into() },
                Turn { role: "user".into(), content: "old".into() },
                Turn { role: "user".into(), content: "new".into() },
            ],
            ..Default::default()
        };
        let result = complete_with_policy(
            &NullFactory,
            client,
            ("openai".into(), "gpt".into()),
            "hi",
            options,
        )
        .await
        .unwrap();
        assert_eq!(result.content, "ok");
    }

    #[tokio::test]
    async fn default_stream_invokes_callback_with_full_content() {
        let client = MockLlm::new("hello");
        let received = Arc::new(std::sync::Mutex::new(String::new()));
        let received2 = received.clone();
        let options = LlmOptions {
            stream_callback: Some(Arc::new(move |chunk| {
                received2.lock().unwrap().push_str(chunk);
            })),
            ..Default::default()
        };
        let completion = client.stream("hi", &options).await.unwrap();
        assert_eq!(completion.content, "hello");
        assert_eq!(*received.lock().unwrap(), "hello");
    }
}
