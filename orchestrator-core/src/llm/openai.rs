//! OpenAI Chat Completions `LlmClient` (ChatOpenAI), grounded on the
//! upstream project's `graphweave::llm::openai` client but narrowed to the
//! `complete`/`stream` interface of this crate.

use async_trait::async_trait;
use tokio_stream::StreamExt;
use tracing::{debug, trace};

use async_openai::{
    config::OpenAIConfig,
    types::chat::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessage,
        ChatCompletionRequestUserMessage, ChatCompletionTool, ChatCompletionToolChoiceOption,
        ChatCompletionTools, CreateChatCompletionRequestArgs, FunctionObject, ToolChoiceOptions,
    },
    Client,
};

use super::{Completion, LlmClient, LlmOptions, LlmUsage};
use crate::error::OrchestratorError;

pub struct ChatOpenAI {
    client: Client<OpenAIConfig>,
    default_model: String,
}

impl ChatOpenAI {
    /// Builds a client with the default config (`OPENAI_API_KEY` from env).
    pub fn new(default_model: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            default_model: default_model.into(),
        }
    }

    pub fn with_config(config: OpenAIConfig, default_model: impl Into<String>) -> Self {
        Self {
            client: Client::with_config(config),
            default_model: default_model.into(),
        }
    }

    fn build_request(
        &self,
        prompt: &str,
        options: &LlmOptions,
        stream: bool,
    ) -> Result<async_openai::types::chat::CreateChatCompletionRequest, OrchestratorError> {
        let mut messages: Vec<ChatCompletionRequestMessage> = options
            .history
            .iter()
            .map(|t| {
                if t.role == "system" {
                    ChatCompletionRequestMessage::System(ChatCompletionRequestSystemMessage::from(
                        t.content.as_str(),
                    ))
                } else {
                    ChatCompletionRequestMessage::User(ChatCompletionRequestUserMessage::from(
                        t.content.as_str(),
                    ))
                }
            })
            .collect();
        messages.push(ChatCompletionRequestMessage::User(
            ChatCompletionRequestUserMessage::from(prompt),
        ));

        let mut args = CreateChatCompletionRequestArgs::default();
        args.model(options.model.clone().unwrap_or_else(|| self.default_model.clone()));
        args.messages(messages);
        args.stream(stream);

        if let Some(t) = options.temperature {
            args.temperature(t);
        }
        if let Some(m) = options.max_tokens {
            args.max_tokens(m);
        }
        if !options.stop.is_empty() {
            args.stop(options.stop.clone());
        }
        if let Some(tools) = &options.tools {
            if let Some(arr) = tools.as_array() {
                let chat_tools: Vec<ChatCompletionTools> = arr
                    .iter()
                    .filter_map(|t| {
                        Some(ChatCompletionTools::Function(ChatCompletionTool {
                            function: FunctionObject {
                                name: t.get("name")?.as_str()?.to_string(),
                                description: t.get("description").and_then(|d| d.as_str()).map(String::from),
                                parameters: t.get("parameters").cloned(),
                                ..Default::default()
                            },
                        }))
                    })
                    .collect();
                if !chat_tools.is_empty() {
                    args.tools(chat_tools);
                    args.tool_choice(ChatCompletionToolChoiceOption::Mode(ToolChoiceOptions::Auto));
                }
            }
        }

        args.build()
            .map_err(|e| OrchestratorError::ProviderError(format!("request build failed: {e}")))
    }

    /// Classifies an `async-openai` error into the §7 taxonomy: rate limits
    /// and 5xx/connection failures are retryable-at-a-higher-layer kinds,
    /// everything else is a flat `provider_error`.
    fn classify_error(err: &async_openai::error::OpenAIError) -> OrchestratorError {
        let message = err.to_string();
        let lowered = message.to_lowercase();
        if lowered.contains("429") || lowered.contains("rate limit") {
            OrchestratorError::RateLimited(message)
        } else if lowered.contains("context_length_exceeded") || lowered.contains("maximum context length") {
            OrchestratorError::ContextOverflow(message)
        } else {
            OrchestratorError::ProviderError(message)
        }
    }
}

#[async_trait]
impl LlmClient for ChatOpenAI {
    async fn complete(&self, prompt: &str, options: &LlmOptions) -> Result<Completion, OrchestratorError> {
        let request = self.build_request(prompt, options, false)?;
        debug!(model = ?options.model, "openai chat create");

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e| Self::classify_error(&e))?;

        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| OrchestratorError::ProviderError("openai returned no choices".into()))?;

        let content = choice.message.content.unwrap_or_default();
        let usage = response.usage.map(|u| LlmUsage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        });
        Ok(Completion { content, usage })
    }

    async fn stream(&self, prompt: &str, options: &LlmOptions) -> Result<Completion, OrchestratorError> {
        let request = self.build_request(prompt, options, true)?;
        trace!(model = ?options.model, "openai chat create_stream");

        let mut stream = self
            .client
            .chat()
            .create_stream(request)
            .await
            .map_err(|e| Self::classify_error(&e))?;

        let mut full_content = String::new();
        let mut usage: Option<LlmUsage> = None;

        while let Some(result) = stream.next().await {
            let chunk = result.map_err(|e| Self::classify_error(&e))?;
            if let Some(u) = chunk.usage {
                usage = Some(LlmUsage {
                    prompt_tokens: u.prompt_tokens,
                    completion_tokens: u.completion_tokens,
                    total_tokens: u.total_tokens,
                });
            }
            for choice in chunk.choices {
                if let Some(content) = choice.delta.content {
                    if !content.is_empty() {
                        full_content.push_str(&content);
                        if let Some(cb) = &options.stream_callback {
                            cb(&content);
                        }
                    }
                }
            }
        }

        Ok(Completion {
            content: full_content,
            usage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_creates_client_without_panicking() {
        let _ = ChatOpenAI::new("gpt-4o-mini");
    }

    #[tokio::test]
    async fn complete_against_unreachable_base_returns_provider_error() {
        let config = OpenAIConfig::new()
            .with_api_key("test-key")
            .with_api_base("https://127.0.0.1:1");
        let client = ChatOpenAI::with_config(config, "gpt-4o-mini");
        let err = client.complete("hello", &LlmOptions::default()).await.unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::ProviderError(_) | OrchestratorError::RateLimited(_)
        ));
    }
}
