//! Conversational Handler (C8): a single-shot or short-turn reply that may
//! use the minimal tool catalog, streaming tokens via the bus's
//! per-connection channel (§4.8).

use std::sync::Arc;

use crate::bus::{EventBus, Event};
use crate::error::OrchestratorError;
use crate::llm::{LlmClient, LlmOptions, Turn};
use crate::tools::{select, ToolCatalog, ToolStrategy};

pub struct ConversationalReply {
    pub content: String,
    pub tool_names_offered: Vec<String>,
}

/// `with_tools = true` offers the minimal catalog (§4.7 `simple_task` route);
/// `false` answers with no tool surface at all (§4.7 `qa` route).
pub async fn respond(
    llm: &dyn LlmClient,
    bus: &Arc<EventBus>,
    session_id: &str,
    message: &str,
    history: Vec<Turn>,
    with_tools: bool,
    catalog: &ToolCatalog,
) -> Result<ConversationalReply, OrchestratorError> {
    let tools = if with_tools {
        select(message, &[], ToolStrategy::Minimal, catalog)
    } else {
        Vec::new()
    };
    let tool_names_offered: Vec<String> = tools.iter().map(|t| t.name.clone()).collect();

    // `stream_callback` is invoked synchronously off the provider's own
    // streaming loop (it cannot await), so chunks are handed to an
    // unbounded channel and emitted onto the bus, in arrival order, by
    // `relay_handle`. `done` must not reach the bus until every chunk
    // already handed off has actually been emitted, so `options` (the
    // callback's only sender) is dropped before awaiting the relay's
    // drain — otherwise `done` can race ahead of trailing content frames.
    let (chunk_tx, mut chunk_rx) = tokio::sync::mpsc::unbounded_channel::<String>();
    let stream_callback: Arc<dyn Fn(&str) + Send + Sync> = Arc::new(move |chunk: &str| {
        let _ = chunk_tx.send(chunk.to_string());
    });

    let options = LlmOptions {
        history,
        tools: if tools.is_empty() {
            None
        } else {
            Some(serde_json::to_value(&tools).unwrap_or(serde_json::Value::Null))
        },
        stream_callback: Some(stream_callback),
        metadata: serde_json::json!({"session_id": session_id}),
        ..Default::default()
    };

    let relay_bus = bus.clone();
    let session_id_owned = session_id.to_string();
    let relay_handle = tokio::spawn(async move {
        while let Some(chunk) = chunk_rx.recv().await {
            relay_bus
                .emit(Event {
                    event_type: "content".into(),
                    source_agent: "conversational".into(),
                    target_agent: None,
                    correlation_id: None,
                    payload: serde_json::json!({"session_id": session_id_owned, "content": chunk}),
                    emitted_at: state_store::now_ms(),
                })
                .await;
        }
    });

    let completion = llm.stream(message, &options).await?;
    drop(options);
    let _ = relay_handle.await;

    bus.emit(Event {
        event_type: "done".into(),
        source_agent: "conversational".into(),
        target_agent: None,
        correlation_id: None,
        payload: serde_json::json!({"session_id": session_id}),
        emitted_at: state_store::now_ms(),
    })
    .await;

    Ok(ConversationalReply {
        content: completion.content,
        tool_names_offered,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlm;

    #[tokio::test]
    async fn respond_without_tools_offers_nothing() {
        let llm = MockLlm::new("hi there");
        let bus = Arc::new(EventBus::new());
        let catalog = ToolCatalog::default();
        let reply = respond(&llm, &bus, "s1", "what can you do?", vec![], false, &catalog)
            .await
            .unwrap();
        assert_eq!(reply.content, "hi there");
        assert!(reply.tool_names_offered.is_empty());
    }
}
