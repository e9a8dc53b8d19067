//! Turns a driver future plus a filtered bus subscription into an SSE body
//! (§4.11 "streaming... server-sent events"). Grounded on the upstream
//! project's run-stream relay (spawn the work, drain an mpsc channel into
//! the response, abort the work if the client goes away) but rebuilt
//! around the bus's broadcast receiver instead of a purpose-built channel.

use std::convert::Infallible;

use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use futures::stream::Stream;
use serde_json::Value;
use stream_event::{to_json, EnvelopeState, ProtocolEvent};
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;

use orchestrator_core::EventBus;

/// Aborts the driving tasks when the SSE response stream is dropped, which
/// happens when the client disconnects before the stream finished on its
/// own (§5 "cooperative cancellation on client disconnect"). Aborting an
/// already-completed task is a no-op, so this is safe to run unconditionally.
struct AbortOnDrop(Vec<tokio::task::JoinHandle<()>>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        for handle in self.0.drain(..) {
            handle.abort();
        }
    }
}

/// Relays bus events matching `matches` into SSE `content`/`step_*`
/// frames, driven by `work` (which itself emits onto `bus`). Sends a final
/// `done`/`error` frame followed by the literal `[DONE]` line (§6, §7).
///
/// The terminal frame is sent by the same task that relays bus events, once
/// `work` has signalled completion *and* every event already sitting in the
/// broadcast channel's buffer at that point has been drained — otherwise the
/// terminal frame can race ahead of the last `step_completed`/`content`
/// frame emitted just before `work` returned (§5, §6 "`done` is terminal").
pub fn stream_bus_events<F>(
    bus: std::sync::Arc<EventBus>,
    session_id: String,
    matches: F,
    work: impl std::future::Future<Output = Result<Value, orchestrator_core::OrchestratorError>>
        + Send
        + 'static,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>>
where
    F: Fn(&orchestrator_core::Event) -> Option<ProtocolEvent> + Send + Sync + 'static,
{
    let (tx, rx) = mpsc::channel::<Value>(256);
    let mut envelope_state = EnvelopeState::new(session_id.clone());

    let relay_bus = bus.clone();
    let mut raw = relay_bus.subscribe_raw();

    let (work_done_tx, mut work_done_rx) = oneshot::channel();
    let work_handle = tokio::spawn(async move {
        let _ = work_done_tx.send(work.await);
    });

    let relay_tx = tx;
    let relay_handle = tokio::spawn(async move {
        let mut bus_closed = false;
        let mut terminal: Option<ProtocolEvent> = None;

        while terminal.is_none() {
            tokio::select! {
                biased;
                event = raw.recv(), if !bus_closed => {
                    match event {
                        Ok(event) => {
                            if let Some(protocol_event) = matches(&event) {
                                if let Ok(value) = to_json(&protocol_event, &mut envelope_state) {
                                    if relay_tx.send(value).await.is_err() {
                                        return;
                                    }
                                }
                            }
                        }
                        Err(_) => bus_closed = true,
                    }
                }
                result = &mut work_done_rx => {
                    terminal = Some(match result {
                        Ok(Ok(_)) => ProtocolEvent::Done { session_id: session_id.clone() },
                        Ok(Err(err)) => ProtocolEvent::Error {
                            error: err.kind().to_string(),
                            message: err.to_string(),
                        },
                        Err(_) => ProtocolEvent::Error {
                            error: "internal_error".into(),
                            message: "work task ended unexpectedly".into(),
                        },
                    });
                }
            }
        }

        // Drain whatever was already buffered on the bus before work
        // returned, so the terminal frame lands after it, not before.
        while let Ok(event) = raw.try_recv() {
            if let Some(protocol_event) = matches(&event) {
                if let Ok(value) = to_json(&protocol_event, &mut envelope_state) {
                    if relay_tx.send(value).await.is_err() {
                        return;
                    }
                }
            }
        }

        if let Some(terminal) = terminal {
            if let Ok(value) = terminal.to_value() {
                let _ = relay_tx.send(value).await;
            }
        }
    });

    let guard = AbortOnDrop(vec![relay_handle, work_handle]);

    let stream = ReceiverStream::new(rx).map(move |value| {
        let _keep_alive = &guard;
        Ok(SseEvent::default().data(value.to_string()))
    });
    let terminator = futures::stream::once(async { Ok(SseEvent::default().data("[DONE]")) });

    Sse::new(stream.chain(terminator)).keep_alive(KeepAlive::default())
}
