//! Stream event protocol: type + payload + envelope.
//!
//! This crate defines the wire shape of a single SSE frame and envelope
//! injection (session_id, node_id, event_id). `orchestrator-api` bridges
//! workflow/conversational progress into `ProtocolEvent` and calls `to_json`.

pub mod envelope;
pub mod event;

pub use envelope::{to_json, Envelope, EnvelopeState};
pub use event::ProtocolEvent;
