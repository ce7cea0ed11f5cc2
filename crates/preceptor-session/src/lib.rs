//! Session registry and turn pipeline.
//!
//! This crate owns the only long-lived mutable state in the orchestrator:
//! the map of active sessions. Each session serializes its turns through a
//! per-session lock, so a session's conversation history is only ever
//! touched by one pipeline run at a time while different sessions proceed
//! in parallel.

pub mod pipeline;
pub mod registry;

pub use pipeline::{TurnEngine, TurnInput, TurnReply};
pub use registry::{SessionHandle, SessionRegistry, SessionState, SessionSummary, StartedSession};
