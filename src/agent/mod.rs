//! Agent side of the pipeline: subprocess, raw events, translation, sessions.
//!
//! The runner spawns the coding-agent CLI and owns the turn loop; the
//! translator turns its NDJSON stream into domain events; sessions let a
//! later turn resume where this one stopped.

pub mod event;
pub mod runner;
pub mod session;
pub mod translate;

pub use event::RawAgentEvent;
pub use runner::AgentRunner;
pub use session::{FileSessionStore, ResumeToken, SessionStore};
pub use translate::{Action, ActionKind, ActionPhase, DomainEvent, StreamState};
