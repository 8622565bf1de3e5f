//! relaybot — streams a coding agent's work into chat threads, live.
//!
//! One pipeline: spawn the agent CLI, translate its NDJSON event stream
//! into domain events, render them, and deliver paced updates to a chat
//! thread, emulating message edits on platforms that cannot edit.

pub mod agent;
pub mod config;
pub mod delivery;
pub mod relay;
pub mod render;
pub mod transport;

pub use relay::Relay;
