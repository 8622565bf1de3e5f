//! Chat transport seam: post, edit, recall.
//!
//! Platform adapters (console here, webhook bots elsewhere) implement
//! [`ChatTransport`]. Editing is optional: transports without a native edit
//! report `EditUnsupported` and the delivery layer falls back to the edit
//! emulator. Recall is best-effort by contract: its result is a separate
//! type so a recall failure can never be mistaken for an edit failure.

pub mod console;
pub mod memory;

use async_trait::async_trait;
use thiserror::Error;

pub use console::ConsoleTransport;
pub use memory::{MemoryTransport, TransportCall};

/// The result of sending a message to a thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveredMessage {
    /// Platform-assigned (or synthesized) message identifier.
    pub message_id: String,
    /// Platform handle for retracting this message later. `None` means the
    /// message can never be recalled.
    pub recall_handle: Option<String>,
}

/// Best-effort outcome of a recall attempt. Deliberately not a `Result`:
/// callers log a failure and move on, they never propagate it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecallOutcome {
    Recalled,
    Failed(String),
}

/// Transport failures. Variants carry strings (not source errors) so one
/// result can be cloned out to every waiter of a coalesced edit.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("post failed: {0}")]
    Post(String),
    #[error("edit failed: {0}")]
    Edit(String),
    #[error("transport does not support editing messages")]
    EditUnsupported,
    #[error("edit was abandoned before delivery")]
    Abandoned,
}

/// Abstract send/edit/recall capability for one chat platform.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Send a new message to a thread.
    async fn post(&self, thread_id: &str, content: &str)
        -> Result<DeliveredMessage, TransportError>;

    /// Edit a previously sent message in place. Transports without a native
    /// edit keep the default and let callers fall back to emulation.
    async fn edit(
        &self,
        _thread_id: &str,
        _message_id: &str,
        _content: &str,
    ) -> Result<DeliveredMessage, TransportError> {
        Err(TransportError::EditUnsupported)
    }

    /// Whether `edit` works on this transport.
    fn supports_edit(&self) -> bool {
        false
    }

    /// Best-effort retraction of a previously sent message.
    async fn recall(&self, thread_id: &str, recall_handle: &str) -> RecallOutcome;
}
