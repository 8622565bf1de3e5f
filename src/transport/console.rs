//! Console transport: prints messages to stdout.
//!
//! The CLI's transport. Printed text cannot be edited or recalled, which
//! makes this the simplest exercise of the edit-emulation path: every
//! update after the first goes through the emulator, and recall handles
//! are never issued.

use async_trait::async_trait;
use uuid::Uuid;

use super::{ChatTransport, DeliveredMessage, RecallOutcome, TransportError};

/// Prints each delivered message with its thread id.
#[derive(Debug, Default)]
pub struct ConsoleTransport;

impl ConsoleTransport {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ChatTransport for ConsoleTransport {
    async fn post(
        &self,
        thread_id: &str,
        content: &str,
    ) -> Result<DeliveredMessage, TransportError> {
        println!("--- [{thread_id}] ---\n{content}\n");
        Ok(DeliveredMessage {
            message_id: Uuid::new_v4().to_string(),
            // Printed text cannot be taken back.
            recall_handle: None,
        })
    }

    async fn recall(&self, _thread_id: &str, _recall_handle: &str) -> RecallOutcome {
        RecallOutcome::Failed("console output cannot be recalled".into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn post_synthesizes_ids_without_recall_handles() {
        let transport = ConsoleTransport::new();
        let first = transport.post("t1", "hello").await.unwrap();
        let second = transport.post("t1", "world").await.unwrap();
        assert_ne!(first.message_id, second.message_id);
        assert!(first.recall_handle.is_none());
        assert!(!transport.supports_edit());
    }
}
