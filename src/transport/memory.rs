//! In-memory transport: records every call for assertions in tests.
//!
//! Configurable edit support and failure injection so tests can drive both
//! the native-edit path and the emulated one, plus the recall-failure and
//! delivery-failure branches.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{ChatTransport, DeliveredMessage, RecallOutcome, TransportError};

/// One recorded transport call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCall {
    Post { thread_id: String, content: String },
    Edit {
        thread_id: String,
        message_id: String,
        content: String,
    },
    Recall {
        thread_id: String,
        recall_handle: String,
    },
}

/// Records calls; ids are sequential (`m1`, `m2`, ...) with matching recall
/// handles (`r1`, `r2`, ...).
#[derive(Debug, Default)]
pub struct MemoryTransport {
    calls: Mutex<Vec<TransportCall>>,
    next_id: AtomicU64,
    edit_supported: bool,
    fail_posts: AtomicBool,
    fail_recalls: AtomicBool,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// A variant whose native `edit` works.
    pub fn with_native_edit() -> Self {
        Self {
            edit_supported: true,
            ..Self::default()
        }
    }

    /// Make subsequent `post` calls fail.
    pub fn fail_posts(&self, fail: bool) {
        self.fail_posts.store(fail, Ordering::SeqCst);
    }

    /// Make subsequent `recall` calls fail.
    pub fn fail_recalls(&self, fail: bool) {
        self.fail_recalls.store(fail, Ordering::SeqCst);
    }

    /// Snapshot of all recorded calls.
    pub async fn calls(&self) -> Vec<TransportCall> {
        self.calls.lock().await.clone()
    }

    /// Contents of recorded posts, in order.
    pub async fn posts(&self) -> Vec<String> {
        self.calls
            .lock()
            .await
            .iter()
            .filter_map(|call| match call {
                TransportCall::Post { content, .. } => Some(content.clone()),
                _ => None,
            })
            .collect()
    }

    /// Recall handles retracted, in order.
    pub async fn recalls(&self) -> Vec<String> {
        self.calls
            .lock()
            .await
            .iter()
            .filter_map(|call| match call {
                TransportCall::Recall { recall_handle, .. } => Some(recall_handle.clone()),
                _ => None,
            })
            .collect()
    }

    fn mint(&self) -> DeliveredMessage {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        DeliveredMessage {
            message_id: format!("m{n}"),
            recall_handle: Some(format!("r{n}")),
        }
    }
}

#[async_trait]
impl ChatTransport for MemoryTransport {
    async fn post(
        &self,
        thread_id: &str,
        content: &str,
    ) -> Result<DeliveredMessage, TransportError> {
        if self.fail_posts.load(Ordering::SeqCst) {
            return Err(TransportError::Post("injected failure".into()));
        }
        self.calls.lock().await.push(TransportCall::Post {
            thread_id: thread_id.to_string(),
            content: content.to_string(),
        });
        Ok(self.mint())
    }

    async fn edit(
        &self,
        thread_id: &str,
        message_id: &str,
        content: &str,
    ) -> Result<DeliveredMessage, TransportError> {
        if !self.edit_supported {
            return Err(TransportError::EditUnsupported);
        }
        self.calls.lock().await.push(TransportCall::Edit {
            thread_id: thread_id.to_string(),
            message_id: message_id.to_string(),
            content: content.to_string(),
        });
        // Editing keeps the message identity.
        Ok(DeliveredMessage {
            message_id: message_id.to_string(),
            recall_handle: None,
        })
    }

    fn supports_edit(&self) -> bool {
        self.edit_supported
    }

    async fn recall(&self, thread_id: &str, recall_handle: &str) -> RecallOutcome {
        if self.fail_recalls.load(Ordering::SeqCst) {
            return RecallOutcome::Failed("injected recall failure".into());
        }
        self.calls.lock().await.push(TransportCall::Recall {
            thread_id: thread_id.to_string(),
            recall_handle: recall_handle.to_string(),
        });
        RecallOutcome::Recalled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_posts_and_mints_sequential_ids() {
        let transport = MemoryTransport::new();
        let a = transport.post("t1", "one").await.unwrap();
        let b = transport.post("t1", "two").await.unwrap();
        assert_eq!(a.message_id, "m1");
        assert_eq!(b.message_id, "m2");
        assert_eq!(b.recall_handle.as_deref(), Some("r2"));
        assert_eq!(transport.posts().await, vec!["one", "two"]);
    }

    #[tokio::test]
    async fn edit_unsupported_by_default() {
        let transport = MemoryTransport::new();
        assert_eq!(
            transport.edit("t1", "m1", "x").await,
            Err(TransportError::EditUnsupported)
        );
        assert!(MemoryTransport::with_native_edit().supports_edit());
    }

    #[tokio::test]
    async fn injected_failures() {
        let transport = MemoryTransport::new();
        transport.fail_posts(true);
        assert!(transport.post("t1", "x").await.is_err());
        transport.fail_recalls(true);
        assert!(matches!(
            transport.recall("t1", "r1").await,
            RecallOutcome::Failed(_)
        ));
    }
}
