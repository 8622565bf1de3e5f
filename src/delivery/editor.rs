//! Edit emulation for transports without a native message edit.
//!
//! An "edit" becomes post-new-then-recall-old. Per thread the emulator
//! keeps the recall handle of the message currently standing in the thread,
//! debounces bursts of updates (last write wins), and serializes the
//! post/recall sequence so messages can never interleave out of order.
//! Recall of the superseded message is best-effort: a failure is logged and
//! the stale message simply stays behind.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::transport::{ChatTransport, DeliveredMessage, RecallOutcome, TransportError};

use super::lock::KeyedLocks;

type EditResult = Result<DeliveredMessage, TransportError>;

#[derive(Default)]
struct ThreadEditState {
    /// Recall handle of the message currently standing in the thread.
    recall_handle: Option<String>,
    /// Latest queued content; earlier queued content it replaced is dropped.
    pending: Option<String>,
    /// Callers waiting on the pending content's delivery.
    waiters: Vec<oneshot::Sender<EditResult>>,
    /// When the oldest undelivered update was queued. Bounds staleness: a
    /// steady stream of writes must not debounce forever.
    first_pending_at: Option<Instant>,
    /// Armed debounce timer. A timer must disarm itself (see
    /// [`EditEmulator::disarm_timer`]) before it may flush, so cancelling
    /// this handle can only ever stop a timer that has not started a flush.
    timer: Option<JoinHandle<()>>,
    /// Bumped on every arm/cancel; a fired timer whose generation is stale
    /// no longer owns the slot and must not flush.
    timer_gen: u64,
}

impl ThreadEditState {
    /// Invalidate and stop any armed timer.
    fn cancel_timer(&mut self) {
        self.timer_gen += 1;
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

/// Turns post/recall pairs into the appearance of an in-place edit.
#[derive(Clone)]
pub struct EditEmulator {
    transport: Arc<dyn ChatTransport>,
    threads: Arc<Mutex<HashMap<String, ThreadEditState>>>,
    flush_locks: Arc<KeyedLocks>,
    debounce: Duration,
    max_wait: Duration,
}

impl EditEmulator {
    pub fn new(transport: Arc<dyn ChatTransport>, debounce: Duration, max_wait: Duration) -> Self {
        Self {
            transport,
            threads: Arc::new(Mutex::new(HashMap::new())),
            flush_locks: Arc::new(KeyedLocks::new()),
            debounce,
            max_wait,
        }
    }

    /// Register the message currently standing in `thread_id`, so the next
    /// emulated edit knows what to recall.
    pub async fn track_message(&self, thread_id: &str, recall_handle: Option<String>) {
        let mut threads = self.threads.lock().await;
        let state = threads.entry(thread_id.to_string()).or_default();
        state.recall_handle = recall_handle;
    }

    /// Queue an update to the thread's standing message. Resolves once the
    /// content (or a later write that superseded it) is delivered.
    pub async fn queue_edit(&self, thread_id: &str, content: &str) -> EditResult {
        let (tx, rx) = oneshot::channel();
        let flush_immediately = {
            let mut threads = self.threads.lock().await;
            let state = threads.entry(thread_id.to_string()).or_default();
            state.pending = Some(content.to_string());
            state.waiters.push(tx);
            let now = Instant::now();
            let first = *state.first_pending_at.get_or_insert(now);
            state.cancel_timer();
            if now.duration_since(first) >= self.max_wait {
                true
            } else {
                let emulator = self.clone();
                let thread = thread_id.to_string();
                let debounce = self.debounce;
                let gen = state.timer_gen;
                state.timer = Some(tokio::spawn(async move {
                    tokio::time::sleep(debounce).await;
                    if emulator.disarm_timer(&thread, gen).await {
                        emulator.flush_thread(&thread).await;
                    }
                }));
                false
            }
        };
        if flush_immediately {
            debug!(thread_id, "update waited out the debounce cap, flushing");
            self.flush_thread(thread_id).await;
        }
        rx.await.unwrap_or(Err(TransportError::Abandoned))
    }

    /// Deliver `content` now, skipping the debounce. Used for terminal
    /// output, which must not lag behind the turn's end.
    pub async fn flush_now(&self, thread_id: &str, content: &str) -> EditResult {
        let (tx, rx) = oneshot::channel();
        {
            let mut threads = self.threads.lock().await;
            let state = threads.entry(thread_id.to_string()).or_default();
            state.pending = Some(content.to_string());
            state.waiters.push(tx);
            state.first_pending_at.get_or_insert(Instant::now());
            state.cancel_timer();
        }
        self.flush_thread(thread_id).await;
        rx.await.unwrap_or(Err(TransportError::Abandoned))
    }

    /// Forget the thread. Undelivered updates are abandoned; their callers
    /// get [`TransportError::Abandoned`].
    pub async fn clear_thread(&self, thread_id: &str) {
        let state = self.threads.lock().await.remove(thread_id);
        if let Some(mut state) = state {
            state.cancel_timer();
            // Dropping the senders resolves the waiters.
        }
    }

    /// A fired timer hands back its slot before flushing. Returns whether
    /// the timer still owned it; a stale generation means the timer was
    /// cancelled (or superseded) after firing and must not flush.
    async fn disarm_timer(&self, thread_id: &str, gen: u64) -> bool {
        let mut threads = self.threads.lock().await;
        let Some(state) = threads.get_mut(thread_id) else {
            return false;
        };
        if state.timer_gen != gen {
            return false;
        }
        state.timer = None;
        true
    }

    /// Drain the thread's pending content. Holds the per-thread flush lock
    /// for the whole post/recall sequence and loops in case another update
    /// was queued while posting.
    async fn flush_thread(&self, thread_id: &str) {
        let _guard = self.flush_locks.acquire(thread_id).await;
        loop {
            let (content, waiters, old_handle) = {
                let mut threads = self.threads.lock().await;
                let state = match threads.get_mut(thread_id) {
                    Some(state) => state,
                    None => return,
                };
                let content = match state.pending.take() {
                    Some(content) => content,
                    None => return,
                };
                state.first_pending_at = None;
                (
                    content,
                    std::mem::take(&mut state.waiters),
                    state.recall_handle.clone(),
                )
            };

            let result = self.transport.post(thread_id, &content).await;
            if let Ok(delivered) = &result {
                if let Some(handle) = old_handle {
                    if let RecallOutcome::Failed(reason) =
                        self.transport.recall(thread_id, &handle).await
                    {
                        warn!(thread_id, %reason, "failed to recall superseded message");
                    }
                }
                let mut threads = self.threads.lock().await;
                if let Some(state) = threads.get_mut(thread_id) {
                    state.recall_handle = delivered.recall_handle.clone();
                }
            }
            for waiter in waiters {
                let _ = waiter.send(result.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{ChatTransport, MemoryTransport, RecallOutcome, TransportCall};
    use async_trait::async_trait;

    /// Delegates to a [`MemoryTransport`] after a fixed delay per post, so
    /// tests can arrange for calls to land while a flush is mid-post.
    struct SlowPostTransport {
        inner: Arc<MemoryTransport>,
        delay: Duration,
    }

    #[async_trait]
    impl ChatTransport for SlowPostTransport {
        async fn post(
            &self,
            thread_id: &str,
            content: &str,
        ) -> Result<DeliveredMessage, TransportError> {
            tokio::time::sleep(self.delay).await;
            self.inner.post(thread_id, content).await
        }

        async fn recall(&self, thread_id: &str, recall_handle: &str) -> RecallOutcome {
            self.inner.recall(thread_id, recall_handle).await
        }
    }

    fn emulator(transport: Arc<MemoryTransport>) -> EditEmulator {
        EditEmulator::new(
            transport,
            Duration::from_millis(300),
            Duration::from_secs(2),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn queued_edit_posts_after_debounce() {
        let transport = Arc::new(MemoryTransport::new());
        let editor = emulator(transport.clone());
        let delivered = editor.queue_edit("t1", "v1").await.unwrap();
        assert_eq!(delivered.message_id, "m1");
        assert_eq!(transport.posts().await, vec!["v1"]);
    }

    #[tokio::test(start_paused = true)]
    async fn burst_coalesces_to_last_write() {
        let transport = Arc::new(MemoryTransport::new());
        let editor = emulator(transport.clone());

        let e1 = editor.clone();
        let first = tokio::spawn(async move { e1.queue_edit("t1", "v1").await });
        tokio::time::sleep(Duration::from_millis(100)).await;
        let second = editor.queue_edit("t1", "v2").await.unwrap();

        assert_eq!(first.await.unwrap().unwrap(), second);
        // Only the last write reached the transport.
        assert_eq!(transport.posts().await, vec!["v2"]);
    }

    #[tokio::test(start_paused = true)]
    async fn edit_recalls_the_superseded_message() {
        let transport = Arc::new(MemoryTransport::new());
        let editor = emulator(transport.clone());

        let first = editor.queue_edit("t1", "v1").await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        editor.queue_edit("t1", "v2").await.unwrap();

        assert_eq!(transport.posts().await, vec!["v1", "v2"]);
        assert_eq!(transport.recalls().await, vec![first.recall_handle.unwrap()]);
    }

    #[tokio::test(start_paused = true)]
    async fn tracked_message_is_recalled_on_first_edit() {
        let transport = Arc::new(MemoryTransport::new());
        let editor = emulator(transport.clone());

        let posted = transport.post("t1", "original").await.unwrap();
        editor
            .track_message("t1", posted.recall_handle.clone())
            .await;
        editor.queue_edit("t1", "updated").await.unwrap();

        assert_eq!(transport.recalls().await, vec![posted.recall_handle.unwrap()]);
    }

    #[tokio::test(start_paused = true)]
    async fn recall_failure_is_swallowed() {
        let transport = Arc::new(MemoryTransport::new());
        let editor = emulator(transport.clone());

        editor.queue_edit("t1", "v1").await.unwrap();
        transport.fail_recalls(true);
        tokio::time::sleep(Duration::from_secs(1)).await;
        let delivered = editor.queue_edit("t1", "v2").await.unwrap();
        assert_eq!(delivered.message_id, "m2");
        assert_eq!(transport.posts().await, vec!["v1", "v2"]);
    }

    #[tokio::test(start_paused = true)]
    async fn post_failure_keeps_old_handle() {
        let transport = Arc::new(MemoryTransport::new());
        let editor = emulator(transport.clone());

        let first = editor.queue_edit("t1", "v1").await.unwrap();
        transport.fail_posts(true);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(editor.queue_edit("t1", "v2").await.is_err());

        // Next successful edit still recalls the surviving first message.
        transport.fail_posts(false);
        tokio::time::sleep(Duration::from_secs(1)).await;
        editor.queue_edit("t1", "v3").await.unwrap();
        assert_eq!(transport.recalls().await, vec![first.recall_handle.unwrap()]);
    }

    #[tokio::test(start_paused = true)]
    async fn steady_writes_flush_at_the_staleness_cap() {
        let transport = Arc::new(MemoryTransport::new());
        let editor = emulator(transport.clone());

        // Writes every 100ms keep resetting the 300ms debounce; the 2s cap
        // forces a flush anyway.
        let mut flushed_at = None;
        for i in 0..30u32 {
            let e = editor.clone();
            let content = format!("v{i}");
            tokio::spawn(async move {
                let _ = e.queue_edit("t1", &content).await;
            });
            tokio::time::sleep(Duration::from_millis(100)).await;
            if !transport.posts().await.is_empty() && flushed_at.is_none() {
                flushed_at = Some(i);
                break;
            }
        }
        let flushed_at = flushed_at.unwrap();
        assert!(flushed_at >= 19 && flushed_at <= 22, "flushed at {flushed_at}");
    }

    #[tokio::test(start_paused = true)]
    async fn queueing_during_an_inflight_post_never_cancels_it() {
        let inner = Arc::new(MemoryTransport::new());
        let editor = EditEmulator::new(
            Arc::new(SlowPostTransport {
                inner: inner.clone(),
                delay: Duration::from_millis(500),
            }),
            Duration::from_millis(300),
            Duration::from_secs(5),
        );

        let e1 = editor.clone();
        let first = tokio::spawn(async move { e1.queue_edit("t1", "v1").await });
        // 400ms in: the debounced v1 flush is 100ms into its 500ms post.
        tokio::time::sleep(Duration::from_millis(400)).await;
        let second = editor.queue_edit("t1", "v2").await.unwrap();

        // The in-flight post survives and its waiter resolves normally.
        let first = first.await.unwrap().unwrap();
        assert_eq!(first.message_id, "m1");
        assert_eq!(second.message_id, "m2");
        assert_eq!(inner.posts().await, vec!["v1", "v2"]);
        // v2 superseded v1 in the thread, so v1 was recalled.
        assert_eq!(inner.recalls().await, vec!["r1"]);
    }

    #[tokio::test(start_paused = true)]
    async fn flush_now_skips_the_debounce() {
        let transport = Arc::new(MemoryTransport::new());
        let editor = emulator(transport.clone());
        let delivered = editor.flush_now("t1", "final").await.unwrap();
        assert_eq!(delivered.message_id, "m1");
        assert_eq!(transport.posts().await, vec!["final"]);
    }

    #[tokio::test(start_paused = true)]
    async fn flush_now_supersedes_a_queued_edit() {
        let transport = Arc::new(MemoryTransport::new());
        let editor = emulator(transport.clone());

        let e1 = editor.clone();
        let queued = tokio::spawn(async move { e1.queue_edit("t1", "progress").await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        editor.flush_now("t1", "final").await.unwrap();

        // The queued waiter resolved with the superseding delivery.
        assert!(queued.await.unwrap().is_ok());
        assert_eq!(transport.posts().await, vec!["final"]);
    }

    #[tokio::test(start_paused = true)]
    async fn clear_thread_abandons_waiters() {
        let transport = Arc::new(MemoryTransport::new());
        let editor = emulator(transport.clone());

        let e1 = editor.clone();
        let queued = tokio::spawn(async move { e1.queue_edit("t1", "pending").await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        editor.clear_thread("t1").await;

        assert_eq!(queued.await.unwrap(), Err(TransportError::Abandoned));
        assert!(transport.posts().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn recall_happens_after_the_replacement_is_posted() {
        let transport = Arc::new(MemoryTransport::new());
        let editor = emulator(transport.clone());

        editor.queue_edit("t1", "v1").await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        editor.queue_edit("t1", "v2").await.unwrap();

        let calls = transport.calls().await;
        let post_idx = calls
            .iter()
            .position(|c| matches!(c, TransportCall::Post { content, .. } if content == "v2"))
            .unwrap();
        let recall_idx = calls
            .iter()
            .position(|c| matches!(c, TransportCall::Recall { .. }))
            .unwrap();
        assert!(post_idx < recall_idx, "new message must land before the old one goes");
    }
}
