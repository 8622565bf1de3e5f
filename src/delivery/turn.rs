//! Per-turn delivery: one evolving progress message, then the final answer.
//!
//! Consumes domain events and keeps the thread's progress message current,
//! pacing updates through the throttle. On completion the progress message
//! is replaced by the final answer, chunked to the platform limit. On
//! transports with a native edit the progress message is edited in place;
//! everywhere else updates go through the edit emulator.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::time::Instant;
use tracing::debug;

use crate::agent::{ActionPhase, DomainEvent};
use crate::render;
use crate::transport::{ChatTransport, TransportError};

use super::editor::EditEmulator;
use super::throttle::{DeliveryThrottle, FlushDecision};

/// Drives the chat-side of one agent turn.
pub struct TurnDelivery {
    transport: Arc<dyn ChatTransport>,
    editor: EditEmulator,
    thread_id: String,
    throttle: DeliveryThrottle,
    started_at: Instant,
    /// Rendered action lines, ordered by first appearance.
    actions: BTreeMap<u64, String>,
    /// Finished intermediate text blocks, oldest first.
    notes: Vec<String>,
    /// Tail of the answer text currently streaming, already rendered.
    preview: Option<String>,
    streaming: bool,
    message_id: Option<String>,
    chunk_limit: usize,
    preview_limit: usize,
}

impl TurnDelivery {
    pub fn new(
        transport: Arc<dyn ChatTransport>,
        editor: EditEmulator,
        thread_id: impl Into<String>,
        throttle: DeliveryThrottle,
        chunk_limit: usize,
        preview_limit: usize,
    ) -> Self {
        Self {
            transport,
            editor,
            thread_id: thread_id.into(),
            throttle,
            started_at: Instant::now(),
            actions: BTreeMap::new(),
            notes: Vec::new(),
            preview: None,
            streaming: false,
            message_id: None,
            chunk_limit,
            preview_limit,
        }
    }

    /// The throttle's armed deadline, for the caller's event loop.
    pub fn deadline(&self) -> Option<Instant> {
        self.throttle.deadline()
    }

    /// Apply one domain event. Returns `true` once the turn's terminal
    /// output has been delivered. A post or edit failure is terminal for
    /// the turn; only recall failures are swallowed (inside the emulator).
    pub async fn handle_event(&mut self, event: &DomainEvent) -> Result<bool, TransportError> {
        match event {
            DomainEvent::Started { .. } => {
                self.request_flush(true).await?;
            }
            DomainEvent::Action { action, phase, ok } => {
                self.actions
                    .insert(action.seq, render::action_line(action, *phase, *ok));
                if matches!(phase, ActionPhase::Started) {
                    self.streaming = false;
                }
                self.request_flush(false).await?;
            }
            DomainEvent::Text { accumulated, .. } => {
                self.preview = Some(render::preview_tail(accumulated, self.preview_limit));
                self.streaming = true;
                self.request_flush(false).await?;
            }
            DomainEvent::TextFinished { text } => {
                self.notes.push(text.clone());
                self.preview = None;
                self.streaming = false;
                self.request_flush(false).await?;
            }
            DomainEvent::Completed { ok, answer, error, .. } => {
                self.finish(*ok, answer, error.as_deref()).await?;
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// The armed deadline fired; deliver the coalesced update if one is owed.
    pub async fn flush_deadline(&mut self) -> Result<(), TransportError> {
        let now = Instant::now();
        if self.throttle.fire(now) {
            self.deliver_progress(now).await?;
        }
        Ok(())
    }

    async fn request_flush(&mut self, force: bool) -> Result<(), TransportError> {
        let now = Instant::now();
        match self.throttle.request(now, self.streaming, force) {
            FlushDecision::Now => self.deliver_progress(now).await,
            FlushDecision::ArmAt(at) => {
                debug!(thread_id = %self.thread_id, in_ms = (at - now).as_millis() as u64, "progress update deferred");
                Ok(())
            }
            FlushDecision::Pending => Ok(()),
        }
    }

    async fn deliver_progress(&mut self, now: Instant) -> Result<(), TransportError> {
        let action_lines: Vec<String> = self.actions.values().cloned().collect();
        let content = render::render_progress(
            now.duration_since(self.started_at),
            &self.notes,
            &action_lines,
            self.preview.as_deref(),
        );
        match &self.message_id {
            None => {
                let delivered = self.transport.post(&self.thread_id, &content).await?;
                self.editor
                    .track_message(&self.thread_id, delivered.recall_handle.clone())
                    .await;
                self.message_id = Some(delivered.message_id);
            }
            Some(message_id) if self.transport.supports_edit() => {
                self.transport
                    .edit(&self.thread_id, message_id, &content)
                    .await?;
            }
            Some(_) => {
                self.editor.queue_edit(&self.thread_id, &content).await?;
            }
        }
        Ok(())
    }

    /// Deliver the terminal output, replacing the progress message.
    async fn finish(
        &mut self,
        ok: bool,
        answer: &str,
        error: Option<&str>,
    ) -> Result<(), TransportError> {
        self.throttle.cancel();
        let body = if ok {
            answer.to_string()
        } else {
            format!("❌ {}", error.unwrap_or("the agent stopped unexpectedly"))
        };
        let mut chunks = render::split_chunks(&body, self.chunk_limit);
        if chunks.is_empty() {
            chunks.push(render::EMPTY_PLACEHOLDER.to_string());
        }

        let mut chunks = chunks.into_iter();
        let first = chunks.next().unwrap_or_default();
        match &self.message_id {
            None => {
                self.transport.post(&self.thread_id, &first).await?;
            }
            Some(message_id) if self.transport.supports_edit() => {
                self.transport
                    .edit(&self.thread_id, message_id, &first)
                    .await?;
            }
            Some(_) => {
                self.editor.flush_now(&self.thread_id, &first).await?;
            }
        }
        // Overflow chunks are ordinary messages; they are never edited again.
        for chunk in chunks {
            self.transport.post(&self.thread_id, &chunk).await?;
        }
        Ok(())
    }
}
