//! Orchestrates one chat thread's message through a full agent turn.
//!
//! One turn at a time per thread: a second prompt on the same thread waits
//! for the first turn to finish, in arrival order. Different threads run
//! concurrently. Resume tokens are loaded before the turn and persisted
//! after it, so follow-up prompts continue the same agent session.

use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use crate::agent::{AgentRunner, SessionStore};
use crate::config::RelayConfig;
use crate::delivery::{DeliveryThrottle, EditEmulator, KeyedLocks, TurnDelivery};
use crate::transport::ChatTransport;

/// The long-lived pipeline: transport on one side, agent CLI on the other.
pub struct Relay {
    transport: Arc<dyn ChatTransport>,
    editor: EditEmulator,
    store: Arc<dyn SessionStore>,
    runner: AgentRunner,
    config: RelayConfig,
    turn_locks: KeyedLocks,
}

impl Relay {
    pub fn new(
        transport: Arc<dyn ChatTransport>,
        store: Arc<dyn SessionStore>,
        config: RelayConfig,
    ) -> Self {
        let editor = EditEmulator::new(
            transport.clone(),
            config.edit_debounce(),
            config.edit_max_wait(),
        );
        let runner = AgentRunner::new(config.agent_command.clone(), config.engine.clone());
        Self {
            transport,
            editor,
            store,
            runner,
            config,
            turn_locks: KeyedLocks::new(),
        }
    }

    /// Run one full turn for a user message on a thread.
    pub async fn handle_message(&self, thread_id: &str, prompt: &str) -> anyhow::Result<()> {
        let _turn = self.turn_locks.acquire(thread_id).await;
        info!(thread_id, "starting agent turn");

        let resume = self.store.get(thread_id, &self.config.engine).await;
        let throttle = DeliveryThrottle::new(
            self.config.streaming_interval(),
            self.config.idle_interval(),
        );
        let mut delivery = TurnDelivery::new(
            self.transport.clone(),
            self.editor.clone(),
            thread_id,
            throttle,
            self.config.chunk_limit,
            self.config.preview_limit,
        );

        let result = self
            .runner
            .run_turn(prompt, resume.as_ref(), &mut delivery)
            .await;
        self.editor.clear_thread(thread_id).await;

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(error) => {
                // The turn never produced terminal output; tell the thread.
                let notice = format!("❌ {error}");
                if let Err(post_error) = self.transport.post(thread_id, &notice).await {
                    warn!(thread_id, %post_error, "failed to report turn failure");
                }
                return Err(error).context("agent turn failed");
            }
        };

        if let Some(token) = outcome.resume {
            if let Err(error) = self.store.set(thread_id, token).await {
                // A lost token degrades the next turn to a fresh session.
                warn!(thread_id, %error, "failed to persist resume token");
            }
        }
        info!(thread_id, ok = outcome.ok, "agent turn finished");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{FileSessionStore, ResumeToken};
    use crate::transport::MemoryTransport;

    fn config(agent_command: Vec<String>) -> RelayConfig {
        RelayConfig {
            agent_command,
            engine: "opencode".into(),
            streaming_interval_ms: 50,
            idle_interval_ms: 100,
            edit_debounce_ms: 20,
            edit_max_wait_ms: 100,
            chunk_limit: 3_800,
            preview_limit: 500,
        }
    }

    fn store() -> (tempfile::TempDir, Arc<FileSessionStore>) {
        let dir = tempfile::TempDir::new().unwrap();
        let store = Arc::new(FileSessionStore::open(dir.path().join("sessions.yaml")));
        (dir, store)
    }

    #[tokio::test]
    async fn empty_agent_command_reports_failure_to_the_thread() {
        let transport = Arc::new(MemoryTransport::new());
        let (_dir, store) = store();
        let relay = Relay::new(transport.clone(), store, config(Vec::new()));

        let result = relay.handle_message("t1", "hello").await;
        assert!(result.is_err());
        let posts = transport.posts().await;
        assert_eq!(posts.len(), 1);
        assert!(posts[0].starts_with("❌ "));
    }

    #[tokio::test]
    async fn scripted_turn_delivers_answer_and_persists_session() {
        let script = r#"printf '%s\n' \
'{"type":"step_start","sessionID":"ses_42"}' \
'{"type":"text","text":"All done."}' \
'{"type":"step_finish","finishReason":"stop"}'"#;
        let transport = Arc::new(MemoryTransport::new());
        let (_dir, store) = store();
        let relay = Relay::new(
            transport.clone(),
            store.clone(),
            config(vec!["sh".into(), "-c".into(), script.into()]),
        );

        relay.handle_message("t1", "do the thing").await.unwrap();

        let posts = transport.posts().await;
        assert_eq!(posts.last().unwrap(), "All done.");
        let token = store.get("t1", "opencode").await.unwrap();
        assert_eq!(token.session, "ses_42");
    }

    #[tokio::test]
    async fn crash_without_terminal_event_becomes_an_error_message() {
        let script = r#"printf '%s\n' '{"type":"step_start","sessionID":"ses_9"}'; exit 3"#;
        let transport = Arc::new(MemoryTransport::new());
        let (_dir, store) = store();
        let relay = Relay::new(
            transport.clone(),
            store.clone(),
            config(vec!["sh".into(), "-c".into(), script.into()]),
        );

        relay.handle_message("t1", "go").await.unwrap();

        let posts = transport.posts().await;
        assert!(posts.last().unwrap().starts_with("❌ "));
        assert!(posts.last().unwrap().contains("without completing"));
        // The session survives the crash for the next turn.
        assert!(store.get("t1", "opencode").await.is_some());
    }

    #[tokio::test]
    async fn stored_token_is_passed_back_on_resume() {
        // The scripted agent echoes its argv so the test can see the
        // resume flag it was launched with.
        let script = r#"printf '%s\n' \
"{\"type\":\"step_start\",\"sessionID\":\"ses_2\"}" \
"{\"type\":\"text\",\"text\":\"args: $*\"}" \
"{\"type\":\"step_finish\",\"finishReason\":\"stop\"}""#;
        let transport = Arc::new(MemoryTransport::new());
        let (_dir, store) = store();
        store
            .set(
                "t1",
                ResumeToken {
                    engine: "opencode".into(),
                    session: "ses_1".into(),
                },
            )
            .await
            .unwrap();
        let relay = Relay::new(
            transport.clone(),
            store.clone(),
            config(vec!["sh".into(), "-c".into(), script.into(), "sh".into()]),
        );

        relay.handle_message("t1", "continue").await.unwrap();

        let posts = transport.posts().await;
        assert_eq!(posts.last().unwrap(), "args: --resume ses_1");
        // And the new session id replaces the old token.
        let token = store.get("t1", "opencode").await.unwrap();
        assert_eq!(token.session, "ses_2");
    }
}
