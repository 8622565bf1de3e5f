//! Spawns the coding-agent CLI and drives one turn of its event stream.
//!
//! The runner owns the subprocess and the turn loop: a `select!` over the
//! next stdout line and the delivery throttle's deadline, so progress
//! updates go out on time even while the agent is silent. Malformed lines
//! are logged and skipped. If the process exits without a terminal event,
//! the runner synthesizes a failed completion from the exit status and a
//! tail of stderr.

use std::collections::VecDeque;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::Mutex;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, warn};

use crate::delivery::TurnDelivery;
use crate::transport::TransportError;

use super::event::RawAgentEvent;
use super::session::ResumeToken;
use super::translate::{DomainEvent, StreamState};

/// Lines of stderr kept for the synthesized error message.
const STDERR_TAIL_LINES: usize = 20;

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("agent command is empty")]
    EmptyCommand,
    #[error("failed to spawn agent `{command}`: {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },
    #[error("failed to write prompt to agent stdin: {0}")]
    Stdin(std::io::Error),
    #[error(transparent)]
    Delivery(#[from] TransportError),
}

/// What a finished turn leaves behind.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub ok: bool,
    /// Token to resume this conversation next turn, when the agent gave one.
    pub resume: Option<ResumeToken>,
}

/// Launches the agent subprocess and relays its stream for one turn.
pub struct AgentRunner {
    command: Vec<String>,
    engine: String,
}

impl AgentRunner {
    pub fn new(command: Vec<String>, engine: impl Into<String>) -> Self {
        Self {
            command,
            engine: engine.into(),
        }
    }

    /// Run one turn: feed `prompt` to the agent, stream its events through
    /// `delivery`, return the outcome once terminal output is delivered.
    pub async fn run_turn(
        &self,
        prompt: &str,
        resume: Option<&ResumeToken>,
        delivery: &mut TurnDelivery,
    ) -> Result<TurnOutcome, RunnerError> {
        let (program, args) = self.command.split_first().ok_or(RunnerError::EmptyCommand)?;
        let mut cmd = Command::new(program);
        cmd.args(args);
        if let Some(token) = resume {
            cmd.arg("--resume").arg(&token.session);
        }
        let mut child = cmd
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| RunnerError::Spawn {
                command: program.clone(),
                source,
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(prompt.as_bytes())
                .await
                .map_err(RunnerError::Stdin)?;
            stdin.write_all(b"\n").await.map_err(RunnerError::Stdin)?;
            // Closing stdin tells the agent the prompt is complete.
        }

        let stderr_tail = Arc::new(Mutex::new(VecDeque::with_capacity(STDERR_TAIL_LINES)));
        if let Some(stderr) = child.stderr.take() {
            let tail = stderr_tail.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    let mut tail = tail.lock().await;
                    if tail.len() == STDERR_TAIL_LINES {
                        tail.pop_front();
                    }
                    tail.push_back(line);
                }
            });
        }

        let stdout = match child.stdout.take() {
            Some(stdout) => stdout,
            None => {
                return Err(RunnerError::Spawn {
                    command: program.clone(),
                    source: std::io::Error::other("child has no stdout"),
                })
            }
        };
        let mut lines = BufReader::new(stdout).lines();

        let mut state = StreamState::new(&self.engine);
        let mut outcome = TurnOutcome {
            ok: false,
            resume: None,
        };

        loop {
            let flush_at = delivery
                .deadline()
                .unwrap_or_else(|| Instant::now() + Duration::from_secs(86_400));
            let armed = delivery.deadline().is_some();

            tokio::select! {
                line = lines.next_line() => match line {
                    Ok(Some(line)) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        let event = match RawAgentEvent::parse(&line) {
                            Ok(event) => event,
                            Err(error) => {
                                warn!(%error, "skipping malformed agent event");
                                continue;
                            }
                        };
                        if self.relay_events(&mut state, &event, delivery, &mut outcome).await? {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(error) => {
                        warn!(%error, "agent stdout read failed, treating as end of stream");
                        break;
                    }
                },
                _ = sleep_until(flush_at), if armed => {
                    delivery.flush_deadline().await?;
                }
            }
        }

        if !state.is_finished() {
            // The stream ended without a terminal event. Reap the process
            // and synthesize the failure the agent never reported.
            let status = match tokio::time::timeout(Duration::from_secs(5), child.wait()).await {
                Ok(Ok(status)) => format!("{status}"),
                Ok(Err(error)) => format!("wait failed: {error}"),
                Err(_) => {
                    let _ = child.kill().await;
                    "did not exit".to_string()
                }
            };
            let tail: Vec<String> = stderr_tail.lock().await.iter().cloned().collect();
            let mut message = format!("agent exited without completing ({status})");
            if !tail.is_empty() {
                message.push('\n');
                message.push_str(&tail.join("\n"));
            }
            let synthesized = DomainEvent::Completed {
                ok: false,
                answer: String::new(),
                resume: state.resume_token(),
                error: Some(message),
            };
            outcome.resume = state.resume_token().or(outcome.resume.take());
            delivery.handle_event(&synthesized).await?;
        } else {
            debug!("turn complete, waiting for agent to exit");
            if tokio::time::timeout(Duration::from_secs(5), child.wait())
                .await
                .is_err()
            {
                let _ = child.kill().await;
            }
        }

        Ok(outcome)
    }

    /// Translate one raw event and push the results through delivery.
    /// Returns `true` when the turn's terminal output has been delivered.
    async fn relay_events(
        &self,
        state: &mut StreamState,
        event: &RawAgentEvent,
        delivery: &mut TurnDelivery,
        outcome: &mut TurnOutcome,
    ) -> Result<bool, TransportError> {
        for domain_event in state.apply(event) {
            match &domain_event {
                DomainEvent::Started { resume, .. } => {
                    outcome.resume = Some(resume.clone());
                }
                DomainEvent::Completed { ok, resume, .. } => {
                    outcome.ok = *ok;
                    if resume.is_some() {
                        outcome.resume = resume.clone();
                    }
                }
                _ => {}
            }
            if delivery.handle_event(&domain_event).await? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}
