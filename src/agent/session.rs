//! Resume tokens and the session store that persists them.
//!
//! A resume token is an opaque (engine, session) pair letting a later turn
//! continue the same agent session. The pipeline only mints and consumes
//! tokens; the orchestrator persists them around `Started`/`Completed`.
//!
//! User-level store: `~/.relaybot/sessions.yaml`, a flat map from thread
//! key to token.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Opaque handle for resuming an agent session in a later turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumeToken {
    /// Which agent engine minted the session (e.g. "opencode").
    pub engine: String,
    /// The engine's session identifier, passed back verbatim on resume.
    pub session: String,
}

/// Persistence collaborator for resume tokens, keyed by thread.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Token for a thread, if one was stored for this engine.
    async fn get(&self, thread_key: &str, engine: &str) -> Option<ResumeToken>;
    /// Store (or replace) the thread's token.
    async fn set(&self, thread_key: &str, token: ResumeToken) -> std::io::Result<()>;
}

/// YAML-file-backed session store.
pub struct FileSessionStore {
    path: PathBuf,
    sessions: tokio::sync::Mutex<HashMap<String, ResumeToken>>,
}

impl FileSessionStore {
    /// Open (or create empty) the store at `path`.
    pub fn open(path: PathBuf) -> Self {
        let sessions = match std::fs::read_to_string(&path) {
            Ok(content) => serde_yaml::from_str(&content).unwrap_or_default(),
            Err(_) => HashMap::new(),
        };
        Self {
            path,
            sessions: tokio::sync::Mutex::new(sessions),
        }
    }

    /// Default location under the user's home directory.
    pub fn default_path() -> Option<PathBuf> {
        std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".relaybot/sessions.yaml"))
    }

    fn persist(&self, sessions: &HashMap<String, ResumeToken>) -> std::io::Result<()> {
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let yaml = serde_yaml::to_string(sessions).map_err(std::io::Error::other)?;
        std::fs::write(&self.path, yaml)
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn get(&self, thread_key: &str, engine: &str) -> Option<ResumeToken> {
        let sessions = self.sessions.lock().await;
        sessions
            .get(thread_key)
            .filter(|token| token.engine == engine)
            .cloned()
    }

    async fn set(&self, thread_key: &str, token: ResumeToken) -> std::io::Result<()> {
        let mut sessions = self.sessions.lock().await;
        sessions.insert(thread_key.to_string(), token);
        self.persist(&sessions)
    }
}
