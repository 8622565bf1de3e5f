//! Relay configuration — agent command, pacing intervals, platform limits.
//!
//! User-level config: `~/.relaybot/config.yaml` (agent command, intervals)
//! Project-level config: `.relaybot/config.yaml` (agent command override only, safe to commit)
//!
//! Resolution: project config → user config → env var fallback → error at use.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level relay configuration (user-level file).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Argv of the coding-agent CLI to spawn per turn.
    #[serde(default)]
    pub agent_command: Vec<String>,
    /// Engine name stamped into resume tokens; a token from another engine
    /// is never replayed.
    #[serde(default = "default_engine")]
    pub engine: String,
    /// Minimum gap between progress updates while answer text streams.
    #[serde(default = "default_streaming_interval_ms")]
    pub streaming_interval_ms: u64,
    /// Minimum gap between progress updates while the agent runs tools.
    #[serde(default = "default_idle_interval_ms")]
    pub idle_interval_ms: u64,
    /// Quiet period before an emulated edit goes out.
    #[serde(default = "default_edit_debounce_ms")]
    pub edit_debounce_ms: u64,
    /// Ceiling on how long a steady stream of edits may stay undelivered.
    #[serde(default = "default_edit_max_wait_ms")]
    pub edit_max_wait_ms: u64,
    /// Character budget per delivered message, below the platform's hard cap.
    #[serde(default = "default_chunk_limit")]
    pub chunk_limit: usize,
    /// Character budget for the streaming-text preview tail.
    #[serde(default = "default_preview_limit")]
    pub preview_limit: usize,
}

/// Project-level config (safe to commit).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct ProjectConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    agent_command: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    engine: Option<String>,
}

fn default_engine() -> String {
    "opencode".into()
}
fn default_streaming_interval_ms() -> u64 {
    2_000
}
fn default_idle_interval_ms() -> u64 {
    5_000
}
fn default_edit_debounce_ms() -> u64 {
    400
}
fn default_edit_max_wait_ms() -> u64 {
    2_500
}
fn default_chunk_limit() -> usize {
    3_800
}
fn default_preview_limit() -> usize {
    500
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            agent_command: Vec::new(),
            engine: default_engine(),
            streaming_interval_ms: default_streaming_interval_ms(),
            idle_interval_ms: default_idle_interval_ms(),
            edit_debounce_ms: default_edit_debounce_ms(),
            edit_max_wait_ms: default_edit_max_wait_ms(),
            chunk_limit: default_chunk_limit(),
            preview_limit: default_preview_limit(),
        }
    }
}

/// Path to `~/.relaybot/`.
fn dirs_path() -> Option<PathBuf> {
    std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".relaybot"))
}

/// Path to the user-level config file.
fn user_config_path() -> Option<PathBuf> {
    dirs_path().map(|p| p.join("config.yaml"))
}

impl RelayConfig {
    /// Load config from disk, merging user + project files.
    /// Falls back to `RELAYBOT_AGENT` for the agent command.
    pub fn load() -> Self {
        let mut config = Self::load_user_config();

        // Merge project-level overrides
        let project = Self::load_project_config();
        if let Some(command) = project.agent_command {
            config.agent_command = command;
        }
        if let Some(engine) = project.engine {
            config.engine = engine;
        }

        // Env fallback: no command configured anywhere
        if config.agent_command.is_empty() {
            if let Ok(raw) = std::env::var("RELAYBOT_AGENT") {
                config.agent_command = raw.split_whitespace().map(str::to_string).collect();
            }
        }

        config
    }

    /// Load just the user-level config file.
    fn load_user_config() -> Self {
        let Some(path) = user_config_path() else {
            return Self::default();
        };
        match std::fs::read_to_string(&path) {
            Ok(content) => serde_yaml::from_str(&content).unwrap_or_default(),
            Err(_) => Self::default(),
        }
    }

    /// Load just the project-level config file.
    fn load_project_config() -> ProjectConfig {
        match std::fs::read_to_string(".relaybot/config.yaml") {
            Ok(content) => serde_yaml::from_str(&content).unwrap_or_default(),
            Err(_) => ProjectConfig::default(),
        }
    }

    /// Save user-level config to `~/.relaybot/config.yaml`.
    pub fn save(&self) -> Result<(), String> {
        let Some(dir) = dirs_path() else {
            return Err("Cannot determine home directory".into());
        };
        std::fs::create_dir_all(&dir)
            .map_err(|e| format!("Failed to create {}: {e}", dir.display()))?;
        let path = dir.join("config.yaml");
        let yaml = serde_yaml::to_string(self).map_err(|e| format!("YAML serialize error: {e}"))?;
        std::fs::write(&path, yaml).map_err(|e| format!("Failed to write {}: {e}", path.display()))?;
        Ok(())
    }

    pub fn streaming_interval(&self) -> Duration {
        Duration::from_millis(self.streaming_interval_ms)
    }

    pub fn idle_interval(&self) -> Duration {
        Duration::from_millis(self.idle_interval_ms)
    }

    pub fn edit_debounce(&self) -> Duration {
        Duration::from_millis(self.edit_debounce_ms)
    }

    pub fn edit_max_wait(&self) -> Duration {
        Duration::from_millis(self.edit_max_wait_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_from_yaml_string() {
        let yaml = r#"
agent_command: ["opencode", "run", "--format", "json"]
engine: opencode
streaming_interval_ms: 1500
"#;
        let config: RelayConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(
            config.agent_command,
            vec!["opencode", "run", "--format", "json"]
        );
        assert_eq!(config.streaming_interval(), Duration::from_millis(1500));
        // Unspecified fields keep defaults.
        assert_eq!(config.idle_interval_ms, 5_000);
        assert_eq!(config.chunk_limit, 3_800);
    }

    #[test]
    fn round_trip_yaml() {
        let mut config = RelayConfig::default();
        config.agent_command = vec!["agent".into(), "--json".into()];
        config.engine = "codex".into();
        let yaml = serde_yaml::to_string(&config).unwrap();
        let back: RelayConfig = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back.agent_command, config.agent_command);
        assert_eq!(back.engine, "codex");
    }

    #[test]
    fn defaults_are_sane() {
        let config = RelayConfig::default();
        assert!(config.agent_command.is_empty());
        assert!(config.edit_debounce() < config.edit_max_wait());
        assert!(config.streaming_interval() < config.idle_interval());
        assert!(config.preview_limit < config.chunk_limit);
    }

    #[test]
    fn project_overrides_parse() {
        let yaml = r#"
agent_command: ["./scripts/agent.sh"]
"#;
        let project: ProjectConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(project.agent_command.unwrap(), vec!["./scripts/agent.sh"]);
        assert!(project.engine.is_none());
    }
}
