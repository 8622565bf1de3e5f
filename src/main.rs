use std::sync::Arc;

use anyhow::{bail, Result};
use clap::Parser;
use tracing::info;

use relaybot::agent::FileSessionStore;
use relaybot::config::RelayConfig;
use relaybot::transport::ConsoleTransport;
use relaybot::Relay;

#[derive(Parser)]
#[command(name = "relaybot", about = "Stream a coding agent's work into a chat thread.")]
struct Cli {
    /// The prompt to send to the agent
    prompt: String,

    /// Thread to deliver into (threads keep their own agent session)
    #[arg(short, long, default_value = "console")]
    thread: String,

    /// Agent command, overriding config (e.g. "opencode run --format json")
    #[arg(short, long)]
    agent: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("relaybot=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    let mut config = RelayConfig::load();
    if let Some(agent) = cli.agent {
        config.agent_command = agent.split_whitespace().map(str::to_string).collect();
    }
    if config.agent_command.is_empty() {
        bail!(
            "no agent command configured; set one in ~/.relaybot/config.yaml, \
             RELAYBOT_AGENT, or pass --agent"
        );
    }

    let store = match FileSessionStore::default_path() {
        Some(path) => Arc::new(FileSessionStore::open(path)),
        None => bail!("cannot determine home directory for the session store"),
    };

    info!(agent = %config.agent_command.join(" "), thread = %cli.thread, "starting turn");
    let relay = Relay::new(Arc::new(ConsoleTransport::new()), store, config);
    relay.handle_message(&cli.thread, &cli.prompt).await
}
