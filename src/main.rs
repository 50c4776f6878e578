mod channels;
mod config;
mod daemon;
mod engagement;
mod error;
mod heartbeat;
mod oracle;
mod orchestrator;
mod prompts;
mod quick_replies;
mod relevance;
mod resolver;
mod state;
mod traits;
mod types;
mod validator;

#[cfg(test)]
mod integration_tests;
#[cfg(test)]
mod testing;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::channels::{HttpChannel, NullChannel};
use crate::config::AppConfig;
use crate::daemon::{Daemon, InboundMessage};
use crate::oracle::OpenAiCompatibleOracle;
use crate::orchestrator::{Orchestrator, OrchestratorSettings};
use crate::relevance::{RelevanceCache, RelevanceChecker};
use crate::state::SqliteStateStore;
use crate::traits::{Channel, Oracle, StateStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("coachd=info")),
        )
        .init();

    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));
    let config = AppConfig::load(&config_path)?;
    info!(path = %config_path.display(), "configuration loaded");

    let store: Arc<dyn StateStore> =
        Arc::new(SqliteStateStore::new(&config.state.db_path).await?);
    let oracle: Arc<dyn Oracle> = Arc::new(
        OpenAiCompatibleOracle::new(
            &config.oracle.base_url,
            &config.oracle.api_key,
            &config.oracle.model,
            Duration::from_secs(config.oracle.timeout_secs),
        )
        .map_err(|e| anyhow::anyhow!(e))?,
    );

    let channel: Arc<dyn Channel> = match &config.channel.endpoint {
        Some(endpoint) => Arc::new(HttpChannel::new(
            endpoint,
            Duration::from_secs(config.channel.timeout_secs),
        )?),
        None => {
            warn!("no channel.endpoint configured; outbound messages will be logged only");
            Arc::new(NullChannel)
        }
    };

    let relevance = RelevanceChecker::new(oracle.clone(), Arc::new(RelevanceCache::new()));
    let orchestrator = Arc::new(Orchestrator::new(
        store.clone(),
        oracle,
        relevance,
        OrchestratorSettings {
            transcript_window: config.state.transcript_window,
            postpone_default_days: config.buddy.postpone_default_days,
            default_assistant_name: config.buddy.default_assistant_name.clone(),
        },
    ));

    let _heartbeat = if config.buddy.heartbeat_enabled {
        Some(heartbeat::spawn_heartbeat(
            orchestrator.clone(),
            channel.clone(),
            store.clone(),
            Duration::from_secs(config.buddy.heartbeat_interval_secs),
        ))
    } else {
        None
    };

    let (tx, rx) = mpsc::channel::<InboundMessage>(64);
    let daemon = Daemon::new(orchestrator, channel);
    let pump = tokio::spawn(daemon.run(rx));

    // Local ingestion: one message per stdin line, "<user_id> <text>".
    info!("ready; reading messages from stdin");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Some((user_id, text)) = line.split_once(char::is_whitespace) else {
            warn!(line, "expected '<user_id> <text>'");
            continue;
        };
        if tx
            .send(InboundMessage {
                user_id: user_id.to_string(),
                text: text.trim().to_string(),
            })
            .await
            .is_err()
        {
            error!("inbound queue closed");
            break;
        }
    }

    drop(tx);
    pump.await?;
    Ok(())
}
