//! Periodic proactive sweep.
//!
//! On every tick, each engaged user gets one nudge decision from the
//! orchestrator. Postpone windows and per-user turn locking are enforced
//! inside the decision itself, so the sweep just iterates and delivers.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::orchestrator::Orchestrator;
use crate::traits::{Channel, EngagementStore, StateStore};

pub fn spawn_heartbeat(
    orchestrator: Arc<Orchestrator>,
    channel: Arc<dyn Channel>,
    store: Arc<dyn StateStore>,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(interval_secs = interval.as_secs(), "heartbeat started");
        let mut ticker = tokio::time::interval(interval);
        // The first tick fires immediately; skip it so startup stays quiet.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            run_sweep(&orchestrator, channel.as_ref(), store.as_ref()).await;
        }
    })
}

async fn run_sweep(
    orchestrator: &Orchestrator,
    channel: &dyn Channel,
    store: &dyn StateStore,
) {
    let user_ids = match store.engaged_user_ids().await {
        Ok(ids) => ids,
        Err(e) => {
            warn!(error = %e, "heartbeat could not list users");
            return;
        }
    };
    debug!(users = user_ids.len(), "heartbeat sweep");

    for user_id in user_ids {
        let nudge = match orchestrator.proactive_check(&user_id).await {
            Ok(Some(nudge)) => nudge,
            Ok(None) => continue,
            Err(e) => {
                warn!(user_id, error = %e, "proactive check failed");
                continue;
            }
        };
        if let Err(e) = channel
            .send_text(&user_id, &nudge.message, &nudge.buttons)
            .await
        {
            warn!(user_id, channel = channel.name(), error = %e, "nudge delivery failed");
        }
    }
}
