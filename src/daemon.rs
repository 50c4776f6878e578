//! Inbound message pump.
//!
//! Messages arrive on an mpsc queue and are processed concurrently across
//! users. Per-user serialization lives in the orchestrator's turn lock, so
//! two rapid messages from one user can't interleave their engagement-state
//! writes with each other or with the heartbeat sweep.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::orchestrator::Orchestrator;
use crate::traits::Channel;

#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub user_id: String,
    pub text: String,
}

pub struct Daemon {
    orchestrator: Arc<Orchestrator>,
    channel: Arc<dyn Channel>,
}

impl Daemon {
    pub fn new(orchestrator: Arc<Orchestrator>, channel: Arc<dyn Channel>) -> Arc<Self> {
        Arc::new(Self {
            orchestrator,
            channel,
        })
    }

    /// Drain the inbound queue until every sender is dropped.
    pub async fn run(self: Arc<Self>, mut rx: mpsc::Receiver<InboundMessage>) {
        while let Some(message) = rx.recv().await {
            let daemon = self.clone();
            tokio::spawn(async move {
                daemon.process(message).await;
            });
        }
        debug!("inbound queue closed; daemon stopping");
    }

    async fn process(&self, message: InboundMessage) {
        let response = self
            .orchestrator
            .handle_turn(&message.user_id, &message.text)
            .await;
        if let Err(e) = self
            .channel
            .send_text(&message.user_id, &response.message, &response.buttons)
            .await
        {
            warn!(
                user_id = %message.user_id,
                channel = self.channel.name(),
                error = %e,
                "reply delivery failed"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompts;
    use crate::testing::{TestChannel, TestHarness};
    use crate::traits::EngagementStore;
    use std::time::Duration;

    #[tokio::test]
    async fn every_inbound_message_gets_a_reply() {
        let h = TestHarness::new().await;
        let channel = Arc::new(TestChannel::new());
        let daemon = Daemon::new(h.orchestrator.clone(), channel.clone());
        let (tx, rx) = mpsc::channel(8);
        let pump = tokio::spawn(daemon.run(rx));

        for user in ["u1", "u2"] {
            tx.send(InboundMessage {
                user_id: user.to_string(),
                text: "hello".to_string(),
            })
            .await
            .unwrap();
        }
        drop(tx);
        pump.await.unwrap();

        // Per-message tasks may still be in flight when the pump exits.
        for _ in 0..100 {
            if channel.sent().len() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let sent = channel.sent();
        assert_eq!(sent.len(), 2);
        assert!(sent.iter().all(|m| m.text == prompts::WELCOME));
    }

    #[tokio::test]
    async fn rapid_messages_from_one_user_run_serially() {
        let h = TestHarness::new().await;
        h.oracle.push_reply(r#"{"is_name": true, "name": "Nova"}"#);
        let channel = Arc::new(TestChannel::new());
        let daemon = Daemon::new(h.orchestrator.clone(), channel.clone());
        let (tx, rx) = mpsc::channel(8);
        let pump = tokio::spawn(daemon.run(rx));

        // Back to back without waiting for the first reply. The second turn
        // must observe the first turn's phase advance, so it runs the name
        // check instead of greeting again.
        for text in ["hello there", "Call you Nova"] {
            tx.send(InboundMessage {
                user_id: "u1".to_string(),
                text: text.to_string(),
            })
            .await
            .unwrap();
        }
        drop(tx);
        pump.await.unwrap();

        for _ in 0..100 {
            if channel.sent().len() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let sent = channel.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(
            sent.iter().filter(|m| m.text == prompts::WELCOME).count(),
            1
        );
        assert!(sent.iter().any(|m| m.text.contains("Nova")));
        assert_eq!(h.oracle.call_count(), 1);

        let state = h.store.load_engagement("u1").await.unwrap().unwrap();
        assert_eq!(state.assistant_name.as_deref(), Some("Nova"));
    }
}
