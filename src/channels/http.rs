//! Outbound delivery channels.
//!
//! The daemon itself is transport-agnostic: replies and nudges go through the
//! `Channel` trait. `HttpChannel` posts to a messaging gateway (WhatsApp-style
//! bridges take this shape); `NullChannel` logs, for local runs without a
//! gateway configured.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tracing::{info, warn};

use crate::traits::Channel;
use crate::types::QuickReplyButton;

pub struct HttpChannel {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpChannel {
    pub fn new(endpoint: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl Channel for HttpChannel {
    fn name(&self) -> &str {
        "http"
    }

    async fn send_text(
        &self,
        user_id: &str,
        text: &str,
        buttons: &[QuickReplyButton],
    ) -> anyhow::Result<()> {
        let payload = json!({
            "userIds": [user_id],
            "message": text,
            "buttons": buttons
                .iter()
                .map(|b| json!({"name": b.name, "callback": b.callback}))
                .collect::<Vec<_>>(),
        });
        let response = self
            .client
            .post(format!("{}/messages", self.endpoint))
            .json(&payload)
            .send()
            .await?;
        if !response.status().is_success() {
            // Delivery is fire-and-forget; surface the status but don't fail
            // the turn.
            warn!(
                user_id,
                status = %response.status(),
                "message gateway rejected send"
            );
        }
        Ok(())
    }
}

/// Logs outbound messages instead of delivering them.
pub struct NullChannel;

#[async_trait]
impl Channel for NullChannel {
    fn name(&self) -> &str {
        "null"
    }

    async fn send_text(
        &self,
        user_id: &str,
        text: &str,
        buttons: &[QuickReplyButton],
    ) -> anyhow::Result<()> {
        info!(user_id, buttons = buttons.len(), "outbound message:\n{text}");
        Ok(())
    }
}
