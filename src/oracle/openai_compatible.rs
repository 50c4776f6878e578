use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::oracle::{build_http_client, OracleError};
use crate::traits::Oracle;

/// Oracle client for any OpenAI-compatible chat-completions endpoint.
pub struct OpenAiCompatibleOracle {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
}

/// Validate the base URL for security.
/// - HTTPS is required for remote URLs to protect API keys in transit
/// - HTTP is allowed only for localhost (local LLM servers)
fn validate_base_url(base_url: &str) -> Result<(), String> {
    let parsed = reqwest::Url::parse(base_url)
        .map_err(|e| format!("invalid base_url '{}': {}", base_url, e))?;

    let scheme = parsed.scheme();
    let host = parsed.host_str().unwrap_or("");

    match scheme {
        "https" => Ok(()),
        "http" => {
            let is_localhost =
                host == "localhost" || host == "127.0.0.1" || host == "[::1]" || host == "::1";
            if is_localhost {
                warn!(
                    "using unencrypted HTTP for local oracle at '{}'; API key will be sent in cleartext",
                    base_url
                );
                Ok(())
            } else {
                Err(format!(
                    "HTTP is not allowed for remote URLs (base_url: '{}'); use HTTPS",
                    base_url
                ))
            }
        }
        _ => Err(format!(
            "unsupported URL scheme '{}' in base_url '{}'",
            scheme, base_url
        )),
    }
}

impl OpenAiCompatibleOracle {
    pub fn new(
        base_url: &str,
        api_key: &str,
        model: &str,
        timeout: Duration,
    ) -> Result<Self, String> {
        validate_base_url(base_url)?;
        let client = build_http_client(timeout)?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
        })
    }
}

#[async_trait]
impl Oracle for OpenAiCompatibleOracle {
    async fn complete(&self, prompt: &str) -> Result<String, OracleError> {
        let body = json!({
            "model": self.model,
            "temperature": 0.0,
            "messages": [{"role": "user", "content": prompt}],
        });

        let url = format!("{}/chat/completions", self.base_url);
        info!(model = %self.model, url = %url, "calling oracle");

        let resp = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| OracleError::network(&e))?;

        let status = resp.status();
        let text = resp.text().await.map_err(|e| OracleError::network(&e))?;

        if !status.is_success() {
            return Err(OracleError::from_status(status.as_u16(), &text));
        }

        let parsed: Value = serde_json::from_str(&text)
            .map_err(|e| OracleError::malformed(format!("non-JSON oracle response: {}", e)))?;

        let content = parsed["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| OracleError::malformed("oracle response carried no content"))?;

        debug!(chars = content.len(), "oracle responded");
        Ok(content.to_string())
    }
}
