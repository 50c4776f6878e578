use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub oracle: OracleConfig,
    #[serde(default)]
    pub state: StateConfig,
    #[serde(default)]
    pub channel: ChannelConfig,
    #[serde(default)]
    pub buddy: BuddyConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct OracleConfig {
    pub api_key: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_oracle_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_oracle_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct StateConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,
    /// How many transcript turns to feed the oracle as context.
    #[serde(default = "default_transcript_window")]
    pub transcript_window: usize,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            transcript_window: default_transcript_window(),
        }
    }
}

fn default_db_path() -> String {
    "coachd.db".to_string()
}

fn default_transcript_window() -> usize {
    20
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChannelConfig {
    /// Outbound dispatch endpoint. When unset, outbound messages are logged
    /// instead of delivered (useful for local runs).
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_channel_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            timeout_secs: default_channel_timeout_secs(),
        }
    }
}

fn default_channel_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct BuddyConfig {
    /// Fallback postpone window when the user's message carries no parseable
    /// date or day count.
    #[serde(default = "default_postpone_days")]
    pub postpone_default_days: i64,
    #[serde(default = "default_heartbeat_enabled")]
    pub heartbeat_enabled: bool,
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
    #[serde(default = "default_assistant_name")]
    pub default_assistant_name: String,
}

impl Default for BuddyConfig {
    fn default() -> Self {
        Self {
            postpone_default_days: default_postpone_days(),
            heartbeat_enabled: default_heartbeat_enabled(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            default_assistant_name: default_assistant_name(),
        }
    }
}

fn default_postpone_days() -> i64 {
    3
}

fn default_heartbeat_enabled() -> bool {
    true
}

fn default_heartbeat_interval_secs() -> u64 {
    3600
}

fn default_assistant_name() -> String {
    "Study Buddy".to_string()
}

impl AppConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Missing credentials are fatal at startup, not per turn.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.oracle.api_key.trim().is_empty() {
            anyhow::bail!("configuration error: oracle.api_key is required");
        }
        if self.buddy.postpone_default_days <= 0 {
            anyhow::bail!("configuration error: buddy.postpone_default_days must be positive");
        }
        Ok(())
    }
}
