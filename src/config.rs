use anyhow::{Context, Result};
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub service: ServiceConfig,
    pub profile_store: ProfileStoreConfig,
    pub agent: AgentConfig,
    #[serde(default)]
    pub audio: AudioConfig,
    #[serde(default)]
    pub session: SessionLimits,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
    pub http: HttpConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    pub bind: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProfileStoreConfig {
    pub base_url: String,
    #[serde(default = "default_collection")]
    pub collection: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Identifier of the remote agent that conducts the interview
    pub agent_id: String,
    /// WebSocket endpoint of the realtime conversation service
    pub url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub connect_timeout_secs: u64,
}

/// Where microphone audio comes from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioBackendKind {
    /// Default input device through cpal
    #[default]
    Cpal,
    /// Silent frames; for hosts without a capture device
    Silence,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AudioConfig {
    #[serde(default)]
    pub backend: AudioBackendKind,
    pub sample_rate: u32,
    pub channels: u16,
    pub buffer_duration_ms: u64,
    /// Play the agent's voice on the default output device
    #[serde(default = "default_playback")]
    pub playback: bool,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            backend: AudioBackendKind::default(),
            sample_rate: 16000,
            channels: 1,
            buffer_duration_ms: 100,
            playback: default_playback(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SessionLimits {
    /// Hard cap on a connected session; unlimited when absent
    #[serde(default)]
    pub max_duration_secs: Option<u64>,
}

impl SessionLimits {
    pub fn max_duration(&self) -> Option<Duration> {
        self.max_duration_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }
}

fn default_collection() -> String {
    "users".to_string()
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_playback() -> bool {
    true
}

impl Config {
    /// Load from `path` (any format the `config` crate understands, extension
    /// optional), then apply `VOICE_INTERVIEW__SECTION__KEY` overrides.
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(
                config::Environment::with_prefix("VOICE_INTERVIEW")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()
            .with_context(|| format!("Failed to read config from {}", path))?;

        settings
            .try_deserialize()
            .context("Invalid configuration")
    }
}
