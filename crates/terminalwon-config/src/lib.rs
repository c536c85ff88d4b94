//! Persistent hub configuration
//!
//! Provider keys, per-agent provider/model choices, tunnel and UI preferences,
//! stored as JSON in `~/.terminalwon/config.json`.

mod manager;
mod model;

pub use manager::{env_key_names, mask_key, ConfigManager};
pub use model::{
    AgentConfig, AgentSettings, AgentSettingsUpdate, AgentsConfig, HubConfig, Preferences,
    ProviderSettings, TunnelSettings, DEFAULT_MODEL, DEFAULT_PROVIDER, PROVIDER_IDS,
};

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to locate configuration directory: {0}")]
    Home(anyhow::Error),
    #[error("I/O error on {}: {1}", .0.display())]
    Io(PathBuf, #[source] std::io::Error),
    #[error("Invalid configuration JSON: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ConfigError>;
