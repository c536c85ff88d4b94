use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use terminalwon_types::AgentKind;

/// Provider ids in the order they are considered when picking a fallback
pub const PROVIDER_IDS: [&str; 6] = ["anthropic", "openai", "xai", "google", "manus", "ollama"];

pub const DEFAULT_PROVIDER: &str = "anthropic";
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";

/// Persisted hub configuration (`~/.terminalwon/config.json`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HubConfig {
    pub version: u32,
    pub setup_complete: bool,
    pub providers: BTreeMap<String, ProviderSettings>,
    pub default_provider: String,
    pub default_model: String,
    pub agents: AgentsConfig,
    pub tunnel: TunnelSettings,
    pub preferences: Preferences,
}

impl Default for HubConfig {
    fn default() -> Self {
        let providers = PROVIDER_IDS
            .iter()
            .map(|id| {
                let settings = ProviderSettings {
                    // Local inference needs no key
                    enabled: *id == "ollama",
                    ..ProviderSettings::default()
                };
                (id.to_string(), settings)
            })
            .collect();

        Self {
            version: 2,
            setup_complete: false,
            providers,
            default_provider: DEFAULT_PROVIDER.to_string(),
            default_model: DEFAULT_MODEL.to_string(),
            agents: AgentsConfig::default(),
            tunnel: TunnelSettings::default(),
            preferences: Preferences::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProviderSettings {
    pub enabled: bool,
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

/// Raw per-agent settings; `None` means "use the default"
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentSettings {
    pub enabled: bool,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub system_prompt: Option<String>,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            provider: None,
            model: None,
            system_prompt: None,
        }
    }
}

/// Partial update applied by `ConfigManager::set_agent_config`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentSettingsUpdate {
    pub enabled: Option<bool>,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub system_prompt: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentsConfig {
    pub terminal: AgentSettings,
    pub ide: AgentSettings,
    pub computer_use: AgentSettings,
    pub chat: AgentSettings,
}

impl Default for AgentsConfig {
    fn default() -> Self {
        Self {
            terminal: AgentSettings::default(),
            ide: AgentSettings::default(),
            // Computer use is only offered by Anthropic models
            computer_use: AgentSettings {
                provider: Some(DEFAULT_PROVIDER.to_string()),
                model: Some(DEFAULT_MODEL.to_string()),
                ..AgentSettings::default()
            },
            chat: AgentSettings::default(),
        }
    }
}

impl AgentsConfig {
    pub fn get(&self, kind: AgentKind) -> &AgentSettings {
        match kind {
            AgentKind::Terminal => &self.terminal,
            AgentKind::Ide => &self.ide,
            AgentKind::ComputerUse => &self.computer_use,
            AgentKind::Chat => &self.chat,
        }
    }

    pub fn get_mut(&mut self, kind: AgentKind) -> &mut AgentSettings {
        match kind {
            AgentKind::Terminal => &mut self.terminal,
            AgentKind::Ide => &mut self.ide,
            AgentKind::ComputerUse => &mut self.computer_use,
            AgentKind::Chat => &mut self.chat,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TunnelSettings {
    pub provider: Option<String>,
    pub url: Option<String>,
    pub auth_token: Option<String>,
    pub configured: bool,
    pub auto_start: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Preferences {
    pub theme: String,
    pub auto_detect_errors: bool,
    pub show_agent_insights: bool,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            theme: "system".to_string(),
            auto_detect_errors: true,
            show_agent_insights: true,
        }
    }
}

/// Agent settings with provider resolved against the global defaults
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentConfig {
    pub enabled: bool,
    pub provider: String,
    /// `None` when neither the agent nor the defaults name a model for `provider`
    pub model: Option<String>,
    pub system_prompt: Option<String>,
}
