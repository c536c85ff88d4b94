use parking_lot::RwLock;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use terminalwon_types::AgentKind;

use crate::model::{
    AgentConfig, AgentSettingsUpdate, HubConfig, Preferences, ProviderSettings, TunnelSettings,
    PROVIDER_IDS,
};
use crate::{ConfigError, Result};

const MASK: &str = "••••••••";

/// Environment variables consulted when a provider has no stored key
pub fn env_key_names(provider: &str) -> &'static [&'static str] {
    match provider {
        "anthropic" => &["ANTHROPIC_API_KEY", "ANTHROPIC_AUTH_TOKEN"],
        "openai" => &["OPENAI_API_KEY"],
        "xai" => &["XAI_API_KEY"],
        "google" => &["GOOGLE_API_KEY", "GEMINI_API_KEY"],
        "manus" => &["MANUS_API_KEY"],
        _ => &[],
    }
}

/// Mask an API key for display: first 8 chars, bullets, last 4
pub fn mask_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() < 12 {
        return MASK.to_string();
    }
    let head: String = chars[..8].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}{}{}", head, MASK, tail)
}

/// Owns the persisted configuration file and answers resolution queries
pub struct ConfigManager {
    path: Option<PathBuf>,
    config: RwLock<HubConfig>,
}

impl std::fmt::Debug for ConfigManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigManager")
            .field("path", &self.path)
            .finish()
    }
}

impl ConfigManager {
    /// Default location: `~/.terminalwon/config.json`
    pub fn default_path() -> Result<PathBuf> {
        let dir = terminalwon_logging::get_terminalwon_dir().map_err(ConfigError::Home)?;
        Ok(dir.join("config.json"))
    }

    /// Load from `path`, writing defaults when the file does not exist yet.
    ///
    /// A corrupt file is logged and replaced in memory by the defaults; it is
    /// not overwritten until the next explicit save.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        let config = if path.exists() {
            let raw = fs::read_to_string(&path).map_err(|e| ConfigError::Io(path.clone(), e))?;
            match serde_json::from_str::<HubConfig>(&raw) {
                Ok(config) => {
                    info!("Loaded configuration from {}", path.display());
                    config
                }
                Err(e) => {
                    warn!("Error loading config {}: {}", path.display(), e);
                    HubConfig::default()
                }
            }
        } else {
            let config = HubConfig::default();
            write_config(&path, &config)?;
            info!("Created default configuration at {}", path.display());
            config
        };

        Ok(Self {
            path: Some(path),
            config: RwLock::new(config),
        })
    }

    /// Configuration that lives only in memory
    pub fn in_memory(config: HubConfig) -> Self {
        Self {
            path: None,
            config: RwLock::new(config),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Full configuration, including secrets
    pub fn get(&self) -> HubConfig {
        self.config.read().clone()
    }

    /// Configuration safe to hand to clients: keys masked, `hasKey` flags added
    pub fn redacted(&self) -> Value {
        let config = self.get();
        let mut value = serde_json::to_value(&config).unwrap_or(Value::Null);

        if let Some(providers) = value.get_mut("providers").and_then(Value::as_object_mut) {
            for (_, provider) in providers.iter_mut() {
                let Some(obj) = provider.as_object_mut() else {
                    continue;
                };
                let masked = obj
                    .get("apiKey")
                    .and_then(Value::as_str)
                    .filter(|k| !k.is_empty())
                    .map(mask_key);
                obj.insert("hasKey".into(), Value::Bool(masked.is_some()));
                obj.insert(
                    "apiKey".into(),
                    masked.map(Value::String).unwrap_or(Value::Null),
                );
            }
        }

        if let Some(tunnel) = value.get_mut("tunnel").and_then(Value::as_object_mut) {
            let has_token = tunnel.get("authToken").map_or(false, |t| !t.is_null());
            if has_token {
                tunnel.insert("authToken".into(), Value::String(MASK.to_string()));
            }
            tunnel.insert("hasToken".into(), Value::Bool(has_token));
        }

        value
    }

    pub fn save(&self) -> Result<()> {
        match &self.path {
            Some(path) => write_config(path, &self.config.read()),
            None => Ok(()),
        }
    }

    pub fn provider_settings(&self, provider: &str) -> Option<ProviderSettings> {
        self.config.read().providers.get(provider).cloned()
    }

    /// Stored key for a provider, falling back to its environment variables
    pub fn api_key(&self, provider: &str) -> Option<String> {
        let stored = self
            .config
            .read()
            .providers
            .get(provider)
            .and_then(|p| p.api_key.clone())
            .filter(|k| !k.is_empty());

        stored.or_else(|| {
            env_key_names(provider)
                .iter()
                .find_map(|name| std::env::var(name).ok().filter(|v| !v.is_empty()))
        })
    }

    /// Store a key; a provider with a key is enabled, clearing it disables it
    pub fn set_api_key(&self, provider: &str, api_key: Option<String>) -> Result<()> {
        {
            let mut config = self.config.write();
            let entry = config.providers.entry(provider.to_string()).or_default();
            entry.enabled = api_key.as_deref().map_or(false, |k| !k.is_empty());
            entry.api_key = api_key;
        }
        self.save()
    }

    pub fn set_provider_base_url(&self, provider: &str, base_url: Option<String>) -> Result<()> {
        {
            let mut config = self.config.write();
            config.providers.entry(provider.to_string()).or_default().base_url = base_url;
        }
        self.save()
    }

    pub fn set_default_provider(&self, provider: &str, model: Option<String>) -> Result<()> {
        {
            let mut config = self.config.write();
            config.default_provider = provider.to_string();
            if let Some(model) = model {
                config.default_model = model;
            }
        }
        self.save()
    }

    pub fn set_agent_config(&self, kind: AgentKind, update: AgentSettingsUpdate) -> Result<()> {
        {
            let mut config = self.config.write();
            let settings = config.agents.get_mut(kind);
            if let Some(enabled) = update.enabled {
                settings.enabled = enabled;
            }
            if update.provider.is_some() {
                settings.provider = update.provider;
            }
            if update.model.is_some() {
                settings.model = update.model;
            }
            if update.system_prompt.is_some() {
                settings.system_prompt = update.system_prompt;
            }
        }
        self.save()
    }

    pub fn set_tunnel_config(&self, tunnel: TunnelSettings) -> Result<()> {
        self.config.write().tunnel = tunnel;
        self.save()
    }

    pub fn set_preferences(&self, preferences: Preferences) -> Result<()> {
        self.config.write().preferences = preferences;
        self.save()
    }

    /// Agent settings with the provider resolved to the global default.
    ///
    /// The global default model only applies when the agent ends up on the
    /// global default provider; otherwise the model stays unset and the
    /// provider's catalog decides.
    pub fn agent_config(&self, kind: AgentKind) -> AgentConfig {
        let config = self.config.read();
        let settings = config.agents.get(kind);

        let provider = settings
            .provider
            .clone()
            .unwrap_or_else(|| config.default_provider.clone());

        let model = settings.model.clone().or_else(|| {
            (provider == config.default_provider).then(|| config.default_model.clone())
        });

        AgentConfig {
            enabled: settings.enabled,
            provider,
            model,
            system_prompt: settings.system_prompt.clone(),
        }
    }

    /// Provider the hub should talk to by default.
    ///
    /// The default provider wins if it is enabled and has a key; otherwise the
    /// first enabled provider with a key (or keyless local inference).
    pub fn active_provider(&self) -> Option<String> {
        let (default_id, providers) = {
            let config = self.config.read();
            (config.default_provider.clone(), config.providers.clone())
        };

        let enabled = |id: &str| providers.get(id).map_or(false, |p| p.enabled);

        if enabled(&default_id) && self.api_key(&default_id).is_some() {
            return Some(default_id);
        }

        let extra = providers
            .keys()
            .filter(|id| !PROVIDER_IDS.contains(&id.as_str()))
            .cloned();
        let ordered: Vec<String> = PROVIDER_IDS
            .iter()
            .map(|s| s.to_string())
            .chain(extra)
            .collect();

        ordered
            .into_iter()
            .find(|id| enabled(id) && (id == "ollama" || self.api_key(id).is_some()))
    }
}

fn write_config(path: &Path, config: &HubConfig) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| ConfigError::Io(parent.to_path_buf(), e))?;
    }
    let json = serde_json::to_string_pretty(config)?;
    fs::write(path, json).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = fs::set_permissions(path, fs::Permissions::from_mode(0o600));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn manager() -> ConfigManager {
        ConfigManager::in_memory(HubConfig::default())
    }

    #[test]
    fn test_mask_key() {
        assert_eq!(mask_key("sk-ant-1234567890abcd"), "sk-ant-1••••••••abcd");
        assert_eq!(mask_key("short"), "••••••••");
    }

    #[test]
    fn test_missing_file_writes_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let manager = ConfigManager::load(&path).unwrap();

        assert!(path.exists());
        assert_eq!(manager.get(), HubConfig::default());
    }

    #[test]
    fn test_round_trip_through_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        let manager = ConfigManager::load(&path).unwrap();
        manager
            .set_api_key("openai", Some("sk-openai-abcdefghijkl".into()))
            .unwrap();

        let reloaded = ConfigManager::load(&path).unwrap();
        let settings = reloaded.provider_settings("openai").unwrap();
        assert!(settings.enabled);
        assert_eq!(settings.api_key.as_deref(), Some("sk-openai-abcdefghijkl"));
    }

    #[test]
    fn test_corrupt_file_falls_back_to_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();

        let manager = ConfigManager::load(&path).unwrap();
        assert_eq!(manager.get().default_provider, "anthropic");
    }

    #[test]
    fn test_redacted_masks_keys() {
        let manager = manager();
        manager
            .set_api_key("anthropic", Some("sk-ant-api03-secretsecret".into()))
            .unwrap();

        let redacted = manager.redacted();
        assert_eq!(redacted["providers"]["anthropic"]["hasKey"], true);
        assert_eq!(
            redacted["providers"]["anthropic"]["apiKey"],
            "sk-ant-a••••••••cret"
        );
        assert_eq!(redacted["providers"]["openai"]["hasKey"], false);
        assert_eq!(redacted["tunnel"]["hasToken"], false);
    }

    #[test]
    fn test_agent_config_resolves_defaults() {
        let manager = manager();
        let config = manager.agent_config(AgentKind::Terminal);
        assert_eq!(config.provider, "anthropic");
        assert_eq!(config.model.as_deref(), Some("claude-sonnet-4-20250514"));
        assert!(config.enabled);
    }

    #[test]
    fn test_agent_on_other_provider_gets_no_default_model() {
        let manager = manager();
        manager
            .set_agent_config(
                AgentKind::Ide,
                AgentSettingsUpdate {
                    provider: Some("openai".into()),
                    ..Default::default()
                },
            )
            .unwrap();

        let config = manager.agent_config(AgentKind::Ide);
        assert_eq!(config.provider, "openai");
        assert_eq!(config.model, None);
    }

    #[test]
    fn test_active_provider_prefers_keyed_default() {
        let manager = manager();
        manager
            .set_api_key("anthropic", Some("sk-ant-0123456789".into()))
            .unwrap();
        assert_eq!(manager.active_provider().as_deref(), Some("anthropic"));
    }

    #[test]
    fn test_active_provider_falls_back_to_ollama() {
        let mut config = HubConfig::default();
        config.default_provider = "manus".into();
        let manager = ConfigManager::in_memory(config);
        assert_eq!(manager.active_provider().as_deref(), Some("ollama"));
    }

    #[test]
    fn test_active_provider_none_when_nothing_enabled() {
        let mut config = HubConfig::default();
        config.default_provider = "manus".into();
        config.providers.get_mut("ollama").unwrap().enabled = false;
        let manager = ConfigManager::in_memory(config);
        assert_eq!(manager.active_provider(), None);
    }
}
