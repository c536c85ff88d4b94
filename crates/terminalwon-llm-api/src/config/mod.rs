use serde::{Deserialize, Serialize};

pub mod catalog;
pub use catalog::{descriptor, ModelInfo, ProviderDescriptor, CATALOG};

/// AI vendors the hub can talk to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Anthropic,
    #[serde(rename = "openai")]
    OpenAI,
    #[serde(rename = "xai")]
    XAi,
    Google,
    Manus,
    Ollama,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 6] = [
        Self::Anthropic,
        Self::OpenAI,
        Self::XAi,
        Self::Google,
        Self::Manus,
        Self::Ollama,
    ];

    /// Parse provider id from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "anthropic" | "claude" => Some(Self::Anthropic),
            "openai" => Some(Self::OpenAI),
            "xai" | "grok" => Some(Self::XAi),
            "google" | "gemini" => Some(Self::Google),
            "manus" => Some(Self::Manus),
            "ollama" => Some(Self::Ollama),
            _ => None,
        }
    }

    /// Get string representation (the config/wire id)
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Anthropic => "anthropic",
            Self::OpenAI => "openai",
            Self::XAi => "xai",
            Self::Google => "google",
            Self::Manus => "manus",
            Self::Ollama => "ollama",
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Default Anthropic API URL
pub const ANTHROPIC_API_URL: &str = "https://api.anthropic.com";

/// Default OpenAI API URL
pub const OPENAI_API_URL: &str = "https://api.openai.com/v1";

/// Default xAI API URL
pub const XAI_API_URL: &str = "https://api.x.ai/v1";

/// Default Google Generative Language API URL
pub const GOOGLE_API_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Default Manus API URL
pub const MANUS_API_URL: &str = "https://api.manus.ai/v1";

/// Default local Ollama URL
pub const OLLAMA_API_URL: &str = "http://localhost:11434";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_aliases() {
        assert_eq!(ProviderKind::from_str("Claude"), Some(ProviderKind::Anthropic));
        assert_eq!(ProviderKind::from_str("gemini"), Some(ProviderKind::Google));
        assert_eq!(ProviderKind::from_str("grok"), Some(ProviderKind::XAi));
        assert_eq!(ProviderKind::from_str("groq"), None);
    }

    #[test]
    fn test_as_str_round_trips() {
        for kind in ProviderKind::ALL {
            assert_eq!(ProviderKind::from_str(kind.as_str()), Some(kind));
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
        }
    }
}
