use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use terminalwon_types::AgentKind;

use crate::config::ProviderKind;
use crate::ProviderError;

pub mod anthropic;
pub mod google;
pub mod ollama;
pub mod openai;

/// Default completion budget when the caller does not set one
pub const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Chat message in the canonical (OpenAI-like) shape
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }
}

/// Per-call options. Unset fields fall back to agent config, then global defaults.
#[derive(Debug, Clone, Default)]
pub struct ChatOptions {
    pub system_prompt: Option<String>,
    pub provider: Option<ProviderKind>,
    pub model: Option<String>,
    pub max_tokens: Option<u32>,
    /// Agent slot whose configured provider/model apply
    pub agent: Option<AgentKind>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatResponse {
    pub content: String,
    pub provider: ProviderKind,
    pub model: String,
}

/// Unified chat interface the agents depend on
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn chat(
        &self,
        messages: Vec<ChatMessage>,
        options: ChatOptions,
    ) -> Result<ChatResponse, ProviderError>;
}

/// Vendor-neutral request handed to a [`Provider`] for formatting
#[derive(Debug, Clone)]
pub struct ProviderRequest {
    pub model: String,
    pub system: Option<String>,
    /// Conversation turns without system messages
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
}

/// Per-vendor wire adapter: endpoint, headers, request body and response parsing
pub trait Provider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    fn endpoint(&self, base_url: &str, model: &str, api_key: Option<&str>) -> String;

    fn headers(&self, api_key: Option<&str>) -> Vec<(&'static str, String)>;

    fn format_request(&self, request: &ProviderRequest) -> Value;

    /// Extract the completion text. `None` if the body has no usable content.
    fn parse_response(&self, body: &Value) -> Option<String>;

    /// Keyless endpoint used by `test_connection` instead of a chat call
    fn health_endpoint(&self, _base_url: &str) -> Option<String> {
        None
    }
}

static ANTHROPIC: anthropic::AnthropicProvider = anthropic::AnthropicProvider;
static OPENAI: openai::OpenAiCompatibleProvider = openai::OpenAiCompatibleProvider::new(ProviderKind::OpenAI);
static XAI: openai::OpenAiCompatibleProvider = openai::OpenAiCompatibleProvider::new(ProviderKind::XAi);
static MANUS: openai::OpenAiCompatibleProvider = openai::OpenAiCompatibleProvider::new(ProviderKind::Manus);
static GOOGLE: google::GoogleProvider = google::GoogleProvider;
static OLLAMA: ollama::OllamaProvider = ollama::OllamaProvider;

/// The wire adapter for a provider
pub fn adapter(kind: ProviderKind) -> &'static dyn Provider {
    match kind {
        ProviderKind::Anthropic => &ANTHROPIC,
        ProviderKind::OpenAI => &OPENAI,
        ProviderKind::XAi => &XAI,
        ProviderKind::Manus => &MANUS,
        ProviderKind::Google => &GOOGLE,
        ProviderKind::Ollama => &OLLAMA,
    }
}

/// Split system messages out of a conversation, joining them with blank lines
pub fn split_system(messages: Vec<ChatMessage>, system: Option<String>) -> (Option<String>, Vec<ChatMessage>) {
    let mut system_parts: Vec<String> = system.into_iter().filter(|s| !s.is_empty()).collect();
    let mut turns = Vec::with_capacity(messages.len());

    for message in messages {
        if message.role == "system" {
            system_parts.push(message.content);
        } else {
            turns.push(message);
        }
    }

    let system = if system_parts.is_empty() {
        None
    } else {
        Some(system_parts.join("\n\n"))
    };
    (system, turns)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_system_joins_messages() {
        let (system, turns) = split_system(
            vec![
                ChatMessage::system("be brief"),
                ChatMessage::user("hi"),
                ChatMessage::assistant("hello"),
            ],
            Some("you are a terminal expert".into()),
        );
        assert_eq!(system.as_deref(), Some("you are a terminal expert\n\nbe brief"));
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].role, "user");
    }

    #[test]
    fn test_split_system_none_when_absent() {
        let (system, turns) = split_system(vec![ChatMessage::user("hi")], None);
        assert!(system.is_none());
        assert_eq!(turns.len(), 1);
    }

    #[test]
    fn test_adapter_kinds_match() {
        for kind in ProviderKind::ALL {
            assert_eq!(adapter(kind).kind(), kind);
        }
    }
}
