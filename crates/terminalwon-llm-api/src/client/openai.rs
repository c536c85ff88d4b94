use serde_json::{json, Value};

use crate::client::{ChatMessage, Provider, ProviderRequest};
use crate::config::ProviderKind;

/// OpenAI chat completions, also spoken by xAI and Manus
pub struct OpenAiCompatibleProvider {
    kind: ProviderKind,
}

impl OpenAiCompatibleProvider {
    pub const fn new(kind: ProviderKind) -> Self {
        Self { kind }
    }
}

impl Provider for OpenAiCompatibleProvider {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    fn endpoint(&self, base_url: &str, _model: &str, _api_key: Option<&str>) -> String {
        format!("{}/chat/completions", base_url.trim_end_matches('/'))
    }

    fn headers(&self, api_key: Option<&str>) -> Vec<(&'static str, String)> {
        api_key
            .map(|key| vec![("Authorization", format!("Bearer {}", key))])
            .unwrap_or_default()
    }

    fn format_request(&self, request: &ProviderRequest) -> Value {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        if let Some(system) = &request.system {
            messages.push(ChatMessage::system(system.clone()));
        }
        messages.extend(request.messages.iter().cloned());

        json!({
            "model": request.model,
            "max_tokens": request.max_tokens,
            "messages": messages,
        })
    }

    fn parse_response(&self, body: &Value) -> Option<String> {
        body["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_becomes_first_message() {
        let provider = OpenAiCompatibleProvider::new(ProviderKind::XAi);
        let body = provider.format_request(&ProviderRequest {
            model: "grok-2".into(),
            system: Some("sys".into()),
            messages: vec![ChatMessage::user("hi")],
            max_tokens: 10,
        });
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "hi");
    }

    #[test]
    fn test_endpoint_and_auth() {
        let provider = OpenAiCompatibleProvider::new(ProviderKind::OpenAI);
        assert_eq!(
            provider.endpoint("https://api.openai.com/v1/", "gpt-4o", None),
            "https://api.openai.com/v1/chat/completions"
        );
        assert_eq!(
            provider.headers(Some("sk-1")),
            vec![("Authorization", "Bearer sk-1".to_string())]
        );
    }
}
