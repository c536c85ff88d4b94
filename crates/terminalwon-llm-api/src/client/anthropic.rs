use serde_json::{json, Value};

use crate::client::{Provider, ProviderRequest};
use crate::config::ProviderKind;

/// Anthropic Messages API
pub struct AnthropicProvider;

pub const ANTHROPIC_VERSION: &str = "2023-06-01";

impl Provider for AnthropicProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Anthropic
    }

    fn endpoint(&self, base_url: &str, _model: &str, _api_key: Option<&str>) -> String {
        format!("{}/v1/messages", base_url.trim_end_matches('/'))
    }

    fn headers(&self, api_key: Option<&str>) -> Vec<(&'static str, String)> {
        let mut headers = vec![("anthropic-version", ANTHROPIC_VERSION.to_string())];
        if let Some(key) = api_key {
            headers.push(("x-api-key", key.to_string()));
        }
        headers
    }

    fn format_request(&self, request: &ProviderRequest) -> Value {
        let mut body = json!({
            "model": request.model,
            "max_tokens": request.max_tokens,
            "messages": request.messages,
        });
        if let Some(system) = &request.system {
            body["system"] = Value::String(system.clone());
        }
        body
    }

    fn parse_response(&self, body: &Value) -> Option<String> {
        body["content"][0]["text"].as_str().map(str::to_string)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ChatMessage;

    #[test]
    fn test_system_is_top_level() {
        let body = AnthropicProvider.format_request(&ProviderRequest {
            model: "claude-sonnet-4-20250514".into(),
            system: Some("sys".into()),
            messages: vec![ChatMessage::user("hi")],
            max_tokens: 100,
        });
        assert_eq!(body["system"], "sys");
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["max_tokens"], 100);
    }

    #[test]
    fn test_parse_text_block() {
        let body = json!({"content": [{"type": "text", "text": "hello"}]});
        assert_eq!(AnthropicProvider.parse_response(&body).as_deref(), Some("hello"));
        assert_eq!(AnthropicProvider.parse_response(&json!({})), None);
    }
}
