use serde_json::{json, Value};

use crate::client::{ChatMessage, Provider, ProviderRequest};
use crate::config::ProviderKind;

/// Local Ollama server, no key
pub struct OllamaProvider;

impl Provider for OllamaProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Ollama
    }

    fn endpoint(&self, base_url: &str, _model: &str, _api_key: Option<&str>) -> String {
        format!("{}/api/chat", base_url.trim_end_matches('/'))
    }

    fn headers(&self, _api_key: Option<&str>) -> Vec<(&'static str, String)> {
        Vec::new()
    }

    fn format_request(&self, request: &ProviderRequest) -> Value {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        if let Some(system) = &request.system {
            messages.push(ChatMessage::system(system.clone()));
        }
        messages.extend(request.messages.iter().cloned());

        json!({
            "model": request.model,
            "messages": messages,
            "stream": false,
            "options": {"num_predict": request.max_tokens},
        })
    }

    fn parse_response(&self, body: &Value) -> Option<String> {
        body["message"]["content"].as_str().map(str::to_string)
    }

    fn health_endpoint(&self, base_url: &str) -> Option<String> {
        Some(format!("{}/api/tags", base_url.trim_end_matches('/')))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_disables_streaming() {
        let body = OllamaProvider.format_request(&ProviderRequest {
            model: "llama3.2".into(),
            system: None,
            messages: vec![ChatMessage::user("hi")],
            max_tokens: 32,
        });
        assert_eq!(body["stream"], false);
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_parse_message_content() {
        let body = json!({"message": {"role": "assistant", "content": "ok"}});
        assert_eq!(OllamaProvider.parse_response(&body).as_deref(), Some("ok"));
    }
}
