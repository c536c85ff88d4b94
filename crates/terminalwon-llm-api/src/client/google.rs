use serde_json::{json, Value};

use crate::client::{Provider, ProviderRequest};
use crate::config::ProviderKind;

/// Google Generative Language API (Gemini)
pub struct GoogleProvider;

impl Provider for GoogleProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Google
    }

    fn endpoint(&self, base_url: &str, model: &str, api_key: Option<&str>) -> String {
        format!(
            "{}/models/{}:generateContent?key={}",
            base_url.trim_end_matches('/'),
            model,
            api_key.unwrap_or_default()
        )
    }

    fn headers(&self, _api_key: Option<&str>) -> Vec<(&'static str, String)> {
        // The key travels in the query string
        Vec::new()
    }

    fn format_request(&self, request: &ProviderRequest) -> Value {
        let contents: Vec<Value> = request
            .messages
            .iter()
            .map(|m| {
                let role = if m.role == "assistant" { "model" } else { "user" };
                json!({"role": role, "parts": [{"text": m.content}]})
            })
            .collect();

        let mut body = json!({
            "contents": contents,
            "generationConfig": {"maxOutputTokens": request.max_tokens},
        });
        if let Some(system) = &request.system {
            body["systemInstruction"] = json!({"parts": [{"text": system}]});
        }
        body
    }

    fn parse_response(&self, body: &Value) -> Option<String> {
        body["candidates"][0]["content"]["parts"][0]["text"]
            .as_str()
            .map(str::to_string)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ChatMessage;

    #[test]
    fn test_roles_map_to_user_and_model() {
        let body = GoogleProvider.format_request(&ProviderRequest {
            model: "gemini-2.0-flash".into(),
            system: Some("sys".into()),
            messages: vec![ChatMessage::user("q"), ChatMessage::assistant("a")],
            max_tokens: 64,
        });
        assert_eq!(body["contents"][0]["role"], "user");
        assert_eq!(body["contents"][1]["role"], "model");
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "sys");
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 64);
    }

    #[test]
    fn test_key_in_query() {
        assert_eq!(
            GoogleProvider.endpoint(
                "https://generativelanguage.googleapis.com/v1beta",
                "gemini-1.5-pro",
                Some("k")
            ),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-1.5-pro:generateContent?key=k"
        );
    }
}
