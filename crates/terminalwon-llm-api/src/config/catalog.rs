use serde::Serialize;

use super::{
    ProviderKind, ANTHROPIC_API_URL, GOOGLE_API_URL, MANUS_API_URL, OLLAMA_API_URL,
    OPENAI_API_URL, XAI_API_URL,
};

/// A model offered by a provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ModelInfo {
    pub id: &'static str,
    pub name: &'static str,
}

/// Static facts about a provider: display name, default URL and models
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderDescriptor {
    pub kind: ProviderKind,
    pub name: &'static str,
    pub base_url: &'static str,
    pub requires_key: bool,
    pub models: &'static [ModelInfo],
}

impl ProviderDescriptor {
    pub fn first_model(&self) -> &'static str {
        self.models.first().map(|m| m.id).unwrap_or_default()
    }

    pub fn has_model(&self, model: &str) -> bool {
        self.models.iter().any(|m| m.id == model)
    }
}

const fn model(id: &'static str, name: &'static str) -> ModelInfo {
    ModelInfo { id, name }
}

pub static CATALOG: [ProviderDescriptor; 6] = [
    ProviderDescriptor {
        kind: ProviderKind::Anthropic,
        name: "Anthropic",
        base_url: ANTHROPIC_API_URL,
        requires_key: true,
        models: &[
            model("claude-opus-4-20250514", "Claude Opus 4"),
            model("claude-sonnet-4-20250514", "Claude Sonnet 4"),
            model("claude-3-5-haiku-20241022", "Claude 3.5 Haiku"),
        ],
    },
    ProviderDescriptor {
        kind: ProviderKind::OpenAI,
        name: "OpenAI",
        base_url: OPENAI_API_URL,
        requires_key: true,
        models: &[
            model("gpt-4o", "GPT-4o"),
            model("gpt-4-turbo", "GPT-4 Turbo"),
            model("gpt-4o-mini", "GPT-4o Mini"),
            model("o1-preview", "o1 Preview"),
            model("o1-mini", "o1 Mini"),
        ],
    },
    ProviderDescriptor {
        kind: ProviderKind::XAi,
        name: "xAI",
        base_url: XAI_API_URL,
        requires_key: true,
        models: &[model("grok-2", "Grok 2"), model("grok-beta", "Grok Beta")],
    },
    ProviderDescriptor {
        kind: ProviderKind::Google,
        name: "Google",
        base_url: GOOGLE_API_URL,
        requires_key: true,
        models: &[
            model("gemini-2.0-flash", "Gemini 2.0 Flash"),
            model("gemini-1.5-pro", "Gemini 1.5 Pro"),
            model("gemini-1.5-flash", "Gemini 1.5 Flash"),
        ],
    },
    ProviderDescriptor {
        kind: ProviderKind::Manus,
        name: "Manus",
        base_url: MANUS_API_URL,
        requires_key: true,
        models: &[model("manus-1", "Manus 1")],
    },
    ProviderDescriptor {
        kind: ProviderKind::Ollama,
        name: "Ollama (Local)",
        base_url: OLLAMA_API_URL,
        requires_key: false,
        models: &[
            model("llama3.2", "Llama 3.2"),
            model("mistral", "Mistral"),
            model("codellama", "Code Llama"),
            model("deepseek-coder", "DeepSeek Coder"),
            model("qwen2.5-coder", "Qwen 2.5 Coder"),
        ],
    },
];

pub fn descriptor(kind: ProviderKind) -> &'static ProviderDescriptor {
    // CATALOG lists every kind in `ProviderKind::ALL` order
    &CATALOG[ProviderKind::ALL.iter().position(|k| *k == kind).unwrap_or(0)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_covers_every_kind() {
        for kind in ProviderKind::ALL {
            assert_eq!(descriptor(kind).kind, kind);
            assert!(!descriptor(kind).models.is_empty());
        }
    }

    #[test]
    fn test_only_ollama_is_keyless() {
        let keyless: Vec<ProviderKind> = CATALOG
            .iter()
            .filter(|d| !d.requires_key)
            .map(|d| d.kind)
            .collect();
        assert_eq!(keyless, vec![ProviderKind::Ollama]);
    }

    #[test]
    fn test_first_model() {
        assert_eq!(
            descriptor(ProviderKind::Anthropic).first_model(),
            "claude-opus-4-20250514"
        );
        assert!(descriptor(ProviderKind::Google).has_model("gemini-1.5-pro"));
    }
}
