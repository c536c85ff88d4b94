use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use terminalwon_config::ConfigManager;
use terminalwon_logging::{log_exchange_to_file, ExchangeLog};

use crate::client::{
    adapter, split_system, ChatMessage, ChatOptions, ChatResponse, LlmClient, ProviderRequest,
    DEFAULT_MAX_TOKENS,
};
use crate::config::{descriptor, ModelInfo, ProviderKind, CATALOG};
use crate::ProviderError;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Entry in the provider list shown to clients
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderStatus {
    pub id: ProviderKind,
    pub name: &'static str,
    pub models: &'static [ModelInfo],
    pub enabled: bool,
    pub has_key: bool,
}

/// Result of validating a candidate key
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConnectionTest {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub models: Option<Vec<String>>,
}

/// Single entry point for AI calls across vendors
pub struct AIProviderManager {
    client: reqwest::Client,
    config: Arc<ConfigManager>,
    log_requests: bool,
}

impl AIProviderManager {
    pub fn new(config: Arc<ConfigManager>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            config,
            log_requests: false,
        }
    }

    /// Write each request/response pair under `~/.terminalwon/logs`
    pub fn with_request_logging(mut self, enabled: bool) -> Self {
        self.log_requests = enabled;
        self
    }

    pub fn config(&self) -> &Arc<ConfigManager> {
        &self.config
    }

    /// Resolve provider and model: explicit option, then the agent's
    /// configuration, then the global default, then the provider's first model.
    pub fn resolve(&self, options: &ChatOptions) -> Result<(ProviderKind, String), ProviderError> {
        let config = self.config.get();
        let agent = options.agent.map(|kind| self.config.agent_config(kind));

        let provider = match options.provider {
            Some(kind) => kind,
            None => {
                let id = agent
                    .as_ref()
                    .map(|a| a.provider.clone())
                    .unwrap_or_else(|| config.default_provider.clone());
                ProviderKind::from_str(&id).ok_or(ProviderError::UnknownProvider(id))?
            }
        };

        let agent_model = agent
            .filter(|a| ProviderKind::from_str(&a.provider) == Some(provider))
            .and_then(|a| a.model);
        let default_model = (ProviderKind::from_str(&config.default_provider) == Some(provider))
            .then(|| config.default_model.clone());

        let model = options
            .model
            .clone()
            .or(agent_model)
            .or(default_model)
            .unwrap_or_else(|| descriptor(provider).first_model().to_string());

        Ok((provider, model))
    }

    fn base_url(&self, provider: ProviderKind) -> String {
        self.config
            .provider_settings(provider.as_str())
            .and_then(|s| s.base_url)
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| descriptor(provider).base_url.to_string())
    }

    /// Enabled/key status of every known provider
    pub fn providers(&self) -> Vec<ProviderStatus> {
        CATALOG
            .iter()
            .map(|d| {
                let settings = self.config.provider_settings(d.kind.as_str());
                ProviderStatus {
                    id: d.kind,
                    name: d.name,
                    models: d.models,
                    enabled: settings.map_or(false, |s| s.enabled),
                    has_key: self.config.api_key(d.kind.as_str()).is_some(),
                }
            })
            .collect()
    }

    /// Validate a candidate key with one minimal request. Nothing is persisted.
    pub async fn test_connection(&self, provider: ProviderKind, api_key: Option<String>) -> ConnectionTest {
        let descriptor = descriptor(provider);
        let adapter = adapter(provider);
        let base_url = self.base_url(provider);

        if let Some(url) = adapter.health_endpoint(&base_url) {
            return match self.client.get(&url).send().await {
                Ok(response) if response.status().is_success() => {
                    let body: Value = response.json().await.unwrap_or(Value::Null);
                    let models = body["models"]
                        .as_array()
                        .map(|models| {
                            models
                                .iter()
                                .filter_map(|m| m["name"].as_str().map(str::to_string))
                                .collect()
                        })
                        .unwrap_or_default();
                    ConnectionTest {
                        success: true,
                        error: None,
                        models: Some(models),
                    }
                }
                Ok(response) => ConnectionTest {
                    success: false,
                    error: Some(format!("{} responded with {}", descriptor.name, response.status())),
                    models: None,
                },
                Err(e) => ConnectionTest {
                    success: false,
                    error: Some(format!("{} not reachable: {}", descriptor.name, e)),
                    models: None,
                },
            };
        }

        let api_key = api_key.filter(|k| !k.is_empty());
        if descriptor.requires_key && api_key.is_none() {
            return ConnectionTest {
                success: false,
                error: Some(ProviderError::MissingApiKey(descriptor.name.to_string()).to_string()),
                models: None,
            };
        }

        let request = ProviderRequest {
            model: descriptor.first_model().to_string(),
            system: None,
            messages: vec![ChatMessage::user("Hi")],
            max_tokens: 10,
        };

        match self.send(provider, &base_url, api_key.as_deref(), &request).await {
            Ok(_) => ConnectionTest {
                success: true,
                error: None,
                models: None,
            },
            Err(e) => ConnectionTest {
                success: false,
                error: Some(e.to_string()),
                models: None,
            },
        }
    }

    async fn send(
        &self,
        provider: ProviderKind,
        base_url: &str,
        api_key: Option<&str>,
        request: &ProviderRequest,
    ) -> Result<String, ProviderError> {
        let adapter = adapter(provider);
        let url = adapter.endpoint(base_url, &request.model, api_key);
        let body = adapter.format_request(request);

        let mut builder = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&body);
        for (name, value) in adapter.headers(api_key) {
            builder = builder.header(name, value);
        }

        debug!("{} request to model {}", provider, request.model);

        let response = builder.send().await.map_err(|source| ProviderError::Http {
            provider: provider.to_string(),
            source,
        })?;

        let status = response.status();
        let text = response.text().await.map_err(|source| ProviderError::Http {
            provider: provider.to_string(),
            source,
        })?;
        let parsed: Option<Value> = serde_json::from_str(&text).ok();

        if self.log_requests {
            // Keys can travel in the query string
            let logged_url = url.split('?').next().unwrap_or_default();
            let error = (!status.is_success()).then_some(text.as_str());
            let exchange = ExchangeLog {
                provider: provider.as_str(),
                model: &request.model,
                url: logged_url,
                request: &body,
                status: Some(status.as_u16()),
                response: parsed.as_ref(),
                error,
            };
            if let Err(e) = log_exchange_to_file(&exchange) {
                debug!("Failed to log AI exchange: {}", e);
            }
        }

        if !status.is_success() {
            let message = parsed
                .as_ref()
                .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
                .unwrap_or_else(|| {
                    if text.is_empty() {
                        status.to_string()
                    } else {
                        text.clone()
                    }
                });
            return Err(ProviderError::Api {
                provider: provider.to_string(),
                status: status.as_u16(),
                message,
            });
        }

        parsed
            .as_ref()
            .and_then(|v| adapter.parse_response(v))
            .ok_or_else(|| ProviderError::EmptyResponse {
                provider: provider.to_string(),
            })
    }
}

#[async_trait]
impl LlmClient for AIProviderManager {
    async fn chat(
        &self,
        messages: Vec<ChatMessage>,
        options: ChatOptions,
    ) -> Result<ChatResponse, ProviderError> {
        let (provider, model) = self.resolve(&options)?;
        let descriptor = descriptor(provider);

        let api_key = self.config.api_key(provider.as_str());
        if descriptor.requires_key && api_key.is_none() {
            return Err(ProviderError::MissingApiKey(descriptor.name.to_string()));
        }

        let (system, messages) = split_system(messages, options.system_prompt);
        let request = ProviderRequest {
            model: model.clone(),
            system,
            messages,
            max_tokens: options.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        };

        let base_url = self.base_url(provider);
        let content = self
            .send(provider, &base_url, api_key.as_deref(), &request)
            .await
            .map_err(|e| {
                warn!("{} chat failed: {}", provider, e);
                e
            })?;

        Ok(ChatResponse {
            content,
            provider,
            model,
        })
    }
}
