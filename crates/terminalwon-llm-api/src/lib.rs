//! # terminalwon-llm-api
//!
//! One `chat()` call in front of several AI vendors:
//! - Anthropic (Claude)
//! - OpenAI, xAI and Manus (OpenAI-compatible)
//! - Google (Gemini)
//! - Ollama (local, keyless)
//!
//! Each vendor is a [`client::Provider`] adapter that knows its endpoint,
//! headers, request body and response shape, paired with a static
//! [`config::ProviderDescriptor`] listing its models. [`AIProviderManager`]
//! resolves which provider and model to use from the call options and the
//! hub configuration.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use terminalwon_config::{ConfigManager, HubConfig};
//! use terminalwon_llm_api::{AIProviderManager, ChatMessage, ChatOptions, LlmClient};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Arc::new(ConfigManager::in_memory(HubConfig::default()));
//!     let manager = AIProviderManager::new(config);
//!
//!     let response = manager
//!         .chat(vec![ChatMessage::user("Hello!")], ChatOptions::default())
//!         .await?;
//!     println!("{} ({}): {}", response.provider, response.model, response.content);
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod config;
mod error;
mod manager;

pub use client::{ChatMessage, ChatOptions, ChatResponse, LlmClient, Provider, ProviderRequest};
pub use config::{descriptor, ModelInfo, ProviderDescriptor, ProviderKind, CATALOG};
pub use error::ProviderError;
pub use manager::{AIProviderManager, ConnectionTest, ProviderStatus};
