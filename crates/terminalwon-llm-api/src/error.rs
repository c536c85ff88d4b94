/// Failures of an AI provider call
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("Unknown provider: {0}")]
    UnknownProvider(String),
    #[error("No API key configured for {0}")]
    MissingApiKey(String),
    #[error("{provider} request failed: {source}")]
    Http {
        provider: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{provider} API error ({status}): {message}")]
    Api {
        provider: String,
        status: u16,
        message: String,
    },
    #[error("{provider} returned no content")]
    EmptyResponse { provider: String },
}
