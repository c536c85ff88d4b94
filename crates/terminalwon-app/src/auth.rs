use serde::Serialize;
use tracing::warn;

use crate::web::protocol::AuthPayload;

pub const AUTH_MODE_ENV: &str = "AUTH_MODE";
pub const AUTH_TOKEN_ENV: &str = "TERMINALWON_AUTH_TOKEN";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    /// Every client is trusted
    Local,
    /// Clients must present the shared token
    Token,
}

/// Who a successful `auth` message identified
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub client_id: String,
    pub mode: AuthMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
}

/// Boolean gate in front of the hub protocol
#[derive(Debug, Clone)]
pub struct AuthManager {
    mode: AuthMode,
    token: Option<String>,
}

impl AuthManager {
    pub fn new(mode: AuthMode, token: Option<String>) -> Self {
        if mode == AuthMode::Token && token.as_deref().map_or(true, str::is_empty) {
            warn!("{} is not set, every client will be rejected", AUTH_TOKEN_ENV);
        }
        Self { mode, token }
    }

    pub fn local() -> Self {
        Self::new(AuthMode::Local, None)
    }

    /// `AUTH_MODE` unset or `local` trusts everyone; any other value
    /// requires `TERMINALWON_AUTH_TOKEN`
    pub fn from_env() -> Self {
        let mode = match std::env::var(AUTH_MODE_ENV) {
            Ok(mode) if !mode.is_empty() && !mode.eq_ignore_ascii_case("local") => AuthMode::Token,
            _ => AuthMode::Local,
        };
        Self::new(mode, std::env::var(AUTH_TOKEN_ENV).ok())
    }

    pub fn mode(&self) -> AuthMode {
        self.mode
    }

    /// Clients are trusted without an `auth` message
    pub fn is_open(&self) -> bool {
        self.mode == AuthMode::Local
    }

    pub fn authenticate(&self, client_id: &str, payload: &AuthPayload) -> Option<Identity> {
        let accepted = match self.mode {
            AuthMode::Local => true,
            AuthMode::Token => {
                let presented = payload.token.as_deref().or(payload.api_key.as_deref());
                match (self.token.as_deref(), presented) {
                    (Some(expected), Some(given)) if !expected.is_empty() => {
                        constant_time_eq(expected.as_bytes(), given.as_bytes())
                    }
                    _ => false,
                }
            }
        };

        accepted.then(|| Identity {
            client_id: client_id.to_string(),
            mode: self.mode,
            tool: payload.tool.clone(),
        })
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_token(token: &str) -> AuthPayload {
        AuthPayload {
            token: Some(token.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_local_mode_accepts_anything() {
        let auth = AuthManager::local();
        let identity = auth.authenticate("client-1", &AuthPayload::default()).unwrap();
        assert_eq!(identity.mode, AuthMode::Local);
        assert!(auth.is_open());
    }

    #[test]
    fn test_token_mode_compares_shared_token() {
        let auth = AuthManager::new(AuthMode::Token, Some("s3cret".into()));
        assert!(!auth.is_open());
        assert!(auth.authenticate("c", &with_token("s3cret")).is_some());
        assert!(auth.authenticate("c", &with_token("s3cre")).is_none());
        assert!(auth.authenticate("c", &AuthPayload::default()).is_none());
    }

    #[test]
    fn test_token_mode_without_token_rejects() {
        let auth = AuthManager::new(AuthMode::Token, None);
        assert!(auth.authenticate("c", &with_token("")).is_none());
    }
}
