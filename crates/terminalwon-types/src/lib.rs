//! Core types shared across the terminalwon crates
//!
//! This crate holds the data model that travels between the hub, the agent
//! pipeline and the chat-history engine: chat sessions and messages, timeline
//! events, insights and the small identifier helpers they rely on.

use chrono::Utc;
use serde::{Deserialize, Serialize};

pub mod chat;
pub mod events;

pub use chat::{ChatMessage, ChatRole, ChatSession, ChatSessionSummary};
pub use events::{Insight, InsightKind, TimelineEvent, TimelineEventType};

// ============================================================================
// Constants
// ============================================================================

/// Version reported to clients in the welcome message
pub const SERVER_VERSION: &str = "2.0.0";

/// Default port for the hub HTTP/WebSocket listener
pub const DEFAULT_PORT: u16 = 3002;

/// Title used when a session carries no usable title or first user message
pub const UNTITLED_SESSION: &str = "Untitled Session";

/// Workspace name used when a session has no workspace path
pub const UNKNOWN_WORKSPACE: &str = "Unknown Workspace";

// ============================================================================
// Identifiers
// ============================================================================

/// Generate an id of the form `<prefix>-<unix millis>-<random suffix>`
pub fn prefixed_id(prefix: &str) -> String {
    let random = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{}-{}", prefix, Utc::now().timestamp_millis(), &random[..9])
}

// ============================================================================
// IDE families
// ============================================================================

/// IDE family whose local chat history is mirrored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdeKind {
    Kiro,
    Cursor,
    Antigravity,
}

impl IdeKind {
    pub const ALL: [IdeKind; 3] = [IdeKind::Kiro, IdeKind::Cursor, IdeKind::Antigravity];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Kiro => "kiro",
            Self::Cursor => "cursor",
            Self::Antigravity => "antigravity",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Kiro => "Kiro",
            Self::Cursor => "Cursor",
            Self::Antigravity => "Antigravity",
        }
    }

    /// Prefix every session id produced by this IDE's reader starts with
    pub fn session_prefix(&self) -> String {
        format!("{}-", self.as_str())
    }

    /// Find the IDE that owns a session id by its prefix
    pub fn from_session_id(session_id: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|ide| session_id.starts_with(&ide.session_prefix()))
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "kiro" => Some(Self::Kiro),
            "cursor" => Some(Self::Cursor),
            "antigravity" => Some(Self::Antigravity),
            _ => None,
        }
    }
}

impl std::fmt::Display for IdeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Agent kinds
// ============================================================================

/// Agent slots that carry their own provider/model configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AgentKind {
    Terminal,
    Ide,
    ComputerUse,
    Chat,
}

impl AgentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Terminal => "terminal",
            Self::Ide => "ide",
            Self::ComputerUse => "computerUse",
            Self::Chat => "chat",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefixed_id_shape() {
        let id = prefixed_id("pty");
        let parts: Vec<&str> = id.splitn(3, '-').collect();
        assert_eq!(parts[0], "pty");
        assert!(parts[1].parse::<i64>().is_ok());
        assert_eq!(parts[2].len(), 9);
    }

    #[test]
    fn test_prefixed_ids_are_unique() {
        assert_ne!(prefixed_id("client"), prefixed_id("client"));
    }

    #[test]
    fn test_ide_from_session_id() {
        assert_eq!(IdeKind::from_session_id("kiro-abc"), Some(IdeKind::Kiro));
        assert_eq!(IdeKind::from_session_id("cursor-123-0"), Some(IdeKind::Cursor));
        assert_eq!(
            IdeKind::from_session_id("antigravity-x"),
            Some(IdeKind::Antigravity)
        );
        assert_eq!(IdeKind::from_session_id("vscode-1"), None);
    }

    #[test]
    fn test_ide_kind_serializes_lowercase() {
        let json = serde_json::to_string(&IdeKind::Antigravity).unwrap();
        assert_eq!(json, "\"antigravity\"");
    }

    #[test]
    fn test_agent_kind_camel_case() {
        let json = serde_json::to_string(&AgentKind::ComputerUse).unwrap();
        assert_eq!(json, "\"computerUse\"");
    }
}
