use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;

use crate::{IdeKind, UNKNOWN_WORKSPACE, UNTITLED_SESSION};

/// Maximum characters of a first user message used as a derived title
pub const TITLE_MAX_CHARS: usize = 50;

/// Normalized author of a chat message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
    System,
}

impl ChatRole {
    /// Map a vendor role label onto the shared vocabulary.
    ///
    /// Returns `None` for labels outside the vocabulary; callers drop those messages.
    pub fn normalize(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "user" | "human" => Some(Self::User),
            "assistant" | "ai" | "bot" | "model" | "agent" => Some(Self::Assistant),
            "system" => Some(Self::System),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        }
    }
}

/// A single chat message as read from an IDE's store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub role: ChatRole,
    pub content: String,
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub metadata: Value,
}

impl ChatMessage {
    pub fn new(id: impl Into<String>, role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role,
            content: content.into(),
            timestamp: None,
            metadata: Value::Null,
        }
    }

    pub fn with_timestamp(mut self, timestamp: Option<DateTime<Utc>>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Normalized chat session. `messages` is empty for list views.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSession {
    pub id: String,
    pub title: String,
    #[serde(rename = "sourceIDE")]
    pub source_ide: IdeKind,
    pub workspace_path: Option<String>,
    pub workspace_name: String,
    pub date_created: Option<DateTime<Utc>>,
    pub last_activity: Option<DateTime<Utc>>,
    pub message_count: usize,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
}

/// List view of a session, without message bodies
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSessionSummary {
    pub id: String,
    pub title: String,
    #[serde(rename = "sourceIDE")]
    pub source_ide: IdeKind,
    pub workspace_path: Option<String>,
    pub workspace_name: String,
    pub date_created: Option<DateTime<Utc>>,
    pub last_activity: Option<DateTime<Utc>>,
    pub message_count: usize,
}

impl ChatSession {
    pub fn new(id: impl Into<String>, source_ide: IdeKind, workspace_path: Option<String>) -> Self {
        let workspace_name = workspace_name_for(workspace_path.as_deref());
        Self {
            id: id.into(),
            title: UNTITLED_SESSION.to_string(),
            source_ide,
            workspace_path,
            workspace_name,
            date_created: None,
            last_activity: None,
            message_count: 0,
            messages: Vec::new(),
        }
    }

    /// Attach the full message list, updating count and last activity
    pub fn with_messages(mut self, messages: Vec<ChatMessage>) -> Self {
        self.message_count = messages.len();
        if let Some(latest) = messages.iter().filter_map(|m| m.timestamp).max() {
            self.last_activity = Some(latest);
        }
        self.messages = messages;
        self
    }

    /// Set the title, falling back to the first user message, then the default
    pub fn with_title(mut self, title: Option<&str>) -> Self {
        let explicit = title.map(str::trim).filter(|t| !t.is_empty());
        self.title = match explicit {
            Some(t) => t.to_string(),
            None => derive_title(&self.messages),
        };
        self
    }

    pub fn with_date_created(mut self, date: Option<DateTime<Utc>>) -> Self {
        self.date_created = date;
        if self.last_activity.is_none() {
            self.last_activity = date;
        }
        self
    }

    pub fn summary(&self) -> ChatSessionSummary {
        ChatSessionSummary {
            id: self.id.clone(),
            title: self.title.clone(),
            source_ide: self.source_ide,
            workspace_path: self.workspace_path.clone(),
            workspace_name: self.workspace_name.clone(),
            date_created: self.date_created,
            last_activity: self.last_activity,
            message_count: self.message_count,
        }
    }

    /// Ordering used for session lists: newest first, sessions without a
    /// parseable creation date last.
    pub fn newest_first(a: &ChatSession, b: &ChatSession) -> Ordering {
        match (a.date_created, b.date_created) {
            (Some(x), Some(y)) => y.cmp(&x),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        }
    }
}

/// Last path segment of a workspace path, or the unknown placeholder
pub fn workspace_name_for(path: Option<&str>) -> String {
    path.and_then(|p| {
        p.trim_end_matches(['/', '\\'])
            .rsplit(['/', '\\'])
            .next()
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    })
    .unwrap_or_else(|| UNKNOWN_WORKSPACE.to_string())
}

/// Title from the first user message, truncated to `TITLE_MAX_CHARS`
pub fn derive_title(messages: &[ChatMessage]) -> String {
    let first_user = messages
        .iter()
        .find(|m| m.role == ChatRole::User)
        .map(|m| m.content.trim())
        .filter(|c| !c.is_empty());

    match first_user {
        Some(content) => {
            // Titles are single-line
            let line = content.lines().next().unwrap_or(content);
            if line.chars().count() > TITLE_MAX_CHARS {
                let head: String = line.chars().take(TITLE_MAX_CHARS - 3).collect();
                format!("{}...", head)
            } else {
                line.to_string()
            }
        }
        None => UNTITLED_SESSION.to_string(),
    }
}
