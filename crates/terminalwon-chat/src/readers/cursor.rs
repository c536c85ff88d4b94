use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use terminalwon_types::{ChatSession, IdeKind};

use crate::error::ReaderError;
use crate::normalize::{
    appdata_dir, first_date, first_field, first_string, parse_messages, MessageFormat,
    NumericDates,
};
use crate::reader::{recursive_pattern, ChatReader, FileChange};
use crate::readers::vscdb::{workspace_dbs, workspace_for_db, WorkspaceDb, STATE_DB};

pub const PROMPTS_KEY: &str = "aiService.prompts";
pub const CHAT_DATA_KEY: &str = "workbench.panel.aichat.view.aichat.chatdata";

const FORMAT: MessageFormat = MessageFormat {
    role_fields: &["role", "type", "sender"],
    assistant_aliases: &["cursor"],
    numeric_dates: NumericDates::SecondsOrMillis,
};

const MESSAGE_FIELDS: &[&str] = &["messages", "history", "conversation", "bubbles", "turns"];

/// Reads Cursor's per-workspace `state.vscdb` stores
pub struct CursorReader {
    root: PathBuf,
}

impl CursorReader {
    pub fn new() -> Self {
        Self::with_root(
            appdata_dir()
                .join("Cursor")
                .join("User")
                .join("workspaceStorage"),
        )
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn sessions_in(&self, db: &WorkspaceDb) -> Result<Vec<ChatSession>, ReaderError> {
        let values = db.read_keys(&[PROMPTS_KEY, CHAT_DATA_KEY])?;
        let mut sessions = Vec::new();

        if let Some(raw) = values.first().and_then(Option::as_deref) {
            match serde_json::from_str::<Value>(raw) {
                Ok(data) => sessions.extend(prompt_sessions(&data, db)),
                Err(e) => debug!("Bad {} in {}: {}", PROMPTS_KEY, db.db_path.display(), e),
            }
        }
        if let Some(raw) = values.get(1).and_then(Option::as_deref) {
            match serde_json::from_str::<Value>(raw) {
                Ok(data) => sessions.extend(panel_sessions(&data, db)),
                Err(e) => debug!("Bad {} in {}: {}", CHAT_DATA_KEY, db.db_path.display(), e),
            }
        }
        Ok(sessions)
    }

    /// Sessions of one workspace, logging and swallowing store failures
    fn scan_workspace(&self, db: &WorkspaceDb) -> Vec<ChatSession> {
        self.sessions_in(db).unwrap_or_else(|e| {
            warn!("Cursor: {}", e);
            Vec::new()
        })
    }
}

impl Default for CursorReader {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatReader for CursorReader {
    fn ide(&self) -> IdeKind {
        IdeKind::Cursor
    }

    fn storage_root(&self) -> &Path {
        &self.root
    }

    fn scan_sessions(&self) -> Vec<ChatSession> {
        workspace_dbs(&self.root)
            .iter()
            .flat_map(|db| self.scan_workspace(db))
            .collect()
    }

    fn read_session(&self, session_id: &str) -> Option<ChatSession> {
        let wanted = format!("{}{}", IdeKind::Cursor.session_prefix(), self.raw_session_id(session_id));
        workspace_dbs(&self.root)
            .iter()
            .find_map(|db| {
                self.scan_workspace(db)
                    .into_iter()
                    .find(|session| session.id == wanted)
            })
    }

    fn watch_patterns(&self) -> Vec<String> {
        if !self.storage_exists() {
            return Vec::new();
        }
        vec![recursive_pattern(&self.root, STATE_DB)]
    }

    fn on_file_change(&self, path: &Path) -> FileChange {
        match workspace_for_db(&self.root, path) {
            Some(db) => FileChange::Sessions(self.scan_workspace(&db)),
            None => FileChange::None,
        }
    }
}

/// `aiService.prompts`: an array of conversations, or an object holding
/// `conversations`/`chats`, or a single conversation
fn prompt_sessions(data: &Value, db: &WorkspaceDb) -> Vec<ChatSession> {
    let conversations: Vec<&Value> = match data {
        Value::Array(items) => items.iter().collect(),
        Value::Object(_) => match first_field(data, &["conversations", "chats"]) {
            Some(Value::Array(items)) => items.iter().collect(),
            _ => vec![data],
        },
        _ => Vec::new(),
    };
    conversations
        .into_iter()
        .enumerate()
        .filter_map(|(i, conv)| parse_conversation(conv, db, &format!("prompts-{}", i)))
        .collect()
}

/// Chat panel data: an array of conversations, `{tabs: [...]}`, or a single conversation
fn panel_sessions(data: &Value, db: &WorkspaceDb) -> Vec<ChatSession> {
    match data {
        Value::Array(items) => items
            .iter()
            .enumerate()
            .filter_map(|(i, conv)| parse_conversation(conv, db, &format!("chat-{}", i)))
            .collect(),
        Value::Object(_) => match data.get("tabs") {
            Some(Value::Array(tabs)) => tabs
                .iter()
                .enumerate()
                .filter_map(|(i, tab)| parse_conversation(tab, db, &format!("tab-{}", i)))
                .collect(),
            _ => parse_conversation(data, db, "chat-0").into_iter().collect(),
        },
        _ => Vec::new(),
    }
}

/// Conversations without any parseable message are skipped
fn parse_conversation(conv: &Value, db: &WorkspaceDb, suffix: &str) -> Option<ChatSession> {
    if !conv.is_object() {
        return None;
    }
    let raw = MESSAGE_FIELDS
        .iter()
        .find_map(|field| conv.get(*field).and_then(Value::as_array))?;
    let messages = parse_messages(raw, &FORMAT);
    if messages.is_empty() {
        return None;
    }

    let id = first_string(conv, &["id", "sessionId", "chatId"])
        .unwrap_or_else(|| format!("{}-{}", db.folder_name, suffix));
    let title = first_string(conv, &["title", "name"]);
    let created = first_date(conv, &["createdAt", "timestamp", "date"], FORMAT.numeric_dates);

    Some(
        ChatSession::new(
            format!("{}{}", IdeKind::Cursor.session_prefix(), id),
            IdeKind::Cursor,
            Some(db.workspace_path.clone()),
        )
        .with_messages(messages)
        .with_title(title.as_deref())
        .with_date_created(created),
    )
}
