use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use terminalwon_types::{ChatSession, IdeKind};

use crate::error::ReaderError;
use crate::normalize::{
    appdata_dir, first_date, first_string, parse_messages, MessageFormat, NumericDates,
};
use crate::reader::{recursive_pattern, ChatReader, FileChange};
use crate::readers::vscdb::{workspace_dbs, workspace_for_db, WorkspaceDb, STATE_DB};

pub const SESSION_INDEX_KEY: &str = "chat.ChatSessionStore.index";
pub const AGENT_PREFERENCES_KEY: &str = "antigravityUnifiedStateSync.agentPreferences";

const FORMAT: MessageFormat = MessageFormat {
    role_fields: &["role", "type", "sender"],
    assistant_aliases: &["antigravity"],
    numeric_dates: NumericDates::SecondsOrMillis,
};

pub struct AntigravityReader {
    root: PathBuf,
}

impl AntigravityReader {
    pub fn new() -> Self {
        Self::with_root(
            appdata_dir()
                .join("Antigravity")
                .join("User")
                .join("workspaceStorage"),
        )
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn sessions_in(&self, db: &WorkspaceDb) -> Result<Vec<ChatSession>, ReaderError> {
        let values = db.read_keys(&[SESSION_INDEX_KEY, AGENT_PREFERENCES_KEY])?;
        if values.get(1).is_some_and(Option::is_some) {
            debug!("Antigravity agent preferences present in {}", db.folder_name);
        }
        let Some(raw) = values.first().and_then(Option::as_deref) else {
            return Ok(Vec::new());
        };
        let index: Value = match serde_json::from_str(raw) {
            Ok(index) => index,
            Err(e) => {
                debug!("Bad {} in {}: {}", SESSION_INDEX_KEY, db.db_path.display(), e);
                return Ok(Vec::new());
            }
        };
        let Some(entries) = index.get("entries").and_then(Value::as_object) else {
            return Ok(Vec::new());
        };
        Ok(entries
            .iter()
            .filter_map(|(id, entry)| parse_entry(id, entry, db))
            .collect())
    }

    fn scan_workspace(&self, db: &WorkspaceDb) -> Vec<ChatSession> {
        self.sessions_in(db).unwrap_or_else(|e| {
            warn!("Antigravity: {}", e);
            Vec::new()
        })
    }
}

impl Default for AntigravityReader {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatReader for AntigravityReader {
    fn ide(&self) -> IdeKind {
        IdeKind::Antigravity
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
        let wanted = format!(
            "{}{}",
            IdeKind::Antigravity.session_prefix(),
            self.raw_session_id(session_id)
        );
        workspace_dbs(&self.root).iter().find_map(|db| {
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

fn parse_entry(id: &str, entry: &Value, db: &WorkspaceDb) -> Option<ChatSession> {
    let raw = ["messages", "history", "conversation"]
        .iter()
        .find_map(|field| entry.get(*field).and_then(Value::as_array))?;
    let messages = parse_messages(raw, &FORMAT);
    if messages.is_empty() {
        return None;
    }

    let title = first_string(entry, &["title", "name"]);
    let created = first_date(entry, &["createdAt", "timestamp"], FORMAT.numeric_dates);

    Some(
        ChatSession::new(
            format!("{}{}", IdeKind::Antigravity.session_prefix(), id),
            IdeKind::Antigravity,
            Some(db.workspace_path.clone()),
        )
        .with_messages(messages)
        .with_title(title.as_deref())
        .with_date_created(created),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::readers::vscdb::fixtures::write_workspace;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use terminalwon_types::ChatRole;

    #[test]
    fn test_reads_session_index_entries() {
        let root = tempfile::tempdir().unwrap();
        let index = json!({"entries": {
            "a1": {
                "title": "Deploy script",
                "createdAt": "2024-05-01T09:00:00Z",
                "messages": [
                    {"role": "user", "content": "write a deploy script"},
                    {"role": "agent", "content": "done"},
                    {"role": "antigravity", "content": "also this"}
                ]
            },
            "empty": {"messages": []},
            "junk": 3
        }})
        .to_string();
        write_workspace(
            root.path(),
            "ag1",
            Some("/code/infra"),
            &[(SESSION_INDEX_KEY, index.as_str()), (AGENT_PREFERENCES_KEY, "{}")],
        );

        let reader = AntigravityReader::with_root(root.path());
        let sessions = reader.scan_sessions();
        assert_eq!(sessions.len(), 1);
        let s = &sessions[0];
        assert_eq!(s.id, "antigravity-a1");
        assert_eq!(s.workspace_name, "infra");
        assert_eq!(s.message_count, 3);
        assert!(s.messages[1..].iter().all(|m| m.role == ChatRole::Assistant));

        let full = reader.read_session("a1").unwrap();
        assert_eq!(full.title, "Deploy script");
        assert!(reader.read_session("antigravity-a").is_none());
    }

    #[test]
    fn test_preferences_only_store_is_empty() {
        let root = tempfile::tempdir().unwrap();
        write_workspace(root.path(), "ag2", None, &[(AGENT_PREFERENCES_KEY, "{}")]);
        assert!(AntigravityReader::with_root(root.path()).scan_sessions().is_empty());
    }
}
