//! Kiro keeps one folder per workspace under
//! `globalStorage/kiro.kiroagent/workspace-sessions`, named with the
//! url-safe base64 of the workspace path. Each folder has a `sessions.json`
//! index and one JSON file per session.

use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use terminalwon_types::{ChatSession, IdeKind};

use crate::error::ReaderError;
use crate::normalize::{
    appdata_dir, decode_workspace_folder, first_date, first_string, parse_messages,
    MessageFormat, NumericDates,
};
use crate::reader::{
    recursive_pattern, workspace_folder_of, workspace_folders, ChatReader, FileChange,
};

const SESSIONS_INDEX: &str = "sessions.json";

const FORMAT: MessageFormat = MessageFormat {
    role_fields: &["role", "type"],
    assistant_aliases: &[],
    numeric_dates: NumericDates::Millis,
};

pub struct KiroReader {
    root: PathBuf,
}

impl KiroReader {
    pub fn new() -> Self {
        Self::with_root(
            appdata_dir()
                .join("Kiro")
                .join("User")
                .join("globalStorage")
                .join("kiro.kiroagent")
                .join("workspace-sessions"),
        )
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn scan_folder(&self, folder_name: &str, folder: &Path) -> Vec<ChatSession> {
        let workspace = workspace_path_for(folder_name);
        match read_index(folder) {
            Some(Ok(entries)) => entries
                .iter()
                .filter_map(|meta| session_from_meta(meta, &workspace))
                .collect(),
            Some(Err(e)) => {
                warn!("{}; scanning session files instead", e);
                scan_session_files(folder, &workspace)
            }
            None => scan_session_files(folder, &workspace),
        }
    }
}

impl Default for KiroReader {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatReader for KiroReader {
    fn ide(&self) -> IdeKind {
        IdeKind::Kiro
    }

    fn storage_root(&self) -> &Path {
        &self.root
    }

    fn scan_sessions(&self) -> Vec<ChatSession> {
        if !self.storage_exists() {
            debug!("Kiro storage not found at {}", self.root.display());
            return Vec::new();
        }
        workspace_folders(&self.root)
            .iter()
            .flat_map(|(name, path)| self.scan_folder(name, path))
            .collect()
    }

    fn read_session(&self, session_id: &str) -> Option<ChatSession> {
        let raw_id = self.raw_session_id(session_id);
        for (folder_name, folder) in workspace_folders(&self.root) {
            let workspace = workspace_path_for(&folder_name);

            let direct = folder.join(format!("{}.json", raw_id));
            if direct.is_file() {
                return read_session_file(&direct, &workspace);
            }

            // The index may name the file explicitly
            let entries = match read_index(&folder) {
                Some(Ok(entries)) => entries,
                _ => continue,
            };
            let file_name = entries
                .iter()
                .find(|meta| meta["sessionId"].as_str() == Some(raw_id))
                .and_then(|meta| meta["fileName"].as_str());
            if let Some(file_name) = file_name {
                let path = folder.join(file_name);
                if path.is_file() {
                    return read_session_file(&path, &workspace);
                }
            }
        }
        None
    }

    fn watch_patterns(&self) -> Vec<String> {
        if !self.storage_exists() {
            return Vec::new();
        }
        vec![recursive_pattern(&self.root, "*.json")]
    }

    fn on_file_change(&self, path: &Path) -> FileChange {
        if path.file_name().is_some_and(|n| n == SESSIONS_INDEX) {
            return FileChange::None;
        }
        if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
            return FileChange::None;
        }
        let Some(folder_name) = workspace_folder_of(&self.root, path) else {
            return FileChange::None;
        };
        read_session_file(path, &workspace_path_for(&folder_name)).into()
    }
}

fn workspace_path_for(folder_name: &str) -> String {
    decode_workspace_folder(folder_name).unwrap_or_else(|| folder_name.to_string())
}

/// Entries of a folder's `sessions.json`: either a bare array or `{sessions: [...]}`.
/// `None` when the folder has no index.
fn read_index(folder: &Path) -> Option<Result<Vec<Value>, ReaderError>> {
    let path = folder.join(SESSIONS_INDEX);
    if !path.is_file() {
        return None;
    }
    Some(read_json(&path).map(|data| match data {
        Value::Array(entries) => entries,
        Value::Object(mut obj) => match obj.remove("sessions") {
            Some(Value::Array(entries)) => entries,
            _ => Vec::new(),
        },
        _ => Vec::new(),
    }))
}

fn read_json(path: &Path) -> Result<Value, ReaderError> {
    let raw = std::fs::read_to_string(path).map_err(|e| ReaderError::io(path, e))?;
    serde_json::from_str(&raw).map_err(|e| ReaderError::json(path, e))
}

/// List-view session from an index entry. Messages load on demand.
fn session_from_meta(meta: &Value, workspace: &str) -> Option<ChatSession> {
    let session_id = first_string(meta, &["sessionId"])?;
    let title = first_string(meta, &["title", "name"]);
    let created = first_date(meta, &["dateCreated", "createdAt"], NumericDates::Millis);
    let last_activity = first_date(
        meta,
        &["lastActivity", "updatedAt", "dateCreated"],
        NumericDates::Millis,
    );

    let mut session = ChatSession::new(
        format!("{}{}", IdeKind::Kiro.session_prefix(), session_id),
        IdeKind::Kiro,
        Some(workspace.to_string()),
    )
    .with_title(title.as_deref())
    .with_date_created(created);
    session.last_activity = last_activity.or(created);
    session.message_count = meta["messageCount"].as_u64().unwrap_or(0) as usize;
    Some(session)
}

fn scan_session_files(folder: &Path, workspace: &str) -> Vec<ChatSession> {
    let entries = match std::fs::read_dir(folder) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("{}", ReaderError::io(folder, e));
            return Vec::new();
        }
    };
    let mut files: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| {
            path.extension().is_some_and(|ext| ext == "json")
                && path.file_name().is_some_and(|n| n != SESSIONS_INDEX)
        })
        .collect();
    files.sort();
    files
        .iter()
        .filter_map(|path| read_session_file(path, workspace))
        .collect()
}

fn read_session_file(path: &Path, workspace: &str) -> Option<ChatSession> {
    match read_json(path) {
        Ok(data) => parse_session(&data, path, workspace),
        Err(e) => {
            warn!("{}", e);
            None
        }
    }
}

fn parse_session(data: &Value, path: &Path, workspace: &str) -> Option<ChatSession> {
    if !data.is_object() {
        return None;
    }
    let session_id = first_string(data, &["sessionId", "id"]).or_else(|| {
        path.file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
    })?;

    // History entries may wrap the message in a `message` object
    let history = data
        .get("history")
        .or_else(|| data.get("messages"))
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .map(|item| match item.get("message") {
                    Some(inner) if inner.is_object() => inner,
                    _ => item,
                })
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();
    let messages = parse_messages(history, &FORMAT);

    let title = first_string(data, &["title", "name"]);
    let created = first_date(
        data,
        &["dateCreated", "createdAt", "timestamp"],
        NumericDates::Millis,
    );

    Some(
        ChatSession::new(
            format!("{}{}", IdeKind::Kiro.session_prefix(), session_id),
            IdeKind::Kiro,
            Some(workspace.to_string()),
        )
        .with_messages(messages)
        .with_title(title.as_deref())
        .with_date_created(created),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::encode_workspace_folder;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use terminalwon_types::ChatRole;

    fn workspace_dir(root: &Path, workspace: &str) -> PathBuf {
        let dir = root.join(encode_workspace_folder(workspace));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_scan_uses_index_metadata() {
        let root = tempfile::tempdir().unwrap();
        let dir = workspace_dir(root.path(), "/home/dev/shop");
        std::fs::write(
            dir.join(SESSIONS_INDEX),
            json!({"sessions": [
                {"sessionId": "s1", "title": "Fix build", "dateCreated": "1700000000000", "messageCount": 4},
                {"title": "no id, skipped"}
            ]})
            .to_string(),
        )
        .unwrap();

        let sessions = KiroReader::with_root(root.path()).scan_sessions();
        assert_eq!(sessions.len(), 1);
        let s = &sessions[0];
        assert_eq!(s.id, "kiro-s1");
        assert_eq!(s.title, "Fix build");
        assert_eq!(s.workspace_path.as_deref(), Some("/home/dev/shop"));
        assert_eq!(s.workspace_name, "shop");
        assert_eq!(s.message_count, 4);
        assert!(s.messages.is_empty());
        assert!(s.date_created.is_some());
    }

    #[test]
    fn test_scan_falls_back_to_session_files() {
        let root = tempfile::tempdir().unwrap();
        let dir = workspace_dir(root.path(), "/srv/api");
        std::fs::write(
            dir.join("abc.json"),
            json!({"history": [
                {"message": {"role": "user", "content": "Why does cargo fail?"}},
                {"message": {"role": "assistant", "content": [{"type": "text", "text": "Try"}, {"type": "code", "language": "sh", "code": "cargo clean"}]}},
                {"message": {"role": "tool", "content": "dropped"}}
            ]})
            .to_string(),
        )
        .unwrap();

        let sessions = KiroReader::with_root(root.path()).scan_sessions();
        assert_eq!(sessions.len(), 1);
        let s = &sessions[0];
        assert_eq!(s.id, "kiro-abc");
        assert_eq!(s.title, "Why does cargo fail?");
        assert_eq!(s.message_count, 2);
        assert_eq!(s.messages[1].role, ChatRole::Assistant);
        assert_eq!(s.messages[1].content, "Try\n```sh\ncargo clean\n```");
    }

    #[test]
    fn test_read_session_by_file_name_in_index() {
        let root = tempfile::tempdir().unwrap();
        let dir = workspace_dir(root.path(), "/srv/api");
        std::fs::write(
            dir.join(SESSIONS_INDEX),
            json!([{"sessionId": "s9", "fileName": "chat-s9.json"}]).to_string(),
        )
        .unwrap();
        std::fs::write(
            dir.join("chat-s9.json"),
            json!({"sessionId": "s9", "messages": [{"role": "human", "text": "hello"}]}).to_string(),
        )
        .unwrap();

        let reader = KiroReader::with_root(root.path());
        let session = reader.read_session("kiro-s9").unwrap();
        assert_eq!(session.messages.len(), 1);
        assert_eq!(session.messages[0].role, ChatRole::User);
        assert!(reader.read_session("kiro-missing").is_none());
    }

    #[test]
    fn test_on_file_change_ignores_index() {
        let root = tempfile::tempdir().unwrap();
        let dir = workspace_dir(root.path(), "/srv/api");
        let file = dir.join("x.json");
        std::fs::write(&file, json!({"messages": []}).to_string()).unwrap();
        std::fs::write(dir.join(SESSIONS_INDEX), "[]").unwrap();

        let reader = KiroReader::with_root(root.path());
        assert_eq!(reader.on_file_change(&dir.join(SESSIONS_INDEX)), FileChange::None);
        match reader.on_file_change(&file) {
            FileChange::Session(s) => assert_eq!(s.id, "kiro-x"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_missing_root_is_empty() {
        let reader = KiroReader::with_root("/nonexistent/kiro/root");
        assert!(reader.scan_sessions().is_empty());
        assert!(reader.watch_patterns().is_empty());
    }

    #[test]
    fn test_undecodable_folder_keeps_name() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("plain-folder");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("a.json"), json!({"messages": []}).to_string()).unwrap();

        let sessions = KiroReader::with_root(root.path()).scan_sessions();
        assert_eq!(sessions[0].workspace_path.as_deref(), Some("plain-folder"));
        assert_eq!(sessions[0].title, "Untitled Session");
    }
}
