//! VS Code-style `workspaceStorage` layout shared by Cursor and Antigravity:
//! `<root>/<hash>/state.vscdb` (SQLite key/value `ItemTable`) next to a
//! `workspace.json` naming the opened folder.

use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags, OptionalExtension};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::ReaderError;
use crate::reader::{workspace_folder_of, workspace_folders};

pub const STATE_DB: &str = "state.vscdb";
const WORKSPACE_JSON: &str = "workspace.json";

/// One workspace folder holding a state database
#[derive(Debug, Clone)]
pub struct WorkspaceDb {
    pub folder_name: String,
    pub db_path: PathBuf,
    /// Opened folder from `workspace.json`, else the hash folder name
    pub workspace_path: String,
}

impl WorkspaceDb {
    fn open(folder_name: String, folder_path: PathBuf) -> Option<Self> {
        let db_path = folder_path.join(STATE_DB);
        if !db_path.is_file() {
            return None;
        }
        let workspace_path =
            read_workspace_folder(&folder_path).unwrap_or_else(|| folder_name.clone());
        Some(Self {
            folder_name,
            db_path,
            workspace_path,
        })
    }

    /// Values for `keys`, in order. Missing keys are `None`.
    pub fn read_keys(&self, keys: &[&str]) -> Result<Vec<Option<String>>, ReaderError> {
        let conn = Connection::open_with_flags(
            &self.db_path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| ReaderError::sqlite(&self.db_path, e))?;

        let mut stmt = conn
            .prepare("SELECT value FROM ItemTable WHERE key = ?1")
            .map_err(|e| ReaderError::sqlite(&self.db_path, e))?;

        let mut values = Vec::with_capacity(keys.len());
        for key in keys {
            let value = stmt
                .query_row([key], |row| Ok(value_as_string(row.get_ref(0)?)))
                .optional()
                .map_err(|e| ReaderError::sqlite(&self.db_path, e))?;
            values.push(value.flatten());
        }
        Ok(values)
    }
}

fn value_as_string(value: ValueRef<'_>) -> Option<String> {
    match value {
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => std::str::from_utf8(bytes)
            .ok()
            .filter(|s| !s.is_empty())
            .map(str::to_string),
        _ => None,
    }
}

/// `folder` from `workspace.json`, with any `file://` scheme removed
fn read_workspace_folder(folder_path: &Path) -> Option<String> {
    let path = folder_path.join(WORKSPACE_JSON);
    let raw = std::fs::read_to_string(&path).ok()?;
    let data: serde_json::Value = match serde_json::from_str(&raw) {
        Ok(data) => data,
        Err(e) => {
            debug!("{}", ReaderError::json(&path, e));
            return None;
        }
    };
    let folder = data["folder"].as_str()?;
    Some(folder.strip_prefix("file://").unwrap_or(folder).to_string())
}

/// Every workspace under `root` that has a state database
pub fn workspace_dbs(root: &Path) -> Vec<WorkspaceDb> {
    workspace_folders(root)
        .into_iter()
        .filter_map(|(name, path)| WorkspaceDb::open(name, path))
        .collect()
}

/// Workspace owning a changed database file, if it belongs to `root`
pub fn workspace_for_db(root: &Path, db_path: &Path) -> Option<WorkspaceDb> {
    if db_path.file_name()? != STATE_DB {
        return None;
    }
    let folder_name = workspace_folder_of(root, db_path)?;
    let folder_path = root.join(&folder_name);
    WorkspaceDb::open(folder_name, folder_path)
}


#[cfg(test)]
mod tests {
    use super::fixtures::write_workspace;
    use super::*;

    #[test]
    fn test_read_keys_and_workspace_path() {
        let dir = tempfile::tempdir().unwrap();
        write_workspace(dir.path(), "abc123", Some("/home/dev/app"), &[("k1", "v1")]);

        let dbs = workspace_dbs(dir.path());
        assert_eq!(dbs.len(), 1);
        assert_eq!(dbs[0].workspace_path, "/home/dev/app");
        assert_eq!(
            dbs[0].read_keys(&["k1", "missing"]).unwrap(),
            vec![Some("v1".to_string()), None]
        );
    }

    #[test]
    fn test_workspace_path_falls_back_to_folder() {
        let dir = tempfile::tempdir().unwrap();
        write_workspace(dir.path(), "deadbeef", None, &[]);
        let dbs = workspace_dbs(dir.path());
        assert_eq!(dbs[0].workspace_path, "deadbeef");
    }

    #[test]
    fn test_corrupt_database_is_classified() {
        let dir = tempfile::tempdir().unwrap();
        let ws = dir.path().join("bad");
        std::fs::create_dir_all(&ws).unwrap();
        std::fs::write(ws.join(STATE_DB), b"this is not sqlite at all, just text padding....").unwrap();

        let dbs = workspace_dbs(dir.path());
        let err = dbs[0].read_keys(&["k"]).unwrap_err();
        assert!(matches!(err, ReaderError::Corrupt(_)), "got {err:?}");
    }

    #[test]
    fn test_workspace_for_db_checks_file_name() {
        let dir = tempfile::tempdir().unwrap();
        write_workspace(dir.path(), "h1", None, &[]);
        assert!(workspace_for_db(dir.path(), &dir.path().join("h1").join(STATE_DB)).is_some());
        assert!(workspace_for_db(dir.path(), &dir.path().join("h1").join("other.db")).is_none());
    }
}
