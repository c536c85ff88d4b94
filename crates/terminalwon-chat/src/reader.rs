use std::path::{Path, PathBuf};

use terminalwon_types::{ChatSession, IdeKind};

/// Sessions produced by a single changed file
#[derive(Debug, Clone, PartialEq)]
pub enum FileChange {
    /// The file is not a chat store, or nothing could be read
    None,
    /// Single-session stores (one JSON file per session)
    Session(ChatSession),
    /// Multi-session stores (a workspace database)
    Sessions(Vec<ChatSession>),
}

impl FileChange {
    pub fn into_sessions(self) -> Vec<ChatSession> {
        match self {
            Self::None => Vec::new(),
            Self::Session(session) => vec![session],
            Self::Sessions(sessions) => sessions,
        }
    }
}

impl From<Option<ChatSession>> for FileChange {
    fn from(session: Option<ChatSession>) -> Self {
        session.map_or(Self::None, Self::Session)
    }
}

/// One IDE's on-disk chat store.
///
/// Implementations do blocking file and SQLite I/O; async callers go
/// through `spawn_blocking`. Corrupt, locked or partial stores are logged
/// and skipped, so no method returns an error.
pub trait ChatReader: Send + Sync {
    fn ide(&self) -> IdeKind;

    /// Directory every session of this reader lives under
    fn storage_root(&self) -> &Path;

    fn storage_exists(&self) -> bool {
        self.storage_root().is_dir()
    }

    /// Full scan of the store. List-view sessions may omit messages.
    fn scan_sessions(&self) -> Vec<ChatSession>;

    /// Full session, messages included. Accepts ids with or without the
    /// IDE prefix.
    fn read_session(&self, session_id: &str) -> Option<ChatSession>;

    /// Globs (rooted at `storage_root`) of files worth watching. Empty when
    /// the store does not exist.
    fn watch_patterns(&self) -> Vec<String>;

    fn on_file_change(&self, path: &Path) -> FileChange;

    /// Strip this reader's prefix from a session id
    fn raw_session_id<'a>(&self, session_id: &'a str) -> &'a str {
        let prefix = self.ide().session_prefix();
        session_id.strip_prefix(prefix.as_str()).unwrap_or(session_id)
    }
}

/// Glob matching `file_name` anywhere below `root`
pub(crate) fn recursive_pattern(root: &Path, file_name: &str) -> String {
    let escaped = glob::Pattern::escape(&root.to_string_lossy());
    format!("{}/**/{}", escaped.trim_end_matches('/'), file_name)
}

/// Name of the direct child of `root` that contains `path`
pub(crate) fn workspace_folder_of(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let first = relative.components().next()?;
    Some(first.as_os_str().to_string_lossy().into_owned())
}

/// Subdirectories of `root`, sorted by name. Missing roots are empty.
pub(crate) fn workspace_folders(root: &Path) -> Vec<(String, PathBuf)> {
    let entries = match std::fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::debug!("Cannot list {}: {}", root.display(), e);
            return Vec::new();
        }
    };
    let mut folders: Vec<(String, PathBuf)> = entries
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .map(|entry| (entry.file_name().to_string_lossy().into_owned(), entry.path()))
        .collect();
    folders.sort();
    folders
}
