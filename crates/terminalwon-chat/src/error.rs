use std::path::PathBuf;

/// Failure reading one IDE store. Readers log these per workspace folder and
/// keep going; they never abort a scan.
#[derive(Debug, thiserror::Error)]
pub enum ReaderError {
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid JSON in {}: {source}", .path.display())]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("database locked, skipping {}", .0.display())]
    Locked(PathBuf),
    #[error("database corrupted, skipping {}", .0.display())]
    Corrupt(PathBuf),
    #[error("SQLite error on {}: {source}", .path.display())]
    Sqlite {
        path: PathBuf,
        source: rusqlite::Error,
    },
}

impl ReaderError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn json(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        Self::Json {
            path: path.into(),
            source,
        }
    }

    /// Classify an SQLite failure: busy/locked and corrupt stores get their own variants
    pub fn sqlite(path: impl Into<PathBuf>, source: rusqlite::Error) -> Self {
        use rusqlite::ErrorCode;

        let path = path.into();
        match source.sqlite_error_code() {
            Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) => Self::Locked(path),
            Some(ErrorCode::DatabaseCorrupt | ErrorCode::NotADatabase) => Self::Corrupt(path),
            _ => Self::Sqlite { path, source },
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    #[error("file watcher failed: {0}")]
    Notify(#[from] notify::Error),
    #[error("no chat storage paths to watch")]
    NothingToWatch,
}
