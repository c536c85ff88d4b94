// Logging module - tracing setup, data directories and AI request logs
pub mod request_logger;

use anyhow::{Context, Result};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

pub use request_logger::{log_exchange_to_file, ExchangeLog};

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins when set; otherwise `default_level` (e.g. "info") is used.
pub fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    // A second init (tests, embedding) is harmless
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// Safely truncate a string to a maximum number of characters
pub fn safe_truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        // Reserve space for "..." suffix
        let trunc_chars = max_chars.saturating_sub(3);
        format!("{}...", s.chars().take(trunc_chars).collect::<String>())
    }
}

/// Last `max_chars` characters of a string, on a char boundary
pub fn tail_chars(s: &str, max_chars: usize) -> &str {
    let count = s.chars().count();
    if count <= max_chars {
        return s;
    }
    match s.char_indices().nth(count - max_chars) {
        Some((idx, _)) => &s[idx..],
        None => s,
    }
}

/// Home directory of the current user
pub fn home_dir() -> Result<PathBuf> {
    dirs::home_dir().context("Failed to get home directory")
}

/// Get or create the base data directory (~/.terminalwon)
pub fn get_terminalwon_dir() -> Result<PathBuf> {
    let dir = home_dir()?.join(".terminalwon");

    if !dir.exists() {
        std::fs::create_dir_all(&dir).context("Failed to create terminalwon directory")?;
    }

    Ok(dir)
}

/// Get or create the logs directory (~/.terminalwon/logs)
pub fn get_logs_dir() -> Result<PathBuf> {
    let logs_dir = get_terminalwon_dir()?.join("logs");

    if !logs_dir.exists() {
        std::fs::create_dir_all(&logs_dir).context("Failed to create logs directory")?;
    }

    Ok(logs_dir)
}
