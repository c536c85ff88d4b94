use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};

use crate::get_logs_dir;

/// One AI request/response pair as written to disk
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeLog<'a> {
    pub provider: &'a str,
    pub model: &'a str,
    pub url: &'a str,
    pub request: &'a Value,
    pub status: Option<u16>,
    pub response: Option<&'a Value>,
    pub error: Option<&'a str>,
}

/// Write an exchange to `~/.terminalwon/logs/ai-<millis>-<provider>.json`
pub fn log_exchange_to_file(exchange: &ExchangeLog<'_>) -> Result<PathBuf> {
    let logs_dir = get_logs_dir()?;
    log_exchange_to_dir(&logs_dir, exchange)
}

/// Same as [`log_exchange_to_file`] with an explicit directory
pub fn log_exchange_to_dir(dir: &Path, exchange: &ExchangeLog<'_>) -> Result<PathBuf> {
    let provider = exchange.provider.replace(['/', '\\'], "-");
    let filename = format!("ai-{}-{}.json", Utc::now().timestamp_millis(), provider);
    let file_path = dir.join(filename);

    let body = serde_json::json!({
        "timestamp": Utc::now().to_rfc3339(),
        "exchange": exchange,
    });
    let content = serde_json::to_string_pretty(&body)?;

    fs::write(&file_path, content)
        .with_context(|| format!("Failed to write AI log to {}", file_path.display()))?;

    tracing::debug!("AI exchange logged to {}", file_path.display());
    Ok(file_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_exchange_written_as_json() {
        let dir = tempfile::TempDir::new().unwrap();
        let request = json!({"model": "gpt-4o", "messages": []});
        let response = json!({"choices": []});
        let exchange = ExchangeLog {
            provider: "openai",
            model: "gpt-4o",
            url: "https://api.openai.com/v1/chat/completions",
            request: &request,
            status: Some(200),
            response: Some(&response),
            error: None,
        };

        let path = log_exchange_to_dir(dir.path(), &exchange).unwrap();
        let written: Value = serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(written["exchange"]["provider"], "openai");
        assert_eq!(written["exchange"]["status"], 200);
        assert_eq!(written["exchange"]["request"]["model"], "gpt-4o");
    }
}
