//! Helpers shared by the readers for turning loosely-shaped JSON into the
//! normalized chat model.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde_json::{json, Map, Value};
use std::path::PathBuf;

use terminalwon_types::{ChatMessage, ChatRole};

/// Numbers below this are Unix seconds, at or above it milliseconds
const MILLIS_THRESHOLD: f64 = 1e12;

/// How bare numeric timestamps are interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumericDates {
    /// Always milliseconds since the epoch
    Millis,
    /// Seconds when below 1e12, milliseconds otherwise
    SecondsOrMillis,
}

/// Base directory IDEs keep their user data under.
///
/// `~/Library/Application Support` on macOS, `$XDG_CONFIG_HOME` or `~/.config`
/// on Linux, `%APPDATA%` on Windows.
pub fn appdata_dir() -> PathBuf {
    dirs::config_dir()
        .or_else(|| dirs::home_dir().map(|h| h.join(".config")))
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Decode a workspace folder name holding a url-safe base64 path.
///
/// Only results that look like a path (contain `/`) are accepted.
pub fn decode_workspace_folder(name: &str) -> Option<String> {
    let normalized: String = name
        .trim_end_matches('=')
        .chars()
        .map(|c| match c {
            '+' => '-',
            '/' => '_',
            other => other,
        })
        .collect();
    let bytes = URL_SAFE_NO_PAD.decode(normalized).ok()?;
    let decoded = String::from_utf8(bytes).ok()?;
    decoded.contains('/').then_some(decoded)
}

/// Inverse of [`decode_workspace_folder`]
pub fn encode_workspace_folder(path: &str) -> String {
    URL_SAFE_NO_PAD.encode(path.as_bytes())
}

/// First present, non-null field among `keys`
pub fn first_field<'a>(value: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|k| value.get(*k))
        .find(|v| !v.is_null())
}

/// First field among `keys` rendered as a string (numbers are accepted)
pub fn first_string(value: &Value, keys: &[&str]) -> Option<String> {
    match first_field(value, keys)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Message body from `content`, `text`, `message` or `body`.
///
/// Block arrays are joined with newlines; code blocks are fenced with their
/// language. An empty string is valid content; a missing body is `None`.
pub fn extract_content(msg: &Value) -> Option<String> {
    match first_field(msg, &["content", "text", "message", "body"])? {
        Value::String(s) => Some(s.clone()),
        Value::Array(blocks) => Some(
            blocks
                .iter()
                .map(render_block)
                .collect::<Vec<_>>()
                .join("\n"),
        ),
        Value::Object(obj) => Some(Value::Object(obj.clone()).to_string()),
        other => Some(other.to_string()),
    }
}

fn render_block(block: &Value) -> String {
    if let Some(s) = block.as_str() {
        return s.to_string();
    }
    let text = || block["text"].as_str().unwrap_or_default().to_string();
    match block["type"].as_str() {
        Some("text") => text(),
        Some("code") => {
            let lang = block["language"].as_str().unwrap_or_default();
            let code = match block.get("code") {
                Some(Value::String(c)) => c.clone(),
                _ => text(),
            };
            format!("```{}\n{}\n```", lang, code)
        }
        _ => block["text"]
            .as_str()
            .or_else(|| block["content"].as_str())
            .unwrap_or_default()
            .to_string(),
    }
}

/// Parse a timestamp from an RFC 3339 / ISO string, a digit string or a number.
///
/// Unparseable values are `None`, never an error.
pub fn parse_date(value: &Value, numeric: NumericDates) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => from_number(n.as_f64()?, numeric),
        Value::String(s) => {
            let s = s.trim();
            if !s.is_empty() && s.chars().all(|c| c.is_ascii_digit()) {
                return from_number(s.parse::<f64>().ok()?, numeric);
            }
            parse_date_str(s)
        }
        _ => None,
    }
}

fn from_number(n: f64, numeric: NumericDates) -> Option<DateTime<Utc>> {
    if !n.is_finite() || n <= 0.0 {
        return None;
    }
    let millis = match numeric {
        NumericDates::Millis => n,
        NumericDates::SecondsOrMillis if n < MILLIS_THRESHOLD => n * 1000.0,
        NumericDates::SecondsOrMillis => n,
    };
    Utc.timestamp_millis_opt(millis as i64).single()
}

fn parse_date_str(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// First parseable date among `keys`
pub fn first_date(value: &Value, keys: &[&str], numeric: NumericDates) -> Option<DateTime<Utc>> {
    keys.iter()
        .filter_map(|k| value.get(*k))
        .find_map(|v| parse_date(v, numeric))
}

/// Per-reader knobs for [`parse_message`]
#[derive(Debug, Clone, Copy)]
pub struct MessageFormat {
    /// Fields that may carry the role label, in priority order
    pub role_fields: &'static [&'static str],
    /// Extra labels this IDE uses for its own assistant
    pub assistant_aliases: &'static [&'static str],
    pub numeric_dates: NumericDates,
}

pub fn normalize_role(raw: &Value, format: &MessageFormat) -> Option<ChatRole> {
    let label = match raw {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    ChatRole::normalize(&label).or_else(|| {
        format
            .assistant_aliases
            .iter()
            .any(|alias| label.eq_ignore_ascii_case(alias))
            .then_some(ChatRole::Assistant)
    })
}

/// Normalize one message. Unknown roles and missing bodies drop the message.
pub fn parse_message(msg: &Value, index: usize, format: &MessageFormat) -> Option<ChatMessage> {
    if !msg.is_object() {
        return None;
    }
    let role = normalize_role(first_field(msg, format.role_fields)?, format)?;
    let content = extract_content(msg)?;

    let id = first_string(msg, &["id", "messageId"]).unwrap_or_else(|| format!("msg-{}", index));
    let timestamp = first_date(msg, &["timestamp", "createdAt", "date"], format.numeric_dates);

    let mut metadata = Map::new();
    if let Some(model) = first_field(msg, &["model", "modelName"]) {
        metadata.insert("model".into(), model.clone());
    }
    if let Some(calls) = first_field(msg, &["toolCalls", "tool_calls", "functionCalls"]) {
        metadata.insert("toolCalls".into(), calls.clone());
    }
    let metadata = if metadata.is_empty() {
        Value::Null
    } else {
        json!(metadata)
    };

    Some(
        ChatMessage::new(id, role, content)
            .with_timestamp(timestamp)
            .with_metadata(metadata),
    )
}

/// Normalize a message array, dropping entries that do not parse
pub fn parse_messages<'a>(
    items: impl IntoIterator<Item = &'a Value>,
    format: &MessageFormat,
) -> Vec<ChatMessage> {
    items
        .into_iter()
        .enumerate()
        .filter_map(|(i, item)| parse_message(item, i, format))
        .collect()
}
