use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{prefixed_id, IdeKind};

/// Kind of event emitted by a terminal agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimelineEventType {
    ErrorDetected,
    CommandSuggested,
    ActionTaken,
}

/// Ephemeral broadcast-only notification from the agent pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: TimelineEventType,
    pub terminal_id: String,
    pub timestamp: DateTime<Utc>,
    pub data: Value,
}

impl TimelineEvent {
    pub fn new(event_type: TimelineEventType, terminal_id: impl Into<String>, data: Value) -> Self {
        Self {
            id: prefixed_id("evt"),
            event_type,
            terminal_id: terminal_id.into(),
            timestamp: Utc::now(),
            data,
        }
    }
}

/// Advisory insight produced by an IDE agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Insight {
    pub id: String,
    pub ide_type: IdeKind,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: InsightKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InsightKind {
    #[serde(rename_all = "camelCase")]
    Correlation {
        project_path: String,
        related_sessions: Vec<String>,
        insight: String,
        suggestion: Option<String>,
        terminal_error: Value,
    },
    #[serde(rename_all = "camelCase")]
    CrossProject {
        current_project: String,
        relevant_project: Option<String>,
        insight: String,
    },
}

impl Insight {
    pub fn new(ide_type: IdeKind, kind: InsightKind) -> Self {
        Self {
            id: prefixed_id("insight"),
            ide_type,
            timestamp: Utc::now(),
            kind,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_timeline_event_wire_shape() {
        let event = TimelineEvent::new(
            TimelineEventType::ErrorDetected,
            "pty-1",
            json!({"confidence": 0.9}),
        );
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "error_detected");
        assert_eq!(value["terminalId"], "pty-1");
        assert!(value["id"].as_str().unwrap().starts_with("evt-"));
    }

    #[test]
    fn test_insight_flattens_kind() {
        let insight = Insight::new(
            IdeKind::Kiro,
            InsightKind::CrossProject {
                current_project: "/a".into(),
                relevant_project: Some("/b".into()),
                insight: "same bug".into(),
            },
        );
        let value = serde_json::to_value(&insight).unwrap();
        assert_eq!(value["type"], "cross_project");
        assert_eq!(value["ideType"], "kiro");
        assert_eq!(value["currentProject"], "/a");
        assert_eq!(value["relevantProject"], "/b");
    }
}
