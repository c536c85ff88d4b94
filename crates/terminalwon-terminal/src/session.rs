use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Terminal lifecycle state. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TerminalStatus {
    Creating,
    Active,
    Closed,
}

/// Terminal descriptor shared with clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminalInfo {
    pub id: String,
    pub name: String,
    pub cwd: String,
    pub shell: String,
    pub pid: Option<u32>,
    pub status: TerminalStatus,
    pub is_pty: bool,
    pub cols: u16,
    pub rows: u16,
    pub tool: String,
    pub streaming: bool,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

impl TerminalInfo {
    /// Move to `next` if that is forward in the lifecycle.
    /// Returns false (and leaves the status untouched) otherwise.
    pub fn advance(&mut self, next: TerminalStatus) -> bool {
        if next > self.status {
            self.status = next;
            true
        } else {
            false
        }
    }

    pub fn touch(&mut self) {
        self.last_activity = Utc::now();
    }

    /// Label used in terminal lists: "pty" or "shell"
    pub fn kind_label(&self) -> &'static str {
        if self.is_pty {
            "pty"
        } else {
            "shell"
        }
    }
}
