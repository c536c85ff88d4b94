use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use terminalwon_config::AgentConfig;
use terminalwon_llm_api::{ChatMessage as LlmMessage, ChatOptions, LlmClient};
use terminalwon_logging::tail_chars;
use terminalwon_types::{
    AgentKind, ChatMessage, ChatRole, ChatSession, ChatSessionSummary, IdeKind, Insight,
    InsightKind, TimelineEvent,
};

use crate::patterns::{contains_error_keywords, extract_json};

pub const MAX_CONTEXT_ITEMS: usize = 20;
pub const PREVIEW_CHARS: usize = 200;
/// Cross-project analysis needs at least this many items from other projects
pub const MIN_OTHER_PROJECT_ITEMS: usize = 2;
const OTHER_PROJECT_WINDOW: usize = 10;
const QUESTION_CHARS: usize = 500;
const CHAT_CONTEXT_CHARS: usize = 2000;
const UNKNOWN_PROJECT: &str = "unknown";

pub const CORRELATION_SYSTEM_PROMPT: &str = r#"You are an IDE assistant that correlates terminal errors with recent chat context.
Given a terminal error and recent chat discussion, provide a brief insight if they are related.
Respond in JSON format:
{
  "isRelated": boolean,
  "insight": "Brief explanation of the correlation" | null,
  "suggestion": "What the user should do" | null
}
Only respond with valid JSON."#;

pub const CROSS_PROJECT_SYSTEM_PROMPT: &str = r#"You are an IDE assistant looking for relevant context across projects.
If the user's current question is related to discussions in other projects, provide a brief insight.
Respond in JSON:
{
  "hasRelevantContext": boolean,
  "relevantProject": "project name" | null,
  "insight": "Brief insight" | null
}
Only respond with valid JSON."#;

/// Project key for a session: workspace path, else workspace name, else "unknown"
pub fn project_key(workspace_path: Option<&str>, workspace_name: Option<&str>) -> String {
    workspace_path
        .filter(|p| !p.is_empty())
        .or(workspace_name.filter(|n| !n.is_empty()))
        .unwrap_or(UNKNOWN_PROJECT)
        .to_string()
}

#[derive(Debug, Clone, Copy)]
pub struct IdeAgentOptions {
    /// Minimum time between proactive cross-project analyses
    pub analysis_interval: Duration,
}

impl Default for IdeAgentOptions {
    fn default() -> Self {
        Self {
            analysis_interval: Duration::from_secs(30),
        }
    }
}

/// Recent chat message kept for correlation
#[derive(Debug, Clone, PartialEq)]
pub struct ContextItem {
    pub session_id: String,
    pub project_path: String,
    pub role: ChatRole,
    pub content_preview: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
struct ProjectActivity {
    last_activity: Option<DateTime<Utc>>,
    session_ids: BTreeSet<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Correlation {
    pub is_related: bool,
    pub insight: Option<String>,
    pub suggestion: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct CrossProjectAnswer {
    has_relevant_context: bool,
    relevant_project: Option<String>,
    insight: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectSummary {
    pub path: String,
    pub session_count: usize,
    pub last_activity: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IdeAgentSummary {
    pub ide_type: IdeKind,
    pub enabled: bool,
    pub active_projects: usize,
    pub context_window_size: usize,
    pub projects: Vec<ProjectSummary>,
}

#[derive(Default)]
struct IdeAgentState {
    context: VecDeque<ContextItem>,
    projects: BTreeMap<String, ProjectActivity>,
    last_analysis: Option<Instant>,
}

/// Long-lived observer of one IDE family's chat history.
///
/// Keeps a small window of recent messages across all projects and uses it to
/// explain terminal errors or point at related discussions elsewhere. It only
/// emits advisory insights and never touches terminal or session state.
pub struct IdeAgent {
    ide: IdeKind,
    enabled: bool,
    system_prompt: Option<String>,
    options: IdeAgentOptions,
    client: Arc<dyn LlmClient>,
    insights: UnboundedSender<Insight>,
    state: Mutex<IdeAgentState>,
    destroyed: AtomicBool,
}

impl IdeAgent {
    pub fn new(
        ide: IdeKind,
        config: &AgentConfig,
        client: Arc<dyn LlmClient>,
        insights: UnboundedSender<Insight>,
    ) -> Self {
        Self::with_options(ide, config, client, insights, IdeAgentOptions::default())
    }

    pub fn with_options(
        ide: IdeKind,
        config: &AgentConfig,
        client: Arc<dyn LlmClient>,
        insights: UnboundedSender<Insight>,
        options: IdeAgentOptions,
    ) -> Self {
        if config.enabled {
            info!("IDE agent created for {} (provider: {})", ide, config.provider);
        } else {
            info!("IDE agent disabled for {}", ide);
        }

        Self {
            ide,
            enabled: config.enabled,
            system_prompt: config.system_prompt.clone().filter(|p| !p.is_empty()),
            options,
            client,
            insights,
            state: Mutex::new(IdeAgentState::default()),
            destroyed: AtomicBool::new(false),
        }
    }

    pub fn ide(&self) -> IdeKind {
        self.ide
    }

    fn active(&self) -> bool {
        self.enabled && !self.destroyed.load(Ordering::SeqCst)
    }

    /// Seed project tracking from an existing session snapshot
    pub fn initialize<'a>(&self, sessions: impl IntoIterator<Item = &'a ChatSession>) {
        for session in sessions {
            if session.source_ide == self.ide {
                self.track_session(session);
            }
        }
        info!(
            "IDE agent {} initialized with {} projects",
            self.ide,
            self.state.lock().projects.len()
        );
    }

    pub fn track_session(&self, session: &ChatSession) {
        let key = project_key(session.workspace_path.as_deref(), Some(&session.workspace_name));
        let mut state = self.state.lock();
        let project = state.projects.entry(key).or_default();
        project.session_ids.insert(session.id.clone());
        project.last_activity = session
            .last_activity
            .or(session.date_created)
            .or(project.last_activity);
    }

    /// Record a new chat message; user messages that mention problems may
    /// trigger a cross-project check.
    pub async fn handle_new_message(&self, session: &ChatSessionSummary, message: &ChatMessage) {
        if !self.active() {
            return;
        }

        let project = project_key(session.workspace_path.as_deref(), Some(&session.workspace_name));
        {
            let mut state = self.state.lock();
            state.context.push_back(ContextItem {
                session_id: session.id.clone(),
                project_path: project.clone(),
                role: message.role,
                content_preview: message.content.chars().take(PREVIEW_CHARS).collect(),
                timestamp: Utc::now(),
            });
            if state.context.len() > MAX_CONTEXT_ITEMS {
                state.context.pop_front();
            }
            if let Some(activity) = state.projects.get_mut(&project) {
                activity.last_activity = Some(Utc::now());
            }
        }

        if message.role == ChatRole::User && contains_error_keywords(&message.content) {
            self.check_for_cross_project_relevance(&project, message).await;
        }
    }

    /// Session ids tracked for a project
    pub fn sessions_for_project(&self, project_path: &str) -> Vec<String> {
        self.state
            .lock()
            .projects
            .get(project_path)
            .map(|p| p.session_ids.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Ask whether a terminal error relates to this project's recent chat.
    ///
    /// Returns `None` without an AI call when nothing is known about the project.
    pub async fn correlate_terminal_error(
        &self,
        error: &TimelineEvent,
        project_path: &str,
    ) -> Option<Correlation> {
        if !self.active() {
            return None;
        }

        let related_sessions = self.sessions_for_project(project_path);
        if related_sessions.is_empty() {
            return None;
        }

        let chat_context = {
            let state = self.state.lock();
            state
                .context
                .iter()
                .filter(|c| c.project_path == project_path)
                .map(|c| format!("[{}]: {}", c.role.as_str(), c.content_preview))
                .collect::<Vec<_>>()
                .join("\n")
        };
        if chat_context.is_empty() {
            return None;
        }

        let field = |name: &str, fallback: &str| {
            error.data[name].as_str().unwrap_or(fallback).to_string()
        };
        let prompt = format!(
            "Terminal Error:\nType: {}\nSummary: {}\n\n\
             Recent Chat Context ({}):\n{}\n\n\
             Is this error related to anything discussed in the chat?",
            field("errorType", "unknown"),
            field("summary", "Unknown error"),
            self.ide.display_name(),
            tail_chars(&chat_context, CHAT_CONTEXT_CHARS),
        );

        let options = ChatOptions {
            system_prompt: Some(
                self.system_prompt
                    .clone()
                    .unwrap_or_else(|| CORRELATION_SYSTEM_PROMPT.to_string()),
            ),
            agent: Some(AgentKind::Ide),
            ..Default::default()
        };

        let response = match self.client.chat(vec![LlmMessage::user(prompt)], options).await {
            Ok(r) => r,
            Err(e) => {
                warn!("Correlation failed for {}: {}", self.ide, e);
                return None;
            }
        };
        if !self.active() {
            return None;
        }

        let parsed = extract_json(&response.content).map(serde_json::from_str::<Correlation>);
        let result = match parsed {
            Some(Ok(r)) => r,
            Some(Err(e)) => {
                warn!("Malformed correlation JSON from {}: {}", self.ide, e);
                return None;
            }
            None => return None,
        };

        let insight = result.insight.clone().filter(|i| !i.is_empty())?;
        if !result.is_related {
            return None;
        }

        self.emit(InsightKind::Correlation {
            project_path: project_path.to_string(),
            related_sessions,
            insight,
            suggestion: result.suggestion.clone(),
            terminal_error: error.data.get("summary").cloned().unwrap_or(Value::Null),
        });
        Some(result)
    }

    /// Look for related discussion in other projects. Rate limited per agent.
    pub async fn check_for_cross_project_relevance(&self, current_project: &str, message: &ChatMessage) {
        if !self.active() {
            return;
        }

        let others = {
            let mut state = self.state.lock();
            if let Some(last) = state.last_analysis {
                if last.elapsed() < self.options.analysis_interval {
                    debug!("Cross-project check for {} rate limited", self.ide);
                    return;
                }
            }

            let others: Vec<ContextItem> = state
                .context
                .iter()
                .filter(|c| c.project_path != current_project)
                .cloned()
                .collect();
            let skip = others.len().saturating_sub(OTHER_PROJECT_WINDOW);
            let others: Vec<ContextItem> = others.into_iter().skip(skip).collect();
            if others.len() < MIN_OTHER_PROJECT_ITEMS {
                return;
            }

            state.last_analysis = Some(Instant::now());
            others
        };

        let discussions = others
            .iter()
            .map(|c| format!("[{}] {}", c.project_path, c.content_preview))
            .collect::<Vec<_>>()
            .join("\n");
        let question: String = message.content.chars().take(QUESTION_CHARS).collect();
        let prompt = format!(
            "Current question in {}:\n{}\n\n\
             Recent discussions in other projects:\n{}\n\n\
             Is there relevant context from another project?",
            current_project, question, discussions
        );

        let options = ChatOptions {
            system_prompt: Some(CROSS_PROJECT_SYSTEM_PROMPT.to_string()),
            agent: Some(AgentKind::Ide),
            ..Default::default()
        };

        let response = match self.client.chat(vec![LlmMessage::user(prompt)], options).await {
            Ok(r) => r,
            Err(e) => {
                warn!("Cross-project check failed for {}: {}", self.ide, e);
                return;
            }
        };
        if !self.active() {
            return;
        }

        let Some(raw) = extract_json(&response.content) else {
            return;
        };
        match serde_json::from_str::<CrossProjectAnswer>(raw) {
            Ok(answer) if answer.has_relevant_context => {
                if let Some(insight) = answer.insight.filter(|i| !i.is_empty()) {
                    self.emit(InsightKind::CrossProject {
                        current_project: current_project.to_string(),
                        relevant_project: answer.relevant_project,
                        insight,
                    });
                }
            }
            Ok(_) => {}
            Err(e) => warn!("Malformed cross-project JSON from {}: {}", self.ide, e),
        }
    }

    pub fn context_window(&self) -> Vec<ContextItem> {
        self.state.lock().context.iter().cloned().collect()
    }

    pub fn summary(&self) -> IdeAgentSummary {
        let state = self.state.lock();
        IdeAgentSummary {
            ide_type: self.ide,
            enabled: self.enabled,
            active_projects: state.projects.len(),
            context_window_size: state.context.len(),
            projects: state
                .projects
                .iter()
                .map(|(path, p)| ProjectSummary {
                    path: path.clone(),
                    session_count: p.session_ids.len(),
                    last_activity: p.last_activity,
                })
                .collect(),
        }
    }

    fn emit(&self, kind: InsightKind) {
        let insight = Insight::new(self.ide, kind);
        info!("Insight {} from {}", insight.id, self.ide);
        let _ = self.insights.send(insight);
    }

    pub fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut state = self.state.lock();
        state.context.clear();
        state.projects.clear();
        info!("IDE agent destroyed for {}", self.ide);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_project_key_fallbacks() {
        assert_eq!(project_key(Some("/a/b"), Some("b")), "/a/b");
        assert_eq!(project_key(Some(""), Some("b")), "b");
        assert_eq!(project_key(None, None), "unknown");
    }
}
