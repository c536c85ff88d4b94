use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use terminalwon_config::AgentConfig;
use terminalwon_llm_api::{ChatMessage, ChatOptions, LlmClient};
use terminalwon_logging::tail_chars;
use terminalwon_types::{AgentKind, TimelineEvent, TimelineEventType};

use crate::patterns::{detect_commands, extract_json, is_error_output};

/// Characters of output kept per terminal
pub const BUFFER_MAX_CHARS: usize = 8000;
/// Characters of the buffer sent with each analysis
pub const PROMPT_OUTPUT_CHARS: usize = 4000;
pub const MAX_RECENT_COMMANDS: usize = 10;
/// Minimum confidence for an `error_detected` event
pub const CONFIDENCE_THRESHOLD: f64 = 0.6;

pub const DEFAULT_SYSTEM_PROMPT: &str = r#"You are a terminal error analyzer. Analyze the terminal output and identify errors.
Respond in JSON format:
{
  "hasError": boolean,
  "errorType": "string or null",
  "errorSummary": "brief summary or null",
  "explanation": "detailed explanation or null",
  "confidence": 0.0-1.0,
  "suggestedCommands": ["array of fix commands"] or null
}
Only respond with valid JSON."#;

const NO_RECENT_ERROR: &str = "No recent errors to explain.";
const NO_EXPLANATION: &str = "Unable to generate explanation.";

/// Timing knobs for the analysis pipeline
#[derive(Debug, Clone, Copy)]
pub struct TerminalAgentOptions {
    /// Quiet period after the last error hit before analysing
    pub debounce: Duration,
    /// Hard minimum spacing between AI calls
    pub min_interval: Duration,
}

impl Default for TerminalAgentOptions {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(2000),
            min_interval: Duration::from_millis(5000),
        }
    }
}

/// What the agent knows about its terminal
#[derive(Debug, Clone, Default)]
pub struct TerminalContext {
    pub cwd: Option<String>,
    pub shell: Option<String>,
    pub tool: Option<String>,
}

/// Structured answer expected from the model
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ErrorAnalysis {
    pub has_error: bool,
    pub error_type: Option<String>,
    pub error_summary: Option<String>,
    pub explanation: Option<String>,
    pub confidence: f64,
    pub suggested_commands: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminalAgentStatus {
    pub terminal_id: String,
    pub enabled: bool,
    pub buffer_size: usize,
    pub recent_commands: Vec<String>,
    pub busy: bool,
}

/// Command execution request returned by `apply_suggestion`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SuggestionAction {
    pub action: &'static str,
    pub terminal_id: String,
    pub command: String,
}

#[derive(Default)]
struct AgentState {
    buffer: String,
    recent_commands: VecDeque<String>,
    debounce: Option<JoinHandle<()>>,
    last_analysis: Option<Instant>,
    busy: bool,
    last_error: Option<ErrorAnalysis>,
}

struct Inner {
    terminal_id: String,
    context: TerminalContext,
    enabled: bool,
    system_prompt: String,
    options: TerminalAgentOptions,
    client: Arc<dyn LlmClient>,
    events: UnboundedSender<TimelineEvent>,
    state: Mutex<AgentState>,
    destroyed: AtomicBool,
}

/// Watches one terminal's output and turns rare error bursts into timeline events.
///
/// Output is buffered and matched against the error patterns; a hit (re)starts
/// the debounce timer. When the timer fires the analysis only runs if no other
/// analysis is in flight and `min_interval` has passed since the previous one;
/// otherwise it is dropped.
#[derive(Clone)]
pub struct TerminalAgent {
    inner: Arc<Inner>,
}

impl TerminalAgent {
    pub fn new(
        terminal_id: impl Into<String>,
        context: TerminalContext,
        config: &AgentConfig,
        client: Arc<dyn LlmClient>,
        events: UnboundedSender<TimelineEvent>,
    ) -> Self {
        Self::with_options(
            terminal_id,
            context,
            config,
            client,
            events,
            TerminalAgentOptions::default(),
        )
    }

    pub fn with_options(
        terminal_id: impl Into<String>,
        context: TerminalContext,
        config: &AgentConfig,
        client: Arc<dyn LlmClient>,
        events: UnboundedSender<TimelineEvent>,
        options: TerminalAgentOptions,
    ) -> Self {
        let terminal_id = terminal_id.into();
        if config.enabled {
            info!("Terminal agent created for {} (provider: {})", terminal_id, config.provider);
        } else {
            info!("Terminal agent disabled for {}", terminal_id);
        }

        Self {
            inner: Arc::new(Inner {
                terminal_id,
                context,
                enabled: config.enabled,
                system_prompt: config
                    .system_prompt
                    .clone()
                    .filter(|p| !p.is_empty())
                    .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
                options,
                client,
                events,
                state: Mutex::new(AgentState::default()),
                destroyed: AtomicBool::new(false),
            }),
        }
    }

    pub fn terminal_id(&self) -> &str {
        &self.inner.terminal_id
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.enabled
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.load(Ordering::SeqCst)
    }

    /// Feed a chunk of terminal output
    pub fn process_output(&self, chunk: &str) {
        if self.is_destroyed() {
            return;
        }

        let schedule = {
            let mut state = self.inner.state.lock();
            state.buffer.push_str(chunk);
            if state.buffer.len() > BUFFER_MAX_CHARS {
                let kept = tail_chars(&state.buffer, BUFFER_MAX_CHARS).to_string();
                state.buffer = kept;
            }

            for command in detect_commands(chunk) {
                state.recent_commands.push_back(command);
                if state.recent_commands.len() > MAX_RECENT_COMMANDS {
                    state.recent_commands.pop_front();
                }
            }

            self.inner.enabled && is_error_output(chunk)
        };

        if schedule {
            self.schedule_analysis();
        }
    }

    /// Restart the quiet-period timer
    fn schedule_analysis(&self) {
        let inner = self.inner.clone();
        let debounce = self.inner.options.debounce;

        let mut state = self.inner.state.lock();
        if let Some(previous) = state.debounce.take() {
            previous.abort();
        }
        // The timer task only sleeps; the analysis runs detached so a later
        // reset can never cancel an in-flight AI call.
        state.debounce = Some(tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            tokio::spawn(inner.analyze(false));
        }));
    }

    /// Re-run analysis now and return the latest explanation.
    ///
    /// Skips the debounce and spacing checks but not the busy flag.
    pub async fn request_explanation(&self) -> String {
        if self.inner.state.lock().last_error.is_none() {
            return NO_RECENT_ERROR.to_string();
        }

        self.inner.clone().analyze(true).await;

        let state = self.inner.state.lock();
        match &state.last_error {
            Some(analysis) => analysis
                .explanation
                .clone()
                .filter(|e| !e.is_empty())
                .unwrap_or_else(|| NO_EXPLANATION.to_string()),
            None => NO_RECENT_ERROR.to_string(),
        }
    }

    /// Record that the user applied a suggested command
    pub fn apply_suggestion(&self, command: &str) -> SuggestionAction {
        self.inner.emit(
            TimelineEventType::ActionTaken,
            json!({"action": "apply_command", "command": command}),
        );

        SuggestionAction {
            action: "execute",
            terminal_id: self.inner.terminal_id.clone(),
            command: command.to_string(),
        }
    }

    pub fn clear_buffer(&self) {
        let mut state = self.inner.state.lock();
        state.buffer.clear();
        state.last_error = None;
    }

    pub fn last_error(&self) -> Option<ErrorAnalysis> {
        self.inner.state.lock().last_error.clone()
    }

    pub fn status(&self) -> TerminalAgentStatus {
        let state = self.inner.state.lock();
        TerminalAgentStatus {
            terminal_id: self.inner.terminal_id.clone(),
            enabled: self.inner.enabled,
            buffer_size: state.buffer.chars().count(),
            recent_commands: state.recent_commands.iter().cloned().collect(),
            busy: state.busy,
        }
    }

    /// Stop the agent. Returns false if it was already destroyed.
    ///
    /// Pending timers are cancelled and results of in-flight calls discarded.
    pub fn destroy(&self) -> bool {
        if self.inner.destroyed.swap(true, Ordering::SeqCst) {
            return false;
        }
        if let Some(timer) = self.inner.state.lock().debounce.take() {
            timer.abort();
        }
        info!("Terminal agent destroyed for {}", self.inner.terminal_id);
        true
    }
}

impl Inner {
    fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    async fn analyze(self: Arc<Self>, explicit: bool) {
        let prompt = {
            let mut state = self.state.lock();
            if self.is_destroyed() || !self.enabled || state.busy {
                return;
            }
            if !explicit {
                if let Some(last) = state.last_analysis {
                    if last.elapsed() < self.options.min_interval {
                        debug!("Skipping analysis for {} (rate limited)", self.terminal_id);
                        return;
                    }
                }
            }
            state.busy = true;
            state.last_analysis = Some(Instant::now());
            self.build_prompt(&state)
        };

        debug!("Analyzing terminal {}", self.terminal_id);
        let options = ChatOptions {
            system_prompt: Some(self.system_prompt.clone()),
            agent: Some(AgentKind::Terminal),
            ..Default::default()
        };
        let result = self.client.chat(vec![ChatMessage::user(prompt)], options).await;
        self.state.lock().busy = false;

        if self.is_destroyed() {
            debug!("Discarding analysis for destroyed terminal {}", self.terminal_id);
            return;
        }

        match result {
            Ok(response) => self.handle_response(&response.content),
            Err(e) => warn!("Analysis failed for {}: {}", self.terminal_id, e),
        }
    }

    fn build_prompt(&self, state: &AgentState) -> String {
        let or_unknown = |v: &Option<String>| v.clone().unwrap_or_else(|| "unknown".to_string());
        let commands = if state.recent_commands.is_empty() {
            "none".to_string()
        } else {
            state.recent_commands.iter().cloned().collect::<Vec<_>>().join(", ")
        };

        format!(
            "Terminal Context:\n\
             - Working Directory: {}\n\
             - Shell: {}\n\
             - Tool: {}\n\
             - Recent Commands: {}\n\n\
             Terminal Output (last {} chars):\n{}\n\n\
             Analyze this output for errors.",
            or_unknown(&self.context.cwd),
            or_unknown(&self.context.shell),
            or_unknown(&self.context.tool),
            commands,
            state.buffer.chars().count(),
            tail_chars(&state.buffer, PROMPT_OUTPUT_CHARS),
        )
    }

    fn handle_response(&self, content: &str) {
        let Some(raw) = extract_json(content) else {
            warn!("Could not find JSON in analysis for {}", self.terminal_id);
            return;
        };
        let analysis: ErrorAnalysis = match serde_json::from_str(raw) {
            Ok(a) => a,
            Err(e) => {
                warn!("Malformed analysis JSON for {}: {}", self.terminal_id, e);
                return;
            }
        };

        if !(analysis.has_error && analysis.confidence > CONFIDENCE_THRESHOLD) {
            return;
        }

        self.emit(
            TimelineEventType::ErrorDetected,
            json!({
                "errorType": analysis.error_type,
                "summary": analysis.error_summary,
                "explanation": analysis.explanation,
                "confidence": analysis.confidence,
            }),
        );

        if let Some(commands) = analysis.suggested_commands.as_ref().filter(|c| !c.is_empty()) {
            self.emit(
                TimelineEventType::CommandSuggested,
                json!({"commands": commands, "context": analysis.error_summary}),
            );
        }

        self.state.lock().last_error = Some(analysis);
    }

    fn emit(&self, event_type: TimelineEventType, data: serde_json::Value) {
        let event = TimelineEvent::new(event_type, self.terminal_id.clone(), data);
        debug!("Timeline event {:?} for {}", event_type, self.terminal_id);
        // Receiver gone means the hub is shutting down
        let _ = self.events.send(event);
    }
}
