//! AI agents layered over terminal output and IDE chat history
//!
//! - [`TerminalAgent`]: one per live terminal. Buffers output, spots error
//!   bursts and asks the configured model for a structured diagnosis.
//! - [`IdeAgent`]: one per IDE family. Correlates terminal errors with recent
//!   chat discussion, within and across projects.
//! - [`AgentPool`]: owns the terminal agents keyed by terminal id.
//!
//! Agents talk to models only through [`terminalwon_llm_api::LlmClient`] and
//! report through unbounded channels, so producers never block.

pub mod ide_agent;
pub mod patterns;
pub mod pool;
pub mod terminal_agent;

pub use ide_agent::{
    project_key, ContextItem, Correlation, IdeAgent, IdeAgentOptions, IdeAgentSummary,
    ProjectSummary,
};
pub use patterns::{contains_error_keywords, is_error_output};
pub use pool::AgentPool;
pub use terminal_agent::{
    ErrorAnalysis, SuggestionAction, TerminalAgent, TerminalAgentOptions, TerminalAgentStatus,
    TerminalContext,
};
