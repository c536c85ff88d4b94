//! TerminalWON Hub
//!
//! WebSocket hub that shares terminal sessions, IDE chat history and agent
//! insights between connected clients.

// Re-export workspace crates
pub use terminalwon_agents as agents;
pub use terminalwon_chat as chat;
pub use terminalwon_config as config;
pub use terminalwon_llm_api as llm_api;
pub use terminalwon_terminal as terminal;
pub use terminalwon_types as types;

pub mod app;
pub mod auth;
pub mod bus;
pub mod cli;
pub mod hub;
pub mod tunnel;
pub mod web;

pub use app::run;
pub use auth::{AuthManager, AuthMode, Identity};
pub use bus::{SubscribeError, SubscriptionBus};
pub use cli::Cli;
pub use hub::{Hub, HubOptions};
pub use tunnel::{TunnelManager, TunnelOutcome, TunnelStatus};
pub use web::{WebServer, WebServerConfig};
