use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

use terminalwon_terminal::BackendType;

/// CLI arguments for the hub
#[derive(Parser, Debug, Clone)]
#[command(name = "terminalwon-hub")]
#[command(about = "TerminalWON Hub - share terminals and IDE chat history over WebSocket")]
#[command(version = terminalwon_types::SERVER_VERSION)]
pub struct Cli {
    /// Port to listen on (tunnels expose the same port)
    #[arg(long, default_value_t = terminalwon_types::DEFAULT_PORT, env = "PORT")]
    pub port: u16,

    /// Bind address
    #[arg(long, default_value = "0.0.0.0")]
    pub host: String,

    /// Configuration file (default: ~/.terminalwon/config.json)
    #[arg(long, value_name = "PATH", env = "TERMINALWON_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log level used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Write every AI request/response pair to ~/.terminalwon/logs
    #[arg(long, action = clap::ArgAction::SetTrue, env = "TERMINALWON_LOG_REQUESTS")]
    pub log_requests: bool,

    /// Do not read or watch IDE chat history
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub no_chat_history: bool,

    /// Shell launched for new terminals (default: $SHELL)
    #[arg(long, value_name = "PATH")]
    pub shell: Option<String>,

    /// Terminal backend: pty or process (default: probe for PTY support)
    #[arg(long, value_name = "BACKEND", env = "TERMINALWON_TERMINAL_BACKEND")]
    pub backend: Option<String>,
}

impl Cli {
    /// Backend forced on the command line, if any
    pub fn backend_type(&self) -> Result<Option<BackendType>> {
        self.backend.as_deref().map(str::parse).transpose()
    }
}
