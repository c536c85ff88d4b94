/// Process backend abstraction for PTY and plain-process implementations
use std::path::PathBuf;
use tokio::sync::mpsc;

/// Something that happened on a terminal's process
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessEvent {
    /// A chunk of output, decoded lossily as UTF-8
    Data(String),
    /// The process exited; no further events follow for this terminal
    Exit {
        code: Option<i32>,
        signal: Option<String>,
    },
}

/// A process event tagged with the terminal it belongs to
#[derive(Debug, Clone, PartialEq)]
pub struct TerminalEvent {
    pub terminal_id: String,
    pub event: ProcessEvent,
}

pub type EventSender = mpsc::UnboundedSender<TerminalEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<TerminalEvent>;

/// Parameters for spawning a terminal process
#[derive(Debug, Clone)]
pub struct SpawnRequest {
    pub shell: String,
    pub cwd: PathBuf,
    pub cols: u16,
    pub rows: u16,
}

#[derive(Debug, thiserror::Error)]
pub enum SpawnError {
    #[error("Failed to open PTY: {0}")]
    Pty(String),
    #[error("Failed to spawn '{shell}': {source}")]
    Io {
        shell: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Working directory does not exist: {0}")]
    MissingCwd(String),
}

/// Uniform handle over a running terminal process.
///
/// Output and exit are delivered through the [`EventSender`] handed to the
/// backend at spawn time, never through this handle.
pub trait TerminalProcess: Send {
    /// Write raw input. Returns false if the process no longer accepts input.
    fn write(&mut self, data: &str) -> bool;

    /// Resize the terminal. Backends without a TTY return false.
    fn resize(&mut self, cols: u16, rows: u16) -> bool;

    /// Ask the process to terminate (SIGTERM on unix)
    fn kill(&mut self);

    fn pid(&self) -> Option<u32>;

    fn is_pty(&self) -> bool;

    /// Get backend name for debugging
    fn backend_name(&self) -> &'static str;
}

/// Which backend new terminals are spawned with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendType {
    /// Pseudo-terminal via portable-pty (default)
    #[default]
    Pty,
    /// Plain child process with piped stdio
    Process,
}

impl BackendType {
    /// Tool label clients see on terminal descriptors
    pub fn tool_name(&self) -> &'static str {
        match self {
            Self::Pty => "hub-pty",
            Self::Process => "hub-shell",
        }
    }
}

impl std::str::FromStr for BackendType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.to_lowercase().as_str() {
            "pty" => Ok(Self::Pty),
            "process" | "shell" | "pipe" => Ok(Self::Process),
            _ => Err(anyhow::anyhow!(
                "Invalid terminal backend: '{}'. Valid options: 'pty', 'process'",
                s
            )),
        }
    }
}

impl std::fmt::Display for BackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pty => write!(f, "pty"),
            Self::Process => write!(f, "process"),
        }
    }
}

/// Conventional name for a unix signal number
pub fn signal_name(signal: i32) -> String {
    match signal {
        1 => "SIGHUP".to_string(),
        2 => "SIGINT".to_string(),
        3 => "SIGQUIT".to_string(),
        6 => "SIGABRT".to_string(),
        9 => "SIGKILL".to_string(),
        11 => "SIGSEGV".to_string(),
        13 => "SIGPIPE".to_string(),
        15 => "SIGTERM".to_string(),
        n => format!("SIG{}", n),
    }
}

/// Send SIGTERM to a process id. Returns false when the signal could not be sent.
#[cfg(unix)]
pub fn send_sigterm(pid: u32) -> bool {
    let Ok(pid) = i32::try_from(pid) else {
        return false;
    };
    // SAFETY: kill(2) has no memory-safety preconditions
    unsafe { libc::kill(pid, libc::SIGTERM) == 0 }
}
