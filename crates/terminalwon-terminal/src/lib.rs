// Terminal process lifecycle module
//
// This module spawns and owns the hub's terminal processes. A PTY backend is
// used when the host supports it, otherwise a plain child process with piped
// stdio; callers only see the `SessionRegistry` and `TerminalProcess` surface.

pub mod backend;
mod process_backend;
mod pty_backend;
mod registry;
mod session;

// Re-export public API
pub use backend::{
    BackendType, EventReceiver, EventSender, ProcessEvent, SpawnError, SpawnRequest,
    TerminalEvent, TerminalProcess,
};
pub use process_backend::PipeProcess;
pub use pty_backend::{probe_pty_available, PtyProcess};
pub use registry::{default_shell, RegistryConfig, SessionRegistry};
pub use session::{TerminalInfo, TerminalStatus};

// Constants
pub const DEFAULT_COLS: u16 = 120;
pub const DEFAULT_ROWS: u16 = 30;
pub const TERM_PROGRAM: &str = "TerminalWON";

/// How long output readers may keep draining once the shell has exited.
/// Background jobs can hold the stream open indefinitely.
pub const OUTPUT_DRAIN_TIMEOUT: std::time::Duration = std::time::Duration::from_millis(250);
