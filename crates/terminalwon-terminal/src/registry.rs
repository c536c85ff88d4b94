use chrono::Utc;
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::{debug, info, warn};

use terminalwon_types::prefixed_id;

use crate::backend::{BackendType, EventSender, SpawnError, SpawnRequest, TerminalProcess};
use crate::process_backend::PipeProcess;
use crate::pty_backend::{probe_pty_available, PtyProcess};
use crate::session::{TerminalInfo, TerminalStatus};
use crate::{DEFAULT_COLS, DEFAULT_ROWS};

/// How the registry picks its backend and shell
#[derive(Debug, Clone, Default)]
pub struct RegistryConfig {
    /// Force a backend; `None` probes for PTY support once at startup
    pub backend: Option<BackendType>,
    /// Shell to launch; `None` uses the platform default
    pub shell: Option<String>,
}

struct TerminalEntry {
    info: TerminalInfo,
    process: Box<dyn TerminalProcess>,
    close_requested: bool,
}

/// Owns every hub-spawned terminal process.
///
/// Only the registry writes to, resizes or kills a process. Output and exit
/// notifications flow out through the [`EventSender`]; the consumer calls
/// [`SessionRegistry::handle_exit`] when it sees an exit, which is the only
/// place a terminal is removed.
pub struct SessionRegistry {
    terminals: HashMap<String, TerminalEntry>,
    backend: BackendType,
    shell: String,
    events: EventSender,
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("backend", &self.backend)
            .field("shell", &self.shell)
            .field("terminals", &self.terminals.len())
            .finish()
    }
}

impl SessionRegistry {
    pub fn new(config: RegistryConfig, events: EventSender) -> Self {
        let shell = config.shell.unwrap_or_else(default_shell);

        let backend = match config.backend {
            Some(backend) => backend,
            None => {
                if probe_pty_available(&shell) {
                    BackendType::Pty
                } else {
                    warn!("PTY unavailable, falling back to plain processes");
                    BackendType::Process
                }
            }
        };

        info!("Terminal backend: {} (shell {})", backend, shell);

        Self {
            terminals: HashMap::new(),
            backend,
            shell,
            events,
        }
    }

    pub fn backend(&self) -> BackendType {
        self.backend
    }

    pub fn pty_available(&self) -> bool {
        self.backend == BackendType::Pty
    }

    /// Spawn a new terminal. The returned descriptor is already `active`.
    pub fn create(
        &mut self,
        name: Option<String>,
        cwd: Option<String>,
    ) -> Result<TerminalInfo, SpawnError> {
        let id = prefixed_id("pty");
        let cwd = cwd
            .filter(|c| !c.trim().is_empty())
            .map(PathBuf::from)
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("/"));

        if !cwd.is_dir() {
            return Err(SpawnError::MissingCwd(cwd.display().to_string()));
        }

        let now = Utc::now();
        let mut info = TerminalInfo {
            id: id.clone(),
            name: name
                .filter(|n| !n.trim().is_empty())
                .unwrap_or_else(|| format!("Terminal {}", self.terminals.len() + 1)),
            cwd: cwd.display().to_string(),
            shell: self.shell.clone(),
            pid: None,
            status: TerminalStatus::Creating,
            is_pty: self.backend == BackendType::Pty,
            cols: DEFAULT_COLS,
            rows: DEFAULT_ROWS,
            tool: self.backend.tool_name().to_string(),
            streaming: true,
            created_at: now,
            last_activity: now,
        };

        let request = SpawnRequest {
            shell: self.shell.clone(),
            cwd,
            cols: DEFAULT_COLS,
            rows: DEFAULT_ROWS,
        };

        let process: Box<dyn TerminalProcess> = match self.backend {
            BackendType::Pty => Box::new(PtyProcess::spawn(&id, &request, self.events.clone())?),
            BackendType::Process => {
                Box::new(PipeProcess::spawn(&id, &request, self.events.clone())?)
            }
        };

        info.pid = process.pid();
        info.advance(TerminalStatus::Active);

        info!(
            "Created terminal {} ({}, pid {:?}) in {}",
            id,
            process.backend_name(),
            info.pid,
            info.cwd
        );

        self.terminals.insert(
            id,
            TerminalEntry {
                info: info.clone(),
                process,
                close_requested: false,
            },
        );

        Ok(info)
    }

    /// Write raw input. False if the terminal is unknown or not writable.
    pub fn write(&mut self, id: &str, data: &str) -> bool {
        match self.terminals.get_mut(id) {
            Some(entry) if entry.info.status == TerminalStatus::Active => {
                let written = entry.process.write(data);
                if written {
                    entry.info.touch();
                }
                written
            }
            _ => false,
        }
    }

    /// Resize a terminal. Always false for plain-process terminals.
    pub fn resize(&mut self, id: &str, cols: u16, rows: u16) -> bool {
        let Some(entry) = self.terminals.get_mut(id) else {
            return false;
        };
        if !entry.process.resize(cols, rows) {
            return false;
        }
        entry.info.cols = cols;
        entry.info.rows = rows;
        true
    }

    /// Request termination. The terminal stays registered until its exit
    /// event is handled. Returns true only for the first request.
    pub fn close(&mut self, id: &str) -> bool {
        match self.terminals.get_mut(id) {
            Some(entry) if !entry.close_requested => {
                entry.close_requested = true;
                entry.process.kill();
                info!("Close requested for terminal {}", id);
                true
            }
            _ => false,
        }
    }

    /// Record process exit: marks the terminal closed and removes it
    pub fn handle_exit(&mut self, id: &str) -> Option<TerminalInfo> {
        let mut entry = self.terminals.remove(id)?;
        entry.info.advance(TerminalStatus::Closed);
        Some(entry.info)
    }

    /// Update last activity after output
    pub fn touch(&mut self, id: &str) -> bool {
        match self.terminals.get_mut(id) {
            Some(entry) => {
                entry.info.touch();
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: &str) -> Option<&TerminalInfo> {
        self.terminals.get(id).map(|entry| &entry.info)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.terminals.contains_key(id)
    }

    /// All live terminals, oldest first
    pub fn list(&self) -> Vec<TerminalInfo> {
        let mut infos: Vec<TerminalInfo> =
            self.terminals.values().map(|entry| entry.info.clone()).collect();
        infos.sort_by_key(|info| info.created_at);
        infos
    }

    pub fn len(&self) -> usize {
        self.terminals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terminals.is_empty()
    }

    /// Kill every terminal and forget it; exit events that arrive later are ignored
    pub fn shutdown(&mut self) {
        for (id, mut entry) in self.terminals.drain() {
            if !entry.close_requested {
                entry.process.kill();
            }
            debug!("Terminal {} terminated at shutdown", id);
        }
    }
}

/// `$SHELL`, else `/bin/zsh`; `%COMSPEC%` or `cmd.exe` on Windows
pub fn default_shell() -> String {
    if cfg!(windows) {
        std::env::var("COMSPEC").unwrap_or_else(|_| "cmd.exe".to_string())
    } else {
        std::env::var("SHELL")
            .ok()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "/bin/zsh".to_string())
    }
}
