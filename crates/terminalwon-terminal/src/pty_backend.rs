/// PTY-based terminal process (portable-pty)
use portable_pty::{native_pty_system, ChildKiller, CommandBuilder, MasterPty, PtySize};
use std::io::{Read, Write};
use std::sync::mpsc as std_mpsc;
use std::thread;
use tracing::{debug, warn};

use crate::backend::{EventSender, ProcessEvent, SpawnError, SpawnRequest, TerminalEvent, TerminalProcess};
use crate::{OUTPUT_DRAIN_TIMEOUT, TERM_PROGRAM};

pub struct PtyProcess {
    master: Box<dyn MasterPty + Send>,
    writer: Box<dyn Write + Send>,
    killer: Box<dyn ChildKiller + Send + Sync>,
    pid: Option<u32>,
}

impl PtyProcess {
    /// Spawn `request.shell` inside a fresh PTY.
    ///
    /// A reader thread forwards output as [`ProcessEvent::Data`]. A waiter
    /// thread sends the single [`ProcessEvent::Exit`] once the child exits and
    /// the reader has hit EOF or [`OUTPUT_DRAIN_TIMEOUT`] has passed.
    pub fn spawn(
        terminal_id: &str,
        request: &SpawnRequest,
        events: EventSender,
    ) -> Result<Self, SpawnError> {
        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows: request.rows,
                cols: request.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| SpawnError::Pty(e.to_string()))?;

        let mut cmd = CommandBuilder::new(&request.shell);
        cmd.cwd(&request.cwd);
        cmd.env("TERM", "xterm-256color");
        cmd.env("TERM_PROGRAM", TERM_PROGRAM);

        let mut child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| SpawnError::Pty(format!("Failed to spawn '{}': {}", request.shell, e)))?;

        // The slave end belongs to the child now; keeping it open here would
        // hide EOF from the reader.
        drop(pair.slave);

        let mut reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| SpawnError::Pty(format!("Failed to clone PTY reader: {}", e)))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| SpawnError::Pty(format!("Failed to take PTY writer: {}", e)))?;

        let killer = child.clone_killer();
        let pid = child.process_id();
        let id = terminal_id.to_string();

        let (drained_tx, drained_rx) = std_mpsc::channel::<()>();
        let reader_events = events.clone();
        let reader_id = id.clone();
        thread::spawn(move || {
            let mut buffer = vec![0u8; 4096];

            loop {
                match reader.read(&mut buffer) {
                    Ok(0) => break,
                    Ok(n) => {
                        let data = String::from_utf8_lossy(&buffer[..n]).to_string();
                        let event = TerminalEvent {
                            terminal_id: reader_id.clone(),
                            event: ProcessEvent::Data(data),
                        };
                        if reader_events.send(event).is_err() {
                            // Nobody is listening anymore
                            break;
                        }
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        // EIO on Linux once the child side is gone
                        debug!("PTY read for {} ended: {}", reader_id, e);
                        break;
                    }
                }
            }
            let _ = drained_tx.send(());
        });

        thread::spawn(move || {
            let code = match child.wait() {
                Ok(status) => Some(status.exit_code() as i32),
                Err(e) => {
                    warn!("Failed to wait for PTY child of {}: {}", id, e);
                    None
                }
            };

            // A background job may keep the slave open; stop waiting for EOF
            if drained_rx.recv_timeout(OUTPUT_DRAIN_TIMEOUT).is_err() {
                debug!("PTY output of {} still open after exit", id);
            }

            let _ = events.send(TerminalEvent {
                terminal_id: id,
                event: ProcessEvent::Exit { code, signal: None },
            });
        });

        Ok(Self {
            master: pair.master,
            writer,
            killer,
            pid,
        })
    }
}

impl TerminalProcess for PtyProcess {
    fn write(&mut self, data: &str) -> bool {
        match self
            .writer
            .write_all(data.as_bytes())
            .and_then(|_| self.writer.flush())
        {
            Ok(()) => true,
            Err(e) => {
                debug!("PTY write failed: {}", e);
                false
            }
        }
    }

    fn resize(&mut self, cols: u16, rows: u16) -> bool {
        self.master
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .is_ok()
    }

    fn kill(&mut self) {
        #[cfg(unix)]
        if let Some(pid) = self.pid {
            if crate::backend::send_sigterm(pid) {
                return;
            }
        }

        if let Err(e) = self.killer.kill() {
            warn!("Failed to kill PTY child: {}", e);
        }
    }

    fn pid(&self) -> Option<u32> {
        self.pid
    }

    fn is_pty(&self) -> bool {
        true
    }

    fn backend_name(&self) -> &'static str {
        "pty"
    }
}

/// Check once whether PTYs work on this host by spawning and killing a shell
pub fn probe_pty_available(shell: &str) -> bool {
    let pty_system = native_pty_system();
    let pair = match pty_system.openpty(PtySize {
        rows: 24,
        cols: 80,
        pixel_width: 0,
        pixel_height: 0,
    }) {
        Ok(pair) => pair,
        Err(e) => {
            warn!("PTY not available: {}", e);
            return false;
        }
    };

    match pair.slave.spawn_command(CommandBuilder::new(shell)) {
        Ok(mut child) => {
            let _ = child.kill();
            let _ = child.wait();
            true
        }
        Err(e) => {
            warn!("PTY spawn probe failed: {}", e);
            false
        }
    }
}
