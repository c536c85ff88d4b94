/// Plain child process with piped stdio, used when PTYs are unavailable
use std::process::Stdio;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::backend::{EventSender, ProcessEvent, SpawnError, SpawnRequest, TerminalEvent, TerminalProcess};
use crate::{OUTPUT_DRAIN_TIMEOUT, TERM_PROGRAM};

pub struct PipeProcess {
    stdin_tx: mpsc::UnboundedSender<Vec<u8>>,
    kill_tx: Option<oneshot::Sender<()>>,
    pid: Option<u32>,
}

impl PipeProcess {
    /// Spawn `request.shell` with piped stdin/stdout/stderr.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(
        terminal_id: &str,
        request: &SpawnRequest,
        events: EventSender,
    ) -> Result<Self, SpawnError> {
        let mut command = Command::new(&request.shell);
        command
            .current_dir(&request.cwd)
            .env("PS1", "$ ")
            .env("TERM_PROGRAM", TERM_PROGRAM)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|source| SpawnError::Io {
            shell: request.shell.clone(),
            source,
        })?;

        let pid = child.id();

        let stdout_task = child
            .stdout
            .take()
            .map(|stdout| spawn_reader(terminal_id.to_string(), stdout, events.clone()));
        let stderr_task = child
            .stderr
            .take()
            .map(|stderr| spawn_reader(terminal_id.to_string(), stderr, events.clone()));

        let (stdin_tx, mut stdin_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        if let Some(mut stdin) = child.stdin.take() {
            tokio::spawn(async move {
                while let Some(bytes) = stdin_rx.recv().await {
                    if stdin.write_all(&bytes).await.is_err() || stdin.flush().await.is_err() {
                        break;
                    }
                }
            });
        }

        let (kill_tx, kill_rx) = oneshot::channel();
        let id = terminal_id.to_string();
        tokio::spawn(async move {
            let (code, signal) = wait_for_exit(&mut child, pid, kill_rx).await;

            // Drain remaining output before announcing the exit
            for mut task in [stdout_task, stderr_task].into_iter().flatten() {
                if timeout(OUTPUT_DRAIN_TIMEOUT, &mut task).await.is_err() {
                    debug!("Output of {} still open after exit, detaching reader", id);
                    task.abort();
                }
            }

            let _ = events.send(TerminalEvent {
                terminal_id: id,
                event: ProcessEvent::Exit { code, signal },
            });
        });

        Ok(Self {
            stdin_tx,
            kill_tx: Some(kill_tx),
            pid,
        })
    }
}

fn spawn_reader<R>(terminal_id: String, mut stream: R, events: EventSender) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buffer = vec![0u8; 4096];
        loop {
            match stream.read(&mut buffer).await {
                Ok(0) => break,
                Ok(n) => {
                    let data = String::from_utf8_lossy(&buffer[..n]).to_string();
                    let event = TerminalEvent {
                        terminal_id: terminal_id.clone(),
                        event: ProcessEvent::Data(data),
                    };
                    if events.send(event).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    debug!("Pipe read for {} ended: {}", terminal_id, e);
                    break;
                }
            }
        }
    })
}

async fn wait_for_exit(
    child: &mut Child,
    pid: Option<u32>,
    kill_rx: oneshot::Receiver<()>,
) -> (Option<i32>, Option<String>) {
    let status = tokio::select! {
        status = child.wait() => status,
        // A dropped handle counts as a kill request
        _ = kill_rx => {
            terminate(child, pid);
            child.wait().await
        }
    };

    match status {
        Ok(status) => (status.code(), exit_signal(&status)),
        Err(e) => {
            warn!("Failed to wait for child process: {}", e);
            (None, None)
        }
    }
}

fn terminate(child: &mut Child, pid: Option<u32>) {
    #[cfg(unix)]
    if let Some(pid) = pid {
        if crate::backend::send_sigterm(pid) {
            return;
        }
    }
    #[cfg(not(unix))]
    let _ = pid;

    if let Err(e) = child.start_kill() {
        warn!("Failed to kill child process: {}", e);
    }
}

#[cfg(unix)]
fn exit_signal(status: &std::process::ExitStatus) -> Option<String> {
    use std::os::unix::process::ExitStatusExt;
    status.signal().map(crate::backend::signal_name)
}

#[cfg(not(unix))]
fn exit_signal(_status: &std::process::ExitStatus) -> Option<String> {
    None
}

impl TerminalProcess for PipeProcess {
    fn write(&mut self, data: &str) -> bool {
        self.stdin_tx.send(data.as_bytes().to_vec()).is_ok()
    }

    fn resize(&mut self, _cols: u16, _rows: u16) -> bool {
        // Pipes have no window size
        false
    }

    fn kill(&mut self) {
        if let Some(tx) = self.kill_tx.take() {
            let _ = tx.send(());
        }
    }

    fn pid(&self) -> Option<u32> {
        self.pid
    }

    fn is_pty(&self) -> bool {
        false
    }

    fn backend_name(&self) -> &'static str {
        "process"
    }
}
