//! Public URL for the hub through an installed tunnel tool

use parking_lot::Mutex;
use regex::Regex;
use serde::Serialize;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use terminalwon_logging::tail_chars;

/// How long to wait for the tool to print its public URL
pub const URL_DETECT_TIMEOUT: Duration = Duration::from_secs(15);
/// Grace period between SIGTERM and a hard kill
const STOP_GRACE: Duration = Duration::from_secs(5);
/// Output kept while looking for the URL
const OUTPUT_BUFFER_CHARS: usize = 16 * 1024;

/// A tunnel CLI the manager knows how to drive
#[derive(Debug, Clone)]
pub struct TunnelTool {
    pub id: &'static str,
    pub display_name: &'static str,
    pub command: &'static str,
    pub args: fn(u16) -> Vec<String>,
    /// Matches the public URL in the tool's output
    pub url_pattern: &'static str,
    pub install_hint: &'static str,
}

fn ngrok_args(port: u16) -> Vec<String> {
    vec!["http".into(), port.to_string()]
}

fn cloudflared_args(port: u16) -> Vec<String> {
    vec!["tunnel".into(), "--url".into(), format!("http://localhost:{}", port)]
}

fn localtunnel_args(port: u16) -> Vec<String> {
    vec!["--port".into(), port.to_string()]
}

fn bore_args(port: u16) -> Vec<String> {
    vec!["local".into(), port.to_string(), "--to".into(), "bore.pub".into()]
}

pub static TUNNEL_TOOLS: [TunnelTool; 4] = [
    TunnelTool {
        id: "ngrok",
        display_name: "ngrok",
        command: "ngrok",
        args: ngrok_args,
        url_pattern: r"https?://[a-zA-Z0-9-]+\.ngrok(-free)?\.app",
        install_hint: "brew install ngrok/ngrok/ngrok",
    },
    TunnelTool {
        id: "cloudflared",
        display_name: "Cloudflare Tunnel",
        command: "cloudflared",
        args: cloudflared_args,
        url_pattern: r"https?://[a-zA-Z0-9-]+\.trycloudflare\.com",
        install_hint: "brew install cloudflared",
    },
    TunnelTool {
        id: "localtunnel",
        display_name: "localtunnel",
        command: "lt",
        args: localtunnel_args,
        url_pattern: r"https?://[a-zA-Z0-9-]+\.loca\.lt",
        install_hint: "npm install -g localtunnel",
    },
    TunnelTool {
        id: "bore",
        display_name: "bore.pub",
        command: "bore",
        args: bore_args,
        url_pattern: r"bore\.pub:\d+",
        install_hint: "brew install ekzhang/bore/bore",
    },
];

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolAvailability {
    pub id: &'static str,
    pub display_name: &'static str,
    pub command: &'static str,
    pub installed: bool,
    pub install_hint: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TunnelPhase {
    Stopped,
    Starting,
    Running,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TunnelStatus {
    pub status: TunnelPhase,
    pub provider: Option<String>,
    pub url: Option<String>,
    pub is_running: bool,
    pub last_error: Option<String>,
    pub port: u16,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TunnelOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl TunnelOutcome {
    fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }

    fn message(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            ..Default::default()
        }
    }
}

struct TunnelState {
    phase: TunnelPhase,
    provider: Option<String>,
    url: Option<String>,
    last_error: Option<String>,
    stop: Option<CancellationToken>,
}

/// Runs at most one tunnel child process at a time
pub struct TunnelManager {
    port: u16,
    tools: Vec<TunnelTool>,
    url_timeout: Duration,
    state: Arc<Mutex<TunnelState>>,
}

impl TunnelManager {
    pub fn new(port: u16) -> Self {
        Self::with_tools(port, TUNNEL_TOOLS.to_vec())
    }

    pub fn with_tools(port: u16, tools: Vec<TunnelTool>) -> Self {
        Self {
            port,
            tools,
            url_timeout: URL_DETECT_TIMEOUT,
            state: Arc::new(Mutex::new(TunnelState {
                phase: TunnelPhase::Stopped,
                provider: None,
                url: None,
                last_error: None,
                stop: None,
            })),
        }
    }

    pub fn with_url_timeout(mut self, timeout: Duration) -> Self {
        self.url_timeout = timeout;
        self
    }

    /// Look up a tool by id; `cloudflare` is accepted for `cloudflared`
    pub fn tool(&self, id: &str) -> Option<&TunnelTool> {
        let id = if id == "cloudflare" { "cloudflared" } else { id };
        self.tools.iter().find(|t| t.id == id)
    }

    pub async fn detect_installed_tools(&self) -> Vec<ToolAvailability> {
        let mut tools = Vec::with_capacity(self.tools.len());
        for tool in &self.tools {
            tools.push(ToolAvailability {
                id: tool.id,
                display_name: tool.display_name,
                command: tool.command,
                installed: is_installed(tool.command).await,
                install_hint: tool.install_hint,
            });
        }
        let installed: Vec<&str> = tools.iter().filter(|t| t.installed).map(|t| t.id).collect();
        debug!(
            "Tunnel tools installed: {}",
            if installed.is_empty() { "none".to_string() } else { installed.join(", ") }
        );
        tools
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().stop.is_some()
    }

    /// Spawn the tool and wait for its public URL.
    ///
    /// Succeeds without a URL if none shows up within the timeout.
    pub async fn start_tunnel(&self, provider: &str) -> TunnelOutcome {
        if self.is_running() {
            return TunnelOutcome::failed("Tunnel already running");
        }
        let Some(tool) = self.tool(provider).cloned() else {
            return TunnelOutcome::failed(format!("Unknown provider: {}", provider));
        };
        if !is_installed(tool.command).await {
            return TunnelOutcome::failed(format!(
                "{} not installed. Run: {}",
                tool.display_name, tool.install_hint
            ));
        }
        let pattern = match Regex::new(tool.url_pattern) {
            Ok(pattern) => pattern,
            Err(e) => return TunnelOutcome::failed(e.to_string()),
        };

        let args = (tool.args)(self.port);
        info!("Starting tunnel: {} {}", tool.command, args.join(" "));
        let spawned = Command::new(tool.command)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();
        let mut child = match spawned {
            Ok(child) => child,
            Err(e) => {
                let mut state = self.state.lock();
                state.phase = TunnelPhase::Error;
                state.last_error = Some(e.to_string());
                return TunnelOutcome::failed(e.to_string());
            }
        };

        let (line_tx, mut lines) = mpsc::unbounded_channel();
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_lines(stdout, line_tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_lines(stderr, line_tx));
        }

        let stop = CancellationToken::new();
        {
            let mut state = self.state.lock();
            state.phase = TunnelPhase::Starting;
            state.provider = Some(tool.id.to_string());
            state.url = None;
            state.last_error = None;
            state.stop = Some(stop.clone());
        }
        let (exit_tx, exit_rx) = oneshot::channel();
        tokio::spawn(supervise(child, stop, self.state.clone(), exit_tx));

        let deadline = tokio::time::sleep(self.url_timeout);
        tokio::pin!(deadline);
        let mut output = String::new();
        loop {
            tokio::select! {
                line = lines.recv() => match line {
                    Some(line) => {
                        debug!("tunnel: {}", line);
                        output.push_str(&line);
                        output.push('\n');
                        if let Some(found) = pattern.find(&output) {
                            let url = public_url(found.as_str());
                            info!("Tunnel URL detected: {}", url);
                            let mut state = self.state.lock();
                            state.phase = TunnelPhase::Running;
                            state.url = Some(url.clone());
                            return TunnelOutcome {
                                success: true,
                                url: Some(url),
                                ..Default::default()
                            };
                        }
                        if output.len() > OUTPUT_BUFFER_CHARS {
                            output = tail_chars(&output, OUTPUT_BUFFER_CHARS / 2).to_string();
                        }
                    }
                    None => {
                        let code = exit_rx.await.ok().flatten();
                        let error = match code {
                            Some(code) => format!("Tunnel exited unexpectedly with code {}", code),
                            None => "Tunnel exited unexpectedly".to_string(),
                        };
                        let mut state = self.state.lock();
                        state.phase = TunnelPhase::Error;
                        state.last_error = Some(error.clone());
                        return TunnelOutcome::failed(error);
                    }
                },
                _ = &mut deadline => {
                    warn!("Tunnel URL not detected within {:?}", self.url_timeout);
                    self.state.lock().phase = TunnelPhase::Running;
                    return TunnelOutcome::message(
                        "Tunnel started but URL not auto-detected. Check terminal output.",
                    );
                }
            }
        }
    }

    /// Ask the running tunnel to stop; it is killed if it lingers
    pub fn stop_tunnel(&self) -> TunnelOutcome {
        let stop = self.state.lock().stop.clone();
        match stop {
            Some(stop) => {
                info!("Stopping tunnel");
                stop.cancel();
                TunnelOutcome {
                    success: true,
                    ..Default::default()
                }
            }
            None => TunnelOutcome::message("No tunnel running"),
        }
    }

    pub fn status(&self) -> TunnelStatus {
        let state = self.state.lock();
        TunnelStatus {
            status: state.phase,
            provider: state.provider.clone(),
            url: state.url.clone(),
            is_running: state.stop.is_some(),
            last_error: state.last_error.clone(),
            port: self.port,
        }
    }
}

/// `bore.pub:1234` style matches get a scheme
fn public_url(found: &str) -> String {
    if found.starts_with("http") {
        found.to_string()
    } else {
        format!("https://{}", found)
    }
}

async fn is_installed(command: &str) -> bool {
    let locator = if cfg!(windows) { "where" } else { "which" };
    Command::new(locator)
        .arg(command)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Keep draining after the receiver is gone so the child never blocks on a full pipe
async fn forward_lines<R: AsyncRead + Unpin>(stream: R, tx: mpsc::UnboundedSender<String>) {
    let mut lines = BufReader::new(stream).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let _ = tx.send(line);
    }
}

async fn supervise(
    mut child: Child,
    stop: CancellationToken,
    state: Arc<Mutex<TunnelState>>,
    exited: oneshot::Sender<Option<i32>>,
) {
    let code = tokio::select! {
        status = child.wait() => status.ok().and_then(|s| s.code()),
        _ = stop.cancelled() => terminate(&mut child).await,
    };
    info!("Tunnel process exited (code: {:?})", code);

    {
        let mut state = state.lock();
        state.stop = None;
        state.url = None;
        if state.phase != TunnelPhase::Error {
            state.phase = TunnelPhase::Stopped;
        }
    }
    let _ = exited.send(code);
}

async fn terminate(child: &mut Child) -> Option<i32> {
    if request_exit(child) {
        if let Ok(status) = tokio::time::timeout(STOP_GRACE, child.wait()).await {
            return status.ok().and_then(|s| s.code());
        }
    }
    let _ = child.kill().await;
    child.wait().await.ok().and_then(|s| s.code())
}

#[cfg(unix)]
fn request_exit(child: &Child) -> bool {
    child
        .id()
        .is_some_and(terminalwon_terminal::backend::send_sigterm)
}

#[cfg(not(unix))]
fn request_exit(_child: &Child) -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_url_patterns_match_tool_output() {
        let samples = [
            ("ngrok", "started tunnel url=https://ab12-34.ngrok-free.app", "https://ab12-34.ngrok-free.app"),
            ("cloudflared", "|  https://quiet-lake-42.trycloudflare.com  |", "https://quiet-lake-42.trycloudflare.com"),
            ("localtunnel", "your url is: https://smooth-cat.loca.lt", "https://smooth-cat.loca.lt"),
            ("bore", "listening at bore.pub:40123", "bore.pub:40123"),
        ];
        let manager = TunnelManager::new(3002);
        for (id, line, expected) in samples {
            let tool = manager.tool(id).unwrap();
            let found = Regex::new(tool.url_pattern).unwrap().find(line).unwrap();
            assert_eq!(found.as_str(), expected, "{}", id);
        }
        assert_eq!(public_url("bore.pub:40123"), "https://bore.pub:40123");
    }

    #[test]
    fn test_tool_args_use_port() {
        let manager = TunnelManager::new(4000);
        let tool = manager.tool("cloudflare").unwrap();
        assert_eq!(tool.id, "cloudflared");
        assert_eq!((tool.args)(4000), vec!["tunnel", "--url", "http://localhost:4000"]);
    }

    #[tokio::test]
    async fn test_unknown_provider_and_idle_stop() {
        let manager = TunnelManager::new(3002);
        let outcome = manager.start_tunnel("teleport").await;
        assert_eq!(outcome.error.as_deref(), Some("Unknown provider: teleport"));

        let stopped = manager.stop_tunnel();
        assert!(stopped.success);
        assert_eq!(stopped.message.as_deref(), Some("No tunnel running"));

        let status = manager.status();
        assert_eq!(status.status, TunnelPhase::Stopped);
        assert!(!status.is_running);
        assert_eq!(status.port, 3002);
    }

    #[cfg(unix)]
    fn echo_url_args(_port: u16) -> Vec<String> {
        vec!["-c".into(), "echo 'ready at https://demo-app.loca.lt'; sleep 30".into()]
    }

    #[cfg(unix)]
    fn exit_args(_port: u16) -> Vec<String> {
        vec!["-c".into(), "echo starting; exit 3".into()]
    }

    #[cfg(unix)]
    fn fake_tool(args: fn(u16) -> Vec<String>) -> TunnelTool {
        TunnelTool {
            id: "fake",
            display_name: "fake",
            command: "sh",
            args,
            url_pattern: r"https?://[a-zA-Z0-9-]+\.loca\.lt",
            install_hint: "",
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_start_detects_url_then_stops() {
        let manager = TunnelManager::with_tools(3002, vec![fake_tool(echo_url_args)]);
        let outcome = manager.start_tunnel("fake").await;
        assert!(outcome.success, "{:?}", outcome);
        assert_eq!(outcome.url.as_deref(), Some("https://demo-app.loca.lt"));
        assert_eq!(manager.status().status, TunnelPhase::Running);

        let again = manager.start_tunnel("fake").await;
        assert_eq!(again.error.as_deref(), Some("Tunnel already running"));

        assert!(manager.stop_tunnel().success);
        for _ in 0..200 {
            if !manager.is_running() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        let status = manager.status();
        assert!(!status.is_running);
        assert_eq!(status.status, TunnelPhase::Stopped);
        assert!(status.url.is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_early_exit_is_reported() {
        let manager = TunnelManager::with_tools(3002, vec![fake_tool(exit_args)]);
        let outcome = manager.start_tunnel("fake").await;
        assert!(!outcome.success);
        assert_eq!(outcome.error.as_deref(), Some("Tunnel exited unexpectedly with code 3"));
        assert_eq!(manager.status().status, TunnelPhase::Error);
    }
}
