#![cfg(unix)]

use std::time::Duration;
use terminalwon_terminal::{
    BackendType, EventReceiver, ProcessEvent, RegistryConfig, SessionRegistry, SpawnError,
    TerminalStatus,
};
use tokio::sync::mpsc;
use tokio::time::timeout;

fn plain_registry() -> (SessionRegistry, EventReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    let registry = SessionRegistry::new(
        RegistryConfig {
            backend: Some(BackendType::Process),
            shell: Some("/bin/sh".to_string()),
        },
        tx,
    );
    (registry, rx)
}

/// Collect output for `terminal_id` until it contains `needle`
async fn wait_for_output(rx: &mut EventReceiver, terminal_id: &str, needle: &str) -> String {
    let mut collected = String::new();
    let result = timeout(Duration::from_secs(5), async {
        while let Some(event) = rx.recv().await {
            if event.terminal_id != terminal_id {
                continue;
            }
            if let ProcessEvent::Data(chunk) = event.event {
                collected.push_str(&chunk);
                if collected.contains(needle) {
                    return;
                }
            }
        }
    })
    .await;
    assert!(result.is_ok(), "timed out waiting for {:?}, got {:?}", needle, collected);
    collected
}

async fn wait_for_exit(rx: &mut EventReceiver, terminal_id: &str) -> (Option<i32>, Option<String>) {
    timeout(Duration::from_secs(5), async {
        while let Some(event) = rx.recv().await {
            if event.terminal_id != terminal_id {
                continue;
            }
            if let ProcessEvent::Exit { code, signal } = event.event {
                return (code, signal);
            }
        }
        panic!("event channel closed before exit");
    })
    .await
    .expect("timed out waiting for exit")
}

#[tokio::test]
async fn test_create_write_and_receive_output() {
    let (mut registry, mut rx) = plain_registry();
    let info = registry.create(None, Some("/tmp".to_string())).unwrap();

    assert!(info.id.starts_with("pty-"));
    assert_eq!(info.name, "Terminal 1");
    assert_eq!(info.status, TerminalStatus::Active);
    assert!(!info.is_pty);
    assert_eq!(info.tool, "hub-shell");
    assert!(info.pid.is_some());

    assert!(registry.write(&info.id, "echo hello-from-hub\n"));
    let output = wait_for_output(&mut rx, &info.id, "hello-from-hub").await;
    assert!(output.contains("hello-from-hub"));

    registry.shutdown();
}

#[tokio::test]
async fn test_resize_on_plain_process_returns_false_without_events() {
    let (mut registry, mut rx) = plain_registry();
    let info = registry.create(Some("build".into()), Some("/tmp".into())).unwrap();

    assert!(!registry.resize(&info.id, 200, 50));
    assert_eq!(registry.get(&info.id).unwrap().cols, 120);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(rx.try_recv().is_err());

    registry.shutdown();
}

#[tokio::test]
async fn test_close_is_a_request_and_exit_removes() {
    let (mut registry, mut rx) = plain_registry();
    let info = registry.create(None, Some("/tmp".into())).unwrap();

    assert!(registry.close(&info.id));
    // Second close is a no-op
    assert!(!registry.close(&info.id));
    // Still registered until the exit is handled
    assert!(registry.contains(&info.id));

    let (_code, signal) = wait_for_exit(&mut rx, &info.id).await;
    assert_eq!(signal.as_deref(), Some("SIGTERM"));

    let closed = registry.handle_exit(&info.id).unwrap();
    assert_eq!(closed.status, TerminalStatus::Closed);
    assert!(!registry.contains(&info.id));
    assert!(registry.handle_exit(&info.id).is_none());
    assert!(!registry.close(&info.id));
}

#[tokio::test]
async fn test_shell_exit_reports_code() {
    let (mut registry, mut rx) = plain_registry();
    let info = registry.create(None, Some("/tmp".into())).unwrap();

    assert!(registry.write(&info.id, "exit 3\n"));
    let (code, signal) = wait_for_exit(&mut rx, &info.id).await;
    assert_eq!(code, Some(3));
    assert_eq!(signal, None);
}

#[tokio::test]
async fn test_background_job_does_not_delay_exit() {
    let (mut registry, mut rx) = plain_registry();
    let info = registry.create(None, Some("/tmp".into())).unwrap();

    // The job inherits stdout and stderr, so they stay open after the shell is gone
    assert!(registry.write(&info.id, "sleep 20 &\nexit 0\n"));
    let (code, _) = wait_for_exit(&mut rx, &info.id).await;
    assert_eq!(code, Some(0));

    assert!(registry.handle_exit(&info.id).is_some());
    assert!(registry.is_empty());
}

#[tokio::test]
async fn test_missing_cwd_is_a_spawn_error() {
    let (mut registry, _rx) = plain_registry();
    let err = registry
        .create(None, Some("/definitely/not/here".into()))
        .unwrap_err();
    assert!(matches!(err, SpawnError::MissingCwd(_)));
    assert!(registry.is_empty());
}

#[tokio::test]
async fn test_unknown_terminal_operations_return_false() {
    let (mut registry, _rx) = plain_registry();
    assert!(!registry.write("pty-missing", "ls\n"));
    assert!(!registry.resize("pty-missing", 80, 24));
    assert!(!registry.close("pty-missing"));
    assert!(!registry.touch("pty-missing"));
}

#[tokio::test]
async fn test_list_is_oldest_first() {
    let (mut registry, _rx) = plain_registry();
    let first = registry.create(None, Some("/tmp".into())).unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;
    let second = registry.create(None, Some("/tmp".into())).unwrap();

    let ids: Vec<String> = registry.list().into_iter().map(|t| t.id).collect();
    assert_eq!(ids, vec![first.id, second.id.clone()]);
    assert_eq!(registry.get(&second.id).unwrap().name, "Terminal 2");

    registry.shutdown();
}

#[tokio::test]
async fn test_pty_backend_resizes_when_available() {
    if !terminalwon_terminal::probe_pty_available("/bin/sh") {
        return;
    }
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut registry = SessionRegistry::new(
        RegistryConfig {
            backend: Some(BackendType::Pty),
            shell: Some("/bin/sh".into()),
        },
        tx,
    );
    let info = registry.create(None, Some("/tmp".into())).unwrap();
    assert!(info.is_pty);
    assert!(registry.resize(&info.id, 100, 40));
    assert_eq!(registry.get(&info.id).unwrap().cols, 100);

    assert!(registry.write(&info.id, "echo pty-ok\n"));
    wait_for_output(&mut rx, &info.id, "pty-ok").await;

    registry.close(&info.id);
    wait_for_exit(&mut rx, &info.id).await;
}
