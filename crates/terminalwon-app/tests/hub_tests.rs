#![cfg(unix)]

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::time::timeout;
use tower::ServiceExt;

use terminalwon::web::routes::{create_router, AppState};
use terminalwon::{AuthManager, AuthMode, Hub, HubOptions};
use terminalwon_config::{ConfigManager, HubConfig};
use terminalwon_llm_api::{ChatMessage, ChatOptions, ChatResponse, LlmClient, ProviderError, ProviderKind};
use terminalwon_terminal::{BackendType, RegistryConfig};

/// Model stand-in that never finds anything
struct QuietClient;

#[async_trait]
impl LlmClient for QuietClient {
    async fn chat(&self, _messages: Vec<ChatMessage>, _options: ChatOptions) -> Result<ChatResponse, ProviderError> {
        Ok(ChatResponse {
            content: r#"{"hasError": false}"#.into(),
            provider: ProviderKind::Ollama,
            model: "llama3.2".into(),
        })
    }
}

fn options() -> HubOptions {
    HubOptions {
        registry: RegistryConfig {
            backend: Some(BackendType::Process),
            shell: Some("/bin/sh".to_string()),
        },
        llm_client: Some(Arc::new(QuietClient)),
        ..HubOptions::default()
    }
}

async fn start_hub(options: HubOptions) -> Arc<Hub> {
    let config = Arc::new(ConfigManager::in_memory(HubConfig::default()));
    Hub::start(config, options).await
}

struct TestClient {
    id: String,
    rx: UnboundedReceiver<String>,
}

impl TestClient {
    fn connect(hub: &Hub) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = hub.connect(tx);
        Self { id, rx }
    }

    async fn send(&self, hub: &Arc<Hub>, kind: &str, payload: Value) {
        let text = json!({ "type": kind, "payload": payload }).to_string();
        hub.handle_text(&self.id, &text).await;
    }

    /// Next message of type `kind`, skipping others
    async fn expect(&mut self, kind: &str) -> Value {
        let rx = &mut self.rx;
        timeout(Duration::from_secs(5), async {
            while let Some(text) = rx.recv().await {
                let message: Value = serde_json::from_str(&text).unwrap();
                if message["type"] == kind {
                    return message;
                }
            }
            panic!("channel closed while waiting for {}", kind);
        })
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {}", kind))
    }

    /// Output for `terminal_id` until it contains `needle`
    async fn expect_output(&mut self, terminal_id: &str, needle: &str) -> String {
        let mut collected = String::new();
        while !collected.contains(needle) {
            let message = self.expect("terminal.output").await;
            if message["payload"]["terminalId"] == terminal_id {
                collected.push_str(message["payload"]["content"].as_str().unwrap_or_default());
            }
        }
        collected
    }

    /// Everything queued right now
    fn drain(&mut self) -> Vec<Value> {
        let mut messages = Vec::new();
        while let Ok(text) = self.rx.try_recv() {
            messages.push(serde_json::from_str(&text).unwrap());
        }
        messages
    }
}

async fn create_terminal(hub: &Arc<Hub>, client: &mut TestClient) -> String {
    client.send(hub, "terminal.create", json!({ "cwd": "/tmp" })).await;
    let created = client.expect("terminal.created").await;
    created["payload"]["terminal"]["id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_welcome_on_connect() {
    let hub = start_hub(options()).await;
    let mut client = TestClient::connect(&hub);

    let welcome = client.expect("welcome").await;
    assert_eq!(welcome["payload"]["clientId"], client.id.as_str());
    assert_eq!(welcome["payload"]["message"], "Connected to TerminalWON Hub");
    assert_eq!(welcome["payload"]["ptyAvailable"], false);
    assert_eq!(welcome["payload"]["serverVersion"], "2.0.0");
    assert_eq!(hub.client_count(), 1);

    hub.shutdown();
}

#[tokio::test]
async fn test_output_reaches_only_subscribers() {
    let hub = start_hub(options()).await;
    let mut a = TestClient::connect(&hub);
    let mut b = TestClient::connect(&hub);
    let mut c = TestClient::connect(&hub);

    let x = create_terminal(&hub, &mut a).await;
    let announced = b.expect("terminal.new").await;
    assert_eq!(announced["payload"]["terminal"]["id"], x.as_str());
    assert_eq!(announced["payload"]["terminal"]["type"], "shell");
    assert!(a.drain().iter().all(|m| m["type"] != "terminal.new"));

    let y = create_terminal(&hub, &mut c).await;

    b.send(&hub, "terminal.subscribe", json!({ "terminalId": x })).await;
    let subscribed = b.expect("terminal.subscribed").await;
    assert_eq!(subscribed["payload"]["terminal"]["id"], x.as_str());
    assert_eq!(hub.subscribers_of(&x).len(), 2);

    a.send(&hub, "terminal.execute", json!({ "terminalId": x, "command": "echo hub-$((40+2))" }))
        .await;
    assert!(a.expect_output(&x, "hub-42").await.contains("hub-42"));
    assert!(b.expect_output(&x, "hub-42").await.contains("hub-42"));

    tokio::time::sleep(Duration::from_millis(200)).await;
    let leaked = c
        .drain()
        .into_iter()
        .filter(|m| m["type"] == "terminal.output" && m["payload"]["terminalId"] == x.as_str())
        .count();
    assert_eq!(leaked, 0);
    assert_eq!(hub.subscribers_of(&y), vec![c.id.clone()]);
    assert!(hub.subscriptions_consistent());

    hub.shutdown();
}

#[tokio::test]
async fn test_subscribe_unknown_terminal() {
    let hub = start_hub(options()).await;
    let mut client = TestClient::connect(&hub);

    client.send(&hub, "terminal.subscribe", json!({ "terminalId": "pty-missing" })).await;
    let error = client.expect("terminal.subscribe.error").await;
    assert_eq!(error["payload"]["error"], "Terminal not found");
    assert!(hub.subscriptions_consistent());

    hub.shutdown();
}

#[tokio::test]
async fn test_exit_closes_terminal_for_everyone() {
    let hub = start_hub(options()).await;
    let mut a = TestClient::connect(&hub);
    let mut b = TestClient::connect(&hub);

    let x = create_terminal(&hub, &mut a).await;
    a.send(&hub, "terminal.execute", json!({ "terminalId": x, "command": "exit 3" })).await;

    let closed = b.expect("terminal.closed").await;
    assert_eq!(closed["payload"]["terminalId"], x.as_str());
    assert_eq!(closed["payload"]["exitCode"], 3);
    a.expect("terminal.closed").await;

    assert_eq!(hub.terminal_count(), 0);
    assert!(hub.subscribers_of(&x).is_empty());
    assert!(hub.subscriptions_consistent());

    hub.shutdown();
}

#[tokio::test]
async fn test_terminals_list_echoes_message_id() {
    let hub = start_hub(options()).await;
    let mut client = TestClient::connect(&hub);
    let x = create_terminal(&hub, &mut client).await;

    client.send(&hub, "terminals.list", json!({ "messageId": "req-1" })).await;
    let reply = client.expect("message").await;
    assert_eq!(reply["messageId"], "req-1");
    let terminals = reply["payload"]["terminals"].as_array().unwrap();
    assert_eq!(terminals.len(), 1);
    assert_eq!(terminals[0]["id"], x.as_str());

    hub.shutdown();
}

#[tokio::test]
async fn test_external_terminal_removed_on_disconnect() {
    let hub = start_hub(options()).await;
    let owner = TestClient::connect(&hub);
    let mut watcher = TestClient::connect(&hub);

    owner
        .send(
            &hub,
            "terminal.register",
            json!({ "terminalId": "ext-1", "name": "vscode", "cwd": "/work" }),
        )
        .await;
    let announced = watcher.expect("terminal.new").await;
    assert_eq!(announced["payload"]["terminal"]["type"], "external");
    assert_eq!(announced["payload"]["terminal"]["clientId"], owner.id.as_str());

    watcher.send(&hub, "terminal.subscribe", json!({ "terminalId": "ext-1" })).await;
    watcher.expect("terminal.subscribed").await;

    // Only the owner may publish output for its terminal
    watcher
        .send(&hub, "terminal.output", json!({ "terminalId": "ext-1", "content": "spoofed" }))
        .await;
    owner
        .send(&hub, "terminal.output", json!({ "terminalId": "ext-1", "content": "real" }))
        .await;
    let output = watcher.expect("terminal.output").await;
    assert_eq!(output["payload"]["content"], "real");

    hub.disconnect(&owner.id);
    let closed = watcher.expect("terminal.closed").await;
    assert_eq!(closed["payload"]["terminalId"], "ext-1");
    assert!(hub.terminal_list().is_empty());
    assert!(hub.subscribers_of("ext-1").is_empty());
    assert!(hub.subscriptions_consistent());

    hub.shutdown();
}

#[tokio::test]
async fn test_external_terminal_id_stays_with_its_owner() {
    let hub = start_hub(options()).await;
    let mut owner = TestClient::connect(&hub);
    let mut intruder = TestClient::connect(&hub);

    owner.send(&hub, "terminal.register", json!({ "terminalId": "ext-1", "name": "vscode" })).await;
    intruder.expect("terminal.new").await;

    intruder.send(&hub, "terminal.register", json!({ "terminalId": "ext-1", "name": "evil" })).await;
    let error = intruder.expect("terminal.register.error").await;
    assert_eq!(error["payload"]["terminalId"], "ext-1");
    assert_eq!(error["payload"]["error"], "Terminal registered by another client");

    // Input for the terminal still reaches the original owner only
    intruder.send(&hub, "terminal.input", json!({ "terminalId": "ext-1", "input": "ls\n" })).await;
    let routed = owner.expect("terminal.input").await;
    assert_eq!(routed["payload"]["input"], "ls\n");
    assert!(intruder.drain().iter().all(|m| m["type"] != "terminal.input"));

    let listed = hub.terminal_list();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0]["name"], "vscode");
    assert_eq!(listed[0]["clientId"], owner.id.as_str());

    hub.shutdown();
}

#[tokio::test]
async fn test_suggestions_not_applied_to_external_terminals() {
    let hub = start_hub(options()).await;
    let mut owner = TestClient::connect(&hub);
    let mut viewer = TestClient::connect(&hub);

    owner.send(&hub, "terminal.register", json!({ "terminalId": "ext-1", "name": "vscode" })).await;
    viewer.expect("terminal.new").await;

    viewer
        .send(&hub, "agent.suggest.apply", json!({ "terminalId": "ext-1", "command": "ls" }))
        .await;
    let applied = viewer.expect("agent.suggest.applied").await;
    assert_eq!(applied["payload"]["success"], false);
    assert_eq!(applied["payload"]["error"], "No agent for terminal");
    assert!(owner.drain().iter().all(|m| m["type"] != "terminal.execute"));

    hub.shutdown();
}

#[tokio::test]
async fn test_chat_requests_without_history() {
    let hub = start_hub(options()).await;
    let mut client = TestClient::connect(&hub);

    client.send(&hub, "chat.subscribe", json!({})).await;
    let reply = client.expect("chat.subscribed").await;
    assert_eq!(reply["payload"], json!({ "success": false, "error": "Chat history not available" }));

    client.send(&hub, "chat.session.get", json!({})).await;
    let error = client.expect("chat.session.error").await;
    assert_eq!(error["payload"]["error"], "Session ID required");

    client.send(&hub, "chat.session.get", json!({ "sessionId": "kiro-1" })).await;
    let error = client.expect("chat.session.error").await;
    assert_eq!(error["payload"]["error"], "Chat history not available");

    client.send(&hub, "chat.sessions.list", Value::Null).await;
    let sessions = client.expect("chat.sessions").await;
    assert_eq!(sessions["payload"]["sessions"], json!([]));

    hub.shutdown();
}

#[tokio::test]
async fn test_token_mode_requires_auth() {
    let hub = start_hub(HubOptions {
        auth: AuthManager::new(AuthMode::Token, Some("s3cret".into())),
        ..options()
    })
    .await;
    let mut client = TestClient::connect(&hub);

    client.send(&hub, "terminal.create", json!({})).await;
    let error = client.expect("terminal.create.error").await;
    assert_eq!(error["payload"]["error"], "Not authenticated");
    assert_eq!(hub.terminal_count(), 0);

    client.send(&hub, "auth", json!({ "token": "wrong" })).await;
    client.expect("auth.error").await;

    client.send(&hub, "auth", json!({ "token": "s3cret", "tool": "vscode" })).await;
    let ok = client.expect("auth.success").await;
    assert_eq!(ok["payload"]["mode"], "token");

    create_terminal(&hub, &mut client).await;
    assert_eq!(hub.terminal_count(), 1);

    hub.shutdown();
}

#[tokio::test]
async fn test_agent_status_lists_ide_agents() {
    let hub = start_hub(options()).await;
    let mut client = TestClient::connect(&hub);
    let x = create_terminal(&hub, &mut client).await;

    client.send(&hub, "agent.status", json!({})).await;
    let status = client.expect("agent.status").await;
    assert_eq!(status["payload"]["ideAgents"].as_array().unwrap().len(), 3);
    let terminal_agents = status["payload"]["terminalAgents"].as_array().unwrap();
    assert_eq!(terminal_agents.len(), 1);
    assert_eq!(terminal_agents[0]["terminalId"], x.as_str());

    hub.shutdown();
}

#[tokio::test]
async fn test_shutdown_closes_client_channels() {
    let hub = start_hub(options()).await;
    let mut client = TestClient::connect(&hub);
    create_terminal(&hub, &mut client).await;

    hub.shutdown();
    assert!(hub.shutdown_token().is_cancelled());
    assert_eq!(hub.terminal_count(), 0);

    let closed = timeout(Duration::from_secs(5), async {
        while client.rx.recv().await.is_some() {}
    })
    .await;
    assert!(closed.is_ok());
}

#[tokio::test]
async fn test_health_route() {
    let hub = start_hub(options()).await;
    let _client = TestClient::connect(&hub);
    let app = create_router(AppState { hub: hub.clone() });

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["clients"], 1);
    assert_eq!(body["terminals"], 0);
    assert_eq!(body["ptyAvailable"], false);

    hub.shutdown();
}

#[tokio::test]
async fn test_chat_sessions_route_without_history() {
    let hub = start_hub(options()).await;
    let app = create_router(AppState { hub: hub.clone() });

    let response = app
        .oneshot(Request::builder().uri("/api/chat/sessions").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    hub.shutdown();
}
