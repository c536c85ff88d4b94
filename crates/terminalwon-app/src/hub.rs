use chrono::Utc;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use terminalwon_agents::{AgentPool, IdeAgent, TerminalAgentOptions, TerminalContext};
use terminalwon_chat::{ChatHistoryManager, ChatReader, NewChatMessage, WatcherConfig};
use terminalwon_config::ConfigManager;
use terminalwon_llm_api::{AIProviderManager, LlmClient, ProviderKind};
use terminalwon_terminal::{ProcessEvent, RegistryConfig, SessionRegistry, TerminalEvent, TerminalInfo};
use terminalwon_types::{
    prefixed_id, AgentKind, IdeKind, Insight, TimelineEvent, TimelineEventType, SERVER_VERSION,
};

use crate::auth::AuthManager;
use crate::bus::{ClientSender, ExternalTerminal, SubscriptionBus};
use crate::web::protocol::{
    AuthPayload, ClientMessage, CommandPayload, CreatePayload, Envelope, InputPayload,
    OutputPayload, ProviderTestPayload, RegisterPayload, ResizePayload, SessionGetPayload,
    TunnelStartPayload,
};
use crate::tunnel::{TunnelManager, TunnelOutcome};

/// Everything the hub needs besides the configuration store
pub struct HubOptions {
    pub registry: RegistryConfig,
    /// `None` disables chat history
    pub chat_readers: Option<Vec<Arc<dyn ChatReader>>>,
    pub watcher: WatcherConfig,
    pub agent_options: TerminalAgentOptions,
    pub log_requests: bool,
    /// Port tunnels expose
    pub port: u16,
    pub auth: AuthManager,
    /// Model client for the agents; the provider manager when unset
    pub llm_client: Option<Arc<dyn LlmClient>>,
}

impl Default for HubOptions {
    fn default() -> Self {
        Self {
            registry: RegistryConfig::default(),
            chat_readers: None,
            watcher: WatcherConfig::default(),
            agent_options: TerminalAgentOptions::default(),
            log_requests: false,
            port: terminalwon_types::DEFAULT_PORT,
            auth: AuthManager::local(),
            llm_client: None,
        }
    }
}

/// Descriptor of a hub terminal as clients see it, with its `type`
pub fn terminal_value(info: &TerminalInfo) -> Value {
    let mut value = serde_json::to_value(info).unwrap_or_else(|_| json!({}));
    if let Some(object) = value.as_object_mut() {
        object.insert("type".into(), Value::from(info.kind_label()));
    }
    value
}

/// Owns all hub state: terminals, clients and subscriptions, agents, chat history.
///
/// Lock order is registry, then bus. Neither lock is held across an await.
pub struct Hub {
    registry: Mutex<SessionRegistry>,
    bus: Mutex<SubscriptionBus>,
    agents: AgentPool,
    ide_agents: Vec<Arc<IdeAgent>>,
    chat: Option<Arc<ChatHistoryManager>>,
    config: Arc<ConfigManager>,
    providers: Arc<AIProviderManager>,
    tunnel: TunnelManager,
    auth: AuthManager,
    pty_available: bool,
    started_at: Instant,
    shutdown: CancellationToken,
}

impl Hub {
    /// Build the hub, start its event pumps and load chat history
    pub async fn start(config: Arc<ConfigManager>, options: HubOptions) -> Arc<Self> {
        let (terminal_tx, terminal_rx) = mpsc::unbounded_channel();
        let (timeline_tx, timeline_rx) = mpsc::unbounded_channel();
        let (insight_tx, insight_rx) = mpsc::unbounded_channel();
        let (chat_tx, chat_rx) = mpsc::unbounded_channel();

        let providers = Arc::new(
            AIProviderManager::new(config.clone()).with_request_logging(options.log_requests),
        );
        let client = options
            .llm_client
            .unwrap_or_else(|| providers.clone() as Arc<dyn LlmClient>);

        let registry = SessionRegistry::new(options.registry, terminal_tx);
        let pty_available = registry.pty_available();

        let agents = AgentPool::new(client.clone(), config.clone(), timeline_tx)
            .with_options(options.agent_options);
        let ide_config = config.agent_config(AgentKind::Ide);
        let ide_agents = IdeKind::ALL
            .into_iter()
            .map(|ide| Arc::new(IdeAgent::new(ide, &ide_config, client.clone(), insight_tx.clone())))
            .collect();

        let watcher = options.watcher;
        let chat = options.chat_readers.map(|readers| {
            Arc::new(ChatHistoryManager::new(readers, chat_tx).with_watcher_config(watcher))
        });

        let hub = Arc::new(Self {
            registry: Mutex::new(registry),
            bus: Mutex::new(SubscriptionBus::new()),
            agents,
            ide_agents,
            chat,
            config,
            providers,
            tunnel: TunnelManager::new(options.port),
            auth: options.auth,
            pty_available,
            started_at: Instant::now(),
            shutdown: CancellationToken::new(),
        });

        hub.spawn_pump(terminal_rx, Hub::on_terminal_event);
        hub.spawn_pump(timeline_rx, Hub::on_timeline_event);
        hub.spawn_pump(insight_rx, Hub::on_insight);
        hub.spawn_pump(chat_rx, Hub::on_chat_message);

        if let Some(chat) = &hub.chat {
            chat.initialize().await;
            let sessions = chat.get_all_sessions();
            for agent in &hub.ide_agents {
                agent.initialize(sessions.iter());
            }
        }

        let tunnel = hub.config.get().tunnel;
        if let (true, Some(provider)) = (tunnel.auto_start, tunnel.provider) {
            let hub = hub.clone();
            tokio::spawn(async move {
                let outcome = hub.start_tunnel(&provider).await;
                if !outcome.success {
                    warn!("Tunnel auto-start failed: {}", outcome.error.unwrap_or_default());
                }
            });
        }

        hub
    }

    /// Feed a channel into a handler until shutdown or until the hub is dropped
    fn spawn_pump<T: Send + 'static>(
        self: &Arc<Self>,
        mut rx: UnboundedReceiver<T>,
        handle: fn(&Arc<Hub>, T),
    ) {
        let weak = Arc::downgrade(self);
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            loop {
                let item = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    item = rx.recv() => match item {
                        Some(item) => item,
                        None => break,
                    },
                };
                let Some(hub) = weak.upgrade() else { break };
                handle(&hub, item);
            }
        });
    }

    // ------------------------------------------------------------------
    // Event pumps

    fn on_terminal_event(self: &Arc<Self>, event: TerminalEvent) {
        let TerminalEvent { terminal_id, event } = event;
        match event {
            ProcessEvent::Data(content) => {
                if !self.registry.lock().touch(&terminal_id) {
                    return;
                }
                let output = Envelope::new(
                    "terminal.output",
                    json!({"terminalId": terminal_id, "content": content, "timestamp": Utc::now()}),
                );
                self.bus.lock().broadcast(&terminal_id, &output);
                if let Some(agent) = self.agents.get(&terminal_id) {
                    agent.process_output(&content);
                }
            }
            ProcessEvent::Exit { code, signal } => {
                let closed = {
                    let mut registry = self.registry.lock();
                    let info = registry.handle_exit(&terminal_id);
                    let mut bus = self.bus.lock();
                    bus.close_terminal(&terminal_id);
                    if info.is_some() {
                        bus.send_all(
                            &Envelope::new(
                                "terminal.closed",
                                json!({"terminalId": terminal_id, "exitCode": code, "signal": signal}),
                            ),
                            None,
                        );
                    }
                    info
                };
                if closed.is_some() {
                    info!("Terminal exited: {} (code: {:?})", terminal_id, code);
                }
                self.agents.detach(&terminal_id);
            }
        }
    }

    fn on_timeline_event(self: &Arc<Self>, event: TimelineEvent) {
        self.bus.lock().broadcast(
            &event.terminal_id,
            &Envelope::new("agent.timeline", json!({ "event": event })),
        );
        if event.event_type != TimelineEventType::ErrorDetected {
            return;
        }

        let cwd = self
            .registry
            .lock()
            .get(&event.terminal_id)
            .map(|t| t.cwd.clone());
        let Some(cwd) = cwd else { return };
        let event = Arc::new(event);
        for agent in &self.ide_agents {
            let agent = agent.clone();
            let event = event.clone();
            let cwd = cwd.clone();
            tokio::spawn(async move {
                agent.correlate_terminal_error(&event, &cwd).await;
            });
        }
    }

    fn on_insight(self: &Arc<Self>, insight: Insight) {
        debug!("Insight {} from {}", insight.id, insight.ide_type);
        self.bus
            .lock()
            .send_all(&Envelope::new("agent.insight", json!({ "insight": insight })), None);
    }

    fn on_chat_message(self: &Arc<Self>, update: NewChatMessage) {
        let Some(chat) = &self.chat else { return };
        let envelope = Envelope::new(
            "chat.message.new",
            json!({
                "sessionId": update.session.id,
                "sourceIDE": update.session.source_ide,
                "message": update.message,
            }),
        );
        let subscribers = chat.subscribers();
        {
            let bus = self.bus.lock();
            for client_id in &subscribers {
                bus.send_to(client_id, &envelope);
            }
        }

        if let Some(agent) = self.ide_agent(update.session.source_ide) {
            tokio::spawn(async move {
                agent.handle_new_message(&update.session, &update.message).await;
            });
        }
    }

    // ------------------------------------------------------------------
    // Clients

    /// Register a socket and greet it. Returns the new client id.
    pub fn connect(&self, sender: ClientSender) -> String {
        let client_id = prefixed_id("client");
        let mut bus = self.bus.lock();
        bus.connect(&client_id, sender, self.auth.is_open());
        bus.send_to(
            &client_id,
            &Envelope::new(
                "welcome",
                json!({
                    "clientId": client_id,
                    "message": "Connected to TerminalWON Hub",
                    "ptyAvailable": self.pty_available,
                    "serverVersion": SERVER_VERSION,
                }),
            ),
        );
        info!("Client connected: {} (total: {})", client_id, bus.client_count());
        client_id
    }

    /// Release everything the client held, including external terminals it registered
    pub fn disconnect(&self, client_id: &str) {
        {
            let mut bus = self.bus.lock();
            for terminal_id in bus.disconnect(client_id) {
                info!("Removed external terminal {} (client disconnected)", terminal_id);
                bus.send_all(
                    &Envelope::new("terminal.closed", json!({ "terminalId": terminal_id })),
                    None,
                );
            }
            info!("Client disconnected: {} (remaining: {})", client_id, bus.client_count());
        }
        if let Some(chat) = &self.chat {
            chat.unsubscribe(client_id);
        }
    }

    /// Parse and dispatch one text frame. Bad frames are logged and dropped.
    pub async fn handle_text(self: &Arc<Self>, client_id: &str, text: &str) {
        let message = match ClientMessage::parse(text) {
            Ok(message) => message,
            Err(e) => {
                warn!("Ignoring message from {}: {}", client_id, e);
                return;
            }
        };
        debug!("Message from {}: {}", client_id, message.kind());

        if !matches!(message, ClientMessage::Auth(_)) && !self.bus.lock().is_authenticated(client_id) {
            self.reply(client_id, Envelope::error(message.kind(), "Not authenticated"));
            return;
        }
        self.handle_message(client_id, message).await;
    }

    pub async fn handle_message(self: &Arc<Self>, client_id: &str, message: ClientMessage) {
        use ClientMessage::*;
        match message {
            Auth(payload) => self.authenticate(client_id, payload),
            TerminalCreate(payload) => self.create_terminal(client_id, payload),
            TerminalSubscribe(payload) => self.subscribe_terminal(client_id, &payload.terminal_id),
            TerminalUnsubscribe(payload) => {
                self.bus.lock().unsubscribe(&payload.terminal_id, client_id);
                self.reply(
                    client_id,
                    Envelope::new("terminal.unsubscribed", json!({"terminalId": payload.terminal_id})),
                );
            }
            TerminalInput(payload) => self.send_input(payload),
            TerminalExecute(payload) => self.execute(payload),
            TerminalResize(payload) => self.resize(payload),
            TerminalClose(payload) => {
                if self.registry.lock().close(&payload.terminal_id) {
                    info!("Close requested for terminal {}", payload.terminal_id);
                }
            }
            TerminalsList(payload) => {
                let reply = Envelope::new("message", json!({ "terminals": self.terminal_list() }))
                    .with_message_id(payload.message_id);
                self.reply(client_id, reply);
            }
            TerminalRegister(payload) => self.register_external(client_id, payload),
            TerminalOutput(payload) => self.relay_external_output(client_id, payload),
            ChatSessionsList => {
                let sessions = self
                    .chat
                    .as_ref()
                    .map(|chat| chat.list_sessions())
                    .unwrap_or_default();
                self.reply(client_id, Envelope::new("chat.sessions", json!({ "sessions": sessions })));
            }
            ChatSessionGet(payload) => self.get_chat_session(client_id, payload).await,
            ChatSubscribe => {
                let payload = match &self.chat {
                    Some(chat) => {
                        chat.subscribe(client_id);
                        info!("Client {} subscribed to chat updates", client_id);
                        json!({ "success": true })
                    }
                    None => json!({ "success": false, "error": "Chat history not available" }),
                };
                self.reply(client_id, Envelope::new("chat.subscribed", payload));
            }
            ChatUnsubscribe => {
                if let Some(chat) = &self.chat {
                    chat.unsubscribe(client_id);
                }
                self.reply(client_id, Envelope::new("chat.unsubscribed", json!({ "success": true })));
            }
            AgentStatus => self.reply(client_id, Envelope::new("agent.status", self.agent_status())),
            AgentSuggestApply(payload) => self.apply_suggestion(client_id, payload),
            AgentExplain(payload) => self.explain(client_id, &payload.terminal_id),
            ConfigGet => {
                let payload = json!({
                    "config": self.config.redacted(),
                    "providers": self.providers.providers(),
                });
                self.reply(client_id, Envelope::new("config", payload));
            }
            ProvidersList => {
                let payload = json!({ "providers": self.providers.providers() });
                self.reply(client_id, Envelope::new("providers", payload));
            }
            ProviderTest(payload) => self.test_provider(client_id, payload),
            TunnelStatus => self.tunnel_status(client_id),
            TunnelStart(payload) => self.spawn_tunnel_start(client_id, payload),
            TunnelStop => {
                let outcome = self.tunnel.stop_tunnel();
                self.reply(client_id, self.tunnel_envelope(Some(outcome)));
            }
        }
    }

    fn reply(&self, client_id: &str, envelope: Envelope) {
        self.bus.lock().send_to(client_id, &envelope);
    }

    fn authenticate(&self, client_id: &str, payload: AuthPayload) {
        match self.auth.authenticate(client_id, &payload) {
            Some(identity) => {
                info!(
                    "Client {} authenticated ({:?}, tool: {})",
                    client_id,
                    identity.mode,
                    identity.tool.as_deref().unwrap_or("unknown")
                );
                self.bus.lock().set_authenticated(client_id, true);
                self.reply(
                    client_id,
                    Envelope::new(
                        "auth.success",
                        json!({
                            "authenticated": true,
                            "clientId": identity.client_id,
                            "mode": identity.mode,
                            "ptyAvailable": self.pty_available,
                        }),
                    ),
                );
            }
            None => {
                warn!("Authentication failed for {}", client_id);
                self.reply(client_id, Envelope::error("auth", "Authentication failed"));
            }
        }
    }

    // ------------------------------------------------------------------
    // Terminals

    fn create_terminal(&self, client_id: &str, request: CreatePayload) {
        let mut registry = self.registry.lock();
        let info = match registry.create(request.name, request.cwd) {
            Ok(info) => info,
            Err(e) => {
                drop(registry);
                warn!("Failed to create terminal: {}", e);
                self.reply(client_id, Envelope::error("terminal.create", e));
                return;
            }
        };

        // Attach under the registry lock so the first output chunk reaches the agent
        self.agents.attach(
            &info.id,
            TerminalContext {
                cwd: Some(info.cwd.clone()),
                shell: Some(info.shell.clone()),
                tool: Some(info.tool.clone()),
            },
        );

        let descriptor = terminal_value(&info);
        let mut bus = self.bus.lock();
        bus.open_terminal(&info.id);
        if let Err(e) = bus.subscribe(&info.id, client_id) {
            debug!("Creator {} not subscribed to {}: {}", client_id, info.id, e);
        }
        bus.send_to(client_id, &Envelope::new("terminal.created", json!({ "terminal": descriptor })));
        bus.send_all(
            &Envelope::new("terminal.new", json!({ "terminal": descriptor })),
            Some(client_id),
        );
        info!("Terminal created: {} (pid: {:?}, pty: {})", info.id, info.pid, info.is_pty);
    }

    /// Hub terminal or external descriptor
    fn terminal_descriptor(&self, terminal_id: &str) -> Option<Value> {
        let hub_terminal = self.registry.lock().get(terminal_id).map(terminal_value);
        hub_terminal.or_else(|| {
            self.bus
                .lock()
                .external(terminal_id)
                .map(ExternalTerminal::to_value)
        })
    }

    fn subscribe_terminal(&self, client_id: &str, terminal_id: &str) {
        let terminal = self.terminal_descriptor(terminal_id);
        let result = self.bus.lock().subscribe(terminal_id, client_id);
        let reply = match (result, terminal) {
            (Ok(()), terminal) => {
                info!("Client {} subscribed to terminal {}", client_id, terminal_id);
                Envelope::new(
                    "terminal.subscribed",
                    json!({ "terminalId": terminal_id, "terminal": terminal }),
                )
            }
            (Err(e), _) => Envelope::new(
                "terminal.subscribe.error",
                json!({ "terminalId": terminal_id, "error": e.to_string() }),
            ),
        };
        self.reply(client_id, reply);
    }

    /// Write to a hub terminal, else forward to the client owning the external terminal
    fn write_or_route(&self, terminal_id: &str, data: &str, routed: Envelope) {
        if self.registry.lock().write(terminal_id, data) {
            return;
        }
        if !self.bus.lock().send_to_owner(terminal_id, &routed) {
            debug!("{} dropped: no terminal {}", routed.kind, terminal_id);
        }
    }

    fn send_input(&self, payload: InputPayload) {
        let input = payload.text().to_string();
        let routed = Envelope::new(
            "terminal.input",
            json!({ "terminalId": payload.terminal_id, "input": input }),
        );
        self.write_or_route(&payload.terminal_id, &input, routed);
    }

    fn execute(&self, payload: CommandPayload) {
        let routed = Envelope::new(
            "terminal.execute",
            json!({ "terminalId": payload.terminal_id, "command": payload.command }),
        );
        self.write_or_route(&payload.terminal_id, &format!("{}\n", payload.command), routed);
    }

    fn resize(&self, payload: ResizePayload) {
        let resized = self
            .registry
            .lock()
            .resize(&payload.terminal_id, payload.cols, payload.rows);
        debug!(
            "Resize {} to {}x{}: {}",
            payload.terminal_id, payload.cols, payload.rows, resized
        );
    }

    fn register_external(&self, client_id: &str, payload: RegisterPayload) {
        if self.registry.lock().contains(&payload.terminal_id) {
            self.reply(client_id, Envelope::error("terminal.register", "Terminal id already in use"));
            return;
        }

        let mut bus = self.bus.lock();
        let name = payload
            .descriptor
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or("unnamed")
            .to_string();
        if let Err(e) = bus.register_external(client_id, &payload.terminal_id, payload.descriptor) {
            warn!("Could not register terminal {}: {}", payload.terminal_id, e);
            bus.send_to(
                client_id,
                &Envelope::new(
                    "terminal.register.error",
                    json!({ "terminalId": payload.terminal_id, "error": e.to_string() }),
                ),
            );
            return;
        }
        info!("External terminal registered: {} ({})", name, payload.terminal_id);
        let descriptor = bus.external(&payload.terminal_id).map(ExternalTerminal::to_value);
        bus.send_all(
            &Envelope::new("terminal.new", json!({ "terminal": descriptor })),
            Some(client_id),
        );
    }

    fn relay_external_output(&self, client_id: &str, payload: OutputPayload) {
        let mut bus = self.bus.lock();
        let owned = bus
            .external(&payload.terminal_id)
            .is_some_and(|t| t.owner == client_id);
        if !owned {
            debug!("Output for {} from non-owner {} ignored", payload.terminal_id, client_id);
            return;
        }
        bus.touch_external(&payload.terminal_id);
        bus.broadcast(
            &payload.terminal_id,
            &Envelope::new(
                "terminal.output",
                json!({
                    "terminalId": payload.terminal_id,
                    "content": payload.content,
                    "timestamp": Utc::now(),
                }),
            ),
        );
    }

    /// Hub terminals (oldest first) followed by external ones
    pub fn terminal_list(&self) -> Vec<Value> {
        let mut terminals: Vec<Value> = self.registry.lock().list().iter().map(terminal_value).collect();
        terminals.extend(self.bus.lock().external_terminals());
        terminals
    }

    // ------------------------------------------------------------------
    // Chat history

    async fn get_chat_session(&self, client_id: &str, payload: SessionGetPayload) {
        let Some(session_id) = payload.session_id.filter(|id| !id.is_empty()) else {
            self.reply(client_id, Envelope::new("chat.session.error", json!({"error": "Session ID required"})));
            return;
        };
        let Some(chat) = &self.chat else {
            self.reply(
                client_id,
                Envelope::new("chat.session.error", json!({"error": "Chat history not available"})),
            );
            return;
        };

        let reply = match chat.get_session(&session_id).await {
            Some(session) => Envelope::new("chat.session", json!({ "session": session })),
            None => Envelope::new("chat.session.error", json!({"error": "Session not found"})),
        };
        self.reply(client_id, reply);
    }

    fn ide_agent(&self, ide: IdeKind) -> Option<Arc<IdeAgent>> {
        self.ide_agents.iter().find(|a| a.ide() == ide).cloned()
    }

    // ------------------------------------------------------------------
    // Agents

    pub fn agent_status(&self) -> Value {
        let ide_agents: Vec<_> = self.ide_agents.iter().map(|a| a.summary()).collect();
        json!({
            "terminalAgents": self.agents.statuses(),
            "ideAgents": ide_agents,
            "activeProvider": self.config.active_provider(),
        })
    }

    /// Agents exist only for hub terminals, so external terminals never take suggestions
    fn apply_suggestion(&self, client_id: &str, payload: CommandPayload) {
        let Some(agent) = self.agents.get(&payload.terminal_id) else {
            self.reply(
                client_id,
                Envelope::new(
                    "agent.suggest.applied",
                    json!({
                        "terminalId": payload.terminal_id,
                        "command": payload.command,
                        "success": false,
                        "error": "No agent for terminal",
                    }),
                ),
            );
            return;
        };

        let action = agent.apply_suggestion(&payload.command);
        let success = self
            .registry
            .lock()
            .write(&action.terminal_id, &format!("{}\n", action.command));
        self.reply(
            client_id,
            Envelope::new(
                "agent.suggest.applied",
                json!({
                    "terminalId": action.terminal_id,
                    "command": action.command,
                    "success": success,
                }),
            ),
        );
    }

    fn explain(self: &Arc<Self>, client_id: &str, terminal_id: &str) {
        let Some(agent) = self.agents.get(terminal_id) else {
            self.reply(client_id, Envelope::error("agent.explain", "No agent for terminal"));
            return;
        };
        let hub = self.clone();
        let client_id = client_id.to_string();
        let terminal_id = terminal_id.to_string();
        tokio::spawn(async move {
            let explanation = agent.request_explanation().await;
            hub.reply(
                &client_id,
                Envelope::new(
                    "agent.explanation",
                    json!({ "terminalId": terminal_id, "explanation": explanation }),
                ),
            );
        });
    }

    fn test_provider(self: &Arc<Self>, client_id: &str, payload: ProviderTestPayload) {
        let Some(kind) = ProviderKind::from_str(&payload.provider) else {
            self.reply(
                client_id,
                Envelope::new(
                    "provider.test.result",
                    json!({
                        "provider": payload.provider,
                        "success": false,
                        "error": format!("Unknown provider: {}", payload.provider),
                    }),
                ),
            );
            return;
        };
        let hub = self.clone();
        let client_id = client_id.to_string();
        tokio::spawn(async move {
            let result = hub.providers.test_connection(kind, payload.api_key).await;
            let mut body = serde_json::to_value(&result).unwrap_or_else(|_| json!({}));
            body["provider"] = json!(kind);
            hub.reply(&client_id, Envelope::new("provider.test.result", body));
        });
    }

    // ------------------------------------------------------------------
    // Tunnel

    fn tunnel_envelope(&self, outcome: Option<TunnelOutcome>) -> Envelope {
        let mut body = serde_json::to_value(self.tunnel.status()).unwrap_or_else(|_| json!({}));
        if let Some(outcome) = outcome {
            body["result"] = json!(outcome);
        }
        Envelope::new("tunnel.status", body)
    }

    fn tunnel_status(self: &Arc<Self>, client_id: &str) {
        let hub = self.clone();
        let client_id = client_id.to_string();
        tokio::spawn(async move {
            let tools = hub.tunnel.detect_installed_tools().await;
            let mut envelope = hub.tunnel_envelope(None);
            envelope.payload["tools"] = json!(tools);
            hub.reply(&client_id, envelope);
        });
    }

    fn spawn_tunnel_start(self: &Arc<Self>, client_id: &str, payload: TunnelStartPayload) {
        let tool = payload.tool.or_else(|| self.config.get().tunnel.provider);
        let Some(tool) = tool else {
            let outcome = TunnelOutcome {
                error: Some("No tunnel tool configured".into()),
                ..Default::default()
            };
            self.reply(client_id, self.tunnel_envelope(Some(outcome)));
            return;
        };
        let hub = self.clone();
        let client_id = client_id.to_string();
        tokio::spawn(async move {
            let outcome = hub.start_tunnel(&tool).await;
            hub.reply(&client_id, hub.tunnel_envelope(Some(outcome)));
        });
    }

    /// Start a tunnel and remember the tool and URL in the configuration
    pub async fn start_tunnel(&self, tool: &str) -> TunnelOutcome {
        let outcome = self.tunnel.start_tunnel(tool).await;
        if outcome.success {
            let mut settings = self.config.get().tunnel;
            settings.provider = Some(tool.to_string());
            settings.url = outcome.url.clone();
            settings.configured = true;
            if let Err(e) = self.config.set_tunnel_config(settings) {
                warn!("Failed to save tunnel settings: {}", e);
            }
        }
        outcome
    }

    // ------------------------------------------------------------------
    // Introspection and shutdown

    pub fn client_count(&self) -> usize {
        self.bus.lock().client_count()
    }

    pub fn terminal_count(&self) -> usize {
        self.registry.lock().len()
    }

    pub fn pty_available(&self) -> bool {
        self.pty_available
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    pub fn chat(&self) -> Option<&Arc<ChatHistoryManager>> {
        self.chat.as_ref()
    }

    pub fn tunnel(&self) -> &TunnelManager {
        &self.tunnel
    }

    /// Cancelled once shutdown begins
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn subscribers_of(&self, terminal_id: &str) -> Vec<String> {
        self.bus.lock().subscribers_of(terminal_id)
    }

    pub fn subscriptions_consistent(&self) -> bool {
        self.bus.lock().is_consistent()
    }

    /// Stop watching chat files, terminate terminals, destroy agents and drop
    /// every client channel so sockets close. Runs once.
    pub fn shutdown(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        info!("Shutting down TerminalWON hub");
        self.shutdown.cancel();

        if let Some(chat) = &self.chat {
            chat.shutdown();
        }
        self.registry.lock().shutdown();
        self.agents.shutdown();
        for agent in &self.ide_agents {
            agent.destroy();
        }
        if self.tunnel.is_running() {
            self.tunnel.stop_tunnel();
        }
        self.bus.lock().close_all();
    }
}
