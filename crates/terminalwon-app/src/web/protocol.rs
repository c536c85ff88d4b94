use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::atomic::{AtomicU64, Ordering};

static MESSAGE_ID: AtomicU64 = AtomicU64::new(0);

/// Next process-wide message id
pub fn next_message_id() -> u64 {
    MESSAGE_ID.fetch_add(1, Ordering::Relaxed) + 1
}

/// Wire envelope for every hub → client message
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
    pub message_id: Value,
}

impl Envelope {
    pub fn new(kind: impl Into<String>, payload: Value) -> Self {
        Self {
            kind: kind.into(),
            payload,
            timestamp: Utc::now(),
            message_id: Value::from(next_message_id()),
        }
    }

    /// Reply that carries the id the client sent with its request
    pub fn with_message_id(mut self, message_id: Option<Value>) -> Self {
        if let Some(id) = message_id.filter(|id| !id.is_null()) {
            self.message_id = id;
        }
        self
    }

    /// `<request>.error {error}`
    pub fn error(request: &str, error: impl std::fmt::Display) -> Self {
        Self::new(format!("{}.error", request), json!({ "error": error.to_string() }))
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Malformed message: {0}")]
    Malformed(#[source] serde_json::Error),
    #[error("Unknown message type: {0}")]
    UnknownType(String),
    #[error("Invalid payload for {kind}: {source}")]
    BadPayload {
        kind: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Deserialize)]
struct RawMessage {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuthPayload {
    pub token: Option<String>,
    pub api_key: Option<String>,
    pub tool: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct CreatePayload {
    pub name: Option<String>,
    pub cwd: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminalRef {
    pub terminal_id: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputPayload {
    pub terminal_id: String,
    #[serde(default)]
    pub input: Option<String>,
    #[serde(default)]
    pub data: Option<String>,
}

impl InputPayload {
    /// `input`, falling back to the older `data` field
    pub fn text(&self) -> &str {
        self.input
            .as_deref()
            .or(self.data.as_deref())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandPayload {
    pub terminal_id: String,
    pub command: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResizePayload {
    pub terminal_id: String,
    pub cols: u16,
    pub rows: u16,
}

/// Externally controlled terminal announced by an IDE extension
#[derive(Debug, Clone, PartialEq)]
pub struct RegisterPayload {
    pub terminal_id: String,
    /// Everything the client sent, kept as the terminal's descriptor
    pub descriptor: Map<String, Value>,
}

impl<'de> Deserialize<'de> for RegisterPayload {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let descriptor = Map::<String, Value>::deserialize(deserializer)?;
        let terminal_id = ["terminalId", "id"]
            .iter()
            .find_map(|key| descriptor.get(*key).and_then(Value::as_str))
            .filter(|id| !id.is_empty())
            .ok_or_else(|| serde::de::Error::missing_field("terminalId"))?
            .to_string();
        Ok(Self {
            terminal_id,
            descriptor,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputPayload {
    pub terminal_id: String,
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ListPayload {
    pub message_id: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionGetPayload {
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderTestPayload {
    pub provider: String,
    #[serde(default)]
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct TunnelStartPayload {
    pub tool: Option<String>,
}

/// Messages sent from client to hub
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    Auth(AuthPayload),

    // Hub terminals
    TerminalCreate(CreatePayload),
    TerminalSubscribe(TerminalRef),
    TerminalUnsubscribe(TerminalRef),
    TerminalInput(InputPayload),
    TerminalExecute(CommandPayload),
    TerminalResize(ResizePayload),
    TerminalClose(TerminalRef),
    TerminalsList(ListPayload),

    // External terminals
    TerminalRegister(RegisterPayload),
    TerminalOutput(OutputPayload),

    // Chat history
    ChatSessionsList,
    ChatSessionGet(SessionGetPayload),
    ChatSubscribe,
    ChatUnsubscribe,

    // Agents
    AgentStatus,
    AgentSuggestApply(CommandPayload),
    AgentExplain(TerminalRef),

    // Configuration
    ConfigGet,
    ProvidersList,
    ProviderTest(ProviderTestPayload),

    // Tunnel
    TunnelStatus,
    TunnelStart(TunnelStartPayload),
    TunnelStop,
}

fn payload<T: DeserializeOwned>(kind: &str, value: Value) -> Result<T, ProtocolError> {
    let value = if value.is_null() { json!({}) } else { value };
    serde_json::from_value(value).map_err(|source| ProtocolError::BadPayload {
        kind: kind.to_string(),
        source,
    })
}

impl ClientMessage {
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let raw: RawMessage = serde_json::from_str(text).map_err(ProtocolError::Malformed)?;
        let kind = raw.kind.as_str();
        let body = raw.payload;

        use ClientMessage::*;
        let message = match kind {
            "auth" => Auth(payload(kind, body)?),
            "terminal.create" => TerminalCreate(payload(kind, body)?),
            "terminal.subscribe" => TerminalSubscribe(payload(kind, body)?),
            "terminal.unsubscribe" => TerminalUnsubscribe(payload(kind, body)?),
            "terminal.input" => TerminalInput(payload(kind, body)?),
            "terminal.execute" => TerminalExecute(payload(kind, body)?),
            "terminal.resize" => TerminalResize(payload(kind, body)?),
            "terminal.close" => TerminalClose(payload(kind, body)?),
            "terminals.list" => TerminalsList(payload(kind, body)?),
            "terminal.register" => TerminalRegister(payload(kind, body)?),
            "terminal.output" => TerminalOutput(payload(kind, body)?),
            "chat.sessions.list" => ChatSessionsList,
            "chat.session.get" => ChatSessionGet(payload(kind, body)?),
            "chat.subscribe" => ChatSubscribe,
            "chat.unsubscribe" => ChatUnsubscribe,
            "agent.status" => AgentStatus,
            "agent.suggest.apply" => AgentSuggestApply(payload(kind, body)?),
            "agent.explain" => AgentExplain(payload(kind, body)?),
            "config.get" => ConfigGet,
            "providers.list" => ProvidersList,
            "provider.test" => ProviderTest(payload(kind, body)?),
            "tunnel.status" => TunnelStatus,
            "tunnel.start" => TunnelStart(payload(kind, body)?),
            "tunnel.stop" => TunnelStop,
            other => return Err(ProtocolError::UnknownType(other.to_string())),
        };
        Ok(message)
    }

    /// Wire name of the message type
    pub fn kind(&self) -> &'static str {
        use ClientMessage::*;
        match self {
            Auth(_) => "auth",
            TerminalCreate(_) => "terminal.create",
            TerminalSubscribe(_) => "terminal.subscribe",
            TerminalUnsubscribe(_) => "terminal.unsubscribe",
            TerminalInput(_) => "terminal.input",
            TerminalExecute(_) => "terminal.execute",
            TerminalResize(_) => "terminal.resize",
            TerminalClose(_) => "terminal.close",
            TerminalsList(_) => "terminals.list",
            TerminalRegister(_) => "terminal.register",
            TerminalOutput(_) => "terminal.output",
            ChatSessionsList => "chat.sessions.list",
            ChatSessionGet(_) => "chat.session.get",
            ChatSubscribe => "chat.subscribe",
            ChatUnsubscribe => "chat.unsubscribe",
            AgentStatus => "agent.status",
            AgentSuggestApply(_) => "agent.suggest.apply",
            AgentExplain(_) => "agent.explain",
            ConfigGet => "config.get",
            ProvidersList => "providers.list",
            ProviderTest(_) => "provider.test",
            TunnelStatus => "tunnel.status",
            TunnelStart(_) => "tunnel.start",
            TunnelStop => "tunnel.stop",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_create_without_payload() {
        let msg = ClientMessage::parse(r#"{"type":"terminal.create"}"#).unwrap();
        assert_eq!(msg, ClientMessage::TerminalCreate(CreatePayload::default()));
    }

    #[test]
    fn test_input_falls_back_to_data() {
        let msg = ClientMessage::parse(
            r#"{"type":"terminal.input","payload":{"terminalId":"pty-1","data":"ls\n"}}"#,
        )
        .unwrap();
        match msg {
            ClientMessage::TerminalInput(p) => assert_eq!(p.text(), "ls\n"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_register_accepts_either_id_field() {
        for body in [
            r#"{"type":"terminal.register","payload":{"id":"vsc-1","name":"zsh"}}"#,
            r#"{"type":"terminal.register","payload":{"terminalId":"vsc-1"}}"#,
        ] {
            match ClientMessage::parse(body).unwrap() {
                ClientMessage::TerminalRegister(p) => assert_eq!(p.terminal_id, "vsc-1"),
                other => panic!("unexpected {:?}", other),
            }
        }

        let err = ClientMessage::parse(r#"{"type":"terminal.register","payload":{"name":"x"}}"#)
            .unwrap_err();
        assert!(matches!(err, ProtocolError::BadPayload { .. }));
    }

    #[test]
    fn test_unknown_and_malformed() {
        assert!(matches!(
            ClientMessage::parse(r#"{"type":"terminal.teleport","payload":{}}"#),
            Err(ProtocolError::UnknownType(t)) if t == "terminal.teleport"
        ));
        assert!(matches!(
            ClientMessage::parse("not json"),
            Err(ProtocolError::Malformed(_))
        ));
        assert!(matches!(
            ClientMessage::parse(r#"{"type":"terminal.resize","payload":{"terminalId":"a"}}"#),
            Err(ProtocolError::BadPayload { .. })
        ));
    }

    #[test]
    fn test_kind_matches_wire_name() {
        let msg = ClientMessage::parse(r#"{"type":"agent.suggest.apply","payload":{"terminalId":"t","command":"ls"}}"#)
            .unwrap();
        assert_eq!(msg.kind(), "agent.suggest.apply");
    }

    #[test]
    fn test_envelope_shape_and_echoed_id() {
        let first = Envelope::new("welcome", json!({}));
        let second = Envelope::new("welcome", json!({}));
        assert!(second.message_id.as_u64() > first.message_id.as_u64());

        let reply = Envelope::new("message", json!({"terminals": []})).with_message_id(Some(json!("req-7")));
        let wire: Value = serde_json::from_str(&reply.to_json()).unwrap();
        assert_eq!(wire["type"], "message");
        assert_eq!(wire["messageId"], "req-7");
        assert!(wire["timestamp"].is_string());

        let err = Envelope::error("terminal.create", "boom");
        assert_eq!(err.kind, "terminal.create.error");
        assert_eq!(err.payload, json!({"error": "boom"}));
    }
}
