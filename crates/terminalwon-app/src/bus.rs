use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::collections::{BTreeSet, HashMap};
use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

use crate::web::protocol::Envelope;

/// Outgoing text frames for one client's socket
pub type ClientSender = UnboundedSender<String>;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SubscribeError {
    #[error("Terminal not found")]
    TerminalNotFound,
    #[error("Client not connected")]
    ClientNotFound,
    #[error("Terminal registered by another client")]
    OwnedByOtherClient,
}

struct ClientEntry {
    connected_at: DateTime<Utc>,
    authenticated: bool,
    subscriptions: BTreeSet<String>,
    sender: ClientSender,
}

/// Terminal owned by a client; the hub only keeps its descriptor
#[derive(Debug, Clone)]
pub struct ExternalTerminal {
    pub owner: String,
    pub descriptor: Map<String, Value>,
    pub registered_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

impl ExternalTerminal {
    /// Descriptor as listed to clients
    pub fn to_value(&self) -> Value {
        let mut descriptor = self.descriptor.clone();
        descriptor.insert("clientId".into(), Value::from(self.owner.clone()));
        descriptor.insert("type".into(), Value::from("external"));
        descriptor.insert("registeredAt".into(), Value::from(self.registered_at.to_rfc3339()));
        descriptor.insert("lastActivity".into(), Value::from(self.last_activity.to_rfc3339()));
        Value::Object(descriptor)
    }
}

/// Connected clients, per-terminal subscriber sets and external terminals.
///
/// A client is in a terminal's subscriber set exactly when that terminal is
/// in the client's subscription set. Every method keeps both sides in step.
/// Sends only enqueue onto the client's channel; a closed channel is ignored
/// and the disconnect path cleans up.
#[derive(Default)]
pub struct SubscriptionBus {
    clients: HashMap<String, ClientEntry>,
    subscribers: HashMap<String, BTreeSet<String>>,
    external: HashMap<String, ExternalTerminal>,
}

impl SubscriptionBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connect(&mut self, client_id: &str, sender: ClientSender, authenticated: bool) {
        self.clients.insert(
            client_id.to_string(),
            ClientEntry {
                connected_at: Utc::now(),
                authenticated,
                subscriptions: BTreeSet::new(),
                sender,
            },
        );
    }

    /// Drop a client and everything it held. Returns the ids of the external
    /// terminals it owned, which no longer exist.
    pub fn disconnect(&mut self, client_id: &str) -> Vec<String> {
        if let Some(entry) = self.clients.remove(client_id) {
            for terminal_id in &entry.subscriptions {
                if let Some(set) = self.subscribers.get_mut(terminal_id) {
                    set.remove(client_id);
                }
            }
            debug!(
                "Client {} disconnected after {}s",
                client_id,
                (Utc::now() - entry.connected_at).num_seconds()
            );
        }

        let owned: Vec<String> = self
            .external
            .iter()
            .filter(|(_, t)| t.owner == client_id)
            .map(|(id, _)| id.clone())
            .collect();
        for terminal_id in &owned {
            self.external.remove(terminal_id);
            self.close_terminal(terminal_id);
        }
        owned
    }

    pub fn set_authenticated(&mut self, client_id: &str, authenticated: bool) {
        if let Some(entry) = self.clients.get_mut(client_id) {
            entry.authenticated = authenticated;
        }
    }

    pub fn is_authenticated(&self, client_id: &str) -> bool {
        self.clients.get(client_id).is_some_and(|c| c.authenticated)
    }

    /// Start tracking subscribers for a terminal. False if already tracked.
    pub fn open_terminal(&mut self, terminal_id: &str) -> bool {
        if self.subscribers.contains_key(terminal_id) {
            return false;
        }
        self.subscribers.insert(terminal_id.to_string(), BTreeSet::new());
        true
    }

    /// Forget a terminal's subscribers. Returns who was subscribed.
    pub fn close_terminal(&mut self, terminal_id: &str) -> Vec<String> {
        let Some(set) = self.subscribers.remove(terminal_id) else {
            return Vec::new();
        };
        for client_id in &set {
            if let Some(entry) = self.clients.get_mut(client_id) {
                entry.subscriptions.remove(terminal_id);
            }
        }
        set.into_iter().collect()
    }

    pub fn has_terminal(&self, terminal_id: &str) -> bool {
        self.subscribers.contains_key(terminal_id)
    }

    /// Never creates the terminal: unknown ids fail
    pub fn subscribe(&mut self, terminal_id: &str, client_id: &str) -> Result<(), SubscribeError> {
        let set = self
            .subscribers
            .get_mut(terminal_id)
            .ok_or(SubscribeError::TerminalNotFound)?;
        let entry = self
            .clients
            .get_mut(client_id)
            .ok_or(SubscribeError::ClientNotFound)?;
        set.insert(client_id.to_string());
        entry.subscriptions.insert(terminal_id.to_string());
        Ok(())
    }

    pub fn unsubscribe(&mut self, terminal_id: &str, client_id: &str) -> bool {
        let removed = self
            .subscribers
            .get_mut(terminal_id)
            .is_some_and(|set| set.remove(client_id));
        if let Some(entry) = self.clients.get_mut(client_id) {
            entry.subscriptions.remove(terminal_id);
        }
        removed
    }

    /// Fan out to the terminal's current subscribers. Returns how many were enqueued.
    pub fn broadcast(&self, terminal_id: &str, envelope: &Envelope) -> usize {
        let Some(set) = self.subscribers.get(terminal_id) else {
            return 0;
        };
        let text = envelope.to_json();
        set.iter()
            .filter_map(|id| self.clients.get(id))
            .filter(|c| c.sender.send(text.clone()).is_ok())
            .count()
    }

    pub fn send_to(&self, client_id: &str, envelope: &Envelope) -> bool {
        self.clients
            .get(client_id)
            .is_some_and(|c| c.sender.send(envelope.to_json()).is_ok())
    }

    /// Send to every client except `except`
    pub fn send_all(&self, envelope: &Envelope, except: Option<&str>) -> usize {
        let text = envelope.to_json();
        self.clients
            .iter()
            .filter(|(id, _)| Some(id.as_str()) != except)
            .filter(|(_, c)| c.sender.send(text.clone()).is_ok())
            .count()
    }

    /// Store an external terminal and subscribe its owner to it.
    /// Only the owning client may re-register an id.
    pub fn register_external(
        &mut self,
        client_id: &str,
        terminal_id: &str,
        descriptor: Map<String, Value>,
    ) -> Result<(), SubscribeError> {
        if !self.clients.contains_key(client_id) {
            return Err(SubscribeError::ClientNotFound);
        }
        if self
            .external
            .get(terminal_id)
            .is_some_and(|t| t.owner != client_id)
        {
            return Err(SubscribeError::OwnedByOtherClient);
        }
        let now = Utc::now();
        self.external.insert(
            terminal_id.to_string(),
            ExternalTerminal {
                owner: client_id.to_string(),
                descriptor,
                registered_at: now,
                last_activity: now,
            },
        );
        self.open_terminal(terminal_id);
        self.subscribe(terminal_id, client_id)
    }

    pub fn external(&self, terminal_id: &str) -> Option<&ExternalTerminal> {
        self.external.get(terminal_id)
    }

    pub fn touch_external(&mut self, terminal_id: &str) -> bool {
        match self.external.get_mut(terminal_id) {
            Some(terminal) => {
                terminal.last_activity = Utc::now();
                true
            }
            None => false,
        }
    }

    /// Route a message to the client that owns an external terminal
    pub fn send_to_owner(&self, terminal_id: &str, envelope: &Envelope) -> bool {
        self.external
            .get(terminal_id)
            .is_some_and(|t| self.send_to(&t.owner, envelope))
    }

    pub fn external_terminals(&self) -> Vec<Value> {
        let mut terminals: Vec<&ExternalTerminal> = self.external.values().collect();
        terminals.sort_by_key(|t| t.registered_at);
        terminals.into_iter().map(ExternalTerminal::to_value).collect()
    }

    pub fn external_count(&self) -> usize {
        self.external.len()
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    pub fn contains_client(&self, client_id: &str) -> bool {
        self.clients.contains_key(client_id)
    }

    pub fn subscriptions_of(&self, client_id: &str) -> Vec<String> {
        self.clients
            .get(client_id)
            .map(|c| c.subscriptions.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn subscribers_of(&self, terminal_id: &str) -> Vec<String> {
        self.subscribers
            .get(terminal_id)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Drop every client sender so their sockets close
    pub fn close_all(&mut self) {
        self.clients.clear();
        self.subscribers.clear();
        self.external.clear();
    }

    /// Both directions of the subscription relation agree
    pub fn is_consistent(&self) -> bool {
        let forward = self.subscribers.iter().all(|(terminal_id, set)| {
            set.iter().all(|client_id| {
                self.clients
                    .get(client_id)
                    .is_some_and(|c| c.subscriptions.contains(terminal_id))
            })
        });
        let backward = self.clients.iter().all(|(client_id, entry)| {
            entry.subscriptions.iter().all(|terminal_id| {
                self.subscribers
                    .get(terminal_id)
                    .is_some_and(|set| set.contains(client_id))
            })
        });
        forward && backward
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::sync::mpsc;

    fn client(bus: &mut SubscriptionBus, id: &str) -> mpsc::UnboundedReceiver<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        bus.connect(id, tx, true);
        rx
    }

    #[test]
    fn test_subscribe_unknown_terminal_fails() {
        let mut bus = SubscriptionBus::new();
        let _rx = client(&mut bus, "c1");
        assert_eq!(bus.subscribe("pty-x", "c1"), Err(SubscribeError::TerminalNotFound));
        assert!(!bus.has_terminal("pty-x"));

        bus.open_terminal("pty-x");
        assert_eq!(bus.subscribe("pty-x", "ghost"), Err(SubscribeError::ClientNotFound));
        assert!(bus.subscribers_of("pty-x").is_empty());
    }

    #[test]
    fn test_dead_client_is_skipped() {
        let mut bus = SubscriptionBus::new();
        let rx = client(&mut bus, "c1");
        let mut live = client(&mut bus, "c2");
        bus.open_terminal("t");
        bus.subscribe("t", "c1").unwrap();
        bus.subscribe("t", "c2").unwrap();
        drop(rx);

        let delivered = bus.broadcast("t", &Envelope::new("terminal.output", json!({})));
        assert_eq!(delivered, 1);
        assert!(live.try_recv().is_ok());
    }

    #[test]
    fn test_close_terminal_clears_both_sides() {
        let mut bus = SubscriptionBus::new();
        let _rx = client(&mut bus, "c1");
        bus.open_terminal("t");
        bus.subscribe("t", "c1").unwrap();

        assert_eq!(bus.close_terminal("t"), vec!["c1".to_string()]);
        assert!(bus.subscriptions_of("c1").is_empty());
        assert!(bus.is_consistent());
    }

    #[test]
    fn test_send_all_excludes_origin() {
        let mut bus = SubscriptionBus::new();
        let mut a = client(&mut bus, "a");
        let mut b = client(&mut bus, "b");
        assert_eq!(bus.send_all(&Envelope::new("terminal.new", json!({})), Some("a")), 1);
        assert!(a.try_recv().is_err());
        assert!(b.try_recv().is_ok());
    }

    #[test]
    fn test_external_descriptor_listing() {
        let mut bus = SubscriptionBus::new();
        let _rx = client(&mut bus, "ext");
        let mut descriptor = Map::new();
        descriptor.insert("id".into(), json!("vsc-1"));
        descriptor.insert("name".into(), json!("bash"));
        bus.register_external("ext", "vsc-1", descriptor).unwrap();

        let listed = bus.external_terminals();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0]["type"], "external");
        assert_eq!(listed[0]["clientId"], "ext");
        assert_eq!(listed[0]["name"], "bash");
        assert_eq!(bus.subscriptions_of("ext"), vec!["vsc-1".to_string()]);
    }

    #[test]
    fn test_external_id_cannot_be_taken_over() {
        let mut bus = SubscriptionBus::new();
        let _owner = client(&mut bus, "owner");
        let _other = client(&mut bus, "other");
        bus.register_external("owner", "vsc-1", Map::new()).unwrap();

        assert_eq!(
            bus.register_external("other", "vsc-1", Map::new()),
            Err(SubscribeError::OwnedByOtherClient)
        );
        assert_eq!(bus.external("vsc-1").unwrap().owner, "owner");
        assert!(bus.subscriptions_of("other").is_empty());

        // The owner may refresh its own descriptor
        bus.register_external("owner", "vsc-1", Map::new()).unwrap();
        assert!(bus.is_consistent());
    }
}
