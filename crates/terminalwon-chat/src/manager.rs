use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedSender};
use tracing::{debug, info, warn};

use terminalwon_types::{ChatMessage, ChatSession, ChatSessionSummary, IdeKind};

use crate::error::WatchError;
use crate::reader::ChatReader;
use crate::readers::default_readers;
use crate::watcher::{ChatFileWatcher, WatcherConfig, WatcherStatus};

/// A message that appeared in a session since it was last cached
#[derive(Debug, Clone)]
pub struct NewChatMessage {
    pub session: ChatSessionSummary,
    pub message: ChatMessage,
}

/// Aggregates every IDE's chat history into one session cache and turns
/// on-disk growth into per-message notifications
pub struct ChatHistoryManager {
    readers: Vec<Arc<dyn ChatReader>>,
    sessions: RwLock<HashMap<String, ChatSession>>,
    subscribers: Mutex<BTreeSet<String>>,
    events: UnboundedSender<NewChatMessage>,
    watcher: Mutex<Option<ChatFileWatcher>>,
    watcher_config: WatcherConfig,
    watch_enabled: bool,
}

impl ChatHistoryManager {
    pub fn new(readers: Vec<Arc<dyn ChatReader>>, events: UnboundedSender<NewChatMessage>) -> Self {
        Self {
            readers,
            sessions: RwLock::new(HashMap::new()),
            subscribers: Mutex::new(BTreeSet::new()),
            events,
            watcher: Mutex::new(None),
            watcher_config: WatcherConfig::default(),
            watch_enabled: true,
        }
    }

    /// Manager over the Kiro, Cursor and Antigravity default locations
    pub fn with_default_readers(events: UnboundedSender<NewChatMessage>) -> Self {
        Self::new(default_readers(), events)
    }

    pub fn with_watcher_config(mut self, config: WatcherConfig) -> Self {
        self.watcher_config = config;
        self
    }

    pub fn without_watcher(mut self) -> Self {
        self.watch_enabled = false;
        self
    }

    /// Full scan of every reader, then start watching for changes
    pub async fn initialize(self: &Arc<Self>) {
        let count = self.refresh_sessions().await;
        info!("Loaded {} chat session(s) from {} reader(s)", count, self.readers.len());
        if self.watch_enabled {
            self.start_watcher();
        }
    }

    fn start_watcher(self: &Arc<Self>) {
        let mut slot = self.watcher.lock();
        if slot.as_ref().is_some_and(ChatFileWatcher::is_running) {
            debug!("Chat watcher already running");
            return;
        }

        let (tx, mut rx) = mpsc::unbounded_channel::<Vec<ChatSession>>();
        match ChatFileWatcher::start(&self.readers, self.watcher_config, tx) {
            Ok(watcher) => *slot = Some(watcher),
            Err(WatchError::NothingToWatch) => {
                info!("No chat storage found, file watching disabled");
                return;
            }
            Err(e) => {
                warn!("Failed to start chat watcher: {}", e);
                return;
            }
        }

        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            while let Some(batch) = rx.recv().await {
                let Some(manager) = weak.upgrade() else { break };
                for session in batch {
                    manager.handle_session_update(session);
                }
            }
        });
    }

    /// Replace the cache with a fresh scan of every reader. Returns the session count.
    pub async fn refresh_sessions(&self) -> usize {
        let readers = self.readers.clone();
        let scanned = tokio::task::spawn_blocking(move || {
            readers
                .iter()
                .flat_map(|reader| reader.scan_sessions())
                .collect::<Vec<_>>()
        })
        .await;

        let sessions = match scanned {
            Ok(sessions) => sessions,
            Err(e) => {
                warn!("Chat session scan failed: {}", e);
                return self.session_count();
            }
        };

        let mut cache = self.sessions.write();
        cache.clear();
        for session in sessions {
            cache.insert(session.id.clone(), session);
        }
        cache.len()
    }

    /// Every cached session, newest first, undated sessions last
    pub fn get_all_sessions(&self) -> Vec<ChatSession> {
        let mut sessions: Vec<ChatSession> = self.sessions.read().values().cloned().collect();
        sessions.sort_by(ChatSession::newest_first);
        sessions
    }

    /// [`Self::get_all_sessions`] without message bodies
    pub fn list_sessions(&self) -> Vec<ChatSessionSummary> {
        let cache = self.sessions.read();
        let mut sessions: Vec<&ChatSession> = cache.values().collect();
        sessions.sort_by(|a, b| ChatSession::newest_first(a, b));
        sessions.into_iter().map(ChatSession::summary).collect()
    }

    /// Full session: the cache when it holds messages, else the owning
    /// reader (by id prefix), else every reader in turn
    pub async fn get_session(&self, session_id: &str) -> Option<ChatSession> {
        let cached = self.sessions.read().get(session_id).cloned();

        if let Some(cached) = cached {
            if !cached.messages.is_empty() {
                return Some(cached);
            }
            if let Some(reader) = self.reader_for(session_id) {
                if let Some(full) = read_blocking(reader, session_id).await {
                    self.sessions.write().insert(session_id.to_string(), full.clone());
                    return Some(full);
                }
            }
            return Some(cached);
        }

        for reader in &self.readers {
            if let Some(session) = read_blocking(reader.clone(), session_id).await {
                self.sessions.write().insert(session.id.clone(), session.clone());
                return Some(session);
            }
        }
        None
    }

    fn reader_for(&self, session_id: &str) -> Option<Arc<dyn ChatReader>> {
        let ide = IdeKind::from_session_id(session_id)?;
        self.readers.iter().find(|r| r.ide() == ide).cloned()
    }

    /// Cache a re-read session and announce messages past the previously
    /// cached count. Sessions seen for the first time announce nothing.
    /// Returns the number of messages announced.
    pub fn handle_session_update(&self, session: ChatSession) -> usize {
        let previous = self
            .sessions
            .write()
            .insert(session.id.clone(), session.clone());

        let Some(previous) = previous else {
            debug!("New chat session {} cached", session.id);
            return 0;
        };
        let known = previous.message_count;
        if session.messages.len() <= known {
            return 0;
        }

        let summary = session.summary();
        let fresh = &session.messages[known..];
        for message in fresh {
            let _ = self.events.send(NewChatMessage {
                session: summary.clone(),
                message: message.clone(),
            });
        }
        debug!("{} new message(s) in {}", fresh.len(), session.id);
        fresh.len()
    }

    pub fn subscribe(&self, client_id: &str) -> bool {
        self.subscribers.lock().insert(client_id.to_string())
    }

    pub fn unsubscribe(&self, client_id: &str) -> bool {
        self.subscribers.lock().remove(client_id)
    }

    pub fn subscribers(&self) -> Vec<String> {
        self.subscribers.lock().iter().cloned().collect()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn reader_ides(&self) -> Vec<IdeKind> {
        self.readers.iter().map(|r| r.ide()).collect()
    }

    pub fn watcher_status(&self) -> Option<WatcherStatus> {
        self.watcher.lock().as_ref().map(ChatFileWatcher::status)
    }

    pub fn is_watcher_running(&self) -> bool {
        self.watcher
            .lock()
            .as_ref()
            .is_some_and(ChatFileWatcher::is_running)
    }

    /// Stop watching and forget all sessions and subscribers
    pub fn shutdown(&self) {
        if let Some(mut watcher) = self.watcher.lock().take() {
            watcher.stop();
        }
        self.subscribers.lock().clear();
        self.sessions.write().clear();
        info!("Chat history manager shut down");
    }
}

async fn read_blocking(reader: Arc<dyn ChatReader>, session_id: &str) -> Option<ChatSession> {
    let id = session_id.to_string();
    match tokio::task::spawn_blocking(move || reader.read_session(&id)).await {
        Ok(session) => session,
        Err(e) => {
            warn!("Reading chat session {} failed: {}", session_id, e);
            None
        }
    }
}
