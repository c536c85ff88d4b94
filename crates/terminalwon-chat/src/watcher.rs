//! One debounced watcher over every reader's storage.
//!
//! Raw notify events go through an unbounded channel into a debounce task.
//! Each file gets its own quiet-period deadline; when it passes, the owning
//! reader re-reads the file on the blocking pool and the resulting sessions
//! are sent downstream.

use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

use terminalwon_types::ChatSession;

use crate::error::WatchError;
use crate::reader::ChatReader;

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);

const IGNORED_DIRS: &[&str] = &["node_modules", ".git"];

#[derive(Debug, Clone, Copy)]
pub struct WatcherConfig {
    /// Quiet period after the last raw event for a file
    pub debounce: Duration,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            debounce: DEFAULT_DEBOUNCE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WatcherStatus {
    pub is_running: bool,
    pub watched_path_count: usize,
    pub watched_paths: Vec<String>,
    pub pending_debounces: usize,
}

struct Route {
    root: PathBuf,
    patterns: Vec<glob::Pattern>,
    reader: Arc<dyn ChatReader>,
}

/// Maps a changed path to the reader that owns it
pub struct WatchRouter {
    /// Longest root first
    routes: Vec<Route>,
    globs: Vec<String>,
}

impl WatchRouter {
    pub fn new(readers: &[Arc<dyn ChatReader>]) -> Self {
        let mut routes = Vec::new();
        let mut globs = Vec::new();
        for reader in readers {
            let raw = reader.watch_patterns();
            if raw.is_empty() {
                continue;
            }
            let patterns = raw
                .iter()
                .filter_map(|p| match glob::Pattern::new(p) {
                    Ok(pattern) => Some(pattern),
                    Err(e) => {
                        warn!("Invalid watch pattern {}: {}", p, e);
                        None
                    }
                })
                .collect();
            globs.extend(raw);
            routes.push(Route {
                root: reader.storage_root().to_path_buf(),
                patterns,
                reader: reader.clone(),
            });
        }
        routes.sort_by_key(|route| std::cmp::Reverse(route.root.as_os_str().len()));
        Self { routes, globs }
    }

    pub fn globs(&self) -> &[String] {
        &self.globs
    }

    pub fn roots(&self) -> impl Iterator<Item = &Path> {
        self.routes.iter().map(|route| route.root.as_path())
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Owning reader by longest matching root. Paths outside every glob,
    /// and dotfiles, `node_modules` and `.git` below the root, resolve to `None`.
    pub fn resolve(&self, path: &Path) -> Option<&Arc<dyn ChatReader>> {
        let route = self.routes.iter().find(|route| path.starts_with(&route.root))?;
        let relative = path.strip_prefix(&route.root).ok()?;
        if is_ignored(relative) {
            return None;
        }
        route
            .patterns
            .iter()
            .any(|pattern| pattern.matches_path(path))
            .then_some(&route.reader)
    }
}

fn is_ignored(relative: &Path) -> bool {
    relative.components().any(|component| match component {
        Component::Normal(name) => {
            let name = name.to_string_lossy();
            name.starts_with('.') || IGNORED_DIRS.contains(&name.as_ref())
        }
        _ => false,
    })
}

struct Shared {
    running: AtomicBool,
    pending: AtomicUsize,
    watched: Vec<String>,
}

pub struct ChatFileWatcher {
    shared: Arc<Shared>,
    task: JoinHandle<()>,
    // Dropping the OS watcher closes the raw channel and ends the task
    _watcher: Option<RecommendedWatcher>,
}

impl ChatFileWatcher {
    /// Watch every reader's storage root. Must be called inside a tokio runtime.
    pub fn start(
        readers: &[Arc<dyn ChatReader>],
        config: WatcherConfig,
        updates: UnboundedSender<Vec<ChatSession>>,
    ) -> Result<Self, WatchError> {
        let router = WatchRouter::new(readers);
        if router.is_empty() {
            return Err(WatchError::NothingToWatch);
        }

        let (raw_tx, raw_rx) = mpsc::unbounded_channel::<PathBuf>();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            match res {
                Ok(event) if matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) => {
                    for path in event.paths {
                        let _ = raw_tx.send(path);
                    }
                }
                Ok(_) => {}
                Err(e) => warn!("Chat watcher error: {}", e),
            }
        })?;
        for root in router.roots() {
            watcher.watch(root, RecursiveMode::Recursive)?;
        }
        info!("Watching {} chat storage pattern(s)", router.globs().len());

        let mut this = Self::from_channel(router, config, raw_rx, updates);
        this._watcher = Some(watcher);
        Ok(this)
    }

    /// Run the debounce stage over an existing raw event channel
    pub fn from_channel(
        router: WatchRouter,
        config: WatcherConfig,
        raw: UnboundedReceiver<PathBuf>,
        updates: UnboundedSender<Vec<ChatSession>>,
    ) -> Self {
        let shared = Arc::new(Shared {
            running: AtomicBool::new(true),
            pending: AtomicUsize::new(0),
            watched: router.globs().to_vec(),
        });
        let task = tokio::spawn(debounce_loop(
            router,
            config.debounce,
            raw,
            updates,
            shared.clone(),
        ));
        Self {
            shared,
            task,
            _watcher: None,
        }
    }

    pub fn status(&self) -> WatcherStatus {
        let running = self.shared.running.load(Ordering::SeqCst);
        WatcherStatus {
            is_running: running,
            watched_path_count: if running { self.shared.watched.len() } else { 0 },
            watched_paths: if running { self.shared.watched.clone() } else { Vec::new() },
            pending_debounces: self.shared.pending.load(Ordering::SeqCst),
        }
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Stop watching and drop pending debounces
    pub fn stop(&mut self) {
        self.task.abort();
        self._watcher = None;
        self.shared.running.store(false, Ordering::SeqCst);
        self.shared.pending.store(0, Ordering::SeqCst);
        info!("Chat watcher stopped");
    }
}

impl Drop for ChatFileWatcher {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn debounce_loop(
    router: WatchRouter,
    debounce: Duration,
    mut raw: UnboundedReceiver<PathBuf>,
    updates: UnboundedSender<Vec<ChatSession>>,
    shared: Arc<Shared>,
) {
    let mut deadlines: HashMap<PathBuf, Instant> = HashMap::new();

    loop {
        let next = deadlines.values().min().copied();
        tokio::select! {
            received = raw.recv() => {
                let Some(path) = received else { break };
                if router.resolve(&path).is_some() {
                    deadlines.insert(path, Instant::now() + debounce);
                }
            }
            _ = sleep_until(next.unwrap_or_else(Instant::now)), if next.is_some() => {
                let now = Instant::now();
                let due: Vec<PathBuf> = deadlines
                    .iter()
                    .filter(|(_, deadline)| **deadline <= now)
                    .map(|(path, _)| path.clone())
                    .collect();
                for path in due {
                    deadlines.remove(&path);
                    if let Some(reader) = router.resolve(&path) {
                        dispatch(reader.clone(), path, &updates).await;
                    }
                }
            }
            _ = updates.closed() => break,
        }
        shared.pending.store(deadlines.len(), Ordering::SeqCst);
    }

    shared.running.store(false, Ordering::SeqCst);
    shared.pending.store(0, Ordering::SeqCst);
}

async fn dispatch(
    reader: Arc<dyn ChatReader>,
    path: PathBuf,
    updates: &UnboundedSender<Vec<ChatSession>>,
) {
    debug!("Chat file changed: {}", path.display());
    let ide = reader.ide();
    let result = tokio::task::spawn_blocking(move || reader.on_file_change(&path)).await;
    match result {
        Ok(change) => {
            let sessions = change.into_sessions();
            if !sessions.is_empty() {
                let _ = updates.send(sessions);
            }
        }
        Err(e) => warn!("{} reader failed on file change: {}", ide.display_name(), e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::FileChange;
    use parking_lot::Mutex;
    use terminalwon_types::IdeKind;

    struct FakeReader {
        root: PathBuf,
        calls: Mutex<Vec<PathBuf>>,
    }

    impl ChatReader for FakeReader {
        fn ide(&self) -> IdeKind {
            IdeKind::Kiro
        }
        fn storage_root(&self) -> &Path {
            &self.root
        }
        fn scan_sessions(&self) -> Vec<ChatSession> {
            Vec::new()
        }
        fn read_session(&self, _: &str) -> Option<ChatSession> {
            None
        }
        fn watch_patterns(&self) -> Vec<String> {
            vec![format!("{}/**/*.json", self.root.display())]
        }
        fn on_file_change(&self, path: &Path) -> FileChange {
            self.calls.lock().push(path.to_path_buf());
            let id = path.file_stem().unwrap().to_string_lossy().into_owned();
            FileChange::Session(ChatSession::new(format!("kiro-{}", id), IdeKind::Kiro, None))
        }
    }

    fn fake(root: &str) -> Arc<FakeReader> {
        Arc::new(FakeReader {
            root: PathBuf::from(root),
            calls: Mutex::new(Vec::new()),
        })
    }

    #[test]
    fn test_router_prefers_longest_root_and_filters() {
        let outer = fake("/data/ide");
        let inner = fake("/data/ide/nested");
        let readers: Vec<Arc<dyn ChatReader>> = vec![outer.clone(), inner.clone()];
        let router = WatchRouter::new(&readers);

        let hit = router.resolve(Path::new("/data/ide/nested/ws/a.json")).unwrap();
        assert_eq!(hit.storage_root(), Path::new("/data/ide/nested"));
        assert!(router.resolve(Path::new("/data/ide/ws/a.json")).is_some());

        assert!(router.resolve(Path::new("/data/ide/ws/a.txt")).is_none());
        assert!(router.resolve(Path::new("/data/ide/.cache/a.json")).is_none());
        assert!(router.resolve(Path::new("/data/ide/ws/node_modules/a.json")).is_none());
        assert!(router.resolve(Path::new("/elsewhere/a.json")).is_none());
    }

    #[test]
    fn test_dot_in_root_is_not_ignored() {
        let reader = fake("/home/u/.config/Kiro");
        let readers: Vec<Arc<dyn ChatReader>> = vec![reader];
        let router = WatchRouter::new(&readers);
        assert!(router.resolve(Path::new("/home/u/.config/Kiro/ws/s.json")).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_events_collapse_into_one_dispatch() {
        let reader = fake("/data/ide");
        let readers: Vec<Arc<dyn ChatReader>> = vec![reader.clone()];
        let (raw_tx, raw_rx) = mpsc::unbounded_channel();
        let (updates_tx, mut updates_rx) = mpsc::unbounded_channel();
        let watcher = ChatFileWatcher::from_channel(
            WatchRouter::new(&readers),
            WatcherConfig::default(),
            raw_rx,
            updates_tx,
        );

        let start = Instant::now();
        let file = PathBuf::from("/data/ide/ws/s1.json");
        raw_tx.send(file.clone()).unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        raw_tx.send(file.clone()).unwrap();
        raw_tx.send(PathBuf::from("/data/ide/ws/ignored.txt")).unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(watcher.status().pending_debounces, 1);

        let sessions = updates_rx.recv().await.unwrap();
        assert_eq!(sessions[0].id, "kiro-s1");
        assert!(start.elapsed() >= Duration::from_millis(800));

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(updates_rx.try_recv().is_err());
        assert_eq!(reader.calls.lock().len(), 1);
        assert_eq!(watcher.status().pending_debounces, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_files_debounce_independently() {
        let reader = fake("/data/ide");
        let readers: Vec<Arc<dyn ChatReader>> = vec![reader.clone()];
        let (raw_tx, raw_rx) = mpsc::unbounded_channel();
        let (updates_tx, mut updates_rx) = mpsc::unbounded_channel();
        let _watcher = ChatFileWatcher::from_channel(
            WatchRouter::new(&readers),
            WatcherConfig::default(),
            raw_rx,
            updates_tx,
        );

        raw_tx.send(PathBuf::from("/data/ide/ws/a.json")).unwrap();
        raw_tx.send(PathBuf::from("/data/ide/ws/b.json")).unwrap();

        let mut ids = vec![
            updates_rx.recv().await.unwrap()[0].id.clone(),
            updates_rx.recv().await.unwrap()[0].id.clone(),
        ];
        ids.sort();
        assert_eq!(ids, vec!["kiro-a", "kiro-b"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_reports_not_running() {
        let readers: Vec<Arc<dyn ChatReader>> = vec![fake("/data/ide")];
        let (_raw_tx, raw_rx) = mpsc::unbounded_channel();
        let (updates_tx, _updates_rx) = mpsc::unbounded_channel();
        let mut watcher = ChatFileWatcher::from_channel(
            WatchRouter::new(&readers),
            WatcherConfig::default(),
            raw_rx,
            updates_tx,
        );
        let status = watcher.status();
        assert!(status.is_running);
        assert_eq!(status.watched_path_count, 1);

        watcher.stop();
        assert_eq!(
            watcher.status(),
            WatcherStatus {
                is_running: false,
                watched_path_count: 0,
                watched_paths: Vec::new(),
                pending_debounces: 0,
            }
        );
    }
}
