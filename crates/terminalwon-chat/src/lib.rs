//! IDE chat history: readers for each IDE's on-disk store, a debounced
//! file watcher, and the manager that caches sessions and reports new
//! messages as they are written.

pub mod error;
pub mod manager;
pub mod normalize;
pub mod reader;
pub mod readers;
pub mod watcher;

pub use error::{ReaderError, WatchError};
pub use manager::{ChatHistoryManager, NewChatMessage};
pub use reader::{ChatReader, FileChange};
pub use readers::{default_readers, AntigravityReader, CursorReader, KiroReader};
pub use watcher::{ChatFileWatcher, WatchRouter, WatcherConfig, WatcherStatus};
