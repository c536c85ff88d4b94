mod antigravity;
mod cursor;
mod kiro;
pub(crate) mod vscdb;

pub use antigravity::AntigravityReader;
pub use cursor::CursorReader;
pub use kiro::KiroReader;

use std::sync::Arc;

use crate::reader::ChatReader;

/// Readers for every supported IDE at their platform default locations
pub fn default_readers() -> Vec<Arc<dyn ChatReader>> {
    vec![
        Arc::new(KiroReader::new()),
        Arc::new(CursorReader::new()),
        Arc::new(AntigravityReader::new()),
    ]
}
