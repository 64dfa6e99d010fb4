use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tracing::debug;

/// Ordered, deduplicated list of files with a shared claim cursor.
///
/// Each file is handed out exactly once: the cursor is advanced under a
/// mutex that guards nothing but the increment-and-read.
pub struct WorkQueue {
    items: Vec<PathBuf>,
    cursor: Mutex<usize>,
}

impl WorkQueue {
    pub fn new(mut items: Vec<PathBuf>) -> Self {
        items.sort();
        items.dedup();
        Self {
            items,
            cursor: Mutex::new(0),
        }
    }

    /// Atomically claim the next unclaimed file
    pub fn claim(&self) -> Option<&Path> {
        let index = {
            let mut cursor = self.cursor.lock().unwrap_or_else(PoisonError::into_inner);
            if *cursor >= self.items.len() {
                return None;
            }
            let index = *cursor;
            *cursor += 1;
            index
        };

        let path = self.items[index].as_path();
        debug!("Claimed file {}/{}: {:?}", index + 1, self.items.len(), path);
        Some(path)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
