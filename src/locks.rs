//! Per-file mutex table.
//!
//! Every rewrite of a file happens while holding that file's mutex, so two
//! batches touching the same file serialize their whole read-modify-write
//! cycle. Entries are created on first use and never removed.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};

static GLOBAL: LazyLock<Arc<FileLocks>> = LazyLock::new(|| Arc::new(FileLocks::new()));

#[derive(Debug, Default)]
pub struct FileLocks {
    locks: DashMap<PathBuf, Arc<Mutex<()>>>,
}

impl FileLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide table.
    pub fn global() -> Arc<FileLocks> {
        Arc::clone(&GLOBAL)
    }

    /// Returns the mutex for `path`, creating it if needed.
    ///
    /// The entry API holds the shard lock while inserting, so racing callers
    /// always receive the same mutex.
    pub fn lock_for(&self, path: &Path) -> Arc<Mutex<()>> {
        if let Some(lock) = self.locks.get(path) {
            return Arc::clone(&lock);
        }
        Arc::clone(
            &self
                .locks
                .entry(path.to_path_buf())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
