//! Persistent single-column B-tree index: an ordered map from `i64` keys to
//! heap record ids. One file per `(table, column)`, insert-only today.

mod file;
mod page;

pub use file::FileIndex;
pub use page::{MAX_INTERNAL_KEYS, MAX_LEAF_KEYS};

use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::Result;

/// Index keys are 64-bit signed integers; only integer columns are
/// indexable.
pub type Key = i64;

/// Caches open index handles keyed by `(table, column)` under its own lock.
/// Handles are shared; each one serializes its own file access.
#[derive(Debug)]
pub struct IndexManager {
    dir: PathBuf,
    open: Mutex<HashMap<(String, String), Arc<Mutex<FileIndex>>>>,
}

impl IndexManager {
    pub fn new(dir: &Path) -> Self {
        IndexManager {
            dir: dir.to_path_buf(),
            open: Mutex::new(HashMap::new()),
        }
    }

    /// `<dir>/<table>_<column>.idx`
    pub fn index_path(&self, table: &str, column: &str) -> PathBuf {
        self.dir.join(format!("{table}_{column}.idx"))
    }

    /// Returns the cached handle for `(table, column)`, opening or creating
    /// the index file on first use.
    pub fn open_or_create(&self, table: &str, column: &str) -> Result<Arc<Mutex<FileIndex>>> {
        let key = (table.to_string(), column.to_string());
        let mut open = self.open.lock();
        if let Some(handle) = open.get(&key) {
            return Ok(handle.clone());
        }

        let idx = FileIndex::open(self.index_path(table, column), table, column)?;
        let handle = Arc::new(Mutex::new(idx));
        open.insert(key, handle.clone());
        Ok(handle)
    }
}
