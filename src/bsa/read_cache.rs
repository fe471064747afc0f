//! Shared read-handle cache for source archives.
//!
//! Many assets read from the same handful of game BSAs, from many worker
//! threads at once. Each archive is opened exactly once; concurrent readers
//! share the handle, and dropping the cache closes every handle exactly once.

use anyhow::Result;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::debug;

use super::codec::BsaReaderHandle;

#[derive(Default)]
pub struct BsaReadCache {
    handles: Mutex<HashMap<PathBuf, Arc<BsaReaderHandle>>>,
}

impl BsaReadCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the shared handle for `path`, opening the archive on first use.
    /// The path is canonicalized so aliases share one handle.
    pub fn handle(&self, path: &Path) -> Result<Arc<BsaReaderHandle>> {
        let key = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());

        let mut handles = self.handles.lock().expect("read cache lock poisoned");
        if let Some(handle) = handles.get(&key) {
            return Ok(Arc::clone(handle));
        }

        // Opening under the lock serializes first-open per archive, which is
        // what guarantees open-once
        let handle = Arc::new(BsaReaderHandle::open(&key)?);
        debug!("Cached read handle for {}", key.display());
        handles.insert(key, Arc::clone(&handle));
        Ok(handle)
    }

    /// Number of archives currently open.
    pub fn open_count(&self) -> usize {
        self.handles.lock().expect("read cache lock poisoned").len()
    }
}
