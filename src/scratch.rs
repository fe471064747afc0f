//! Process-wide registry of scratch directories.
//!
//! Package extraction and patch staging work out of throwaway directories
//! under the OS temp root. Every scratch directory is registered here so the
//! driver can delete them all at the end of a run, and a startup sweep
//! removes leftovers from crashed prior runs.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};
use tracing::{debug, warn};
use uuid::Uuid;

/// Reserved name prefix for scratch directories. The cleanup paths refuse to
/// delete anything that does not carry it.
pub const SCRATCH_PREFIX: &str = "ttw_mpi_";

static REGISTRY: OnceLock<Mutex<Vec<PathBuf>>> = OnceLock::new();

/// The registry and the temp-root sweep are process-global; tests that
/// exercise them must not interleave.
#[cfg(test)]
pub(crate) static TEST_SCRATCH_LOCK: Mutex<()> = Mutex::new(());

#[cfg(test)]
pub(crate) fn test_guard() -> std::sync::MutexGuard<'static, ()> {
    TEST_SCRATCH_LOCK
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn registry() -> &'static Mutex<Vec<PathBuf>> {
    REGISTRY.get_or_init(|| Mutex::new(Vec::new()))
}

/// Whether `path` carries the reserved scratch prefix in its final component.
pub fn is_scratch_dir(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with(SCRATCH_PREFIX))
}

/// Create a fresh scratch directory under the OS temp root and register it.
pub fn create_scratch_dir() -> Result<PathBuf> {
    let dir = std::env::temp_dir().join(format!("{SCRATCH_PREFIX}{}", Uuid::new_v4()));
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create scratch directory: {}", dir.display()))?;
    register(&dir);
    Ok(dir)
}

/// Register an existing directory for end-of-run cleanup.
pub fn register(path: &Path) {
    registry()
        .lock()
        .expect("scratch registry lock poisoned")
        .push(path.to_path_buf());
}

/// Remove a directory from the registry (after successful deletion).
pub fn unregister(path: &Path) {
    registry()
        .lock()
        .expect("scratch registry lock poisoned")
        .retain(|p| p != path);
}

/// Delete every registered scratch directory. Best-effort: failures are
/// logged, not propagated. Directories without the reserved prefix are
/// skipped and left registered.
pub fn cleanup_all() {
    let dirs: Vec<PathBuf> = {
        let mut guard = registry().lock().expect("scratch registry lock poisoned");
        std::mem::take(&mut *guard)
    };

    for dir in dirs {
        if !is_scratch_dir(&dir) {
            warn!("Refusing to delete non-scratch directory: {}", dir.display());
            register(&dir);
            continue;
        }
        if !dir.exists() {
            continue;
        }
        match std::fs::remove_dir_all(&dir) {
            Ok(()) => debug!("Removed scratch directory: {}", dir.display()),
            Err(e) => warn!("Failed to remove scratch directory {}: {}", dir.display(), e),
        }
    }
}

/// Delete stale `ttw_mpi_*` directories left in the temp root by prior runs.
/// Called once at startup. Returns the number of directories removed.
pub fn sweep_stale() -> usize {
    let temp_root = std::env::temp_dir();
    let mut removed = 0;

    let entries = match std::fs::read_dir(&temp_root) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Cannot scan temp root {}: {}", temp_root.display(), e);
            return 0;
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_dir() || !is_scratch_dir(&path) {
            continue;
        }
        match std::fs::remove_dir_all(&path) {
            Ok(()) => {
                debug!("Swept stale scratch directory: {}", path.display());
                removed += 1;
            }
            Err(e) => warn!("Failed to sweep {}: {}", path.display(), e),
        }
    }

    removed
}
