//! Installation logger.
//!
//! Collects errors, warnings and missing-file entries from all worker
//! threads, then writes the `ttw-installation.log` report into the
//! destination. The lock is never held across I/O.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::warn;

/// Name of the report file written into the destination.
pub const REPORT_NAME: &str = "ttw-installation.log";

#[derive(Default)]
struct Entries {
    errors: Vec<String>,
    warnings: Vec<String>,
    missing: Vec<String>,
}

/// Thread-safe collection of per-run findings.
#[derive(Default)]
pub struct InstallLog {
    entries: Mutex<Entries>,
}

impl InstallLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn error(&self, message: impl Into<String>) {
        let message = message.into();
        warn!("{message}");
        self.entries
            .lock()
            .expect("install log lock poisoned")
            .errors
            .push(message);
    }

    pub fn warning(&self, message: impl Into<String>) {
        self.entries
            .lock()
            .expect("install log lock poisoned")
            .warnings
            .push(message.into());
    }

    pub fn missing_file(&self, description: impl Into<String>) {
        let description = description.into();
        warn!("Missing: {description}");
        self.entries
            .lock()
            .expect("install log lock poisoned")
            .missing
            .push(description);
    }

    pub fn error_count(&self) -> usize {
        self.entries.lock().expect("install log lock poisoned").errors.len()
    }

    pub fn warning_count(&self) -> usize {
        self.entries.lock().expect("install log lock poisoned").warnings.len()
    }

    pub fn missing_count(&self) -> usize {
        self.entries.lock().expect("install log lock poisoned").missing.len()
    }

    pub fn is_clean(&self) -> bool {
        let entries = self.entries.lock().expect("install log lock poisoned");
        entries.errors.is_empty() && entries.warnings.is_empty() && entries.missing.is_empty()
    }

    /// Write the report into `destination`. Returns the report path.
    pub fn write_report(&self, destination: &Path) -> Result<PathBuf> {
        // Snapshot under the lock, format and write outside it
        let (errors, warnings, missing) = {
            let entries = self.entries.lock().expect("install log lock poisoned");
            (
                entries.errors.clone(),
                entries.warnings.clone(),
                entries.missing.clone(),
            )
        };

        let mut report = String::new();
        report.push_str(&format!(
            "Installation report: {} errors, {} warnings, {} missing files\n\n",
            errors.len(),
            warnings.len(),
            missing.len()
        ));

        for (title, list) in [
            ("Errors", &errors),
            ("Warnings", &warnings),
            ("Missing files", &missing),
        ] {
            if list.is_empty() {
                continue;
            }
            report.push_str(&format!("=== {title} ===\n"));
            for entry in list {
                report.push_str(&format!("  {entry}\n"));
            }
            report.push('\n');
        }

        let path = destination.join(REPORT_NAME);
        std::fs::write(&path, report)
            .with_context(|| format!("Failed to write report: {}", path.display()))?;
        Ok(path)
    }
}
