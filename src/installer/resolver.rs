//! Location resolution.
//!
//! Location values in the manifest carry `%NAME%` markers for the configured
//! game and output roots. Expansion is lazy: a variable whose configuration
//! counterpart is unset stays literal, and an unexpanded marker that reaches
//! a filesystem operation fails that asset rather than the whole run.

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};

use super::config::InstallConfig;
use crate::manifest::Location;

pub struct LocationResolver<'a> {
    config: &'a InstallConfig,
}

impl<'a> LocationResolver<'a> {
    pub fn new(config: &'a InstallConfig) -> Self {
        Self { config }
    }

    /// Expand the configured variables in `value`. On Unix hosts the result
    /// is converted to forward slashes.
    pub fn expand(&self, value: &str) -> String {
        let mut out = value.to_string();

        let mut substitute = |marker: &str, replacement: Option<PathBuf>| {
            if let Some(path) = replacement {
                out = out.replace(marker, &path.to_string_lossy());
            }
        };

        substitute("%DESTINATION%", Some(self.config.destination.clone()));
        substitute("%FO3ROOT%", self.config.fo3_root.clone());
        substitute("%FO3DATA%", self.config.fo3_data_dir());
        substitute("%FNVROOT%", self.config.fnv_root.clone());
        substitute("%FNVDATA%", self.config.fnv_data_dir());
        substitute("%TES4ROOT%", self.config.tes4_root.clone());
        substitute("%TES4DATA%", self.config.tes4_data_dir());

        if cfg!(unix) {
            out = out.replace('\\', "/");
        }
        out
    }

    /// Full expanded value of a location.
    pub fn resolve_path(&self, location: &Location) -> String {
        self.expand(&location.value)
    }

    /// The directory a location addresses: the expansion itself for a
    /// directory location, the parent directory for a write-archive
    /// location. Read-archive locations have no directory.
    pub fn directory_path(&self, location: &Location) -> Result<PathBuf> {
        if location.is_read_archive() {
            bail!(
                "Location '{}' is a read archive, not a directory",
                location.name
            );
        }
        let expanded = PathBuf::from(self.resolve_path(location));
        if location.is_write_archive() {
            return expanded
                .parent()
                .map(Path::to_path_buf)
                .with_context(|| {
                    format!("Write-archive path has no parent: {}", expanded.display())
                });
        }
        Ok(expanded)
    }

    /// The archive file path of a read-archive location.
    pub fn bsa_path(&self, location: &Location) -> Result<PathBuf> {
        if !location.is_read_archive() {
            bail!("Location '{}' is not a read archive", location.name);
        }
        Ok(PathBuf::from(self.resolve_path(location)))
    }
}

/// Reject paths that still carry an unexpanded `%NAME%` marker. Called at
/// the point a resolved path is about to hit the filesystem.
pub fn ensure_expanded(path: &Path) -> Result<()> {
    let text = path.to_string_lossy();
    if text.contains('%') {
        bail!("Path contains an unexpanded variable: {text}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{LOC_DIRECTORY, LOC_READ_ARCHIVE, LOC_WRITE_ARCHIVE};

    fn config() -> InstallConfig {
        InstallConfig {
            destination: PathBuf::from("/out"),
            fnv_root: Some(PathBuf::from("/games/FNV")),
            fo3_root: Some(PathBuf::from("/games/FO3")),
            fo3_data: Some(PathBuf::from("/override/fo3")),
            ..Default::default()
        }
    }

    fn location(loc_type: i64, value: &str) -> Location {
        Location {
            name: "test".to_string(),
            loc_type,
            value: value.to_string(),
            archive_type: None,
            archive_flags: None,
            files_flags: None,
            archive_compressed: None,
        }
    }

    #[test]
    fn test_expand_variables_and_separators() {
        let config = config();
        let resolver = LocationResolver::new(&config);

        assert_eq!(
            resolver.expand("%FNVDATA%\\Fallout - Voices1.bsa"),
            "/games/FNV/Data/Fallout - Voices1.bsa"
        );
        assert_eq!(resolver.expand("%DESTINATION%\\x"), "/out/x");
        // Override wins over <root>/Data
        assert_eq!(resolver.expand("%FO3DATA%"), "/override/fo3");
    }

    #[test]
    fn test_unset_variable_stays_literal() {
        let config = config();
        let resolver = LocationResolver::new(&config);
        // No Oblivion root configured
        let expanded = resolver.expand("%TES4ROOT%\\Data");
        assert_eq!(expanded, "%TES4ROOT%/Data");
        assert!(ensure_expanded(Path::new(&expanded)).is_err());
    }

    #[test]
    fn test_directory_path_by_location_type() {
        let config = config();
        let resolver = LocationResolver::new(&config);

        let dir = location(LOC_DIRECTORY, "%DESTINATION%");
        assert_eq!(resolver.directory_path(&dir).unwrap(), PathBuf::from("/out"));

        let write = location(LOC_WRITE_ARCHIVE, "%DESTINATION%\\TTW - Meshes.bsa");
        assert_eq!(
            resolver.directory_path(&write).unwrap(),
            PathBuf::from("/out")
        );

        let read = location(LOC_READ_ARCHIVE, "%FNVDATA%\\a.bsa");
        assert!(resolver.directory_path(&read).is_err());
    }

    #[test]
    fn test_bsa_path_requires_read_archive() {
        let config = config();
        let resolver = LocationResolver::new(&config);

        let read = location(LOC_READ_ARCHIVE, "%FNVDATA%\\Fallout - Meshes.bsa");
        assert_eq!(
            resolver.bsa_path(&read).unwrap(),
            PathBuf::from("/games/FNV/Data/Fallout - Meshes.bsa")
        );

        let dir = location(LOC_DIRECTORY, "%DESTINATION%");
        assert!(resolver.bsa_path(&dir).is_err());
    }

    #[test]
    fn test_ensure_expanded() {
        assert!(ensure_expanded(Path::new("/clean/path")).is_ok());
        assert!(ensure_expanded(Path::new("/out/%UNKNOWN%/x")).is_err());
    }
}
