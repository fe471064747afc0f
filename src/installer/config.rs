//! Installation configuration
//!
//! Paths to the package, the output directory, and the reference game
//! installations. Any subset of the three games may be configured; assets
//! that reference an unconfigured game fail at resolve time, not here.

use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::paths;

/// Executable that proves a directory really is the named game's root.
const FO3_SIGNATURE: &str = "Fallout3.exe";
const FNV_SIGNATURE: &str = "FalloutNV.exe";
const TES4_SIGNATURE: &str = "Oblivion.exe";

/// Configuration for one installation run.
#[derive(Debug, Clone, Default)]
pub struct InstallConfig {
    /// The `.mpi` package file, or an already-extracted package directory
    pub package_path: PathBuf,

    /// Output directory; created if missing
    pub destination: PathBuf,

    /// Fallout 3 installation root
    pub fo3_root: Option<PathBuf>,

    /// Fallout New Vegas installation root
    pub fnv_root: Option<PathBuf>,

    /// Oblivion installation root
    pub tes4_root: Option<PathBuf>,

    /// Data-directory overrides. Used when a package writes into an
    /// arbitrary output folder and post-commands must act on that folder
    /// instead of the game's own Data directory.
    pub fo3_data: Option<PathBuf>,
    pub fnv_data: Option<PathBuf>,
    pub tes4_data: Option<PathBuf>,

    /// Continue past failed validation checks without prompting
    pub assume_yes: bool,
}

impl InstallConfig {
    /// Fallout 3 data directory: the override, else `<root>/Data`.
    pub fn fo3_data_dir(&self) -> Option<PathBuf> {
        self.fo3_data
            .clone()
            .or_else(|| self.fo3_root.as_ref().map(|r| r.join("Data")))
    }

    /// Fallout New Vegas data directory: the override, else `<root>/Data`.
    pub fn fnv_data_dir(&self) -> Option<PathBuf> {
        self.fnv_data
            .clone()
            .or_else(|| self.fnv_root.as_ref().map(|r| r.join("Data")))
    }

    /// Oblivion data directory: the override, else `<root>/Data`.
    pub fn tes4_data_dir(&self) -> Option<PathBuf> {
        self.tes4_data
            .clone()
            .or_else(|| self.tes4_root.as_ref().map(|r| r.join("Data")))
    }

    /// Validate the configuration. Destination and package are required;
    /// each configured game root must exist and contain its signature
    /// executable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.package_path.as_os_str().is_empty() {
            return Err(ConfigError::MissingPackage);
        }
        if !self.package_path.exists() {
            return Err(ConfigError::PackageNotFound(self.package_path.clone()));
        }
        if self.destination.as_os_str().is_empty() {
            return Err(ConfigError::MissingDestination);
        }

        check_game_root("Fallout 3", self.fo3_root.as_deref(), FO3_SIGNATURE)?;
        check_game_root("Fallout New Vegas", self.fnv_root.as_deref(), FNV_SIGNATURE)?;
        check_game_root("Oblivion", self.tes4_root.as_deref(), TES4_SIGNATURE)?;

        Ok(())
    }
}

fn check_game_root(
    game: &'static str,
    root: Option<&Path>,
    signature: &'static str,
) -> Result<(), ConfigError> {
    let Some(root) = root else {
        return Ok(());
    };
    if !root.is_dir() {
        return Err(ConfigError::GameRootNotFound(game, root.to_path_buf()));
    }
    if paths::locate_file(root, signature).is_none() {
        return Err(ConfigError::SignatureMissing(
            game,
            signature,
            root.to_path_buf(),
        ));
    }
    Ok(())
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Package path is required")]
    MissingPackage,

    #[error("Package not found: {0}")]
    PackageNotFound(PathBuf),

    #[error("Destination directory is required")]
    MissingDestination,

    #[error("{0} directory not found: {1}")]
    GameRootNotFound(&'static str, PathBuf),

    #[error("{1} not found in {2} - is this really a {0} installation?")]
    SignatureMissing(&'static str, &'static str, PathBuf),
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn base_config(temp: &Path) -> InstallConfig {
        let package = temp.join("pkg");
        std::fs::create_dir_all(&package).unwrap();
        InstallConfig {
            package_path: package,
            destination: temp.join("out"),
            ..Default::default()
        }
    }

    #[test]
    fn test_minimal_config_is_valid() {
        let temp = tempdir().unwrap();
        assert!(base_config(temp.path()).validate().is_ok());
    }

    #[test]
    fn test_missing_package_rejected() {
        let config = InstallConfig {
            destination: PathBuf::from("/tmp/out"),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::MissingPackage)));

        let config = InstallConfig {
            package_path: PathBuf::from("/nonexistent/x.mpi"),
            destination: PathBuf::from("/tmp/out"),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::PackageNotFound(_))
        ));
    }

    #[test]
    fn test_game_root_requires_signature_exe() {
        let temp = tempdir().unwrap();
        let fnv = temp.path().join("FNV");
        std::fs::create_dir_all(&fnv).unwrap();

        let mut config = base_config(temp.path());
        config.fnv_root = Some(fnv.clone());
        assert!(matches!(
            config.validate(),
            Err(ConfigError::SignatureMissing("Fallout New Vegas", _, _))
        ));

        std::fs::write(fnv.join("FalloutNV.exe"), b"MZ").unwrap();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_signature_lookup_is_case_insensitive() {
        let temp = tempdir().unwrap();
        let fo3 = temp.path().join("FO3");
        std::fs::create_dir_all(&fo3).unwrap();
        std::fs::write(fo3.join("fallout3.EXE"), b"MZ").unwrap();

        let mut config = base_config(temp.path());
        config.fo3_root = Some(fo3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_data_dir_defaults_and_overrides() {
        let config = InstallConfig {
            fnv_root: Some(PathBuf::from("/games/FNV")),
            fo3_root: Some(PathBuf::from("/games/FO3")),
            fo3_data: Some(PathBuf::from("/custom/fo3data")),
            ..Default::default()
        };
        assert_eq!(config.fnv_data_dir(), Some(PathBuf::from("/games/FNV/Data")));
        assert_eq!(config.fo3_data_dir(), Some(PathBuf::from("/custom/fo3data")));
        assert_eq!(config.tes4_data_dir(), None);
    }
}
