//! Package extraction.
//!
//! A package arrives either as a `.mpi` archive (a v104 BSA carrying the
//! manifest plus per-operation payloads) or as an already-extracted
//! directory. Archives are unpacked into a registered scratch directory
//! under the OS temp root; the scratch lives as long as the run.

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::bsa::BsaReaderHandle;
use crate::manifest::MANIFEST_ENTRY;
use crate::scratch;

/// File suffix of packaged archives.
pub const PACKAGE_SUFFIX: &str = ".mpi";

/// An opened package: either a scratch extraction or a pass-through
/// directory. The scratch directory is deleted on drop.
pub struct PackageSource {
    root: PathBuf,
    scratch: Option<PathBuf>,
}

impl PackageSource {
    /// Open a package path: directories pass through, `.mpi` files are
    /// extracted to scratch.
    pub fn open(path: &Path) -> Result<Self> {
        if path.is_dir() {
            info!("Using extracted package directory: {}", path.display());
            return Ok(Self {
                root: path.to_path_buf(),
                scratch: None,
            });
        }

        if !path.is_file() {
            bail!("Package not found: {}", path.display());
        }
        let is_mpi = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.to_lowercase().ends_with(PACKAGE_SUFFIX));
        if !is_mpi {
            bail!(
                "Not an {PACKAGE_SUFFIX} package or directory: {}",
                path.display()
            );
        }

        let scratch_dir = scratch::create_scratch_dir()?;
        info!(
            "Extracting {} to {}",
            path.display(),
            scratch_dir.display()
        );

        let handle = BsaReaderHandle::open(path)
            .with_context(|| format!("Failed to open package: {}", path.display()))?;
        let count = handle
            .extract_all_to(&scratch_dir)
            .with_context(|| format!("Failed to extract package: {}", path.display()))?;
        info!("Extracted {count} package entries");

        Ok(Self {
            root: scratch_dir.clone(),
            scratch: Some(scratch_dir),
        })
    }

    /// Root directory holding the package contents.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the manifest document inside the package.
    pub fn manifest_path(&self) -> PathBuf {
        self.root.join(MANIFEST_ENTRY)
    }
}

impl Drop for PackageSource {
    fn drop(&mut self) {
        let Some(dir) = self.scratch.take() else {
            return;
        };
        // Only delete what carries the reserved scratch prefix
        if !scratch::is_scratch_dir(&dir) {
            warn!("Not deleting unexpected extraction dir: {}", dir.display());
            return;
        }
        match std::fs::remove_dir_all(&dir) {
            Ok(()) => scratch::unregister(&dir),
            Err(e) => warn!("Failed to remove {}: {e}", dir.display()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bsa::{default_flags, BsaWriter, WRITE_VERSION};
    use ba2::tes4::ArchiveTypes;
    use tempfile::tempdir;

    #[test]
    fn test_directory_passes_through() {
        let temp = tempdir().unwrap();
        let source = PackageSource::open(temp.path()).unwrap();
        assert_eq!(source.root(), temp.path());
        drop(source);
        // Pass-through directories are never deleted
        assert!(temp.path().exists());
    }

    #[test]
    fn test_mpi_extracts_to_scratch_and_cleans_up() {
        let _guard = crate::scratch::test_guard();
        let temp = tempdir().unwrap();
        let mpi = temp.path().join("package.mpi");
        let mut writer = BsaWriter::new(WRITE_VERSION, default_flags(), ArchiveTypes::MISC);
        writer.add_file("_package", "index.json", b"{}".to_vec());
        writer.add_file("files", "payload.esp", b"TES4".to_vec());
        writer.write(&mpi).unwrap();

        let extracted_root;
        {
            let source = PackageSource::open(&mpi).unwrap();
            extracted_root = source.root().to_path_buf();
            assert!(source.manifest_path().is_file());
            assert!(extracted_root.join("files/payload.esp").is_file());
        }
        assert!(!extracted_root.exists());
    }

    #[test]
    fn test_wrong_suffix_rejected() {
        let temp = tempdir().unwrap();
        let other = temp.path().join("archive.zip");
        std::fs::write(&other, b"PK").unwrap();
        assert!(PackageSource::open(&other).is_err());

        assert!(PackageSource::open(&temp.path().join("missing.mpi")).is_err());
    }
}
