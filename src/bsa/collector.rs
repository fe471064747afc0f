//! Write-archive staging and packing.
//!
//! Every type-2 (write-archive) location whose resolved name ends in `.bsa`
//! becomes a write target. Workers contribute files into a per-target
//! staging directory on disk; entry paths are lowercased (BSA names are
//! case-insensitive), which is also what surfaces case collisions between
//! logical paths. Once all assets are processed the staged trees are packed
//! into archives, ascending by location index.

use anyhow::{bail, Context, Result};
use ba2::tes4::{ArchiveFlags, ArchiveTypes};
use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tracing::{info, warn};
use walkdir::WalkDir;

use super::codec::BsaWriter;
use super::{default_flags, detect_types, WRITE_VERSION};
use crate::manifest::Location;
use crate::paths;

/// Name of the collision report emitted next to the packed archives.
pub const COLLISION_REPORT_NAME: &str = "bsa_collisions_report.txt";

/// Directory under the destination that holds per-target staging trees.
const STAGING_DIR_NAME: &str = ".ttw_bsa_staging_temp";

/// Two logical paths that collapsed onto one staging path.
#[derive(Debug, Clone)]
pub struct Collision {
    pub original: String,
    pub duplicate: String,
    pub staging_path: PathBuf,
}

struct TargetBook {
    /// normalized staging-relative path -> original logical path
    staged: HashMap<String, String>,
    collisions: Vec<Collision>,
}

struct WriteTarget {
    name: String,
    output_path: PathBuf,
    flags: ArchiveFlags,
    types: ArchiveTypes,
    staging_dir: PathBuf,
    file_count: AtomicUsize,
    failures: AtomicUsize,
    book: Mutex<TargetBook>,
}

pub struct BsaWriteCollector {
    destination: PathBuf,
    staging_root: PathBuf,
    targets: BTreeMap<usize, WriteTarget>,
}

impl BsaWriteCollector {
    pub fn new(destination: &Path) -> Self {
        Self {
            destination: destination.to_path_buf(),
            staging_root: destination.join(STAGING_DIR_NAME),
            targets: BTreeMap::new(),
        }
    }

    /// Declare a write target for a type-2 location. Locations whose
    /// resolved path does not end in `.bsa` are ignored.
    pub fn declare(
        &mut self,
        loc_index: usize,
        output_path: PathBuf,
        location: &Location,
    ) -> Result<()> {
        let name = output_path
            .file_name()
            .and_then(|n| n.to_str())
            .with_context(|| format!("Write-archive path has no file name: {}", output_path.display()))?
            .to_string();
        if !name.to_lowercase().ends_with(".bsa") {
            return Ok(());
        }

        let flags = location
            .archive_flags
            .map(ArchiveFlags::from_bits_truncate)
            .unwrap_or_else(default_flags);
        let types = location
            .archive_type
            .map(ArchiveTypes::from_bits_truncate)
            .unwrap_or_else(|| detect_types(&name));

        let staging_dir = self.staging_root.join(format!("bsa_{loc_index}"));
        std::fs::create_dir_all(&staging_dir).with_context(|| {
            format!("Failed to create staging directory: {}", staging_dir.display())
        })?;

        info!("Registered BSA target [{loc_index}]: {name} ({types:?})");

        self.targets.insert(
            loc_index,
            WriteTarget {
                name,
                output_path,
                flags,
                types,
                staging_dir,
                file_count: AtomicUsize::new(0),
                failures: AtomicUsize::new(0),
                book: Mutex::new(TargetBook {
                    staged: HashMap::new(),
                    collisions: Vec::new(),
                }),
            },
        );
        Ok(())
    }

    /// Whether a location index is a declared write target.
    pub fn is_write_target(&self, loc_index: usize) -> bool {
        self.targets.contains_key(&loc_index)
    }

    /// Distinct staged entries for a target.
    pub fn file_count(&self, loc_index: usize) -> usize {
        self.targets
            .get(&loc_index)
            .map(|t| t.file_count.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Total collisions recorded across all targets.
    pub fn collision_count(&self) -> usize {
        self.targets
            .values()
            .map(|t| t.book.lock().expect("collector lock poisoned").collisions.len())
            .sum()
    }

    pub fn target_count(&self) -> usize {
        self.targets.len()
    }

    /// Stage a file for a write target. The logical path is lowercased and
    /// separator-normalized; a path that collapses onto an already-staged
    /// entry is recorded as a collision and overwrites it (last write wins).
    pub fn add_file(&self, loc_index: usize, logical_path: &str, data: &[u8]) -> Result<()> {
        let target = self
            .targets
            .get(&loc_index)
            .with_context(|| format!("Location {loc_index} is not a BSA write target"))?;

        let normalized = paths::normalize_logical_path(logical_path);
        if normalized.is_empty() {
            bail!("Empty logical path for BSA target {}", target.name);
        }
        let staging_path = target.staging_dir.join(&normalized);

        // Collision bookkeeping and the write are serialized per target so
        // two case-variant writers cannot interleave half-written files
        let mut book = target.book.lock().expect("collector lock poisoned");

        if let Some(previous) = book.staged.get(&normalized) {
            let collision = Collision {
                original: previous.clone(),
                duplicate: logical_path.to_string(),
                staging_path: staging_path.clone(),
            };
            warn!(
                "BSA entry collision in {}: {} and {} both stage to {}",
                target.name, collision.original, collision.duplicate, normalized
            );
            book.collisions.push(collision);
        } else {
            book.staged
                .insert(normalized.clone(), logical_path.to_string());
            target.file_count.fetch_add(1, Ordering::Relaxed);
        }

        paths::ensure_parent_dirs(&staging_path)?;
        let parent = staging_path.parent().unwrap_or(&target.staging_dir);
        let mut tmp = tempfile::NamedTempFile::new_in(parent)
            .with_context(|| format!("Failed to stage {}", staging_path.display()))?;
        tmp.write_all(data)
            .with_context(|| format!("Failed to stage {}", staging_path.display()))?;
        tmp.persist(&staging_path)
            .with_context(|| format!("Failed to stage {}", staging_path.display()))?;

        Ok(())
    }

    /// Pack every non-empty target into its archive, ascending by location
    /// index, then write the collision report if any collisions were seen.
    /// Returns the number of per-file and per-archive failures.
    pub fn write_all<F>(&self, mut progress: F) -> Result<usize>
    where
        F: FnMut(usize, usize, &str),
    {
        let non_empty: Vec<(&usize, &WriteTarget)> = self
            .targets
            .iter()
            .filter(|(_, t)| t.file_count.load(Ordering::Relaxed) > 0)
            .collect();

        let total = non_empty.len();
        for (n, (index, target)) in non_empty.iter().enumerate() {
            progress(n + 1, total, &target.name);
            info!(
                "Writing BSA {}/{}: {} ({} files)",
                n + 1,
                total,
                target.name,
                target.file_count.load(Ordering::Relaxed)
            );

            let mut writer = BsaWriter::new(WRITE_VERSION, target.flags, target.types);
            for entry in WalkDir::new(&target.staging_dir)
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file())
            {
                let rel = match entry.path().strip_prefix(&target.staging_dir) {
                    Ok(rel) => rel.to_string_lossy().to_lowercase().replace('\\', "/"),
                    Err(_) => continue,
                };
                let (dir, name) = match rel.rfind('/') {
                    Some(idx) => (&rel[..idx], &rel[idx + 1..]),
                    None => ("", rel.as_str()),
                };
                match std::fs::read(entry.path()) {
                    Ok(data) => writer.add_file(dir, name, data),
                    Err(e) => {
                        warn!("Failed to read staged file {}: {e}", entry.path().display());
                        target.failures.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }

            if let Err(e) = writer.write(&target.output_path) {
                warn!("Failed to write BSA [{index}] {}: {e}", target.name);
                target.failures.fetch_add(1, Ordering::Relaxed);
            }
        }

        self.write_collision_report()?;

        Ok(self
            .targets
            .values()
            .map(|t| t.failures.load(Ordering::Relaxed))
            .sum())
    }

    fn write_collision_report(&self) -> Result<()> {
        if self.collision_count() == 0 {
            return Ok(());
        }

        let report_path = self.destination.join(COLLISION_REPORT_NAME);
        let mut report = String::new();
        report.push_str("Case collisions detected while staging BSA entries.\n");
        report.push_str("For each pair, the later write overwrote the earlier one.\n\n");

        for target in self.targets.values() {
            let book = target.book.lock().expect("collector lock poisoned");
            if book.collisions.is_empty() {
                continue;
            }
            report.push_str(&format!("{}:\n", target.name));
            for c in &book.collisions {
                report.push_str(&format!(
                    "  {} <-> {} (staged as {})\n",
                    c.original,
                    c.duplicate,
                    c.staging_path.display()
                ));
            }
            report.push('\n');
        }

        std::fs::write(&report_path, report)
            .with_context(|| format!("Failed to write {}", report_path.display()))?;
        info!("Wrote collision report: {}", report_path.display());
        Ok(())
    }
}

impl Drop for BsaWriteCollector {
    fn drop(&mut self) {
        if self.staging_root.exists() {
            if let Err(e) = std::fs::remove_dir_all(&self.staging_root) {
                warn!(
                    "Failed to remove staging root {}: {e}",
                    self.staging_root.display()
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bsa::codec::BsaReaderHandle;
    use crate::manifest::LOC_WRITE_ARCHIVE;
    use tempfile::tempdir;

    fn write_location(flags: Option<u32>, types: Option<u16>) -> Location {
        Location {
            name: "out".to_string(),
            loc_type: LOC_WRITE_ARCHIVE,
            value: String::new(),
            archive_type: types,
            archive_flags: flags,
            files_flags: None,
            archive_compressed: None,
        }
    }

    #[test]
    fn test_declare_and_stage_and_pack() {
        let temp = tempdir().unwrap();
        let dest = temp.path();
        let out_bsa = dest.join("New Fallout - Meshes.bsa");

        let mut collector = BsaWriteCollector::new(dest);
        collector
            .declare(1, out_bsa.clone(), &write_location(Some(0x107), None))
            .unwrap();
        assert!(collector.is_write_target(1));
        assert!(!collector.is_write_target(0));

        for i in 0..5 {
            collector
                .add_file(1, &format!("Meshes\\Armor\\part{i}.nif"), b"mesh")
                .unwrap();
        }
        assert_eq!(collector.file_count(1), 5);

        let failures = collector.write_all(|_, _, _| {}).unwrap();
        assert_eq!(failures, 0);

        let handle = BsaReaderHandle::open(&out_bsa).unwrap();
        assert_eq!(handle.file_count(), 5);
        // Entries are stored lowercased
        assert!(handle.contains("meshes/armor/part0.nif"));
        for entry in handle.entries() {
            assert_eq!(entry, entry.to_lowercase());
        }
        // No collisions, no report
        assert!(!dest.join(COLLISION_REPORT_NAME).exists());
    }

    #[test]
    fn test_types_inferred_from_name() {
        let temp = tempdir().unwrap();
        let mut collector = BsaWriteCollector::new(temp.path());
        collector
            .declare(
                0,
                temp.path().join("TTW - Voices1.bsa"),
                &write_location(None, None),
            )
            .unwrap();
        assert_eq!(collector.targets[&0].types, ArchiveTypes::VOICES);
        assert_eq!(collector.targets[&0].flags, default_flags());
    }

    #[test]
    fn test_non_bsa_location_is_ignored() {
        let temp = tempdir().unwrap();
        let mut collector = BsaWriteCollector::new(temp.path());
        collector
            .declare(0, temp.path().join("loose_output"), &write_location(None, None))
            .unwrap();
        assert!(!collector.is_write_target(0));
    }

    #[test]
    fn test_case_collision_recorded_last_write_wins() {
        let temp = tempdir().unwrap();
        let dest = temp.path();
        let out_bsa = dest.join("TTW - Misc.bsa");

        let mut collector = BsaWriteCollector::new(dest);
        collector
            .declare(2, out_bsa.clone(), &write_location(None, None))
            .unwrap();

        collector.add_file(2, "Dir/File.dds", b"first").unwrap();
        collector.add_file(2, "dir/file.dds", b"second").unwrap();

        // One distinct entry, one collision
        assert_eq!(collector.file_count(2), 1);
        assert_eq!(collector.collision_count(), 1);

        let failures = collector.write_all(|_, _, _| {}).unwrap();
        assert_eq!(failures, 0);

        let handle = BsaReaderHandle::open(&out_bsa).unwrap();
        assert_eq!(handle.file_count(), 1);
        assert_eq!(handle.extract("dir/file.dds").unwrap(), b"second");

        let report = std::fs::read_to_string(dest.join(COLLISION_REPORT_NAME)).unwrap();
        assert!(report.contains("Dir/File.dds"));
        assert!(report.contains("dir/file.dds"));
        // Exactly one collision line for the pair
        assert_eq!(report.matches("<->").count(), 1);
    }

    #[test]
    fn test_staging_cleaned_up_on_drop() {
        let temp = tempdir().unwrap();
        let staging_root = temp.path().join(STAGING_DIR_NAME);
        {
            let mut collector = BsaWriteCollector::new(temp.path());
            collector
                .declare(0, temp.path().join("a.bsa"), &write_location(None, None))
                .unwrap();
            collector.add_file(0, "x.esp", b"data").unwrap();
            assert!(staging_root.exists());
        }
        assert!(!staging_root.exists());
    }

    #[test]
    fn test_add_file_to_undeclared_target_errors() {
        let temp = tempdir().unwrap();
        let collector = BsaWriteCollector::new(temp.path());
        assert!(collector.add_file(9, "a.esp", b"x").is_err());
    }
}
