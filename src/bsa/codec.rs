//! Archive codec adapter over the `ba2` library.
//!
//! `BsaReaderHandle` wraps an opened archive: entry extraction (with the
//! format's nested-zlib quirk handled), existence checks, and full
//! extraction for package unpacking. `BsaWriter` assembles and writes a new
//! archive. Buffers returned by the codec are copied into owned `Vec<u8>`s
//! before leaving this module, so release is tied to drop on every path.

use anyhow::{bail, Context, Result};
use ba2::tes4::{
    Archive, ArchiveFlags, ArchiveKey, ArchiveOptions, ArchiveTypes, Directory, DirectoryKey,
    File as ArchiveFile, FileCompressionOptions, Version,
};
use ba2::{ByteSlice, CompressableFrom, Copied, Reader};
use rayon::prelude::*;
use std::fs;
use std::io::{BufWriter, Read};
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::paths;

/// Zlib stream header that marks a doubly-compressed payload.
const NESTED_ZLIB_MAGIC: [u8; 2] = [0x78, 0x9C];

/// Give a wedged inflate this long before falling back to the raw bytes.
const NESTED_INFLATE_TIMEOUT: Duration = Duration::from_secs(30);

/// An opened read-mode archive.
///
/// Entry extraction is safe to call concurrently on a shared handle; the
/// underlying archive map is immutable after open.
pub struct BsaReaderHandle {
    path: PathBuf,
    archive: Archive<'static>,
    compression: FileCompressionOptions,
}

impl BsaReaderHandle {
    /// Open an archive for reading.
    ///
    /// Entries are read into owned buffers (`Copied`) rather than borrowed
    /// from a file mapping, so a handle can be shared across worker threads.
    pub fn open(path: &Path) -> Result<Self> {
        let bytes = fs::read(path)
            .with_context(|| format!("Failed to open BSA: {}", path.display()))?;
        let (archive, options): (Archive<'static>, _) = Archive::read(Copied(&bytes))
            .with_context(|| format!("Failed to parse BSA: {}", path.display()))?;
        let compression: FileCompressionOptions = (&options).into();
        debug!("Opened BSA: {}", path.display());
        Ok(Self {
            path: path.to_path_buf(),
            archive,
            compression,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of file entries across all directories.
    pub fn file_count(&self) -> usize {
        self.archive.iter().map(|(_, dir)| dir.iter().count()).sum()
    }

    /// List entry paths in archive convention (backslash-joined).
    pub fn entries(&self) -> Vec<String> {
        let mut out = Vec::new();
        for (dir_key, directory) in self.archive.iter() {
            let dir_name = String::from_utf8_lossy(dir_key.name().as_bytes()).to_string();
            for (file_key, _) in directory.iter() {
                let file_name = String::from_utf8_lossy(file_key.name().as_bytes());
                if dir_name.is_empty() || dir_name == "." {
                    out.push(file_name.to_string());
                } else {
                    out.push(format!("{dir_name}\\{file_name}"));
                }
            }
        }
        out
    }

    /// Whether an entry exists (case-insensitive, either separator).
    pub fn contains(&self, entry_path: &str) -> bool {
        self.find(entry_path).is_some()
    }

    fn find(&self, entry_path: &str) -> Option<&ArchiveFile<'static>> {
        let normalized = entry_path.replace('/', "\\");
        let (dir_name, file_name) = match normalized.rfind('\\') {
            Some(idx) => (&normalized[..idx], &normalized[idx + 1..]),
            None => ("", normalized.as_str()),
        };

        for (dir_key, directory) in self.archive.iter() {
            let current_dir = String::from_utf8_lossy(dir_key.name().as_bytes());
            let dir_matches = current_dir.eq_ignore_ascii_case(dir_name)
                || (dir_name.is_empty() && current_dir == ".");
            if !dir_matches {
                continue;
            }
            for (file_key, file) in directory.iter() {
                let current_file = String::from_utf8_lossy(file_key.name().as_bytes());
                if current_file.eq_ignore_ascii_case(file_name) {
                    return Some(file);
                }
            }
        }
        None
    }

    /// Extract a single entry to owned bytes, decompressing as needed and
    /// unwrapping the nested-zlib quirk.
    pub fn extract(&self, entry_path: &str) -> Result<Vec<u8>> {
        let file = self.find(entry_path).with_context(|| {
            format!(
                "Entry not found in BSA {}: {}",
                self.path.display(),
                entry_path
            )
        })?;
        self.decode(file, entry_path)
    }

    fn decode(&self, file: &ArchiveFile<'static>, entry_path: &str) -> Result<Vec<u8>> {
        let data = if file.is_decompressed() {
            file.as_bytes().to_vec()
        } else {
            file.decompress(&self.compression)
                .with_context(|| {
                    format!(
                        "Failed to decompress {} from {}",
                        entry_path,
                        self.path.display()
                    )
                })?
                .as_bytes()
                .to_vec()
        };
        Ok(unwrap_nested_zlib(data))
    }

    /// Extract every entry into `dest`, preserving entry casing. Returns the
    /// number of files written.
    pub fn extract_all_to(&self, dest: &Path) -> Result<usize> {
        let mut written = 0;
        for (dir_key, directory) in self.archive.iter() {
            let dir_name = String::from_utf8_lossy(dir_key.name().as_bytes()).to_string();
            let out_dir = if dir_name.is_empty() || dir_name == "." {
                dest.to_path_buf()
            } else {
                dest.join(paths::to_linux_path(&dir_name))
            };
            fs::create_dir_all(&out_dir)
                .with_context(|| format!("Failed to create {}", out_dir.display()))?;

            for (file_key, file) in directory.iter() {
                let file_name = String::from_utf8_lossy(file_key.name().as_bytes()).to_string();
                let entry_path = if dir_name.is_empty() || dir_name == "." {
                    file_name.clone()
                } else {
                    format!("{dir_name}\\{file_name}")
                };
                let data = self.decode(file, &entry_path)?;
                let out_path = out_dir.join(&file_name);
                fs::write(&out_path, &data)
                    .with_context(|| format!("Failed to write {}", out_path.display()))?;
                written += 1;
            }
        }
        Ok(written)
    }
}

/// Unwrap the format's zlib-in-zlib quirk: a decoded payload that still
/// begins with a zlib header holds a raw-deflate body after the two header
/// bytes. Falls back to the raw bytes on inflate failure or timeout.
fn unwrap_nested_zlib(data: Vec<u8>) -> Vec<u8> {
    if data.len() < 2 || data[..2] != NESTED_ZLIB_MAGIC {
        return data;
    }

    let body = data[2..].to_vec();
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        let mut decoder = flate2::read::DeflateDecoder::new(body.as_slice());
        let mut out = Vec::new();
        let result = decoder.read_to_end(&mut out).map(|_| out);
        let _ = tx.send(result);
    });

    match rx.recv_timeout(NESTED_INFLATE_TIMEOUT) {
        Ok(Ok(inflated)) => inflated,
        Ok(Err(e)) => {
            warn!("Nested zlib payload failed to inflate ({e}), using raw bytes");
            data
        }
        Err(_) => {
            warn!(
                "Nested zlib inflate exceeded {}s, using raw bytes",
                NESTED_INFLATE_TIMEOUT.as_secs()
            );
            data
        }
    }
}

/// Write-mode archive assembler.
pub struct BsaWriter {
    files: Vec<(String, String, Vec<u8>)>,
    version: Version,
    flags: ArchiveFlags,
    types: ArchiveTypes,
}

impl BsaWriter {
    pub fn new(version: Version, flags: ArchiveFlags, types: ArchiveTypes) -> Self {
        Self {
            files: Vec::new(),
            version,
            flags,
            types,
        }
    }

    /// Queue a file under `dir`/`name`. A root-level file uses the "." dir.
    pub fn add_file(&mut self, dir: &str, name: &str, data: Vec<u8>) {
        let dir = if dir.is_empty() { "." } else { dir };
        self.files.push((dir.to_string(), name.to_string(), data));
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Build and write the archive to disk.
    pub fn write(self, output_path: &Path) -> Result<()> {
        if self.is_empty() {
            bail!("Cannot create empty BSA archive");
        }

        let should_compress = self.flags.contains(ArchiveFlags::COMPRESSED);
        let compression = FileCompressionOptions::builder()
            .version(self.version)
            .build();

        // Compress entries in parallel, then assemble the directory map
        let processed: Result<Vec<(String, String, ArchiveFile<'static>)>> = self
            .files
            .into_par_iter()
            .map(|(dir, name, data)| {
                let file = ArchiveFile::from_decompressed(data.into_boxed_slice());
                let file = if should_compress {
                    file.compress(&compression)
                        .with_context(|| format!("Failed to compress: {dir}/{name}"))?
                } else {
                    file
                };
                Ok((dir, name, file))
            })
            .collect();

        let mut archive = Archive::new();
        for (dir, name, file) in processed? {
            let archive_key = ArchiveKey::from(dir.as_bytes());
            let directory_key = DirectoryKey::from(name.as_bytes());
            match archive.get_mut(&archive_key) {
                Some(directory) => {
                    directory.insert(directory_key, file);
                }
                None => {
                    let mut directory = Directory::default();
                    directory.insert(directory_key, file);
                    archive.insert(archive_key, directory);
                }
            }
        }

        let options = ArchiveOptions::builder()
            .version(self.version)
            .flags(self.flags)
            .types(self.types)
            .build();

        if let Some(parent) = output_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let out = fs::File::create(output_path)
            .with_context(|| format!("Failed to create BSA: {}", output_path.display()))?;
        let mut writer = BufWriter::new(out);
        archive
            .write(&mut writer, &options)
            .with_context(|| format!("Failed to write BSA: {}", output_path.display()))?;

        debug!("Wrote BSA: {}", output_path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bsa::{default_flags, WRITE_VERSION};
    use flate2::write::ZlibEncoder;
    use flate2::Compression;
    use std::io::Write;
    use tempfile::tempdir;

    fn write_test_bsa(path: &Path, entries: &[(&str, &str, &[u8])]) {
        let mut writer = BsaWriter::new(WRITE_VERSION, default_flags(), ArchiveTypes::MISC);
        for (dir, name, data) in entries {
            writer.add_file(dir, name, data.to_vec());
        }
        writer.write(path).unwrap();
    }

    #[test]
    fn test_write_then_read_round_trip() {
        let temp = tempdir().unwrap();
        let bsa_path = temp.path().join("test.bsa");
        write_test_bsa(
            &bsa_path,
            &[
                ("meshes/armor", "power.nif", b"nif payload"),
                ("sound/fx", "click.wav", b"wav payload"),
                (".", "readme.txt", b"root payload"),
            ],
        );

        let handle = BsaReaderHandle::open(&bsa_path).unwrap();
        assert_eq!(handle.file_count(), 3);
        assert_eq!(handle.extract("meshes/armor/power.nif").unwrap(), b"nif payload");
        assert_eq!(handle.extract("sound\\fx\\click.wav").unwrap(), b"wav payload");
        assert_eq!(handle.extract("readme.txt").unwrap(), b"root payload");
    }

    #[test]
    fn test_extract_is_case_insensitive() {
        let temp = tempdir().unwrap();
        let bsa_path = temp.path().join("test.bsa");
        write_test_bsa(&bsa_path, &[("meshes", "Power.NIF", b"data")]);

        let handle = BsaReaderHandle::open(&bsa_path).unwrap();
        assert!(handle.contains("MESHES\\power.nif"));
        assert_eq!(handle.extract("Meshes/POWER.nif").unwrap(), b"data");
        assert!(!handle.contains("meshes/missing.nif"));
        assert!(handle.extract("meshes/missing.nif").is_err());
    }

    #[test]
    fn test_nested_zlib_payload_is_unwrapped() {
        // An entry whose stored content is itself a zlib stream: extraction
        // must strip the 2-byte header and inflate the deflate body.
        let inner = b"the actual mesh bytes".to_vec();
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&inner).unwrap();
        let zlibbed = encoder.finish().unwrap();
        assert_eq!(&zlibbed[..2], &NESTED_ZLIB_MAGIC[..]);

        let temp = tempdir().unwrap();
        let bsa_path = temp.path().join("test.bsa");
        write_test_bsa(&bsa_path, &[("meshes", "x.nif", &zlibbed)]);

        let handle = BsaReaderHandle::open(&bsa_path).unwrap();
        assert_eq!(handle.extract("meshes/x.nif").unwrap(), inner);
    }

    #[test]
    fn test_unwrap_nested_zlib_falls_back_on_garbage() {
        // Starts with the magic but is not a valid stream
        let data = vec![0x78, 0x9C, 0xFF, 0xFF, 0xFF, 0xFF];
        assert_eq!(unwrap_nested_zlib(data.clone()), data);

        // Too short to even check
        let short = vec![0x78];
        assert_eq!(unwrap_nested_zlib(short.clone()), short);
    }

    #[test]
    fn test_extract_all_to() {
        let temp = tempdir().unwrap();
        let bsa_path = temp.path().join("pkg.bsa");
        write_test_bsa(
            &bsa_path,
            &[
                ("_package", "index.json", b"{}"),
                ("files/meshes", "a.nif", b"aa"),
            ],
        );

        let out = temp.path().join("out");
        let handle = BsaReaderHandle::open(&bsa_path).unwrap();
        let count = handle.extract_all_to(&out).unwrap();
        assert_eq!(count, 2);
        assert_eq!(fs::read(out.join("_package/index.json")).unwrap(), b"{}");
        assert_eq!(fs::read(out.join("files/meshes/a.nif")).unwrap(), b"aa");
    }

    #[test]
    fn test_empty_writer_refuses() {
        let temp = tempdir().unwrap();
        let writer = BsaWriter::new(WRITE_VERSION, default_flags(), ArchiveTypes::MISC);
        assert!(writer.write(&temp.path().join("empty.bsa")).is_err());
    }

    #[test]
    fn test_entries_listing() {
        let temp = tempdir().unwrap();
        let bsa_path = temp.path().join("test.bsa");
        write_test_bsa(&bsa_path, &[("meshes", "a.nif", b"x"), (".", "b.esp", b"y")]);

        let handle = BsaReaderHandle::open(&bsa_path).unwrap();
        let mut entries = handle.entries();
        entries.sort();
        assert_eq!(entries, vec!["b.esp".to_string(), "meshes\\a.nif".to_string()]);
    }
}
