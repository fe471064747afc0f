//! Asset processing core.
//!
//! `ProcessContext` carries everything a worker needs to process one asset:
//! the resolved locations, the shared archive-read cache, the write-archive
//! collector, the helper tools and the installation log. `process` is the
//! single entry point the scheduler calls; it never panics and never lets
//! an error escape - every failure becomes a log entry and a `false`.

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

use super::config::InstallConfig;
use super::handlers;
use super::log::InstallLog;
use super::resolver::{ensure_expanded, LocationResolver};
use crate::bsa::{BsaReadCache, BsaWriteCollector};
use crate::manifest::{Asset, Location, OpType};
use crate::paths;
use crate::tools;

/// Helper binaries resolved once per run. Only the tools the package's
/// asset mix actually needs are required to be present.
pub struct Tools {
    xdelta3: Option<PathBuf>,
    ffmpeg: Option<PathBuf>,
    lz4: Option<PathBuf>,
}

impl Tools {
    /// Locate the helpers needed by `assets`. The patch tool and media tool
    /// are hard requirements when their op-types appear; the LZ4 decoder is
    /// only exercised by compressed patch blobs, so a missing binary is
    /// deferred to a per-asset failure.
    pub fn locate_for(assets: &[Asset]) -> Result<Self> {
        let needs_patch = assets.iter().any(|a| a.op == OpType::Patch);
        let needs_audio = assets
            .iter()
            .any(|a| matches!(a.op, OpType::AudioResample | OpType::AudioTranscode));

        let xdelta3 = if needs_patch {
            Some(tools::find_tool(tools::XDELTA3)?)
        } else {
            None
        };
        let ffmpeg = if needs_audio {
            Some(tools::find_tool(tools::FFMPEG)?)
        } else {
            None
        };
        let lz4 = if needs_patch {
            match tools::find_tool(tools::LZ4) {
                Ok(path) => Some(path),
                Err(e) => {
                    warn!("{e:#} - compressed patch blobs will fail");
                    None
                }
            }
        } else {
            None
        };

        Ok(Self {
            xdelta3,
            ffmpeg,
            lz4,
        })
    }

    /// Build from explicit paths (tests).
    pub fn from_paths(
        xdelta3: Option<PathBuf>,
        ffmpeg: Option<PathBuf>,
        lz4: Option<PathBuf>,
    ) -> Self {
        Self {
            xdelta3,
            ffmpeg,
            lz4,
        }
    }

    pub fn xdelta3(&self) -> Result<&Path> {
        self.xdelta3
            .as_deref()
            .context("binary-patch tool (xdelta3) was not located")
    }

    pub fn ffmpeg(&self) -> Result<&Path> {
        self.ffmpeg
            .as_deref()
            .context("media tool (ffmpeg) was not located")
    }

    pub fn lz4(&self) -> Result<&Path> {
        self.lz4
            .as_deref()
            .context("LZ4 decoder (lz4) was not located but the patch blob is LZ4-compressed")
    }
}

/// Shared state for processing one package's assets.
pub struct ProcessContext<'a> {
    pub config: &'a InstallConfig,
    pub locations: &'a [Location],
    pub resolver: LocationResolver<'a>,
    pub package_root: &'a Path,
    pub read_cache: BsaReadCache,
    pub collector: BsaWriteCollector,
    pub log: InstallLog,
    pub tools: Tools,
}

impl<'a> ProcessContext<'a> {
    /// Build the context: resolves locations and declares every
    /// write-archive target with the collector.
    pub fn new(
        config: &'a InstallConfig,
        locations: &'a [Location],
        package_root: &'a Path,
        tools: Tools,
    ) -> Result<Self> {
        let resolver = LocationResolver::new(config);
        let mut collector = BsaWriteCollector::new(&config.destination);

        for (index, location) in locations.iter().enumerate() {
            if !location.is_write_archive() {
                continue;
            }
            let resolved = PathBuf::from(resolver.resolve_path(location));
            ensure_expanded(&resolved).with_context(|| {
                format!("Write-archive location '{}' did not resolve", location.name)
            })?;
            collector.declare(index, resolved, location)?;
        }

        Ok(Self {
            config,
            locations,
            resolver,
            package_root,
            read_cache: BsaReadCache::new(),
            collector,
            log: InstallLog::new(),
            tools,
        })
    }

    pub fn location(&self, index: usize) -> Result<&Location> {
        self.locations
            .get(index)
            .with_context(|| format!("Asset references location {index} which does not exist"))
    }

    /// Process one asset. Failures are logged, never propagated.
    pub fn process(&self, asset: &Asset) -> bool {
        let result = match asset.op {
            OpType::Copy => handlers::copy::handle_copy(self, asset),
            OpType::New => handlers::copy::handle_new(self, asset),
            OpType::Patch => handlers::patch::handle_patch(self, asset),
            OpType::AudioResample => handlers::audio::handle_resample(self, asset),
            OpType::AudioTranscode => handlers::audio::handle_transcode(self, asset),
            OpType::XwmaFuz => Err(anyhow::anyhow!("unsupported operation type 3 (XwmaFuz)")),
        };

        match result {
            Ok(done) => done,
            Err(e) => {
                self.log.error(format!(
                    "{} {} failed: {e:#}",
                    asset.op.label(),
                    asset.source_path
                ));
                false
            }
        }
    }

    /// Read an asset's source bytes. `None` means the source is missing
    /// (not yet logged); errors are configuration-level problems.
    pub fn source_bytes(&self, asset: &Asset) -> Result<Option<Vec<u8>>> {
        let location = self.location(asset.source_loc)?;
        if location.is_read_archive() {
            let bsa = self.resolver.bsa_path(location)?;
            ensure_expanded(&bsa)?;
            let handle = self.read_cache.handle(&bsa)?;
            match handle.extract(&asset.source_path) {
                Ok(data) => Ok(Some(data)),
                Err(_) => Ok(None),
            }
        } else {
            let dir = self.resolver.directory_path(location)?;
            ensure_expanded(&dir)?;
            self.read_file_in(&dir, &asset.source_path)
        }
    }

    /// Like [`source_bytes`], but an archive miss falls back to a loose
    /// file next to the archive. Patch references use this: DLC content is
    /// sometimes shipped loose rather than packed.
    pub fn source_bytes_with_loose_fallback(&self, asset: &Asset) -> Result<Option<Vec<u8>>> {
        if let Some(data) = self.source_bytes(asset)? {
            return Ok(Some(data));
        }
        let location = self.location(asset.source_loc)?;
        if location.is_read_archive() {
            let bsa = self.resolver.bsa_path(location)?;
            if let Some(dir) = bsa.parent() {
                return self.read_file_in(dir, &asset.source_path);
            }
        }
        Ok(None)
    }

    /// Read a file embedded in the package itself.
    pub fn package_bytes(&self, relative: &str) -> Result<Option<Vec<u8>>> {
        self.read_file_in(self.package_root, relative)
    }

    /// Locate (exact, then case-insensitive) and read a file.
    fn read_file_in(&self, dir: &Path, relative: &str) -> Result<Option<Vec<u8>>> {
        match paths::locate_file(dir, relative) {
            Some(path) => fs::read(&path)
                .map(Some)
                .with_context(|| format!("Failed to read {}", path.display())),
            None => Ok(None),
        }
    }

    /// Write transformed bytes to the asset's target: a write-archive
    /// staging directory, or a file under the target location's directory.
    pub fn write_output(&self, asset: &Asset, data: &[u8]) -> Result<()> {
        let target = paths::normalize_target_path(asset.effective_target());
        if target.is_empty() {
            bail!("Asset has an empty target path");
        }

        if self.collector.is_write_target(asset.target_loc) {
            return self.collector.add_file(asset.target_loc, &target, data);
        }

        let location = self.location(asset.target_loc)?;
        let dir = self.resolver.directory_path(location)?;
        ensure_expanded(&dir)?;
        let path = dir.join(&target);
        paths::ensure_parent_dirs(&path)?;
        fs::write(&path, data).with_context(|| format!("Failed to write {}", path.display()))
    }

    /// Human-readable description of an asset's source for the missing list.
    pub fn describe_source(&self, asset: &Asset) -> String {
        match self.location(asset.source_loc) {
            Ok(location) if location.is_read_archive() => format!(
                "{} (in archive {})",
                asset.source_path,
                self.resolver.resolve_path(location)
            ),
            Ok(location) => format!(
                "{} (in {})",
                asset.source_path,
                self.resolver.resolve_path(location)
            ),
            Err(_) => asset.source_path.clone(),
        }
    }
}
