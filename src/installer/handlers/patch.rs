//! Binary patch operation.
//!
//! The package ships an xdelta3 blob at `<effectiveTarget>.xd3`, optionally
//! LZ4-frame compressed. The reference file comes from the asset's source
//! location; reference and blob are materialized to scratch files and the
//! external xdelta3 helper produces the patched output.

use anyhow::{bail, Context, Result};
use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};

use crate::installer::processor::ProcessContext;
use crate::manifest::Asset;
use crate::paths;
use crate::scratch;
use crate::tools;

/// LZ4 frame magic: a blob starting with this needs the LZ4 helper first.
const LZ4_FRAME_MAGIC: [u8; 4] = [0x04, 0x22, 0x4D, 0x18];

/// Stderr fragments that mean the reference copy is the wrong version.
const WRONG_REFERENCE_HINTS: [&str; 2] = ["source file too short", "checksum mismatch"];

pub fn handle_patch(ctx: &ProcessContext, asset: &Asset) -> Result<bool> {
    let target = asset.effective_target();
    let blob_rel = format!("{target}.xd3");
    let Some(blob_path) = paths::locate_file(ctx.package_root, &blob_rel) else {
        ctx.log.missing_file(format!(
            "{blob_rel} (patch blob in package {})",
            ctx.package_root.display()
        ));
        return Ok(false);
    };

    let work = tempfile::Builder::new()
        .prefix(scratch::SCRATCH_PREFIX)
        .tempdir()
        .context("Failed to create patch scratch directory")?;

    let blob_path = decompress_blob_if_needed(ctx, &blob_path, work.path())?;

    // Reference file: archive entry, or a loose file next to the archive
    let Some(reference) = ctx.source_bytes_with_loose_fallback(asset)? else {
        ctx.log.missing_file(format!(
            "{} (patch reference)",
            ctx.describe_source(asset)
        ));
        return Ok(false);
    };

    let reference_path = work.path().join("reference");
    fs::write(&reference_path, &reference)
        .context("Failed to materialize patch reference")?;
    let output_path = work.path().join("patched");

    let xdelta3 = ctx.tools.xdelta3()?;
    let result = tools::run_tool(
        xdelta3,
        &[
            OsStr::new("-d"),
            OsStr::new("-f"),
            OsStr::new("-s"),
            reference_path.as_os_str(),
            blob_path.as_os_str(),
            output_path.as_os_str(),
        ],
    )?;

    if !result.success {
        let mut message = format!("xdelta3 failed for {target}: {}", result.failure_text());
        let stderr_lower = result.stderr.to_lowercase();
        if WRONG_REFERENCE_HINTS
            .iter()
            .any(|hint| stderr_lower.contains(hint))
        {
            message.push_str(
                "\n  The reference file appears to be the wrong version; \
                 verify the game installation is unmodified.",
            );
        }
        bail!(message);
    }

    let patched = fs::read(&output_path).context("Failed to read patched output")?;
    ctx.write_output(asset, &patched)?;
    Ok(true)
}

/// If the blob starts with the LZ4 frame magic, run the LZ4 helper to
/// produce a decompressed copy in the scratch directory. Blobs shorter than
/// the magic are treated as uncompressed.
fn decompress_blob_if_needed(
    ctx: &ProcessContext,
    blob_path: &Path,
    work_dir: &Path,
) -> Result<PathBuf> {
    let mut header = [0u8; 4];
    {
        use std::io::Read;
        let mut file = fs::File::open(blob_path)
            .with_context(|| format!("Failed to open patch blob: {}", blob_path.display()))?;
        let n = file.read(&mut header)?;
        if n < 4 || header != LZ4_FRAME_MAGIC {
            return Ok(blob_path.to_path_buf());
        }
    }

    let lz4 = ctx.tools.lz4()?;
    let decompressed = work_dir.join("patch.xd3");
    let result = tools::run_tool(
        lz4,
        &[
            OsStr::new("-d"),
            OsStr::new("-f"),
            blob_path.as_os_str(),
            decompressed.as_os_str(),
        ],
    )?;
    if !result.success {
        bail!(
            "lz4 failed for {}: {}",
            blob_path.display(),
            result.failure_text()
        );
    }
    Ok(decompressed)
}
