//! Copy and embedded-new operations.

use anyhow::Result;

use crate::installer::processor::ProcessContext;
use crate::manifest::Asset;

/// Copy: read from the asset's source location (archive or directory) and
/// write to the target unchanged.
pub fn handle_copy(ctx: &ProcessContext, asset: &Asset) -> Result<bool> {
    match ctx.source_bytes(asset)? {
        Some(data) => {
            ctx.write_output(asset, &data)?;
            Ok(true)
        }
        None => {
            ctx.log.missing_file(ctx.describe_source(asset));
            Ok(false)
        }
    }
}

/// New: the payload ships inside the package itself.
pub fn handle_new(ctx: &ProcessContext, asset: &Asset) -> Result<bool> {
    match ctx.package_bytes(&asset.source_path)? {
        Some(data) => {
            ctx.write_output(asset, &data)?;
            Ok(true)
        }
        None => {
            ctx.log.missing_file(format!(
                "{} (in package {})",
                asset.source_path,
                ctx.package_root.display()
            ));
            Ok(false)
        }
    }
}
