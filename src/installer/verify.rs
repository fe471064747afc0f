//! Pre-flight manifest checks.
//!
//! Runs before any asset is touched: reference files must exist and hash to
//! one of the digests the package was built against, and the destination
//! must not sit under a restricted system path.

use std::path::PathBuf;
use tracing::{debug, info};

use super::resolver::LocationResolver;
use crate::hash;
use crate::manifest::{
    Check, Location, CHECK_FILE_EXISTS, CHECK_FREE_SIZE, CHECK_RESTRICTED_PATH,
};
use crate::paths;

/// Result of running all checks: `passed` plus the joined failure report.
pub struct ValidationReport {
    pub passed: bool,
    pub checks_run: usize,
    pub report: String,
}

/// Run every manifest check against the resolved locations.
pub fn run_checks(
    checks: &[Check],
    locations: &[Location],
    resolver: &LocationResolver,
) -> ValidationReport {
    let mut failures: Vec<String> = Vec::new();

    for (index, check) in checks.iter().enumerate() {
        if let Some(mut failure) = run_check(check, locations, resolver) {
            if let Some(msg) = &check.custom_message {
                if !msg.is_empty() {
                    failure.push_str(&format!("\n  {msg}"));
                }
            }
            failures.push(format!("Check #{index}: {failure}"));
        }
    }

    if failures.is_empty() {
        info!("{} checks passed", checks.len());
    }

    ValidationReport {
        passed: failures.is_empty(),
        checks_run: checks.len(),
        report: failures.join("\n"),
    }
}

/// Run one check; `Some(message)` on failure.
fn run_check(
    check: &Check,
    locations: &[Location],
    resolver: &LocationResolver,
) -> Option<String> {
    match check.check_type {
        CHECK_FILE_EXISTS => check_file_exists(check, locations, resolver),
        // Free-space probing is disabled upstream; always passes
        CHECK_FREE_SIZE => None,
        CHECK_RESTRICTED_PATH => check_restricted_path(check, locations, resolver),
        other => Some(format!("Unknown check type {other}")),
    }
}

fn check_location<'a>(check: &Check, locations: &'a [Location]) -> Result<&'a Location, String> {
    usize::try_from(check.location)
        .ok()
        .and_then(|i| locations.get(i))
        .ok_or_else(|| format!("references location {} which does not exist", check.location))
}

fn check_file_exists(
    check: &Check,
    locations: &[Location],
    resolver: &LocationResolver,
) -> Option<String> {
    let location = match check_location(check, locations) {
        Ok(l) => l,
        Err(e) => return Some(e),
    };
    let dir = match resolver.directory_path(location) {
        Ok(d) => d,
        Err(e) => return Some(format!("{e:#}")),
    };
    let file = check.file.as_deref().unwrap_or("");
    let resolved = paths::locate_file(&dir, file);
    let display = paths::join_windows_path(&dir, file);

    let exists = resolved.is_some();
    let wanted = !check.inverted;
    if exists != wanted {
        return Some(if wanted {
            format!("Required file is missing: {}", display.display())
        } else {
            format!("File must not exist: {}", display.display())
        });
    }

    // Digest verification only applies to a file that was required and found
    let digests = check.digest_list();
    if !check.inverted && !digests.is_empty() {
        let path = resolved.expect("existence verified above");
        return check_digests(&path, &digests);
    }

    None
}

/// Pass iff any listed digest matches the hash of its own length class.
fn check_digests(path: &PathBuf, digests: &[&str]) -> Option<String> {
    for expected in digests {
        match hash::verify_digest(path, expected) {
            Ok((true, _)) => {
                debug!("Digest verified: {}", path.display());
                return None;
            }
            Ok((false, _)) => {}
            Err(e) => return Some(format!("Failed to hash {}: {e:#}", path.display())),
        }
    }

    // Nothing matched: report both actual digests against the expectation
    let actual_md5 = hash::file_md5_hex(path).unwrap_or_else(|_| "<unreadable>".to_string());
    let actual_sha1 = hash::file_sha1_hex(path).unwrap_or_else(|_| "<unreadable>".to_string());
    Some(format!(
        "Checksum mismatch for {}:\n  expected one of: {}\n  actual MD5:  {}\n  actual SHA1: {}",
        path.display(),
        digests.join(", "),
        actual_md5,
        actual_sha1,
    ))
}

fn check_restricted_path(
    check: &Check,
    locations: &[Location],
    resolver: &LocationResolver,
) -> Option<String> {
    let location = match check_location(check, locations) {
        Ok(l) => l,
        Err(e) => return Some(e),
    };
    let mut resolved = resolver.resolve_path(location);
    if let Some(file) = check.file.as_deref() {
        if !file.is_empty() {
            resolved = format!("{}/{}", resolved.trim_end_matches('/'), file);
        }
    }

    let restricted = resolved.to_lowercase().contains("program files");
    let fails = if check.inverted { !restricted } else { restricted };
    if fails {
        Some(format!(
            "Path is in a restricted area (Program Files): {resolved}"
        ))
    } else {
        None
    }
}
