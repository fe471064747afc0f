//! MPI manifest parsing.
//!
//! The package carries a JSON document at `_package/index.json` describing
//! everything the installer does: profiles of variables and locations, the
//! flat asset list, pre-flight checks, and post-install commands. The
//! document is hand-maintained upstream, so the loader tolerates `//` line
//! comments and trailing commas.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use serde_json::Value;
use std::path::Path;
use tracing::warn;

/// Profile index used for installation. Index 0 is the packaging profile.
pub const INSTALL_PROFILE: usize = 1;

/// Entry path of the manifest inside a package.
pub const MANIFEST_ENTRY: &str = "_package/index.json";

/// How many malformed assets get individually logged before the loader
/// switches to counting them silently.
const MAX_ASSET_WARNINGS: usize = 3;

/// Package metadata. Advisory only.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct PackageInfo {
    pub title: String,
    pub version: String,
    pub author: String,
    pub description: String,
}

/// A named substitution variable. Values are substituted lazily by the
/// location resolver, never expanded at load time.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Variable {
    pub name: String,
    #[serde(rename = "Type", default)]
    pub var_type: i64,
    #[serde(default)]
    pub value: String,
}

/// Location type tags as stored in the manifest.
pub const LOC_DIRECTORY: i64 = 0;
pub const LOC_READ_ARCHIVE: i64 = 1;
pub const LOC_WRITE_ARCHIVE: i64 = 2;

/// A manifest-declared addressable place: a directory, an existing archive
/// to read, or an archive to create.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Location {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "Type")]
    pub loc_type: i64,
    pub value: String,
    /// Content-class bitmask for write archives
    #[serde(default)]
    pub archive_type: Option<u16>,
    /// Format-flag bitmask for write archives
    #[serde(default)]
    pub archive_flags: Option<u32>,
    #[serde(default)]
    pub files_flags: Option<u32>,
    #[serde(default)]
    pub archive_compressed: Option<bool>,
}

impl Location {
    pub fn is_directory(&self) -> bool {
        self.loc_type == LOC_DIRECTORY
    }

    pub fn is_read_archive(&self) -> bool {
        self.loc_type == LOC_READ_ARCHIVE
    }

    pub fn is_write_archive(&self) -> bool {
        self.loc_type == LOC_WRITE_ARCHIVE
    }
}

/// Asset operation discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpType {
    Copy,
    New,
    Patch,
    /// Legacy, unused by modern packages. Processing one is a hard error.
    XwmaFuz,
    AudioResample,
    AudioTranscode,
}

impl OpType {
    pub fn from_tag(tag: i64) -> Option<Self> {
        match tag {
            0 => Some(OpType::Copy),
            1 => Some(OpType::New),
            2 => Some(OpType::Patch),
            3 => Some(OpType::XwmaFuz),
            4 => Some(OpType::AudioResample),
            5 => Some(OpType::AudioTranscode),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            OpType::Copy => "copy",
            OpType::New => "new",
            OpType::Patch => "patch",
            OpType::XwmaFuz => "xwmafuz",
            OpType::AudioResample => "audio-resample",
            OpType::AudioTranscode => "audio-transcode",
        }
    }
}

/// One unit of work: read from a source location, transform, write to a
/// target location.
#[derive(Debug, Clone)]
pub struct Asset {
    pub tags: i64,
    pub op: OpType,
    /// Space-delimited `-key:value` parameters, consumed by audio ops
    pub params: String,
    pub status: i64,
    pub source_loc: usize,
    pub target_loc: usize,
    pub source_path: String,
    /// Absent means "same as source_path"
    pub target_path: Option<String>,
}

impl Asset {
    /// Target path, defaulting to the source path for 7-element tuples.
    pub fn effective_target(&self) -> &str {
        self.target_path.as_deref().unwrap_or(&self.source_path)
    }
}

/// Check type tags.
pub const CHECK_FILE_EXISTS: i64 = 0;
pub const CHECK_FREE_SIZE: i64 = 1;
pub const CHECK_RESTRICTED_PATH: i64 = 2;

/// A pre-flight check.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Check {
    #[serde(rename = "Type")]
    pub check_type: i64,
    #[serde(default)]
    pub inverted: bool,
    #[serde(default)]
    pub location: i64,
    #[serde(default)]
    pub file: Option<String>,
    /// Newline-separated uppercase hex digests
    #[serde(default)]
    pub checksums: Option<String>,
    #[serde(default)]
    pub custom_message: Option<String>,
}

impl Check {
    /// The individual digests listed for this check, if any.
    pub fn digest_list(&self) -> Vec<&str> {
        self.checksums
            .as_deref()
            .map(|s| {
                s.lines()
                    .map(str::trim)
                    .filter(|l| !l.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// A post-install shell command (Windows `cmd.exe` vocabulary).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PostCommand {
    pub command: String,
    #[serde(default)]
    pub wait: bool,
    #[serde(default)]
    pub hidden: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
struct RawManifest {
    package: PackageInfo,
    variables: Vec<Vec<Variable>>,
    locations: Vec<Vec<Location>>,
    #[allow(dead_code)]
    tags: Value,
    assets: Vec<Value>,
    checks: Vec<Check>,
    /// Advisory file attributes; carried but not consumed
    #[allow(dead_code)]
    file_attrs: Value,
    post_commands: Vec<PostCommand>,
}

/// The fully parsed manifest.
#[derive(Debug)]
pub struct Manifest {
    pub package: PackageInfo,
    variables: Vec<Vec<Variable>>,
    locations: Vec<Vec<Location>>,
    pub assets: Vec<Asset>,
    pub checks: Vec<Check>,
    pub post_commands: Vec<PostCommand>,
    /// Assets dropped during parsing
    pub skipped_assets: usize,
}

impl Manifest {
    /// Load and parse the manifest document at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read manifest: {}", path.display()))?;
        Self::parse(&text)
            .with_context(|| format!("Failed to parse manifest: {}", path.display()))
    }

    /// Parse a manifest document from text.
    pub fn parse(text: &str) -> Result<Self> {
        let cleaned = strip_json_relaxations(text);
        let raw: RawManifest =
            serde_json::from_str(&cleaned).context("Manifest is not valid JSON")?;

        let mut assets = Vec::with_capacity(raw.assets.len());
        let mut skipped = 0usize;
        for (index, row) in raw.assets.iter().enumerate() {
            match parse_asset(row) {
                Ok(asset) => assets.push(asset),
                Err(e) => {
                    if skipped < MAX_ASSET_WARNINGS {
                        warn!("Skipping malformed asset #{index}: {e}");
                    }
                    skipped += 1;
                }
            }
        }
        if skipped > MAX_ASSET_WARNINGS {
            warn!(
                "Skipped {} malformed assets in total ({} not shown)",
                skipped,
                skipped - MAX_ASSET_WARNINGS
            );
        }

        Ok(Self {
            package: raw.package,
            variables: raw.variables,
            locations: raw.locations,
            assets,
            checks: raw.checks,
            post_commands: raw.post_commands,
            skipped_assets: skipped,
        })
    }

    /// Number of profiles (parallel variable/location tables).
    pub fn profile_count(&self) -> usize {
        self.locations.len()
    }

    /// Locations of the given profile.
    pub fn locations(&self, profile: usize) -> Result<&[Location]> {
        self.locations
            .get(profile)
            .map(Vec::as_slice)
            .with_context(|| {
                format!(
                    "Profile index {} out of range ({} profiles)",
                    profile,
                    self.locations.len()
                )
            })
    }

    /// Variables of the given profile.
    pub fn variables(&self, profile: usize) -> Result<&[Variable]> {
        self.variables
            .get(profile)
            .map(Vec::as_slice)
            .with_context(|| {
                format!(
                    "Profile index {} out of range ({} profiles)",
                    profile,
                    self.variables.len()
                )
            })
    }

    /// Verify that every asset's location indices are valid for `profile`.
    pub fn check_asset_locations(&self, profile: usize) -> Result<()> {
        let locations = self.locations(profile)?;
        for (i, asset) in self.assets.iter().enumerate() {
            if asset.source_loc >= locations.len() || asset.target_loc >= locations.len() {
                bail!(
                    "Asset #{} ({}) references location {}/{} outside profile {} ({} locations)",
                    i,
                    asset.source_path,
                    asset.source_loc,
                    asset.target_loc,
                    profile,
                    locations.len()
                );
            }
        }
        Ok(())
    }
}

/// Coerce a JSON value to an integer; numeric strings are accepted.
fn coerce_i64(value: &Value) -> Result<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .with_context(|| format!("Not an integer: {n}")),
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .with_context(|| format!("Not an integer: {s:?}")),
        other => bail!("Expected integer, got {other}"),
    }
}

/// Coerce a JSON value to a string; numbers are accepted.
fn coerce_string(value: &Value) -> Result<String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Null => Ok(String::new()),
        other => bail!("Expected string, got {other}"),
    }
}

/// Parse one heterogeneous asset tuple:
/// `(tags, opType, params, status, sourceLoc, targetLoc, sourcePath[, targetPath])`
fn parse_asset(row: &Value) -> Result<Asset> {
    let items = row.as_array().context("Asset is not an array")?;
    if items.len() < 7 {
        bail!("Asset tuple has {} elements, need at least 7", items.len());
    }

    let op_tag = coerce_i64(&items[1])?;
    let op = OpType::from_tag(op_tag)
        .with_context(|| format!("Unknown operation type {op_tag}"))?;

    let source_loc = coerce_i64(&items[4])?;
    let target_loc = coerce_i64(&items[5])?;
    if source_loc < 0 || target_loc < 0 {
        bail!("Negative location index {source_loc}/{target_loc}");
    }

    let source_path = coerce_string(&items[6])?;
    if source_path.is_empty() {
        bail!("Empty source path");
    }

    let target_path = match items.get(7) {
        Some(v) => {
            let s = coerce_string(v)?;
            if s.is_empty() {
                None
            } else {
                Some(s)
            }
        }
        None => None,
    };

    Ok(Asset {
        tags: coerce_i64(&items[0])?,
        op,
        params: coerce_string(&items[2])?,
        status: coerce_i64(&items[3])?,
        source_loc: source_loc as usize,
        target_loc: target_loc as usize,
        source_path,
        target_path,
    })
}

/// Remove `//` line comments and trailing commas so the relaxed documents
/// shipped in real packages parse as strict JSON. String literals (with
/// escapes) are respected.
fn strip_json_relaxations(text: &str) -> String {
    let bytes = text.as_bytes();
    // Only ASCII sequences are ever removed, so byte-level surgery keeps the
    // output valid UTF-8.
    let mut out: Vec<u8> = Vec::with_capacity(bytes.len());
    let mut i = 0;
    let mut in_string = false;

    while i < bytes.len() {
        let b = bytes[i];

        if in_string {
            out.push(b);
            if b == b'\\' && i + 1 < bytes.len() {
                out.push(bytes[i + 1]);
                i += 2;
                continue;
            }
            if b == b'"' {
                in_string = false;
            }
            i += 1;
            continue;
        }

        match b {
            b'"' => {
                in_string = true;
                out.push(b);
                i += 1;
            }
            b'/' if i + 1 < bytes.len() && bytes[i + 1] == b'/' => {
                // Line comment: skip to end of line
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
            }
            b',' => {
                // Trailing comma: drop if the next non-whitespace,
                // non-comment character closes a container
                let mut j = i + 1;
                loop {
                    while j < bytes.len() && bytes[j].is_ascii_whitespace() {
                        j += 1;
                    }
                    if j + 1 < bytes.len() && bytes[j] == b'/' && bytes[j + 1] == b'/' {
                        while j < bytes.len() && bytes[j] != b'\n' {
                            j += 1;
                        }
                        continue;
                    }
                    break;
                }
                if j < bytes.len() && (bytes[j] == b']' || bytes[j] == b'}') {
                    i += 1; // drop the comma
                } else {
                    out.push(b);
                    i += 1;
                }
            }
            _ => {
                out.push(b);
                i += 1;
            }
        }
    }

    String::from_utf8(out).unwrap_or_else(|_| text.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        // package header
        "Package": {
            "Title": "Tale of Two Wastelands",
            "Version": "3.3",
            "Author": "TTW Team",
            "Description": "FO3 in FNV",
        },
        "Variables": [
            [{"Name": "GAME", "Type": 0, "Value": "FNV"}],
            [{"Name": "GAME", "Type": 0, "Value": "FNV"}],
        ],
        "Locations": [
            [],
            [
                {"Name": "Dest", "Type": 0, "Value": "%DESTINATION%"},
                {"Name": "FNV Data", "Type": 1, "Value": "%FNVDATA%\\Fallout - Voices1.bsa"},
                {"Name": "Out BSA", "Type": 2, "Value": "%DESTINATION%\\TTW - Meshes.bsa",
                 "ArchiveFlags": 263},
            ],
        ],
        "Tags": [],
        "Assets": [
            [0, 0, "", 0, 1, 0, "sound\\voice\\a.ogg"],
            [0, 2, "", 0, 1, 0, "falloutnv.esm", "taleoftwowastelands.esm"],
            ["0", "4", "-f:24000", "0", "1", "0", "sound\\voice\\b.ogg"],
            [0, 0, ""], // too short, skipped
        ],
        "Checks": [
            {"Type": 0, "Inverted": false, "Location": 1, "File": "FalloutNV.esm",
             "Checksums": "900150983CD24FB0D6963F7D28E17F72\nA9993E364706816ABA3E25717850C26C9CD0D89D"},
        ],
        "FileAttrs": [],
        "PostCommands": [
            {"Command": "cmd.exe /C del \"%DESTINATION%\\leftover.esp\"", "Wait": true, "Hidden": true},
        ],
    }"#;

    #[test]
    fn test_parse_sample() {
        let manifest = Manifest::parse(SAMPLE).unwrap();
        assert_eq!(manifest.package.title, "Tale of Two Wastelands");
        assert_eq!(manifest.profile_count(), 2);
        assert_eq!(manifest.assets.len(), 3);
        assert_eq!(manifest.skipped_assets, 1);
        assert_eq!(manifest.checks.len(), 1);
        assert_eq!(manifest.post_commands.len(), 1);
    }

    #[test]
    fn test_asset_tuple_seven_defaults_target_to_source() {
        let manifest = Manifest::parse(SAMPLE).unwrap();
        let copy = &manifest.assets[0];
        assert_eq!(copy.op, OpType::Copy);
        assert!(copy.target_path.is_none());
        assert_eq!(copy.effective_target(), "sound\\voice\\a.ogg");

        let patch = &manifest.assets[1];
        assert_eq!(patch.op, OpType::Patch);
        assert_eq!(patch.effective_target(), "taleoftwowastelands.esm");
    }

    #[test]
    fn test_asset_string_positions_are_coerced() {
        let manifest = Manifest::parse(SAMPLE).unwrap();
        let audio = &manifest.assets[2];
        assert_eq!(audio.op, OpType::AudioResample);
        assert_eq!(audio.source_loc, 1);
        assert_eq!(audio.params, "-f:24000");
    }

    #[test]
    fn test_profile_accessors() {
        let manifest = Manifest::parse(SAMPLE).unwrap();
        let locations = manifest.locations(INSTALL_PROFILE).unwrap();
        assert_eq!(locations.len(), 3);
        assert!(locations[0].is_directory());
        assert!(locations[1].is_read_archive());
        assert!(locations[2].is_write_archive());
        assert_eq!(locations[2].archive_flags, Some(263));

        assert!(manifest.locations(7).is_err());
        assert!(manifest.variables(7).is_err());
    }

    #[test]
    fn test_check_digest_list() {
        let manifest = Manifest::parse(SAMPLE).unwrap();
        let digests = manifest.checks[0].digest_list();
        assert_eq!(digests.len(), 2);
        assert_eq!(digests[0].len(), 32);
        assert_eq!(digests[1].len(), 40);
    }

    #[test]
    fn test_asset_location_bounds() {
        let manifest = Manifest::parse(SAMPLE).unwrap();
        assert!(manifest.check_asset_locations(INSTALL_PROFILE).is_ok());
        // Profile 0 has no locations at all
        assert!(manifest.check_asset_locations(0).is_err());
    }

    #[test]
    fn test_strip_relaxations_preserves_strings() {
        let text = r#"{"a": "url://x", "b": "tricky, }", "c": [1, 2,],}"#;
        let cleaned = strip_json_relaxations(text);
        let value: Value = serde_json::from_str(&cleaned).unwrap();
        assert_eq!(value["a"], "url://x");
        assert_eq!(value["b"], "tricky, }");
        assert_eq!(value["c"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_strip_relaxations_handles_escaped_quotes() {
        let text = r#"{"a": "he said \"hi\" // not a comment",}"#;
        let cleaned = strip_json_relaxations(text);
        let value: Value = serde_json::from_str(&cleaned).unwrap();
        assert_eq!(value["a"], "he said \"hi\" // not a comment");
    }

    #[test]
    fn test_unknown_op_type_is_skipped() {
        let text = r#"{
            "Package": {}, "Variables": [], "Locations": [[]],
            "Assets": [[0, 9, "", 0, 0, 0, "x"]],
            "Checks": [], "PostCommands": []
        }"#;
        let manifest = Manifest::parse(text).unwrap();
        assert_eq!(manifest.assets.len(), 0);
        assert_eq!(manifest.skipped_assets, 1);
    }
}
