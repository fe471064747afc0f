//! Windows-style path handling for MPI manifests on Linux
//!
//! Manifest paths use backslashes and assume a case-insensitive filesystem.
//! This module handles:
//! - Converting `\` to `/` for Linux filesystem operations
//! - Case-insensitive file lookups (the game data was authored on Windows)
//! - Lowercase normalization for BSA staging, where entry names are
//!   case-insensitive by format
//! - Unicode normalization (NFC) so voice directories with accented names
//!   match regardless of how the accents were encoded

use std::path::{Path, PathBuf};
use unicode_normalization::UnicodeNormalization;

/// Convert Windows path separators to Linux
/// `Sound\Voice\a.ogg` -> `Sound/Voice/a.ogg`
pub fn to_linux_path(path: &str) -> String {
    path.replace('\\', "/")
}

/// Normalize a path for lookups and comparisons (NFC normalized, lowercase,
/// forward slashes, trimmed)
pub fn normalize_for_lookup(path: &str) -> String {
    path.nfc()
        .collect::<String>()
        .to_lowercase()
        .replace('\\', "/")
        .trim_matches('/')
        .to_string()
}

/// Normalize a manifest target path for writing: strip a leading `./` or
/// `.\`, drop leading separators, convert to forward slashes. Case is
/// preserved (the output tree keeps the manifest's casing).
pub fn normalize_target_path(path: &str) -> String {
    let trimmed = path.trim();
    let trimmed = trimmed
        .strip_prefix("./")
        .or_else(|| trimmed.strip_prefix(".\\"))
        .unwrap_or(trimmed);
    to_linux_path(trimmed.trim_start_matches(['/', '\\']))
}

/// Normalize a logical entry path for BSA staging: like
/// [`normalize_target_path`] but lowercased, because BSA entry names are
/// case-insensitive and the staging directory must collapse case variants
/// onto one file. Idempotent.
pub fn normalize_logical_path(path: &str) -> String {
    normalize_target_path(path).to_lowercase()
}

/// Get the parent directory of a path string (handles both / and \)
pub fn parent_path(path: &str) -> Option<&str> {
    path.rfind(['\\', '/']).map(|idx| &path[..idx])
}

/// Get the filename from a path string (handles both / and \)
pub fn file_name(path: &str) -> &str {
    path.rfind(['\\', '/'])
        .map(|idx| &path[idx + 1..])
        .unwrap_or(path)
}

/// Get file extension (lowercase)
pub fn extension(path: &str) -> Option<String> {
    let name = file_name(path);
    name.rfind('.')
        .filter(|idx| *idx > 0)
        .map(|idx| name[idx + 1..].to_lowercase())
}

/// Join a base path with a Windows-style relative path
pub fn join_windows_path(base: &Path, relative: &str) -> PathBuf {
    base.join(to_linux_path(relative))
}

/// Find a file case-insensitively within a directory
///
/// Given a base directory and a relative path like `Sound\Voice\a.ogg`,
/// finds the actual file even if the real path is `sound\VOICE\A.OGG`.
/// The primary (case-sensitive) lookup should be tried first; this walk
/// costs a directory read per component.
pub fn resolve_case_insensitive(base: &Path, relative: &str) -> Option<PathBuf> {
    let components: Vec<&str> = relative
        .split(['\\', '/'])
        .filter(|s| !s.is_empty())
        .collect();

    if components.is_empty() {
        return Some(base.to_path_buf());
    }

    let mut current = base.to_path_buf();

    for component in components {
        let target = component.nfc().collect::<String>().to_lowercase();

        let found = std::fs::read_dir(&current).ok()?.find_map(|entry| {
            let entry = entry.ok()?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.nfc().collect::<String>().to_lowercase() == target {
                Some(entry.path())
            } else {
                None
            }
        });

        match found {
            Some(path) => current = path,
            None => return None,
        }
    }

    Some(current)
}

/// Locate `relative` under `base`: exact match first, then a
/// case-insensitive walk. Returns `None` if neither exists.
pub fn locate_file(base: &Path, relative: &str) -> Option<PathBuf> {
    let direct = join_windows_path(base, relative);
    if direct.is_file() {
        return Some(direct);
    }
    resolve_case_insensitive(base, relative).filter(|p| p.is_file())
}

/// Create parent directories for a path if they don't exist.
/// Safe to call concurrently from multiple threads.
pub fn ensure_parent_dirs(path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        match std::fs::create_dir_all(parent) {
            Ok(()) => {}
            // Another worker may have created it between check and create
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists && parent.is_dir() => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_linux_path() {
        assert_eq!(
            to_linux_path("Sound\\Voice\\armor.ogg"),
            "Sound/Voice/armor.ogg"
        );
        assert_eq!(to_linux_path("already/linux/path"), "already/linux/path");
        assert_eq!(to_linux_path("mixed\\path/style"), "mixed/path/style");
    }

    #[test]
    fn test_normalize_for_lookup() {
        assert_eq!(
            normalize_for_lookup("Meshes\\Armor\\Power.NIF"),
            "meshes/armor/power.nif"
        );
        assert_eq!(
            normalize_for_lookup("/Sound/Voice/"),
            "sound/voice"
        );
    }

    #[test]
    fn test_normalize_target_path() {
        assert_eq!(normalize_target_path("./meshes\\a.nif"), "meshes/a.nif");
        assert_eq!(normalize_target_path(".\\meshes\\a.nif"), "meshes/a.nif");
        assert_eq!(normalize_target_path("\\meshes/A.nif"), "meshes/A.nif");
        assert_eq!(normalize_target_path("meshes/a.nif"), "meshes/a.nif");
    }

    #[test]
    fn test_normalize_logical_is_idempotent() {
        let inputs = [
            ".\\Meshes\\Armor\\Power.NIF",
            "./sound/fx/UI_Click.WAV",
            "\\Textures\\a.dds",
            "plain.esp",
        ];
        for input in inputs {
            let once = normalize_logical_path(input);
            assert_eq!(normalize_logical_path(&once), once);
        }
    }

    #[test]
    fn test_file_name_and_parent() {
        assert_eq!(file_name("Meshes\\Armor\\a.nif"), "a.nif");
        assert_eq!(file_name("a.nif"), "a.nif");
        assert_eq!(parent_path("Meshes\\Armor\\a.nif"), Some("Meshes\\Armor"));
        assert_eq!(parent_path("a.nif"), None);
    }

    #[test]
    fn test_extension() {
        assert_eq!(extension("voice/a.OGG"), Some("ogg".to_string()));
        assert_eq!(extension("a.tale.mp3"), Some("mp3".to_string()));
        assert_eq!(extension("noext"), None);
        assert_eq!(extension(".hidden"), None);
    }

    #[test]
    fn test_resolve_case_insensitive() {
        let temp = tempfile::tempdir().unwrap();
        let dir = temp.path().join("Data").join("Meshes");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("Armor.NIF"), b"x").unwrap();

        let found = resolve_case_insensitive(temp.path(), "data\\meshes\\armor.nif");
        assert_eq!(found, Some(dir.join("Armor.NIF")));

        assert!(resolve_case_insensitive(temp.path(), "data\\missing.nif").is_none());
    }

    #[test]
    fn test_locate_file_prefers_exact() {
        let temp = tempfile::tempdir().unwrap();
        std::fs::write(temp.path().join("exact.esm"), b"x").unwrap();

        assert_eq!(
            locate_file(temp.path(), "exact.esm"),
            Some(temp.path().join("exact.esm"))
        );
        assert_eq!(
            locate_file(temp.path(), "EXACT.ESM"),
            Some(temp.path().join("exact.esm"))
        );
        assert!(locate_file(temp.path(), "absent.esm").is_none());
    }

    #[test]
    fn test_unicode_normalization_in_lookup() {
        // Precomposed ú (U+00FA) vs decomposed u + combining acute
        let precomposed = "sound/vo/atúlg gro-largúm/greeting.ogg";
        let decomposed = "sound/vo/atu\u{0301}lg gro-largu\u{0301}m/greeting.ogg";
        assert_eq!(
            normalize_for_lookup(precomposed),
            normalize_for_lookup(decomposed)
        );
    }
}
