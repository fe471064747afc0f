//! BSA (Bethesda Archive) handling
//!
//! Read/write support for TES4-format BSA files (Oblivion, FO3, FNV) via
//! the `ba2` codec, plus the shared-handle read cache and the write-side
//! staging collector used during installation.

mod codec;
mod collector;
mod read_cache;

pub use codec::{BsaReaderHandle, BsaWriter};
pub use collector::{BsaWriteCollector, Collision, COLLISION_REPORT_NAME};
pub use read_cache::BsaReadCache;

use ba2::tes4::{ArchiveFlags, ArchiveTypes, Version};

/// Archives written by this installer target the FO3/FNV format.
pub const WRITE_VERSION: Version = Version::v104;

/// Map a manifest version tag to a codec version.
pub fn version_from_tag(tag: u32) -> Version {
    match tag {
        103 => Version::v103,
        105 => Version::v105,
        _ => Version::v104,
    }
}

/// Default format flags for archives whose location declares none.
pub fn default_flags() -> ArchiveFlags {
    ArchiveFlags::DIRECTORY_STRINGS
        | ArchiveFlags::FILE_STRINGS
        | ArchiveFlags::COMPRESSED
        | ArchiveFlags::RETAIN_DIRECTORY_NAMES
        | ArchiveFlags::RETAIN_FILE_NAMES
        | ArchiveFlags::RETAIN_FILE_NAME_OFFSETS
}

/// Infer content-type flags from an archive name.
///
/// A "Main" archive carries mixed content, so it declares every class.
pub fn detect_types(name: &str) -> ArchiveTypes {
    let name_lower = name.to_lowercase();

    if name_lower.contains("meshes") {
        ArchiveTypes::MESHES
    } else if name_lower.contains("textures") {
        ArchiveTypes::TEXTURES
    } else if name_lower.contains("menuvoices") {
        ArchiveTypes::MENUS | ArchiveTypes::VOICES
    } else if name_lower.contains("voices") {
        ArchiveTypes::VOICES
    } else if name_lower.contains("sound") {
        ArchiveTypes::SOUNDS
    } else if name_lower.contains("main") {
        ArchiveTypes::all()
    } else {
        ArchiveTypes::MISC
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_types() {
        assert_eq!(detect_types("TTW - Meshes.bsa"), ArchiveTypes::MESHES);
        assert_eq!(detect_types("New Fallout - Textures2.bsa"), ArchiveTypes::TEXTURES);
        assert_eq!(detect_types("TTW - Sound.bsa"), ArchiveTypes::SOUNDS);
        assert_eq!(detect_types("TTW - Voices1.bsa"), ArchiveTypes::VOICES);
        assert_eq!(
            detect_types("TTW - MenuVoices.bsa"),
            ArchiveTypes::MENUS | ArchiveTypes::VOICES
        );
        assert_eq!(detect_types("TaleOfTwoWastelands - Main.bsa"), ArchiveTypes::all());
        assert_eq!(detect_types("TTW - Misc.bsa"), ArchiveTypes::MISC);
        assert_eq!(detect_types("Whatever.bsa"), ArchiveTypes::MISC);
    }

    #[test]
    fn test_menuvoices_wins_over_voices() {
        // "menuvoices" contains "voices"; the more specific class must win
        let types = detect_types("Fallout - MenuVoices.bsa");
        assert!(types.contains(ArchiveTypes::MENUS));
    }

    #[test]
    fn test_version_from_tag() {
        assert_eq!(version_from_tag(103), Version::v103);
        assert_eq!(version_from_tag(104), Version::v104);
        assert_eq!(version_from_tag(105), Version::v105);
        assert_eq!(version_from_tag(0), Version::v104);
    }
}
