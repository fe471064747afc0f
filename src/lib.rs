//! MPI installer - Tale of Two Wastelands package installer
//!
//! Materializes a `.mpi` asset-transformation package against reference
//! game installations (Fallout 3, Fallout New Vegas, Oblivion) into an
//! output directory: copied assets, xdelta3-patched game files, transcoded
//! audio, and repacked BSA archives.

pub mod bsa;
pub mod hash;
pub mod installer;
pub mod manifest;
pub mod paths;
pub mod scratch;
pub mod tools;

// Re-export commonly used types
pub use installer::{InstallConfig, InstallStats, Installer};
pub use manifest::Manifest;
