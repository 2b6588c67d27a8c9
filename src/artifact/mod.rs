//! Artifact builders for boot media.
//!
//! - [`filesystem`] - Tree mirroring and file copies into mounted filesystems
//! - [`disk`] - Raw FAT boot image assembly (sizing, partitioning, GRUB)

pub mod disk;
pub mod filesystem;
