//! Raw image allocation, partition table and FAT formatting.

use std::path::Path;

use tracing::info;

use super::capacity::{ImageSpec, CYLINDER_SIZE};
use super::devices::LoopDevice;
use super::identity::VolumeId;
use crate::error::{BootImageError, Result};
use crate::process::{Cmd, CommandRunner};

/// sfdisk input: one bootable FAT16 (type `e`) partition spanning the disk,
/// then three unused entries to fill the legacy four-slot table.
pub const SFDISK_SCRIPT: &str = "1,+,e,*\n0,0,0\n0,0,0\n0,0,0\n";

/// FAT variant of the boot partition.
pub const FAT_BITS: &str = "16";

/// Create a zero-filled image of exactly `spec.size_bytes()`, replacing any existing file.
pub fn allocate_image(runner: &dyn CommandRunner, image: &Path, spec: &ImageSpec) -> Result<()> {
    info!(
        "allocating {} ({} cylinders, {} bytes)",
        image.display(),
        spec.cylinders,
        spec.size_bytes()
    );
    Cmd::new("dd")
        .arg("if=/dev/zero")
        .arg(format!("of={}", image.display()))
        .arg(format!("bs={}", CYLINDER_SIZE))
        .arg(format!("count={}", spec.cylinders))
        .error_msg("dd failed allocating boot image")
        .run_with(runner)
        .map_err(|source| BootImageError::Allocation {
            path: image.to_path_buf(),
            source,
        })?;
    Ok(())
}

/// Write the single-partition table to the attached device.
pub fn partition_device(runner: &dyn CommandRunner, device: &LoopDevice) -> Result<()> {
    Cmd::new("sfdisk")
        .arg(device.path())
        .stdin(SFDISK_SCRIPT)
        .error_msg("sfdisk failed writing partition table")
        .run_with(runner)
        .map_err(|source| BootImageError::PartitionFormat {
            step: "write partition table",
            device: device.path().to_string(),
            source,
        })?;
    Ok(())
}

/// Format the first partition as FAT16 carrying `volume_id` as its serial.
///
/// `-I` is required because mkdosfs refuses whole-disk style devices such as
/// loop partitions otherwise.
pub fn format_boot_partition(
    runner: &dyn CommandRunner,
    device: &LoopDevice,
    volume_id: &VolumeId,
) -> Result<()> {
    let partition = device.partition(1);
    Cmd::new("mkdosfs")
        .args(["-F", FAT_BITS, "-I", "-i", volume_id.as_str()])
        .arg(partition.as_str())
        .error_msg("mkdosfs failed formatting boot partition")
        .run_with(runner)
        .map_err(|source| BootImageError::PartitionFormat {
            step: "format FAT16 filesystem",
            device: partition.clone(),
            source,
        })?;
    info!("formatted {} as FAT{} (volume id {})", partition, FAT_BITS, volume_id);
    Ok(())
}
