//! Loop device and mount point lifecycle.
//!
//! Acquisition failures are errors. Release is best-effort: it usually runs
//! while a more interesting error is being unwound, so failures are logged and
//! dropped instead of replacing that error.

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::error::{BootImageError, Result};
use crate::process::{Cmd, CommandRunner};

/// Filesystem type the boot partition is mounted as.
pub const BOOT_FS_TYPE: &str = "vfat";

/// A loop block device bound to the image file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopDevice {
    path: String,
}

impl LoopDevice {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }

    /// Bind `image` to the first free loop device with partition scanning.
    pub fn attach(runner: &dyn CommandRunner, image: &Path) -> Result<Self> {
        let output = Cmd::new("losetup")
            .args(["--partscan", "--find", "--show"])
            .arg_path(image)
            .error_msg("losetup failed attaching boot image")
            .run_with(runner)
            .map_err(|source| BootImageError::Attach {
                path: image.to_path_buf(),
                source,
            })?;

        let device = Self::new(output.stdout.trim());
        info!("attached {} to {}", image.display(), device.path);
        Ok(device)
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Device node of partition `n`, e.g. `/dev/loop0p1`.
    pub fn partition(&self, n: u32) -> String {
        format!("{}p{}", self.path, n)
    }

    /// Detach the device. Never fails; problems are logged.
    pub fn detach(&self, runner: &dyn CommandRunner) {
        let cmd = Cmd::new("losetup")
            .args(["-d", self.path.as_str()])
            .allow_fail();
        let source = match cmd.run_with(runner) {
            Ok(out) if out.success() => {
                info!("detached {}", self.path);
                return;
            }
            Ok(out) => cmd.failed(out.status, &out.stderr),
            Err(e) => e,
        };
        log_ignored(BootImageError::Detach {
            device: self.path.clone(),
            source,
        });
    }
}

/// The boot partition mounted on a local directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountPoint {
    device: String,
    dir: PathBuf,
}

impl MountPoint {
    pub fn mount(runner: &dyn CommandRunner, device: &str, dir: &Path) -> Result<Self> {
        Cmd::new("mount")
            .args(["-t", BOOT_FS_TYPE, device])
            .arg_path(dir)
            .error_msg("mount failed")
            .run_with(runner)
            .map_err(|source| BootImageError::Mount {
                device: device.to_string(),
                mount_dir: dir.to_path_buf(),
                source,
            })?;
        info!("mounted {} on {}", device, dir.display());
        Ok(Self {
            device: device.to_string(),
            dir: dir.to_path_buf(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    #[cfg(test)]
    pub fn device(&self) -> &str {
        &self.device
    }

    /// Unmount the directory. Never fails; problems are logged.
    pub fn unmount(&self, runner: &dyn CommandRunner) {
        let cmd = Cmd::new("umount").arg_path(&self.dir).allow_fail();
        let source = match cmd.run_with(runner) {
            Ok(out) if out.success() => {
                info!("unmounted {} from {}", self.device, self.dir.display());
                return;
            }
            Ok(out) => cmd.failed(out.status, &out.stderr),
            Err(e) => e,
        };
        log_ignored(BootImageError::Unmount {
            mount_dir: self.dir.clone(),
            source,
        });
    }
}

fn log_ignored(err: BootImageError) {
    match std::error::Error::source(&err) {
        Some(source) => warn!("ignoring: {}: {}", err, source),
        None => warn!("ignoring: {}", err),
    }
}
