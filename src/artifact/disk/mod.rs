//! Bootable disk image assembly.
//!
//! Builds a raw image holding a single FAT16 boot partition with the kernel,
//! initrd, module archives, boot overlay and GRUB for every configured
//! platform. The image is manipulated through a loop device and a real mount,
//! so building needs root.
//!
//! # Pipeline
//!
//! ```text
//! Init → Sized → Allocated → Attached → Formatted → Mounted
//!      → Populated → BootloadersInstalled → Unmounted → Detached → Done
//! ```
//!
//! Any failure after the image file is allocated unwinds whatever was acquired
//! (unmount, detach, delete image) and returns the original error; no partial
//! image is ever left at the destination.

pub mod assembly;
pub mod capacity;
pub mod devices;
pub mod grub;
pub mod identity;
pub mod payload;
pub mod resources;

pub use capacity::{ImageSpec, CYLINDER_SIZE};
pub use devices::{LoopDevice, MountPoint};
pub use grub::GrubPlatform;
pub use identity::{get_or_create_identity, VolumeId, VolumeIdentity};
pub use payload::PayloadSet;

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::{debug, info};

use crate::config::{BuildConfig, BuildLayout};
use crate::error::{BootImageError, Result};
use crate::process::CommandRunner;
use grub::GrubInstall;
use resources::{Resource, ResourceStack};

/// Pipeline progress, logged as the build advances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Init,
    Sized,
    Allocated,
    Attached,
    Formatted,
    Mounted,
    Populated,
    BootloadersInstalled,
    Unmounted,
    Detached,
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Summary of a finished build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootImageReport {
    pub path: PathBuf,
    pub cylinders: u64,
    pub size_bytes: u64,
    pub volume_id: VolumeId,
    pub platforms: Vec<GrubPlatform>,
}

/// Assembles boot images for one build working directory.
pub struct BootImageBuilder<'a> {
    config: &'a BuildConfig,
    layout: &'a BuildLayout,
    runner: &'a dyn CommandRunner,
}

impl<'a> BootImageBuilder<'a> {
    pub fn new(
        config: &'a BuildConfig,
        layout: &'a BuildLayout,
        runner: &'a dyn CommandRunner,
    ) -> Self {
        Self {
            config,
            layout,
            runner,
        }
    }

    /// Build the image at `destination`, which should be an absolute path.
    pub fn build(&self, destination: &Path) -> Result<BootImageReport> {
        // Paths are handed to external tools as text.
        for path in [
            destination,
            self.layout.work_dir.as_path(),
            self.layout.overlay_dir.as_path(),
            self.layout.grub_lib_dir.as_path(),
        ] {
            require_utf8(path)?;
        }
        let _lock = lock_work_dir(&self.layout.lock_file)?;
        let mut stage = Stage::Init;

        let payload = PayloadSet::new(self.layout, self.config);
        payload.verify()?;

        if !self.layout.mount_dir.is_dir() {
            fs::create_dir_all(&self.layout.mount_dir).map_err(|e| {
                BootImageError::io(
                    format!("creating mount directory '{}'", self.layout.mount_dir.display()),
                    e,
                )
            })?;
        }

        let identity = get_or_create_identity(&self.layout.identity_file)?;
        grub::write_early_config(&self.layout.early_config, &identity.volume_id)?;

        let bytes = capacity::payload_bytes(self.runner, &payload.size_paths())?;
        let spec = ImageSpec::for_payload(bytes);
        advance(&mut stage, Stage::Sized);

        let mut held = ResourceStack::new(self.runner);
        held.push(Resource::Image(destination.to_path_buf()));
        assembly::allocate_image(self.runner, destination, &spec)?;
        advance(&mut stage, Stage::Allocated);

        let device = LoopDevice::attach(self.runner, destination)?;
        held.push(Resource::Loop(device.clone()));
        advance(&mut stage, Stage::Attached);

        assembly::partition_device(self.runner, &device)?;
        assembly::format_boot_partition(self.runner, &device, &identity.volume_id)?;
        advance(&mut stage, Stage::Formatted);

        let mount = MountPoint::mount(self.runner, &device.partition(1), &self.layout.mount_dir)?;
        held.push(Resource::Mount(mount.clone()));
        advance(&mut stage, Stage::Mounted);

        payload.populate(mount.dir())?;
        advance(&mut stage, Stage::Populated);

        let installer = GrubInstall {
            device: &device,
            mount_root: mount.dir(),
            early_config: &self.layout.early_config,
            grub_lib_dir: &self.layout.grub_lib_dir,
        };
        for platform in &self.config.grub_platforms {
            installer.install(self.runner, platform)?;
        }
        advance(&mut stage, Stage::BootloadersInstalled);

        held.commit();
        advance(&mut stage, Stage::Unmounted);
        advance(&mut stage, Stage::Detached);
        advance(&mut stage, Stage::Done);

        let report = BootImageReport {
            path: destination.to_path_buf(),
            cylinders: spec.cylinders,
            size_bytes: spec.size_bytes(),
            volume_id: identity.volume_id,
            platforms: self.config.grub_platforms.clone(),
        };
        info!(
            "boot image {} ready: {} bytes, volume id {}",
            report.path.display(),
            report.size_bytes,
            report.volume_id
        );
        Ok(report)
    }
}

fn advance(stage: &mut Stage, next: Stage) {
    debug!("stage {} -> {}", stage, next);
    *stage = next;
}

fn require_utf8(path: &Path) -> Result<()> {
    match path.to_str() {
        Some(_) => Ok(()),
        None => Err(BootImageError::NonUtf8Path(path.to_path_buf())),
    }
}

/// Hold an exclusive lock on the work directory for the duration of a build.
fn lock_work_dir(lock_path: &Path) -> Result<File> {
    let file = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(false)
        .open(lock_path)
        .map_err(|e| {
            BootImageError::io(format!("opening lock file '{}'", lock_path.display()), e)
        })?;
    if file.try_lock_exclusive().is_err() {
        return Err(BootImageError::Locked(lock_path.to_path_buf()));
    }
    Ok(file)
}
