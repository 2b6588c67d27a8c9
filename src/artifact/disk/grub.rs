//! GRUB installation onto the mounted boot partition.
//!
//! For every configured platform a core image is built with an embedded early
//! configuration that finds the boot partition by its volume serial and then
//! hands over to `/grub`. PC-BIOS platforms additionally get boot-sector code
//! written to the loop device.
//!
//! Layout produced on the partition:
//!
//! ```text
//! /grub/<platform>/          support modules mirrored from /lib/grub/<platform>
//! /grub/<platform>/core.img  core image (non-EFI platforms)
//! /grub/<platform>/boot.img  boot sector stub (PC-BIOS only)
//! /EFI/BOOT/BOOTX64.EFI      core image for 64-bit EFI platforms
//! /EFI/BOOT/BOOTIA32.EFI     core image for 32-bit EFI platforms
//! ```

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::devices::LoopDevice;
use super::identity::VolumeId;
use crate::artifact::filesystem::{copy_into, mirror_dir};
use crate::error::{BootImageError, Result};
use crate::process::{Cmd, CommandRunner};

/// GRUB directory on the boot partition.
pub const GRUB_PREFIX: &str = "grub";

/// Modules linked into every core image.
pub const GRUB_CORE_MODULES: &[&str] = &["search", "search_label", "fat", "part_msdos"];

/// Extra module needed by PC-BIOS core images.
pub const GRUB_BIOS_MODULE: &str = "biosdisk";

/// Removable-media EFI loader directory.
pub const EFI_BOOT_DIR: &str = "EFI/BOOT";

/// A GRUB target platform such as `i386-pc` or `x86_64-efi`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GrubPlatform {
    name: String,
}

impl GrubPlatform {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_efi(&self) -> bool {
        self.name.ends_with("-efi")
    }

    pub fn is_pc_bios(&self) -> bool {
        self.name.ends_with("-pc")
    }

    /// Removable-media loader filename for EFI platforms.
    pub fn efi_loader_name(&self) -> Option<&'static str> {
        if !self.is_efi() {
            return None;
        }
        if self.name.contains("64") {
            Some("BOOTX64.EFI")
        } else {
            Some("BOOTIA32.EFI")
        }
    }

    /// Modules for `grub-mkimage`.
    pub fn core_modules(&self) -> Vec<&'static str> {
        let mut modules = GRUB_CORE_MODULES.to_vec();
        if self.is_pc_bios() {
            modules.push(GRUB_BIOS_MODULE);
        }
        modules
    }

    /// Per-platform directory on the mounted partition.
    pub fn platform_dir(&self, mount_root: &Path) -> PathBuf {
        mount_root.join(GRUB_PREFIX).join(&self.name)
    }

    /// Where the built core image goes on the mounted partition.
    pub fn image_path(&self, mount_root: &Path) -> PathBuf {
        match self.efi_loader_name() {
            Some(loader) => mount_root.join(EFI_BOOT_DIR).join(loader),
            None => self.platform_dir(mount_root).join("core.img"),
        }
    }
}

impl fmt::Display for GrubPlatform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Early configuration embedded into every core image.
pub fn early_config(volume_id: &VolumeId) -> String {
    format!(
        "search.fs_uuid {} root\nset prefix=($root)/{}\n",
        volume_id.fs_uuid(),
        GRUB_PREFIX
    )
}

/// Write the early configuration file used by all platform builds.
pub fn write_early_config(path: &Path, volume_id: &VolumeId) -> Result<()> {
    fs::write(path, early_config(volume_id)).map_err(|e| {
        BootImageError::io(
            format!("writing early GRUB configuration '{}'", path.display()),
            e,
        )
    })?;
    debug!("wrote early GRUB configuration {}", path.display());
    Ok(())
}

/// Inputs shared by every platform installation of one image.
#[derive(Debug, Clone, Copy)]
pub struct GrubInstall<'a> {
    pub device: &'a LoopDevice,
    pub mount_root: &'a Path,
    pub early_config: &'a Path,
    /// System GRUB installation, normally `/lib/grub`.
    pub grub_lib_dir: &'a Path,
}

impl GrubInstall<'_> {
    /// Build and install GRUB for one platform.
    pub fn install(&self, runner: &dyn CommandRunner, platform: &GrubPlatform) -> Result<()> {
        let name = platform.name();
        let platform_dir = platform.platform_dir(self.mount_root);
        let system_dir = self.grub_lib_dir.join(name);

        fs::create_dir_all(&platform_dir).map_err(|e| {
            BootImageError::bootloader(name, format!("creating {}", platform_dir.display()), e)
        })?;

        let image = platform.image_path(self.mount_root);
        if let Some(parent) = image.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                BootImageError::bootloader(name, format!("creating {}", parent.display()), e)
            })?;
        }

        Cmd::new("grub-mkimage")
            .arg("--output")
            .arg_path(&image)
            .args(["--format", name])
            .arg("--prefix")
            .arg(format!("/{}", GRUB_PREFIX))
            .arg("--config")
            .arg_path(self.early_config)
            .args(platform.core_modules())
            .error_msg("grub-mkimage failed")
            .run_with(runner)
            .map_err(|e| BootImageError::bootloader(name, "building core image", e))?;
        debug!("built {} core image {}", name, image.display());

        if platform.is_pc_bios() {
            copy_into(&system_dir.join("boot.img"), &platform_dir, "boot.img").map_err(|e| {
                BootImageError::bootloader(name, "copying boot.img", e.source)
            })?;
            Cmd::new("grub-bios-setup")
                .arg("--directory")
                .arg_path(&platform_dir)
                .arg(self.device.path())
                .error_msg("grub-bios-setup failed")
                .run_with(runner)
                .map_err(|e| {
                    BootImageError::bootloader(name, "installing boot sector", e)
                })?;
            debug!("installed {} boot sector on {}", name, self.device.path());
        }

        mirror_dir(&system_dir, &platform_dir).map_err(|e| {
            BootImageError::bootloader(
                name,
                format!("copying support files from {}", e.path.display()),
                e.source,
            )
        })?;

        info!("installed GRUB for {}", name);
        Ok(())
    }
}
