//! Preflight checks for boot image builds.
//!
//! Validates that the host has the required tools and privileges before
//! anything is allocated. This prevents a build from failing halfway with a
//! loop device attached.
//!
//! # Example
//!
//! ```rust
//! use nr_boot_image::preflight::{command_exists, check_required_tools};
//!
//! if !command_exists("grub-mkimage") {
//!     println!("grub not installed");
//! }
//!
//! let tools = &[("sfdisk", "util-linux"), ("mkdosfs", "dosfstools")];
//! if let Err(e) = check_required_tools(tools) {
//!     eprintln!("{}", e);
//! }
//! ```

use crate::config::BuildConfig;
use crate::error::{BootImageError, Result};

/// Check if a command exists on the host system.
pub fn command_exists(cmd: &str) -> bool {
    which::which(cmd).is_ok()
}

/// Host tools every boot image build uses.
///
/// Each tuple is (command_name, package_name).
pub const REQUIRED_TOOLS: &[(&str, &str)] = &[
    ("dd", "coreutils"),
    ("du", "coreutils"),
    ("losetup", "util-linux"),
    ("sfdisk", "util-linux"),
    ("mount", "util-linux"),
    ("umount", "util-linux"),
    ("mkdosfs", "dosfstools"),
    ("grub-mkimage", "grub"),
];

/// Only needed when a PC-BIOS platform is configured.
pub const BIOS_TOOLS: &[(&str, &str)] = &[("grub-bios-setup", "grub")];

/// Check that specific tools are available.
///
/// # Returns
///
/// * `Ok(())` if all tools are found
/// * `Err` with list of missing tools and their packages
pub fn check_required_tools(tools: &[(&str, &str)]) -> Result<()> {
    let missing: Vec<String> = tools
        .iter()
        .filter(|(tool, _)| !command_exists(tool))
        .map(|(tool, package)| format!("  {} (install: {})", tool, package))
        .collect();

    if !missing.is_empty() {
        return Err(BootImageError::Preflight(format!(
            "Missing required host tools:\n{}",
            missing.join("\n")
        )));
    }

    Ok(())
}

/// Loop devices and mounts need root.
pub fn check_privileges() -> Result<()> {
    // SAFETY: geteuid has no preconditions and cannot fail.
    let euid = unsafe { libc::geteuid() };
    if euid != 0 {
        return Err(BootImageError::Preflight(format!(
            "building a boot image needs root (effective uid is {})",
            euid
        )));
    }
    Ok(())
}

/// Run every host check relevant for `config`.
pub fn check_host(config: &BuildConfig) -> Result<()> {
    let mut tools = REQUIRED_TOOLS.to_vec();
    if config.needs_bios_setup() {
        tools.extend_from_slice(BIOS_TOOLS);
    }
    check_required_tools(&tools)?;
    check_privileges()
}
