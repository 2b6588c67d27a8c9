//! Boot payload: the files that size the image and get copied onto it.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::artifact::filesystem::{copy_into, mirror_dir};
use crate::config::{BuildConfig, BuildLayout};
use crate::error::{BootImageError, Result};

/// Kernel filename on the boot partition.
pub const KERNEL_NAME: &str = "vmlinuz";

/// Initrd archive filename on the boot partition.
pub const INITRD_NAME: &str = "init.cpi";

/// Every input that ends up on the boot partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadSet {
    /// System GRUB installation; only contributes to the size estimate here,
    /// platform files are copied by the GRUB installer.
    pub grub_lib_dir: PathBuf,
    pub overlay_dir: PathBuf,
    pub initrd: PathBuf,
    pub kernel: PathBuf,
    pub modules: Vec<PathBuf>,
}

impl PayloadSet {
    pub fn new(layout: &BuildLayout, config: &BuildConfig) -> Self {
        Self {
            grub_lib_dir: layout.grub_lib_dir.clone(),
            overlay_dir: layout.overlay_dir.clone(),
            initrd: layout.initrd.clone(),
            kernel: layout.kernel.clone(),
            modules: layout.module_archives(config),
        }
    }

    /// Paths measured together for the image size, in a fixed order.
    pub fn size_paths(&self) -> Vec<PathBuf> {
        let mut paths = vec![
            self.grub_lib_dir.clone(),
            self.overlay_dir.clone(),
            self.initrd.clone(),
            self.kernel.clone(),
        ];
        paths.extend(self.modules.iter().cloned());
        paths
    }

    /// Fail early, before anything is allocated, if an input is missing.
    pub fn verify(&self) -> Result<()> {
        let mut missing = Vec::new();
        for dir in [&self.grub_lib_dir, &self.overlay_dir] {
            if !dir.is_dir() {
                missing.push(format!("  directory {}", dir.display()));
            }
        }
        for file in [&self.kernel, &self.initrd].into_iter().chain(&self.modules) {
            if !file.is_file() {
                missing.push(format!("  file {}", file.display()));
            }
        }

        if !missing.is_empty() {
            return Err(BootImageError::Preflight(format!(
                "missing boot payload inputs:\n{}",
                missing.join("\n")
            )));
        }
        Ok(())
    }

    /// Copy kernel, initrd and modules into `mount_root`, then merge the overlay tree.
    pub fn populate(&self, mount_root: &Path) -> Result<()> {
        let population = |e: crate::artifact::filesystem::MirrorError| BootImageError::Population {
            path: e.path,
            source: e.source,
        };

        copy_into(&self.kernel, mount_root, KERNEL_NAME).map_err(population)?;
        copy_into(&self.initrd, mount_root, INITRD_NAME).map_err(population)?;
        for module in &self.modules {
            let name = module
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .ok_or_else(|| BootImageError::Population {
                    path: module.clone(),
                    source: std::io::Error::new(
                        std::io::ErrorKind::InvalidInput,
                        "module archive has no file name",
                    ),
                })?;
            copy_into(module, mount_root, &name).map_err(population)?;
            debug!("copied module {}", name);
        }

        let copied = mirror_dir(&self.overlay_dir, mount_root).map_err(population)?;
        info!(
            "populated {} ({} modules, {} overlay files)",
            mount_root.display(),
            self.modules.len(),
            copied
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn fixture(temp: &TempDir, modules: &[&str]) -> (BuildLayout, BuildConfig) {
        let work = temp.path().join("work");
        let layout = BuildLayout::new(&work).with_grub_lib_dir(temp.path().join("grub"));
        fs::create_dir_all(work.join("root/boot")).unwrap();
        fs::create_dir_all(&layout.overlay_dir).unwrap();
        fs::create_dir_all(&layout.grub_lib_dir).unwrap();
        fs::write(&layout.kernel, "kernel").unwrap();
        fs::write(&layout.initrd, "initrd").unwrap();
        fs::write(layout.overlay_dir.join("grub.cfg"), "menu").unwrap();
        for module in modules {
            fs::write(layout.module_archive(module), *module).unwrap();
        }
        let config = BuildConfig {
            modules: modules.iter().map(|m| m.to_string()).collect(),
            ..BuildConfig::default()
        };
        (layout, config)
    }

    #[test]
    fn test_size_paths_order() {
        let layout = BuildLayout::new("/w/work");
        let config = BuildConfig {
            modules: vec!["net".into()],
            ..BuildConfig::default()
        };
        let payload = PayloadSet::new(&layout, &config);
        assert_eq!(
            payload.size_paths(),
            [
                PathBuf::from("/lib/grub"),
                PathBuf::from("/w/boot_img"),
                PathBuf::from("/w/work/init.cpi"),
                PathBuf::from("/w/work/root/boot/vmlinuz"),
                PathBuf::from("/w/work/net.cpi"),
            ]
        );
    }

    #[test]
    fn test_verify_reports_missing_inputs() {
        let temp = TempDir::new().unwrap();
        let (layout, mut config) = fixture(&temp, &[]);
        config.modules.push("absent".into());
        fs::remove_file(&layout.kernel).unwrap();

        let err = PayloadSet::new(&layout, &config).verify().unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("vmlinuz"));
        assert!(msg.contains("absent.cpi"));
    }

    #[test]
    fn test_populate_copies_fixed_names_then_overlay() {
        let temp = TempDir::new().unwrap();
        let (layout, config) = fixture(&temp, &["net", "storage"]);
        let mount = temp.path().join("mnt");
        fs::create_dir_all(&mount).unwrap();

        let payload = PayloadSet::new(&layout, &config);
        payload.verify().unwrap();
        payload.populate(&mount).unwrap();

        assert_eq!(fs::read_to_string(mount.join("vmlinuz")).unwrap(), "kernel");
        assert_eq!(fs::read_to_string(mount.join("init.cpi")).unwrap(), "initrd");
        assert_eq!(fs::read_to_string(mount.join("net.cpi")).unwrap(), "net");
        assert_eq!(fs::read_to_string(mount.join("storage.cpi")).unwrap(), "storage");
        assert_eq!(fs::read_to_string(mount.join("grub.cfg")).unwrap(), "menu");
    }

    #[test]
    fn test_populate_overlay_wins_over_fixed_names() {
        let temp = TempDir::new().unwrap();
        let (layout, config) = fixture(&temp, &[]);
        fs::write(layout.overlay_dir.join("vmlinuz"), "variant").unwrap();
        let mount = temp.path().join("mnt");
        fs::create_dir_all(&mount).unwrap();

        PayloadSet::new(&layout, &config).populate(&mount).unwrap();

        assert_eq!(fs::read_to_string(mount.join("vmlinuz")).unwrap(), "variant");
    }

    #[test]
    fn test_populate_missing_file_is_population_error() {
        let temp = TempDir::new().unwrap();
        let (layout, config) = fixture(&temp, &[]);
        fs::remove_file(&layout.initrd).unwrap();

        let err = PayloadSet::new(&layout, &config)
            .populate(temp.path())
            .unwrap_err();
        assert!(matches!(err, BootImageError::Population { ref path, .. } if *path == layout.initrd));
    }
}
