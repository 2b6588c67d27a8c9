//! Build configuration and working-directory layout.
//!
//! The configuration (module list and GRUB platform list) is read from a TOML
//! file; the layout resolves every input and scratch path of a build relative
//! to the build working directory. Both are passed into the pipeline
//! explicitly.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::artifact::disk::grub::GrubPlatform;
use crate::error::{BootImageError, Result};

/// Default configuration filename inside the work directory.
pub const DEFAULT_CONFIG_FILENAME: &str = "boot-image.toml";

/// Platforms built when the configuration does not list any.
pub const DEFAULT_GRUB_PLATFORMS: &[&str] = &["i386-pc", "x86_64-efi"];

/// System GRUB installation holding per-platform support files.
pub const DEFAULT_GRUB_LIB_DIR: &str = "/lib/grub";

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct BuildConfigToml {
    modules: Option<Vec<String>>,
    grub_platforms: Option<Vec<String>>,
}

/// Module archives and GRUB platforms to put on the image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildConfig {
    pub modules: Vec<String>,
    pub grub_platforms: Vec<GrubPlatform>,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            modules: Vec::new(),
            grub_platforms: DEFAULT_GRUB_PLATFORMS
                .iter()
                .map(|name| GrubPlatform::new(name))
                .collect(),
        }
    }
}

impl BuildConfig {
    /// Load a configuration file. The file must exist.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| BootImageError::Config {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Self::parse(&text, path)
    }

    /// Load `path` if it exists, otherwise fall back to defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.is_file() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn parse(text: &str, origin: &Path) -> Result<Self> {
        let invalid = |message: String| BootImageError::Config {
            path: origin.to_path_buf(),
            message,
        };

        let parsed: BuildConfigToml = toml::from_str(text).map_err(|e| invalid(e.to_string()))?;

        let mut modules = Vec::new();
        for module in parsed.modules.unwrap_or_default() {
            let module = module.trim();
            if module.is_empty() {
                return Err(invalid("module names must not be empty".to_string()));
            }
            if module.contains('/') {
                return Err(invalid(format!(
                    "module name '{}' must not contain a path separator",
                    module
                )));
            }
            modules.push(module.to_string());
        }

        let grub_platforms = match parsed.grub_platforms {
            None => Self::default().grub_platforms,
            Some(names) => names
                .iter()
                .map(|name| {
                    let name = name.trim();
                    if name.is_empty() {
                        Err(invalid("grub platform names must not be empty".to_string()))
                    } else {
                        Ok(GrubPlatform::new(name))
                    }
                })
                .collect::<Result<Vec<_>>>()?,
        };

        Ok(Self {
            modules,
            grub_platforms,
        })
    }

    pub fn needs_bios_setup(&self) -> bool {
        self.grub_platforms.iter().any(GrubPlatform::is_pc_bios)
    }
}

/// Paths used by one boot image build, all derived from the work directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildLayout {
    pub work_dir: PathBuf,
    /// Kernel binary, `root/boot/vmlinuz`.
    pub kernel: PathBuf,
    /// Initial RAM filesystem archive, `init.cpi`.
    pub initrd: PathBuf,
    /// Extra boot image content merged on top of the payload, `../boot_img`.
    pub overlay_dir: PathBuf,
    /// Persisted volume identity, `uuid`.
    pub identity_file: PathBuf,
    /// Where the boot partition is mounted during the build, `boot_mnt`.
    pub mount_dir: PathBuf,
    /// Early GRUB configuration embedded into every core image.
    pub early_config: PathBuf,
    pub lock_file: PathBuf,
    pub grub_lib_dir: PathBuf,
}

impl BuildLayout {
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        let work_dir = work_dir.into();
        let overlay_dir = match work_dir.parent() {
            Some(parent) => parent.join("boot_img"),
            None => work_dir.join("boot_img"),
        };
        Self {
            kernel: work_dir.join("root/boot/vmlinuz"),
            initrd: work_dir.join("init.cpi"),
            overlay_dir,
            identity_file: work_dir.join("uuid"),
            mount_dir: work_dir.join("boot_mnt"),
            early_config: work_dir.join("grub_early.cfg"),
            lock_file: work_dir.join(".boot-image.lock"),
            grub_lib_dir: PathBuf::from(DEFAULT_GRUB_LIB_DIR),
            work_dir,
        }
    }

    pub fn with_grub_lib_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.grub_lib_dir = dir.into();
        self
    }

    /// Archive for a configured module, `<module>.cpi`.
    pub fn module_archive(&self, module: &str) -> PathBuf {
        self.work_dir.join(format!("{}.cpi", module))
    }

    pub fn module_archives(&self, config: &BuildConfig) -> Vec<PathBuf> {
        config
            .modules
            .iter()
            .map(|m| self.module_archive(m))
            .collect()
    }
}
