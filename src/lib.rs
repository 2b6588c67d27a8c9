//! Bootable disk image assembly for network-boot Linux builds.
//!
//! Takes the outputs of a distribution build (kernel, initrd archive, module
//! archives and a boot overlay tree) and produces a raw disk image with one
//! FAT16 boot partition that GRUB can start on both PC-BIOS and EFI machines.
//!
//! - **Artifact builders** - Directory mirroring and the disk image pipeline
//! - **Configuration** - Module/platform lists and work-directory layout
//! - **Preflight checks** - Host tool and privilege validation before builds
//! - **Process plumbing** - External tools run through a substitutable runner
//!
//! # Architecture
//!
//! ```text
//! make-boot-img (bin)
//!     │
//!     ├── config:     BuildConfig (TOML) + BuildLayout (work dir paths)
//!     ├── preflight:  host tools, root
//!     └── artifact::disk::BootImageBuilder
//!             │
//!             ├── identity   persisted UUID → FAT volume serial
//!             ├── capacity   du total → cylinders
//!             ├── assembly   dd, sfdisk, mkdosfs
//!             ├── devices    losetup, mount
//!             ├── payload    kernel, initrd, modules, overlay
//!             ├── grub       grub-mkimage, grub-bios-setup per platform
//!             └── resources  reverse-order rollback on failure
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use nr_boot_image::{BootImageBuilder, BuildConfig, BuildLayout, SystemRunner};
//! use std::path::Path;
//!
//! let layout = BuildLayout::new("/build/work");
//! let config = BuildConfig::load_or_default(&layout.work_dir.join("boot-image.toml"))?;
//! let report = BootImageBuilder::new(&config, &layout, &SystemRunner)
//!     .build(Path::new("/build/out/boot.img"))?;
//! println!("{} cylinders", report.cylinders);
//! ```

pub mod artifact;
pub mod config;
pub mod error;
pub mod preflight;
pub mod process;

pub use artifact::disk::{BootImageBuilder, BootImageReport, GrubPlatform};
pub use config::{BuildConfig, BuildLayout};
pub use error::{BootImageError, Result};
pub use process::{Cmd, CommandRunner, SystemRunner};
