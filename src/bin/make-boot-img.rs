//! Boot image builder CLI.
//!
//! Run from a build working directory containing `root/boot/vmlinuz`,
//! `init.cpi` and one `<module>.cpi` per configured module:
//!
//! ```bash
//! make-boot-img /srv/netboot/boot.img
//! make-boot-img -v --config nr.toml --work-dir build/ out/boot.img
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use nr_boot_image::config::DEFAULT_CONFIG_FILENAME;
use nr_boot_image::{preflight, BootImageBuilder, BuildConfig, BuildLayout, SystemRunner};

#[derive(Parser)]
#[command(name = "make-boot-img")]
#[command(author, version, about = "Make boot image", long_about = None)]
struct Cli {
    /// Destination file name
    destination: PathBuf,

    /// Build configuration (default: <work-dir>/boot-image.toml if present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Build working directory holding the payload
    #[arg(short, long)]
    work_dir: Option<PathBuf>,

    /// System GRUB installation with per-platform support files
    #[arg(long)]
    grub_lib_dir: Option<PathBuf>,

    /// Skip host tool and privilege checks
    #[arg(long)]
    skip_preflight: bool,

    /// More output (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, conflicts_with = "quiet")]
    verbose: u8,

    /// Only print warnings and errors
    #[arg(short, long)]
    quiet: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    let cwd = std::env::current_dir().context("resolving current directory")?;
    let work_dir = match &cli.work_dir {
        Some(dir) => absolute(&cwd, dir),
        None => cwd.clone(),
    };
    let destination = absolute(&cwd, &cli.destination);

    let mut layout = BuildLayout::new(&work_dir);
    if let Some(dir) = &cli.grub_lib_dir {
        layout = layout.with_grub_lib_dir(absolute(&cwd, dir));
    }

    let config = match &cli.config {
        Some(path) => BuildConfig::load(&absolute(&cwd, path)),
        None => BuildConfig::load_or_default(&work_dir.join(DEFAULT_CONFIG_FILENAME)),
    }
    .context("loading build configuration")?;

    if !cli.skip_preflight {
        preflight::check_host(&config).context("preflight checks")?;
    }

    let report = BootImageBuilder::new(&config, &layout, &SystemRunner)
        .build(&destination)
        .with_context(|| format!("building boot image '{}'", destination.display()))?;

    tracing::info!(
        "wrote {} ({} cylinders, {} MB) for {}",
        report.path.display(),
        report.cylinders,
        report.size_bytes / 1024 / 1024,
        report
            .platforms
            .iter()
            .map(|p| p.name())
            .collect::<Vec<_>>()
            .join(", ")
    );
    Ok(())
}

fn absolute(cwd: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        cwd.join(path)
    }
}

fn init_logging(verbose: u8, quiet: bool) {
    let level = match (quiet, verbose) {
        (true, _) => "warn",
        (false, 0) => "info",
        (false, 1) => "debug",
        (false, _) => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false).with_level(true))
        .init();
}
