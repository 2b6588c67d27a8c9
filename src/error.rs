//! Error types for boot image assembly.
//!
//! Every stage of the pipeline has its own variant so a failure keeps the
//! identity of the step that produced it, even after rollback has run.

use std::path::PathBuf;

use thiserror::Error;

use crate::process::ExternalToolError;

/// Result alias used across the library.
pub type Result<T, E = BootImageError> = std::result::Result<T, E>;

/// Errors raised while assembling a boot image.
#[derive(Debug, Error)]
pub enum BootImageError {
    #[error("invalid build configuration '{}': {message}", path.display())]
    Config { path: PathBuf, message: String },

    #[error("preflight check failed:\n{0}")]
    Preflight(String),

    #[error("path is not valid UTF-8: {}", .0.display())]
    NonUtf8Path(PathBuf),

    #[error("work directory is locked by another build: {}", .0.display())]
    Locked(PathBuf),

    #[error("payload size query failed: {message}")]
    Sizing {
        message: String,
        #[source]
        source: Option<ExternalToolError>,
    },

    #[error("malformed volume identity in '{}': {content:?}", path.display())]
    IdentityFormat {
        path: PathBuf,
        content: String,
        #[source]
        source: uuid::Error,
    },

    #[error("failed to allocate image '{}'", path.display())]
    Allocation {
        path: PathBuf,
        #[source]
        source: ExternalToolError,
    },

    #[error("failed to attach '{}' to a loop device", path.display())]
    Attach {
        path: PathBuf,
        #[source]
        source: ExternalToolError,
    },

    #[error("failed to detach loop device {device}")]
    Detach {
        device: String,
        #[source]
        source: ExternalToolError,
    },

    #[error("failed to {step} on {device}")]
    PartitionFormat {
        step: &'static str,
        device: String,
        #[source]
        source: ExternalToolError,
    },

    #[error("failed to mount {device} on '{}'", mount_dir.display())]
    Mount {
        device: String,
        mount_dir: PathBuf,
        #[source]
        source: ExternalToolError,
    },

    #[error("failed to unmount '{}'", mount_dir.display())]
    Unmount {
        mount_dir: PathBuf,
        #[source]
        source: ExternalToolError,
    },

    #[error("failed to copy '{}' into the image", path.display())]
    Population {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to install GRUB for platform '{platform}': {message}")]
    BootloaderInstall {
        platform: String,
        message: String,
        #[source]
        source: Option<BootloaderCause>,
    },

    #[error("{context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

/// Underlying failure of a bootloader installation step.
#[derive(Debug, Error)]
pub enum BootloaderCause {
    #[error(transparent)]
    Tool(#[from] ExternalToolError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl BootImageError {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    pub(crate) fn bootloader(
        platform: &str,
        message: impl Into<String>,
        source: impl Into<BootloaderCause>,
    ) -> Self {
        Self::BootloaderInstall {
            platform: platform.to_string(),
            message: message.into(),
            source: Some(source.into()),
        }
    }
}
