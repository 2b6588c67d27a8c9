//! Ownership of the transient resources acquired while building an image.
//!
//! Each acquisition (image file, loop device, mount) is pushed onto a
//! [`ResourceStack`]. On success [`ResourceStack::commit`] releases the devices
//! and keeps the image; if the stack is dropped without being committed
//! (any `?` on the way out of the pipeline) everything is unwound in reverse
//! order, including deleting the image. Release failures are logged, never
//! returned, so the error that caused the unwind is the one the caller sees.

use std::fs;
use std::io;
use std::path::PathBuf;

use tracing::{info, warn};

use super::devices::{LoopDevice, MountPoint};
use crate::process::CommandRunner;

/// Something to undo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resource {
    /// The image file; removed only on failure.
    Image(PathBuf),
    Loop(LoopDevice),
    Mount(MountPoint),
}

pub struct ResourceStack<'r> {
    runner: &'r dyn CommandRunner,
    held: Vec<Resource>,
}

impl<'r> ResourceStack<'r> {
    pub fn new(runner: &'r dyn CommandRunner) -> Self {
        Self {
            runner,
            held: Vec::new(),
        }
    }

    pub fn push(&mut self, resource: Resource) {
        self.held.push(resource);
    }

    #[cfg(test)]
    pub fn held(&self) -> &[Resource] {
        &self.held
    }

    /// Release the devices in reverse order and keep the image.
    pub fn commit(mut self) {
        while let Some(resource) = self.held.pop() {
            match resource {
                Resource::Image(_) => {}
                other => self.release(other),
            }
        }
    }

    fn release(&self, resource: Resource) {
        match resource {
            Resource::Mount(mount) => mount.unmount(self.runner),
            Resource::Loop(device) => device.detach(self.runner),
            Resource::Image(path) => match fs::remove_file(&path) {
                Ok(()) => info!("removed partial image {}", path.display()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => warn!("ignoring: removing partial image {}: {}", path.display(), e),
            },
        }
    }
}

impl Drop for ResourceStack<'_> {
    fn drop(&mut self) {
        if self.held.is_empty() {
            return;
        }
        warn!("build failed, rolling back {} resources", self.held.len());
        while let Some(resource) = self.held.pop() {
            self.release(resource);
        }
    }
}
