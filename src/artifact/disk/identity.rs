//! Persistent volume identity for the boot partition.
//!
//! A random UUID is generated once per image lineage and kept in a sidecar
//! file next to the build inputs. The FAT volume serial is the first eight hex
//! digits of the MD5 of the UUID's raw bytes, so every rebuild from the same
//! work directory produces a partition that the early GRUB stage can still
//! find by `search.fs_uuid`.

use std::fmt;
use std::fs;
use std::path::Path;

use md5::{Digest, Md5};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{BootImageError, Result};

/// FAT volume serial: exactly eight lowercase hex digits.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VolumeId(String);

impl VolumeId {
    /// Derive the serial from a UUID's raw bytes.
    pub fn derive(uuid: &Uuid) -> Self {
        let digest = Md5::digest(uuid.as_bytes());
        let hex = format!("{:x}", digest);
        Self(hex[..8].to_string())
    }

    /// Serial as passed to `mkdosfs -i`.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Serial in filesystem UUID search syntax, `XXXX-XXXX`.
    pub fn fs_uuid(&self) -> String {
        format!("{}-{}", &self.0[..4], &self.0[4..])
    }
}

impl fmt::Display for VolumeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Image identity: the persisted UUID and the serial derived from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeIdentity {
    pub uuid: Uuid,
    pub volume_id: VolumeId,
}

impl VolumeIdentity {
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self {
            volume_id: VolumeId::derive(&uuid),
            uuid,
        }
    }

    /// Raw 16 identifier bytes.
    pub fn bytes(&self) -> &[u8; 16] {
        self.uuid.as_bytes()
    }
}

/// Read the identity from `sidecar`, or create and persist a fresh one.
pub fn get_or_create_identity(sidecar: &Path) -> Result<VolumeIdentity> {
    if sidecar.exists() {
        let content = fs::read_to_string(sidecar).map_err(|e| {
            BootImageError::io(
                format!("reading volume identity '{}'", sidecar.display()),
                e,
            )
        })?;
        let uuid = Uuid::parse_str(content.trim()).map_err(|source| {
            BootImageError::IdentityFormat {
                path: sidecar.to_path_buf(),
                content: content.trim().to_string(),
                source,
            }
        })?;
        let identity = VolumeIdentity::from_uuid(uuid);
        debug!(
            "reusing volume identity {} (volume id {})",
            identity.uuid, identity.volume_id
        );
        return Ok(identity);
    }

    let identity = VolumeIdentity::from_uuid(Uuid::new_v4());
    fs::write(sidecar, format!("{}\n", identity.uuid)).map_err(|e| {
        BootImageError::io(
            format!("writing volume identity '{}'", sidecar.display()),
            e,
        )
    })?;
    info!(
        "created volume identity {} (volume id {}) in {}",
        identity.uuid,
        identity.volume_id,
        sidecar.display()
    );
    Ok(identity)
}
