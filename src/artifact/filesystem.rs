//! Filesystem utilities for image population.
//!
//! The boot partition is FAT, so trees are merged into it by copying file
//! contents. A symlinked file is copied as its target's content; a symlinked
//! directory is created as an empty directory and its contents are not walked.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::trace;
use walkdir::WalkDir;

/// Suffix of editor backup files that are never copied.
pub const BACKUP_SUFFIX: char = '~';

/// A path under a mirrored tree could not be read or written.
#[derive(Debug, Error)]
#[error("mirroring '{}'", path.display())]
pub struct MirrorError {
    pub path: PathBuf,
    #[source]
    pub source: io::Error,
}

/// Merge the tree under `src` into `dst`.
///
/// Missing directories are created and files are copied over whatever is
/// already at the same relative path. Nothing in `dst` is ever deleted, and
/// files whose name ends in `~` are skipped. Symlinks are not followed during
/// the walk, so a linked directory becomes an empty directory. Returns the number of files
/// copied.
///
/// # Example
///
/// ```rust,ignore
/// use nr_boot_image::artifact::filesystem::mirror_dir;
/// use std::path::Path;
///
/// mirror_dir(Path::new("/lib/grub/i386-pc"), Path::new("/mnt/grub/i386-pc"))?;
/// ```
pub fn mirror_dir(src: &Path, dst: &Path) -> Result<usize, MirrorError> {
    let mut copied = 0;

    for entry in WalkDir::new(src).min_depth(1).follow_links(false) {
        let entry = entry.map_err(|e| MirrorError {
            path: e.path().unwrap_or(src).to_path_buf(),
            source: e.into(),
        })?;
        let src_path = entry.path();
        let Ok(relative) = src_path.strip_prefix(src) else {
            continue;
        };
        let dst_path = dst.join(relative);

        let is_dir = if entry.file_type().is_symlink() {
            // Dereference; the link target decides what we create.
            fs::metadata(src_path)
                .map_err(|source| MirrorError {
                    path: src_path.to_path_buf(),
                    source,
                })?
                .is_dir()
        } else {
            entry.file_type().is_dir()
        };

        if is_dir {
            if !dst_path.exists() {
                fs::create_dir_all(&dst_path).map_err(|source| MirrorError {
                    path: dst_path.clone(),
                    source,
                })?;
            }
            continue;
        }

        if entry.file_name().to_string_lossy().ends_with(BACKUP_SUFFIX) {
            trace!("skipping backup file {}", src_path.display());
            continue;
        }

        fs::copy(src_path, &dst_path).map_err(|source| MirrorError {
            path: src_path.to_path_buf(),
            source,
        })?;
        copied += 1;
    }

    Ok(copied)
}

/// Copy one file into `dst_dir` under `name`.
pub fn copy_into(src: &Path, dst_dir: &Path, name: &str) -> Result<PathBuf, MirrorError> {
    let dst = dst_dir.join(name);
    fs::copy(src, &dst).map_err(|source| MirrorError {
        path: src.to_path_buf(),
        source,
    })?;
    Ok(dst)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn snapshot(root: &Path) -> Vec<(PathBuf, Option<Vec<u8>>)> {
        let mut entries: Vec<_> = WalkDir::new(root)
            .min_depth(1)
            .into_iter()
            .map(|e| {
                let e = e.unwrap();
                let rel = e.path().strip_prefix(root).unwrap().to_path_buf();
                let content = if e.file_type().is_file() {
                    Some(fs::read(e.path()).unwrap())
                } else {
                    None
                };
                (rel, content)
            })
            .collect();
        entries.sort();
        entries
    }

    #[test]
    fn test_mirror_copies_tree() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src");
        let dst = temp.path().join("dst");
        fs::create_dir_all(src.join("grub/fonts")).unwrap();
        fs::create_dir_all(src.join("empty")).unwrap();
        fs::create_dir_all(&dst).unwrap();
        fs::write(src.join("grub/grub.cfg"), "menuentry").unwrap();
        fs::write(src.join("grub/fonts/unicode.pf2"), "font").unwrap();

        let copied = mirror_dir(&src, &dst).unwrap();

        assert_eq!(copied, 2);
        assert_eq!(fs::read_to_string(dst.join("grub/grub.cfg")).unwrap(), "menuentry");
        assert!(dst.join("grub/fonts/unicode.pf2").is_file());
        assert!(dst.join("empty").is_dir());
    }

    #[test]
    fn test_mirror_skips_backup_files() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src");
        let dst = temp.path().join("dst");
        fs::create_dir_all(src.join("sub")).unwrap();
        fs::create_dir_all(&dst).unwrap();
        fs::write(src.join("grub.cfg~"), "old").unwrap();
        fs::write(src.join("sub/notes~"), "old").unwrap();
        fs::write(src.join("sub/keep"), "new").unwrap();

        mirror_dir(&src, &dst).unwrap();

        assert!(!dst.join("grub.cfg~").exists());
        assert!(!dst.join("sub/notes~").exists());
        assert!(dst.join("sub/keep").exists());
    }

    #[test]
    fn test_mirror_keeps_existing_destination_entries() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src");
        let dst = temp.path().join("dst");
        fs::create_dir_all(&src).unwrap();
        fs::create_dir_all(&dst).unwrap();
        fs::write(src.join("a"), "from source").unwrap();
        fs::write(dst.join("a"), "stale").unwrap();
        fs::write(dst.join("vmlinuz"), "kernel").unwrap();

        mirror_dir(&src, &dst).unwrap();

        assert_eq!(fs::read_to_string(dst.join("a")).unwrap(), "from source");
        assert_eq!(fs::read_to_string(dst.join("vmlinuz")).unwrap(), "kernel");
    }

    #[test]
    fn test_mirror_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src");
        let dst = temp.path().join("dst");
        fs::create_dir_all(src.join("x/y")).unwrap();
        fs::create_dir_all(&dst).unwrap();
        fs::write(src.join("x/y/z"), "data").unwrap();
        fs::write(src.join("x/skip~"), "data").unwrap();

        mirror_dir(&src, &dst).unwrap();
        let first = snapshot(&dst);
        mirror_dir(&src, &dst).unwrap();
        assert_eq!(snapshot(&dst), first);
    }

    #[test]
    fn test_mirror_copies_linked_files_and_stubs_linked_dirs() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("src");
        let dst = temp.path().join("dst");
        fs::create_dir_all(src.join("real")).unwrap();
        fs::create_dir_all(&dst).unwrap();
        fs::write(src.join("target.txt"), "payload").unwrap();
        fs::write(src.join("real/inner.txt"), "inner").unwrap();
        std::os::unix::fs::symlink("target.txt", src.join("link.txt")).unwrap();
        std::os::unix::fs::symlink("real", src.join("linkdir")).unwrap();

        mirror_dir(&src, &dst).unwrap();

        assert!(!dst.join("link.txt").is_symlink());
        assert_eq!(fs::read_to_string(dst.join("link.txt")).unwrap(), "payload");
        assert!(dst.join("linkdir").is_dir());
        assert!(!dst.join("linkdir").is_symlink());
        // Linked directories are not walked.
        assert!(!dst.join("linkdir/inner.txt").exists());
        assert_eq!(fs::read_dir(dst.join("linkdir")).unwrap().count(), 0);
        assert!(dst.join("real/inner.txt").is_file());
    }

    #[test]
    fn test_mirror_missing_source_errors() {
        let temp = TempDir::new().unwrap();
        let err = mirror_dir(&temp.path().join("absent"), temp.path()).unwrap_err();
        assert_eq!(err.path, temp.path().join("absent"));
    }

    #[test]
    fn test_copy_into_renames() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("bzImage");
        fs::write(&src, "kernel").unwrap();

        let dst = copy_into(&src, temp.path(), "vmlinuz").unwrap();

        assert_eq!(dst, temp.path().join("vmlinuz"));
        assert_eq!(fs::read_to_string(dst).unwrap(), "kernel");
    }
}
