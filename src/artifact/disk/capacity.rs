//! Image size estimation.
//!
//! The payload is measured with a single `du -sbcD` call so content shared
//! between inputs through hard links is only counted once. The total gets a
//! 10% margin and is rounded to whole cylinders.

use std::path::PathBuf;

use tracing::debug;

use crate::error::{BootImageError, Result};
use crate::process::{Cmd, CommandRunner};

/// Allocation unit for image sizing (255 heads * 63 sectors * 512 bytes).
pub const CYLINDER_SIZE: u64 = 8_225_280;

/// Smallest image ever produced, in cylinders.
pub const MIN_CYLINDERS: u64 = 2;

/// Size of the raw image to allocate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageSpec {
    pub cylinders: u64,
}

impl ImageSpec {
    /// Size an image for `payload_bytes` of content.
    pub fn for_payload(payload_bytes: u64) -> Self {
        let bytes_needed = with_margin(payload_bytes);
        debug!("bytes needed: {}", bytes_needed);
        let cylinders = cylinders_for(bytes_needed);
        debug!("cylinders needed: {}", cylinders);
        Self { cylinders }
    }

    pub fn size_bytes(&self) -> u64 {
        self.cylinders * CYLINDER_SIZE
    }
}

/// Apply the 1.10 safety margin, flooring to whole bytes.
pub fn with_margin(bytes: u64) -> u64 {
    (bytes as f64 * 1.1) as u64
}

/// Cylinders needed to hold `bytes`: one partial plus one spare, never below two.
pub fn cylinders_for(bytes: u64) -> u64 {
    (bytes / CYLINDER_SIZE + 2).max(MIN_CYLINDERS)
}

/// Combined apparent size of every payload path, dereferencing symlinks.
pub fn payload_bytes(runner: &dyn CommandRunner, paths: &[PathBuf]) -> Result<u64> {
    let mut cmd = Cmd::new("du")
        .arg("-sbcD")
        .error_msg("du failed measuring boot payload");
    for path in paths {
        cmd = cmd.arg_path(path);
    }

    let output = cmd.run_with(runner).map_err(|e| BootImageError::Sizing {
        message: "du failed".to_string(),
        source: Some(e),
    })?;

    parse_du_total(&output.stdout).ok_or_else(|| BootImageError::Sizing {
        message: format!("no total line in du output: {:?}", output.stdout.trim()),
        source: None,
    })
}

/// Find the `<bytes>\ttotal` line `du -c` prints last.
fn parse_du_total(stdout: &str) -> Option<u64> {
    stdout.lines().find_map(|line| {
        let mut fields = line.split_whitespace();
        let size = fields.next()?;
        match (fields.next(), fields.next()) {
            (Some("total"), None) => size.parse().ok(),
            _ => None,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::testing::RecordingRunner;

    #[test]
    fn test_cylinders_for_hundred_megabytes() {
        let payload = 100 * 1024 * 1024;
        assert_eq!(with_margin(payload), 115_343_360);
        let spec = ImageSpec::for_payload(payload);
        assert_eq!(spec.cylinders, 16);
        assert_eq!(spec.size_bytes(), 131_604_480);
    }

    #[test]
    fn test_empty_payload_gets_minimum_image() {
        let spec = ImageSpec::for_payload(0);
        assert_eq!(spec.cylinders, MIN_CYLINDERS);
        assert_eq!(spec.size_bytes(), 2 * CYLINDER_SIZE);
    }

    #[test]
    fn test_cylinder_formula_over_range() {
        for bytes in [
            0,
            1,
            CYLINDER_SIZE - 1,
            CYLINDER_SIZE,
            CYLINDER_SIZE + 1,
            10 * CYLINDER_SIZE,
            4_000_000_000,
        ] {
            let expected = ((bytes as f64 * 1.1) as u64 / CYLINDER_SIZE + 2).max(2);
            let spec = ImageSpec::for_payload(bytes);
            assert_eq!(spec.cylinders, expected, "payload {}", bytes);
            assert!(spec.cylinders >= MIN_CYLINDERS);
        }
    }

    #[test]
    fn test_parse_du_total() {
        let out = "4096\t/lib/grub\n1234\t/work/init.cpi\n5330\ttotal\n";
        assert_eq!(parse_du_total(out), Some(5330));
        assert_eq!(parse_du_total("5330\t/some/total/dir\n"), None);
        assert_eq!(parse_du_total("abc\ttotal\n"), None);
        assert_eq!(parse_du_total(""), None);
    }

    #[test]
    fn test_payload_bytes_uses_one_combined_query() {
        let runner = RecordingRunner::new().respond("du", "10\t/a\n20\t/b\n30\ttotal\n");
        let paths = vec![PathBuf::from("/a"), PathBuf::from("/b")];

        assert_eq!(payload_bytes(&runner, &paths).unwrap(), 30);

        let calls = runner.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].get_args(), ["-sbcD", "/a", "/b"]);
    }

    #[test]
    fn test_payload_bytes_errors() {
        let runner = RecordingRunner::new().fail("du");
        let err = payload_bytes(&runner, &[PathBuf::from("/a")]).unwrap_err();
        assert!(matches!(err, BootImageError::Sizing { source: Some(_), .. }));

        let runner = RecordingRunner::new().respond("du", "garbage\n");
        let err = payload_bytes(&runner, &[PathBuf::from("/a")]).unwrap_err();
        assert!(matches!(err, BootImageError::Sizing { source: None, .. }));
    }
}
