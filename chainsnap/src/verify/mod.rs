//! Snapshot verification against the live source tree.
//!
//! The walk is driven by the snapshot side. Every regular file found there
//! is compared by CRC-32 with its counterpart under the source root.
//! Mismatches are collected, never repaired, and never stop the walk.

pub mod checksum;

use crate::utils::{ChainError, Result};
use checksum::file_crc32;
use std::path::{Component, Path, PathBuf};
use tracing::{info, warn};
use walkdir::WalkDir;

/// Outcome of one verification run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct VerifyReport {
    /// Regular files compared
    pub compared: usize,

    /// Source paths whose checksum differed from the snapshot copy
    pub mismatches: Vec<PathBuf>,

    /// Snapshot entries that are neither directories nor regular files
    pub skipped: Vec<PathBuf>,
}

impl VerifyReport {
    pub fn ok(&self) -> bool {
        self.mismatches.is_empty()
    }
}

pub struct Verifier {
    chunk_size: usize,
}

impl Verifier {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
        }
    }

    /// Compare `snapshot_root` (or its `subdir`) with the same place under `source_root`.
    pub fn verify(
        &self,
        source_root: &Path,
        snapshot_root: &Path,
        subdir: Option<&Path>,
    ) -> Result<VerifyReport> {
        let (source, snapshot) = match subdir {
            Some(sub) => {
                check_subdir(sub)?;
                (source_root.join(sub), snapshot_root.join(sub))
            }
            None => (source_root.to_path_buf(), snapshot_root.to_path_buf()),
        };

        let mut buf = vec![0u8; self.chunk_size];
        let mut report = VerifyReport::default();

        let walker = WalkDir::new(&snapshot)
            .min_depth(1)
            .follow_links(false)
            .sort_by_file_name();

        for entry in walker {
            let entry = entry?;
            let relative = entry.path().strip_prefix(&snapshot).unwrap_or(entry.path());
            let source_path = source.join(relative);
            let file_type = entry.file_type();

            if file_type.is_dir() {
                if entry.depth() == 1 {
                    info!("Checking directory {}", entry.path().display());
                }
            } else if file_type.is_file() {
                report.compared += 1;
                if !source_is_regular(&source_path) {
                    warn!(
                        path = %source_path.display(),
                        "FAILED for {} (not a regular file)",
                        source_path.display()
                    );
                    report.mismatches.push(source_path);
                    continue;
                }
                let expected = file_crc32(&source_path, &mut buf)?;
                let actual = file_crc32(entry.path(), &mut buf)?;
                if expected != actual {
                    warn!(path = %source_path.display(), "FAILED for {}", source_path.display());
                    report.mismatches.push(source_path);
                }
            } else {
                info!("Skipping {}", entry.path().display());
                report.skipped.push(entry.path().to_path_buf());
            }
        }

        Ok(report)
    }
}

/// False only when the source entry exists and is not a regular file.
/// A missing source is left to the checksum, which reads it as 0.
fn source_is_regular(path: &Path) -> bool {
    std::fs::metadata(path).map(|meta| meta.is_file()).unwrap_or(true)
}

fn check_subdir(sub: &Path) -> Result<()> {
    let escapes = sub
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if escapes {
        return Err(ChainError::config(format!(
            "subdirectory {} must be relative to the backup root",
            sub.display()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    /// Source tree plus an identical snapshot copy.
    fn mirrored() -> std::io::Result<TempDir> {
        let root = TempDir::new()?;
        for side in ["src", "snap"] {
            let base = root.path().join(side);
            fs::create_dir_all(base.join("docs/deep"))?;
            fs::write(base.join("a.txt"), b"alpha")?;
            fs::write(base.join("docs/b.txt"), b"bravo")?;
            fs::write(base.join("docs/deep/c.bin"), vec![7u8; 10_000])?;
            fs::write(base.join("empty"), b"")?;
        }
        Ok(root)
    }

    #[test]
    fn test_identical_trees_pass() -> anyhow::Result<()> {
        let root = mirrored()?;
        let report = Verifier::new(4096).verify(
            &root.path().join("src"),
            &root.path().join("snap"),
            None,
        )?;
        assert!(report.ok());
        assert_eq!(report.compared, 4);
        assert!(report.skipped.is_empty());
        Ok(())
    }

    #[test]
    fn test_single_flipped_byte() -> anyhow::Result<()> {
        let root = mirrored()?;
        let target = root.path().join("snap/docs/deep/c.bin");
        let mut data = fs::read(&target)?;
        data[5000] ^= 0xff;
        fs::write(&target, data)?;

        let report = Verifier::new(512).verify(
            &root.path().join("src"),
            &root.path().join("snap"),
            None,
        )?;
        assert!(!report.ok());
        assert_eq!(report.compared, 4);
        assert_eq!(
            report.mismatches,
            vec![root.path().join("src/docs/deep/c.bin")]
        );
        Ok(())
    }

    #[test]
    fn test_missing_source_counts_as_mismatch() -> anyhow::Result<()> {
        let root = mirrored()?;
        fs::remove_file(root.path().join("src/a.txt"))?;

        let report = Verifier::new(4096).verify(
            &root.path().join("src"),
            &root.path().join("snap"),
            None,
        )?;
        assert_eq!(report.mismatches, vec![root.path().join("src/a.txt")]);
        Ok(())
    }

    #[test]
    fn test_directory_in_source_counts_as_mismatch() -> anyhow::Result<()> {
        let root = mirrored()?;
        // `empty` checks that a zero CRC is not taken for a match.
        for name in ["a.txt", "empty"] {
            let path = root.path().join("src").join(name);
            fs::remove_file(&path)?;
            fs::create_dir(&path)?;
        }

        let report = Verifier::new(4096).verify(
            &root.path().join("src"),
            &root.path().join("snap"),
            None,
        )?;
        assert_eq!(report.compared, 4);
        assert_eq!(
            report.mismatches,
            vec![root.path().join("src/a.txt"), root.path().join("src/empty")]
        );
        Ok(())
    }

    #[test]
    fn test_extra_source_files_are_ignored() -> anyhow::Result<()> {
        let root = mirrored()?;
        fs::write(root.path().join("src/new.txt"), b"not backed up yet")?;

        let report = Verifier::new(4096).verify(
            &root.path().join("src"),
            &root.path().join("snap"),
            None,
        )?;
        assert!(report.ok());
        Ok(())
    }

    #[test]
    fn test_symlinks_are_skipped() -> anyhow::Result<()> {
        let root = mirrored()?;
        std::os::unix::fs::symlink("a.txt", root.path().join("snap/link"))?;

        let report = Verifier::new(4096).verify(
            &root.path().join("src"),
            &root.path().join("snap"),
            None,
        )?;
        assert!(report.ok());
        assert_eq!(report.skipped, vec![root.path().join("snap/link")]);
        Ok(())
    }

    #[test]
    fn test_subdir_restriction() -> anyhow::Result<()> {
        let root = mirrored()?;
        fs::write(root.path().join("snap/a.txt"), b"tampered")?;

        let report = Verifier::new(4096).verify(
            &root.path().join("src"),
            &root.path().join("snap"),
            Some(Path::new("docs")),
        )?;
        assert!(report.ok());
        assert_eq!(report.compared, 2);
        Ok(())
    }

    #[test]
    fn test_subdir_must_stay_inside() {
        let verifier = Verifier::new(4096);
        for bad in ["../etc", "/etc"] {
            let result = verifier.verify(Path::new("/s"), Path::new("/b"), Some(Path::new(bad)));
            assert!(matches!(result, Err(ChainError::Config(_))), "{}", bad);
        }
    }
}
