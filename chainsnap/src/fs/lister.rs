//! Directory listing shared by local and remote backends.

use crate::utils::{ChainError, Result};
use std::fs;
use std::path::Path;

/// Kind of a listed entry, as seen without following symlinks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Dir,
    File,
    Symlink,
    Other,
}

/// One immediate child of a listed directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedEntry {
    pub name: String,
    pub kind: EntryKind,
}

impl ListedEntry {
    pub fn new(name: impl Into<String>, kind: EntryKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }

    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Dir
    }
}

/// Something that can list the immediate children of a directory.
pub trait DirLister {
    fn list(&self, dir: &Path) -> Result<Vec<ListedEntry>>;
}

/// Lists directories on the local filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalLister;

impl DirLister for LocalLister {
    fn list(&self, dir: &Path) -> Result<Vec<ListedEntry>> {
        let read_err =
            |e: std::io::Error| ChainError::config(format!("can not read {}: {}", dir.display(), e));

        let mut entries = Vec::new();
        for entry in fs::read_dir(dir).map_err(read_err)? {
            let entry = entry.map_err(read_err)?;
            let file_type = entry.file_type().map_err(read_err)?;
            let kind = if file_type.is_dir() {
                EntryKind::Dir
            } else if file_type.is_file() {
                EntryKind::File
            } else if file_type.is_symlink() {
                EntryKind::Symlink
            } else {
                EntryKind::Other
            };
            entries.push(ListedEntry::new(
                entry.file_name().to_string_lossy().into_owned(),
                kind,
            ));
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_local_lister_kinds() -> std::io::Result<()> {
        let dir = TempDir::new()?;
        fs::create_dir(dir.path().join("sub"))?;
        fs::write(dir.path().join("file"), b"x")?;
        std::os::unix::fs::symlink("file", dir.path().join("link"))?;

        let mut entries = LocalLister.list(dir.path()).unwrap();
        entries.sort_by(|a, b| a.name.cmp(&b.name));

        assert_eq!(
            entries,
            vec![
                ListedEntry::new("file", EntryKind::File),
                ListedEntry::new("link", EntryKind::Symlink),
                ListedEntry::new("sub", EntryKind::Dir),
            ]
        );
        Ok(())
    }

    #[test]
    fn test_local_lister_missing_dir() {
        let err = LocalLister.list(Path::new("/nonexistent/chainsnap-test")).unwrap_err();
        assert!(err.to_string().contains("can not read"));
    }
}
