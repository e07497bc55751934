//! Snapshot naming and chain resolution.
//!
//! Snapshots are flat sibling directories named `backup.YYYYMMDDhhmmss`.
//! The timestamp is fixed width, so comparing names as strings orders them
//! chronologically. Entries that do not match the pattern exactly are never
//! treated as part of the chain.

use crate::fs::{DirLister, ListedEntry};
use crate::utils::Result;
use chrono::{DateTime, TimeZone};
use std::fmt;
use std::path::{Path, PathBuf};

pub const SNAPSHOT_PREFIX: &str = "backup.";

pub const TIMESTAMP_LEN: usize = 14;

const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// Validated snapshot directory name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SnapshotName {
    timestamp: String,
}

impl SnapshotName {
    /// Accept `backup.` followed by exactly 14 ASCII digits.
    pub fn parse(name: &str) -> Option<Self> {
        let digits = name.strip_prefix(SNAPSHOT_PREFIX)?;
        Self::from_timestamp(digits)
    }

    pub fn from_timestamp(digits: &str) -> Option<Self> {
        if digits.len() == TIMESTAMP_LEN && digits.bytes().all(|b| b.is_ascii_digit()) {
            Some(Self {
                timestamp: digits.to_string(),
            })
        } else {
            None
        }
    }

    pub fn from_datetime<Tz: TimeZone>(at: &DateTime<Tz>) -> Self
    where
        Tz::Offset: fmt::Display,
    {
        Self {
            timestamp: at.format(TIMESTAMP_FORMAT).to_string(),
        }
    }

    /// Name for a snapshot created now, in local time.
    pub fn now() -> Self {
        Self::from_datetime(&chrono::Local::now())
    }

    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }
}

impl fmt::Display for SnapshotName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", SNAPSHOT_PREFIX, self.timestamp)
    }
}

/// A snapshot directory under a destination root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotRef {
    pub name: SnapshotName,
    pub path: PathBuf,
}

impl SnapshotRef {
    pub fn under(root: &Path, name: SnapshotName) -> Self {
        let path = root.join(name.to_string());
        Self { name, path }
    }
}

/// Result of inspecting the destination before a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainState {
    /// Newest existing snapshot; `None` means the next backup is a full copy
    pub latest: Option<SnapshotRef>,

    /// Snapshot the next backup writes into
    pub next: SnapshotRef,
}

/// Pick the newest valid snapshot among directory entries, ignoring everything else.
pub fn latest_snapshot<'a, I>(entries: I) -> Option<SnapshotName>
where
    I: IntoIterator<Item = &'a ListedEntry>,
{
    entries
        .into_iter()
        .filter(|entry| entry.is_dir())
        .filter_map(|entry| SnapshotName::parse(&entry.name))
        .max()
}

/// List `root` and work out the latest and next snapshot.
pub fn resolve_chain<L: DirLister + ?Sized>(
    lister: &L,
    root: &Path,
    next: SnapshotName,
) -> Result<ChainState> {
    let entries = lister.list(root)?;
    let latest = latest_snapshot(&entries).map(|name| SnapshotRef::under(root, name));

    Ok(ChainState {
        latest,
        next: SnapshotRef::under(root, next),
    })
}
