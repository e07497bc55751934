//! Backup destination selection: local directory or remote host.

use crate::utils::{ChainError, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Scheme marking a destination as remote.
pub const REMOTE_SCHEME: &str = "rsync";

/// Prefix of a remote descriptor, scheme included.
pub const REMOTE_PREFIX: &str = "rsync:";

/// A remote backup root reached over ssh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTarget {
    pub user: String,
    pub host: String,
    pub path: PathBuf,
}

impl RemoteTarget {
    /// `user@host:path` form understood by the mirroring tool.
    pub fn rsync_location(&self, path: &Path) -> String {
        format!("{}@{}:{}", self.user, self.host, path.display())
    }
}

/// Where snapshots live. Resolved once and never changed afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackupDestination {
    Local(PathBuf),
    Remote(RemoteTarget),
}

impl BackupDestination {
    pub fn is_remote(&self) -> bool {
        matches!(self, BackupDestination::Remote(_))
    }

    /// Directory holding the snapshot chain.
    pub fn root(&self) -> &Path {
        match self {
            BackupDestination::Local(path) => path,
            BackupDestination::Remote(target) => &target.path,
        }
    }
}

/// Parse `rsync:<user>@<host>:<path>`.
pub fn parse_remote_descriptor(descriptor: &str) -> Result<RemoteTarget> {
    let bad = || ChainError::RemoteDescriptor(descriptor.to_string());

    let (scheme, rest) = descriptor.split_once(':').ok_or_else(bad)?;
    if scheme != REMOTE_SCHEME {
        return Err(bad());
    }
    let (user, rest) = rest.split_once('@').ok_or_else(bad)?;
    let (host, path) = rest.split_once(':').ok_or_else(bad)?;
    if user.is_empty() || host.is_empty() || path.is_empty() {
        return Err(bad());
    }

    Ok(RemoteTarget {
        user: user.to_string(),
        host: host.to_string(),
        path: PathBuf::from(path),
    })
}

/// Decide between local and remote mode.
///
/// A non-empty `remote_file` wins. Otherwise the `backup_link` target is
/// inspected and a `rsync:` target selects remote mode. Anything else is
/// treated as a local destination at `backup_link` itself.
pub fn select_destination(backup_link: &Path, remote_file: &Path) -> Result<BackupDestination> {
    if let Ok(contents) = fs::read_to_string(remote_file) {
        let descriptor = contents.trim();
        if !descriptor.is_empty() {
            let descriptor = format!("{}{}", REMOTE_PREFIX, descriptor);
            info!("Remote backup enabled: {}", descriptor);
            return parse_remote_descriptor(&descriptor).map(BackupDestination::Remote);
        }
        warn!("Ignoring empty remote override file {}", remote_file.display());
    }

    if let Ok(dest) = fs::read_link(backup_link) {
        let dest = dest.to_string_lossy();
        info!("Backup link destination: {}", dest);
        if dest.starts_with(REMOTE_PREFIX) {
            info!("Remote backup enabled: {}", dest);
            return parse_remote_descriptor(&dest).map(BackupDestination::Remote);
        }
    }

    Ok(BackupDestination::Local(backup_link.to_path_buf()))
}
