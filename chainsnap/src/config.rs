//! Configuration management for chainsnap.
//!
//! The configuration is a directory of plain files (symlinks and filter
//! lists) plus an optional `settings.toml` for tunables. Everything is
//! resolved once per invocation into a [`Config`] that is passed down by
//! reference.

use crate::backend::{self, BackupDestination};
use crate::utils::{ChainError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Directory name under the XDG config home.
pub const APP_DIR: &str = "chainsnap";

/// Locations of every configuration file inside the base directory.
#[derive(Debug, Clone)]
pub struct ConfigLayout {
    pub base_dir: PathBuf,

    /// Symlink to the tree being backed up
    pub source: PathBuf,

    /// Symlink to the local backup root, or to an `rsync:` remote descriptor
    pub backup: PathBuf,

    /// Optional file holding a `user@host:path` remote descriptor
    pub remote: PathBuf,

    /// Exclude patterns, one per line
    pub exclude: PathBuf,

    /// Include patterns, one per line
    pub include: PathBuf,

    pub settings: PathBuf,
}

impl ConfigLayout {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        let base_dir = base_dir.into();
        Self {
            source: base_dir.join("source"),
            backup: base_dir.join("backup"),
            remote: base_dir.join("remote"),
            exclude: base_dir.join("exclude"),
            include: base_dir.join("include"),
            settings: base_dir.join("settings.toml"),
            base_dir,
        }
    }

    /// Resolve the base directory from an explicit override or the environment.
    pub fn from_env(override_dir: Option<PathBuf>) -> Result<Self> {
        let base_dir = base_dir_from(
            override_dir,
            std::env::var("XDG_CONFIG_HOME").ok(),
            std::env::var("HOME").ok(),
        )?;
        Ok(Self::new(base_dir))
    }
}

fn base_dir_from(
    override_dir: Option<PathBuf>,
    xdg_config_home: Option<String>,
    home: Option<String>,
) -> Result<PathBuf> {
    if let Some(dir) = override_dir {
        return Ok(dir);
    }

    match (xdg_config_home.filter(|v| !v.is_empty()), home) {
        (Some(xdg), _) => Ok(PathBuf::from(xdg).join(APP_DIR)),
        (None, Some(home)) => Ok(PathBuf::from(home).join(".config").join(APP_DIR)),
        (None, None) => Err(ChainError::config(
            "neither XDG_CONFIG_HOME nor HOME is set, pass --config-dir",
        )),
    }
}

/// Tunables read from `settings.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Mirroring program used for transfers
    pub mirror_program: String,

    /// Remote shell the mirroring program tunnels through
    pub remote_shell: String,

    pub ssh_port: u16,

    /// Private key for the remote session (default: ~/.ssh/id_rsa)
    pub identity_file: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,

    /// Log commands instead of running them
    pub dry_run: bool,

    /// Read buffer size for verification checksums
    pub verify_chunk_size: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            mirror_program: "rsync".to_string(),
            remote_shell: "ssh".to_string(),
            ssh_port: 22,
            identity_file: None,
            log_level: "info".to_string(),
            dry_run: false,
            verify_chunk_size: 4096,
        }
    }
}

impl Settings {
    /// Load settings from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let settings: Settings = toml::from_str(&content)?;
        if settings.verify_chunk_size == 0 {
            return Err(ChainError::config(format!(
                "verify_chunk_size in {} must be positive",
                path.display()
            )));
        }
        Ok(settings)
    }

    /// Load settings if the file exists, defaults otherwise.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn identity_path(&self) -> Result<PathBuf> {
        if let Some(path) = &self.identity_file {
            return Ok(path.clone());
        }
        let home = std::env::var("HOME")
            .map_err(|_| ChainError::config("HOME is not set, cannot locate ~/.ssh/id_rsa"))?;
        Ok(PathBuf::from(home).join(".ssh").join("id_rsa"))
    }

    /// Remote shell command line handed to the mirroring program.
    pub fn remote_shell_command(&self) -> String {
        if self.ssh_port == 22 {
            self.remote_shell.clone()
        } else {
            format!("{} -p {}", self.remote_shell, self.ssh_port)
        }
    }
}

/// Fully resolved configuration for one invocation.
#[derive(Debug, Clone)]
pub struct Config {
    pub layout: ConfigLayout,
    pub settings: Settings,
    pub destination: BackupDestination,
}

impl Config {
    pub fn load(layout: ConfigLayout, settings: Settings) -> Result<Self> {
        let destination = backend::select_destination(&layout.backup, &layout.remote)?;
        Ok(Self {
            layout,
            settings,
            destination,
        })
    }

    /// Check that the filter files are readable and the symlinks point at directories.
    pub fn validate(&self) -> Result<()> {
        readable_file(&self.layout.exclude)?;
        readable_file(&self.layout.include)?;
        valid_dir_link(&self.layout.source)?;
        if !self.destination.is_remote() {
            valid_dir_link(&self.layout.backup)?;
        }
        Ok(())
    }
}

fn readable_file(path: &Path) -> Result<()> {
    fs::File::open(path)
        .map(|_| ())
        .map_err(|e| ChainError::config(format!("can not read {}: {}", path.display(), e)))
}

fn valid_dir_link(path: &Path) -> Result<()> {
    let entry = fs::symlink_metadata(path)
        .map_err(|e| ChainError::config(format!("can not stat {}: {}", path.display(), e)))?;
    if !entry.file_type().is_symlink() {
        return Err(ChainError::config(format!(
            "{} is not a symbolic link",
            path.display()
        )));
    }

    let target = fs::metadata(path).map_err(|e| {
        ChainError::config(format!(
            "can not stat path linked by {}: {}",
            path.display(),
            e
        ))
    })?;
    if !target.is_dir() {
        return Err(ChainError::config(format!(
            "path linked by {} is not a directory",
            path.display()
        )));
    }
    Ok(())
}
