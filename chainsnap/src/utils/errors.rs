//! Custom error types for chainsnap.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChainError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unrecognized remote path \"{0}\", expected format rsync:<username>@<host>:<path>")]
    RemoteDescriptor(String),

    #[error("Could not load key {}: {reason}", .path.display())]
    Key { path: PathBuf, reason: String },

    #[error("SSH error: {0}")]
    Ssh(#[from] ssh2::Error),

    #[error("Command `{command}` failed: {status}")]
    Transfer { command: String, status: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Could not parse input line {line_no} ({reason}): <{line}>")]
    Report {
        line_no: usize,
        line: String,
        reason: &'static str,
    },

    #[error("Settings error: {0}")]
    Settings(#[from] toml::de::Error),

    #[error("Walk error: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl ChainError {
    pub fn config(msg: impl Into<String>) -> Self {
        ChainError::Config(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, ChainError>;
