//! chainsnap library
//!
//! Incremental hardlink snapshots of a source tree, to a local directory or
//! a remote host over ssh, plus verification and storage growth reports.

pub mod backend;
pub mod config;
pub mod executor;
pub mod fs;
pub mod remote;
pub mod sizes;
pub mod snapshot;
pub mod transfer;
pub mod utils;
pub mod verify;

// Re-export commonly used types
pub use config::Config;
pub use utils::errors::ChainError;
pub type Result<T> = std::result::Result<T, ChainError>;
