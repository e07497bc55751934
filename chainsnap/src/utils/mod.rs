//! Utility modules for chainsnap.

pub mod errors;
pub mod logger;

pub use errors::{ChainError, Result};
