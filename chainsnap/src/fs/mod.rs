//! Filesystem helpers.

pub mod lister;

pub use lister::{DirLister, EntryKind, ListedEntry, LocalLister};
