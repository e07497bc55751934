//! Size report input: `<inode> <size-bytes> <path>` per line.

use crate::snapshot::SnapshotName;
use crate::utils::{ChainError, Result};
use flate2::read::MultiGzDecoder;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// One parsed report line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SizeRecord {
    /// Opaque file identity; only compared for equality
    pub inode: String,
    pub size: u64,
    pub raw_path: String,
}

impl SizeRecord {
    /// Parse a report line. Blank lines yield `None`.
    ///
    /// The path is everything after the size field, so it may contain spaces.
    pub fn parse(line: &str, line_no: usize) -> Result<Option<Self>> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }
        let bad = |reason: &'static str| ChainError::Report {
            line_no,
            line: line.to_string(),
            reason,
        };

        let (inode, rest) = trimmed
            .split_once(char::is_whitespace)
            .ok_or_else(|| bad("expected 3 fields"))?;
        let (size, path) = rest
            .trim_start()
            .split_once(char::is_whitespace)
            .ok_or_else(|| bad("expected 3 fields"))?;
        let path = path.trim_start();
        if path.is_empty() {
            return Err(bad("expected 3 fields"));
        }
        let size = size.parse::<u64>().map_err(|_| bad("malformed size"))?;

        Ok(Some(Self {
            inode: inode.to_string(),
            size,
            raw_path: path.to_string(),
        }))
    }

    /// Snapshot the path was observed through, and the path inside it.
    pub fn locate(&self) -> Option<(SnapshotName, String)> {
        let segments: Vec<&str> = self.raw_path.split('/').collect();
        segments.iter().enumerate().find_map(|(i, segment)| {
            SnapshotName::parse(segment).map(|name| (name, segments[i + 1..].join("/")))
        })
    }
}

/// Open a report, decompressing `.gz` and `.zst` files on the fly.
pub fn open_report(path: &Path) -> Result<Box<dyn BufRead>> {
    let file = File::open(path).map_err(|e| {
        ChainError::config(format!("could not open {}: {}", path.display(), e))
    })?;

    let compression_err = |e: std::io::Error| {
        ChainError::config(format!(
            "could not open {} (compression): {}",
            path.display(),
            e
        ))
    };

    let reader: Box<dyn BufRead> = match path.extension().and_then(|ext| ext.to_str()) {
        Some("gz") => Box::new(BufReader::new(MultiGzDecoder::new(file))),
        Some("zst") => Box::new(BufReader::new(
            zstd::stream::read::Decoder::new(file).map_err(compression_err)?,
        )),
        _ => Box::new(BufReader::new(file)),
    };
    Ok(reader)
}
