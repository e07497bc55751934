//! Streaming CRC-32 of a file.

use crate::utils::Result;
use flate2::Crc;
use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::Path;
use tracing::warn;

/// CRC-32 (IEEE) of the file at `path`, read through `buf` chunk by chunk.
///
/// A file that cannot be opened yields 0 after logging the error; it then
/// shows up as an ordinary mismatch. Read errors after opening are fatal.
pub fn file_crc32(path: &Path, buf: &mut [u8]) -> Result<u32> {
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(e) => {
            warn!("Error reading {}: {}", path.display(), e);
            return Ok(0);
        }
    };

    let mut crc = Crc::new();
    loop {
        let n = match file.read(buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        crc.update(&buf[..n]);
    }
    Ok(crc.sum())
}
