//! Human readable sizes with binary units.

const KB: f64 = 1024.0;
const MB: f64 = KB * 1024.0;
const GB: f64 = MB * 1024.0;

/// `500B`, `2.00kB`, `5.00MB`, `3.00GB`. Anything from 1 GiB up stays in GB.
pub fn human_size(bytes: u64) -> String {
    let value = bytes as f64;
    if value >= GB {
        format!("{:.2}GB", value / GB)
    } else if value >= MB {
        format!("{:.2}MB", value / MB)
    } else if value >= KB {
        format!("{:.2}kB", value / KB)
    } else {
        format!("{}B", bytes)
    }
}
