//! # Utility Functions
//!
//! Formatting helpers for log lines, input validation, and the local file
//! layout used by the stress-test client (generated test files and
//! downloaded copies).
//!
//! ## Usage Examples
//!
//! ```rust
//! use file_stress::utils::*;
//! use std::time::Duration;
//!
//! assert_eq!(format_duration(Duration::from_micros(1500)), "1.50ms");
//! assert_eq!(format_bytes(1536), "1.50 KB");
//! assert_eq!(format_rate(1048576.0), "1.00 MB/s");
//! ```

use anyhow::{Context, Result};
use rand::RngCore;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Size of one chunk when writing generated test files.
const GENERATE_CHUNK_SIZE: usize = 1024 * 1024;

/// Format a transfer duration for log lines.
///
/// Transfers take milliseconds to minutes, so anything under a second is
/// shown in milliseconds and anything longer in seconds, with a minute
/// prefix once it exceeds one.
///
/// ```rust
/// # use file_stress::utils::format_duration;
/// # use std::time::Duration;
/// assert_eq!(format_duration(Duration::from_micros(250)), "0.25ms");
/// assert_eq!(format_duration(Duration::from_millis(2500)), "2.500s");
/// assert_eq!(format_duration(Duration::from_millis(90_500)), "1m 30.5s");
/// ```
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs_f64();
    if secs < 1.0 {
        format!("{:.2}ms", secs * 1_000.0)
    } else if secs < 60.0 {
        format!("{:.3}s", secs)
    } else {
        let minutes = duration.as_secs() / 60;
        format!("{}m {:.1}s", minutes, secs - (minutes * 60) as f64)
    }
}

const BYTE_UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];

/// Format a byte count with binary (1024-based) units
///
/// ```rust
/// # use file_stress::utils::format_bytes;
/// assert_eq!(format_bytes(512), "512 B");
/// assert_eq!(format_bytes(10 * 1024 * 1024), "10.00 MB");
/// ```
pub fn format_bytes(bytes: u64) -> String {
    scaled(bytes as f64)
}

/// Format a throughput (bytes per second) with a "/s" suffix
pub fn format_rate(bytes_per_second: f64) -> String {
    format!("{}/s", scaled(bytes_per_second))
}

fn scaled(mut value: f64) -> String {
    let mut unit = 0;
    while value >= 1024.0 && unit + 1 < BYTE_UNITS.len() {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{:.0} {}", value, BYTE_UNITS[0])
    } else {
        format!("{:.2} {}", value, BYTE_UNITS[unit])
    }
}

/// Validate a port the client will connect to.
pub fn validate_port(port: u16) -> Result<()> {
    if port == 0 {
        anyhow::bail!("Port 0 cannot be connected to");
    }
    Ok(())
}

/// Name of the generated test file for a size, e.g. `test_file_10MB.bin`.
pub fn test_file_name(size_mb: u64) -> String {
    format!("test_file_{}MB.bin", size_mb)
}

/// Make sure `dir` holds a test file of exactly `size_mb` MiB of random bytes.
///
/// An existing file of the right size is reused as-is; anything else is
/// regenerated. The file is written in 1 MiB chunks so memory use stays flat
/// regardless of size.
pub fn ensure_test_file(dir: &Path, size_mb: u64) -> Result<PathBuf> {
    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create test file directory {:?}", dir))?;

    let filename = test_file_name(size_mb);
    let path = dir.join(&filename);
    let expected = size_mb * GENERATE_CHUNK_SIZE as u64;

    if let Ok(meta) = fs::metadata(&path) {
        if meta.is_file() && meta.len() == expected {
            info!("Test file {} already exists with correct size", filename);
            return Ok(path);
        }
    }

    info!("Generating test file: {} ({} MB)", filename, size_mb);
    let mut file =
        File::create(&path).with_context(|| format!("Failed to create test file {:?}", path))?;
    let mut rng = rand::thread_rng();
    let mut chunk = vec![0u8; GENERATE_CHUNK_SIZE];
    for _ in 0..size_mb {
        rng.fill_bytes(&mut chunk);
        file.write_all(&chunk)
            .with_context(|| format!("Failed to write test file {:?}", path))?;
    }
    file.flush()?;

    info!("Test file generated: {:?}", path);
    Ok(path)
}

/// Where worker `worker_id` stores its copy of a downloaded `filename`.
pub fn download_path(dir: &Path, worker_id: usize, filename: &str) -> PathBuf {
    dir.join(format!("worker{}_{}", worker_id, filename))
}
