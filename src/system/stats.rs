//! Memory statistics used by the ephemeral disk sizing heuristic.

use camino::Utf8Path;
use thiserror::Error;

use super::fs::{FileStore, FileStoreError};

/// Location of the kernel memory report.
pub const MEMINFO_PATH: &str = "/proc/meminfo";

const BYTES_PER_KB: u64 = 1024;

/// Errors raised while collecting host statistics.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum StatsError {
    /// Raised when the statistics source cannot be read.
    #[error("failed to read memory statistics: {0}")]
    Read(#[from] FileStoreError),
    /// Raised when the statistics source does not have the expected shape.
    #[error("malformed memory statistics: {0}")]
    Malformed(String),
}

/// Reports host resource statistics.
pub trait StatsCollector {
    /// Returns the total physical memory in bytes.
    ///
    /// # Errors
    ///
    /// Returns [`StatsError`] when the value cannot be read or parsed.
    fn total_memory_bytes(&self) -> Result<u64, StatsError>;
}

/// Reads `MemTotal` from `/proc/meminfo` on every call.
#[derive(Clone, Debug)]
pub struct MeminfoStatsCollector<F> {
    files: F,
}

impl<F: FileStore> MeminfoStatsCollector<F> {
    /// Creates a collector that reads through `files`.
    #[must_use]
    pub const fn new(files: F) -> Self {
        Self { files }
    }
}

impl<F: FileStore> StatsCollector for MeminfoStatsCollector<F> {
    fn total_memory_bytes(&self) -> Result<u64, StatsError> {
        let contents = self.files.read_to_string(Utf8Path::new(MEMINFO_PATH))?;
        parse_mem_total(&contents)
    }
}

fn parse_mem_total(contents: &str) -> Result<u64, StatsError> {
    let line = contents
        .lines()
        .find_map(|line| line.strip_prefix("MemTotal:"))
        .ok_or_else(|| StatsError::Malformed(String::from("MemTotal entry is missing")))?;

    let mut fields = line.split_whitespace();
    let value = fields
        .next()
        .ok_or_else(|| StatsError::Malformed(String::from("MemTotal has no value")))?;
    let kilobytes: u64 = value
        .parse()
        .map_err(|_| StatsError::Malformed(format!("MemTotal value {value} is not a number")))?;

    match fields.next() {
        Some("kB") => kilobytes
            .checked_mul(BYTES_PER_KB)
            .ok_or_else(|| StatsError::Malformed(String::from("MemTotal overflows u64"))),
        Some(unit) => Err(StatsError::Malformed(format!(
            "MemTotal uses unexpected unit {unit}"
        ))),
        None => Err(StatsError::Malformed(String::from("MemTotal has no unit"))),
    }
}
