//! Ephemeral disk partition sizing.

use super::primitives::{Partition, PartitionType};

/// Bytes in one megabyte (MiB) as used for partition sizes.
pub const BYTES_PER_MB: u64 = 1024 * 1024;

/// Splits an ephemeral disk into swap and data partitions.
///
/// Swap matches physical memory when the disk holds more than twice the
/// memory; otherwise the disk is halved. The data partition takes the rest.
#[must_use]
#[expect(
    clippy::integer_division,
    reason = "partition sizes are whole megabytes and truncation is intended"
)]
pub fn ephemeral_partitions(total_memory_bytes: u64, disk_size_in_mb: u64) -> [Partition; 2] {
    let total_mem_in_mb = total_memory_bytes / BYTES_PER_MB;
    let swap_in_mb = if disk_size_in_mb > total_mem_in_mb.saturating_mul(2) {
        total_mem_in_mb
    } else {
        disk_size_in_mb / 2
    };

    [
        Partition::new(swap_in_mb, PartitionType::Swap),
        Partition::new(disk_size_in_mb - swap_in_mb, PartitionType::Linux),
    ]
}
