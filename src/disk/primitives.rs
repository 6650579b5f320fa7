//! Single-device disk capabilities consumed by the provisioner.
//!
//! The provisioner never shells out to partitioning, formatting or mounting
//! tools itself; it drives these traits. [`crate::disk::LinuxDiskManager`]
//! is the host implementation and the test doubles record calls instead.

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;

use crate::system::{CommandError, FileStoreError};

/// Role of a partition within a scheme.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PartitionType {
    /// Swap space.
    Swap,
    /// Linux data filesystem.
    Linux,
}

/// One entry of a partition scheme.
///
/// A `size_in_mb` of zero means "the remainder of the device".
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Partition {
    /// Partition size in megabytes (MiB).
    pub size_in_mb: u64,
    /// Partition role.
    pub partition_type: PartitionType,
}

impl Partition {
    /// Creates a partition entry.
    #[must_use]
    pub const fn new(size_in_mb: u64, partition_type: PartitionType) -> Self {
        Self {
            size_in_mb,
            partition_type,
        }
    }
}

/// Filesystem written onto a partition.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FileSystemType {
    /// Swap signature.
    Swap,
    /// ext4 data filesystem.
    Ext4,
}

/// Errors reported by disk primitives.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum PrimitiveError {
    /// Raised when the underlying command fails.
    #[error(transparent)]
    Command(#[from] CommandError),
    /// Raised when host state files cannot be read.
    #[error(transparent)]
    FileStore(#[from] FileStoreError),
    /// Raised when a tool prints output that cannot be interpreted.
    #[error("unexpected output from {program}: {message}")]
    MalformedOutput {
        /// Tool that produced the output.
        program: String,
        /// Description of what was wrong.
        message: String,
    },
    /// Raised when an operation needs a mounted path that is not mounted.
    #[error("nothing is mounted at {mount_point}")]
    NotMounted {
        /// Mount point that was expected to be in use.
        mount_point: Utf8PathBuf,
    },
}

/// Applies partition schemes and reports device sizes.
pub trait Partitioner {
    /// Replaces the partition table of `device` with `partitions`, in order.
    ///
    /// # Errors
    ///
    /// Returns [`PrimitiveError`] when partitioning fails.
    fn partition(&self, device: &Utf8Path, partitions: &[Partition]) -> Result<(), PrimitiveError>;

    /// Returns the size of `device` in megabytes (MiB).
    ///
    /// # Errors
    ///
    /// Returns [`PrimitiveError`] when the size cannot be determined.
    fn device_size_in_mb(&self, device: &Utf8Path) -> Result<u64, PrimitiveError>;
}

/// Writes filesystems onto partitions.
pub trait Formatter {
    /// Formats `partition` with `fs_type`.
    ///
    /// # Errors
    ///
    /// Returns [`PrimitiveError`] when formatting fails.
    fn format(&self, partition: &Utf8Path, fs_type: FileSystemType) -> Result<(), PrimitiveError>;
}

/// Mounts, unmounts and inspects mount state.
pub trait Mounter {
    /// Mounts `partition` at `mount_point`.
    ///
    /// # Errors
    ///
    /// Returns [`PrimitiveError`] when the mount fails.
    fn mount(&self, partition: &Utf8Path, mount_point: &Utf8Path) -> Result<(), PrimitiveError>;

    /// Unmounts a partition or mount point.
    ///
    /// Returns `false` when nothing was mounted, which is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`PrimitiveError`] when the unmount itself fails.
    fn unmount(&self, partition_or_mount_point: &Utf8Path) -> Result<bool, PrimitiveError>;

    /// Enables swap on `partition`.
    ///
    /// # Errors
    ///
    /// Returns [`PrimitiveError`] when swap cannot be enabled.
    fn swap_on(&self, partition: &Utf8Path) -> Result<(), PrimitiveError>;

    /// Reports whether a partition or mount point is currently mounted.
    ///
    /// # Errors
    ///
    /// Returns [`PrimitiveError`] when mount state cannot be read.
    fn is_mounted(&self, partition_or_mount_point: &Utf8Path) -> Result<bool, PrimitiveError>;

    /// Remounts `mount_point` read-only in place.
    ///
    /// # Errors
    ///
    /// Returns [`PrimitiveError`] when the remount fails.
    fn remount_as_readonly(&self, mount_point: &Utf8Path) -> Result<(), PrimitiveError>;

    /// Moves whatever is mounted at `from_mount_point` to `to_mount_point`.
    ///
    /// # Errors
    ///
    /// Returns [`PrimitiveError::NotMounted`] when nothing is mounted at
    /// `from_mount_point`, or another [`PrimitiveError`] when the move fails.
    fn remount(
        &self,
        from_mount_point: &Utf8Path,
        to_mount_point: &Utf8Path,
    ) -> Result<(), PrimitiveError>;
}

/// Bundle of the three disk capabilities.
pub trait DiskManager {
    /// Returns the partitioner.
    fn partitioner(&self) -> &dyn Partitioner;
    /// Returns the formatter.
    fn formatter(&self) -> &dyn Formatter;
    /// Returns the mounter.
    fn mounter(&self) -> &dyn Mounter;
}

/// Path of partition `index` (1-based) on `device`.
///
/// Devices whose name ends in a digit, such as `/dev/nvme0n1`, take a `p`
/// separator before the index.
#[must_use]
pub fn partition_path(device: &Utf8Path, index: usize) -> Utf8PathBuf {
    let separator = if device.as_str().ends_with(|last: char| last.is_ascii_digit()) {
        "p"
    } else {
        ""
    };
    Utf8PathBuf::from(format!("{device}{separator}{index}"))
}
