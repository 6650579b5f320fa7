//! Disk lifecycle: ephemeral setup, persistent mounts and migration.
//!
//! [`DiskProvisioner`] resolves requested device paths through a
//! [`DeviceResolver`], then drives the [`DiskManager`] primitives in a fixed
//! order. Failures abort the operation where they happen; partially applied
//! state is left in place for the operator to inspect.

use camino::{Utf8Path, Utf8PathBuf};
use shell_escape::unix::escape;
use thiserror::Error;
use tracing::{debug, info};

use crate::system::{
    Clock, CommandError, CommandRunner, FileStore, FileStoreError, StatsCollector, StatsError,
    os_args,
};

pub mod linux;
pub mod primitives;
pub mod resolver;
pub mod sizing;

pub use linux::LinuxDiskManager;
pub use primitives::{
    DiskManager, FileSystemType, Formatter, Mounter, Partition, PartitionType, Partitioner,
    PrimitiveError, partition_path,
};
pub use resolver::{DeviceResolver, POLL_INTERVAL, RESOLVE_TIMEOUT, candidate_paths};
pub use sizing::{BYTES_PER_MB, ephemeral_partitions};

/// Default agent base directory.
pub const DEFAULT_BASE_DIR: &str = "/var/vcap";

/// Default group owning runtime directories.
pub const DEFAULT_RUNTIME_GROUP: &str = "vcap";

/// Mode of the ephemeral data directory and its `sys` children.
pub const DATA_DIR_MODE: u32 = 0o750;

/// Mode of persistent disk mount points.
pub const PERSISTENT_MOUNT_MODE: u32 = 0o700;

/// Mode applied to the shared temporary directory.
pub const TMP_DIR_MODE: u32 = 0o770;

const TMP_DIR: &str = "/tmp";

/// Errors raised while provisioning disks.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum DiskError {
    /// Raised when no candidate node for the requested device appeared.
    #[error("device {requested} was not found under any known name")]
    DeviceNotFound {
        /// Device path that was requested.
        requested: Utf8PathBuf,
    },
    /// Raised when a disk primitive or helper command fails.
    #[error("failed to {action}: {source}")]
    Primitive {
        /// Step that was being performed.
        action: String,
        /// Underlying failure.
        #[source]
        source: PrimitiveError,
    },
    /// Raised when a directory or file cannot be written.
    #[error(transparent)]
    ConfigWrite(#[from] FileStoreError),
    /// Raised when host state needed for a decision cannot be interpreted.
    #[error("malformed host state: {0}")]
    MalformedState(String),
}

impl From<StatsError> for DiskError {
    fn from(err: StatsError) -> Self {
        Self::MalformedState(err.to_string())
    }
}

fn step<T>(action: impl Into<String>, result: Result<T, PrimitiveError>) -> Result<T, DiskError> {
    result.map_err(|source| DiskError::Primitive {
        action: action.into(),
        source,
    })
}

/// Locations of the agent's runtime directories.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DirectoryLayout {
    base_dir: Utf8PathBuf,
    runtime_group: String,
}

impl DirectoryLayout {
    /// Creates a layout rooted at `base_dir` with runtime directories owned
    /// by `runtime_group`.
    #[must_use]
    pub fn new(base_dir: impl Into<Utf8PathBuf>, runtime_group: impl Into<String>) -> Self {
        Self {
            base_dir: base_dir.into(),
            runtime_group: runtime_group.into(),
        }
    }

    /// Root of every runtime directory.
    #[must_use]
    pub fn base_dir(&self) -> &Utf8Path {
        &self.base_dir
    }

    /// Group that owns runtime directories.
    #[must_use]
    pub fn runtime_group(&self) -> &str {
        &self.runtime_group
    }

    /// `<base>/data`, the ephemeral data mount point.
    #[must_use]
    pub fn data_dir(&self) -> Utf8PathBuf {
        self.base_dir.join("data")
    }

    /// `<base>/data/sys`.
    #[must_use]
    pub fn sys_dir(&self) -> Utf8PathBuf {
        self.data_dir().join("sys")
    }

    /// `<base>/data/sys/log`.
    #[must_use]
    pub fn sys_log_dir(&self) -> Utf8PathBuf {
        self.sys_dir().join("log")
    }

    /// `<base>/data/sys/run`.
    #[must_use]
    pub fn sys_run_dir(&self) -> Utf8PathBuf {
        self.sys_dir().join("run")
    }

    fn owner(&self) -> String {
        format!("root:{}", self.runtime_group)
    }
}

impl Default for DirectoryLayout {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_DIR, DEFAULT_RUNTIME_GROUP)
    }
}

/// Builds the shell pipeline that copies `from` into `to`, preserving
/// ownership and permissions.
#[must_use]
pub fn copy_pipeline(from: &Utf8Path, to: &Utf8Path) -> String {
    let escaped_from = escape(from.as_str().into());
    let escaped_to = escape(to.as_str().into());
    format!("(tar -C {escaped_from} -cf - .) | (tar -C {escaped_to} -xpf -)")
}

/// Partitions, formats, mounts and migrates disks.
#[derive(Debug)]
pub struct DiskProvisioner<D, R, F, S, C> {
    disks: D,
    runner: R,
    stats: S,
    resolver: DeviceResolver<F, C>,
    layout: DirectoryLayout,
}

impl<D, R, F, S, C> DiskProvisioner<D, R, F, S, C>
where
    D: DiskManager,
    R: CommandRunner,
    F: FileStore,
    S: StatsCollector,
    C: Clock,
{
    /// Creates a provisioner.
    ///
    /// Directory creation goes through the resolver's file store so device
    /// lookups and writes observe the same filesystem.
    #[must_use]
    pub const fn new(
        disks: D,
        runner: R,
        stats: S,
        resolver: DeviceResolver<F, C>,
        layout: DirectoryLayout,
    ) -> Self {
        Self {
            disks,
            runner,
            stats,
            resolver,
            layout,
        }
    }

    /// Returns the directory layout in use.
    #[must_use]
    pub const fn layout(&self) -> &DirectoryLayout {
        &self.layout
    }

    /// Resolves `device` to its kernel node.
    ///
    /// # Errors
    ///
    /// Returns [`DiskError::DeviceNotFound`] when no candidate appears before
    /// the resolver gives up.
    pub fn resolve(&self, device: &Utf8Path) -> Result<Utf8PathBuf, DiskError> {
        self.resolver
            .resolve(device)
            .ok_or_else(|| DiskError::DeviceNotFound {
                requested: device.to_path_buf(),
            })
    }

    /// Turns `device` into swap plus the `<base>/data` filesystem and
    /// creates the runtime directories on it.
    ///
    /// # Errors
    ///
    /// Returns [`DiskError`] from the first step that fails. Earlier steps
    /// are not undone.
    pub fn setup_ephemeral_disk(&self, device: &Utf8Path) -> Result<(), DiskError> {
        let real_path = self.resolve(device)?;
        let total_memory = self.stats.total_memory_bytes()?;
        let disk_size = step(
            format!("read size of {real_path}"),
            self.disks.partitioner().device_size_in_mb(&real_path),
        )?;
        let scheme = ephemeral_partitions(total_memory, disk_size);
        let [swap, data] = scheme;
        info!(
            device = %real_path,
            swap_mb = swap.size_in_mb,
            data_mb = data.size_in_mb,
            "partitioning ephemeral disk"
        );

        let files = self.resolver.files();
        let data_dir = self.layout.data_dir();
        files.create_dir_all(&data_dir, DATA_DIR_MODE)?;

        step(
            format!("partition {real_path}"),
            self.disks.partitioner().partition(&real_path, &scheme),
        )?;

        let swap_partition = partition_path(&real_path, 1);
        let data_partition = partition_path(&real_path, 2);
        let formatter = self.disks.formatter();
        step(
            format!("format {swap_partition}"),
            formatter.format(&swap_partition, FileSystemType::Swap),
        )?;
        step(
            format!("format {data_partition}"),
            formatter.format(&data_partition, FileSystemType::Ext4),
        )?;

        let mounter = self.disks.mounter();
        step(
            format!("mount {data_partition}"),
            mounter.mount(&data_partition, &data_dir),
        )?;
        step(
            format!("enable swap on {swap_partition}"),
            mounter.swap_on(&swap_partition),
        )?;

        files.create_dir_all(&self.layout.sys_log_dir(), DATA_DIR_MODE)?;
        self.chown_runtime(&self.layout.sys_dir())?;
        self.chown_runtime(&self.layout.sys_log_dir())?;
        files.create_dir_all(&self.layout.sys_run_dir(), DATA_DIR_MODE)?;
        self.chown_runtime(&self.layout.sys_run_dir())?;

        info!(device = %real_path, mount_point = %data_dir, "ephemeral disk ready");
        Ok(())
    }

    /// Formats `device` as a single ext4 partition and mounts it at
    /// `mount_point`.
    ///
    /// # Errors
    ///
    /// Returns [`DiskError`] from the first step that fails.
    pub fn mount_persistent_disk(
        &self,
        device: &Utf8Path,
        mount_point: &Utf8Path,
    ) -> Result<(), DiskError> {
        let real_path = self.resolve(device)?;
        self.resolver
            .files()
            .create_dir_all(mount_point, PERSISTENT_MOUNT_MODE)?;

        step(
            format!("partition {real_path}"),
            self.disks
                .partitioner()
                .partition(&real_path, &[Partition::new(0, PartitionType::Linux)]),
        )?;

        let partition = partition_path(&real_path, 1);
        step(
            format!("format {partition}"),
            self.disks
                .formatter()
                .format(&partition, FileSystemType::Ext4),
        )?;
        step(
            format!("mount {partition}"),
            self.disks.mounter().mount(&partition, mount_point),
        )?;

        info!(device = %real_path, %mount_point, "persistent disk mounted");
        Ok(())
    }

    /// Unmounts the first partition of `device`.
    ///
    /// Returns `false` when it was not mounted.
    ///
    /// # Errors
    ///
    /// Returns [`DiskError::DeviceNotFound`] when the device is missing, or
    /// [`DiskError::Primitive`] when the unmount itself fails.
    pub fn unmount_persistent_disk(&self, device: &Utf8Path) -> Result<bool, DiskError> {
        let partition = partition_path(&self.resolve(device)?, 1);
        let did_unmount = step(
            format!("unmount {partition}"),
            self.disks.mounter().unmount(&partition),
        )?;
        debug!(%partition, did_unmount, "persistent disk unmount requested");
        Ok(did_unmount)
    }

    /// Reports whether the first partition of `device` is mounted.
    ///
    /// # Errors
    ///
    /// Returns [`DiskError::DeviceNotFound`] when the device is missing, or
    /// [`DiskError::Primitive`] when mount state cannot be read.
    pub fn is_device_path_mounted(&self, device: &Utf8Path) -> Result<bool, DiskError> {
        let partition = partition_path(&self.resolve(device)?, 1);
        step(
            format!("inspect mounts for {partition}"),
            self.disks.mounter().is_mounted(&partition),
        )
    }

    /// Copies the contents of `from_mount_point` onto the disk mounted at
    /// `to_mount_point`, then moves that disk to `from_mount_point`.
    ///
    /// The source is remounted read-only first and stays that way if the
    /// copy fails.
    ///
    /// # Errors
    ///
    /// Returns [`DiskError::Primitive`] from the first step that fails.
    pub fn migrate_persistent_disk(
        &self,
        from_mount_point: &Utf8Path,
        to_mount_point: &Utf8Path,
    ) -> Result<(), DiskError> {
        let mounter = self.disks.mounter();
        step(
            format!("remount {from_mount_point} read-only"),
            mounter.remount_as_readonly(from_mount_point),
        )?;

        let pipeline = copy_pipeline(from_mount_point, to_mount_point);
        self.run_helper(
            &format!("copy {from_mount_point} to {to_mount_point}"),
            "sh",
            &["-c", pipeline.as_str()],
        )?;

        step(
            format!("unmount {from_mount_point}"),
            mounter.unmount(from_mount_point),
        )?;
        step(
            format!("move {to_mount_point} to {from_mount_point}"),
            mounter.remount(to_mount_point, from_mount_point),
        )?;

        info!(%from_mount_point, %to_mount_point, "persistent disk migrated");
        Ok(())
    }

    /// Hands `/tmp` to the runtime group with mode `0770`.
    ///
    /// # Errors
    ///
    /// Returns [`DiskError::Primitive`] when `chown` or `chmod` fails.
    pub fn setup_tmp_dir(&self) -> Result<(), DiskError> {
        self.chown_runtime(Utf8Path::new(TMP_DIR))?;
        let mode = format!("0{TMP_DIR_MODE:o}");
        self.run_helper(
            &format!("set mode of {TMP_DIR}"),
            "chmod",
            &[mode.as_str(), TMP_DIR],
        )
    }

    fn chown_runtime(&self, path: &Utf8Path) -> Result<(), DiskError> {
        let owner = self.layout.owner();
        self.run_helper(
            &format!("change owner of {path}"),
            "chown",
            &[owner.as_str(), path.as_str()],
        )
    }

    fn run_helper(&self, action: &str, program: &str, args: &[&str]) -> Result<(), DiskError> {
        self.runner
            .run_checked(program, &os_args(args))
            .map(drop)
            .map_err(|err: CommandError| DiskError::Primitive {
                action: action.to_owned(),
                source: PrimitiveError::Command(err),
            })
    }
}

#[cfg(test)]
mod tests;
