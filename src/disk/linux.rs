//! Command-backed disk primitives for Linux hosts.

use std::ffi::OsString;

use camino::{Utf8Path, Utf8PathBuf};
use tracing::debug;

use super::primitives::{
    DiskManager, FileSystemType, Formatter, Mounter, Partition, PartitionType, Partitioner,
    PrimitiveError,
};
use super::sizing::BYTES_PER_MB;
use crate::system::{CommandRunner, FileStore, os_args};

/// Kernel view of the mount table.
pub const PROC_MOUNTS_PATH: &str = "/proc/mounts";

/// Offset of the first partition, keeping the table aligned.
const FIRST_PARTITION_START_MB: u64 = 1;

/// Disk primitives implemented with `parted`, `blockdev`, `mkswap`,
/// `mke2fs`, `mount`, `umount` and `swapon`.
#[derive(Clone, Debug)]
pub struct LinuxDiskManager<R, F> {
    runner: R,
    files: F,
}

impl<R: CommandRunner, F: FileStore> LinuxDiskManager<R, F> {
    /// Creates a disk manager running tools through `runner` and reading
    /// `/proc/mounts` through `files`.
    #[must_use]
    pub const fn new(runner: R, files: F) -> Self {
        Self { runner, files }
    }

    fn run(&self, program: &str, args: Vec<OsString>) -> Result<String, PrimitiveError> {
        debug!(program, ?args, "running disk tool");
        Ok(self.runner.run_checked(program, &args)?.stdout)
    }

    fn mount_table(&self) -> Result<Vec<MountEntry>, PrimitiveError> {
        let contents = self
            .files
            .read_to_string(Utf8Path::new(PROC_MOUNTS_PATH))?;
        Ok(parse_mount_table(&contents))
    }
}

impl<R: CommandRunner, F: FileStore> Partitioner for LinuxDiskManager<R, F> {
    fn partition(&self, device: &Utf8Path, partitions: &[Partition]) -> Result<(), PrimitiveError> {
        self.run("parted", parted_args(device, partitions))?;
        Ok(())
    }

    #[expect(
        clippy::integer_division,
        reason = "device sizes are reported in whole megabytes"
    )]
    fn device_size_in_mb(&self, device: &Utf8Path) -> Result<u64, PrimitiveError> {
        let stdout = self.run("blockdev", os_args(["--getsize64", device.as_str()]))?;
        let bytes: u64 = stdout
            .trim()
            .parse()
            .map_err(|_| PrimitiveError::MalformedOutput {
                program: String::from("blockdev"),
                message: format!("expected a byte count, got {:?}", stdout.trim()),
            })?;
        Ok(bytes / BYTES_PER_MB)
    }
}

impl<R: CommandRunner, F: FileStore> Formatter for LinuxDiskManager<R, F> {
    fn format(&self, partition: &Utf8Path, fs_type: FileSystemType) -> Result<(), PrimitiveError> {
        match fs_type {
            FileSystemType::Swap => self.run("mkswap", os_args([partition.as_str()]))?,
            FileSystemType::Ext4 => {
                self.run("mke2fs", os_args(["-t", "ext4", "-j", partition.as_str()]))?
            }
        };
        Ok(())
    }
}

impl<R: CommandRunner, F: FileStore> Mounter for LinuxDiskManager<R, F> {
    fn mount(&self, partition: &Utf8Path, mount_point: &Utf8Path) -> Result<(), PrimitiveError> {
        self.run("mount", os_args([partition.as_str(), mount_point.as_str()]))?;
        Ok(())
    }

    fn unmount(&self, partition_or_mount_point: &Utf8Path) -> Result<bool, PrimitiveError> {
        if !self.is_mounted(partition_or_mount_point)? {
            return Ok(false);
        }
        self.run("umount", os_args([partition_or_mount_point.as_str()]))?;
        Ok(true)
    }

    fn swap_on(&self, partition: &Utf8Path) -> Result<(), PrimitiveError> {
        self.run("swapon", os_args([partition.as_str()]))?;
        Ok(())
    }

    fn is_mounted(&self, partition_or_mount_point: &Utf8Path) -> Result<bool, PrimitiveError> {
        Ok(self.mount_table()?.iter().any(|entry| {
            entry.source == partition_or_mount_point || entry.target == partition_or_mount_point
        }))
    }

    fn remount_as_readonly(&self, mount_point: &Utf8Path) -> Result<(), PrimitiveError> {
        self.run(
            "mount",
            os_args(["-o", "remount,ro", mount_point.as_str()]),
        )?;
        Ok(())
    }

    fn remount(
        &self,
        from_mount_point: &Utf8Path,
        to_mount_point: &Utf8Path,
    ) -> Result<(), PrimitiveError> {
        let partition = self
            .mount_table()?
            .into_iter()
            .find(|entry| entry.target == from_mount_point)
            .map(|entry| entry.source)
            .ok_or_else(|| PrimitiveError::NotMounted {
                mount_point: from_mount_point.to_path_buf(),
            })?;

        self.run("umount", os_args([from_mount_point.as_str()]))?;
        self.mount(&partition, to_mount_point)
    }
}

impl<R: CommandRunner, F: FileStore> DiskManager for LinuxDiskManager<R, F> {
    fn partitioner(&self) -> &dyn Partitioner {
        self
    }

    fn formatter(&self) -> &dyn Formatter {
        self
    }

    fn mounter(&self) -> &dyn Mounter {
        self
    }
}

fn parted_args(device: &Utf8Path, partitions: &[Partition]) -> Vec<OsString> {
    let mut args = os_args(["-s", device.as_str(), "mklabel", "msdos"]);
    let mut start = FIRST_PARTITION_START_MB;
    let last = partitions.len().saturating_sub(1);

    for (index, partition) in partitions.iter().enumerate() {
        let fs_label = match partition.partition_type {
            PartitionType::Swap => "linux-swap",
            PartitionType::Linux => "ext4",
        };
        let end = if index == last || partition.size_in_mb == 0 {
            String::from("100%")
        } else {
            format!("{}MiB", start + partition.size_in_mb)
        };
        args.extend(os_args([
            "mkpart".to_owned(),
            "primary".to_owned(),
            fs_label.to_owned(),
            format!("{start}MiB"),
            end,
        ]));
        start += partition.size_in_mb;
    }
    args
}

#[derive(Clone, Debug, Eq, PartialEq)]
struct MountEntry {
    source: Utf8PathBuf,
    target: Utf8PathBuf,
}

fn parse_mount_table(contents: &str) -> Vec<MountEntry> {
    contents
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let source = fields.next()?;
            let target = fields.next()?;
            Some(MountEntry {
                source: Utf8PathBuf::from(unescape_mount_field(source)),
                target: Utf8PathBuf::from(unescape_mount_field(target)),
            })
        })
        .collect()
}

/// Decodes the `\ooo` octal escapes the kernel writes for spaces, tabs,
/// newlines and backslashes in mount table fields.
fn unescape_mount_field(field: &str) -> String {
    let mut unescaped = String::with_capacity(field.len());
    let mut rest = field;
    while let Some(position) = rest.find('\\') {
        let (head, tail) = rest.split_at(position);
        unescaped.push_str(head);
        let byte = tail
            .get(1..4)
            .filter(|digits| digits.bytes().all(|digit| (b'0'..=b'7').contains(&digit)))
            .and_then(|digits| u8::from_str_radix(digits, 8).ok());
        if let Some(decoded) = byte {
            unescaped.push(char::from(decoded));
            rest = tail.get(4..).unwrap_or_default();
        } else {
            unescaped.push('\\');
            rest = tail.get(1..).unwrap_or_default();
        }
    }
    unescaped.push_str(rest);
    unescaped
}
