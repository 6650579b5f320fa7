//! Command-line interface definitions for the `hostprep` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use clap::{Args, Parser};

/// Top-level CLI for the `hostprep` binary.
#[derive(Debug, Parser)]
#[command(
    name = "hostprep",
    about = "Bring a freshly booted VM's disks and network into their desired state",
    arg_required_else_help = true
)]
pub(crate) enum Cli {
    /// Print the device node a requested device path resolves to.
    #[command(name = "resolve")]
    Resolve(DeviceArgs),
    /// Partition the ephemeral disk into swap and the data filesystem.
    #[command(name = "ephemeral")]
    Ephemeral(DeviceArgs),
    /// Format a persistent disk and mount it.
    #[command(name = "mount")]
    Mount(MountArgs),
    /// Unmount a persistent disk.
    #[command(name = "unmount")]
    Unmount(DeviceArgs),
    /// Report whether a persistent disk is mounted.
    #[command(name = "mounted")]
    Mounted(DeviceArgs),
    /// Copy a persistent disk onto a new one and swap mount points.
    #[command(name = "migrate")]
    Migrate(MigrateArgs),
    /// Render the DHCP client configuration and restart networking if needed.
    #[command(name = "dhcp")]
    Dhcp(SettingsArgs),
    /// Configure static interfaces, DNS and gratuitous ARP.
    #[command(name = "network")]
    Network(SettingsArgs),
    /// Set the hostname and rewrite /etc/hostname and /etc/hosts.
    #[command(name = "hostname")]
    Hostname(HostnameArgs),
    /// Hand /tmp to the runtime group.
    #[command(name = "tmp-dir")]
    TmpDir,
}

/// A single device path argument.
#[derive(Debug, Args)]
pub(crate) struct DeviceArgs {
    /// Device path as named in the VM settings, for example /dev/sdb.
    #[arg(value_name = "DEVICE")]
    pub(crate) device: String,
}

/// Arguments for `hostprep mount`.
#[derive(Debug, Args)]
pub(crate) struct MountArgs {
    /// Device path as named in the VM settings.
    #[arg(value_name = "DEVICE")]
    pub(crate) device: String,
    /// Directory to mount the disk on; created with mode 0700.
    #[arg(value_name = "MOUNT_POINT")]
    pub(crate) mount_point: String,
}

/// Arguments for `hostprep migrate`.
#[derive(Debug, Args)]
pub(crate) struct MigrateArgs {
    /// Mount point of the disk being replaced.
    #[arg(value_name = "FROM")]
    pub(crate) from: String,
    /// Mount point of the new disk.
    #[arg(value_name = "TO")]
    pub(crate) to: String,
}

/// Network settings source.
#[derive(Debug, Args)]
pub(crate) struct SettingsArgs {
    /// JSON file mapping network names to their settings.
    #[arg(long, value_name = "PATH")]
    pub(crate) settings: String,
}

/// Arguments for `hostprep hostname`.
#[derive(Debug, Args)]
pub(crate) struct HostnameArgs {
    /// Hostname to apply.
    #[arg(value_name = "NAME")]
    pub(crate) name: String,
}
