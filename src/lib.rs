//! Host adaptation layer for VM lifecycle agents.
//!
//! The crate brings a freshly booted virtual machine into its desired
//! runtime state: device paths are resolved across hypervisor naming
//! schemes, ephemeral and persistent disks are partitioned, formatted and
//! mounted, and network interfaces are configured idempotently with
//! gratuitous ARP announcements after a restart.
//!
//! Components receive their host capabilities (command runner, file store,
//! clock, statistics) through constructors; [`test_support`] provides the
//! doubles used by the test suite.

pub mod config;
pub mod disk;
pub mod logging;
pub mod network;
pub mod system;
pub mod test_support;

pub use config::{AgentConfig, ConfigError};
pub use disk::{
    DeviceResolver, DirectoryLayout, DiskError, DiskManager, DiskProvisioner, LinuxDiskManager,
};
pub use network::{Network, NetworkConfigurator, NetworkError, Networks};
pub use system::{
    CommandRunner, FileStore, HostFileStore, MeminfoStatsCollector, ProcessCommandRunner,
    StatsCollector, SystemClock,
};
