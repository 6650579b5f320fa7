//! Host capabilities consumed by the disk and network engines.
//!
//! Components receive these through their constructors instead of touching
//! the process table or filesystem directly, so tests can substitute the
//! doubles from [`crate::test_support`].

pub mod clock;
pub mod command;
pub mod fs;
pub mod stats;

pub use clock::{Clock, SystemClock};
pub use command::{CommandError, CommandOutput, CommandRunner, ProcessCommandRunner, os_args};
pub use fs::{FileStore, FileStoreError, HostFileStore};
pub use stats::{MeminfoStatsCollector, StatsCollector, StatsError};
