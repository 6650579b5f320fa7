//! Test support utilities shared across unit and integration tests.
//!
//! Every double is cheap to clone and shares its state between clones, so a
//! test can keep one handle for assertions while the component under test
//! owns another. State lives behind `Arc<Mutex<_>>` so doubles can also be
//! moved into the background announcement task.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::env;
use std::ffi::OsString;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use camino::{Utf8Path, Utf8PathBuf};
use tokio::sync::Mutex as AsyncMutex;
use tokio::sync::MutexGuard as AsyncMutexGuard;

use crate::disk::{
    DiskManager, FileSystemType, Formatter, Mounter, Partition, Partitioner, PrimitiveError,
};
use crate::system::fs::{component_matches, split_glob};
use crate::system::{
    Clock, CommandError, CommandOutput, CommandRunner, FileStore, FileStoreError, StatsCollector,
    StatsError,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Scripted command runner that returns pre-seeded outputs in FIFO order.
///
/// Used to drive deterministic command outcomes without spawning processes.
/// Once the queue is empty the runner either reports a spawn failure or,
/// when built with [`ScriptedRunner::succeeding`], a successful exit.
#[derive(Clone, Debug, Default)]
pub struct ScriptedRunner {
    responses: Arc<Mutex<VecDeque<CommandOutput>>>,
    invocations: Arc<Mutex<Vec<CommandInvocation>>>,
    succeed_when_empty: bool,
}

/// Records a single invocation made through [`ScriptedRunner`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandInvocation {
    /// Program name as passed to the runner.
    pub program: String,
    /// Arguments passed to the program.
    pub args: Vec<OsString>,
}

impl CommandInvocation {
    /// Returns a shell-like command string for assertions.
    #[must_use]
    pub fn command_string(&self) -> String {
        self.argv().join(" ")
    }

    /// Returns the program followed by its arguments.
    #[must_use]
    pub fn argv(&self) -> Vec<String> {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(self.program.clone());
        parts.extend(
            self.args
                .iter()
                .map(|arg| arg.to_string_lossy().into_owned()),
        );
        parts
    }
}

impl ScriptedRunner {
    /// Creates a new runner with no queued responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a runner that reports success whenever its queue is empty.
    #[must_use]
    pub fn succeeding() -> Self {
        Self {
            succeed_when_empty: true,
            ..Self::default()
        }
    }

    /// Returns a snapshot of all invocations recorded so far.
    #[must_use]
    pub fn invocations(&self) -> Vec<CommandInvocation> {
        lock(&self.invocations).clone()
    }

    /// Returns every recorded invocation rendered by
    /// [`CommandInvocation::command_string`].
    #[must_use]
    pub fn command_strings(&self) -> Vec<String> {
        lock(&self.invocations)
            .iter()
            .map(CommandInvocation::command_string)
            .collect()
    }

    /// Pushes a successful exit status.
    pub fn push_success(&self) {
        self.push_output(Some(0), "", "");
    }

    /// Pushes a failing exit code with stderr text.
    pub fn push_failure(&self, code: i32) {
        self.push_output(Some(code), "", "simulated failure");
    }

    /// Pushes an explicit command output response.
    pub fn push_output(
        &self,
        code: Option<i32>,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) {
        lock(&self.responses).push_back(CommandOutput {
            code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        });
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, CommandError> {
        lock(&self.invocations).push(CommandInvocation {
            program: program.to_owned(),
            args: args.to_vec(),
        });
        match lock(&self.responses).pop_front() {
            Some(output) => Ok(output),
            None if self.succeed_when_empty => Ok(CommandOutput {
                code: Some(0),
                stdout: String::new(),
                stderr: String::new(),
            }),
            None => Err(CommandError::Spawn {
                program: program.to_owned(),
                message: String::from("no scripted response available"),
            }),
        }
    }
}

/// Clock whose time only moves when something sleeps on it.
#[derive(Clone, Debug)]
pub struct ManualClock {
    start: Instant,
    offset: Arc<Mutex<Duration>>,
}

impl ManualClock {
    /// Creates a clock starting at the current instant.
    #[must_use]
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            offset: Arc::new(Mutex::new(Duration::ZERO)),
        }
    }

    /// Returns the virtual time slept so far.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        *lock(&self.offset)
    }

    /// Moves the clock forward without a sleeper.
    pub fn advance(&self, duration: Duration) {
        *lock(&self.offset) += duration;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.start + self.elapsed()
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }
}

#[derive(Clone, Debug)]
struct MemoryFile {
    contents: String,
    mode: u32,
    visible_after: Duration,
}

#[derive(Debug, Default)]
struct MemoryState {
    files: BTreeMap<Utf8PathBuf, MemoryFile>,
    dirs: BTreeMap<Utf8PathBuf, u32>,
    writes: BTreeMap<Utf8PathBuf, usize>,
    failing_writes: BTreeSet<Utf8PathBuf>,
}

/// In-memory [`FileStore`] with optional delayed file appearance.
///
/// Files added with [`MemoryFileStore::add_file_after`] only become visible
/// once the attached [`ManualClock`] has advanced far enough, which models
/// device nodes showing up after a hot-attach.
#[derive(Clone, Debug, Default)]
pub struct MemoryFileStore {
    state: Arc<Mutex<MemoryState>>,
    clock: Option<ManualClock>,
}

impl MemoryFileStore {
    /// Creates an empty store where every file is visible immediately.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty store that consults `clock` for delayed files.
    #[must_use]
    pub fn with_clock(clock: ManualClock) -> Self {
        Self {
            state: Arc::default(),
            clock: Some(clock),
        }
    }

    /// Adds a file with mode `0644`.
    pub fn add_file(&self, path: impl Into<Utf8PathBuf>, contents: impl Into<String>) {
        self.insert(path.into(), contents.into(), Duration::ZERO);
    }

    /// Adds an empty file that becomes visible once `delay` of virtual time
    /// has passed on the attached clock.
    pub fn add_file_after(&self, path: impl Into<Utf8PathBuf>, delay: Duration) {
        self.insert(path.into(), String::new(), delay);
    }

    /// Adds an existing directory with `mode`.
    pub fn add_dir(&self, path: impl Into<Utf8PathBuf>, mode: u32) {
        lock(&self.state).dirs.insert(path.into(), mode);
    }

    /// Removes a file or directory.
    pub fn remove(&self, path: impl AsRef<Utf8Path>) {
        let mut state = lock(&self.state);
        state.files.remove(path.as_ref());
        state.dirs.remove(path.as_ref());
    }

    /// Makes every later write to `path` fail.
    pub fn fail_writes_to(&self, path: impl Into<Utf8PathBuf>) {
        lock(&self.state).failing_writes.insert(path.into());
    }

    /// Returns the contents of a visible file.
    #[must_use]
    pub fn contents(&self, path: impl AsRef<Utf8Path>) -> Option<String> {
        let state = lock(&self.state);
        state
            .files
            .get(path.as_ref())
            .filter(|file| self.is_visible(file))
            .map(|file| file.contents.clone())
    }

    /// Returns the mode recorded for a file or directory.
    #[must_use]
    pub fn mode(&self, path: impl AsRef<Utf8Path>) -> Option<u32> {
        let state = lock(&self.state);
        state
            .files
            .get(path.as_ref())
            .map(|file| file.mode)
            .or_else(|| state.dirs.get(path.as_ref()).copied())
    }

    /// Returns how many times `path` was written through
    /// [`FileStore::write_file`].
    #[must_use]
    pub fn write_count(&self, path: impl AsRef<Utf8Path>) -> usize {
        lock(&self.state)
            .writes
            .get(path.as_ref())
            .copied()
            .unwrap_or_default()
    }

    /// Returns `true` when a directory was created at `path`.
    #[must_use]
    pub fn has_dir(&self, path: impl AsRef<Utf8Path>) -> bool {
        lock(&self.state).dirs.contains_key(path.as_ref())
    }

    fn insert(&self, path: Utf8PathBuf, contents: String, visible_after: Duration) {
        lock(&self.state).files.insert(
            path,
            MemoryFile {
                contents,
                mode: 0o644,
                visible_after,
            },
        );
    }

    fn is_visible(&self, file: &MemoryFile) -> bool {
        let elapsed = self
            .clock
            .as_ref()
            .map_or(Duration::ZERO, ManualClock::elapsed);
        file.visible_after <= elapsed
    }

    fn not_found(path: &Utf8Path) -> FileStoreError {
        FileStoreError::Io {
            path: path.to_path_buf(),
            message: String::from("No such file or directory"),
        }
    }
}

impl FileStore for MemoryFileStore {
    fn exists(&self, path: &Utf8Path) -> bool {
        let state = lock(&self.state);
        state.dirs.contains_key(path)
            || state
                .files
                .get(path)
                .is_some_and(|file| self.is_visible(file))
    }

    fn read_to_string(&self, path: &Utf8Path) -> Result<String, FileStoreError> {
        self.contents(path).ok_or_else(|| Self::not_found(path))
    }

    fn write_file(
        &self,
        path: &Utf8Path,
        contents: &str,
        mode: u32,
    ) -> Result<(), FileStoreError> {
        let mut state = lock(&self.state);
        if state.failing_writes.contains(path) {
            return Err(FileStoreError::Io {
                path: path.to_path_buf(),
                message: String::from("Permission denied"),
            });
        }
        state.files.insert(
            path.to_path_buf(),
            MemoryFile {
                contents: contents.to_owned(),
                mode,
                visible_after: Duration::ZERO,
            },
        );
        *state.writes.entry(path.to_path_buf()).or_default() += 1;
        Ok(())
    }

    fn create_dir_all(&self, path: &Utf8Path, mode: u32) -> Result<(), FileStoreError> {
        let mut state = lock(&self.state);
        if state.failing_writes.contains(path) {
            return Err(FileStoreError::Io {
                path: path.to_path_buf(),
                message: String::from("Permission denied"),
            });
        }
        for ancestor in path.ancestors().skip(1) {
            if ancestor.as_str().is_empty() {
                continue;
            }
            state.dirs.entry(ancestor.to_path_buf()).or_insert(0o755);
        }
        state.dirs.entry(path.to_path_buf()).or_insert(mode);
        Ok(())
    }

    fn glob(&self, pattern: &str) -> Result<Vec<Utf8PathBuf>, FileStoreError> {
        let (parent, prefix) = split_glob(pattern)?;
        let state = lock(&self.state);

        let visible_files = state
            .files
            .iter()
            .filter(|(_, file)| self.is_visible(file))
            .map(|(path, _)| path);
        let known: BTreeSet<&Utf8Path> = visible_files
            .chain(state.dirs.keys())
            .flat_map(|path| path.ancestors())
            .collect();

        Ok(known
            .into_iter()
            .filter(|path| path.parent() == Some(parent.as_path()))
            .filter(|path| {
                path.file_name()
                    .is_some_and(|name| component_matches(prefix, name))
            })
            .map(Utf8Path::to_path_buf)
            .collect())
    }
}

/// [`StatsCollector`] returning a fixed answer.
#[derive(Clone, Debug)]
pub struct FixedStats {
    result: Result<u64, StatsError>,
}

impl FixedStats {
    /// Reports `bytes` of physical memory.
    #[must_use]
    pub const fn new(bytes: u64) -> Self {
        Self { result: Ok(bytes) }
    }

    /// Reports `megabytes` of physical memory.
    #[must_use]
    pub const fn megabytes(megabytes: u64) -> Self {
        Self::new(megabytes * 1024 * 1024)
    }

    /// Fails every query with `error`.
    #[must_use]
    pub const fn failing(error: StatsError) -> Self {
        Self { result: Err(error) }
    }
}

impl StatsCollector for FixedStats {
    fn total_memory_bytes(&self) -> Result<u64, StatsError> {
        self.result.clone()
    }
}

/// Disk primitive call captured by [`RecordingDiskManager`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum DiskCall {
    /// A partition table was applied.
    Partition {
        /// Device that was partitioned.
        device: Utf8PathBuf,
        /// Scheme applied, in order.
        partitions: Vec<Partition>,
    },
    /// A partition was formatted.
    Format {
        /// Partition that was formatted.
        partition: Utf8PathBuf,
        /// Filesystem written.
        fs_type: FileSystemType,
    },
    /// A partition was mounted.
    Mount {
        /// Partition that was mounted.
        partition: Utf8PathBuf,
        /// Where it was mounted.
        mount_point: Utf8PathBuf,
    },
    /// An unmount was requested.
    Unmount {
        /// Partition or mount point named in the request.
        target: Utf8PathBuf,
    },
    /// Swap was enabled.
    SwapOn {
        /// Swap partition.
        partition: Utf8PathBuf,
    },
    /// A mount point was remounted read-only.
    RemountReadonly {
        /// Mount point affected.
        mount_point: Utf8PathBuf,
    },
    /// A mount was moved between mount points.
    Remount {
        /// Previous mount point.
        from: Utf8PathBuf,
        /// New mount point.
        to: Utf8PathBuf,
    },
}

#[derive(Debug, Default)]
struct DiskState {
    calls: Vec<DiskCall>,
    device_sizes: BTreeMap<Utf8PathBuf, u64>,
    mounted: BTreeSet<Utf8PathBuf>,
    failing: BTreeSet<&'static str>,
}

/// [`DiskManager`] double recording every call in order.
///
/// Mount state is tracked as a set of mounted partitions and mount points:
/// `mount` adds both, `unmount` removes the named target and reports
/// whether it was present.
#[derive(Clone, Debug, Default)]
pub struct RecordingDiskManager {
    state: Arc<Mutex<DiskState>>,
}

impl RecordingDiskManager {
    /// Creates a manager with no devices and nothing mounted.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the size reported for `device`.
    pub fn set_device_size(&self, device: impl Into<Utf8PathBuf>, size_in_mb: u64) {
        lock(&self.state)
            .device_sizes
            .insert(device.into(), size_in_mb);
    }

    /// Marks a partition or mount point as mounted.
    pub fn mark_mounted(&self, path: impl Into<Utf8PathBuf>) {
        lock(&self.state).mounted.insert(path.into());
    }

    /// Makes the named primitive (for example `"format"`) fail.
    pub fn fail_on(&self, operation: &'static str) {
        lock(&self.state).failing.insert(operation);
    }

    /// Returns every call recorded so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<DiskCall> {
        lock(&self.state).calls.clone()
    }

    /// Returns `true` when `path` is currently tracked as mounted.
    #[must_use]
    pub fn is_tracked_mounted(&self, path: impl AsRef<Utf8Path>) -> bool {
        lock(&self.state).mounted.contains(path.as_ref())
    }

    fn record(
        &self,
        operation: &'static str,
        call: Option<DiskCall>,
    ) -> Result<(), PrimitiveError> {
        let mut state = lock(&self.state);
        if let Some(recorded) = call {
            state.calls.push(recorded);
        }
        if state.failing.contains(operation) {
            return Err(PrimitiveError::Command(CommandError::Failure {
                program: operation.to_owned(),
                status: Some(1),
                status_text: String::from("1"),
                stderr: String::from("simulated failure"),
            }));
        }
        Ok(())
    }
}

impl Partitioner for RecordingDiskManager {
    fn partition(&self, device: &Utf8Path, partitions: &[Partition]) -> Result<(), PrimitiveError> {
        self.record(
            "partition",
            Some(DiskCall::Partition {
                device: device.to_path_buf(),
                partitions: partitions.to_vec(),
            }),
        )
    }

    fn device_size_in_mb(&self, device: &Utf8Path) -> Result<u64, PrimitiveError> {
        self.record("device_size_in_mb", None)?;
        lock(&self.state)
            .device_sizes
            .get(device)
            .copied()
            .ok_or_else(|| PrimitiveError::MalformedOutput {
                program: String::from("blockdev"),
                message: format!("no size configured for {device}"),
            })
    }
}

impl Formatter for RecordingDiskManager {
    fn format(&self, partition: &Utf8Path, fs_type: FileSystemType) -> Result<(), PrimitiveError> {
        self.record(
            "format",
            Some(DiskCall::Format {
                partition: partition.to_path_buf(),
                fs_type,
            }),
        )
    }
}

impl Mounter for RecordingDiskManager {
    fn mount(&self, partition: &Utf8Path, mount_point: &Utf8Path) -> Result<(), PrimitiveError> {
        self.record(
            "mount",
            Some(DiskCall::Mount {
                partition: partition.to_path_buf(),
                mount_point: mount_point.to_path_buf(),
            }),
        )?;
        let mut state = lock(&self.state);
        state.mounted.insert(partition.to_path_buf());
        state.mounted.insert(mount_point.to_path_buf());
        Ok(())
    }

    fn unmount(&self, partition_or_mount_point: &Utf8Path) -> Result<bool, PrimitiveError> {
        self.record(
            "unmount",
            Some(DiskCall::Unmount {
                target: partition_or_mount_point.to_path_buf(),
            }),
        )?;
        Ok(lock(&self.state).mounted.remove(partition_or_mount_point))
    }

    fn swap_on(&self, partition: &Utf8Path) -> Result<(), PrimitiveError> {
        self.record(
            "swap_on",
            Some(DiskCall::SwapOn {
                partition: partition.to_path_buf(),
            }),
        )
    }

    fn is_mounted(&self, partition_or_mount_point: &Utf8Path) -> Result<bool, PrimitiveError> {
        self.record("is_mounted", None)?;
        Ok(self.is_tracked_mounted(partition_or_mount_point))
    }

    fn remount_as_readonly(&self, mount_point: &Utf8Path) -> Result<(), PrimitiveError> {
        self.record(
            "remount_as_readonly",
            Some(DiskCall::RemountReadonly {
                mount_point: mount_point.to_path_buf(),
            }),
        )
    }

    fn remount(
        &self,
        from_mount_point: &Utf8Path,
        to_mount_point: &Utf8Path,
    ) -> Result<(), PrimitiveError> {
        self.record(
            "remount",
            Some(DiskCall::Remount {
                from: from_mount_point.to_path_buf(),
                to: to_mount_point.to_path_buf(),
            }),
        )?;
        let mut state = lock(&self.state);
        if !state.mounted.remove(from_mount_point) {
            return Err(PrimitiveError::NotMounted {
                mount_point: from_mount_point.to_path_buf(),
            });
        }
        state.mounted.insert(to_mount_point.to_path_buf());
        Ok(())
    }
}

impl DiskManager for RecordingDiskManager {
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

/// Global mutex used to serialise environment mutation in tests.
pub static ENV_LOCK: AsyncMutex<()> = AsyncMutex::const_new(());

/// Guard that holds the env mutex and restores variables on drop.
pub struct EnvGuard {
    previous: Vec<(String, Option<OsString>)>,
    _guard: AsyncMutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Sets multiple environment variables while holding a global mutex.
    ///
    /// An empty slice only takes the lock, which keeps tests that read the
    /// environment from racing tests that change it.
    pub async fn set_vars(pairs: &[(&str, &str)]) -> Self {
        debug_assert!(
            {
                let mut seen = BTreeSet::new();
                pairs.iter().all(|(key, _)| seen.insert(*key))
            },
            "duplicate environment variable keys passed to EnvGuard::set_vars"
        );

        let guard = ENV_LOCK.lock().await;
        let mut previous = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            let old = env::var_os(key);
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`, preventing races.
            unsafe { env::set_var(key, value) };
            previous.push(((*key).to_owned(), old));
        }

        Self {
            previous,
            _guard: guard,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, old) in &self.previous {
            // SAFETY: Environment mutation is serialised by holding `_guard`.
            unsafe {
                match old {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
        }
    }
}
