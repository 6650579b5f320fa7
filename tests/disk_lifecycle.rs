//! Behavioural coverage for the disk lifecycle through the public API.

#[path = "common/size_constants.rs"]
mod size_constants;

use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use hostprep::disk::{
    DeviceResolver, DirectoryLayout, DiskError, DiskProvisioner, FileSystemType,
    LinuxDiskManager, Partition, PartitionType, RESOLVE_TIMEOUT,
};
use hostprep::system::MeminfoStatsCollector;
use hostprep::test_support::{
    DiskCall, FixedStats, ManualClock, MemoryFileStore, RecordingDiskManager, ScriptedRunner,
};
use rstest::{fixture, rstest};

use size_constants::MB;

struct Host {
    clock: ManualClock,
    files: MemoryFileStore,
    disks: RecordingDiskManager,
    runner: ScriptedRunner,
}

impl Host {
    fn provisioner(
        &self,
        memory_mb: u64,
    ) -> DiskProvisioner<
        RecordingDiskManager,
        ScriptedRunner,
        MemoryFileStore,
        FixedStats,
        ManualClock,
    > {
        DiskProvisioner::new(
            self.disks.clone(),
            self.runner.clone(),
            FixedStats::new(memory_mb * MB),
            DeviceResolver::new(self.files.clone(), self.clock.clone()),
            DirectoryLayout::new("/var/vcap", "vcap"),
        )
    }
}

#[fixture]
fn host() -> Host {
    let clock = ManualClock::new();
    Host {
        files: MemoryFileStore::with_clock(clock.clone()),
        clock,
        disks: RecordingDiskManager::new(),
        runner: ScriptedRunner::succeeding(),
    }
}

fn path(value: &str) -> Utf8PathBuf {
    Utf8PathBuf::from(value)
}

#[rstest]
fn hot_attached_disk_is_mounted_once_it_appears(host: Host) {
    host.files
        .add_file_after("/dev/xvdf", Duration::from_millis(400));
    let provisioner = host.provisioner(1024);

    provisioner
        .mount_persistent_disk(Utf8Path::new("/dev/sdf"), Utf8Path::new("/var/vcap/store"))
        .expect("disk appearing within the timeout should mount");

    assert!(host.clock.elapsed() >= Duration::from_millis(400));
    assert!(host.clock.elapsed() < RESOLVE_TIMEOUT);
    assert!(host.disks.is_tracked_mounted("/dev/xvdf1"));
    assert_eq!(
        provisioner.is_device_path_mounted(Utf8Path::new("/dev/sdf")),
        Ok(true)
    );
}

#[rstest]
fn late_disk_is_reported_missing(host: Host) {
    host.files
        .add_file_after("/dev/xvdf", RESOLVE_TIMEOUT + Duration::from_millis(100));
    let provisioner = host.provisioner(1024);

    let err = provisioner
        .mount_persistent_disk(Utf8Path::new("/dev/sdf"), Utf8Path::new("/var/vcap/store"))
        .expect_err("disk appearing after the timeout should not be found");

    assert_eq!(
        err,
        DiskError::DeviceNotFound {
            requested: path("/dev/sdf"),
        }
    );
    assert!(host.disks.calls().is_empty());
}

#[rstest]
fn persistent_disk_round_trip(host: Host) {
    host.files.add_file("/dev/xvdf", "");
    host.files.add_file("/dev/xvdg", "");
    let provisioner = host.provisioner(1024);

    provisioner
        .mount_persistent_disk(Utf8Path::new("/dev/sdf"), Utf8Path::new("/var/vcap/store"))
        .expect("first disk should mount");
    provisioner
        .mount_persistent_disk(
            Utf8Path::new("/dev/sdg"),
            Utf8Path::new("/var/vcap/store_migration_target"),
        )
        .expect("second disk should mount");
    provisioner
        .migrate_persistent_disk(
            Utf8Path::new("/var/vcap/store"),
            Utf8Path::new("/var/vcap/store_migration_target"),
        )
        .expect("migration should succeed");

    assert!(host.disks.is_tracked_mounted("/var/vcap/store"));
    assert!(!host.disks.is_tracked_mounted("/var/vcap/store_migration_target"));
    let pipelines: Vec<String> = host
        .runner
        .command_strings()
        .into_iter()
        .filter(|command| command.starts_with("sh -c"))
        .collect();
    assert_eq!(pipelines.len(), 1);

    assert_eq!(
        provisioner.unmount_persistent_disk(Utf8Path::new("/dev/sdf")),
        Ok(true)
    );
    assert_eq!(
        provisioner.unmount_persistent_disk(Utf8Path::new("/dev/sdf")),
        Ok(false)
    );
}

#[rstest]
#[case::roomy_disk(1024, 2112, 1024, 1088)]
#[case::tight_disk(1024, 1984, 992, 992)]
fn ephemeral_disk_scheme_follows_memory(
    host: Host,
    #[case] memory_mb: u64,
    #[case] disk_mb: u64,
    #[case] swap_mb: u64,
    #[case] data_mb: u64,
) {
    host.files.add_file("/dev/vdb", "");
    host.disks.set_device_size("/dev/vdb", disk_mb);

    host.provisioner(memory_mb)
        .setup_ephemeral_disk(Utf8Path::new("/dev/sdb"))
        .expect("ephemeral setup should succeed");

    let calls = host.disks.calls();
    assert_eq!(
        calls.first(),
        Some(&DiskCall::Partition {
            device: path("/dev/vdb"),
            partitions: vec![
                Partition::new(swap_mb, PartitionType::Swap),
                Partition::new(data_mb, PartitionType::Linux),
            ],
        })
    );
    assert!(calls.contains(&DiskCall::Format {
        partition: path("/dev/vdb2"),
        fs_type: FileSystemType::Ext4,
    }));
    assert!(host.files.has_dir("/var/vcap/data/sys/run"));
}

#[test]
fn linux_manager_drives_real_tool_invocations() {
    let runner = ScriptedRunner::succeeding();
    runner.push_output(Some(0), format!("{}\n", 2112 * MB), "");
    let clock = ManualClock::new();
    let files = MemoryFileStore::with_clock(clock.clone());
    files.add_file("/dev/xvdb", "");
    files.add_file("/proc/meminfo", "MemTotal:        1048576 kB\n");
    files.add_file("/proc/mounts", "proc /proc proc rw 0 0\n");

    let provisioner = DiskProvisioner::new(
        LinuxDiskManager::new(runner.clone(), files.clone()),
        runner.clone(),
        MeminfoStatsCollector::new(files.clone()),
        DeviceResolver::new(files, clock),
        DirectoryLayout::default(),
    );

    provisioner
        .setup_ephemeral_disk(Utf8Path::new("/dev/sdb"))
        .expect("ephemeral setup should succeed");

    assert_eq!(
        runner.command_strings(),
        vec![
            "blockdev --getsize64 /dev/xvdb",
            "parted -s /dev/xvdb mklabel msdos mkpart primary linux-swap 1MiB 1025MiB \
             mkpart primary ext4 1025MiB 100%",
            "mkswap /dev/xvdb1",
            "mke2fs -t ext4 -j /dev/xvdb2",
            "mount /dev/xvdb2 /var/vcap/data",
            "swapon /dev/xvdb1",
            "chown root:vcap /var/vcap/data/sys",
            "chown root:vcap /var/vcap/data/sys/log",
            "chown root:vcap /var/vcap/data/sys/run",
        ]
    );
}
