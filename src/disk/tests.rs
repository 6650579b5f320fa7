//! Unit tests for the disk provisioner.

use camino::{Utf8Path, Utf8PathBuf};
use rstest::{fixture, rstest};

use super::*;
use crate::test_support::{
    DiskCall, FixedStats, ManualClock, MemoryFileStore, RecordingDiskManager, ScriptedRunner,
};

type TestProvisioner =
    DiskProvisioner<RecordingDiskManager, ScriptedRunner, MemoryFileStore, FixedStats, ManualClock>;

struct Harness {
    disks: RecordingDiskManager,
    runner: ScriptedRunner,
    files: MemoryFileStore,
    clock: ManualClock,
}

impl Harness {
    fn provisioner(&self, stats: FixedStats) -> TestProvisioner {
        DiskProvisioner::new(
            self.disks.clone(),
            self.runner.clone(),
            stats,
            DeviceResolver::new(self.files.clone(), self.clock.clone()),
            DirectoryLayout::default(),
        )
    }
}

#[fixture]
fn harness() -> Harness {
    let clock = ManualClock::new();
    Harness {
        disks: RecordingDiskManager::new(),
        runner: ScriptedRunner::succeeding(),
        files: MemoryFileStore::with_clock(clock.clone()),
        clock,
    }
}

fn path(value: &str) -> Utf8PathBuf {
    Utf8PathBuf::from(value)
}

#[rstest]
fn ephemeral_disk_is_partitioned_formatted_and_mounted(harness: Harness) {
    harness.files.add_file("/dev/xvdb", "");
    harness.disks.set_device_size("/dev/xvdb", 2112);
    let provisioner = harness.provisioner(FixedStats::megabytes(1024));

    provisioner
        .setup_ephemeral_disk(Utf8Path::new("/dev/sdb"))
        .expect("ephemeral setup should succeed");

    assert_eq!(
        harness.disks.calls(),
        vec![
            DiskCall::Partition {
                device: path("/dev/xvdb"),
                partitions: vec![
                    Partition::new(1024, PartitionType::Swap),
                    Partition::new(1088, PartitionType::Linux),
                ],
            },
            DiskCall::Format {
                partition: path("/dev/xvdb1"),
                fs_type: FileSystemType::Swap,
            },
            DiskCall::Format {
                partition: path("/dev/xvdb2"),
                fs_type: FileSystemType::Ext4,
            },
            DiskCall::Mount {
                partition: path("/dev/xvdb2"),
                mount_point: path("/var/vcap/data"),
            },
            DiskCall::SwapOn {
                partition: path("/dev/xvdb1"),
            },
        ]
    );
    assert_eq!(
        harness.runner.command_strings(),
        vec![
            "chown root:vcap /var/vcap/data/sys",
            "chown root:vcap /var/vcap/data/sys/log",
            "chown root:vcap /var/vcap/data/sys/run",
        ]
    );
    for dir in [
        "/var/vcap/data",
        "/var/vcap/data/sys/log",
        "/var/vcap/data/sys/run",
    ] {
        assert_eq!(harness.files.mode(dir), Some(0o750), "mode of {dir}");
    }
}

#[rstest]
fn small_ephemeral_disk_is_halved(harness: Harness) {
    harness.files.add_file("/dev/xvdb", "");
    harness.disks.set_device_size("/dev/xvdb", 1984);
    let provisioner = harness.provisioner(FixedStats::megabytes(1024));

    provisioner
        .setup_ephemeral_disk(Utf8Path::new("/dev/sdb"))
        .expect("ephemeral setup should succeed");

    assert_eq!(
        harness.disks.calls().first(),
        Some(&DiskCall::Partition {
            device: path("/dev/xvdb"),
            partitions: vec![
                Partition::new(992, PartitionType::Swap),
                Partition::new(992, PartitionType::Linux),
            ],
        })
    );
}

#[rstest]
fn ephemeral_setup_stops_at_the_first_failure(harness: Harness) {
    harness.files.add_file("/dev/xvdb", "");
    harness.disks.set_device_size("/dev/xvdb", 2112);
    harness.disks.fail_on("format");
    let provisioner = harness.provisioner(FixedStats::megabytes(1024));

    let err = provisioner
        .setup_ephemeral_disk(Utf8Path::new("/dev/sdb"))
        .expect_err("format failure should abort");

    assert!(
        matches!(err, DiskError::Primitive { ref action, .. } if action == "format /dev/xvdb1"),
        "unexpected error: {err}"
    );
    assert_eq!(harness.disks.calls().len(), 2);
    assert!(harness.runner.invocations().is_empty());
}

#[rstest]
fn unwritable_data_dir_stops_before_partitioning(harness: Harness) {
    harness.files.add_file("/dev/xvdb", "");
    harness.disks.set_device_size("/dev/xvdb", 2112);
    harness.files.fail_writes_to("/var/vcap/data");
    let provisioner = harness.provisioner(FixedStats::megabytes(1024));

    let err = provisioner
        .setup_ephemeral_disk(Utf8Path::new("/dev/sdb"))
        .expect_err("data dir failure should abort");

    assert!(matches!(err, DiskError::ConfigWrite(_)), "unexpected error: {err}");
    assert!(
        !harness
            .disks
            .calls()
            .iter()
            .any(|call| matches!(call, DiskCall::Partition { .. }))
    );
    assert!(harness.runner.invocations().is_empty());
}

#[rstest]
fn unreadable_memory_stats_are_malformed_state(harness: Harness) {
    harness.files.add_file("/dev/xvdb", "");
    harness.disks.set_device_size("/dev/xvdb", 2112);
    let provisioner = harness.provisioner(FixedStats::failing(
        crate::system::StatsError::Malformed(String::from("MemTotal entry is missing")),
    ));

    let err = provisioner
        .setup_ephemeral_disk(Utf8Path::new("/dev/sdb"))
        .expect_err("stats failure should abort");

    assert!(matches!(err, DiskError::MalformedState(_)), "unexpected error: {err}");
    assert!(harness.disks.calls().is_empty());
}

#[rstest]
fn missing_device_is_reported_after_the_resolver_times_out(harness: Harness) {
    let provisioner = harness.provisioner(FixedStats::megabytes(1024));

    let err = provisioner
        .setup_ephemeral_disk(Utf8Path::new("/dev/sdb"))
        .expect_err("missing device should fail");

    assert_eq!(
        err,
        DiskError::DeviceNotFound {
            requested: path("/dev/sdb"),
        }
    );
    assert_eq!(harness.clock.elapsed(), RESOLVE_TIMEOUT);
    assert!(harness.disks.calls().is_empty());
    assert!(!harness.files.has_dir("/var/vcap/data"));
}

#[rstest]
fn persistent_disk_gets_one_partition_covering_the_device(harness: Harness) {
    harness.files.add_file("/dev/vdf", "");
    let provisioner = harness.provisioner(FixedStats::megabytes(1024));

    provisioner
        .mount_persistent_disk(Utf8Path::new("/dev/sdf"), Utf8Path::new("/var/vcap/store"))
        .expect("mount should succeed");

    assert_eq!(
        harness.disks.calls(),
        vec![
            DiskCall::Partition {
                device: path("/dev/vdf"),
                partitions: vec![Partition::new(0, PartitionType::Linux)],
            },
            DiskCall::Format {
                partition: path("/dev/vdf1"),
                fs_type: FileSystemType::Ext4,
            },
            DiskCall::Mount {
                partition: path("/dev/vdf1"),
                mount_point: path("/var/vcap/store"),
            },
        ]
    );
    assert_eq!(harness.files.mode("/var/vcap/store"), Some(0o700));
}

#[rstest]
fn existing_mount_point_keeps_its_mode(harness: Harness) {
    harness.files.add_file("/dev/vdf", "");
    harness.files.add_dir("/var/vcap/store", 0o755);
    let provisioner = harness.provisioner(FixedStats::megabytes(1024));

    provisioner
        .mount_persistent_disk(Utf8Path::new("/dev/sdf"), Utf8Path::new("/var/vcap/store"))
        .expect("mount should succeed");

    assert_eq!(harness.files.mode("/var/vcap/store"), Some(0o755));
    assert!(harness.disks.is_tracked_mounted("/var/vcap/store"));
}

#[rstest]
fn unmount_reports_whether_anything_was_mounted(harness: Harness) {
    harness.files.add_file("/dev/xvdf", "");
    let provisioner = harness.provisioner(FixedStats::megabytes(1024));

    assert_eq!(
        provisioner.unmount_persistent_disk(Utf8Path::new("/dev/sdf")),
        Ok(false)
    );

    harness.disks.mark_mounted("/dev/xvdf1");
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
fn mount_state_is_queried_for_the_first_partition(harness: Harness) {
    harness.files.add_file("/dev/xvdf", "");
    let provisioner = harness.provisioner(FixedStats::megabytes(1024));

    assert_eq!(
        provisioner.is_device_path_mounted(Utf8Path::new("/dev/sdf")),
        Ok(false)
    );
    harness.disks.mark_mounted("/dev/xvdf1");
    assert_eq!(
        provisioner.is_device_path_mounted(Utf8Path::new("/dev/sdf")),
        Ok(true)
    );
}

#[rstest]
fn migration_copies_then_moves_the_new_disk(harness: Harness) {
    harness.disks.mark_mounted("/var/vcap/store");
    harness.disks.mark_mounted("/var/vcap/store_migration_target");
    let provisioner = harness.provisioner(FixedStats::megabytes(1024));

    provisioner
        .migrate_persistent_disk(
            Utf8Path::new("/var/vcap/store"),
            Utf8Path::new("/var/vcap/store_migration_target"),
        )
        .expect("migration should succeed");

    assert_eq!(
        harness.disks.calls(),
        vec![
            DiskCall::RemountReadonly {
                mount_point: path("/var/vcap/store"),
            },
            DiskCall::Unmount {
                target: path("/var/vcap/store"),
            },
            DiskCall::Remount {
                from: path("/var/vcap/store_migration_target"),
                to: path("/var/vcap/store"),
            },
        ]
    );
    let invocations = harness.runner.invocations();
    assert_eq!(invocations.len(), 1);
    assert_eq!(
        invocations.first().map(|call| call.argv()),
        Some(vec![
            String::from("sh"),
            String::from("-c"),
            String::from(
                "(tar -C /var/vcap/store -cf - .) | (tar -C /var/vcap/store_migration_target -xpf -)"
            ),
        ])
    );
    assert!(harness.disks.is_tracked_mounted("/var/vcap/store"));
    assert!(!harness.disks.is_tracked_mounted("/var/vcap/store_migration_target"));
}

#[rstest]
fn failed_copy_leaves_the_source_read_only(harness: Harness) {
    harness.runner.push_failure(2);
    let provisioner = harness.provisioner(FixedStats::megabytes(1024));

    let err = provisioner
        .migrate_persistent_disk(Utf8Path::new("/var/vcap/store"), Utf8Path::new("/mnt/new"))
        .expect_err("copy failure should abort");

    assert!(matches!(err, DiskError::Primitive { .. }), "unexpected error: {err}");
    assert_eq!(
        harness.disks.calls(),
        vec![DiskCall::RemountReadonly {
            mount_point: path("/var/vcap/store"),
        }]
    );
}

#[test]
fn copy_pipeline_escapes_awkward_paths() {
    assert_eq!(
        copy_pipeline(Utf8Path::new("/mnt/old disk"), Utf8Path::new("/mnt/new")),
        "(tar -C '/mnt/old disk' -cf - .) | (tar -C /mnt/new -xpf -)"
    );
}

#[rstest]
fn tmp_dir_is_handed_to_the_runtime_group(harness: Harness) {
    let provisioner = harness.provisioner(FixedStats::megabytes(1024));

    provisioner.setup_tmp_dir().expect("tmp setup should succeed");

    assert_eq!(
        harness.runner.command_strings(),
        vec!["chown root:vcap /tmp", "chmod 0770 /tmp"]
    );
}

#[test]
fn layout_derives_runtime_directories_from_the_base() {
    let layout = DirectoryLayout::new("/srv/agent", "agents");
    assert_eq!(layout.data_dir(), path("/srv/agent/data"));
    assert_eq!(layout.sys_log_dir(), path("/srv/agent/data/sys/log"));
    assert_eq!(layout.sys_run_dir(), path("/srv/agent/data/sys/run"));
    assert_eq!(layout.runtime_group(), "agents");
}
