//! Binary entry point for the hostprep CLI.

use std::io::{self, Write};
use std::process;

use camino::Utf8Path;
use clap::Parser;
use thiserror::Error;
use tokio::runtime::Handle;

use hostprep::config::{AgentConfig, ConfigError};
use hostprep::disk::{DeviceResolver, DiskError, DiskProvisioner, LinuxDiskManager};
use hostprep::logging;
use hostprep::network::{NetworkConfigurator, NetworkError, Networks};
use hostprep::system::{
    FileStore, HostFileStore, MeminfoStatsCollector, ProcessCommandRunner, SystemClock,
};

mod cli;

use cli::{Cli, DeviceArgs, HostnameArgs, MigrateArgs, MountArgs, SettingsArgs};

type HostProvisioner = DiskProvisioner<
    LinuxDiskManager<ProcessCommandRunner, HostFileStore>,
    ProcessCommandRunner,
    HostFileStore,
    MeminfoStatsCollector<HostFileStore>,
    SystemClock,
>;

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("disk error: {0}")]
    Disk(#[from] DiskError),
    #[error("network error: {0}")]
    Network(#[from] NetworkError),
    #[error("invalid network settings in {path}: {message}")]
    Settings { path: String, message: String },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    logging::init();
    let exit_code = match dispatch(cli).await {
        Ok(()) => 0,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

async fn dispatch(cli: Cli) -> Result<(), CliError> {
    let config = AgentConfig::load_without_cli_args()?;
    config.validate()?;

    match cli {
        Cli::Resolve(DeviceArgs { device }) => {
            let resolved = disk_provisioner(&config).resolve(Utf8Path::new(&device))?;
            writeln!(io::stdout(), "{resolved}").ok();
        }
        Cli::Ephemeral(DeviceArgs { device }) => {
            disk_provisioner(&config).setup_ephemeral_disk(Utf8Path::new(&device))?;
        }
        Cli::Mount(MountArgs {
            device,
            mount_point,
        }) => {
            disk_provisioner(&config)
                .mount_persistent_disk(Utf8Path::new(&device), Utf8Path::new(&mount_point))?;
        }
        Cli::Unmount(DeviceArgs { device }) => {
            let did_unmount =
                disk_provisioner(&config).unmount_persistent_disk(Utf8Path::new(&device))?;
            let outcome = if did_unmount { "unmounted" } else { "not mounted" };
            writeln!(io::stdout(), "{outcome}").ok();
        }
        Cli::Mounted(DeviceArgs { device }) => {
            let mounted =
                disk_provisioner(&config).is_device_path_mounted(Utf8Path::new(&device))?;
            writeln!(io::stdout(), "{mounted}").ok();
        }
        Cli::Migrate(MigrateArgs { from, to }) => {
            disk_provisioner(&config)
                .migrate_persistent_disk(Utf8Path::new(&from), Utf8Path::new(&to))?;
        }
        Cli::Dhcp(SettingsArgs { settings }) => {
            let networks = load_networks(&settings)?;
            let changed = network_configurator(&config).setup_dhcp(&networks)?;
            let outcome = if changed { "changed" } else { "unchanged" };
            writeln!(io::stdout(), "{outcome}").ok();
        }
        Cli::Network(SettingsArgs { settings }) => {
            let networks = load_networks(&settings)?;
            let configurator = network_configurator(&config);
            configurator.setup_manual_networking(&networks)?;
            configurator.wait_for_announcements().await;
        }
        Cli::Hostname(HostnameArgs { name }) => {
            network_configurator(&config).setup_hostname(&name)?;
        }
        Cli::TmpDir => disk_provisioner(&config).setup_tmp_dir()?,
    }
    Ok(())
}

fn disk_provisioner(config: &AgentConfig) -> HostProvisioner {
    DiskProvisioner::new(
        LinuxDiskManager::new(ProcessCommandRunner, HostFileStore),
        ProcessCommandRunner,
        MeminfoStatsCollector::new(HostFileStore),
        DeviceResolver::new(HostFileStore, SystemClock),
        config.layout(),
    )
}

fn network_configurator(
    config: &AgentConfig,
) -> NetworkConfigurator<ProcessCommandRunner, HostFileStore> {
    NetworkConfigurator::new(
        ProcessCommandRunner,
        HostFileStore,
        config.announcement_timing(),
        Handle::current(),
    )
}

fn load_networks(path: &str) -> Result<Networks, CliError> {
    let settings_error = |message: String| CliError::Settings {
        path: path.to_owned(),
        message,
    };
    let contents = HostFileStore
        .read_to_string(Utf8Path::new(path))
        .map_err(|err| settings_error(err.to_string()))?;
    parse_networks(&contents).map_err(settings_error)
}

fn parse_networks(contents: &str) -> Result<Networks, String> {
    serde_json::from_str(contents).map_err(|err| err.to_string())
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}
