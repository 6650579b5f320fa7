//! Idempotent network configuration for DHCP and static interfaces.
//!
//! [`NetworkConfigurator`] renders the distribution's network files from
//! [`Networks`], restarts the network service when something changed and,
//! for static addresses, schedules gratuitous ARP announcements on the Tokio
//! runtime it was built with.

use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex, PoisonError};

use camino::Utf8Path;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::system::{CommandError, CommandRunner, FileStore, FileStoreError, os_args};

pub mod arp;
pub mod interfaces;
pub mod render;
pub mod settings;

pub use arp::{ARP_ROUNDS, AnnouncementTiming, ArpTarget};
pub use interfaces::interface_for_mac;
pub use render::StaticAddress;
pub use settings::{DNS_ROLE, Network, Networks, dns_servers};

/// Mode of every file the configurator writes.
pub const CONFIG_FILE_MODE: u32 = 0o644;

/// Errors raised while configuring the network.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum NetworkError {
    /// Raised when a configuration file cannot be read or written.
    #[error(transparent)]
    ConfigWrite(#[from] FileStoreError),
    /// Raised when a host command such as the service restart fails.
    #[error(transparent)]
    Command(#[from] CommandError),
    /// Raised when no interface carries the configured hardware address.
    #[error("no network interface has MAC address {mac}")]
    InterfaceNotFound {
        /// Hardware address that was searched for.
        mac: String,
    },
    /// Raised when settings cannot be interpreted.
    #[error("malformed network settings: {0}")]
    MalformedState(String),
}

fn parse_ipv4(network: &str, field: &str, value: &str) -> Result<Ipv4Addr, NetworkError> {
    value.trim().parse().map_err(|_| {
        NetworkError::MalformedState(format!(
            "network {network} has an invalid {field} address {value:?}"
        ))
    })
}

/// Parses the static addressing of `network`, if it has any.
///
/// # Errors
///
/// Returns [`NetworkError::MalformedState`] when an address does not parse
/// or an IP is given without a netmask.
pub fn static_address(
    name: &str,
    network: &Network,
) -> Result<Option<StaticAddress>, NetworkError> {
    let Some(ip) = network.ip.as_deref() else {
        return Ok(None);
    };
    let netmask = network.netmask.as_deref().ok_or_else(|| {
        NetworkError::MalformedState(format!("network {name} has an ip but no netmask"))
    })?;
    let gateway = network
        .gateway
        .as_deref()
        .map(|value| parse_ipv4(name, "gateway", value))
        .transpose()?;

    Ok(Some(StaticAddress {
        ip: parse_ipv4(name, "ip", ip)?,
        netmask: parse_ipv4(name, "netmask", netmask)?,
        gateway,
    }))
}

#[derive(Debug)]
struct InterfacePlan {
    interface: String,
    address: Option<StaticAddress>,
}

/// Applies network settings to the host.
#[derive(Debug)]
pub struct NetworkConfigurator<R, F> {
    runner: R,
    files: F,
    timing: AnnouncementTiming,
    runtime: Handle,
    announcements: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl<R, F> NetworkConfigurator<R, F>
where
    R: CommandRunner + Clone + Send + 'static,
    F: FileStore,
{
    /// Creates a configurator spawning announcements onto `runtime`.
    #[must_use]
    pub fn new(runner: R, files: F, timing: AnnouncementTiming, runtime: Handle) -> Self {
        Self {
            runner,
            files,
            timing,
            runtime,
            announcements: Arc::default(),
        }
    }

    /// Writes the dhclient configuration and restarts networking when it
    /// differs from what is on disk.
    ///
    /// Returns `true` when a change was applied.
    ///
    /// # Errors
    ///
    /// Returns [`NetworkError`] when the file cannot be read or written, or
    /// when the restart fails.
    pub fn setup_dhcp(&self, networks: &Networks) -> Result<bool, NetworkError> {
        let desired = render::dhclient_conf(&dns_servers(networks));
        let path = Utf8Path::new(render::DHCP_CONFIG_PATH);

        if self.files.read_if_exists(path)?.as_deref() == Some(desired.as_str()) {
            debug!(%path, "dhcp configuration already up to date");
            return Ok(false);
        }

        self.files.write_file(path, &desired, CONFIG_FILE_MODE)?;
        info!(%path, "dhcp configuration changed");
        self.restart_network()?;
        Ok(true)
    }

    /// Writes static interface and resolver configuration, restarts
    /// networking, then schedules gratuitous ARP in the background.
    ///
    /// Only networks with a MAC address are configured. Every interface is
    /// located and every address parsed before any file is written.
    ///
    /// # Errors
    ///
    /// Returns [`NetworkError::InterfaceNotFound`] when a MAC address matches
    /// no interface, [`NetworkError::MalformedState`] for unparseable
    /// addresses, or the file and command failures of the write and restart.
    pub fn setup_manual_networking(&self, networks: &Networks) -> Result<(), NetworkError> {
        let mut plans = Vec::new();
        for (name, network) in networks {
            let Some(mac) = network.mac.as_deref() else {
                continue;
            };
            let interface = interface_for_mac(&self.files, mac)?.ok_or_else(|| {
                NetworkError::InterfaceNotFound {
                    mac: mac.to_owned(),
                }
            })?;
            plans.push(InterfacePlan {
                interface,
                address: static_address(name, network)?,
            });
        }

        for plan in &plans {
            let path = render::ifcfg_path(&plan.interface);
            let contents = render::ifcfg(&plan.interface, plan.address.as_ref());
            self.files
                .write_file(Utf8Path::new(&path), &contents, CONFIG_FILE_MODE)?;
            debug!(interface = %plan.interface, %path, "wrote interface configuration");
        }

        let resolv = render::resolv_conf(&dns_servers(networks));
        self.files.write_file(
            Utf8Path::new(render::RESOLV_CONF_PATH),
            &resolv,
            CONFIG_FILE_MODE,
        )?;

        self.restart_network()?;

        let targets: Vec<ArpTarget> = plans
            .into_iter()
            .filter_map(|plan| {
                plan.address.map(|address| ArpTarget {
                    interface: plan.interface,
                    ip: address.ip,
                })
            })
            .collect();
        if !targets.is_empty() {
            self.spawn_announcements(targets);
        }
        Ok(())
    }

    /// Sets the running hostname and rewrites `/etc/hostname` and
    /// `/etc/hosts`.
    ///
    /// # Errors
    ///
    /// Returns [`NetworkError`] when the `hostname` command or a write fails.
    pub fn setup_hostname(&self, hostname: &str) -> Result<(), NetworkError> {
        self.runner.run_checked("hostname", &os_args([hostname]))?;
        self.files.write_file(
            Utf8Path::new(render::HOSTNAME_PATH),
            hostname,
            CONFIG_FILE_MODE,
        )?;
        self.files.write_file(
            Utf8Path::new(render::HOSTS_PATH),
            &render::etc_hosts(hostname),
            CONFIG_FILE_MODE,
        )?;
        info!(hostname, "hostname configured");
        Ok(())
    }

    /// Waits for every announcement task spawned so far.
    ///
    /// Meant for the process owner before exit; announcement failures are
    /// only logged.
    pub async fn wait_for_announcements(&self) {
        let pending: Vec<JoinHandle<()>> = std::mem::take(
            &mut *self
                .announcements
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for task in pending {
            if let Err(err) = task.await {
                warn!(error = %err, "announcement task did not complete");
            }
        }
    }

    fn restart_network(&self) -> Result<(), NetworkError> {
        self.runner
            .run_checked("service", &os_args(["network", "restart"]))?;
        info!("network service restarted");
        Ok(())
    }

    fn spawn_announcements(&self, targets: Vec<ArpTarget>) {
        debug!(count = targets.len(), "scheduling gratuitous ARP");
        let task = self
            .runtime
            .spawn(arp::announce(self.runner.clone(), targets, self.timing));
        self.announcements
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(task);
    }
}
