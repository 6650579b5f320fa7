//! Behavioural tests for network configuration through the public API.

#[path = "common/network_fixtures.rs"]
mod network_fixtures;

use std::time::Duration;

use hostprep::AgentConfig;
use hostprep::network::render::{DHCP_CONFIG_PATH, RESOLV_CONF_PATH, ifcfg_path};
use hostprep::network::{ARP_ROUNDS, Network, NetworkConfigurator, NetworkError, Networks};
use hostprep::test_support::{MemoryFileStore, ScriptedRunner};
use tokio::runtime::Handle;
use tokio::time::Instant;

use network_fixtures::{PRIMARY_MAC, static_bosh_network};

const PRIMARY_ARPING: &str = "arping -c 1 -U -I eth0 192.168.195.6";

fn configurator(
    runner: &ScriptedRunner,
    files: &MemoryFileStore,
    config: &AgentConfig,
) -> NetworkConfigurator<ScriptedRunner, MemoryFileStore> {
    NetworkConfigurator::new(
        runner.clone(),
        files.clone(),
        config.announcement_timing(),
        Handle::current(),
    )
}

fn host_with_primary_interface() -> MemoryFileStore {
    let files = MemoryFileStore::new();
    files.add_file("/sys/class/net/eth0/address", format!("{PRIMARY_MAC}\n"));
    files.add_file("/sys/class/net/lo/address", "00:00:00:00:00:00\n");
    files
}

#[tokio::test(start_paused = true)]
async fn configured_timing_drives_the_announcement_schedule() {
    let runner = ScriptedRunner::succeeding();
    let files = host_with_primary_interface();
    let config = AgentConfig {
        arp_announce_interval_ms: 250,
        network_operation_delay_ms: 100,
        ..AgentConfig::default()
    };
    let network = configurator(&runner, &files, &config);
    let started = Instant::now();

    network
        .setup_manual_networking(&static_bosh_network())
        .expect("manual networking should succeed");
    network.wait_for_announcements().await;

    assert_eq!(started.elapsed(), Duration::from_millis(1600));
    assert_eq!(runner.invocations().len(), 1 + ARP_ROUNDS);
}

#[tokio::test(start_paused = true)]
async fn failed_announcements_are_logged_and_skipped() {
    let runner = ScriptedRunner::succeeding();
    runner.push_success();
    runner.push_failure(2);
    runner.push_failure(2);
    let files = host_with_primary_interface();
    let network = configurator(&runner, &files, &AgentConfig::default());

    network
        .setup_manual_networking(&static_bosh_network())
        .expect("restart succeeds even though ARP fails");
    network.wait_for_announcements().await;

    let arpings: Vec<String> = runner.command_strings().into_iter().skip(1).collect();
    assert_eq!(arpings.len(), ARP_ROUNDS);
    assert!(arpings.iter().all(|command| command == PRIMARY_ARPING));
}

#[tokio::test(start_paused = true)]
async fn only_static_interfaces_are_announced() {
    let runner = ScriptedRunner::succeeding();
    let files = host_with_primary_interface();
    files.add_file("/sys/class/net/eth1/address", "22:00:0a:1f:ac:2b\n");
    let mut networks = static_bosh_network();
    networks.insert(
        String::from("dynamic"),
        Network {
            mac: Some(String::from("22:00:0a:1f:ac:2b")),
            ..Network::default()
        },
    );
    let network = configurator(&runner, &files, &AgentConfig::default());

    network
        .setup_manual_networking(&networks)
        .expect("mixed networks should configure");
    network.wait_for_announcements().await;

    assert!(
        files
            .contents(ifcfg_path("eth1"))
            .is_some_and(|contents| contents.contains("BOOTPROTO=dhcp"))
    );
    assert!(
        files
            .contents(ifcfg_path("eth0"))
            .is_some_and(|contents| contents.contains("BOOTPROTO=static"))
    );
    let commands = runner.command_strings();
    assert_eq!(commands.len(), 1 + ARP_ROUNDS);
    assert!(commands.iter().skip(1).all(|command| command == PRIMARY_ARPING));
}

#[tokio::test]
async fn restart_failure_cancels_announcements() {
    let runner = ScriptedRunner::new();
    runner.push_failure(1);
    let files = host_with_primary_interface();
    let network = configurator(&runner, &files, &AgentConfig::default());

    let err = network
        .setup_manual_networking(&static_bosh_network())
        .expect_err("restart failure should surface");
    network.wait_for_announcements().await;

    assert!(matches!(err, NetworkError::Command(_)), "unexpected error: {err}");
    assert_eq!(runner.command_strings(), vec!["service network restart"]);
    assert_eq!(
        files.contents(RESOLV_CONF_PATH).as_deref(),
        Some("nameserver 10.80.130.2\nnameserver 10.80.130.1\n")
    );
}

#[tokio::test]
async fn dhcp_rewrites_only_when_dns_changes() {
    let runner = ScriptedRunner::succeeding();
    let files = MemoryFileStore::new();
    let network = configurator(&runner, &files, &AgentConfig::default());
    let mut networks: Networks = static_bosh_network();

    assert_eq!(network.setup_dhcp(&networks), Ok(true));
    assert_eq!(network.setup_dhcp(&networks), Ok(false));

    if let Some(bosh) = networks.get_mut("bosh") {
        bosh.dns.push(String::from("10.80.130.3"));
    }
    assert_eq!(network.setup_dhcp(&networks), Ok(true));

    assert_eq!(files.write_count(DHCP_CONFIG_PATH), 2);
    assert_eq!(
        runner.command_strings(),
        vec!["service network restart", "service network restart"]
    );
    assert!(
        files
            .contents(DHCP_CONFIG_PATH)
            .is_some_and(|contents| contents.contains("prepend domain-name-servers 10.80.130.3;"))
    );
}
