//! Shared network settings fixtures for behavioural tests.

use hostprep::network::{Network, Networks};

/// Hardware address of the interface the static fixture targets.
pub const PRIMARY_MAC: &str = "22:00:0a:1f:ac:2a";

/// A single `bosh` network with static addressing on [`PRIMARY_MAC`].
pub fn static_bosh_network() -> Networks {
    Networks::from([(
        String::from("bosh"),
        Network {
            default: vec![String::from("dns"), String::from("gateway")],
            dns: vec![String::from("10.80.130.2"), String::from("10.80.130.1")],
            ip: Some(String::from("192.168.195.6")),
            netmask: Some(String::from("255.255.255.0")),
            gateway: Some(String::from("192.168.195.1")),
            mac: Some(String::from(PRIMARY_MAC)),
        },
    )])
}
