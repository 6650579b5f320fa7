//! Network settings as delivered to the agent.

use std::collections::BTreeMap;

use serde::Deserialize;

/// Role name marking the network whose DNS servers take precedence.
pub const DNS_ROLE: &str = "dns";

/// Settings for one logical network.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct Network {
    /// Roles this network is the default for, such as `dns` or `gateway`.
    pub default: Vec<String>,
    /// DNS servers in preference order.
    pub dns: Vec<String>,
    /// Static IPv4 address; absent for DHCP-managed networks.
    pub ip: Option<String>,
    /// Dotted-quad netmask accompanying `ip`.
    pub netmask: Option<String>,
    /// Default gateway.
    pub gateway: Option<String>,
    /// MAC address of the interface carrying this network.
    pub mac: Option<String>,
}

impl Network {
    /// Returns `true` when this network is the default for `role`.
    #[must_use]
    pub fn is_default_for(&self, role: &str) -> bool {
        self.default.iter().any(|candidate| candidate == role)
    }
}

/// Networks keyed by logical name, iterated in name order.
pub type Networks = BTreeMap<String, Network>;

/// Collects DNS servers for the host.
///
/// Networks flagged as the DNS default are the only sources when any exist;
/// otherwise every network contributes. Lists are concatenated in network
/// name order and repeated addresses keep their first position.
#[must_use]
pub fn dns_servers(networks: &Networks) -> Vec<String> {
    let flagged: Vec<&Network> = networks
        .values()
        .filter(|network| network.is_default_for(DNS_ROLE))
        .collect();
    let sources = if flagged.is_empty() {
        networks.values().collect()
    } else {
        flagged
    };

    let mut servers: Vec<String> = Vec::new();
    for server in sources.into_iter().flat_map(|network| &network.dns) {
        if !servers.contains(server) {
            servers.push(server.clone());
        }
    }
    servers
}
