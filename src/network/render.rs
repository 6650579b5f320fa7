//! Text renderers for the files the network configurator owns.
//!
//! Output is compared byte-for-byte against what is already on disk, so
//! every renderer is deterministic for a given input.

use std::net::Ipv4Addr;

/// dhclient configuration path.
pub const DHCP_CONFIG_PATH: &str = "/etc/dhcp/dhclient.conf";
/// Resolver configuration path.
pub const RESOLV_CONF_PATH: &str = "/etc/resolv.conf";
/// Directory holding per-interface configuration files.
pub const IFCFG_DIR: &str = "/etc/sysconfig/network-scripts";
/// Persistent hostname path.
pub const HOSTNAME_PATH: &str = "/etc/hostname";
/// Static host table path.
pub const HOSTS_PATH: &str = "/etc/hosts";

const DHCP_PREAMBLE: &str = "# Generated by hostprep

option rfc3442-classless-static-routes code 121 = array of unsigned integer 8;

send host-name \"<hostname>\";

request subnet-mask, broadcast-address, time-offset, routers,
\tdomain-name, domain-name-servers, domain-search, host-name,
\tnetbios-name-servers, netbios-scope, interface-mtu,
\trfc3442-classless-static-routes, ntp-servers;

";

/// Static addressing for one interface.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct StaticAddress {
    /// Interface address.
    pub ip: Ipv4Addr,
    /// Subnet mask.
    pub netmask: Ipv4Addr,
    /// Default gateway, when one is configured.
    pub gateway: Option<Ipv4Addr>,
}

impl StaticAddress {
    /// Broadcast address of the subnet.
    #[must_use]
    pub fn broadcast(&self) -> Ipv4Addr {
        broadcast(self.ip, self.netmask)
    }
}

/// Computes `ip | !netmask`.
#[must_use]
pub fn broadcast(ip: Ipv4Addr, netmask: Ipv4Addr) -> Ipv4Addr {
    Ipv4Addr::from(u32::from(ip) | !u32::from(netmask))
}

/// Renders the dhclient configuration.
///
/// dhclient applies `prepend` options last-to-first, so servers are written
/// in reverse to end up in `dns` order.
#[must_use]
pub fn dhclient_conf(dns: &[String]) -> String {
    let mut text = String::from(DHCP_PREAMBLE);
    for server in dns.iter().rev() {
        text.push_str("prepend domain-name-servers ");
        text.push_str(server);
        text.push_str(";\n");
    }
    text
}

/// Path of the configuration file for `device`.
#[must_use]
pub fn ifcfg_path(device: &str) -> String {
    format!("{IFCFG_DIR}/ifcfg-{device}")
}

/// Renders an interface configuration file. `None` selects DHCP.
#[must_use]
pub fn ifcfg(device: &str, address: Option<&StaticAddress>) -> String {
    let mut lines = vec![format!("DEVICE={device}")];
    match address {
        Some(addr) => {
            lines.push(String::from("BOOTPROTO=static"));
            lines.push(format!("IPADDR={}", addr.ip));
            lines.push(format!("NETMASK={}", addr.netmask));
            lines.push(format!("BROADCAST={}", addr.broadcast()));
            if let Some(gateway) = addr.gateway {
                lines.push(format!("GATEWAY={gateway}"));
            }
        }
        None => lines.push(String::from("BOOTPROTO=dhcp")),
    }
    lines.push(String::from("ONBOOT=yes"));
    lines.join("\n")
}

/// Renders `/etc/resolv.conf`.
#[must_use]
pub fn resolv_conf(dns: &[String]) -> String {
    dns.iter()
        .map(|server| format!("nameserver {server}\n"))
        .collect()
}

/// Renders `/etc/hosts` for `hostname`.
#[must_use]
pub fn etc_hosts(hostname: &str) -> String {
    format!(
        "127.0.0.1 localhost {hostname}

# The following lines are desirable for IPv6 capable hosts
::1 localhost ip6-localhost ip6-loopback {hostname}
fe00::0 ip6-localnet
ff00::0 ip6-mcastprefix
ff02::1 ip6-allnodes
ff02::2 ip6-allrouters
ff02::3 ip6-allhosts
"
    )
}
