//! Gratuitous ARP announcements after a network restart.
//!
//! Peers may still cache the previous owner of an address, so once the
//! network service is back the agent announces each static address a few
//! times. The sequence runs on the Tokio runtime and never reports back to
//! the caller; failures end up in the log.

use std::ffi::OsString;
use std::net::Ipv4Addr;
use std::time::Duration;

use tracing::{debug, warn};

use crate::system::{CommandRunner, os_args};

/// Number of announcement rounds per interface.
pub const ARP_ROUNDS: usize = 6;

/// Default delay before the first round.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(500);

/// Default spacing before each round.
pub const DEFAULT_ANNOUNCE_INTERVAL: Duration = Duration::from_secs(1);

/// Delays governing the announcement sequence.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct AnnouncementTiming {
    /// Wait after the restart before the first round.
    pub settle_delay: Duration,
    /// Wait before every round.
    pub interval: Duration,
}

impl Default for AnnouncementTiming {
    fn default() -> Self {
        Self {
            settle_delay: DEFAULT_SETTLE_DELAY,
            interval: DEFAULT_ANNOUNCE_INTERVAL,
        }
    }
}

/// Interface and address to announce.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ArpTarget {
    /// Interface name, for example `eth0`.
    pub interface: String,
    /// Address owned by the interface.
    pub ip: Ipv4Addr,
}

impl ArpTarget {
    fn arping_args(&self) -> Vec<OsString> {
        os_args([
            "-c".to_owned(),
            "1".to_owned(),
            "-U".to_owned(),
            "-I".to_owned(),
            self.interface.clone(),
            self.ip.to_string(),
        ])
    }
}

/// Runs the announcement rounds for `targets`.
///
/// Each `arping` runs on the blocking pool.
pub async fn announce<R>(runner: R, targets: Vec<ArpTarget>, timing: AnnouncementTiming)
where
    R: CommandRunner + Clone + Send + 'static,
{
    tokio::time::sleep(timing.settle_delay).await;
    for round in 1..=ARP_ROUNDS {
        tokio::time::sleep(timing.interval).await;
        for target in &targets {
            debug!(round, interface = %target.interface, ip = %target.ip, "sending gratuitous ARP");
            send_arping(runner.clone(), target).await;
        }
    }
}

async fn send_arping<R>(runner: R, target: &ArpTarget)
where
    R: CommandRunner + Send + 'static,
{
    let args = target.arping_args();
    let outcome =
        tokio::task::spawn_blocking(move || runner.run_checked("arping", &args).map(drop)).await;
    match outcome {
        Ok(Ok(())) => {}
        Ok(Err(err)) => warn!(
            interface = %target.interface,
            ip = %target.ip,
            error = %err,
            "gratuitous ARP failed"
        ),
        Err(err) => warn!(
            interface = %target.interface,
            ip = %target.ip,
            error = %err,
            "gratuitous ARP task did not complete"
        ),
    }
}
