//! Device path normalisation across hypervisor naming schemes.
//!
//! Configuration names disks the way the director sees them (`/dev/sdb`),
//! while Xen exposes them as `/dev/xvdb` and virtio as `/dev/vdb`. Nodes may
//! also appear a little after a hot-attach, so resolution polls for a short
//! fixed period before giving up.

use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use tracing::{debug, warn};

use crate::system::{Clock, FileStore};

/// Total time spent polling for a device node.
pub const RESOLVE_TIMEOUT: Duration = Duration::from_secs(1);

/// Delay between candidate scans.
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

const SCSI_PREFIX: &str = "/dev/sd";
const CANDIDATE_PREFIXES: [&str; 2] = ["/dev/xvd", "/dev/vd"];

/// Resolves requested device paths to existing device nodes.
#[derive(Clone, Debug)]
pub struct DeviceResolver<F, C> {
    files: F,
    clock: C,
}

impl<F: FileStore, C: Clock> DeviceResolver<F, C> {
    /// Creates a resolver polling through `files` and sleeping on `clock`.
    #[must_use]
    pub const fn new(files: F, clock: C) -> Self {
        Self { files, clock }
    }

    /// Returns the file store used for existence checks.
    #[must_use]
    pub const fn files(&self) -> &F {
        &self.files
    }

    /// Resolves `requested` to the highest-precedence existing candidate.
    ///
    /// Blocks for up to [`RESOLVE_TIMEOUT`], rescanning every
    /// [`POLL_INTERVAL`]. Returns `None` when no candidate appears in time.
    pub fn resolve(&self, requested: &Utf8Path) -> Option<Utf8PathBuf> {
        let candidates = candidate_paths(requested);
        let deadline = self.clock.now() + RESOLVE_TIMEOUT;

        loop {
            if let Some(found) = candidates.iter().find(|path| self.files.exists(path)) {
                debug!(%requested, resolved = %found, "resolved device path");
                return Some(found.clone());
            }

            let now = self.clock.now();
            if now >= deadline {
                warn!(%requested, ?candidates, "device did not appear before timeout");
                return None;
            }
            self.clock
                .sleep(deadline.saturating_duration_since(now).min(POLL_INTERVAL));
        }
    }
}

/// Builds the ordered candidate list for `requested`.
///
/// Only `/dev/sd*` names get alternates: the Xen and virtio spellings come
/// first, most likely first, and the requested path is the final fallback.
/// Any other name is already a kernel node name and resolves only to itself.
#[must_use]
pub fn candidate_paths(requested: &Utf8Path) -> Vec<Utf8PathBuf> {
    let Some(suffix) = drive_suffix(requested.as_str()) else {
        return vec![requested.to_path_buf()];
    };
    CANDIDATE_PREFIXES
        .iter()
        .map(|prefix| Utf8PathBuf::from(format!("{prefix}{suffix}")))
        .chain([requested.to_path_buf()])
        .collect()
}

fn drive_suffix(requested: &str) -> Option<&str> {
    requested
        .strip_prefix(SCSI_PREFIX)
        .filter(|suffix| !suffix.is_empty())
}
