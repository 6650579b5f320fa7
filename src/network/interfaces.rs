//! Interface discovery by hardware address.

use crate::system::{FileStore, FileStoreError};

/// Glob listing the kernel's network interfaces.
pub const SYS_CLASS_NET_GLOB: &str = "/sys/class/net/*";

/// Finds the interface whose hardware address equals `mac`, ignoring case.
///
/// Interfaces are scanned in name order and the first match wins.
///
/// # Errors
///
/// Returns [`FileStoreError`] when the interface list or an address file
/// cannot be read.
pub fn interface_for_mac<F: FileStore>(
    files: &F,
    mac: &str,
) -> Result<Option<String>, FileStoreError> {
    let wanted = mac.trim();
    for interface in files.glob(SYS_CLASS_NET_GLOB)? {
        let Some(name) = interface.file_name() else {
            continue;
        };
        let address_path = interface.join("address");
        let Some(address) = files.read_if_exists(&address_path)? else {
            continue;
        };
        if address.trim().eq_ignore_ascii_case(wanted) {
            return Ok(Some(name.to_owned()));
        }
    }
    Ok(None)
}
