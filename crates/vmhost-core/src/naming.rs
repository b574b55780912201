use std::path::{Path, PathBuf};

use rand::RngCore;
use rand::rngs::OsRng;

use crate::config::{IFNAMSIZ, MAPPER_DIR};
use crate::error::{Error, Result};

/// Bytes of entropy in an overlay id (96 bits).
const ID_BYTES: usize = 12;

/// Generate an overlay id: 24 uppercase hex chars from the OS CSPRNG.
///
/// Device-mapper names are host-global, so uniqueness rests entirely on
/// this id. Never swap in a seeded or thread-local generator.
pub fn generate_id() -> Result<String> {
    let mut bytes = [0u8; ID_BYTES];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|e| Error::Entropy(e.to_string()))?;
    Ok(bytes.iter().map(|b| format!("{:02X}", b)).collect())
}

/// dm name of the linear+zero target over the base image.
pub fn base_dm_name(id: &str) -> String {
    format!("base-{}", id)
}

/// dm name of the writable snapshot target handed to the guest.
pub fn overlay_dm_name(id: &str) -> String {
    format!("overlay-{}", id)
}

/// Overlay file name: image-<id>.diff
pub fn overlay_file_name(id: &str) -> String {
    format!("image-{}.diff", id)
}

/// `/dev/mapper/<name>`
pub fn mapper_path(dm_name: &str) -> PathBuf {
    Path::new(MAPPER_DIR).join(dm_name)
}

/// Network namespace path of a process: /proc/<pid>/ns/net
pub fn ns_path_by_pid(pid: u32) -> PathBuf {
    ns_path_by_pid_with_proc("/proc", pid)
}

/// Same as [`ns_path_by_pid`] with a custom procfs mount point.
pub fn ns_path_by_pid_with_proc(proc_path: impl AsRef<Path>, pid: u32) -> PathBuf {
    proc_path
        .as_ref()
        .join(pid.to_string())
        .join("ns")
        .join("net")
}

/// Validate a network interface name: 1-15 bytes, no '/', whitespace, or ':'.
pub fn validate_if_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > IFNAMSIZ {
        return Err(Error::InvalidInput(format!(
            "interface name must be 1-{} bytes, got {:?}",
            IFNAMSIZ, name
        )));
    }
    if name == "." || name == ".." {
        return Err(Error::InvalidInput(format!(
            "interface name {:?} is reserved",
            name
        )));
    }
    if name
        .chars()
        .any(|c| c == '/' || c == ':' || c.is_whitespace() || c.is_control())
    {
        return Err(Error::InvalidInput(format!(
            "interface name contains an invalid character: {:?}",
            name
        )));
    }
    Ok(())
}
