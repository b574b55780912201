use serde::{Deserialize, Serialize};

/// Fixed capacity added on top of the base image size for guest writes.
pub const OVERLAY_HEADROOM_BYTES: u64 = 500_000_000;
/// Block devices and dm tables are measured in 512-byte sectors.
pub const SECTOR_SIZE: u64 = 512;
/// Snapshot exception chunk size, in sectors.
pub const SNAPSHOT_CHUNK_SECTORS: u64 = 8;
pub const MAPPER_DIR: &str = "/dev/mapper";

pub const DEFAULT_TAP_NAME: &str = "tap0";
pub const DEFAULT_MTU: u32 = 1500;
/// Interface the container runtime puts inside the sandbox namespace.
pub const DEFAULT_GUEST_IFACE: &str = "eth0";
/// Linux IFNAMSIZ minus the trailing NUL.
pub const IFNAMSIZ: usize = 15;

/// Host tool locations and privilege escalation.
///
/// Defaults resolve tools through `PATH`. Each field can be overridden with a
/// `VMHOST_*` environment variable via [`HostConfig::from_env`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    pub ip_bin: String,
    pub tc_bin: String,
    pub losetup_bin: String,
    pub dmsetup_bin: String,
    pub blockdev_bin: String,
    /// Prefix every host tool invocation with `sudo`.
    pub use_sudo: bool,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            ip_bin: "ip".to_string(),
            tc_bin: "tc".to_string(),
            losetup_bin: "losetup".to_string(),
            dmsetup_bin: "dmsetup".to_string(),
            blockdev_bin: "blockdev".to_string(),
            use_sudo: false,
        }
    }
}

impl HostConfig {
    /// Defaults with `VMHOST_IP`, `VMHOST_TC`, `VMHOST_LOSETUP`,
    /// `VMHOST_DMSETUP`, `VMHOST_BLOCKDEV` and `VMHOST_SUDO` applied.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`HostConfig::from_env`] with an explicit variable source.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let overrides: [(&str, &mut String); 5] = [
            ("VMHOST_IP", &mut config.ip_bin),
            ("VMHOST_TC", &mut config.tc_bin),
            ("VMHOST_LOSETUP", &mut config.losetup_bin),
            ("VMHOST_DMSETUP", &mut config.dmsetup_bin),
            ("VMHOST_BLOCKDEV", &mut config.blockdev_bin),
        ];
        for (key, field) in overrides {
            if let Some(value) = lookup(key).filter(|v| !v.trim().is_empty()) {
                *field = value;
            }
        }
        config.use_sudo = lookup("VMHOST_SUDO")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        config
    }
}
