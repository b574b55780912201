//! Network setup for one sandbox: a tap device spliced onto the interface
//! the container runtime already placed in the sandbox namespace.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use vmhost_core::Result;
use vmhost_core::config::DEFAULT_GUEST_IFACE;
use vmhost_core::task::{Task, execute_tasks};

use crate::net::ops::NetlinkOps;
use crate::net::tap::TapConfig;

/// Where and how to wire a sandbox's network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxNet {
    /// Path of the sandbox network namespace (e.g. `/proc/<pid>/ns/net`).
    pub ns_path: PathBuf,
    pub tap: TapConfig,
    /// Interface mirrored onto the tap.
    pub guest_iface: String,
}

impl SandboxNet {
    /// Default tap (`tap0`, MTU 1500) owned by `uid`/`gid`, mirrored with `eth0`.
    pub fn new(ns_path: impl Into<PathBuf>, uid: u32, gid: u32) -> Self {
        Self {
            ns_path: ns_path.into(),
            tap: TapConfig {
                uid,
                gid,
                ..TapConfig::default()
            },
            guest_iface: DEFAULT_GUEST_IFACE.to_string(),
        }
    }

    pub fn with_tap(mut self, tap: TapConfig) -> Self {
        self.tap = tap;
        self
    }

    pub fn with_guest_iface(mut self, iface: impl Into<String>) -> Self {
        self.guest_iface = iface.into();
        self
    }
}

/// Attach the tap, then mirror it with the guest interface.
///
/// If mirroring fails the tap is removed again and the mirroring error is
/// returned.
pub fn setup_sandbox_network<N: NetlinkOps>(ops: &N, net: &SandboxNet) -> Result<()> {
    let ns_path = net.ns_path.as_path();
    let tap_name = net.tap.name.as_str();

    let tasks = vec![
        Task::new(
            "attach tap",
            || ops.attach_tap(ns_path, &net.tap),
            || match ops.remove_link(ns_path, tap_name) {
                Err(e) if e.is_link_not_found() => {
                    warn!(tap = tap_name, "tap already gone during rollback");
                    Ok(())
                }
                other => other,
            },
        ),
        Task::irreversible("tc redirect", || {
            ops.add_tc_redirect(ns_path, &net.guest_iface, tap_name)
        }),
    ];

    execute_tasks(tasks)?;
    info!(
        netns = %ns_path.display(),
        tap = tap_name,
        guest_iface = %net.guest_iface,
        "sandbox network ready"
    );
    Ok(())
}
