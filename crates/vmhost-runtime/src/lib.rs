// vmhost-runtime: host side effects (shell tools, namespaces, tap/tc, overlay disks)
// Depends on vmhost-core for errors, config, naming and task sequencing.

pub mod disk;
pub mod net;
pub mod netns;
pub mod sandbox;
pub mod shell;
#[cfg(test)]
pub mod shell_mock;
#[cfg(test)]
mod testing;

pub use disk::{Device, OverlayDisk, create_overlay};
pub use net::{DefaultNetlinkOps, NetlinkOps, TapConfig};
pub use netns::{Netns, NsGuard};
pub use sandbox::{SandboxNet, setup_sandbox_network};
