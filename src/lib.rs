//! # vmhost: host-side provisioning for microVM sandboxes
//!
//! Facade crate that re-exports the vmhost workspace crates so consumers
//! can depend on a single `vmhost` library.
//!
//! ## Crate breakdown
//!
//! | Module | Crate | Purpose |
//! |--------|-------|---------|
//! | [`core`] | vmhost-core | Errors, config, naming, task sequencing, logging |
//! | [`runtime`] | vmhost-runtime | Shell tools, namespace switching, tap/tc, overlay disks |

pub use vmhost_core as core;
pub use vmhost_runtime as runtime;

pub use vmhost_core::config::HostConfig;
pub use vmhost_core::task::{Task, execute_tasks, run_tasks};
pub use vmhost_core::{Error, Result};
pub use vmhost_runtime::disk::{Device, OverlayDisk, create_overlay};
pub use vmhost_runtime::net::{DefaultNetlinkOps, NetlinkOps, TapConfig};
pub use vmhost_runtime::netns::Netns;
pub use vmhost_runtime::sandbox::{SandboxNet, setup_sandbox_network};
