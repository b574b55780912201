use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;
use vmhost_core::config::{DEFAULT_MTU, DEFAULT_TAP_NAME};
use vmhost_core::naming::validate_if_name;
use vmhost_core::{Error, Result};

use super::driver::{Link, NetDriver};
use crate::netns::{NamespaceOps, Netns};

/// Smallest MTU the kernel accepts for IPv4 links.
const MIN_MTU: u32 = 68;

/// A tap device the VM process opens unprivileged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TapConfig {
    pub name: String,
    pub mtu: u32,
    pub uid: u32,
    pub gid: u32,
}

impl TapConfig {
    pub fn new(name: impl Into<String>, uid: u32, gid: u32) -> Self {
        Self {
            name: name.into(),
            mtu: DEFAULT_MTU,
            uid,
            gid,
        }
    }

    pub fn with_mtu(mut self, mtu: u32) -> Self {
        self.mtu = mtu;
        self
    }

    pub fn validate(&self) -> Result<()> {
        validate_if_name(&self.name)?;
        if self.mtu < MIN_MTU {
            return Err(Error::InvalidInput(format!(
                "tap {} mtu {} is below {}",
                self.name, self.mtu, MIN_MTU
            )));
        }
        Ok(())
    }
}

impl Default for TapConfig {
    fn default() -> Self {
        Self::new(DEFAULT_TAP_NAME, 0, 0)
    }
}

/// Create `tap` inside the namespace at `ns_path`.
///
/// Refuses to run when `ns_path` is the caller's own namespace, so a wrong
/// path can never put the tap on the host. Each step fails fast and nothing
/// is rolled back here; a half-created device is left for the caller's
/// compensation to remove.
pub fn attach_tap<O, D>(netns: &Netns<O>, driver: &D, ns_path: &Path, tap: &TapConfig) -> Result<()>
where
    O: NamespaceOps,
    D: NetDriver,
{
    tap.validate()?;

    let origin = netns.current()?;
    let target = netns.open(ns_path)?;
    if origin == target {
        return Err(Error::SameNamespace(ns_path.to_path_buf()));
    }

    let link = netns.run(&target, || create_tap(driver, tap))?;
    info!(
        tap = %link.name,
        index = link.index,
        mtu = tap.mtu,
        uid = tap.uid,
        gid = tap.gid,
        netns = %ns_path.display(),
        "tap device attached"
    );
    Ok(())
}

fn create_tap<D: NetDriver>(driver: &D, tap: &TapConfig) -> Result<Link> {
    driver.add_tap(tap)?;
    let link = driver.link_by_name(&tap.name)?;
    driver.set_mtu(&link, tap.mtu)?;
    driver.set_up(&link)?;
    Ok(link)
}
