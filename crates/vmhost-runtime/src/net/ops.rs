use std::path::Path;

use tracing::info;
use vmhost_core::Result;
use vmhost_core::config::HostConfig;

use super::driver::{IpRoute2, Link, NetDriver};
use super::tap::{self, TapConfig};
use super::tc;
use crate::netns::{HostNamespaces, NamespaceOps, Netns};

/// Namespace-scoped network operations used by sandbox setup.
pub trait NetlinkOps {
    fn get_link(&self, ns_path: &Path, name: &str) -> Result<Link>;
    fn remove_link(&self, ns_path: &Path, name: &str) -> Result<()>;
    fn attach_tap(&self, ns_path: &Path, tap: &TapConfig) -> Result<()>;
    fn add_tc_redirect(&self, ns_path: &Path, iface_a: &str, iface_b: &str) -> Result<()>;
}

/// Production [`NetlinkOps`]: real `setns` switching plus an iproute2 driver.
#[derive(Debug, Clone, Default)]
pub struct DefaultNetlinkOps<O = HostNamespaces, D = IpRoute2> {
    netns: Netns<O>,
    driver: D,
}

impl DefaultNetlinkOps {
    pub fn new(config: HostConfig) -> Self {
        Self::with_parts(Netns::default(), IpRoute2::new(config))
    }
}

impl<O, D> DefaultNetlinkOps<O, D>
where
    O: NamespaceOps,
    D: NetDriver,
{
    pub fn with_parts(netns: Netns<O>, driver: D) -> Self {
        Self { netns, driver }
    }

    /// Assign `cidr` (e.g. "172.16.0.1/30") to `name` inside `ns_path`.
    pub fn add_link_addr(&self, ns_path: &Path, name: &str, cidr: &str) -> Result<()> {
        let ns = self.netns.open(ns_path)?;
        self.netns
            .run_with_link(&ns, &self.driver, name, |link| {
                self.driver.add_addr(link, cidr)
            })?;
        info!(link = name, cidr, netns = %ns_path.display(), "address added");
        Ok(())
    }
}

impl<O, D> NetlinkOps for DefaultNetlinkOps<O, D>
where
    O: NamespaceOps,
    D: NetDriver,
{
    fn get_link(&self, ns_path: &Path, name: &str) -> Result<Link> {
        let ns = self.netns.open(ns_path)?;
        self.netns
            .run_with_link(&ns, &self.driver, name, |link| Ok(link.clone()))
    }

    fn remove_link(&self, ns_path: &Path, name: &str) -> Result<()> {
        let ns = self.netns.open(ns_path)?;
        self.netns
            .run_with_link(&ns, &self.driver, name, |link| {
                self.driver.delete_link(link)
            })?;
        info!(link = name, netns = %ns_path.display(), "link removed");
        Ok(())
    }

    fn attach_tap(&self, ns_path: &Path, tap: &TapConfig) -> Result<()> {
        tap::attach_tap(&self.netns, &self.driver, ns_path, tap)
    }

    fn add_tc_redirect(&self, ns_path: &Path, iface_a: &str, iface_b: &str) -> Result<()> {
        tc::add_tc_redirect(&self.netns, &self.driver, ns_path, iface_a, iface_b)
    }
}
