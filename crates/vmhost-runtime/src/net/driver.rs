use serde::{Deserialize, Serialize};
use tracing::debug;
use vmhost_core::config::HostConfig;
use vmhost_core::{Error, Result};

use super::tap::TapConfig;
use crate::shell;

/// A network interface resolved inside some namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub name: String,
    pub index: u32,
}

/// Link and traffic-control primitives acting on the calling thread's
/// current network namespace.
///
/// Callers switch namespaces first (see [`crate::netns::Netns`]); a driver
/// never switches on its own.
pub trait NetDriver {
    fn link_by_name(&self, name: &str) -> Result<Link>;
    fn delete_link(&self, link: &Link) -> Result<()>;
    /// Create a persistent tap device owned by `tap.uid`/`tap.gid`.
    fn add_tap(&self, tap: &TapConfig) -> Result<()>;
    fn set_mtu(&self, link: &Link, mtu: u32) -> Result<()>;
    fn set_up(&self, link: &Link) -> Result<()>;
    fn add_addr(&self, link: &Link, cidr: &str) -> Result<()>;
    /// Fails with [`Error::AlreadyExists`] if the link already has one.
    fn add_ingress_qdisc(&self, link: &Link) -> Result<()>;
    /// Match every packet entering `from` and steal it onto `to`'s egress.
    fn add_mirred_redirect(&self, from: &Link, to: &Link) -> Result<()>;
}

impl<T: NetDriver + ?Sized> NetDriver for &T {
    fn link_by_name(&self, name: &str) -> Result<Link> {
        (**self).link_by_name(name)
    }
    fn delete_link(&self, link: &Link) -> Result<()> {
        (**self).delete_link(link)
    }
    fn add_tap(&self, tap: &TapConfig) -> Result<()> {
        (**self).add_tap(tap)
    }
    fn set_mtu(&self, link: &Link, mtu: u32) -> Result<()> {
        (**self).set_mtu(link, mtu)
    }
    fn set_up(&self, link: &Link) -> Result<()> {
        (**self).set_up(link)
    }
    fn add_addr(&self, link: &Link, cidr: &str) -> Result<()> {
        (**self).add_addr(link, cidr)
    }
    fn add_ingress_qdisc(&self, link: &Link) -> Result<()> {
        (**self).add_ingress_qdisc(link)
    }
    fn add_mirred_redirect(&self, from: &Link, to: &Link) -> Result<()> {
        (**self).add_mirred_redirect(from, to)
    }
}

/// [`NetDriver`] backed by the iproute2 `ip` and `tc` tools.
#[derive(Debug, Clone, Default)]
pub struct IpRoute2 {
    config: HostConfig,
}

impl IpRoute2 {
    pub fn new(config: HostConfig) -> Self {
        Self { config }
    }

    fn ip(&self, args: &[&str], dev: &str) -> Result<String> {
        shell::run_tool_checked(&self.config, &self.config.ip_bin, args)
            .map_err(|e| classify(e, dev, Action::Modify))
    }

    fn tc(&self, args: &[&str], dev: &str) -> Result<String> {
        shell::run_tool_checked(&self.config, &self.config.tc_bin, args)
            .map_err(|e| classify(e, dev, Action::Modify))
    }

    fn ip_create(&self, args: &[&str], dev: &str) -> Result<String> {
        shell::run_tool_checked(&self.config, &self.config.ip_bin, args)
            .map_err(|e| classify(e, dev, Action::Create))
    }

    fn tc_create(&self, args: &[&str], dev: &str) -> Result<String> {
        shell::run_tool_checked(&self.config, &self.config.tc_bin, args)
            .map_err(|e| classify(e, dev, Action::Create))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    /// Adds a device or qdisc; EBUSY means the name is taken.
    Create,
    Modify,
}

/// Map iproute2 stderr onto the error kinds callers branch on.
fn classify(err: Error, dev: &str, action: Action) -> Error {
    let Error::CommandFailed { stderr, .. } = &err else {
        return err;
    };
    if stderr.contains("does not exist") || stderr.contains("Cannot find device") {
        return Error::LinkNotFound(dev.to_string());
    }
    let taken = stderr.contains("File exists")
        || stderr.contains("Exclusivity flag on")
        || (action == Action::Create && stderr.contains("Device or resource busy"));
    if taken {
        return Error::AlreadyExists(format!("{}: {}", dev, stderr));
    }
    err
}

/// Parse `ip -o link show` output: "12: tap0: <BROADCAST,...> mtu 1500 ..."
/// Veth peers render as "eth0@if13".
fn parse_link_line(line: &str) -> Option<Link> {
    let mut fields = line.splitn(3, ':');
    let index = fields.next()?.trim().parse().ok()?;
    let raw_name = fields.next()?.trim();
    let name = raw_name.split('@').next()?.to_string();
    if name.is_empty() {
        return None;
    }
    Some(Link { name, index })
}

impl NetDriver for IpRoute2 {
    fn link_by_name(&self, name: &str) -> Result<Link> {
        let out = self.ip(&["-o", "link", "show", "dev", name], name)?;
        let link = out
            .lines()
            .find_map(parse_link_line)
            .ok_or_else(|| Error::LinkNotFound(name.to_string()))?;
        debug!(link = %link.name, index = link.index, "resolved link");
        Ok(link)
    }

    fn delete_link(&self, link: &Link) -> Result<()> {
        self.ip(&["link", "del", "dev", &link.name], &link.name)?;
        Ok(())
    }

    fn add_tap(&self, tap: &TapConfig) -> Result<()> {
        let uid = tap.uid.to_string();
        let gid = tap.gid.to_string();
        self.ip_create(
            &[
                "tuntap", "add", "dev", &tap.name, "mode", "tap", "user", &uid, "group", &gid,
            ],
            &tap.name,
        )?;
        Ok(())
    }

    fn set_mtu(&self, link: &Link, mtu: u32) -> Result<()> {
        let mtu = mtu.to_string();
        self.ip(&["link", "set", "dev", &link.name, "mtu", &mtu], &link.name)?;
        Ok(())
    }

    fn set_up(&self, link: &Link) -> Result<()> {
        self.ip(&["link", "set", "dev", &link.name, "up"], &link.name)?;
        Ok(())
    }

    fn add_addr(&self, link: &Link, cidr: &str) -> Result<()> {
        self.ip(&["addr", "add", cidr, "dev", &link.name], &link.name)?;
        Ok(())
    }

    fn add_ingress_qdisc(&self, link: &Link) -> Result<()> {
        self.tc_create(&["qdisc", "add", "dev", &link.name, "ingress"], &link.name)?;
        Ok(())
    }

    fn add_mirred_redirect(&self, from: &Link, to: &Link) -> Result<()> {
        // mirred "redirect" is the egress mirror with TC_ACT_STOLEN
        self.tc(
            &[
                "filter", "add", "dev", &from.name, "parent", "ffff:", "protocol", "all", "u32",
                "match", "u32", "0", "0", "action", "mirred", "egress", "redirect", "dev",
                &to.name,
            ],
            &from.name,
        )?;
        Ok(())
    }
}
