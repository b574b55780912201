//! Bidirectional traffic mirroring between two links with tc.
//!
//! Each link gets an ingress qdisc and a match-all u32 filter whose mirred
//! action steals the packet onto the other link's egress. Together the two
//! rules splice the links without a bridge device.

use std::path::Path;

use tracing::{debug, info};
use vmhost_core::{Error, Result};

use super::driver::{Link, NetDriver};
use crate::netns::{NamespaceOps, Netns};

/// Install the mirror between `iface_a` and `iface_b` inside `ns_path`.
pub fn add_tc_redirect<O, D>(
    netns: &Netns<O>,
    driver: &D,
    ns_path: &Path,
    iface_a: &str,
    iface_b: &str,
) -> Result<()>
where
    O: NamespaceOps,
    D: NetDriver,
{
    if iface_a == iface_b {
        return Err(Error::InvalidInput(format!(
            "cannot mirror {} onto itself",
            iface_a
        )));
    }

    netns.run_by_path(ns_path, || install_mirror(driver, iface_a, iface_b))?;
    info!(
        netns = %ns_path.display(),
        a = iface_a,
        b = iface_b,
        "tc redirect installed"
    );
    Ok(())
}

/// Install both redirect rules in the current namespace.
pub fn install_mirror<D: NetDriver>(driver: &D, iface_a: &str, iface_b: &str) -> Result<()> {
    let a = driver.link_by_name(iface_a)?;
    let b = driver.link_by_name(iface_b)?;

    ensure_ingress_qdisc(driver, &a)?;
    ensure_ingress_qdisc(driver, &b)?;

    driver.add_mirred_redirect(&a, &b)?;
    driver.add_mirred_redirect(&b, &a)?;
    Ok(())
}

fn ensure_ingress_qdisc<D: NetDriver>(driver: &D, link: &Link) -> Result<()> {
    match driver.add_ingress_qdisc(link) {
        Err(Error::AlreadyExists(_)) => {
            debug!(link = %link.name, "ingress qdisc already present");
            Ok(())
        }
        other => other,
    }
}
