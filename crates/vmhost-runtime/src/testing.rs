//! In-memory host used by unit tests.
//!
//! [`FakeHost`] implements both [`NamespaceOps`] and [`NetDriver`]. Each
//! namespace is a tempfile, so handles have real (dev, ino) identities, and
//! every driver call is recorded together with the namespace it ran in.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fs::File;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use vmhost_core::{Error, Result};

use crate::net::driver::{Link, NetDriver};
use crate::net::ops::NetlinkOps;
use crate::net::tap::TapConfig;
use crate::netns::sealed::RawSwitch;
use crate::netns::{NamespaceOps, NetNs, NsId};

#[derive(Debug, Default)]
struct FakeNs {
    label: String,
    path: PathBuf,
    id: Option<NsId>,
    links: BTreeMap<String, u32>,
    owners: BTreeMap<String, (u32, u32)>,
    qdiscs: BTreeSet<String>,
    redirects: Vec<(String, String)>,
}

#[derive(Debug, Default)]
struct HostState {
    namespaces: Vec<FakeNs>,
    current: usize,
    next_index: u32,
    calls: Vec<String>,
    switches: Vec<String>,
    fail_ops: HashSet<String>,
    fail_enter: HashSet<String>,
}

impl HostState {
    fn ns_mut(&mut self, label: &str) -> &mut FakeNs {
        self.namespaces
            .iter_mut()
            .find(|ns| ns.label == label)
            .unwrap_or_else(|| panic!("unknown fake namespace {label}"))
    }

    fn ns(&self, label: &str) -> &FakeNs {
        self.namespaces
            .iter()
            .find(|ns| ns.label == label)
            .unwrap_or_else(|| panic!("unknown fake namespace {label}"))
    }

    fn record(&mut self, op: &str, detail: String) -> Result<()> {
        let label = self.namespaces[self.current].label.clone();
        self.calls.push(format!("{label}: {op} {detail}"));
        if self.fail_ops.contains(op) {
            return Err(Error::CommandFailed {
                command: format!("{op} {detail}"),
                code: Some(2),
                stderr: "injected failure".to_string(),
            });
        }
        Ok(())
    }

    fn current_ns(&mut self) -> &mut FakeNs {
        let idx = self.current;
        &mut self.namespaces[idx]
    }

    fn require_link(&mut self, name: &str) -> Result<()> {
        if self.current_ns().links.contains_key(name) {
            Ok(())
        } else {
            Err(Error::LinkNotFound(name.to_string()))
        }
    }
}

/// Fake kernel: namespaces, links, qdiscs and filters, all in memory.
/// The first label passed to [`FakeHost::new`] is the caller's namespace.
#[derive(Debug)]
pub struct FakeHost {
    _dir: TempDir,
    state: RefCell<HostState>,
}

impl FakeHost {
    pub fn new(labels: &[&str]) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut state = HostState {
            next_index: 2,
            ..HostState::default()
        };
        for label in labels {
            let path = dir.path().join(label);
            File::create(&path).unwrap();
            let id = NetNs::open(&path).unwrap().id();
            state.namespaces.push(FakeNs {
                label: label.to_string(),
                path,
                id: Some(id),
                ..FakeNs::default()
            });
        }
        Self {
            _dir: dir,
            state: RefCell::new(state),
        }
    }

    pub fn ns_path(&self, label: &str) -> PathBuf {
        self.state.borrow().ns(label).path.clone()
    }

    pub fn current_label(&self) -> String {
        let state = self.state.borrow();
        state.namespaces[state.current].label.clone()
    }

    pub fn add_link(&self, label: &str, name: &str) {
        let mut state = self.state.borrow_mut();
        let index = state.next_index;
        state.next_index += 1;
        state.ns_mut(label).links.insert(name.to_string(), index);
    }

    pub fn add_qdisc(&self, label: &str, name: &str) {
        self.state
            .borrow_mut()
            .ns_mut(label)
            .qdiscs
            .insert(name.to_string());
    }

    pub fn has_link(&self, label: &str, name: &str) -> bool {
        self.state.borrow().ns(label).links.contains_key(name)
    }

    pub fn owner(&self, label: &str, name: &str) -> Option<(u32, u32)> {
        self.state.borrow().ns(label).owners.get(name).copied()
    }

    pub fn redirects(&self, label: &str) -> Vec<(String, String)> {
        self.state.borrow().ns(label).redirects.clone()
    }

    /// Driver calls as "<namespace>: <op> <detail>".
    pub fn calls(&self) -> Vec<String> {
        self.state.borrow().calls.clone()
    }

    /// Labels of every namespace entered, in order.
    pub fn switches(&self) -> Vec<String> {
        self.state.borrow().switches.clone()
    }

    /// Make every call to driver operation `op` fail.
    pub fn fail_on(&self, op: &str) {
        self.state.borrow_mut().fail_ops.insert(op.to_string());
    }

    /// Make switching into `label` fail.
    pub fn fail_enter(&self, label: &str) {
        self.state.borrow_mut().fail_enter.insert(label.to_string());
    }
}

impl NamespaceOps for FakeHost {
    fn current(&self) -> Result<NetNs> {
        NetNs::open(self.ns_path(&self.current_label()))
    }

    fn open(&self, path: &Path) -> Result<NetNs> {
        NetNs::open(path)
    }
}

impl RawSwitch for FakeHost {
    fn enter(&self, ns: &NetNs) -> Result<()> {
        let mut state = self.state.borrow_mut();
        let idx = state
            .namespaces
            .iter()
            .position(|n| n.id == Some(ns.id()))
            .ok_or_else(|| Error::Namespace(format!("{} is not a namespace", ns.path().display())))?;
        let label = state.namespaces[idx].label.clone();
        if state.fail_enter.contains(&label) {
            return Err(Error::Namespace(format!(
                "failed to set namespace {label}: EPERM"
            )));
        }
        state.current = idx;
        state.switches.push(label);
        Ok(())
    }
}

impl NetDriver for FakeHost {
    fn link_by_name(&self, name: &str) -> Result<Link> {
        let mut state = self.state.borrow_mut();
        state.record("link_by_name", name.to_string())?;
        state
            .current_ns()
            .links
            .get(name)
            .map(|&index| Link {
                name: name.to_string(),
                index,
            })
            .ok_or_else(|| Error::LinkNotFound(name.to_string()))
    }

    fn delete_link(&self, link: &Link) -> Result<()> {
        let mut state = self.state.borrow_mut();
        state.record("delete_link", link.name.clone())?;
        state.require_link(&link.name)?;
        let ns = state.current_ns();
        ns.links.remove(&link.name);
        ns.qdiscs.remove(&link.name);
        ns.redirects
            .retain(|(from, to)| *from != link.name && *to != link.name);
        Ok(())
    }

    fn add_tap(&self, tap: &TapConfig) -> Result<()> {
        let mut state = self.state.borrow_mut();
        state.record("add_tap", format!("{} {}:{}", tap.name, tap.uid, tap.gid))?;
        if state.current_ns().links.contains_key(&tap.name) {
            return Err(Error::AlreadyExists(tap.name.clone()));
        }
        let index = state.next_index;
        state.next_index += 1;
        let ns = state.current_ns();
        ns.links.insert(tap.name.clone(), index);
        ns.owners.insert(tap.name.clone(), (tap.uid, tap.gid));
        Ok(())
    }

    fn set_mtu(&self, link: &Link, mtu: u32) -> Result<()> {
        let mut state = self.state.borrow_mut();
        state.record("set_mtu", format!("{} {}", link.name, mtu))?;
        state.require_link(&link.name)
    }

    fn set_up(&self, link: &Link) -> Result<()> {
        let mut state = self.state.borrow_mut();
        state.record("set_up", link.name.clone())?;
        state.require_link(&link.name)
    }

    fn add_addr(&self, link: &Link, cidr: &str) -> Result<()> {
        let mut state = self.state.borrow_mut();
        state.record("add_addr", format!("{} {}", link.name, cidr))?;
        state.require_link(&link.name)
    }

    fn add_ingress_qdisc(&self, link: &Link) -> Result<()> {
        let mut state = self.state.borrow_mut();
        state.record("add_ingress_qdisc", link.name.clone())?;
        state.require_link(&link.name)?;
        if !state.current_ns().qdiscs.insert(link.name.clone()) {
            return Err(Error::AlreadyExists(format!("ingress qdisc on {}", link.name)));
        }
        Ok(())
    }

    fn add_mirred_redirect(&self, from: &Link, to: &Link) -> Result<()> {
        let mut state = self.state.borrow_mut();
        state.record("add_mirred_redirect", format!("{} -> {}", from.name, to.name))?;
        state.require_link(&from.name)?;
        state.require_link(&to.name)?;
        if !state.current_ns().qdiscs.contains(&from.name) {
            return Err(Error::CommandFailed {
                command: format!("filter add dev {}", from.name),
                code: Some(2),
                stderr: "Parent Qdisc doesn't exists".to_string(),
            });
        }
        state
            .current_ns()
            .redirects
            .push((from.name.clone(), to.name.clone()));
        Ok(())
    }
}

/// Scripted [`NetlinkOps`] for orchestration tests.
#[derive(Debug, Default)]
pub struct FakeNetlinkOps {
    calls: RefCell<Vec<String>>,
    fail: RefCell<HashSet<String>>,
    missing: RefCell<HashSet<String>>,
}

impl FakeNetlinkOps {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `op` ("attach_tap", "add_tc_redirect", ...) fail.
    pub fn fail_on(&self, op: &str) {
        self.fail.borrow_mut().insert(op.to_string());
    }

    /// Report `name` as absent from `get_link`/`remove_link`.
    pub fn missing_link(&self, name: &str) {
        self.missing.borrow_mut().insert(name.to_string());
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    fn record(&self, op: &str, detail: String) -> Result<()> {
        self.calls.borrow_mut().push(format!("{op} {detail}"));
        if self.fail.borrow().contains(op) {
            return Err(Error::CommandFailed {
                command: op.to_string(),
                code: Some(1),
                stderr: "injected failure".to_string(),
            });
        }
        Ok(())
    }
}

impl NetlinkOps for FakeNetlinkOps {
    fn get_link(&self, ns_path: &Path, name: &str) -> Result<Link> {
        self.record("get_link", format!("{} {}", ns_path.display(), name))?;
        if self.missing.borrow().contains(name) {
            return Err(Error::LinkNotFound(name.to_string()));
        }
        Ok(Link {
            name: name.to_string(),
            index: 2,
        })
    }

    fn remove_link(&self, ns_path: &Path, name: &str) -> Result<()> {
        self.record("remove_link", format!("{} {}", ns_path.display(), name))?;
        if self.missing.borrow().contains(name) {
            return Err(Error::LinkNotFound(name.to_string()));
        }
        Ok(())
    }

    fn attach_tap(&self, ns_path: &Path, tap: &TapConfig) -> Result<()> {
        self.record(
            "attach_tap",
            format!("{} {} mtu={}", ns_path.display(), tap.name, tap.mtu),
        )
    }

    fn add_tc_redirect(&self, ns_path: &Path, iface_a: &str, iface_b: &str) -> Result<()> {
        self.record(
            "add_tc_redirect",
            format!("{} {} {}", ns_path.display(), iface_a, iface_b),
        )
    }
}
