//! Scoped network-namespace switching.
//!
//! Namespace membership belongs to an OS thread, not the process. Work runs
//! synchronously on the calling thread while an [`NsGuard`] holds it in the
//! target namespace; the guard is `!Send` and restores the original
//! namespace when dropped, on every exit path including panics. Child
//! processes spawned in between inherit the switched namespace.
//!
//! Async callers must enter from a blocking thread (`spawn_blocking`) so the
//! switched thread never runs unrelated tasks.

use std::cell::Cell;
use std::fs::File;
use std::io;
use std::marker::PhantomData;
use std::os::fd::{AsFd, BorrowedFd};
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use nix::sched::{CloneFlags, setns};
use tracing::{debug, error};
use vmhost_core::{Error, Result};

use crate::net::driver::{Link, NetDriver};

/// The calling thread's own network namespace.
pub const THREAD_NS_PATH: &str = "/proc/thread-self/ns/net";

/// Identity of a namespace: the (device, inode) pair of its nsfs file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NsId {
    pub dev: u64,
    pub ino: u64,
}

/// An open handle on a network namespace.
#[derive(Debug)]
pub struct NetNs {
    file: File,
    id: NsId,
    path: PathBuf,
}

impl NetNs {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => Error::NamespaceNotFound(path.to_path_buf()),
            _ => Error::Namespace(format!("failed to open {}: {}", path.display(), e)),
        })?;
        let meta = file
            .metadata()
            .map_err(|e| Error::Namespace(format!("failed to stat {}: {}", path.display(), e)))?;
        Ok(Self {
            file,
            id: NsId {
                dev: meta.dev(),
                ino: meta.ino(),
            },
            path: path.to_path_buf(),
        })
    }

    pub fn id(&self) -> NsId {
        self.id
    }

    /// Path the handle was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PartialEq for NetNs {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for NetNs {}

impl AsFd for NetNs {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.file.as_fd()
    }
}

pub(crate) mod sealed {
    use super::NetNs;
    use vmhost_core::Result;

    /// The raw thread switch. Unnameable outside this crate, so the only
    /// way to switch is through [`super::NsGuard`], which always restores.
    pub trait RawSwitch {
        /// Move the calling thread into `ns`.
        fn enter(&self, ns: &NetNs) -> Result<()>;
    }

    impl<T: RawSwitch + ?Sized> RawSwitch for &T {
        fn enter(&self, ns: &NetNs) -> Result<()> {
            (**self).enter(ns)
        }
    }
}

use sealed::RawSwitch;

/// Kernel namespace operations behind [`Netns`].
///
/// Sealed: the switch itself is not callable from outside this crate.
///
/// ```compile_fail
/// use vmhost_runtime::netns::{HostNamespaces, NetNs};
///
/// let ns = NetNs::open("/proc/self/ns/net").unwrap();
/// HostNamespaces.enter(&ns).unwrap();
/// ```
pub trait NamespaceOps: sealed::RawSwitch {
    /// Handle on the calling thread's current network namespace.
    fn current(&self) -> Result<NetNs>;
    fn open(&self, path: &Path) -> Result<NetNs>;
}

impl<T: NamespaceOps + ?Sized> NamespaceOps for &T {
    fn current(&self) -> Result<NetNs> {
        (**self).current()
    }
    fn open(&self, path: &Path) -> Result<NetNs> {
        (**self).open(path)
    }
}

/// [`NamespaceOps`] using procfs and `setns(2)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostNamespaces;

impl NamespaceOps for HostNamespaces {
    fn current(&self) -> Result<NetNs> {
        NetNs::open(THREAD_NS_PATH).map_err(|e| match e {
            Error::NamespaceNotFound(path) => Error::Namespace(format!(
                "failed to get current namespace: {} is missing",
                path.display()
            )),
            other => other,
        })
    }

    fn open(&self, path: &Path) -> Result<NetNs> {
        NetNs::open(path)
    }
}

impl RawSwitch for HostNamespaces {
    fn enter(&self, ns: &NetNs) -> Result<()> {
        setns(ns.as_fd(), CloneFlags::CLONE_NEWNET).map_err(|errno| {
            Error::Namespace(format!(
                "failed to set namespace {}: {}",
                ns.path().display(),
                errno
            ))
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ThreadState {
    Home,
    Switched,
    /// A restore failed; the thread is stranded in a foreign namespace.
    Stranded,
}

thread_local! {
    static STATE: Cell<ThreadState> = const { Cell::new(ThreadState::Home) };
}

/// Proof that the current thread is switched into a namespace.
///
/// Only [`NsGuard::enter`] constructs one. Dropping it switches back.
#[must_use = "dropping the guard immediately switches back"]
pub struct NsGuard<'a, O: NamespaceOps> {
    ops: &'a O,
    origin: Option<NetNs>,
    // !Send: namespace membership must stay with this OS thread
    _thread: PhantomData<*const ()>,
}

impl<'a, O: NamespaceOps> NsGuard<'a, O> {
    pub fn enter(ops: &'a O, target: &NetNs) -> Result<Self> {
        match STATE.with(Cell::get) {
            ThreadState::Home => {}
            ThreadState::Switched => return Err(Error::NamespaceReentrant),
            ThreadState::Stranded => {
                return Err(Error::NamespaceRestore(
                    "thread was not returned to its namespace by an earlier switch".to_string(),
                ));
            }
        }

        let origin = ops.current()?;
        ops.enter(target)?;
        STATE.with(|s| s.set(ThreadState::Switched));
        debug!(netns = %target.path().display(), "switched network namespace");

        Ok(Self {
            ops,
            origin: Some(origin),
            _thread: PhantomData,
        })
    }

    /// Switch back, reporting a failed restore.
    pub fn exit(mut self) -> Result<()> {
        self.restore()
    }

    fn restore(&mut self) -> Result<()> {
        let Some(origin) = self.origin.take() else {
            return Ok(());
        };
        match self.ops.enter(&origin) {
            Ok(()) => {
                STATE.with(|s| s.set(ThreadState::Home));
                debug!(netns = %origin.path().display(), "restored network namespace");
                Ok(())
            }
            Err(e) => {
                STATE.with(|s| s.set(ThreadState::Stranded));
                Err(Error::NamespaceRestore(e.to_string()))
            }
        }
    }
}

impl<O: NamespaceOps> Drop for NsGuard<'_, O> {
    fn drop(&mut self) {
        if let Err(e) = self.restore() {
            error!(error = %e, "thread left in foreign network namespace");
        }
    }
}

/// Runs work inside other network namespaces.
#[derive(Debug, Clone, Default)]
pub struct Netns<O = HostNamespaces> {
    ops: O,
}

impl<O: NamespaceOps> Netns<O> {
    pub fn new(ops: O) -> Self {
        Self { ops }
    }

    pub fn current(&self) -> Result<NetNs> {
        self.ops.current()
    }

    pub fn open(&self, path: &Path) -> Result<NetNs> {
        self.ops.open(path)
    }

    /// Run `work` inside `ns`, then restore the caller's namespace.
    ///
    /// The work's own error is returned unchanged. A failed restore is
    /// returned only when the work succeeded; otherwise it is logged.
    /// Not reentrant: a nested call on the same thread fails with
    /// [`Error::NamespaceReentrant`] without switching.
    pub fn run<T, F>(&self, ns: &NetNs, work: F) -> Result<T>
    where
        F: FnOnce() -> Result<T>,
    {
        let guard = NsGuard::enter(&self.ops, ns)?;
        let result = work();
        let restored = guard.exit();

        match (result, restored) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(restore)) => Err(restore),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(restore)) => {
                error!(error = %restore, work_error = %e, "namespace restore failed after work error");
                Err(e)
            }
        }
    }

    /// [`Netns::run`] with the namespace given by path.
    pub fn run_by_path<T, F>(&self, path: &Path, work: F) -> Result<T>
    where
        F: FnOnce() -> Result<T>,
    {
        let ns = self.open(path)?;
        self.run(&ns, work)
    }

    /// [`Netns::run`] with `if_name` resolved inside the namespace first.
    /// A missing interface is [`Error::LinkNotFound`].
    pub fn run_with_link<T, D, F>(&self, ns: &NetNs, driver: &D, if_name: &str, work: F) -> Result<T>
    where
        D: NetDriver,
        F: FnOnce(&Link) -> Result<T>,
    {
        self.run(ns, || {
            let link = driver.link_by_name(if_name)?;
            work(&link)
        })
    }
}
