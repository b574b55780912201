//! Error type shared by every vmhost component.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result type for vmhost operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while provisioning sandbox disks and networking
#[derive(Error, Debug)]
pub enum Error {
    /// Base image or overlay file could not be read, created, or resized.
    #[error("storage error on {}: {source}", path.display())]
    Storage {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("loop device error: {0}")]
    LoopDevice(String),

    #[error("device-mapper error: {0}")]
    DeviceMapper(String),

    #[error("namespace error: {0}")]
    Namespace(String),

    #[error("network namespace not found: {}", .0.display())]
    NamespaceNotFound(PathBuf),

    #[error("already switched into a network namespace on this thread")]
    NamespaceReentrant,

    /// The calling thread could not be returned to its original namespace.
    #[error("failed to restore original network namespace: {0}")]
    NamespaceRestore(String),

    #[error("target namespace {} is the caller's own namespace", .0.display())]
    SameNamespace(PathBuf),

    #[error("did not find expected network device with name {0:?}")]
    LinkNotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("failed to run {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("command {command:?} exited with {code:?}: {stderr}")]
    CommandFailed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("failed to read random bytes: {0}")]
    Entropy(String),
}

impl Error {
    pub fn storage(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Error::Storage {
            path: path.into(),
            source,
        }
    }

    /// True for errors meaning a link lookup came up empty.
    pub fn is_link_not_found(&self) -> bool {
        matches!(self, Error::LinkNotFound(_))
    }
}
