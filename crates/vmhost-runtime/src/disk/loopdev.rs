use std::path::{Path, PathBuf};

use tracing::{debug, info};
use vmhost_core::config::HostConfig;
use vmhost_core::{Error, Result};

use crate::shell;

/// A file attached to a `/dev/loopN` block device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopDevice {
    path: PathBuf,
    backing: PathBuf,
    read_only: bool,
}

impl LoopDevice {
    /// Attach `backing` to the first free loop device.
    pub fn attach(config: &HostConfig, backing: &Path, read_only: bool) -> Result<Self> {
        let file = backing.to_string_lossy();
        let mut args = vec!["--find", "--show"];
        if read_only {
            args.push("--read-only");
        }
        args.push(&*file);

        let out = shell::run_tool_checked(config, &config.losetup_bin, &args).map_err(|e| {
            Error::LoopDevice(format!("failed to attach {}: {}", backing.display(), e))
        })?;
        let path = out.lines().next().unwrap_or("").trim();
        if path.is_empty() {
            return Err(Error::LoopDevice(format!(
                "losetup printed no device for {}",
                backing.display()
            )));
        }

        info!(loop_dev = path, backing = %backing.display(), read_only, "loop device attached");
        Ok(Self {
            path: PathBuf::from(path),
            backing: backing.to_path_buf(),
            read_only,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn backing(&self) -> &Path {
        &self.backing
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Size in 512-byte sectors.
    pub fn sectors(&self, config: &HostConfig) -> Result<u64> {
        let dev = self.path.to_string_lossy();
        let out = shell::run_tool_checked(config, &config.blockdev_bin, &["--getsz", &*dev])
            .map_err(|e| Error::LoopDevice(format!("failed to size {}: {}", dev, e)))?;
        let sectors = out.trim().parse::<u64>().map_err(|e| {
            Error::LoopDevice(format!("unexpected size {:?} for {}: {}", out, dev, e))
        })?;
        debug!(loop_dev = %dev, sectors, "loop device size");
        Ok(sectors)
    }

    pub fn detach(&self, config: &HostConfig) -> Result<()> {
        let dev = self.path.to_string_lossy();
        shell::run_tool_checked(config, &config.losetup_bin, &["--detach", &*dev])
            .map_err(|e| Error::LoopDevice(format!("failed to detach {}: {}", dev, e)))?;
        info!(loop_dev = %dev, "loop device detached");
        Ok(())
    }
}
