//! Copy-on-write root disks for sandboxes.
//!
//! The base image is attached read-only and padded with a zero target to the
//! overlay's capacity (`base-<ID>`). A persistent dm snapshot over it stores
//! every guest write in a sparse per-sandbox file (`overlay-<ID>`), so the
//! base image is never modified and can be shared by many sandboxes.

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use vmhost_core::config::{HostConfig, OVERLAY_HEADROOM_BYTES};
use vmhost_core::naming::{
    base_dm_name, generate_id, mapper_path, overlay_dm_name, overlay_file_name,
};
use vmhost_core::task::Saga;
use vmhost_core::{Error, Result};

use super::dm;
use super::loopdev::LoopDevice;

/// What the VM launcher needs to know about a provisioned disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverlayDisk {
    pub id: String,
    pub device_path: PathBuf,
    pub overlay_file: PathBuf,
}

/// A provisioned overlay disk. Released only by [`Device::cleanup`].
#[derive(Debug)]
#[must_use = "a Device holds loop and dm devices until cleanup is called"]
pub struct Device {
    id: String,
    base_loop: LoopDevice,
    overlay_loop: LoopDevice,
    base_dm: String,
    overlay_dm: String,
    overlay_file: PathBuf,
}

impl Device {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// `/dev/mapper/overlay-<ID>`, the block device handed to the guest.
    pub fn path(&self) -> PathBuf {
        mapper_path(&self.overlay_dm)
    }

    pub fn base_loop(&self) -> &LoopDevice {
        &self.base_loop
    }

    pub fn overlay_loop(&self) -> &LoopDevice {
        &self.overlay_loop
    }

    pub fn base_dm_name(&self) -> &str {
        &self.base_dm
    }

    pub fn overlay_dm_name(&self) -> &str {
        &self.overlay_dm
    }

    pub fn overlay_file(&self) -> &Path {
        &self.overlay_file
    }

    pub fn summary(&self) -> OverlayDisk {
        OverlayDisk {
            id: self.id.clone(),
            device_path: self.path(),
            overlay_file: self.overlay_file.clone(),
        }
    }

    /// Tear down in dependency order: snapshot target, base target, overlay
    /// loop, base loop, overlay file.
    ///
    /// Every step runs even if an earlier one fails. The first error is
    /// returned; later ones are logged.
    pub fn cleanup(self, config: &HostConfig) -> Result<()> {
        let mut first: Option<Error> = None;
        let mut record = |step: &str, result: Result<()>| {
            if let Err(e) = result {
                warn!(overlay = %self.id, step, error = %e, "cleanup step failed");
                first.get_or_insert(e);
            }
        };

        record("remove overlay target", dm::remove(config, &self.overlay_dm));
        record("remove base target", dm::remove(config, &self.base_dm));
        record("detach overlay loop", self.overlay_loop.detach(config));
        record("detach base loop", self.base_loop.detach(config));
        record(
            "remove overlay file",
            fs::remove_file(&self.overlay_file).map_err(|e| Error::storage(&self.overlay_file, e)),
        );

        match first {
            Some(e) => Err(e),
            None => {
                info!(overlay = %self.id, "overlay disk released");
                Ok(())
            }
        }
    }
}

/// Provision a copy-on-write disk over `base_path`, keeping the overlay file
/// in `overlay_dir`.
pub fn create_overlay(config: &HostConfig, base_path: &Path, overlay_dir: &Path) -> Result<Device> {
    let id = generate_id()?;
    create_overlay_with_id(config, base_path, overlay_dir, &id)
}

/// [`create_overlay`] with a caller-chosen id.
///
/// On failure everything created so far is released again, newest first,
/// and the triggering error is returned.
pub fn create_overlay_with_id(
    config: &HostConfig,
    base_path: &Path,
    overlay_dir: &Path,
    id: &str,
) -> Result<Device> {
    if id.is_empty() || !id.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(Error::InvalidInput(format!("invalid overlay id {:?}", id)));
    }

    let mut saga = Saga::new();
    match provision(config, base_path, overlay_dir, id, &mut saga) {
        Ok(device) => {
            saga.complete();
            info!(
                overlay = id,
                device = %device.path().display(),
                base = %base_path.display(),
                "overlay disk ready"
            );
            Ok(device)
        }
        Err(e) => {
            warn!(overlay = id, error = %e, rollback = saga.len(), "overlay setup failed, rolling back");
            let report = saga.unwind();
            if !report.is_clean() {
                warn!(overlay = id, leaked = report.failures.len(), "overlay rollback incomplete");
            }
            Err(e)
        }
    }
}

fn provision<'a>(
    config: &'a HostConfig,
    base_path: &Path,
    overlay_dir: &Path,
    id: &str,
    saga: &mut Saga<'a>,
) -> Result<Device> {
    let base_size = fs::metadata(base_path)
        .map_err(|e| Error::storage(base_path, e))?
        .len();

    let overlay_file = overlay_dir.join(overlay_file_name(id));
    create_sparse_file(&overlay_file, base_size + OVERLAY_HEADROOM_BYTES)?;
    let file = overlay_file.clone();
    saga.commit("remove overlay file", move || {
        fs::remove_file(&file).map_err(|e| Error::storage(&file, e))
    });

    let base_loop = LoopDevice::attach(config, base_path, true)?;
    let dev = base_loop.clone();
    saga.commit("detach base loop", move || dev.detach(config));

    let overlay_loop = LoopDevice::attach(config, &overlay_file, false)?;
    let dev = overlay_loop.clone();
    saga.commit("detach overlay loop", move || dev.detach(config));

    let base_sectors = base_loop.sectors(config)?;
    let overlay_sectors = overlay_loop.sectors(config)?;

    let base_dm = base_dm_name(id);
    let origin = dm::create(
        config,
        &base_dm,
        &dm::base_table(base_loop.path(), base_sectors, overlay_sectors)?,
    )?;
    let name = base_dm.clone();
    saga.commit("remove base target", move || dm::remove(config, &name));

    let overlay_dm = overlay_dm_name(id);
    dm::create(
        config,
        &overlay_dm,
        &dm::snapshot_table(&origin, overlay_loop.path(), overlay_sectors),
    )?;

    Ok(Device {
        id: id.to_string(),
        base_loop,
        overlay_loop,
        base_dm,
        overlay_dm,
        overlay_file,
    })
}

/// Create `path` (which must not exist) with logical size `len`.
fn create_sparse_file(path: &Path, len: u64) -> Result<()> {
    let file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(|e| Error::storage(path, e))?;
    if let Err(e) = file.set_len(len) {
        drop(file);
        let _ = fs::remove_file(path);
        return Err(Error::storage(path, e));
    }
    Ok(())
}
