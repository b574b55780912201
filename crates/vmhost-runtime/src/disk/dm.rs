//! Device-mapper tables and `dmsetup` plumbing.

use std::fmt;
use std::path::{Path, PathBuf};

use tracing::info;
use vmhost_core::config::{HostConfig, SNAPSHOT_CHUNK_SECTORS};
use vmhost_core::naming::mapper_path;
use vmhost_core::{Error, Result};

use crate::shell;

/// A dm target type with its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// Map onto `device` starting at sector `offset`.
    Linear { device: PathBuf, offset: u64 },
    /// Reads return zeroes, writes are discarded.
    Zero,
    /// Copy-on-write view of `origin` with exceptions stored on `cow`.
    Snapshot {
        origin: PathBuf,
        cow: PathBuf,
        persistent: bool,
        chunk_sectors: u64,
    },
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Linear { device, offset } => {
                write!(f, "linear {} {}", device.display(), offset)
            }
            Target::Zero => f.write_str("zero"),
            Target::Snapshot {
                origin,
                cow,
                persistent,
                chunk_sectors,
            } => write!(
                f,
                "snapshot {} {} {} {}",
                origin.display(),
                cow.display(),
                if *persistent { "P" } else { "N" },
                chunk_sectors
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Segment {
    start: u64,
    length: u64,
    target: Target,
}

/// A dm table: contiguous segments starting at sector 0.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Table {
    segments: Vec<Segment>,
}

impl Table {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a segment of `length` sectors after the current end.
    pub fn push(&mut self, length: u64, target: Target) -> &mut Self {
        let start = self.sectors();
        self.segments.push(Segment {
            start,
            length,
            target,
        });
        self
    }

    /// Total length in sectors.
    pub fn sectors(&self) -> u64 {
        self.segments.last().map_or(0, |s| s.start + s.length)
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, s) in self.segments.iter().enumerate() {
            if i > 0 {
                f.write_str("\n")?;
            }
            write!(f, "{} {} {}", s.start, s.length, s.target)?;
        }
        Ok(())
    }
}

/// The read-only origin for a snapshot: the base image padded with zeroes
/// up to the overlay's capacity, so both sides have the same length.
pub fn base_table(base_loop: &Path, base_sectors: u64, overlay_sectors: u64) -> Result<Table> {
    if base_sectors == 0 {
        return Err(Error::DeviceMapper("base image is empty".to_string()));
    }
    if overlay_sectors < base_sectors {
        return Err(Error::DeviceMapper(format!(
            "overlay ({} sectors) is smaller than base ({} sectors)",
            overlay_sectors, base_sectors
        )));
    }

    let mut table = Table::new();
    table.push(
        base_sectors,
        Target::Linear {
            device: base_loop.to_path_buf(),
            offset: 0,
        },
    );
    if overlay_sectors > base_sectors {
        table.push(overlay_sectors - base_sectors, Target::Zero);
    }
    Ok(table)
}

/// Persistent snapshot of `origin` whose exceptions live on `cow`.
pub fn snapshot_table(origin: &Path, cow: &Path, overlay_sectors: u64) -> Table {
    let mut table = Table::new();
    table.push(
        overlay_sectors,
        Target::Snapshot {
            origin: origin.to_path_buf(),
            cow: cow.to_path_buf(),
            persistent: true,
            chunk_sectors: SNAPSHOT_CHUNK_SECTORS,
        },
    );
    table
}

/// `dmsetup create --verifyudev <name>` with the table on stdin.
/// Returns `/dev/mapper/<name>`.
pub fn create(config: &HostConfig, name: &str, table: &Table) -> Result<PathBuf> {
    let input = format!("{}\n", table);
    shell::run_tool_with_input(
        config,
        &config.dmsetup_bin,
        &["create", "--verifyudev", name],
        input.as_bytes(),
    )
    .map_err(|e| Error::DeviceMapper(format!("failed to create {}: {}", name, e)))?;

    let path = mapper_path(name);
    info!(dm = name, sectors = table.sectors(), device = %path.display(), "dm target created");
    Ok(path)
}

pub fn remove(config: &HostConfig, name: &str) -> Result<()> {
    shell::run_tool_checked(config, &config.dmsetup_bin, &["remove", name])
        .map_err(|e| Error::DeviceMapper(format!("failed to remove {}: {}", name, e)))?;
    info!(dm = name, "dm target removed");
    Ok(())
}
