//! Core data types shared across tiersnap components
//!
//! This module holds the retention configuration (`IntervalTier`), snapshot
//! identities, and the result types produced by the integrity checker and
//! usage reporter. The rotation plan types live with the retention engine
//! in [`crate::engine`].

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};

/// Name of the `current` snapshot directory inside a backup root
pub const CURRENT_NAME: &str = "current";

/// Name of the transient staging directory used during a transfer
///
/// A pre-existing staging directory at run start signals an interrupted
/// previous run and is discarded, never resumed.
pub const STAGING_NAME: &str = ".staging";

/// Name of the lock file inside a backup root
pub const LOCK_FILE_NAME: &str = ".lock";

/// Tier configuration file: whitespace-separated `<name> <delay> <count>` lines
pub const INTERVALS_FILE_NAME: &str = "intervals";

/// Explicit newline-separated source path list
pub const SOURCES_FILE_NAME: &str = "sources";

/// File containing a single path to an externally maintained path-list file
pub const SOURCEFILE_FILE_NAME: &str = "sourcefile";

/// Optional single-line remote host descriptor for the source
pub const TARGET_FILE_NAME: &str = "target";

/// A named retention bucket with a minimum spacing and maximum depth
///
/// Tiers are ordered by configuration file order; a snapshot aging out of
/// the last slot of one tier becomes the admission candidate for the next.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IntervalTier {
    /// Tier identifier, `[A-Za-z0-9_]+`
    pub name: String,
    /// Minimum spacing between members, in seconds
    pub delay_secs: u64,
    /// Maximum number of slots, `>= 1`
    pub count: usize,
}

impl IntervalTier {
    /// Directory name of slot `index` within this tier, e.g. `hourly.0`
    pub fn slot_name(&self, index: usize) -> String {
        format!("{}.{}", self.name, index)
    }

    /// Absolute path of slot `index` under `root`
    pub fn slot_path(&self, root: &Path, index: usize) -> PathBuf {
        root.join(self.slot_name(index))
    }

    /// Minimum spacing as a `chrono` duration
    pub fn delay(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.delay_secs as i64)
    }
}

/// Identity of a snapshot within a backup root
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum SnapshotId {
    /// The slot-less `current` snapshot
    Current,
    /// A tier slot, index 0 being the newest member of that tier
    Slot {
        /// Owning tier name
        tier: String,
        /// Slot index within the tier
        index: usize,
    },
}

impl SnapshotId {
    /// Directory name of this snapshot inside the backup root
    pub fn dir_name(&self) -> String {
        match self {
            SnapshotId::Current => CURRENT_NAME.to_string(),
            SnapshotId::Slot { tier, index } => format!("{}.{}", tier, index),
        }
    }
}

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.dir_name())
    }
}

/// An unexpected entry found by the integrity checker
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Anomaly {
    /// A recognized transient working directory left behind by an
    /// interrupted run
    StaleStaging {
        /// Entry name inside the backup root
        name: String,
    },
    /// An entry that is neither an expected snapshot nor a recognized
    /// metadata or working name
    Unknown {
        /// Entry name inside the backup root
        name: String,
    },
}

impl fmt::Display for Anomaly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Anomaly::StaleStaging { name } => write!(f, "stale working directory: {}", name),
            Anomaly::Unknown { name } => write!(f, "unknown entry: {}", name),
        }
    }
}

/// Disk usage of a single snapshot, as measured by the filesystem
///
/// Reported sizes reflect hardlink sharing: a snapshot whose files are
/// mostly shared with neighbors reports far less than its logical size.
#[derive(Debug, Clone, Serialize)]
pub struct SnapshotUsage {
    /// Snapshot identity
    pub id: SnapshotId,
    /// Completion timestamp, if the attribute is present and parseable
    pub timestamp: Option<DateTime<Utc>>,
    /// Apparent usage in bytes, each inode counted once
    pub bytes: u64,
}

/// Aggregate usage report for a backup root
#[derive(Debug, Clone, Serialize)]
pub struct UsageReport {
    /// Per-snapshot usage, in expected-set order (`current` first)
    pub snapshots: Vec<SnapshotUsage>,
    /// Total usage of the backup root, shared inodes counted once
    pub total_bytes: u64,
    /// `current usage / total usage * 100`, rounded down; omitted when
    /// there is no current snapshot or either quantity is unavailable
    pub efficiency_percent: Option<u8>,
}
