//! Disk usage reporting for a backup root
//!
//! Usage is measured the way the filesystem sees it: block counts, with
//! every `(device, inode)` pair counted once per measurement. A snapshot
//! that shares most of its files with its neighbors therefore reports far
//! less than its logical size — that sharing is the whole point of the
//! hardlink scheme, and the efficiency ratio makes it visible.

use crate::error::Result;
use crate::timestamp::TimestampStore;
use crate::types::{IntervalTier, SnapshotId, SnapshotUsage, UsageReport, CURRENT_NAME};
use std::collections::HashSet;
use std::path::Path;
use tracing::debug;
use walkdir::WalkDir;

/// Computes per-snapshot and aggregate usage for one backup root
pub struct UsageReporter<'a> {
    root: &'a Path,
    tiers: &'a [IntervalTier],
    store: &'a dyn TimestampStore,
}

impl<'a> UsageReporter<'a> {
    /// Create a reporter for `root` with the configured tiers
    pub fn new(root: &'a Path, tiers: &'a [IntervalTier], store: &'a dyn TimestampStore) -> Self {
        UsageReporter { root, tiers, store }
    }

    /// Measure every expected snapshot that exists, plus the aggregate
    ///
    /// Missing or unparseable timestamps are reported as absent here;
    /// they are only fatal when a promotion decision needs them.
    pub fn report(&self) -> Result<UsageReport> {
        let mut snapshots = Vec::new();
        let mut current_bytes = None;

        let mut ids = vec![SnapshotId::Current];
        for tier in self.tiers {
            for index in 0..tier.count {
                ids.push(SnapshotId::Slot {
                    tier: tier.name.clone(),
                    index,
                });
            }
        }

        for id in ids {
            let path = self.root.join(id.dir_name());
            if !path.is_dir() {
                continue;
            }
            let bytes = measure_usage(&path);
            if id == SnapshotId::Current {
                current_bytes = Some(bytes);
            }
            let timestamp = self.store.read(&path).ok().flatten();
            snapshots.push(SnapshotUsage {
                id,
                timestamp,
                bytes,
            });
        }

        let total_bytes = measure_usage(self.root);
        let efficiency_percent = match (current_bytes, total_bytes) {
            (Some(current), total) if total > 0 => {
                Some((current as u128 * 100 / total as u128) as u8)
            }
            _ => None,
        };

        debug!(
            snapshots = snapshots.len(),
            total_bytes, "usage report complete"
        );
        Ok(UsageReport {
            snapshots,
            total_bytes,
            efficiency_percent,
        })
    }
}

/// Apparent disk usage of a tree, each inode counted once
///
/// Unreadable entries are skipped rather than failing the whole report.
fn measure_usage(path: &Path) -> u64 {
    let mut seen: HashSet<(u64, u64)> = HashSet::new();
    let mut total = 0u64;
    for entry in WalkDir::new(path).into_iter().filter_map(|e| e.ok()) {
        if let Ok(metadata) = entry.metadata() {
            total += usage_of(&metadata, &mut seen);
        }
    }
    total
}

#[cfg(unix)]
fn usage_of(metadata: &std::fs::Metadata, seen: &mut HashSet<(u64, u64)>) -> u64 {
    use std::os::unix::fs::MetadataExt;
    if !seen.insert((metadata.dev(), metadata.ino())) {
        return 0;
    }
    // st_blocks is in 512-byte units regardless of the filesystem block size.
    metadata.blocks() * 512
}

#[cfg(not(unix))]
fn usage_of(metadata: &std::fs::Metadata, _seen: &mut HashSet<(u64, u64)>) -> u64 {
    metadata.len()
}

/// Format bytes in human-readable form
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB", "PB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    if unit_idx == 0 {
        format!("{} {}", size as u64, UNITS[unit_idx])
    } else {
        format!("{:.2} {}", size, UNITS[unit_idx])
    }
}
