//! Integrity checking for a backup root
//!
//! The checker computes the set of names that *should* exist from the tier
//! configuration (one per tier slot, plus `current`), lists the root, and
//! flags everything else. Recognized transient and metadata names are
//! distinguished from true strangers. Strictly read-only.

use crate::error::Result;
use crate::types::{
    Anomaly, IntervalTier, CURRENT_NAME, INTERVALS_FILE_NAME, LOCK_FILE_NAME,
    SOURCEFILE_FILE_NAME, SOURCES_FILE_NAME, STAGING_NAME, TARGET_FILE_NAME,
};
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use tracing::debug;

/// Read-only anomaly scanner over one backup root
pub struct IntegrityChecker<'a> {
    root: &'a Path,
    tiers: &'a [IntervalTier],
}

impl<'a> IntegrityChecker<'a> {
    /// Create a checker for `root` with the configured tiers
    pub fn new(root: &'a Path, tiers: &'a [IntervalTier]) -> Self {
        IntegrityChecker { root, tiers }
    }

    /// Names expected to exist as snapshots: every tier slot plus `current`
    pub fn expected_snapshots(&self) -> BTreeSet<String> {
        let mut expected = BTreeSet::new();
        expected.insert(CURRENT_NAME.to_string());
        for tier in self.tiers {
            for i in 0..tier.count {
                expected.insert(tier.slot_name(i));
            }
        }
        expected
    }

    /// Scan the root and report every entry that is neither an expected
    /// snapshot nor a recognized metadata name
    ///
    /// Anomalies are sorted by entry name so output is stable.
    pub fn check(&self) -> Result<Vec<Anomaly>> {
        let expected = self.expected_snapshots();
        let metadata: BTreeSet<&str> = [
            INTERVALS_FILE_NAME,
            SOURCES_FILE_NAME,
            SOURCEFILE_FILE_NAME,
            TARGET_FILE_NAME,
            LOCK_FILE_NAME,
        ]
        .into_iter()
        .collect();

        let mut anomalies = Vec::new();
        for entry in fs::read_dir(self.root)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if expected.contains(&name) || metadata.contains(name.as_str()) {
                continue;
            }
            if name == STAGING_NAME {
                anomalies.push(Anomaly::StaleStaging { name });
            } else {
                anomalies.push(Anomaly::Unknown { name });
            }
        }
        anomalies.sort_by(|a, b| anomaly_name(a).cmp(anomaly_name(b)));
        debug!(anomalies = anomalies.len(), "integrity check complete");
        Ok(anomalies)
    }
}

fn anomaly_name(anomaly: &Anomaly) -> &str {
    match anomaly {
        Anomaly::StaleStaging { name } | Anomaly::Unknown { name } => name,
    }
}
