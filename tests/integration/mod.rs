//! Integration tests for full backup cycles
//!
//! These tests drive the run coordinator end to end with a fake transfer
//! tool and a keyed in-memory timestamp store. Time is controlled by an
//! offset applied at stamp time, so runs that happen milliseconds apart in
//! the test can look hours apart to the retention engine.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;
use tiersnap::{
    Anomaly, MemoryTimestampStore, PromoteOutcome, Result, RootLock, SnapError, SourceSpec,
    SyncTool, Tiersnap, TiersnapBuilder, TimestampStore,
};

/// Transfer tool double: writes a `marker` file identifying the run,
/// records the baseline it was offered, and can be switched to fail.
#[derive(Clone, Default)]
struct FakeSyncTool {
    runs: Arc<AtomicUsize>,
    fail: Arc<AtomicBool>,
    baselines: Arc<Mutex<Vec<Option<PathBuf>>>>,
}

impl FakeSyncTool {
    fn new() -> Self {
        Self::default()
    }

    fn fail_next(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

impl SyncTool for FakeSyncTool {
    fn sync(&self, _source: &SourceSpec, baseline: Option<&Path>, dest: &Path) -> Result<()> {
        self.baselines
            .lock()
            .push(baseline.map(Path::to_path_buf));
        if self.fail.load(Ordering::SeqCst) {
            return Err(SnapError::tool("simulated transfer failure"));
        }
        let n = self.runs.fetch_add(1, Ordering::SeqCst) + 1;
        fs::write(dest.join("marker"), format!("run-{}", n))?;
        Ok(())
    }
}

/// Timestamp store whose writes are shifted by a controllable offset,
/// letting a test pretend consecutive runs are hours apart.
#[derive(Clone, Default)]
struct OffsetStore {
    inner: Arc<MemoryTimestampStore>,
    offset_secs: Arc<AtomicI64>,
}

impl OffsetStore {
    fn new() -> Self {
        Self::default()
    }

    fn advance(&self, secs: i64) {
        self.offset_secs.fetch_add(secs, Ordering::SeqCst);
    }
}

impl TimestampStore for OffsetStore {
    fn read(&self, snapshot: &Path) -> Result<Option<DateTime<Utc>>> {
        self.inner.read(snapshot)
    }

    fn write(&self, snapshot: &Path, ts: DateTime<Utc>) -> Result<()> {
        let shifted = ts + chrono::Duration::seconds(self.offset_secs.load(Ordering::SeqCst));
        self.inner.write(snapshot, shifted)
    }

    fn relocate(&self, from: &Path, to: &Path) -> Result<()> {
        self.inner.relocate(from, to)
    }

    fn forget(&self, snapshot: &Path) -> Result<()> {
        self.inner.forget(snapshot)
    }
}

fn setup_root(intervals: &str) -> TempDir {
    let root = TempDir::new().unwrap();
    if !intervals.is_empty() {
        fs::write(root.path().join("intervals"), intervals).unwrap();
    }
    fs::write(root.path().join("sources"), "/home\n").unwrap();
    root
}

fn open(root: &TempDir, tool: &FakeSyncTool, store: &OffsetStore) -> Tiersnap {
    TiersnapBuilder::new()
        .sync_tool(tool.clone())
        .timestamp_store(store.clone())
        .build(root.path())
        .unwrap()
}

fn marker(root: &TempDir, snapshot: &str) -> String {
    fs::read_to_string(root.path().join(snapshot).join("marker")).unwrap()
}

#[test]
fn first_run_creates_current_without_rotation() {
    let root = setup_root("hourly 3600 4\n");
    let tool = FakeSyncTool::new();
    let store = OffsetStore::new();
    let tiersnap = open(&root, &tool, &store);

    let summary = tiersnap.run_backup().unwrap();

    assert!(!summary.dry_run);
    assert!(summary.completed_at.is_some());
    assert!(summary.rotation.is_none());
    assert_eq!(marker(&root, "current"), "run-1");
    assert!(!root.path().join(".staging").exists());
    assert!(store.read(&root.path().join("current")).unwrap().is_some());
}

#[test]
fn baseline_is_previous_current() {
    let root = setup_root("hourly 3600 4\n");
    let tool = FakeSyncTool::new();
    let store = OffsetStore::new();
    let tiersnap = open(&root, &tool, &store);

    tiersnap.run_backup().unwrap();
    store.advance(4000);
    tiersnap.run_backup().unwrap();

    let baselines = tool.baselines.lock().clone();
    assert_eq!(
        baselines,
        vec![None, Some(root.path().join("current"))]
    );
}

#[test]
fn second_run_admits_previous_into_first_tier() {
    let root = setup_root("hourly 3600 4\n");
    let tool = FakeSyncTool::new();
    let store = OffsetStore::new();
    let tiersnap = open(&root, &tool, &store);

    tiersnap.run_backup().unwrap();
    store.advance(5);
    let summary = tiersnap.run_backup().unwrap();

    // An empty slot 0 admits unconditionally; the delay gate only applies
    // against an existing occupant.
    assert_eq!(
        summary.rotation,
        Some(PromoteOutcome::Admitted { dropped: None })
    );
    assert_eq!(marker(&root, "hourly.0"), "run-1");
    assert_eq!(marker(&root, "current"), "run-2");
}

#[test]
fn rapid_reruns_do_not_densify_tier() {
    let root = setup_root("hourly 3600 4\n");
    let tool = FakeSyncTool::new();
    let store = OffsetStore::new();
    let tiersnap = open(&root, &tool, &store);

    tiersnap.run_backup().unwrap();
    for _ in 0..3 {
        store.advance(1);
        tiersnap.run_backup().unwrap();
    }

    // Only the first displaced snapshot entered the tier; every later one
    // was younger than the occupant by less than the delay and was
    // discarded.
    assert_eq!(marker(&root, "hourly.0"), "run-1");
    assert_eq!(marker(&root, "current"), "run-4");
    assert!(!root.path().join("hourly.1").exists());
}

#[test]
fn rapid_rerun_reports_the_gating_tier() {
    let root = setup_root("hourly 3600 4\n");
    let tool = FakeSyncTool::new();
    let store = OffsetStore::new();
    let tiersnap = open(&root, &tool, &store);

    tiersnap.run_backup().unwrap();
    store.advance(1);
    tiersnap.run_backup().unwrap();
    store.advance(1);
    let summary = tiersnap.run_backup().unwrap();

    assert_eq!(
        summary.rotation,
        Some(PromoteOutcome::Discarded {
            gate: Some("hourly".to_string())
        })
    );
}

#[test]
fn spaced_runs_fill_and_shift() {
    let root = setup_root("hourly 3600 3\n");
    let tool = FakeSyncTool::new();
    let store = OffsetStore::new();
    let tiersnap = open(&root, &tool, &store);

    tiersnap.run_backup().unwrap();
    store.advance(4000);
    tiersnap.run_backup().unwrap();
    store.advance(4000);
    tiersnap.run_backup().unwrap();

    assert_eq!(marker(&root, "current"), "run-3");
    assert_eq!(marker(&root, "hourly.0"), "run-2");
    assert_eq!(marker(&root, "hourly.1"), "run-1");
    assert!(!root.path().join("hourly.2").exists());

    // Newest-first ordering holds across the tier.
    let ts0 = store.read(&root.path().join("hourly.0")).unwrap().unwrap();
    let ts1 = store.read(&root.path().join("hourly.1")).unwrap().unwrap();
    assert!(ts0 > ts1);
}

#[test]
fn aging_snapshot_cascades_into_next_tier() {
    let root = setup_root("hourly 60 1\ndaily 120 1\n");
    let tool = FakeSyncTool::new();
    let store = OffsetStore::new();
    let tiersnap = open(&root, &tool, &store);

    tiersnap.run_backup().unwrap();
    store.advance(100);
    tiersnap.run_backup().unwrap();
    store.advance(100);
    tiersnap.run_backup().unwrap();

    // run-2 displaced run-1 from the single hourly slot; run-1 dropped
    // into the (empty) daily slot instead of leaving the system.
    assert_eq!(marker(&root, "current"), "run-3");
    assert_eq!(marker(&root, "hourly.0"), "run-2");
    assert_eq!(marker(&root, "daily.0"), "run-1");
}

#[test]
fn snapshot_leaving_the_last_tier_is_dropped() {
    let root = setup_root("hourly 10 1\n");
    let tool = FakeSyncTool::new();
    let store = OffsetStore::new();
    let tiersnap = open(&root, &tool, &store);

    tiersnap.run_backup().unwrap();
    store.advance(100);
    tiersnap.run_backup().unwrap();
    store.advance(100);
    let summary = tiersnap.run_backup().unwrap();

    assert_eq!(
        summary.rotation,
        Some(PromoteOutcome::Admitted {
            dropped: Some(root.path().join("hourly.0"))
        })
    );
    assert_eq!(marker(&root, "hourly.0"), "run-2");
}

#[test]
fn zero_tier_root_keeps_only_current() {
    let root = setup_root("");
    let tool = FakeSyncTool::new();
    let store = OffsetStore::new();
    let tiersnap = open(&root, &tool, &store);

    tiersnap.run_backup().unwrap();
    store.advance(4000);
    let summary = tiersnap.run_backup().unwrap();

    assert_eq!(
        summary.rotation,
        Some(PromoteOutcome::Discarded { gate: None })
    );
    assert_eq!(marker(&root, "current"), "run-2");
    let dirs: Vec<_> = fs::read_dir(root.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_dir())
        .collect();
    assert_eq!(dirs.len(), 1);
}

#[test]
fn stale_staging_is_discarded() {
    let root = setup_root("hourly 3600 4\n");
    let staging = root.path().join(".staging");
    fs::create_dir(&staging).unwrap();
    fs::write(staging.join("leftover"), "partial transfer").unwrap();

    let tool = FakeSyncTool::new();
    let store = OffsetStore::new();
    let tiersnap = open(&root, &tool, &store);
    let summary = tiersnap.run_backup().unwrap();

    assert!(summary.discarded_stale_staging);
    assert_eq!(marker(&root, "current"), "run-1");
    assert!(!root.path().join("current").join("leftover").exists());
}

#[test]
fn failed_transfer_leaves_current_untouched() {
    let root = setup_root("hourly 3600 4\n");
    let tool = FakeSyncTool::new();
    let store = OffsetStore::new();
    let tiersnap = open(&root, &tool, &store);

    tiersnap.run_backup().unwrap();
    store.advance(4000);

    tool.fail_next(true);
    let err = tiersnap.run_backup().unwrap_err();
    assert!(matches!(err, SnapError::Tool(_)));
    assert_eq!(marker(&root, "current"), "run-1");
    assert!(!root.path().join("hourly.0").exists());

    // The next run discards the failed run's staging and succeeds.
    tool.fail_next(false);
    let summary = tiersnap.run_backup().unwrap();
    assert!(summary.discarded_stale_staging);
    assert_eq!(marker(&root, "current"), "run-2");
    assert_eq!(marker(&root, "hourly.0"), "run-1");
}

#[test]
fn dry_run_mutates_nothing() {
    let root = setup_root("hourly 3600 4\n");
    let tool = FakeSyncTool::new();
    let store = OffsetStore::new();
    let tiersnap = open(&root, &tool, &store);
    tiersnap.run_backup().unwrap();
    store.advance(4000);

    let dry = TiersnapBuilder::new()
        .sync_tool(tool.clone())
        .timestamp_store(store.clone())
        .dry_run(true)
        .build(root.path())
        .unwrap();
    let summary = dry.run_backup().unwrap();

    assert!(summary.dry_run);
    assert!(summary.completed_at.is_none());
    let plan = summary.planned.expect("a rotation should have been planned");
    assert!(!plan.ops.is_empty());
    assert_eq!(marker(&root, "current"), "run-1");
    assert!(!root.path().join("hourly.0").exists());
}

#[test]
fn lock_is_exclusive_per_root() {
    let root = setup_root("hourly 3600 4\n");
    let tool = FakeSyncTool::new();
    let store = OffsetStore::new();
    let tiersnap = open(&root, &tool, &store);

    let _held = RootLock::acquire(root.path()).unwrap();
    let err = tiersnap.run_backup().unwrap_err();

    assert!(matches!(err, SnapError::Lock { .. }));
    assert!(err.is_pre_mutation());
    assert!(!root.path().join("current").exists());
}

#[test]
fn check_and_report_through_coordinator() {
    let root = setup_root("hourly 3600 4\n");
    let tool = FakeSyncTool::new();
    let store = OffsetStore::new();
    let tiersnap = open(&root, &tool, &store);

    tiersnap.run_backup().unwrap();
    store.advance(4000);
    tiersnap.run_backup().unwrap();

    assert!(tiersnap.check().unwrap().is_empty());

    fs::create_dir(root.path().join(".staging")).unwrap();
    fs::write(root.path().join("junk"), "stray").unwrap();
    let anomalies = tiersnap.check().unwrap();
    assert_eq!(
        anomalies,
        vec![
            Anomaly::StaleStaging {
                name: ".staging".to_string()
            },
            Anomaly::Unknown {
                name: "junk".to_string()
            },
        ]
    );

    let report = tiersnap.report().unwrap();
    let names: Vec<String> = report.snapshots.iter().map(|s| s.id.to_string()).collect();
    assert_eq!(names, vec!["current", "hourly.0"]);
    assert!(report.snapshots.iter().all(|s| s.timestamp.is_some()));
    assert!(report.total_bytes > 0);
    assert!(report.efficiency_percent.is_some());
}
