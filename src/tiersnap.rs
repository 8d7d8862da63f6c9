//! Main tiersnap implementation
//!
//! The [`Tiersnap`] struct is the run coordinator: it validates the backup
//! root's configuration at construction time (so a malformed root aborts
//! before any resource is held), then sequences a backup cycle under the
//! root's exclusive lock:
//!
//! 1. acquire the non-blocking per-root lock;
//! 2. discard a stale staging directory left by an interrupted run;
//! 3. stage a new snapshot via the transfer adapter, hardlinking against
//!    the existing `current` snapshot when there is one;
//! 4. stamp the staged snapshot's completion timestamp;
//! 5. hand the *previous* `current` snapshot to the retention engine for
//!    rotation among the historical tiers;
//! 6. atomically publish staging as the new `current`.
//!
//! `current` is therefore, at every externally observable instant, either
//! the pre-run snapshot or the fully completed post-run snapshot — never a
//! staging artifact.
//!
//! Check and report modes are read-only and take no lock.

use crate::check::IntegrityChecker;
use crate::config::RootConfig;
use crate::engine::{PromoteOutcome, RetentionEngine, RotationPlan};
use crate::error::Result;
use crate::lock::RootLock;
use crate::report::UsageReporter;
use crate::timestamp::{TimestampStore, XattrTimestampStore};
use crate::transfer::{RsyncTool, SyncTool};
use crate::types::{Anomaly, UsageReport, CURRENT_NAME, STAGING_NAME};
use chrono::{DateTime, Utc};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Result of one backup cycle
#[derive(Debug)]
pub struct BackupSummary {
    /// Whether this was a dry run (nothing was mutated)
    pub dry_run: bool,
    /// Completion timestamp stamped on the new `current` snapshot
    pub completed_at: Option<DateTime<Utc>>,
    /// What the retention engine did with the displaced `current`
    /// snapshot; `None` when this was the first run and there was nothing
    /// to displace
    pub rotation: Option<PromoteOutcome>,
    /// The rotation a dry run would have committed
    pub planned: Option<RotationPlan>,
    /// Whether a stale staging directory from an interrupted run was
    /// discarded
    pub discarded_stale_staging: bool,
}

/// Run coordinator for one backup root
///
/// Construct via [`Tiersnap::open`] for the real collaborators (rsync and
/// extended-attribute timestamps) or [`TiersnapBuilder`] to inject
/// substitutes.
pub struct Tiersnap {
    root: PathBuf,
    config: RootConfig,
    tool: Box<dyn SyncTool>,
    store: Box<dyn TimestampStore>,
    dry_run: bool,
}

impl std::fmt::Debug for Tiersnap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tiersnap")
            .field("root", &self.root)
            .field("config", &self.config)
            .field("dry_run", &self.dry_run)
            .finish_non_exhaustive()
    }
}

impl Tiersnap {
    /// Open a backup root with the default collaborators
    ///
    /// # Errors
    ///
    /// [`crate::SnapError::Config`] if the root's configuration is
    /// malformed; nothing has been locked or mutated at that point.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        TiersnapBuilder::new().build(root)
    }

    /// The backup root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The validated root configuration
    pub fn config(&self) -> &RootConfig {
        &self.config
    }

    /// Run one backup cycle: transfer, rotate, publish
    ///
    /// Holds the root's exclusive lock for the full cycle. A dry run
    /// acquires the lock and computes the rotation plan but mutates
    /// nothing.
    pub fn run_backup(&self) -> Result<BackupSummary> {
        let _lock = RootLock::acquire(&self.root)?;
        info!(root = %self.root.display(), dry_run = self.dry_run, "starting backup cycle");

        let staging = self.root.join(STAGING_NAME);
        let current = self.root.join(CURRENT_NAME);
        let stale = staging.exists();

        if self.dry_run {
            if stale {
                warn!(staging = %staging.display(), "would discard stale staging directory");
            }
            info!(
                source = ?self.config.source,
                baseline = ?current.exists().then(|| current.display().to_string()),
                staging = %staging.display(),
                "would transfer"
            );
            let planned = if current.exists() {
                let engine =
                    RetentionEngine::new(&self.root, &self.config.tiers, self.store.as_ref());
                let plan = engine.plan(&current)?;
                for op in &plan.ops {
                    info!(%op, "would rotate");
                }
                Some(plan)
            } else {
                None
            };
            return Ok(BackupSummary {
                dry_run: true,
                completed_at: None,
                rotation: None,
                planned,
                discarded_stale_staging: false,
            });
        }

        if stale {
            warn!(staging = %staging.display(), "discarding stale staging directory from interrupted run");
            fs::remove_dir_all(&staging)?;
            self.store.forget(&staging)?;
        }

        // First-run baseline is simply no --link-dest: an empty directory.
        let baseline = current.exists().then(|| current.clone());
        fs::create_dir_all(&staging)?;
        self.tool
            .sync(&self.config.source, baseline.as_deref(), &staging)?;

        // The timestamp is attached only after the transfer fully
        // succeeded; an unstamped directory is never a snapshot.
        let completed_at = Utc::now();
        self.store.write(&staging, completed_at)?;

        let rotation = if current.exists() {
            let engine =
                RetentionEngine::new(&self.root, &self.config.tiers, self.store.as_ref());
            Some(engine.promote(&current)?)
        } else {
            None
        };

        fs::rename(&staging, &current)?;
        self.store.relocate(&staging, &current)?;
        info!(current = %current.display(), "published new current snapshot");

        Ok(BackupSummary {
            dry_run: false,
            completed_at: Some(completed_at),
            rotation,
            planned: None,
            discarded_stale_staging: stale,
        })
    }

    /// Scan the root for unexpected entries; read-only
    pub fn check(&self) -> Result<Vec<Anomaly>> {
        IntegrityChecker::new(&self.root, &self.config.tiers).check()
    }

    /// Measure per-snapshot and aggregate disk usage; read-only
    pub fn report(&self) -> Result<UsageReport> {
        UsageReporter::new(&self.root, &self.config.tiers, self.store.as_ref()).report()
    }
}

/// Builder for [`Tiersnap`] with injectable collaborators
///
/// Tests substitute an in-memory timestamp store and a fake transfer tool
/// to exercise the retention engine and coordinator without rsync or
/// extended-attribute support.
pub struct TiersnapBuilder {
    tool: Option<Box<dyn SyncTool>>,
    store: Option<Box<dyn TimestampStore>>,
    dry_run: bool,
}

impl Default for TiersnapBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TiersnapBuilder {
    /// Create a builder with the default collaborators
    pub fn new() -> Self {
        TiersnapBuilder {
            tool: None,
            store: None,
            dry_run: false,
        }
    }

    /// Substitute the transfer tool
    pub fn sync_tool(mut self, tool: impl SyncTool + 'static) -> Self {
        self.tool = Some(Box::new(tool));
        self
    }

    /// Substitute the timestamp store
    pub fn timestamp_store(mut self, store: impl TimestampStore + 'static) -> Self {
        self.store = Some(Box::new(store));
        self
    }

    /// Compute and log without mutating
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Load and validate the root's configuration and build the coordinator
    pub fn build(self, root: impl Into<PathBuf>) -> Result<Tiersnap> {
        let root = root.into();
        let config = RootConfig::load(&root)?;
        Ok(Tiersnap {
            root,
            config,
            tool: self
                .tool
                .unwrap_or_else(|| Box::new(RsyncTool::new())),
            store: self
                .store
                .unwrap_or_else(|| Box::new(XattrTimestampStore::new())),
            dry_run: self.dry_run,
        })
    }
}
