//! # Tiersnap - Rotating hardlink-deduplicated directory snapshots
//!
//! Tiersnap keeps N snapshots of a directory tree at each of several time
//! granularities ("tiers"), produced by incremental synchronization that
//! hardlinks unchanged files against the previous snapshot. A fresh
//! snapshot is promoted into the youngest tier only often enough, and
//! older snapshots cascade downward through the tiers until they age out.
//!
//! ## Overview
//!
//! A *backup root* is a self-describing directory: it carries its own tier
//! configuration (`intervals`), source selection (`sources` or
//! `sourcefile`, optionally a remote `target`), the `current` snapshot,
//! and one directory per tier slot (`hourly.0`, `hourly.1`, `daily.0`, …).
//!
//! Each backup cycle runs under an exclusive per-root lock:
//!
//! 1. a new snapshot is staged by the external transfer tool, hardlinking
//!    against `current`;
//! 2. the displaced `current` is handed to the retention engine, which
//!    either admits it into the first tier's slot 0 (cascading older
//!    members onward) or discards it when the tier's delay gate says the
//!    tier is dense enough already;
//! 3. the staged snapshot is atomically renamed into `current`.
//!
//! Snapshot completion times live in an extended attribute per snapshot
//! directory — filesystem mtimes are useless here, since hardlinked trees
//! share them with their origin.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tiersnap::Tiersnap;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let tiersnap = Tiersnap::open("/srv/backups/home")?;
//! let summary = tiersnap.run_backup()?;
//! if let Some(rotation) = &summary.rotation {
//!     println!("rotation outcome: {:?}", rotation);
//! }
//!
//! for anomaly in tiersnap.check()? {
//!     println!("anomaly: {}", anomaly);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Testing seams
//!
//! The two external collaborators are narrow traits: the transfer tool
//! ([`SyncTool`]) and the timestamp store ([`TimestampStore`]). The
//! retention engine can be driven entirely against a [`MemoryTimestampStore`]
//! and a fake sync tool via [`TiersnapBuilder`].
//!
//! ## Error Handling
//!
//! All operations return `Result<T, SnapError>`. Fatal conditions map to
//! process exit code 2 in the CLI; usage errors to 1. None are retried
//! automatically.
//!
//! ## Module Organization
//!
//! - [`engine`]: the retention/rotation state machine
//! - [`transfer`]: transfer-tool adapter (`rsync` with `--link-dest`)
//! - [`timestamp`]: out-of-band completion timestamps
//! - [`config`]: backup-root configuration loading and validation
//! - [`check`]: read-only integrity checking
//! - [`report`]: per-snapshot and aggregate disk usage
//! - [`lock`]: single-instance locking per backup root
//! - [`types`]: common types and well-known names
//! - [`error`]: error types and handling

// Public API modules
pub mod check;
pub mod config;
pub mod engine;
pub mod error;
pub mod lock;
pub mod report;
pub mod timestamp;
pub mod tiersnap;
pub mod transfer;
pub mod types;

// Re-export main types for convenience
pub use check::IntegrityChecker;
pub use config::{RootConfig, SourceList, SourceSpec};
pub use engine::{PromoteOutcome, RetentionEngine, RotationOp, RotationPlan};
pub use error::{Result, SnapError};
pub use lock::RootLock;
pub use report::UsageReporter;
pub use timestamp::{MemoryTimestampStore, TimestampStore, XattrTimestampStore};
pub use tiersnap::{BackupSummary, Tiersnap, TiersnapBuilder};
pub use transfer::{RsyncTool, RsyncVersion, SyncTool};
pub use types::*;
