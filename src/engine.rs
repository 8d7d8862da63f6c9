//! Retention engine: the rotation/promotion state machine
//!
//! After each successful transfer the snapshot that *was* `current` becomes
//! a candidate for admission into slot 0 of the first tier. Admission is
//! gated by the tier's delay: if the candidate's own completion timestamp
//! is less than `delay` newer than the occupant of slot 0, the candidate is
//! discarded outright — the throttle that keeps a tier from densifying no
//! matter how often backups run. An admitted candidate shifts existing
//! members toward higher indices; a member shifted past the tier's last
//! slot cascades into the next tier under the same rules, or leaves the
//! system after the last tier.
//!
//! The engine separates compute from commit: tier state is read from disk
//! once, the full sequence of renames and removals is planned in memory,
//! and only then applied. A rename failure mid-commit aborts the run with
//! the remaining operations unapplied; this narrow partial-cascade window
//! is an accepted trade-off, documented in DESIGN.md rather than hardened
//! away.

use crate::error::{Result, SnapError};
use crate::timestamp::TimestampStore;
use crate::types::IntervalTier;
use chrono::{DateTime, Utc};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// One step of a committed rotation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RotationOp {
    /// Move a snapshot directory to a new slot
    Rename {
        /// Source path
        from: PathBuf,
        /// Destination path
        to: PathBuf,
    },
    /// Delete a snapshot directory
    Remove {
        /// Path to delete
        path: PathBuf,
    },
}

impl fmt::Display for RotationOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RotationOp::Rename { from, to } => {
                write!(f, "rename {} -> {}", from.display(), to.display())
            }
            RotationOp::Remove { path } => write!(f, "remove {}", path.display()),
        }
    }
}

/// What a promotion did (or would do) with the candidate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromoteOutcome {
    /// The candidate was discarded without entering any tier: either the
    /// first tier's delay gate rejected it (`gate` names the tier) or no
    /// tiers are configured (`gate` is `None`)
    Discarded {
        /// Tier whose gate rejected the candidate, if any
        gate: Option<String>,
    },
    /// The candidate was placed into slot 0 of the first tier
    Admitted {
        /// Pre-rotation path of the one snapshot that left the system
        /// during the cascade, if any
        dropped: Option<PathBuf>,
    },
}

/// A fully computed rotation: ordered operations plus their net effect
#[derive(Debug, Clone)]
pub struct RotationPlan {
    /// Operations in commit order
    pub ops: Vec<RotationOp>,
    /// Net effect on the candidate and the snapshot population
    pub outcome: PromoteOutcome,
}

/// Result of planning one tier of the cascade
enum CascadeResult {
    /// Candidate placed into this tier's slot 0
    Placed,
    /// Candidate rejected by this tier's delay gate and removed
    Gated(String),
}

/// The rotation/promotion engine for one backup root
pub struct RetentionEngine<'a> {
    root: &'a Path,
    tiers: &'a [IntervalTier],
    store: &'a dyn TimestampStore,
}

impl<'a> RetentionEngine<'a> {
    /// Create an engine over `root` with the configured tier list
    pub fn new(
        root: &'a Path,
        tiers: &'a [IntervalTier],
        store: &'a dyn TimestampStore,
    ) -> Self {
        RetentionEngine { root, tiers, store }
    }

    /// Compute the rotation for admitting `candidate`, without mutating
    /// anything
    ///
    /// # Errors
    ///
    /// [`SnapError::Timestamp`] when a snapshot involved in a gating
    /// decision has no parseable completion timestamp. The engine never
    /// guesses: treating a missing timestamp as infinitely old or new
    /// would corrupt the retention guarantees either way.
    pub fn plan(&self, candidate: &Path) -> Result<RotationPlan> {
        let mut ops = Vec::new();

        if self.tiers.is_empty() {
            ops.push(RotationOp::Remove {
                path: candidate.to_path_buf(),
            });
            return Ok(RotationPlan {
                ops,
                outcome: PromoteOutcome::Discarded { gate: None },
            });
        }

        let mut dropped = None;
        let outcome =
            match self.plan_tier(0, candidate.to_path_buf(), &mut ops, &mut dropped)? {
                CascadeResult::Placed => PromoteOutcome::Admitted { dropped },
                CascadeResult::Gated(tier) => PromoteOutcome::Discarded { gate: Some(tier) },
            };
        debug!(ops = ops.len(), ?outcome, "computed rotation plan");
        Ok(RotationPlan { ops, outcome })
    }

    /// Plan admission of `candidate` into tier `idx`, cascading onward
    ///
    /// Operations are emitted in commit order: the cascade into deeper
    /// tiers first (vacating this tier's last slot), then the shift of the
    /// remaining occupants from the highest index downward, then the
    /// candidate into slot 0. The capacity cap is never exceeded, even
    /// transiently, because every slot is vacated before it is written.
    fn plan_tier(
        &self,
        idx: usize,
        candidate: PathBuf,
        ops: &mut Vec<RotationOp>,
        dropped: &mut Option<PathBuf>,
    ) -> Result<CascadeResult> {
        let tier = &self.tiers[idx];
        let slot0 = tier.slot_path(self.root, 0);

        if !slot0.exists() {
            ops.push(RotationOp::Rename {
                from: candidate,
                to: slot0,
            });
            return Ok(CascadeResult::Placed);
        }

        // Delay gate: the comparison is inclusive, elapsed >= delay admits.
        let candidate_ts = self.require_timestamp(&candidate)?;
        let slot0_ts = self.require_timestamp(&slot0)?;
        if candidate_ts - slot0_ts < tier.delay() {
            ops.push(RotationOp::Remove {
                path: candidate.clone(),
            });
            if idx > 0 {
                // A snapshot cascading out of the previous tier was
                // rejected here; it leaves the system.
                *dropped = Some(candidate);
            }
            return Ok(CascadeResult::Gated(tier.name.clone()));
        }

        let last = tier.count - 1;
        let last_path = tier.slot_path(self.root, last);
        if last_path.exists() {
            if idx + 1 < self.tiers.len() {
                self.plan_tier(idx + 1, last_path, ops, dropped)?;
            } else {
                *dropped = Some(last_path.clone());
                ops.push(RotationOp::Remove { path: last_path });
            }
        }

        for i in (0..last).rev() {
            let from = tier.slot_path(self.root, i);
            if from.exists() {
                ops.push(RotationOp::Rename {
                    from,
                    to: tier.slot_path(self.root, i + 1),
                });
            }
        }

        ops.push(RotationOp::Rename {
            from: candidate,
            to: slot0,
        });
        Ok(CascadeResult::Placed)
    }

    /// Apply a computed plan to disk, in order
    ///
    /// Any failure aborts immediately with the remaining operations
    /// unapplied; each committed step is logged so the operator can
    /// reconstruct the state after a midpoint failure.
    pub fn commit(&self, plan: &RotationPlan) -> Result<()> {
        for op in &plan.ops {
            match op {
                RotationOp::Rename { from, to } => {
                    fs::rename(from, to)?;
                    self.store.relocate(from, to)?;
                }
                RotationOp::Remove { path } => {
                    fs::remove_dir_all(path)?;
                    self.store.forget(path)?;
                }
            }
            info!(%op, "rotation");
        }
        Ok(())
    }

    /// Plan and commit in one step
    pub fn promote(&self, candidate: &Path) -> Result<PromoteOutcome> {
        let plan = self.plan(candidate)?;
        self.commit(&plan)?;
        Ok(plan.outcome)
    }

    fn require_timestamp(&self, snapshot: &Path) -> Result<DateTime<Utc>> {
        self.store.read(snapshot)?.ok_or_else(|| {
            SnapError::timestamp(snapshot, "missing completion timestamp attribute")
        })
    }
}
