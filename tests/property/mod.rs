//! Property-based tests for rotation invariants
//!
//! Random tier shapes and run spacings are driven straight through the
//! retention engine. Whatever the sequence, three things must hold after
//! every promotion: no tier exceeds its configured depth (and occupancy is
//! a contiguous prefix of its slots), the flattened slot list is ordered
//! newest-first, and at most one snapshot leaves the system per promotion.

use chrono::{DateTime, TimeZone, Utc};
use proptest::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::TempDir;
use tiersnap::{IntervalTier, MemoryTimestampStore, RetentionEngine, TimestampStore};

fn tiers_strategy() -> impl Strategy<Value = Vec<IntervalTier>> {
    prop::collection::vec((1usize..=3, 1u64..=4), 1..=3).prop_map(|specs| {
        specs
            .into_iter()
            .enumerate()
            .map(|(level, (count, delay_units))| IntervalTier {
                name: format!("tier{}", level),
                delay_secs: delay_units * 600,
                count,
            })
            .collect()
    })
}

fn slot_count(root: &Path, tiers: &[IntervalTier]) -> usize {
    tiers
        .iter()
        .flat_map(|tier| (0..tier.count).map(move |s| tier.slot_path(root, s)))
        .filter(|path| path.is_dir())
        .count()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn rotation_invariants_hold(
        tiers in tiers_strategy(),
        gaps in prop::collection::vec(0u64..7200, 1..20),
    ) {
        let dir = TempDir::new().unwrap();
        let store = MemoryTimestampStore::new();
        let mut clock = Utc.timestamp_opt(1_700_000_000, 0).unwrap();

        for (i, gap) in gaps.iter().enumerate() {
            clock = clock + chrono::Duration::seconds(*gap as i64);
            let candidate = dir.path().join(format!("incoming{}", i));
            fs::create_dir(&candidate).unwrap();
            store.write(&candidate, clock).unwrap();

            let before = slot_count(dir.path(), &tiers) + 1;
            let engine = RetentionEngine::new(dir.path(), &tiers, &store);
            engine.promote(&candidate).unwrap();
            let after = slot_count(dir.path(), &tiers);

            // The candidate is always consumed, and at most one snapshot
            // leaves the system per promotion.
            prop_assert!(!candidate.exists());
            prop_assert!(after <= before);
            prop_assert!(before - after <= 1);

            for tier in &tiers {
                // Depth never exceeds the configured count.
                prop_assert!(!tier.slot_path(dir.path(), tier.count).exists());

                // Occupancy is a contiguous prefix of the slots.
                let occupied: Vec<bool> = (0..tier.count)
                    .map(|s| tier.slot_path(dir.path(), s).is_dir())
                    .collect();
                let filled = occupied.iter().filter(|o| **o).count();
                prop_assert!(
                    occupied[..filled].iter().all(|o| *o),
                    "occupancy is not a prefix: {:?}",
                    occupied
                );
            }

            // Newest-first ordering across the flattened slot list.
            let mut previous: Option<DateTime<Utc>> = None;
            for tier in &tiers {
                for s in 0..tier.count {
                    let path = tier.slot_path(dir.path(), s);
                    if !path.is_dir() {
                        continue;
                    }
                    let ts = store.read(&path).unwrap().expect("occupied slot must be stamped");
                    if let Some(prev) = previous {
                        prop_assert!(
                            ts <= prev,
                            "slot {} is newer than its predecessor",
                            path.display()
                        );
                    }
                    previous = Some(ts);
                }
            }
        }
    }

    #[test]
    fn sub_delay_spacing_never_densifies_a_tier(
        gaps in prop::collection::vec(1u64..60, 2..15),
    ) {
        let tiers = vec![IntervalTier {
            name: "hourly".to_string(),
            delay_secs: 3600,
            count: 5,
        }];
        let dir = TempDir::new().unwrap();
        let store = MemoryTimestampStore::new();
        let mut clock = Utc.timestamp_opt(1_700_000_000, 0).unwrap();

        for (i, gap) in gaps.iter().enumerate() {
            clock = clock + chrono::Duration::seconds(*gap as i64);
            let candidate = dir.path().join(format!("incoming{}", i));
            fs::create_dir(&candidate).unwrap();
            store.write(&candidate, clock).unwrap();

            let engine = RetentionEngine::new(dir.path(), &tiers, &store);
            engine.promote(&candidate).unwrap();

            // The first candidate fills the empty slot; every later one is
            // within the delay of the occupant and is discarded.
            prop_assert!(dir.path().join("hourly.0").is_dir());
            prop_assert!(!dir.path().join("hourly.1").exists());
        }
    }
}
