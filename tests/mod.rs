//! Main test module for Tiersnap
//!
//! This module includes all test suites:
//! - Integration tests for full backup cycles
//! - Property-based tests for rotation invariants

pub mod integration;
pub mod property;

#[cfg(test)]
mod edge_cases {
    use std::fs;
    use tempfile::TempDir;
    use tiersnap::{SnapError, Tiersnap};

    #[test]
    fn test_root_must_exist() {
        let err = Tiersnap::open("/nonexistent/backup/root").unwrap_err();
        assert!(matches!(err, SnapError::Config(_)));
    }

    #[test]
    fn test_root_without_source_selection_rejected() {
        let root = TempDir::new().unwrap();
        fs::write(root.path().join("intervals"), "hourly 3600 4\n").unwrap();

        let err = Tiersnap::open(root.path()).unwrap_err();
        assert!(matches!(err, SnapError::Config(_)));
        assert!(err.is_pre_mutation());
    }

    #[test]
    fn test_both_source_mechanisms_rejected() {
        let root = TempDir::new().unwrap();
        fs::write(root.path().join("sources"), "/home\n").unwrap();
        fs::write(root.path().join("sourcefile"), "/etc/paths.txt\n").unwrap();

        let err = Tiersnap::open(root.path()).unwrap_err();
        assert!(matches!(err, SnapError::Config(_)));
    }

    #[test]
    fn test_absent_intervals_file_means_zero_tiers() {
        let root = TempDir::new().unwrap();
        fs::write(root.path().join("sources"), "/home\n").unwrap();

        let tiersnap = Tiersnap::open(root.path()).unwrap();
        assert!(tiersnap.config().tiers.is_empty());
    }
}
