//! Backup-root configuration loading and validation
//!
//! A backup root carries its own configuration as plain files: `intervals`
//! for the tier list, exactly one of `sources` / `sourcefile` for source
//! selection, and an optional `target` naming a remote host. Everything is
//! read and validated up front, before the root's lock is acquired, so a
//! malformed configuration aborts with no resource held and no mutation.

use crate::error::{Result, SnapError};
use crate::types::{
    IntervalTier, INTERVALS_FILE_NAME, SOURCEFILE_FILE_NAME, SOURCES_FILE_NAME, TARGET_FILE_NAME,
};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// How the source path set is supplied to the transfer tool
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceList {
    /// Explicit paths from the root's `sources` file
    Explicit(Vec<PathBuf>),
    /// Path of an externally maintained path-list file, from `sourcefile`
    External(PathBuf),
}

/// Complete source selection for a backup run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSpec {
    /// The path list mechanism in use
    pub list: SourceList,
    /// Optional remote host the paths live on (`user@host` form)
    pub remote_host: Option<String>,
}

/// Validated configuration of a backup root
#[derive(Debug, Clone)]
pub struct RootConfig {
    /// Ordered tier list; empty means no retention beyond `current`
    pub tiers: Vec<IntervalTier>,
    /// Source selection
    pub source: SourceSpec,
}

impl RootConfig {
    /// Load and validate the configuration files inside `root`
    ///
    /// # Errors
    ///
    /// [`SnapError::Config`] on a malformed tier line, an invalid tier
    /// name, a non-positive delay or count, a duplicate tier name, or a
    /// missing/conflicting source selection.
    pub fn load(root: &Path) -> Result<RootConfig> {
        if !root.is_dir() {
            return Err(SnapError::config(format!(
                "backup root {:?} is not a directory",
                root
            )));
        }

        let tiers = load_tiers(&root.join(INTERVALS_FILE_NAME))?;
        let source = load_source(root)?;

        debug!(
            tiers = tiers.len(),
            remote = source.remote_host.is_some(),
            "loaded backup root configuration"
        );
        Ok(RootConfig { tiers, source })
    }
}

/// Parse the tier list file
///
/// An absent or blank file yields zero tiers: every displaced `current`
/// snapshot is then discarded instead of promoted.
fn load_tiers(path: &Path) -> Result<Vec<IntervalTier>> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut tiers = Vec::new();
    for (lineno, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let tier = parse_tier_line(line)
            .map_err(|msg| SnapError::config(format!("{:?} line {}: {}", path, lineno + 1, msg)))?;
        if tiers.iter().any(|t: &IntervalTier| t.name == tier.name) {
            return Err(SnapError::config(format!(
                "{:?} line {}: duplicate tier name {:?}",
                path,
                lineno + 1,
                tier.name
            )));
        }
        tiers.push(tier);
    }
    Ok(tiers)
}

/// Parse one `<name> <delay-seconds> <count>` line
fn parse_tier_line(line: &str) -> std::result::Result<IntervalTier, String> {
    let mut fields = line.split_whitespace();
    let name = fields.next().ok_or("missing tier name")?;
    let delay = fields.next().ok_or("missing delay")?;
    let count = fields.next().ok_or("missing count")?;
    if fields.next().is_some() {
        return Err("trailing fields after count".to_string());
    }

    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(format!(
            "invalid tier name {:?} (expected [A-Za-z0-9_]+)",
            name
        ));
    }
    let delay_secs: u64 = delay
        .parse()
        .map_err(|_| format!("invalid delay {:?} (expected positive integer seconds)", delay))?;
    if delay_secs == 0 {
        return Err("delay must be positive".to_string());
    }
    let count: usize = count
        .parse()
        .map_err(|_| format!("invalid count {:?} (expected positive integer)", count))?;
    if count == 0 {
        return Err("count must be at least 1".to_string());
    }

    Ok(IntervalTier {
        name: name.to_string(),
        delay_secs,
        count,
    })
}

/// Resolve the source selection: exactly one mechanism must be configured
fn load_source(root: &Path) -> Result<SourceSpec> {
    let sources_path = root.join(SOURCES_FILE_NAME);
    let sourcefile_path = root.join(SOURCEFILE_FILE_NAME);

    let list = match (sources_path.is_file(), sourcefile_path.is_file()) {
        (true, true) => {
            return Err(SnapError::config(format!(
                "both {:?} and {:?} exist; configure exactly one source mechanism",
                SOURCES_FILE_NAME, SOURCEFILE_FILE_NAME
            )))
        }
        (false, false) => {
            return Err(SnapError::config(format!(
                "no source selection: create {:?} or {:?} in the backup root",
                SOURCES_FILE_NAME, SOURCEFILE_FILE_NAME
            )))
        }
        (true, false) => {
            let paths: Vec<PathBuf> = fs::read_to_string(&sources_path)?
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(PathBuf::from)
                .collect();
            if paths.is_empty() {
                return Err(SnapError::config(format!(
                    "{:?} lists no source paths",
                    sources_path
                )));
            }
            SourceList::Explicit(paths)
        }
        (false, true) => {
            let text = fs::read_to_string(&sourcefile_path)?;
            let line = text
                .lines()
                .map(str::trim)
                .find(|l| !l.is_empty())
                .ok_or_else(|| {
                    SnapError::config(format!("{:?} names no path-list file", sourcefile_path))
                })?;
            SourceList::External(PathBuf::from(line))
        }
    };

    let remote_host = match fs::read_to_string(root.join(TARGET_FILE_NAME)) {
        Ok(text) => text
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .map(str::to_string),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
        Err(e) => return Err(e.into()),
    };

    Ok(SourceSpec { list, remote_host })
}
