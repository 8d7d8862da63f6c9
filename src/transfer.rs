//! Snapshot transfer adapter
//!
//! The transfer step itself is an external collaborator: an rsync-style
//! tool that produces a new snapshot whose unchanged files are hardlinked
//! against the previous `current` snapshot. This module owns the narrow
//! [`SyncTool`] seam (so the rest of the system can be tested against a
//! fake) and the real [`RsyncTool`] implementation: a deterministic option
//! set derived from the probed tool version, a files-from list, and a
//! `--link-dest` baseline.
//!
//! The adapter never writes into a real snapshot. It is pointed at the
//! staging directory by the run coordinator, and the completion timestamp
//! is attached only after the tool exits successfully.

use crate::config::{SourceList, SourceSpec};
use crate::error::{Result, SnapError};
use std::ffi::OsString;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::NamedTempFile;
use tracing::{debug, info};

/// The external synchronization collaborator
///
/// Contract: populate `dest` from the configured source path set,
/// hardlinking unchanged files against `baseline` when one is given, and
/// fail loudly (an `Err`) on any transfer problem. Implementations must
/// not touch anything outside `dest`.
pub trait SyncTool {
    /// Produce a snapshot of `source` at `dest`
    fn sync(&self, source: &SourceSpec, baseline: Option<&Path>, dest: &Path) -> Result<()>;
}

/// A parsed rsync version, used to select forward-compatible options
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct RsyncVersion {
    /// Major version component
    pub major: u32,
    /// Minor version component
    pub minor: u32,
    /// Patch version component
    pub patch: u32,
}

impl RsyncVersion {
    /// Whether this version is at least `major.minor`
    pub fn at_least(&self, major: u32, minor: u32) -> bool {
        (self.major, self.minor) >= (major, minor)
    }
}

/// Transfer adapter shelling out to rsync
#[derive(Debug, Clone)]
pub struct RsyncTool {
    program: PathBuf,
}

impl Default for RsyncTool {
    fn default() -> Self {
        Self::new()
    }
}

impl RsyncTool {
    /// Use the `rsync` binary found on `PATH`
    pub fn new() -> Self {
        Self::with_program("rsync")
    }

    /// Use a specific tool binary
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        RsyncTool {
            program: program.into(),
        }
    }

    /// Probe the tool's version from its `--version` banner
    ///
    /// # Errors
    ///
    /// [`SnapError::Tool`] when the tool cannot be executed or the banner
    /// does not contain a parseable version.
    pub fn probe_version(&self) -> Result<RsyncVersion> {
        let output = Command::new(&self.program)
            .arg("--version")
            .output()
            .map_err(|e| {
                SnapError::tool(format!("cannot execute {:?}: {}", self.program, e))
            })?;
        if !output.status.success() {
            return Err(SnapError::tool(format!(
                "{:?} --version exited with {}",
                self.program, output.status
            )));
        }
        let banner = String::from_utf8_lossy(&output.stdout);
        let first_line = banner.lines().next().unwrap_or("");
        parse_version_line(first_line).ok_or_else(|| {
            SnapError::tool(format!(
                "unparsable version banner from {:?}: {:?}",
                self.program, first_line
            ))
        })
    }
}

impl SyncTool for RsyncTool {
    fn sync(&self, source: &SourceSpec, baseline: Option<&Path>, dest: &Path) -> Result<()> {
        let version = self.probe_version()?;
        debug!(?version, "probed transfer tool");

        // An explicit source list is materialized into a temporary
        // files-from list; the guard keeps it alive until the tool exits.
        let (files_from, _guard) = match &source.list {
            SourceList::Explicit(paths) => {
                let mut file = NamedTempFile::new()?;
                for path in paths {
                    file.write_all(path.as_os_str().as_encoded_bytes())?;
                    file.write_all(b"\n")?;
                }
                file.flush()?;
                (file.path().to_path_buf(), Some(file))
            }
            SourceList::External(path) => (path.clone(), None),
        };

        let args = argument_vector(&version, &files_from, source.remote_host.as_deref(), baseline, dest);
        info!(
            program = %self.program.display(),
            dest = %dest.display(),
            baseline = ?baseline.map(|b| b.display().to_string()),
            "starting transfer"
        );

        let status = Command::new(&self.program)
            .args(&args)
            .status()
            .map_err(|e| SnapError::tool(format!("cannot execute {:?}: {}", self.program, e)))?;
        if !status.success() {
            return Err(SnapError::tool(format!(
                "{:?} exited with {}",
                self.program, status
            )));
        }
        info!(dest = %dest.display(), "transfer complete");
        Ok(())
    }
}

/// Build the full argument vector, deterministically
///
/// The base set covers the archival contract: permissions, ownership,
/// extended attributes, hardlinks, symlinks, sparse files, and ACLs, with
/// `--fake-super` emulating privileged ownership metadata when running
/// unprivileged. Capabilities of newer tool versions are enabled
/// conditionally from the probed version.
fn argument_vector(
    version: &RsyncVersion,
    files_from: &Path,
    remote_host: Option<&str>,
    baseline: Option<&Path>,
    dest: &Path,
) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![
        "-aHAXS".into(),
        "--numeric-ids".into(),
        "--delete".into(),
        "--delete-excluded".into(),
        "--fake-super".into(),
    ];
    if version.at_least(3, 1) {
        args.push("--open-noatime".into());
    }

    let mut files_from_arg = OsString::from("--files-from=");
    files_from_arg.push(files_from);
    args.push(files_from_arg);

    if let Some(baseline) = baseline {
        let mut link_dest = OsString::from("--link-dest=");
        link_dest.push(baseline);
        args.push(link_dest);
    }

    // Listed paths are absolute, so the transfer root is `/` — on the
    // remote host when a target descriptor is configured.
    let src = match remote_host {
        Some(host) => OsString::from(format!("{}:/", host)),
        None => OsString::from("/"),
    };
    args.push(src);
    args.push(dest.as_os_str().to_os_string());
    args
}

/// Extract a version from a banner line like
/// `rsync  version 3.2.7  protocol version 31`
fn parse_version_line(line: &str) -> Option<RsyncVersion> {
    let mut tokens = line.split_whitespace();
    tokens.find(|t| *t == "version")?;
    let number = tokens.next()?;
    let mut parts = number.split('.').map(|p| p.parse::<u32>());
    let major = parts.next()?.ok()?;
    let minor = parts.next()?.ok()?;
    let patch = match parts.next() {
        Some(p) => p.ok()?,
        None => 0,
    };
    Some(RsyncVersion {
        major,
        minor,
        patch,
    })
}
