//! Out-of-band completion timestamps for snapshot directories
//!
//! A snapshot's completion time cannot be derived from filesystem mtimes:
//! hardlinked trees share mtimes with the snapshot they were linked
//! against. Instead each snapshot directory carries one extended attribute
//! holding an RFC-2822 timestamp string, written only after its transfer
//! fully succeeded.
//!
//! The store is a narrow injectable interface so the retention engine can
//! be tested against an in-memory map instead of real filesystem
//! attributes.

use crate::error::{Result, SnapError};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::trace;

/// Extended attribute holding a snapshot's completion timestamp
pub const TIMESTAMP_ATTR: &str = "user.tiersnap.completed";

/// Key-value store of completion timestamps over snapshot directories
///
/// `read` returns `Ok(None)` when no timestamp is attached; deciding
/// whether that is fatal is the caller's business (it is fatal for
/// promotion decisions, informational for reports).
pub trait TimestampStore {
    /// Read the completion timestamp attached to `snapshot`
    ///
    /// # Errors
    ///
    /// [`SnapError::Timestamp`] if an attribute exists but cannot be
    /// parsed; [`SnapError::Io`] on other filesystem errors.
    fn read(&self, snapshot: &Path) -> Result<Option<DateTime<Utc>>>;

    /// Attach a completion timestamp to `snapshot`
    fn write(&self, snapshot: &Path, ts: DateTime<Utc>) -> Result<()>;

    /// Note that `snapshot` was renamed
    ///
    /// Real extended attributes travel with the directory, so the default
    /// is a no-op; keyed test doubles re-key here.
    fn relocate(&self, _from: &Path, _to: &Path) -> Result<()> {
        Ok(())
    }

    /// Note that `snapshot` was removed
    fn forget(&self, _snapshot: &Path) -> Result<()> {
        Ok(())
    }
}

impl<T: TimestampStore + ?Sized> TimestampStore for std::sync::Arc<T> {
    fn read(&self, snapshot: &Path) -> Result<Option<DateTime<Utc>>> {
        (**self).read(snapshot)
    }

    fn write(&self, snapshot: &Path, ts: DateTime<Utc>) -> Result<()> {
        (**self).write(snapshot, ts)
    }

    fn relocate(&self, from: &Path, to: &Path) -> Result<()> {
        (**self).relocate(from, to)
    }

    fn forget(&self, snapshot: &Path) -> Result<()> {
        (**self).forget(snapshot)
    }
}

/// Timestamp store backed by a real extended filesystem attribute
#[derive(Debug, Default)]
pub struct XattrTimestampStore;

impl XattrTimestampStore {
    /// Create a new attribute-backed store
    pub fn new() -> Self {
        XattrTimestampStore
    }
}

impl TimestampStore for XattrTimestampStore {
    fn read(&self, snapshot: &Path) -> Result<Option<DateTime<Utc>>> {
        let raw = match xattr::get(snapshot, TIMESTAMP_ATTR) {
            Ok(Some(raw)) => raw,
            Ok(None) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let text = std::str::from_utf8(&raw)
            .map_err(|_| SnapError::timestamp(snapshot, "attribute is not valid UTF-8"))?;
        parse_rfc2822(text)
            .map(Some)
            .map_err(|reason| SnapError::timestamp(snapshot, reason))
    }

    fn write(&self, snapshot: &Path, ts: DateTime<Utc>) -> Result<()> {
        let value = ts.to_rfc2822();
        xattr::set(snapshot, TIMESTAMP_ATTR, value.as_bytes())?;
        trace!(snapshot = %snapshot.display(), %value, "wrote completion timestamp");
        Ok(())
    }
}

/// Parse the stored RFC-2822 string back into UTC
fn parse_rfc2822(text: &str) -> std::result::Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc2822(text.trim())
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| format!("unparseable timestamp {:?}: {}", text, e))
}

/// In-memory timestamp store for tests
///
/// Keyed by snapshot path, so renames and removals must be mirrored via
/// [`TimestampStore::relocate`] and [`TimestampStore::forget`] — which the
/// retention engine and run coordinator do for every directory move.
#[derive(Debug, Default)]
pub struct MemoryTimestampStore {
    map: Mutex<HashMap<PathBuf, DateTime<Utc>>>,
}

impl MemoryTimestampStore {
    /// Create an empty in-memory store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of snapshots currently holding a timestamp
    pub fn len(&self) -> usize {
        self.map.lock().len()
    }

    /// Whether the store holds no timestamps
    pub fn is_empty(&self) -> bool {
        self.map.lock().is_empty()
    }
}

impl TimestampStore for MemoryTimestampStore {
    fn read(&self, snapshot: &Path) -> Result<Option<DateTime<Utc>>> {
        Ok(self.map.lock().get(snapshot).copied())
    }

    fn write(&self, snapshot: &Path, ts: DateTime<Utc>) -> Result<()> {
        self.map.lock().insert(snapshot.to_path_buf(), ts);
        Ok(())
    }

    fn relocate(&self, from: &Path, to: &Path) -> Result<()> {
        let mut map = self.map.lock();
        if let Some(ts) = map.remove(from) {
            map.insert(to.to_path_buf(), ts);
        }
        Ok(())
    }

    fn forget(&self, snapshot: &Path) -> Result<()> {
        self.map.lock().remove(snapshot);
        Ok(())
    }
}
