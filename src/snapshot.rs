//! JSON snapshot read tier.
//!
//! The producer periodically rewrites one small JSON file per category. Each
//! carries a `timestamp` (epoch milliseconds) which is compared against a
//! freshness window on every read. Files are owned by the producer; this
//! module never writes or deletes them.

use std::io::ErrorKind;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;

use crate::error::{IpcError, IpcResult};
use crate::types::Timestamped;

/// Snapshot file names under the snapshot directory.
pub mod files {
    /// Latest detections.
    pub const DETECTIONS: &str = "omnisight_detections.json";
    /// Latest tracked objects.
    pub const TRACKS: &str = "omnisight_tracks.json";
    /// Latest timeline predictions.
    pub const TIMELINES: &str = "omnisight_timelines.json";
    /// Aggregate producer statistics.
    pub const STATS: &str = "omnisight_stats.json";
    /// Producer process status.
    pub const STATUS: &str = "omnisight_status.json";
}

/// Source of wall-clock time in epoch milliseconds.
pub trait Clock: Send + Sync {
    /// Current time in milliseconds since the Unix epoch.
    fn now_ms(&self) -> u64;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        chrono::Utc::now().timestamp_millis().max(0) as u64
    }
}

/// Clock that only moves when told to. Used for deterministic freshness tests.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    /// Clock fixed at `now_ms`.
    pub fn new(now_ms: u64) -> Self {
        Self {
            now: AtomicU64::new(now_ms),
        }
    }

    /// Jump to `now_ms`.
    pub fn set(&self, now_ms: u64) {
        self.now.store(now_ms, Ordering::SeqCst);
    }

    /// Move forward by `by`.
    pub fn advance(&self, by: Duration) {
        self.now.fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// How fresh a snapshot is known to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Timestamp present and within the window.
    Fresh {
        /// Age at read time. Future timestamps count as zero.
        age: Duration,
    },
    /// No timestamp: returnable, never confirmed fresh.
    Unknown,
}

/// A parsed snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot<T> {
    /// Parsed payload
    pub value: T,
    /// Freshness at read time
    pub freshness: Freshness,
}

/// Reads one category's snapshot file.
pub struct SnapshotReader<T> {
    path: PathBuf,
    clock: Arc<dyn Clock>,
    _payload: PhantomData<fn() -> T>,
}

impl<T> std::fmt::Debug for SnapshotReader<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotReader")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl<T: DeserializeOwned + Timestamped> SnapshotReader<T> {
    /// Reader for `dir/file`.
    pub fn new(dir: &Path, file: &str, clock: Arc<dyn Clock>) -> Self {
        Self {
            path: dir.join(file),
            clock,
            _payload: PhantomData,
        }
    }

    /// Snapshot file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read and parse the file without any freshness check.
    pub fn load(&self) -> IpcResult<T> {
        let bytes = std::fs::read(&self.path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => IpcError::unavailable("snapshot file", &self.path, e),
            _ => IpcError::Io(e),
        })?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Read, parse and check against `max_age`.
    ///
    /// Data exactly `max_age` old is accepted; anything older is
    /// [`IpcError::Stale`].
    pub fn read(&self, max_age: Duration) -> IpcResult<Snapshot<T>> {
        let value = self.load()?;
        let freshness = match value.timestamp_ms() {
            None => Freshness::Unknown,
            Some(ts) => {
                let age_ms = self.clock.now_ms().saturating_sub(ts);
                let max_age_ms = max_age.as_millis() as u64;
                if age_ms > max_age_ms {
                    return Err(IpcError::Stale {
                        what: self.path.display().to_string(),
                        age_ms,
                        max_age_ms,
                    });
                }
                Freshness::Fresh {
                    age: Duration::from_millis(age_ms),
                }
            }
        };
        Ok(Snapshot { value, freshness })
    }

    /// [`read`](Self::read), logging and swallowing every failure.
    pub fn try_read(&self, max_age: Duration) -> Option<Snapshot<T>> {
        match self.read(max_age) {
            Ok(snapshot) => Some(snapshot),
            Err(err @ (IpcError::Unavailable { .. } | IpcError::Stale { .. })) => {
                tracing::debug!(error = %err, "Snapshot not usable");
                None
            }
            Err(err) => {
                tracing::warn!(path = %self.path.display(), error = %err, "Malformed snapshot");
                None
            }
        }
    }

    /// Whether the file exists and parses, regardless of age.
    pub fn is_readable(&self) -> bool {
        self.load().is_ok()
    }
}
