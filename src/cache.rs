//! Freshness cache: the single "last known good" value per category.
//!
//! Every read tries the shared-memory tier first, then the JSON snapshot tier,
//! and finally falls back to the cached value. Callers always get a
//! [`Reading`]; failures of the individual tiers are logged and absorbed here.
//!
//! Each category sits behind its own `parking_lot::Mutex`, which guards both
//! the category's readers and its cached entry, so concurrent request handlers
//! never observe a half-updated value. Categories are independent and give no
//! ordering guarantee relative to each other.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::config::IpcConfig;
use crate::snapshot::{files, Clock, SnapshotReader, SystemClock};
use crate::types::{DetectionSet, ProducerStats, ProducerStatus, TimelineSet, Timestamped, TrackSet};

#[cfg(feature = "shm")]
use crate::frame::{Frame, Record};
#[cfg(feature = "shm")]
use crate::shm::ShmReader;

/// Tier a value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    /// Memory-mapped binary frame
    SharedMemory,
    /// JSON snapshot file
    Snapshot,
}

/// Result of a cache read.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Reading<T> {
    /// Nothing valid has ever been read for this category.
    Unavailable,
    /// A value exists but is not confirmed fresh: either no tier produced new
    /// data on this call, or its timestamp is unknown or outside the window.
    Stale {
        /// Last known good value
        value: T,
        /// Age of the data, if its timestamp is known
        #[serde(with = "humantime_serde")]
        age: Option<Duration>,
        /// Tier the value originally came from
        source: Source,
    },
    /// Newly read and inside the freshness window.
    Fresh {
        /// The value
        value: T,
        /// Tier it came from
        source: Source,
    },
}

impl<T> Reading<T> {
    /// The value, if any.
    pub fn value(&self) -> Option<&T> {
        match self {
            Reading::Unavailable => None,
            Reading::Stale { value, .. } | Reading::Fresh { value, .. } => Some(value),
        }
    }

    /// Consume into the value, if any.
    pub fn into_value(self) -> Option<T> {
        match self {
            Reading::Unavailable => None,
            Reading::Stale { value, .. } | Reading::Fresh { value, .. } => Some(value),
        }
    }

    /// Whether the reading is confirmed fresh.
    pub fn is_fresh(&self) -> bool {
        matches!(self, Reading::Fresh { .. })
    }

    /// Whether the reading carries a value.
    pub fn is_available(&self) -> bool {
        !matches!(self, Reading::Unavailable)
    }

    /// Tier the value came from.
    pub fn source(&self) -> Option<Source> {
        match self {
            Reading::Unavailable => None,
            Reading::Stale { source, .. } | Reading::Fresh { source, .. } => Some(*source),
        }
    }
}

/// The last accepted value of one category.
#[derive(Debug, Clone)]
pub struct CachedValue<T> {
    /// Accepted value
    pub value: T,
    /// Producer timestamp; `None` means freshness is unknown
    pub timestamp_ms: Option<u64>,
    /// When this process accepted it
    pub received_at: Instant,
    /// Tier it came from
    pub source: Source,
    /// Set once a read produced no new data
    pub stale: bool,
}

/// A non-blocking source of new values for one category.
pub trait FrameSource<T>: Send {
    /// New value if one is available right now.
    fn poll(&mut self) -> Option<T>;

    /// Whether the underlying resource is attached.
    fn is_attached(&self) -> bool;

    /// Frames rejected as corrupt so far.
    fn corrupt_frames(&self) -> u64;
}

#[cfg(feature = "shm")]
impl<R, T> FrameSource<T> for ShmReader<R>
where
    R: Record,
    T: From<Frame<R>>,
{
    fn poll(&mut self) -> Option<T> {
        self.try_read().map(T::from)
    }

    fn is_attached(&self) -> bool {
        ShmReader::is_attached(self)
    }

    fn corrupt_frames(&self) -> u64 {
        self.counters().corrupt
    }
}

/// Per-category read counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CategoryStats {
    /// Reads served from a new shared-memory frame
    pub shm_hits: u64,
    /// Reads served from a snapshot file
    pub snapshot_hits: u64,
    /// Reads served from the cached value
    pub cache_fallbacks: u64,
    /// Snapshots ignored because the cached value is newer
    pub superseded_snapshots: u64,
    /// Reads that found nothing at all
    pub unavailable: u64,
    /// Shared-memory frames rejected as corrupt
    pub corrupt_frames: u64,
}

/// Counters for every category.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Detections
    pub detections: CategoryStats,
    /// Tracked objects
    pub tracks: CategoryStats,
    /// Timelines
    pub timelines: CategoryStats,
    /// Producer stats
    pub stats: CategoryStats,
    /// Producer status
    pub status: CategoryStats,
}

struct Category<T> {
    name: &'static str,
    shm: Option<Box<dyn FrameSource<T>>>,
    snapshot: SnapshotReader<T>,
    max_age: Duration,
    entry: Option<CachedValue<T>>,
    stats: CategoryStats,
}

impl<T> Category<T>
where
    T: Clone + DeserializeOwned + Timestamped + Send,
{
    fn new(name: &'static str, snapshot: SnapshotReader<T>, max_age: Duration) -> Self {
        Self {
            name,
            shm: None,
            snapshot,
            max_age,
            entry: None,
            stats: CategoryStats::default(),
        }
    }

    fn age_of(timestamp_ms: Option<u64>, clock: &dyn Clock) -> Option<Duration> {
        timestamp_ms.map(|ts| Duration::from_millis(clock.now_ms().saturating_sub(ts)))
    }

    fn accept(&mut self, value: T, source: Source, clock: &dyn Clock) -> Reading<T> {
        let timestamp_ms = value.timestamp_ms();
        self.entry = Some(CachedValue {
            value: value.clone(),
            timestamp_ms,
            received_at: Instant::now(),
            source,
            stale: false,
        });

        match Self::age_of(timestamp_ms, clock) {
            Some(age) if age <= self.max_age => Reading::Fresh { value, source },
            age => Reading::Stale { value, age, source },
        }
    }

    /// The cached entry, if it is strictly newer than a value stamped
    /// `timestamp_ms`. Values of unknown age never supersede or get superseded.
    fn newer_entry(&self, timestamp_ms: Option<u64>) -> Option<&CachedValue<T>> {
        let incoming = timestamp_ms?;
        self.entry
            .as_ref()
            .filter(|entry| entry.timestamp_ms.is_some_and(|cached| cached > incoming))
    }

    fn read(&mut self, clock: &dyn Clock) -> Reading<T> {
        if let Some(shm) = self.shm.as_mut() {
            if let Some(value) = shm.poll() {
                self.stats.shm_hits += 1;
                return self.accept(value, Source::SharedMemory, clock);
            }
        }

        if let Some(snapshot) = self.snapshot.try_read(self.max_age) {
            if let Some(entry) = self.newer_entry(snapshot.value.timestamp_ms()) {
                let reading = match Self::age_of(entry.timestamp_ms, clock) {
                    Some(age) if age <= self.max_age => Reading::Fresh {
                        value: entry.value.clone(),
                        source: entry.source,
                    },
                    age => Reading::Stale {
                        value: entry.value.clone(),
                        age,
                        source: entry.source,
                    },
                };
                self.stats.superseded_snapshots += 1;
                tracing::trace!(category = self.name, "Snapshot older than cached value, ignoring");
                return reading;
            }
            self.stats.snapshot_hits += 1;
            // Unknown freshness has no timestamp, so `accept` reports it stale.
            return self.accept(snapshot.value, Source::Snapshot, clock);
        }

        match self.entry.as_mut() {
            Some(entry) => {
                self.stats.cache_fallbacks += 1;
                entry.stale = true;
                tracing::trace!(category = self.name, "No new data, serving cached value");
                Reading::Stale {
                    value: entry.value.clone(),
                    age: Self::age_of(entry.timestamp_ms, clock),
                    source: entry.source,
                }
            }
            None => {
                self.stats.unavailable += 1;
                Reading::Unavailable
            }
        }
    }

    fn stats(&self) -> CategoryStats {
        CategoryStats {
            corrupt_frames: self.shm.as_ref().map_or(0, |s| s.corrupt_frames()),
            ..self.stats
        }
    }
}

/// Thread-safe cache over both read tiers. Share it with `Arc`.
pub struct FreshnessCache {
    detections: Mutex<Category<DetectionSet>>,
    tracks: Mutex<Category<TrackSet>>,
    timelines: Mutex<Category<TimelineSet>>,
    stats: Mutex<Category<ProducerStats>>,
    status: Mutex<Category<ProducerStatus>>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for FreshnessCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FreshnessCache").finish_non_exhaustive()
    }
}

impl FreshnessCache {
    /// Cache wired to the producer's real resources as described by `config`.
    pub fn from_config(config: &IpcConfig) -> Self {
        let builder = CacheBuilder::new(&config.paths.snapshot_dir)
            .high_frequency_window(config.freshness.high_frequency)
            .low_frequency_window(config.freshness.low_frequency);

        #[cfg(all(feature = "shm", unix))]
        let builder = if config.shm.enabled {
            use crate::shm::ShmChannel;
            let dir = &config.paths.shm_dir;
            let every = config.shm.reattach_interval;
            builder
                .detections_shm(ShmReader::posix(dir, ShmChannel::DETECTIONS, every))
                .tracks_shm(ShmReader::posix(dir, ShmChannel::TRACKS, every))
                .timelines_shm(ShmReader::posix(dir, ShmChannel::TIMELINES, every))
        } else {
            builder
        };

        builder.build()
    }

    /// Start building a cache over `snapshot_dir`.
    pub fn builder(snapshot_dir: impl AsRef<Path>) -> CacheBuilder {
        CacheBuilder::new(snapshot_dir)
    }

    /// Latest detections.
    pub fn detections(&self) -> Reading<DetectionSet> {
        self.detections.lock().read(self.clock.as_ref())
    }

    /// Latest tracked objects.
    pub fn tracks(&self) -> Reading<TrackSet> {
        self.tracks.lock().read(self.clock.as_ref())
    }

    /// Latest timelines.
    pub fn timelines(&self) -> Reading<TimelineSet> {
        self.timelines.lock().read(self.clock.as_ref())
    }

    /// Latest producer statistics (snapshot tier only).
    pub fn stats(&self) -> Reading<ProducerStats> {
        self.stats.lock().read(self.clock.as_ref())
    }

    /// Latest producer status (snapshot tier only).
    pub fn status(&self) -> Reading<ProducerStatus> {
        self.status.lock().read(self.clock.as_ref())
    }

    /// Whether any shared-memory region is currently attached.
    pub fn any_shm_attached(&self) -> bool {
        fn attached<T>(c: &Category<T>) -> bool {
            c.shm.as_ref().is_some_and(|s| s.is_attached())
        }
        attached(&self.detections.lock())
            || attached(&self.tracks.lock())
            || attached(&self.timelines.lock())
    }

    /// Whether the status snapshot exists and parses, regardless of age.
    pub fn status_snapshot_readable(&self) -> bool {
        self.status.lock().snapshot.is_readable()
    }

    /// Whether the detections snapshot exists and parses, regardless of age.
    pub fn detections_snapshot_readable(&self) -> bool {
        self.detections.lock().snapshot.is_readable()
    }

    /// Freshness window for detections.
    pub fn detections_window(&self) -> Duration {
        self.detections.lock().max_age
    }

    /// Clock used for ages.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Per-category counters.
    pub fn cache_stats(&self) -> CacheStats {
        CacheStats {
            detections: self.detections.lock().stats(),
            tracks: self.tracks.lock().stats(),
            timelines: self.timelines.lock().stats(),
            stats: self.stats.lock().stats(),
            status: self.status.lock().stats(),
        }
    }
}

/// Builder for [`FreshnessCache`].
pub struct CacheBuilder {
    snapshot_dir: PathBuf,
    high_frequency: Duration,
    low_frequency: Duration,
    clock: Arc<dyn Clock>,
    detections_shm: Option<Box<dyn FrameSource<DetectionSet>>>,
    tracks_shm: Option<Box<dyn FrameSource<TrackSet>>>,
    timelines_shm: Option<Box<dyn FrameSource<TimelineSet>>>,
}

impl CacheBuilder {
    fn new(snapshot_dir: impl AsRef<Path>) -> Self {
        Self {
            snapshot_dir: snapshot_dir.as_ref().to_path_buf(),
            high_frequency: Duration::from_millis(5000),
            low_frequency: Duration::from_millis(10_000),
            clock: Arc::new(SystemClock),
            detections_shm: None,
            tracks_shm: None,
            timelines_shm: None,
        }
    }

    /// Window for detections, tracks and timelines.
    pub fn high_frequency_window(mut self, window: Duration) -> Self {
        self.high_frequency = window;
        self
    }

    /// Window for stats and status.
    pub fn low_frequency_window(mut self, window: Duration) -> Self {
        self.low_frequency = window;
        self
    }

    /// Clock used for freshness decisions.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Shared-memory source for detections.
    pub fn detections_shm(mut self, source: impl FrameSource<DetectionSet> + 'static) -> Self {
        self.detections_shm = Some(Box::new(source));
        self
    }

    /// Shared-memory source for tracks.
    pub fn tracks_shm(mut self, source: impl FrameSource<TrackSet> + 'static) -> Self {
        self.tracks_shm = Some(Box::new(source));
        self
    }

    /// Shared-memory source for timelines.
    pub fn timelines_shm(mut self, source: impl FrameSource<TimelineSet> + 'static) -> Self {
        self.timelines_shm = Some(Box::new(source));
        self
    }

    /// Finish.
    pub fn build(self) -> FreshnessCache {
        let dir = self.snapshot_dir.as_path();
        let clock = self.clock;
        let high = self.high_frequency;
        let low = self.low_frequency;

        let mut detections = Category::new(
            "detections",
            SnapshotReader::new(dir, files::DETECTIONS, clock.clone()),
            high,
        );
        detections.shm = self.detections_shm;

        let mut tracks = Category::new(
            "tracks",
            SnapshotReader::new(dir, files::TRACKS, clock.clone()),
            high,
        );
        tracks.shm = self.tracks_shm;

        let mut timelines = Category::new(
            "timelines",
            SnapshotReader::new(dir, files::TIMELINES, clock.clone()),
            high,
        );
        timelines.shm = self.timelines_shm;

        FreshnessCache {
            detections: Mutex::new(detections),
            tracks: Mutex::new(tracks),
            timelines: Mutex::new(timelines),
            stats: Mutex::new(Category::new(
                "stats",
                SnapshotReader::new(dir, files::STATS, clock.clone()),
                low,
            )),
            status: Mutex::new(Category::new(
                "status",
                SnapshotReader::new(dir, files::STATUS, clock.clone()),
                low,
            )),
            clock,
        }
    }
}
