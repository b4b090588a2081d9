//! End-to-end tests: simulated producer writing shared-memory frames, cache reading them.
#![cfg(feature = "shm")]

use std::sync::Arc;
use std::time::Duration;

use omnisight_ipc::cache::{FreshnessCache, Reading, Source};
use omnisight_ipc::frame::{self, Frame};
use omnisight_ipc::shm::{InProcessSignal, ShmReader};
use omnisight_ipc::sim::{synthetic_detections, ShmPublisher, SnapshotWriter};
use omnisight_ipc::snapshot::{files, ManualClock};
use omnisight_ipc::types::{Detection, DetectionSet, TrackedObject};
use tempfile::TempDir;

const T0: u64 = 1_700_000_000_000;

struct Harness {
    dir: TempDir,
    clock: Arc<ManualClock>,
    publisher: ShmPublisher<Detection>,
    cache: FreshnessCache,
}

fn harness() -> Harness {
    let dir = TempDir::new().unwrap();
    let region = dir.path().join("omnisight_detections");
    let signal = InProcessSignal::new();
    let publisher = ShmPublisher::<Detection>::new(&region, signal.clone()).unwrap();
    let reader = ShmReader::<Detection>::with_signal(&region, Box::new(signal), Duration::ZERO);

    let clock = Arc::new(ManualClock::new(T0));
    let cache = FreshnessCache::builder(dir.path())
        .clock(clock.clone())
        .detections_shm(reader)
        .build();

    Harness {
        dir,
        clock,
        publisher,
        cache,
    }
}

#[test]
fn test_published_frame_is_read_fresh() {
    let mut h = harness();
    let frame_id = h
        .publisher
        .publish(T0, synthetic_detections(1, T0))
        .unwrap();
    assert_eq!(frame_id, 1);

    match h.cache.detections() {
        Reading::Fresh { value, source } => {
            assert_eq!(source, Source::SharedMemory);
            assert_eq!(value.frame_id, Some(1));
            assert_eq!(value.timestamp_ms, Some(T0));
            assert_eq!(value.detections, synthetic_detections(1, T0));
        }
        other => panic!("expected fresh shm reading, got {:?}", other),
    }
    assert!(h.cache.any_shm_attached());
}

#[test]
fn test_no_new_post_serves_cached_value() {
    let mut h = harness();
    h.publisher.publish(T0, synthetic_detections(1, T0)).unwrap();
    assert!(h.cache.detections().is_fresh());

    // No post since the last read: the region is not re-read.
    h.clock.advance(Duration::from_millis(200));
    match h.cache.detections() {
        Reading::Stale { value, age, source } => {
            assert_eq!(value.frame_id, Some(1));
            assert_eq!(age, Some(Duration::from_millis(200)));
            assert_eq!(source, Source::SharedMemory);
        }
        other => panic!("expected cached value, got {:?}", other),
    }

    let stats = h.cache.cache_stats().detections;
    assert_eq!(stats.shm_hits, 1);
    assert_eq!(stats.cache_fallbacks, 1);
}

#[test]
fn test_older_snapshot_never_replaces_shared_memory_frame() {
    let mut h = harness();
    let snapshots = SnapshotWriter::new(h.dir.path()).unwrap();
    snapshots
        .write(
            files::DETECTIONS,
            &DetectionSet {
                frame_id: Some(99),
                timestamp_ms: Some(T0 - 3000),
                detections: Vec::new(),
            },
        )
        .unwrap();
    h.publisher.publish(T0, synthetic_detections(1, T0)).unwrap();

    let reading = h.cache.detections();
    assert_eq!(reading.source(), Some(Source::SharedMemory));
    assert_eq!(reading.value().and_then(|d| d.frame_id), Some(1));

    // Reads outpace frames; the older snapshot must not win in between.
    for _ in 0..5 {
        let reading = h.cache.detections();
        assert!(reading.is_fresh());
        assert_eq!(reading.source(), Some(Source::SharedMemory));
        assert_eq!(reading.value().and_then(|d| d.timestamp_ms), Some(T0));
    }
    assert_eq!(h.cache.cache_stats().detections.superseded_snapshots, 5);

    // A snapshot newer than the cached frame is taken.
    snapshots
        .write(
            files::DETECTIONS,
            &DetectionSet {
                frame_id: Some(100),
                timestamp_ms: Some(T0 + 50),
                detections: Vec::new(),
            },
        )
        .unwrap();
    h.clock.advance(Duration::from_millis(50));
    let reading = h.cache.detections();
    assert_eq!(reading.source(), Some(Source::Snapshot));
    assert_eq!(reading.value().and_then(|d| d.frame_id), Some(100));
}

#[test]
fn test_burst_of_frames_yields_latest_only() {
    let mut h = harness();
    for n in 0..4 {
        h.publisher
            .publish(T0 + n, synthetic_detections(n + 1, T0 + n))
            .unwrap();
    }

    let reading = h.cache.detections();
    assert_eq!(reading.value().and_then(|d| d.frame_id), Some(4));

    // All posts were drained by the first read.
    let reading = h.cache.detections();
    assert_eq!(reading.source(), Some(Source::SharedMemory));
    assert!(!reading.is_fresh());
    assert_eq!(h.cache.cache_stats().detections.shm_hits, 1);
}

#[test]
fn test_corrupt_frame_never_updates_cache() {
    let mut h = harness();
    h.publisher.publish(T0, synthetic_detections(1, T0)).unwrap();
    assert!(h.cache.detections().is_fresh());

    let mut bytes = frame::encode(&Frame::new(2, T0 + 10, synthetic_detections(2, T0 + 10)));
    let last = bytes.len() - 1;
    bytes[last] ^= 0xFF;
    h.publisher.publish_raw(&bytes).unwrap();

    match h.cache.detections() {
        Reading::Stale { value, .. } => assert_eq!(value.frame_id, Some(1)),
        other => panic!("expected previous value, got {:?}", other),
    }
    assert_eq!(h.cache.cache_stats().detections.corrupt_frames, 1);

    // The reader remaps the region and recovers on the next good frame.
    h.publisher
        .publish_frame(&Frame::new(3, T0 + 20, synthetic_detections(3, T0 + 20)))
        .unwrap();
    let reading = h.cache.detections();
    assert!(reading.is_fresh());
    assert_eq!(reading.value().and_then(|d| d.frame_id), Some(3));
}

#[test]
fn test_old_frame_is_cached_but_stale() {
    let mut h = harness();
    h.publisher
        .publish(T0 - 6000, synthetic_detections(1, T0 - 6000))
        .unwrap();

    match h.cache.detections() {
        Reading::Stale { value, age, source } => {
            assert_eq!(value.frame_id, Some(1));
            assert_eq!(age, Some(Duration::from_secs(6)));
            assert_eq!(source, Source::SharedMemory);
        }
        other => panic!("expected stale shm reading, got {:?}", other),
    }
}

#[test]
fn test_reader_without_producer_is_not_attached() {
    let dir = TempDir::new().unwrap();
    let mut reader = ShmReader::<TrackedObject>::with_signal(
        dir.path().join("omnisight_tracks"),
        Box::new(InProcessSignal::new()),
        Duration::from_secs(60),
    );

    assert!(reader.try_read().is_none());
    assert!(!reader.is_attached());

    // Rate-limited: the region appearing does not help until the interval passes.
    let publisher_signal = InProcessSignal::new();
    let mut publisher =
        ShmPublisher::<TrackedObject>::new(reader.region_path(), publisher_signal).unwrap();
    publisher.publish(T0, Vec::new()).unwrap();
    assert!(reader.try_read().is_none());
    assert!(!reader.is_attached());
}

#[test]
fn test_frame_id_regression_is_accepted_and_counted() {
    let dir = TempDir::new().unwrap();
    let region = dir.path().join("omnisight_detections");
    let signal = InProcessSignal::new();
    let mut publisher = ShmPublisher::<Detection>::new(&region, signal.clone()).unwrap();
    let mut reader = ShmReader::<Detection>::with_signal(&region, Box::new(signal), Duration::ZERO);

    publisher
        .publish_frame(&Frame::new(50, T0, Vec::new()))
        .unwrap();
    assert_eq!(reader.try_read().map(|f| f.header.frame_id), Some(50));

    // Producer restarted and counts from one again.
    publisher
        .publish_frame(&Frame::new(1, T0 + 100, Vec::new()))
        .unwrap();
    assert_eq!(reader.try_read().map(|f| f.header.frame_id), Some(1));
    assert_eq!(reader.counters().frame_id_regressions, 1);
    assert_eq!(reader.counters().frames, 2);
}
