//! Per-category shared-memory reader.

use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::frame::{self, Frame, Record};

use super::region::SharedRegion;
use super::signal::ReadinessSignal;
#[cfg(unix)]
use super::signal::PosixSemaphore;
use super::ShmChannel;

/// Diagnostic counters for one reader.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReaderCounters {
    /// Frames decoded and returned
    pub frames: u64,
    /// Frames rejected by the codec
    pub corrupt: u64,
    /// Posts discarded because a newer frame superseded them
    pub skipped_posts: u64,
    /// Times the frame id went backwards
    pub frame_id_regressions: u64,
}

enum SignalSlot {
    Attached(Box<dyn ReadinessSignal>),
    #[cfg(unix)]
    Named(&'static str),
}

/// Reads the most recent frame of one category from shared memory.
///
/// The region and the semaphore are attached lazily and re-attached after a
/// failure, at most once per `reattach_interval`. [`try_read`](Self::try_read)
/// never blocks.
pub struct ShmReader<R> {
    region_path: PathBuf,
    region: Option<SharedRegion>,
    signal: SignalSlot,
    reattach_interval: Duration,
    last_attach_attempt: Option<Instant>,
    last_frame_id: Option<u64>,
    counters: ReaderCounters,
    _record: PhantomData<fn() -> R>,
}

impl<R: Record> ShmReader<R> {
    /// Reader backed by the producer's POSIX segment and named semaphore.
    #[cfg(unix)]
    pub fn posix(shm_dir: &Path, channel: ShmChannel, reattach_interval: Duration) -> Self {
        Self::build(
            channel.region_path(shm_dir),
            SignalSlot::Named(channel.semaphore),
            reattach_interval,
        )
    }

    /// Reader over `region_path` gated by an already-open signal.
    pub fn with_signal(
        region_path: impl Into<PathBuf>,
        signal: Box<dyn ReadinessSignal>,
        reattach_interval: Duration,
    ) -> Self {
        Self::build(
            region_path.into(),
            SignalSlot::Attached(signal),
            reattach_interval,
        )
    }

    fn build(region_path: PathBuf, signal: SignalSlot, reattach_interval: Duration) -> Self {
        Self {
            region_path,
            region: None,
            signal,
            reattach_interval,
            last_attach_attempt: None,
            last_frame_id: None,
            counters: ReaderCounters::default(),
            _record: PhantomData,
        }
    }

    /// Whether both the region and the signal are attached.
    pub fn is_attached(&self) -> bool {
        self.region.is_some() && matches!(self.signal, SignalSlot::Attached(_))
    }

    /// Diagnostic counters.
    pub fn counters(&self) -> ReaderCounters {
        self.counters
    }

    /// Path of the region this reader maps.
    pub fn region_path(&self) -> &Path {
        &self.region_path
    }

    /// Drop the region mapping so the next read maps the file afresh.
    pub fn detach(&mut self) {
        if self.region.take().is_some() {
            tracing::debug!(region = %self.region_path.display(), "Detached shared memory region");
        }
    }

    /// Return the latest frame if the producer has signalled one since the
    /// last call. Returns `None` immediately when nothing new is available,
    /// when the producer is absent, or when the frame fails validation.
    pub fn try_read(&mut self) -> Option<Frame<R>> {
        if !self.is_attached() && !self.try_attach() {
            return None;
        }

        let SignalSlot::Attached(signal) = &mut self.signal else {
            return None;
        };
        if !signal.try_acquire() {
            return None;
        }
        let drained = signal.drain();
        self.counters.skipped_posts += drained as u64;

        // Copy once so the header, checksum and records all come from the same
        // bytes. A copy torn by a concurrent rewrite fails the checksum.
        let region = self.region.as_ref()?.bytes();
        let copy = region[..region.len().min(Frame::<R>::max_encoded_len())].to_vec();
        match frame::decode::<R>(&copy) {
            Ok(frame) => {
                self.observe_frame_id(frame.header.frame_id);
                self.counters.frames += 1;
                Some(frame)
            }
            Err(err) => {
                self.counters.corrupt += 1;
                tracing::warn!(
                    kind = R::KIND,
                    region = %self.region_path.display(),
                    error = %err,
                    "Dropping corrupt shared memory frame"
                );
                // The producer may have recreated the segment; map it again.
                self.detach();
                None
            }
        }
    }

    fn observe_frame_id(&mut self, frame_id: u64) {
        if let Some(last) = self.last_frame_id {
            if frame_id < last {
                self.counters.frame_id_regressions += 1;
                tracing::warn!(
                    kind = R::KIND,
                    last,
                    frame_id,
                    "Frame id went backwards, producer restarted?"
                );
            }
        }
        self.last_frame_id = Some(frame_id);
    }

    fn try_attach(&mut self) -> bool {
        let now = Instant::now();
        if let Some(last) = self.last_attach_attempt {
            if now.duration_since(last) < self.reattach_interval {
                return false;
            }
        }
        self.last_attach_attempt = Some(now);

        #[cfg(unix)]
        if let SignalSlot::Named(name) = self.signal {
            match PosixSemaphore::open(name) {
                Ok(sem) => {
                    tracing::info!(semaphore = name, "Opened readiness semaphore");
                    self.signal = SignalSlot::Attached(Box::new(sem));
                }
                Err(err) => {
                    tracing::debug!(semaphore = name, error = %err, "Readiness semaphore not available");
                    return false;
                }
            }
        }

        if self.region.is_none() {
            match SharedRegion::open(&self.region_path) {
                Ok(region) => {
                    tracing::info!(
                        kind = R::KIND,
                        region = %self.region_path.display(),
                        bytes = region.len(),
                        "Attached shared memory region"
                    );
                    self.region = Some(region);
                }
                Err(err) => {
                    tracing::debug!(kind = R::KIND, error = %err, "Shared memory region not available");
                    return false;
                }
            }
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::encode;
    use crate::shm::region::RegionWriter;
    use crate::shm::signal::{InProcessSignal, SignalPoster};
    use crate::types::{BoundingBox, Detection};
    use tempfile::TempDir;

    fn detection(id: u32) -> Detection {
        Detection {
            id,
            class_id: 1,
            confidence: 0.9,
            bbox: BoundingBox::default(),
            timestamp_ms: 1000,
        }
    }

    fn setup() -> (TempDir, RegionWriter, InProcessSignal, ShmReader<Detection>) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("omnisight_detections");
        let writer =
            RegionWriter::create(&path, Frame::<Detection>::max_encoded_len()).unwrap();
        let signal = InProcessSignal::new();
        let reader = ShmReader::with_signal(&path, Box::new(signal.clone()), Duration::ZERO);
        (dir, writer, signal, reader)
    }

    #[test]
    fn test_no_signal_returns_none() {
        let (_dir, mut writer, _signal, mut reader) = setup();
        writer
            .write_frame(&encode(&Frame::new(1, 1, vec![detection(1)])))
            .unwrap();
        assert!(reader.try_read().is_none());
        assert!(reader.is_attached());
    }

    #[test]
    fn test_signalled_frame_is_returned_once() {
        let (_dir, mut writer, mut signal, mut reader) = setup();
        let frame = Frame::new(3, 1000, vec![detection(1), detection(2)]);
        writer.write_frame(&encode(&frame)).unwrap();
        signal.post().unwrap();

        assert_eq!(reader.try_read(), Some(frame));
        assert!(reader.try_read().is_none());
        assert_eq!(reader.counters().frames, 1);
    }

    #[test]
    fn test_backlog_is_drained() {
        let (_dir, mut writer, mut signal, mut reader) = setup();
        for id in 1..=3 {
            writer
                .write_frame(&encode(&Frame::new(id, 1000, vec![detection(id as u32)])))
                .unwrap();
            signal.post().unwrap();
        }

        let frame = reader.try_read().unwrap();
        assert_eq!(frame.header.frame_id, 3);
        assert_eq!(reader.counters().skipped_posts, 2);
        assert!(reader.try_read().is_none());
    }

    #[test]
    fn test_corrupt_frame_counted_and_dropped() {
        let (_dir, mut writer, mut signal, mut reader) = setup();
        let mut bytes = encode(&Frame::new(1, 1, vec![detection(1)]));
        bytes[40] ^= 0x01;
        writer.write_frame(&bytes).unwrap();
        signal.post().unwrap();

        assert!(reader.try_read().is_none());
        assert_eq!(reader.counters().corrupt, 1);
    }

    #[test]
    fn test_frame_id_regression_is_accepted() {
        let (_dir, mut writer, mut signal, mut reader) = setup();
        writer
            .write_frame(&encode(&Frame::new(10, 1, vec![detection(1)])))
            .unwrap();
        signal.post().unwrap();
        assert!(reader.try_read().is_some());

        writer
            .write_frame(&encode(&Frame::new(2, 1, vec![detection(1)])))
            .unwrap();
        signal.post().unwrap();
        assert_eq!(reader.try_read().unwrap().header.frame_id, 2);
        assert_eq!(reader.counters().frame_id_regressions, 1);
    }

    #[test]
    fn test_concurrent_rewrite_never_yields_mixed_frame() {
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::sync::Arc;

        let (_dir, mut writer, signal, mut reader) = setup();
        let full = |id: u64| {
            let records = (0..Detection::MAX_PER_FRAME)
                .map(|_| detection(id as u32))
                .collect();
            encode(&Frame::new(id, 1000, records))
        };
        let frames = [full(1), full(2)];

        let stop = Arc::new(AtomicBool::new(false));
        let flag = stop.clone();
        let mut poster = signal.clone();
        let handle = std::thread::spawn(move || {
            let mut n = 0usize;
            while !flag.load(Ordering::Relaxed) {
                writer.write_frame(&frames[n % 2]).unwrap();
                poster.post().unwrap();
                n += 1;
            }
        });

        let deadline = Instant::now() + Duration::from_millis(500);
        let mut accepted = 0u64;
        while Instant::now() < deadline {
            if let Some(frame) = reader.try_read() {
                accepted += 1;
                let id = frame.header.frame_id as u32;
                assert_eq!(frame.records.len(), Detection::MAX_PER_FRAME);
                assert!(
                    frame.records.iter().all(|d| d.id == id),
                    "frame {} carries records from another frame",
                    id
                );
            }
        }
        stop.store(true, Ordering::Relaxed);
        handle.join().unwrap();

        assert!(accepted > 0);
        assert_eq!(reader.counters().frames, accepted);
    }

    #[test]
    fn test_missing_region_attach_is_rate_limited() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("late");
        let mut signal = InProcessSignal::new();
        let mut reader: ShmReader<Detection> =
            ShmReader::with_signal(&path, Box::new(signal.clone()), Duration::from_secs(3600));

        assert!(reader.try_read().is_none());
        assert!(!reader.is_attached());

        // Region appears, but the retry window has not elapsed.
        let mut writer =
            RegionWriter::create(&path, Frame::<Detection>::max_encoded_len()).unwrap();
        writer
            .write_frame(&encode(&Frame::new(1, 1, vec![detection(1)])))
            .unwrap();
        signal.post().unwrap();
        assert!(reader.try_read().is_none());
        assert_eq!(signal.pending(), 1);
    }
}
