//! Producer stand-in for tests and local demos.
//!
//! The real producer is an external process. These types play its part so the
//! consumer side can be exercised end to end: they write shared-memory frames
//! and post readiness signals, rewrite snapshot files, and acknowledge
//! commands. Nothing on the consumer side depends on this module.

use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::command::{AckStatus, CommandAck, CommandRequest, CommandType};
use crate::config::IpcConfig;
use crate::error::IpcResult;
use crate::snapshot::files;
use crate::types::{
    Behaviors, BoundingBox, Detection, DetectionSet, EventType, Intervention, InterventionType,
    PerceptionStats, PredictedEvent, ProducerState, ProducerStats, ProducerStatus, Severity,
    SwarmStats, Timeline, TimelineSet, TimelineStats, TrackSet, TrackedObject, Velocity,
};

#[cfg(feature = "shm")]
pub use publisher::ShmPublisher;

#[cfg(feature = "shm")]
mod publisher {
    use std::marker::PhantomData;
    use std::path::Path;

    use crate::error::IpcResult;
    use crate::frame::{self, Frame, Record};
    use crate::shm::{RegionWriter, SignalPoster};

    /// Writes frames of one category and announces each one.
    pub struct ShmPublisher<R> {
        region: RegionWriter,
        signal: Box<dyn SignalPoster>,
        next_frame_id: u64,
        _record: PhantomData<fn(R)>,
    }

    impl<R: Record> ShmPublisher<R> {
        /// Create the region at `region_path`, sized for the largest frame.
        pub fn new(
            region_path: impl AsRef<Path>,
            signal: impl SignalPoster + 'static,
        ) -> IpcResult<Self> {
            Ok(Self {
                region: RegionWriter::create(region_path, Frame::<R>::max_encoded_len())?,
                signal: Box::new(signal),
                next_frame_id: 1,
                _record: PhantomData,
            })
        }

        /// Publisher on the producer's real segment and semaphore.
        #[cfg(unix)]
        pub fn posix(shm_dir: &Path, channel: crate::shm::ShmChannel) -> IpcResult<Self> {
            let semaphore = crate::shm::PosixSemaphore::create(channel.semaphore)?;
            Self::new(channel.region_path(shm_dir), semaphore)
        }

        /// Encode and publish the next frame; returns its frame id.
        pub fn publish(&mut self, timestamp_ms: u64, records: Vec<R>) -> IpcResult<u64> {
            let frame_id = self.next_frame_id;
            self.publish_frame(&Frame::new(frame_id, timestamp_ms, records))?;
            Ok(frame_id)
        }

        /// Publish a prepared frame.
        pub fn publish_frame(&mut self, frame: &Frame<R>) -> IpcResult<()> {
            self.publish_raw(&frame::encode(frame))?;
            self.next_frame_id = frame.header.frame_id + 1;
            Ok(())
        }

        /// Write arbitrary bytes, then signal. Used to inject corrupt frames.
        pub fn publish_raw(&mut self, bytes: &[u8]) -> IpcResult<()> {
            // Write first, then signal: readers rely on this order.
            self.region.write_frame(bytes)?;
            self.signal.post()
        }
    }
}

/// Rewrites snapshot files atomically.
#[derive(Debug, Clone)]
pub struct SnapshotWriter {
    dir: PathBuf,
}

impl SnapshotWriter {
    /// Writer into `dir`, creating it if needed.
    pub fn new(dir: impl Into<PathBuf>) -> IpcResult<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Serialize `value` into `file`.
    pub fn write<T: Serialize>(&self, file: &str, value: &T) -> IpcResult<()> {
        let contents = serde_json::to_string_pretty(value)?;
        self.write_raw(file, &contents)
    }

    /// Replace `file` with `contents` via a temporary file and rename, so
    /// readers never see a partial write.
    pub fn write_raw(&self, file: &str, contents: &str) -> IpcResult<()> {
        let target = self.dir.join(file);
        let tmp = self.dir.join(format!(".{}.tmp", file));
        std::fs::write(&tmp, contents)?;
        std::fs::rename(&tmp, &target)?;
        Ok(())
    }
}

type AckPolicy = Box<dyn FnMut(&CommandRequest) -> Option<CommandAck> + Send>;

/// Answers commands written to the command file.
pub struct AckResponder {
    command_path: PathBuf,
    ack_path: PathBuf,
    offset: u64,
    policy: AckPolicy,
}

impl AckResponder {
    /// Responder that acknowledges every command with `success`.
    pub fn new(command_path: impl Into<PathBuf>, ack_path: impl Into<PathBuf>) -> Self {
        Self::with_policy(command_path, ack_path, |request| {
            Some(ack_for(request, AckStatus::Success, None))
        })
    }

    /// Responder deciding per request; `None` leaves the request unanswered.
    pub fn with_policy(
        command_path: impl Into<PathBuf>,
        ack_path: impl Into<PathBuf>,
        policy: impl FnMut(&CommandRequest) -> Option<CommandAck> + Send + 'static,
    ) -> Self {
        Self {
            command_path: command_path.into(),
            ack_path: ack_path.into(),
            offset: 0,
            policy: Box::new(policy),
        }
    }

    /// Create an empty regular file at `path` for commands, as a stand-in
    /// for the producer's pipe.
    pub fn create_command_file(path: &Path) -> IpcResult<()> {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        Ok(())
    }

    /// Process complete command lines written since the last call and
    /// append acks for them. Returns every request seen, answered or not.
    pub fn poll_once(&mut self) -> IpcResult<Vec<CommandRequest>> {
        let mut file = match File::open(&self.command_path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        file.seek(SeekFrom::Start(self.offset))?;
        let mut pending = String::new();
        file.read_to_string(&mut pending)?;

        // Leave a trailing partial line for the next call.
        let complete = match pending.rfind('\n') {
            Some(end) => &pending[..=end],
            None => return Ok(Vec::new()),
        };
        self.offset += complete.len() as u64;

        let mut requests = Vec::new();
        let mut acks = Vec::new();
        for line in complete.lines().filter(|l| !l.trim().is_empty()) {
            match serde_json::from_str::<CommandRequest>(line) {
                Ok(request) => {
                    if let Some(ack) = (self.policy)(&request) {
                        acks.push(ack);
                    }
                    requests.push(request);
                }
                Err(err) => tracing::warn!(error = %err, "Ignoring malformed command line"),
            }
        }

        if !acks.is_empty() {
            let mut out = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.ack_path)?;
            for ack in &acks {
                let mut line = serde_json::to_string(ack)?;
                line.push('\n');
                out.write_all(line.as_bytes())?;
            }
        }
        Ok(requests)
    }
}

/// Build an ack for `request`.
pub fn ack_for(request: &CommandRequest, status: AckStatus, message: Option<String>) -> CommandAck {
    CommandAck {
        request_id: request.request_id.clone(),
        status,
        timestamp: Some(chrono::Utc::now().timestamp_millis().max(0) as u64),
        message,
    }
}

/// Synthetic scene: a few people walking across the frame.
pub fn synthetic_detections(frame_id: u64, now_ms: u64) -> Vec<Detection> {
    (0..3u32)
        .map(|i| Detection {
            id: i,
            class_id: 1,
            confidence: 0.80 + 0.05 * i as f32,
            bbox: BoundingBox {
                x: ((frame_id * 4 + u64::from(i) * 200) % 1280) as f32,
                y: 200.0 + 80.0 * i as f32,
                width: 60.0,
                height: 160.0,
            },
            timestamp_ms: now_ms,
        })
        .collect()
}

/// Tracks matching [`synthetic_detections`].
pub fn synthetic_tracks(frame_id: u64, now_ms: u64, started_ms: u64) -> Vec<TrackedObject> {
    synthetic_detections(frame_id, now_ms)
        .into_iter()
        .map(|d| TrackedObject {
            track_id: 100 + d.id,
            class_id: d.class_id,
            bbox: d.bbox,
            velocity: Velocity { x: 4.0, y: 0.0 },
            confidence: d.confidence,
            behaviors: if d.id == 2 {
                Behaviors::LOITERING | Behaviors::EXTENDED_OBSERVATION
            } else {
                Behaviors::default()
            },
            threat_score: 0.1 * d.id as f32,
            first_seen_ms: started_ms,
            last_seen_ms: now_ms,
        })
        .collect()
}

/// One predicted timeline for the loitering track.
pub fn synthetic_timelines(now_ms: u64) -> Vec<Timeline> {
    vec![Timeline {
        timeline_id: 1,
        probability: 0.35,
        prediction_start_ms: now_ms,
        prediction_end_ms: now_ms + 30_000,
        events: vec![PredictedEvent {
            event_type: EventType::Loitering,
            timestamp_ms: now_ms + 10_000,
            probability: 0.6,
            severity: Severity::Low,
            description: "track 102 continues loitering near entrance".into(),
        }],
        interventions: vec![Intervention {
            timestamp_ms: now_ms + 5_000,
            intervention_type: InterventionType::ActivateSpeaker,
            effectiveness: 0.5,
            cost: 0.1,
            recommendation: "play a courtesy announcement".into(),
        }],
        worst_case_severity: Severity::Low,
        total_threat_score: 0.2,
    }]
}

/// Drives every producer output from synthetic data.
pub struct Simulator {
    snapshots: SnapshotWriter,
    acks: AckResponder,
    #[cfg(feature = "shm")]
    shm: Option<ShmOutputs>,
    frame_id: u64,
    started_ms: Option<u64>,
}

#[cfg(feature = "shm")]
struct ShmOutputs {
    detections: ShmPublisher<Detection>,
    tracks: ShmPublisher<TrackedObject>,
    timelines: ShmPublisher<Timeline>,
}

impl Simulator {
    /// Set up files (and, when enabled, shared memory) at the locations named
    /// in `config`.
    pub fn from_config(config: &IpcConfig) -> IpcResult<Self> {
        let paths = &config.paths;
        AckResponder::create_command_file(&paths.command_path)?;

        #[cfg(all(feature = "shm", unix))]
        let shm = if config.shm.enabled {
            use crate::shm::ShmChannel;
            Some(ShmOutputs {
                detections: ShmPublisher::posix(&paths.shm_dir, ShmChannel::DETECTIONS)?,
                tracks: ShmPublisher::posix(&paths.shm_dir, ShmChannel::TRACKS)?,
                timelines: ShmPublisher::posix(&paths.shm_dir, ShmChannel::TIMELINES)?,
            })
        } else {
            None
        };
        #[cfg(all(feature = "shm", not(unix)))]
        let shm = None;

        Ok(Self {
            snapshots: SnapshotWriter::new(&paths.snapshot_dir)?,
            acks: AckResponder::new(&paths.command_path, &paths.ack_path),
            #[cfg(feature = "shm")]
            shm,
            frame_id: 0,
            started_ms: None,
        })
    }

    /// Emit one frame of every category at `now_ms` and answer pending
    /// commands. Returns `false` once a `SHUTDOWN` command was received.
    pub fn step(&mut self, now_ms: u64) -> IpcResult<bool> {
        self.frame_id += 1;
        let started_ms = *self.started_ms.get_or_insert(now_ms);
        let frame_id = self.frame_id;

        let detections = synthetic_detections(frame_id, now_ms);
        let tracks = synthetic_tracks(frame_id, now_ms, started_ms);
        let timelines = synthetic_timelines(now_ms);

        #[cfg(feature = "shm")]
        if let Some(shm) = self.shm.as_mut() {
            shm.detections.publish(now_ms, detections.clone())?;
            shm.tracks.publish(now_ms, tracks.clone())?;
            shm.timelines.publish(now_ms, timelines.clone())?;
        }

        self.snapshots.write(
            files::DETECTIONS,
            &DetectionSet {
                frame_id: Some(frame_id),
                timestamp_ms: Some(now_ms),
                detections,
            },
        )?;
        self.snapshots.write(
            files::TRACKS,
            &TrackSet {
                frame_id: Some(frame_id),
                timestamp_ms: Some(now_ms),
                tracks,
            },
        )?;
        self.snapshots.write(
            files::TIMELINES,
            &TimelineSet {
                frame_id: Some(frame_id),
                timestamp_ms: Some(now_ms),
                timelines,
            },
        )?;

        let uptime_ms = now_ms.saturating_sub(started_ms);
        self.snapshots.write(
            files::STATS,
            &ProducerStats {
                timestamp_ms: Some(now_ms),
                uptime_ms,
                frames_processed: frame_id,
                is_running: true,
                perception: PerceptionStats {
                    enabled: true,
                    fps: 10.0,
                    inference_ms: 12.5,
                    objects_tracked: 3,
                    dropped_frames: 0,
                },
                timeline: TimelineStats {
                    enabled: true,
                    active_timelines: 1,
                    events_predicted: frame_id,
                    interventions: frame_id,
                    prediction_ms: 3.0,
                },
                swarm: SwarmStats::default(),
            },
        )?;
        self.snapshots.write(
            files::STATUS,
            &ProducerStatus {
                timestamp_ms: Some(now_ms),
                status: ProducerState::Running,
                uptime_ms,
                version: env!("CARGO_PKG_VERSION").to_string(),
                pid: Some(std::process::id()),
            },
        )?;

        let handled = self.acks.poll_once()?;
        Ok(!handled
            .iter()
            .any(|request| request.command_type == CommandType::Shutdown))
    }
}
