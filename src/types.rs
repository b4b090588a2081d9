//! Data model shared by both read tiers.
//!
//! Binary frames and JSON snapshots are normalized into the same per-category
//! value types ([`DetectionSet`], [`TrackSet`], [`TimelineSet`],
//! [`ProducerStats`], [`ProducerStatus`]) so the freshness cache can hold one
//! "last known good" value per category regardless of which tier produced it.
//!
//! JSON deserialization is deliberately lenient about representation: the
//! producer's exporter writes class, behavior, event and severity *names* and
//! array-shaped boxes, while the binary layout carries numeric ids. Both forms
//! are accepted.

use std::fmt;

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};

use crate::frame::Frame;

/// Maximum UTF-8 bytes of an event description or intervention
/// recommendation on the wire.
pub const TEXT_FIELD_LEN: usize = 128;

/// Declares a `u32`-backed wire enum with name and id lookups.
///
/// The first variant is the default and also absorbs the producer's
/// `"unknown"` name.
macro_rules! wire_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident {
            $first:ident = $first_id:literal => $first_name:literal
            $(, $variant:ident = $id:literal => $vname:literal)* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u32)]
        pub enum $name {
            #[allow(missing_docs)]
            $first = $first_id,
            $(
                #[allow(missing_docs)]
                $variant = $id,
            )*
        }

        impl $name {
            /// Numeric id used in binary frames.
            pub fn id(self) -> u32 {
                self as u32
            }

            /// Look up a variant by its wire id.
            pub fn from_id(id: u32) -> Option<Self> {
                match id {
                    $first_id => Some(Self::$first),
                    $($id => Some(Self::$variant),)*
                    _ => None,
                }
            }

            /// Name used in JSON snapshots.
            pub fn name(self) -> &'static str {
                match self {
                    Self::$first => $first_name,
                    $(Self::$variant => $vname,)*
                }
            }

            /// Look up a variant by its JSON name (case-insensitive).
            pub fn from_name(name: &str) -> Option<Self> {
                let name = name.to_ascii_lowercase();
                if name == "unknown" {
                    return Some(Self::$first);
                }
                match name.as_str() {
                    $first_name => Some(Self::$first),
                    $($vname => Some(Self::$variant),)*
                    _ => None,
                }
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::$first
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.name())
            }
        }

        impl Serialize for $name {
            fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(self.name())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                match IdOrName::deserialize(deserializer)? {
                    IdOrName::Id(id) => Self::from_id(id).ok_or_else(|| {
                        de::Error::custom(format!("unknown {} id {}", stringify!($name), id))
                    }),
                    IdOrName::Name(name) => Self::from_name(&name).ok_or_else(|| {
                        de::Error::custom(format!("unknown {} '{}'", stringify!($name), name))
                    }),
                }
            }
        }
    };
}

#[derive(Deserialize)]
#[serde(untagged)]
enum IdOrName {
    Id(u32),
    Name(String),
}

wire_enum! {
    /// Object classes known to the perception core.
    pub enum ObjectClass {
        Unknown = 0 => "unknown",
        Person = 1 => "person",
        Vehicle = 2 => "vehicle",
        Face = 3 => "face",
        Package = 4 => "package",
        Animal = 5 => "animal",
    }
}

wire_enum! {
    /// Predicted event types.
    pub enum EventType {
        None = 0 => "none",
        Loitering = 1 => "loitering",
        Theft = 2 => "theft",
        Assault = 3 => "assault",
        Vandalism = 4 => "vandalism",
        Trespassing = 5 => "trespassing",
        SuspiciousBehavior = 6 => "suspicious_behavior",
        Collision = 7 => "collision",
        Fall = 8 => "fall",
        AbandonedObject = 9 => "abandoned_object",
        CrowdFormation = 10 => "crowd_formation",
    }
}

wire_enum! {
    /// Outcome severity of an event or timeline.
    pub enum Severity {
        None = 0 => "none",
        Low = 1 => "low",
        Medium = 2 => "medium",
        High = 3 => "high",
        Critical = 4 => "critical",
    }
}

wire_enum! {
    /// Recommended intervention kinds.
    pub enum InterventionType {
        None = 0 => "none",
        AlertSecurity = 1 => "alert_security",
        ActivateSpeaker = 2 => "activate_speaker",
        IncreaseLighting = 3 => "increase_lighting",
        PositionGuard = 4 => "position_guard",
        LockDoor = 5 => "lock_door",
        NotifyPolice = 6 => "notify_police",
        DisplayWarning = 7 => "display_warning",
    }
}

/// Axis-aligned bounding box in producer-defined units.
///
/// Serialized as `[x, y, width, height]`, which is how the producer exports it.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "BoxRepr", into = "[f32; 4]")]
pub struct BoundingBox {
    /// Left edge
    pub x: f32,
    /// Top edge
    pub y: f32,
    /// Width
    pub width: f32,
    /// Height
    pub height: f32,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum BoxRepr {
    Array([f32; 4]),
    Object {
        x: f32,
        y: f32,
        width: f32,
        height: f32,
    },
}

impl From<BoxRepr> for BoundingBox {
    fn from(repr: BoxRepr) -> Self {
        match repr {
            BoxRepr::Array([x, y, width, height]) => Self { x, y, width, height },
            BoxRepr::Object { x, y, width, height } => Self { x, y, width, height },
        }
    }
}

impl From<BoundingBox> for [f32; 4] {
    fn from(b: BoundingBox) -> Self {
        [b.x, b.y, b.width, b.height]
    }
}

/// 2D velocity, serialized as `[x, y]`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "[f32; 2]", into = "[f32; 2]")]
pub struct Velocity {
    /// Horizontal component
    pub x: f32,
    /// Vertical component
    pub y: f32,
}

impl From<[f32; 2]> for Velocity {
    fn from([x, y]: [f32; 2]) -> Self {
        Self { x, y }
    }
}

impl From<Velocity> for [f32; 2] {
    fn from(v: Velocity) -> Self {
        [v.x, v.y]
    }
}

/// Behavior bitmask attached to a track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(transparent)]
pub struct Behaviors(pub u32);

impl Behaviors {
    /// Dwelling in one area.
    pub const LOITERING: Self = Self(0x01);
    /// Moving faster than the running threshold.
    pub const RUNNING: Self = Self(0x02);
    /// Concealing an object or face.
    pub const CONCEALING: Self = Self(0x04);
    /// Erratic movement pattern.
    pub const SUSPICIOUS_MOVEMENT: Self = Self(0x08);
    /// Passing the same spot repeatedly.
    pub const REPEATED_PASSES: Self = Self(0x10);
    /// Watching an area for an extended period.
    pub const EXTENDED_OBSERVATION: Self = Self(0x20);

    const NAMES: [(Self, &'static str); 6] = [
        (Self::LOITERING, "loitering"),
        (Self::RUNNING, "running"),
        (Self::CONCEALING, "concealing"),
        (Self::SUSPICIOUS_MOVEMENT, "suspicious_movement"),
        (Self::REPEATED_PASSES, "repeated_passes"),
        (Self::EXTENDED_OBSERVATION, "extended_observation"),
    ];

    /// Raw bit value.
    pub fn bits(self) -> u32 {
        self.0
    }

    /// Whether every bit of `other` is set.
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Names of the set behaviors, in bit order.
    pub fn names(self) -> Vec<&'static str> {
        Self::NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect()
    }

    fn from_name(name: &str) -> Option<Self> {
        Self::NAMES
            .iter()
            .find(|(_, n)| n.eq_ignore_ascii_case(name))
            .map(|(flag, _)| *flag)
    }
}

impl std::ops::BitOr for Behaviors {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl<'de> Deserialize<'de> for Behaviors {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Bits(u32),
            Names(Vec<String>),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Bits(bits) => Ok(Self(bits)),
            Repr::Names(names) => names.iter().try_fold(Self::default(), |acc, name| {
                Self::from_name(name)
                    .map(|flag| acc | flag)
                    .ok_or_else(|| de::Error::custom(format!("unknown behavior '{}'", name)))
            }),
        }
    }
}

/// Accepts a numeric class id or an [`ObjectClass`] name.
fn deserialize_class_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u32, D::Error> {
    match IdOrName::deserialize(deserializer)? {
        IdOrName::Id(id) => Ok(id),
        IdOrName::Name(name) => Ok(ObjectClass::from_name(&name)
            .unwrap_or(ObjectClass::Unknown)
            .id()),
    }
}

/// Treats a zero timestamp as missing, as the producer does.
fn deserialize_timestamp<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<u64>, D::Error> {
    Ok(Option::<u64>::deserialize(deserializer)?.filter(|ts| *ts != 0))
}

/// A single detected object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// Per-frame detection id
    pub id: u32,
    /// Object class id (see [`ObjectClass`])
    #[serde(alias = "class", deserialize_with = "deserialize_class_id")]
    pub class_id: u32,
    /// Detector confidence in `[0.0, 1.0]`
    pub confidence: f32,
    /// Bounding box
    pub bbox: BoundingBox,
    /// Capture timestamp, milliseconds since epoch
    #[serde(default)]
    pub timestamp_ms: u64,
}

/// An object tracked across frames. Identity is `track_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedObject {
    /// Stable track id
    pub track_id: u32,
    /// Object class id (see [`ObjectClass`])
    #[serde(alias = "class", deserialize_with = "deserialize_class_id")]
    pub class_id: u32,
    /// Current bounding box
    pub bbox: BoundingBox,
    /// Estimated velocity
    #[serde(default)]
    pub velocity: Velocity,
    /// Tracking confidence in `[0.0, 1.0]`
    pub confidence: f32,
    /// Observed behaviors
    #[serde(default)]
    pub behaviors: Behaviors,
    /// Threat score in `[0.0, 1.0]`
    #[serde(default)]
    pub threat_score: f32,
    /// First observation, milliseconds since epoch
    #[serde(default)]
    pub first_seen_ms: u64,
    /// Latest observation, milliseconds since epoch
    #[serde(default)]
    pub last_seen_ms: u64,
}

/// One predicted event within a timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictedEvent {
    /// Event kind
    #[serde(rename = "type")]
    pub event_type: EventType,
    /// When the event is predicted to occur (the exporter calls this
    /// `time_until_ms`)
    #[serde(alias = "time_until_ms", default)]
    pub timestamp_ms: u64,
    /// Probability of occurrence
    pub probability: f32,
    /// Event severity
    #[serde(default)]
    pub severity: Severity,
    /// Human-readable description
    #[serde(default)]
    pub description: String,
}

/// A recommended intervention within a timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intervention {
    /// When to intervene
    pub timestamp_ms: u64,
    /// Intervention kind
    #[serde(rename = "type", default)]
    pub intervention_type: InterventionType,
    /// Expected effectiveness in `[0.0, 1.0]`
    pub effectiveness: f32,
    /// Relative cost in `[0.0, 1.0]`
    #[serde(default)]
    pub cost: f32,
    /// Human-readable recommendation
    #[serde(default)]
    pub recommendation: String,
}

/// A predicted future timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Timeline {
    /// Timeline id
    pub timeline_id: u32,
    /// Overall probability of this branch
    pub probability: f32,
    /// Prediction window start
    #[serde(default)]
    pub prediction_start_ms: u64,
    /// Prediction window end
    #[serde(default)]
    pub prediction_end_ms: u64,
    /// Ordered predicted events
    #[serde(default)]
    pub events: Vec<PredictedEvent>,
    /// Ordered intervention recommendations
    #[serde(default)]
    pub interventions: Vec<Intervention>,
    /// Worst severity across the timeline
    #[serde(default)]
    pub worst_case_severity: Severity,
    /// Aggregate threat score
    #[serde(default)]
    pub total_threat_score: f32,
}

/// Payloads that carry a producer timestamp.
pub trait Timestamped {
    /// Producer timestamp in milliseconds since epoch, if known.
    fn timestamp_ms(&self) -> Option<u64>;
}

/// Latest detections for one frame.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DetectionSet {
    /// Producer frame id, if the source carried one
    #[serde(default)]
    pub frame_id: Option<u64>,
    /// Producer timestamp
    #[serde(rename = "timestamp", default, deserialize_with = "deserialize_timestamp")]
    pub timestamp_ms: Option<u64>,
    /// Detections in this frame
    #[serde(default)]
    pub detections: Vec<Detection>,
}

/// Latest set of tracked objects.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TrackSet {
    /// Producer frame id, if the source carried one
    #[serde(default)]
    pub frame_id: Option<u64>,
    /// Producer timestamp
    #[serde(rename = "timestamp", default, deserialize_with = "deserialize_timestamp")]
    pub timestamp_ms: Option<u64>,
    /// Active tracks
    #[serde(default)]
    pub tracks: Vec<TrackedObject>,
}

/// Latest timeline predictions.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TimelineSet {
    /// Producer frame id, if the source carried one
    #[serde(default)]
    pub frame_id: Option<u64>,
    /// Producer timestamp
    #[serde(rename = "timestamp", default, deserialize_with = "deserialize_timestamp")]
    pub timestamp_ms: Option<u64>,
    /// Predicted timelines, most probable first as emitted by the producer
    #[serde(default)]
    pub timelines: Vec<Timeline>,
}

/// Perception engine counters from the stats snapshot.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PerceptionStats {
    /// Whether the engine is enabled
    pub enabled: bool,
    /// Average frames per second
    pub fps: f32,
    /// Average inference latency
    pub inference_ms: f32,
    /// Currently tracked objects
    pub objects_tracked: u32,
    /// Frames dropped since start
    pub dropped_frames: u32,
}

/// Timeline engine counters from the stats snapshot.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TimelineStats {
    /// Whether the engine is enabled
    pub enabled: bool,
    /// Timelines currently maintained
    pub active_timelines: u32,
    /// Total events predicted
    pub events_predicted: u64,
    /// Total interventions recommended
    pub interventions: u64,
    /// Average prediction latency
    pub prediction_ms: f32,
}

/// Swarm counters from the stats snapshot.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SwarmStats {
    /// Whether swarm sharing is enabled
    pub enabled: bool,
    /// Reachable neighbor cameras
    pub num_neighbors: u32,
    /// Tracks shared with neighbors
    pub tracks_shared: u32,
    /// Events shared with neighbors
    pub events_shared: u32,
    /// Network health in `[0.0, 1.0]`
    pub network_health: f32,
}

/// Aggregate producer statistics (low-frequency, JSON tier only).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProducerStats {
    /// Producer timestamp
    #[serde(rename = "timestamp", deserialize_with = "deserialize_timestamp")]
    pub timestamp_ms: Option<u64>,
    /// Producer uptime
    pub uptime_ms: u64,
    /// Frames processed since start
    pub frames_processed: u64,
    /// Whether the processing loop is running
    pub is_running: bool,
    /// Perception counters
    pub perception: PerceptionStats,
    /// Timeline counters
    pub timeline: TimelineStats,
    /// Swarm counters
    pub swarm: SwarmStats,
}

/// Lifecycle state reported by the producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProducerState {
    /// Initializing resources
    Starting,
    /// Processing frames
    Running,
    /// Shutting down
    Stopping,
    /// Stopped cleanly
    Stopped,
    /// Failed
    Error,
    /// Any state this crate does not know about
    #[default]
    #[serde(other)]
    Unknown,
}

/// Producer process status (low-frequency, JSON tier only).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProducerStatus {
    /// Producer timestamp
    #[serde(rename = "timestamp", deserialize_with = "deserialize_timestamp")]
    pub timestamp_ms: Option<u64>,
    /// Lifecycle state
    pub status: ProducerState,
    /// Producer uptime
    pub uptime_ms: u64,
    /// Producer version string
    pub version: String,
    /// Producer process id
    pub pid: Option<u32>,
}

macro_rules! impl_timestamped {
    ($($ty:ty),*) => {
        $(impl Timestamped for $ty {
            fn timestamp_ms(&self) -> Option<u64> {
                self.timestamp_ms
            }
        })*
    };
}

impl_timestamped!(DetectionSet, TrackSet, TimelineSet, ProducerStats, ProducerStatus);

fn nonzero(ts: u64) -> Option<u64> {
    (ts != 0).then_some(ts)
}

impl From<Frame<Detection>> for DetectionSet {
    fn from(frame: Frame<Detection>) -> Self {
        Self {
            frame_id: Some(frame.header.frame_id),
            timestamp_ms: nonzero(frame.header.timestamp_ms),
            detections: frame.records,
        }
    }
}

impl From<Frame<TrackedObject>> for TrackSet {
    fn from(frame: Frame<TrackedObject>) -> Self {
        Self {
            frame_id: Some(frame.header.frame_id),
            timestamp_ms: nonzero(frame.header.timestamp_ms),
            tracks: frame.records,
        }
    }
}

impl From<Frame<Timeline>> for TimelineSet {
    fn from(frame: Frame<Timeline>) -> Self {
        Self {
            frame_id: Some(frame.header.frame_id),
            timestamp_ms: nonzero(frame.header.timestamp_ms),
            timelines: frame.records,
        }
    }
}
