//! Property tests for the binary frame codec.

use omnisight_ipc::frame::{self, DecodeError, Frame, Record, HEADER_SIZE};
use omnisight_ipc::types::{
    Behaviors, BoundingBox, Detection, EventType, Intervention, InterventionType,
    PredictedEvent, Severity, Timeline, TrackedObject, Velocity,
};
use proptest::prelude::*;

fn finite() -> impl Strategy<Value = f32> {
    -1.0e6f32..1.0e6f32
}

fn bbox() -> impl Strategy<Value = BoundingBox> {
    (finite(), finite(), finite(), finite()).prop_map(|(x, y, width, height)| BoundingBox {
        x,
        y,
        width,
        height,
    })
}

fn detection() -> impl Strategy<Value = Detection> {
    (any::<u32>(), 0u32..6, 0.0f32..1.0, bbox(), any::<u64>()).prop_map(
        |(id, class_id, confidence, bbox, timestamp_ms)| Detection {
            id,
            class_id,
            confidence,
            bbox,
            timestamp_ms,
        },
    )
}

fn track() -> impl Strategy<Value = TrackedObject> {
    (
        (any::<u32>(), 0u32..6, bbox(), finite(), finite()),
        (0.0f32..1.0, 0u32..64, 0.0f32..1.0, any::<u64>(), any::<u64>()),
    )
        .prop_map(
            |((track_id, class_id, bbox, vx, vy), (confidence, bits, threat, first, last))| {
                TrackedObject {
                    track_id,
                    class_id,
                    bbox,
                    velocity: Velocity { x: vx, y: vy },
                    confidence,
                    behaviors: Behaviors(bits),
                    threat_score: threat,
                    first_seen_ms: first,
                    last_seen_ms: last,
                }
            },
        )
}

fn severity() -> impl Strategy<Value = Severity> {
    (0u32..5).prop_map(|id| Severity::from_id(id).unwrap())
}

fn event() -> impl Strategy<Value = PredictedEvent> {
    (0u32..11, any::<u64>(), 0.0f32..1.0, severity(), "[a-z ]{0,40}[a-z]").prop_map(
        |(kind, timestamp_ms, probability, severity, description)| PredictedEvent {
            event_type: EventType::from_id(kind).unwrap(),
            timestamp_ms,
            probability,
            severity,
            description,
        },
    )
}

fn intervention() -> impl Strategy<Value = Intervention> {
    (any::<u64>(), 0u32..8, 0.0f32..1.0, 0.0f32..1.0, "[a-z]{0,60}").prop_map(
        |(timestamp_ms, kind, effectiveness, cost, recommendation)| Intervention {
            timestamp_ms,
            intervention_type: InterventionType::from_id(kind).unwrap(),
            effectiveness,
            cost,
            recommendation,
        },
    )
}

fn timeline() -> impl Strategy<Value = Timeline> {
    (
        (any::<u32>(), 0.0f32..1.0, any::<u64>(), any::<u64>()),
        prop::collection::vec(event(), 0..=20),
        prop::collection::vec(intervention(), 0..=10),
        (severity(), 0.0f32..1.0),
    )
        .prop_map(
            |((timeline_id, probability, start, end), events, interventions, (worst, score))| {
                Timeline {
                    timeline_id,
                    probability,
                    prediction_start_ms: start,
                    prediction_end_ms: end,
                    events,
                    interventions,
                    worst_case_severity: worst,
                    total_threat_score: score,
                }
            },
        )
}

proptest! {
    #[test]
    fn detection_frames_survive_encoding(
        frame_id in any::<u64>(),
        timestamp in any::<u64>(),
        records in prop::collection::vec(detection(), 0..=Detection::MAX_PER_FRAME),
    ) {
        let frame = Frame::new(frame_id, timestamp, records);
        let bytes = frame::encode(&frame);
        prop_assert_eq!(bytes.len(), Frame::<Detection>::encoded_len(frame.records.len()));
        prop_assert_eq!(frame::decode::<Detection>(&bytes), Ok(frame));
    }

    #[test]
    fn track_frames_survive_encoding(
        records in prop::collection::vec(track(), 0..=TrackedObject::MAX_PER_FRAME),
    ) {
        let frame = Frame::new(7, 1_700_000_000_000, records);
        prop_assert_eq!(frame::decode::<TrackedObject>(&frame::encode(&frame)), Ok(frame));
    }

    #[test]
    fn timeline_frames_survive_encoding(
        records in prop::collection::vec(timeline(), 0..=Timeline::MAX_PER_FRAME),
    ) {
        let frame = Frame::new(3, 1_700_000_000_000, records);
        prop_assert_eq!(frame::decode::<Timeline>(&frame::encode(&frame)), Ok(frame));
    }

    #[test]
    fn any_single_byte_flip_is_rejected(
        records in prop::collection::vec(detection(), 1..8),
        position in any::<prop::sample::Index>(),
        mask in 1u8..=255,
    ) {
        let mut bytes = frame::encode(&Frame::new(1, 1, records));
        let at = position.index(bytes.len());
        bytes[at] ^= mask;
        prop_assert!(frame::decode::<Detection>(&bytes).is_err());
    }

    #[test]
    fn trailing_bytes_are_ignored(
        records in prop::collection::vec(detection(), 0..4),
        padding in prop::collection::vec(any::<u8>(), 0..256),
    ) {
        let frame = Frame::new(9, 9, records);
        let mut bytes = frame::encode(&frame);
        bytes.extend_from_slice(&padding);
        prop_assert_eq!(frame::decode::<Detection>(&bytes), Ok(frame));
    }

    #[test]
    fn arbitrary_bytes_never_panic(bytes in prop::collection::vec(any::<u8>(), 0..2048)) {
        let _ = frame::decode::<Detection>(&bytes);
        let _ = frame::decode::<TrackedObject>(&bytes);
        let _ = frame::decode::<Timeline>(&bytes);
    }

    #[test]
    fn short_buffers_are_truncated(len in 0usize..HEADER_SIZE) {
        let bytes = frame::encode(&Frame::<Detection>::new(1, 1, Vec::new()));
        let is_truncated = matches!(
            frame::decode::<Detection>(&bytes[..len]),
            Err(DecodeError::Truncated { .. })
        );
        prop_assert!(is_truncated);
    }
}
