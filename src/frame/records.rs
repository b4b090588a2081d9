//! Fixed-size record layouts.
//!
//! All integers and floats are little-endian. Text fields are fixed
//! [`TEXT_FIELD_LEN`]-byte, NUL-padded UTF-8. Timelines embed fixed arrays of
//! event and intervention slots; only the first `num_*` slots are meaningful
//! and the rest are zero-filled.

use crate::types::{
    Behaviors, BoundingBox, Detection, EventType, Intervention, InterventionType, PredictedEvent,
    Severity, Timeline, TrackedObject, Velocity, TEXT_FIELD_LEN,
};

use super::DecodeError;

/// Event slots per timeline record.
pub const MAX_EVENTS_PER_TIMELINE: usize = 20;

/// Intervention slots per timeline record.
pub const MAX_INTERVENTIONS_PER_TIMELINE: usize = 10;

/// Size of one event slot.
pub const EVENT_SLOT_SIZE: usize = 4 + 8 + 4 + 4 + TEXT_FIELD_LEN;

/// Size of one intervention slot.
pub const INTERVENTION_SLOT_SIZE: usize = 8 + 4 + 4 + 4 + TEXT_FIELD_LEN;

/// A fixed-size record that can appear in a frame.
pub trait Record: Sized {
    /// Encoded size in bytes.
    const SIZE: usize;
    /// Maximum records of this kind in one frame.
    const MAX_PER_FRAME: usize;
    /// Short name used in logs and errors.
    const KIND: &'static str;

    /// Append exactly [`Self::SIZE`] bytes to `out`.
    fn encode_into(&self, out: &mut Vec<u8>);

    /// Consume exactly [`Self::SIZE`] bytes from `reader`.
    fn decode_from(reader: &mut ByteReader<'_>) -> Result<Self, DecodeError>;
}

/// Little-endian cursor over a byte slice.
///
/// Every read is bounds-checked and reports [`DecodeError::Truncated`] rather
/// than panicking.
pub struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    /// Start reading at the beginning of `buf`.
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let end = self.pos + N;
        let bytes = self
            .buf
            .get(self.pos..end)
            .and_then(|s| <[u8; N]>::try_from(s).ok())
            .ok_or(DecodeError::Truncated {
                needed: end,
                available: self.buf.len(),
            })?;
        self.pos = end;
        Ok(bytes)
    }

    /// Read a `u32`.
    pub fn u32(&mut self) -> Result<u32, DecodeError> {
        self.take::<4>().map(u32::from_le_bytes)
    }

    /// Read a `u64`.
    pub fn u64(&mut self) -> Result<u64, DecodeError> {
        self.take::<8>().map(u64::from_le_bytes)
    }

    /// Read an `f32`.
    pub fn f32(&mut self) -> Result<f32, DecodeError> {
        self.take::<4>().map(f32::from_le_bytes)
    }

    /// Read a NUL-padded text field. Invalid UTF-8 is replaced, not rejected.
    pub fn text(&mut self) -> Result<String, DecodeError> {
        let raw = self.take::<TEXT_FIELD_LEN>()?;
        let len = raw.iter().position(|b| *b == 0).unwrap_or(TEXT_FIELD_LEN);
        Ok(String::from_utf8_lossy(&raw[..len]).into_owned())
    }

    fn skip(&mut self, n: usize) -> Result<(), DecodeError> {
        let end = self.pos + n;
        if end > self.buf.len() {
            return Err(DecodeError::Truncated {
                needed: end,
                available: self.buf.len(),
            });
        }
        self.pos = end;
        Ok(())
    }
}

fn put_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn put_u64(out: &mut Vec<u8>, v: u64) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn put_f32(out: &mut Vec<u8>, v: f32) {
    out.extend_from_slice(&v.to_le_bytes());
}

/// Writes `text` NUL-padded to [`TEXT_FIELD_LEN`], truncating on a char
/// boundary. A full-length field carries no terminator.
fn put_text(out: &mut Vec<u8>, text: &str) {
    let mut end = text.len().min(TEXT_FIELD_LEN);
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    out.extend_from_slice(&text.as_bytes()[..end]);
    out.resize(out.len() + TEXT_FIELD_LEN - end, 0);
}

fn put_bbox(out: &mut Vec<u8>, b: &BoundingBox) {
    put_f32(out, b.x);
    put_f32(out, b.y);
    put_f32(out, b.width);
    put_f32(out, b.height);
}

fn read_bbox(r: &mut ByteReader<'_>) -> Result<BoundingBox, DecodeError> {
    Ok(BoundingBox {
        x: r.f32()?,
        y: r.f32()?,
        width: r.f32()?,
        height: r.f32()?,
    })
}

fn read_enum<T>(
    r: &mut ByteReader<'_>,
    field: &'static str,
    from_id: fn(u32) -> Option<T>,
) -> Result<T, DecodeError> {
    let raw = r.u32()?;
    from_id(raw).ok_or(DecodeError::InvalidField {
        field,
        value: raw as u64,
    })
}

fn read_count(r: &mut ByteReader<'_>, field: &'static str, max: usize) -> Result<usize, DecodeError> {
    let raw = r.u32()?;
    if raw as usize > max {
        return Err(DecodeError::InvalidField {
            field,
            value: raw as u64,
        });
    }
    Ok(raw as usize)
}

impl Record for Detection {
    const SIZE: usize = 36;
    const MAX_PER_FRAME: usize = 50;
    const KIND: &'static str = "detection";

    fn encode_into(&self, out: &mut Vec<u8>) {
        put_u32(out, self.id);
        put_u32(out, self.class_id);
        put_f32(out, self.confidence);
        put_bbox(out, &self.bbox);
        put_u64(out, self.timestamp_ms);
    }

    fn decode_from(r: &mut ByteReader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            id: r.u32()?,
            class_id: r.u32()?,
            confidence: r.f32()?,
            bbox: read_bbox(r)?,
            timestamp_ms: r.u64()?,
        })
    }
}

impl Record for TrackedObject {
    const SIZE: usize = 60;
    const MAX_PER_FRAME: usize = 50;
    const KIND: &'static str = "track";

    fn encode_into(&self, out: &mut Vec<u8>) {
        put_u32(out, self.track_id);
        put_u32(out, self.class_id);
        put_bbox(out, &self.bbox);
        put_f32(out, self.velocity.x);
        put_f32(out, self.velocity.y);
        put_f32(out, self.confidence);
        put_u32(out, self.behaviors.bits());
        put_f32(out, self.threat_score);
        put_u64(out, self.first_seen_ms);
        put_u64(out, self.last_seen_ms);
    }

    fn decode_from(r: &mut ByteReader<'_>) -> Result<Self, DecodeError> {
        Ok(Self {
            track_id: r.u32()?,
            class_id: r.u32()?,
            bbox: read_bbox(r)?,
            velocity: Velocity {
                x: r.f32()?,
                y: r.f32()?,
            },
            confidence: r.f32()?,
            behaviors: Behaviors(r.u32()?),
            threat_score: r.f32()?,
            first_seen_ms: r.u64()?,
            last_seen_ms: r.u64()?,
        })
    }
}

fn encode_event(out: &mut Vec<u8>, e: &PredictedEvent) {
    put_u32(out, e.event_type.id());
    put_u64(out, e.timestamp_ms);
    put_f32(out, e.probability);
    put_u32(out, e.severity.id());
    put_text(out, &e.description);
}

fn decode_event(r: &mut ByteReader<'_>) -> Result<PredictedEvent, DecodeError> {
    Ok(PredictedEvent {
        event_type: read_enum(r, "event_type", EventType::from_id)?,
        timestamp_ms: r.u64()?,
        probability: r.f32()?,
        severity: read_enum(r, "event_severity", Severity::from_id)?,
        description: r.text()?,
    })
}

fn encode_intervention(out: &mut Vec<u8>, i: &Intervention) {
    put_u64(out, i.timestamp_ms);
    put_u32(out, i.intervention_type.id());
    put_f32(out, i.effectiveness);
    put_f32(out, i.cost);
    put_text(out, &i.recommendation);
}

fn decode_intervention(r: &mut ByteReader<'_>) -> Result<Intervention, DecodeError> {
    Ok(Intervention {
        timestamp_ms: r.u64()?,
        intervention_type: read_enum(r, "intervention_type", InterventionType::from_id)?,
        effectiveness: r.f32()?,
        cost: r.f32()?,
        recommendation: r.text()?,
    })
}

impl Record for Timeline {
    const SIZE: usize = 4
        + 4
        + 8
        + 8
        + 4
        + MAX_EVENTS_PER_TIMELINE * EVENT_SLOT_SIZE
        + 4
        + MAX_INTERVENTIONS_PER_TIMELINE * INTERVENTION_SLOT_SIZE
        + 4
        + 4;
    const MAX_PER_FRAME: usize = 5;
    const KIND: &'static str = "timeline";

    /// Events and interventions beyond the slot capacity are dropped.
    fn encode_into(&self, out: &mut Vec<u8>) {
        put_u32(out, self.timeline_id);
        put_f32(out, self.probability);
        put_u64(out, self.prediction_start_ms);
        put_u64(out, self.prediction_end_ms);

        let events = &self.events[..self.events.len().min(MAX_EVENTS_PER_TIMELINE)];
        put_u32(out, events.len() as u32);
        for e in events {
            encode_event(out, e);
        }
        out.resize(
            out.len() + (MAX_EVENTS_PER_TIMELINE - events.len()) * EVENT_SLOT_SIZE,
            0,
        );

        let interventions =
            &self.interventions[..self.interventions.len().min(MAX_INTERVENTIONS_PER_TIMELINE)];
        put_u32(out, interventions.len() as u32);
        for i in interventions {
            encode_intervention(out, i);
        }
        out.resize(
            out.len()
                + (MAX_INTERVENTIONS_PER_TIMELINE - interventions.len()) * INTERVENTION_SLOT_SIZE,
            0,
        );

        put_u32(out, self.worst_case_severity.id());
        put_f32(out, self.total_threat_score);
    }

    fn decode_from(r: &mut ByteReader<'_>) -> Result<Self, DecodeError> {
        let timeline_id = r.u32()?;
        let probability = r.f32()?;
        let prediction_start_ms = r.u64()?;
        let prediction_end_ms = r.u64()?;

        let num_events = read_count(r, "num_events", MAX_EVENTS_PER_TIMELINE)?;
        let events = (0..num_events)
            .map(|_| decode_event(r))
            .collect::<Result<Vec<_>, _>>()?;
        r.skip((MAX_EVENTS_PER_TIMELINE - num_events) * EVENT_SLOT_SIZE)?;

        let num_interventions =
            read_count(r, "num_interventions", MAX_INTERVENTIONS_PER_TIMELINE)?;
        let interventions = (0..num_interventions)
            .map(|_| decode_intervention(r))
            .collect::<Result<Vec<_>, _>>()?;
        r.skip((MAX_INTERVENTIONS_PER_TIMELINE - num_interventions) * INTERVENTION_SLOT_SIZE)?;

        Ok(Self {
            timeline_id,
            probability,
            prediction_start_ms,
            prediction_end_ms,
            events,
            interventions,
            worst_case_severity: read_enum(r, "worst_case_severity", Severity::from_id)?,
            total_threat_score: r.f32()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoded<R: Record>(record: &R) -> Vec<u8> {
        let mut out = Vec::new();
        record.encode_into(&mut out);
        out
    }

    #[test]
    fn test_record_sizes() {
        assert_eq!(EVENT_SLOT_SIZE, 148);
        assert_eq!(INTERVENTION_SLOT_SIZE, 148);
        assert_eq!(Timeline::SIZE, 4480);

        let detection = Detection {
            id: 1,
            class_id: 1,
            confidence: 1.0,
            bbox: BoundingBox::default(),
            timestamp_ms: 0,
        };
        assert_eq!(encoded(&detection).len(), Detection::SIZE);

        let timeline = Timeline {
            timeline_id: 0,
            probability: 0.0,
            prediction_start_ms: 0,
            prediction_end_ms: 0,
            events: vec![],
            interventions: vec![],
            worst_case_severity: Severity::None,
            total_threat_score: 0.0,
        };
        assert_eq!(encoded(&timeline).len(), Timeline::SIZE);
    }

    #[test]
    fn test_text_truncates_on_char_boundary() {
        // 127 ASCII bytes followed by a two-byte character would overflow by one.
        let text = format!("{}é", "a".repeat(127));
        let mut out = Vec::new();
        put_text(&mut out, &text);
        assert_eq!(out.len(), TEXT_FIELD_LEN);

        let decoded = ByteReader::new(&out).text().unwrap();
        assert_eq!(decoded, "a".repeat(127));
    }

    #[test]
    fn test_full_length_text_has_no_terminator() {
        let text = "x".repeat(TEXT_FIELD_LEN);
        let mut out = Vec::new();
        put_text(&mut out, &text);
        assert_eq!(ByteReader::new(&out).text().unwrap(), text);
    }

    #[test]
    fn test_excess_events_dropped_on_encode() {
        let event = PredictedEvent {
            event_type: EventType::Loitering,
            timestamp_ms: 1,
            probability: 0.1,
            severity: Severity::Low,
            description: String::new(),
        };
        let timeline = Timeline {
            timeline_id: 1,
            probability: 1.0,
            prediction_start_ms: 0,
            prediction_end_ms: 0,
            events: vec![event; MAX_EVENTS_PER_TIMELINE + 3],
            interventions: vec![],
            worst_case_severity: Severity::Low,
            total_threat_score: 0.0,
        };
        let bytes = encoded(&timeline);
        assert_eq!(bytes.len(), Timeline::SIZE);

        let decoded = Timeline::decode_from(&mut ByteReader::new(&bytes)).unwrap();
        assert_eq!(decoded.events.len(), MAX_EVENTS_PER_TIMELINE);
    }

    #[test]
    fn test_nested_count_out_of_range() {
        let mut bytes = vec![0u8; Timeline::SIZE];
        bytes[24..28].copy_from_slice(&21u32.to_le_bytes());
        let err = Timeline::decode_from(&mut ByteReader::new(&bytes)).unwrap_err();
        assert_eq!(
            err,
            DecodeError::InvalidField {
                field: "num_events",
                value: 21
            }
        );
    }

    #[test]
    fn test_reader_reports_truncation() {
        let mut r = ByteReader::new(&[1, 2, 3]);
        assert!(matches!(r.u32(), Err(DecodeError::Truncated { needed: 4, available: 3 })));
    }
}
