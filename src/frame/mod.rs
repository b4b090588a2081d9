//! Binary frame format shared with the producer.
//!
//! One frame carries every record of one category at one instant:
//!
//! ```text
//! offset  size  field
//! 0       4     magic         u32 LE, 0x4F4D4E49 ("OMNI")
//! 4       4     version       u32 LE, 1
//! 8       8     frame_id      u64 LE, monotonically non-decreasing
//! 16      8     timestamp_ms  u64 LE, milliseconds since epoch
//! 24      8     record_count  u64 LE
//! 32      N     records       record_count * R::SIZE bytes
//! 32+N    4     checksum      u32 LE, CRC-32 (ISO-HDLC) of bytes [0, 32+N)
//! ```
//!
//! A frame is either accepted whole or rejected whole. See [`codec`] for the
//! validation order and [`records`] for the per-category record layouts.

pub mod codec;
pub mod records;

pub use codec::{checksum, decode, encode, peek_header};
pub use records::Record;

use thiserror::Error;

/// Protocol magic ("OMNI").
pub const MAGIC: u32 = 0x4F4D_4E49;

/// Supported protocol version. Any other version is a hard rejection.
pub const VERSION: u32 = 1;

/// Size of the fixed frame header in bytes.
pub const HEADER_SIZE: usize = 32;

/// Size of the trailing checksum in bytes.
pub const CHECKSUM_SIZE: usize = 4;

/// Fixed frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Protocol magic
    pub magic: u32,
    /// Protocol version
    pub version: u32,
    /// Producer frame counter
    pub frame_id: u64,
    /// Producer timestamp, milliseconds since epoch
    pub timestamp_ms: u64,
    /// Number of records that follow
    pub record_count: u64,
}

/// A validated frame of typed records.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame<R> {
    /// Frame header
    pub header: FrameHeader,
    /// Records, in producer order
    pub records: Vec<R>,
}

impl<R: Record> Frame<R> {
    /// Build a frame with the current protocol magic and version.
    pub fn new(frame_id: u64, timestamp_ms: u64, records: Vec<R>) -> Self {
        Self {
            header: FrameHeader {
                magic: MAGIC,
                version: VERSION,
                frame_id,
                timestamp_ms,
                record_count: records.len() as u64,
            },
            records,
        }
    }

    /// Encoded length of a frame holding `count` records.
    pub fn encoded_len(count: usize) -> usize {
        HEADER_SIZE + count * R::SIZE + CHECKSUM_SIZE
    }

    /// Largest frame the category can produce. Shared-memory regions are
    /// sized to this.
    pub fn max_encoded_len() -> usize {
        Self::encoded_len(R::MAX_PER_FRAME)
    }
}

/// Detection frame.
pub type DetectionFrame = Frame<crate::types::Detection>;
/// Tracked-objects frame.
pub type TrackFrame = Frame<crate::types::TrackedObject>;
/// Timelines frame.
pub type TimelineFrame = Frame<crate::types::Timeline>;

/// Reasons a frame is rejected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Magic did not match [`MAGIC`]; the region is uninitialized or foreign.
    #[error("bad magic 0x{found:08X} (expected 0x{:08X})", MAGIC)]
    BadMagic {
        /// Magic found in the buffer
        found: u32,
    },

    /// Version is not [`VERSION`].
    #[error("unsupported protocol version {found} (expected {})", VERSION)]
    UnsupportedVersion {
        /// Version found in the buffer
        found: u32,
    },

    /// The buffer ends before the declared records and checksum.
    #[error("truncated frame: need {needed} bytes, have {available}")]
    Truncated {
        /// Bytes required by the header's record count
        needed: usize,
        /// Bytes available
        available: usize,
    },

    /// The declared record count exceeds the category maximum.
    #[error("{kind} frame declares {count} records (max {max})")]
    TooManyRecords {
        /// Record kind
        kind: &'static str,
        /// Declared count
        count: u64,
        /// Category maximum
        max: usize,
    },

    /// Stored checksum does not match the computed one.
    #[error("checksum mismatch: stored 0x{stored:08X}, computed 0x{computed:08X}")]
    ChecksumMismatch {
        /// Trailing checksum in the frame
        stored: u32,
        /// Checksum computed over header and records
        computed: u32,
    },

    /// A checksum-valid record holds a value outside its domain.
    #[error("invalid {field}: {value}")]
    InvalidField {
        /// Field name
        field: &'static str,
        /// Offending raw value
        value: u64,
    },
}
