//! Frame encode/decode.
//!
//! Decoding is pure and validates in a fixed order: magic, version, length,
//! record count, checksum, then records. Nothing is parsed past the first
//! failure, and the checksum is verified before any record is materialized.

use crc::{Crc, CRC_32_ISO_HDLC};

use super::records::{ByteReader, Record};
use super::{DecodeError, Frame, FrameHeader, CHECKSUM_SIZE, HEADER_SIZE, MAGIC, VERSION};

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// CRC-32 (ISO-HDLC, same polynomial as zlib) of `data`.
pub fn checksum(data: &[u8]) -> u32 {
    CRC32.checksum(data)
}

/// Read and validate only the header (magic and version).
///
/// Magic is checked as soon as four bytes are present, and version as soon as
/// eight are, so a short buffer from a foreign writer is reported as
/// [`DecodeError::BadMagic`] rather than truncated.
pub fn peek_header(bytes: &[u8]) -> Result<FrameHeader, DecodeError> {
    let truncated = || DecodeError::Truncated {
        needed: HEADER_SIZE,
        available: bytes.len(),
    };
    let mut reader = ByteReader::new(bytes);

    let magic = reader.u32().map_err(|_| truncated())?;
    if magic != MAGIC {
        return Err(DecodeError::BadMagic { found: magic });
    }
    let version = reader.u32().map_err(|_| truncated())?;
    if version != VERSION {
        return Err(DecodeError::UnsupportedVersion { found: version });
    }
    if bytes.len() < HEADER_SIZE {
        return Err(truncated());
    }

    Ok(FrameHeader {
        magic,
        version,
        frame_id: reader.u64()?,
        timestamp_ms: reader.u64()?,
        record_count: reader.u64()?,
    })
}

/// Decode one frame from the start of `bytes`.
///
/// Trailing bytes after the checksum are ignored, so a whole mapped region can
/// be passed in.
pub fn decode<R: Record>(bytes: &[u8]) -> Result<Frame<R>, DecodeError> {
    let header = peek_header(bytes)?;

    if header.record_count > R::MAX_PER_FRAME as u64 {
        return Err(DecodeError::TooManyRecords {
            kind: R::KIND,
            count: header.record_count,
            max: R::MAX_PER_FRAME,
        });
    }
    let count = header.record_count as usize;

    let body_len = HEADER_SIZE + count * R::SIZE;
    let needed = body_len + CHECKSUM_SIZE;
    if bytes.len() < needed {
        return Err(DecodeError::Truncated {
            needed,
            available: bytes.len(),
        });
    }

    let stored = ByteReader::new(&bytes[body_len..needed]).u32()?;
    let computed = checksum(&bytes[..body_len]);
    if stored != computed {
        return Err(DecodeError::ChecksumMismatch { stored, computed });
    }

    let mut reader = ByteReader::new(&bytes[HEADER_SIZE..body_len]);
    let records = (0..count)
        .map(|_| R::decode_from(&mut reader))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Frame { header, records })
}

/// Encode a frame. The record count written is `frame.records.len()`; magic
/// and version are written as given so tests can build invalid frames.
pub fn encode<R: Record>(frame: &Frame<R>) -> Vec<u8> {
    let mut out = Vec::with_capacity(Frame::<R>::encoded_len(frame.records.len()));
    out.extend_from_slice(&frame.header.magic.to_le_bytes());
    out.extend_from_slice(&frame.header.version.to_le_bytes());
    out.extend_from_slice(&frame.header.frame_id.to_le_bytes());
    out.extend_from_slice(&frame.header.timestamp_ms.to_le_bytes());
    out.extend_from_slice(&(frame.records.len() as u64).to_le_bytes());
    for record in &frame.records {
        record.encode_into(&mut out);
    }
    let crc = checksum(&out);
    out.extend_from_slice(&crc.to_le_bytes());
    out
}
