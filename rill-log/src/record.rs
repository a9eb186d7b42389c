//! Records, record codec and on-disk framing.
//!
//! The file backend stores every record, every committed position and the
//! log metadata as a frame:
//!
//! ```text
//! +----------+----------+----------+
//! |  CRC32   |  Length  | Payload  |
//! | (4 bytes)| (4 bytes)| (N bytes)|
//! +----------+----------+----------+
//! ```
//!
//! - CRC32: Checksum of Length + Payload (NOT including CRC itself)
//! - Length: Payload length in bytes (not including header)
//!
//! All integers are stored in little-endian format.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use rill_core::limits::RECORD_SIZE_BYTES_MAX;
use rill_core::LogOffset;

use crate::error::{LogError, LogResult};

/// Size of the frame header in bytes.
pub const FRAME_HEADER_SIZE: usize = 8; // 4 + 4

/// A message read from a log along with its position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord<M> {
    offset: LogOffset,
    message: M,
}

impl<M> LogRecord<M> {
    /// Creates a record.
    #[must_use]
    pub const fn new(offset: LogOffset, message: M) -> Self {
        Self { offset, message }
    }

    /// Returns the position of the record.
    #[must_use]
    pub const fn offset(&self) -> &LogOffset {
        &self.offset
    }

    /// Returns the message.
    #[must_use]
    pub const fn message(&self) -> &M {
        &self.message
    }

    /// Splits the record into its offset and message.
    #[must_use]
    pub fn into_parts(self) -> (LogOffset, M) {
        (self.offset, self.message)
    }
}

/// Binary encoding of a message stored by the file backend.
///
/// The in-memory backend never encodes, so it accepts any message type.
pub trait LogCodec: Sized {
    /// Appends the encoded message to `buf`.
    fn encode(&self, buf: &mut BytesMut);

    /// Decodes a message, consuming the bytes it used.
    ///
    /// # Errors
    /// Returns `Corruption` if the buffer does not hold a valid message.
    fn decode(buf: &mut Bytes) -> LogResult<Self>;
}

impl LogCodec for Bytes {
    #[allow(clippy::cast_possible_truncation)] // Bounded by RECORD_SIZE_BYTES_MAX.
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.len() as u32);
        buf.put_slice(self);
    }

    fn decode(buf: &mut Bytes) -> LogResult<Self> {
        if buf.remaining() < 4 {
            return Err(LogError::corruption("missing bytes length"));
        }
        let len = buf.get_u32_le() as usize;
        if buf.remaining() < len {
            return Err(LogError::corruption("truncated bytes"));
        }
        Ok(buf.split_to(len))
    }
}

impl LogCodec for String {
    #[allow(clippy::cast_possible_truncation)] // Bounded by RECORD_SIZE_BYTES_MAX.
    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.len() as u32);
        buf.put_slice(self.as_bytes());
    }

    fn decode(buf: &mut Bytes) -> LogResult<Self> {
        let raw = Bytes::decode(buf)?;
        Self::from_utf8(raw.to_vec()).map_err(|_| LogError::corruption("string is not utf-8"))
    }
}

fn compute_crc(length: u32, payload: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&length.to_le_bytes());
    hasher.update(payload);
    hasher.finalize()
}

/// Encodes a payload as a frame.
///
/// # Errors
/// Returns `RecordTooLarge` if the payload exceeds [`RECORD_SIZE_BYTES_MAX`].
pub fn encode_frame(payload: &[u8], buf: &mut BytesMut) -> LogResult<()> {
    // TigerStyle: Check limits explicitly.
    if payload.len() > RECORD_SIZE_BYTES_MAX as usize {
        return Err(LogError::RecordTooLarge {
            size: payload.len() as u64,
            max: RECORD_SIZE_BYTES_MAX,
        });
    }

    #[allow(clippy::cast_possible_truncation)]
    let length = payload.len() as u32;

    buf.reserve(FRAME_HEADER_SIZE + payload.len());
    buf.put_u32_le(compute_crc(length, payload));
    buf.put_u32_le(length);
    buf.put_slice(payload);
    Ok(())
}

/// Result of scanning a buffer of frames.
#[derive(Debug)]
pub struct FrameScan {
    /// Payloads of every valid frame, in order.
    pub payloads: Vec<Bytes>,
    /// Number of bytes covered by valid frames.
    pub valid_len: u64,
    /// Error that stopped the scan before the end of the buffer, if any.
    pub stopped_by: Option<LogError>,
}

/// Decodes consecutive frames until the end of `data` or the first invalid
/// frame.
///
/// A short or corrupted tail is reported through `stopped_by` rather than an
/// error: it is the expected shape of a write interrupted by a crash.
#[must_use]
pub fn scan_frames(data: &Bytes) -> FrameScan {
    let mut buf = data.clone();
    let mut payloads = Vec::new();
    let mut position = 0u64;

    let stopped_by = loop {
        if buf.remaining() == 0 {
            break None;
        }
        if buf.remaining() < FRAME_HEADER_SIZE {
            break Some(LogError::corruption("truncated frame header"));
        }
        let crc = buf.get_u32_le();
        let length = buf.get_u32_le();
        if length > RECORD_SIZE_BYTES_MAX {
            break Some(LogError::corruption("frame length exceeds maximum"));
        }
        if buf.remaining() < length as usize {
            break Some(LogError::corruption("truncated frame payload"));
        }
        let payload = buf.split_to(length as usize);
        let actual = compute_crc(length, &payload);
        if actual != crc {
            break Some(LogError::ChecksumMismatch {
                position,
                expected: crc,
                actual,
            });
        }
        payloads.push(payload);
        position += FRAME_HEADER_SIZE as u64 + u64::from(length);
    };

    FrameScan {
        payloads,
        valid_len: position,
        stopped_by,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frames(payloads: &[&[u8]]) -> Bytes {
        let mut buf = BytesMut::new();
        for payload in payloads {
            encode_frame(payload, &mut buf).unwrap();
        }
        buf.freeze()
    }

    #[test]
    fn test_scan_frames() {
        let data = frames(&[b"first", b"", b"third"]);
        let scan = scan_frames(&data);

        assert!(scan.stopped_by.is_none());
        assert_eq!(scan.valid_len, data.len() as u64);
        assert_eq!(scan.payloads.len(), 3);
        assert_eq!(scan.payloads[2], Bytes::from_static(b"third"));
    }

    #[test]
    fn test_scan_stops_at_torn_tail() {
        let data = frames(&[b"kept", b"torn away"]);
        let torn = data.slice(..data.len() - 3);
        let scan = scan_frames(&torn);

        assert_eq!(scan.payloads, vec![Bytes::from_static(b"kept")]);
        assert_eq!(scan.valid_len, (FRAME_HEADER_SIZE + 4) as u64);
        assert!(scan.stopped_by.is_some());
    }

    #[test]
    fn test_scan_detects_corruption() {
        let mut raw = frames(&[b"payload"]).to_vec();
        let last = raw.len() - 1;
        raw[last] ^= 0xFF;
        let scan = scan_frames(&Bytes::from(raw));

        assert!(scan.payloads.is_empty());
        assert!(matches!(
            scan.stopped_by,
            Some(LogError::ChecksumMismatch { position: 0, .. })
        ));
    }

    #[test]
    fn test_frame_too_large() {
        let payload = vec![0u8; RECORD_SIZE_BYTES_MAX as usize + 1];
        let mut buf = BytesMut::new();
        assert!(matches!(
            encode_frame(&payload, &mut buf),
            Err(LogError::RecordTooLarge { .. })
        ));
    }

    #[test]
    fn test_string_codec_rejects_invalid_utf8() {
        let mut buf = BytesMut::new();
        Bytes::from_static(&[0xFF, 0xFE]).encode(&mut buf);
        assert!(String::decode(&mut buf.freeze()).is_err());
    }
}
