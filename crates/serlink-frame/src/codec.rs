use bytes::{Buf, BufMut, Bytes, BytesMut};
use tracing::debug;

use crate::crc::crc8;
use crate::error::{FrameError, Result};

/// First byte of every frame.
pub const START: u8 = 0xFA;

/// Separator between the header and the payload.
pub const SEP: u8 = 0xFB;

/// Last byte of every frame.
pub const END: u8 = 0xFE;

/// Start (1) + length (2) + header CRC (1) + separator (1).
pub const HEADER_SIZE: usize = 5;

/// Full CRC (1) + end marker (1).
pub const TRAILER_SIZE: usize = 2;

/// Framing bytes added around every payload.
pub const FRAME_OVERHEAD: usize = HEADER_SIZE + TRAILER_SIZE;

/// Largest payload the 16-bit length field can describe.
pub const MAX_PAYLOAD: usize = u16::MAX as usize;

/// Default number of bytes requested from the transport per read.
pub const DEFAULT_READ_CHUNK: usize = 1024;

/// Total wire size of a frame carrying `payload_len` bytes.
pub fn frame_len(payload_len: usize) -> usize {
    payload_len + FRAME_OVERHEAD
}

/// Encode a payload into the wire format, appending to `dst`.
///
/// Wire format:
/// ```text
/// ┌───────┬─────────┬─────────┬─────────┬───────┬──────────┬──────────┬───────┐
/// │ START │ LEN_LO  │ LEN_HI  │ HDR_CRC │ SEP   │ PAYLOAD  │ FULL_CRC │ END   │
/// │ 0xFA  │ (u16 LE)          │ crc8    │ 0xFB  │ LEN B    │ crc8     │ 0xFE  │
/// └───────┴─────────┴─────────┴─────────┴───────┴──────────┴──────────┴───────┘
/// ```
///
/// `HDR_CRC` covers the first three bytes. `FULL_CRC` covers everything from
/// `START` through the last payload byte.
pub fn encode_frame(payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    if payload.len() > MAX_PAYLOAD {
        return Err(FrameError::PayloadTooLarge {
            size: payload.len(),
            max: MAX_PAYLOAD,
        });
    }

    let start = dst.len();
    dst.reserve(frame_len(payload.len()));
    dst.put_u8(START);
    dst.put_u16_le(payload.len() as u16);
    let header_crc = crc8(&dst[start..start + 3]);
    dst.put_u8(header_crc);
    dst.put_u8(SEP);
    dst.put_slice(payload);
    let full_crc = crc8(&dst[start..]);
    dst.put_u8(full_crc);
    dst.put_u8(END);
    Ok(())
}

/// Decode the next valid frame from `src` without keeping statistics.
///
/// See [`FrameDecoder::decode`].
pub fn decode_frame(src: &mut BytesMut) -> Option<Bytes> {
    FrameDecoder::new().decode(src)
}

/// Why the decoder discarded bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// The buffer head was not a start marker.
    BadStart,
    /// The header CRC did not match.
    HeaderCrc,
    /// No separator after the header.
    MissingSeparator,
    /// No end marker where the declared length puts it.
    MissingEnd,
    /// The CRC over header and payload did not match.
    PayloadCrc,
}

impl Rejection {
    pub fn as_str(self) -> &'static str {
        match self {
            Rejection::BadStart => "bad start marker",
            Rejection::HeaderCrc => "header crc mismatch",
            Rejection::MissingSeparator => "missing separator",
            Rejection::MissingEnd => "missing end marker",
            Rejection::PayloadCrc => "payload crc mismatch",
        }
    }
}

/// Running counters kept by a [`FrameDecoder`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodeStats {
    /// Frames accepted.
    pub frames: u64,
    pub bad_start: u64,
    pub header_crc: u64,
    pub missing_separator: u64,
    pub missing_end: u64,
    pub payload_crc: u64,
    /// Bytes dropped while resynchronizing.
    pub discarded_bytes: u64,
}

impl DecodeStats {
    /// Total rejection events of every kind.
    pub fn rejections(&self) -> u64 {
        self.bad_start + self.header_crc + self.missing_separator + self.missing_end + self.payload_crc
    }

    fn record(&mut self, rejection: Rejection, dropped: usize) {
        let counter = match rejection {
            Rejection::BadStart => &mut self.bad_start,
            Rejection::HeaderCrc => &mut self.header_crc,
            Rejection::MissingSeparator => &mut self.missing_separator,
            Rejection::MissingEnd => &mut self.missing_end,
            Rejection::PayloadCrc => &mut self.payload_crc,
        };
        *counter += 1;
        self.discarded_bytes += dropped as u64;
    }
}

/// Incremental, resynchronizing frame parser.
///
/// Feed it a growing receive buffer and call [`decode`](Self::decode) until
/// it returns `None`.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    stats: DecodeStats,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the next valid payload in `src`, consuming its frame.
    ///
    /// Bytes that cannot start a valid frame are discarded: a run of non-start
    /// bytes is skipped at once, and any other check failure drops exactly one
    /// byte so that a frame beginning inside the rejected candidate is still
    /// found. Returns `None` once the buffer is empty or holds only the prefix
    /// of a candidate frame; that prefix is left in place for the next call.
    pub fn decode(&mut self, src: &mut BytesMut) -> Option<Bytes> {
        loop {
            if src.is_empty() {
                return None;
            }

            if src[0] != START {
                let skip = src.iter().position(|&b| b == START).unwrap_or(src.len());
                self.reject(src, Rejection::BadStart, skip);
                continue;
            }

            if src.len() < HEADER_SIZE {
                return None;
            }

            if crc8(&src[..3]) != src[3] {
                self.reject(src, Rejection::HeaderCrc, 1);
                continue;
            }

            if src[4] != SEP {
                self.reject(src, Rejection::MissingSeparator, 1);
                continue;
            }

            let payload_len = u16::from_le_bytes([src[1], src[2]]) as usize;
            let total = frame_len(payload_len);
            if src.len() < total {
                return None;
            }

            if src[total - 1] != END {
                self.reject(src, Rejection::MissingEnd, 1);
                continue;
            }

            let crc_at = HEADER_SIZE + payload_len;
            if crc8(&src[..crc_at]) != src[crc_at] {
                self.reject(src, Rejection::PayloadCrc, 1);
                continue;
            }

            src.advance(HEADER_SIZE);
            let payload = src.split_to(payload_len).freeze();
            src.advance(TRAILER_SIZE);
            self.stats.frames += 1;
            return Some(payload);
        }
    }

    /// Counters accumulated since creation or the last reset.
    pub fn stats(&self) -> &DecodeStats {
        &self.stats
    }

    /// Clear the counters.
    pub fn reset_stats(&mut self) {
        self.stats = DecodeStats::default();
    }

    fn reject(&mut self, src: &mut BytesMut, rejection: Rejection, dropped: usize) {
        debug!(
            reason = rejection.as_str(),
            dropped,
            buffered = src.len(),
            "discarding bytes while resynchronizing"
        );
        src.advance(dropped);
        self.stats.record(rejection, dropped);
    }
}

/// Configuration for frame readers and writers.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum payload size in bytes accepted for sending. Default and ceiling:
    /// [`MAX_PAYLOAD`].
    pub max_payload_size: usize,
    /// Bytes requested from the transport per read.
    pub read_chunk_size: usize,
    /// Sleep between transport polls when nothing is available.
    pub poll_interval: std::time::Duration,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_payload_size: MAX_PAYLOAD,
            read_chunk_size: DEFAULT_READ_CHUNK,
            poll_interval: std::time::Duration::from_millis(1),
        }
    }
}
