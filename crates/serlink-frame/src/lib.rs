//! CRC-guarded packet framing for unreliable serial links.
//!
//! Every payload travels inside a frame:
//! - A start marker (`0xFA`) for stream synchronization
//! - A 2-byte little-endian payload length, protected by its own CRC8
//! - A separator (`0xFB`), the payload, a CRC8 over everything before it
//! - An end marker (`0xFE`)
//!
//! The decoder resynchronizes after line noise by discarding bytes until a
//! frame validates again. No partial reads, no buffer management in user code.

#[cfg(feature = "async")]
pub mod async_codec;
pub mod codec;
pub mod crc;
pub mod error;
pub mod reader;
pub mod writer;

#[cfg(feature = "async")]
pub use async_codec::LinkCodec;
pub use codec::{
    decode_frame, encode_frame, frame_len, DecodeStats, FrameConfig, FrameDecoder, Rejection,
    END, FRAME_OVERHEAD, HEADER_SIZE, MAX_PAYLOAD, SEP, START,
};
pub use crc::crc8;
pub use error::{FrameError, Result};
pub use reader::FrameReader;
pub use writer::FrameWriter;
