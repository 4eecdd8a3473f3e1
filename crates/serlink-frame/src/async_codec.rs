//! `tokio_util` codec for the same wire format.

use bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::debug;

use crate::codec::{encode_frame, DecodeStats, FrameDecoder, MAX_PAYLOAD};
use crate::error::{FrameError, Result};

/// Frame codec for `FramedRead` / `FramedWrite` over async byte streams.
#[derive(Debug)]
pub struct LinkCodec {
    decoder: FrameDecoder,
    max_payload_size: usize,
}

impl LinkCodec {
    pub fn new() -> Self {
        Self::with_max_payload(MAX_PAYLOAD)
    }

    /// Limit outgoing payloads to `max_payload_size` bytes.
    pub fn with_max_payload(max_payload_size: usize) -> Self {
        Self {
            decoder: FrameDecoder::new(),
            max_payload_size,
        }
    }

    /// Decoder counters.
    pub fn stats(&self) -> &DecodeStats {
        self.decoder.stats()
    }
}

impl Default for LinkCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for LinkCodec {
    type Item = Bytes;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>> {
        Ok(self.decoder.decode(src))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>> {
        if let Some(payload) = self.decoder.decode(src) {
            return Ok(Some(payload));
        }
        if !src.is_empty() {
            debug!(dropped = src.len(), "discarding incomplete frame at end of stream");
            src.clear();
        }
        Ok(None)
    }
}

impl<T: AsRef<[u8]>> Encoder<T> for LinkCodec {
    type Error = FrameError;

    fn encode(&mut self, item: T, dst: &mut BytesMut) -> Result<()> {
        let payload = item.as_ref();
        if payload.len() > self.max_payload_size {
            return Err(FrameError::PayloadTooLarge {
                size: payload.len(),
                max: self.max_payload_size,
            });
        }
        encode_frame(payload, dst)
    }
}
