use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use serlink_transport::ByteTransport;

use crate::codec::{DecodeStats, FrameConfig, FrameDecoder};
use crate::error::Result;

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;

/// Reads complete, validated frame payloads from a [`ByteTransport`].
///
/// Handles partial reads and line noise internally. Callers only ever see
/// whole payloads.
pub struct FrameReader<T> {
    inner: T,
    buf: BytesMut,
    chunk: Vec<u8>,
    decoder: FrameDecoder,
    config: FrameConfig,
}

impl<T: ByteTransport> FrameReader<T> {
    /// Create a new frame reader with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new frame reader with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            chunk: vec![0u8; config.read_chunk_size.max(1)],
            decoder: FrameDecoder::new(),
            config,
        }
    }

    /// Return a buffered frame, or read once from the transport and try again.
    ///
    /// Never blocks: `Ok(None)` means no complete frame is available yet.
    pub fn poll_frame(&mut self) -> Result<Option<Bytes>> {
        if let Some(payload) = self.decoder.decode(&mut self.buf) {
            return Ok(Some(payload));
        }

        let read = self.inner.read(&mut self.chunk)?;
        if read == 0 {
            return Ok(None);
        }
        self.buf.extend_from_slice(&self.chunk[..read]);
        Ok(self.decoder.decode(&mut self.buf))
    }

    /// Poll until a frame arrives or `timeout` elapses.
    pub fn read_frame(&mut self, timeout: Duration) -> Result<Option<Bytes>> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(payload) = self.poll_frame()? {
                return Ok(Some(payload));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            std::thread::sleep(self.config.poll_interval);
        }
    }

    /// Decoder counters (accepted frames, rejections, discarded bytes).
    pub fn stats(&self) -> &DecodeStats {
        self.decoder.stats()
    }

    /// Bytes received but not yet consumed by a frame.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Borrow the underlying transport.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Mutably borrow the underlying transport.
    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the reader and return the inner transport.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Current frame reader configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}
