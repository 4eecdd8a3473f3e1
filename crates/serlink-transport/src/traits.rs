use crate::error::Result;

/// A byte-oriented link: a UART, a pseudo-terminal, or an in-memory pipe.
///
/// Reads never block. A `read` that finds nothing to deliver returns `Ok(0)`,
/// which callers treat as "poll again later", not as end of stream.
///
/// `write` either puts the whole buffer on the link or fails. Framing relies
/// on this: a frame is handed to the transport in one call so that two
/// writers serialized by a lock can never interleave their bytes.
pub trait ByteTransport: Send {
    /// Open (or re-open) the underlying device.
    fn open(&mut self) -> Result<()>;

    /// Close the underlying device. Closing a closed transport is a no-op.
    fn close(&mut self);

    /// Whether the transport is currently open.
    fn is_open(&self) -> bool;

    /// Write the whole buffer.
    ///
    /// Must not wait indefinitely on a line that stops draining: give up with
    /// an `ErrorKind::TimedOut` I/O error instead.
    fn write(&mut self, data: &[u8]) -> Result<()>;

    /// Read whatever is available into `buf`, returning the byte count.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Create a second handle onto the same link.
    ///
    /// Used to give the receive pump and the sending side their own handles.
    fn try_clone(&self) -> Result<Self>
    where
        Self: Sized;

    /// Transport name for diagnostics.
    fn transport_name(&self) -> &'static str;
}
