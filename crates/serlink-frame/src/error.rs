use serlink_transport::TransportError;

/// Errors that can occur while encoding or moving frames.
///
/// Corrupt input on the receive side is not an error: the decoder drops it,
/// resynchronizes and counts the event in [`DecodeStats`](crate::DecodeStats).
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The payload does not fit in a frame.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// The byte transport failed.
    #[error("frame transport error: {0}")]
    Transport(#[from] TransportError),

    /// An I/O error occurred on an async stream.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, FrameError>;
