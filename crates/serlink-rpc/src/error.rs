use std::time::Duration;

use bytes::Bytes;

/// Errors that can occur while encoding or decoding an RPC envelope.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MessageError {
    /// Fewer bytes than the smallest possible envelope.
    #[error("message too short ({0} bytes, need at least 3)")]
    TooShort(usize),

    /// The kind tag is not one of the defined message kinds.
    #[error("unknown message kind 0x{0:02X}")]
    UnknownKind(u8),

    /// No NUL byte terminates the function name.
    #[error("function name is not NUL-terminated")]
    MissingNameTerminator,

    /// The function name cannot be encoded.
    #[error("invalid function name {0:?}: contains NUL")]
    InvalidName(String),
}

/// Errors that can occur in RPC operations.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] serlink_transport::TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] serlink_frame::FrameError),

    /// Envelope encoding error.
    #[error("message error: {0}")]
    Message(#[from] MessageError),

    /// No reply arrived within the call's timeout.
    #[error("request {id} ({name}) timed out after {timeout:?}")]
    Timeout {
        name: String,
        id: u8,
        timeout: Duration,
    },

    /// The remote side answered with an Error message.
    #[error("remote returned an error for '{name}'")]
    Remote { name: String, payload: Bytes },

    /// The dispatch loop is not running, so no reply could ever be delivered.
    #[error("rpc engine is not running")]
    NotRunning,

    /// `start` was called on a running engine.
    #[error("rpc engine is already running")]
    AlreadyRunning,

    /// All 256 request ids are held by in-flight calls.
    #[error("too many requests in flight")]
    TooManyInFlight,

    /// A worker thread could not be spawned.
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[source] std::io::Error),
}

pub type Result<T> = std::result::Result<T, RpcError>;
