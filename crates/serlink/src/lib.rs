//! Framed, CRC-checked RPC over unreliable serial links.
//!
//! serlink turns a raw, possibly noisy byte stream (a UART, a pseudo-terminal,
//! an in-memory pipe) into integrity-checked frames, and runs a small
//! request/response protocol with timeouts on top of them.
//!
//! # Crate Structure
//!
//! - [`transport`]: byte transports (termios serial port, in-memory pair)
//! - [`frame`]: CRC8 framing with stream resynchronization
//! - [`rpc`]: envelopes, pending-call table, dispatch engine (behind `rpc` feature)

/// Re-export transport types.
pub mod transport {
    pub use serlink_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use serlink_frame::*;
}

/// Re-export RPC types (requires `rpc` feature).
#[cfg(feature = "rpc")]
pub mod rpc {
    pub use serlink_rpc::*;
}
