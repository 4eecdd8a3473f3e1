//! Byte transport abstraction for serial links.
//!
//! Provides a unified interface over the byte-oriented links the RPC stack
//! runs on:
//! - POSIX serial devices (UART, USB CDC, pseudo-terminals) via termios
//! - An in-memory crossed pair for tests and single-process demos
//!
//! This is the lowest layer of serlink. Everything else builds on top of
//! the [`ByteTransport`] trait provided here.

pub mod error;
pub mod memory;
pub mod traits;

#[cfg(unix)]
pub mod serial;

pub use error::{Result, TransportError};
pub use memory::MemoryPort;
pub use traits::ByteTransport;

#[cfg(unix)]
pub use serial::{SerialConfig, SerialPort, DEFAULT_WRITE_TIMEOUT};
