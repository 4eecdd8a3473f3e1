use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::trace;

use crate::error::{Result, TransportError};
use crate::traits::ByteTransport;

type Pipe = Arc<Mutex<VecDeque<u8>>>;

/// In-memory byte link.
///
/// [`MemoryPort::pair`] returns two crossed ports: bytes written on one are
/// read from the other, like the two ends of a null-modem cable. Clones made
/// with [`ByteTransport::try_clone`] share the same pipes.
#[derive(Debug)]
pub struct MemoryPort {
    rx: Pipe,
    tx: Pipe,
    open: bool,
}

impl MemoryPort {
    /// Create a connected pair of ports. Both start closed.
    pub fn pair() -> (MemoryPort, MemoryPort) {
        let a_to_b: Pipe = Arc::default();
        let b_to_a: Pipe = Arc::default();
        let a = MemoryPort {
            rx: Arc::clone(&b_to_a),
            tx: Arc::clone(&a_to_b),
            open: false,
        };
        let b = MemoryPort {
            rx: a_to_b,
            tx: b_to_a,
            open: false,
        };
        (a, b)
    }

    /// Place raw bytes on this port's receive side, as if the peer sent them.
    pub fn inject(&self, data: &[u8]) {
        self.rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(data);
    }

    /// Bytes waiting on this port's receive side.
    pub fn available(&self) -> usize {
        self.rx.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl ByteTransport for MemoryPort {
    fn open(&mut self) -> Result<()> {
        self.open = true;
        Ok(())
    }

    fn close(&mut self) {
        self.open = false;
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        if !self.open {
            return Err(TransportError::NotOpen);
        }
        self.tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(data);
        trace!(len = data.len(), "memory port write");
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if !self.open {
            return Err(TransportError::NotOpen);
        }
        let mut rx = self.rx.lock().unwrap_or_else(PoisonError::into_inner);
        let n = rx.len().min(buf.len());
        for (slot, byte) in buf.iter_mut().zip(rx.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn try_clone(&self) -> Result<Self> {
        Ok(Self {
            rx: Arc::clone(&self.rx),
            tx: Arc::clone(&self.tx),
            open: self.open,
        })
    }

    fn transport_name(&self) -> &'static str {
        "memory"
    }
}
