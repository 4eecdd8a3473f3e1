use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use bytes::Bytes;
use serlink_frame::FrameReader;
use serlink_transport::ByteTransport;
use tracing::{debug, warn};

use crate::error::{Result, RpcError};
use crate::queue::BlockingQueue;

/// Background thread that moves validated frame payloads from a
/// [`FrameReader`] onto a [`BlockingQueue`].
///
/// Sleeps for the reader's configured poll interval whenever no frame is
/// ready. Empty payloads are dropped.
pub struct Pump<T: ByteTransport + 'static> {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<FrameReader<T>>>,
}

impl<T: ByteTransport + 'static> Pump<T> {
    pub fn spawn(reader: FrameReader<T>, queue: Arc<BlockingQueue<Bytes>>) -> Result<Self> {
        Self::spawn_named(reader, queue, "serlink-pump")
    }

    pub fn spawn_named(
        reader: FrameReader<T>,
        queue: Arc<BlockingQueue<Bytes>>,
        thread_name: &str,
    ) -> Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let handle = thread::Builder::new()
            .name(thread_name.to_string())
            .spawn(move || run(reader, &queue, &flag))
            .map_err(RpcError::Spawn)?;
        debug!(thread = thread_name, "pump started");
        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    /// Stop the thread and hand back the reader, whose
    /// [`stats`](FrameReader::stats) hold the final decode counters.
    ///
    /// Returns `None` if already stopped or if the thread panicked.
    pub fn stop(&mut self) -> Option<FrameReader<T>> {
        let handle = self.handle.take()?;
        self.stop.store(true, Ordering::Release);
        match handle.join() {
            Ok(reader) => {
                debug!(stats = ?reader.stats(), "pump stopped");
                Some(reader)
            }
            Err(_) => {
                warn!("pump thread panicked");
                None
            }
        }
    }
}

impl<T: ByteTransport + 'static> Drop for Pump<T> {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run<T: ByteTransport>(
    mut reader: FrameReader<T>,
    queue: &BlockingQueue<Bytes>,
    stop: &AtomicBool,
) -> FrameReader<T> {
    let poll_interval = reader.config().poll_interval;
    let mut failing = false;

    while !stop.load(Ordering::Acquire) {
        match reader.poll_frame() {
            Ok(Some(payload)) => {
                failing = false;
                if payload.is_empty() {
                    debug!("dropping empty frame");
                    continue;
                }
                queue.push(payload);
            }
            Ok(None) => {
                failing = false;
                thread::sleep(poll_interval);
            }
            Err(err) => {
                if !failing {
                    warn!(error = %err, "read from transport failed");
                    failing = true;
                }
                thread::sleep(poll_interval);
            }
        }
    }
    reader
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bytes::BytesMut;
    use serlink_frame::encode_frame;
    use serlink_transport::MemoryPort;

    use super::*;

    const WAIT: Duration = Duration::from_secs(5);

    fn wire(payload: &[u8]) -> Vec<u8> {
        let mut buf = BytesMut::new();
        encode_frame(payload, &mut buf).unwrap();
        buf.to_vec()
    }

    fn open_pair() -> (MemoryPort, MemoryPort) {
        let (mut a, mut b) = MemoryPort::pair();
        a.open().unwrap();
        b.open().unwrap();
        (a, b)
    }

    #[test]
    fn frames_reach_queue_in_order() {
        let (port, mut peer) = open_pair();
        let queue = Arc::new(BlockingQueue::new());
        let mut pump = Pump::spawn(FrameReader::new(port), Arc::clone(&queue)).unwrap();

        peer.write(&wire(b"one")).unwrap();
        peer.write(&wire(b"two")).unwrap();

        assert_eq!(queue.pop_timeout(WAIT).unwrap().as_ref(), b"one");
        assert_eq!(queue.pop_timeout(WAIT).unwrap().as_ref(), b"two");

        let reader = pump.stop().expect("pump should hand back its reader");
        assert_eq!(reader.stats().frames, 2);
        assert!(!pump.is_running());
        assert!(pump.stop().is_none());
    }

    #[test]
    fn noise_is_counted_and_empty_frames_dropped() {
        let (port, _peer) = open_pair();
        let mut bytes = vec![0x01, 0x02, 0x03];
        bytes.extend(wire(b""));
        bytes.extend(wire(b"kept"));
        port.inject(&bytes);

        let queue = Arc::new(BlockingQueue::new());
        let mut pump = Pump::spawn(FrameReader::new(port), Arc::clone(&queue)).unwrap();

        assert_eq!(queue.pop_timeout(WAIT).unwrap().as_ref(), b"kept");
        let reader = pump.stop().unwrap();
        assert!(queue.is_empty());
        assert_eq!(reader.stats().frames, 2);
        assert_eq!(reader.stats().discarded_bytes, 3);
    }

    #[test]
    fn survives_read_errors_until_stopped() {
        let (port, _peer) = MemoryPort::pair();
        let queue = Arc::new(BlockingQueue::new());
        let mut pump = Pump::spawn(FrameReader::new(port), Arc::clone(&queue)).unwrap();

        thread::sleep(Duration::from_millis(20));
        assert!(pump.is_running());
        assert!(pump.stop().is_some());
        assert!(queue.is_empty());
    }
}
