use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use serlink_frame::{FrameConfig, FrameWriter};
use serlink_transport::ByteTransport;
use tracing::{debug, info, trace, warn};

use crate::error::{Result, RpcError};
use crate::message::{encode_message, Envelope, MessageKind};
use crate::pending::{PendingTable, Reply};
use crate::queue::BlockingQueue;

/// Default time a call waits for its reply.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_millis(1000);

/// A registered function: argument bytes in, result bytes out.
pub type Handler = Arc<dyn Fn(&[u8]) -> Vec<u8> + Send + Sync>;

/// Receives `Stream` messages as `(name, payload)`.
pub type StreamSink = Arc<dyn Fn(&str, &[u8]) + Send + Sync>;

/// Configuration for an [`RpcEngine`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Timeout used by [`RpcEngine::call_default`].
    pub call_timeout: Duration,
    /// Name given to the dispatch thread.
    pub dispatch_thread_name: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            call_timeout: DEFAULT_CALL_TIMEOUT,
            dispatch_thread_name: "serlink-dispatch".to_string(),
        }
    }
}

struct Shared<T> {
    writer: Mutex<FrameWriter<T>>,
    registry: RwLock<HashMap<String, Handler>>,
    stream_sink: RwLock<Option<StreamSink>>,
    pending: PendingTable,
    incoming: Arc<BlockingQueue<Bytes>>,
    running: AtomicBool,
}

/// Stop flags owned by one run of the dispatch thread.
#[derive(Default)]
struct RunState {
    /// Exit on the next empty payload.
    stopping: AtomicBool,
    /// Exit as soon as the current message has been handled.
    retired: AtomicBool,
}

struct Worker {
    handle: JoinHandle<()>,
    state: Arc<RunState>,
}

/// Request/response engine over a framed link.
///
/// Outgoing messages go straight to the frame writer. Incoming payloads are
/// pushed onto [`incoming`](Self::incoming) by whatever owns the read side
/// (usually a [`Pump`](crate::Pump)) and handled by a single dispatch thread:
/// requests run the registered handler and send back a `Response` (or an
/// `Error` for unknown names), replies complete the matching pending call,
/// and stream messages go to the stream sink.
///
/// Handlers run on the dispatch thread. A handler that blocks on
/// [`call`](Self::call) against the same engine will wait for its own timeout.
pub struct RpcEngine<T: ByteTransport + 'static> {
    shared: Arc<Shared<T>>,
    worker: Mutex<Option<Worker>>,
    config: EngineConfig,
}

impl<T: ByteTransport + 'static> RpcEngine<T> {
    /// Create an engine writing to an open transport.
    pub fn new(transport: T) -> Self {
        Self::with_config(transport, EngineConfig::default())
    }

    pub fn with_config(transport: T, config: EngineConfig) -> Self {
        Self::from_writer(FrameWriter::with_config(transport, FrameConfig::default()), config)
    }

    /// Create an engine around an existing frame writer.
    pub fn from_writer(writer: FrameWriter<T>, config: EngineConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                writer: Mutex::new(writer),
                registry: RwLock::new(HashMap::new()),
                stream_sink: RwLock::new(None),
                pending: PendingTable::new(),
                incoming: Arc::new(BlockingQueue::new()),
                running: AtomicBool::new(false),
            }),
            worker: Mutex::new(None),
            config,
        }
    }

    /// Register `handler` under `name`, replacing any previous one.
    ///
    /// Allowed at any time, including while the engine is running.
    pub fn register<F>(&self, name: impl Into<String>, handler: F)
    where
        F: Fn(&[u8]) -> Vec<u8> + Send + Sync + 'static,
    {
        let name = name.into();
        debug!(%name, "function registered");
        self.shared
            .registry
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name, Arc::new(handler));
    }

    /// Remove a handler. Returns whether one was registered.
    pub fn unregister(&self, name: &str) -> bool {
        self.shared
            .registry
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
            .is_some()
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.shared
            .registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    /// Install the callback for incoming `Stream` messages.
    pub fn on_stream<F>(&self, sink: F)
    where
        F: Fn(&str, &[u8]) + Send + Sync + 'static,
    {
        *self
            .shared
            .stream_sink
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(sink));
    }

    /// Queue the read side feeds with validated frame payloads.
    pub fn incoming(&self) -> Arc<BlockingQueue<Bytes>> {
        Arc::clone(&self.shared.incoming)
    }

    /// Spawn the dispatch thread.
    pub fn start(&self) -> Result<()> {
        let mut worker = self.worker.lock().unwrap_or_else(PoisonError::into_inner);
        if worker.is_some() {
            return Err(RpcError::AlreadyRunning);
        }

        let state = Arc::new(RunState::default());
        let shared = Arc::clone(&self.shared);
        let run = Arc::clone(&state);
        let handle = thread::Builder::new()
            .name(self.config.dispatch_thread_name.clone())
            .spawn(move || shared.dispatch_loop(&run))
            .map_err(RpcError::Spawn)?;
        *worker = Some(Worker { handle, state });
        self.shared.running.store(true, Ordering::SeqCst);
        info!(thread = %self.config.dispatch_thread_name, "rpc engine started");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Stop the dispatch thread and wait for it to exit.
    ///
    /// Payloads queued before the stop are still dispatched. Idempotent.
    ///
    /// Called from a handler, this returns at once and the dispatch thread
    /// exits when that handler returns. Anything still queued is left for the
    /// next [`start`](Self::start).
    pub fn stop(&self) {
        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(Worker { handle, state }) = worker else {
            return;
        };
        self.shared.running.store(false, Ordering::SeqCst);

        if handle.thread().id() == thread::current().id() {
            state.retired.store(true, Ordering::SeqCst);
            debug!("rpc engine stopped from its own dispatch thread");
            return;
        }

        state.stopping.store(true, Ordering::SeqCst);
        // Empty payload wakes the dispatch loop; it is never a valid message.
        self.shared.incoming.push(Bytes::new());
        if handle.join().is_err() {
            warn!("dispatch thread panicked");
        }
        info!("rpc engine stopped");
    }

    /// Call `name` on the remote side and wait up to `timeout` for the reply.
    ///
    /// Fails with [`RpcError::Remote`] when the remote answers with an Error
    /// message (for example, no such function) and [`RpcError::Timeout`] when
    /// nothing arrives in time. Safe to call from many threads at once.
    pub fn call(&self, name: &str, args: &[u8], timeout: Duration) -> Result<Bytes> {
        if !self.is_running() {
            return Err(RpcError::NotRunning);
        }

        let pending = self.shared.pending.allocate()?;
        let id = pending.id();
        if let Err(err) = self.shared.send(MessageKind::Request, id, name, args) {
            self.shared.pending.remove(id);
            return Err(err);
        }
        debug!(name, id, args = args.len(), "request sent");

        let reply = pending.wait(timeout);
        self.shared.pending.remove(id);

        match reply {
            Some(Reply {
                kind: MessageKind::Response,
                payload,
            }) => Ok(payload),
            Some(Reply { payload, .. }) => Err(RpcError::Remote {
                name: name.to_string(),
                payload,
            }),
            None => {
                warn!(name, id, ?timeout, "request timed out");
                Err(RpcError::Timeout {
                    name: name.to_string(),
                    id,
                    timeout,
                })
            }
        }
    }

    /// [`call`](Self::call) with the configured default timeout.
    pub fn call_default(&self, name: &str, args: &[u8]) -> Result<Bytes> {
        self.call(name, args, self.config.call_timeout)
    }

    /// Send a one-way `Stream` message. Nothing is expected back.
    pub fn notify(&self, name: &str, payload: &[u8]) -> Result<()> {
        self.shared.send(MessageKind::Stream, 0, name, payload)
    }

    /// Calls currently waiting for a reply.
    pub fn pending_count(&self) -> usize {
        self.shared.pending.len()
    }

    /// Close the write side's transport.
    pub fn close_transport(&self) {
        self.shared
            .writer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut()
            .close();
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}

impl<T: ByteTransport + 'static> Drop for RpcEngine<T> {
    fn drop(&mut self) {
        self.stop();
    }
}

impl<T: ByteTransport> Shared<T> {
    fn send(&self, kind: MessageKind, id: u8, name: &str, payload: &[u8]) -> Result<()> {
        let mut buf = BytesMut::new();
        encode_message(kind, id, name, payload, &mut buf)?;
        self.writer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .send(&buf)?;
        Ok(())
    }

    fn dispatch_loop(&self, run: &RunState) {
        debug!("dispatch loop running");
        loop {
            let payload = self.incoming.pop_blocking();
            if payload.is_empty() {
                if run.stopping.load(Ordering::SeqCst) {
                    break;
                }
                continue;
            }
            self.dispatch(payload);
            if run.retired.load(Ordering::SeqCst) {
                break;
            }
        }
        debug!("dispatch loop exited");
    }

    fn dispatch(&self, payload: Bytes) {
        let envelope = match Envelope::decode(payload) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!(error = %err, "dropping malformed message");
                return;
            }
        };
        trace!(kind = %envelope.kind, id = envelope.id, name = %envelope.name, "message received");

        match envelope.kind {
            MessageKind::Request => self.handle_request(envelope),
            MessageKind::Response | MessageKind::Error => {
                let id = envelope.id;
                let reply = Reply {
                    kind: envelope.kind,
                    payload: envelope.payload,
                };
                if !self.pending.complete(id, reply) {
                    debug!(id, name = %envelope.name, "dropping reply with no pending call");
                }
            }
            MessageKind::Stream => {
                let sink = self
                    .stream_sink
                    .read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .clone();
                match sink {
                    Some(sink) => sink(envelope.name.as_str(), &envelope.payload[..]),
                    None => info!(
                        name = %envelope.name,
                        len = envelope.payload.len(),
                        "stream message received"
                    ),
                }
            }
        }
    }

    fn handle_request(&self, request: Envelope) {
        let handler = self
            .registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&request.name)
            .cloned();

        let sent = match handler {
            Some(handler) => {
                let result = handler(&request.payload[..]);
                self.send(MessageKind::Response, request.id, &request.name, &result)
            }
            None => {
                warn!(name = %request.name, id = request.id, "request for unknown function");
                self.send(MessageKind::Error, request.id, &request.name, &[])
            }
        };
        if let Err(err) = sent {
            warn!(error = %err, id = request.id, "failed to send reply");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;
    use std::time::Instant;

    use serlink_frame::FrameReader;
    use serlink_transport::{MemoryPort, TransportError};

    use super::*;

    const WAIT: Duration = Duration::from_secs(5);

    fn open_pair() -> (MemoryPort, MemoryPort) {
        let (mut a, mut b) = MemoryPort::pair();
        a.open().unwrap();
        b.open().unwrap();
        (a, b)
    }

    fn started_engine() -> (RpcEngine<MemoryPort>, FrameReader<MemoryPort>) {
        let (port, peer) = open_pair();
        let engine = RpcEngine::new(port);
        engine.start().unwrap();
        (engine, FrameReader::new(peer))
    }

    fn wire(kind: MessageKind, id: u8, name: &str, payload: &[u8]) -> Bytes {
        Envelope::new(kind, id, name, payload.to_vec())
            .to_bytes()
            .unwrap()
    }

    fn next_envelope(peer: &mut FrameReader<MemoryPort>) -> Envelope {
        let payload = peer
            .read_frame(WAIT)
            .unwrap()
            .expect("frame should arrive");
        Envelope::decode(payload).unwrap()
    }

    fn byte_sum(args: &[u8]) -> Vec<u8> {
        vec![args.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))]
    }

    /// Answers `count` requests by echoing their payload back into `queue`.
    fn spawn_echo_responder(
        mut peer: FrameReader<MemoryPort>,
        queue: Arc<BlockingQueue<Bytes>>,
        count: usize,
    ) -> JoinHandle<()> {
        thread::spawn(move || {
            for _ in 0..count {
                let request = next_envelope(&mut peer);
                assert_eq!(request.kind, MessageKind::Request);
                queue.push(wire(
                    MessageKind::Response,
                    request.id,
                    &request.name,
                    &request.payload,
                ));
            }
        })
    }

    #[test]
    fn call_before_start_fails() {
        let (port, _peer) = open_pair();
        let engine = RpcEngine::new(port);
        let err = engine.call("sum", &[1, 2], WAIT).unwrap_err();
        assert!(matches!(err, RpcError::NotRunning));
        assert_eq!(engine.pending_count(), 0);
    }

    #[test]
    fn start_twice_fails() {
        let (engine, _peer) = started_engine();
        assert!(matches!(engine.start(), Err(RpcError::AlreadyRunning)));
    }

    #[test]
    fn stop_without_traffic_returns() {
        let (engine, _peer) = started_engine();
        assert!(engine.is_running());
        engine.stop();
        assert!(!engine.is_running());
        engine.stop();
    }

    #[test]
    fn restart_after_stop() {
        let (engine, mut peer) = started_engine();
        engine.stop();
        engine.register("sum", byte_sum);
        engine.start().unwrap();

        engine.incoming().push(wire(MessageKind::Request, 5, "sum", &[1, 2]));
        let reply = next_envelope(&mut peer);
        assert_eq!(reply.payload.as_ref(), &[3]);
    }

    #[test]
    fn stop_from_handler_then_restart_leaves_one_worker() {
        let (port, peer) = open_pair();
        let mut peer = FrameReader::new(peer);
        let engine = Arc::new(RpcEngine::new(port));

        let (stopped_tx, stopped_rx) = mpsc::channel();
        let (resume_tx, resume_rx) = mpsc::channel::<()>();
        let stopped_tx = Mutex::new(stopped_tx);
        let resume_rx = Mutex::new(resume_rx);
        let weak = Arc::downgrade(&engine);
        engine.register("halt", move |_: &[u8]| {
            if let Some(engine) = weak.upgrade() {
                engine.stop();
            }
            stopped_tx.lock().unwrap().send(()).unwrap();
            // Keep the old dispatch thread busy until the restart is done.
            let _ = resume_rx.lock().unwrap().recv_timeout(WAIT);
            Vec::new()
        });
        engine.register("sum", byte_sum);
        engine.start().unwrap();

        engine.incoming().push(wire(MessageKind::Request, 1, "halt", &[]));
        stopped_rx.recv_timeout(WAIT).expect("halt handler should run");
        assert!(!engine.is_running());
        engine.start().unwrap();
        resume_tx.send(()).unwrap();

        // The old thread still answers the request it was handling.
        assert_eq!(next_envelope(&mut peer).id, 1);

        // Then it exits: only the engine and the new worker hold `shared`.
        let deadline = Instant::now() + WAIT;
        while Arc::strong_count(&engine.shared) > 2 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(Arc::strong_count(&engine.shared), 2);

        engine.incoming().push(wire(MessageKind::Request, 2, "sum", &[1, 2]));
        let reply = next_envelope(&mut peer);
        assert_eq!(reply.id, 2);
        assert_eq!(reply.payload.as_ref(), &[3]);
    }

    #[test]
    fn request_runs_handler_and_replies() {
        let (engine, mut peer) = started_engine();
        engine.register("sum", byte_sum);

        engine.incoming().push(wire(MessageKind::Request, 1, "sum", &[3, 4]));

        let reply = next_envelope(&mut peer);
        assert_eq!(reply.kind, MessageKind::Response);
        assert_eq!(reply.id, 1);
        assert_eq!(reply.name, "sum");
        assert_eq!(reply.payload.as_ref(), &[7]);
    }

    #[test]
    fn unknown_function_replies_with_error() {
        let (engine, mut peer) = started_engine();

        engine.incoming().push(wire(MessageKind::Request, 42, "nope", &[1]));

        let reply = next_envelope(&mut peer);
        assert_eq!(reply.kind, MessageKind::Error);
        assert_eq!(reply.id, 42);
        assert_eq!(reply.name, "nope");
        assert!(reply.payload.is_empty());
    }

    #[test]
    fn handlers_can_change_while_running() {
        let (engine, mut peer) = started_engine();
        engine.register("late", |_: &[u8]| b"here".to_vec());
        assert!(engine.is_registered("late"));

        engine.incoming().push(wire(MessageKind::Request, 1, "late", &[]));
        assert_eq!(next_envelope(&mut peer).kind, MessageKind::Response);

        assert!(engine.unregister("late"));
        assert!(!engine.unregister("late"));
        engine.incoming().push(wire(MessageKind::Request, 2, "late", &[]));
        assert_eq!(next_envelope(&mut peer).kind, MessageKind::Error);
    }

    #[test]
    fn malformed_messages_are_skipped() {
        let (engine, mut peer) = started_engine();
        engine.register("sum", byte_sum);

        let incoming = engine.incoming();
        incoming.push(Bytes::from_static(&[0x0B]));
        incoming.push(Bytes::from_static(&[0x99, 0x01, b'a', 0x00]));
        incoming.push(Bytes::from_static(&[0x0B, 0x01, b's', b'u', b'm']));
        incoming.push(wire(MessageKind::Request, 9, "sum", &[10, 20]));

        let reply = next_envelope(&mut peer);
        assert_eq!(reply.id, 9);
        assert_eq!(reply.payload.as_ref(), &[30]);
    }

    #[test]
    fn call_receives_matching_response() {
        let (engine, peer) = started_engine();
        let responder = spawn_echo_responder(peer, engine.incoming(), 1);

        let result = engine.call("echo", b"ping", WAIT).unwrap();
        assert_eq!(result.as_ref(), b"ping");
        assert_eq!(engine.pending_count(), 0);
        responder.join().expect("responder should finish");
    }

    #[test]
    fn concurrent_calls_get_their_own_replies() {
        const CALLS: usize = 32;
        let (engine, peer) = started_engine();
        let responder = spawn_echo_responder(peer, engine.incoming(), CALLS);

        thread::scope(|scope| {
            for i in 0..CALLS {
                let engine = &engine;
                scope.spawn(move || {
                    let args = format!("call-{i}");
                    let result = engine.call("echo", args.as_bytes(), WAIT).unwrap();
                    assert_eq!(result.as_ref(), args.as_bytes());
                });
            }
        });

        responder.join().expect("responder should finish");
        assert_eq!(engine.pending_count(), 0);
    }

    #[test]
    fn timeout_removes_pending_entry() {
        let (engine, mut peer) = started_engine();
        let timeout = Duration::from_millis(50);

        let started = Instant::now();
        let err = engine.call("slow", &[], timeout).unwrap_err();
        assert!(started.elapsed() >= timeout);
        assert!(matches!(err, RpcError::Timeout { ref name, id: 1, .. } if name == "slow"));
        assert_eq!(engine.pending_count(), 0);

        // The request did go out.
        assert_eq!(next_envelope(&mut peer).id, 1);
    }

    #[test]
    fn late_reply_is_dropped() {
        let (engine, mut peer) = started_engine();
        engine.register("sum", byte_sum);

        let err = engine.call("slow", &[], Duration::from_millis(20)).unwrap_err();
        assert!(matches!(err, RpcError::Timeout { id: 1, .. }));
        let _ = next_envelope(&mut peer);

        let incoming = engine.incoming();
        incoming.push(wire(MessageKind::Response, 1, "slow", b"too late"));
        incoming.push(wire(MessageKind::Request, 2, "sum", &[1, 1]));

        let reply = next_envelope(&mut peer);
        assert_eq!(reply.id, 2);
        assert_eq!(reply.payload.as_ref(), &[2]);
        assert_eq!(engine.pending_count(), 0);
    }

    #[test]
    fn error_reply_surfaces_as_remote_error() {
        let (engine, mut peer) = started_engine();
        let incoming = engine.incoming();
        let responder = thread::spawn(move || {
            let request = next_envelope(&mut peer);
            incoming.push(wire(MessageKind::Error, request.id, &request.name, &[]));
        });

        let err = engine.call("missing", &[], WAIT).unwrap_err();
        assert!(matches!(err, RpcError::Remote { ref name, .. } if name == "missing"));
        responder.join().expect("responder should finish");
    }

    #[test]
    fn write_failure_fails_call_fast() {
        let (port, _peer) = MemoryPort::pair();
        let engine = RpcEngine::new(port);
        engine.start().unwrap();

        let err = engine.call("sum", &[1], WAIT).unwrap_err();
        assert!(matches!(
            err,
            RpcError::Frame(serlink_frame::FrameError::Transport(TransportError::NotOpen))
        ));
        assert_eq!(engine.pending_count(), 0);
    }

    #[test]
    fn invalid_name_is_rejected_before_sending() {
        let (engine, _peer) = started_engine();
        let err = engine.call("bad\0name", &[], WAIT).unwrap_err();
        assert!(matches!(err, RpcError::Message(_)));
        assert_eq!(engine.pending_count(), 0);
    }

    #[test]
    fn stream_messages_reach_sink() {
        let (engine, _peer) = started_engine();
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        engine.on_stream(move |name, payload| {
            let _ = tx
                .lock()
                .unwrap()
                .send((name.to_string(), payload.to_vec()));
        });

        engine.incoming().push(wire(MessageKind::Stream, 0, "temp", &[21]));

        let (name, payload) = rx.recv_timeout(WAIT).expect("stream should be delivered");
        assert_eq!(name, "temp");
        assert_eq!(payload, vec![21]);
    }

    #[test]
    fn notify_sends_stream_message() {
        let (engine, mut peer) = started_engine();
        engine.notify("temp", &[1, 2]).unwrap();

        let message = next_envelope(&mut peer);
        assert_eq!(message.kind, MessageKind::Stream);
        assert_eq!(message.id, 0);
        assert_eq!(message.name, "temp");
        assert_eq!(message.payload.as_ref(), &[1, 2]);
    }

    #[test]
    fn drop_stops_dispatch_thread() {
        let (engine, _peer) = started_engine();
        let incoming = engine.incoming();
        drop(engine);
        // Only the queue's own handle remains once the worker has exited.
        assert_eq!(Arc::strong_count(&incoming), 1);
    }

    #[test]
    fn default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.call_timeout, Duration::from_millis(1000));
        assert_eq!(config.dispatch_thread_name, "serlink-dispatch");
    }
}
