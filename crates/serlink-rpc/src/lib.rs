//! Request/response RPC over framed serial links.
//!
//! Messages are small envelopes (`kind | id | name NUL | payload`) carried in
//! CRC-guarded frames. An [`RpcEngine`] matches replies to in-flight calls by
//! id, runs registered handlers for incoming requests and enforces per-call
//! timeouts. A [`Pump`] thread feeds it from the read side; [`Endpoint`]
//! wires both to a transport.
//!
//! ```no_run
//! use std::time::Duration;
//! use serlink_rpc::Endpoint;
//! use serlink_transport::MemoryPort;
//!
//! let (a, b) = MemoryPort::pair();
//! let client = Endpoint::open(a)?;
//! let server = Endpoint::open(b)?;
//! server.register("sum", |args: &[u8]| vec![args.iter().copied().fold(0u8, u8::wrapping_add)]);
//!
//! let reply = client.call("sum", &[3, 4], Duration::from_secs(1))?;
//! assert_eq!(reply.as_ref(), &[7]);
//! # Ok::<(), serlink_rpc::RpcError>(())
//! ```

pub mod endpoint;
pub mod engine;
pub mod error;
pub mod message;
pub mod pending;
pub mod pump;
pub mod queue;

pub use endpoint::{Endpoint, EndpointConfig};
pub use engine::{EngineConfig, Handler, RpcEngine, StreamSink, DEFAULT_CALL_TIMEOUT};
pub use error::{MessageError, Result, RpcError};
pub use message::{encode_message, Envelope, MessageKind, MIN_MESSAGE_LEN};
pub use pending::{PendingRequest, PendingTable, Reply, ID_SPACE};
pub use pump::Pump;
pub use queue::BlockingQueue;
