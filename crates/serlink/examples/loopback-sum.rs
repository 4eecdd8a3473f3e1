//! Two endpoints over an in-memory link, one serving `sum`, one calling it.
//!
//! Run with:
//!   cargo run --example loopback-sum
//!
//! Against real hardware, swap the `MemoryPort` pair for
//! `serlink::transport::SerialPort` instances on each device.

use std::time::Duration;

use serlink::rpc::{Endpoint, RpcError};
use serlink::transport::{ByteTransport, MemoryPort};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let (a, b) = MemoryPort::pair();
    let noise = a.try_clone()?;
    let client = Endpoint::open(a)?;
    let server = Endpoint::open(b)?;

    server.register("sum", |args: &[u8]| match args {
        [a, b, ..] => vec![a.wrapping_add(*b)],
        _ => vec![0],
    });

    // Garbage on the line is skipped by the frame decoder.
    noise.inject(&[0x13, 0x37, 0x00, 0xFE]);

    let reply = client.call("sum", &[3, 4], Duration::from_secs(1))?;
    eprintln!("sum(3, 4) = {:?}", reply.as_ref());

    match client.call("missing", &[], Duration::from_secs(1)) {
        Err(RpcError::Remote { name, .. }) => eprintln!("{name}: not registered on the server"),
        other => eprintln!("unexpected: {other:?}"),
    }

    let stats = client.shutdown();
    eprintln!(
        "client link: {} frames, {} bytes discarded",
        stats.frames, stats.discarded_bytes
    );
    server.shutdown();
    Ok(())
}
