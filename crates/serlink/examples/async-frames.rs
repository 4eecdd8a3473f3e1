//! Frames over an async byte stream using the `tokio_util` codec.
//!
//! Run with:
//!   cargo run --example async-frames --features async

use futures_util::{SinkExt, StreamExt};
use serlink::frame::LinkCodec;
use tokio_util::codec::{FramedRead, FramedWrite};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let (near, far) = tokio::io::duplex(4096);

    let writer = tokio::spawn(async move {
        let mut sink = FramedWrite::new(near, LinkCodec::new());
        for word in ["alpha", "beta", "gamma"] {
            sink.send(word.as_bytes()).await?;
        }
        Ok::<_, serlink::frame::FrameError>(())
    });

    let mut frames = FramedRead::new(far, LinkCodec::new());
    while let Some(payload) = frames.next().await {
        eprintln!("received {:?}", String::from_utf8_lossy(&payload?));
    }

    writer.await??;
    eprintln!("decoder stats: {:?}", frames.decoder().stats());
    Ok(())
}
