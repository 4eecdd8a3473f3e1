use std::time::Duration;

use bytes::Bytes;
use serlink_frame::{DecodeStats, FrameConfig, FrameReader, FrameWriter};
use serlink_transport::ByteTransport;
use tracing::info;

use crate::engine::{EngineConfig, RpcEngine};
use crate::error::Result;
use crate::pump::Pump;

/// Configuration for an [`Endpoint`].
#[derive(Debug, Clone, Default)]
pub struct EndpointConfig {
    pub engine: EngineConfig,
    /// Applies to both the reading and the writing half.
    pub frame: FrameConfig,
}

/// One side of an RPC link: an open transport, its [`RpcEngine`] and the
/// [`Pump`] feeding it.
///
/// The transport is cloned once: the pump thread reads from the clone and
/// the engine writes to the handle passed in.
pub struct Endpoint<T: ByteTransport + 'static> {
    engine: RpcEngine<T>,
    pump: Pump<T>,
    stats: Option<DecodeStats>,
}

impl<T: ByteTransport + 'static> Endpoint<T> {
    /// Open `transport` and start serving with default configuration.
    pub fn open(transport: T) -> Result<Self> {
        Self::open_with_config(transport, EndpointConfig::default())
    }

    pub fn open_with_config(mut transport: T, config: EndpointConfig) -> Result<Self> {
        transport.open()?;
        let read_half = transport.try_clone()?;
        let name = transport.transport_name();

        let engine = RpcEngine::from_writer(
            FrameWriter::with_config(transport, config.frame.clone()),
            config.engine,
        );
        engine.start()?;
        let pump = Pump::spawn(
            FrameReader::with_config(read_half, config.frame),
            engine.incoming(),
        )?;

        info!(transport = name, "endpoint open");
        Ok(Self {
            engine,
            pump,
            stats: None,
        })
    }

    pub fn engine(&self) -> &RpcEngine<T> {
        &self.engine
    }

    /// Shorthand for [`RpcEngine::register`].
    pub fn register<F>(&self, name: impl Into<String>, handler: F)
    where
        F: Fn(&[u8]) -> Vec<u8> + Send + Sync + 'static,
    {
        self.engine.register(name, handler);
    }

    /// Shorthand for [`RpcEngine::call`].
    pub fn call(&self, name: &str, args: &[u8], timeout: Duration) -> Result<Bytes> {
        self.engine.call(name, args, timeout)
    }

    /// Stop the pump and engine, close the transport and return the final
    /// decode counters for the read side.
    pub fn shutdown(mut self) -> DecodeStats {
        self.close();
        self.stats.take().unwrap_or_default()
    }

    fn close(&mut self) {
        if let Some(mut reader) = self.pump.stop() {
            self.stats = Some(reader.stats().clone());
            reader.get_mut().close();
        }
        if self.engine.is_running() {
            self.engine.stop();
            self.engine.close_transport();
            info!("endpoint closed");
        }
    }
}

impl<T: ByteTransport + 'static> Drop for Endpoint<T> {
    fn drop(&mut self) {
        self.close();
    }
}
