//! Transport trait abstraction for pluggable byte-stream backends

use anyhow::Result;
use async_trait::async_trait;
use printer_link_shared::Endpoint;
use tokio::io::{AsyncRead, AsyncWrite};

/// A duplex byte stream the connection manager can own
#[async_trait]
pub trait TransportStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {
    /// Close the transport gracefully
    async fn shutdown(&mut self) -> Result<()>;
}

/// Factory for creating transport connections
#[async_trait]
pub trait TransportConnector: Send + Sync + 'static {
    /// The stream type this connector produces
    type Stream: TransportStream;

    /// Attempt to connect to `endpoint`, returning a stream on success
    async fn connect(&self, endpoint: &Endpoint) -> Result<Self::Stream>;

    /// Human-readable name for this transport
    fn name(&self) -> &'static str;
}
