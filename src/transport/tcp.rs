//! TCP transport for raw network printers

use crate::transport::traits::{TransportConnector, TransportStream};
use anyhow::{Context, Result};
use async_trait::async_trait;
use printer_link_shared::Endpoint;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::debug;

#[async_trait]
impl TransportStream for TcpStream {
    async fn shutdown(&mut self) -> Result<()> {
        AsyncWriteExt::shutdown(self).await?;
        Ok(())
    }
}

/// TCP connector; one fresh socket per connect
#[derive(Debug, Clone)]
pub struct TcpConnector {
    nodelay: bool,
}

impl TcpConnector {
    pub fn new() -> Self {
        Self { nodelay: true }
    }

    /// Leave Nagle's algorithm enabled on new sockets
    pub fn with_nagle(mut self) -> Self {
        self.nodelay = false;
        self
    }
}

impl Default for TcpConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TransportConnector for TcpConnector {
    type Stream = TcpStream;

    async fn connect(&self, endpoint: &Endpoint) -> Result<Self::Stream> {
        let stream = TcpStream::connect((endpoint.host.as_str(), endpoint.port))
            .await
            .with_context(|| format!("tcp connect to {endpoint}"))?;
        stream.set_nodelay(self.nodelay)?;
        debug!("[TCP] Connected to {} ({:?})", endpoint, stream.peer_addr().ok());
        Ok(stream)
    }

    fn name(&self) -> &'static str {
        "TCP"
    }
}
