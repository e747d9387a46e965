//! In-process transport over tokio duplex pipes
//!
//! Each dial consumes one step of a script, so tests can stage refusals,
//! slow connects, broken connections and clean ones in a fixed order. The far end of
//! every accepted connection is handed out through [`MemoryPeers`].

use crate::transport::traits::{TransportConnector, TransportStream};
use anyhow::{bail, Result};
use async_trait::async_trait;
use printer_link_shared::Endpoint;
use std::collections::VecDeque;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, DuplexStream, ReadBuf};
use tokio::sync::{mpsc, Mutex};
use tokio::time::Instant;

const DEFAULT_PIPE_BUFFER: usize = 64 * 1024;

/// Outcome of one scripted dial
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dial {
    /// Connect immediately
    Accept,
    /// Fail with the given reason
    Refuse(String),
    /// Connect after the given delay
    Delay(Duration),
    /// Connect immediately, then fail on every read or write
    Faulty(Fault),
}

/// Error injected into an accepted connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    Read(io::ErrorKind),
    Write(io::ErrorKind),
}

/// Local end of a memory connection
#[derive(Debug)]
pub struct MemoryStream {
    inner: DuplexStream,
    fault: Option<Fault>,
}

fn injected(kind: io::ErrorKind) -> io::Error {
    io::Error::new(kind, "injected fault")
}

impl AsyncRead for MemoryStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if let Some(Fault::Read(kind)) = self.fault {
            return Poll::Ready(Err(injected(kind)));
        }
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for MemoryStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        if let Some(Fault::Write(kind)) = self.fault {
            return Poll::Ready(Err(injected(kind)));
        }
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

#[async_trait]
impl TransportStream for MemoryStream {
    async fn shutdown(&mut self) -> Result<()> {
        AsyncWriteExt::shutdown(&mut self.inner).await?;
        Ok(())
    }
}

/// Remote halves of accepted memory connections
pub struct MemoryPeers {
    rx: mpsc::UnboundedReceiver<DuplexStream>,
}

impl MemoryPeers {
    /// Wait for the next accepted connection
    pub async fn next(&mut self) -> Option<DuplexStream> {
        self.rx.recv().await
    }
}

struct Inner {
    script: Mutex<VecDeque<Dial>>,
    dials: Mutex<Vec<Instant>>,
    peers: mpsc::UnboundedSender<DuplexStream>,
    buffer: usize,
}

/// Scripted connector; clones share the same script
#[derive(Clone)]
pub struct MemoryConnector {
    inner: Arc<Inner>,
}

impl MemoryConnector {
    pub fn new() -> (Self, MemoryPeers) {
        Self::with_buffer(DEFAULT_PIPE_BUFFER)
    }

    /// Use `buffer` bytes of capacity for each pipe direction
    pub fn with_buffer(buffer: usize) -> (Self, MemoryPeers) {
        let (peers, rx) = mpsc::unbounded_channel();
        let connector = Self {
            inner: Arc::new(Inner {
                script: Mutex::new(VecDeque::new()),
                dials: Mutex::new(Vec::new()),
                peers,
                buffer,
            }),
        };
        (connector, MemoryPeers { rx })
    }

    /// Append a step; an empty script refuses every dial
    pub async fn push(&self, dial: Dial) {
        self.inner.script.lock().await.push_back(dial);
    }

    pub async fn extend(&self, dials: impl IntoIterator<Item = Dial>) {
        self.inner.script.lock().await.extend(dials);
    }

    /// Number of dials made so far
    pub async fn dial_count(&self) -> usize {
        self.inner.dials.lock().await.len()
    }

    /// When each dial started
    pub async fn dial_times(&self) -> Vec<Instant> {
        self.inner.dials.lock().await.clone()
    }

    fn pipe(&self, fault: Option<Fault>) -> MemoryStream {
        let (local, remote) = tokio::io::duplex(self.inner.buffer);
        // A dropped receiver just means nobody is playing the remote side;
        // the local half then sees EOF.
        let _ = self.inner.peers.send(remote);
        MemoryStream {
            inner: local,
            fault,
        }
    }
}

#[async_trait]
impl TransportConnector for MemoryConnector {
    type Stream = MemoryStream;

    async fn connect(&self, endpoint: &Endpoint) -> Result<Self::Stream> {
        self.inner.dials.lock().await.push(Instant::now());
        let step = self.inner.script.lock().await.pop_front();

        match step {
            Some(Dial::Accept) => Ok(self.pipe(None)),
            Some(Dial::Delay(delay)) => {
                tokio::time::sleep(delay).await;
                Ok(self.pipe(None))
            }
            Some(Dial::Faulty(fault)) => Ok(self.pipe(Some(fault))),
            Some(Dial::Refuse(reason)) => bail!("{endpoint}: {reason}"),
            None => bail!("{endpoint}: connection refused"),
        }
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    fn endpoint() -> Endpoint {
        Endpoint::new("printer.test", 9100)
    }

    #[tokio::test]
    async fn test_empty_script_refuses() {
        let (connector, _peers) = MemoryConnector::new();
        assert!(connector.connect(&endpoint()).await.is_err());
        assert_eq!(connector.dial_count().await, 1);
    }

    #[tokio::test]
    async fn test_script_order() {
        let (connector, mut peers) = MemoryConnector::new();
        connector
            .extend([Dial::Refuse("busy".into()), Dial::Accept])
            .await;

        let err = connector.connect(&endpoint()).await.unwrap_err();
        assert!(err.to_string().contains("busy"));

        let mut local = connector.connect(&endpoint()).await.unwrap();
        let mut remote = peers.next().await.unwrap();
        local.write_all(b"ping").await.unwrap();

        let mut buf = [0u8; 4];
        remote.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");
    }

    #[tokio::test(start_paused = true)]
    async fn test_delayed_dial() {
        let (connector, _peers) = MemoryConnector::new();
        connector.push(Dial::Delay(Duration::from_secs(3))).await;

        let start = Instant::now();
        connector.connect(&endpoint()).await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(3));
        assert_eq!(connector.dial_times().await, vec![start]);
    }

    #[tokio::test]
    async fn test_faulty_dial_fails_only_the_chosen_direction() {
        let (connector, mut peers) = MemoryConnector::new();
        connector
            .push(Dial::Faulty(Fault::Write(io::ErrorKind::BrokenPipe)))
            .await;

        let mut local = connector.connect(&endpoint()).await.unwrap();
        let mut remote = peers.next().await.unwrap();
        let err = local.write_all(b"job").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);

        remote.write_all(b"ok").await.unwrap();
        let mut buf = [0u8; 2];
        local.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ok");
    }
}
