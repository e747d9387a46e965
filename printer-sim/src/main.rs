//! Raw-port printer simulator
//!
//! Accepts TCP connections the way a port-9100 printer does and logs every
//! chunk it receives. Can drop each connection after a fixed time to
//! exercise client reconnects.

use anyhow::Result;
use clap::Parser;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Clone)]
#[command(name = "printer-sim")]
#[command(about = "Listen like a raw network printer and log received bytes", long_about = None)]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value_t = 9100)]
    port: u16,

    /// Close each connection after this many seconds
    #[arg(long)]
    drop_after_secs: Option<u64>,

    /// Bytes sent to every client right after it connects
    #[arg(long)]
    greeting: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let args = Args::parse();
    let listener = TcpListener::bind(("0.0.0.0", args.port)).await?;
    info!("Printer simulator listening on :{}", args.port);

    loop {
        let (socket, addr) = listener.accept().await?;
        info!("Connection from: {}", addr);

        let args = args.clone();
        tokio::spawn(async move {
            let session = serve(socket, addr, args.greeting.as_deref());
            match args.drop_after_secs {
                Some(secs) => {
                    if tokio::time::timeout(Duration::from_secs(secs), session).await.is_err() {
                        info!("Dropping {} after {}s", addr, secs);
                    }
                }
                None => session.await,
            }
        });
    }
}

async fn serve(mut socket: TcpStream, addr: SocketAddr, greeting: Option<&str>) {
    if let Some(greeting) = greeting {
        if let Err(e) = socket.write_all(greeting.as_bytes()).await {
            warn!("Greeting to {} failed: {}", addr, e);
            return;
        }
    }

    let mut buf = vec![0u8; 4096];
    let mut total = 0usize;
    loop {
        match socket.read(&mut buf).await {
            Ok(0) => {
                info!("Client disconnected: {} ({} bytes total)", addr, total);
                break;
            }
            Ok(n) => {
                total += n;
                info!("[{}] {} bytes: {}", addr, n, describe(&buf[..n]));
            }
            Err(e) => {
                warn!("Read error from {}: {}", addr, e);
                break;
            }
        }
    }
}

/// Hex dump of the first bytes plus a printable preview
fn describe(chunk: &[u8]) -> String {
    const PREVIEW: usize = 32;
    let shown = &chunk[..chunk.len().min(PREVIEW)];
    let hex: Vec<String> = shown.iter().map(|b| format!("{:02x}", b)).collect();
    let text: String = shown
        .iter()
        .map(|&b| if b.is_ascii_graphic() || b == b' ' { b as char } else { '.' })
        .collect();
    let more = if chunk.len() > PREVIEW { " ..." } else { "" };
    format!("{}{} |{}|", hex.join(" "), more, text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_truncates_long_chunks() {
        let chunk = [b'A'; 40];
        let out = describe(&chunk);
        assert!(out.contains(" ..."));
        assert!(out.ends_with(&format!("|{}|", "A".repeat(32))));
    }

    #[test]
    fn test_describe_masks_control_bytes() {
        assert_eq!(describe(b"\x1b@hi"), "1b 40 68 69 |.@hi|");
    }

    #[tokio::test]
    async fn test_serve_sends_greeting_and_drains() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (socket, peer) = listener.accept().await.unwrap();
            serve(socket, peer, Some("READY")).await;
        });

        let mut client = TcpStream::connect(addr).await.unwrap();
        let mut greeting = [0u8; 5];
        client.read_exact(&mut greeting).await.unwrap();
        assert_eq!(&greeting, b"READY");
        client.write_all(b"^XA^XZ").await.unwrap();
        drop(client);

        server.await.unwrap();
    }
}
