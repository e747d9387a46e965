//! printer-link command-line sender
//!
//! Connects to a raw network printer, optionally sends a file or stdin,
//! and optionally stays connected logging whatever the printer sends back.

use anyhow::{anyhow, Context, Result};
use bytes::Bytes;
use clap::{Parser, ValueEnum};
use printer_link::{
    defaults, Backoff, ConnectionConfig, ConnectionManager, Endpoint, ErrorPolicy, KeepAlive,
    LinkState, LoggingHandler, ReconnectPolicy,
};
use std::io::Read;
use std::time::Duration;
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "printer-link")]
#[command(about = "Send raw bytes to a network printer over a self-healing TCP link", long_about = None)]
struct Cli {
    /// Printer address: host, host:port or [v6]:port (port defaults to 9100)
    #[arg(env = "PRINTER_HOST")]
    endpoint: Endpoint,

    /// File to send ("-" for stdin); nothing is sent when omitted
    file: Option<String>,

    /// Reconnect attempts before giving up (0 = retry forever)
    #[arg(long, default_value_t = defaults::MAX_RECONNECT_ATTEMPTS)]
    max_attempts: u32,

    /// Delay shape between reconnect attempts
    #[arg(long, value_enum, default_value_t = BackoffKind::Exponential)]
    backoff: BackoffKind,

    /// Base reconnect delay in milliseconds
    #[arg(long, default_value_t = defaults::BACKOFF_INITIAL_MS)]
    retry_delay_ms: u64,

    /// Upper bound for the reconnect delay in milliseconds
    #[arg(long, default_value_t = defaults::BACKOFF_MAX_MS)]
    max_retry_delay_ms: u64,

    /// Treat any transport error as fatal instead of retrying
    #[arg(long)]
    fatal_errors: bool,

    /// Seconds between keepalive probes (0 disables)
    #[arg(long, default_value_t = defaults::KEEPALIVE_INTERVAL_MS / 1000)]
    keepalive_secs: u64,

    /// Timeout for each connect attempt in milliseconds
    #[arg(long, default_value_t = defaults::CONNECT_TIMEOUT_MS)]
    connect_timeout_ms: u64,

    /// Stay connected and log inbound bytes until Ctrl-C
    #[arg(short, long)]
    listen: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum BackoffKind {
    Fixed,
    Linear,
    Exponential,
}

impl Cli {
    fn connection_config(&self) -> ConnectionConfig {
        let base = Duration::from_millis(self.retry_delay_ms);
        let max = Duration::from_millis(self.max_retry_delay_ms);
        let backoff = match self.backoff {
            BackoffKind::Fixed => Backoff::Fixed(base),
            BackoffKind::Linear => Backoff::Linear { step: base, max },
            BackoffKind::Exponential => Backoff::Exponential { initial: base, max },
        };
        let on_error = if self.fatal_errors {
            ErrorPolicy::Fatal
        } else {
            ErrorPolicy::Retry
        };

        ConnectionConfig {
            endpoint: self.endpoint.clone(),
            reconnect: ReconnectPolicy {
                max_attempts: (self.max_attempts > 0).then_some(self.max_attempts),
                backoff,
                on_error,
            },
            keepalive: (self.keepalive_secs > 0).then(|| KeepAlive {
                interval: Duration::from_secs(self.keepalive_secs),
                ..Default::default()
            }),
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            ..Default::default()
        }
    }
}

fn load_payload(file: &str) -> Result<Bytes> {
    let mut buf = Vec::new();
    if file == "-" {
        std::io::stdin()
            .read_to_end(&mut buf)
            .context("Failed to read stdin")?;
    } else {
        buf = std::fs::read(file).with_context(|| format!("Failed to read {}", file))?;
    }
    Ok(Bytes::from(buf))
}

/// Render a chunk as hex plus a printable preview
fn describe(chunk: &[u8]) -> String {
    let hex: Vec<String> = chunk.iter().map(|b| format!("{:02x}", b)).collect();
    let text: String = chunk
        .iter()
        .map(|&b| if b.is_ascii_graphic() || b == b' ' { b as char } else { '.' })
        .collect();
    format!("{} |{}|", hex.join(" "), text)
}

/// Wait until the link is connected, or fail once it can never connect
async fn wait_connected(manager: &ConnectionManager) -> Result<()> {
    let mut status = manager.watch();
    let reached = status
        .wait_for(|s| s.state == LinkState::Connected || s.state.is_terminal())
        .await
        .map_err(|_| anyhow!("connection manager stopped"))?
        .state;
    match reached {
        LinkState::Connected => Ok(()),
        other => Err(anyhow!("link to {} ended in state {:?}", manager.endpoint(), other)),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    let payload = cli.file.as_deref().map(load_payload).transpose()?;
    let config = cli.connection_config();
    info!("Printer: {}", config.endpoint);
    debug!("Reconnect policy: {:?}", config.reconnect);

    let manager = ConnectionManager::new(config);
    if cli.listen {
        manager.read(|chunk| info!("printer says: {}", describe(&chunk)));
    }
    manager.open(LoggingHandler).await?;

    if let Some(payload) = payload {
        wait_connected(&manager).await?;
        manager
            .write(payload.clone())
            .await
            .with_context(|| format!("Failed to send {} bytes", payload.len()))?;
        info!("Sent {} bytes", payload.len());
    }

    if cli.listen {
        info!("Listening; press Ctrl-C to stop");
        tokio::signal::ctrl_c().await?;
    }

    if let Err(e) = manager.close().await {
        warn!("Close failed: {}", e);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_maps_to_config() {
        let cli = Cli::parse_from([
            "printer-link",
            "10.0.0.7",
            "--max-attempts",
            "0",
            "--backoff",
            "fixed",
            "--retry-delay-ms",
            "2000",
            "--keepalive-secs",
            "0",
        ]);
        let config = cli.connection_config();
        assert_eq!(config.endpoint, Endpoint::new("10.0.0.7", 9100));
        assert_eq!(config.reconnect, ReconnectPolicy::persistent(Duration::from_secs(2)));
        assert!(config.keepalive.is_none());
    }

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::parse_from(["printer-link", "printer.lan:9101", "-", "--fatal-errors"]);
        let config = cli.connection_config();
        assert_eq!(config.endpoint.port, 9101);
        assert_eq!(config.reconnect.max_attempts, Some(defaults::MAX_RECONNECT_ATTEMPTS));
        assert_eq!(config.reconnect.backoff, Backoff::default());
        assert_eq!(config.reconnect.on_error, ErrorPolicy::Fatal);
        assert_eq!(config.keepalive.unwrap().interval, Duration::from_secs(30));
        assert_eq!(cli.file.as_deref(), Some("-"));
    }

    #[test]
    fn test_describe_chunk() {
        assert_eq!(describe(b"OK\x10"), "4f 4b 10 |OK.|");
    }
}
