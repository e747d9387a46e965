//! printer-link shared types
//!
//! This crate holds the runtime-free half of printer-link: the endpoint
//! type, the error taxonomy, reconnect policy and the link state machine.
//! Everything here is synchronous so it can be tested without a runtime.

pub mod error;
pub mod policy;
pub mod state_machine;

use std::fmt;
use std::str::FromStr;

pub use error::LinkError;
pub use policy::{Backoff, ErrorPolicy, ReconnectPolicy};
pub use state_machine::{LinkState, LinkStateMachine, LinkStatus, LinkTrigger, TransitionResult};

/// Default values for link configuration
pub mod defaults {
    /// Raw printing port (AppSocket / JetDirect)
    pub const PRINTER_PORT: u16 = 9100;

    /// Interval between keepalive probes
    pub const KEEPALIVE_INTERVAL_MS: u64 = 30_000;

    /// Delay used by the unlimited fixed-delay reconnect policy
    pub const RECONNECT_DELAY_MS: u64 = 2_000;

    /// First delay of the exponential backoff
    pub const BACKOFF_INITIAL_MS: u64 = 1_000;

    /// Ceiling for any computed backoff delay
    pub const BACKOFF_MAX_MS: u64 = 30_000;

    /// Reconnect attempts before the capped policy gives up
    pub const MAX_RECONNECT_ATTEMPTS: u32 = 5;

    /// Time allowed for a single connect attempt
    pub const CONNECT_TIMEOUT_MS: u64 = 5_000;

    /// Size of the buffer used for each transport read
    pub const READ_BUFFER_SIZE: usize = 4096;
}

/// Remote address of a persistent link
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    fn checked(host: &str, port: u16, input: &str) -> Result<Self, LinkError> {
        if host.is_empty() {
            return Err(LinkError::InvalidEndpoint(format!("missing host in {input:?}")));
        }
        Ok(Self::new(host, port))
    }
}

fn parse_port(port: &str, input: &str) -> Result<u16, LinkError> {
    match port.parse::<u16>() {
        Ok(0) | Err(_) => Err(LinkError::InvalidEndpoint(format!(
            "bad port {port:?} in {input:?}"
        ))),
        Ok(port) => Ok(port),
    }
}

impl FromStr for Endpoint {
    type Err = LinkError;

    /// Parse `host`, `host:port`, `[v6]` or `[v6]:port`; the port defaults to 9100
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let input = s.trim();

        if let Some(rest) = input.strip_prefix('[') {
            let (host, after) = rest.split_once(']').ok_or_else(|| {
                LinkError::InvalidEndpoint(format!("unterminated '[' in {input:?}"))
            })?;
            let port = match after {
                "" => defaults::PRINTER_PORT,
                _ => match after.strip_prefix(':') {
                    Some(port) => parse_port(port, input)?,
                    None => {
                        return Err(LinkError::InvalidEndpoint(format!(
                            "unexpected {after:?} after address in {input:?}"
                        )))
                    }
                },
            };
            return Self::checked(host, port, input);
        }

        match input.rsplit_once(':') {
            Some((host, port)) if !host.contains(':') => {
                Self::checked(host, parse_port(port, input)?, input)
            }
            // Unbracketed IPv6 literal: the whole input is the host
            _ => Self::checked(input, defaults::PRINTER_PORT, input),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}
