//! Error taxonomy shared by the connection manager and its transports

use std::io;
use thiserror::Error;

/// Errors surfaced by a persistent link
///
/// Every variant is cheap to clone so the same error can be handed to
/// the caller of an operation and to the registered event handler.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LinkError {
    #[error("connect to {endpoint} failed: {reason}")]
    ConnectFailure { endpoint: String, reason: String },

    #[error("not connected")]
    NotConnected,

    #[error("connection manager was killed; construct a new one to reconnect")]
    AlreadyKilled,

    #[error("connection is already open")]
    AlreadyOpen,

    #[error("connection manager is closed")]
    Closed,

    #[error("gave up after {attempts} reconnect attempts")]
    ReconnectExhausted { attempts: u32 },

    #[error("transport error ({kind:?}): {message}")]
    Transport { kind: io::ErrorKind, message: String },

    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),
}

impl From<io::Error> for LinkError {
    fn from(err: io::Error) -> Self {
        LinkError::Transport {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_conversion_keeps_kind() {
        let err: LinkError = io::Error::new(io::ErrorKind::BrokenPipe, "pipe gone").into();
        assert_eq!(
            err,
            LinkError::Transport {
                kind: io::ErrorKind::BrokenPipe,
                message: "pipe gone".into(),
            }
        );
    }

    #[test]
    fn test_display_messages() {
        let err = LinkError::ConnectFailure {
            endpoint: "10.0.0.5:9100".into(),
            reason: "connection refused".into(),
        };
        assert_eq!(err.to_string(), "connect to 10.0.0.5:9100 failed: connection refused");
        assert_eq!(
            LinkError::ReconnectExhausted { attempts: 3 }.to_string(),
            "gave up after 3 reconnect attempts"
        );
    }
}
