//! printer-link
//!
//! A persistent TCP link for raw network printers: open once, write bytes
//! whenever connected, and let the manager reconnect with backoff when the
//! printer drops the socket.

pub mod connection;
pub mod transport;

pub use connection::{
    ConnectionConfig, ConnectionManager, EventHandler, KeepAlive, LinkEvent, LoggingHandler,
    RetrySchedule, SubscriptionId, TransportInfo,
};
pub use printer_link_shared::{
    defaults, Backoff, Endpoint, ErrorPolicy, LinkError, LinkState, LinkStatus, ReconnectPolicy,
};
