//! Connection management for a persistent byte-stream link
//!
//! This module handles:
//! - Opening the transport and reconnecting with backoff
//! - Killing the link once the reconnect budget is spent
//! - Keepalive probing while connected
//! - Routing inbound bytes to the current read handler
//! - Connect/disconnect notifications

mod config;
mod events;
mod manager;

pub use config::{ConnectionConfig, KeepAlive};
pub use events::{
    EventHandler, LinkEvent, LoggingHandler, RetrySchedule, SubscriptionId, TransportInfo,
};
pub use manager::ConnectionManager;
