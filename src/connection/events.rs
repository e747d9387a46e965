//! Notifications emitted by the connection manager

use bytes::Bytes;
use printer_link_shared::{Endpoint, LinkError};
use std::fmt;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// The transport a notification refers to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportInfo {
    /// Incremented on every dial; a reconnect always gets a new id
    pub id: u64,
    pub transport: &'static str,
    pub endpoint: Endpoint,
}

impl fmt::Display for TransportInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} socket-{} ({})", self.transport, self.id, self.endpoint)
    }
}

/// When the next reconnect will be attempted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetrySchedule {
    pub attempt: u32,
    pub delay: Duration,
}

/// Lifecycle callbacks for an open link
///
/// Callbacks run on the manager's task, so they must not block. Every
/// method has an empty default.
pub trait EventHandler: Send + Sync + 'static {
    /// A transport was established
    fn connected(&self, _transport: &TransportInfo) {}

    /// The transport was lost and a reconnect is scheduled
    fn closed(&self, _transport: &TransportInfo, _retry: RetrySchedule) {}

    /// The link gave up; it will not reconnect again
    fn killed(&self, _transport: &TransportInfo, _reason: &LinkError) {}

    /// A connect or transport error occurred
    fn error(&self, _transport: &TransportInfo, _error: &LinkError) {}
}

/// Handler notifications as a value, for consumers that prefer a channel
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    Connected {
        transport: TransportInfo,
    },
    Closed {
        transport: TransportInfo,
        retry: RetrySchedule,
    },
    Killed {
        transport: TransportInfo,
        reason: LinkError,
    },
    Error {
        transport: TransportInfo,
        error: LinkError,
    },
}

impl EventHandler for mpsc::UnboundedSender<LinkEvent> {
    fn connected(&self, transport: &TransportInfo) {
        let _ = self.send(LinkEvent::Connected {
            transport: transport.clone(),
        });
    }

    fn closed(&self, transport: &TransportInfo, retry: RetrySchedule) {
        let _ = self.send(LinkEvent::Closed {
            transport: transport.clone(),
            retry,
        });
    }

    fn killed(&self, transport: &TransportInfo, reason: &LinkError) {
        let _ = self.send(LinkEvent::Killed {
            transport: transport.clone(),
            reason: reason.clone(),
        });
    }

    fn error(&self, transport: &TransportInfo, error: &LinkError) {
        let _ = self.send(LinkEvent::Error {
            transport: transport.clone(),
            error: error.clone(),
        });
    }
}

/// Handler that reports every notification through `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingHandler;

impl EventHandler for LoggingHandler {
    fn connected(&self, transport: &TransportInfo) {
        info!("{} connected", transport);
    }

    fn closed(&self, transport: &TransportInfo, retry: RetrySchedule) {
        warn!(
            "{} has been closed, reconnect attempt {} in {:?}",
            transport, retry.attempt, retry.delay
        );
    }

    fn killed(&self, transport: &TransportInfo, reason: &LinkError) {
        error!("{} gave up: {}", transport, reason);
    }

    fn error(&self, transport: &TransportInfo, error: &LinkError) {
        warn!("{} error: {}", transport, error);
    }
}

/// Handle returned by the subscribe methods, used to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub(crate) u64);

pub(crate) type ConnectListener = Box<dyn Fn(&TransportInfo) + Send + Sync>;
pub(crate) type DisconnectListener = Box<dyn Fn() + Send + Sync>;
pub(crate) type DataHandler = Box<dyn Fn(Bytes) + Send + Sync>;

pub(crate) enum Subscription {
    Connect(ConnectListener),
    Disconnect(DisconnectListener),
    Data(DataHandler),
}

/// Listeners for the fixed `connect`, `disconnect` and `data` topics
///
/// `data` holds a single handler; subscribing again replaces it.
#[derive(Default)]
pub(crate) struct Subscriptions {
    connect: Vec<(SubscriptionId, ConnectListener)>,
    disconnect: Vec<(SubscriptionId, DisconnectListener)>,
    data: Option<(SubscriptionId, DataHandler)>,
}

impl Subscriptions {
    pub(crate) fn insert(&mut self, id: SubscriptionId, subscription: Subscription) {
        match subscription {
            Subscription::Connect(listener) => self.connect.push((id, listener)),
            Subscription::Disconnect(listener) => self.disconnect.push((id, listener)),
            Subscription::Data(handler) => self.data = Some((id, handler)),
        }
    }

    pub(crate) fn remove(&mut self, id: SubscriptionId) -> bool {
        if self.data.as_ref().is_some_and(|(current, _)| *current == id) {
            self.data = None;
            return true;
        }
        let before = self.connect.len() + self.disconnect.len();
        self.connect.retain(|(current, _)| *current != id);
        self.disconnect.retain(|(current, _)| *current != id);
        self.connect.len() + self.disconnect.len() != before
    }

    pub(crate) fn notify_connect(&self, transport: &TransportInfo) {
        for (_, listener) in &self.connect {
            listener(transport);
        }
    }

    pub(crate) fn notify_disconnect(&self) {
        for (_, listener) in &self.disconnect {
            listener();
        }
    }

    /// Hand a chunk to the data handler; false if none is registered
    pub(crate) fn deliver(&self, chunk: Bytes) -> bool {
        match &self.data {
            Some((_, handler)) => {
                handler(chunk);
                true
            }
            None => false,
        }
    }
}
