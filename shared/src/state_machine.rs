//! Link State Machine
//!
//! Decides what a persistent link does next. The connection manager feeds
//! it triggers (connect results, transport closes, timer expiry, caller
//! requests) and carries out the returned [`TransitionResult`].

use crate::{ErrorPolicy, LinkError, ReconnectPolicy};
use std::time::Duration;

/// Lifecycle state of a link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkState {
    /// No transport; a retry may be pending
    #[default]
    Disconnected,
    /// A connect attempt is in flight
    Connecting,
    /// Transport established
    Connected,
    /// `close()` is tearing the link down
    Closing,
    /// Closed by the caller (terminal)
    Closed,
    /// Gave up or hit a fatal error (terminal)
    Killed,
}

impl LinkState {
    pub fn is_terminal(self) -> bool {
        matches!(self, LinkState::Closed | LinkState::Killed)
    }
}

/// Point-in-time view of a link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LinkStatus {
    pub state: LinkState,
    pub reconnect_attempts: u32,
}

/// Inputs that can drive a transition
#[derive(Debug, Clone, PartialEq)]
pub enum LinkTrigger {
    /// Caller asked to open the link
    OpenRequested,
    /// The in-flight connect produced a transport
    ConnectSucceeded,
    /// The in-flight connect failed or timed out
    ConnectFailed(LinkError),
    /// Remote closed the transport cleanly
    TransportClosed,
    /// Read, write or keepalive failed on the transport
    TransportFailed(LinkError),
    /// The pending retry timer fired
    RetryDue,
    /// Caller asked to close the link
    CloseRequested,
}

/// What the caller must do after a trigger was processed
#[derive(Debug, Clone, PartialEq)]
pub enum TransitionResult {
    /// Dial a new transport
    StartConnect,
    /// Transport is up; cancel the retry timer and start keepalive
    Connected,
    /// Transport lost; wait `delay` then deliver [`LinkTrigger::RetryDue`]
    RetryScheduled {
        attempt: u32,
        delay: Duration,
        cause: Option<LinkError>,
    },
    /// Terminal: no further reconnects
    Killed {
        reason: LinkError,
        cause: Option<LinkError>,
    },
    /// Tear down everything, then call [`LinkStateMachine::finish_close`]
    Closing,
    /// Stale or duplicate trigger
    Ignored,
    /// Trigger not allowed in the current state
    Rejected(LinkError),
}

/// The reconnect state machine for one link
#[derive(Debug)]
pub struct LinkStateMachine {
    state: LinkState,
    reconnect_attempts: u32,
    retry_pending: bool,
    policy: ReconnectPolicy,
}

impl LinkStateMachine {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            state: LinkState::Disconnected,
            reconnect_attempts: 0,
            retry_pending: false,
            policy,
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts
    }

    pub fn retry_pending(&self) -> bool {
        self.retry_pending
    }

    pub fn status(&self) -> LinkStatus {
        LinkStatus {
            state: self.state,
            reconnect_attempts: self.reconnect_attempts,
        }
    }

    pub fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }

    /// Process a trigger and return the transition result
    pub fn process(&mut self, trigger: LinkTrigger) -> TransitionResult {
        use LinkState::*;
        use LinkTrigger::*;

        match (self.state, trigger) {
            (Killed, OpenRequested) => TransitionResult::Rejected(LinkError::AlreadyKilled),
            (Closing | Closed, OpenRequested) => TransitionResult::Rejected(LinkError::Closed),
            (Connecting | Connected, OpenRequested) => {
                TransitionResult::Rejected(LinkError::AlreadyOpen)
            }
            (Disconnected, OpenRequested) if self.retry_pending => {
                TransitionResult::Rejected(LinkError::AlreadyOpen)
            }
            (Disconnected, OpenRequested) => {
                self.state = Connecting;
                TransitionResult::StartConnect
            }

            (Disconnected, RetryDue) if self.retry_pending => {
                self.retry_pending = false;
                self.state = Connecting;
                TransitionResult::StartConnect
            }

            (Connecting, ConnectSucceeded) => {
                self.state = Connected;
                self.reconnect_attempts = 0;
                self.retry_pending = false;
                TransitionResult::Connected
            }

            (Connecting, ConnectFailed(err)) | (Connected, TransportFailed(err)) => {
                match self.policy.on_error {
                    ErrorPolicy::Fatal => self.kill(err.clone(), Some(err)),
                    ErrorPolicy::Retry => self.lose(Some(err)),
                }
            }

            (Connected, TransportClosed) => self.lose(None),

            (Closed, CloseRequested) | (Closing, CloseRequested) => TransitionResult::Ignored,
            (_, CloseRequested) => {
                self.state = Closing;
                self.retry_pending = false;
                TransitionResult::Closing
            }

            // Includes duplicate closes after a kill and connect results
            // that land after the link was torn down.
            _ => TransitionResult::Ignored,
        }
    }

    /// Complete a close started by [`LinkTrigger::CloseRequested`]
    pub fn finish_close(&mut self) {
        if self.state == LinkState::Closing {
            self.state = LinkState::Closed;
        }
    }

    fn lose(&mut self, cause: Option<LinkError>) -> TransitionResult {
        if self.policy.is_exhausted(self.reconnect_attempts) {
            let reason = LinkError::ReconnectExhausted {
                attempts: self.reconnect_attempts,
            };
            return self.kill(reason, cause);
        }

        self.reconnect_attempts = self.reconnect_attempts.saturating_add(1);
        self.retry_pending = true;
        self.state = LinkState::Disconnected;
        TransitionResult::RetryScheduled {
            attempt: self.reconnect_attempts,
            delay: self.policy.backoff.delay(self.reconnect_attempts),
            cause,
        }
    }

    fn kill(&mut self, reason: LinkError, cause: Option<LinkError>) -> TransitionResult {
        self.state = LinkState::Killed;
        self.retry_pending = false;
        TransitionResult::Killed { reason, cause }
    }
}
