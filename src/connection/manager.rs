//! Connection manager with persistent connections and automatic reconnection
//!
//! [`ConnectionManager`] is a cheap handle. All link state lives in a single
//! spawned task that owns the transport, the in-flight connect and write,
//! the retry timer and the keepalive interval, so every transition is
//! serialised without locks. Nothing the task awaits can keep it from
//! handling the next command; a write stalled on a printer that stopped
//! reading is dropped by `close()`.

use crate::connection::config::ConnectionConfig;
use crate::connection::events::{
    EventHandler, RetrySchedule, Subscription, SubscriptionId, Subscriptions, TransportInfo,
};
use crate::transport::{TcpConnector, TransportConnector, TransportStream};
use bytes::Bytes;
use futures::future::{BoxFuture, FutureExt};
use printer_link_shared::{
    Endpoint, LinkError, LinkState, LinkStateMachine, LinkStatus, LinkTrigger, TransitionResult,
};
use std::collections::VecDeque;
use std::future;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{interval_at, sleep, timeout, Instant, Interval, MissedTickBehavior, Sleep};
use tracing::{debug, info, warn};

type Reply = oneshot::Sender<Result<(), LinkError>>;

/// Requests from the handle to the link task
enum Command {
    Open {
        handler: Arc<dyn EventHandler>,
        reply: Reply,
    },
    Write {
        data: Bytes,
        reply: Reply,
    },
    Subscribe {
        id: SubscriptionId,
        subscription: Subscription,
    },
    Unsubscribe {
        id: SubscriptionId,
    },
    Close {
        reply: Reply,
    },
}

/// Manages one persistent connection to a remote endpoint
pub struct ConnectionManager {
    endpoint: Endpoint,
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<LinkStatus>,
    next_subscription: AtomicU64,
}

impl ConnectionManager {
    /// Create a manager that dials over TCP. Nothing is dialed until [`open`].
    ///
    /// [`open`]: ConnectionManager::open
    pub fn new(config: ConnectionConfig) -> Self {
        Self::with_connector(config, TcpConnector::new())
    }

    /// Create a manager over any transport connector
    ///
    /// Must be called from within a tokio runtime.
    pub fn with_connector<C: TransportConnector>(config: ConnectionConfig, connector: C) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let fsm = LinkStateMachine::new(config.reconnect);
        let (status_tx, status_rx) = watch::channel(fsm.status());
        let endpoint = config.endpoint.clone();

        let actor = LinkActor {
            transport: TransportInfo {
                id: 0,
                transport: connector.name(),
                endpoint: endpoint.clone(),
            },
            read_buf: vec![0u8; config.read_buffer_size.max(1)],
            connector: Arc::new(connector),
            config,
            fsm,
            status: status_tx,
            commands: command_rx,
            handler: None,
            subscriptions: Subscriptions::default(),
            connecting: None,
            reader: None,
            writer: None,
            writing: None,
            write_reply: None,
            queued_writes: VecDeque::new(),
            retry_timer: None,
            keepalive: None,
        };
        tokio::spawn(actor.run());

        Self {
            endpoint,
            commands: command_tx,
            status: status_rx,
            next_subscription: AtomicU64::new(0),
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Start connecting and keep the link up, reporting through `handler`
    ///
    /// Resolves once the open is accepted; the connect itself completes in
    /// the background. Fails with `AlreadyKilled` after the link gave up,
    /// `Closed` after [`close`](Self::close), and `AlreadyOpen` while a
    /// connect, a connection or a pending retry is active.
    pub async fn open(&self, handler: impl EventHandler) -> Result<(), LinkError> {
        let handler: Arc<dyn EventHandler> = Arc::new(handler);
        self.request(|reply| Command::Open { handler, reply }).await
    }

    /// Write bytes to the current transport
    ///
    /// Fails with `NotConnected` unless connected. Writes are sent in call
    /// order. A transport failure is returned here and also drives the
    /// reconnect logic; a write still pending when the link goes down fails
    /// with `NotConnected`, or `Closed` if [`close`](Self::close) cut it off.
    pub async fn write(&self, data: impl Into<Bytes>) -> Result<(), LinkError> {
        let data = data.into();
        self.request(|reply| Command::Write { data, reply }).await
    }

    /// Set the handler for inbound bytes, replacing any previous one
    ///
    /// The handler follows the link across reconnects.
    pub fn read<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(Bytes) + Send + Sync + 'static,
    {
        self.subscribe(Subscription::Data(Box::new(handler)))
    }

    /// Listen for every successful connect
    pub fn on_connect<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&TransportInfo) + Send + Sync + 'static,
    {
        self.subscribe(Subscription::Connect(Box::new(listener)))
    }

    /// Listen for the caller-initiated close
    pub fn on_disconnect<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.subscribe(Subscription::Disconnect(Box::new(listener)))
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        if self.commands.send(Command::Unsubscribe { id }).is_err() {
            debug!("[LINK] {} unsubscribe after shutdown", self.endpoint);
        }
    }

    /// Close the link for good. Calling it again is a no-op.
    pub async fn close(&self) -> Result<(), LinkError> {
        self.request(|reply| Command::Close { reply }).await
    }

    pub fn is_connected(&self) -> bool {
        self.state() == LinkState::Connected
    }

    pub fn state(&self) -> LinkState {
        self.status.borrow().state
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.status.borrow().reconnect_attempts
    }

    pub fn status(&self) -> LinkStatus {
        *self.status.borrow()
    }

    /// Receiver that observes every status change
    pub fn watch(&self) -> watch::Receiver<LinkStatus> {
        self.status.clone()
    }

    async fn request(&self, command: impl FnOnce(Reply) -> Command) -> Result<(), LinkError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .map_err(|_| LinkError::Closed)?;
        response.await.map_err(|_| LinkError::Closed)?
    }

    fn subscribe(&self, subscription: Subscription) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::Relaxed) + 1);
        if self
            .commands
            .send(Command::Subscribe { id, subscription })
            .is_err()
        {
            debug!("[LINK] {} subscribe after shutdown", self.endpoint);
        }
        id
    }
}

type PendingConnect<S> = BoxFuture<'static, Result<S, LinkError>>;
type PendingWrite<S> = BoxFuture<'static, (WriteHalf<S>, io::Result<()>)>;

/// What woke the link task
enum Wake<S> {
    Command(Command),
    Shutdown,
    ConnectDone(Result<S, LinkError>),
    WriteDone(WriteHalf<S>, io::Result<()>),
    RetryDue,
    KeepAlive,
    Read(io::Result<usize>),
}

/// The task that owns the link
struct LinkActor<C: TransportConnector> {
    connector: Arc<C>,
    config: ConnectionConfig,
    fsm: LinkStateMachine,
    status: watch::Sender<LinkStatus>,
    commands: mpsc::UnboundedReceiver<Command>,
    handler: Option<Arc<dyn EventHandler>>,
    subscriptions: Subscriptions,
    /// Current (or most recent) transport
    transport: TransportInfo,
    connecting: Option<PendingConnect<C::Stream>>,
    reader: Option<ReadHalf<C::Stream>>,
    /// Idle write half; `None` while a write holds it
    writer: Option<WriteHalf<C::Stream>>,
    writing: Option<PendingWrite<C::Stream>>,
    /// Caller waiting on `writing`; keepalive probes have none
    write_reply: Option<Reply>,
    queued_writes: VecDeque<(Bytes, Reply)>,
    retry_timer: Option<Pin<Box<Sleep>>>,
    keepalive: Option<Interval>,
    read_buf: Vec<u8>,
}

impl<C: TransportConnector> LinkActor<C> {
    async fn run(mut self) {
        loop {
            let wake = tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => Wake::Command(command),
                    None => Wake::Shutdown,
                },
                outcome = in_flight(&mut self.connecting) => Wake::ConnectDone(outcome),
                (writer, result) = in_flight(&mut self.writing) => Wake::WriteDone(writer, result),
                () = retry_elapsed(&mut self.retry_timer) => Wake::RetryDue,
                () = keepalive_tick(&mut self.keepalive) => Wake::KeepAlive,
                result = read_chunk(&mut self.reader, &mut self.read_buf) => Wake::Read(result),
            };

            match wake {
                Wake::Command(command) => self.handle_command(command).await,
                Wake::Shutdown => break,
                Wake::ConnectDone(Ok(stream)) => self.connect_succeeded(stream),
                Wake::ConnectDone(Err(err)) => self.step(LinkTrigger::ConnectFailed(err)),
                Wake::WriteDone(writer, result) => self.write_finished(writer, result),
                Wake::RetryDue => self.step(LinkTrigger::RetryDue),
                Wake::KeepAlive => self.send_probe(),
                Wake::Read(Ok(0)) => {
                    self.drop_transport();
                    self.step(LinkTrigger::TransportClosed);
                }
                Wake::Read(Ok(n)) => self.deliver(n),
                Wake::Read(Err(err)) => self.transport_failed(err.into()),
            }
        }

        // Every handle is gone; release the link without notifications
        self.connecting = None;
        self.retry_timer = None;
        self.keepalive = None;
        self.abandon_writes(LinkError::Closed);
        self.shutdown_transport().await;
        debug!("[LINK] {} manager dropped", self.config.endpoint);
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Open { handler, reply } => {
                let outcome = match self.fsm.process(LinkTrigger::OpenRequested) {
                    TransitionResult::Rejected(err) => {
                        debug!("[LINK] {} open rejected: {}", self.config.endpoint, err);
                        Err(err)
                    }
                    result => {
                        self.handler = Some(handler);
                        self.apply(result);
                        Ok(())
                    }
                };
                let _ = reply.send(outcome);
            }
            Command::Write { data, reply } => self.queue_write(data, reply),
            Command::Subscribe { id, subscription } => self.subscriptions.insert(id, subscription),
            Command::Unsubscribe { id } => {
                if !self.subscriptions.remove(id) {
                    debug!("[LINK] unknown subscription {:?}", id);
                }
            }
            Command::Close { reply } => {
                self.close().await;
                let _ = reply.send(Ok(()));
            }
        }
    }

    fn step(&mut self, trigger: LinkTrigger) {
        let result = self.fsm.process(trigger);
        self.apply(result);
    }

    /// Carry out a transition result and publish the new status
    fn apply(&mut self, result: TransitionResult) {
        match result {
            TransitionResult::StartConnect => self.start_connect(),
            TransitionResult::RetryScheduled {
                attempt,
                delay,
                cause,
            } => {
                self.drop_transport();
                self.retry_timer = Some(Box::pin(sleep(delay)));
                self.publish();

                let transport = self.transport.clone();
                if let Some(err) = &cause {
                    self.notify(|handler| handler.error(&transport, err));
                }
                debug!(
                    "[LINK] {} lost, attempt {} in {:?}",
                    transport, attempt, delay
                );
                self.notify(|handler| handler.closed(&transport, RetrySchedule { attempt, delay }));
            }
            TransitionResult::Killed { reason, cause } => {
                self.drop_transport();
                self.connecting = None;
                self.retry_timer = None;
                self.publish();

                let transport = self.transport.clone();
                warn!("[LINK] {} killed: {}", transport, reason);
                self.notify(|handler| handler.killed(&transport, &reason));
                if let Some(err) = &cause {
                    self.notify(|handler| handler.error(&transport, err));
                }
            }
            TransitionResult::Ignored => {
                debug!("[LINK] {} ignored trigger in {:?}", self.transport, self.fsm.state());
            }
            TransitionResult::Rejected(err) => {
                debug!("[LINK] {} rejected: {}", self.transport, err);
            }
            // Produced only for ConnectSucceeded and CloseRequested, whose
            // callers do the work themselves.
            TransitionResult::Connected | TransitionResult::Closing => {}
        }
    }

    fn start_connect(&mut self) {
        self.transport.id += 1;
        self.publish();

        let connector = Arc::clone(&self.connector);
        let endpoint = self.config.endpoint.clone();
        let limit = self.config.connect_timeout;
        debug!("[LINK] {} dialing", self.transport);

        self.connecting = Some(
            async move {
                match timeout(limit, connector.connect(&endpoint)).await {
                    Ok(Ok(stream)) => Ok(stream),
                    Ok(Err(err)) => Err(LinkError::ConnectFailure {
                        endpoint: endpoint.to_string(),
                        reason: format!("{err:#}"),
                    }),
                    Err(_) => Err(LinkError::ConnectFailure {
                        endpoint: endpoint.to_string(),
                        reason: format!("timed out after {limit:?}"),
                    }),
                }
            }
            .boxed(),
        );
    }

    fn connect_succeeded(&mut self, stream: C::Stream) {
        match self.fsm.process(LinkTrigger::ConnectSucceeded) {
            TransitionResult::Connected => {}
            other => {
                drop(stream);
                self.apply(other);
                return;
            }
        }

        let (reader, writer) = tokio::io::split(stream);
        self.reader = Some(reader);
        self.writer = Some(writer);
        self.retry_timer = None;
        self.keepalive = self
            .config
            .keepalive
            .as_ref()
            .filter(|keepalive| !keepalive.interval.is_zero())
            .map(|keepalive| {
                let mut ticker = interval_at(Instant::now() + keepalive.interval, keepalive.interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                ticker
            });
        self.publish();

        let transport = self.transport.clone();
        info!("[LINK] {} connected", transport);
        self.notify(|handler| handler.connected(&transport));
        self.subscriptions.notify_connect(&transport);
    }

    fn queue_write(&mut self, data: Bytes, reply: Reply) {
        if self.fsm.state() != LinkState::Connected {
            let _ = reply.send(Err(LinkError::NotConnected));
            return;
        }
        self.queued_writes.push_back((data, reply));
        self.next_write();
    }

    /// Start the oldest queued write unless one is already running
    fn next_write(&mut self) {
        if self.writing.is_some() {
            return;
        }
        if let Some((data, reply)) = self.queued_writes.pop_front() {
            self.start_write(data, Some(reply));
        }
    }

    fn start_write(&mut self, data: Bytes, reply: Option<Reply>) {
        let Some(mut writer) = self.writer.take() else {
            if let Some(reply) = reply {
                let _ = reply.send(Err(LinkError::NotConnected));
            }
            return;
        };

        self.write_reply = reply;
        self.writing = Some(
            async move {
                let result = match writer.write_all(&data).await {
                    Ok(()) => writer.flush().await,
                    Err(err) => Err(err),
                };
                (writer, result)
            }
            .boxed(),
        );
    }

    fn write_finished(&mut self, writer: WriteHalf<C::Stream>, result: io::Result<()>) {
        let reply = self.write_reply.take();
        match result {
            Ok(()) => {
                self.writer = Some(writer);
                if let Some(reply) = reply {
                    let _ = reply.send(Ok(()));
                }
                self.next_write();
            }
            Err(err) => {
                drop(writer);
                let err = LinkError::from(err);
                self.transport_failed(err.clone());
                if let Some(reply) = reply {
                    let _ = reply.send(Err(err));
                }
            }
        }
    }

    fn send_probe(&mut self) {
        if self.writing.is_some() {
            debug!("[LINK] {} busy, keepalive skipped", self.transport);
            return;
        }
        let Some(probe) = self.config.keepalive.as_ref().map(|k| k.probe.clone()) else {
            return;
        };
        debug!("[LINK] {} keepalive", self.transport);
        self.start_write(probe, None);
    }

    fn deliver(&mut self, n: usize) {
        let chunk = Bytes::copy_from_slice(&self.read_buf[..n]);
        if !self.subscriptions.deliver(chunk) {
            debug!("[LINK] {} dropped {} bytes, no read handler", self.transport, n);
        }
    }

    fn transport_failed(&mut self, err: LinkError) {
        self.drop_transport();
        self.step(LinkTrigger::TransportFailed(err));
    }

    async fn close(&mut self) {
        match self.fsm.process(LinkTrigger::CloseRequested) {
            TransitionResult::Closing => {}
            _ => return,
        }
        self.publish();

        self.retry_timer = None;
        self.keepalive = None;
        self.connecting = None;
        self.abandon_writes(LinkError::Closed);
        self.shutdown_transport().await;

        self.fsm.finish_close();
        self.publish();
        info!("[LINK] {} closed", self.config.endpoint);
        self.subscriptions.notify_disconnect();
    }

    /// Forget the transport without a graceful shutdown
    fn drop_transport(&mut self) {
        self.reader = None;
        self.writer = None;
        self.keepalive = None;
        self.abandon_writes(LinkError::NotConnected);
    }

    /// Drop the running write and fail every write still waiting
    fn abandon_writes(&mut self, err: LinkError) {
        self.writing = None;
        if let Some(reply) = self.write_reply.take() {
            let _ = reply.send(Err(err.clone()));
        }
        for (_, reply) in self.queued_writes.drain(..) {
            let _ = reply.send(Err(err.clone()));
        }
    }

    /// Graceful shutdown; skipped when a write had to be abandoned
    async fn shutdown_transport(&mut self) {
        let (reader, writer) = (self.reader.take(), self.writer.take());
        if let (Some(reader), Some(writer)) = (reader, writer) {
            let mut stream = reader.unsplit(writer);
            if let Err(err) = TransportStream::shutdown(&mut stream).await {
                debug!("[LINK] {} shutdown: {:#}", self.transport, err);
            }
        }
    }

    fn notify(&self, f: impl FnOnce(&dyn EventHandler)) {
        if let Some(handler) = &self.handler {
            f(handler.as_ref());
        }
    }

    fn publish(&self) {
        self.status.send_replace(self.fsm.status());
    }
}

async fn in_flight<T>(pending: &mut Option<BoxFuture<'static, T>>) -> T {
    match pending.as_mut() {
        Some(operation) => {
            let outcome = operation.await;
            *pending = None;
            outcome
        }
        None => future::pending().await,
    }
}

async fn retry_elapsed(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer.as_mut() {
        Some(delay) => {
            delay.as_mut().await;
            *timer = None;
        }
        None => future::pending().await,
    }
}

async fn keepalive_tick(keepalive: &mut Option<Interval>) {
    match keepalive.as_mut() {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => future::pending().await,
    }
}

async fn read_chunk<S: TransportStream>(
    reader: &mut Option<ReadHalf<S>>,
    buf: &mut [u8],
) -> io::Result<usize> {
    match reader.as_mut() {
        Some(reader) => reader.read(buf).await,
        None => future::pending().await,
    }
}
