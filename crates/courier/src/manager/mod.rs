mod error;

pub use error::ConnectionError;

use crate::broker::{Broker, BrokerConnection, BrokerError, ConnectFailure, TransportEvent};
use crate::config::{ClientConfig, ConnectionConfig};
use crate::events::{EventBus, StatusEvents};
use crate::relay::Relay;
use crate::state::ConnectionState;

use std::collections::HashMap;
use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep, timeout};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, instrument, warn};

const INITIAL_RETRY_DELAY: Duration = Duration::from_millis(50);
const MAX_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Reply channel for an explicit unsubscribe.
pub(crate) type UnsubscribeReply = oneshot::Sender<Result<(), BrokerError>>;

/// Stops a subscription task. Dropping it stops the task without waiting.
pub(crate) type StopSignal = oneshot::Sender<Option<UnsubscribeReply>>;

struct ActiveSubscription {
    subject: String,
    stop: StopSignal,
}

struct Live<C> {
    connection: C,
    closed: CancellationToken,
    publishes: TaskTracker,
    durable: bool,
}

struct Shared<C> {
    state: ConnectionState,
    // Bumped on every connect attempt and disconnect so late results and
    // transport events from an older connection can be told apart.
    epoch: u64,
    attempt: Option<CancellationToken>,
    live: Option<Live<C>>,
    subscriptions: HashMap<u64, ActiveSubscription>,
    next_subscription_id: u64,
}

struct Inner<B>
where
    B: Broker,
{
    broker: B,
    connect_gate: AsyncMutex<()>,
    shared: Mutex<Shared<B::Connection>>,
    status: EventBus<bool>,
}

impl<B> Inner<B>
where
    B: Broker,
{
    fn on_transport_event(&self, epoch: u64, event: TransportEvent) {
        let mut shared = self.shared.lock();
        if shared.epoch != epoch {
            debug!(?event, "ignoring event from a superseded connection");
            return;
        }

        match (event, shared.state) {
            (TransportEvent::Disconnected, ConnectionState::Connected) => {
                warn!("lost connection to broker, reconnecting");
                shared.state = ConnectionState::Reconnecting;
                self.status.emit(false);
            }
            (TransportEvent::Reconnected, ConnectionState::Reconnecting) => {
                info!("reconnected to broker");
                shared.state = ConnectionState::Connected;
                self.status.emit(true);
            }
            (
                TransportEvent::Closed,
                ConnectionState::Connected | ConnectionState::Reconnecting,
            ) => {
                warn!("broker closed the connection");
                shared.state = ConnectionState::Closed;
                shared.subscriptions.clear();
                if let Some(live) = shared.live.take() {
                    live.closed.cancel();
                }
                self.status.emit(false);
            }
            (event, state) => debug!(?event, %state, "transport event without state change"),
        }
    }
}

/// A borrowed view of the live connection, used for stream management and
/// publishing. Valid until the next disconnect; work run through
/// [`ManagementHandle::run`] afterwards fails with `BrokerError::Disconnected`.
#[derive(Clone, Debug)]
pub struct ManagementHandle<C> {
    connection: C,
    closed: CancellationToken,
    publishes: TaskTracker,
    durable: bool,
    epoch: u64,
}

impl<C> ManagementHandle<C>
where
    C: BrokerConnection,
{
    /// The underlying broker connection.
    pub const fn connection(&self) -> &C {
        &self.connection
    }

    /// Whether publishes should go through the stream context.
    pub const fn durable(&self) -> bool {
        self.durable
    }

    /// Whether the connection this handle was taken from has been torn down.
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    pub(crate) const fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Runs `operation`, resolving to `BrokerError::Disconnected` as soon as the
    /// connection is torn down instead of waiting on a dead transport.
    ///
    /// # Errors
    ///
    /// Returns the operation's error, or `BrokerError::Disconnected`.
    pub async fn run<F, T>(&self, operation: F) -> Result<T, BrokerError>
    where
        F: Future<Output = Result<T, BrokerError>> + Send,
    {
        if self.is_closed() {
            return Err(BrokerError::Disconnected);
        }

        tokio::select! {
            biased;
            () = self.closed.cancelled() => Err(BrokerError::Disconnected),
            result = operation => result,
        }
    }

    /// Runs a publish without racing it against teardown. A disconnect waits
    /// for every publish started here before draining the connection.
    ///
    /// # Errors
    ///
    /// Returns the operation's error, or `BrokerError::Disconnected` if the
    /// connection was already torn down.
    pub async fn run_publish<F, T>(&self, operation: F) -> Result<T, BrokerError>
    where
        F: Future<Output = Result<T, BrokerError>> + Send,
    {
        if self.is_closed() || self.publishes.is_closed() {
            return Err(BrokerError::Disconnected);
        }

        let _in_flight = self.publishes.token();
        operation.await
    }
}

/// Owns the broker connection and its lifecycle.
///
/// Cloning is cheap; all clones share the same connection, state and listeners.
pub struct ConnectionManager<B>
where
    B: Broker,
{
    inner: Arc<Inner<B>>,
}

impl<B> Clone for ConnectionManager<B>
where
    B: Broker,
{
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<B> Debug for ConnectionManager<B>
where
    B: Broker,
{
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("ConnectionManager")
            .field("broker", &self.inner.broker)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl<B> ConnectionManager<B>
where
    B: Broker,
{
    /// Creates a disconnected manager for `broker`.
    pub fn new(broker: B) -> Self {
        Self {
            inner: Arc::new(Inner {
                broker,
                connect_gate: AsyncMutex::new(()),
                shared: Mutex::new(Shared {
                    state: ConnectionState::Disconnected,
                    epoch: 0,
                    attempt: None,
                    live: None,
                    subscriptions: HashMap::new(),
                    next_subscription_id: 0,
                }),
                status: EventBus::new(),
            }),
        }
    }

    /// The broker binding this manager connects through.
    pub fn broker(&self) -> &B {
        &self.inner.broker
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.inner.shared.lock().state
    }

    /// Whether the connection is live.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Registers a listener for `StatusChanged(is_connected)` notifications.
    pub fn status_events(&self) -> StatusEvents {
        self.inner.status.listen()
    }

    /// Number of subscriptions currently tracked for teardown.
    pub fn active_subscriptions(&self) -> usize {
        self.inner.shared.lock().subscriptions.len()
    }

    /// Subjects of the subscriptions currently tracked, in no particular order.
    pub fn subscribed_subjects(&self) -> Vec<String> {
        self.inner
            .shared
            .lock()
            .subscriptions
            .values()
            .map(|subscription| subscription.subject.clone())
            .collect()
    }

    /// Connects to the broker, retrying transient failures until
    /// `config.connect_timeout` elapses. Succeeds immediately if already connected.
    ///
    /// # Errors
    ///
    /// - `ConnectionError::Timeout` if the broker could not be reached in time.
    /// - `ConnectionError::TransportFailure` on a non-retriable handshake failure.
    /// - `ConnectionError::Cancelled` if `disconnect` was called meanwhile.
    #[instrument(skip(self, config), fields(url = %config.url))]
    pub async fn connect(&self, config: ConnectionConfig) -> Result<(), ConnectionError> {
        let _gate = self.inner.connect_gate.lock().await;

        let (attempt, epoch, previous, stale) = {
            let mut shared = self.inner.shared.lock();
            if shared.state == ConnectionState::Connected {
                debug!("already connected");
                return Ok(());
            }

            let previous = if shared.state == ConnectionState::Closed {
                ConnectionState::Closed
            } else {
                ConnectionState::Disconnected
            };

            let stale = shared.live.take();
            shared.subscriptions.clear();

            let attempt = CancellationToken::new();
            shared.epoch += 1;
            shared.state = ConnectionState::Connecting;
            shared.attempt = Some(attempt.clone());

            (attempt, shared.epoch, previous, stale)
        };

        if let Some(stale) = stale {
            debug!("discarding connection that was still reconnecting");
            stale.closed.cancel();
            tokio::spawn(async move {
                let _ = stale.connection.drain().await;
            });
        }

        let (events, transport_events) = flume::unbounded();
        let outcome = tokio::select! {
            () = attempt.cancelled() => Err(ConnectionError::Cancelled),
            result = self.establish(&config, events) => result,
        };

        let mut shared = self.inner.shared.lock();
        let current = shared.epoch == epoch;

        match outcome {
            Ok(connection) if current => {
                let durable = config.use_durable_streaming && connection.has_stream_context();
                shared.state = ConnectionState::Connected;
                shared.attempt = None;
                shared.live = Some(Live {
                    connection,
                    closed: CancellationToken::new(),
                    publishes: TaskTracker::new(),
                    durable,
                });
                self.inner.status.emit(true);
                drop(shared);

                self.spawn_event_pump(epoch, transport_events);
                info!(durable, "connected to broker");

                Ok(())
            }
            Ok(connection) => {
                self.inner.status.emit(false);
                drop(shared);

                debug!("connection established after the attempt was cancelled");
                tokio::spawn(async move {
                    let _ = connection.drain().await;
                });

                Err(ConnectionError::Cancelled)
            }
            Err(error) => {
                if current {
                    shared.state = previous;
                    shared.attempt = None;
                }
                self.inner.status.emit(false);
                drop(shared);

                warn!(%error, "failed to connect to broker");

                Err(error)
            }
        }
    }

    /// Runs [`Self::connect`] in the background and hands the result to
    /// `on_done` through `relay`.
    pub fn connect_with<F>(
        &self,
        config: ConnectionConfig,
        relay: Arc<dyn Relay>,
        on_done: F,
    ) -> JoinHandle<()>
    where
        F: FnOnce(Result<(), ConnectionError>) + Send + 'static,
    {
        let manager = self.clone();

        tokio::spawn(async move {
            let result = manager.connect(config).await;
            relay.enqueue(Box::new(move || on_done(result)));
        })
    }

    /// Host start-up hook. Connects in the background through
    /// [`Self::connect_with`] when `config.connect_on_start` is set, otherwise
    /// leaves the manager disconnected and returns `None`.
    pub fn start<F>(
        &self,
        config: &ClientConfig,
        relay: Arc<dyn Relay>,
        on_done: F,
    ) -> Option<JoinHandle<()>>
    where
        F: FnOnce(Result<(), ConnectionError>) + Send + 'static,
    {
        if !config.connect_on_start {
            debug!(url = %config.url, "connect on start disabled");
            return None;
        }

        Some(self.connect_with(config.connection_config(), relay, on_done))
    }

    /// Tears down subscriptions, waits for in-flight publishes, drains and
    /// closes the connection, or cancels a pending connect. Safe to call
    /// repeatedly.
    #[instrument(skip(self))]
    pub async fn disconnect(&self) {
        let live = {
            let mut shared = self.inner.shared.lock();
            match shared.state {
                ConnectionState::Disconnected | ConnectionState::Closed => {
                    debug!("already disconnected");
                    return;
                }
                ConnectionState::Connecting => {
                    if let Some(attempt) = shared.attempt.take() {
                        attempt.cancel();
                    }
                    shared.epoch += 1;
                    shared.state = ConnectionState::Closed;
                    drop(shared);

                    info!("cancelled pending connection attempt");
                    return;
                }
                ConnectionState::Connected | ConnectionState::Reconnecting => {}
            }

            shared.epoch += 1;
            shared.state = ConnectionState::Closed;

            let torn_down = shared.subscriptions.len();
            shared.subscriptions.clear();
            debug!(subscriptions = torn_down, "stopped subscriptions");

            self.inner.status.emit(false);
            shared.live.take()
        };

        if let Some(live) = live {
            live.closed.cancel();
            live.publishes.close();
            if !live.publishes.is_empty() {
                debug!(in_flight = live.publishes.len(), "waiting for in-flight publishes");
            }
            live.publishes.wait().await;

            if let Err(error) = live.connection.drain().await {
                warn!(%error, "error while draining connection");
            }
        }

        info!("disconnected from broker");
    }

    /// Borrows the live connection for management or publishing.
    ///
    /// # Errors
    ///
    /// Returns `ConnectionError::NotConnected` unless the state is `Connected`.
    pub fn management_context(
        &self,
    ) -> Result<ManagementHandle<B::Connection>, ConnectionError> {
        let shared = self.inner.shared.lock();
        match (&shared.live, shared.state) {
            (Some(live), ConnectionState::Connected) => Ok(ManagementHandle {
                connection: live.connection.clone(),
                closed: live.closed.clone(),
                publishes: live.publishes.clone(),
                durable: live.durable,
                epoch: shared.epoch,
            }),
            _ => Err(ConnectionError::NotConnected),
        }
    }

    pub(crate) fn register_subscription(
        &self,
        epoch: u64,
        subject: &str,
        stop: StopSignal,
    ) -> Result<u64, ConnectionError> {
        let mut shared = self.inner.shared.lock();
        if shared.epoch != epoch || shared.state != ConnectionState::Connected {
            return Err(ConnectionError::NotConnected);
        }

        shared.next_subscription_id += 1;
        let id = shared.next_subscription_id;
        shared.subscriptions.insert(
            id,
            ActiveSubscription {
                subject: subject.to_string(),
                stop,
            },
        );

        Ok(id)
    }

    pub(crate) fn take_subscription(&self, id: u64) -> Option<StopSignal> {
        self.inner
            .shared
            .lock()
            .subscriptions
            .remove(&id)
            .map(|subscription| subscription.stop)
    }

    async fn establish(
        &self,
        config: &ConnectionConfig,
        events: flume::Sender<TransportEvent>,
    ) -> Result<B::Connection, ConnectionError> {
        let deadline = Instant::now() + config.connect_timeout;
        let mut delay = INITIAL_RETRY_DELAY;
        let mut attempts = 0_u32;

        loop {
            attempts += 1;

            let remaining = deadline.saturating_duration_since(Instant::now());
            let attempt_config = ConnectionConfig {
                connect_timeout: remaining,
                ..config.clone()
            };

            match timeout(
                remaining,
                self.inner.broker.connect(&attempt_config, events.clone()),
            )
            .await
            {
                Ok(Ok(connection)) => {
                    if attempts > 1 {
                        debug!(attempts, "connected after retry");
                    }
                    return Ok(connection);
                }
                Ok(Err(ConnectFailure::Fatal(reason))) => {
                    return Err(ConnectionError::TransportFailure(reason));
                }
                Ok(Err(ConnectFailure::Retriable(reason))) => {
                    debug!(attempt = attempts, %reason, "connect attempt failed, retrying");
                }
                Err(_elapsed) => return Err(ConnectionError::Timeout(config.connect_timeout)),
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(ConnectionError::Timeout(config.connect_timeout));
            }

            sleep(delay.min(remaining)).await;

            // Exponential backoff with 0-10% jitter
            delay = delay
                .mul_f64(fastrand::f64().mul_add(0.1, 2.0))
                .min(MAX_RETRY_DELAY);
        }
    }

    fn spawn_event_pump(&self, epoch: u64, events: flume::Receiver<TransportEvent>) {
        let inner: Weak<Inner<B>> = Arc::downgrade(&self.inner);

        tokio::spawn(async move {
            while let Ok(event) = events.recv_async().await {
                let Some(inner) = inner.upgrade() else {
                    break;
                };
                inner.on_transport_event(epoch, event);
            }
        });
    }
}
