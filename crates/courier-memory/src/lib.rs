//! In-process broker for tests and offline hosts. Mirrors the broker behaviour
//! the core relies on (subject wildcards, stream create/update/delete, per
//! subject limits, acknowledged publishes) and lets tests simulate
//! unreachable brokers and transport drops.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Connections handed out by [`MemoryBroker`].
pub mod connection;

/// Subject wildcard matching.
pub mod subject;

/// Subscriptions over a [`MemoryConnection`].
pub mod subscription;

pub use connection::MemoryConnection;
pub use subscription::MemorySubscription;

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use proven_courier::broker::{ConnectFailure, TransportEvents};
use proven_courier::{Broker, ConnectionConfig, Envelope, StreamConfig, StreamInfo, TransportEvent};
use tokio::sync::mpsc;
use tracing::debug;

#[derive(Debug)]
pub(crate) struct StoredStream {
    pub(crate) config: StreamConfig,
    pub(crate) messages: VecDeque<Envelope>,
    pub(crate) last_sequence: u64,
}

impl StoredStream {
    pub(crate) const fn new(config: StreamConfig) -> Self {
        Self {
            config,
            messages: VecDeque::new(),
            last_sequence: 0,
        }
    }

    pub(crate) fn info(&self) -> StreamInfo {
        StreamInfo {
            config: self.config.clone(),
            message_count: self.messages.len() as u64,
            byte_count: self
                .messages
                .iter()
                .map(|message| message.payload.len() as u64)
                .sum(),
            consumer_count: 0,
        }
    }

    /// Drops the oldest messages on `subject` until at most `keep` remain.
    pub(crate) fn trim_subject(&mut self, subject: &str, keep: usize) {
        let mut excess = self
            .messages
            .iter()
            .filter(|message| message.subject == subject)
            .count()
            .saturating_sub(keep);

        self.messages.retain(|message| {
            if excess > 0 && message.subject == subject {
                excess -= 1;
                false
            } else {
                true
            }
        });
    }
}

#[derive(Debug)]
pub(crate) struct ConnectionSlot {
    pub(crate) id: u64,
    pub(crate) events: TransportEvents,
    pub(crate) online: bool,
}

#[derive(Debug)]
pub(crate) struct SubscriberSlot {
    pub(crate) id: u64,
    pub(crate) connection_id: u64,
    pub(crate) pattern: String,
    pub(crate) sender: mpsc::UnboundedSender<Envelope>,
}

#[derive(Debug)]
pub(crate) struct BrokerState {
    reachable: bool,
    rejection: Option<String>,
    connect_delay: Option<Duration>,
    pub(crate) ack_delay: Option<Duration>,
    stream_context: bool,
    connect_attempts: u64,
    pub(crate) operations: u64,
    pub(crate) next_id: u64,
    pub(crate) connections: Vec<ConnectionSlot>,
    pub(crate) subscribers: Vec<SubscriberSlot>,
    pub(crate) streams: BTreeMap<String, StoredStream>,
}

impl BrokerState {
    pub(crate) fn connection_online(&self, id: u64) -> bool {
        self.connections
            .iter()
            .any(|connection| connection.id == id && connection.online)
    }

    /// Hands `envelope` to every online subscriber whose pattern matches.
    pub(crate) fn deliver(&self, envelope: &Envelope) {
        for subscriber in &self.subscribers {
            if self.connection_online(subscriber.connection_id)
                && subject::matches(&subscriber.pattern, &envelope.subject)
            {
                let _ = subscriber.sender.send(envelope.clone());
            }
        }
    }

    pub(crate) fn remove_connection(&mut self, id: u64) {
        self.connections.retain(|connection| connection.id != id);
        self.subscribers
            .retain(|subscriber| subscriber.connection_id != id);
    }
}

/// In-process broker. Clones share the same state.
#[derive(Clone, Debug)]
pub struct MemoryBroker {
    pub(crate) state: Arc<Mutex<BrokerState>>,
}

impl MemoryBroker {
    /// Creates a reachable broker with stream support and no streams.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(BrokerState {
                reachable: true,
                rejection: None,
                connect_delay: None,
                ack_delay: None,
                stream_context: true,
                connect_attempts: 0,
                operations: 0,
                next_id: 0,
                connections: Vec::new(),
                subscribers: Vec::new(),
                streams: BTreeMap::new(),
            })),
        }
    }

    /// Creates a broker whose connections expose no stream context, like a
    /// server running without persistence.
    #[must_use]
    pub fn without_stream_context() -> Self {
        let broker = Self::new();
        broker.state.lock().stream_context = false;
        broker
    }

    /// Makes new connection attempts fail with a retriable error, or succeed again.
    pub fn set_reachable(&self, reachable: bool) {
        self.state.lock().reachable = reachable;
    }

    /// Makes new connection attempts fail for good with `reason`.
    pub fn reject_connections(&self, reason: impl Into<String>) {
        self.state.lock().rejection = Some(reason.into());
    }

    /// Delays every connection attempt by `delay` before it resolves.
    pub fn set_connect_delay(&self, delay: Duration) {
        self.state.lock().connect_delay = Some(delay);
    }

    /// Holds back every durable acknowledgement by `delay`. The message is
    /// stored and delivered before the wait starts.
    pub fn set_ack_delay(&self, delay: Duration) {
        self.state.lock().ack_delay = Some(delay);
    }

    /// Simulates a transport drop on every open connection.
    pub fn drop_connections(&self) {
        self.set_online(false, TransportEvent::Disconnected);
    }

    /// Brings dropped connections back.
    pub fn restore_connections(&self) {
        self.set_online(true, TransportEvent::Reconnected);
    }

    /// Simulates the client giving up: every open connection is closed and its
    /// subscriptions end.
    pub fn close_connections(&self) {
        let mut state = self.state.lock();
        for connection in state.connections.drain(..) {
            let _ = connection.events.send(TransportEvent::Closed);
        }
        state.subscribers.clear();
        debug!("closed all connections");
    }

    /// Forgets every stream, as a restarted broker with memory storage would.
    pub fn clear_streams(&self) {
        self.state.lock().streams.clear();
    }

    /// Operations performed on connections so far (publishes, subscribes,
    /// stream management). Connection attempts are not counted.
    #[must_use]
    pub fn operations(&self) -> u64 {
        self.state.lock().operations
    }

    /// Connection attempts so far, successful or not.
    #[must_use]
    pub fn connect_attempts(&self) -> u64 {
        self.state.lock().connect_attempts
    }

    /// Connections neither drained nor closed.
    #[must_use]
    pub fn open_connections(&self) -> usize {
        self.state.lock().connections.len()
    }

    /// Live subscriptions across all connections.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.state.lock().subscribers.len()
    }

    /// Names of the streams that currently exist, sorted.
    #[must_use]
    pub fn stream_names(&self) -> Vec<String> {
        self.state.lock().streams.keys().cloned().collect()
    }

    /// Messages stored by `stream`, oldest first.
    #[must_use]
    pub fn stored_messages(&self, stream: &str) -> Vec<Envelope> {
        self.state
            .lock()
            .streams
            .get(stream)
            .map(|stream| stream.messages.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn set_online(&self, online: bool, event: TransportEvent) {
        let mut state = self.state.lock();
        for connection in &mut state.connections {
            if connection.online != online {
                connection.online = online;
                let _ = connection.events.send(event);
            }
        }
        debug!(?event, "changed connection availability");
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    type Connection = MemoryConnection;

    async fn connect(
        &self,
        config: &ConnectionConfig,
        events: TransportEvents,
    ) -> Result<Self::Connection, ConnectFailure> {
        let delay = {
            let mut state = self.state.lock();
            state.connect_attempts += 1;
            state.connect_delay
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock();
        if let Some(reason) = &state.rejection {
            return Err(ConnectFailure::Fatal(reason.clone()));
        }
        if !state.reachable {
            return Err(ConnectFailure::Retriable(format!(
                "connection refused: {}",
                config.url
            )));
        }

        state.next_id += 1;
        let id = state.next_id;
        state.connections.push(ConnectionSlot {
            id,
            events,
            online: true,
        });

        debug!(id, url = %config.url, "accepted connection");

        Ok(MemoryConnection::new(id, self.clone(), state.stream_context))
    }
}

/// The stream capturing `subject`, if any.
pub(crate) fn stream_for_subject<'a>(
    streams: &'a mut BTreeMap<String, StoredStream>,
    subject: &str,
) -> Option<&'a mut StoredStream> {
    streams
        .values_mut()
        .find(|stream| subject::matches(&stream.config.subject_filter, subject))
}
