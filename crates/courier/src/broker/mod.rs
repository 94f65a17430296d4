mod error;

pub use error::{BrokerError, ConnectFailure};

use crate::config::ConnectionConfig;
use crate::envelope::Envelope;
use crate::stream::{StreamConfig, StreamInfo};

use std::fmt::Debug;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;

/// Connection lifecycle changes raised by the broker client after the
/// initial handshake.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransportEvent {
    /// The transport dropped; the client is trying to get it back.
    Disconnected,

    /// The transport is (re-)established.
    Reconnected,

    /// The client gave up or was closed.
    Closed,
}

/// Sink a binding pushes [`TransportEvent`]s into.
pub type TransportEvents = flume::Sender<TransportEvent>;

/// Acknowledgement of a durable publish.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DurableAck {
    /// Stream that stored the message.
    pub stream: String,

    /// Sequence number assigned by the stream.
    pub sequence: u64,
}

/// Factory for broker connections.
#[async_trait]
pub trait Broker: Clone + Debug + Send + Sync + 'static {
    /// The connection type produced.
    type Connection: BrokerConnection;

    /// Performs one handshake attempt. Retries and the overall deadline are the
    /// caller's concern; `config.connect_timeout` may be used as the per-attempt bound.
    async fn connect(
        &self,
        config: &ConnectionConfig,
        events: TransportEvents,
    ) -> Result<Self::Connection, ConnectFailure>;
}

/// A live broker connection. Cheap to clone; all clones share one transport.
#[async_trait]
pub trait BrokerConnection: Clone + Debug + Send + Sync + 'static {
    /// Subscription type returned by [`Self::subscribe`].
    type Subscription: BrokerSubscription;

    /// Whether a stream context is available for durable publishing.
    fn has_stream_context(&self) -> bool;

    /// Fire-and-forget publish. Returns once the client has accepted the message.
    async fn publish(&self, subject: String, payload: Bytes) -> Result<(), BrokerError>;

    /// Publishes through the stream context and waits for the stream's acknowledgement.
    async fn publish_durable(&self, subject: String, payload: Bytes)
    -> Result<DurableAck, BrokerError>;

    /// Starts receiving messages published on `subject` (wildcards allowed).
    async fn subscribe(&self, subject: String) -> Result<Self::Subscription, BrokerError>;

    /// Creates a stream. Must return `BrokerError::AlreadyExists` only when the
    /// broker says the name is taken.
    async fn create_stream(&self, config: &StreamConfig) -> Result<StreamInfo, BrokerError>;

    /// Replaces the configuration of an existing stream.
    async fn update_stream(&self, config: &StreamConfig) -> Result<StreamInfo, BrokerError>;

    /// Removes a stream and all its messages.
    async fn delete_stream(&self, name: &str) -> Result<(), BrokerError>;

    /// Queries the current state of a stream.
    async fn stream_info(&self, name: &str) -> Result<StreamInfo, BrokerError>;

    /// Flushes pending publishes, closes subscriptions and the transport.
    async fn drain(&self) -> Result<(), BrokerError>;
}

/// An active subscription yielding envelopes in receipt order.
#[async_trait]
pub trait BrokerSubscription: Stream<Item = Envelope> + Debug + Send + Unpin + 'static {
    /// Tells the broker to stop delivering. The stream ends afterwards.
    async fn unsubscribe(&mut self) -> Result<(), BrokerError>;
}
