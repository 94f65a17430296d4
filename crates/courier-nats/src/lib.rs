//! NATS binding for the courier messaging core: core NATS for best-effort
//! pub/sub and JetStream for durable streams.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod connection;
mod stream;
mod subscription;

pub use connection::NatsConnection;
pub use subscription::NatsSubscription;

use std::time::Duration;

use async_nats::{ConnectError, ConnectErrorKind, ConnectOptions, Event};
use async_trait::async_trait;
use proven_courier::broker::{ConnectFailure, TransportEvents};
use proven_courier::{Broker, ConnectionConfig, TransportEvent};
use tracing::{debug, instrument, warn};

/// Client name announced to the server unless overridden.
pub const DEFAULT_CLIENT_NAME: &str = "proven-courier";

// async-nats refuses a zero connection timeout.
const MIN_ATTEMPT_TIMEOUT: Duration = Duration::from_millis(10);

/// Connects to a NATS server.
#[derive(Clone, Debug)]
pub struct NatsBroker {
    client_name: String,
}

impl NatsBroker {
    /// Creates a broker that announces itself as [`DEFAULT_CLIENT_NAME`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_client_name(DEFAULT_CLIENT_NAME)
    }

    /// Creates a broker that announces itself as `client_name`.
    pub fn with_client_name(client_name: impl Into<String>) -> Self {
        Self {
            client_name: client_name.into(),
        }
    }
}

impl Default for NatsBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Broker for NatsBroker {
    type Connection = NatsConnection;

    #[instrument(skip(self, config, events), fields(url = %config.url))]
    async fn connect(
        &self,
        config: &ConnectionConfig,
        events: TransportEvents,
    ) -> Result<Self::Connection, ConnectFailure> {
        let client = ConnectOptions::new()
            .name(&self.client_name)
            .connection_timeout(config.connect_timeout.max(MIN_ATTEMPT_TIMEOUT))
            .event_callback(move |event| {
                let events = events.clone();
                async move {
                    if let Some(event) = transport_event(&event) {
                        let _ = events.send(event);
                    }
                }
            })
            .connect(config.url.as_str())
            .await
            .map_err(connect_failure)?;

        debug!("nats handshake complete");

        Ok(NatsConnection::new(client))
    }
}

fn connect_failure(error: ConnectError) -> ConnectFailure {
    match error.kind() {
        ConnectErrorKind::Io | ConnectErrorKind::TimedOut | ConnectErrorKind::Dns => {
            ConnectFailure::Retriable(error.to_string())
        }
        _ => ConnectFailure::Fatal(error.to_string()),
    }
}

fn transport_event(event: &Event) -> Option<TransportEvent> {
    match event {
        Event::Connected => Some(TransportEvent::Reconnected),
        Event::Disconnected => Some(TransportEvent::Disconnected),
        Event::Closed => Some(TransportEvent::Closed),
        Event::SlowConsumer(sid) => {
            warn!(sid, "slow consumer, messages dropped");
            None
        }
        Event::ServerError(error) => {
            warn!(%error, "nats server error");
            None
        }
        Event::ClientError(error) => {
            warn!(%error, "nats client error");
            None
        }
        other => {
            debug!(event = %other, "nats client event");
            None
        }
    }
}
