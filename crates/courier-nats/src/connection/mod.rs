use crate::stream::{from_nats_info, to_nats_config};
use crate::subscription::NatsSubscription;

use std::fmt::{Debug, Formatter, Result as FmtResult};

use async_nats::Client;
use async_nats::jetstream::context::{
    CreateStreamErrorKind, DeleteStreamErrorKind, GetStreamErrorKind,
};
use async_nats::jetstream::{Context as JetStreamContext, ErrorCode};
use async_trait::async_trait;
use bytes::Bytes;
use proven_courier::broker::DurableAck;
use proven_courier::{BrokerConnection, BrokerError, StreamConfig, StreamInfo};
use tracing::{debug, instrument};

fn rejected(error: impl ToString) -> BrokerError {
    BrokerError::Rejected(error.to_string())
}

/// A connected NATS client together with its JetStream context.
#[derive(Clone)]
pub struct NatsConnection {
    client: Client,
    jetstream: JetStreamContext,
}

impl NatsConnection {
    pub(crate) fn new(client: Client) -> Self {
        let jetstream = async_nats::jetstream::new(client.clone());

        Self { client, jetstream }
    }

    /// The underlying NATS client.
    #[must_use]
    pub const fn client(&self) -> &Client {
        &self.client
    }
}

impl Debug for NatsConnection {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("NatsConnection")
            .field("state", &self.client.connection_state())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl BrokerConnection for NatsConnection {
    type Subscription = NatsSubscription;

    // A JetStream context can always be built from a client. Servers without
    // JetStream reject durable publishes with "no responders".
    fn has_stream_context(&self) -> bool {
        true
    }

    async fn publish(&self, subject: String, payload: Bytes) -> Result<(), BrokerError> {
        self.client
            .publish(subject, payload)
            .await
            .map_err(rejected)
    }

    #[instrument(skip(self, payload))]
    async fn publish_durable(
        &self,
        subject: String,
        payload: Bytes,
    ) -> Result<DurableAck, BrokerError> {
        let ack = self
            .jetstream
            .publish(subject, payload)
            .await
            .map_err(rejected)?
            .await
            .map_err(rejected)?;

        Ok(DurableAck {
            stream: ack.stream,
            sequence: ack.sequence,
        })
    }

    async fn subscribe(&self, subject: String) -> Result<Self::Subscription, BrokerError> {
        let subscriber = self
            .client
            .subscribe(subject.clone())
            .await
            .map_err(rejected)?;

        Ok(NatsSubscription::new(subject, subscriber))
    }

    #[instrument(skip(self, config), fields(stream = %config.name))]
    async fn create_stream(&self, config: &StreamConfig) -> Result<StreamInfo, BrokerError> {
        match self.jetstream.create_stream(to_nats_config(config)).await {
            Ok(stream) => Ok(from_nats_info(stream.cached_info())),
            Err(error) => match error.kind() {
                CreateStreamErrorKind::JetStream(jetstream_error)
                    if jetstream_error.error_code() == ErrorCode::STREAM_NAME_EXIST =>
                {
                    debug!("stream name already in use");
                    Err(BrokerError::AlreadyExists)
                }
                _ => Err(rejected(error)),
            },
        }
    }

    #[instrument(skip(self, config), fields(stream = %config.name))]
    async fn update_stream(&self, config: &StreamConfig) -> Result<StreamInfo, BrokerError> {
        match self.jetstream.update_stream(to_nats_config(config)).await {
            Ok(info) => Ok(from_nats_info(&info)),
            Err(error) => match error.kind() {
                CreateStreamErrorKind::JetStream(jetstream_error)
                    if jetstream_error.error_code() == ErrorCode::STREAM_NOT_FOUND =>
                {
                    Err(BrokerError::NotFound)
                }
                _ => Err(rejected(error)),
            },
        }
    }

    #[instrument(skip(self))]
    async fn delete_stream(&self, name: &str) -> Result<(), BrokerError> {
        match self.jetstream.delete_stream(name).await {
            Ok(_) => Ok(()),
            Err(error) => match error.kind() {
                DeleteStreamErrorKind::JetStream(jetstream_error)
                    if jetstream_error.error_code() == ErrorCode::STREAM_NOT_FOUND =>
                {
                    Err(BrokerError::NotFound)
                }
                _ => Err(rejected(error)),
            },
        }
    }

    #[instrument(skip(self))]
    async fn stream_info(&self, name: &str) -> Result<StreamInfo, BrokerError> {
        // Looking a stream up fetches its info, so the cached copy is fresh.
        match self.jetstream.get_stream(name).await {
            Ok(stream) => Ok(from_nats_info(stream.cached_info())),
            Err(error) => match error.kind() {
                GetStreamErrorKind::JetStream(jetstream_error)
                    if jetstream_error.error_code() == ErrorCode::STREAM_NOT_FOUND =>
                {
                    Err(BrokerError::NotFound)
                }
                _ => Err(rejected(error)),
            },
        }
    }

    async fn drain(&self) -> Result<(), BrokerError> {
        self.client.drain().await.map_err(rejected)
    }
}
