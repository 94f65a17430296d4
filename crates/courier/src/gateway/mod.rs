mod error;

pub use error::{PublishError, SubscribeError};

use crate::broker::{Broker, BrokerConnection, BrokerError, BrokerSubscription};
use crate::codec::{self, DecodeError};
use crate::envelope::Envelope;
use crate::manager::{ConnectionManager, ManagementHandle, UnsubscribeReply};
use crate::relay::{InlineRelay, Relay};

use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::sync::Arc;

use bytes::Bytes;
use futures::StreamExt;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// Callback invoked once per received envelope.
pub type EnvelopeHandler = Arc<dyn Fn(Envelope) + Send + Sync + 'static>;

/// Which path a publish took.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PublishReceipt {
    /// Handed to the broker client with no delivery guarantee.
    BestEffort,

    /// Stored and acknowledged by a stream.
    Durable {
        /// Stream that stored the message.
        stream: String,

        /// Sequence number assigned by the stream.
        sequence: u64,
    },
}

impl PublishReceipt {
    /// Whether the message was acknowledged by a stream.
    #[must_use]
    pub const fn is_durable(&self) -> bool {
        matches!(self, Self::Durable { .. })
    }
}

/// Identifies a subscription created through a [`Gateway`].
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    id: u64,
    subject: String,
}

impl SubscriptionHandle {
    /// The subject (or pattern) subscribed to.
    #[must_use]
    pub fn subject(&self) -> &str {
        &self.subject
    }
}

/// Publish and subscribe over the manager's live connection.
///
/// Subscriptions are not re-established after a reconnect. Owners that need
/// them should listen to `StatusChanged(true)` and subscribe again.
pub struct Gateway<B>
where
    B: Broker,
{
    manager: ConnectionManager<B>,
    relay: Arc<dyn Relay>,
}

impl<B> Clone for Gateway<B>
where
    B: Broker,
{
    fn clone(&self) -> Self {
        Self {
            manager: self.manager.clone(),
            relay: self.relay.clone(),
        }
    }
}

impl<B> Debug for Gateway<B>
where
    B: Broker,
{
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("Gateway")
            .field("manager", &self.manager)
            .finish_non_exhaustive()
    }
}

impl<B> Gateway<B>
where
    B: Broker,
{
    /// Creates a gateway that runs handlers inline on the delivery task.
    pub fn new(manager: ConnectionManager<B>) -> Self {
        Self::with_relay(manager, Arc::new(InlineRelay))
    }

    /// Creates a gateway that hands every delivery to `relay`.
    pub fn with_relay(manager: ConnectionManager<B>, relay: Arc<dyn Relay>) -> Self {
        Self { manager, relay }
    }

    /// The manager this gateway routes through.
    pub const fn manager(&self) -> &ConnectionManager<B> {
        &self.manager
    }

    /// Encodes `payload` as JSON and publishes it on `subject`.
    ///
    /// Goes through the stream context when durable streaming is configured and
    /// available; the receipt says which path was taken.
    ///
    /// # Errors
    ///
    /// - `PublishError::NotConnected` if there is no live connection. The broker is not touched.
    /// - `PublishError::SerializationFailure` if the payload cannot be encoded.
    /// - `PublishError::BrokerRejected` if the broker refuses the message.
    pub async fn publish<T>(
        &self,
        subject: impl Into<String>,
        payload: &T,
    ) -> Result<PublishReceipt, PublishError>
    where
        T: Serialize + ?Sized,
    {
        let handle = self.manager.management_context()?;
        let bytes = codec::encode(payload)?;

        Self::send(&handle, subject.into(), bytes).await
    }

    /// Publishes an already encoded payload.
    ///
    /// # Errors
    ///
    /// As [`Self::publish`], minus encoding failures.
    pub async fn publish_bytes(
        &self,
        subject: impl Into<String>,
        payload: Bytes,
    ) -> Result<PublishReceipt, PublishError> {
        let handle = self.manager.management_context()?;

        Self::send(&handle, subject.into(), payload).await
    }

    /// Registers `handler` for every message on `subject`. Messages are
    /// delivered one at a time in receipt order through the gateway's relay.
    ///
    /// # Errors
    ///
    /// - `SubscribeError::NotConnected` if there is no live connection.
    /// - `SubscribeError::BrokerRejected` if the broker refuses the subscription.
    pub async fn subscribe<F>(
        &self,
        subject: impl Into<String>,
        handler: F,
    ) -> Result<SubscriptionHandle, SubscribeError>
    where
        F: Fn(Envelope) + Send + Sync + 'static,
    {
        self.subscribe_handler(subject.into(), Arc::new(handler))
            .await
    }

    /// Like [`Self::subscribe`], decoding each message as JSON first. A message
    /// that fails to decode is passed to the handler as an error and delivery
    /// carries on with the next one.
    ///
    /// # Errors
    ///
    /// As [`Self::subscribe`].
    pub async fn subscribe_json<T, F>(
        &self,
        subject: impl Into<String>,
        handler: F,
    ) -> Result<SubscriptionHandle, SubscribeError>
    where
        T: DeserializeOwned + Send + 'static,
        F: Fn(Result<T, DecodeError>) + Send + Sync + 'static,
    {
        self.subscribe(subject, move |envelope: Envelope| {
            let decoded = envelope.decode::<T>();
            if let Err(error) = &decoded {
                warn!(subject = %envelope.subject, %error, "received undecodable message");
            }
            handler(decoded);
        })
        .await
    }

    /// Stops a subscription. Unsubscribing twice, or after a disconnect, succeeds.
    ///
    /// # Errors
    ///
    /// Returns `SubscribeError::BrokerRejected` if the broker refuses the unsubscribe.
    pub async fn unsubscribe(&self, handle: &SubscriptionHandle) -> Result<(), SubscribeError> {
        let Some(stop) = self.manager.take_subscription(handle.id) else {
            debug!(subject = %handle.subject, "already unsubscribed");
            return Ok(());
        };

        let (reply, result) = oneshot::channel();
        if stop.send(Some(reply)).is_err() {
            return Ok(());
        }

        match result.await {
            Ok(Ok(()) | Err(BrokerError::Disconnected)) | Err(_) => {
                debug!(subject = %handle.subject, "unsubscribed");
                Ok(())
            }
            Ok(Err(error)) => Err(SubscribeError::BrokerRejected(error.to_string())),
        }
    }

    async fn send(
        handle: &ManagementHandle<B::Connection>,
        subject: String,
        payload: Bytes,
    ) -> Result<PublishReceipt, PublishError> {
        let connection = handle.connection();

        if handle.durable() {
            let ack = handle
                .run_publish(connection.publish_durable(subject.clone(), payload))
                .await
                .map_err(publish_error)?;

            debug!(%subject, stream = %ack.stream, sequence = ack.sequence, "published durably");

            Ok(PublishReceipt::Durable {
                stream: ack.stream,
                sequence: ack.sequence,
            })
        } else {
            handle
                .run_publish(connection.publish(subject.clone(), payload))
                .await
                .map_err(publish_error)?;

            debug!(%subject, "published");

            Ok(PublishReceipt::BestEffort)
        }
    }

    async fn subscribe_handler(
        &self,
        subject: String,
        handler: EnvelopeHandler,
    ) -> Result<SubscriptionHandle, SubscribeError> {
        let handle = self.manager.management_context()?;

        let mut subscription = handle
            .run(handle.connection().subscribe(subject.clone()))
            .await
            .map_err(subscribe_error)?;

        let (stop, mut stopped) = oneshot::channel::<Option<UnsubscribeReply>>();
        let id = self
            .manager
            .register_subscription(handle.epoch(), &subject, stop)?;

        let relay = self.relay.clone();
        let task_subject = subject.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    stop = &mut stopped => {
                        let result = subscription.unsubscribe().await;
                        if let Ok(Some(reply)) = stop {
                            let _ = reply.send(result);
                        }
                        break;
                    }
                    next = subscription.next() => {
                        let Some(envelope) = next else {
                            debug!(subject = %task_subject, "subscription ended");
                            break;
                        };

                        let handler = handler.clone();
                        relay.enqueue(Box::new(move || handler(envelope)));
                    }
                }
            }
        });

        debug!(%subject, id, "subscribed");

        Ok(SubscriptionHandle { id, subject })
    }
}

fn publish_error(error: BrokerError) -> PublishError {
    match error {
        BrokerError::Disconnected => PublishError::NotConnected,
        BrokerError::Rejected(reason) => PublishError::BrokerRejected(reason),
        other => PublishError::BrokerRejected(other.to_string()),
    }
}

fn subscribe_error(error: BrokerError) -> SubscribeError {
    match error {
        BrokerError::Disconnected => SubscribeError::NotConnected,
        BrokerError::Rejected(reason) => SubscribeError::BrokerRejected(reason),
        other => SubscribeError::BrokerRejected(other.to_string()),
    }
}
