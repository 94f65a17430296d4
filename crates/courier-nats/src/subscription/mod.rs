use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::pin::Pin;
use std::task::{Context, Poll};

use async_nats::Subscriber;
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use proven_courier::{BrokerError, BrokerSubscription, Envelope};
use tracing::debug;

/// Core NATS subscription yielding envelopes in receipt order.
pub struct NatsSubscription {
    subject: String,
    subscriber: Subscriber,
}

impl NatsSubscription {
    pub(crate) const fn new(subject: String, subscriber: Subscriber) -> Self {
        Self {
            subject,
            subscriber,
        }
    }
}

impl Debug for NatsSubscription {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("NatsSubscription")
            .field("subject", &self.subject)
            .finish_non_exhaustive()
    }
}

impl Stream for NatsSubscription {
    type Item = Envelope;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.subscriber.poll_next_unpin(cx).map(|message| {
            message.map(|message| Envelope::new(message.subject.to_string(), message.payload))
        })
    }
}

#[async_trait]
impl BrokerSubscription for NatsSubscription {
    async fn unsubscribe(&mut self) -> Result<(), BrokerError> {
        self.subscriber
            .unsubscribe()
            .await
            .map_err(|e| BrokerError::Rejected(e.to_string()))?;

        debug!(subject = %self.subject, "unsubscribed");

        Ok(())
    }
}
