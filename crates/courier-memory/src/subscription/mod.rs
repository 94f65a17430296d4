use crate::MemoryBroker;

use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures::Stream;
use proven_courier::{BrokerError, BrokerSubscription, Envelope};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

/// Messages matching one subscription, in publish order.
pub struct MemorySubscription {
    id: u64,
    broker: MemoryBroker,
    receiver: UnboundedReceiverStream<Envelope>,
}

impl MemorySubscription {
    pub(crate) fn new(
        id: u64,
        broker: MemoryBroker,
        receiver: mpsc::UnboundedReceiver<Envelope>,
    ) -> Self {
        Self {
            id,
            broker,
            receiver: UnboundedReceiverStream::new(receiver),
        }
    }
}

impl Debug for MemorySubscription {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("MemorySubscription")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

impl Stream for MemorySubscription {
    type Item = Envelope;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.receiver).poll_next(cx)
    }
}

#[async_trait]
impl BrokerSubscription for MemorySubscription {
    async fn unsubscribe(&mut self) -> Result<(), BrokerError> {
        self.broker
            .state
            .lock()
            .subscribers
            .retain(|subscriber| subscriber.id != self.id);
        self.receiver.close();

        Ok(())
    }
}

impl Drop for MemorySubscription {
    fn drop(&mut self) {
        self.broker
            .state
            .lock()
            .subscribers
            .retain(|subscriber| subscriber.id != self.id);
    }
}
