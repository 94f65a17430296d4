use crate::subscription::MemorySubscription;
use crate::{BrokerState, MemoryBroker, StoredStream, SubscriberSlot, stream_for_subject};

use std::collections::BTreeSet;

use async_trait::async_trait;
use bytes::Bytes;
use proven_courier::broker::DurableAck;
use proven_courier::{
    BrokerConnection, BrokerError, DiscardPolicy, Envelope, StreamConfig, StreamInfo,
};
use tokio::sync::mpsc;
use tracing::debug;

/// A connection to a [`MemoryBroker`].
#[derive(Clone, Debug)]
pub struct MemoryConnection {
    id: u64,
    broker: MemoryBroker,
    stream_context: bool,
}

impl MemoryConnection {
    pub(crate) const fn new(id: u64, broker: MemoryBroker, stream_context: bool) -> Self {
        Self {
            id,
            broker,
            stream_context,
        }
    }

    /// Identifier assigned by the broker.
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    fn with_state<T, F>(&self, operation: F) -> Result<T, BrokerError>
    where
        F: FnOnce(&mut BrokerState) -> Result<T, BrokerError>,
    {
        let mut state = self.broker.state.lock();
        state.operations += 1;

        if !state.connection_online(self.id) {
            return Err(BrokerError::Disconnected);
        }

        operation(&mut *state)
    }
}

fn store(stream: &mut StoredStream, envelope: &Envelope) -> Result<u64, BrokerError> {
    // Zero and negative limits mean unlimited, as in JetStream.
    let limit = usize::try_from(stream.config.max_messages_per_subject)
        .ok()
        .filter(|limit| *limit > 0);

    if let Some(limit) = limit {
        let held = stream
            .messages
            .iter()
            .filter(|message| message.subject == envelope.subject)
            .count();

        if held >= limit {
            match stream.config.discard_policy {
                DiscardPolicy::New => {
                    return Err(BrokerError::Rejected(
                        "maximum messages per subject exceeded".to_string(),
                    ));
                }
                DiscardPolicy::Old => {
                    stream.trim_subject(&envelope.subject, limit - 1);
                }
            }
        }
    }

    stream.last_sequence += 1;
    stream.messages.push_back(envelope.clone());

    Ok(stream.last_sequence)
}

fn check_overlap(state: &BrokerState, config: &StreamConfig) -> Result<(), BrokerError> {
    let overlapping = state.streams.values().any(|stream| {
        stream.config.name != config.name
            && crate::subject::overlaps(&stream.config.subject_filter, &config.subject_filter)
    });

    if overlapping {
        return Err(BrokerError::Rejected(
            "subjects overlap with an existing stream".to_string(),
        ));
    }

    Ok(())
}

#[async_trait]
impl BrokerConnection for MemoryConnection {
    type Subscription = MemorySubscription;

    fn has_stream_context(&self) -> bool {
        self.stream_context
    }

    async fn publish(&self, subject: String, payload: Bytes) -> Result<(), BrokerError> {
        self.with_state(|state| {
            let envelope = Envelope::new(subject, payload);

            // Core publishes are captured by streams too, limits permitting.
            if let Some(stream) = stream_for_subject(&mut state.streams, &envelope.subject) {
                let _ = store(stream, &envelope);
            }

            state.deliver(&envelope);

            Ok(())
        })
    }

    async fn publish_durable(
        &self,
        subject: String,
        payload: Bytes,
    ) -> Result<DurableAck, BrokerError> {
        if !self.stream_context {
            return Err(BrokerError::Rejected(
                "stream context unavailable".to_string(),
            ));
        }

        let (ack, delay) = self.with_state(|state| {
            let envelope = Envelope::new(subject, payload);

            let stream = stream_for_subject(&mut state.streams, &envelope.subject).ok_or_else(
                || BrokerError::Rejected("no responders available for request".to_string()),
            )?;

            let sequence = store(stream, &envelope)?;
            let ack = DurableAck {
                stream: stream.config.name.clone(),
                sequence,
            };

            state.deliver(&envelope);

            Ok((ack, state.ack_delay))
        })?;

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        Ok(ack)
    }

    async fn subscribe(&self, subject: String) -> Result<Self::Subscription, BrokerError> {
        self.with_state(|state| {
            state.next_id += 1;
            let id = state.next_id;

            let (sender, receiver) = mpsc::unbounded_channel();
            state.subscribers.push(SubscriberSlot {
                id,
                connection_id: self.id,
                pattern: subject,
                sender,
            });

            Ok(MemorySubscription::new(id, self.broker.clone(), receiver))
        })
    }

    async fn create_stream(&self, config: &StreamConfig) -> Result<StreamInfo, BrokerError> {
        self.with_state(|state| {
            if let Some(existing) = state.streams.get(&config.name) {
                // Identical re-creation is accepted, like the real server does.
                return if existing.config == *config {
                    Ok(existing.info())
                } else {
                    Err(BrokerError::AlreadyExists)
                };
            }

            check_overlap(state, config)?;

            let stream = StoredStream::new(config.clone());
            let info = stream.info();
            state.streams.insert(config.name.clone(), stream);

            debug!(stream = %config.name, "created stream");

            Ok(info)
        })
    }

    async fn update_stream(&self, config: &StreamConfig) -> Result<StreamInfo, BrokerError> {
        self.with_state(|state| {
            check_overlap(state, config)?;

            let stream = state
                .streams
                .get_mut(&config.name)
                .ok_or(BrokerError::NotFound)?;

            if stream.config.storage != config.storage {
                return Err(BrokerError::Rejected(
                    "stream configuration update can not change storage type".to_string(),
                ));
            }

            stream.config = config.clone();

            if let Ok(limit) = usize::try_from(config.max_messages_per_subject) {
                let subjects: BTreeSet<String> = stream
                    .messages
                    .iter()
                    .map(|message| message.subject.clone())
                    .collect();

                for subject in subjects {
                    stream.trim_subject(&subject, limit);
                }
            }

            debug!(stream = %config.name, "updated stream");

            Ok(stream.info())
        })
    }

    async fn delete_stream(&self, name: &str) -> Result<(), BrokerError> {
        self.with_state(|state| {
            state.streams.remove(name).ok_or(BrokerError::NotFound)?;
            debug!(stream = %name, "deleted stream");

            Ok(())
        })
    }

    async fn stream_info(&self, name: &str) -> Result<StreamInfo, BrokerError> {
        self.with_state(|state| {
            state
                .streams
                .get(name)
                .map(StoredStream::info)
                .ok_or(BrokerError::NotFound)
        })
    }

    async fn drain(&self) -> Result<(), BrokerError> {
        self.broker.state.lock().remove_connection(self.id);
        debug!(id = self.id, "drained connection");

        Ok(())
    }
}
