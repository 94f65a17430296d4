mod error;

pub use error::StreamError;

use crate::broker::{Broker, BrokerConnection, BrokerError};
use crate::events::{EventBus, SetupEvents};
use crate::manager::ConnectionManager;
use crate::stream::{StreamConfig, StreamInfo};

use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

/// Provisions and inspects durable streams over the manager's live connection.
///
/// Holds one default stream, typically the one described by
/// [`crate::ClientConfig::default_stream`], which [`Self::watch_connection`]
/// keeps provisioned across reconnects.
pub struct StreamAdmin<B>
where
    B: Broker,
{
    manager: ConnectionManager<B>,
    default_stream: StreamConfig,
    setup: Arc<AtomicBool>,
    setup_events: EventBus<bool>,
}

impl<B> Clone for StreamAdmin<B>
where
    B: Broker,
{
    fn clone(&self) -> Self {
        Self {
            manager: self.manager.clone(),
            default_stream: self.default_stream.clone(),
            setup: self.setup.clone(),
            setup_events: self.setup_events.clone(),
        }
    }
}

impl<B> Debug for StreamAdmin<B>
where
    B: Broker,
{
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("StreamAdmin")
            .field("default_stream", &self.default_stream.name)
            .field("is_setup", &self.is_setup())
            .finish_non_exhaustive()
    }
}

impl<B> StreamAdmin<B>
where
    B: Broker,
{
    /// Creates an admin for `manager` with `default_stream` as its default.
    pub fn new(manager: ConnectionManager<B>, default_stream: StreamConfig) -> Self {
        Self {
            manager,
            default_stream,
            setup: Arc::new(AtomicBool::new(false)),
            setup_events: EventBus::new(),
        }
    }

    /// The default stream's configuration.
    pub const fn default_stream(&self) -> &StreamConfig {
        &self.default_stream
    }

    /// Whether the default stream was last ensured successfully and has not
    /// been deleted or lost to a disconnect since. Other streams never touch
    /// this flag.
    pub fn is_setup(&self) -> bool {
        self.setup.load(Ordering::SeqCst)
    }

    /// Registers a listener for `SetupComplete(success)` notifications. One is
    /// emitted per `ensure_stream` call.
    pub fn setup_events(&self) -> SetupEvents {
        self.setup_events.listen()
    }

    /// Creates the stream, or updates it in place if the name is already taken.
    ///
    /// # Errors
    ///
    /// - `StreamError::NotConnected` if there is no live connection, or it goes away mid-call.
    /// - `StreamError::BrokerRejected` if the broker refuses the create or the update.
    #[instrument(skip(self, config), fields(stream = %config.name))]
    pub async fn ensure_stream(&self, config: &StreamConfig) -> Result<StreamInfo, StreamError> {
        let result = self.create_or_update(config).await;
        let success = result.is_ok();

        if config.name == self.default_stream.name {
            self.setup.store(success, Ordering::SeqCst);
        }
        self.setup_events.emit(success);

        match &result {
            Ok(info) => info!(
                subjects = %info.config.subject_filter,
                max_messages_per_subject = info.config.max_messages_per_subject,
                "stream ready"
            ),
            Err(error) => warn!(%error, "failed to ensure stream"),
        }

        result
    }

    /// Removes a stream and its messages.
    ///
    /// # Errors
    ///
    /// - `StreamError::NotFound` if there is no such stream.
    /// - `StreamError::NotConnected` if there is no live connection.
    /// - `StreamError::BrokerRejected` for any other broker failure.
    #[instrument(skip(self))]
    pub async fn delete_stream(&self, name: &str) -> Result<(), StreamError> {
        let handle = self.manager.management_context()?;

        handle
            .run(handle.connection().delete_stream(name))
            .await
            .map_err(|error| stream_error(error, name))?;

        if name == self.default_stream.name {
            self.setup.store(false, Ordering::SeqCst);
        }

        info!("stream deleted");

        Ok(())
    }

    /// Queries the broker for the stream's current state.
    ///
    /// # Errors
    ///
    /// As [`Self::delete_stream`].
    #[instrument(skip(self))]
    pub async fn get_stream_info(&self, name: &str) -> Result<StreamInfo, StreamError> {
        let handle = self.manager.management_context()?;

        handle
            .run(handle.connection().stream_info(name))
            .await
            .map_err(|error| stream_error(error, name))
    }

    /// [`Self::ensure_stream`] for the default stream.
    ///
    /// # Errors
    ///
    /// As [`Self::ensure_stream`].
    pub async fn ensure_default_stream(&self) -> Result<StreamInfo, StreamError> {
        self.ensure_stream(&self.default_stream).await
    }

    /// [`Self::get_stream_info`] for the default stream.
    ///
    /// # Errors
    ///
    /// As [`Self::get_stream_info`].
    pub async fn default_stream_info(&self) -> Result<StreamInfo, StreamError> {
        self.get_stream_info(&self.default_stream.name).await
    }

    /// [`Self::delete_stream`] for the default stream.
    ///
    /// # Errors
    ///
    /// As [`Self::delete_stream`].
    pub async fn delete_default_stream(&self) -> Result<(), StreamError> {
        self.delete_stream(&self.default_stream.name).await
    }

    /// Keeps the default stream provisioned: ensures it now if connected and
    /// again after every reconnect, and clears the setup flag whenever the
    /// connection drops. Runs until the returned task is aborted.
    pub fn watch_connection(&self) -> JoinHandle<()> {
        let admin = self.clone();
        let status = self.manager.status_events();

        tokio::spawn(async move {
            if admin.manager.is_connected() {
                let _ = admin.ensure_default_stream().await;
            }

            while let Some(connected) = status.recv().await {
                if connected {
                    let _ = admin.ensure_default_stream().await;
                } else {
                    debug!(
                        stream = %admin.default_stream.name,
                        "connection lost, stream needs setup"
                    );
                    admin.setup.store(false, Ordering::SeqCst);
                }
            }
        })
    }

    async fn create_or_update(&self, config: &StreamConfig) -> Result<StreamInfo, StreamError> {
        let handle = self.manager.management_context()?;
        let connection = handle.connection();

        match handle.run(connection.create_stream(config)).await {
            Ok(info) => {
                debug!("stream created");
                Ok(info)
            }
            Err(BrokerError::AlreadyExists) => {
                debug!("stream name in use, updating");
                handle
                    .run(connection.update_stream(config))
                    .await
                    .map_err(|error| stream_error(error, &config.name))
            }
            Err(error) => Err(stream_error(error, &config.name)),
        }
    }
}

fn stream_error(error: BrokerError, name: &str) -> StreamError {
    match error {
        BrokerError::Disconnected => StreamError::NotConnected,
        BrokerError::NotFound => StreamError::NotFound(name.to_string()),
        BrokerError::Rejected(reason) => StreamError::BrokerRejected(reason),
        BrokerError::AlreadyExists => StreamError::BrokerRejected(error.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broker_errors_map_to_stream_errors() {
        assert_eq!(
            stream_error(BrokerError::NotFound, "evt"),
            StreamError::NotFound("evt".to_string())
        );
        assert_eq!(
            stream_error(BrokerError::Disconnected, "evt"),
            StreamError::NotConnected
        );
        assert!(matches!(
            stream_error(BrokerError::AlreadyExists, "evt"),
            StreamError::BrokerRejected(_)
        ));
    }
}
