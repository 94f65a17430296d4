use crate::stream::StreamConfig;

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default broker endpoint.
pub const DEFAULT_URL: &str = "nats://localhost:4222";

/// Default time allowed for a connection attempt.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Settings for a single connection attempt. Cloned by the manager when an
/// attempt starts, so later edits never affect a live connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Broker endpoint, e.g. `nats://localhost:4222`.
    pub url: String,

    /// Upper bound on how long `connect` may take, retries included.
    pub connect_timeout: Duration,

    /// Publish through the broker's stream context (acknowledged) when available.
    pub use_durable_streaming: bool,
}

impl ConnectionConfig {
    /// Creates a config for `url` with default timeout and durable streaming enabled.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// Sets the connect timeout.
    #[must_use]
    pub const fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    /// Enables or disables publishing through the stream context.
    #[must_use]
    pub const fn with_durable_streaming(mut self, use_durable_streaming: bool) -> Self {
        self.use_durable_streaming = use_durable_streaming;
        self
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.to_string(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            use_durable_streaming: true,
        }
    }
}

/// Every option a host can set, in the shape it is usually loaded from a
/// config file. Missing fields take their defaults.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ClientConfig {
    /// Broker endpoint.
    pub url: String,

    /// Whether [`ConnectionManager::start`](crate::ConnectionManager::start)
    /// connects right away.
    pub connect_on_start: bool,

    /// Publish through the stream context when available.
    pub use_durable_streaming: bool,

    /// Name of the default stream provisioned by [`crate::StreamAdmin`].
    pub stream_name: String,

    /// Subject pattern captured by the default stream.
    pub subject_filter: String,

    /// Per-subject message cap of the default stream.
    pub max_messages_per_subject: i64,

    /// Connect timeout in milliseconds.
    pub connect_timeout_ms: u64,
}

impl ClientConfig {
    /// Parses a JSON document, filling in defaults for absent fields.
    ///
    /// # Errors
    ///
    /// Returns the parser error if the document is not valid JSON or a field has the wrong type.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// The connection settings described by this config.
    #[must_use]
    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            url: self.url.clone(),
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            use_durable_streaming: self.use_durable_streaming,
        }
    }

    /// The default stream described by this config.
    #[must_use]
    pub fn default_stream(&self) -> StreamConfig {
        StreamConfig::new(self.stream_name.clone(), self.subject_filter.clone())
            .with_max_messages_per_subject(self.max_messages_per_subject)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.to_string(),
            connect_on_start: true,
            use_durable_streaming: true,
            stream_name: "deepthought_events".to_string(),
            subject_filter: "dtr.>".to_string(),
            max_messages_per_subject: 10_000,
            #[allow(clippy::cast_possible_truncation)]
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT.as_millis() as u64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::{DiscardPolicy, RetentionPolicy, StorageType};

    #[test]
    fn test_partial_document_keeps_defaults() {
        let config =
            ClientConfig::from_json(r#"{"url": "nats://broker:4222", "streamName": "evt"}"#)
                .expect("valid config");

        assert_eq!(config.url, "nats://broker:4222");
        assert_eq!(config.stream_name, "evt");
        assert_eq!(config.subject_filter, "dtr.>");
        assert!(config.connect_on_start);
        assert_eq!(config.connect_timeout_ms, 5000);
    }

    #[test]
    fn test_derived_configs() {
        let config = ClientConfig {
            max_messages_per_subject: 42,
            connect_timeout_ms: 1000,
            use_durable_streaming: false,
            ..ClientConfig::default()
        };

        let connection = config.connection_config();
        assert_eq!(connection.connect_timeout, Duration::from_secs(1));
        assert!(!connection.use_durable_streaming);

        let stream = config.default_stream();
        assert_eq!(stream.name, "deepthought_events");
        assert_eq!(stream.subject_filter, "dtr.>");
        assert_eq!(stream.max_messages_per_subject, 42);
        assert_eq!(stream.storage, StorageType::Memory);
        assert_eq!(stream.retention, RetentionPolicy::Limits);
        assert_eq!(stream.discard_policy, DiscardPolicy::Old);
    }

    #[test]
    fn test_wrong_field_type_is_rejected() {
        assert!(ClientConfig::from_json(r#"{"connectTimeoutMs": "soon"}"#).is_err());
    }
}
