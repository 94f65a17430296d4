//! Broker-agnostic messaging client core: connection lifecycle, durable stream
//! provisioning and JSON publish/subscribe.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Stream administration (create-or-update, delete, info).
pub mod admin;

/// Traits implemented by concrete broker bindings.
pub mod broker;

/// JSON payload encoding.
pub mod codec;

/// Client configuration.
pub mod config;

/// Envelopes carried over the wire.
pub mod envelope;

/// Per-listener event channels.
pub mod events;

/// Publish and subscribe on top of the connection manager.
pub mod gateway;

/// Connection lifecycle.
pub mod manager;

/// Hand-off of callbacks to a designated thread.
pub mod relay;

/// Connection state.
pub mod state;

/// Stream configuration and info.
pub mod stream;

pub use admin::{StreamAdmin, StreamError};
pub use broker::{Broker, BrokerConnection, BrokerError, BrokerSubscription, TransportEvent};
pub use codec::{DecodeError, EncodeError};
pub use config::{ClientConfig, ConnectionConfig};
pub use envelope::Envelope;
pub use events::{EventBus, Listener};
pub use gateway::{Gateway, PublishError, PublishReceipt, SubscribeError, SubscriptionHandle};
pub use manager::{ConnectionError, ConnectionManager, ManagementHandle};
pub use relay::{InlineRelay, Relay, ThreadRelay};
pub use state::ConnectionState;
pub use stream::{DiscardPolicy, RetentionPolicy, StorageType, StreamConfig, StreamInfo};
