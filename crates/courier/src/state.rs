use std::fmt::{Display, Formatter, Result as FmtResult};

/// Lifecycle state of the broker connection owned by a [`crate::ConnectionManager`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection has been established yet, or the last attempt failed.
    #[default]
    Disconnected,

    /// A connection attempt is in progress.
    Connecting,

    /// The connection is live.
    Connected,

    /// The transport dropped and the broker client is re-establishing it.
    Reconnecting,

    /// The connection was closed, either explicitly or by the broker.
    Closed,
}

impl Display for ConnectionState {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Closed => "closed",
        };

        f.write_str(name)
    }
}
