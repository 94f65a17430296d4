//! Shared fixtures for the in-memory broker tests.

#![allow(dead_code)]

use std::time::Duration;

use proven_courier::{ConnectionConfig, ConnectionManager, Listener, StreamConfig};
use proven_courier_memory::MemoryBroker;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::timeout;

/// How long a test waits for something that should happen promptly.
pub const PROMPT: Duration = Duration::from_secs(1);

/// Payload used by the round-trip scenarios.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
pub struct Example {
    pub id: String,
    pub content: String,
}

impl Example {
    pub fn hello() -> Self {
        Self {
            id: "x".to_string(),
            content: "hello".to_string(),
        }
    }
}

pub fn config() -> ConnectionConfig {
    ConnectionConfig::new("memory://local").with_connect_timeout(PROMPT)
}

pub fn best_effort_config() -> ConnectionConfig {
    config().with_durable_streaming(false)
}

pub fn evt_stream() -> StreamConfig {
    StreamConfig::new("evt", "evt.>")
}

pub async fn connected(
    broker: &MemoryBroker,
    config: ConnectionConfig,
) -> ConnectionManager<MemoryBroker> {
    let manager = ConnectionManager::new(broker.clone());
    manager.connect(config).await.expect("memory broker accepts connections");
    manager
}

pub async fn next_event(listener: &Listener<bool>) -> bool {
    timeout(PROMPT, listener.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event bus dropped")
}

pub async fn next_message<T>(receiver: &mut UnboundedReceiver<T>) -> T {
    timeout(PROMPT, receiver.recv())
        .await
        .expect("timed out waiting for message")
        .expect("handler dropped")
}

/// Asserts nothing arrives for a short while.
pub async fn assert_quiet<T: std::fmt::Debug>(receiver: &mut UnboundedReceiver<T>) {
    if let Ok(Some(message)) = timeout(Duration::from_millis(100), receiver.recv()).await {
        panic!("unexpected message: {message:?}");
    }
}
