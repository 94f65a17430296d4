use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

/// Fan-out of events to independent listeners. Each listener has its own
/// unbounded channel, so a slow listener never drops events or blocks others.
pub struct EventBus<T> {
    listeners: Arc<Mutex<Vec<flume::Sender<T>>>>,
}

impl<T> Clone for EventBus<T> {
    fn clone(&self) -> Self {
        Self {
            listeners: self.listeners.clone(),
        }
    }
}

impl<T> Debug for EventBus<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("EventBus")
            .field("listeners", &self.listeners.lock().len())
            .finish()
    }
}

impl<T> Default for EventBus<T> {
    fn default() -> Self {
        Self {
            listeners: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl<T> EventBus<T>
where
    T: Clone + Send + 'static,
{
    /// Creates a bus with no listeners.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a listener. It sees every event emitted from now on.
    #[must_use]
    pub fn listen(&self) -> Listener<T> {
        let (sender, receiver) = flume::unbounded();
        self.listeners.lock().push(sender);

        Listener { receiver }
    }

    /// Delivers `event` to every live listener, pruning dropped ones.
    pub fn emit(&self, event: T) {
        self.listeners
            .lock()
            .retain(|listener| listener.send(event.clone()).is_ok());
    }

    /// Number of registered listeners still alive.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        let mut listeners = self.listeners.lock();
        listeners.retain(|listener| !listener.is_disconnected());
        listeners.len()
    }
}

/// Receiving end of an [`EventBus`] registration. Dropping it unregisters.
#[derive(Debug)]
pub struct Listener<T> {
    receiver: flume::Receiver<T>,
}

impl<T> Listener<T> {
    /// Waits for the next event. `None` once the bus is gone.
    pub async fn recv(&self) -> Option<T> {
        self.receiver.recv_async().await.ok()
    }

    /// Returns the next event if one is already queued.
    #[must_use]
    pub fn try_recv(&self) -> Option<T> {
        self.receiver.try_recv().ok()
    }

    /// Blocks the current thread for up to `timeout`. For hosts without an async runtime.
    #[must_use]
    pub fn recv_blocking(&self, timeout: Duration) -> Option<T> {
        self.receiver.recv_timeout(timeout).ok()
    }

    /// Takes every queued event without waiting.
    #[must_use]
    pub fn drain(&self) -> Vec<T> {
        self.receiver.drain().collect()
    }

    /// Converts into a `futures::Stream` of events.
    pub fn into_stream(self) -> flume::r#async::RecvStream<'static, T> {
        self.receiver.into_stream()
    }
}

/// Stream of `StatusChanged(is_connected)` notifications.
pub type StatusEvents = Listener<bool>;

/// Stream of `SetupComplete(success)` notifications.
pub type SetupEvents = Listener<bool>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_each_listener_sees_every_event_in_order() {
        let bus = EventBus::new();
        let first = bus.listen();
        let second = bus.listen();

        bus.emit(true);
        bus.emit(false);
        bus.emit(true);

        assert_eq!(first.drain(), vec![true, false, true]);
        assert_eq!(second.drain(), vec![true, false, true]);
    }

    #[test]
    fn test_late_listener_only_sees_later_events() {
        let bus = EventBus::new();
        bus.emit(1);

        let listener = bus.listen();
        bus.emit(2);

        assert_eq!(listener.drain(), vec![2]);
    }

    #[test]
    fn test_dropped_listener_is_pruned() {
        let bus = EventBus::new();
        let kept = bus.listen();
        drop(bus.listen());

        bus.emit("event");

        assert_eq!(bus.listener_count(), 1);
        assert_eq!(kept.try_recv(), Some("event"));
    }

    #[tokio::test]
    async fn test_recv_ends_when_bus_dropped() {
        let bus = EventBus::<u8>::new();
        let listener = bus.listen();
        drop(bus);

        assert_eq!(listener.recv().await, None);
    }
}
