use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::thread::{self, ThreadId};

use tracing::warn;

/// A unit of work handed to a [`Relay`].
pub type Action = Box<dyn FnOnce() + Send + 'static>;

/// Moves work onto a designated thread. Broker callbacks (message delivery,
/// background connect completion) run through one of these so hosts with a
/// single UI or game thread can decide where results land.
pub trait Relay: Send + Sync + 'static {
    /// Runs `action` now if called on the designated thread, otherwise queues it
    /// for the thread's owner.
    fn enqueue(&self, action: Action);

    /// Runs `action` on the designated thread and blocks until it has finished.
    /// Never call this from an async task on a runtime worker.
    fn execute_sync(&self, action: Action);
}

/// Treats every thread as designated: actions run inline on the calling thread.
#[derive(Clone, Copy, Debug, Default)]
pub struct InlineRelay;

impl Relay for InlineRelay {
    fn enqueue(&self, action: Action) {
        action();
    }

    fn execute_sync(&self, action: Action) {
        action();
    }
}

/// Relay bound to the thread that created it. Other threads queue work which
/// the owner runs by calling [`ThreadRelay::run_pending`], e.g. once per frame.
pub struct ThreadRelay {
    designated: ThreadId,
    receiver: flume::Receiver<Action>,
    sender: flume::Sender<Action>,
}

impl ThreadRelay {
    /// Creates a relay whose designated thread is the current one.
    #[must_use]
    pub fn new() -> Self {
        let (sender, receiver) = flume::unbounded();

        Self {
            designated: thread::current().id(),
            receiver,
            sender,
        }
    }

    /// Whether the caller is on the designated thread.
    #[must_use]
    pub fn is_designated_thread(&self) -> bool {
        thread::current().id() == self.designated
    }

    /// Runs every queued action in FIFO order and returns how many ran.
    /// Does nothing off the designated thread.
    pub fn run_pending(&self) -> usize {
        if !self.is_designated_thread() {
            warn!("run_pending called off the designated thread");
            return 0;
        }

        let mut ran = 0;
        while let Ok(action) = self.receiver.try_recv() {
            action();
            ran += 1;
        }

        ran
    }

    /// Number of actions waiting for the owner.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.receiver.len()
    }
}

impl Default for ThreadRelay {
    fn default() -> Self {
        Self::new()
    }
}

impl Debug for ThreadRelay {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("ThreadRelay")
            .field("designated", &self.designated)
            .field("pending", &self.pending())
            .finish()
    }
}

impl Relay for ThreadRelay {
    fn enqueue(&self, action: Action) {
        if self.is_designated_thread() {
            action();
            return;
        }

        // Both ends live in `self`, so the channel cannot be disconnected.
        let _ = self.sender.send(action);
    }

    fn execute_sync(&self, action: Action) {
        if self.is_designated_thread() {
            action();
            return;
        }

        let (done_sender, done_receiver) = flume::bounded(1);
        let _ = self.sender.send(Box::new(move || {
            action();
            let _ = done_sender.send(());
        }));

        let _ = done_receiver.recv();
    }
}
