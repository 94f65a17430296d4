use serde::{Deserialize, Serialize};

/// Where the broker keeps a stream's messages.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageType {
    /// Held in broker memory; lost on broker restart.
    #[default]
    Memory,

    /// Persisted to the broker's disk.
    Disk,
}

/// When the broker may drop messages from a stream.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RetentionPolicy {
    /// Kept until a configured limit is hit.
    #[default]
    Limits,

    /// Kept while there are consumers interested in them.
    Interest,

    /// Removed once acknowledged by a consumer.
    WorkQueue,
}

/// Which messages are refused or evicted once a limit is reached.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscardPolicy {
    /// Evict the oldest messages to make room.
    #[default]
    Old,

    /// Refuse new messages.
    New,
}

/// Configuration of a durable stream. `name` is the natural key.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct StreamConfig {
    /// Stream name.
    pub name: String,

    /// Subject pattern captured by the stream, e.g. `evt.>`.
    pub subject_filter: String,

    /// Storage backend.
    pub storage: StorageType,

    /// Retention policy.
    pub retention: RetentionPolicy,

    /// Per-subject message cap. Zero or negative means unlimited.
    pub max_messages_per_subject: i64,

    /// Discard policy once a limit is reached.
    pub discard_policy: DiscardPolicy,
}

impl StreamConfig {
    /// Creates a memory-backed, limits-retained stream keeping 10 000 messages per subject.
    pub fn new(name: impl Into<String>, subject_filter: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            subject_filter: subject_filter.into(),
            storage: StorageType::default(),
            retention: RetentionPolicy::default(),
            max_messages_per_subject: 10_000,
            discard_policy: DiscardPolicy::default(),
        }
    }

    /// Sets the storage backend.
    #[must_use]
    pub const fn with_storage(mut self, storage: StorageType) -> Self {
        self.storage = storage;
        self
    }

    /// Sets the retention policy.
    #[must_use]
    pub const fn with_retention(mut self, retention: RetentionPolicy) -> Self {
        self.retention = retention;
        self
    }

    /// Sets the per-subject message cap.
    #[must_use]
    pub const fn with_max_messages_per_subject(mut self, max_messages_per_subject: i64) -> Self {
        self.max_messages_per_subject = max_messages_per_subject;
        self
    }

    /// Sets the discard policy.
    #[must_use]
    pub const fn with_discard_policy(mut self, discard_policy: DiscardPolicy) -> Self {
        self.discard_policy = discard_policy;
        self
    }
}

/// Point-in-time snapshot of a stream as reported by the broker.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StreamInfo {
    /// The configuration the broker is applying.
    pub config: StreamConfig,

    /// Messages currently held.
    pub message_count: u64,

    /// Bytes currently held.
    pub byte_count: u64,

    /// Attached consumers.
    pub consumer_count: u32,
}
