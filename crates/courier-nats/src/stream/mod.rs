use async_nats::jetstream::stream::{
    Config as NatsStreamConfig, DiscardPolicy as NatsDiscardPolicy, Info as NatsStreamInfo,
    RetentionPolicy as NatsRetentionPolicy, StorageType as NatsStorageType,
};
use proven_courier::{DiscardPolicy, RetentionPolicy, StorageType, StreamConfig, StreamInfo};

pub fn to_nats_config(config: &StreamConfig) -> NatsStreamConfig {
    NatsStreamConfig {
        name: config.name.clone(),
        subjects: vec![config.subject_filter.clone()],
        storage: match config.storage {
            StorageType::Memory => NatsStorageType::Memory,
            StorageType::Disk => NatsStorageType::File,
        },
        retention: match config.retention {
            RetentionPolicy::Limits => NatsRetentionPolicy::Limits,
            RetentionPolicy::Interest => NatsRetentionPolicy::Interest,
            RetentionPolicy::WorkQueue => NatsRetentionPolicy::WorkQueue,
        },
        max_messages_per_subject: config.max_messages_per_subject,
        discard: match config.discard_policy {
            DiscardPolicy::Old => NatsDiscardPolicy::Old,
            DiscardPolicy::New => NatsDiscardPolicy::New,
        },
        ..Default::default()
    }
}

// Streams created elsewhere may capture several subjects; they are reported comma separated.
pub fn from_nats_info(info: &NatsStreamInfo) -> StreamInfo {
    let config = &info.config;

    StreamInfo {
        config: StreamConfig {
            name: config.name.clone(),
            subject_filter: config.subjects.join(","),
            storage: match config.storage {
                NatsStorageType::Memory => StorageType::Memory,
                NatsStorageType::File => StorageType::Disk,
            },
            retention: match config.retention {
                NatsRetentionPolicy::Limits => RetentionPolicy::Limits,
                NatsRetentionPolicy::Interest => RetentionPolicy::Interest,
                NatsRetentionPolicy::WorkQueue => RetentionPolicy::WorkQueue,
            },
            max_messages_per_subject: config.max_messages_per_subject,
            discard_policy: match config.discard {
                NatsDiscardPolicy::Old => DiscardPolicy::Old,
                NatsDiscardPolicy::New => DiscardPolicy::New,
            },
        },
        message_count: info.state.messages,
        byte_count: info.state.bytes,
        consumer_count: u32::try_from(info.state.consumer_count).unwrap_or(u32::MAX),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_maps_every_field() {
        let config = StreamConfig::new("evt", "evt.>")
            .with_storage(StorageType::Disk)
            .with_retention(RetentionPolicy::WorkQueue)
            .with_max_messages_per_subject(5000)
            .with_discard_policy(DiscardPolicy::New);

        let nats = to_nats_config(&config);

        assert_eq!(nats.name, "evt");
        assert_eq!(nats.subjects, vec!["evt.>".to_string()]);
        assert_eq!(nats.storage, NatsStorageType::File);
        assert_eq!(nats.retention, NatsRetentionPolicy::WorkQueue);
        assert_eq!(nats.max_messages_per_subject, 5000);
        assert_eq!(nats.discard, NatsDiscardPolicy::New);
    }

    #[test]
    fn test_defaults_map_to_memory_limits_old() {
        let nats = to_nats_config(&StreamConfig::new("evt", "evt.>"));

        assert_eq!(nats.storage, NatsStorageType::Memory);
        assert_eq!(nats.retention, NatsRetentionPolicy::Limits);
        assert_eq!(nats.discard, NatsDiscardPolicy::Old);
        assert_eq!(nats.max_messages_per_subject, 10_000);
    }
}
