//! Publish and subscribe against the in-memory broker.

mod common;

#[cfg(test)]
mod gateway_tests {
    use super::common::{
        Example, PROMPT, assert_quiet, best_effort_config, config, connected, next_message,
    };

    use std::collections::BTreeMap;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use bytes::Bytes;
    use proven_courier::{
        ConnectionManager, DecodeError, DiscardPolicy, Envelope, Gateway, PublishError,
        PublishReceipt, StreamAdmin, StreamConfig, SubscribeError, ThreadRelay,
    };
    use proven_courier_memory::MemoryBroker;
    use tokio::sync::mpsc;
    use tokio::time::{Instant, sleep};
    use tracing_test::traced_test;

    fn json_channel() -> (
        impl Fn(Result<Example, DecodeError>) + Send + Sync + 'static,
        mpsc::UnboundedReceiver<Result<Example, DecodeError>>,
    ) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (
            move |message: Result<Example, DecodeError>| {
                let _ = sender.send(message);
            },
            receiver,
        )
    }

    #[tokio::test]
    async fn test_publish_before_connect_never_touches_broker() {
        let broker = MemoryBroker::new();
        let gateway = Gateway::new(ConnectionManager::new(broker.clone()));

        let result = gateway.publish("dtr.example", &Example::hello()).await;

        assert_eq!(result, Err(PublishError::NotConnected));
        assert_eq!(broker.operations(), 0);
    }

    #[tokio::test]
    async fn test_subscribe_before_connect_fails() {
        let broker = MemoryBroker::new();
        let gateway = Gateway::new(ConnectionManager::new(broker.clone()));

        let result = gateway.subscribe("dtr.example", |_| {}).await;

        assert_eq!(result.unwrap_err(), SubscribeError::NotConnected);
        assert_eq!(broker.operations(), 0);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_round_trip_delivers_exactly_once() {
        let broker = MemoryBroker::new();
        let gateway = Gateway::new(connected(&broker, best_effort_config()).await);
        let (handler, mut received) = json_channel();

        gateway
            .subscribe_json("dtr.example", handler)
            .await
            .unwrap();

        let receipt = gateway
            .publish("dtr.example", &Example::hello())
            .await
            .unwrap();

        assert_eq!(receipt, PublishReceipt::BestEffort);
        assert_eq!(next_message(&mut received).await, Ok(Example::hello()));
        assert_quiet(&mut received).await;
    }

    #[tokio::test]
    #[traced_test]
    async fn test_durable_publish_is_acknowledged_by_stream() {
        let broker = MemoryBroker::new();
        let manager = connected(&broker, config()).await;
        let admin = StreamAdmin::new(
            manager.clone(),
            StreamConfig::new("deepthought_events", "dtr.>"),
        );
        let gateway = Gateway::new(manager);
        admin.ensure_default_stream().await.unwrap();

        let (handler, mut received) = json_channel();
        gateway.subscribe_json("dtr.example", handler).await.unwrap();

        let first = gateway.publish("dtr.example", &Example::hello()).await.unwrap();
        let second = gateway.publish("dtr.example", &Example::hello()).await.unwrap();

        assert_eq!(
            first,
            PublishReceipt::Durable {
                stream: "deepthought_events".to_string(),
                sequence: 1,
            }
        );
        assert_eq!(
            second,
            PublishReceipt::Durable {
                stream: "deepthought_events".to_string(),
                sequence: 2,
            }
        );
        assert_eq!(next_message(&mut received).await, Ok(Example::hello()));
        assert_eq!(next_message(&mut received).await, Ok(Example::hello()));
        assert_eq!(admin.default_stream_info().await.unwrap().message_count, 2);
    }

    #[tokio::test]
    async fn test_durable_publish_without_stream_is_rejected() {
        let broker = MemoryBroker::new();
        let gateway = Gateway::new(connected(&broker, config()).await);

        let result = gateway.publish("dtr.example", &Example::hello()).await;

        assert!(matches!(result, Err(PublishError::BrokerRejected(_))));
    }

    #[tokio::test]
    async fn test_falls_back_to_best_effort_without_stream_context() {
        let broker = MemoryBroker::without_stream_context();
        let gateway = Gateway::new(connected(&broker, config()).await);

        let receipt = gateway
            .publish("dtr.example", &Example::hello())
            .await
            .unwrap();

        assert!(!receipt.is_durable());
    }

    #[tokio::test]
    async fn test_unencodable_payload_is_reported() {
        let broker = MemoryBroker::new();
        let gateway = Gateway::new(connected(&broker, best_effort_config()).await);
        let operations = broker.operations();

        let mut payload = BTreeMap::new();
        payload.insert((1_u8, 2_u8), "tuple keys are not JSON object keys");

        let result = gateway.publish("dtr.example", &payload).await;

        assert!(matches!(result, Err(PublishError::SerializationFailure(_))));
        assert_eq!(broker.operations(), operations);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_malformed_message_does_not_stop_delivery() {
        let broker = MemoryBroker::new();
        let gateway = Gateway::new(connected(&broker, best_effort_config()).await);
        let (handler, mut received) = json_channel();

        gateway.subscribe_json("dtr.example", handler).await.unwrap();

        gateway
            .publish_bytes("dtr.example", Bytes::from_static(b"{not json"))
            .await
            .unwrap();
        gateway
            .publish_bytes("dtr.example", Bytes::from_static(br#"{"id":"x"}"#))
            .await
            .unwrap();
        gateway
            .publish("dtr.example", &Example::hello())
            .await
            .unwrap();

        assert!(matches!(
            next_message(&mut received).await,
            Err(DecodeError::Malformed(_))
        ));
        assert!(matches!(
            next_message(&mut received).await,
            Err(DecodeError::Malformed(_))
        ));
        assert_eq!(next_message(&mut received).await, Ok(Example::hello()));
    }

    #[tokio::test]
    async fn test_delivery_preserves_publish_order() {
        let broker = MemoryBroker::new();
        let gateway = Gateway::new(connected(&broker, best_effort_config()).await);
        let (sender, mut received) = mpsc::unbounded_channel();

        gateway
            .subscribe_json("dtr.counter", move |value: Result<u32, DecodeError>| {
                let _ = sender.send(value.unwrap());
            })
            .await
            .unwrap();

        for i in 0..50_u32 {
            gateway.publish("dtr.counter", &i).await.unwrap();
        }

        for expected in 0..50_u32 {
            assert_eq!(next_message(&mut received).await, expected);
        }
    }

    #[tokio::test]
    async fn test_wildcard_subscription() {
        let broker = MemoryBroker::new();
        let gateway = Gateway::new(connected(&broker, best_effort_config()).await);
        let (sender, mut received) = mpsc::unbounded_channel();

        gateway
            .subscribe("dtr.*", move |envelope: Envelope| {
                let _ = sender.send(envelope.subject);
            })
            .await
            .unwrap();

        gateway.publish("evt.a", &1).await.unwrap();
        gateway.publish("dtr.a", &1).await.unwrap();
        gateway.publish("dtr.a.b", &1).await.unwrap();
        gateway.publish("dtr.b", &1).await.unwrap();

        assert_eq!(next_message(&mut received).await, "dtr.a");
        assert_eq!(next_message(&mut received).await, "dtr.b");
        assert_quiet(&mut received).await;
    }

    #[tokio::test]
    #[traced_test]
    async fn test_unsubscribe_stops_delivery_and_is_idempotent() {
        let broker = MemoryBroker::new();
        let manager = connected(&broker, best_effort_config()).await;
        let gateway = Gateway::new(manager.clone());
        let (handler, mut received) = json_channel();

        let handle = gateway.subscribe_json("dtr.example", handler).await.unwrap();
        assert_eq!(handle.subject(), "dtr.example");
        assert_eq!(manager.active_subscriptions(), 1);
        assert_eq!(manager.subscribed_subjects(), vec!["dtr.example".to_string()]);

        gateway.unsubscribe(&handle).await.unwrap();
        gateway.unsubscribe(&handle).await.unwrap();

        assert_eq!(manager.active_subscriptions(), 0);
        assert_eq!(broker.subscriber_count(), 0);

        gateway.publish("dtr.example", &Example::hello()).await.unwrap();
        assert_quiet(&mut received).await;
    }

    #[tokio::test]
    #[traced_test]
    async fn test_disconnect_tears_down_subscriptions() {
        let broker = MemoryBroker::new();
        let manager = connected(&broker, best_effort_config()).await;
        let gateway = Gateway::new(manager.clone());
        let (handler, _received) = json_channel();

        let handle = gateway.subscribe_json("dtr.example", handler).await.unwrap();
        manager.disconnect().await;

        assert_eq!(manager.active_subscriptions(), 0);
        assert_eq!(broker.subscriber_count(), 0);
        assert_eq!(
            gateway.publish("dtr.example", &Example::hello()).await,
            Err(PublishError::NotConnected)
        );

        // Nothing left to stop.
        gateway.unsubscribe(&handle).await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_disconnect_during_concurrent_publishes() {
        let broker = MemoryBroker::new();
        let manager = connected(&broker, best_effort_config()).await;
        let gateway = Gateway::new(manager.clone());

        let publishers: Vec<_> = (0..8)
            .map(|_| {
                let gateway = gateway.clone();
                tokio::spawn(async move {
                    let mut outcomes = Vec::new();
                    for _ in 0..50 {
                        outcomes.push(gateway.publish("dtr.load", &Example::hello()).await);
                        tokio::task::yield_now().await;
                    }
                    outcomes
                })
            })
            .collect();

        sleep(Duration::from_millis(1)).await;
        manager.disconnect().await;
        assert!(!manager.is_connected());

        for publisher in publishers {
            let outcomes = publisher.await.unwrap();
            let accepted = outcomes.iter().take_while(|outcome| outcome.is_ok()).count();

            // Accepted publishes come first, everything after the teardown is refused.
            assert!(
                outcomes[accepted..]
                    .iter()
                    .all(|outcome| *outcome == Err(PublishError::NotConnected)),
                "unexpected outcomes {outcomes:?}"
            );
        }

        assert_eq!(
            gateway.publish("dtr.load", &Example::hello()).await,
            Err(PublishError::NotConnected)
        );
    }

    #[tokio::test]
    #[traced_test]
    async fn test_disconnect_waits_for_in_flight_durable_publish() {
        let broker = MemoryBroker::new();
        let manager = connected(&broker, config()).await;
        StreamAdmin::new(manager.clone(), StreamConfig::new("deepthought_events", "dtr.>"))
            .ensure_default_stream()
            .await
            .unwrap();
        let gateway = Gateway::new(manager.clone());
        broker.set_ack_delay(Duration::from_millis(200));

        let in_flight = {
            let gateway = gateway.clone();
            tokio::spawn(async move { gateway.publish("dtr.example", &Example::hello()).await })
        };

        sleep(Duration::from_millis(20)).await;
        assert_eq!(broker.stored_messages("deepthought_events").len(), 1);

        let started = Instant::now();
        manager.disconnect().await;
        assert!(started.elapsed() >= Duration::from_millis(100));
        assert!(!manager.is_connected());

        assert_eq!(
            in_flight.await.unwrap(),
            Ok(PublishReceipt::Durable {
                stream: "deepthought_events".to_string(),
                sequence: 1,
            })
        );
        assert_eq!(
            gateway.publish("dtr.example", &Example::hello()).await,
            Err(PublishError::NotConnected)
        );
        assert_eq!(broker.stored_messages("deepthought_events").len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_handlers_run_on_designated_thread() {
        let broker = MemoryBroker::new();
        let manager = connected(&broker, best_effort_config()).await;
        let relay = Arc::new(ThreadRelay::new());
        let gateway = Gateway::with_relay(manager, relay.clone());
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let recorded = seen.clone();
        gateway
            .subscribe_json("dtr.example", move |message: Result<Example, DecodeError>| {
                recorded.lock().push((thread::current().id(), message));
            })
            .await
            .unwrap();

        gateway.publish("dtr.example", &Example::hello()).await.unwrap();

        let deadline = tokio::time::Instant::now() + PROMPT;
        while relay.pending() == 0 {
            assert!(tokio::time::Instant::now() < deadline, "nothing was queued");
            sleep(Duration::from_millis(5)).await;
        }
        assert!(seen.lock().is_empty());

        assert_eq!(relay.run_pending(), 1);
        assert_eq!(
            *seen.lock(),
            vec![(thread::current().id(), Ok(Example::hello()))]
        );
    }

    #[tokio::test]
    async fn test_per_subject_limit_discards_oldest() {
        let broker = MemoryBroker::new();
        let manager = connected(&broker, config()).await;
        let admin = StreamAdmin::new(manager.clone(), StreamConfig::new("evt", "evt.>"));
        let gateway = Gateway::new(manager);

        admin
            .ensure_stream(&StreamConfig::new("evt", "evt.>").with_max_messages_per_subject(2))
            .await
            .unwrap();

        for i in 0..3_u32 {
            gateway.publish("evt.a", &i).await.unwrap();
        }
        gateway.publish("evt.b", &9_u32).await.unwrap();

        let stored: Vec<Bytes> = broker
            .stored_messages("evt")
            .into_iter()
            .map(|message| message.payload)
            .collect();
        assert_eq!(
            stored,
            vec![Bytes::from("1"), Bytes::from("2"), Bytes::from("9")]
        );
    }

    #[tokio::test]
    async fn test_zero_per_subject_limit_is_unlimited() {
        let broker = MemoryBroker::new();
        let manager = connected(&broker, config()).await;
        let admin = StreamAdmin::new(manager.clone(), StreamConfig::new("evt", "evt.>"));
        let gateway = Gateway::new(manager);

        admin
            .ensure_stream(&StreamConfig::new("evt", "evt.>").with_max_messages_per_subject(0))
            .await
            .unwrap();

        for i in 0..3_u32 {
            gateway.publish("evt.a", &i).await.unwrap();
        }

        assert_eq!(broker.stored_messages("evt").len(), 3);
        assert_eq!(admin.get_stream_info("evt").await.unwrap().message_count, 3);
    }

    #[tokio::test]
    async fn test_per_subject_limit_refuses_new() {
        let broker = MemoryBroker::new();
        let manager = connected(&broker, config()).await;
        let admin = StreamAdmin::new(manager.clone(), StreamConfig::new("evt", "evt.>"));
        let gateway = Gateway::new(manager);

        admin
            .ensure_stream(
                &StreamConfig::new("evt", "evt.>")
                    .with_max_messages_per_subject(1)
                    .with_discard_policy(DiscardPolicy::New),
            )
            .await
            .unwrap();

        gateway.publish("evt.a", &1).await.unwrap();
        let result = gateway.publish("evt.a", &2).await;

        assert!(matches!(result, Err(PublishError::BrokerRejected(_))));
        assert_eq!(admin.get_stream_info("evt").await.unwrap().message_count, 1);
    }
}
