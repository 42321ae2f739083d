//! End-to-end: max-receive promotion of a message into its queue's DLQ.

use std::collections::HashMap;
use std::time::Duration;

use localmq::bus::Bus;
use localmq::clock::VirtualClock;
use localmq::config::BusConfig;
use localmq::model::message::system_attr;
use localmq::queue_engine::{CreateQueueRequest, ReceiveMessageRequest, SendMessageRequest};
use std::sync::Arc;

#[tokio::test]
async fn message_is_redriven_to_dlq_after_exceeding_max_receive() {
    let clock = Arc::new(VirtualClock::at_epoch());
    let bus = Bus::with_clock(BusConfig::default(), clock.clone());

    let mut dlq_attrs = HashMap::new();
    dlq_attrs.insert("VisibilityTimeout".to_string(), "5".to_string());
    let dlq_url = bus
        .create_queue(CreateQueueRequest {
            name: "d".to_string(),
            attributes: dlq_attrs,
            tags: HashMap::new(),
        })
        .await
        .unwrap()
        .queue_url;
    let dlq_arn = bus.resolve_queue(&dlq_url).unwrap().arn.clone();

    let mut main_attrs = HashMap::new();
    main_attrs.insert(
        "RedrivePolicy".to_string(),
        serde_json::json!({"deadLetterTargetArn": dlq_arn, "maxReceiveCount": 2}).to_string(),
    );
    main_attrs.insert("VisibilityTimeout".to_string(), "5".to_string());
    let main_url = bus
        .create_queue(CreateQueueRequest {
            name: "m".to_string(),
            attributes: main_attrs,
            tags: HashMap::new(),
        })
        .await
        .unwrap()
        .queue_url;
    let main_arn = bus.resolve_queue(&main_url).unwrap().arn.clone();

    bus.send_message(SendMessageRequest {
        queue_url: main_url.clone(),
        body: "x".to_string(),
        ..Default::default()
    })
    .await
    .unwrap();

    for _ in 0..2 {
        let received = bus
            .receive_message(ReceiveMessageRequest {
                queue_url: main_url.clone(),
                visibility_timeout: Some(5),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(received.messages.len(), 1);
        clock.advance(Duration::from_secs(6));
    }

    let third = bus
        .receive_message(ReceiveMessageRequest {
            queue_url: main_url,
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(third.messages.is_empty(), "third receive must not see the message on the source queue");

    let from_dlq = bus
        .receive_message(ReceiveMessageRequest {
            queue_url: dlq_url,
            system_attribute_names: vec!["All".to_string()],
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(from_dlq.messages.len(), 1);
    assert_eq!(from_dlq.messages[0].body, "x");
    assert_eq!(
        from_dlq.messages[0]
            .system_attributes
            .get(system_attr::DEAD_LETTER_QUEUE_SOURCE_ARN),
        Some(&main_arn)
    );
}
