//! End-to-end: a standard queue's visibility timeout cycle.

use std::time::Duration;

use localmq::bus::Bus;
use localmq::clock::VirtualClock;
use localmq::config::BusConfig;
use localmq::model::message::system_attr;
use localmq::queue_engine::{CreateQueueRequest, ReceiveMessageRequest, SendMessageRequest};
use std::sync::Arc;

#[tokio::test]
async fn visibility_timeout_hides_then_redelivers_with_incremented_receive_count() {
    let clock = Arc::new(VirtualClock::at_epoch());
    let bus = Bus::with_clock(BusConfig::default(), clock.clone());

    let url = bus
        .create_queue(CreateQueueRequest {
            name: "q1".to_string(),
            ..Default::default()
        })
        .await
        .unwrap()
        .queue_url;

    bus.send_message(SendMessageRequest {
        queue_url: url.clone(),
        body: "hello".to_string(),
        ..Default::default()
    })
    .await
    .unwrap();

    let first = bus
        .receive_message(ReceiveMessageRequest {
            queue_url: url.clone(),
            visibility_timeout: Some(10),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(first.messages.len(), 1);
    assert_eq!(first.messages[0].body, "hello");

    let second = bus
        .receive_message(ReceiveMessageRequest {
            queue_url: url.clone(),
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(second.messages.is_empty(), "message still in flight, should not be redelivered yet");

    clock.advance(Duration::from_secs(11));

    let third = bus
        .receive_message(ReceiveMessageRequest {
            queue_url: url.clone(),
            system_attribute_names: vec!["All".to_string()],
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(third.messages.len(), 1);
    assert_eq!(
        third.messages[0]
            .system_attributes
            .get(system_attr::APPROXIMATE_RECEIVE_COUNT),
        Some(&"2".to_string())
    );
}
