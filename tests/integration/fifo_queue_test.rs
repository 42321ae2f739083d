//! End-to-end: FIFO ordering and content-based/explicit deduplication.

use localmq::bus::Bus;
use localmq::clock::VirtualClock;
use localmq::config::BusConfig;
use localmq::queue_engine::{CreateQueueRequest, ReceiveMessageRequest, SendMessageRequest};
use std::sync::Arc;

#[tokio::test]
async fn duplicate_dedup_id_short_circuits_and_order_is_preserved_within_group() {
    let clock = Arc::new(VirtualClock::at_epoch());
    let bus = Bus::with_clock(BusConfig::default(), clock);

    let url = bus
        .create_queue(CreateQueueRequest {
            name: "q.fifo".to_string(),
            ..Default::default()
        })
        .await
        .unwrap()
        .queue_url;

    for (body, dedup) in [("A1", "d1"), ("A2", "d2"), ("A3", "d3")] {
        bus.send_message(SendMessageRequest {
            queue_url: url.clone(),
            body: body.to_string(),
            message_group_id: Some("GA".to_string()),
            message_deduplication_id: Some(dedup.to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    }

    let original = bus
        .send_message(SendMessageRequest {
            queue_url: url.clone(),
            body: "A2".to_string(),
            message_group_id: Some("GA".to_string()),
            message_deduplication_id: Some("d2".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();

    let duplicate = bus
        .send_message(SendMessageRequest {
            queue_url: url.clone(),
            body: "A2x".to_string(),
            message_group_id: Some("GA".to_string()),
            message_deduplication_id: Some("d2".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(
        original.message_id, duplicate.message_id,
        "a repeat dedup id must return the original message id without enqueueing"
    );

    let received = bus
        .receive_message(ReceiveMessageRequest {
            queue_url: url,
            max_messages: 10,
            ..Default::default()
        })
        .await
        .unwrap();
    let bodies: Vec<&str> = received.messages.iter().map(|m| m.body.as_str()).collect();
    assert_eq!(bodies, vec!["A1", "A2", "A3"], "exactly three messages, send order preserved");
}
