//! End-to-end: publish with raw message delivery fans straight through to a
//! subscribed queue's body, with the receive-side md5 matching the body.

use localmq::bus::Bus;
use localmq::clock::VirtualClock;
use localmq::config::BusConfig;
use localmq::publish::PublishRequest;
use localmq::queue_engine::{CreateQueueRequest, ReceiveMessageRequest};
use localmq::topic_engine::{CreateTopicRequest, SubscribeRequest};
use std::collections::HashMap;
use std::sync::Arc;

#[tokio::test]
async fn raw_delivery_forwards_the_published_body_verbatim() {
    let clock = Arc::new(VirtualClock::at_epoch());
    let bus = Bus::with_clock(BusConfig::default(), clock);

    let topic = bus
        .create_topic(CreateTopicRequest {
            name: "t".to_string(),
            ..Default::default()
        })
        .unwrap();

    let queue_url = bus
        .create_queue(CreateQueueRequest {
            name: "q".to_string(),
            ..Default::default()
        })
        .await
        .unwrap()
        .queue_url;
    let queue_arn = bus.resolve_queue(&queue_url).unwrap().arn.clone();

    let mut sub_attrs = HashMap::new();
    sub_attrs.insert("RawMessageDelivery".to_string(), "true".to_string());
    bus.subscribe(SubscribeRequest {
        topic_arn: topic.topic_arn.clone(),
        protocol: "sqs".to_string(),
        endpoint: queue_arn,
        attributes: sub_attrs,
    })
    .unwrap();

    bus.publish(PublishRequest {
        topic_arn: topic.topic_arn,
        body: "m".to_string(),
        ..Default::default()
    })
    .await
    .unwrap();

    let received = bus
        .receive_message(ReceiveMessageRequest {
            queue_url,
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(received.messages.len(), 1);
    assert_eq!(received.messages[0].body, "m");
    assert_eq!(received.messages[0].md5_of_body, format!("{:x}", md5::compute("m")));
}
