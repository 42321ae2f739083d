//! End-to-end: non-raw publish wraps the body in a JSON notification
//! envelope carrying the subject and forwarded message attributes.

use localmq::bus::Bus;
use localmq::clock::VirtualClock;
use localmq::config::BusConfig;
use localmq::model::message::{AttributeMap, MessageAttributeValue};
use localmq::publish::PublishRequest;
use localmq::queue_engine::{CreateQueueRequest, ReceiveMessageRequest};
use localmq::topic_engine::{CreateTopicRequest, SubscribeRequest};
use std::collections::HashMap;
use std::sync::Arc;

#[tokio::test]
async fn enveloped_delivery_carries_subject_type_and_attributes() {
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

    bus.subscribe(SubscribeRequest {
        topic_arn: topic.topic_arn.clone(),
        protocol: "sqs".to_string(),
        endpoint: queue_arn,
        attributes: HashMap::new(),
    })
    .unwrap();

    let mut attrs: AttributeMap = HashMap::new();
    attrs.insert("k".to_string(), MessageAttributeValue::string("String".to_string(), "v".to_string()));

    bus.publish(PublishRequest {
        topic_arn: topic.topic_arn,
        body: "m".to_string(),
        subject: Some("S".to_string()),
        attributes: attrs,
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

    let envelope: serde_json::Value = serde_json::from_str(&received.messages[0].body).unwrap();
    assert_eq!(envelope["Type"], "Notification");
    assert_eq!(envelope["Subject"], "S");
    assert_eq!(envelope["Message"], "m");
    assert_eq!(envelope["MessageAttributes"]["k"]["Type"], "String");
    assert_eq!(envelope["MessageAttributes"]["k"]["Value"], "v");
    assert!(envelope["Timestamp"].as_str().map(|s| !s.is_empty()).unwrap_or(false));

    assert_eq!(
        received.messages[0].md5_of_body,
        format!("{:x}", md5::compute(&received.messages[0].body))
    );
}
