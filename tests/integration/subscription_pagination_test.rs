//! End-to-end: listing subscriptions paginates at the default page size and
//! the pages together cover every subscription exactly once.

use localmq::bus::Bus;
use localmq::clock::VirtualClock;
use localmq::config::BusConfig;
use localmq::topic_engine::{CreateTopicRequest, ListSubscriptionsRequest, SubscribeRequest};
use std::collections::HashSet;
use std::sync::Arc;

#[tokio::test]
async fn one_hundred_fifty_subscriptions_paginate_in_two_pages() {
    let clock = Arc::new(VirtualClock::at_epoch());
    let bus = Bus::with_clock(BusConfig::default(), clock);

    let topic = bus
        .create_topic(CreateTopicRequest {
            name: "t".to_string(),
            ..Default::default()
        })
        .unwrap();

    for i in 0..150 {
        bus.subscribe(SubscribeRequest {
            topic_arn: topic.topic_arn.clone(),
            protocol: "http".to_string(),
            endpoint: format!("https://example.com/{i}"),
            attributes: Default::default(),
        })
        .unwrap();
    }

    let mut seen = HashSet::new();
    let mut token = None;
    let mut pages = 0;
    loop {
        let page = bus
            .list_subscriptions(ListSubscriptionsRequest {
                topic_arn: Some(topic.topic_arn.clone()),
                next_token: token,
                ..Default::default()
            })
            .unwrap();
        pages += 1;
        for s in &page.subscriptions {
            assert_eq!(s.topic_arn, topic.topic_arn);
            assert!(seen.insert(s.arn.clone()), "subscription arn {} seen twice", s.arn);
        }
        match page.next_token {
            Some(next) => token = Some(next),
            None => break,
        }
    }

    assert_eq!(pages, 2, "150 subscriptions at a default page size of 100 must take exactly two pages");
    assert_eq!(seen.len(), 150);
}
