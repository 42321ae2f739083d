//! Subscription resource.

use std::collections::HashMap;

use serde_json::Value as JsonValue;

/// A subscription of one endpoint to a topic.
///
/// Only `protocol == "sqs"` participates in fan-out; other protocols are
/// stored and listed faithfully but [`crate::publish`] skips them.
#[derive(Debug, Clone)]
pub struct Subscription {
    pub arn: String,
    pub topic_arn: String,
    pub protocol: String,
    pub endpoint: String,
    pub raw_message_delivery: bool,
    pub filter_policy: Option<JsonValue>,
    pub attributes: HashMap<String, String>,
}

impl Subscription {
    pub fn new(topic_arn: &str, protocol: String, endpoint: String) -> Self {
        Subscription {
            arn: format!("{topic_arn}:{}", uuid::Uuid::new_v4()),
            topic_arn: topic_arn.to_string(),
            protocol,
            endpoint,
            raw_message_delivery: false,
            filter_policy: None,
            attributes: HashMap::new(),
        }
    }

    pub fn is_sqs(&self) -> bool {
        self.protocol.eq_ignore_ascii_case("sqs")
    }
}
