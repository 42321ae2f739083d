//! Topic resource.

use std::collections::HashMap;

/// A topic's metadata. Subscriptions are owned by the bus, keyed by arn,
/// and carry their own back-reference to this topic's arn rather than being
/// stored inline here.
#[derive(Debug, Clone)]
pub struct TopicResource {
    pub name: String,
    pub arn: String,
    pub fifo: bool,
    pub content_based_deduplication: bool,
    pub attributes: HashMap<String, String>,
    pub tags: HashMap<String, String>,
}

impl TopicResource {
    pub fn new(name: String, region: &str, account_id: &str) -> Self {
        let fifo = name.ends_with(".fifo");
        TopicResource {
            arn: format!("arn:aws:sns:{region}:{account_id}:{name}"),
            name,
            fifo,
            content_based_deduplication: false,
            attributes: HashMap::new(),
            tags: HashMap::new(),
        }
    }
}
