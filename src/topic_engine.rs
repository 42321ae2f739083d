//! Topic engine: topic CRUD, subscribe/unsubscribe, and subscription/topic
//! attribute access — §4.4's non-publish half of the design.
//!
//! Grounded the same way as [`crate::queue_engine`]: inherent methods on
//! [`Bus`], no separate dispatcher type. Topic naming mirrors the teacher's
//! `bus/sns_sqs/mod.rs` (`topic_for_domain`/`queue_for_domain` helpers,
//! generalized here to plain name → arn derivation since this crate has no
//! domain-routing concept of its own).

use std::collections::HashMap;

use crate::bus::Bus;
use crate::error::{EmulatorError, Result};
use crate::model::subscription::Subscription;
use crate::model::topic::TopicResource;
use crate::pagination::get_page;

#[derive(Debug, Clone, Default)]
pub struct CreateTopicRequest {
    pub name: String,
    pub attributes: HashMap<String, String>,
    pub tags: HashMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct CreateTopicResponse {
    pub topic_arn: String,
}

#[derive(Debug, Clone, Default)]
pub struct ListTopicsRequest {
    pub max_results: Option<usize>,
    pub next_token: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ListTopicsResponse {
    pub topic_arns: Vec<String>,
    pub next_token: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct SubscribeRequest {
    pub topic_arn: String,
    pub protocol: String,
    pub endpoint: String,
    pub attributes: HashMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct SubscribeResponse {
    pub subscription_arn: String,
}

#[derive(Debug, Clone, Default)]
pub struct ListSubscriptionsRequest {
    /// When set, list only this topic's subscriptions; otherwise list every
    /// subscription known to the bus.
    pub topic_arn: Option<String>,
    pub max_results: Option<usize>,
    pub next_token: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ListSubscriptionsResponse {
    pub subscriptions: Vec<Subscription>,
    pub next_token: Option<String>,
}

impl Bus {
    // -------------------------------------------------------------
    // Topic CRUD
    // -------------------------------------------------------------

    pub fn create_topic(&self, req: CreateTopicRequest) -> Result<CreateTopicResponse> {
        if let Some(existing) = self
            .topics
            .iter()
            .find(|t| t.name == req.name)
        {
            return Ok(CreateTopicResponse {
                topic_arn: existing.arn.clone(),
            });
        }

        let mut topic = TopicResource::new(req.name, &self.config.region, &self.config.account_id);
        topic.content_based_deduplication = req
            .attributes
            .get("ContentBasedDeduplication")
            .map(|v| v == "true")
            .unwrap_or(false);
        topic.attributes = req.attributes;
        topic.tags = req.tags;

        let arn = topic.arn.clone();
        self.topics.insert(arn.clone(), topic);
        Ok(CreateTopicResponse { topic_arn: arn })
    }

    pub fn delete_topic(&self, topic_arn: &str) -> Result<()> {
        self.topic_by_arn(topic_arn)?;
        self.topics.remove(topic_arn);
        let dead: Vec<String> = self
            .subscriptions
            .iter()
            .filter(|s| s.topic_arn == topic_arn)
            .map(|s| s.arn.clone())
            .collect();
        for arn in dead {
            self.subscriptions.remove(&arn);
        }
        Ok(())
    }

    pub fn list_topics(&self, req: ListTopicsRequest) -> Result<ListTopicsResponse> {
        let mut arns: Vec<String> = self.topics.iter().map(|t| t.arn.clone()).collect();
        arns.sort();
        let max = req.max_results.unwrap_or(self.config.default_page_size);
        let page = get_page(&arns, max, req.next_token.as_deref(), |a| a.clone())?;
        Ok(ListTopicsResponse {
            topic_arns: page.items,
            next_token: page.next_token,
        })
    }

    pub fn set_topic_attributes(
        &self,
        topic_arn: &str,
        attributes: HashMap<String, String>,
    ) -> Result<()> {
        let mut topic = self
            .topics
            .get_mut(topic_arn)
            .ok_or_else(|| EmulatorError::TopicNotFound(topic_arn.to_string()))?;
        for (k, v) in attributes {
            if k == "ContentBasedDeduplication" {
                topic.content_based_deduplication = v == "true";
            }
            topic.attributes.insert(k, v);
        }
        Ok(())
    }

    pub fn get_topic_attributes(&self, topic_arn: &str) -> Result<HashMap<String, String>> {
        let topic = self.topic_by_arn(topic_arn)?;
        let mut attrs = topic.attributes.clone();
        attrs.insert("TopicArn".to_string(), topic.arn.clone());
        Ok(attrs)
    }

    pub fn tag_topic(&self, topic_arn: &str, tags: HashMap<String, String>) -> Result<()> {
        let mut topic = self
            .topics
            .get_mut(topic_arn)
            .ok_or_else(|| EmulatorError::TopicNotFound(topic_arn.to_string()))?;
        for (k, v) in tags {
            topic.tags.insert(k, v);
        }
        Ok(())
    }

    pub fn untag_topic(&self, topic_arn: &str, tag_keys: &[String]) -> Result<()> {
        let mut topic = self
            .topics
            .get_mut(topic_arn)
            .ok_or_else(|| EmulatorError::TopicNotFound(topic_arn.to_string()))?;
        for key in tag_keys {
            topic.tags.remove(key);
        }
        Ok(())
    }

    // -------------------------------------------------------------
    // Subscriptions
    // -------------------------------------------------------------

    pub fn subscribe(&self, req: SubscribeRequest) -> Result<SubscribeResponse> {
        self.topic_by_arn(&req.topic_arn)?;

        let mut sub = Subscription::new(&req.topic_arn, req.protocol, req.endpoint);
        if let Some(raw) = req.attributes.get("RawMessageDelivery") {
            sub.raw_message_delivery = raw == "true";
        }
        if let Some(raw) = req.attributes.get("FilterPolicy") {
            let parsed: serde_json::Value = serde_json::from_str(raw)
                .map_err(|_| EmulatorError::InvalidParameter("FilterPolicy is not valid JSON".into()))?;
            sub.filter_policy = Some(parsed);
        }
        sub.attributes = req.attributes;

        let arn = sub.arn.clone();
        self.subscriptions.insert(arn.clone(), sub);
        Ok(SubscribeResponse { subscription_arn: arn })
    }

    pub fn unsubscribe(&self, subscription_arn: &str) -> Result<()> {
        self.subscriptions
            .remove(subscription_arn)
            .ok_or_else(|| EmulatorError::SubscriptionNotFound(subscription_arn.to_string()))?;
        Ok(())
    }

    pub fn set_subscription_attributes(
        &self,
        subscription_arn: &str,
        name: &str,
        value: &str,
    ) -> Result<()> {
        let mut sub = self
            .subscriptions
            .get_mut(subscription_arn)
            .ok_or_else(|| EmulatorError::SubscriptionNotFound(subscription_arn.to_string()))?;
        match name {
            "RawMessageDelivery" => sub.raw_message_delivery = value == "true",
            "FilterPolicy" => {
                let parsed: serde_json::Value = serde_json::from_str(value)
                    .map_err(|_| EmulatorError::InvalidParameter("FilterPolicy is not valid JSON".into()))?;
                sub.filter_policy = Some(parsed);
            }
            _ => {}
        }
        sub.attributes.insert(name.to_string(), value.to_string());
        Ok(())
    }

    pub fn get_subscription_attributes(&self, subscription_arn: &str) -> Result<HashMap<String, String>> {
        let sub = self.subscription_by_arn(subscription_arn)?;
        let mut attrs = sub.attributes.clone();
        attrs.insert("SubscriptionArn".to_string(), sub.arn.clone());
        attrs.insert("TopicArn".to_string(), sub.topic_arn.clone());
        attrs.insert("Protocol".to_string(), sub.protocol.clone());
        attrs.insert("Endpoint".to_string(), sub.endpoint.clone());
        attrs.insert("RawMessageDelivery".to_string(), sub.raw_message_delivery.to_string());
        Ok(attrs)
    }

    pub fn list_subscriptions(&self, req: ListSubscriptionsRequest) -> Result<ListSubscriptionsResponse> {
        let mut subs: Vec<Subscription> = self
            .subscriptions
            .iter()
            .filter(|s| {
                req.topic_arn
                    .as_ref()
                    .map(|arn| &s.topic_arn == arn)
                    .unwrap_or(true)
            })
            .map(|s| s.clone())
            .collect();
        subs.sort_by(|a, b| a.arn.cmp(&b.arn));

        let max = req.max_results.unwrap_or(self.config.default_page_size);
        let page = get_page(&subs, max, req.next_token.as_deref(), |s| s.arn.clone())?;
        Ok(ListSubscriptionsResponse {
            subscriptions: page.items,
            next_token: page.next_token,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::VirtualClock;
    use crate::config::BusConfig;
    use crate::queue_engine::CreateQueueRequest;
    use std::sync::Arc;

    fn bus() -> Arc<Bus> {
        Bus::with_clock(BusConfig::default(), Arc::new(VirtualClock::at_epoch()))
    }

    #[tokio::test]
    async fn create_topic_is_idempotent_by_name() {
        let bus = bus();
        let first = bus
            .create_topic(CreateTopicRequest {
                name: "t".to_string(),
                ..Default::default()
            })
            .unwrap();
        let second = bus
            .create_topic(CreateTopicRequest {
                name: "t".to_string(),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(first.topic_arn, second.topic_arn);
    }

    #[tokio::test]
    async fn delete_topic_cascades_to_subscriptions() {
        let bus = bus();
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

        bus.delete_topic(&topic.topic_arn).unwrap();
        let listed = bus
            .list_subscriptions(ListSubscriptionsRequest::default())
            .unwrap();
        assert!(listed.subscriptions.is_empty());
    }

    #[test]
    fn unknown_topic_attributes_are_not_found() {
        let bus = bus();
        let err = bus.get_topic_attributes("arn:aws:sns:us-east-1:1:nope").unwrap_err();
        assert_eq!(err.kind(), "TopicNotFound");
    }

    #[test]
    fn unknown_subscription_attributes_are_not_found() {
        let bus = bus();
        let err = bus.get_subscription_attributes("nope").unwrap_err();
        assert_eq!(err.kind(), "SubscriptionNotFound");
    }

    #[test]
    fn paginates_150_subscriptions_in_two_pages() {
        let bus = bus();
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
                attributes: HashMap::new(),
            })
            .unwrap();
        }

        let mut seen = std::collections::HashSet::new();
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
                seen.insert(s.arn.clone());
            }
            token = page.next_token;
            if token.is_none() {
                break;
            }
        }
        assert_eq!(pages, 2);
        assert_eq!(seen.len(), 150);
    }
}
