//! Publish engine: filter-policy evaluation, envelope construction, and
//! fan-out from a topic to its `sqs` subscriptions — §4.4's `Publish` and
//! §9's "filter policy" glossary entry.
//!
//! Grounded on the teacher's `bus/sns_sqs/mod.rs` (attribute forwarding,
//! FIFO group/dedup propagation from topic to queue) and `dlq/mod.rs`'s
//! tagged-payload style for the notification envelope.

use std::collections::HashMap;

use chrono::Utc;
use serde::Serialize;
use serde_json::Value as JsonValue;

use crate::bus::Bus;
use crate::error::Result;
use crate::model::message::{AttributeData, AttributeMap, Message, MessageAttributeValue};
use crate::model::subscription::Subscription;
use crate::queue_engine::{BatchResultErrorEntry, SendMessageRequest};

#[derive(Debug, Clone, Default)]
pub struct PublishRequest {
    pub topic_arn: String,
    pub body: String,
    pub subject: Option<String>,
    pub attributes: AttributeMap,
    pub message_group_id: Option<String>,
    pub message_deduplication_id: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct PublishResponse {
    pub message_id: String,
}

#[derive(Debug, Clone)]
pub struct PublishBatchEntry {
    pub id: String,
    pub body: String,
    pub subject: Option<String>,
    pub attributes: AttributeMap,
    pub message_group_id: Option<String>,
    pub message_deduplication_id: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct PublishBatchResponse {
    pub successful: Vec<(String, String)>, // (entry id, message id)
    pub failed: Vec<BatchResultErrorEntry>,
}

/// The JSON shape of a non-raw delivery: `{Type, MessageId, TopicArn,
/// Subject?, Message, Timestamp, MessageAttributes}`.
#[derive(Serialize)]
struct Envelope {
    #[serde(rename = "Type")]
    kind: &'static str,
    #[serde(rename = "MessageId")]
    message_id: String,
    #[serde(rename = "TopicArn")]
    topic_arn: String,
    #[serde(rename = "Subject", skip_serializing_if = "Option::is_none")]
    subject: Option<String>,
    #[serde(rename = "Message")]
    message: String,
    #[serde(rename = "Timestamp")]
    timestamp: String,
    #[serde(rename = "MessageAttributes")]
    message_attributes: HashMap<String, EnvelopeAttribute>,
}

#[derive(Serialize)]
struct EnvelopeAttribute {
    #[serde(rename = "Type")]
    kind: String,
    #[serde(rename = "Value")]
    value: String,
}

impl Bus {
    #[tracing::instrument(skip(self, req), fields(topic = %req.topic_arn))]
    pub async fn publish(&self, req: PublishRequest) -> Result<PublishResponse> {
        let topic = self.topic_by_arn(&req.topic_arn)?;
        let mut message = Message::new(req.body.clone(), req.attributes.clone());
        crate::queue_engine::validate_size(&message)?;
        let message_id = message.id.clone();
        message.system_attributes.insert(
            crate::model::message::system_attr::SENT_TIMESTAMP.to_string(),
            self.clock.now().timestamp_millis().to_string(),
        );

        let subscriptions: Vec<Subscription> = self
            .subscriptions
            .iter()
            .filter(|s| s.topic_arn == topic.arn)
            .map(|s| s.clone())
            .collect();

        for sub in subscriptions {
            if !sub.is_sqs() {
                continue;
            }
            if let Some(policy) = &sub.filter_policy {
                if !filter_matches(policy, &req.attributes) {
                    continue;
                }
            }

            let Ok(dest) = self.queue_by_arn(&sub.endpoint) else {
                continue;
            };

            let (body, attributes) = if sub.raw_message_delivery {
                (req.body.clone(), req.attributes.clone())
            } else {
                let envelope = build_envelope(&message_id, &topic.arn, req.subject.as_deref(), &req.body, &req.attributes, self.clock.now());
                (envelope, AttributeMap::new())
            };

            let (group_id, dedup_id) = if topic.fifo {
                let group_id = req.message_group_id.clone();
                let dedup_id = req
                    .message_deduplication_id
                    .clone()
                    .or_else(|| {
                        topic
                            .content_based_deduplication
                            .then(|| crate::model::message::content_based_dedup_id(&body))
                    });
                (group_id, dedup_id)
            } else {
                (None, None)
            };

            // Best-effort delivery: a subscription pointing at a queue that
            // has since been deleted, or one whose own send fails validation,
            // must not fail the publish as a whole.
            let _ = self
                .send_message(SendMessageRequest {
                    queue_url: dest.url.clone(),
                    body,
                    attributes,
                    delay_seconds: None,
                    message_group_id: group_id,
                    message_deduplication_id: dedup_id,
                })
                .await;
        }

        Ok(PublishResponse { message_id })
    }

    pub async fn publish_batch(
        &self,
        topic_arn: &str,
        entries: Vec<PublishBatchEntry>,
    ) -> Result<PublishBatchResponse> {
        let mut response = PublishBatchResponse::default();
        for entry in entries {
            let result = self
                .publish(PublishRequest {
                    topic_arn: topic_arn.to_string(),
                    body: entry.body,
                    subject: entry.subject,
                    attributes: entry.attributes,
                    message_group_id: entry.message_group_id,
                    message_deduplication_id: entry.message_deduplication_id,
                })
                .await;
            match result {
                Ok(resp) => response.successful.push((entry.id, resp.message_id)),
                Err(err) => response.failed.push(BatchResultErrorEntry {
                    id: entry.id,
                    kind: err.kind(),
                    message: err.to_string(),
                }),
            }
        }
        Ok(response)
    }
}

fn build_envelope(
    message_id: &str,
    topic_arn: &str,
    subject: Option<&str>,
    body: &str,
    attributes: &AttributeMap,
    now: chrono::DateTime<Utc>,
) -> String {
    let message_attributes = attributes
        .iter()
        .map(|(name, value)| {
            let value_str = match &value.value {
                AttributeData::String(s) => s.clone(),
                AttributeData::Binary(b) => {
                    use base64::engine::general_purpose::STANDARD;
                    use base64::Engine as _;
                    STANDARD.encode(b)
                }
            };
            (
                name.clone(),
                EnvelopeAttribute {
                    kind: value.data_type.clone(),
                    value: value_str,
                },
            )
        })
        .collect();

    let envelope = Envelope {
        kind: "Notification",
        message_id: message_id.to_string(),
        topic_arn: topic_arn.to_string(),
        subject: subject.map(|s| s.to_string()),
        message: body.to_string(),
        timestamp: now.to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
        message_attributes,
    };
    serde_json::to_string(&envelope).expect("envelope serialization cannot fail")
}

/// Evaluate a `FilterPolicy` JSON object against a message's attributes.
///
/// Every key in the policy must be present in the message's attributes, and
/// the attribute's value must match at least one candidate in the policy's
/// array for that key. A candidate is either a plain string/number (exact
/// match against the attribute's string value) or a match-expression object
/// (`{"exists": true}`, `{"prefix": "..."}`, `{"anything-but": [...] }`).
/// Unrecognized expression shapes never match, which is the conservative
/// choice for an emulator that would rather under- than over-deliver.
pub fn filter_matches(policy: &JsonValue, attributes: &AttributeMap) -> bool {
    let Some(policy) = policy.as_object() else {
        return true;
    };
    policy.iter().all(|(key, candidates)| {
        let candidates = match candidates.as_array() {
            Some(c) => c,
            None => return false,
        };
        match attributes.get(key) {
            Some(attr) => candidates.iter().any(|c| candidate_matches(c, attr)),
            None => candidates
                .iter()
                .any(|c| c.as_object().and_then(|o| o.get("exists")).and_then(|v| v.as_bool()) == Some(false)),
        }
    })
}

fn candidate_matches(candidate: &JsonValue, attr: &MessageAttributeValue) -> bool {
    let value = match &attr.value {
        AttributeData::String(s) => s.clone(),
        AttributeData::Binary(_) => return false,
    };

    if let Some(s) = candidate.as_str() {
        return s == value;
    }
    if let Some(n) = candidate.as_f64() {
        return value.parse::<f64>().map(|v| v == n).unwrap_or(false);
    }
    if let Some(obj) = candidate.as_object() {
        if let Some(exists) = obj.get("exists").and_then(|v| v.as_bool()) {
            return exists;
        }
        if let Some(prefix) = obj.get("prefix").and_then(|v| v.as_str()) {
            return value.starts_with(prefix);
        }
        if let Some(anything_but) = obj.get("anything-but") {
            return match anything_but.as_array() {
                Some(excluded) => !excluded.iter().any(|e| e.as_str() == Some(value.as_str())),
                None => anything_but.as_str().map(|s| s != value).unwrap_or(true),
            };
        }
    }
    false
}
