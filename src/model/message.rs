//! The message value type and its attribute map.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Names of the system attributes the engine itself stamps onto messages.
/// Any other name in a request's "system attribute names to return" list is
/// simply absent from the response rather than an error.
pub mod system_attr {
    pub const APPROXIMATE_RECEIVE_COUNT: &str = "ApproximateReceiveCount";
    pub const SENT_TIMESTAMP: &str = "SentTimestamp";
    pub const APPROXIMATE_FIRST_RECEIVE_TIMESTAMP: &str = "ApproximateFirstReceiveTimestamp";
    pub const MESSAGE_DEDUPLICATION_ID: &str = "MessageDeduplicationId";
    pub const MESSAGE_GROUP_ID: &str = "MessageGroupId";
    pub const AWS_TRACE_HEADER: &str = "AWSTraceHeader";
    pub const DEAD_LETTER_QUEUE_SOURCE_ARN: &str = "DeadLetterQueueSourceArn";
    pub const SEQUENCE_NUMBER: &str = "SequenceNumber";

    /// The full fixed set, used to validate a caller-supplied
    /// "requested system attributes" filter list isn't asking for something
    /// that doesn't exist.
    pub const ALL: &[&str] = &[
        APPROXIMATE_RECEIVE_COUNT,
        SENT_TIMESTAMP,
        APPROXIMATE_FIRST_RECEIVE_TIMESTAMP,
        MESSAGE_DEDUPLICATION_ID,
        MESSAGE_GROUP_ID,
        AWS_TRACE_HEADER,
        DEAD_LETTER_QUEUE_SOURCE_ARN,
        SEQUENCE_NUMBER,
    ];
}

/// The data carried by a single message attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttributeData {
    String(String),
    Binary(Vec<u8>),
}

impl AttributeData {
    fn byte_len(&self) -> usize {
        match self {
            AttributeData::String(s) => s.len(),
            AttributeData::Binary(b) => b.len(),
        }
    }
}

/// One entry in a message's attribute map: a data type tag (`"String"`,
/// `"Number"`, `"Binary"`, or a `.`-suffixed custom type) plus its value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageAttributeValue {
    pub data_type: String,
    pub value: AttributeData,
}

impl MessageAttributeValue {
    pub fn string<S: Into<String>>(data_type: S, value: S) -> Self {
        MessageAttributeValue {
            data_type: data_type.into(),
            value: AttributeData::String(value.into()),
        }
    }

    pub fn binary<S: Into<String>>(data_type: S, value: Vec<u8>) -> Self {
        MessageAttributeValue {
            data_type: data_type.into(),
            value: AttributeData::Binary(value),
        }
    }

    /// Size counted toward the 256 KiB payload limit: the attribute's own
    /// name isn't known here, so callers add that separately.
    fn byte_len(&self, name: &str) -> usize {
        name.len() + self.data_type.len() + self.value.byte_len()
    }
}

pub type AttributeMap = HashMap<String, MessageAttributeValue>;

/// A message body together with its computed digests, attribute map, and
/// system attributes.
///
/// `id` is assigned once at construction and never changes; `md5_of_body`
/// is always the digest of the current `body`, recomputed whenever `body`
/// is set through [`Message::new`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub body: String,
    pub md5_of_body: String,
    pub attributes: AttributeMap,
    pub md5_of_message_attributes: Option<String>,
    pub system_attributes: HashMap<String, String>,
    /// Populated only on the copy handed back by a receive call.
    pub receipt_handle: Option<String>,
}

impl Message {
    /// Build a fresh message: mints an id, computes both digests from
    /// `body`/`attributes`, and leaves system attributes and receipt handle
    /// empty for the caller (typically the queue engine) to fill in.
    pub fn new(body: String, attributes: AttributeMap) -> Self {
        let md5_of_body = body_digest(&body);
        let md5_of_message_attributes = if attributes.is_empty() {
            None
        } else {
            Some(attributes_digest(&attributes))
        };
        Message {
            id: uuid::Uuid::new_v4().to_string(),
            body,
            md5_of_body,
            attributes,
            md5_of_message_attributes,
            system_attributes: HashMap::new(),
            receipt_handle: None,
        }
    }

    /// Total size counted against the 256 KiB payload limit: body bytes
    /// plus, for every attribute, its name bytes, data-type bytes, and
    /// value bytes.
    pub fn byte_len(&self) -> usize {
        let attrs: usize = self
            .attributes
            .iter()
            .map(|(name, value)| value.byte_len(name))
            .sum();
        self.body.len() + attrs
    }

    /// Filter `system_attributes` per a request's "system attribute names"
    /// list: `["All"]` keeps everything, an empty list strips everything,
    /// any other list keeps only the named keys.
    pub fn system_attributes_filtered(&self, requested: &[String]) -> HashMap<String, String> {
        if requested.iter().any(|n| n == "All") {
            return self.system_attributes.clone();
        }
        if requested.is_empty() {
            return HashMap::new();
        }
        self.system_attributes
            .iter()
            .filter(|(k, _)| requested.iter().any(|n| n == *k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

/// Lowercase hex MD5 of a UTF-8 string body.
pub fn body_digest(body: &str) -> String {
    hex::encode(md5::compute(body.as_bytes()).0)
}

/// Lowercase hex MD5 over the attribute map, in a deterministic key order.
///
/// The exact canonical encoding isn't externally observable in this
/// emulator (no client decodes it back into fields), so this sorts by
/// attribute name and concatenates name/type/value, which is enough to
/// make the digest stable and order-independent of map iteration.
fn attributes_digest(attributes: &AttributeMap) -> String {
    let mut names: Vec<&String> = attributes.keys().collect();
    names.sort();
    let mut buf = Vec::new();
    for name in names {
        let value = &attributes[name];
        buf.extend_from_slice(name.as_bytes());
        buf.extend_from_slice(value.data_type.as_bytes());
        match &value.value {
            AttributeData::String(s) => buf.extend_from_slice(s.as_bytes()),
            AttributeData::Binary(b) => buf.extend_from_slice(b),
        }
    }
    hex::encode(md5::compute(&buf).0)
}

/// SHA-256(body), base64-encoded — used as the dedup-id when
/// `ContentBasedDeduplication` is enabled and the caller supplied none.
pub fn content_based_dedup_id(body: &str) -> String {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use sha2::{Digest, Sha256};
    let digest = Sha256::digest(body.as_bytes());
    STANDARD.encode(digest)
}
