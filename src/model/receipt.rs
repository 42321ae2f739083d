//! Receipt handle minting and validation.
//!
//! A receipt handle is an opaque (to clients) base64 blob wrapping four
//! whitespace-separated fields: a random uuid, the queue's arn, the
//! message's id, and the unix timestamp at which it was issued. None of
//! this needs to be looked anything up — the in-flight table is still
//! keyed by the handle string itself — but encoding enough to validate
//! structurally catches a caller passing a handle from the wrong queue or a
//! handle that was simply made up.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{DateTime, Utc};

use crate::error::{EmulatorError, Result};

/// The four fields packed into a receipt handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiptFields {
    pub token: String,
    pub queue_arn: String,
    pub message_id: String,
    pub issued_at: String,
}

/// Mint a fresh receipt handle for `message_id` on `queue_arn`, issued at
/// `issued_at`.
pub fn encode(queue_arn: &str, message_id: &str, issued_at: DateTime<Utc>) -> String {
    let token = uuid::Uuid::new_v4();
    let issued_secs = issued_at.timestamp() as f64 + issued_at.timestamp_subsec_nanos() as f64 / 1e9;
    let raw = format!("{token} {queue_arn} {message_id} {issued_secs}");
    STANDARD.encode(raw.as_bytes())
}

/// Decode and structurally validate a receipt handle: base64 must decode to
/// UTF-8 with exactly 4 whitespace-separated fields.
pub fn decode(handle: &str) -> Result<ReceiptFields> {
    let raw = STANDARD
        .decode(handle)
        .map_err(|_| EmulatorError::ReceiptHandleInvalid(handle.to_string()))?;
    let raw = String::from_utf8(raw)
        .map_err(|_| EmulatorError::ReceiptHandleInvalid(handle.to_string()))?;
    let fields: Vec<&str> = raw.split_whitespace().collect();
    let [token, queue_arn, message_id, issued_at] = fields.as_slice() else {
        return Err(EmulatorError::ReceiptHandleInvalid(handle.to_string()));
    };
    Ok(ReceiptFields {
        token: token.to_string(),
        queue_arn: queue_arn.to_string(),
        message_id: message_id.to_string(),
        issued_at: issued_at.to_string(),
    })
}

/// Decode a handle and additionally check that it was issued for
/// `expected_queue_arn` (case-insensitive).
pub fn decode_for_queue(handle: &str, expected_queue_arn: &str) -> Result<ReceiptFields> {
    let fields = decode(handle)?;
    if !fields.queue_arn.eq_ignore_ascii_case(expected_queue_arn) {
        return Err(EmulatorError::ReceiptHandleInvalid(handle.to_string()));
    }
    Ok(fields)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let handle = encode("arn:aws:sqs:us-east-1:1:q", "msg-1", Utc::now());
        let fields = decode(&handle).unwrap();
        assert_eq!(fields.queue_arn, "arn:aws:sqs:us-east-1:1:q");
        assert_eq!(fields.message_id, "msg-1");
    }

    #[test]
    fn rejects_garbage() {
        assert!(decode("not-base64!!!").is_err());
        assert!(decode(&STANDARD.encode(b"too few fields")).is_err());
    }

    #[test]
    fn decode_for_queue_is_case_insensitive() {
        let handle = encode("arn:aws:sqs:us-east-1:1:Q", "msg-1", Utc::now());
        assert!(decode_for_queue(&handle, "arn:aws:sqs:us-east-1:1:q").is_ok());
        assert!(decode_for_queue(&handle, "arn:aws:sqs:us-east-1:1:other").is_err());
    }
}
