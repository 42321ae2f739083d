//! Opaque cursor-based pagination shared by every list operation.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

use crate::error::{EmulatorError, Result};

/// Encode a stable item key as an opaque page token.
pub fn encode_token(key: &str) -> String {
    STANDARD.encode(key.as_bytes())
}

/// Decode a page token back into the stable key it wraps.
pub fn decode_token(token: &str) -> Result<String> {
    let bytes = STANDARD
        .decode(token)
        .map_err(|_| EmulatorError::InvalidParameter(format!("malformed page token: {token}")))?;
    String::from_utf8(bytes)
        .map_err(|_| EmulatorError::InvalidParameter(format!("malformed page token: {token}")))
}

/// A single page of results plus the token to pass back in for the next one.
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_token: Option<String>,
}

/// Return up to `max` items from `items`, starting strictly after the item
/// whose stable key (via `key_of`) decodes from `token`, or from the start
/// when `token` is `None`. A token that doesn't match any current item's key
/// (the item it pointed to was since deleted) falls back to the start of the
/// list rather than erroring, since the real services tolerate a stale
/// cursor the same way.
pub fn get_page<T: Clone>(
    items: &[T],
    max: usize,
    token: Option<&str>,
    key_of: impl Fn(&T) -> String,
) -> Result<Page<T>> {
    let start = match token {
        None => 0,
        Some(t) => {
            let cursor = decode_token(t)?;
            items
                .iter()
                .position(|item| key_of(item) == cursor)
                .map(|pos| pos + 1)
                .unwrap_or(0)
        }
    };

    let end = items.len().min(start.saturating_add(max));
    let page: Vec<T> = items[start.min(items.len())..end].to_vec();
    let next_token = if end < items.len() {
        page.last().map(|last| encode_token(&key_of(last)))
    } else {
        None
    };

    Ok(Page {
        items: page,
        next_token,
    })
}
