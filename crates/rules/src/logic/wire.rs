//! URL-safe string form of logic trees, for links and saved views.
//!
//! The compact JSON form is form-urlencoded. Object keys serialize in sorted
//! order, so a tree always encodes to the same string.

use tracing::debug;
use url::form_urlencoded;

use super::{LogicError, LogicNode};

/// Encode a tree as a URL-safe string.
pub fn serialize(node: &LogicNode) -> String {
    let json = node.to_value().to_string();
    form_urlencoded::byte_serialize(json.as_bytes()).collect()
}

/// Decode a string produced by [`serialize`].
pub fn deserialize(encoded: &str) -> Result<LogicNode, LogicError> {
    let mut pairs = form_urlencoded::parse(encoded.as_bytes());
    let json = match (pairs.next(), pairs.next()) {
        (Some((json, value)), None) if value.is_empty() => json,
        _ => return Err(LogicError::Encoding),
    };
    let value: serde_json::Value = serde_json::from_str(&json)?;
    LogicNode::from_value(&value)
}

/// Lenient decoding for user-supplied links: malformed input yields an empty `AND`.
pub fn deserialize_or_default(encoded: &str) -> LogicNode {
    deserialize(encoded).unwrap_or_else(|e| {
        debug!(error = %e, "discarding malformed serialized logic");
        LogicNode::default()
    })
}
