//! Small helpers shared by the request client, the fetcher and the relay.
//!
//! IMPORTANT:
//! - No exchange-specific response parsing should live here.
//! - Pair identifiers are opaque and must never be rewritten.

use chrono::Utc;

/// Request path for a pair's depth, relative to the API base.
///
/// Examples:
/// - "btc_jpy" -> "depth/btc_jpy"
///
pub fn depth_path(pair: &str) -> String {
    format!("depth/{}", pair)
}

/// Current Unix timestamp in nanoseconds, used in cycle logs.
pub fn now_ns() -> i64 {
    Utc::now().timestamp_nanos_opt().unwrap_or_default()
}

/// Extracts the subscription key from a WebSocket request path.
///
/// Accepted forms:
/// - "/btc_jpy"
/// - "/btc_jpy/"
/// - "/ws/btc_jpy"
///
/// Returns `None` for an empty key or nested paths.
///
pub fn subscription_key(path: &str) -> Option<&str> {
    let trimmed = path.trim_matches('/');
    let key = trimmed.strip_prefix("ws/").unwrap_or(trimmed);

    if key.is_empty() || key.contains('/') {
        None
    } else {
        Some(key)
    }
}

/// Lossy UTF-8 preview of a payload for debug logging.
pub fn payload_preview(payload: &[u8], max: usize) -> String {
    let text = String::from_utf8_lossy(payload);
    if text.chars().count() <= max {
        text.into_owned()
    } else {
        let head: String = text.chars().take(max).collect();
        format!("{}... ({} bytes)", head, payload.len())
    }
}
