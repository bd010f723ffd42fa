//! Trailing-error filter for upstream response bodies.
//!
//! The upstream has been observed appending an error-shaped JSON object
//! after the payload of an otherwise-successful response. This filter
//! removes that block. It is a heuristic (a real fix needs framing
//! discipline on the upstream side) and reproduces the observed rule
//! exactly: find the last newline immediately followed by `{`, and only
//! cut when the remainder parses to
//! `{"error": {"code": ..., "status": ..., ...}}`.

use axum::body::Bytes;
use serde_json::Value;

use crate::logger;

/// Strip a trailing error block from a successful, non-empty body.
/// Anything that doesn't match the error shape passes through untouched.
pub fn strip_trailing_error(status: u16, body: Bytes) -> Bytes {
    if status != 200 || body.is_empty() {
        return body;
    }
    match filtered(&body) {
        Some(cleaned) => Bytes::from(cleaned),
        None => body,
    }
}

fn filtered(raw: &[u8]) -> Option<String> {
    let decoded = String::from_utf8_lossy(raw);
    let stripped = decoded.trim();
    if !stripped.ends_with('}') {
        return None;
    }

    let block_start = stripped
        .rfind("\n{")
        .or_else(|| stripped.rfind("\n\n{"))?;

    let candidate = stripped[block_start..].trim();
    let parsed: Value = serde_json::from_str(candidate).ok()?;
    let error = parsed.as_object()?.get("error")?.as_object()?;
    if !error.contains_key("code") || !error.contains_key("status") {
        return None;
    }

    logger::warn(
        "sanitize",
        &format!("Detected and filtering out trailing error JSON: {}", candidate),
    );

    let mut valid = stripped[..block_start].trim_end().to_string();
    if !valid.is_empty() {
        // Restore the blank-line terminator so SSE framing stays intact.
        valid.push_str("\n\n");
    }
    Some(valid)
}
