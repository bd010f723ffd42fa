//! Request admission: dialect detection, token validation, path parsing.

use axum::body::Bytes;
use axum::http::HeaderMap;

use super::context::{Dialect, RelayBody, RelayPlan};
use super::error::{RelayError, RelayResult};
use crate::logger;

/// A request is in the OpenAI dialect iff its path, with surrounding
/// slashes stripped, is exactly `v1/chat/completions`.
pub fn detect_dialect(path: &str) -> Dialect {
    if path.trim_matches('/') == "v1/chat/completions" {
        Dialect::OpenAi
    } else {
        Dialect::Gemini
    }
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Validate the placeholder token the client presented.
///
/// OpenAI dialect: `Authorization: Bearer <placeholder>`, 401 on any
/// deviation. Gemini dialect: `x-goog-api-key: <placeholder>`, 400 when the
/// header is absent, 401 when it carries the wrong value.
pub fn validate_token(
    headers: &HeaderMap,
    dialect: Dialect,
    placeholder: &str,
) -> RelayResult<()> {
    let provided = match dialect {
        Dialect::OpenAi => {
            let auth = header_value(headers, "authorization").ok_or_else(|| {
                RelayError::Unauthorized("Missing 'authorization' header".to_string())
            })?;
            let parts: Vec<&str> = auth.split_whitespace().collect();
            if parts.len() != 2 || !parts[0].eq_ignore_ascii_case("bearer") {
                return Err(RelayError::Unauthorized(
                    "Invalid 'authorization' header format. Expected 'Bearer <token>'."
                        .to_string(),
                ));
            }
            parts[1]
        }
        Dialect::Gemini => header_value(headers, "x-goog-api-key").ok_or_else(|| {
            RelayError::BadRequest("Missing 'x-goog-api-key' header".to_string())
        })?,
    };

    if provided != placeholder {
        return Err(RelayError::Unauthorized(
            "Invalid API key/token provided.".to_string(),
        ));
    }

    logger::debug("middleware", "Placeholder token validated successfully.");
    Ok(())
}

/// Extract the model name from a Gemini-style path: the segment after
/// `models/`, up to an optional `:verb` suffix.
pub fn extract_model_from_path(path: &str) -> Option<String> {
    let mut segments = path.trim_start_matches('/').split('/');
    while let Some(segment) = segments.next() {
        if segment.eq_ignore_ascii_case("models") {
            if let Some(model_segment) = segments.next() {
                let model = model_segment.split(':').next().unwrap_or(model_segment);
                let model = model.trim();
                if !model.is_empty() {
                    return Some(model.to_string());
                }
            }
        }
    }
    None
}

/// Build the pass-through plan for a native Gemini request.
pub fn plan_gemini_request(path: &str, body: Bytes) -> RelayResult<RelayPlan> {
    let model = extract_model_from_path(path).ok_or_else(|| {
        RelayError::ModelUndetermined(format!(
            "Could not determine model for request path '{}'.",
            path
        ))
    })?;

    Ok(RelayPlan {
        dialect: Dialect::Gemini,
        original_path: path.to_string(),
        upstream_path: path.trim_start_matches('/').to_string(),
        model,
        body: RelayBody::Raw(body),
    })
}
