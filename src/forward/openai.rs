//! OpenAI chat-completions dialect translation.
//!
//! Pure mapping between the OpenAI dialect and the Gemini generate-content
//! dialect: request conversion, non-streaming response conversion, and the
//! streaming SSE frame builder. Nothing here touches the ledger or the
//! network.

use axum::body::Bytes;
use serde_json::{json, Map, Value};

use super::context::{Dialect, RelayBody, RelayPlan};
use super::error::{RelayError, RelayResult};
use crate::logger;

/// Model used when a chat request names none.
pub const FALLBACK_MODEL: &str = "gemini-pro";

/// Categories pinned to `BLOCK_NONE` on every translated request.
const SAFETY_CATEGORIES: &[&str] = &[
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
    "HARM_CATEGORY_HARASSMENT",
    "HARM_CATEGORY_DANGEROUS_CONTENT",
];

fn epoch_seconds() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Parse and translate a chat-completions request into the full relay
/// plan: Gemini body, upstream path, model, and streaming flag.
pub fn plan_chat_request(original_path: &str, body: &Bytes) -> RelayResult<RelayPlan> {
    let payload: Value = serde_json::from_slice(body)
        .map_err(|_| RelayError::BadRequest("Invalid JSON in request body.".to_string()))?;

    let (gemini_body, model, is_streaming) = convert_chat_request(&payload);
    if model.is_empty() {
        return Err(RelayError::ModelUndetermined(
            "Could not determine model from request body.".to_string(),
        ));
    }

    let action = if is_streaming {
        "streamGenerateContent"
    } else {
        "generateContent"
    };
    let upstream_path = format!("v1beta/models/{}:{}", model, action);

    logger::info(
        "openai",
        &format!(
            "Chat request mapped to Gemini model: {}, streaming: {}",
            model, is_streaming
        ),
    );

    Ok(RelayPlan {
        dialect: Dialect::OpenAi,
        original_path: original_path.to_string(),
        upstream_path,
        model,
        body: RelayBody::Json(gemini_body),
    })
}

fn content_is_empty(content: &Value) -> bool {
    match content {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        _ => false,
    }
}

/// Translate an OpenAI chat request body into a Gemini request body.
/// Returns (gemini body, target model, streaming flag).
pub fn convert_chat_request(payload: &Value) -> (Value, String, bool) {
    // Model names may arrive prefixed ("openai/gemini-pro"); only the part
    // after the last slash is meaningful upstream.
    let model = payload
        .get("model")
        .and_then(Value::as_str)
        .map(|m| m.rsplit('/').next().unwrap_or(m).to_string())
        .unwrap_or_else(|| FALLBACK_MODEL.to_string());

    let is_streaming = payload
        .get("stream")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    let mut contents = Vec::new();
    let mut system_instruction: Option<Value> = None;

    let empty = Vec::new();
    let messages = payload
        .get("messages")
        .and_then(Value::as_array)
        .unwrap_or(&empty);
    for message in messages {
        let role = message.get("role").and_then(Value::as_str).unwrap_or("");
        let Some(content) = message.get("content") else {
            continue;
        };
        if content_is_empty(content) {
            continue;
        }

        // System prompts travel via systemInstruction, not contents. The
        // first string-valued system message wins.
        if role == "system" {
            if system_instruction.is_none() {
                if let Some(text) = content.as_str() {
                    system_instruction = Some(json!({
                        "role": "system",
                        "parts": [{"text": text}]
                    }));
                }
            }
            continue;
        }

        let gemini_role = if role == "user" { "user" } else { "model" };
        match content {
            Value::String(text) => {
                contents.push(json!({"role": gemini_role, "parts": [{"text": text}]}));
            }
            Value::Array(parts) => {
                let mut combined = String::new();
                for part in parts {
                    if part.get("type").and_then(Value::as_str) == Some("text") {
                        combined.push_str(part.get("text").and_then(Value::as_str).unwrap_or(""));
                    } else {
                        logger::debug(
                            "openai",
                            &format!("Dropping non-text content part for role '{}'.", role),
                        );
                    }
                }
                if combined.is_empty() {
                    logger::warn(
                        "openai",
                        &format!(
                            "Message with role '{}' had list content, but no text parts found.",
                            role
                        ),
                    );
                } else {
                    contents.push(json!({"role": gemini_role, "parts": [{"text": combined}]}));
                }
            }
            _ => {
                logger::warn(
                    "openai",
                    &format!("Unsupported content type for role '{}'.", role),
                );
            }
        }
    }

    let mut request = Map::new();
    request.insert("contents".to_string(), Value::Array(contents));
    if let Some(system) = system_instruction {
        request.insert("systemInstruction".to_string(), system);
    }

    let mut generation = Map::new();
    if let Some(temperature) = payload.get("temperature") {
        generation.insert("temperature".to_string(), temperature.clone());
    }
    if let Some(max_tokens) = payload.get("max_tokens") {
        generation.insert("maxOutputTokens".to_string(), max_tokens.clone());
    }
    if let Some(top_p) = payload.get("top_p") {
        generation.insert("topP".to_string(), top_p.clone());
    }
    if let Some(stop) = payload.get("stop") {
        let mapped = match stop {
            Value::String(text) => Value::Array(vec![Value::String(text.clone())]),
            other => other.clone(),
        };
        generation.insert("stopSequences".to_string(), mapped);
    }
    if !generation.is_empty() {
        request.insert("generationConfig".to_string(), Value::Object(generation));
    }

    let safety: Vec<Value> = SAFETY_CATEGORIES
        .iter()
        .map(|category| json!({"category": category, "threshold": "BLOCK_NONE"}))
        .collect();
    request.insert("safetySettings".to_string(), Value::Array(safety));

    (Value::Object(request), model, is_streaming)
}

fn map_finish_reason(reason: &str) -> &'static str {
    match reason {
        "MAX_TOKENS" => "length",
        "SAFETY" => "content_filter",
        _ => "stop",
    }
}

/// Translate a non-streaming Gemini response body into an OpenAI
/// chat-completion object. A parse failure means the caller falls back to
/// the raw upstream body.
pub fn convert_chat_response(raw: &[u8], model: &str) -> Result<Value, serde_json::Error> {
    let response: Value = serde_json::from_slice(raw)?;

    let mut full_text = "";
    let mut finish_reason = "stop";
    if let Some(candidate) = response
        .get("candidates")
        .and_then(Value::as_array)
        .and_then(|c| c.first())
    {
        full_text = candidate
            .get("content")
            .and_then(|c| c.get("parts"))
            .and_then(Value::as_array)
            .and_then(|p| p.first())
            .and_then(|p| p.get("text"))
            .and_then(Value::as_str)
            .unwrap_or("");
        finish_reason = map_finish_reason(
            candidate
                .get("finishReason")
                .and_then(Value::as_str)
                .unwrap_or("STOP"),
        );
    }

    let usage_field = |name: &str| {
        response
            .get("usageMetadata")
            .and_then(|u| u.get(name))
            .and_then(Value::as_i64)
            .unwrap_or(0)
    };

    Ok(json!({
        "id": format!("chatcmpl-{}", uuid::Uuid::new_v4()),
        "object": "chat.completion",
        "created": epoch_seconds(),
        "model": model,
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": full_text},
            "finish_reason": finish_reason
        }],
        "usage": {
            "prompt_tokens": usage_field("promptTokenCount"),
            "completion_tokens": usage_field("candidatesTokenCount"),
            "total_tokens": usage_field("totalTokenCount")
        }
    }))
}

/// Convert the upstream streaming body into SSE frames.
///
/// The upstream streaming endpoint returns the whole stream as one JSON
/// array of chunk objects, so the body is parsed in full and replayed as
/// `chat.completion.chunk` frames. A chunk carrying an `error` and no
/// `candidates` stops emission. Exactly one `data: [DONE]` frame always
/// terminates the stream, whatever happened before it.
///
/// If the upstream ever switches to NDJSON or SSE framing this path
/// breaks.
pub fn stream_frames(decoded: &str, model: &str) -> Vec<Bytes> {
    let created = epoch_seconds();
    let mut frames = Vec::new();
    let mut content_chunks = 0usize;

    match serde_json::from_str::<Value>(decoded) {
        Ok(Value::Array(chunks)) => {
            for chunk in &chunks {
                let candidates = chunk.get("candidates").filter(|c| !c.is_null());
                if candidates.is_none() && chunk.get("error").is_some() {
                    logger::error(
                        "openai",
                        &format!(
                            "Error object found within Gemini response array: {}",
                            chunk["error"]
                        ),
                    );
                    break;
                }

                let text = candidates
                    .and_then(Value::as_array)
                    .and_then(|c| c.first())
                    .and_then(|c| c.get("content"))
                    .and_then(|c| c.get("parts"))
                    .and_then(Value::as_array)
                    .and_then(|p| p.first())
                    .and_then(|p| p.get("text"))
                    .and_then(Value::as_str)
                    .unwrap_or("");

                if text.is_empty() {
                    continue;
                }

                let frame = json!({
                    "id": format!("chatcmpl-{}", uuid::Uuid::new_v4()),
                    "object": "chat.completion.chunk",
                    "created": created,
                    "model": model,
                    "choices": [{
                        "index": 0,
                        "delta": {"content": text},
                        "finish_reason": null
                    }]
                });
                frames.push(Bytes::from(format!("data: {}\n\n", frame)));
                content_chunks += 1;
            }
        }
        Ok(_) => {
            logger::error(
                "openai",
                "Gemini stream response was not a JSON array as expected.",
            );
        }
        Err(e) => {
            logger::error(
                "openai",
                &format!("Failed to decode Gemini response array: {}", e),
            );
        }
    }

    frames.push(Bytes::from_static(b"data: [DONE]\n\n"));
    logger::info(
        "openai",
        &format!(
            "Finished streaming conversion, sent {} content chunks.",
            content_chunks
        ),
    );
    frames
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_chat_request_shape() {
        let payload = json!({
            "model": "gemini-pro",
            "messages": [{"role": "user", "content": "hi"}],
            "stream": false
        });
        let (body, model, streaming) = convert_chat_request(&payload);

        assert_eq!(model, "gemini-pro");
        assert!(!streaming);
        assert_eq!(body["contents"], json!([{"role": "user", "parts": [{"text": "hi"}]}]));
        assert_eq!(body["safetySettings"].as_array().unwrap().len(), 4);
        assert_eq!(body["safetySettings"][0]["threshold"], "BLOCK_NONE");
        assert!(body.get("generationConfig").is_none());
        assert!(body.get("systemInstruction").is_none());
    }

    #[test]
    fn model_prefix_is_stripped_and_fallback_applies() {
        let (_, model, _) = convert_chat_request(&json!({"model": "openai/gemini-pro"}));
        assert_eq!(model, "gemini-pro");

        let (_, model, _) = convert_chat_request(&json!({"messages": []}));
        assert_eq!(model, FALLBACK_MODEL);
    }

    #[test]
    fn roles_and_system_prompt_are_mapped() {
        let payload = json!({
            "messages": [
                {"role": "system", "content": "be terse"},
                {"role": "system", "content": "ignored: only the first wins"},
                {"role": "user", "content": "hi"},
                {"role": "assistant", "content": "hello"},
                {"role": "user", "content": ""}
            ]
        });
        let (body, _, _) = convert_chat_request(&payload);

        let contents = body["contents"].as_array().unwrap();
        assert_eq!(contents.len(), 2);
        assert_eq!(contents[0]["role"], "user");
        assert_eq!(contents[1]["role"], "model");
        assert_eq!(
            body["systemInstruction"],
            json!({"role": "system", "parts": [{"text": "be terse"}]})
        );
    }

    #[test]
    fn list_content_concatenates_text_parts() {
        let payload = json!({
            "messages": [{
                "role": "user",
                "content": [
                    {"type": "text", "text": "part one, "},
                    {"type": "image_url", "image_url": {"url": "data:..."}},
                    {"type": "text", "text": "part two"}
                ]
            }]
        });
        let (body, _, _) = convert_chat_request(&payload);

        assert_eq!(
            body["contents"][0]["parts"],
            json!([{"text": "part one, part two"}])
        );
    }

    #[test]
    fn generation_config_maps_and_wraps_stop() {
        let payload = json!({
            "temperature": 0.4,
            "max_tokens": 256,
            "top_p": 0.9,
            "stop": "END"
        });
        let (body, _, _) = convert_chat_request(&payload);

        let config = &body["generationConfig"];
        assert_eq!(config["temperature"], 0.4);
        assert_eq!(config["maxOutputTokens"], 256);
        assert_eq!(config["topP"], 0.9);
        assert_eq!(config["stopSequences"], json!(["END"]));

        let (body, _, _) = convert_chat_request(&json!({"stop": ["a", "b"]}));
        assert_eq!(body["generationConfig"]["stopSequences"], json!(["a", "b"]));
    }

    #[test]
    fn plan_derives_upstream_path_from_stream_flag() {
        let body = Bytes::from(r#"{"model":"gemini-pro","stream":true}"#);
        let plan = plan_chat_request("/v1/chat/completions", &body).unwrap();
        assert_eq!(plan.upstream_path, "v1beta/models/gemini-pro:streamGenerateContent");
        assert!(plan.is_streaming());

        let body = Bytes::from(r#"{"model":"gemini-pro"}"#);
        let plan = plan_chat_request("/v1/chat/completions", &body).unwrap();
        assert_eq!(plan.upstream_path, "v1beta/models/gemini-pro:generateContent");

        let bad = Bytes::from("not json");
        assert!(matches!(
            plan_chat_request("/v1/chat/completions", &bad),
            Err(RelayError::BadRequest(_))
        ));
    }

    #[test]
    fn response_conversion_maps_text_finish_reason_and_usage() {
        let upstream = json!({
            "candidates": [{
                "content": {"parts": [{"text": "hello"}]},
                "finishReason": "STOP"
            }],
            "usageMetadata": {
                "promptTokenCount": 1,
                "candidatesTokenCount": 1,
                "totalTokenCount": 2
            }
        });
        let out = convert_chat_response(upstream.to_string().as_bytes(), "gemini-pro").unwrap();

        assert_eq!(out["object"], "chat.completion");
        assert_eq!(out["model"], "gemini-pro");
        assert_eq!(out["choices"][0]["message"]["content"], "hello");
        assert_eq!(out["choices"][0]["finish_reason"], "stop");
        assert_eq!(out["usage"]["total_tokens"], 2);
        assert!(out["id"].as_str().unwrap().starts_with("chatcmpl-"));
    }

    #[test]
    fn finish_reasons_map_to_openai_vocabulary() {
        for (gemini, openai) in [
            ("STOP", "stop"),
            ("MAX_TOKENS", "length"),
            ("SAFETY", "content_filter"),
            ("RECITATION", "stop"),
        ] {
            let upstream = json!({
                "candidates": [{"content": {"parts": [{"text": "x"}]}, "finishReason": gemini}]
            });
            let out = convert_chat_response(upstream.to_string().as_bytes(), "m").unwrap();
            assert_eq!(out["choices"][0]["finish_reason"], openai, "for {}", gemini);
        }
    }

    #[test]
    fn response_without_candidates_yields_empty_content() {
        let out = convert_chat_response(b"{}", "gemini-pro").unwrap();
        assert_eq!(out["choices"][0]["message"]["content"], "");
        assert_eq!(out["choices"][0]["finish_reason"], "stop");
        assert_eq!(out["usage"]["total_tokens"], 0);

        assert!(convert_chat_response(b"not json", "gemini-pro").is_err());
    }

    fn frame_json(frame: &Bytes) -> Value {
        let text = std::str::from_utf8(frame).unwrap();
        let data = text.strip_prefix("data: ").unwrap().trim_end();
        serde_json::from_str(data).unwrap()
    }

    #[test]
    fn stream_frames_replay_chunks_and_terminate_with_done() {
        let upstream = json!([
            {"candidates": [{"content": {"parts": [{"text": "he"}]}}]},
            {"candidates": [{"content": {"parts": [{"text": "llo"}]}}]}
        ]);
        let frames = stream_frames(&upstream.to_string(), "gemini-pro");

        assert_eq!(frames.len(), 3);
        let first = frame_json(&frames[0]);
        let second = frame_json(&frames[1]);
        assert_eq!(first["object"], "chat.completion.chunk");
        assert_eq!(first["choices"][0]["delta"]["content"], "he");
        assert_eq!(second["choices"][0]["delta"]["content"], "llo");
        assert_eq!(first["created"], second["created"]);
        assert!(first["choices"][0]["finish_reason"].is_null());
        assert_eq!(&frames[2][..], b"data: [DONE]\n\n");
    }

    #[test]
    fn stream_error_chunk_stops_emission_early() {
        let upstream = json!([
            {"candidates": [{"content": {"parts": [{"text": "partial"}]}}]},
            {"error": {"code": 429, "status": "RESOURCE_EXHAUSTED"}},
            {"candidates": [{"content": {"parts": [{"text": "never sent"}]}}]}
        ]);
        let frames = stream_frames(&upstream.to_string(), "gemini-pro");

        assert_eq!(frames.len(), 2);
        assert_eq!(
            frame_json(&frames[0])["choices"][0]["delta"]["content"],
            "partial"
        );
        assert_eq!(&frames[1][..], b"data: [DONE]\n\n");
    }

    #[test]
    fn malformed_stream_bodies_still_emit_exactly_one_done() {
        for body in ["not json", "{\"candidates\": []}", "[]"] {
            let frames = stream_frames(body, "gemini-pro");
            assert_eq!(frames.len(), 1, "for body {:?}", body);
            assert_eq!(&frames[0][..], b"data: [DONE]\n\n");
        }

        // Chunks without text are skipped, not emitted as empty deltas.
        let upstream = json!([{"candidates": [{"content": {"parts": [{"text": ""}]}}]}]);
        let frames = stream_frames(&upstream.to_string(), "gemini-pro");
        assert_eq!(frames.len(), 1);
    }
}
