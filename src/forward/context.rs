//! In-flight request description shared across the relay pipeline.

use axum::body::Bytes;
use serde_json::Value;

/// The two request/response shapes the relay speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// OpenAI chat-completions (path `v1/chat/completions`)
    OpenAi,
    /// Native Gemini pass-through (every other path)
    Gemini,
}

impl Dialect {
    pub fn as_str(&self) -> &'static str {
        match self {
            Dialect::OpenAi => "openai",
            Dialect::Gemini => "gemini",
        }
    }
}

/// Body to forward upstream: translated JSON for the OpenAI dialect, the
/// client's original bytes for pass-through.
#[derive(Debug, Clone)]
pub enum RelayBody {
    Json(Value),
    Raw(Bytes),
}

/// Everything the selection loop needs, derived before any key is picked.
#[derive(Debug, Clone)]
pub struct RelayPlan {
    pub dialect: Dialect,
    /// Path as the client sent it, for logging.
    pub original_path: String,
    /// Upstream path without a leading slash.
    pub upstream_path: String,
    /// Model name used for quarantine accounting and usage counters.
    pub model: String,
    pub body: RelayBody,
}

impl RelayPlan {
    /// Whether the upstream endpoint is the streaming variant.
    pub fn is_streaming(&self) -> bool {
        self.upstream_path.ends_with("streamGenerateContent")
    }
}
