//! Runtime configuration.
//!
//! All knobs are environment-sourced constants with the defaults the proxy
//! shipped with. There is no config file; `from_env` is called once at
//! startup and the resulting value is shared through server state.

use std::env;

use crate::logger::LogLevel;

/// Immutable runtime settings.
#[derive(Debug, Clone)]
pub struct Settings {
    /// The single token clients must present in place of a real key.
    pub placeholder_token: String,
    /// Base URL of the upstream Generative Language API.
    pub upstream_base_url: String,
    pub listen_host: String,
    pub listen_port: u16,
    /// Newline-delimited key file, one key per line.
    pub key_file: String,
    /// JSON usage snapshot, rewritten on every ledger mutation.
    pub usage_file: String,
    /// Directory the rotating debug log is created in.
    pub log_dir: String,
    pub log_level: LogLevel,
    /// Total upstream request deadline in seconds.
    pub request_timeout_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            placeholder_token: "PLACEHOLDER_GEMINI_TOKEN".to_string(),
            upstream_base_url: "https://generativelanguage.googleapis.com".to_string(),
            listen_host: "0.0.0.0".to_string(),
            listen_port: 5000,
            key_file: "key.txt".to_string(),
            usage_file: "key_usage.txt".to_string(),
            log_dir: ".".to_string(),
            log_level: LogLevel::Debug,
            request_timeout_secs: 120,
        }
    }
}

fn env_string(key: &str, default: String) -> String {
    match env::var(key) {
        Ok(value) if !value.trim().is_empty() => value.trim().to_string(),
        _ => default,
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|raw| raw.trim().parse().ok())
        .unwrap_or(default)
}

/// Build settings from `RELAY_*` environment variables, falling back to the
/// defaults for anything unset or malformed.
pub fn from_env() -> Settings {
    let defaults = Settings::default();
    let log_level = env::var("RELAY_LOG_LEVEL")
        .ok()
        .and_then(|raw| LogLevel::from_str(&raw))
        .unwrap_or(defaults.log_level);

    Settings {
        placeholder_token: env_string("RELAY_PLACEHOLDER_TOKEN", defaults.placeholder_token),
        upstream_base_url: env_string("RELAY_UPSTREAM_URL", defaults.upstream_base_url),
        listen_host: env_string("RELAY_LISTEN_HOST", defaults.listen_host),
        listen_port: env_parse("RELAY_LISTEN_PORT", defaults.listen_port),
        key_file: env_string("RELAY_KEY_FILE", defaults.key_file),
        usage_file: env_string("RELAY_USAGE_FILE", defaults.usage_file),
        log_dir: env_string("RELAY_LOG_DIR", defaults.log_dir),
        log_level,
        request_timeout_secs: env_parse("RELAY_TIMEOUT_SECS", defaults.request_timeout_secs),
    }
}
