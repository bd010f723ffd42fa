//! Upstream API key store.
//!
//! Keys are loaded once at startup from a newline-delimited file and never
//! change afterwards. Full key values never reach the logs; display always
//! goes through [`suffix`].

use crate::logger;

#[derive(Debug, thiserror::Error)]
pub enum KeyStoreError {
    #[error("failed to read key file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("no API keys found in {0}")]
    Empty(String),
}

/// Immutable, ordered pool of upstream keys.
#[derive(Debug, Clone)]
pub struct KeyStore {
    keys: Vec<String>,
}

impl KeyStore {
    /// Load keys from `path`, one per line. Whitespace-only lines are
    /// ignored and the remaining lines are trimmed.
    pub fn load(path: &str) -> Result<Self, KeyStoreError> {
        logger::info("keys", &format!("Attempting to load API keys from: {}", path));

        let raw = std::fs::read_to_string(path).map_err(|source| KeyStoreError::Read {
            path: path.to_string(),
            source,
        })?;

        let keys: Vec<String> = raw
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect();

        if keys.is_empty() {
            return Err(KeyStoreError::Empty(path.to_string()));
        }

        logger::info("keys", &format!("Successfully loaded {} API keys.", keys.len()));
        for (i, key) in keys.iter().enumerate() {
            logger::debug("keys", &format!("  Key {}: ...{}", i + 1, suffix(key)));
        }

        Ok(Self { keys })
    }

    /// Build a store from keys already in memory.
    pub fn from_keys(keys: Vec<String>) -> Self {
        Self { keys }
    }

    pub fn count(&self) -> usize {
        self.keys.len()
    }

    pub fn get(&self, idx: usize) -> Option<&str> {
        self.keys.get(idx).map(String::as_str)
    }

    /// Iterate keys in load order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.keys.iter().map(String::as_str)
    }
}

/// The trailing few characters of a key, for log correlation.
pub fn suffix(key: &str) -> &str {
    let mut idx = key.len().saturating_sub(4);
    while !key.is_char_boundary(idx) {
        idx -= 1;
    }
    &key[idx..]
}
