//! Daily usage ledger.
//!
//! Tracks, for the current calendar day, how often each upstream key was
//! used in total and per model, and which (key, model) pairs hit the
//! upstream rate limit and are quarantined until the next day. The whole
//! ledger is rewritten to a JSON snapshot on every mutation; the rewrite
//! goes through a sibling temp file and an atomic rename so a crash can
//! never leave a half-written snapshot behind.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;

use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::logger;

/// Current calendar date in the process's local time.
pub fn today() -> NaiveDate {
    chrono::Local::now().date_naive()
}

/// Usage state for one calendar day.
///
/// Serializes to the snapshot format:
/// `{"date", "counts", "model_counts", "exhausted_keys"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageLedger {
    #[serde(rename = "date")]
    pub day: NaiveDate,
    /// Key -> uses today (every non-429 forward counts as a use).
    #[serde(rename = "counts", default)]
    pub totals: BTreeMap<String, u64>,
    /// Key -> model -> uses today.
    #[serde(rename = "model_counts", default)]
    pub per_model: BTreeMap<String, BTreeMap<String, u64>>,
    /// Key -> models the key rate-limited on today. Quarantine is per
    /// (key, model); a key stays usable for other models.
    #[serde(
        rename = "exhausted_keys",
        default,
        deserialize_with = "de_exhausted"
    )]
    pub exhausted: BTreeMap<String, BTreeSet<String>>,
}

/// Accept the current map shape, and recognize the historic flat-list
/// shape (a bare array of keys) by resetting the exhaustion map; the
/// per-model information cannot be recovered from it.
fn de_exhausted<'de, D>(deserializer: D) -> Result<BTreeMap<String, BTreeSet<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Value::deserialize(deserializer)?;
    match raw {
        Value::Object(entries) => {
            let mut out = BTreeMap::new();
            for (key, models) in entries {
                let Value::Array(models) = models else {
                    logger::warn(
                        "ledger",
                        "Unexpected entry format in 'exhausted_keys'. Resetting.",
                    );
                    return Ok(BTreeMap::new());
                };
                let set: BTreeSet<String> = models
                    .into_iter()
                    .filter_map(|m| m.as_str().map(str::to_string))
                    .collect();
                out.insert(key, set);
            }
            Ok(out)
        }
        Value::Array(_) => {
            logger::info(
                "ledger",
                "Old format for exhausted_keys detected (list). Resetting for today.",
            );
            Ok(BTreeMap::new())
        }
        _ => {
            logger::warn(
                "ledger",
                "Unexpected format for 'exhausted_keys' in usage data. Resetting.",
            );
            Ok(BTreeMap::new())
        }
    }
}

impl UsageLedger {
    pub fn empty(day: NaiveDate) -> Self {
        Self {
            day,
            totals: BTreeMap::new(),
            per_model: BTreeMap::new(),
            exhausted: BTreeMap::new(),
        }
    }

    pub fn is_exhausted(&self, key: &str, model: &str) -> bool {
        self.exhausted
            .get(key)
            .map(|models| models.contains(model))
            .unwrap_or(false)
    }

    pub fn mark_exhausted(&mut self, key: &str, model: &str) {
        self.exhausted
            .entry(key.to_string())
            .or_default()
            .insert(model.to_string());
    }

    /// Count a forwarded request against `key`. Returns the new
    /// (model count, total count) pair.
    pub fn record_success(&mut self, key: &str, model: &str) -> (u64, u64) {
        let total = self.totals.entry(key.to_string()).or_insert(0);
        *total += 1;
        let model_count = self
            .per_model
            .entry(key.to_string())
            .or_default()
            .entry(model.to_string())
            .or_insert(0);
        *model_count += 1;
        (*model_count, *total)
    }

    /// True iff every key in the pool is quarantined for `model`.
    pub fn all_exhausted_for<'a, I>(&self, keys: I, model: &str) -> bool
    where
        I: IntoIterator<Item = &'a str>,
    {
        keys.into_iter().all(|key| self.is_exhausted(key, model))
    }
}

/// Load the snapshot at `path` if it exists and describes today; any
/// failure or stale date starts a fresh ledger for today. Never errors.
pub fn load(path: &str) -> UsageLedger {
    let today = today();
    logger::info(
        "ledger",
        &format!("Attempting to load usage data for {} from: {}", today, path),
    );

    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            logger::info(
                "ledger",
                &format!("Usage data file not found: {}. Starting with empty counts.", path),
            );
            return UsageLedger::empty(today);
        }
        Err(e) => {
            logger::error(
                "ledger",
                &format!("Error reading usage data file {}: {}. Starting fresh.", path, e),
            );
            return UsageLedger::empty(today);
        }
    };

    match serde_json::from_str::<UsageLedger>(&raw) {
        Ok(ledger) if ledger.day == today => {
            logger::info(
                "ledger",
                &format!(
                    "Successfully loaded usage data for {} ({} keys tracked, {} quarantined).",
                    today,
                    ledger.totals.len(),
                    ledger.exhausted.len()
                ),
            );
            ledger
        }
        Ok(ledger) => {
            logger::info(
                "ledger",
                &format!(
                    "Usage data in {} is for a previous date ({}). Starting fresh for {}.",
                    path, ledger.day, today
                ),
            );
            UsageLedger::empty(today)
        }
        Err(e) => {
            logger::error(
                "ledger",
                &format!("Error decoding usage data file {}: {}. Starting fresh.", path, e),
            );
            UsageLedger::empty(today)
        }
    }
}

/// Persist the snapshot. Failures are logged and swallowed; a failed save
/// never fails the request that triggered it.
pub fn save(ledger: &UsageLedger, path: &str) {
    match write_snapshot(ledger, path) {
        Ok(()) => logger::debug(
            "ledger",
            &format!("Saved usage data for {} to {}", ledger.day, path),
        ),
        Err(e) => logger::error(
            "ledger",
            &format!("Error saving usage data to {}: {}", path, e),
        ),
    }
}

fn write_snapshot(ledger: &UsageLedger, path: &str) -> Result<(), String> {
    let json = serde_json::to_string_pretty(ledger)
        .map_err(|e| format!("failed to serialize usage data: {}", e))?;
    let tmp = format!("{}.tmp", path);
    fs::write(&tmp, json).map_err(|e| format!("failed to write {}: {}", tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| format!("failed to rename {} over {}: {}", tmp, path, e))
}
