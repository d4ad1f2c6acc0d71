//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`TetherSettings::default()`]
//! 2. If `~/.tether/settings.json` exists, deep-merge user values over defaults
//! 3. Apply environment variable overrides (highest priority)
//! 4. Validate the result
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::{DispatchMode, TetherSettings};

/// Resolve the path to the settings file (`~/.tether/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".tether").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<TetherSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults. Invalid JSON or a value that fails
/// [`TetherSettings::validate`] is an error.
pub fn load_settings_from_path(path: &Path) -> Result<TetherSettings> {
    load_with(path, |name| std::env::var(name).ok())
}

fn load_with(path: &Path, env: impl Fn(&str) -> Option<String>) -> Result<TetherSettings> {
    let defaults = serde_json::to_value(TetherSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: TetherSettings = serde_json::from_value(merged)?;
    apply_overrides(&mut settings, env);
    settings.validate()?;
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = match target_map.remove(&key) {
                    Some(target_val) => deep_merge(target_val, source_val),
                    None => source_val,
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply `TETHER_*` environment variable overrides.
///
/// | Variable | Field | Accepted |
/// |---|---|---|
/// | `TETHER_LOG_LEVEL` | `logging.level` | any non-empty string |
/// | `TETHER_LOG_JSON` | `logging.json` | boolean |
/// | `TETHER_DISPATCH_MODE` | `dispatch.mode` | `inline` / `executor` |
/// | `TETHER_DISPATCH_ORDERED` | `dispatch.ordered` | boolean |
/// | `TETHER_DISPATCH_DRAIN_BATCH` | `dispatch.drainBatch` | 1..=65536 |
///
/// Invalid values are logged and ignored.
pub fn apply_env_overrides(settings: &mut TetherSettings) {
    apply_overrides(settings, |name| std::env::var(name).ok());
}

fn apply_overrides(settings: &mut TetherSettings, env: impl Fn(&str) -> Option<String>) {
    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = read_string(&env, "TETHER_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = read_bool(&env, "TETHER_LOG_JSON") {
        settings.logging.json = v;
    }

    // ── Dispatch ────────────────────────────────────────────────────
    if let Some(v) = read_with(&env, "TETHER_DISPATCH_MODE", "dispatch mode", parse_dispatch_mode) {
        settings.dispatch.mode = v;
    }
    if let Some(v) = read_bool(&env, "TETHER_DISPATCH_ORDERED") {
        settings.dispatch.ordered = v;
    }
    if let Some(v) = read_with(&env, "TETHER_DISPATCH_DRAIN_BATCH", "usize", |val| {
        parse_usize_range(val, 1, 65_536)
    }) {
        settings.dispatch.drain_batch = v;
    }
}

// ── Pure parsing functions ──────────────────────────────────────────────────

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `usize` within an inclusive range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (min..=max).contains(&n).then_some(n)
}

/// Parse a dispatch mode name (case-insensitive).
pub fn parse_dispatch_mode(val: &str) -> Option<DispatchMode> {
    match val.to_lowercase().as_str() {
        "inline" => Some(DispatchMode::Inline),
        "executor" => Some(DispatchMode::Executor),
        _ => None,
    }
}

// ── Env readers ─────────────────────────────────────────────────────────────

fn read_string(env: &impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    env(name).filter(|v| !v.trim().is_empty())
}

fn read_bool(env: &impl Fn(&str) -> Option<String>, name: &str) -> Option<bool> {
    read_with(env, name, "boolean", parse_bool)
}

fn read_with<T>(
    env: &impl Fn(&str) -> Option<String>,
    name: &str,
    kind: &str,
    parse: impl Fn(&str) -> Option<T>,
) -> Option<T> {
    let val = env(name)?;
    let result = parse(&val);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, kind, "invalid env var, ignoring");
    }
    result
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
