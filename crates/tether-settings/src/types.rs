//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase", default)]`, so partial
//! JSON is accepted and missing fields keep their compiled defaults.

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings type.
///
/// ```json
/// {
///   "logging": { "level": "debug" },
///   "dispatch": { "mode": "executor", "drainBatch": 16 }
/// }
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TetherSettings {
    /// Log output configuration.
    pub logging: LoggingSettings,
    /// Handler delivery configuration.
    pub dispatch: DispatchSettings,
}

impl TetherSettings {
    /// Reject values that would leave a service unusable.
    pub fn validate(&self) -> Result<()> {
        if self.dispatch.drain_batch == 0 {
            return Err(SettingsError::InvalidValue(
                "dispatch.drainBatch must be at least 1".to_string(),
            ));
        }
        if self.logging.level.trim().is_empty() {
            return Err(SettingsError::InvalidValue(
                "logging.level must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Log output configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Emit one JSON object per line instead of compact text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            json: false,
        }
    }
}

/// Where application handler callbacks run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchMode {
    /// On the I/O thread that observed the event.
    #[default]
    Inline,
    /// On an executor's worker threads.
    Executor,
}

/// Handler delivery configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DispatchSettings {
    /// Inline or executor delivery.
    pub mode: DispatchMode,
    /// Preserve per-session event order when delivering on an executor.
    pub ordered: bool,
    /// Events an ordered worker drains for one session before yielding.
    pub drain_batch: usize,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            mode: DispatchMode::Inline,
            ordered: true,
            drain_batch: 64,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
