//! # tether-settings
//!
//! Layered configuration for the tether session core.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`TetherSettings::default()`]
//! 2. **User file**: `~/.tether/settings.json`, deep-merged over defaults
//! 3. **Environment variables**: `TETHER_*` overrides (highest priority)

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;

use std::sync::OnceLock;

static SETTINGS: OnceLock<TetherSettings> = OnceLock::new();

/// Get the global settings instance.
///
/// Loads on first call and caches the result. Falls back to compiled
/// defaults if loading fails.
pub fn get_settings() -> &'static TetherSettings {
    SETTINGS.get_or_init(|| {
        load_settings().unwrap_or_else(|err| {
            tracing::warn!(error = %err, "failed to load settings, using defaults");
            TetherSettings::default()
        })
    })
}

/// Initialize the global settings with a specific value.
///
/// Returns the value back if the global was already initialized.
pub fn init_settings(settings: TetherSettings) -> std::result::Result<(), TetherSettings> {
    SETTINGS.set(settings)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_path_under_tether_dir() {
        let path = settings_path();
        assert!(path.ends_with(".tether/settings.json"));
    }

    #[test]
    fn global_is_cached() {
        let a = get_settings();
        let b = get_settings();
        assert!(std::ptr::eq(a, b));
        assert!(init_settings(TetherSettings::default()).is_err());
    }
}
