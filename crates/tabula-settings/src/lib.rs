//! # tabula-settings
//!
//! Layered configuration for the tabula agent engine.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`TabulaSettings::default()`]
//! 2. **User file**: `~/.tabula/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `TABULA_*` and `OPENAI_BASE_URL`

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, deep_merge, load_settings, load_settings_from_path, settings_path,
};
pub use types::*;

use std::sync::OnceLock;

static SETTINGS: OnceLock<TabulaSettings> = OnceLock::new();

/// Process-wide settings.
///
/// The first call loads `~/.tabula/settings.json` with env overrides. A file
/// that fails to load is reported and replaced by the defaults.
pub fn get_settings() -> &'static TabulaSettings {
    SETTINGS.get_or_init(|| {
        load_settings().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "failed to load settings, using defaults");
            TabulaSettings::default()
        })
    })
}

/// Install `settings` as the process-wide value.
///
/// Returns the settings back if they were already initialized.
#[allow(clippy::result_large_err)]
pub fn init_settings(settings: TabulaSettings) -> std::result::Result<(), TabulaSettings> {
    SETTINGS.set(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_path_is_under_dot_tabula() {
        let path = settings_path();
        assert!(path.ends_with(".tabula/settings.json"));
    }

    #[test]
    fn second_init_is_rejected() {
        let _ = init_settings(TabulaSettings::default());
        assert!(init_settings(TabulaSettings::default()).is_err());
        assert!(!get_settings().agent.model.is_empty());
    }
}
