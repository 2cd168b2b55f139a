//! Settings loading: defaults, then the user file, then env overrides.
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::types::TabulaSettings;

/// Path of the user settings file (`~/.tabula/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".tabula").join("settings.json")
}

/// Load settings from the default path with env overrides.
pub fn load_settings() -> Result<TabulaSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from `path` with env overrides.
///
/// A missing file yields the defaults. Invalid JSON or an out-of-range
/// value in the file is an error.
pub fn load_settings_from_path(path: &Path) -> Result<TabulaSettings> {
    let defaults = serde_json::to_value(TabulaSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: TabulaSettings = serde_json::from_value(merged)?;
    settings.validate()?;
    apply_env_overrides(&mut settings);
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

/// Apply `TABULA_*` and `OPENAI_BASE_URL` overrides.
///
/// Values that fail to parse or fall outside their range are ignored with a
/// warning.
pub fn apply_env_overrides(settings: &mut TabulaSettings) {
    if let Some(v) = read_env_string("TABULA_MODEL") {
        settings.agent.model = v;
    }
    if let Some(v) = read_env_f64("TABULA_TEMPERATURE", 0.0, 2.0) {
        settings.agent.temperature = v;
    }
    if let Some(v) = read_env_u32("TABULA_MAX_ERRORS", 1, 1000) {
        settings.agent.max_consecutive_errors = v;
    }
    if let Some(v) = read_env_u32("TABULA_MAX_CALLS", 1, 1000) {
        settings.agent.max_consecutive_calls = v;
    }
    if let Some(v) = read_env_string("TABULA_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = read_env_string("OPENAI_BASE_URL") {
        settings.openai.base_url = v;
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a `u32` within an inclusive range.
pub fn parse_u32_range(val: &str, min: u32, max: u32) -> Option<u32> {
    let n: u32 = val.trim().parse().ok()?;
    (min..=max).contains(&n).then_some(n)
}

/// Parse a finite `f64` within an inclusive range.
pub fn parse_f64_range(val: &str, min: f64, max: f64) -> Option<f64> {
    let n: f64 = val.trim().parse().ok()?;
    (n.is_finite() && (min..=max).contains(&n)).then_some(n)
}

// ── Env var readers (thin wrappers) ─────────────────────────────────────────

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn read_env_u32(name: &str, min: u32, max: u32) -> Option<u32> {
    let val = std::env::var(name).ok()?;
    let result = parse_u32_range(&val, min, max);
    if result.is_none() {
        warn!(key = name, value = %val, "invalid integer env var, ignoring");
    }
    result
}

fn read_env_f64(name: &str, min: f64, max: f64) -> Option<f64> {
    let val = std::env::var(name).ok()?;
    let result = parse_f64_range(&val, min, max);
    if result.is_none() {
        warn!(key = name, value = %val, "invalid number env var, ignoring");
    }
    result
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::SettingsError;
    use assert_matches::assert_matches;

    // ── deep_merge ──────────────────────────────────────────────────

    #[test]
    fn merge_nested_override() {
        let target = serde_json::json!({"agent": {"model": "a", "temperature": 0.1}});
        let source = serde_json::json!({"agent": {"model": "b"}});
        let merged = deep_merge(target, source);
        assert_eq!(merged["agent"]["model"], "b");
        assert_eq!(merged["agent"]["temperature"], 0.1);
    }

    #[test]
    fn merge_array_replaces() {
        let merged = deep_merge(
            serde_json::json!({"items": [1, 2, 3]}),
            serde_json::json!({"items": [4]}),
        );
        assert_eq!(merged["items"], serde_json::json!([4]));
    }

    #[test]
    fn merge_null_preserves_target() {
        let merged = deep_merge(serde_json::json!({"a": 1}), serde_json::json!({"a": null}));
        assert_eq!(merged["a"], 1);
    }

    #[test]
    fn merge_primitive_replaces_object() {
        let merged = deep_merge(
            serde_json::json!({"a": {"nested": true}}),
            serde_json::json!({"a": 42}),
        );
        assert_eq!(merged["a"], 42);
    }

    // ── load_settings_from_path ─────────────────────────────────────

    #[test]
    fn missing_file_returns_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = load_settings_from_path(&dir.path().join("absent.json")).unwrap();
        assert_eq!(settings.agent.max_consecutive_calls, 10);
        assert_eq!(settings.sandbox, TabulaSettings::default().sandbox);
    }

    #[test]
    fn partial_file_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"agent": {"maxConsecutiveErrors": 3}, "sandbox": {"maxRows": 500}}"#,
        )
        .unwrap();

        let settings = load_settings_from_path(&path).unwrap();
        assert_eq!(settings.agent.max_consecutive_errors, 3);
        assert_eq!(settings.agent.max_consecutive_calls, 10);
        assert_eq!(settings.sandbox.max_rows, 500);
        assert_eq!(settings.sandbox.max_steps, 100_000);
    }

    #[test]
    fn invalid_json_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "not json").unwrap();
        assert_matches!(load_settings_from_path(&path), Err(SettingsError::Json(_)));
    }

    #[test]
    fn out_of_range_file_value_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"agent": {"temperature": 9}}"#).unwrap();
        assert_matches!(
            load_settings_from_path(&path),
            Err(SettingsError::InvalidValue(_))
        );
    }

    // ── parsers ─────────────────────────────────────────────────────

    #[test]
    fn parse_u32_valid_and_bounds() {
        assert_eq!(parse_u32_range("7", 1, 1000), Some(7));
        assert_eq!(parse_u32_range(" 12 ", 1, 1000), Some(12));
        assert_eq!(parse_u32_range("0", 1, 1000), None);
        assert_eq!(parse_u32_range("1001", 1, 1000), None);
        assert_eq!(parse_u32_range("ten", 1, 1000), None);
    }

    #[test]
    fn parse_f64_valid_and_bounds() {
        assert_eq!(parse_f64_range("0.7", 0.0, 2.0), Some(0.7));
        assert_eq!(parse_f64_range("2", 0.0, 2.0), Some(2.0));
        assert_eq!(parse_f64_range("-0.1", 0.0, 2.0), None);
        assert_eq!(parse_f64_range("NaN", 0.0, 2.0), None);
        assert_eq!(parse_f64_range("hot", 0.0, 2.0), None);
    }
}
