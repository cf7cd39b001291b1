//! Settings loading from configuration files.
//!
//! This module loads [`Settings`] from TOML or JSON files and applies
//! environment variable overrides.
//!
//! ## Loading Order
//!
//! 1. Start with default settings.
//! 2. Load from a TOML or JSON file (overriding defaults).
//! 3. Apply environment variable overrides (highest priority).
//!
//! ## Environment Variable Mapping
//!
//! | Env Var | Setting |
//! |---|---|
//! | `NEUTRAL_DEBUG` | `debug` |
//! | `NEUTRAL_LOG_LEVEL` | `log_level` |
//! | `NEUTRAL_TEMPLATE_DIRS` | `template_dirs` (`:`-separated) |
//! | `NEUTRAL_CACHE_DISABLE` | `engine.cache_disable` |
//! | `NEUTRAL_CACHE_DIR` | `engine.cache_dir` |
//! | `NEUTRAL_CACHE_PREFIX` | `engine.cache_prefix` |
//!
//! ## Examples
//!
//! ```rust,no_run
//! use neutral_core::settings_loader;
//!
//! let settings = settings_loader::from_toml_file_with_env("config/neutral.toml").unwrap();
//! ```

use std::path::{Path, PathBuf};

use crate::error::NeutralError;
use crate::settings::Settings;

/// Loads settings from a TOML string.
///
/// Any fields not present in the TOML keep their default values; nested
/// tables such as `[engine]` are merged key by key.
///
/// # Errors
///
/// Returns an error if the TOML is malformed or cannot be deserialized.
pub fn from_toml_str(toml_str: &str) -> Result<Settings, NeutralError> {
    let toml_value: toml::Value = toml::from_str(toml_str)
        .map_err(|e| NeutralError::Configuration(format!("Failed to parse TOML: {e}")))?;

    overlay_defaults(toml_to_json(toml_value), "TOML")
}

/// Loads settings from a TOML file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or the TOML is malformed.
pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Settings, NeutralError> {
    let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
        NeutralError::Configuration(format!(
            "Failed to read TOML file '{}': {e}",
            path.as_ref().display()
        ))
    })?;
    from_toml_str(&content)
}

/// Loads settings from a TOML file and then applies environment variable overrides.
///
/// # Errors
///
/// Returns an error if the file cannot be read or the TOML is malformed.
pub fn from_toml_file_with_env(path: impl AsRef<Path>) -> Result<Settings, NeutralError> {
    let mut settings = from_toml_file(path)?;
    apply_env_overrides(&mut settings);
    Ok(settings)
}

/// Loads settings from a JSON string.
///
/// # Errors
///
/// Returns an error if the JSON is malformed or cannot be deserialized.
pub fn from_json_str(json_str: &str) -> Result<Settings, NeutralError> {
    let json_value: serde_json::Value = serde_json::from_str(json_str)
        .map_err(|e| NeutralError::Configuration(format!("Failed to parse JSON: {e}")))?;

    overlay_defaults(json_value, "JSON")
}

/// Loads settings from a JSON file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or the JSON is malformed.
pub fn from_json_file(path: impl AsRef<Path>) -> Result<Settings, NeutralError> {
    let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
        NeutralError::Configuration(format!(
            "Failed to read JSON file '{}': {e}",
            path.as_ref().display()
        ))
    })?;
    from_json_str(&content)
}

/// Loads settings from just environment variables (starting from defaults).
pub fn from_env() -> Settings {
    let mut settings = Settings::default();
    apply_env_overrides(&mut settings);
    settings
}

/// Applies environment variable overrides to a settings struct.
///
/// Boolean variables accept "true"/"1"/"yes" as true; anything else is false.
pub fn apply_env_overrides(settings: &mut Settings) {
    if let Ok(val) = std::env::var("NEUTRAL_DEBUG") {
        settings.debug = parse_flag(&val);
    }

    if let Ok(val) = std::env::var("NEUTRAL_LOG_LEVEL") {
        settings.log_level = val;
    }

    if let Ok(val) = std::env::var("NEUTRAL_TEMPLATE_DIRS") {
        settings.template_dirs = val
            .split(':')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
            .collect();
    }

    if let Ok(val) = std::env::var("NEUTRAL_CACHE_DISABLE") {
        settings.engine.cache_disable = parse_flag(&val);
    }

    if let Ok(val) = std::env::var("NEUTRAL_CACHE_DIR") {
        settings.engine.cache_dir = if val.trim().is_empty() {
            None
        } else {
            Some(PathBuf::from(val))
        };
    }

    if let Ok(val) = std::env::var("NEUTRAL_CACHE_PREFIX") {
        settings.engine.cache_prefix = val;
    }
}

// ============================================================
// Helpers
// ============================================================

fn parse_flag(val: &str) -> bool {
    matches!(val.to_lowercase().as_str(), "true" | "1" | "yes")
}

/// Deep-merges `value` over the serialized defaults and deserializes the result.
fn overlay_defaults(value: serde_json::Value, format: &str) -> Result<Settings, NeutralError> {
    let default_json = serde_json::to_value(Settings::default()).map_err(|e| {
        NeutralError::Configuration(format!("Failed to serialize default settings: {e}"))
    })?;

    let merged = merge_json(default_json, value);
    serde_json::from_value(merged).map_err(|e| {
        NeutralError::Configuration(format!("Failed to deserialize settings from {format}: {e}"))
    })
}

/// Converts a TOML value to a `serde_json::Value`.
fn toml_to_json(value: toml::Value) -> serde_json::Value {
    match value {
        toml::Value::String(s) => serde_json::Value::String(s),
        toml::Value::Integer(i) => serde_json::json!(i),
        toml::Value::Float(f) => serde_json::json!(f),
        toml::Value::Boolean(b) => serde_json::Value::Bool(b),
        toml::Value::Datetime(dt) => serde_json::Value::String(dt.to_string()),
        toml::Value::Array(arr) => {
            serde_json::Value::Array(arr.into_iter().map(toml_to_json).collect())
        }
        toml::Value::Table(table) => {
            let map: serde_json::Map<String, serde_json::Value> = table
                .into_iter()
                .map(|(k, v)| (k, toml_to_json(v)))
                .collect();
            serde_json::Value::Object(map)
        }
    }
}

/// Deep-merges two JSON values. The `override_val` takes precedence.
fn merge_json(base: serde_json::Value, override_val: serde_json::Value) -> serde_json::Value {
    match (base, override_val) {
        (serde_json::Value::Object(mut base_map), serde_json::Value::Object(override_map)) => {
            for (key, override_v) in override_map {
                let merged = if let Some(base_v) = base_map.remove(&key) {
                    merge_json(base_v, override_v)
                } else {
                    override_v
                };
                base_map.insert(key, merged);
            }
            serde_json::Value::Object(base_map)
        }
        (_, override_val) => override_val,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── TOML loading ────────────────────────────────────────────────

    #[test]
    fn test_from_toml_str_basic() {
        let toml = r#"
            debug = true
            log_level = "debug"
            template_dirs = ["templates", "shared/templates"]
        "#;

        let settings = from_toml_str(toml).unwrap();
        assert!(settings.debug);
        assert_eq!(settings.log_level, "debug");
        assert_eq!(settings.template_dirs.len(), 2);
        // Defaults preserved
        assert_eq!(settings.engine.cache_prefix, "neutral");
    }

    #[test]
    fn test_from_toml_str_engine_table() {
        let toml = r#"
            [engine]
            cache_prefix = "site-a"
            cache_on_post = true
            disabled_directives = ["include"]
        "#;

        let settings = from_toml_str(toml).unwrap();
        assert_eq!(settings.engine.cache_prefix, "site-a");
        assert!(settings.engine.cache_on_post);
        assert!(settings.engine.is_disabled("include"));
        // Untouched engine keys keep their defaults
        assert!(!settings.engine.cache_on_get);
        assert_eq!(settings.engine.max_depth, 64);
    }

    #[test]
    fn test_from_toml_str_empty() {
        let settings = from_toml_str("").unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_from_toml_str_invalid() {
        let result = from_toml_str("[[invalid toml content");
        assert!(matches!(result, Err(NeutralError::Configuration(_))));
    }

    #[test]
    fn test_from_toml_str_wrong_type() {
        let result = from_toml_str("debug = \"sometimes\"");
        assert!(result.is_err());
    }

    // ── JSON loading ────────────────────────────────────────────────

    #[test]
    fn test_from_json_str_basic() {
        let json = r#"{
            "log_level": "warn",
            "engine": { "strict_undefined": true }
        }"#;

        let settings = from_json_str(json).unwrap();
        assert_eq!(settings.log_level, "warn");
        assert!(settings.engine.strict_undefined);
        assert!(!settings.debug);
    }

    #[test]
    fn test_from_json_str_empty_object() {
        let settings = from_json_str("{}").unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_from_json_str_invalid() {
        let result = from_json_str("{invalid json");
        assert!(result.is_err());
    }

    // ── File loading ────────────────────────────────────────────────

    #[test]
    fn test_from_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("neutral.toml");
        std::fs::write(&path, "log_level = \"trace\"\n[engine]\ncache_disable = true\n").unwrap();

        let settings = from_toml_file(&path).unwrap();
        assert_eq!(settings.log_level, "trace");
        assert!(settings.engine.cache_disable);
    }

    #[test]
    fn test_from_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("neutral.json");
        std::fs::write(&path, r#"{"debug": true}"#).unwrap();

        let settings = from_json_file(&path).unwrap();
        assert!(settings.debug);
    }

    #[test]
    fn test_from_toml_file_missing() {
        let result = from_toml_file("/nonexistent/path/neutral.toml");
        assert!(result.is_err());
    }

    #[test]
    fn test_from_json_file_missing() {
        let result = from_json_file("/nonexistent/path/neutral.json");
        assert!(result.is_err());
    }

    // ── Environment variable overrides ──────────────────────────────
    //
    // Each test touches a distinct variable so they can run in parallel.

    #[test]
    fn test_apply_env_overrides_cache_prefix() {
        let mut settings = Settings::default();
        std::env::set_var("NEUTRAL_CACHE_PREFIX", "env-prefix");
        apply_env_overrides(&mut settings);
        assert_eq!(settings.engine.cache_prefix, "env-prefix");
        std::env::remove_var("NEUTRAL_CACHE_PREFIX");
    }

    #[test]
    fn test_apply_env_overrides_template_dirs() {
        let mut settings = Settings::default();
        std::env::set_var("NEUTRAL_TEMPLATE_DIRS", "/srv/tpl: /opt/tpl ::");
        apply_env_overrides(&mut settings);
        assert_eq!(
            settings.template_dirs,
            vec![PathBuf::from("/srv/tpl"), PathBuf::from("/opt/tpl")]
        );
        std::env::remove_var("NEUTRAL_TEMPLATE_DIRS");
    }

    #[test]
    fn test_apply_env_overrides_cache_dir() {
        let mut settings = Settings::default();
        std::env::set_var("NEUTRAL_CACHE_DIR", "/var/cache/neutral");
        apply_env_overrides(&mut settings);
        assert_eq!(
            settings.engine.cache_dir,
            Some(PathBuf::from("/var/cache/neutral"))
        );
        std::env::remove_var("NEUTRAL_CACHE_DIR");
    }

    #[test]
    fn test_parse_flag() {
        assert!(parse_flag("true"));
        assert!(parse_flag("1"));
        assert!(parse_flag("YES"));
        assert!(!parse_flag("false"));
        assert!(!parse_flag("off"));
    }

    // ── merge_json helper ───────────────────────────────────────────

    #[test]
    fn test_merge_json_nested() {
        let base = serde_json::json!({"outer": {"a": 1, "b": 2}});
        let over = serde_json::json!({"outer": {"b": 3}});
        let merged = merge_json(base, over);
        assert_eq!(merged["outer"]["a"], 1);
        assert_eq!(merged["outer"]["b"], 3);
    }

    #[test]
    fn test_merge_json_array_override() {
        let base = serde_json::json!({"list": [1, 2, 3]});
        let over = serde_json::json!({"list": [4, 5]});
        let merged = merge_json(base, over);
        assert_eq!(merged["list"], serde_json::json!([4, 5]));
    }
}
