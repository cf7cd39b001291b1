//! Settings for the neutral-rs template engine.
//!
//! Two layers of configuration exist:
//!
//! - [`Settings`] are host-level: logging, template search directories, and
//!   the default [`EngineConfig`] every new template starts with.
//! - [`EngineConfig`] is per-template. It is read from the schema's `config`
//!   sub-mapping at render time, so schema merges can override the host
//!   defaults for a single template.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::NeutralError;

/// The deepest block and include nesting any configuration may ask for.
pub const MAX_DEPTH_LIMIT: usize = 128;

/// Engine behavior flags read from the schema's `config` sub-mapping.
///
/// Every field has a conservative default, so an empty `config` mapping (or
/// no mapping at all) yields [`EngineConfig::default`].
///
/// # Examples
///
/// ```
/// use neutral_core::settings::EngineConfig;
///
/// let config: EngineConfig =
///     serde_json::from_str(r#"{"cache_disable": true}"#).unwrap();
/// assert!(config.cache_disable);
/// assert!(!config.cache_on_get);
/// assert_eq!(config.cache_prefix, "neutral");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    // ── Cache ────────────────────────────────────────────────────────

    /// Namespace mixed into every cache key.
    pub cache_prefix: String,
    /// Directory for persisted cache entries. `None` keeps entries in memory.
    pub cache_dir: Option<PathBuf>,
    /// Cache renders made under read-style request methods (GET, HEAD, OPTIONS).
    /// Off by default: the cache key does not include the schema, so it only
    /// suits templates whose output is the same for every request.
    pub cache_on_get: bool,
    /// Cache renders made under write-style request methods (POST, PUT, ...).
    pub cache_on_post: bool,
    /// Skip the cache when the request carries identifying cookies.
    pub no_cache_on_cookies: bool,
    /// Disable the output cache entirely.
    pub cache_disable: bool,

    // ── Directives ───────────────────────────────────────────────────

    /// Directive names that render as empty with a 403 status.
    pub disabled_directives: Vec<String>,
    /// Report unresolved paths as a render fault instead of rendering empty.
    pub strict_undefined: bool,
    /// Maximum nesting depth of blocks and includes, at most [`MAX_DEPTH_LIMIT`].
    pub max_depth: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache_prefix: "neutral".to_string(),
            cache_dir: None,
            cache_on_get: false,
            cache_on_post: false,
            no_cache_on_cookies: true,
            cache_disable: false,
            disabled_directives: Vec::new(),
            strict_undefined: false,
            max_depth: 64,
        }
    }
}

impl EngineConfig {
    /// Returns `true` if the named directive has been disabled.
    pub fn is_disabled(&self, directive: &str) -> bool {
        self.disabled_directives.iter().any(|d| d == directive)
    }

    /// The nesting limit actually enforced.
    pub fn effective_max_depth(&self) -> usize {
        self.max_depth.min(MAX_DEPTH_LIMIT)
    }

    /// Checks values that deserialize fine but cannot be honored.
    ///
    /// # Errors
    ///
    /// [`NeutralError::Configuration`] when `max_depth` is zero or above
    /// [`MAX_DEPTH_LIMIT`].
    pub fn validate(&self) -> Result<(), NeutralError> {
        if self.max_depth == 0 || self.max_depth > MAX_DEPTH_LIMIT {
            return Err(NeutralError::Configuration(format!(
                "max_depth must be between 1 and {MAX_DEPTH_LIMIT}, got {}",
                self.max_depth
            )));
        }
        Ok(())
    }
}

/// Host-level settings.
///
/// # Examples
///
/// ```
/// use neutral_core::settings::Settings;
///
/// let settings = Settings::default();
/// assert!(!settings.debug);
/// assert_eq!(settings.log_level, "info");
/// assert!(settings.template_dirs.is_empty());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Whether debug mode is enabled (pretty logs instead of JSON).
    pub debug: bool,
    /// The log filter directive (e.g. "info", "neutral_template=debug").
    pub log_level: String,
    /// Directories searched, in order, when a template is loaded by identifier.
    pub template_dirs: Vec<PathBuf>,
    /// Defaults seeded into the `config` mapping of every new template schema.
    pub engine: EngineConfig,
}

impl Settings {
    /// Creates settings with the given log level and defaults elsewhere.
    pub fn with_log_level(log_level: impl Into<String>) -> Self {
        Self {
            log_level: log_level.into(),
            ..Self::default()
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            debug: false,
            log_level: "info".to_string(),
            template_dirs: Vec::new(),
            engine: EngineConfig::default(),
        }
    }
}
