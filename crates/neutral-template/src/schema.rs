//! The schema: the root mapping every render resolves against.
//!
//! A schema conventionally holds three sub-mappings:
//!
//! - `config`: engine behavior flags (see [`EngineConfig`])
//! - `inherit`: cross-cutting state such as the locale table
//! - `data`: the user payload
//!
//! Schemas are built by merging one or more inputs in arrival order. Mappings
//! merge recursively; any other collision is won by the incoming value, and
//! sequences are replaced wholesale.
//!
//! # Examples
//!
//! ```
//! use neutral_template::schema::{Lookup, Schema};
//!
//! let mut schema = Schema::new();
//! schema.merge_json(r#"{"data": {"title": "Hello", "tags": ["a"]}}"#).unwrap();
//! schema.merge_json(r#"{"data": {"tags": ["b", "c"]}}"#).unwrap();
//!
//! assert_eq!(schema.read_path("data.title").to_display_string(), "Hello");
//! assert_eq!(schema.read_path("data.tags.1").to_display_string(), "c");
//! assert!(matches!(schema.read_path("data.missing"), Lookup::Undefined));
//! ```

use neutral_core::error::NeutralError;
use neutral_core::settings::EngineConfig;

use crate::value::{Mapping, Value};

/// How a merge resolves a collision between incompatible values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MergePolicy {
    /// The incoming value always replaces the existing one.
    #[default]
    LastWriteWins,
    /// Replacing a non-null value with a value of a different kind is an error.
    Strict,
}

/// One schema input, in exactly one of the three supported encodings.
#[derive(Debug, Clone)]
pub enum SchemaInput<'a> {
    /// A JSON-encoded mapping.
    Json(&'a str),
    /// A MessagePack-encoded mapping.
    MsgPack(&'a [u8]),
    /// An already-built value tree.
    Native(Value),
}

impl<'a> SchemaInput<'a> {
    /// Picks the single input supplied among the three optional encodings.
    ///
    /// Empty JSON text and empty MessagePack bytes count as "not supplied".
    /// Returns `Ok(None)` when nothing was supplied.
    ///
    /// # Errors
    ///
    /// Returns [`NeutralError::InvalidArgument`] when more than one encoding
    /// is supplied.
    pub fn from_parts(
        json: Option<&'a str>,
        msgpack: Option<&'a [u8]>,
        native: Option<Value>,
    ) -> Result<Option<Self>, NeutralError> {
        let json = json.filter(|s| !s.is_empty());
        let msgpack = msgpack.filter(|b| !b.is_empty());

        let supplied =
            usize::from(json.is_some()) + usize::from(msgpack.is_some()) + usize::from(native.is_some());
        if supplied > 1 {
            return Err(NeutralError::InvalidArgument(
                "use only one schema input: json, msgpack, or native".to_string(),
            ));
        }

        Ok(json
            .map(Self::Json)
            .or_else(|| msgpack.map(Self::MsgPack))
            .or_else(|| native.map(Self::Native)))
    }

    /// Decodes this input into a value tree.
    ///
    /// # Errors
    ///
    /// Returns [`NeutralError::SchemaDecode`] for malformed encodings.
    pub fn decode(self) -> Result<Value, NeutralError> {
        match self {
            Self::Json(text) => serde_json::from_str(text)
                .map_err(|e| NeutralError::SchemaDecode(format!("invalid JSON schema: {e}"))),
            Self::MsgPack(bytes) => rmp_serde::from_slice(bytes)
                .map_err(|e| NeutralError::SchemaDecode(format!("invalid MessagePack schema: {e}"))),
            Self::Native(value) => Ok(value),
        }
    }
}

/// The result of resolving a dotted path.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Lookup<'a> {
    /// The path resolved to a value.
    Found(&'a Value),
    /// Some segment of the path did not resolve.
    Undefined,
}

impl<'a> Lookup<'a> {
    /// Returns the resolved value, if any.
    pub const fn found(self) -> Option<&'a Value> {
        match self {
            Self::Found(v) => Some(v),
            Self::Undefined => None,
        }
    }

    /// Returns `true` if the path did not resolve.
    pub const fn is_undefined(self) -> bool {
        matches!(self, Self::Undefined)
    }

    /// Output text for this lookup; undefined renders empty.
    pub fn to_display_string(self) -> String {
        self.found().map(Value::to_display_string).unwrap_or_default()
    }
}

/// Resolves dot-separated `segments` starting at `root`.
pub fn resolve<'a, 'p>(root: &'a Value, segments: impl IntoIterator<Item = &'p str>) -> Lookup<'a> {
    let mut current = root;
    for segment in segments {
        match current.get(segment) {
            Some(v) => current = v,
            None => return Lookup::Undefined,
        }
    }
    Lookup::Found(current)
}

/// A schema: a single root mapping.
///
/// The schema is a pure tree (values are owned, never shared), so merging and
/// cloning are always safe.
#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    root: Value,
    policy: MergePolicy,
}

impl Schema {
    /// Creates an empty schema with an empty root mapping.
    pub fn new() -> Self {
        Self {
            root: Value::mapping(),
            policy: MergePolicy::LastWriteWins,
        }
    }

    /// Creates an empty schema that rejects incompatible overwrites.
    pub fn strict() -> Self {
        Self {
            policy: MergePolicy::Strict,
            ..Self::new()
        }
    }

    /// Creates a schema whose `config` sub-mapping holds the given engine config.
    pub fn with_config(config: &EngineConfig) -> Self {
        let mut schema = Self::new();
        if let Ok(json) = serde_json::to_value(config) {
            let mut root = Mapping::new();
            root.insert("config".to_string(), Value::from(json));
            schema.root = Value::Mapping(root);
        }
        schema
    }

    /// Returns the merge policy of this schema.
    pub const fn policy(&self) -> MergePolicy {
        self.policy
    }

    /// Returns the root value (always a mapping).
    pub const fn root(&self) -> &Value {
        &self.root
    }

    /// Returns `true` if the root mapping has no keys.
    pub fn is_empty(&self) -> bool {
        self.root.as_mapping().map_or(true, Mapping::is_empty)
    }

    /// Merges one input into this schema.
    ///
    /// # Errors
    ///
    /// - [`NeutralError::SchemaDecode`] when the input is malformed or does not
    ///   decode to a mapping.
    /// - [`NeutralError::SchemaConflict`] under [`MergePolicy::Strict`].
    /// - [`NeutralError::Configuration`] when the merged `config` sub-mapping
    ///   is not a valid [`EngineConfig`].
    ///
    /// On error the schema is left unchanged.
    pub fn merge(&mut self, input: SchemaInput<'_>) -> Result<(), NeutralError> {
        let incoming = input.decode()?;
        if !incoming.is_mapping() {
            return Err(NeutralError::SchemaDecode(format!(
                "schema root must be a mapping, found {}",
                incoming.kind()
            )));
        }

        if self.policy == MergePolicy::Strict {
            check_conflicts(&self.root, &incoming, &mut Vec::new())?;
        }
        if let Some(over) = incoming.get("config") {
            let mut config = self.read_path("config").found().cloned().unwrap_or_default();
            merge_value(&mut config, over.clone());
            decode_config(&config)?.validate()?;
        }
        merge_value(&mut self.root, incoming);
        Ok(())
    }

    /// Merges a JSON-encoded mapping.
    pub fn merge_json(&mut self, text: &str) -> Result<(), NeutralError> {
        self.merge(SchemaInput::Json(text))
    }

    /// Merges a MessagePack-encoded mapping.
    pub fn merge_msgpack(&mut self, bytes: &[u8]) -> Result<(), NeutralError> {
        self.merge(SchemaInput::MsgPack(bytes))
    }

    /// Merges an already-built value tree.
    pub fn merge_value(&mut self, value: Value) -> Result<(), NeutralError> {
        self.merge(SchemaInput::Native(value))
    }

    /// Resolves a dotted path such as `data.items.0.title`.
    ///
    /// An empty path resolves to the root. Unresolved paths yield
    /// [`Lookup::Undefined`], never an error.
    pub fn read_path(&self, path: &str) -> Lookup<'_> {
        if path.is_empty() {
            return Lookup::Found(&self.root);
        }
        resolve(&self.root, path.split('.'))
    }

    /// Reads the engine configuration from the `config` sub-mapping.
    ///
    /// Missing keys take their defaults. Merges reject a `config` that does
    /// not decode, so the fallback to defaults is only reachable for a schema
    /// seeded from an unserializable host configuration.
    pub fn engine_config(&self) -> EngineConfig {
        let Lookup::Found(value) = self.read_path("config") else {
            return EngineConfig::default();
        };
        decode_config(value).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "ignoring invalid schema config");
            EngineConfig::default()
        })
    }
}

/// Reads a `config` sub-mapping as an [`EngineConfig`].
fn decode_config(value: &Value) -> Result<EngineConfig, NeutralError> {
    match value {
        Value::Null => Ok(EngineConfig::default()),
        Value::Mapping(_) => serde_json::from_value(serde_json::Value::from(value))
            .map_err(|e| NeutralError::Configuration(format!("invalid schema config: {e}"))),
        other => Err(NeutralError::Configuration(format!(
            "schema config must be a mapping, found {}",
            other.kind()
        ))),
    }
}

impl Default for Schema {
    fn default() -> Self {
        Self::new()
    }
}

/// Recursively merges `incoming` into `existing`.
fn merge_value(existing: &mut Value, incoming: Value) {
    match (existing, incoming) {
        (Value::Mapping(base), Value::Mapping(over)) => {
            for (key, value) in over {
                match base.get_mut(&key) {
                    Some(slot) => merge_value(slot, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

/// Finds the first strict-mode conflict between `existing` and `incoming`.
fn check_conflicts(
    existing: &Value,
    incoming: &Value,
    path: &mut Vec<String>,
) -> Result<(), NeutralError> {
    let (Value::Mapping(base), Value::Mapping(over)) = (existing, incoming) else {
        return Ok(());
    };

    for (key, value) in over {
        let Some(current) = base.get(key) else { continue };
        path.push(key.clone());
        let replaces_other_kind = !matches!(current, Value::Null)
            && !matches!(value, Value::Null)
            && std::mem::discriminant(current) != std::mem::discriminant(value);
        if replaces_other_kind {
            return Err(NeutralError::SchemaConflict {
                path: path.join("."),
                message: format!("{} replaced by {}", current.kind(), value.kind()),
            });
        }
        check_conflicts(current, value, path)?;
        path.pop();
    }
    Ok(())
}
