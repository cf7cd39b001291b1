//! Core error types for the neutral-rs template engine.
//!
//! This module provides [`NeutralError`], which covers every hard failure the
//! engine can report at a call site: malformed schema input, malformed
//! template source, contract violations, configuration problems and
//! internal-invariant violations. Recoverable render faults are *not* errors;
//! they are recorded in the render status instead.

use thiserror::Error;

/// The primary error type for the neutral-rs template engine.
///
/// Each variant maps to an HTTP-equivalent status code via
/// [`NeutralError::status_code`], so a host can surface hard failures through
/// the same status channel it uses for render outcomes.
#[derive(Error, Debug)]
pub enum NeutralError {
    // ── Schema ───────────────────────────────────────────────────────

    /// Schema input was not a well-formed text or binary encoding of a value tree.
    #[error("Schema decode error: {0}")]
    SchemaDecode(String),

    /// A strict-mode merge found an incompatible value at the same key.
    #[error("Schema conflict at '{path}': {message}")]
    SchemaConflict {
        /// Dotted path of the conflicting key.
        path: String,
        /// Description of the conflict.
        message: String,
    },

    // ── Caller contract ──────────────────────────────────────────────

    /// Mutually exclusive inputs were supplied together, or a required input is missing.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    // ── Templates ────────────────────────────────────────────────────

    /// The template source is malformed.
    #[error("Syntax error at byte {position}: {message}")]
    Syntax {
        /// Byte offset in the source where the problem was detected.
        position: usize,
        /// Human-readable description.
        message: String,
    },

    /// No loader could supply the requested template.
    #[error("Template does not exist: {0}")]
    TemplateDoesNotExist(String),

    /// The evaluator reached a tree shape that a successful parse cannot produce.
    #[error("Internal invariant violated: {0}")]
    InternalInvariant(String),

    // ── Configuration ────────────────────────────────────────────────

    /// A configuration value is missing, invalid, or conflicts with another.
    #[error("Configuration error: {0}")]
    Configuration(String),

    // ── Serialization ────────────────────────────────────────────────

    /// An error occurred while serializing or deserializing engine data.
    #[error("Serialization error: {0}")]
    Serialization(String),

    // ── IO ───────────────────────────────────────────────────────────

    /// An I/O error occurred.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl NeutralError {
    /// Creates a [`NeutralError::Syntax`] at the given byte position.
    pub fn syntax(position: usize, message: impl Into<String>) -> Self {
        Self::Syntax {
            position,
            message: message.into(),
        }
    }

    /// Returns the HTTP-equivalent status code associated with this error.
    ///
    /// - `TemplateDoesNotExist` -> 404
    /// - Everything else -> 500
    pub const fn status_code(&self) -> u16 {
        match self {
            Self::TemplateDoesNotExist(_) => 404,
            Self::SchemaDecode(_)
            | Self::SchemaConflict { .. }
            | Self::InvalidArgument(_)
            | Self::Syntax { .. }
            | Self::InternalInvariant(_)
            | Self::Configuration(_)
            | Self::Serialization(_)
            | Self::Io(_) => 500,
        }
    }

    /// Returns `true` for errors raised by an impossible engine state rather
    /// than by caller input.
    pub const fn is_internal(&self) -> bool {
        matches!(self, Self::InternalInvariant(_))
    }
}

impl From<serde_json::Error> for NeutralError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// A convenience type alias for `Result<T, NeutralError>`.
pub type NeutralResult<T> = Result<T, NeutralError>;
