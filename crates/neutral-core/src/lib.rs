//! # neutral-core
//!
//! Error types, settings, and logging for the neutral-rs template engine.
//! This crate has no dependency on the engine itself and provides the
//! foundation shared by the engine crate and any host integration.
//!
//! ## Modules
//!
//! - [`error`] - Error taxonomy and result alias
//! - [`settings`] - Host settings and per-template engine configuration
//! - [`settings_loader`] - Loading settings from TOML, JSON and the environment
//! - [`logging`] - Tracing-based logging integration

pub mod error;
pub mod logging;
pub mod settings;
pub mod settings_loader;

// Re-export the most commonly used types at the crate root.
pub use error::{NeutralError, NeutralResult};
pub use settings::{EngineConfig, Settings};
