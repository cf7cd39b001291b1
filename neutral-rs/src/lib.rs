//! # neutral-rs
//!
//! A schema-driven template engine.
//!
//! This is the meta-crate that re-exports the sub-crates for convenient
//! access. Depend on `neutral-rs` for everything, or on the individual crates
//! for finer-grained control.
//!
//! ```
//! use neutral_rs::template::Template;
//!
//! let mut template = Template::new();
//! template.set_source("{:;data.title:}");
//! template.merge_schema_str(r#"{"data": {"title": "Hello"}}"#).unwrap();
//! assert_eq!(template.render().unwrap(), "Hello");
//! ```

/// Error types, settings, and logging setup.
pub use neutral_core as core;

/// The engine: schema, parser, evaluator, caches and render lifecycle.
pub use neutral_template as template;
