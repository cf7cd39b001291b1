//! # neutral-template
//!
//! The template engine core for neutral-rs. Templates interleave markup with
//! `{:name; params >> body :}` directives and are rendered against a schema:
//! a nested value tree built by merging JSON, MessagePack or native inputs.
//!
//! ## Modules
//!
//! - [`value`] - The tagged-union value type
//! - [`schema`] - Schema merging and path resolution
//! - [`locale`] - Translation lookups in the schema's locale table
//! - [`lexer`] / [`parser`] - Source text to immutable syntax tree
//! - [`evaluator`] - Syntax tree plus schema to output and status
//! - [`status`] - Render status codes
//! - [`loaders`] - Template source acquisition
//! - [`cache`] - Output cache backends and key derivation
//! - [`engine`] - Shared loaders, parse cache and output caches
//! - [`template`] - The render lifecycle of one template instance

pub mod cache;
pub mod engine;
pub mod evaluator;
pub mod lexer;
pub mod loaders;
pub mod locale;
pub mod parser;
pub mod schema;
pub mod status;
pub mod template;
pub mod value;

pub use engine::Engine;
pub use evaluator::Evaluation;
pub use parser::SyntaxTree;
pub use schema::{Lookup, Schema, SchemaInput};
pub use status::Status;
pub use template::Template;
pub use value::Value;
