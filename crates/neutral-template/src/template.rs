//! The render lifecycle of one template instance.
//!
//! A [`Template`] owns exactly one live [`Schema`] plus a reference to its
//! source. Inputs are merged in arrival order, then the template is rendered
//! in one of two modes:
//!
//! - [`Template::render`] clones the schema and evaluates the clone. The
//!   template is unchanged and can be rendered again.
//! - [`Template::render_once`] moves the schema into the render. The template
//!   is left holding a fresh schema from its engine, so any later render
//!   produces the output of a template with no data merged.
//!
//! Once an instance has rendered, any change to its schema (a merge, or the
//! reset after `render_once`) makes its later renders skip the output cache,
//! since cache entries are keyed without the schema.
//!
//! The status of the most recent render is kept and exposed through
//! [`Template::status`] and the shorthand getters.

use http::Method;
use neutral_core::error::NeutralError;

use crate::cache::RequestContext;
use crate::engine::{CacheMode, Engine, TemplateSource};
use crate::evaluator::Evaluation;
use crate::schema::{Schema, SchemaInput};
use crate::status::Status;
use crate::value::Value;

/// One template instance: a source, a schema, and the last render status.
///
/// # Examples
///
/// ```
/// use neutral_template::template::Template;
///
/// let mut template = Template::new();
/// template.set_source("{:;data.title:}");
/// template.merge_schema_str(r#"{"data": {"title": "Hello"}}"#).unwrap();
///
/// assert_eq!(template.render().unwrap(), "Hello");
/// assert_eq!(template.status_code(), 200);
/// assert!(!template.has_error());
/// ```
#[derive(Debug)]
pub struct Template {
    engine: Engine,
    source: Option<TemplateSource>,
    schema: Schema,
    context: RequestContext,
    status: Status,
    rendered: bool,
    /// Set when the schema changed after a render.
    bypass_cache: bool,
}

impl Template {
    /// Creates an empty template on a private default engine.
    pub fn new() -> Self {
        Self::with_engine(Engine::new())
    }

    /// Creates an empty template on the given engine. The schema starts with
    /// the engine's default `config`.
    pub fn with_engine(engine: Engine) -> Self {
        Self {
            schema: engine.new_schema(),
            engine,
            source: None,
            context: RequestContext::default(),
            status: Status::default(),
            rendered: false,
            bypass_cache: false,
        }
    }

    /// Uses inline source text.
    pub fn set_source(&mut self, source: impl Into<String>) {
        self.source = Some(TemplateSource::Raw(source.into()));
    }

    /// Loads the source by identifier through the engine's loaders. An empty
    /// identifier clears the source.
    pub fn set_path(&mut self, id: impl Into<String>) {
        let id = id.into();
        self.source = (!id.is_empty()).then_some(TemplateSource::Path(id));
    }

    /// Sets the request method and cookie presence used for output caching.
    pub fn set_request_context(&mut self, method: Method, has_cookies: bool) {
        self.context = RequestContext::new(method, has_cookies);
    }

    /// The current source, if one is set.
    pub fn source(&self) -> Option<&TemplateSource> {
        self.source.as_ref()
    }

    /// The schema as currently merged.
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// The engine this template renders through.
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    // ── Schema inputs ────────────────────────────────────────────────

    /// Merges one schema input.
    ///
    /// # Errors
    ///
    /// [`NeutralError::SchemaDecode`] for malformed input, and
    /// [`NeutralError::SchemaConflict`] for strict schemas. The schema is
    /// unchanged on error.
    pub fn merge_schema(&mut self, input: SchemaInput<'_>) -> Result<(), NeutralError> {
        self.schema.merge(input)?;
        if self.rendered {
            self.bypass_cache = true;
        }
        Ok(())
    }

    /// Merges a JSON-encoded mapping.
    pub fn merge_schema_str(&mut self, json: &str) -> Result<(), NeutralError> {
        self.merge_schema(SchemaInput::Json(json))
    }

    /// Merges a MessagePack-encoded mapping.
    pub fn merge_schema_msgpack(&mut self, bytes: &[u8]) -> Result<(), NeutralError> {
        self.merge_schema(SchemaInput::MsgPack(bytes))
    }

    /// Merges an already-built value tree.
    pub fn merge_schema_value(&mut self, value: impl Into<Value>) -> Result<(), NeutralError> {
        self.merge_schema(SchemaInput::Native(value.into()))
    }

    /// Merges whichever single input is supplied. Supplying none is a no-op.
    ///
    /// # Errors
    ///
    /// [`NeutralError::InvalidArgument`] when more than one input is given.
    pub fn merge_schema_parts(
        &mut self,
        json: Option<&str>,
        msgpack: Option<&[u8]>,
        native: Option<Value>,
    ) -> Result<(), NeutralError> {
        match SchemaInput::from_parts(json, msgpack, native)? {
            Some(input) => self.merge_schema(input),
            None => Ok(()),
        }
    }

    // ── Rendering ────────────────────────────────────────────────────

    /// Renders against a clone of the schema. Can be called any number of
    /// times; the cost grows with the size of the schema.
    ///
    /// # Errors
    ///
    /// Hard failures: no source set, the source cannot be loaded or parsed,
    /// or an internal-invariant violation. The status is set to `500` with
    /// the error message as its parameter.
    pub fn render(&mut self) -> Result<String, NeutralError> {
        let schema = self.schema.clone();
        self.render_with(schema)
    }

    /// Renders by moving the schema into the render, skipping the clone.
    ///
    /// Afterwards the template holds a fresh schema seeded with the engine's
    /// default `config`. Calling either render again is allowed and behaves
    /// as if no data had been merged.
    pub fn render_once(&mut self) -> Result<String, NeutralError> {
        let schema = std::mem::replace(&mut self.schema, self.engine.new_schema());
        let result = self.render_with(schema);
        self.bypass_cache = true;
        result
    }

    fn render_with(&mut self, schema: Schema) -> Result<String, NeutralError> {
        let mode = if self.bypass_cache {
            CacheMode::Bypass
        } else {
            CacheMode::Use
        };
        self.rendered = true;
        let result = match &self.source {
            Some(source) => self.engine.render_owned(source, schema, &self.context, mode),
            None => Err(NeutralError::InvalidArgument(
                "template has no source: call set_source or set_path first".to_string(),
            )),
        };

        match result {
            Ok(Evaluation { output, status }) => {
                self.status = status;
                Ok(output)
            }
            Err(e) => {
                tracing::error!(error = %e, "render failed");
                self.status = Status::new(500, e.to_string());
                Err(e)
            }
        }
    }

    // ── Status ───────────────────────────────────────────────────────

    /// Status of the most recent render (`200 OK` before any render).
    pub fn status(&self) -> &Status {
        &self.status
    }

    /// Code of the most recent render.
    pub fn status_code(&self) -> u16 {
        self.status.code()
    }

    /// Reason phrase of the most recent render's code.
    pub fn status_text(&self) -> &str {
        self.status.text()
    }

    /// Diagnostic detail of the most recent render; empty on success.
    pub fn status_param(&self) -> &str {
        self.status.param()
    }

    /// Returns `true` if the most recent render did not end with `200`.
    pub fn has_error(&self) -> bool {
        self.status.has_error()
    }
}

impl Default for Template {
    fn default() -> Self {
        Self::new()
    }
}
