//! Template engine: loading, parsing, caching and rendering.
//!
//! The [`Engine`] is the shared half of the system. It owns the loader chain,
//! the parse cache (identity to [`SyntaxTree`]), the output caches and the
//! evaluation counters. It is cheap to clone and safe to share between
//! threads; every [`Template`] created from it holds a clone.
//!
//! # Examples
//!
//! ```
//! use neutral_template::engine::Engine;
//!
//! let engine = Engine::new();
//! engine.add_template("hello.ntpl", "Hello {:;data.name:}!");
//!
//! let mut template = engine.template_from_path("hello.ntpl");
//! template.merge_schema_str(r#"{"data": {"name": "World"}}"#).unwrap();
//! assert_eq!(template.render().unwrap(), "Hello World!");
//! ```

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use neutral_core::error::NeutralError;
use neutral_core::logging::render_span;
use neutral_core::settings::Settings;
use sha2::{Digest, Sha256};

use crate::cache::{self, CacheBackend, CachedRender, FileCache, InMemoryCache, RequestContext};
use crate::evaluator::{Evaluation, Evaluator, IncludeResolver};
use crate::loaders::{FileSystemLoader, LoaderChain, StringLoader, TemplateLoader};
use crate::parser::SyntaxTree;
use crate::schema::Schema;
use crate::template::Template;

/// Where a template's source text comes from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TemplateSource {
    /// Source text given directly.
    Raw(String),
    /// An identifier resolved through the engine's loaders.
    Path(String),
}

impl TemplateSource {
    /// A stable identity for caching.
    ///
    /// Paths are identified by their identifier, raw sources by a hash of
    /// their text.
    pub fn identity(&self) -> String {
        match self {
            Self::Path(id) => format!("path:{id}"),
            Self::Raw(text) => format!("src:{:x}", Sha256::digest(text.as_bytes())),
        }
    }
}

/// Whether a render may consult the output cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheMode {
    /// Read and write the cache when the schema's `config` allows it.
    #[default]
    Use,
    /// Always evaluate, and leave the cache untouched.
    Bypass,
}

/// Output cache entries written for one template identity.
type WrittenKeys = Vec<(Arc<dyn CacheBackend>, String)>;

/// Caches parsed trees by template identity.
#[derive(Debug, Default)]
pub struct ParseCache {
    trees: RwLock<HashMap<String, Arc<SyntaxTree>>>,
}

impl ParseCache {
    pub fn get(&self, identity: &str) -> Option<Arc<SyntaxTree>> {
        self.trees
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(identity)
            .cloned()
    }

    pub fn insert(&self, identity: String, tree: Arc<SyntaxTree>) {
        self.trees
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(identity, tree);
    }

    pub fn remove(&self, identity: &str) -> Option<Arc<SyntaxTree>> {
        self.trees
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(identity)
    }

    pub fn len(&self) -> usize {
        self.trees.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.trees.write().unwrap_or_else(PoisonError::into_inner).clear();
    }
}

/// Builds an [`Engine`] with extra loaders.
#[derive(Default)]
pub struct EngineBuilder {
    settings: Settings,
    loaders: Vec<Arc<dyn TemplateLoader>>,
}

impl EngineBuilder {
    /// Uses the given host settings.
    #[must_use]
    pub fn settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    /// Appends a custom loader, tried after the built-in ones.
    #[must_use]
    pub fn loader(mut self, loader: impl TemplateLoader + 'static) -> Self {
        self.loaders.push(Arc::new(loader));
        self
    }

    /// Builds the engine.
    pub fn build(self) -> Engine {
        let string_loader = Arc::new(StringLoader::new());

        let mut loaders = LoaderChain::new();
        loaders.push(string_loader.clone());
        if !self.settings.template_dirs.is_empty() {
            loaders.push(Arc::new(FileSystemLoader::new(
                self.settings.template_dirs.clone(),
            )));
        }
        for loader in self.loaders {
            loaders.push(loader);
        }

        tracing::debug!(
            loaders = loaders.len(),
            template_dirs = ?self.settings.template_dirs,
            "template engine ready"
        );

        Engine {
            inner: Arc::new(EngineInner {
                settings: self.settings,
                string_loader,
                loaders,
                parse_cache: ParseCache::default(),
                memory_cache: Arc::new(InMemoryCache::new()),
                file_caches: RwLock::new(HashMap::new()),
                written: RwLock::new(HashMap::new()),
                evaluations: AtomicU64::new(0),
                cache_hits: AtomicU64::new(0),
            }),
        }
    }
}

struct EngineInner {
    settings: Settings,
    string_loader: Arc<StringLoader>,
    loaders: LoaderChain,
    parse_cache: ParseCache,
    memory_cache: Arc<InMemoryCache>,
    file_caches: RwLock<HashMap<PathBuf, Arc<FileCache>>>,
    /// Output cache keys this engine stored, by template identity.
    written: RwLock<HashMap<String, WrittenKeys>>,
    evaluations: AtomicU64,
    cache_hits: AtomicU64,
}

/// The template engine. Manages loaders, caches, and rendering.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    /// Creates an engine with default settings and only the in-memory loader.
    pub fn new() -> Self {
        EngineBuilder::default().build()
    }

    /// Creates an engine from host settings.
    pub fn from_settings(settings: Settings) -> Self {
        Self::builder().settings(settings).build()
    }

    /// Starts building an engine.
    pub fn builder() -> EngineBuilder {
        EngineBuilder::default()
    }

    /// The host settings this engine was built with.
    pub fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    /// Adds or replaces an in-memory template.
    ///
    /// The parsed tree cached for that identifier is dropped, and so is every
    /// output cache entry this engine stored for it. Entries written by other
    /// processes sharing a cache directory are not tracked.
    pub fn add_template(&self, id: impl Into<String>, source: impl Into<String>) {
        let id = id.into();
        self.inner.string_loader.add(id.clone(), source);
        let identity = TemplateSource::Path(id).identity();
        self.inner.parse_cache.remove(&identity);

        let written = self
            .inner
            .written
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&identity);
        for (backend, key) in written.into_iter().flatten() {
            if let Err(e) = backend.delete(&key) {
                tracing::warn!(key = %key, error = %e, "failed to invalidate output cache entry");
            }
        }
    }

    /// A fresh schema seeded with this engine's default `config`.
    pub fn new_schema(&self) -> Schema {
        Schema::with_config(&self.inner.settings.engine)
    }

    /// An empty template bound to this engine.
    pub fn template(&self) -> Template {
        Template::with_engine(self.clone())
    }

    /// A template whose source is loaded by identifier.
    pub fn template_from_path(&self, id: impl Into<String>) -> Template {
        let mut template = self.template();
        template.set_path(id);
        template
    }

    /// A template with inline source text.
    pub fn template_from_source(&self, source: impl Into<String>) -> Template {
        let mut template = self.template();
        template.set_source(source);
        template
    }

    /// Loads the source text of a template through the loader chain.
    pub fn load_source(&self, id: &str) -> Result<String, NeutralError> {
        self.inner.loaders.load(id)
    }

    /// Returns the parsed tree for a source, parsing it on first use.
    ///
    /// # Errors
    ///
    /// [`NeutralError::TemplateDoesNotExist`] if a path cannot be loaded,
    /// [`NeutralError::Syntax`] if the source does not parse.
    pub fn get_tree(&self, source: &TemplateSource) -> Result<Arc<SyntaxTree>, NeutralError> {
        let identity = source.identity();
        if let Some(tree) = self.inner.parse_cache.get(&identity) {
            return Ok(tree);
        }

        let tree = match source {
            TemplateSource::Raw(text) => SyntaxTree::parse(text)?,
            TemplateSource::Path(id) => SyntaxTree::parse(&self.load_source(id)?)?,
        };
        let tree = Arc::new(tree);
        tracing::debug!(identity = %identity, directives = tree.directive_count(), "parsed template");
        self.inner.parse_cache.insert(identity, Arc::clone(&tree));
        Ok(tree)
    }

    /// Renders a source against a borrowed schema.
    ///
    /// When the schema's `config` allows caching under `context`, a cached
    /// successful render for the same identity and context is returned
    /// without evaluating anything. The schema itself is not part of the
    /// cache key.
    ///
    /// # Errors
    ///
    /// Loading, syntax and internal-invariant errors. Render faults are not
    /// errors; they are reported in the returned status.
    pub fn render(
        &self,
        source: &TemplateSource,
        schema: &Schema,
        context: &RequestContext,
    ) -> Result<Evaluation, NeutralError> {
        self.render_with_mode(source, schema, context, CacheMode::Use)
    }

    /// Like [`Engine::render`], with explicit control over the output cache.
    pub fn render_with_mode(
        &self,
        source: &TemplateSource,
        schema: &Schema,
        context: &RequestContext,
        mode: CacheMode,
    ) -> Result<Evaluation, NeutralError> {
        let identity = source.identity();
        let span = render_span(&identity);
        let _guard = span.enter();

        let config = schema.engine_config();
        let cacheable = mode == CacheMode::Use && cache::is_cacheable(&config, context);
        let cached = cacheable.then(|| {
            let key = cache::cache_key(&config.cache_prefix, &identity, context);
            (self.cache_backend(config.cache_dir.as_deref()), key)
        });

        if let Some((backend, key)) = &cached {
            match backend.get(key) {
                Ok(Some(hit)) => {
                    self.inner.cache_hits.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(key = %key, "output cache hit");
                    return Ok(Evaluation {
                        output: hit.output,
                        status: hit.status,
                    });
                }
                Ok(None) => tracing::debug!(key = %key, "output cache miss"),
                Err(e) => tracing::warn!(key = %key, error = %e, "output cache read failed"),
            }
        }

        let tree = self.get_tree(source)?;
        self.inner.evaluations.fetch_add(1, Ordering::Relaxed);
        let evaluation = Evaluator::with_config(schema, config)
            .with_includes(self)
            .evaluate(&tree)?;

        if let Some((backend, key)) = cached {
            if evaluation.status.has_error() {
                tracing::debug!(status = %evaluation.status, "not caching failed render");
            } else {
                let entry = CachedRender {
                    output: evaluation.output.clone(),
                    status: evaluation.status.clone(),
                };
                match backend.set(&key, entry) {
                    Ok(()) => self.remember_written(identity, backend, key),
                    Err(e) => tracing::warn!(key = %key, error = %e, "output cache write failed"),
                }
            }
        }

        tracing::debug!(status = %evaluation.status, bytes = evaluation.output.len(), "render complete");
        Ok(evaluation)
    }

    /// Renders a source against a schema it takes ownership of.
    ///
    /// The schema is dropped once the render is done.
    pub fn render_owned(
        &self,
        source: &TemplateSource,
        schema: Schema,
        context: &RequestContext,
        mode: CacheMode,
    ) -> Result<Evaluation, NeutralError> {
        self.render_with_mode(source, &schema, context, mode)
    }

    /// Number of times a tree has been evaluated.
    pub fn evaluation_count(&self) -> u64 {
        self.inner.evaluations.load(Ordering::Relaxed)
    }

    /// Number of renders answered from an output cache.
    pub fn cache_hit_count(&self) -> u64 {
        self.inner.cache_hits.load(Ordering::Relaxed)
    }

    /// Number of parsed trees held in the parse cache.
    pub fn parsed_count(&self) -> usize {
        self.inner.parse_cache.len()
    }

    /// Empties the parse cache and the in-memory output cache.
    ///
    /// File caches are left alone; remove their directory to invalidate them.
    pub fn clear_caches(&self) {
        self.inner.parse_cache.clear();
        if let Err(e) = self.inner.memory_cache.clear() {
            tracing::warn!(error = %e, "failed to clear output cache");
        }
    }

    fn remember_written(&self, identity: String, backend: Arc<dyn CacheBackend>, key: String) {
        let mut written = self
            .inner
            .written
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let keys = written.entry(identity).or_default();
        if !keys.iter().any(|(_, k)| *k == key) {
            keys.push((backend, key));
        }
    }

    fn cache_backend(&self, dir: Option<&Path>) -> Arc<dyn CacheBackend> {
        let Some(dir) = dir else {
            return self.inner.memory_cache.clone();
        };

        if let Some(cache) = self
            .inner
            .file_caches
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(dir)
        {
            return cache.clone();
        }

        self.inner
            .file_caches
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(dir.to_path_buf())
            .or_insert_with(|| Arc::new(FileCache::new(dir)))
            .clone()
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("settings", &self.inner.settings)
            .field("loaders", &self.inner.loaders)
            .field("parsed", &self.inner.parse_cache.len())
            .field("evaluations", &self.evaluation_count())
            .field("cache_hits", &self.cache_hit_count())
            .finish()
    }
}

impl IncludeResolver for Engine {
    fn resolve_include(&self, id: &str) -> Result<Arc<SyntaxTree>, NeutralError> {
        self.get_tree(&TemplateSource::Path(id.to_string()))
    }
}
