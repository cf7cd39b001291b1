//! Template loaders.
//!
//! A loader turns a template identifier into source text. The engine core
//! never touches the filesystem directly: it asks a [`TemplateLoader`]. The
//! built-in loaders read from directories on disk ([`FileSystemLoader`]) or
//! from an in-memory map ([`StringLoader`]), and [`LoaderChain`] tries several
//! loaders in order.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use neutral_core::error::NeutralError;

/// Loads template source text by identifier.
pub trait TemplateLoader: Send + Sync {
    /// Loads the template source with the given identifier.
    ///
    /// # Errors
    ///
    /// Returns [`NeutralError::TemplateDoesNotExist`] if this loader has no
    /// such template. Other errors mean the template exists but could not be
    /// read.
    fn load(&self, id: &str) -> Result<String, NeutralError>;
}

/// Loads templates from one or more directories on the filesystem.
///
/// Searches each configured directory in order and returns the first match.
/// Identifiers must be relative and may not climb out of the directory.
#[derive(Debug, Clone)]
pub struct FileSystemLoader {
    dirs: Vec<PathBuf>,
}

impl FileSystemLoader {
    /// Creates a new `FileSystemLoader` with the given search directories.
    pub fn new(dirs: Vec<PathBuf>) -> Self {
        Self { dirs }
    }

    /// The configured search directories.
    pub fn dirs(&self) -> &[PathBuf] {
        &self.dirs
    }
}

impl TemplateLoader for FileSystemLoader {
    fn load(&self, id: &str) -> Result<String, NeutralError> {
        if !is_contained(Path::new(id)) {
            return Err(NeutralError::TemplateDoesNotExist(format!(
                "Template '{id}' is not a relative path inside the template directories"
            )));
        }

        for dir in &self.dirs {
            let path = dir.join(id);
            if path.is_file() {
                tracing::trace!(path = %path.display(), "loading template from file");
                return Ok(std::fs::read_to_string(&path)?);
            }
        }

        Err(NeutralError::TemplateDoesNotExist(format!(
            "Template '{id}' not found in directories: {:?}",
            self.dirs
        )))
    }
}

/// Returns `true` if `path` stays below the directory it is joined to.
fn is_contained(path: &Path) -> bool {
    !path.as_os_str().is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

/// Loads templates from an in-memory map of identifier to source strings.
///
/// Useful for tests and for hosts that keep templates outside the
/// filesystem.
#[derive(Debug, Default)]
pub struct StringLoader {
    templates: RwLock<HashMap<String, String>>,
}

impl StringLoader {
    /// Creates a new empty `StringLoader`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a `StringLoader` from a map of identifiers to source strings.
    pub fn from_map(templates: HashMap<String, String>) -> Self {
        Self {
            templates: RwLock::new(templates),
        }
    }

    /// Adds or replaces a template.
    pub fn add(&self, id: impl Into<String>, source: impl Into<String>) {
        self.templates
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.into(), source.into());
    }

    /// Removes a template, returning its source if it existed.
    pub fn remove(&self, id: &str) -> Option<String> {
        self.templates
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
    }
}

impl TemplateLoader for StringLoader {
    fn load(&self, id: &str) -> Result<String, NeutralError> {
        self.templates
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
            .ok_or_else(|| {
                NeutralError::TemplateDoesNotExist(format!("Template '{id}' not found in StringLoader"))
            })
    }
}

/// Tries a list of loaders in order and returns the first hit.
#[derive(Clone, Default)]
pub struct LoaderChain {
    loaders: Vec<Arc<dyn TemplateLoader>>,
}

impl LoaderChain {
    /// Creates an empty chain.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a loader to the end of the chain.
    pub fn push(&mut self, loader: Arc<dyn TemplateLoader>) {
        self.loaders.push(loader);
    }

    /// Number of loaders in the chain.
    pub fn len(&self) -> usize {
        self.loaders.len()
    }

    /// Returns `true` if the chain has no loaders.
    pub fn is_empty(&self) -> bool {
        self.loaders.is_empty()
    }
}

impl std::fmt::Debug for LoaderChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoaderChain")
            .field("loaders", &self.loaders.len())
            .finish()
    }
}

impl TemplateLoader for LoaderChain {
    fn load(&self, id: &str) -> Result<String, NeutralError> {
        for loader in &self.loaders {
            match loader.load(id) {
                Err(NeutralError::TemplateDoesNotExist(_)) => continue,
                other => return other,
            }
        }
        Err(NeutralError::TemplateDoesNotExist(format!(
            "Template '{id}' not found by any loader"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_loader_basic() {
        let loader = StringLoader::new();
        loader.add("hello.ntpl", "Hello {:;data.name:}!");

        let source = loader.load("hello.ntpl").unwrap();
        assert_eq!(source, "Hello {:;data.name:}!");
    }

    #[test]
    fn test_string_loader_not_found() {
        let loader = StringLoader::new();
        let result = loader.load("missing.ntpl");
        assert!(matches!(result, Err(NeutralError::TemplateDoesNotExist(_))));
    }

    #[test]
    fn test_string_loader_from_map() {
        let mut map = HashMap::new();
        map.insert("a.ntpl".to_string(), "content A".to_string());
        map.insert("b.ntpl".to_string(), "content B".to_string());

        let loader = StringLoader::from_map(map);
        assert_eq!(loader.load("a.ntpl").unwrap(), "content A");
        assert_eq!(loader.load("b.ntpl").unwrap(), "content B");
    }

    #[test]
    fn test_string_loader_overwrite_and_remove() {
        let loader = StringLoader::new();
        loader.add("x.ntpl", "version 1");
        loader.add("x.ntpl", "version 2");
        assert_eq!(loader.load("x.ntpl").unwrap(), "version 2");

        assert_eq!(loader.remove("x.ntpl").as_deref(), Some("version 2"));
        assert!(loader.load("x.ntpl").is_err());
    }

    #[test]
    fn test_filesystem_loader_not_found() {
        let loader = FileSystemLoader::new(vec![PathBuf::from("/nonexistent/path")]);
        let result = loader.load("missing.ntpl");
        assert!(matches!(result, Err(NeutralError::TemplateDoesNotExist(_))));
    }

    #[test]
    fn test_filesystem_loader_with_temp_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("parts")).unwrap();
        std::fs::write(dir.path().join("parts/head.ntpl"), "Hello from file!").unwrap();

        let loader = FileSystemLoader::new(vec![dir.path().to_path_buf()]);
        assert_eq!(loader.load("parts/head.ntpl").unwrap(), "Hello from file!");
    }

    #[test]
    fn test_filesystem_loader_search_order() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        std::fs::write(first.path().join("a.ntpl"), "first").unwrap();
        std::fs::write(second.path().join("a.ntpl"), "second").unwrap();
        std::fs::write(second.path().join("b.ntpl"), "only second").unwrap();

        let loader = FileSystemLoader::new(vec![first.path().into(), second.path().into()]);
        assert_eq!(loader.load("a.ntpl").unwrap(), "first");
        assert_eq!(loader.load("b.ntpl").unwrap(), "only second");
    }

    #[test]
    fn test_filesystem_loader_rejects_escaping_ids() {
        let dir = tempfile::tempdir().unwrap();
        let loader = FileSystemLoader::new(vec![dir.path().to_path_buf()]);
        for id in ["../secret.ntpl", "/etc/passwd", "a/../../b", ""] {
            assert!(
                matches!(loader.load(id), Err(NeutralError::TemplateDoesNotExist(_))),
                "{id}"
            );
        }
    }

    #[test]
    fn test_loader_chain_first_hit_wins() {
        let a = StringLoader::new();
        a.add("shared.ntpl", "from a");
        let b = StringLoader::new();
        b.add("shared.ntpl", "from b");
        b.add("only_b.ntpl", "b only");

        let mut chain = LoaderChain::new();
        chain.push(Arc::new(a));
        chain.push(Arc::new(b));

        assert_eq!(chain.len(), 2);
        assert_eq!(chain.load("shared.ntpl").unwrap(), "from a");
        assert_eq!(chain.load("only_b.ntpl").unwrap(), "b only");
        assert!(matches!(
            chain.load("nope.ntpl"),
            Err(NeutralError::TemplateDoesNotExist(_))
        ));
    }

    #[test]
    fn test_empty_chain() {
        let chain = LoaderChain::new();
        assert!(chain.is_empty());
        assert!(chain.load("x").is_err());
    }
}
