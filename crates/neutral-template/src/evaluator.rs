//! Evaluation of a [`SyntaxTree`] against a [`Schema`].
//!
//! The evaluator walks the tree in document order and writes output text.
//! Literal nodes are checked against the locale table and replaced by their
//! translation when one exists. Directives resolve their path against the
//! schema root, or against the current local root for `this.` paths.
//!
//! Problems with the data (a wrong shape, a missing include, a disabled
//! directive) are *faults*: the node renders empty, the first fault is
//! recorded in the [`Status`], and evaluation carries on. Only a tree shape
//! that the parser can never produce aborts evaluation with an error.
//!
//! The schema is only ever borrowed; evaluation never mutates it.

use std::borrow::Cow;
use std::sync::Arc;

use neutral_core::error::NeutralError;
use neutral_core::settings::EngineConfig;

use crate::locale::LocaleTable;
use crate::parser::{Directive, DirectiveKind, Node, Params, PathExpr, SyntaxTree};
use crate::schema::{resolve, Schema};
use crate::status::{self, Status};
use crate::value::{Mapping, Value};

/// Supplies parsed trees for `{:include; id :}`.
pub trait IncludeResolver {
    /// Loads and parses the template with the given identifier.
    ///
    /// # Errors
    ///
    /// [`NeutralError::TemplateDoesNotExist`] when no template has that
    /// identifier, [`NeutralError::Syntax`] when it does not parse.
    fn resolve_include(&self, id: &str) -> Result<Arc<SyntaxTree>, NeutralError>;
}

/// The result of one evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evaluation {
    pub output: String,
    pub status: Status,
}

/// Evaluates a tree against a schema without include support.
///
/// # Examples
///
/// ```
/// use neutral_template::evaluator::evaluate;
/// use neutral_template::parser::SyntaxTree;
/// use neutral_template::schema::Schema;
///
/// let tree = SyntaxTree::parse("{:;data.title:}").unwrap();
/// let mut schema = Schema::new();
/// schema.merge_json(r#"{"data": {"title": "Hello"}}"#).unwrap();
///
/// let result = evaluate(&tree, &schema).unwrap();
/// assert_eq!(result.output, "Hello");
/// assert!(!result.status.has_error());
/// ```
///
/// # Errors
///
/// Returns [`NeutralError::InternalInvariant`] if the tree is malformed.
pub fn evaluate(tree: &SyntaxTree, schema: &Schema) -> Result<Evaluation, NeutralError> {
    Evaluator::new(schema).evaluate(tree)
}

/// A single-use tree walker.
pub struct Evaluator<'a> {
    root: &'a Value,
    config: EngineConfig,
    locale: LocaleTable<'a>,
    includes: Option<&'a dyn IncludeResolver>,
    /// The first fault seen, if any.
    fault: Option<Status>,
    /// Set by `exit`; always wins over `fault`.
    exit: Option<Status>,
    /// Local roots bound by `each` and `with`, innermost last.
    scopes: Vec<Cow<'a, Value>>,
    /// Language overrides from `lang`, innermost last.
    languages: Vec<String>,
    /// Nesting level inside `trans`, where literals are not translated.
    in_trans: usize,
    depth: usize,
    halted: bool,
}

impl<'a> Evaluator<'a> {
    /// Creates an evaluator for the given schema, reading engine flags from
    /// its `config` sub-mapping.
    pub fn new(schema: &'a Schema) -> Self {
        Self::with_config(schema, schema.engine_config())
    }

    /// Creates an evaluator with an explicit engine configuration.
    pub fn with_config(schema: &'a Schema, config: EngineConfig) -> Self {
        let root = schema.root();
        Self {
            root,
            config,
            locale: LocaleTable::from_root(root),
            includes: None,
            fault: None,
            exit: None,
            scopes: Vec::new(),
            languages: Vec::new(),
            in_trans: 0,
            depth: 0,
            halted: false,
        }
    }

    /// Enables `include` through the given resolver.
    #[must_use]
    pub fn with_includes(mut self, includes: &'a dyn IncludeResolver) -> Self {
        self.includes = Some(includes);
        self
    }

    /// Walks the tree and returns the output and final status.
    pub fn evaluate(mut self, tree: &SyntaxTree) -> Result<Evaluation, NeutralError> {
        let mut output = String::new();
        self.render_nodes(tree.nodes(), &mut output)?;

        let status = self.exit.or(self.fault).unwrap_or_default();
        Ok(Evaluation { output, status })
    }

    fn render_nodes(&mut self, nodes: &[Node], out: &mut String) -> Result<(), NeutralError> {
        for node in nodes {
            if self.halted {
                break;
            }
            match node {
                Node::Literal(text) => self.render_literal(text, out),
                Node::Directive(directive) => self.render_directive(directive, out)?,
            }
        }
        Ok(())
    }

    fn render_literal(&self, text: &str, out: &mut String) {
        if self.in_trans > 0 {
            out.push_str(text);
        } else {
            out.push_str(&self.locale.translate_literal(self.language(), text));
        }
    }

    fn render_directive(&mut self, directive: &Directive, out: &mut String) -> Result<(), NeutralError> {
        let kind = directive.kind;
        if self.config.is_disabled(kind.name()) {
            self.record_fault(403, format!("directive '{kind}' is disabled"));
            return Ok(());
        }

        match kind {
            DirectiveKind::Var => {
                let path = path_param(directive)?;
                if let Some(value) = self.lookup(path) {
                    out.push_str(&value.to_display_string());
                }
            }
            DirectiveKind::Num => {
                let path = path_param(directive)?;
                match self.lookup(path).as_deref() {
                    Some(Value::Number(n)) => out.push_str(&n.to_string()),
                    Some(other) => {
                        let message = format!("'{path}' is {}, expected a number", other.kind());
                        self.record_fault(500, message);
                    }
                    None => {}
                }
            }
            DirectiveKind::Json => {
                let path = path_param(directive)?;
                if let Some(value) = self.lookup(path) {
                    out.push_str(&value.to_json_string());
                }
            }
            DirectiveKind::Bool => {
                let path = path_param(directive)?;
                let truthy = self.resolve(path).is_some_and(|v| v.is_truthy());
                if truthy != directive.negated {
                    self.render_body(directive, out)?;
                }
            }
            DirectiveKind::Each => self.render_each(directive, out)?,
            DirectiveKind::With => {
                let path = path_param(directive)?;
                if let Some(value) = self.lookup(path) {
                    self.render_scoped(value, directive, out)?;
                }
            }
            DirectiveKind::Trans => {
                let mut rendered = String::new();
                self.in_trans += 1;
                let result = self.render_body(directive, &mut rendered);
                self.in_trans -= 1;
                result?;
                out.push_str(&self.locale.translate_literal(self.language(), &rendered));
            }
            DirectiveKind::Lang => {
                let tag = text_param(directive)?;
                self.languages.push(tag.to_string());
                let result = self.render_body(directive, out);
                self.languages.pop();
                result?;
            }
            DirectiveKind::Include => self.render_include(directive, out)?,
            DirectiveKind::Exit => {
                let raw = text_param(directive)?;
                let (code, param) = raw
                    .split_once(char::is_whitespace)
                    .map_or((raw, ""), |(c, p)| (c, p.trim()));
                match status::parse_code(code) {
                    Some(code) => {
                        tracing::debug!(code, param, "exit directive");
                        self.exit = Some(Status::new(code, param));
                        self.halted = true;
                    }
                    None => self.record_fault(500, format!("invalid exit code '{code}'")),
                }
            }
        }
        Ok(())
    }

    fn render_each(&mut self, directive: &Directive, out: &mut String) -> Result<(), NeutralError> {
        let path = path_param(directive)?;
        let Some(value) = self.lookup(path) else {
            return Ok(());
        };

        match value {
            Cow::Borrowed(Value::Sequence(items)) => {
                for item in items {
                    self.render_scoped(Cow::Borrowed(item), directive, out)?;
                }
            }
            Cow::Owned(Value::Sequence(items)) => {
                for item in items {
                    self.render_scoped(Cow::Owned(item), directive, out)?;
                }
            }
            Cow::Borrowed(Value::Mapping(map)) => {
                for (key, item) in map {
                    self.render_scoped(Cow::Owned(entry(key, item.clone())), directive, out)?;
                }
            }
            Cow::Owned(Value::Mapping(map)) => {
                for (key, item) in map {
                    self.render_scoped(Cow::Owned(entry(&key, item)), directive, out)?;
                }
            }
            Cow::Borrowed(Value::Null) | Cow::Owned(Value::Null) => {}
            other => {
                let message = format!("'{path}' is {}, expected a sequence or mapping", other.kind());
                self.record_fault(500, message);
            }
        }
        Ok(())
    }

    fn render_include(&mut self, directive: &Directive, out: &mut String) -> Result<(), NeutralError> {
        let id = text_param(directive)?;
        let Some(includes) = self.includes else {
            self.record_fault(404, format!("cannot include '{id}': no template loader"));
            return Ok(());
        };

        let tree = match includes.resolve_include(id) {
            Ok(tree) => tree,
            Err(e) => {
                self.record_fault(e.status_code(), format!("include '{id}': {e}"));
                return Ok(());
            }
        };

        if !self.enter() {
            return Ok(());
        }
        let result = self.render_nodes(tree.nodes(), out);
        self.depth -= 1;
        result
    }

    /// Renders the body once with `value` bound as the local root.
    fn render_scoped(
        &mut self,
        value: Cow<'a, Value>,
        directive: &Directive,
        out: &mut String,
    ) -> Result<(), NeutralError> {
        if self.halted {
            return Ok(());
        }
        self.scopes.push(value);
        let result = self.render_body(directive, out);
        self.scopes.pop();
        result
    }

    fn render_body(&mut self, directive: &Directive, out: &mut String) -> Result<(), NeutralError> {
        let body = directive
            .body
            .as_deref()
            .ok_or_else(|| invariant(directive, "block directive without a body"))?;
        if !self.enter() {
            return Ok(());
        }
        let result = self.render_nodes(body, out);
        self.depth -= 1;
        result
    }

    /// Goes one level deeper, or records a fault past the nesting limit.
    fn enter(&mut self) -> bool {
        let limit = self.config.effective_max_depth();
        if self.depth >= limit {
            let message = format!("maximum nesting depth {limit} exceeded");
            self.record_fault(500, message);
            return false;
        }
        self.depth += 1;
        true
    }

    /// Resolves a path; undefined is a fault only under `strict_undefined`.
    fn lookup(&mut self, path: &PathExpr) -> Option<Cow<'a, Value>> {
        let value = self.resolve(path);
        if value.is_none() && self.config.strict_undefined {
            self.record_fault(500, format!("undefined path '{path}'"));
        }
        value
    }

    fn resolve(&self, path: &PathExpr) -> Option<Cow<'a, Value>> {
        if !path.is_local() {
            return resolve(self.root, path.segments()).found().map(Cow::Borrowed);
        }
        match self.scopes.last()? {
            Cow::Borrowed(scope) => {
                let scope: &'a Value = *scope;
                resolve(scope, path.segments()).found().map(Cow::Borrowed)
            }
            Cow::Owned(scope) => resolve(scope, path.segments())
                .found()
                .map(|v| Cow::Owned(v.clone())),
        }
    }

    fn language(&self) -> Option<&str> {
        self.languages.last().map(String::as_str)
    }

    /// Records a fault; only the first one is kept.
    fn record_fault(&mut self, code: u16, param: String) {
        tracing::warn!(code, param = %param, "render fault");
        if self.fault.is_none() {
            self.fault = Some(Status::new(code, param));
        }
    }
}

/// The local root bound for one mapping entry under `each`.
fn entry(key: &str, value: Value) -> Value {
    let mut map = Mapping::with_capacity(2);
    map.insert("key".to_string(), Value::Text(key.to_string()));
    map.insert("value".to_string(), value);
    Value::Mapping(map)
}

fn path_param(directive: &Directive) -> Result<&PathExpr, NeutralError> {
    match &directive.params {
        Params::Path(path) => Ok(path),
        _ => Err(invariant(directive, "expected a path parameter")),
    }
}

fn text_param(directive: &Directive) -> Result<&str, NeutralError> {
    match &directive.params {
        Params::Text(text) => Ok(text),
        _ => Err(invariant(directive, "expected a text parameter")),
    }
}

fn invariant(directive: &Directive, message: &str) -> NeutralError {
    tracing::error!(
        directive = %directive.kind,
        position = directive.position,
        message,
        "malformed syntax tree"
    );
    NeutralError::InternalInvariant(format!(
        "{message} for '{}' at byte {}",
        directive.kind, directive.position
    ))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use neutral_core::settings::MAX_DEPTH_LIMIT;

    use super::*;

    fn schema(json: &str) -> Schema {
        let mut schema = Schema::new();
        schema.merge_json(json).unwrap();
        schema
    }

    fn render(source: &str, json: &str) -> Evaluation {
        let tree = SyntaxTree::parse(source).unwrap();
        evaluate(&tree, &schema(json)).unwrap()
    }

    fn output(source: &str, json: &str) -> String {
        render(source, json).output
    }

    struct MapIncludes(HashMap<&'static str, &'static str>);

    impl IncludeResolver for MapIncludes {
        fn resolve_include(&self, id: &str) -> Result<Arc<SyntaxTree>, NeutralError> {
            let source = self
                .0
                .get(id)
                .ok_or_else(|| NeutralError::TemplateDoesNotExist(id.to_string()))?;
            Ok(Arc::new(SyntaxTree::parse(source)?))
        }
    }

    #[test]
    fn test_var_found() {
        let result = render("{:;data.title:}", r#"{"data": {"title": "Hello"}}"#);
        assert_eq!(result.output, "Hello");
        assert_eq!(result.status, Status::ok());
    }

    #[test]
    fn test_var_missing_is_empty_and_ok() {
        let result = render("{:;data.missing:}", "{}");
        assert_eq!(result.output, "");
        assert!(!result.status.has_error());
    }

    #[test]
    fn test_var_stringification() {
        let json = r#"{"data": {"n": null, "t": true, "f": false, "i": -7, "x": 2.5, "l": [1], "m": {"a": 1}}}"#;
        assert_eq!(
            output("[{:;data.n:}|{:;data.t:}|{:;data.f:}|{:;data.i:}|{:;data.x:}|{:;data.l:}|{:;data.m:}]", json),
            "[|true|false|-7|2.5||]"
        );
    }

    #[test]
    fn test_var_sequence_index() {
        assert_eq!(output("{:;data.l.1:}", r#"{"data": {"l": ["a", "b"]}}"#), "b");
    }

    #[test]
    fn test_strict_undefined_records_fault() {
        let json = r#"{"config": {"strict_undefined": true}}"#;
        let result = render("a{:;data.missing:}b", json);
        assert_eq!(result.output, "ab");
        assert_eq!(result.status.code(), 500);
        assert!(result.status.param().contains("data.missing"));
    }

    #[test]
    fn test_num_wrong_shape_faults() {
        let result = render("[{:num; data.m :}]", r#"{"data": {"m": {"a": 1}}}"#);
        assert_eq!(result.output, "[]");
        assert_eq!(result.status.code(), 500);
        assert!(result.status.param().contains("mapping"));
    }

    #[test]
    fn test_num_ok() {
        assert_eq!(output("{:num; data.n :}", r#"{"data": {"n": 3}}"#), "3");
    }

    #[test]
    fn test_json_directive() {
        let out = output("{:json; data.m :}", r#"{"data": {"m": {"b": [1, true], "a": null}}}"#);
        assert_eq!(out, r#"{"b":[1,true],"a":null}"#);
    }

    #[test]
    fn test_bool_and_negation() {
        let json = r#"{"data": {"yes": 1, "no": ""}}"#;
        assert_eq!(output("{:bool; data.yes >> Y :}{:bool; data.no >> N :}", json), "Y");
        assert_eq!(output("{:!bool; data.no >> N :}{:!bool; data.missing >> M :}", json), "NM");
    }

    #[test]
    fn test_each_sequence() {
        let json = r#"{"data": {"items": [{"name": "a"}, {"name": "b"}]}}"#;
        assert_eq!(output("{:each; data.items >> <{:;this.name:}> :}", json), "<a><b>");
    }

    #[test]
    fn test_each_mapping_binds_key_and_value() {
        let json = r#"{"data": {"m": {"x": 1, "y": 2}}}"#;
        assert_eq!(
            output("{:each; data.m >> {:;this.key:}={:;this.value:}; :}", json),
            "x=1;y=2;"
        );
    }

    #[test]
    fn test_each_nested_local_roots() {
        let json = r#"{"data": {"rows": [{"cells": [1, 2]}, {"cells": [3]}]}}"#;
        let source = "{:each; data.rows >> [{:each; this.cells >> {:;this:} :}] :}";
        assert_eq!(output(source, json), "[12][3]");
    }

    #[test]
    fn test_each_nested_over_owned_entry() {
        let json = r#"{"data": {"m": {"k": ["p", "q"]}}}"#;
        let source = "{:each; data.m >> {:;this.key:}:{:each; this.value >> {:;this:} :} :}";
        assert_eq!(output(source, json), "k:pq");
    }

    #[test]
    fn test_each_wrong_shape() {
        let result = render("{:each; data.s >> x :}", r#"{"data": {"s": "text"}}"#);
        assert_eq!(result.output, "");
        assert_eq!(result.status.code(), 500);
    }

    #[test]
    fn test_each_null_or_missing_renders_nothing() {
        let result = render("{:each; data.n >> x :}{:each; data.q >> y :}", r#"{"data": {"n": null}}"#);
        assert_eq!(result.output, "");
        assert!(!result.status.has_error());
    }

    #[test]
    fn test_with_binds_local_root() {
        let json = r#"{"data": {"user": {"name": "Ann", "age": 30}}}"#;
        assert_eq!(output("{:with; data.user >> {:;this.name:} ({:;this.age:}) :}", json), "Ann (30)");
    }

    #[test]
    fn test_this_outside_scope_is_undefined() {
        assert_eq!(output("[{:;this.x:}]", r#"{"data": {}}"#), "[]");
    }

    #[test]
    fn test_literal_translation() {
        let json = r#"{"inherit": {"locale": {"current": "es", "trans": {"es": {"Hello nts": "Hola"}}}}}"#;
        assert_eq!(output("Hello nts", json), "Hola");
        assert_eq!(output("{:;x:}\n Hello nts \n", json), "\n Hola \n");
    }

    #[test]
    fn test_literal_translation_unlisted_language_falls_back() {
        let json = r#"{"inherit": {"locale": {"current": "de", "trans": {"es": {"Hello nts": "Hola"}}}}}"#;
        assert_eq!(output("Hello nts", json), "Hello nts");
    }

    #[test]
    fn test_trans_directive_with_ref_key() {
        let json = r#"{"data": {"k": "ref:home"}, "inherit": {"locale": {"current": "es", "trans": {"es": {"ref:home": "Inicio"}}}}}"#;
        assert_eq!(output("{:trans; ref:home :}", json), "Inicio");
        assert_eq!(output("{:trans; {:;data.k:} :}", json), "Inicio");
    }

    #[test]
    fn test_lang_override() {
        let json = r#"{"inherit": {"locale": {"current": "es", "trans": {
            "es": {"Hello nts": "Hola"},
            "fr": {"Hello nts": "Bonjour"}
        }}}}"#;
        assert_eq!(
            output("{:lang; fr >> {:trans; Hello nts :} :}|{:trans; Hello nts :}", json),
            "Bonjour|Hola"
        );
    }

    #[test]
    fn test_disabled_directive() {
        let json = r#"{"config": {"disabled_directives": ["json"]}, "data": {"a": 1}}"#;
        let result = render("x{:json; data.a :}y", json);
        assert_eq!(result.output, "xy");
        assert_eq!(result.status.code(), 403);
    }

    #[test]
    fn test_first_fault_wins() {
        let json = r#"{"config": {"disabled_directives": ["json"]}, "data": {"s": "t"}}"#;
        let result = render("{:num; data.s :}{:json; data.s :}", json);
        assert_eq!(result.status.code(), 500);
    }

    #[test]
    fn test_exit_stops_and_sets_status() {
        let result = render("a{:exit; 404 not here :}b", "{}");
        assert_eq!(result.output, "a");
        assert_eq!(result.status.code(), 404);
        assert_eq!(result.status.param(), "not here");
    }

    #[test]
    fn test_exit_inside_loop_halts_everything() {
        let json = r#"{"data": {"l": [1, 2, 3]}}"#;
        let result = render("{:each; data.l >> {:;this:}{:exit; 302 /next :} :}tail", json);
        assert_eq!(result.output, "1");
        assert_eq!(result.status.code(), 302);
    }

    #[test]
    fn test_exit_overrides_fault() {
        let result = render("{:num; data.s :}{:exit; 200 :}", r#"{"data": {"s": "t"}}"#);
        assert_eq!(result.status, Status::ok());
    }

    #[test]
    fn test_invalid_exit_code() {
        let result = render("{:exit; abc :}after", "{}");
        assert_eq!(result.output, "after");
        assert_eq!(result.status.code(), 500);
    }

    #[test]
    fn test_max_depth() {
        let json = r#"{"config": {"max_depth": 1}, "data": {"t": true}}"#;
        let result = render("{:bool; data.t >> a{:bool; data.t >> b :} :}", json);
        assert_eq!(result.output, "a");
        assert_eq!(result.status.code(), 500);
    }

    #[test]
    fn test_include() {
        let includes = MapIncludes(HashMap::from([("head", "<h1>{:;data.title:}</h1>")]));
        let tree = SyntaxTree::parse("{:include; head :}body").unwrap();
        let schema = schema(r#"{"data": {"title": "T"}}"#);
        let result = Evaluator::new(&schema)
            .with_includes(&includes)
            .evaluate(&tree)
            .unwrap();
        assert_eq!(result.output, "<h1>T</h1>body");
    }

    #[test]
    fn test_include_faults() {
        let includes = MapIncludes(HashMap::from([("bad", "{:;x")]));
        let schema = Schema::new();

        let tree = SyntaxTree::parse("{:include; missing :}").unwrap();
        let result = Evaluator::new(&schema).with_includes(&includes).evaluate(&tree).unwrap();
        assert_eq!(result.status.code(), 404);

        let tree = SyntaxTree::parse("{:include; bad :}").unwrap();
        let result = Evaluator::new(&schema).with_includes(&includes).evaluate(&tree).unwrap();
        assert_eq!(result.status.code(), 500);

        let tree = SyntaxTree::parse("{:include; any :}").unwrap();
        assert_eq!(evaluate(&tree, &schema).unwrap().status.code(), 404);
    }

    #[test]
    fn test_recursive_include_is_bounded() {
        let includes = MapIncludes(HashMap::from([("self", "x{:include; self :}")]));
        let schema = schema(r#"{"config": {"max_depth": 5}}"#);
        let tree = SyntaxTree::parse("{:include; self :}").unwrap();
        let result = Evaluator::new(&schema).with_includes(&includes).evaluate(&tree).unwrap();
        assert_eq!(result.output, "xxxxx");
        assert_eq!(result.status.code(), 500);
    }

    #[test]
    fn test_recursive_include_capped_for_huge_max_depth() {
        let includes = MapIncludes(HashMap::from([("self", "x{:include; self :}")]));
        let config = EngineConfig {
            max_depth: 10_000_000,
            ..EngineConfig::default()
        };
        let schema = Schema::new();
        let tree = SyntaxTree::parse("{:include; self :}").unwrap();
        let result = Evaluator::with_config(&schema, config)
            .with_includes(&includes)
            .evaluate(&tree)
            .unwrap();
        assert_eq!(result.output, "x".repeat(MAX_DEPTH_LIMIT));
        assert_eq!(result.status.code(), 500);
    }

    #[test]
    fn test_malformed_tree_is_internal_error() {
        let tree = SyntaxTree::parse("{:bool; data.x >> y :}").unwrap();
        let mut nodes = tree.nodes().to_vec();
        if let Node::Directive(d) = &mut nodes[0] {
            d.body = None;
        }
        let schema = schema(r#"{"data": {"x": true}}"#);
        let mut out = String::new();
        let err = Evaluator::new(&schema).render_nodes(&nodes, &mut out).unwrap_err();
        assert!(err.is_internal());
    }

    #[test]
    fn test_evaluation_does_not_mutate_schema() {
        let s = schema(r#"{"data": {"m": {"a": [1, 2]}}}"#);
        let before = s.clone();
        let tree = SyntaxTree::parse("{:each; data.m >> {:json; this.value :} :}").unwrap();
        evaluate(&tree, &s).unwrap();
        assert_eq!(s, before);
    }
}
