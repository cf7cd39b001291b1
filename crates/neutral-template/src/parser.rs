//! Template parser.
//!
//! Converts the lexer's [`Token`] stream into an immutable [`SyntaxTree`] of
//! literal and directive [`Node`]s. A directive has the form
//!
//! ```text
//! {:[!]name; params [>> body] :}
//! ```
//!
//! where the body may contain further directives to any depth. The parser
//! keeps a stack of open directives to validate that every `{:` has a
//! matching `:}`. Paths are validated for shape only; the parser knows
//! nothing about any schema.

use std::fmt;

use neutral_core::error::NeutralError;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::lexer::{tokenize, Token};

/// Separates directive parameters from the directive body.
pub const BODY_SEPARATOR: &str = ">>";

/// The leading path segment that addresses the current local root.
pub const LOCAL_ROOT: &str = "this";

static PATH_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9_-]+(\.[A-Za-z0-9_-]+)*$").expect("valid regex")
});

/// A parsed, validated path expression such as `data.items.0.title`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathExpr {
    segments: Vec<String>,
    local: bool,
}

impl PathExpr {
    /// Parses a dotted path. Returns `None` for an empty or malformed path.
    pub fn parse(raw: &str) -> Option<Self> {
        if !PATH_RE.is_match(raw) {
            return None;
        }
        let mut segments: Vec<String> = raw.split('.').map(str::to_string).collect();
        let local = segments.first().is_some_and(|s| s == LOCAL_ROOT);
        if local {
            segments.remove(0);
        }
        Some(Self { segments, local })
    }

    /// Returns `true` if the path starts at the local root (`this`).
    pub const fn is_local(&self) -> bool {
        self.local
    }

    /// The segments to resolve, without the leading `this`.
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().map(String::as_str)
    }
}

impl fmt::Display for PathExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.local {
            f.write_str(LOCAL_ROOT)?;
            if !self.segments.is_empty() {
                f.write_str(".")?;
            }
        }
        f.write_str(&self.segments.join("."))
    }
}

/// Whether a directive takes a `>> body`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyRule {
    /// `>>` is a syntax error.
    Forbidden,
    /// `>>` must be present.
    Required,
    /// Everything after `;` is the body.
    Implicit,
}

/// What the parameter section of a directive holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamRule {
    /// A path expression.
    Path,
    /// A non-empty word (language tag, template id, exit code...).
    Text,
    /// Nothing.
    None,
}

/// The built-in directives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DirectiveKind {
    /// `{:;path:}` prints a value.
    Var,
    /// `{:num; path :}` prints a number.
    Num,
    /// `{:json; path :}` prints any value as JSON.
    Json,
    /// `{:bool; path >> body :}` renders the body when the value is truthy.
    Bool,
    /// `{:each; path >> body :}` renders the body per element.
    Each,
    /// `{:with; path >> body :}` renders the body with the value as local root.
    With,
    /// `{:trans; body :}` translates the rendered body.
    Trans,
    /// `{:lang; tag >> body :}` renders the body under another language.
    Lang,
    /// `{:include; id :}` renders another template inline.
    Include,
    /// `{:exit; code [param] :}` sets the status and stops evaluation.
    Exit,
}

impl DirectiveKind {
    /// Looks a directive up by name. The empty name is `var`.
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "" | "var" => Self::Var,
            "num" => Self::Num,
            "json" => Self::Json,
            "bool" => Self::Bool,
            "each" => Self::Each,
            "with" => Self::With,
            "trans" => Self::Trans,
            "lang" => Self::Lang,
            "include" => Self::Include,
            "exit" => Self::Exit,
            _ => return None,
        })
    }

    /// The directive's name, as used in `disabled_directives`.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Var => "var",
            Self::Num => "num",
            Self::Json => "json",
            Self::Bool => "bool",
            Self::Each => "each",
            Self::With => "with",
            Self::Trans => "trans",
            Self::Lang => "lang",
            Self::Include => "include",
            Self::Exit => "exit",
        }
    }

    /// Whether `!` may prefix the name.
    pub const fn negatable(self) -> bool {
        matches!(self, Self::Bool)
    }

    /// Whether the directive takes a body.
    pub const fn body_rule(self) -> BodyRule {
        match self {
            Self::Var | Self::Num | Self::Json | Self::Include | Self::Exit => BodyRule::Forbidden,
            Self::Bool | Self::Each | Self::With | Self::Lang => BodyRule::Required,
            Self::Trans => BodyRule::Implicit,
        }
    }

    /// What the parameter section must hold.
    pub const fn param_rule(self) -> ParamRule {
        match self {
            Self::Var | Self::Num | Self::Json | Self::Bool | Self::Each | Self::With => {
                ParamRule::Path
            }
            Self::Lang | Self::Include | Self::Exit => ParamRule::Text,
            Self::Trans => ParamRule::None,
        }
    }
}

impl fmt::Display for DirectiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Parsed directive parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Params {
    /// No parameters.
    None,
    /// A path into the schema or the local root.
    Path(PathExpr),
    /// A raw word or phrase, trimmed.
    Text(String),
}

/// A directive node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directive {
    pub kind: DirectiveKind,
    pub negated: bool,
    pub params: Params,
    pub body: Option<Vec<Node>>,
    /// Byte offset of the directive's `{:`.
    pub position: usize,
}

/// A node in the syntax tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    /// Literal text, emitted as-is unless it has a translation.
    Literal(String),
    /// A directive.
    Directive(Directive),
}

/// An immutable parsed template, independent of any schema.
///
/// # Examples
///
/// ```
/// use neutral_template::parser::{Node, SyntaxTree};
///
/// let tree = SyntaxTree::parse("Hi {:;data.name:}!").unwrap();
/// assert_eq!(tree.nodes().len(), 3);
/// assert!(matches!(&tree.nodes()[0], Node::Literal(s) if s == "Hi "));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SyntaxTree {
    nodes: Vec<Node>,
}

impl SyntaxTree {
    /// Parses template source into a tree.
    ///
    /// # Errors
    ///
    /// Returns [`NeutralError::Syntax`] for malformed source.
    pub fn parse(source: &str) -> Result<Self, NeutralError> {
        parse(source)
    }

    /// The top-level nodes.
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Returns `true` if the template has no nodes at all.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Counts directives at every depth.
    pub fn directive_count(&self) -> usize {
        fn count(nodes: &[Node]) -> usize {
            nodes
                .iter()
                .map(|n| match n {
                    Node::Literal(_) => 0,
                    Node::Directive(d) => 1 + d.body.as_deref().map_or(0, count),
                })
                .sum()
        }
        count(&self.nodes)
    }
}

/// Parses template source into a [`SyntaxTree`].
///
/// # Errors
///
/// Returns [`NeutralError::Syntax`] with the byte position of the problem:
/// unterminated directives or comments, a stray `:}`, a missing `;`, an
/// unknown directive name, an invalid path, a missing or unexpected `>>`,
/// a directive nested in another directive's parameters, or `!` on a
/// directive that cannot be negated.
pub fn parse(source: &str) -> Result<SyntaxTree, NeutralError> {
    let tokens = tokenize(source)?;
    let mut state = ParserState::default();

    for token in tokens {
        match token {
            Token::Text { text, .. } => state.push_text(text)?,
            Token::Open { position } => state.open(position)?,
            Token::Close { position } => state.close(position)?,
        }
    }

    state.finish()
}

/// Where text arriving at an open directive goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Head,
    Body,
}

/// A directive whose `:}` has not been seen yet.
#[derive(Debug)]
struct Frame {
    position: usize,
    section: Section,
    /// Raw text of the head: name and params until `;` is seen, params after.
    head: String,
    kind: Option<DirectiveKind>,
    negated: bool,
    body: Vec<Node>,
}

impl Frame {
    const fn new(position: usize) -> Self {
        Self {
            position,
            section: Section::Head,
            head: String::new(),
            kind: None,
            negated: false,
            body: Vec::new(),
        }
    }

    /// Consumes as much of the head as can be interpreted so far.
    fn advance(&mut self) -> Result<(), NeutralError> {
        if self.kind.is_none() {
            let Some(semi) = self.head.find(';') else {
                return Ok(());
            };
            let name = self.head[..semi].trim();
            let (negated, name) = match name.strip_prefix('!') {
                Some(rest) => (true, rest.trim_start()),
                None => (false, name),
            };
            let kind = DirectiveKind::from_name(name).ok_or_else(|| {
                NeutralError::syntax(self.position, format!("unknown directive '{name}'"))
            })?;
            if negated && !kind.negatable() {
                return Err(NeutralError::syntax(
                    self.position,
                    format!("directive '{kind}' cannot be negated"),
                ));
            }
            self.kind = Some(kind);
            self.negated = negated;
            self.head.replace_range(..=semi, "");
        }

        match self.kind.map(DirectiveKind::body_rule) {
            Some(BodyRule::Implicit) => {
                let text = std::mem::take(&mut self.head);
                self.section = Section::Body;
                push_literal(&mut self.body, &text);
            }
            Some(_) => {
                if let Some(sep) = self.head.find(BODY_SEPARATOR) {
                    let text = self.head.split_off(sep);
                    self.section = Section::Body;
                    push_literal(&mut self.body, &text[BODY_SEPARATOR.len()..]);
                }
            }
            None => {}
        }
        Ok(())
    }

    /// Validates the collected directive and turns it into a node.
    fn into_node(self) -> Result<Node, NeutralError> {
        let position = self.position;
        let kind = self.kind.ok_or_else(|| {
            NeutralError::syntax(position, "missing ';' after directive name")
        })?;

        let body = match (kind.body_rule(), self.section) {
            (BodyRule::Required, Section::Head) => {
                return Err(NeutralError::syntax(
                    position,
                    format!("directive '{kind}' requires '{BODY_SEPARATOR}' and a body"),
                ));
            }
            (BodyRule::Forbidden, Section::Body) => {
                return Err(NeutralError::syntax(
                    position,
                    format!("directive '{kind}' does not take a body"),
                ));
            }
            (_, Section::Body) => Some(trim_body(self.body)),
            (_, Section::Head) => None,
        };

        let raw = self.head.trim();
        let params = match kind.param_rule() {
            ParamRule::Path => {
                if raw.is_empty() {
                    return Err(NeutralError::syntax(position, format!("directive '{kind}' requires a path")));
                }
                let path = PathExpr::parse(raw).ok_or_else(|| {
                    NeutralError::syntax(position, format!("invalid path expression '{raw}'"))
                })?;
                Params::Path(path)
            }
            ParamRule::Text => {
                if raw.is_empty() {
                    return Err(NeutralError::syntax(
                        position,
                        format!("directive '{kind}' requires a parameter"),
                    ));
                }
                Params::Text(raw.to_string())
            }
            ParamRule::None => Params::None,
        };

        Ok(Node::Directive(Directive {
            kind,
            negated: self.negated,
            params,
            body,
            position,
        }))
    }
}

/// Stack-based parser state.
#[derive(Debug, Default)]
struct ParserState {
    root: Vec<Node>,
    stack: Vec<Frame>,
}

impl ParserState {
    fn push_text(&mut self, text: &str) -> Result<(), NeutralError> {
        match self.stack.last_mut() {
            None => {
                push_literal(&mut self.root, text);
                Ok(())
            }
            Some(frame) if frame.section == Section::Body => {
                push_literal(&mut frame.body, text);
                Ok(())
            }
            Some(frame) => {
                frame.head.push_str(text);
                frame.advance()
            }
        }
    }

    fn open(&mut self, position: usize) -> Result<(), NeutralError> {
        if let Some(frame) = self.stack.last() {
            if frame.section == Section::Head {
                return Err(NeutralError::syntax(
                    position,
                    "directives may only be nested inside a body",
                ));
            }
        }
        self.stack.push(Frame::new(position));
        Ok(())
    }

    fn close(&mut self, position: usize) -> Result<(), NeutralError> {
        let frame = self
            .stack
            .pop()
            .ok_or_else(|| NeutralError::syntax(position, "unexpected ':}' without matching '{:'"))?;
        let node = frame.into_node()?;
        match self.stack.last_mut() {
            Some(parent) => parent.body.push(node),
            None => self.root.push(node),
        }
        Ok(())
    }

    fn finish(self) -> Result<SyntaxTree, NeutralError> {
        if let Some(frame) = self.stack.last() {
            return Err(NeutralError::syntax(
                frame.position,
                "unterminated directive: expected ':}'",
            ));
        }
        Ok(SyntaxTree { nodes: self.root })
    }
}

/// Appends literal text, joining it with a preceding literal.
fn push_literal(nodes: &mut Vec<Node>, text: &str) {
    if text.is_empty() {
        return;
    }
    if let Some(Node::Literal(last)) = nodes.last_mut() {
        last.push_str(text);
    } else {
        nodes.push(Node::Literal(text.to_string()));
    }
}

/// Strips whitespace at the edges of a directive body.
fn trim_body(mut nodes: Vec<Node>) -> Vec<Node> {
    if let Some(Node::Literal(first)) = nodes.first_mut() {
        let start = first.len() - first.trim_start().len();
        first.replace_range(..start, "");
    }
    if let Some(Node::Literal(last)) = nodes.last_mut() {
        last.truncate(last.trim_end().len());
    }
    nodes.retain(|n| !matches!(n, Node::Literal(s) if s.is_empty()));
    nodes
}
