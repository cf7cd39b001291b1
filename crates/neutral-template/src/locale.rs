//! Translation lookups against the schema's locale table.
//!
//! The table lives at `inherit.locale`:
//!
//! ```json
//! {"inherit": {"locale": {
//!     "current": "es",
//!     "trans": {"es": {"Hello nts": "Hola", "ref:menu_home": "Inicio"}}
//! }}}
//! ```
//!
//! Keys are matched exactly, `ref:`-prefixed keys included. The table is a
//! read-only view: it borrows from the schema of the render in progress.

use std::borrow::Cow;

use crate::schema::{resolve, Lookup};
use crate::value::Value;

/// Prefix of reference keys, which name a message instead of quoting it.
pub const REF_PREFIX: &str = "ref:";

/// A borrowed view of `inherit.locale`.
#[derive(Debug, Clone, Copy)]
pub struct LocaleTable<'a> {
    locale: Option<&'a Value>,
}

impl<'a> LocaleTable<'a> {
    /// Builds the view from a schema root. A missing table is valid and
    /// simply translates nothing.
    pub fn from_root(root: &'a Value) -> Self {
        Self {
            locale: resolve(root, ["inherit", "locale"]).found(),
        }
    }

    /// The `current` language tag, if any.
    pub fn current(&self) -> Option<&'a str> {
        self.locale?.get("current")?.as_str()
    }

    /// Looks up `key` in the table of `lang`, or of the current language when
    /// no override is given. Returns `None` on a miss.
    pub fn lookup(&self, lang_override: Option<&str>, key: &str) -> Option<&'a str> {
        let lang = match lang_override {
            Some(lang) => lang,
            None => self.current()?,
        };
        match resolve(self.locale?, ["trans", lang, key]) {
            Lookup::Found(Value::Text(text)) => Some(text.as_str()),
            _ => None,
        }
    }

    /// Translates `key`, falling back to the key itself.
    pub fn translate<'k>(&self, lang_override: Option<&str>, key: &'k str) -> Cow<'k, str>
    where
        'a: 'k,
    {
        self.lookup(lang_override, key)
            .map_or(Cow::Borrowed(key), Cow::Borrowed)
    }

    /// Translates a literal run of template text.
    ///
    /// The run is looked up by its trimmed content; on a hit the leading and
    /// trailing whitespace of the original run is kept around the translation.
    /// Runs that are blank, or have no entry, come back unchanged.
    pub fn translate_literal<'k>(&self, lang_override: Option<&str>, text: &'k str) -> Cow<'k, str>
    where
        'a: 'k,
    {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Cow::Borrowed(text);
        }
        let Some(translated) = self.lookup(lang_override, trimmed) else {
            return Cow::Borrowed(text);
        };

        let start = text.len() - text.trim_start().len();
        let end = text.trim_end().len();
        if start == 0 && end == text.len() {
            return Cow::Borrowed(translated);
        }
        let mut out = String::with_capacity(text.len() - trimmed.len() + translated.len());
        out.push_str(&text[..start]);
        out.push_str(translated);
        out.push_str(&text[end..]);
        Cow::Owned(out)
    }
}
