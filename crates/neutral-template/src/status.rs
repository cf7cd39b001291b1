//! Render status: an HTTP-style code, its reason phrase, and a diagnostic
//! parameter.

use std::fmt;

use http::StatusCode;
use serde::{Deserialize, Serialize};

/// The outcome of a render.
///
/// The default status is `200 OK`. Any other code counts as an error.
///
/// # Examples
///
/// ```
/// use neutral_template::status::Status;
///
/// let status = Status::new(404, "parts/missing.ntpl");
/// assert_eq!(status.text(), "Not Found");
/// assert!(status.has_error());
/// assert!(!Status::default().has_error());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    code: u16,
    text: String,
    param: String,
}

impl Status {
    /// The success code.
    pub const OK: u16 = 200;

    /// Creates a status with the canonical reason phrase for `code`.
    pub fn new(code: u16, param: impl Into<String>) -> Self {
        Self {
            code,
            text: reason_phrase(code).to_string(),
            param: param.into(),
        }
    }

    /// The success status.
    pub fn ok() -> Self {
        Self::new(Self::OK, "")
    }

    /// The numeric code.
    pub const fn code(&self) -> u16 {
        self.code
    }

    /// The canonical reason phrase, or `Unknown`.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Extra diagnostic detail; empty when not applicable.
    pub fn param(&self) -> &str {
        &self.param
    }

    /// Returns `true` whenever the code is not `200`.
    pub const fn has_error(&self) -> bool {
        self.code != Self::OK
    }
}

impl Default for Status {
    fn default() -> Self {
        Self::ok()
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code, self.text)?;
        if !self.param.is_empty() {
            write!(f, " ({})", self.param)?;
        }
        Ok(())
    }
}

/// Parses an exit code given in a template. Only valid HTTP codes pass.
pub fn parse_code(raw: &str) -> Option<u16> {
    let code: u16 = raw.parse().ok()?;
    StatusCode::from_u16(code).ok().map(|c| c.as_u16())
}

fn reason_phrase(code: u16) -> &'static str {
    StatusCode::from_u16(code)
        .ok()
        .and_then(|c| c.canonical_reason())
        .unwrap_or("Unknown")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_ok() {
        let status = Status::default();
        assert_eq!(status.code(), 200);
        assert_eq!(status.text(), "OK");
        assert_eq!(status.param(), "");
        assert!(!status.has_error());
    }

    #[test]
    fn test_reason_phrases() {
        assert_eq!(Status::new(403, "").text(), "Forbidden");
        assert_eq!(Status::new(500, "").text(), "Internal Server Error");
        assert_eq!(Status::new(299, "").text(), "Unknown");
    }

    #[test]
    fn test_non_200_is_error() {
        assert!(Status::new(302, "/login").has_error());
        assert!(Status::new(201, "").has_error());
    }

    #[test]
    fn test_parse_code() {
        assert_eq!(parse_code("404"), Some(404));
        assert_eq!(parse_code("abc"), None);
        assert_eq!(parse_code("42"), None);
        assert_eq!(parse_code("1000"), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(Status::ok().to_string(), "200 OK");
        assert_eq!(Status::new(404, "a").to_string(), "404 Not Found (a)");
    }
}
