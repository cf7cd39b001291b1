//! Template lexer (tokenizer).
//!
//! Converts raw template source text into a flat stream of [`Token`]s:
//! literal text runs, directive openers (`{:`) and directive closers (`:}`).
//! Comments (`{:* ... *:}`) are dropped here and never reach the parser.
//!
//! Every token carries the byte offset at which it starts, so the parser can
//! report syntax errors with a position.

use neutral_core::error::NeutralError;

/// Opens a directive.
pub const OPEN: &str = "{:";
/// Closes a directive.
pub const CLOSE: &str = ":}";
/// Opens a comment.
pub const COMMENT_OPEN: &str = "{:*";
/// Closes a comment.
pub const COMMENT_CLOSE: &str = "*:}";

/// A token produced by the template lexer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Token<'s> {
    /// A literal text run.
    Text { position: usize, text: &'s str },
    /// `{:`
    Open { position: usize },
    /// `:}`
    Close { position: usize },
}

impl Token<'_> {
    /// Byte offset of this token in the source.
    pub const fn position(&self) -> usize {
        match self {
            Self::Text { position, .. } | Self::Open { position } | Self::Close { position } => {
                *position
            }
        }
    }
}

/// Tokenizes a template source string into a sequence of [`Token`]s.
///
/// The lexer does not check that openers and closers balance; that is the
/// parser's job.
///
/// # Errors
///
/// Returns a syntax error if a comment is opened but never closed.
pub fn tokenize(source: &str) -> Result<Vec<Token<'_>>, NeutralError> {
    let mut tokens = Vec::new();
    let mut offset = 0;

    while offset < source.len() {
        let remaining = &source[offset..];

        let Some((pos, marker)) = find_next_marker(remaining) else {
            tokens.push(Token::Text {
                position: offset,
                text: remaining,
            });
            break;
        };

        if pos > 0 {
            tokens.push(Token::Text {
                position: offset,
                text: &remaining[..pos],
            });
        }
        let at = offset + pos;

        match marker {
            Marker::Comment => {
                let body_start = at + COMMENT_OPEN.len();
                let Some(end) = source[body_start..].find(COMMENT_CLOSE) else {
                    return Err(NeutralError::syntax(at, "unterminated comment: expected '*:}'"));
                };
                offset = body_start + end + COMMENT_CLOSE.len();
            }
            Marker::Open => {
                tokens.push(Token::Open { position: at });
                offset = at + OPEN.len();
            }
            Marker::Close => {
                tokens.push(Token::Close { position: at });
                offset = at + CLOSE.len();
            }
        }
    }

    Ok(tokens)
}

#[derive(Debug, Clone, Copy)]
enum Marker {
    Open,    // {:
    Close,   // :}
    Comment, // {:*
}

/// Finds the next opener, closer or comment in the source.
fn find_next_marker(s: &str) -> Option<(usize, Marker)> {
    let open = s.find(OPEN);
    let close = s.find(CLOSE);

    match (open, close) {
        (Some(o), Some(c)) if c < o => Some((c, Marker::Close)),
        (Some(o), _) => {
            if s[o..].starts_with(COMMENT_OPEN) {
                Some((o, Marker::Comment))
            } else {
                Some((o, Marker::Open))
            }
        }
        (None, Some(c)) => Some((c, Marker::Close)),
        (None, None) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text() {
        let tokens = tokenize("Hello world").unwrap();
        assert_eq!(
            tokens,
            vec![Token::Text {
                position: 0,
                text: "Hello world"
            }]
        );
    }

    #[test]
    fn test_empty_source() {
        assert!(tokenize("").unwrap().is_empty());
    }

    #[test]
    fn test_var_directive() {
        let tokens = tokenize("{:;data.title:}").unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::Open { position: 0 },
                Token::Text {
                    position: 2,
                    text: ";data.title"
                },
                Token::Close { position: 13 },
            ]
        );
    }

    #[test]
    fn test_text_around_directive() {
        let tokens = tokenize("a {:;x:} b").unwrap();
        assert_eq!(tokens.len(), 5);
        assert_eq!(tokens[0], Token::Text { position: 0, text: "a " });
        assert_eq!(tokens[4], Token::Text { position: 8, text: " b" });
    }

    #[test]
    fn test_nested_directives() {
        let tokens = tokenize("{:each; l >> {:;this:} :}").unwrap();
        let opens = tokens.iter().filter(|t| matches!(t, Token::Open { .. })).count();
        let closes = tokens.iter().filter(|t| matches!(t, Token::Close { .. })).count();
        assert_eq!(opens, 2);
        assert_eq!(closes, 2);
    }

    #[test]
    fn test_comment_dropped() {
        let tokens = tokenize("a{:* note {:;x:} *:}b").unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::Text { position: 0, text: "a" },
                Token::Text {
                    position: 20,
                    text: "b"
                },
            ]
        );
    }

    #[test]
    fn test_unterminated_comment() {
        let err = tokenize("ab{:* never closed").unwrap_err();
        match err {
            NeutralError::Syntax { position, .. } => assert_eq!(position, 2),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_stray_close_is_a_token() {
        let tokens = tokenize("x :} y").unwrap();
        assert_eq!(tokens[1], Token::Close { position: 2 });
    }

    #[test]
    fn test_token_position() {
        let tokens = tokenize("ab{:;x:}").unwrap();
        let positions: Vec<usize> = tokens.iter().map(Token::position).collect();
        assert_eq!(positions, vec![0, 2, 4, 6]);
    }

    #[test]
    fn test_multibyte_text() {
        let tokens = tokenize("ñ{:;x:}").unwrap();
        assert_eq!(tokens[1], Token::Open { position: 2 });
    }
}
