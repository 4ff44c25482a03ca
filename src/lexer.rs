use logos::Logos;
use std::fmt;
use std::rc::Rc;

use crate::error::{ErrorKind, LispError, LispResult};
use crate::source::{Position, Span};

#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\n]+")] // Whitespace separates atoms and is discarded
#[logos(error = LexerErrorKind)]
pub enum TokenKind {
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[regex(r#""([^"\\]|\\.)*.?"#, |lex| unescape(lex.slice()))]
    String(String),
    // Any other maximal delimiter-free run. Classification into nil / bool /
    // number / symbol happens in the parser.
    #[regex(r#"[^ \t\n()\[\]"]+"#, |lex| lex.slice().to_string())]
    Atom(String),
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::LParen => write!(f, "("),
            TokenKind::RParen => write!(f, ")"),
            TokenKind::LBracket => write!(f, "["),
            TokenKind::RBracket => write!(f, "]"),
            TokenKind::String(s) => write!(f, "\"{}\"", s),
            TokenKind::Atom(s) => write!(f, "{}", s),
        }
    }
}

#[derive(Default, Debug, Clone, PartialEq)]
pub enum LexerErrorKind {
    UnterminatedString,
    // `offset` is the byte position of the offending escape character within
    // the token slice, so the error can point at it exactly.
    UnknownEscape { escape: char, offset: usize },
    #[default]
    InvalidToken,
}

/// Decodes a raw string token (including both quotes) into its body.
///
/// The regex admits unterminated tails so their diagnostics can cite the
/// opening quote; termination is checked here.
fn unescape(slice: &str) -> Result<String, LexerErrorKind> {
    if slice.len() == 1 || !slice.ends_with('"') {
        return Err(LexerErrorKind::UnterminatedString);
    }
    let body = &slice[1..slice.len() - 1];
    let mut result = String::with_capacity(body.len());
    let mut chars = body.char_indices();
    while let Some((i, c)) = chars.next() {
        if c != '\\' {
            result.push(c);
            continue;
        }
        match chars.next() {
            Some((_, '\\')) => result.push('\\'),
            Some((_, 'n')) => result.push('\n'),
            Some((_, 't')) => result.push('\t'),
            Some((_, '"')) => result.push('"'),
            Some((_, other)) => {
                return Err(LexerErrorKind::UnknownEscape {
                    escape: other,
                    offset: i + 2, // past the opening quote and the backslash
                });
            }
            // A trailing `\"` swallowed the closing quote.
            None => return Err(LexerErrorKind::UnterminatedString),
        }
    }
    Ok(result)
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

// Walks the program text once, translating byte offsets into
// (index, line, column) positions. Offsets must be requested in order.
struct PositionCursor<'a> {
    text: &'a str,
    index: usize,
    line: u32,
    column: u32,
}

impl<'a> PositionCursor<'a> {
    fn new(text: &'a str) -> Self {
        PositionCursor {
            text,
            index: 0,
            line: 1,
            column: 1,
        }
    }

    fn advance_to(&mut self, target: usize) -> Position {
        for c in self.text[self.index..target].chars() {
            if c == '\n' {
                self.line += 1;
                self.column = 1;
            } else {
                self.column += 1;
            }
        }
        self.index = target;
        Position::new(target, self.line, self.column)
    }
}

/// Scans a full program into its token list, or fails with the first
/// syntax error: a stray or unclosed brace, an unterminated string, or an
/// unrecognized escape.
pub fn tokenize(input: &str) -> LispResult<Vec<Token>> {
    let program: Rc<str> = Rc::from(input);
    let mut cursor = PositionCursor::new(input);
    let mut tokens = Vec::new();
    let mut open_braces: Vec<Span> = Vec::new();

    for (result, range) in TokenKind::lexer(input).spanned() {
        match result {
            Ok(kind) => {
                let start = cursor.advance_to(range.start);
                let end = cursor.advance_to(range.end);
                let span = Span::new(program.clone(), start, end);
                match kind {
                    TokenKind::LParen | TokenKind::LBracket => {
                        open_braces.push(span.clone());
                    }
                    TokenKind::RParen | TokenKind::RBracket => {
                        if open_braces.pop().is_none() {
                            return Err(LispError::new(ErrorKind::UnexpectedClosingBrace, span));
                        }
                    }
                    _ => {}
                }
                tokens.push(Token { kind, span });
            }
            Err(LexerErrorKind::UnterminatedString) => {
                // Cite the opening quote, not the end of input.
                let start = cursor.advance_to(range.start);
                let end = cursor.advance_to(range.start + 1);
                return Err(LispError::new(
                    ErrorKind::UnterminatedString,
                    Span::new(program.clone(), start, end),
                ));
            }
            Err(LexerErrorKind::UnknownEscape { escape, offset }) => {
                let at = range.start + offset;
                let start = cursor.advance_to(at);
                let end = cursor.advance_to(at + escape.len_utf8());
                return Err(LispError::new(
                    ErrorKind::UnknownEscape(escape),
                    Span::new(program.clone(), start, end),
                ));
            }
            Err(LexerErrorKind::InvalidToken) => {
                let start = cursor.advance_to(range.start);
                let end = cursor.advance_to(range.end);
                return Err(LispError::new(
                    ErrorKind::InvalidToken,
                    Span::new(program.clone(), start, end),
                ));
            }
        }
    }

    if let Some(open) = open_braces.last() {
        // The innermost unmatched opener.
        return Err(LispError::new(ErrorKind::UnclosedBrace, open.clone()));
    }

    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCategory;

    // Helper to simplify testing token sequences
    fn assert_tokens(input: &str, expected: Vec<TokenKind>) {
        match tokenize(input) {
            Ok(tokens) => {
                let kinds: Vec<TokenKind> = tokens.into_iter().map(|t| t.kind).collect();
                assert_eq!(kinds, expected, "Input: '{}'", input);
            }
            Err(e) => panic!("Lexing failed for input '{}': {}", input, e),
        }
    }

    // Helper to simplify testing for lexer errors
    fn assert_lexer_error(input: &str, expected_kind: ErrorKind) -> LispError {
        match tokenize(input) {
            Ok(tokens) => panic!(
                "Expected lexing to fail for input '{}', but got tokens: {:?}",
                input, tokens
            ),
            Err(e) => {
                assert_eq!(e.kind, expected_kind, "Input: '{}'", input);
                assert_eq!(e.category(), ErrorCategory::Syntax);
                e
            }
        }
    }

    fn atom(s: &str) -> TokenKind {
        TokenKind::Atom(s.to_string())
    }

    #[test]
    fn test_empty_input() {
        assert_tokens("", vec![]);
        assert_tokens("  \t\n ", vec![]);
    }

    #[test]
    fn test_braces() {
        assert_tokens("()", vec![TokenKind::LParen, TokenKind::RParen]);
        assert_tokens("[ ]", vec![TokenKind::LBracket, TokenKind::RBracket]);
        assert_tokens(
            "([])",
            vec![
                TokenKind::LParen,
                TokenKind::LBracket,
                TokenKind::RBracket,
                TokenKind::RParen,
            ],
        );
    }

    #[test]
    fn test_atoms_and_whitespace() {
        assert_tokens(
            "(+ 1 2)",
            vec![
                TokenKind::LParen,
                atom("+"),
                atom("1"),
                atom("2"),
                TokenKind::RParen,
            ],
        );
        assert_tokens(
            "  ( let ( x 10 ) )  ",
            vec![
                TokenKind::LParen,
                atom("let"),
                TokenKind::LParen,
                atom("x"),
                atom("10"),
                TokenKind::RParen,
                TokenKind::RParen,
            ],
        );
        // A quote is an ordinary atom character
        assert_tokens("'foo", vec![atom("'foo")]);
        assert_tokens("0x1.8p3 nil true", vec![atom("0x1.8p3"), atom("nil"), atom("true")]);
    }

    #[test]
    fn test_strings() {
        assert_tokens(r#""hello""#, vec![TokenKind::String("hello".to_string())]);
        assert_tokens(
            r#""with space""#,
            vec![TokenKind::String("with space".to_string())],
        );
        assert_tokens(
            r#""esc \" \n \t \\""#,
            vec![TokenKind::String("esc \" \n \t \\".to_string())],
        );
        // Strings terminate atoms without intervening whitespace
        assert_tokens(
            r#"ab"cd""#,
            vec![atom("ab"), TokenKind::String("cd".to_string())],
        );
    }

    #[test]
    fn test_unexpected_closing_brace() {
        let e = assert_lexer_error("(+ 1 2))", ErrorKind::UnexpectedClosingBrace);
        assert_eq!(e.span.start.index, 7);
        assert_eq!(e.span.end.index, 8);

        let e = assert_lexer_error("]", ErrorKind::UnexpectedClosingBrace);
        assert_eq!(e.span.start.index, 0);
    }

    #[test]
    fn test_unclosed_brace_cites_innermost_opener() {
        let e = assert_lexer_error("(+ (.. (- 1", ErrorKind::UnclosedBrace);
        assert_eq!(e.span.start.index, 7);

        let e = assert_lexer_error("(", ErrorKind::UnclosedBrace);
        assert_eq!(e.span.start.index, 0);
    }

    #[test]
    fn test_unterminated_string_cites_opening_quote() {
        let e = assert_lexer_error(r#"(send "oops"#, ErrorKind::UnterminatedString);
        assert_eq!(e.span.start.index, 6);
        assert_eq!(e.span.end.index, 7);

        assert_lexer_error(r#"""#, ErrorKind::UnterminatedString);
        assert_lexer_error(r#""ends in escape\""#, ErrorKind::UnterminatedString);
    }

    #[test]
    fn test_unknown_escape_cites_the_escape_char() {
        let e = assert_lexer_error(r#""ab\qcd""#, ErrorKind::UnknownEscape('q'));
        assert_eq!(e.span.start.index, 4);
        assert_eq!(e.span.end.index, 5);
    }

    #[test]
    fn test_positions_track_lines_and_columns() {
        let tokens = tokenize("(a\n  bc)").expect("should tokenize");
        assert_eq!(tokens.len(), 4);

        assert_eq!(tokens[0].span.start, Position::new(0, 1, 1));
        assert_eq!(tokens[1].span.start, Position::new(1, 1, 2));
        assert_eq!(tokens[1].span.end, Position::new(2, 1, 3));
        // `bc` sits on line 2 after two columns of indent
        assert_eq!(tokens[2].span.start, Position::new(5, 2, 3));
        assert_eq!(tokens[2].span.end, Position::new(7, 2, 5));
        assert_eq!(tokens[3].span.start, Position::new(7, 2, 5));
    }

    #[test]
    fn test_spans_share_the_program_text() {
        let tokens = tokenize("(x)").expect("should tokenize");
        for token in &tokens {
            assert_eq!(&*token.span.program, "(x)");
        }
        assert_eq!(tokens[1].span.text(), "x");
    }
}
