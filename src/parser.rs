use crate::error::{ErrorKind, LispError, LispResult};
use crate::lexer::{Token, TokenKind, tokenize};
use crate::source::Span;
use crate::types::{Expr, Sexpr};
use std::rc::Rc;

/// Recursive-descent parser over the token list.
///
/// The cursor is an index into an immutable token sequence, so recursive
/// calls share position without aliasing a mutable queue.
pub struct Parser {
    program: Rc<str>,
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    /// Tokenizes `input` and positions the cursor at the first token.
    pub fn new(input: &str) -> LispResult<Self> {
        let tokens = tokenize(input)?;
        let program = match tokens.first() {
            Some(token) => token.span.program.clone(),
            None => Rc::from(input),
        };
        Ok(Parser {
            program,
            tokens,
            pos: 0,
        })
    }

    fn next_token(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn peek_kind(&self) -> Option<&TokenKind> {
        self.tokens.get(self.pos).map(|t| &t.kind)
    }

    /// Parses a single expression. An exhausted cursor yields nil spanning
    /// the program's origin.
    pub fn parse_expr(&mut self) -> LispResult<Expr> {
        match self.next_token() {
            Some(token) => self.parse_token(token),
            None => Ok(Expr::nil(Span::origin(self.program.clone()))),
        }
    }

    /// Parses one top-level expression, leaving any remaining tokens on the
    /// cursor (whole scripts go through [`Parser::parse_program`]).
    pub fn parse(mut self) -> LispResult<Expr> {
        self.parse_expr()
    }

    /// Parses every top-level expression in order.
    pub fn parse_program(mut self) -> LispResult<Vec<Expr>> {
        let mut forms = Vec::new();
        while self.peek_kind().is_some() {
            forms.push(self.parse_expr()?);
        }
        Ok(forms)
    }

    fn parse_token(&mut self, token: Token) -> LispResult<Expr> {
        match token.kind {
            TokenKind::LParen => self.parse_sequence(token.span, false),
            TokenKind::LBracket => self.parse_sequence(token.span, true),
            // The lexer balances braces but not their kinds, so `(]` lands
            // here.
            TokenKind::RParen | TokenKind::RBracket => {
                Err(LispError::new(ErrorKind::UnexpectedClosingBrace, token.span))
            }
            TokenKind::String(text) => Ok(Expr::string(text, token.span)),
            TokenKind::Atom(text) => self.parse_atom(&text, token.span),
        }
    }

    /// Parses children up to the closing brace matching `open`, wrapping
    /// them in a List (parentheses) or Selector (brackets) that spans from
    /// the opener's start to the closer's end.
    fn parse_sequence(&mut self, open_span: Span, selector: bool) -> LispResult<Expr> {
        let closing = if selector {
            TokenKind::RBracket
        } else {
            TokenKind::RParen
        };
        let mut elements = Vec::new();
        loop {
            match self.next_token() {
                Some(token) if token.kind == closing => {
                    let span = open_span.merge(&token.span);
                    return Ok(if selector {
                        Expr::selector(elements, span)
                    } else {
                        Expr::list(elements, span)
                    });
                }
                Some(token) => elements.push(self.parse_token(token)?),
                // Unreachable for tokenize-produced input; the brace stack
                // already rejected unclosed openers.
                None => return Err(LispError::new(ErrorKind::UnclosedBrace, open_span)),
            }
        }
    }

    /// Classifies an atom token: `nil`, `true`/`false`, a hexadecimal or
    /// decimal float, and otherwise a (validated) symbol.
    fn parse_atom(&mut self, text: &str, span: Span) -> LispResult<Expr> {
        match text {
            "nil" => Ok(Expr::nil(span)),
            "true" => Ok(Expr::boolean(true, span)),
            "false" => Ok(Expr::boolean(false, span)),
            _ => {
                if text.starts_with("0x") {
                    if let Some(value) = parse_hex_float(text) {
                        return Ok(Expr::real(value, span));
                    }
                }
                if let Ok(value) = text.parse::<f64>() {
                    return Ok(Expr::real(value, span));
                }
                Expr::symbol(text, span)
            }
        }
    }
}

/// Parses a `0x`-prefixed hexadecimal float: hex digits with an optional
/// fraction and an optional binary exponent (`0x1.8p3` = 12).
fn parse_hex_float(text: &str) -> Option<f64> {
    let body = text.strip_prefix("0x")?;
    let (mantissa, exponent) = match body.split_once(['p', 'P']) {
        Some((mantissa, exponent)) => (mantissa, Some(exponent)),
        None => (body, None),
    };
    let (int_part, frac_part) = match mantissa.split_once('.') {
        Some((int_part, frac_part)) => (int_part, frac_part),
        None => (mantissa, ""),
    };
    if int_part.is_empty() && frac_part.is_empty() {
        return None;
    }

    let mut value = 0.0f64;
    for c in int_part.chars() {
        value = value * 16.0 + f64::from(c.to_digit(16)?);
    }
    let mut scale = 1.0 / 16.0;
    for c in frac_part.chars() {
        value += f64::from(c.to_digit(16)?) * scale;
        scale /= 16.0;
    }
    if let Some(exponent) = exponent {
        let exponent: i32 = exponent.parse().ok()?;
        value *= 2f64.powi(exponent);
    }
    Some(value)
}

/// Lexes and parses one expression from `input`.
pub fn parse_str(input: &str) -> LispResult<Expr> {
    Parser::new(input)?.parse()
}

/// Lexes and parses every top-level expression in `input`.
pub fn parse_program(input: &str) -> LispResult<Vec<Expr>> {
    Parser::new(input)?.parse_program()
}
