use crate::source::Span;
use std::fmt;
use thiserror::Error;

/// Every failure the engine can report, with its message text.
///
/// Variants are fine-grained so call sites stay declarative; hosts that only
/// care about the broad class of failure can go through [`ErrorKind::category`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ErrorKind {
    // --- Syntax (lexer / parser) ---
    #[error("unexpected closing brace")]
    UnexpectedClosingBrace,
    #[error("unclosed brace")]
    UnclosedBrace,
    #[error("unterminated string")]
    UnterminatedString,
    #[error("unrecognized escape sequence `\\{0}`")]
    UnknownEscape(char),
    #[error("`{0}` is not a valid identifier")]
    InvalidIdentifier(String),
    #[error("invalid token")]
    InvalidToken,

    // --- Scope (environment) ---
    #[error("`{0}` is not in scope")]
    NotInScope(String),
    #[error("`{0}` is immutable and cannot be reassigned")]
    ImmutableBinding(String),

    // --- Arity (Fn calls) ---
    #[error("the function expected {expected} arguments, but {found} were passed")]
    WrongArgumentCount { expected: usize, found: usize },

    // --- Type (Fn calls, conditions, comparisons) ---
    #[error("the function expected an argument of type `{expected}`, but one of type `{found}` was passed")]
    WrongArgumentType {
        expected: &'static str,
        found: &'static str,
    },
    #[error("the function tried to return a value of type `{found}` while declaring a return type of `{expected}`")]
    WrongReturnType {
        expected: &'static str,
        found: &'static str,
    },
    #[error("expected a boolean value but the expression returned a value of type `{0}`")]
    ExpectedBool(&'static str),
    #[error("cannot compare a value of type `{left}` to one of type `{right}`")]
    IncomparableTypes {
        left: &'static str,
        right: &'static str,
    },
    #[error("division by zero")]
    DivisionByZero,
    #[error("{0}")]
    InvalidFormat(String),

    // --- Form (malformed special forms) ---
    #[error("`{0}` expects a list of symbols or symbol-expression pairs")]
    ExpectedBindings(String),
    #[error("a literal symbol cannot be used here")]
    LiteralSymbolHere,
    #[error("extra elements in the `{0}` expression")]
    ExtraElements(String),
    #[error("expected a symbol-expression pair, not a `{0}`-expression pair")]
    ExpectedPairSymbol(&'static str),
    #[error("`{0}` does not accept a literal symbol")]
    LiteralSymbolPair(String),
    #[error("expected a symbol or a symbol-expression pair, not a value of type `{0}`")]
    ExpectedBindingElement(&'static str),
    #[error("the `lambda` expression expects an argument list and a body")]
    MissingLambdaParts,
    #[error("the `defun` expression expects a symbol, an argument list and a body")]
    MissingDefunParts,
    #[error("expected a symbol as the function name but got a value of type `{0}`")]
    ExpectedFunctionName(&'static str),
    #[error("the function name cannot be a literal symbol")]
    LiteralFunctionName,
    #[error("cannot redeclare a value that is already in the environment")]
    Redeclaration,
    #[error("expected an argument list but got a value of type `{0}`")]
    ExpectedParameterList(&'static str),
    #[error("expected a symbol as argument but got a value of type `{0}`")]
    ExpectedParameterSymbol(&'static str),
    #[error("literal symbols are not allowed as parameters")]
    LiteralParameter,
    #[error("the argument `{0}` is not unique")]
    DuplicateParameter(String),
    #[error("expected a conditional expression")]
    MissingCondition,
}

/// The broad taxonomy the fine-grained kinds map onto.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ErrorCategory {
    Syntax,
    Scope,
    Arity,
    Type,
    Form,
}

impl ErrorKind {
    pub fn category(&self) -> ErrorCategory {
        use ErrorKind::*;
        match self {
            UnexpectedClosingBrace | UnclosedBrace | UnterminatedString | UnknownEscape(_)
            | InvalidIdentifier(_) | InvalidToken => ErrorCategory::Syntax,
            NotInScope(_) | ImmutableBinding(_) => ErrorCategory::Scope,
            WrongArgumentCount { .. } => ErrorCategory::Arity,
            WrongArgumentType { .. }
            | WrongReturnType { .. }
            | ExpectedBool(_)
            | IncomparableTypes { .. }
            | DivisionByZero
            | InvalidFormat(_) => ErrorCategory::Type,
            ExpectedBindings(_) | LiteralSymbolHere | ExtraElements(_) | ExpectedPairSymbol(_)
            | LiteralSymbolPair(_) | ExpectedBindingElement(_) | MissingLambdaParts
            | MissingDefunParts | ExpectedFunctionName(_) | LiteralFunctionName | Redeclaration
            | ExpectedParameterList(_) | ExpectedParameterSymbol(_) | LiteralParameter
            | DuplicateParameter(_) | MissingCondition => ErrorCategory::Form,
        }
    }
}

/// The uniform structured failure carried out of every component: what went
/// wrong, where in the program text, and (sometimes) a corrected spelling.
#[derive(Debug, Clone, PartialEq)]
pub struct LispError {
    pub kind: ErrorKind,
    pub span: Span,
    pub suggestion: Option<String>,
}

impl LispError {
    pub fn new(kind: ErrorKind, span: Span) -> Self {
        LispError {
            kind,
            span,
            suggestion: None,
        }
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    pub fn category(&self) -> ErrorCategory {
        self.kind.category()
    }
}

impl fmt::Display for LispError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at {}", self.kind, self.span.start)?;
        if let Some(suggestion) = &self.suggestion {
            write!(f, ". Did you mean `{}`?", suggestion)?;
        }
        Ok(())
    }
}

impl std::error::Error for LispError {}

/// Result type alias used throughout the crate.
pub type LispResult<T> = Result<T, LispError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categories() {
        assert_eq!(
            ErrorKind::UnclosedBrace.category(),
            ErrorCategory::Syntax
        );
        assert_eq!(
            ErrorKind::NotInScope("x".to_string()).category(),
            ErrorCategory::Scope
        );
        assert_eq!(
            ErrorKind::WrongArgumentCount {
                expected: 1,
                found: 2
            }
            .category(),
            ErrorCategory::Arity
        );
        assert_eq!(
            ErrorKind::ExpectedBool("Real").category(),
            ErrorCategory::Type
        );
        assert_eq!(
            ErrorKind::MissingCondition.category(),
            ErrorCategory::Form
        );
    }

    #[test]
    fn test_display_includes_position_and_suggestion() {
        let error = LispError::new(
            ErrorKind::InvalidIdentifier("9lives".to_string()),
            Span::default(),
        )
        .with_suggestion("lives");
        let rendered = error.to_string();
        assert!(rendered.contains("`9lives` is not a valid identifier"));
        assert!(rendered.contains("line 1, column 1"));
        assert!(rendered.contains("Did you mean `lives`?"));
    }
}
