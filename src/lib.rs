// Declare modules publicly so they are part of the library interface
pub mod environment;
pub mod error;
pub mod evaluator;
pub mod lexer;
pub mod parser;
pub mod pretty_print;
pub mod primitives;
pub mod source;
pub mod types;

pub use environment::Environment;
pub use error::{ErrorCategory, ErrorKind, LispError, LispResult};
pub use evaluator::{EvalResult, eval_str, eval_str_in, evaluate};
pub use lexer::{Token, TokenKind, tokenize};
pub use parser::{Parser, parse_program, parse_str};
pub use source::{Position, Span};
pub use types::{Expr, Procedure, RawValue, Sexpr, Signature, Symbol, TypeTag};
