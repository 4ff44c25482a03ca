use crate::environment::Environment;
use crate::error::{ErrorKind, LispError, LispResult};
use crate::evaluator;
use crate::source::Span;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// A symbolic expression: the value kind, the source span it was read from
/// (or inherited from the call that synthesized it), and the mutability flag
/// stamped onto it at bind time by `let`/`const`.
#[derive(Debug, Clone)]
pub struct Expr {
    pub kind: Sexpr,
    pub span: Span,
    mutable: bool,
}

impl Expr {
    pub fn new(kind: Sexpr, span: Span) -> Self {
        Expr {
            kind,
            span,
            mutable: true,
        }
    }

    pub fn nil(span: Span) -> Self {
        Expr::new(Sexpr::List(Vec::new()), span)
    }

    pub fn real(value: f64, span: Span) -> Self {
        Expr::new(Sexpr::Real(value), span)
    }

    pub fn boolean(value: bool, span: Span) -> Self {
        Expr::new(Sexpr::Bool(value), span)
    }

    pub fn string(value: impl Into<String>, span: Span) -> Self {
        Expr::new(Sexpr::String(value.into()), span)
    }

    pub fn list(elements: Vec<Expr>, span: Span) -> Self {
        Expr::new(Sexpr::List(elements), span)
    }

    pub fn selector(elements: Vec<Expr>, span: Span) -> Self {
        Expr::new(Sexpr::Selector(elements), span)
    }

    /// Builds a symbol expression, validating the identifier grammar.
    pub fn symbol(text: &str, span: Span) -> LispResult<Self> {
        let symbol = Symbol::new(text, &span)?;
        Ok(Expr::new(Sexpr::Symbol(symbol), span))
    }

    pub fn procedure(procedure: Procedure, span: Span) -> Self {
        Expr::new(Sexpr::Procedure(procedure), span)
    }

    /// The canonical nil is the empty list (the empty selector evaluates to
    /// itself as well, but prints and compares as its own kind).
    pub fn is_nil(&self) -> bool {
        matches!(&self.kind, Sexpr::List(elements) if elements.is_empty())
    }

    pub fn is_mut(&self) -> bool {
        self.mutable
    }

    pub fn set_mut(&mut self, mutable: bool) {
        self.mutable = mutable;
    }
}

// Expressions compare by value; spans and mutability are diagnostics-side
// context and never participate in equality.
impl PartialEq for Expr {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)
    }
}

/// The closed set of runtime value kinds.
#[derive(Debug, Clone, PartialEq)]
pub enum Sexpr {
    Symbol(Symbol),
    String(String),
    Real(f64),
    Bool(bool),
    List(Vec<Expr>),
    /// Structurally a List, tagged distinctly to allow differentiated
    /// evaluation later; evaluated identically to List today.
    Selector(Vec<Expr>),
    Procedure(Procedure),
}

impl Sexpr {
    pub fn type_name(&self) -> &'static str {
        match self {
            Sexpr::Symbol(_) => "Symbol",
            Sexpr::String(_) => "String",
            Sexpr::Real(_) => "Real",
            Sexpr::Bool(_) => "Bool",
            Sexpr::List(_) => "List",
            Sexpr::Selector(_) => "Selector",
            Sexpr::Procedure(_) => "Fn",
        }
    }

    /// Text without the quoting `Display` adds; `send` prints this.
    pub fn plain_text(&self) -> String {
        match self {
            Sexpr::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

impl fmt::Display for Sexpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sexpr::Symbol(symbol) => write!(f, "{}", symbol),
            Sexpr::Real(n) => write!(f, "{}", n),
            Sexpr::Bool(b) => write!(f, "{}", if *b { "true" } else { "false" }),
            Sexpr::String(s) => {
                write!(f, "\"")?;
                for c in s.chars() {
                    match c {
                        '\\' => write!(f, "\\\\")?,
                        '\n' => write!(f, "\\n")?,
                        '\t' => write!(f, "\\t")?,
                        '"' => write!(f, "\\\"")?,
                        c => write!(f, "{}", c)?,
                    }
                }
                write!(f, "\"")
            }
            Sexpr::List(elements) | Sexpr::Selector(elements) => {
                if elements.is_empty() {
                    return write!(f, "nil");
                }
                write!(f, "(")?;
                for (i, element) in elements.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{}", element)?;
                }
                write!(f, ")")
            }
            Sexpr::Procedure(procedure) => write!(f, "{}", procedure),
        }
    }
}

/// An identifier, possibly `'`-quoted. A literal (quoted) symbol evaluates
/// to itself; an unquoted one resolves through the environment.
#[derive(Debug, Clone, Eq)]
pub struct Symbol {
    name: String,
    literal: bool,
}

impl Symbol {
    /// Parses `text` (with an optional leading `'`) into a symbol. The name
    /// must be non-empty, must not begin with an ASCII digit, and may not
    /// contain an embedded quote; failures carry a corrected suggestion.
    pub fn new(text: &str, span: &Span) -> LispResult<Self> {
        let literal = text.starts_with('\'');
        let name = if literal { &text[1..] } else { text };

        if !valid_identifier(name) {
            let cleaned: String = name.chars().filter(|&c| c != '\'').collect();
            let stripped = cleaned.trim_start_matches(|c: char| c.is_ascii_digit());
            let suggestion = format!("{}{}", if literal { "'" } else { "" }, stripped);
            return Err(
                LispError::new(ErrorKind::InvalidIdentifier(text.to_string()), span.clone())
                    .with_suggestion(suggestion),
            );
        }

        Ok(Symbol {
            name: name.to_string(),
            literal,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_literal(&self) -> bool {
        self.literal
    }
}

fn valid_identifier(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with(|c: char| c.is_ascii_digit())
        && !name.contains('\'')
}

// `'foo` and `foo` name the same binding; the quote only controls
// resolution, not identity.
impl PartialEq for Symbol {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", if self.literal { "'" } else { "" }, self.name)
    }
}

/// The concrete kind a Fn signature position or return slot may require.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeTag {
    /// Any expression; closure parameters and `=`'s operands use this.
    Any,
    Symbol,
    String,
    Real,
    Bool,
    List,
    Selector,
    Fn,
}

impl TypeTag {
    pub fn name(self) -> &'static str {
        match self {
            TypeTag::Any => "Expr",
            TypeTag::Symbol => "Symbol",
            TypeTag::String => "String",
            TypeTag::Real => "Real",
            TypeTag::Bool => "Bool",
            TypeTag::List => "List",
            TypeTag::Selector => "Selector",
            TypeTag::Fn => "Fn",
        }
    }

    pub fn matches(self, kind: &Sexpr) -> bool {
        match (self, kind) {
            (TypeTag::Any, _) => true,
            (TypeTag::Symbol, Sexpr::Symbol(_)) => true,
            (TypeTag::String, Sexpr::String(_)) => true,
            (TypeTag::Real, Sexpr::Real(_)) => true,
            (TypeTag::Bool, Sexpr::Bool(_)) => true,
            // A Selector is structurally a List and satisfies List slots.
            (TypeTag::List, Sexpr::List(_) | Sexpr::Selector(_)) => true,
            (TypeTag::Selector, Sexpr::Selector(_)) => true,
            (TypeTag::Fn, Sexpr::Procedure(_)) => true,
            _ => false,
        }
    }
}

/// An ordered parameter-type signature. A variadic tail tag repeats for all
/// remaining positions, encoding variadic arity.
#[derive(Debug, Clone, PartialEq)]
pub struct Signature {
    params: Vec<TypeTag>,
    variadic: Option<TypeTag>,
}

impl Signature {
    pub fn fixed(params: Vec<TypeTag>) -> Self {
        Signature {
            params,
            variadic: None,
        }
    }

    pub fn variadic(params: Vec<TypeTag>, rest: TypeTag) -> Self {
        Signature {
            params,
            variadic: Some(rest),
        }
    }

    pub fn is_variadic(&self) -> bool {
        self.variadic.is_some()
    }

    /// Declared positional arity: the fixed prefix length.
    pub fn arity(&self) -> usize {
        self.params.len()
    }

    /// Whether `count` arguments satisfy the arity rule: exact for fixed
    /// signatures, at-least-the-prefix for variadic ones.
    pub fn accepts(&self, count: usize) -> bool {
        if self.is_variadic() {
            count >= self.params.len()
        } else {
            count == self.params.len()
        }
    }

    pub fn type_at(&self, index: usize) -> TypeTag {
        self.params
            .get(index)
            .copied()
            .or(self.variadic)
            .unwrap_or(TypeTag::Any)
    }
}

/// Native operation bound into the base environment. Receives the evaluated
/// arguments, the caller's real (non-transient) environment, and the span of
/// the call site.
pub type PrimitiveFunc = fn(Vec<Expr>, Rc<RefCell<Environment>>, &Span) -> LispResult<RawValue>;

/// The data a user-defined function closes over.
pub struct ClosureData {
    pub params: Vec<Symbol>,
    pub body: Expr,
    pub env: Rc<RefCell<Environment>>,
}

#[derive(Clone)]
enum Callable {
    Primitive(PrimitiveFunc, &'static str),
    Closure(Rc<ClosureData>),
    /// A forwarding alias: the target's own convention applies on the inside,
    /// this procedure's signature on the outside.
    Alias(Rc<Procedure>),
}

/// A callable value: declared return type, parameter signature, underlying
/// implementation, and (for user-defined functions) the originating
/// expression, kept for display.
#[derive(Clone)]
pub struct Procedure {
    return_type: TypeTag,
    signature: Signature,
    callable: Callable,
    source: Option<Rc<Expr>>,
}

impl Procedure {
    pub fn primitive(
        name: &'static str,
        return_type: TypeTag,
        signature: Signature,
        func: PrimitiveFunc,
    ) -> Self {
        Procedure {
            return_type,
            signature,
            callable: Callable::Primitive(func, name),
            source: None,
        }
    }

    /// A closure over its definition-time environment; parameters are
    /// unconstrained (`Any`) and the return type is open.
    pub fn closure(
        params: Vec<Symbol>,
        body: Expr,
        env: Rc<RefCell<Environment>>,
        source: Expr,
    ) -> Self {
        let signature = Signature::fixed(vec![TypeTag::Any; params.len()]);
        Procedure {
            return_type: TypeTag::Any,
            signature,
            callable: Callable::Closure(Rc::new(ClosureData { params, body, env })),
            source: Some(Rc::new(source)),
        }
    }

    pub fn alias(target: Procedure, param_count: usize, source: Expr) -> Self {
        Procedure {
            return_type: TypeTag::Any,
            signature: Signature::fixed(vec![TypeTag::Any; param_count]),
            callable: Callable::Alias(Rc::new(target)),
            source: Some(Rc::new(source)),
        }
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    pub fn return_type(&self) -> TypeTag {
        self.return_type
    }

    /// Invokes this Fn with already-evaluated arguments.
    ///
    /// The identical convention applies to primitives, closures, and
    /// aliases: arity check, positional type check, invocation, result
    /// normalization, return-type check.
    pub fn call(
        &self,
        args: Vec<Expr>,
        env: Rc<RefCell<Environment>>,
        call_span: &Span,
    ) -> LispResult<Expr> {
        if !self.signature.accepts(args.len()) {
            return Err(LispError::new(
                ErrorKind::WrongArgumentCount {
                    expected: self.signature.arity(),
                    found: args.len(),
                },
                call_span.clone(),
            ));
        }

        for (index, arg) in args.iter().enumerate() {
            let expected = self.signature.type_at(index);
            if !expected.matches(&arg.kind) {
                return Err(LispError::new(
                    ErrorKind::WrongArgumentType {
                        expected: expected.name(),
                        found: arg.kind.type_name(),
                    },
                    arg.span.clone(),
                ));
            }
        }

        let raw = match &self.callable {
            Callable::Primitive(func, _) => func(args, env, call_span)?,
            Callable::Closure(closure) => {
                let local = Environment::new_enclosed(closure.env.clone());
                for (param, value) in closure.params.iter().zip(args) {
                    local.borrow_mut().bind(param.name(), value);
                }
                RawValue::Expr(evaluator::evaluate(closure.body.clone(), local)?)
            }
            Callable::Alias(target) => RawValue::Expr(target.call(args, env, call_span)?),
        };

        let result = raw.normalize(call_span);
        if !self.return_type.matches(&result.kind) {
            // An implementation broke its own contract.
            return Err(LispError::new(
                ErrorKind::WrongReturnType {
                    expected: self.return_type.name(),
                    found: result.kind.type_name(),
                },
                call_span.clone(),
            ));
        }
        Ok(result)
    }
}

impl fmt::Display for Procedure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.source, &self.callable) {
            (Some(source), _) => write!(f, "{}", source),
            (None, Callable::Primitive(_, name)) => write!(f, "<Fn {}>", name),
            (None, _) => write!(f, "<Fn>"),
        }
    }
}

// Closure environments form cycles with the bindings that hold them, so
// Debug stays shallow.
impl fmt::Debug for Procedure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.callable {
            Callable::Primitive(_, name) => write!(f, "Primitive({})", name),
            Callable::Closure(closure) => {
                let params: Vec<&str> = closure.params.iter().map(|p| p.name()).collect();
                write!(f, "Closure({})", params.join(" "))
            }
            Callable::Alias(target) => write!(f, "Alias({:?})", target),
        }
    }
}

impl PartialEq for Procedure {
    fn eq(&self, other: &Self) -> bool {
        match (&self.callable, &other.callable) {
            (Callable::Primitive(_, a), Callable::Primitive(_, b)) => a == b,
            (Callable::Closure(a), Callable::Closure(b)) => Rc::ptr_eq(a, b),
            (Callable::Alias(a), Callable::Alias(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

/// What a Fn implementation is allowed to hand back before normalization
/// folds it into the canonical `Sexpr` variants.
#[derive(Debug, PartialEq)]
pub enum RawValue {
    Expr(Expr),
    Seq(Vec<Expr>),
    Map(Vec<(Expr, Expr)>),
    Bool(bool),
    Real(f64),
    Text(String),
    Nothing,
}

impl RawValue {
    /// Folds this raw result into a canonical expression. Synthesized values
    /// inherit the span of the triggering call.
    pub fn normalize(self, span: &Span) -> Expr {
        match self {
            RawValue::Expr(expr) => expr,
            RawValue::Seq(elements) => Expr::list(elements, span.clone()),
            RawValue::Map(pairs) => {
                let flattened = pairs.into_iter().flat_map(|(k, v)| [k, v]).collect();
                Expr::list(flattened, span.clone())
            }
            RawValue::Bool(b) => Expr::boolean(b, span.clone()),
            RawValue::Real(n) => Expr::real(n, span.clone()),
            RawValue::Text(s) => Expr::string(s, span.clone()),
            RawValue::Nothing => Expr::nil(span.clone()),
        }
    }
}

impl From<Expr> for RawValue {
    fn from(expr: Expr) -> Self {
        RawValue::Expr(expr)
    }
}

impl From<f64> for RawValue {
    fn from(n: f64) -> Self {
        RawValue::Real(n)
    }
}

impl From<bool> for RawValue {
    fn from(b: bool) -> Self {
        RawValue::Bool(b)
    }
}

impl From<String> for RawValue {
    fn from(s: String) -> Self {
        RawValue::Text(s)
    }
}

impl From<Vec<Expr>> for RawValue {
    fn from(elements: Vec<Expr>) -> Self {
        RawValue::Seq(elements)
    }
}
