use crate::environment::Environment;
use crate::error::{ErrorKind, LispError, LispResult};
use crate::source::Span;
use crate::types::{Expr, PrimitiveFunc, Procedure, RawValue, Sexpr, Signature, TypeTag};
use std::cell::RefCell;
use std::f64::consts;
use std::rc::Rc;

/// Seeds a root frame with the standard bindings: numeric constants and the
/// builtin procedures. The engine core only relies on the environment's
/// bind/lookup contract; this table is configuration.
pub fn install(env: &Rc<RefCell<Environment>>) {
    let mut env = env.borrow_mut();

    bind_constant(&mut env, "e", consts::E);
    bind_constant(&mut env, "inf", f64::INFINITY);
    bind_constant(&mut env, "nan", f64::NAN);
    bind_constant(&mut env, "pi", consts::PI);
    bind_constant(&mut env, "tau", consts::TAU);

    use TypeTag::*;
    add_primitive(&mut env, "send", List, Signature::variadic(vec![], Any), prim_send);
    add_primitive(
        &mut env,
        "sendf",
        List,
        Signature::variadic(vec![String], Any),
        prim_sendf,
    );

    add_primitive(&mut env, "set", Any, Signature::fixed(vec![Symbol, Any]), prim_set);
    add_primitive(&mut env, "apply", Any, Signature::fixed(vec![Fn, List]), prim_apply);

    add_primitive(&mut env, "+", Real, Signature::variadic(vec![], Real), prim_add);
    add_primitive(&mut env, "-", Real, Signature::variadic(vec![], Real), prim_sub);
    add_primitive(&mut env, "*", Real, Signature::variadic(vec![], Real), prim_mul);
    add_primitive(&mut env, "/", Real, Signature::variadic(vec![], Real), prim_div);

    add_primitive(&mut env, "<", Bool, Signature::fixed(vec![Real, Real]), prim_less);
    add_primitive(&mut env, "<=", Bool, Signature::fixed(vec![Real, Real]), prim_less_eq);
    add_primitive(&mut env, ">", Bool, Signature::fixed(vec![Real, Real]), prim_greater);
    add_primitive(&mut env, ">=", Bool, Signature::fixed(vec![Real, Real]), prim_greater_eq);

    add_primitive(&mut env, "=", Bool, Signature::fixed(vec![Any, Any]), prim_eq);
    add_primitive(&mut env, "!=", Bool, Signature::fixed(vec![Any, Any]), prim_ne);

    add_primitive(&mut env, "!", Bool, Signature::fixed(vec![Bool]), prim_not);
    add_primitive(&mut env, "&&", Bool, Signature::variadic(vec![], Bool), prim_and);
    add_primitive(&mut env, "||", Bool, Signature::variadic(vec![], Bool), prim_or);

    add_primitive(&mut env, "~", Real, Signature::fixed(vec![Real]), prim_bitnot);
    add_primitive(&mut env, "&", Real, Signature::variadic(vec![], Real), prim_bitand);
    add_primitive(&mut env, "|", Real, Signature::variadic(vec![], Real), prim_bitor);
}

fn bind_constant(env: &mut Environment, name: &str, value: f64) {
    env.bind(name, Expr::real(value, Span::default()));
}

fn add_primitive(
    env: &mut Environment,
    name: &'static str,
    returns: TypeTag,
    signature: Signature,
    func: PrimitiveFunc,
) {
    let procedure = Procedure::primitive(name, returns, signature, func);
    env.bind(name, Expr::procedure(procedure, Span::default()));
}

// The calling convention has already type-checked arguments against the
// signature; these extractors keep the no-panic discipline anyway.
fn expect_real(expr: &Expr) -> LispResult<f64> {
    match &expr.kind {
        Sexpr::Real(n) => Ok(*n),
        other => Err(LispError::new(
            ErrorKind::WrongArgumentType {
                expected: "Real",
                found: other.type_name(),
            },
            expr.span.clone(),
        )),
    }
}

fn expect_bool(expr: &Expr) -> LispResult<bool> {
    match &expr.kind {
        Sexpr::Bool(b) => Ok(*b),
        other => Err(LispError::new(
            ErrorKind::WrongArgumentType {
                expected: "Bool",
                found: other.type_name(),
            },
            expr.span.clone(),
        )),
    }
}

fn arity_error(expected: usize, found: usize, span: &Span) -> LispError {
    LispError::new(
        ErrorKind::WrongArgumentCount { expected, found },
        span.clone(),
    )
}

// --- Output ---

pub fn prim_send(
    args: Vec<Expr>,
    _env: Rc<RefCell<Environment>>,
    _span: &Span,
) -> LispResult<RawValue> {
    let parts: Vec<String> = args.iter().map(|arg| arg.kind.plain_text()).collect();
    println!("{}", parts.join(" "));
    Ok(RawValue::Nothing)
}

pub fn prim_sendf(
    args: Vec<Expr>,
    _env: Rc<RefCell<Environment>>,
    span: &Span,
) -> LispResult<RawValue> {
    let mut args = args.into_iter();
    let Some(format) = args.next() else {
        return Err(arity_error(1, 0, span));
    };
    let Sexpr::String(format) = &format.kind else {
        return Err(LispError::new(
            ErrorKind::WrongArgumentType {
                expected: "String",
                found: format.kind.type_name(),
            },
            format.span.clone(),
        ));
    };
    let rest: Vec<Expr> = args.collect();
    println!("{}", format_directives(format, &rest, span)?);
    Ok(RawValue::Nothing)
}

/// Substitutes `%s` (plain text), `%d` (truncated integer), `%f` (fixed
/// six-digit float), `%g` (shortest float) and `%%` into `fmt`.
fn format_directives(fmt: &str, args: &[Expr], span: &Span) -> LispResult<String> {
    let mut out = String::with_capacity(fmt.len());
    let mut chars = fmt.chars();
    let mut next_arg = 0usize;

    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('%') => out.push('%'),
            Some(directive @ ('s' | 'd' | 'f' | 'g')) => {
                let Some(arg) = args.get(next_arg) else {
                    return Err(LispError::new(
                        ErrorKind::InvalidFormat(
                            "not enough arguments for the format string".to_string(),
                        ),
                        span.clone(),
                    ));
                };
                next_arg += 1;
                match directive {
                    'd' => out.push_str(&format!("{}", expect_real(arg)? as i64)),
                    'f' => out.push_str(&format!("{:.6}", expect_real(arg)?)),
                    'g' => out.push_str(&format!("{}", expect_real(arg)?)),
                    _ => out.push_str(&arg.kind.plain_text()),
                }
            }
            Some(other) => {
                return Err(LispError::new(
                    ErrorKind::InvalidFormat(format!(
                        "`%{}` is not a recognized format directive",
                        other
                    )),
                    span.clone(),
                ));
            }
            None => {
                return Err(LispError::new(
                    ErrorKind::InvalidFormat("the format string ends in a bare `%`".to_string()),
                    span.clone(),
                ));
            }
        }
    }
    Ok(out)
}

// --- Explicit mutation and application ---

/// `(set 'name value)`: looks the target up (anywhere in the chain), then
/// re-binds it in the caller's frame and returns the bound value.
pub fn prim_set(
    args: Vec<Expr>,
    env: Rc<RefCell<Environment>>,
    span: &Span,
) -> LispResult<RawValue> {
    let mut args = args.into_iter();
    let (Some(target), Some(value)) = (args.next(), args.next()) else {
        return Err(arity_error(2, 0, span));
    };
    let Sexpr::Symbol(symbol) = &target.kind else {
        return Err(LispError::new(
            ErrorKind::WrongArgumentType {
                expected: "Symbol",
                found: target.kind.type_name(),
            },
            target.span.clone(),
        ));
    };

    let existing = env.borrow().lookup(symbol.name(), &target.span)?;
    if !existing.is_mut() {
        return Err(LispError::new(
            ErrorKind::ImmutableBinding(symbol.name().to_string()),
            target.span.clone(),
        ));
    }
    env.borrow_mut().bind(symbol.name(), value.clone());
    Ok(RawValue::Expr(value))
}

/// `(apply f list)`: invokes `f` with the list elements as arguments; the
/// target's own calling convention applies.
pub fn prim_apply(
    args: Vec<Expr>,
    env: Rc<RefCell<Environment>>,
    span: &Span,
) -> LispResult<RawValue> {
    let mut args = args.into_iter();
    let (Some(target), Some(list)) = (args.next(), args.next()) else {
        return Err(arity_error(2, 0, span));
    };
    let Sexpr::Procedure(procedure) = &target.kind else {
        return Err(LispError::new(
            ErrorKind::WrongArgumentType {
                expected: "Fn",
                found: target.kind.type_name(),
            },
            target.span.clone(),
        ));
    };
    let elements = match list.kind {
        Sexpr::List(elements) | Sexpr::Selector(elements) => elements,
        other => {
            return Err(LispError::new(
                ErrorKind::WrongArgumentType {
                    expected: "List",
                    found: other.type_name(),
                },
                list.span.clone(),
            ));
        }
    };
    Ok(RawValue::Expr(procedure.call(elements, env, &target.span)?))
}

// --- Arithmetic ---

pub fn prim_add(
    args: Vec<Expr>,
    _env: Rc<RefCell<Environment>>,
    _span: &Span,
) -> LispResult<RawValue> {
    let mut total = 0.0;
    for arg in &args {
        total += expect_real(arg)?;
    }
    Ok(total.into())
}

pub fn prim_sub(
    args: Vec<Expr>,
    _env: Rc<RefCell<Environment>>,
    span: &Span,
) -> LispResult<RawValue> {
    let mut values = args.iter();
    let Some(first) = values.next() else {
        return Err(arity_error(1, 0, span));
    };
    let mut result = expect_real(first)?;
    for arg in values {
        result -= expect_real(arg)?;
    }
    Ok(result.into())
}

pub fn prim_mul(
    args: Vec<Expr>,
    _env: Rc<RefCell<Environment>>,
    _span: &Span,
) -> LispResult<RawValue> {
    let mut product = 1.0;
    for arg in &args {
        product *= expect_real(arg)?;
    }
    Ok(product.into())
}

pub fn prim_div(
    args: Vec<Expr>,
    _env: Rc<RefCell<Environment>>,
    span: &Span,
) -> LispResult<RawValue> {
    let mut values = args.iter();
    let Some(first) = values.next() else {
        return Err(arity_error(1, 0, span));
    };
    let mut result = expect_real(first)?;
    for arg in values {
        let divisor = expect_real(arg)?;
        if divisor == 0.0 {
            return Err(LispError::new(ErrorKind::DivisionByZero, span.clone()));
        }
        result /= divisor;
    }
    Ok(result.into())
}

// --- Comparison ---

fn compare(
    args: &[Expr],
    span: &Span,
    op: fn(f64, f64) -> bool,
) -> LispResult<RawValue> {
    let [a, b] = args else {
        return Err(arity_error(2, args.len(), span));
    };
    Ok(op(expect_real(a)?, expect_real(b)?).into())
}

pub fn prim_less(
    args: Vec<Expr>,
    _env: Rc<RefCell<Environment>>,
    span: &Span,
) -> LispResult<RawValue> {
    compare(&args, span, |a, b| a < b)
}

pub fn prim_less_eq(
    args: Vec<Expr>,
    _env: Rc<RefCell<Environment>>,
    span: &Span,
) -> LispResult<RawValue> {
    compare(&args, span, |a, b| a <= b)
}

pub fn prim_greater(
    args: Vec<Expr>,
    _env: Rc<RefCell<Environment>>,
    span: &Span,
) -> LispResult<RawValue> {
    compare(&args, span, |a, b| a > b)
}

pub fn prim_greater_eq(
    args: Vec<Expr>,
    _env: Rc<RefCell<Environment>>,
    span: &Span,
) -> LispResult<RawValue> {
    compare(&args, span, |a, b| a >= b)
}

// Strict equality: comparing values of different concrete kinds is an
// error, not `false`.
fn strict_eq(args: &[Expr], span: &Span) -> LispResult<bool> {
    let [a, b] = args else {
        return Err(arity_error(2, args.len(), span));
    };
    if a.kind.type_name() != b.kind.type_name() {
        return Err(LispError::new(
            ErrorKind::IncomparableTypes {
                left: a.kind.type_name(),
                right: b.kind.type_name(),
            },
            span.clone(),
        ));
    }
    Ok(a == b)
}

pub fn prim_eq(
    args: Vec<Expr>,
    _env: Rc<RefCell<Environment>>,
    span: &Span,
) -> LispResult<RawValue> {
    Ok(strict_eq(&args, span)?.into())
}

pub fn prim_ne(
    args: Vec<Expr>,
    _env: Rc<RefCell<Environment>>,
    span: &Span,
) -> LispResult<RawValue> {
    Ok((!strict_eq(&args, span)?).into())
}

// --- Boolean logic ---

pub fn prim_not(
    args: Vec<Expr>,
    _env: Rc<RefCell<Environment>>,
    span: &Span,
) -> LispResult<RawValue> {
    let [value] = args.as_slice() else {
        return Err(arity_error(1, args.len(), span));
    };
    Ok((!expect_bool(value)?).into())
}

pub fn prim_and(
    args: Vec<Expr>,
    _env: Rc<RefCell<Environment>>,
    _span: &Span,
) -> LispResult<RawValue> {
    let mut result = true;
    for arg in &args {
        result = result && expect_bool(arg)?;
    }
    Ok(result.into())
}

pub fn prim_or(
    args: Vec<Expr>,
    _env: Rc<RefCell<Environment>>,
    _span: &Span,
) -> LispResult<RawValue> {
    let mut result = false;
    for arg in &args {
        result = result || expect_bool(arg)?;
    }
    Ok(result.into())
}

// --- Bitwise logic (over truncated integers) ---

pub fn prim_bitnot(
    args: Vec<Expr>,
    _env: Rc<RefCell<Environment>>,
    span: &Span,
) -> LispResult<RawValue> {
    let [value] = args.as_slice() else {
        return Err(arity_error(1, args.len(), span));
    };
    Ok(((!(expect_real(value)? as i64)) as f64).into())
}

pub fn prim_bitand(
    args: Vec<Expr>,
    _env: Rc<RefCell<Environment>>,
    _span: &Span,
) -> LispResult<RawValue> {
    let mut acc: i64 = -1;
    for arg in &args {
        acc &= expect_real(arg)? as i64;
    }
    Ok((acc as f64).into())
}

pub fn prim_bitor(
    args: Vec<Expr>,
    _env: Rc<RefCell<Environment>>,
    _span: &Span,
) -> LispResult<RawValue> {
    let mut acc: i64 = 0;
    for arg in &args {
        acc |= expect_real(arg)? as i64;
    }
    Ok((acc as f64).into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCategory;
    use crate::evaluator::eval_str;

    fn assert_eval(input: &str, expected: Sexpr) {
        match eval_str(input) {
            Ok(result) => assert_eq!(result.kind, expected, "Input: '{}'", input),
            Err(e) => panic!("Evaluation failed for input '{}': {}", input, e),
        }
    }

    fn eval_error(input: &str) -> LispError {
        eval_str(input).expect_err(input)
    }

    fn real(n: f64) -> Sexpr {
        Sexpr::Real(n)
    }

    #[test]
    fn test_constants() {
        assert_eval("pi", real(consts::PI));
        assert_eval("(* 2 pi)", real(consts::TAU));
        assert_eval("e", real(consts::E));
        assert_eval("(< 1 inf)", Sexpr::Bool(true));
        // Constants are mutable bindings
        assert_eval("(set 'pi 3) pi", real(3.0));
    }

    #[test]
    fn test_subtraction_and_division_edge_cases() {
        assert_eval("(- 5)", real(5.0));
        assert_eval("(/ 5)", real(5.0));
        let e = eval_error("(-)");
        assert_eq!(
            e.kind,
            ErrorKind::WrongArgumentCount {
                expected: 1,
                found: 0
            }
        );
        let e = eval_error("(/ 1 0)");
        assert_eq!(e.kind, ErrorKind::DivisionByZero);
        assert_eq!(e.category(), ErrorCategory::Type);
    }

    #[test]
    fn test_comparisons() {
        assert_eval("(< 1 2)", Sexpr::Bool(true));
        assert_eval("(<= 2 2)", Sexpr::Bool(true));
        assert_eval("(> 1 2)", Sexpr::Bool(false));
        assert_eval("(>= 3 2)", Sexpr::Bool(true));

        let e = eval_error("(< 1 \"two\")");
        assert_eq!(
            e.kind,
            ErrorKind::WrongArgumentType {
                expected: "Real",
                found: "String"
            }
        );
    }

    #[test]
    fn test_strict_equality() {
        assert_eval("(= 1 1)", Sexpr::Bool(true));
        assert_eval("(= 1 2)", Sexpr::Bool(false));
        assert_eval("(= \"a\" \"a\")", Sexpr::Bool(true));
        assert_eval("(!= \"a\" \"b\")", Sexpr::Bool(true));
        assert_eval("(= 'x 'x)", Sexpr::Bool(true));

        let e = eval_error("(= 1 true)");
        assert_eq!(
            e.kind,
            ErrorKind::IncomparableTypes {
                left: "Real",
                right: "Bool"
            }
        );
        // A Selector is not comparable to a List
        let e = eval_error("(= [] ())");
        assert_eq!(
            e.kind,
            ErrorKind::IncomparableTypes {
                left: "Selector",
                right: "List"
            }
        );
    }

    #[test]
    fn test_boolean_logic() {
        assert_eval("(! true)", Sexpr::Bool(false));
        assert_eval("(&& true true)", Sexpr::Bool(true));
        assert_eval("(&& true false true)", Sexpr::Bool(false));
        assert_eval("(|| false true)", Sexpr::Bool(true));
        // Fold identities
        assert_eval("(&&)", Sexpr::Bool(true));
        assert_eval("(||)", Sexpr::Bool(false));

        let e = eval_error("(&& true 1)");
        assert_eq!(
            e.kind,
            ErrorKind::WrongArgumentType {
                expected: "Bool",
                found: "Real"
            }
        );
    }

    #[test]
    fn test_bitwise_logic() {
        assert_eval("(~ 0)", real(-1.0));
        assert_eval("(~ -1)", real(0.0));
        assert_eval("(& 12 10)", real(8.0));
        assert_eval("(| 1 2)", real(3.0));
        assert_eval("(&)", real(-1.0));
        assert_eval("(|)", real(0.0));
        // Operands truncate toward zero
        assert_eval("(& 13.7 11.2)", real(9.0));
    }

    #[test]
    fn test_apply() {
        assert_eval("(apply + (1 2 3))", real(6.0));
        assert_eval("(apply * nil)", real(1.0));
        // The target's convention still applies
        let e = eval_error("(apply < (1 2 3))");
        assert_eq!(
            e.kind,
            ErrorKind::WrongArgumentCount {
                expected: 2,
                found: 3
            }
        );
    }

    #[test]
    fn test_set_returns_the_new_value() {
        assert_eval("(let ((x 1))) (set 'x 9)", real(9.0));
    }

    #[test]
    fn test_send_yields_nil() {
        let args = vec![];
        let result = prim_send(args, Environment::new(), &Span::default()).unwrap();
        assert_eq!(result, RawValue::Nothing);
    }

    #[test]
    fn test_format_directives() {
        let span = Span::default();
        let args = vec![
            Expr::string("x", Span::default()),
            Expr::real(4.25, Span::default()),
            Expr::real(4.25, Span::default()),
        ];
        assert_eq!(
            format_directives("%s: %d (%g) 100%%", &args, &span).unwrap(),
            "x: 4 (4.25) 100%"
        );
        assert_eq!(
            format_directives("%f", &args[1..2], &span).unwrap(),
            "4.250000"
        );

        let e = format_directives("%s %s", &args[..1], &span).unwrap_err();
        assert!(matches!(e.kind, ErrorKind::InvalidFormat(_)));

        let e = format_directives("%q", &args, &span).unwrap_err();
        assert!(matches!(e.kind, ErrorKind::InvalidFormat(_)));

        let e = format_directives("trailing %", &args, &span).unwrap_err();
        assert!(matches!(e.kind, ErrorKind::InvalidFormat(_)));
    }

    #[test]
    fn test_strings_print_unquoted_through_plain_text() {
        assert_eq!(
            Sexpr::String("hi".to_string()).plain_text(),
            "hi"
        );
        assert_eq!(Sexpr::Real(2.5).plain_text(), "2.5");
    }
}
