use crate::environment::Environment;
use crate::error::{ErrorKind, LispError, LispResult};
use crate::parser;
use crate::source::Span;
use crate::types::{Expr, Procedure, Sexpr, Symbol};
use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;

/// Result type alias for evaluation.
pub type EvalResult = LispResult<Expr>;

/// Evaluates an expression tree within the given environment.
pub fn evaluate(node: Expr, env: Rc<RefCell<Environment>>) -> EvalResult {
    match &node.kind {
        Sexpr::Symbol(symbol) if !symbol.is_literal() => {
            // The clone that comes back gets the use-site span; the stored
            // binding keeps its own.
            let mut value = env.borrow().lookup(symbol.name(), &node.span)?;
            value.span = node.span.clone();
            Ok(value)
        }
        Sexpr::List(elements) | Sexpr::Selector(elements) if !elements.is_empty() => {
            let elements = elements.clone();
            evaluate_form(&node, elements, env)
        }
        // Reals, strings, booleans, procedures, literal symbols, and the
        // empty composites evaluate to themselves.
        _ => Ok(node),
    }
}

/// The names `evaluate` treats as special forms (REPL completion wants
/// these alongside the environment's identifiers).
pub fn special_form_identifiers() -> HashSet<String> {
    ["let", "const", "lambda", "defun", "while"]
        .iter()
        .map(|name| name.to_string())
        .collect()
}

/// Evaluates every top-level form of `input` against a fresh standard
/// environment, returning the last result (nil for empty input).
pub fn eval_str(input: &str) -> EvalResult {
    eval_str_in(input, Environment::standard())
}

/// Evaluates every top-level form of `input` in the caller's environment.
pub fn eval_str_in(input: &str, env: Rc<RefCell<Environment>>) -> EvalResult {
    let forms = parser::parse_program(input)?;
    let mut result = Expr::nil(Span::origin(Rc::from(input)));
    for form in forms {
        result = evaluate(form, env.clone())?;
    }
    Ok(result)
}

// `let`, `const`, `defun`, and the application calling context all skip the
// one throwaway frame that application evaluation introduces.
fn enclosing(env: &Rc<RefCell<Environment>>) -> Rc<RefCell<Environment>> {
    let outer = env.borrow().outer();
    outer.unwrap_or_else(|| env.clone())
}

fn evaluate_form(form: &Expr, elements: Vec<Expr>, env: Rc<RefCell<Environment>>) -> EvalResult {
    if let Sexpr::Symbol(head) = &elements[0].kind {
        match head.name() {
            "let" => return evaluate_let(form, &elements, env, true),
            "const" => return evaluate_let(form, &elements, env, false),
            "lambda" => return evaluate_function(form, &elements, env, false),
            "defun" => return evaluate_function(form, &elements, env, true),
            "while" => return evaluate_while(form, &elements, env),
            _ => {}
        }
    }
    evaluate_application(form, elements, env)
}

/// Application: every element — head and arguments — evaluates left to
/// right in one freshly created child frame. A Procedure head is invoked
/// with the caller's real scope; any other head just yields the evaluated
/// element list (which is what makes `while` bodies accumulate values).
fn evaluate_application(
    form: &Expr,
    elements: Vec<Expr>,
    env: Rc<RefCell<Environment>>,
) -> EvalResult {
    let frame = Environment::new_enclosed(env.clone());
    let mut evaluated = Vec::with_capacity(elements.len());
    for element in elements {
        evaluated.push(evaluate(element, frame.clone())?);
    }

    if let Sexpr::Procedure(procedure) = &evaluated[0].kind {
        let procedure = procedure.clone();
        let call_span = evaluated[0].span.clone();
        let args = evaluated.split_off(1);
        return procedure.call(args, enclosing(&env), &call_span);
    }
    Ok(Expr::list(evaluated, form.span.clone()))
}

/// `let` / `const`: validates the binding list, evaluates every initializer
/// in the *current* environment, then installs the bindings one level up
/// with the mutability flag set. Results in nil.
fn evaluate_let(
    form: &Expr,
    elements: &[Expr],
    env: Rc<RefCell<Environment>>,
    mutable: bool,
) -> EvalResult {
    let form_name = if mutable { "let" } else { "const" };

    let Some(binding_list) = elements.get(1) else {
        return Err(LispError::new(
            ErrorKind::ExpectedBindings(form_name.to_string()),
            form.span.clone(),
        ));
    };
    let items = match &binding_list.kind {
        Sexpr::List(items) | Sexpr::Selector(items) => items,
        _ => {
            let mut error = LispError::new(
                ErrorKind::ExpectedBindings(form_name.to_string()),
                binding_list.span.clone(),
            );
            // When the tail is all symbols, suggest the corrected shape.
            let names: Vec<&str> = elements[1..]
                .iter()
                .filter_map(|e| match &e.kind {
                    Sexpr::Symbol(symbol) => Some(symbol.name()),
                    _ => None,
                })
                .collect();
            if names.len() == elements.len() - 1 {
                error = error.with_suggestion(format!("({} ({}))", form_name, names.join(" ")));
            }
            return Err(error);
        }
    };

    // Validate and collect first; initializers only run once the whole
    // binding list is well-formed.
    let mut bindings: Vec<(Symbol, Option<Expr>, Span)> = Vec::with_capacity(items.len());
    for item in items {
        match &item.kind {
            Sexpr::Symbol(symbol) if symbol.is_literal() => {
                return Err(
                    LispError::new(ErrorKind::LiteralSymbolHere, item.span.clone())
                        .with_suggestion(symbol.name()),
                );
            }
            Sexpr::Symbol(symbol) => {
                bindings.push((symbol.clone(), None, item.span.clone()));
            }
            Sexpr::List(pair) | Sexpr::Selector(pair) if pair.len() == 2 => {
                let symbol = match &pair[0].kind {
                    Sexpr::Symbol(symbol) => symbol,
                    other => {
                        return Err(LispError::new(
                            ErrorKind::ExpectedPairSymbol(other.type_name()),
                            pair[0].span.clone(),
                        ));
                    }
                };
                if symbol.is_literal() {
                    return Err(LispError::new(
                        ErrorKind::LiteralSymbolPair(form_name.to_string()),
                        pair[0].span.clone(),
                    )
                    .with_suggestion(format!("({} {})", symbol.name(), pair[1])));
                }
                bindings.push((symbol.clone(), Some(pair[1].clone()), item.span.clone()));
            }
            Sexpr::List(pair) | Sexpr::Selector(pair) if pair.len() > 2 => {
                let span = pair[2].span.merge(&pair[pair.len() - 1].span);
                return Err(LispError::new(
                    ErrorKind::ExtraElements(form_name.to_string()),
                    span,
                ));
            }
            other => {
                return Err(LispError::new(
                    ErrorKind::ExpectedBindingElement(other.type_name()),
                    item.span.clone(),
                ));
            }
        }
    }

    let target = enclosing(&env);
    for (symbol, initializer, item_span) in bindings {
        let mut value = match initializer {
            Some(expr) => evaluate(expr, env.clone())?,
            None => Expr::nil(item_span),
        };
        value.set_mut(mutable);
        target.borrow_mut().bind(symbol.name(), value);
    }
    Ok(Expr::nil(form.span.clone()))
}

/// `lambda` / `defun`: validates the shape, builds a closure over the
/// definition-time environment (or a forwarding alias when the body is a
/// bare symbol already resolving to a Fn). `defun` installs the result one
/// level up under its name and yields nil; `lambda` yields the value.
fn evaluate_function(
    form: &Expr,
    elements: &[Expr],
    env: Rc<RefCell<Environment>>,
    defun: bool,
) -> EvalResult {
    let form_name = if defun { "defun" } else { "lambda" };
    let required = if defun { 4 } else { 3 };

    if elements.len() < required {
        let kind = if defun {
            ErrorKind::MissingDefunParts
        } else {
            ErrorKind::MissingLambdaParts
        };
        return Err(LispError::new(kind, form.span.clone()));
    }
    if elements.len() > required {
        let span = elements[required]
            .span
            .merge(&elements[elements.len() - 1].span);
        return Err(LispError::new(
            ErrorKind::ExtraElements(form_name.to_string()),
            span,
        ));
    }

    let (name, arg_list, body) = if defun {
        (Some(&elements[1]), &elements[2], &elements[3])
    } else {
        (None, &elements[1], &elements[2])
    };

    let name_symbol = match name {
        None => None,
        Some(expr) => match &expr.kind {
            Sexpr::Symbol(symbol) if symbol.is_literal() => {
                return Err(
                    LispError::new(ErrorKind::LiteralFunctionName, expr.span.clone())
                        .with_suggestion(format!("(lambda {} {})", arg_list, body)),
                );
            }
            Sexpr::Symbol(symbol) => {
                if env.borrow().contains(symbol.name()) {
                    return Err(LispError::new(ErrorKind::Redeclaration, expr.span.clone()));
                }
                Some(symbol.clone())
            }
            other => {
                return Err(LispError::new(
                    ErrorKind::ExpectedFunctionName(other.type_name()),
                    expr.span.clone(),
                ));
            }
        },
    };

    let params = validate_parameters(arg_list)?;
    let param_count = params.len();

    let procedure = match resolve_alias(body, &env) {
        Some(target) => Procedure::alias(target, param_count, form.clone()),
        None => Procedure::closure(params, body.clone(), env.clone(), form.clone()),
    };

    match name_symbol {
        Some(symbol) => {
            enclosing(&env)
                .borrow_mut()
                .bind(symbol.name(), Expr::procedure(procedure, form.span.clone()));
            Ok(Expr::nil(form.span.clone()))
        }
        None => Ok(Expr::procedure(procedure, form.span.clone())),
    }
}

fn validate_parameters(arg_list: &Expr) -> LispResult<Vec<Symbol>> {
    let items = match &arg_list.kind {
        Sexpr::List(items) | Sexpr::Selector(items) => items,
        other => {
            return Err(LispError::new(
                ErrorKind::ExpectedParameterList(other.type_name()),
                arg_list.span.clone(),
            ));
        }
    };

    let mut params: Vec<Symbol> = Vec::with_capacity(items.len());
    for item in items {
        let symbol = match &item.kind {
            Sexpr::Symbol(symbol) => symbol,
            other => {
                return Err(LispError::new(
                    ErrorKind::ExpectedParameterSymbol(other.type_name()),
                    item.span.clone(),
                ));
            }
        };
        if symbol.is_literal() {
            return Err(
                LispError::new(ErrorKind::LiteralParameter, item.span.clone())
                    .with_suggestion(symbol.name()),
            );
        }
        if params.contains(symbol) {
            return Err(LispError::new(
                ErrorKind::DuplicateParameter(symbol.name().to_string()),
                item.span.clone(),
            ));
        }
        params.push(symbol.clone());
    }
    Ok(params)
}

// A bare-symbol body that already resolves to a Fn makes the new function a
// forwarding alias. Unresolvable or non-Fn bodies become ordinary closures.
fn resolve_alias(body: &Expr, env: &Rc<RefCell<Environment>>) -> Option<Procedure> {
    let Sexpr::Symbol(symbol) = &body.kind else {
        return None;
    };
    if symbol.is_literal() {
        return None;
    }
    let value = env.borrow().lookup(symbol.name(), &body.span).ok()?;
    match value.kind {
        Sexpr::Procedure(procedure) => Some(procedure),
        _ => None,
    }
}

/// `while`: evaluates the condition in the current environment each round
/// (it must produce a Bool), runs the body as an implicit block sharing the
/// form's span, and accumulates one block result per iteration.
fn evaluate_while(form: &Expr, elements: &[Expr], env: Rc<RefCell<Environment>>) -> EvalResult {
    let Some(condition) = elements.get(1) else {
        return Err(LispError::new(
            ErrorKind::MissingCondition,
            elements[0].span.clone(),
        ));
    };

    let mut iterations = Vec::new();
    loop {
        let value = evaluate(condition.clone(), env.clone())?;
        match value.kind {
            Sexpr::Bool(false) => break,
            Sexpr::Bool(true) => {}
            other => {
                return Err(LispError::new(
                    ErrorKind::ExpectedBool(other.type_name()),
                    condition.span.clone(),
                ));
            }
        }
        let block = Expr::list(elements[2..].to_vec(), form.span.clone());
        iterations.push(evaluate(block, env.clone())?);
    }
    Ok(Expr::list(iterations, form.span.clone()))
}
