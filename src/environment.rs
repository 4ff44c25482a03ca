use crate::error::{ErrorKind, LispError, LispResult};
use crate::source::Span;
use crate::types::Expr;
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

/// One frame of the lexical scope chain.
///
/// Frames are shared (`Rc<RefCell<…>>`) because closures capture their
/// definition environment and `set` mutates the caller's frame; a child has
/// read access to its whole ancestor chain and write access to itself.
#[derive(Debug)]
pub struct Environment {
    outer: Option<Rc<RefCell<Environment>>>,
    bindings: HashMap<String, Expr>,
}

impl Environment {
    /// Creates a new, empty root environment.
    pub fn new() -> Rc<RefCell<Self>> {
        Rc::new(RefCell::new(Environment {
            outer: None,
            bindings: HashMap::new(),
        }))
    }

    /// The standard environment: a fresh root frame seeded with the builtin
    /// constants and procedures.
    pub fn standard() -> Rc<RefCell<Self>> {
        let env = Environment::new();
        crate::primitives::install(&env);
        env
    }

    /// Creates a new environment enclosed within an outer one.
    pub fn new_enclosed(outer: Rc<RefCell<Environment>>) -> Rc<RefCell<Self>> {
        Rc::new(RefCell::new(Environment {
            outer: Some(outer),
            bindings: HashMap::new(),
        }))
    }

    pub fn outer(&self) -> Option<Rc<RefCell<Environment>>> {
        self.outer.clone()
    }

    /// Inserts or overwrites a binding in this frame only.
    pub fn bind(&mut self, name: impl Into<String>, value: Expr) {
        self.bindings.insert(name.into(), value);
    }

    /// Resolves `name` through the chain, returning a clone of the bound
    /// value. `use_span` is where the symbol was referenced, cited when the
    /// lookup fails.
    pub fn lookup(&self, name: &str, use_span: &Span) -> LispResult<Expr> {
        if let Some(value) = self.bindings.get(name) {
            return Ok(value.clone());
        }
        match &self.outer {
            Some(outer) => outer.borrow().lookup(name, use_span),
            None => Err(LispError::new(
                ErrorKind::NotInScope(name.to_string()),
                use_span.clone(),
            )),
        }
    }

    /// Overwrites the binding in the first frame of the chain that defines
    /// `name`. Fails if no frame does, or if the bound value is immutable.
    pub fn assign(&mut self, name: &str, value: Expr, span: &Span) -> LispResult<()> {
        if let Some(existing) = self.bindings.get_mut(name) {
            if !existing.is_mut() {
                return Err(LispError::new(
                    ErrorKind::ImmutableBinding(name.to_string()),
                    span.clone(),
                ));
            }
            *existing = value;
            return Ok(());
        }
        match &self.outer {
            Some(outer) => outer.borrow_mut().assign(name, value, span),
            None => Err(LispError::new(
                ErrorKind::NotInScope(name.to_string()),
                span.clone(),
            )),
        }
    }

    /// Mirrors `lookup` without raising.
    pub fn contains(&self, name: &str) -> bool {
        if self.bindings.contains_key(name) {
            return true;
        }
        match &self.outer {
            Some(outer) => outer.borrow().contains(name),
            None => false,
        }
    }

    /// Every identifier visible from this frame (REPL completion).
    pub fn get_identifiers(&self) -> HashSet<String> {
        let mut identifiers: HashSet<String> =
            self.bindings.keys().map(|k| k.to_string()).collect();
        if let Some(outer) = &self.outer {
            identifiers.extend(outer.borrow().get_identifiers());
        }
        identifiers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCategory;

    fn num(n: f64) -> Expr {
        Expr::real(n, Span::default())
    }

    #[test]
    fn test_bind_and_lookup() {
        let env = Environment::new();
        env.borrow_mut().bind("x", num(10.0));

        let result = env.borrow().lookup("x", &Span::default());
        assert_eq!(result.unwrap(), num(10.0));
    }

    #[test]
    fn test_lookup_unbound() {
        let env = Environment::new();
        let e = env.borrow().lookup("y", &Span::default()).unwrap_err();
        assert_eq!(e.kind, ErrorKind::NotInScope("y".to_string()));
        assert_eq!(e.category(), ErrorCategory::Scope);
    }

    #[test]
    fn test_lookup_walks_the_chain() {
        let global = Environment::new();
        global.borrow_mut().bind("x", num(10.0));

        let local = Environment::new_enclosed(global.clone());
        local.borrow_mut().bind("y", num(20.0));

        assert_eq!(local.borrow().lookup("y", &Span::default()).unwrap(), num(20.0));
        assert_eq!(local.borrow().lookup("x", &Span::default()).unwrap(), num(10.0));
        // The chain only goes one way
        assert!(global.borrow().lookup("y", &Span::default()).is_err());
    }

    #[test]
    fn test_shadowing() {
        let global = Environment::new();
        global.borrow_mut().bind("x", num(10.0));

        let local = Environment::new_enclosed(global.clone());
        local.borrow_mut().bind("x", num(50.0));

        assert_eq!(local.borrow().lookup("x", &Span::default()).unwrap(), num(50.0));
        assert_eq!(global.borrow().lookup("x", &Span::default()).unwrap(), num(10.0));
    }

    #[test]
    fn test_assign_local() {
        let env = Environment::new();
        env.borrow_mut().bind("x", num(1.0));

        env.borrow_mut()
            .assign("x", num(2.0), &Span::default())
            .unwrap();
        assert_eq!(env.borrow().lookup("x", &Span::default()).unwrap(), num(2.0));
    }

    #[test]
    fn test_assign_delegates_to_outer() {
        let global = Environment::new();
        global.borrow_mut().bind("x", num(1.0));
        let local = Environment::new_enclosed(global.clone());

        // A successful delegated write is not an error
        local
            .borrow_mut()
            .assign("x", num(2.0), &Span::default())
            .unwrap();
        assert_eq!(global.borrow().lookup("x", &Span::default()).unwrap(), num(2.0));
        // and the local frame stays empty
        assert!(!local.borrow().bindings.contains_key("x"));
    }

    #[test]
    fn test_assign_unbound() {
        let global = Environment::new();
        let local = Environment::new_enclosed(global);
        let e = local
            .borrow_mut()
            .assign("ghost", num(1.0), &Span::default())
            .unwrap_err();
        assert_eq!(e.kind, ErrorKind::NotInScope("ghost".to_string()));
    }

    #[test]
    fn test_assign_rejects_immutable_binding() {
        let env = Environment::new();
        let mut constant = num(3.14);
        constant.set_mut(false);
        env.borrow_mut().bind("almost-pi", constant);

        let e = env
            .borrow_mut()
            .assign("almost-pi", num(3.0), &Span::default())
            .unwrap_err();
        assert_eq!(e.kind, ErrorKind::ImmutableBinding("almost-pi".to_string()));
        assert_eq!(e.category(), ErrorCategory::Scope);
    }

    #[test]
    fn test_contains() {
        let global = Environment::new();
        global.borrow_mut().bind("x", num(1.0));
        let local = Environment::new_enclosed(global);

        assert!(local.borrow().contains("x"));
        assert!(!local.borrow().contains("y"));
    }

    #[test]
    fn test_get_identifiers_spans_the_chain() {
        let global = Environment::new();
        global.borrow_mut().bind("x", num(1.0));
        let local = Environment::new_enclosed(global);
        local.borrow_mut().bind("y", num(2.0));

        let identifiers = local.borrow().get_identifiers();
        assert!(identifiers.contains("x"));
        assert!(identifiers.contains("y"));
    }
}
