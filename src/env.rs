//! Environments as singly-linked binding frames.
//!
//! An [`Env`] points at one frame of a shared, `Rc`-linked chain. Each frame
//! either holds exactly one binding or is a *marker* - an empty slot that
//! records where a lexical scope begins. Calling a closure pushes a marker
//! and then one binding frame per parameter; `define` splices a new binding
//! in just past the nearest marker, so every holder of the chain below that
//! marker (including closures captured earlier) observes the new name. That
//! splice is what makes top-level recursive definitions work.
//!
//! Binding cells are `RefCell`s so `set!` mutates in place, visible through
//! every sharing closure.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::symbol::Symbol;
use crate::value::Value;
use crate::Error;

#[derive(Clone)]
pub struct Env(Rc<Frame>);

struct Frame {
    /// `None` marks a scope boundary
    binding: Option<(Symbol, RefCell<Value>)>,
    /// `RefCell` so `define` can splice below an existing marker
    parent: RefCell<Option<Env>>,
}

impl Env {
    /// A scope-boundary frame over `parent`.
    pub fn marker(parent: Option<Env>) -> Env {
        Env(Rc::new(Frame {
            binding: None,
            parent: RefCell::new(parent),
        }))
    }

    /// A single-binding frame over `parent`.
    pub fn binding(sym: Symbol, value: Value, parent: Option<Env>) -> Env {
        Env(Rc::new(Frame {
            binding: Some((sym, RefCell::new(value))),
            parent: RefCell::new(parent),
        }))
    }

    pub fn ptr_eq(&self, other: &Env) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    fn parent(&self) -> Option<Env> {
        self.0.parent.borrow().clone()
    }

    /// Walk toward the root for the innermost binding of `sym`, skipping
    /// markers. Returns the frame itself so `set!` can mutate it later.
    pub fn lookup(&self, sym: Symbol) -> Result<Env, Error> {
        let mut cur = self.clone();
        loop {
            if let Some((bound, _)) = &cur.0.binding {
                if *bound == sym {
                    return Ok(cur);
                }
            }
            match cur.parent() {
                Some(p) => cur = p,
                None => return Err(Error::UnboundVariable(sym.name())),
            }
        }
    }

    /// The value of the innermost binding of `sym`.
    pub fn get(&self, sym: Symbol) -> Result<Value, Error> {
        let frame = self.lookup(sym)?;
        match &frame.0.binding {
            Some((_, cell)) => Ok(cell.borrow().clone()),
            None => Ok(Value::Void),
        }
    }

    /// Overwrite the binding held by this frame (a `lookup` result).
    pub fn set_value(&self, value: Value) {
        if let Some((_, cell)) = &self.0.binding {
            *cell.borrow_mut() = value;
        }
    }

    /// Bind `sym` at the nearest enclosing scope boundary: walk to the
    /// nearest marker and splice a new binding frame between the marker and
    /// its parent. Chains that already passed the marker see the binding too.
    pub fn define(&self, sym: Symbol, value: Value) -> Result<(), Error> {
        let mut cur = self.clone();
        loop {
            if cur.0.binding.is_none() {
                let below = cur.parent();
                let frame = Env::binding(sym, value, below);
                *cur.0.parent.borrow_mut() = Some(frame);
                return Ok(());
            }
            match cur.parent() {
                Some(p) => cur = p,
                None => {
                    return Err(Error::MalformedForm(
                        "define outside any scope boundary".to_string(),
                    ))
                }
            }
        }
    }

    /// A fresh callee scope: a marker over this environment, then one
    /// binding per parameter, by simultaneous descent over both lists.
    pub fn extend(&self, params: &Value, args: &Value) -> Result<Env, Error> {
        let scope = Env::marker(Some(self.clone()));
        bind_params(scope, params, args)
    }

    /// Every bound symbol reachable from this frame, innermost (most
    /// recently defined) first, markers excluded.
    pub fn bound_names(&self) -> Vec<Symbol> {
        let mut names = Vec::new();
        let mut cur = self.clone();
        loop {
            if let Some((sym, _)) = &cur.0.binding {
                names.push(*sym);
            }
            match cur.parent() {
                Some(p) => cur = p,
                None => return names,
            }
        }
    }
}

fn bind_params(scope: Env, params: &Value, args: &Value) -> Result<Env, Error> {
    match (params, args) {
        (Value::Nil, Value::Nil) => Ok(scope),
        (Value::Nil, _) => Err(Error::TooManyArgs),
        (Value::Pair(_), Value::Nil) => Err(Error::TooFewArgs),
        (Value::Pair(p), Value::Pair(a)) => {
            let Value::Symbol(sym) = &p.head else {
                return Err(Error::MalformedForm(format!(
                    "parameter {} is not a symbol",
                    p.head
                )));
            };
            let scope = Env::binding(*sym, a.head.clone(), Some(scope));
            bind_params(scope, &p.tail, &a.tail)
        }
        (p, _) => Err(Error::ImproperList(p.clone())),
    }
}

impl fmt::Debug for Env {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "#<environment>")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbol::intern;
    use crate::value::list;

    fn scope_with(bindings: &[(&str, i64)]) -> Env {
        let mut chain: Option<Env> = None;
        for (name, n) in bindings {
            chain = Some(Env::binding(intern(name), Value::Int(*n), chain));
        }
        Env::marker(chain)
    }

    #[test]
    fn test_lookup_finds_innermost() {
        let env = scope_with(&[("x", 1), ("y", 2), ("x", 3)]);
        assert_eq!(env.get(intern("x")).unwrap(), Value::Int(3));
        assert_eq!(env.get(intern("y")).unwrap(), Value::Int(2));
    }

    #[test]
    fn test_unbound_lookup_fails() {
        let env = scope_with(&[("x", 1)]);
        assert_eq!(
            env.get(intern("zap")),
            Err(Error::UnboundVariable("zap".to_string()))
        );
    }

    #[test]
    fn test_set_is_visible_through_sharers() {
        let env = scope_with(&[("x", 1)]);
        let inner = Env::marker(Some(env.clone()));
        inner.lookup(intern("x")).unwrap().set_value(Value::Int(9));
        assert_eq!(env.get(intern("x")).unwrap(), Value::Int(9));
    }

    #[test]
    fn test_define_splices_past_the_marker() {
        let global = scope_with(&[("x", 1)]);
        // a closure captured the global chain before f existed
        let captured = global.clone();
        global.define(intern("f"), Value::Int(7)).unwrap();
        // the sharer sees the new binding: this is what makes top-level
        // recursion work
        assert_eq!(captured.get(intern("f")).unwrap(), Value::Int(7));
    }

    #[test]
    fn test_define_from_inside_a_call_scope_stays_local() {
        let global = scope_with(&[]);
        let callee = global
            .extend(
                &list([Value::Symbol(intern("a"))]),
                &list([Value::Int(1)]),
            )
            .unwrap();
        callee.define(intern("local"), Value::Int(5)).unwrap();
        assert_eq!(callee.get(intern("local")).unwrap(), Value::Int(5));
        assert!(global.get(intern("local")).is_err());
    }

    #[test]
    fn test_extend_binds_pairwise() {
        let global = scope_with(&[]);
        let params = list([Value::Symbol(intern("a")), Value::Symbol(intern("b"))]);
        let callee = global
            .extend(&params, &list([Value::Int(1), Value::Int(2)]))
            .unwrap();
        assert_eq!(callee.get(intern("a")).unwrap(), Value::Int(1));
        assert_eq!(callee.get(intern("b")).unwrap(), Value::Int(2));
    }

    #[test]
    fn test_extend_arity_mismatches() {
        let global = scope_with(&[]);
        let params = list([Value::Symbol(intern("a")), Value::Symbol(intern("b"))]);
        assert_eq!(
            global.extend(&params, &list([Value::Int(1)])).err(),
            Some(Error::TooFewArgs)
        );
        assert_eq!(
            global
                .extend(&params, &list([Value::Int(1), Value::Int(2), Value::Int(3)]))
                .err(),
            Some(Error::TooManyArgs)
        );
    }

    #[test]
    fn test_bound_names_most_recent_first() {
        let env = scope_with(&[("a", 1), ("b", 2)]);
        env.define(intern("c"), Value::Int(3)).unwrap();
        let names: Vec<String> = env.bound_names().iter().map(|s| s.name()).collect();
        assert_eq!(names, vec!["c", "b", "a"]);
    }
}
