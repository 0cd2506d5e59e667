//! The runtime value model.
//!
//! [`Value`] is a closed tagged union: every datum the reader produces and
//! every result the evaluator computes is one of these variants. Heap values
//! (pairs, strings, closures, continuations, environments) are `Rc`-owned,
//! so cloning a `Value` is cheap and sharing is structural. There is no
//! cycle collection; the language has no mutation on pairs, so cycles cannot
//! be constructed.

use std::fmt;
use std::rc::Rc;

use num_bigint::BigInt;

use crate::builtins::Builtin;
use crate::cont::Continuation;
use crate::env::Env;
use crate::symbol::Symbol;
use crate::Error;

/// A Scheme value.
#[derive(Clone)]
pub enum Value {
    /// The empty list `()`
    Nil,
    Bool(bool),
    /// Fixnum; arithmetic promotes to `Big` instead of overflowing
    Int(i64),
    /// Arbitrary-precision integer; never holds a value that fits `Int`
    Big(BigInt),
    Real(f64),
    Str(Rc<str>),
    Symbol(Symbol),
    Pair(Rc<Pair>),
    Env(Env),
    Closure(Rc<Closure>),
    Builtin(&'static Builtin),
    Continuation(Rc<Continuation>),
    /// "No useful value": the result of `define`, `set!`, output builtins,
    /// and a false `if` with no alternative. The REPL suppresses it.
    Void,
    /// End of input, as returned by the `read` builtin at stream end
    Eof,
}

/// A cons cell. Lists are right-nested chains of these ending in `Nil`.
pub struct Pair {
    pub head: Value,
    pub tail: Value,
}

/// Lists can be as long as the heap allows, so dropping one must not walk
/// the chain on the host stack. Unlink children onto an explicit worklist;
/// each unwrapped cell drops with `Nil` fields and recurses no further.
impl Drop for Pair {
    fn drop(&mut self) {
        if !matches!(self.head, Value::Pair(_)) && !matches!(self.tail, Value::Pair(_)) {
            return;
        }
        let mut work = vec![
            std::mem::replace(&mut self.head, Value::Nil),
            std::mem::replace(&mut self.tail, Value::Nil),
        ];
        while let Some(value) = work.pop() {
            if let Value::Pair(p) = value {
                if let Ok(mut cell) = Rc::try_unwrap(p) {
                    work.push(std::mem::replace(&mut cell.head, Value::Nil));
                    work.push(std::mem::replace(&mut cell.tail, Value::Nil));
                }
            }
        }
    }
}

/// A user-defined function: parameter list, body sequence, and the captured
/// definition environment. The environment is shared, not copied, so later
/// `set!` and `define` in the enclosing scope stay visible.
pub struct Closure {
    pub params: Value,
    pub body: Value,
    pub env: Env,
}

/// Shorthand for allocating a cons cell.
pub fn cons(head: Value, tail: Value) -> Value {
    Value::Pair(Rc::new(Pair { head, tail }))
}

/// Build a proper list from the items, in order.
pub fn list<I>(items: I) -> Value
where
    I: IntoIterator<Item = Value>,
    I::IntoIter: DoubleEndedIterator,
{
    items
        .into_iter()
        .rev()
        .fold(Value::Nil, |tail, head| cons(head, tail))
}

/// Iterates a proper list, yielding an [`Error::ImproperList`] carrying the
/// offending tail if the chain ends in anything but `Nil`.
pub struct ListIter {
    cur: Value,
}

impl Iterator for ListIter {
    type Item = Result<Value, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        match std::mem::replace(&mut self.cur, Value::Nil) {
            Value::Nil => None,
            Value::Pair(p) => {
                self.cur = p.tail.clone();
                Some(Ok(p.head.clone()))
            }
            tail => Some(Err(Error::ImproperList(tail))),
        }
    }
}

impl Value {
    pub fn iter_list(&self) -> ListIter {
        ListIter { cur: self.clone() }
    }

    /// Length of a proper list; fails on an improper tail.
    pub fn list_len(&self) -> Result<usize, Error> {
        let mut n = 0;
        for item in self.iter_list() {
            item?;
            n += 1;
        }
        Ok(n)
    }

    /// Only `#f` is false; every other value (including `0` and `()`) is
    /// true in conditional position.
    pub fn is_false(&self) -> bool {
        matches!(self, Value::Bool(false))
    }

    /// Pointer/value identity, the `eq?` relation. Compound heap values
    /// compare by allocation identity; immediates and interned symbols
    /// compare by value. `NaN` is not `eq?` itself.
    pub fn eq_identity(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) | (Value::Void, Value::Void) | (Value::Eof, Value::Eof) => {
                true
            }
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Big(a), Value::Big(b)) => a == b,
            (Value::Real(a), Value::Real(b)) => a == b,
            (Value::Symbol(a), Value::Symbol(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => Rc::ptr_eq(a, b),
            (Value::Pair(a), Value::Pair(b)) => Rc::ptr_eq(a, b),
            (Value::Closure(a), Value::Closure(b)) => Rc::ptr_eq(a, b),
            (Value::Continuation(a), Value::Continuation(b)) => Rc::ptr_eq(a, b),
            (Value::Env(a), Value::Env(b)) => a.ptr_eq(b),
            (Value::Builtin(a), Value::Builtin(b)) => std::ptr::eq(*a, *b),
            _ => false,
        }
    }

    /// Render without string quoting, the `display` builtin's format.
    pub fn to_display_string(&self) -> String {
        Displayed(self).to_string()
    }
}

/// Structural equality, the `equal?` relation. Strings compare by content,
/// pairs recursively; closures, continuations and environments fall back to
/// identity since they have no meaningful structure to compare.
impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) | (Value::Void, Value::Void) | (Value::Eof, Value::Eof) => {
                true
            }
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Big(a), Value::Big(b)) => a == b,
            (Value::Real(a), Value::Real(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Symbol(a), Value::Symbol(b)) => a == b,
            // Pairs compare with an explicit worklist: spines and nested
            // heads can be arbitrarily long, the host stack cannot absorb
            // them. A (pair, non-pair) entry lands in the scalar arms below
            // without re-entering this branch.
            (Value::Pair(_), Value::Pair(_)) => {
                let mut work = vec![(self, other)];
                while let Some((a, b)) = work.pop() {
                    match (a, b) {
                        (Value::Pair(x), Value::Pair(y)) => {
                            if !Rc::ptr_eq(x, y) {
                                work.push((&x.tail, &y.tail));
                                work.push((&x.head, &y.head));
                            }
                        }
                        (a, b) => {
                            if a != b {
                                return false;
                            }
                        }
                    }
                }
                true
            }
            (Value::Closure(a), Value::Closure(b)) => Rc::ptr_eq(a, b),
            (Value::Continuation(a), Value::Continuation(b)) => Rc::ptr_eq(a, b),
            (Value::Env(a), Value::Env(b)) => a.ptr_eq(b),
            (Value::Builtin(a), Value::Builtin(b)) => std::ptr::eq(*a, *b),
            _ => false,
        }
    }
}

/// Printer worklist entries. Deep lists (spines and nested heads alike) are
/// rendered without host-stack recursion, so printing anything the evaluator
/// can build never overflows.
enum Print<'a> {
    Datum(&'a Value),
    /// The remainder of a list after its first element was printed
    Spine(&'a Value),
    Text(&'static str),
}

fn write_value(f: &mut fmt::Formatter, value: &Value, quoted: bool) -> fmt::Result {
    let mut work = vec![Print::Datum(value)];
    while let Some(item) = work.pop() {
        match item {
            Print::Text(s) => write!(f, "{s}")?,
            Print::Datum(Value::Pair(p)) => {
                write!(f, "(")?;
                work.push(Print::Spine(&p.tail));
                work.push(Print::Datum(&p.head));
            }
            Print::Datum(v) => write_atom(f, v, quoted)?,
            Print::Spine(Value::Nil) => write!(f, ")")?,
            Print::Spine(Value::Pair(p)) => {
                write!(f, " ")?;
                work.push(Print::Spine(&p.tail));
                work.push(Print::Datum(&p.head));
            }
            Print::Spine(tail) => {
                write!(f, " . ")?;
                work.push(Print::Text(")"));
                work.push(Print::Datum(tail));
            }
        }
    }
    Ok(())
}

fn write_atom(f: &mut fmt::Formatter, value: &Value, quoted: bool) -> fmt::Result {
    match value {
        Value::Nil => write!(f, "()"),
        Value::Bool(true) => write!(f, "#t"),
        Value::Bool(false) => write!(f, "#f"),
        Value::Int(n) => write!(f, "{n}"),
        Value::Big(n) => write!(f, "{n}"),
        Value::Real(x) => write!(f, "{x:?}"),
        Value::Str(s) if quoted => {
            write!(f, "\"")?;
            for c in s.chars() {
                match c {
                    '"' => write!(f, "\\\"")?,
                    '\\' => write!(f, "\\\\")?,
                    '\n' => write!(f, "\\n")?,
                    '\t' => write!(f, "\\t")?,
                    '\r' => write!(f, "\\r")?,
                    c => write!(f, "{c}")?,
                }
            }
            write!(f, "\"")
        }
        Value::Str(s) => write!(f, "{s}"),
        Value::Symbol(s) => write!(f, "{s}"),
        Value::Pair(_) => unreachable!("pairs are printed by the worklist"),
        Value::Env(_) => write!(f, "#<environment>"),
        Value::Closure(_) => write!(f, "#<closure>"),
        Value::Builtin(b) => write!(f, "#<builtin:{}>", b.name),
        Value::Continuation(_) => write!(f, "#<continuation>"),
        Value::Void => write!(f, "#<void>"),
        Value::Eof => write!(f, "#<eof>"),
    }
}

/// The `write` format: strings quoted and escaped.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write_value(f, self, true)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write_value(f, self, true)
    }
}

struct Displayed<'a>(&'a Value);

impl fmt::Display for Displayed<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write_value(f, self.0, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbol::intern;

    fn sym(name: &str) -> Value {
        Value::Symbol(intern(name))
    }

    #[test]
    fn test_list_builds_in_order() {
        let l = list([Value::Int(1), Value::Int(2), Value::Int(3)]);
        let items: Result<Vec<_>, _> = l.iter_list().collect();
        assert_eq!(items.unwrap(), vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
    }

    #[test]
    fn test_improper_list_iteration_carries_the_tail() {
        let l = cons(Value::Int(1), Value::Int(2));
        let items: Vec<_> = l.iter_list().collect();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0], Ok(Value::Int(1)));
        assert_eq!(items[1], Err(Error::ImproperList(Value::Int(2))));
        assert_eq!(l.list_len(), Err(Error::ImproperList(Value::Int(2))));
    }

    #[test]
    fn test_display_formats() {
        let tests = vec![
            (Value::Nil, "()"),
            (Value::Bool(true), "#t"),
            (Value::Bool(false), "#f"),
            (Value::Int(-42), "-42"),
            (Value::Real(3.5), "3.5"),
            (Value::Real(1.0), "1.0"),
            (Value::Str(Rc::from("a \"b\"")), "\"a \\\"b\\\"\""),
            (sym("foo"), "foo"),
            (list([Value::Int(1), Value::Int(2)]), "(1 2)"),
            (Value::Void, "#<void>"),
            (Value::Eof, "#<eof>"),
        ];
        for (value, expected) in tests {
            assert_eq!(value.to_string(), expected);
        }
    }

    #[test]
    fn test_dotted_pair_display() {
        // (cons 'a (cons 'b 'c)) prints as (a b . c)
        let v = cons(sym("a"), cons(sym("b"), sym("c")));
        assert_eq!(v.to_string(), "(a b . c)");
    }

    #[test]
    fn test_display_string_is_unquoted() {
        let v = Value::Str(Rc::from("hi\n"));
        assert_eq!(v.to_display_string(), "hi\n");
        assert_eq!(v.to_string(), "\"hi\\n\"");
        let l = list([Value::Str(Rc::from("x")), Value::Int(1)]);
        assert_eq!(l.to_display_string(), "(x 1)");
    }

    #[test]
    fn test_eq_identity_on_symbols_and_strings() {
        // interned symbols with the same spelling are identical
        assert!(sym("a").eq_identity(&sym("a")));
        // separately allocated equal strings are not
        let s1 = Value::Str(Rc::from("a"));
        let s2 = Value::Str(Rc::from("a"));
        assert!(!s1.eq_identity(&s2));
        assert!(s1.eq_identity(&s1.clone()));
        // but they are equal? to each other
        assert_eq!(s1, s2);
    }

    #[test]
    fn test_eq_identity_on_pairs() {
        let p1 = list([Value::Int(1)]);
        let p2 = list([Value::Int(1)]);
        assert!(!p1.eq_identity(&p2));
        assert!(p1.eq_identity(&p1.clone()));
        assert_eq!(p1, p2);
    }

    #[test]
    fn test_eq_identity_on_environments() {
        use crate::env::Env;
        let env = Env::marker(None);
        let a = Value::Env(env.clone());
        let b = Value::Env(env);
        let other = Value::Env(Env::marker(None));
        assert!(a.eq_identity(&b));
        assert!(!a.eq_identity(&other));
        assert_eq!(a.to_string(), "#<environment>");
    }

    fn int_list(n: i64) -> Value {
        let mut acc = Value::Nil;
        for i in (0..n).rev() {
            acc = cons(Value::Int(i), acc);
        }
        acc
    }

    #[test]
    fn test_million_element_list_drops_without_overflow() {
        let l = int_list(1_000_000);
        assert_eq!(l.iter_list().next(), Some(Ok(Value::Int(0))));
        drop(l);
    }

    #[test]
    fn test_deeply_nested_heads_drop_without_overflow() {
        // left-nesting: each cell is the head of the next, not the tail
        let mut v = Value::Nil;
        for _ in 0..1_000_000 {
            v = cons(v, Value::Nil);
        }
        drop(v);
    }

    #[test]
    fn test_equal_walks_long_spines_without_overflow() {
        let a = int_list(1_000_000);
        let b = int_list(1_000_000);
        assert_eq!(a, b);
        assert_ne!(cons(Value::Int(-1), a.clone()), cons(Value::Int(0), b.clone()));
        // shared structure short-circuits on identity
        assert_eq!(a, a.clone());
    }

    #[test]
    fn test_display_walks_long_spines_without_overflow() {
        let l = int_list(100_000);
        let text = l.to_string();
        assert!(text.starts_with("(0 1 2"));
        assert!(text.ends_with("99999)"));
    }

    #[test]
    fn test_nan_is_not_eq_itself() {
        let nan = Value::Real(f64::NAN);
        assert!(!nan.eq_identity(&nan.clone()));
    }

    #[test]
    fn test_only_false_is_false() {
        assert!(Value::Bool(false).is_false());
        assert!(!Value::Bool(true).is_false());
        assert!(!Value::Int(0).is_false());
        assert!(!Value::Nil.is_false());
        assert!(!Value::Void.is_false());
    }
}
