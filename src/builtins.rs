//! Built-in procedures and the global environment.
//!
//! Builtins live in a single static registry table. Each entry declares its
//! name, an [`Arity`] contract checked *before* the native function runs, and
//! a [`BuiltinKind`]: either a plain native function over the evaluated
//! argument list, or one of the two meta markers (`apply`, `call/cc`) whose
//! behavior needs the evaluator's control stack and therefore cannot be a
//! plain function. The evaluator dispatches on the kind.

use std::cell::{OnceCell, RefCell};
use std::fmt;
use std::io::{BufRead, Write};
use std::sync::LazyLock;

use crate::env::Env;
use crate::number;
use crate::reader::Reader;
use crate::symbol::intern;
use crate::value::{self, Value};
use crate::{Error, ReadErrorKind};

/// How many arguments a builtin accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exact(usize),
    AtLeast(usize),
    Range(usize, usize),
    /// Variadic sentinel: no count check at all, the native function
    /// receives the full evaluated argument list
    Any,
}

impl Arity {
    pub fn validate(&self, name: &str, got: usize) -> Result<(), Error> {
        let ok = match self {
            Arity::Exact(n) => got == *n,
            Arity::AtLeast(n) => got >= *n,
            Arity::Range(lo, hi) => (*lo..=*hi).contains(&got),
            Arity::Any => true,
        };
        if ok {
            Ok(())
        } else {
            Err(Error::ArityMismatch {
                name: name.to_string(),
                expected: self.to_string(),
                got,
            })
        }
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Arity::Exact(n) => write!(f, "exactly {n}"),
            Arity::AtLeast(n) => write!(f, "at least {n}"),
            Arity::Range(lo, hi) => write!(f, "between {lo} and {hi}"),
            Arity::Any => write!(f, "any number of"),
        }
    }
}

/// What a builtin does when applied.
pub enum BuiltinKind {
    /// Runs over the evaluated argument list, no access to control state
    Native(fn(&Value) -> Result<Value, Error>),
    /// `apply`: re-dispatch application with an explicit argument list
    Apply,
    /// `call/cc`: capture the control stack and call the target with it
    CallCc,
}

impl fmt::Debug for BuiltinKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            BuiltinKind::Native(_) => write!(f, "Native(..)"),
            BuiltinKind::Apply => write!(f, "Apply"),
            BuiltinKind::CallCc => write!(f, "CallCc"),
        }
    }
}

/// A builtin registry entry.
#[derive(Debug)]
pub struct Builtin {
    pub name: &'static str,
    pub arity: Arity,
    pub kind: BuiltinKind,
}

static BUILTINS: LazyLock<Vec<Builtin>> = LazyLock::new(|| {
    use Arity::*;
    use BuiltinKind::*;
    vec![
        Builtin { name: "+", arity: Any, kind: Native(builtin_add) },
        Builtin { name: "-", arity: AtLeast(1), kind: Native(builtin_sub) },
        Builtin { name: "*", arity: AtLeast(1), kind: Native(builtin_mul) },
        Builtin { name: "=", arity: AtLeast(2), kind: Native(builtin_num_eq) },
        Builtin { name: "<", arity: AtLeast(2), kind: Native(builtin_lt) },
        Builtin { name: ">", arity: AtLeast(2), kind: Native(builtin_gt) },
        Builtin { name: "<=", arity: AtLeast(2), kind: Native(builtin_le) },
        Builtin { name: ">=", arity: AtLeast(2), kind: Native(builtin_ge) },
        Builtin { name: "car", arity: Exact(1), kind: Native(builtin_car) },
        Builtin { name: "cdr", arity: Exact(1), kind: Native(builtin_cdr) },
        Builtin { name: "cons", arity: Exact(2), kind: Native(builtin_cons) },
        Builtin { name: "list", arity: Any, kind: Native(builtin_list) },
        Builtin { name: "null?", arity: Exact(1), kind: Native(builtin_is_null) },
        Builtin { name: "pair?", arity: Exact(1), kind: Native(builtin_is_pair) },
        Builtin { name: "not", arity: Exact(1), kind: Native(builtin_not) },
        Builtin { name: "eq?", arity: Exact(2), kind: Native(builtin_eq) },
        Builtin { name: "equal?", arity: Exact(2), kind: Native(builtin_equal) },
        Builtin { name: "display", arity: Exact(1), kind: Native(builtin_display) },
        Builtin { name: "write", arity: Exact(1), kind: Native(builtin_write) },
        Builtin { name: "newline", arity: Exact(0), kind: Native(builtin_newline) },
        Builtin { name: "read", arity: Exact(0), kind: Native(builtin_read) },
        Builtin { name: "error", arity: Range(1, 2), kind: Native(builtin_error) },
        Builtin { name: "globals", arity: Exact(0), kind: Native(builtin_globals) },
        Builtin { name: "apply", arity: Exact(2), kind: Apply },
        Builtin { name: "call/cc", arity: Exact(1), kind: CallCc },
    ]
});

/// All registered builtins, in registration order.
pub fn registry() -> &'static [Builtin] {
    BUILTINS.as_slice()
}

pub fn find(name: &str) -> Option<&'static Builtin> {
    registry().iter().find(|b| b.name == name)
}

thread_local! {
    static GLOBALS: OnceCell<Env> = const { OnceCell::new() };
}

/// The global environment singleton: a marker-headed chain over every
/// builtin binding, created on first use. Values are `Rc`-owned and
/// thread-confined, so the singleton is per thread.
pub fn global_env() -> Env {
    GLOBALS.with(|cell| cell.get_or_init(build_global_env).clone())
}

fn build_global_env() -> Env {
    let mut chain: Option<Env> = None;
    for b in registry() {
        chain = Some(Env::binding(intern(b.name), Value::Builtin(b), chain));
    }
    if let Some(callcc) = find("call/cc") {
        chain = Some(Env::binding(
            intern("call-with-current-continuation"),
            Value::Builtin(callcc),
            chain,
        ));
    }
    Env::marker(chain)
}

// --- argument plumbing -----------------------------------------------------
//
// Arity is validated before a native runs, so these extractors only fail on
// lists the arity check could not have admitted.

pub(crate) fn one(name: &str, args: &Value) -> Result<Value, Error> {
    match args {
        Value::Pair(p) if matches!(p.tail, Value::Nil) => Ok(p.head.clone()),
        _ => Err(Error::ArityMismatch {
            name: name.to_string(),
            expected: Arity::Exact(1).to_string(),
            got: args.list_len().unwrap_or(0),
        }),
    }
}

pub(crate) fn two(name: &str, args: &Value) -> Result<(Value, Value), Error> {
    if let Value::Pair(p) = args {
        if let Value::Pair(q) = &p.tail {
            if matches!(q.tail, Value::Nil) {
                return Ok((p.head.clone(), q.head.clone()));
            }
        }
    }
    Err(Error::ArityMismatch {
        name: name.to_string(),
        expected: Arity::Exact(2).to_string(),
        got: args.list_len().unwrap_or(0),
    })
}

// --- arithmetic and comparison ---------------------------------------------

fn builtin_add(args: &Value) -> Result<Value, Error> {
    let mut acc = Value::Int(0);
    for arg in args.iter_list() {
        acc = number::add(&acc, &arg?)?;
    }
    Ok(acc)
}

fn builtin_sub(args: &Value) -> Result<Value, Error> {
    let mut iter = args.iter_list();
    let first = match iter.next() {
        Some(v) => v?,
        None => return Err(Error::Type("- requires an operand".to_string())),
    };
    let mut rest = iter.peekable();
    if rest.peek().is_none() {
        return number::sub(&Value::Int(0), &first);
    }
    let mut acc = first;
    for arg in rest {
        acc = number::sub(&acc, &arg?)?;
    }
    Ok(acc)
}

fn builtin_mul(args: &Value) -> Result<Value, Error> {
    let mut acc = Value::Int(1);
    for arg in args.iter_list() {
        acc = number::mul(&acc, &arg?)?;
    }
    Ok(acc)
}

/// Chained comparison: every adjacent pair must satisfy `accept`.
fn chain_compare(
    args: &Value,
    accept: fn(std::cmp::Ordering) -> bool,
) -> Result<Value, Error> {
    let mut iter = args.iter_list();
    let mut prev = match iter.next() {
        Some(v) => v?,
        None => return Ok(Value::Bool(true)),
    };
    for arg in iter {
        let cur = arg?;
        if !accept(number::compare(&prev, &cur)?) {
            return Ok(Value::Bool(false));
        }
        prev = cur;
    }
    Ok(Value::Bool(true))
}

fn builtin_num_eq(args: &Value) -> Result<Value, Error> {
    chain_compare(args, |o| o.is_eq())
}

fn builtin_lt(args: &Value) -> Result<Value, Error> {
    chain_compare(args, |o| o.is_lt())
}

fn builtin_gt(args: &Value) -> Result<Value, Error> {
    chain_compare(args, |o| o.is_gt())
}

fn builtin_le(args: &Value) -> Result<Value, Error> {
    chain_compare(args, |o| o.is_le())
}

fn builtin_ge(args: &Value) -> Result<Value, Error> {
    chain_compare(args, |o| o.is_ge())
}

// --- pairs and predicates ---------------------------------------------------

fn builtin_car(args: &Value) -> Result<Value, Error> {
    match one("car", args)? {
        Value::Pair(p) => Ok(p.head.clone()),
        other => Err(Error::Type(format!("car requires a pair, got {other}"))),
    }
}

fn builtin_cdr(args: &Value) -> Result<Value, Error> {
    match one("cdr", args)? {
        Value::Pair(p) => Ok(p.tail.clone()),
        other => Err(Error::Type(format!("cdr requires a pair, got {other}"))),
    }
}

fn builtin_cons(args: &Value) -> Result<Value, Error> {
    let (head, tail) = two("cons", args)?;
    Ok(value::cons(head, tail))
}

fn builtin_list(args: &Value) -> Result<Value, Error> {
    // the evaluated argument list already is the answer
    Ok(args.clone())
}

fn builtin_is_null(args: &Value) -> Result<Value, Error> {
    Ok(Value::Bool(matches!(one("null?", args)?, Value::Nil)))
}

fn builtin_is_pair(args: &Value) -> Result<Value, Error> {
    Ok(Value::Bool(matches!(one("pair?", args)?, Value::Pair(_))))
}

fn builtin_not(args: &Value) -> Result<Value, Error> {
    Ok(Value::Bool(one("not", args)?.is_false()))
}

fn builtin_eq(args: &Value) -> Result<Value, Error> {
    let (a, b) = two("eq?", args)?;
    Ok(Value::Bool(a.eq_identity(&b)))
}

fn builtin_equal(args: &Value) -> Result<Value, Error> {
    let (a, b) = two("equal?", args)?;
    Ok(Value::Bool(a == b))
}

// --- I/O ---------------------------------------------------------------------

/// Output failures (broken pipe included) become user errors: they abort the
/// current top-level form, never the process.
fn write_stdout(text: &str) -> Result<Value, Error> {
    let mut out = std::io::stdout().lock();
    out.write_all(text.as_bytes())
        .and_then(|()| out.flush())
        .map_err(|e| Error::User(format!("write failed: {e}")))?;
    Ok(Value::Void)
}

fn builtin_display(args: &Value) -> Result<Value, Error> {
    write_stdout(&one("display", args)?.to_display_string())
}

fn builtin_write(args: &Value) -> Result<Value, Error> {
    write_stdout(&one("write", args)?.to_string())
}

fn builtin_newline(_args: &Value) -> Result<Value, Error> {
    write_stdout("\n")
}

thread_local! {
    /// Shared between `read` calls so that several datums on one input line
    /// are handed out one per call instead of being discarded.
    static STDIN_READER: RefCell<Reader> = RefCell::new(Reader::new());
}

/// Block on the input until one complete datum arrives; end of stream is the
/// EOF singleton, not an error. A hard syntax error discards the buffered
/// text, otherwise every later `read` would trip over the same garbage.
fn read_datum(reader: &mut Reader, input: &mut dyn BufRead) -> Result<Value, Error> {
    loop {
        match reader.next_datum() {
            Ok(Some(datum)) => return Ok(datum),
            Ok(None) => {}
            Err(e) if e.kind == ReadErrorKind::Incomplete => {}
            Err(e) => {
                reader.clear();
                return Err(Error::Read(e));
            }
        }
        let mut line = String::new();
        match input.read_line(&mut line) {
            Ok(0) => return Ok(Value::Eof),
            Ok(_) => reader.push(&line),
            Err(e) => return Err(Error::User(format!("read failed: {e}"))),
        }
    }
}

fn builtin_read(_args: &Value) -> Result<Value, Error> {
    STDIN_READER.with(|r| read_datum(&mut r.borrow_mut(), &mut std::io::stdin().lock()))
}

// --- diagnostics ---------------------------------------------------------------

fn builtin_error(args: &Value) -> Result<Value, Error> {
    let mut iter = args.iter_list();
    let reason = match iter.next() {
        Some(v) => v?.to_display_string(),
        None => String::new(),
    };
    match iter.next() {
        Some(irritant) => Err(Error::User(format!(
            "{reason}: {}",
            irritant?.to_display_string()
        ))),
        None => Err(Error::User(reason)),
    }
}

fn builtin_globals(_args: &Value) -> Result<Value, Error> {
    let names = global_env().bound_names();
    Ok(value::list(names.into_iter().map(Value::Symbol)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::list;

    #[test]
    fn test_arity_validate() {
        assert!(Arity::Exact(2).validate("f", 2).is_ok());
        assert!(Arity::Exact(2).validate("f", 1).is_err());
        assert!(Arity::Exact(2).validate("f", 3).is_err());
        assert!(Arity::AtLeast(1).validate("f", 1).is_ok());
        assert!(Arity::AtLeast(1).validate("f", 0).is_err());
        assert!(Arity::Range(1, 2).validate("f", 2).is_ok());
        assert!(Arity::Range(1, 2).validate("f", 0).is_err());
        assert!(Arity::Range(1, 2).validate("f", 3).is_err());
        assert!(Arity::Any.validate("f", 0).is_ok());
        assert!(Arity::Any.validate("f", 99).is_ok());
    }

    #[test]
    fn test_arity_error_message() {
        let err = Arity::Exact(2).validate("cons", 1).unwrap_err();
        assert_eq!(
            err.to_string(),
            "arity not matched: cons expects exactly 2 arguments, got 1"
        );
    }

    #[test]
    fn test_registry_has_the_core_set() {
        for name in [
            "+", "-", "*", "=", "<", ">", "<=", ">=", "car", "cdr", "cons", "list", "null?",
            "pair?", "not", "eq?", "equal?", "display", "write", "newline", "read", "error",
            "globals", "apply", "call/cc",
        ] {
            assert!(find(name).is_some(), "missing builtin {name}");
        }
    }

    #[test]
    fn test_global_env_binds_every_builtin_plus_alias() {
        let env = global_env();
        for b in registry() {
            let bound = env.get(intern(b.name)).unwrap();
            assert!(matches!(bound, Value::Builtin(_)), "{} not bound", b.name);
        }
        let alias = env.get(intern("call-with-current-continuation")).unwrap();
        let short = env.get(intern("call/cc")).unwrap();
        assert!(alias.eq_identity(&short));
    }

    #[test]
    fn test_variadic_list_receives_every_argument() {
        let args = list((0..50).map(Value::Int).collect::<Vec<_>>());
        let result = builtin_list(&args).unwrap();
        assert_eq!(result.list_len().unwrap(), 50);
        assert_eq!(result, args);
        assert_eq!(builtin_list(&Value::Nil).unwrap(), Value::Nil);
    }

    #[test]
    fn test_error_builtin_message_shape() {
        let err = builtin_error(&list([
            Value::Str("bad thing".into()),
            Value::Int(42),
        ]))
        .unwrap_err();
        assert_eq!(err.to_string(), "Error: bad thing: 42");

        let err = builtin_error(&list([Value::Str("just bad".into())])).unwrap_err();
        assert_eq!(err.to_string(), "Error: just bad");
    }

    #[test]
    fn test_subtraction_negates_with_one_operand() {
        assert_eq!(
            builtin_sub(&list([Value::Int(5)])).unwrap(),
            Value::Int(-5)
        );
        assert_eq!(
            builtin_sub(&list([Value::Int(10), Value::Int(3), Value::Int(2)])).unwrap(),
            Value::Int(5)
        );
    }

    #[test]
    fn test_chained_comparisons() {
        let lt = |ns: &[i64]| {
            builtin_lt(&list(ns.iter().map(|n| Value::Int(*n)).collect::<Vec<_>>())).unwrap()
        };
        assert_eq!(lt(&[1, 2, 3]), Value::Bool(true));
        assert_eq!(lt(&[1, 3, 2]), Value::Bool(false));
        assert_eq!(lt(&[1, 1]), Value::Bool(false));
    }

    #[test]
    fn test_read_hands_out_datums_one_per_call() {
        // several datums on one line come back one per call, nothing dropped
        let mut reader = Reader::new();
        let mut input = std::io::Cursor::new("1 2 (3 4)\n");
        assert_eq!(read_datum(&mut reader, &mut input).unwrap(), Value::Int(1));
        assert_eq!(read_datum(&mut reader, &mut input).unwrap(), Value::Int(2));
        assert_eq!(
            read_datum(&mut reader, &mut input).unwrap().to_string(),
            "(3 4)"
        );
        assert!(matches!(
            read_datum(&mut reader, &mut input).unwrap(),
            Value::Eof
        ));
    }

    #[test]
    fn test_read_spans_lines_and_discards_bad_input() {
        let mut reader = Reader::new();
        let mut input = std::io::Cursor::new("(+ 1\n 2)\n\"bad \\q\" 5\n");
        assert_eq!(
            read_datum(&mut reader, &mut input).unwrap().to_string(),
            "(+ 1 2)"
        );
        // the broken line is dropped wholesale, including the trailing 5
        assert!(read_datum(&mut reader, &mut input).is_err());
        assert!(matches!(
            read_datum(&mut reader, &mut input).unwrap(),
            Value::Eof
        ));
    }
}
