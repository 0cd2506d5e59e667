//! kappa - a small Scheme runtime with first-class continuations
//!
//! This crate evaluates parsed S-expressions under proper lexical scoping,
//! eliminates tail calls, and reifies continuations as plain values that can
//! be captured with `call/cc` and invoked any number of times, including
//! after the call that captured them has returned.
//!
//! The engine never recurses on the host stack. Control state is an explicit,
//! heap-owned sequence of pending steps (see [`cont`]), and evaluation is an
//! iterative two-phase trampoline over that sequence (see [`eval`]). Because
//! the step stack is an ordinary copyable value, capturing a continuation is
//! a snapshot and invoking one is a wholesale replacement of the live stack -
//! no stack walking, no host unwinding.
//!
//! ```scheme
//! (+ 1 (call/cc (lambda (k) (k 41))))   ; => 42
//! ```
//!
//! ## Modules
//!
//! - `symbol`: process-wide interning; symbol equality is identity
//! - `value`: the closed tagged `Value` type and list plumbing
//! - `number`: the three-representation numeric tower (i64, BigInt, f64)
//! - `env`: singly-linked binding frames with lexical scope markers
//! - `cont`: the pending-step stack and continuation snapshots
//! - `eval`: the trampoline evaluator and function application
//! - `builtins`: the builtin registry and the global environment
//! - `reader`: S-expression reading from text

use thiserror::Error;

use crate::value::Value;

/// Categorizes the different kinds of reader failures.
///
/// `Incomplete` is the distinguished "need more input" condition: the text so
/// far is a valid prefix of a datum (an unclosed list or string, or a trailing
/// quote mark), so a driver holding a running buffer should request more text
/// instead of reporting an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadErrorKind {
    /// Invalid or unexpected syntax (bad tokens, malformed expressions)
    InvalidSyntax,
    /// Input ended before the datum was complete
    Incomplete,
    /// Expression nesting exceeded the maximum reader depth
    TooDeeplyNested,
}

/// A structured error describing a reader failure.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message}")]
pub struct ReadError {
    pub kind: ReadErrorKind,
    pub message: String,
}

impl ReadError {
    pub(crate) fn new(kind: ReadErrorKind, message: impl Into<String>) -> Self {
        ReadError {
            kind,
            message: message.into(),
        }
    }
}

/// Error conditions raised during evaluation.
///
/// Every variant propagates out of [`eval::evaluate`] uncaught; nothing is
/// retried internally. The REPL driver catches, prints, and continues, while
/// [`eval::load`] abandons the rest of the file at the first error.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    /// Variable lookup walked the whole environment chain without a match
    #[error("Unbound variable: {0}")]
    UnboundVariable(String),

    /// List iteration hit a non-list tail; carries that tail so callers can
    /// report it
    #[error("improper list: unexpected tail {0}")]
    ImproperList(Value),

    /// A builtin was called with the wrong argument count. The declared
    /// arity is checked before the native function runs.
    #[error("arity not matched: {name} expects {expected} arguments, got {got}")]
    ArityMismatch {
        name: String,
        expected: String,
        got: usize,
    },

    /// Closure application ran out of argument values before parameters
    #[error("too few arguments for the parameter list")]
    TooFewArgs,

    /// Closure application had argument values left over after parameters
    #[error("too many arguments for the parameter list")]
    TooManyArgs,

    /// The target of an application is not a function-like value
    #[error("not applicable: {0}")]
    NotApplicable(String),

    /// A special form with the wrong shape, e.g. a `set!` target that is
    /// not a symbol
    #[error("malformed special form: {0}")]
    MalformedForm(String),

    /// An operation received a value of the wrong kind
    #[error("type error: {0}")]
    Type(String),

    /// Numeric comparison with no defined ordering (NaN operands)
    #[error("not comparable: {0}")]
    NotComparable(String),

    /// The `error` builtin, and I/O failures re-signaled as user errors so
    /// they terminate the current top-level form rather than the process
    #[error("Error: {0}")]
    User(String),

    /// A reader failure surfaced through `load` or the `read` builtin
    #[error(transparent)]
    Read(#[from] ReadError),
}

pub mod builtins;
pub mod cont;
pub mod env;
pub mod eval;
pub mod number;
pub mod reader;
pub mod symbol;
pub mod value;
