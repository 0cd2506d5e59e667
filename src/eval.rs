//! The trampoline evaluator.
//!
//! Evaluation alternates between two phases over an explicit control stack:
//!
//! - **reduce** rewrites an expression toward a value, pushing pending work
//!   ([`Step`]s) for every sub-expression it cannot finish immediately;
//! - **resume** pops the next pending step and feeds it the value the reduce
//!   phase produced.
//!
//! The host stack never grows with the program: the loop below is the only
//! recursion-free driver, which is what makes `call/cc` a snapshot copy and
//! tail calls a non-event. Tail position is detected structurally - applying
//! a closure pushes a `RestoreEnv` return point only if the top of the stack
//! is not already one, so an iterative tail chain reuses a single return
//! point and the stack depth stays proportional to the number of *non-tail*
//! frames outstanding.

use std::rc::Rc;

use tracing::{debug, trace};

use crate::builtins::{self, BuiltinKind};
use crate::cont::{ControlStack, Step};
use crate::env::Env;
use crate::reader;
use crate::symbol::special_forms;
use crate::value::{self, Closure, Pair, Value};
use crate::Error;

/// Evaluate one expression to a value.
pub fn evaluate(expr: &Value, env: &Env) -> Result<Value, Error> {
    Machine::new(env.clone()).run(expr.clone())
}

/// Read and evaluate every form in `source` against `env`, stopping at the
/// first reader or evaluation error.
pub fn load(source: &str, env: &Env) -> Result<(), Error> {
    let mut rest = source;
    loop {
        match reader::read_one(rest)? {
            None => return Ok(()),
            Some((expr, remaining)) => {
                debug!(form = %expr, "load: evaluating top-level form");
                evaluate(&expr, env)?;
                rest = remaining;
            }
        }
    }
}

enum State {
    /// Rewrite an expression toward a value
    Reduce(Value),
    /// Feed a finished value to the next pending step
    Resume(Value),
}

/// One evaluation in flight: the live step stack plus the current
/// environment register. The environment is saved into `RestoreEnv` steps at
/// call boundaries and at `call/cc` capture, which is how both returns and
/// restored continuations recover it.
struct Machine {
    stack: ControlStack,
    env: Env,
}

impl Machine {
    fn new(env: Env) -> Self {
        Machine {
            stack: ControlStack::default(),
            env,
        }
    }

    fn run(&mut self, expr: Value) -> Result<Value, Error> {
        let mut state = State::Reduce(expr);
        loop {
            state = match state {
                State::Reduce(expr) => self.reduce(expr)?,
                State::Resume(value) => match self.stack.pop() {
                    None => return Ok(value),
                    Some(step) => self.resume(step, value)?,
                },
            };
        }
    }

    fn reduce(&mut self, expr: Value) -> Result<State, Error> {
        match expr {
            Value::Symbol(sym) => Ok(State::Resume(self.env.get(sym)?)),
            Value::Pair(form) => self.reduce_form(form),
            // numbers, booleans, strings, (), void: self-evaluating
            other => Ok(State::Resume(other)),
        }
    }

    fn reduce_form(&mut self, form: Rc<Pair>) -> Result<State, Error> {
        // a single-element form is a no-argument application, before any
        // special-form classification
        if matches!(form.tail, Value::Nil) {
            self.stack.push(Step::Apply { args: None });
            return Ok(State::Reduce(form.head.clone()));
        }
        if let Value::Symbol(head) = &form.head {
            let sp = special_forms();
            if *head == sp.quote {
                return self.reduce_quote(&form.tail);
            }
            if *head == sp.if_ {
                return self.reduce_if(&form.tail);
            }
            if *head == sp.begin {
                return self.reduce_begin(&form.tail);
            }
            if *head == sp.lambda {
                return self.reduce_lambda(&form.tail);
            }
            if *head == sp.define {
                return self.reduce_define(&form.tail);
            }
            if *head == sp.set_bang {
                return self.reduce_set(&form.tail);
            }
        }
        self.stack.push(Step::Apply {
            args: Some(form.tail.clone()),
        });
        Ok(State::Reduce(form.head.clone()))
    }

    fn reduce_quote(&mut self, tail: &Value) -> Result<State, Error> {
        match tail {
            Value::Pair(p) if matches!(p.tail, Value::Nil) => Ok(State::Resume(p.head.clone())),
            _ => Err(Error::MalformedForm(
                "quote expects exactly one datum".to_string(),
            )),
        }
    }

    fn reduce_if(&mut self, tail: &Value) -> Result<State, Error> {
        let malformed =
            || Error::MalformedForm("if expects a test, a consequent, and at most one alternative".to_string());
        let Value::Pair(p) = tail else {
            return Err(malformed());
        };
        let Value::Pair(q) = &p.tail else {
            return Err(malformed());
        };
        let conseq = q.head.clone();
        let alt = match &q.tail {
            Value::Nil => None,
            Value::Pair(r) if matches!(r.tail, Value::Nil) => Some(r.head.clone()),
            _ => return Err(malformed()),
        };
        self.stack.push(Step::Then { conseq, alt });
        Ok(State::Reduce(p.head.clone()))
    }

    fn reduce_begin(&mut self, tail: &Value) -> Result<State, Error> {
        let Value::Pair(p) = tail else {
            return Err(Error::MalformedForm(
                "begin body must be an expression list".to_string(),
            ));
        };
        if !matches!(p.tail, Value::Nil) {
            self.stack.push(Step::Begin {
                rest: p.tail.clone(),
            });
        }
        Ok(State::Reduce(p.head.clone()))
    }

    fn reduce_lambda(&mut self, tail: &Value) -> Result<State, Error> {
        let Value::Pair(p) = tail else {
            return Err(Error::MalformedForm(
                "lambda expects a parameter list and a body".to_string(),
            ));
        };
        let params = p.head.clone();
        let body = p.tail.clone();
        if !matches!(body, Value::Pair(_)) {
            return Err(Error::MalformedForm(
                "lambda body must be a non-empty expression sequence".to_string(),
            ));
        }
        for param in params.iter_list() {
            match param {
                Ok(Value::Symbol(_)) => {}
                Ok(other) => {
                    return Err(Error::MalformedForm(format!(
                        "lambda parameter {other} is not a symbol"
                    )))
                }
                Err(_) => {
                    return Err(Error::MalformedForm(
                        "lambda parameters must be a proper list".to_string(),
                    ))
                }
            }
        }
        Ok(State::Resume(Value::Closure(Rc::new(Closure {
            params,
            body,
            env: self.env.clone(),
        }))))
    }

    fn reduce_define(&mut self, tail: &Value) -> Result<State, Error> {
        let malformed = || Error::MalformedForm("define expects a symbol and one expression".to_string());
        let Value::Pair(p) = tail else {
            return Err(malformed());
        };
        let Value::Symbol(name) = &p.head else {
            return Err(Error::MalformedForm(format!(
                "define target {} is not a symbol",
                p.head
            )));
        };
        let Value::Pair(q) = &p.tail else {
            return Err(malformed());
        };
        if !matches!(q.tail, Value::Nil) {
            return Err(malformed());
        }
        self.stack.push(Step::Define { name: *name });
        Ok(State::Reduce(q.head.clone()))
    }

    fn reduce_set(&mut self, tail: &Value) -> Result<State, Error> {
        let malformed = || Error::MalformedForm("set! expects a symbol and one expression".to_string());
        let Value::Pair(p) = tail else {
            return Err(malformed());
        };
        let Value::Symbol(name) = &p.head else {
            return Err(Error::MalformedForm(format!(
                "set! target {} is not a symbol",
                p.head
            )));
        };
        let Value::Pair(q) = &p.tail else {
            return Err(malformed());
        };
        if !matches!(q.tail, Value::Nil) {
            return Err(malformed());
        }
        // the binding must exist before the value expression runs
        let binding = self.env.lookup(*name)?;
        self.stack.push(Step::SetVal { binding });
        Ok(State::Reduce(q.head.clone()))
    }

    fn resume(&mut self, step: Step, value: Value) -> Result<State, Error> {
        match step {
            Step::Then { conseq, alt } => {
                if value.is_false() {
                    match alt {
                        Some(a) => Ok(State::Reduce(a)),
                        None => Ok(State::Resume(Value::Void)),
                    }
                } else {
                    Ok(State::Reduce(conseq))
                }
            }
            Step::Begin { rest } => {
                // `rest` is a non-empty expression list by construction
                let Value::Pair(p) = rest else {
                    return Err(Error::MalformedForm(
                        "begin remainder must be an expression list".to_string(),
                    ));
                };
                if !matches!(p.tail, Value::Nil) {
                    self.stack.push(Step::Begin {
                        rest: p.tail.clone(),
                    });
                }
                Ok(State::Reduce(p.head.clone()))
            }
            Step::Define { name } => {
                self.env.define(name, value)?;
                Ok(State::Resume(Value::Void))
            }
            Step::SetVal { binding } => {
                binding.set_value(value);
                Ok(State::Resume(Value::Void))
            }
            Step::Apply { args: None } => self.apply(value, Value::Nil),
            Step::Apply { args: Some(list) } => {
                let exprs: Vec<Value> = list.iter_list().collect::<Result<_, _>>()?;
                match exprs.split_last() {
                    None => self.apply(value, Value::Nil),
                    Some((last, init)) => {
                        // the fold below prepends, so the last argument is
                        // evaluated first and the list comes out in order
                        self.stack.push(Step::ApplyProc { proc: value });
                        for expr in init {
                            self.stack.push(Step::EvalArg { expr: expr.clone() });
                        }
                        self.stack.push(Step::ConsArgs { acc: Value::Nil });
                        Ok(State::Reduce(last.clone()))
                    }
                }
            }
            Step::ConsArgs { acc } => {
                let acc = value::cons(value, acc);
                match self.stack.pop() {
                    Some(Step::EvalArg { expr }) => {
                        self.stack.push(Step::ConsArgs { acc });
                        Ok(State::Reduce(expr))
                    }
                    Some(Step::ApplyProc { proc }) => self.apply(proc, acc),
                    _ => unreachable!("argument steps always sit below a ConsArgs"),
                }
            }
            Step::EvalArg { .. } | Step::ApplyProc { .. } => {
                unreachable!("consumed by the ConsArgs above them")
            }
            Step::RestoreEnv { env } => {
                self.env = env;
                Ok(State::Resume(value))
            }
        }
    }

    /// Apply a function-like value to an evaluated argument list. The meta
    /// builtins loop back here: `apply` re-dispatches with its explicit
    /// argument list, `call/cc` with the freshly captured continuation.
    fn apply(&mut self, proc: Value, args: Value) -> Result<State, Error> {
        let mut proc = proc;
        let mut args = args;
        loop {
            trace!(procedure = %proc, "apply");
            match proc {
                Value::Builtin(b) => {
                    b.arity.validate(b.name, args.list_len()?)?;
                    match &b.kind {
                        BuiltinKind::Native(run) => return Ok(State::Resume(run(&args)?)),
                        BuiltinKind::Apply => {
                            let (target, arg_list) = builtins::two(b.name, &args)?;
                            proc = target;
                            args = arg_list;
                        }
                        BuiltinKind::CallCc => {
                            let target = builtins::one(b.name, &args)?;
                            // the return point doubles as the environment
                            // restorer when the captured stack is reinstated
                            self.stack.push(Step::RestoreEnv {
                                env: self.env.clone(),
                            });
                            let k = Value::Continuation(Rc::new(self.stack.capture()));
                            proc = target;
                            args = value::cons(k, Value::Nil);
                        }
                    }
                }
                Value::Closure(c) => {
                    if !self.stack.top_is_restore() {
                        self.stack.push(Step::RestoreEnv {
                            env: self.env.clone(),
                        });
                    }
                    let callee = c.env.extend(&c.params, &args)?;
                    let Value::Pair(body) = &c.body else {
                        return Err(Error::MalformedForm(
                            "closure body must be a non-empty sequence".to_string(),
                        ));
                    };
                    if !matches!(body.tail, Value::Nil) {
                        self.stack.push(Step::Begin {
                            rest: body.tail.clone(),
                        });
                    }
                    self.env = callee;
                    return Ok(State::Reduce(body.head.clone()));
                }
                Value::Continuation(k) => {
                    let resumed = one_continuation_arg(&args)?;
                    self.stack.restore(&k);
                    return Ok(State::Resume(resumed));
                }
                other => return Err(Error::NotApplicable(other.to_string())),
            }
        }
    }
}

fn one_continuation_arg(args: &Value) -> Result<Value, Error> {
    match args {
        Value::Pair(p) if matches!(p.tail, Value::Nil) => Ok(p.head.clone()),
        _ => Err(Error::ArityMismatch {
            name: "continuation".to_string(),
            expected: "exactly 1".to_string(),
            got: args.list_len().unwrap_or(0),
        }),
    }
}
