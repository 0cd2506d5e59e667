//! The explicit control stack and continuation snapshots.
//!
//! Every piece of pending work the evaluator owes is a [`Step`] on a
//! [`ControlStack`]; the host call stack carries nothing across iterations.
//! That makes first-class continuations almost free: capturing is a snapshot
//! copy of the step sequence, and invoking one replaces the live stack with a
//! fresh copy of the snapshot. The snapshot itself is immutable and shared
//! behind `Rc`, so a continuation can be invoked any number of times, each
//! invocation structurally independent of the others.

use smallvec::SmallVec;

use crate::env::Env;
use crate::symbol::Symbol;
use crate::value::Value;

/// One unit of pending work. Popped by the evaluator's resume phase with the
/// value just produced.
#[derive(Debug, Clone)]
pub enum Step {
    /// A pending `if`: the resumed value is the test result.
    Then {
        conseq: Value,
        alt: Option<Value>,
    },
    /// The unevaluated remainder of a `begin` body; the resumed value is
    /// discarded.
    Begin { rest: Value },
    /// A pending `define`: bind `name` to the resumed value.
    Define { name: Symbol },
    /// A pending `set!`: the target frame was resolved before the value
    /// expression was reduced.
    SetVal { binding: Env },
    /// The resumed value is the function of an application; `args` holds the
    /// unevaluated argument expressions (`None` for a no-argument call).
    Apply { args: Option<Value> },
    /// An argument expression waiting for its turn under a `ConsArgs`.
    EvalArg { expr: Value },
    /// The argument-list fold in progress: prepend the resumed value onto
    /// `acc`, then consume the next `EvalArg` or `ApplyProc` below.
    ConsArgs { acc: Value },
    /// The evaluated function waiting for its completed argument list.
    ApplyProc { proc: Value },
    /// Reinstate the caller's environment once the callee's value arrives.
    /// Also the return point `call/cc` establishes at capture, which is how
    /// a restored stack recovers the right environment.
    RestoreEnv { env: Env },
}

/// An immutable snapshot of a control stack, taken by `call/cc`.
#[derive(Debug)]
pub struct Continuation {
    steps: Vec<Step>,
}

impl Continuation {
    pub fn depth(&self) -> usize {
        self.steps.len()
    }
}

/// The live stack of pending steps. Small call chains stay inline.
#[derive(Debug, Default)]
pub struct ControlStack {
    steps: SmallVec<[Step; 16]>,
    high_water: usize,
}

impl ControlStack {
    pub fn push(&mut self, step: Step) {
        self.steps.push(step);
        if self.steps.len() > self.high_water {
            self.high_water = self.steps.len();
        }
    }

    pub fn pop(&mut self) -> Option<Step> {
        self.steps.pop()
    }

    /// Whether the top of the stack is already a return point. Application
    /// consults this to collapse consecutive `RestoreEnv`s, which is the
    /// whole of tail-call elimination.
    pub fn top_is_restore(&self) -> bool {
        matches!(self.steps.last(), Some(Step::RestoreEnv { .. }))
    }

    pub fn depth(&self) -> usize {
        self.steps.len()
    }

    /// Deepest the stack has ever been; diagnostic for the bounded-stack
    /// guarantee.
    pub fn high_water(&self) -> usize {
        self.high_water
    }

    /// Snapshot the current pending steps.
    pub fn capture(&self) -> Continuation {
        Continuation {
            steps: self.steps.as_slice().to_vec(),
        }
    }

    /// Discard the live steps and reinstate a fresh copy of the snapshot.
    /// The snapshot is never aliased: invoking the same continuation twice
    /// yields two independent step sequences.
    pub fn restore(&mut self, snapshot: &Continuation) {
        self.steps.clear();
        self.steps.extend(snapshot.steps.iter().cloned());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_is_independent_of_later_pushes() {
        let mut stack = ControlStack::default();
        stack.push(Step::EvalArg { expr: Value::Int(1) });
        let snapshot = stack.capture();
        stack.push(Step::EvalArg { expr: Value::Int(2) });
        stack.push(Step::ConsArgs { acc: Value::Nil });
        assert_eq!(snapshot.depth(), 1);
        assert_eq!(stack.depth(), 3);
    }

    #[test]
    fn test_restore_replaces_the_live_stack() {
        let mut stack = ControlStack::default();
        stack.push(Step::EvalArg { expr: Value::Int(1) });
        let snapshot = stack.capture();

        stack.push(Step::ConsArgs { acc: Value::Nil });
        stack.restore(&snapshot);
        assert_eq!(stack.depth(), 1);
        assert!(matches!(
            stack.pop(),
            Some(Step::EvalArg { expr: Value::Int(1) })
        ));

        // a second restore of the same snapshot is just as good
        stack.restore(&snapshot);
        assert_eq!(stack.depth(), 1);
    }

    #[test]
    fn test_top_is_restore() {
        let mut stack = ControlStack::default();
        assert!(!stack.top_is_restore());
        stack.push(Step::RestoreEnv {
            env: crate::env::Env::marker(None),
        });
        assert!(stack.top_is_restore());
        stack.push(Step::Begin { rest: Value::Nil });
        assert!(!stack.top_is_restore());
    }

    #[test]
    fn test_high_water_tracks_the_peak() {
        let mut stack = ControlStack::default();
        for i in 0..5 {
            stack.push(Step::EvalArg { expr: Value::Int(i) });
        }
        while stack.pop().is_some() {}
        stack.push(Step::EvalArg { expr: Value::Int(0) });
        assert_eq!(stack.high_water(), 5);
    }
}
