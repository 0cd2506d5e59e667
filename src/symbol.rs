//! Process-wide symbol interning.
//!
//! Every symbol that enters the runtime - from the reader, from `quote`, from
//! builtin registration - goes through one global interner that is created on
//! first use and never cleared. A [`Symbol`] is a `Copy` id into that table,
//! so symbol equality IS identity and `(eq? 'a 'a)` holds even when the two
//! occurrences were read at different times.

use std::fmt;
use std::sync::{LazyLock, Mutex};

use string_interner::{DefaultBackend, DefaultSymbol, StringInterner};

static SYMBOLS: LazyLock<Mutex<StringInterner<DefaultBackend>>> =
    LazyLock::new(|| Mutex::new(StringInterner::new()));

/// An interned symbol. Equality compares interner ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Symbol(DefaultSymbol);

/// Intern `name`, returning the same id for the same spelling every time.
pub fn intern(name: &str) -> Symbol {
    let mut table = SYMBOLS.lock().expect("symbol table lock poisoned");
    Symbol(table.get_or_intern(name))
}

impl Symbol {
    /// The symbol's spelling. Ids are only ever minted by [`intern`], so
    /// resolution cannot miss.
    pub fn name(&self) -> String {
        let table = SYMBOLS.lock().expect("symbol table lock poisoned");
        table
            .resolve(self.0)
            .expect("symbol id minted by this interner")
            .to_owned()
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Pre-interned ids for the special forms the evaluator recognizes by head
/// symbol. Interned once so form classification is id comparison, never a
/// string comparison.
pub struct SpecialForms {
    pub quote: Symbol,
    pub if_: Symbol,
    pub begin: Symbol,
    pub lambda: Symbol,
    pub define: Symbol,
    pub set_bang: Symbol,
}

static SPECIAL_FORMS: LazyLock<SpecialForms> = LazyLock::new(|| SpecialForms {
    quote: intern("quote"),
    if_: intern("if"),
    begin: intern("begin"),
    lambda: intern("lambda"),
    define: intern("define"),
    set_bang: intern("set!"),
});

pub fn special_forms() -> &'static SpecialForms {
    &SPECIAL_FORMS
}
