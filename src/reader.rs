//! S-expression reading from text.
//!
//! `read_one` parses at most one datum and returns the unconsumed remainder,
//! which is what `load` and the REPL's running buffer iterate on. Failures
//! are classified: [`ReadErrorKind::Incomplete`] means the text so far is a
//! valid prefix (unclosed list or string, trailing quote mark), so a line
//! driver should ask for more input instead of reporting a syntax error.
//!
//! Syntax: integers (promoted to bignums past the `i64` range), floats,
//! `#t`/`#f`, strings with escapes, symbols, `'` quote shorthand, proper and
//! dotted lists, and `;` line comments.

use std::rc::Rc;

use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::take_while1,
    character::complete::char,
    error::ErrorKind,
};
use num_bigint::BigInt;

use crate::symbol::intern;
use crate::value::{self, Value};
use crate::{ReadError, ReadErrorKind};

/// Maximum datum nesting; the reader recurses on the host stack (unlike the
/// evaluator) so nesting must be bounded.
pub const MAX_READ_DEPTH: usize = 64;

const SYMBOL_SPECIAL_CHARS: &str = "+-*/<>=!?_$";

/// Characters that end an atom token.
fn is_delimiter(c: char) -> bool {
    c.is_whitespace() || matches!(c, '(' | ')' | '"' | ';' | '\'')
}

/// Valid: no leading digit, no `-digit`/`+digit` prefix (those are numbers),
/// alphanumeric + SYMBOL_SPECIAL_CHARS throughout.
fn is_valid_symbol(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    if first.is_ascii_digit() {
        return false;
    }
    if (first == '-' || first == '+') && chars.clone().next().is_some_and(|c| c.is_ascii_digit()) {
        return false;
    }
    name.chars()
        .all(|c| c.is_alphanumeric() || SYMBOL_SPECIAL_CHARS.contains(c))
}

/// Skip whitespace and `;` line comments.
fn skip_ws(mut input: &str) -> &str {
    loop {
        let trimmed = input.trim_start();
        match trimmed.strip_prefix(';') {
            None => return trimmed,
            Some(comment) => match comment.find('\n') {
                Some(i) => input = &comment[i + 1..],
                None => return "",
            },
        }
    }
}

/// Parse one datum. Depth-limited; the limit surfaces as a `Failure` so
/// `alt` does not mask it with a later alternative.
fn parse_datum(input: &str, depth: usize) -> IResult<&str, Value> {
    if depth >= MAX_READ_DEPTH {
        return Err(nom::Err::Failure(nom::error::Error::new(
            input,
            ErrorKind::TooLarge,
        )));
    }
    let input = skip_ws(input);
    alt((
        |i| parse_quoted(i, depth),
        |i| parse_list(i, depth),
        parse_string,
        parse_atom,
    ))
    .parse(input)
}

/// `'datum` reads as `(quote datum)`.
fn parse_quoted(input: &str, depth: usize) -> IResult<&str, Value> {
    let (input, _) = char('\'').parse(input)?;
    let (input, datum) = parse_datum(input, depth + 1)?;
    Ok((
        input,
        value::list([Value::Symbol(intern("quote")), datum]),
    ))
}

/// `( d1 d2 ... )` or `( d1 d2 . tail )`.
fn parse_list(input: &str, depth: usize) -> IResult<&str, Value> {
    let (mut rest, _) = char('(').parse(input)?;
    let mut items: Vec<Value> = Vec::new();
    let mut tail = Value::Nil;

    loop {
        rest = skip_ws(rest);
        if let Some(after) = rest.strip_prefix(')') {
            rest = after;
            break;
        }
        // a lone `.` introduces the dotted tail
        if rest.starts_with('.') && rest[1..].chars().next().map_or(true, is_delimiter) {
            if items.is_empty() {
                return Err(nom::Err::Error(nom::error::Error::new(rest, ErrorKind::Tag)));
            }
            let (after, datum) = parse_datum(&rest[1..], depth + 1)?;
            tail = datum;
            let after = skip_ws(after);
            let (after, _) = char(')').parse(after)?;
            rest = after;
            break;
        }
        if rest.is_empty() {
            // unclosed list; classified as Incomplete by read_one
            return Err(nom::Err::Error(nom::error::Error::new(rest, ErrorKind::Char)));
        }
        let (after, datum) = parse_datum(rest, depth + 1)?;
        items.push(datum);
        rest = after;
    }

    Ok((
        rest,
        items.into_iter().rev().fold(tail, |t, h| value::cons(h, t)),
    ))
}

/// Parse a string literal with escape sequences.
fn parse_string(input: &str) -> IResult<&str, Value> {
    let (mut remaining, _) = char('"').parse(input)?;
    let mut chars = String::new();

    loop {
        let mut iter = remaining.chars();
        match iter.next() {
            Some('"') => return Ok((iter.as_str(), Value::Str(Rc::from(chars)))),
            Some('\\') => {
                match iter.next() {
                    Some('n') => chars.push('\n'),
                    Some('t') => chars.push('\t'),
                    Some('r') => chars.push('\r'),
                    Some('\\') => chars.push('\\'),
                    Some('"') => chars.push('"'),
                    // unknown escape, or backslash at end of input
                    _ => {
                        return Err(nom::Err::Error(nom::error::Error::new(
                            remaining,
                            ErrorKind::Char,
                        )));
                    }
                }
                remaining = iter.as_str();
            }
            Some(c) => {
                chars.push(c);
                remaining = iter.as_str();
            }
            // no closing quote; classified as Incomplete by read_one
            None => {
                return Err(nom::Err::Error(nom::error::Error::new(
                    remaining,
                    ErrorKind::Char,
                )));
            }
        }
    }
}

/// Lex one token up to a delimiter, then classify it as a boolean, number,
/// or symbol. Classifying after lexing means `12abc` is rejected outright
/// instead of reading as `12` followed by `abc`.
fn parse_atom(input: &str) -> IResult<&str, Value> {
    let (rest, token) = take_while1(|c: char| !is_delimiter(c)).parse(input)?;
    match classify_atom(token) {
        Some(v) => Ok((rest, v)),
        None => Err(nom::Err::Error(nom::error::Error::new(
            input,
            ErrorKind::Alpha,
        ))),
    }
}

fn classify_atom(token: &str) -> Option<Value> {
    match token {
        "#t" => return Some(Value::Bool(true)),
        "#f" => return Some(Value::Bool(false)),
        _ => {}
    }
    let mut chars = token.chars();
    let first = chars.next()?;
    let numeric = first.is_ascii_digit()
        || ((first == '-' || first == '+') && chars.next().is_some_and(|c| c.is_ascii_digit()));
    if numeric {
        if let Ok(n) = token.parse::<i64>() {
            return Some(Value::Int(n));
        }
        if token.contains(['.', 'e', 'E']) {
            if let Ok(x) = token.parse::<f64>() {
                return Some(Value::Real(x));
            }
        }
        // out of i64 range: an integer literal promotes, it never errors
        if let Ok(n) = token.parse::<BigInt>() {
            return Some(Value::Big(n));
        }
        return None;
    }
    if is_valid_symbol(token) {
        return Some(Value::Symbol(intern(token)));
    }
    None
}

/// Would more input plausibly complete this text? Scans for unclosed lists,
/// unterminated strings, and a trailing quote mark still waiting for its
/// datum.
fn is_incomplete(input: &str) -> bool {
    let mut depth: usize = 0;
    let mut pending_quote = false;
    let mut chars = input.chars();
    while let Some(c) = chars.next() {
        match c {
            '(' => {
                depth += 1;
                pending_quote = false;
            }
            ')' => {
                pending_quote = false;
                if depth == 0 {
                    return false;
                }
                depth -= 1;
            }
            '"' => {
                pending_quote = false;
                loop {
                    match chars.next() {
                        None => return true,
                        Some('\\') => {
                            if chars.next().is_none() {
                                return true;
                            }
                        }
                        Some('"') => break,
                        Some(_) => {}
                    }
                }
            }
            ';' => loop {
                match chars.next() {
                    None | Some('\n') => break,
                    Some(_) => {}
                }
            },
            '\'' => pending_quote = true,
            c if c.is_whitespace() => {}
            _ => pending_quote = false,
        }
    }
    depth > 0 || pending_quote
}

fn describe_error(input: &str, error: nom::Err<nom::error::Error<&str>>) -> String {
    match error {
        nom::Err::Error(e) | nom::Err::Failure(e) => {
            let position = input.len().saturating_sub(e.input.len());
            let near: String = input.chars().skip(position).take(12).collect();
            if near.is_empty() {
                "unexpected end of input".to_string()
            } else {
                format!("invalid syntax near '{near}'")
            }
        }
        nom::Err::Incomplete(_) => "incomplete input".to_string(),
    }
}

/// Parse at most one datum from `input`.
///
/// Returns `Ok(None)` when the input holds nothing but whitespace and
/// comments, and `Ok(Some((datum, rest)))` with the unconsumed remainder
/// otherwise.
pub fn read_one(input: &str) -> Result<Option<(Value, &str)>, ReadError> {
    let start = skip_ws(input);
    if start.is_empty() {
        return Ok(None);
    }
    match parse_datum(start, 0) {
        Ok((rest, datum)) => Ok(Some((datum, rest))),
        Err(nom::Err::Failure(e)) if e.code == ErrorKind::TooLarge => Err(ReadError::new(
            ReadErrorKind::TooDeeplyNested,
            format!("expression nesting exceeds the maximum depth of {MAX_READ_DEPTH}"),
        )),
        Err(_) if is_incomplete(start) => Err(ReadError::new(
            ReadErrorKind::Incomplete,
            "input ends inside an unfinished expression",
        )),
        Err(e) => Err(ReadError::new(
            ReadErrorKind::InvalidSyntax,
            describe_error(start, e),
        )),
    }
}

/// A running token buffer over incrementally arriving text. The REPL pushes
/// one line at a time and drains complete datums; an `Incomplete` error
/// means keep the buffer and ask for another line.
#[derive(Debug, Default)]
pub struct Reader {
    buffer: String,
}

impl Reader {
    pub fn new() -> Self {
        Reader::default()
    }

    pub fn push(&mut self, text: &str) {
        self.buffer.push_str(text);
    }

    /// Anything buffered beyond whitespace and comments?
    pub fn has_pending(&self) -> bool {
        !skip_ws(&self.buffer).is_empty()
    }

    /// Drop the buffer, e.g. after reporting a syntax error.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// Take the next complete datum out of the buffer. `Ok(None)` means the
    /// buffer is exhausted (callers wanting the EOF singleton map it there).
    pub fn next_datum(&mut self) -> Result<Option<Value>, ReadError> {
        let (result, remaining) = match read_one(&self.buffer) {
            Ok(None) => (Ok(None), Some(String::new())),
            Ok(Some((datum, rest))) => (Ok(Some(datum)), Some(rest.to_string())),
            Err(e) => (Err(e), None),
        };
        if let Some(rest) = remaining {
            self.buffer = rest;
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Parse exactly one datum and require full consumption.
    fn read_full(input: &str) -> Value {
        let (datum, rest) = read_one(input)
            .expect("should parse")
            .expect("should hold a datum");
        assert_eq!(skip_ws(rest), "", "unconsumed input for {input:?}");
        datum
    }

    fn kind_of(input: &str) -> ReadErrorKind {
        read_one(input).expect_err("should fail").kind
    }

    #[test]
    fn test_atoms() {
        let tests = vec![
            ("42", "42"),
            ("-17", "-17"),
            ("+9", "9"),
            ("3.5", "3.5"),
            ("-2.5e2", "-250.0"),
            ("#t", "#t"),
            ("#f", "#f"),
            ("foo", "foo"),
            ("set!", "set!"),
            ("call/cc", "call/cc"),
            ("+", "+"),
            ("-", "-"),
            ("\"hi there\"", "\"hi there\""),
            ("\"a\\n\\\"b\\\"\"", "\"a\\n\\\"b\\\"\""),
        ];
        for (input, expected) in tests {
            assert_eq!(read_full(input).to_string(), expected, "input: {input}");
        }
    }

    #[test]
    fn test_big_integer_literals_promote() {
        let v = read_full("99999999999999999999999999");
        assert!(matches!(v, Value::Big(_)));
        assert_eq!(v.to_string(), "99999999999999999999999999");
        // and i64-sized literals stay fixnums
        assert!(matches!(read_full("9223372036854775807"), Value::Int(_)));
    }

    #[test]
    fn test_lists_and_nesting() {
        let tests = vec![
            ("()", "()"),
            ("(1 2 3)", "(1 2 3)"),
            ("( 1  2\n3 )", "(1 2 3)"),
            ("(+ 1 (* 2 3))", "(+ 1 (* 2 3))"),
            ("((()))", "((()))"),
        ];
        for (input, expected) in tests {
            assert_eq!(read_full(input).to_string(), expected, "input: {input}");
        }
    }

    #[test]
    fn test_dotted_pairs() {
        assert_eq!(read_full("(a . b)").to_string(), "(a . b)");
        assert_eq!(read_full("(a b . c)").to_string(), "(a b . c)");
        assert_eq!(read_full("(a . (b . ()))").to_string(), "(a b)");
        assert_eq!(kind_of("(. b)"), ReadErrorKind::InvalidSyntax);
        assert_eq!(kind_of("(a . b c)"), ReadErrorKind::InvalidSyntax);
    }

    #[test]
    fn test_quote_shorthand() {
        assert_eq!(read_full("'x").to_string(), "(quote x)");
        assert_eq!(read_full("'(1 2)").to_string(), "(quote (1 2))");
        assert_eq!(read_full("''x").to_string(), "(quote (quote x))");
    }

    #[test]
    fn test_comments_are_whitespace() {
        assert_eq!(read_full("; leading\n42 ; trailing").to_string(), "42");
        assert_eq!(read_one("; only a comment").unwrap(), None);
        assert_eq!(
            read_full("(1 ; inside\n 2)").to_string(),
            "(1 2)"
        );
    }

    #[test]
    fn test_incomplete_vs_invalid() {
        assert_eq!(kind_of("(1 2"), ReadErrorKind::Incomplete);
        assert_eq!(kind_of("(1 (2 3)"), ReadErrorKind::Incomplete);
        assert_eq!(kind_of("\"no close"), ReadErrorKind::Incomplete);
        assert_eq!(kind_of("'"), ReadErrorKind::Incomplete);
        assert_eq!(kind_of(")"), ReadErrorKind::InvalidSyntax);
        assert_eq!(kind_of("12abc"), ReadErrorKind::InvalidSyntax);
        assert_eq!(kind_of("\"bad \\q escape\""), ReadErrorKind::InvalidSyntax);
    }

    #[test]
    fn test_trailing_content_is_returned() {
        let (datum, rest) = read_one("(+ 1 2) (second form)").unwrap().unwrap();
        assert_eq!(datum.to_string(), "(+ 1 2)");
        assert_eq!(skip_ws(rest), "(second form)");
    }

    #[test]
    fn test_depth_limit() {
        let deep = "(".repeat(MAX_READ_DEPTH + 1) + &")".repeat(MAX_READ_DEPTH + 1);
        assert_eq!(kind_of(&deep), ReadErrorKind::TooDeeplyNested);
        let fine = "(".repeat(8) + "x" + &")".repeat(8);
        assert_eq!(read_full(&fine).to_string(), fine);
    }

    #[test]
    fn test_reader_buffers_across_pushes() {
        let mut reader = Reader::new();
        reader.push("(+ 1");
        let err = reader.next_datum().unwrap_err();
        assert_eq!(err.kind, ReadErrorKind::Incomplete);
        assert!(reader.has_pending());

        reader.push(" 2)\n(list 'a)");
        assert_eq!(reader.next_datum().unwrap().unwrap().to_string(), "(+ 1 2)");
        assert_eq!(
            reader.next_datum().unwrap().unwrap().to_string(),
            "(list (quote a))"
        );
        assert_eq!(reader.next_datum().unwrap(), None);
        assert!(!reader.has_pending());
    }

    #[test]
    fn test_reader_clear_discards_bad_input() {
        let mut reader = Reader::new();
        reader.push("12abc");
        assert_eq!(
            reader.next_datum().unwrap_err().kind,
            ReadErrorKind::InvalidSyntax
        );
        reader.clear();
        assert!(!reader.has_pending());
        reader.push("42");
        assert_eq!(reader.next_datum().unwrap().unwrap().to_string(), "42");
    }
}
