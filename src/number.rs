//! The numeric tower: `i64`, `BigInt`, `f64`.
//!
//! Representation selection is per operation, not per value:
//!
//! - two fixnums compute in `i128`, then normalize (fixnum if it fits,
//!   otherwise bignum) - overflow silently promotes instead of wrapping or
//!   erroring;
//! - any float operand forces the whole operation into `f64`, and float
//!   results are never renormalized back to an exact representation;
//! - anything else widens to `BigInt`, with the result normalized down when
//!   it fits a fixnum again.
//!
//! Normalization is pure and idempotent, so a `Value::Big` in the wild never
//! holds a fixnum-sized value.

use std::cmp::Ordering;

use num_bigint::BigInt;
use num_traits::ToPrimitive;

use crate::value::Value;
use crate::Error;

/// Narrow an `i128` intermediate to the smallest integer representation.
pub fn normalize(n: i128) -> Value {
    match i64::try_from(n) {
        Ok(v) => Value::Int(v),
        Err(_) => Value::Big(BigInt::from(n)),
    }
}

/// Narrow a bignum to a fixnum when it fits.
pub fn normalize_big(n: BigInt) -> Value {
    match n.to_i64() {
        Some(v) => Value::Int(v),
        None => Value::Big(n),
    }
}

/// Both operands promoted to a common representation.
enum Operands {
    Ints(i64, i64),
    Bigs(BigInt, BigInt),
    Reals(f64, f64),
}

fn promote(op: &str, a: &Value, b: &Value) -> Result<Operands, Error> {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => Ok(Operands::Ints(*x, *y)),
        (Value::Real(_), _) | (_, Value::Real(_)) => {
            Ok(Operands::Reals(to_f64(op, a)?, to_f64(op, b)?))
        }
        _ => Ok(Operands::Bigs(to_big(op, a)?, to_big(op, b)?)),
    }
}

fn to_f64(op: &str, v: &Value) -> Result<f64, Error> {
    match v {
        Value::Int(n) => Ok(*n as f64),
        // saturates to infinity for huge magnitudes, which is the float
        // contagion rule: precision loss is accepted
        Value::Big(n) => n
            .to_f64()
            .ok_or_else(|| Error::Type(format!("{op}: cannot widen {v} to a float"))),
        Value::Real(x) => Ok(*x),
        other => Err(Error::Type(format!("{op} requires numbers, got {other}"))),
    }
}

fn to_big(op: &str, v: &Value) -> Result<BigInt, Error> {
    match v {
        Value::Int(n) => Ok(BigInt::from(*n)),
        Value::Big(n) => Ok(n.clone()),
        other => Err(Error::Type(format!("{op} requires numbers, got {other}"))),
    }
}

pub fn add(a: &Value, b: &Value) -> Result<Value, Error> {
    Ok(match promote("+", a, b)? {
        Operands::Ints(x, y) => normalize(x as i128 + y as i128),
        Operands::Reals(x, y) => Value::Real(x + y),
        Operands::Bigs(x, y) => normalize_big(x + y),
    })
}

pub fn sub(a: &Value, b: &Value) -> Result<Value, Error> {
    Ok(match promote("-", a, b)? {
        Operands::Ints(x, y) => normalize(x as i128 - y as i128),
        Operands::Reals(x, y) => Value::Real(x - y),
        Operands::Bigs(x, y) => normalize_big(x - y),
    })
}

pub fn mul(a: &Value, b: &Value) -> Result<Value, Error> {
    Ok(match promote("*", a, b)? {
        Operands::Ints(x, y) => normalize(x as i128 * y as i128),
        Operands::Reals(x, y) => Value::Real(x * y),
        Operands::Bigs(x, y) => normalize_big(x * y),
    })
}

/// Numeric ordering under the same representation selection as arithmetic.
/// `NaN` operands have no ordering and fail rather than answer `#f` for
/// every relation.
pub fn compare(a: &Value, b: &Value) -> Result<Ordering, Error> {
    match promote("comparison", a, b)? {
        Operands::Ints(x, y) => Ok(x.cmp(&y)),
        Operands::Bigs(x, y) => Ok(x.cmp(&y)),
        Operands::Reals(x, y) => x
            .partial_cmp(&y)
            .ok_or_else(|| Error::NotComparable(format!("{a} and {b}"))),
    }
}
