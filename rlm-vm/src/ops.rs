//! Operators, indexing and iteration over sandbox values

use crate::error::{self, Result};
use crate::opcode::{BinaryOp, CompareOp, UnaryOp};
use crate::value::{self, Value};
use std::cmp::Ordering;
use std::sync::Arc;

pub(crate) fn unary(op: UnaryOp, operand: Value) -> Result<Value> {
    match op {
        UnaryOp::Not => Ok(Value::Bool(!operand.truthy())),
        UnaryOp::Neg => match operand.as_int() {
            Some(i) => i.checked_neg().map(Value::Int).ok_or_else(error::overflow),
            None => Err(error::type_mismatch(format!(
                "bad operand type for unary -: '{}'",
                operand.type_name()
            ))),
        },
        UnaryOp::Pos => match operand.as_int() {
            Some(i) => Ok(Value::Int(i)),
            None => Err(error::type_mismatch(format!(
                "bad operand type for unary +: '{}'",
                operand.type_name()
            ))),
        },
    }
}

/// Apply a binary operator; `max_len` bounds the size of built values
pub(crate) fn binary(op: BinaryOp, left: Value, right: Value, max_len: usize) -> Result<Value> {
    let unsupported = |l: &Value, r: &Value| error::unsupported_operands(op.symbol(), l.type_name(), r.type_name());

    match (&left, &right) {
        (Value::Str(a), Value::Str(b)) if op == BinaryOp::Add => {
            check_len(a.len() + b.len(), max_len)?;
            let mut out = String::with_capacity(a.len() + b.len());
            out.push_str(a);
            out.push_str(b);
            return Ok(Value::from(out));
        }
        (Value::List(a), Value::List(b)) if op == BinaryOp::Add => {
            check_len(a.len() + b.len(), max_len)?;
            let mut out = Vec::with_capacity(a.len() + b.len());
            out.extend(a.iter().cloned());
            out.extend(b.iter().cloned());
            return Ok(Value::list(out));
        }
        (Value::Str(s), n) | (n, Value::Str(s)) if op == BinaryOp::Mul && n.as_int().is_some() => {
            let times = repeat_count(n)?;
            check_len(s.len().saturating_mul(times), max_len)?;
            return Ok(Value::from(s.repeat(times)));
        }
        (Value::List(items), n) | (n, Value::List(items))
            if op == BinaryOp::Mul && n.as_int().is_some() =>
        {
            let times = repeat_count(n)?;
            check_len(items.len().saturating_mul(times), max_len)?;
            let mut out = Vec::with_capacity(items.len() * times);
            for _ in 0..times {
                out.extend(items.iter().cloned());
            }
            return Ok(Value::list(out));
        }
        _ => {}
    }

    let (a, b) = match (left.as_int(), right.as_int()) {
        (Some(a), Some(b)) => (a, b),
        _ => return Err(unsupported(&left, &right)),
    };

    let result = match op {
        BinaryOp::Add => a.checked_add(b),
        BinaryOp::Sub => a.checked_sub(b),
        BinaryOp::Mul => a.checked_mul(b),
        BinaryOp::Div | BinaryOp::FloorDiv => {
            if b == 0 {
                return Err(error::division_by_zero());
            }
            floor_div(a, b)
        }
        BinaryOp::Mod => {
            if b == 0 {
                return Err(error::division_by_zero());
            }
            floor_mod(a, b)
        }
    };
    result.map(Value::Int).ok_or_else(error::overflow)
}

fn repeat_count(n: &Value) -> Result<usize> {
    Ok(n.as_int().unwrap_or(0).max(0) as usize)
}

fn check_len(len: usize, max_len: usize) -> Result<()> {
    if len > max_len {
        return Err(error::value_too_large(len, max_len));
    }
    Ok(())
}

/// Integer division rounding toward negative infinity
fn floor_div(a: i64, b: i64) -> Option<i64> {
    let q = a.checked_div(b)?;
    if a % b != 0 && ((a < 0) != (b < 0)) {
        q.checked_sub(1)
    } else {
        Some(q)
    }
}

/// Remainder with the sign of the divisor
fn floor_mod(a: i64, b: i64) -> Option<i64> {
    let r = a.checked_rem(b)?;
    if r != 0 && ((r < 0) != (b < 0)) {
        r.checked_add(b)
    } else {
        Some(r)
    }
}

pub(crate) fn compare(op: CompareOp, left: &Value, right: &Value) -> Result<bool> {
    match op {
        CompareOp::Eq => Ok(left == right),
        CompareOp::NotEq => Ok(left != right),
        CompareOp::Lt => Ok(order(left, right, op)? == Ordering::Less),
        CompareOp::Le => Ok(order(left, right, op)? != Ordering::Greater),
        CompareOp::Gt => Ok(order(left, right, op)? == Ordering::Greater),
        CompareOp::Ge => Ok(order(left, right, op)? != Ordering::Less),
        CompareOp::In => contains(right, left),
        CompareOp::NotIn => contains(right, left).map(|found| !found),
        CompareOp::Is => Ok(identical(left, right)),
        CompareOp::IsNot => Ok(!identical(left, right)),
    }
}

/// Ordering used by `<`, `min` and `max`
pub(crate) fn order(left: &Value, right: &Value, op: CompareOp) -> Result<Ordering> {
    match (left, right) {
        (Value::Str(a), Value::Str(b)) => Ok(a.as_ref().cmp(b.as_ref())),
        (Value::List(a), Value::List(b)) => {
            for (x, y) in a.iter().zip(b.iter()) {
                if x != y {
                    return order(x, y, op);
                }
            }
            Ok(a.len().cmp(&b.len()))
        }
        _ => match (left.as_int(), right.as_int()) {
            (Some(a), Some(b)) => Ok(a.cmp(&b)),
            _ => Err(error::type_mismatch(format!(
                "'{}' not supported between instances of '{}' and '{}'",
                op.symbol(),
                left.type_name(),
                right.type_name()
            ))),
        },
    }
}

fn contains(container: &Value, item: &Value) -> Result<bool> {
    match container {
        Value::Str(haystack) => match item {
            Value::Str(needle) => Ok(haystack.contains(needle.as_ref())),
            other => Err(error::type_mismatch(format!(
                "'in <string>' requires string as left operand, not {}",
                other.type_name()
            ))),
        },
        Value::List(items) => Ok(items.iter().any(|v| v == item)),
        Value::Range { start, stop, step } => {
            let Some(i) = item.as_int() else {
                return Ok(false);
            };
            let in_bounds = if *step > 0 {
                *start <= i && i < *stop
            } else {
                *stop < i && i <= *start
            };
            Ok(in_bounds && i.wrapping_sub(*start).checked_rem(*step) == Some(0))
        }
        other => Err(error::type_mismatch(format!(
            "argument of type '{}' is not iterable",
            other.type_name()
        ))),
    }
}

fn identical(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::None, Value::None) => true,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::Int(a), Value::Int(b)) => a == b,
        (Value::Str(a), Value::Str(b)) => Arc::ptr_eq(a, b),
        (Value::List(a), Value::List(b)) => Arc::ptr_eq(a, b),
        _ => false,
    }
}

fn index_of(index: &Value, container: &Value) -> Result<i64> {
    index.as_int().ok_or_else(|| {
        error::type_mismatch(format!(
            "{} indices must be integers, not {}",
            container.type_name(),
            index.type_name()
        ))
    })
}

/// `value[index]`
pub(crate) fn get_index(value: &Value, index: &Value) -> Result<Value> {
    match value {
        Value::Str(s) => {
            let i = index_of(index, value)?;
            let len = value::char_len(s);
            let pos = value::resolve_index(len, i).ok_or_else(|| error::index_out_of_range("string", i, len))?;
            Ok(Value::from(value::char_slice(s, pos, pos + 1)))
        }
        Value::List(items) => {
            let i = index_of(index, value)?;
            let pos = value::resolve_index(items.len(), i)
                .ok_or_else(|| error::index_out_of_range("list", i, items.len()))?;
            Ok(items[pos].clone())
        }
        Value::Range { start, step, .. } => {
            let i = index_of(index, value)?;
            let len = value::range_len(value).ok_or_else(error::overflow)?;
            let pos = value::resolve_index(len, i).ok_or_else(|| error::index_out_of_range("range object", i, len))?;
            let item = *start as i128 + *step as i128 * pos as i128;
            i64::try_from(item).map(Value::Int).map_err(|_| error::overflow())
        }
        other => Err(error::type_mismatch(format!(
            "'{}' object is not subscriptable",
            other.type_name()
        ))),
    }
}

fn bound(value: Option<Value>) -> Result<Option<i64>> {
    match value {
        None | Some(Value::None) => Ok(None),
        Some(v) => v.as_int().map(Some).ok_or_else(|| {
            error::type_mismatch(format!(
                "slice indices must be integers or None, not {}",
                v.type_name()
            ))
        }),
    }
}

/// `value[start:end]`
pub(crate) fn get_slice(value: &Value, start: Option<Value>, end: Option<Value>) -> Result<Value> {
    let start = bound(start)?;
    let end = bound(end)?;
    match value {
        Value::Str(s) => {
            let (from, to) = value::slice_bounds(value::char_len(s), start, end);
            Ok(Value::from(value::char_slice(s, from, to)))
        }
        Value::List(items) => {
            let (from, to) = value::slice_bounds(items.len(), start, end);
            Ok(Value::list(items[from..to].to_vec()))
        }
        other => Err(error::type_mismatch(format!(
            "'{}' object is not sliceable",
            other.type_name()
        ))),
    }
}

/// Materialize an iterable into its items
pub(crate) fn to_items(value: &Value, max_len: usize) -> Result<Vec<Value>> {
    match value {
        Value::List(items) => Ok(items.as_ref().clone()),
        Value::Str(s) => {
            check_len(value::char_len(s), max_len)?;
            Ok(s.chars().map(|c| Value::from(c.to_string())).collect())
        }
        Value::Range { .. } => {
            let len = value::range_len(value).unwrap_or(usize::MAX);
            check_len(len, max_len)?;
            Ok(IterState::new(value.clone())?.collect())
        }
        other => Err(not_iterable(other)),
    }
}

fn not_iterable(value: &Value) -> crate::error::Error {
    error::type_mismatch(format!("'{}' object is not iterable", value.type_name()))
}

/// A live iterator on the interpreter's iterator stack
#[derive(Debug, Clone)]
pub(crate) enum IterState {
    Range { next: i64, stop: i64, step: i64 },
    Items { items: Arc<Vec<Value>>, pos: usize },
    Chars { text: Arc<str>, pos: usize },
}

impl IterState {
    pub(crate) fn new(value: Value) -> Result<Self> {
        match value {
            Value::Range { start, stop, step } => Ok(IterState::Range {
                next: start,
                stop,
                step,
            }),
            Value::List(items) => Ok(IterState::Items { items, pos: 0 }),
            Value::Str(text) => Ok(IterState::Chars { text, pos: 0 }),
            other => Err(not_iterable(&other)),
        }
    }
}

impl Iterator for IterState {
    type Item = Value;

    fn next(&mut self) -> Option<Value> {
        match self {
            IterState::Range { next, stop, step } => {
                let more = if *step > 0 { *next < *stop } else { *next > *stop };
                if !more {
                    return None;
                }
                let current = *next;
                *next = current.checked_add(*step).unwrap_or(*stop);
                Some(Value::Int(current))
            }
            IterState::Items { items, pos } => {
                let item = items.get(*pos)?.clone();
                *pos += 1;
                Some(item)
            }
            IterState::Chars { text, pos } => {
                let c = text[*pos..].chars().next()?;
                *pos += c.len_utf8();
                Some(Value::from(c.to_string()))
            }
        }
    }
}
