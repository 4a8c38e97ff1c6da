//! # Sandbox Values
//!
//! The runtime value model of the sandbox language. Strings and lists are
//! reference counted so that loading `document` or passing a fragment
//! around never copies the underlying text.

use serde::{Serialize, Serializer};
use std::fmt;
use std::sync::Arc;

/// A value manipulated by a sandbox program
#[derive(Debug, Clone, Default)]
pub enum Value {
    /// The absent value (`None`); also the initial state of `result`
    #[default]
    None,
    Bool(bool),
    Int(i64),
    Str(Arc<str>),
    List(Arc<Vec<Value>>),
    /// Lazy integer range produced by `range()`
    Range { start: i64, stop: i64, step: i64 },
}

impl Value {
    pub fn str(s: impl Into<Arc<str>>) -> Self {
        Value::Str(s.into())
    }

    pub fn list(items: Vec<Value>) -> Self {
        Value::List(Arc::new(items))
    }

    /// The type name as the program sees it
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "NoneType",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Str(_) => "str",
            Value::List(_) => "list",
            Value::Range { .. } => "range",
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    /// Truthiness used by `if`, `while`, `and`, `or` and `not`
    pub fn truthy(&self) -> bool {
        match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Str(s) => !s.is_empty(),
            Value::List(items) => !items.is_empty(),
            Value::Range { .. } => range_len(self) != Some(0),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Integer view; booleans count as 0/1
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Bool(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    /// Quoted rendering used inside lists and by `repr`-style output
    pub fn repr(&self) -> String {
        match self {
            Value::Str(s) => {
                let mut out = String::with_capacity(s.len() + 2);
                out.push('\'');
                for c in s.chars() {
                    match c {
                        '\\' => out.push_str("\\\\"),
                        '\'' => out.push_str("\\'"),
                        '\n' => out.push_str("\\n"),
                        '\t' => out.push_str("\\t"),
                        '\r' => out.push_str("\\r"),
                        c => out.push(c),
                    }
                }
                out.push('\'');
                out
            }
            other => other.to_string(),
        }
    }

    /// Convert the final `result` binding into the run's answer.
    /// `None` stays absent; strings are returned verbatim.
    pub fn to_answer(&self) -> Option<String> {
        match self {
            Value::None => None,
            Value::Str(s) => Some(s.to_string()),
            other => Some(other.to_string()),
        }
    }

    /// Size used for the value cap: bytes for strings, items for lists
    pub fn size(&self) -> usize {
        match self {
            Value::Str(s) => s.len(),
            Value::List(items) => items.len(),
            _ => 0,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::None, Value::None) => true,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (
                Value::Range { start: a0, stop: a1, step: a2 },
                Value::Range { start: b0, stop: b1, step: b2 },
            ) => a0 == b0 && a1 == b1 && a2 == b2,
            (a, b) => match (a.as_int(), b.as_int()) {
                (Some(x), Some(y)) => x == y,
                _ => false,
            },
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => write!(f, "None"),
            Value::Bool(true) => write!(f, "True"),
            Value::Bool(false) => write!(f, "False"),
            Value::Int(i) => write!(f, "{}", i),
            Value::Str(s) => write!(f, "{}", s),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item.repr())?;
                }
                write!(f, "]")
            }
            Value::Range { start, stop, step } => {
                if *step == 1 {
                    write!(f, "range({}, {})", start, stop)
                } else {
                    write!(f, "range({}, {}, {})", start, stop, step)
                }
            }
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::None => serializer.serialize_none(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Int(i) => serializer.serialize_i64(*i),
            Value::Str(s) => serializer.serialize_str(s),
            Value::List(items) => items.serialize(serializer),
            Value::Range { .. } => serializer.serialize_str(&self.to_string()),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(Arc::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(Arc::from(s))
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

// ============================================================================
// Character-indexed string helpers
// ============================================================================

/// Length in characters (the unit programs index strings by)
pub(crate) fn char_len(s: &str) -> usize {
    if s.is_ascii() {
        s.len()
    } else {
        s.chars().count()
    }
}

fn byte_offset(s: &str, char_idx: usize) -> usize {
    s.char_indices()
        .nth(char_idx)
        .map(|(i, _)| i)
        .unwrap_or(s.len())
}

/// Slice by character positions; callers guarantee `start <= end <= char_len(s)`
pub(crate) fn char_slice(s: &str, start: usize, end: usize) -> &str {
    if s.is_ascii() {
        return &s[start..end];
    }
    let b_start = byte_offset(s, start);
    let b_end = b_start + byte_offset(&s[b_start..], end - start);
    &s[b_start..b_end]
}

/// Convert a byte offset into a character position
pub(crate) fn char_position(s: &str, byte_idx: usize) -> usize {
    if s.is_ascii() {
        byte_idx
    } else {
        s[..byte_idx].chars().count()
    }
}

/// Clamp slice bounds the way Python does (negative indices count from the end)
pub(crate) fn slice_bounds(len: usize, start: Option<i64>, end: Option<i64>) -> (usize, usize) {
    let len = len as i64;
    let clamp = |idx: i64| -> i64 {
        if idx < 0 {
            (idx + len).max(0)
        } else {
            idx.min(len)
        }
    };
    let start = start.map(clamp).unwrap_or(0);
    let end = end.map(clamp).unwrap_or(len).max(start);
    (start as usize, end as usize)
}

/// Resolve a (possibly negative) index, `None` when out of range
pub(crate) fn resolve_index(len: usize, index: i64) -> Option<usize> {
    let len = len as i128;
    let idx = if index < 0 { index as i128 + len } else { index as i128 };
    if (0..len).contains(&idx) {
        Some(idx as usize)
    } else {
        None
    }
}

/// Number of items a range yields; `None` for non-ranges and for
/// ranges too long to count in a `usize`
pub(crate) fn range_len(value: &Value) -> Option<usize> {
    match value {
        Value::Range { start, stop, step } => {
            let (start, stop, step) = (*start as i128, *stop as i128, *step as i128);
            let n = if step > 0 && start < stop {
                (stop - start + step - 1) / step
            } else if step < 0 && start > stop {
                (start - stop - step - 1) / (-step)
            } else {
                0
            };
            usize::try_from(n).ok()
        }
        _ => None,
    }
}
