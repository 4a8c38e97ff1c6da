//! Language intrinsics and string/list methods

use crate::error::{self, Result};
use crate::opcode::{Builtin, CompareOp, Method};
use crate::ops;
use crate::value::{self, Value};
use std::cmp::Ordering;

/// Call an intrinsic. Arity was checked at compile time.
pub(crate) fn call_builtin(builtin: Builtin, mut args: Vec<Value>, max_len: usize) -> Result<Value> {
    let name = builtin.name();
    match builtin {
        Builtin::Len => {
            let arg = single(&mut args, name)?;
            let len = match &arg {
                Value::Str(s) => value::char_len(s),
                Value::List(items) => items.len(),
                Value::Range { .. } => value::range_len(&arg).ok_or_else(error::overflow)?,
                other => {
                    return Err(error::type_mismatch(format!(
                        "object of type '{}' has no len()",
                        other.type_name()
                    )));
                }
            };
            let len = i64::try_from(len).map_err(|_| error::overflow())?;
            Ok(Value::Int(len))
        }
        Builtin::Range => {
            let ints = args
                .iter()
                .map(|a| {
                    a.as_int().ok_or_else(|| {
                        error::type_mismatch(format!(
                            "'{}' object cannot be interpreted as an integer",
                            a.type_name()
                        ))
                    })
                })
                .collect::<Result<Vec<i64>>>()?;
            let (start, stop, step) = match ints.as_slice() {
                [stop] => (0, *stop, 1),
                [start, stop] => (*start, *stop, 1),
                [start, stop, step] => (*start, *stop, *step),
                _ => return Err(error::arity(name, "1 to 3", ints.len())),
            };
            if step == 0 {
                return Err(error::invalid_argument("range() arg 3 must not be zero"));
            }
            Ok(Value::Range { start, stop, step })
        }
        Builtin::Str => match args.pop() {
            None => Ok(Value::from("")),
            Some(v @ Value::Str(_)) => Ok(v),
            Some(v) => {
                let text = v.to_string();
                check_len(text.len(), max_len)?;
                Ok(Value::from(text))
            }
        },
        Builtin::Int => match args.pop() {
            None => Ok(Value::Int(0)),
            Some(Value::Str(s)) => parse_int(&s).map(Value::Int),
            Some(v) => v.as_int().map(Value::Int).ok_or_else(|| {
                error::type_mismatch(format!(
                    "int() argument must be a string or a number, not '{}'",
                    v.type_name()
                ))
            }),
        },
        Builtin::Bool => Ok(Value::Bool(args.pop().is_some_and(|v| v.truthy()))),
        Builtin::Min | Builtin::Max => {
            let candidates = if args.len() == 1 {
                ops::to_items(&args[0], max_len)?
            } else {
                args
            };
            let wanted = if builtin == Builtin::Min {
                Ordering::Less
            } else {
                Ordering::Greater
            };
            let mut iter = candidates.into_iter();
            let mut best = iter
                .next()
                .ok_or_else(|| error::invalid_argument(format!("{}() arg is an empty sequence", name)))?;
            for candidate in iter {
                if ops::order(&candidate, &best, CompareOp::Lt)? == wanted {
                    best = candidate;
                }
            }
            Ok(best)
        }
        Builtin::Abs => {
            let arg = single(&mut args, name)?;
            match arg.as_int() {
                Some(i) => i.checked_abs().map(Value::Int).ok_or_else(error::overflow),
                None => Err(error::type_mismatch(format!(
                    "bad operand type for abs(): '{}'",
                    arg.type_name()
                ))),
            }
        }
        Builtin::Enumerate => {
            let arg = single(&mut args, name)?;
            let items = ops::to_items(&arg, max_len)?;
            Ok(Value::list(
                items
                    .into_iter()
                    .enumerate()
                    .map(|(i, item)| Value::list(vec![Value::Int(i as i64), item]))
                    .collect(),
            ))
        }
        Builtin::List => match args.pop() {
            None => Ok(Value::list(Vec::new())),
            Some(v) => Ok(Value::list(ops::to_items(&v, max_len)?)),
        },
    }
}

fn single(args: &mut Vec<Value>, name: &str) -> Result<Value> {
    if args.len() != 1 {
        return Err(error::arity(name, "exactly 1", args.len()));
    }
    args.pop().ok_or_else(|| error::arity(name, "exactly 1", 0))
}

fn check_len(len: usize, max_len: usize) -> Result<()> {
    if len > max_len {
        return Err(error::value_too_large(len, max_len));
    }
    Ok(())
}

fn parse_int(text: &str) -> Result<i64> {
    let trimmed = text.trim();
    let digits: String = trimmed.chars().filter(|c| *c != '_').collect();
    let valid = !trimmed.starts_with('_') && !trimmed.ends_with('_') && !trimmed.contains("__");
    match digits.parse::<i64>() {
        Ok(i) if valid => Ok(i),
        _ => Err(error::invalid_argument(format!(
            "invalid literal for int() with base 10: {}",
            Value::from(text).repr()
        ))),
    }
}

fn expect_str<'a>(value: &'a Value, method: &str, position: usize) -> Result<&'a str> {
    value.as_str().ok_or_else(|| {
        error::type_mismatch(format!(
            "{}() argument {} must be str, not {}",
            method,
            position,
            value.type_name()
        ))
    })
}

fn no_attribute(receiver: &Value, method: Method) -> crate::error::Error {
    error::type_mismatch(format!(
        "'{}' object has no attribute '{}'",
        receiver.type_name(),
        method.name()
    ))
}

/// Call a method on a string or list receiver
pub(crate) fn call_method(method: Method, receiver: Value, args: Vec<Value>, max_len: usize) -> Result<Value> {
    let name = method.name();

    if let Value::List(items) = &receiver {
        return match method {
            Method::Count => Ok(Value::Int(items.iter().filter(|v| **v == args[0]).count() as i64)),
            Method::Index => items
                .iter()
                .position(|v| *v == args[0])
                .map(|i| Value::Int(i as i64))
                .ok_or_else(|| error::invalid_argument(format!("{} is not in list", args[0].repr()))),
            _ => Err(no_attribute(&receiver, method)),
        };
    }

    let s = match &receiver {
        Value::Str(s) => s.clone(),
        _ => return Err(no_attribute(&receiver, method)),
    };

    match method {
        Method::Strip | Method::Lstrip | Method::Rstrip => {
            let chars = match args.first() {
                None | Some(Value::None) => None,
                Some(v) => Some(expect_str(v, name, 1)?.to_string()),
            };
            let out = match (method, chars) {
                (Method::Strip, None) => s.trim(),
                (Method::Lstrip, None) => s.trim_start(),
                (_, None) => s.trim_end(),
                (Method::Strip, Some(set)) => s.trim_matches(|c: char| set.contains(c)),
                (Method::Lstrip, Some(set)) => s.trim_start_matches(|c: char| set.contains(c)),
                (_, Some(set)) => s.trim_end_matches(|c: char| set.contains(c)),
            };
            Ok(Value::from(out))
        }
        Method::Lower => Ok(Value::from(s.to_lowercase())),
        Method::Upper => Ok(Value::from(s.to_uppercase())),
        Method::Find | Method::Index => {
            let needle = expect_str(&args[0], name, 1)?;
            match s.find(needle) {
                Some(byte) => Ok(Value::Int(value::char_position(&s, byte) as i64)),
                None if method == Method::Find => Ok(Value::Int(-1)),
                None => Err(error::invalid_argument("substring not found")),
            }
        }
        Method::Startswith | Method::Endswith => {
            let candidates: Vec<&str> = match &args[0] {
                Value::List(items) => items
                    .iter()
                    .map(|v| expect_str(v, name, 1))
                    .collect::<Result<_>>()?,
                other => vec![expect_str(other, name, 1)?],
            };
            let hit = candidates.iter().any(|c| {
                if method == Method::Startswith {
                    s.starts_with(*c)
                } else {
                    s.ends_with(*c)
                }
            });
            Ok(Value::Bool(hit))
        }
        Method::Split => {
            let sep = match args.first() {
                None | Some(Value::None) => None,
                Some(v) => Some(expect_str(v, name, 1)?),
            };
            let maxsplit = match args.get(1) {
                None => -1,
                Some(v) => v.as_int().ok_or_else(|| {
                    error::type_mismatch(format!("split() maxsplit must be int, not {}", v.type_name()))
                })?,
            };
            let parts = match sep {
                Some("") => return Err(error::invalid_argument("empty separator")),
                Some(sep) if maxsplit < 0 => s.split(sep).map(Value::from).collect(),
                Some(sep) => s
                    .splitn(maxsplit as usize + 1, sep)
                    .map(Value::from)
                    .collect(),
                None => split_whitespace(&s, maxsplit),
            };
            Ok(Value::list(parts))
        }
        Method::Splitlines => Ok(Value::list(s.lines().map(Value::from).collect())),
        Method::Replace => {
            let old = expect_str(&args[0], name, 1)?;
            let new = expect_str(&args[1], name, 2)?;
            let count = match args.get(2) {
                None => -1,
                Some(v) => v.as_int().ok_or_else(|| {
                    error::type_mismatch(format!("replace() count must be int, not {}", v.type_name()))
                })?,
            };
            let matches = if old.is_empty() {
                value::char_len(&s) + 1
            } else {
                s.matches(old).count()
            };
            let replaced = if count < 0 { matches } else { matches.min(count as usize) };
            let grown = s.len() + replaced.saturating_mul(new.len());
            check_len(grown.saturating_sub(replaced * old.len()), max_len)?;
            let out = if count < 0 {
                s.replace(old, new)
            } else {
                s.replacen(old, new, count as usize)
            };
            Ok(Value::from(out))
        }
        Method::Count => {
            let needle = expect_str(&args[0], name, 1)?;
            let n = if needle.is_empty() {
                value::char_len(&s) + 1
            } else {
                s.matches(needle).count()
            };
            Ok(Value::Int(n as i64))
        }
        Method::Join => {
            let items = ops::to_items(&args[0], max_len)?;
            let mut parts = Vec::with_capacity(items.len());
            for (i, item) in items.iter().enumerate() {
                match item.as_str() {
                    Some(text) => parts.push(text),
                    None => {
                        return Err(error::type_mismatch(format!(
                            "sequence item {}: expected str instance, {} found",
                            i,
                            item.type_name()
                        )));
                    }
                }
            }
            let total = parts.iter().map(|p| p.len()).sum::<usize>()
                + s.len().saturating_mul(parts.len().saturating_sub(1));
            check_len(total, max_len)?;
            Ok(Value::from(parts.join(&*s)))
        }
        Method::Isdigit => Ok(Value::Bool(!s.is_empty() && s.chars().all(|c| c.is_ascii_digit()))),
    }
}

/// Whitespace split with Python's `maxsplit` semantics
fn split_whitespace(s: &str, maxsplit: i64) -> Vec<Value> {
    let mut parts = Vec::new();
    let mut rest = s.trim_start();
    while !rest.is_empty() {
        if maxsplit >= 0 && parts.len() as i64 == maxsplit {
            parts.push(Value::from(rest));
            break;
        }
        match rest.find(char::is_whitespace) {
            Some(i) => {
                parts.push(Value::from(&rest[..i]));
                rest = rest[i..].trim_start();
            }
            None => {
                parts.push(Value::from(rest));
                break;
            }
        }
    }
    parts
}

#[cfg(test)]
mod tests {
    use super::*;
    use rlm_error::ErrorKind;

    const MAX: usize = 1 << 20;

    fn s(text: &str) -> Value {
        Value::from(text)
    }

    fn strs(items: &[&str]) -> Value {
        Value::list(items.iter().map(|t| s(t)).collect())
    }

    #[test]
    fn test_len_and_range() {
        assert_eq!(call_builtin(Builtin::Len, vec![s("héllo")], MAX).unwrap(), Value::Int(5));
        let r = call_builtin(Builtin::Range, vec![Value::Int(0), Value::Int(10), Value::Int(4)], MAX).unwrap();
        assert_eq!(call_builtin(Builtin::Len, vec![r], MAX).unwrap(), Value::Int(3));

        let err = call_builtin(Builtin::Range, vec![Value::Int(0), Value::Int(1), Value::Int(0)], MAX).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert!(call_builtin(Builtin::Len, vec![Value::Int(3)], MAX).is_err());
    }

    #[test]
    fn test_len_of_huge_range() {
        let full = Value::Range { start: i64::MIN, stop: i64::MAX, step: 1 };
        let err = call_builtin(Builtin::Len, vec![full], MAX).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);

        let half = Value::Range { start: i64::MIN + 1, stop: i64::MAX, step: 2 };
        assert_eq!(call_builtin(Builtin::Len, vec![half], MAX).unwrap(), Value::Int(i64::MAX));
    }

    #[test]
    fn test_conversions() {
        assert_eq!(call_builtin(Builtin::Str, vec![Value::Int(42)], MAX).unwrap(), s("42"));
        assert_eq!(call_builtin(Builtin::Int, vec![s(" 4_000 ")], MAX).unwrap(), Value::Int(4000));
        assert_eq!(call_builtin(Builtin::Int, vec![s("-7")], MAX).unwrap(), Value::Int(-7));
        assert!(call_builtin(Builtin::Int, vec![s("12abc")], MAX).is_err());
        assert_eq!(call_builtin(Builtin::Bool, vec![s("")], MAX).unwrap(), Value::Bool(false));
        assert_eq!(call_builtin(Builtin::List, vec![s("ab")], MAX).unwrap(), strs(&["a", "b"]));
    }

    #[test]
    fn test_min_max_abs() {
        let args = vec![Value::Int(3), Value::Int(-1), Value::Int(2)];
        assert_eq!(call_builtin(Builtin::Min, args.clone(), MAX).unwrap(), Value::Int(-1));
        assert_eq!(call_builtin(Builtin::Max, args, MAX).unwrap(), Value::Int(3));
        assert_eq!(call_builtin(Builtin::Max, vec![strs(&["b", "c", "a"])], MAX).unwrap(), s("c"));
        assert!(call_builtin(Builtin::Min, vec![Value::list(vec![])], MAX).is_err());
        assert_eq!(call_builtin(Builtin::Abs, vec![Value::Int(-5)], MAX).unwrap(), Value::Int(5));
    }

    #[test]
    fn test_enumerate() {
        let out = call_builtin(Builtin::Enumerate, vec![strs(&["x", "y"])], MAX).unwrap();
        assert_eq!(
            out,
            Value::list(vec![
                Value::list(vec![Value::Int(0), s("x")]),
                Value::list(vec![Value::Int(1), s("y")]),
            ])
        );
    }

    #[test]
    fn test_strip_split_join() {
        assert_eq!(call_method(Method::Strip, s("  IMT_2026\n"), vec![], MAX).unwrap(), s("IMT_2026"));
        assert_eq!(call_method(Method::Strip, s("'x'"), vec![s("'\"")], MAX).unwrap(), s("x"));
        assert_eq!(
            call_method(Method::Split, s("SECRET: 123"), vec![s(":")], MAX).unwrap(),
            strs(&["SECRET", " 123"])
        );
        assert_eq!(
            call_method(Method::Split, s("  a b  c "), vec![], MAX).unwrap(),
            strs(&["a", "b", "c"])
        );
        assert_eq!(
            call_method(Method::Split, s("a b  c "), vec![Value::None, Value::Int(1)], MAX).unwrap(),
            strs(&["a", "b  c "])
        );
        assert_eq!(
            call_method(Method::Join, s(", "), vec![strs(&["a", "b"])], MAX).unwrap(),
            s("a, b")
        );
        assert!(call_method(Method::Join, s(","), vec![Value::list(vec![Value::Int(1)])], MAX).is_err());
        assert!(call_method(Method::Split, s("abc"), vec![s("")], MAX).is_err());
    }

    #[test]
    fn test_search_methods() {
        assert_eq!(call_method(Method::Find, s("héllo"), vec![s("l")], MAX).unwrap(), Value::Int(2));
        assert_eq!(call_method(Method::Find, s("abc"), vec![s("z")], MAX).unwrap(), Value::Int(-1));
        assert!(call_method(Method::Index, s("abc"), vec![s("z")], MAX).is_err());
        assert_eq!(call_method(Method::Count, s("aaaa"), vec![s("aa")], MAX).unwrap(), Value::Int(2));
        assert_eq!(
            call_method(Method::Startswith, s("SECRET: 1"), vec![s("SECRET")], MAX).unwrap(),
            Value::Bool(true)
        );
        assert_eq!(
            call_method(Method::Endswith, s("file.txt"), vec![strs(&[".md", ".txt"])], MAX).unwrap(),
            Value::Bool(true)
        );
        assert_eq!(call_method(Method::Isdigit, s("2026"), vec![], MAX).unwrap(), Value::Bool(true));
        assert_eq!(call_method(Method::Isdigit, s(""), vec![], MAX).unwrap(), Value::Bool(false));
    }

    #[test]
    fn test_replace_and_lines() {
        assert_eq!(
            call_method(Method::Replace, s("a-b-c"), vec![s("-"), s("+"), Value::Int(1)], MAX).unwrap(),
            s("a+b-c")
        );
        assert_eq!(
            call_method(Method::Splitlines, s("one\r\ntwo\nthree\n"), vec![], MAX).unwrap(),
            strs(&["one", "two", "three"])
        );
        let err = call_method(Method::Replace, s("aaaa"), vec![s("a"), s(&"b".repeat(1000))], 2000).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValueTooLarge);
    }

    #[test]
    fn test_list_methods_and_wrong_receivers() {
        let list = Value::list(vec![Value::Int(1), Value::Int(2), Value::Int(1)]);
        assert_eq!(call_method(Method::Count, list.clone(), vec![Value::Int(1)], MAX).unwrap(), Value::Int(2));
        assert_eq!(call_method(Method::Index, list.clone(), vec![Value::Int(2)], MAX).unwrap(), Value::Int(1));
        assert!(call_method(Method::Index, list.clone(), vec![Value::Int(9)], MAX).is_err());

        let err = call_method(Method::Strip, list, vec![], MAX).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TypeMismatch);
        assert!(err.message().contains("'list' object has no attribute 'strip'"));
        assert!(call_method(Method::Lower, Value::Int(1), vec![], MAX).is_err());
    }
}
