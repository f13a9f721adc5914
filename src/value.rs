//! Operations on context values.
//!
//! Templates work on [`serde_json::Value`]. This module gives those values the
//! behaviour the expression language needs: truthiness, how a value is written to
//! the output, arithmetic, comparison, membership, indexing and iteration.

use crate::error::EvalError;
use crate::parser::BinaryOp;
use serde_json::Value;
use std::cmp::Ordering;

/// Longest string, in bytes, that repeating a string with `*` may produce.
pub const MAX_REPEAT_LEN: usize = 16 * 1024 * 1024;

/// Whether a value counts as true in `if`, `and`, `or` and `not`.
///
/// `null`, `false`, zero, the empty string, the empty list and the empty object
/// are false; everything else is true.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

/// The text a value contributes to the rendered output.
pub fn to_output_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(n) if n.is_f64() => "float",
        Value::Number(_) => "int",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "dict",
    }
}

#[derive(Debug, Clone, Copy)]
enum Num {
    Int(i64),
    Float(f64),
}

impl Num {
    fn of(value: &Value) -> Option<Num> {
        match value {
            Value::Number(n) => match n.as_i64() {
                Some(i) => Some(Num::Int(i)),
                None => n.as_f64().map(Num::Float),
            },
            Value::Bool(b) => Some(Num::Int(*b as i64)),
            _ => None,
        }
    }

    fn as_f64(self) -> f64 {
        match self {
            Num::Int(i) => i as f64,
            Num::Float(f) => f,
        }
    }
}

fn overflow(op: &str) -> EvalError {
    EvalError::invalid(format!("integer overflow in `{op}`"))
}

fn unsupported(op: &str, left: &Value, right: &Value) -> EvalError {
    EvalError::invalid(format!(
        "unsupported operand types for `{op}`: {} and {}",
        type_name(left),
        type_name(right)
    ))
}

fn arithmetic(op: BinaryOp, left: &Value, right: &Value) -> Result<Value, EvalError> {
    let symbol = match op {
        BinaryOp::Add => "+",
        BinaryOp::Sub => "-",
        BinaryOp::Mul => "*",
        BinaryOp::Div => "/",
        _ => "%",
    };
    let (Some(a), Some(b)) = (Num::of(left), Num::of(right)) else {
        return Err(unsupported(symbol, left, right));
    };

    match (op, a, b) {
        (BinaryOp::Div | BinaryOp::Rem, _, b) if b.as_f64() == 0.0 => {
            Err(EvalError::invalid("division by zero"))
        }
        (BinaryOp::Add, Num::Int(x), Num::Int(y)) => {
            x.checked_add(y).map(Value::from).ok_or_else(|| overflow(symbol))
        }
        (BinaryOp::Sub, Num::Int(x), Num::Int(y)) => {
            x.checked_sub(y).map(Value::from).ok_or_else(|| overflow(symbol))
        }
        (BinaryOp::Mul, Num::Int(x), Num::Int(y)) => {
            x.checked_mul(y).map(Value::from).ok_or_else(|| overflow(symbol))
        }
        // exact integer division stays an integer, anything else becomes a float
        (BinaryOp::Div, Num::Int(x), Num::Int(y)) if x.checked_rem(y) == Some(0) => {
            x.checked_div(y).map(Value::from).ok_or_else(|| overflow(symbol))
        }
        (BinaryOp::Rem, Num::Int(x), Num::Int(y)) => {
            x.checked_rem_euclid(y).map(Value::from).ok_or_else(|| overflow(symbol))
        }
        (op, a, b) => {
            let (x, y) = (a.as_f64(), b.as_f64());
            let result = match op {
                BinaryOp::Add => x + y,
                BinaryOp::Sub => x - y,
                BinaryOp::Mul => x * y,
                BinaryOp::Div => x / y,
                _ => x.rem_euclid(y),
            };
            if !result.is_finite() {
                return Err(EvalError::invalid(format!("float overflow in `{symbol}`")));
            }
            Ok(Value::from(result))
        }
    }
}

/// Structural equality, except that numbers compare by value across int and float.
pub fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(_), Value::Number(_)) => match (Num::of(left), Num::of(right)) {
            (Some(Num::Int(a)), Some(Num::Int(b))) => a == b,
            (Some(a), Some(b)) => a.as_f64() == b.as_f64(),
            _ => false,
        },
        (Value::Array(a), Value::Array(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| values_equal(x, y))
        }
        _ => left == right,
    }
}

fn compare(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Array(a), Value::Array(b)) => {
            for (x, y) in a.iter().zip(b) {
                match compare(x, y)? {
                    Ordering::Equal => continue,
                    other => return Some(other),
                }
            }
            Some(a.len().cmp(&b.len()))
        }
        _ => match (Num::of(left), Num::of(right)) {
            (Some(Num::Int(a)), Some(Num::Int(b))) => Some(a.cmp(&b)),
            (Some(a), Some(b)) => a.as_f64().partial_cmp(&b.as_f64()),
            _ => None,
        },
    }
}

/// `needle in haystack`
pub fn contains(haystack: &Value, needle: &Value) -> Result<bool, EvalError> {
    match haystack {
        Value::String(s) => match needle {
            Value::String(n) => Ok(s.contains(n.as_str())),
            other => Err(EvalError::invalid(format!(
                "`in <string>` requires a string on the left, not {}",
                type_name(other)
            ))),
        },
        Value::Array(items) => Ok(items.iter().any(|item| values_equal(item, needle))),
        Value::Object(map) => Ok(needle.as_str().is_some_and(|key| map.contains_key(key))),
        other => Err(EvalError::invalid(format!(
            "argument of type {} is not a container",
            type_name(other)
        ))),
    }
}

/// Apply a non-short-circuiting binary operator.
pub fn binary(op: BinaryOp, left: &Value, right: &Value) -> Result<Value, EvalError> {
    match op {
        BinaryOp::Add => match (left, right) {
            (Value::String(a), Value::String(b)) => Ok(Value::String(format!("{a}{b}"))),
            (Value::Array(a), Value::Array(b)) => {
                Ok(Value::Array(a.iter().chain(b).cloned().collect()))
            }
            _ => arithmetic(op, left, right),
        },
        BinaryOp::Mul => match (left, right) {
            (Value::String(s), Value::Number(n)) | (Value::Number(n), Value::String(s)) => {
                let times = n
                    .as_u64()
                    .ok_or_else(|| EvalError::invalid("a string can only be repeated a non-negative integer number of times"))?;
                let times = usize::try_from(times)
                    .ok()
                    .filter(|times| {
                        s.len()
                            .checked_mul(*times)
                            .is_some_and(|len| len <= MAX_REPEAT_LEN)
                    })
                    .ok_or_else(|| {
                        EvalError::invalid(format!(
                            "repeated string would exceed {MAX_REPEAT_LEN} bytes"
                        ))
                    })?;
                Ok(Value::String(s.repeat(times)))
            }
            _ => arithmetic(op, left, right),
        },
        BinaryOp::Sub | BinaryOp::Div | BinaryOp::Rem => arithmetic(op, left, right),
        BinaryOp::Eq => Ok(Value::Bool(values_equal(left, right))),
        BinaryOp::NotEq => Ok(Value::Bool(!values_equal(left, right))),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ordering = compare(left, right).ok_or_else(|| {
                EvalError::invalid(format!(
                    "cannot compare {} with {}",
                    type_name(left),
                    type_name(right)
                ))
            })?;
            let result = match op {
                BinaryOp::Lt => ordering == Ordering::Less,
                BinaryOp::Le => ordering != Ordering::Greater,
                BinaryOp::Gt => ordering == Ordering::Greater,
                _ => ordering != Ordering::Less,
            };
            Ok(Value::Bool(result))
        }
        BinaryOp::In => contains(right, left).map(Value::Bool),
        BinaryOp::NotIn => contains(right, left).map(|found| Value::Bool(!found)),
    }
}

pub fn negate(value: &Value) -> Result<Value, EvalError> {
    match Num::of(value) {
        Some(Num::Int(i)) => i.checked_neg().map(Value::from).ok_or_else(|| overflow("-")),
        Some(Num::Float(f)) => Ok(Value::from(-f)),
        None => Err(EvalError::invalid(format!(
            "bad operand type for unary `-`: {}",
            type_name(value)
        ))),
    }
}

/// `object.member`: a missing key yields null.
pub fn member(object: &Value, name: &str) -> Result<Value, EvalError> {
    match object {
        Value::Object(map) => Ok(map.get(name).cloned().unwrap_or(Value::Null)),
        other => Err(EvalError::invalid(format!(
            "{} has no member `{name}`",
            type_name(other)
        ))),
    }
}

fn resolve_position(index: i64, len: usize) -> Option<usize> {
    let len = i64::try_from(len).ok()?;
    let resolved = if index < 0 { len + index } else { index };
    (0..len).contains(&resolved).then_some(resolved as usize)
}

/// `object[index]`: lists and strings by (possibly negative) position, dicts by key.
pub fn index(object: &Value, index: &Value) -> Result<Value, EvalError> {
    match (object, index) {
        (Value::Object(map), Value::String(key)) => {
            Ok(map.get(key).cloned().unwrap_or(Value::Null))
        }
        (Value::Array(items), Value::Number(n)) => n
            .as_i64()
            .and_then(|i| resolve_position(i, items.len()))
            .map(|i| items[i].clone())
            .ok_or_else(|| EvalError::invalid(format!("list index {n} out of range"))),
        (Value::String(s), Value::Number(n)) => {
            let chars: Vec<char> = s.chars().collect();
            n.as_i64()
                .and_then(|i| resolve_position(i, chars.len()))
                .map(|i| Value::String(chars[i].to_string()))
                .ok_or_else(|| EvalError::invalid(format!("string index {n} out of range")))
        }
        (object, index) => Err(EvalError::invalid(format!(
            "{} cannot be indexed by {}",
            type_name(object),
            type_name(index)
        ))),
    }
}

/// The sequence a `for` loop walks over.
pub fn iterate(value: &Value) -> Result<Vec<Value>, EvalError> {
    match value {
        Value::Null => Ok(Vec::new()),
        Value::Array(items) => Ok(items.clone()),
        Value::Object(map) => Ok(map.keys().cloned().map(Value::String).collect()),
        Value::String(s) => Ok(s.chars().map(|c| Value::String(c.to_string())).collect()),
        other => Err(EvalError::invalid(format!(
            "{} is not iterable",
            type_name(other)
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn eval(op: BinaryOp, a: Value, b: Value) -> Value {
        binary(op, &a, &b).unwrap()
    }

    #[test]
    fn test_truthiness() {
        for falsy in [json!(null), json!(false), json!(0), json!(0.0), json!(""), json!([]), json!({})] {
            assert!(!is_truthy(&falsy), "{falsy} should be false");
        }
        for truthy in [json!(true), json!(-1), json!(0.5), json!(" "), json!([0]), json!({"a": null})] {
            assert!(is_truthy(&truthy), "{truthy} should be true");
        }
    }

    #[test]
    fn test_output_strings() {
        assert_eq!(to_output_string(&json!("bob")), "bob");
        assert_eq!(to_output_string(&json!(3)), "3");
        assert_eq!(to_output_string(&json!(2.5)), "2.5");
        assert_eq!(to_output_string(&json!(true)), "true");
        assert_eq!(to_output_string(&json!(null)), "");
        assert_eq!(to_output_string(&json!([1, "a"])), r#"[1,"a"]"#);
    }

    #[test]
    fn test_arithmetic() {
        assert_eq!(eval(BinaryOp::Add, json!(1), json!(2)), json!(3));
        assert_eq!(eval(BinaryOp::Add, json!(1), json!(0.5)), json!(1.5));
        assert_eq!(eval(BinaryOp::Sub, json!(1), json!(3)), json!(-2));
        assert_eq!(eval(BinaryOp::Div, json!(6), json!(3)), json!(2));
        assert_eq!(eval(BinaryOp::Div, json!(7), json!(2)), json!(3.5));
        assert_eq!(eval(BinaryOp::Rem, json!(-1), json!(3)), json!(2));
        assert_eq!(eval(BinaryOp::Mul, json!("ab"), json!(3)), json!("ababab"));
    }

    #[test]
    fn test_string_repeat_is_bounded() {
        assert!(matches!(
            binary(BinaryOp::Mul, &json!("ab"), &json!(i64::MAX)),
            Err(EvalError::Invalid(_))
        ));
        assert!(matches!(
            binary(BinaryOp::Mul, &json!(MAX_REPEAT_LEN), &json!("xy")),
            Err(EvalError::Invalid(_))
        ));
        assert_eq!(
            eval(BinaryOp::Mul, json!("x"), json!(MAX_REPEAT_LEN))
                .as_str()
                .map(str::len),
            Some(MAX_REPEAT_LEN)
        );
        assert_eq!(eval(BinaryOp::Mul, json!(""), json!(i64::MAX)), json!(""));
        assert!(binary(BinaryOp::Mul, &json!("ab"), &json!(-1)).is_err());
    }

    #[test]
    fn test_float_overflow_is_an_error() {
        assert!(matches!(
            binary(BinaryOp::Mul, &json!(1e308), &json!(10.0)),
            Err(EvalError::Invalid(ref m)) if m.contains("float overflow")
        ));
        assert!(matches!(
            binary(BinaryOp::Add, &json!(f64::MAX), &json!(f64::MAX)),
            Err(EvalError::Invalid(_))
        ));
        assert_eq!(eval(BinaryOp::Mul, json!(1e300), json!(2)), json!(2e300));
    }

    #[test]
    fn test_concatenation() {
        assert_eq!(eval(BinaryOp::Add, json!("a"), json!("b")), json!("ab"));
        assert_eq!(eval(BinaryOp::Add, json!([1]), json!([2])), json!([1, 2]));
    }

    #[test]
    fn test_arithmetic_errors() {
        assert!(matches!(
            binary(BinaryOp::Div, &json!(1), &json!(0)),
            Err(EvalError::Invalid(_))
        ));
        assert!(matches!(
            binary(BinaryOp::Add, &json!("a"), &json!(1)),
            Err(EvalError::Invalid(_))
        ));
        assert!(matches!(
            binary(BinaryOp::Add, &json!(i64::MAX), &json!(1)),
            Err(EvalError::Invalid(_))
        ));
    }

    #[test]
    fn test_comparisons() {
        assert_eq!(eval(BinaryOp::Eq, json!(1), json!(1.0)), json!(true));
        assert_eq!(eval(BinaryOp::NotEq, json!("a"), json!("b")), json!(true));
        assert_eq!(eval(BinaryOp::Lt, json!(1), json!(1.5)), json!(true));
        assert_eq!(eval(BinaryOp::Ge, json!("b"), json!("a")), json!(true));
        assert!(binary(BinaryOp::Lt, &json!("a"), &json!(1)).is_err());
    }

    #[test]
    fn test_membership() {
        assert_eq!(eval(BinaryOp::In, json!("ell"), json!("hello")), json!(true));
        assert_eq!(eval(BinaryOp::In, json!(2), json!([1, 2.0])), json!(true));
        assert_eq!(eval(BinaryOp::NotIn, json!("k"), json!({"k": 1})), json!(false));
        assert!(binary(BinaryOp::In, &json!(1), &json!(5)).is_err());
    }

    #[test]
    fn test_member_and_index() {
        let user = json!({"name": "bob", "tags": ["a", "b"]});
        assert_eq!(member(&user, "name").unwrap(), json!("bob"));
        assert_eq!(member(&user, "missing").unwrap(), json!(null));
        assert!(member(&json!(1), "name").is_err());

        assert_eq!(index(&json!(["a", "b"]), &json!(-1)).unwrap(), json!("b"));
        assert_eq!(index(&json!("héllo"), &json!(1)).unwrap(), json!("é"));
        assert_eq!(index(&user, &json!("name")).unwrap(), json!("bob"));
        assert!(index(&json!([1]), &json!(1)).is_err());
        assert!(index(&json!([1]), &json!("x")).is_err());
    }

    #[test]
    fn test_iteration() {
        assert_eq!(iterate(&json!([1, 2])).unwrap(), vec![json!(1), json!(2)]);
        assert_eq!(iterate(&json!("ab")).unwrap(), vec![json!("a"), json!("b")]);
        assert_eq!(iterate(&json!({"k": 1})).unwrap(), vec![json!("k")]);
        assert!(iterate(&json!(null)).unwrap().is_empty());
        assert!(iterate(&json!(3)).is_err());
    }

    #[test]
    fn test_negate() {
        assert_eq!(negate(&json!(2)).unwrap(), json!(-2));
        assert_eq!(negate(&json!(0.5)).unwrap(), json!(-0.5));
        assert!(negate(&json!("x")).is_err());
    }
}
