//! Value-level semantics shared by the interpreter and builtins: ordering,
//! arithmetic, indexing and conversions.

use std::cmp::Ordering;

use serde_json::{Map, Number, Value};

use super::ast::{ArithOp, CmpOp};

/// Builds a number value, preferring an integer representation when the
/// result is integral. Non-finite results become `null`.
pub fn num(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 {
        return Value::Number(Number::from(n as i64));
    }
    Number::from_f64(n).map(Value::Number).unwrap_or(Value::Null)
}

pub fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        _ => None,
    }
}

pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Deepest nesting a filter may build. Comparing, serializing and dropping
/// values all recurse once per level.
pub const MAX_VALUE_DEPTH: usize = 512;

/// Whether `value` nests deeper than `limit` levels. Scalars are depth 0.
pub fn exceeds_depth(value: &Value, limit: usize) -> bool {
    let mut pending = vec![(value, 0usize)];
    while let Some((current, depth)) = pending.pop() {
        let children: Box<dyn Iterator<Item = &Value>> = match current {
            Value::Array(items) => Box::new(items.iter()),
            Value::Object(map) => Box::new(map.values()),
            _ => continue,
        };
        if depth + 1 > limit {
            return true;
        }
        pending.extend(children.map(|child| (child, depth + 1)));
    }
    false
}

/// Passes `value` through unless it nests deeper than [`MAX_VALUE_DEPTH`].
pub fn guard_depth(value: Value) -> Result<Value, String> {
    if exceeds_depth(&value, MAX_VALUE_DEPTH) {
        return Err(format!("value nested deeper than {MAX_VALUE_DEPTH} levels"));
    }
    Ok(value)
}

pub fn truthy(value: &Value) -> bool {
    !matches!(value, Value::Null | Value::Bool(false))
}

pub fn to_json(value: &Value) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "null".to_string())
}

/// `tostring` semantics: strings pass through, everything else is encoded.
pub fn to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => to_json(other),
    }
}

/// Short rendering used inside error messages, e.g. `number (42)`.
pub fn describe(value: &Value) -> String {
    let mut json = to_json(value);
    if json.len() > 40 {
        let mut cut = 37;
        while !json.is_char_boundary(cut) {
            cut -= 1;
        }
        json.truncate(cut);
        json.push_str("...");
    }
    format!("{} ({})", type_name(value), json)
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(false) => 1,
        Value::Bool(true) => 2,
        Value::Number(_) => 3,
        Value::String(_) => 4,
        Value::Array(_) => 5,
        Value::Object(_) => 6,
    }
}

pub fn sorted_keys(map: &Map<String, Value>) -> Vec<&String> {
    let mut keys: Vec<&String> = map.keys().collect();
    keys.sort();
    keys
}

/// Total order: null < false < true < numbers < strings < arrays < objects.
/// Objects compare their sorted key sets first, then values key by key.
pub fn compare(a: &Value, b: &Value) -> Ordering {
    let (ra, rb) = (type_rank(a), type_rank(b));
    if ra != rb {
        return ra.cmp(&rb);
    }
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            let x = x.as_f64().unwrap_or(f64::NAN);
            let y = y.as_f64().unwrap_or(f64::NAN);
            x.partial_cmp(&y).unwrap_or_else(|| {
                // NaN sorts below every other number
                y.is_nan().cmp(&x.is_nan()).then(Ordering::Less)
            })
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => {
            for (l, r) in x.iter().zip(y.iter()) {
                let ord = compare(l, r);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        (Value::Object(x), Value::Object(y)) => {
            let kx = sorted_keys(x);
            let ky = sorted_keys(y);
            let ord = kx.cmp(&ky);
            if ord != Ordering::Equal {
                return ord;
            }
            for key in kx {
                let ord = compare(&x[key.as_str()], &y[key.as_str()]);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            Ordering::Equal
        }
        _ => Ordering::Equal,
    }
}

pub fn equals(a: &Value, b: &Value) -> bool {
    compare(a, b) == Ordering::Equal
}

pub fn compare_op(op: CmpOp, a: &Value, b: &Value) -> bool {
    let ord = compare(a, b);
    match op {
        CmpOp::Eq => ord == Ordering::Equal,
        CmpOp::Ne => ord != Ordering::Equal,
        CmpOp::Lt => ord == Ordering::Less,
        CmpOp::Le => ord != Ordering::Greater,
        CmpOp::Gt => ord == Ordering::Greater,
        CmpOp::Ge => ord != Ordering::Less,
    }
}

pub fn arith(op: ArithOp, lhs: Value, rhs: Value) -> Result<Value, String> {
    match op {
        ArithOp::Add => add(lhs, rhs),
        ArithOp::Sub => subtract(lhs, rhs),
        ArithOp::Mul => multiply(lhs, rhs),
        ArithOp::Div => divide(lhs, rhs),
        ArithOp::Mod => modulo(lhs, rhs),
    }
}

pub fn add(lhs: Value, rhs: Value) -> Result<Value, String> {
    match (lhs, rhs) {
        (Value::Null, v) | (v, Value::Null) => Ok(v),
        (Value::Number(a), Value::Number(b)) => Ok(num(
            a.as_f64().unwrap_or(f64::NAN) + b.as_f64().unwrap_or(f64::NAN),
        )),
        (Value::String(mut a), Value::String(b)) => {
            a.push_str(&b);
            Ok(Value::String(a))
        }
        (Value::Array(mut a), Value::Array(b)) => {
            a.extend(b);
            Ok(Value::Array(a))
        }
        (Value::Object(mut a), Value::Object(b)) => {
            a.extend(b);
            Ok(Value::Object(a))
        }
        (a, b) => Err(format!(
            "{} and {} cannot be added",
            describe(&a),
            describe(&b)
        )),
    }
}

fn subtract(lhs: Value, rhs: Value) -> Result<Value, String> {
    match (lhs, rhs) {
        (Value::Number(a), Value::Number(b)) => Ok(num(
            a.as_f64().unwrap_or(f64::NAN) - b.as_f64().unwrap_or(f64::NAN),
        )),
        (Value::Array(a), Value::Array(b)) => Ok(Value::Array(
            a.into_iter()
                .filter(|item| !b.iter().any(|r| equals(item, r)))
                .collect(),
        )),
        (a, b) => Err(format!(
            "{} and {} cannot be subtracted",
            describe(&a),
            describe(&b)
        )),
    }
}

/// Longest string `*` may build, in bytes.
pub const MAX_REPEAT_BYTES: usize = 0x1000_0000;

fn repeat_string(s: &str, times: f64) -> Result<Value, String> {
    if times.is_nan() || times <= 0.0 {
        return Ok(Value::Null);
    }
    let too_long = || "repeat string result too long".to_string();
    if times >= MAX_REPEAT_BYTES as f64 && !s.is_empty() {
        return Err(too_long());
    }
    let count = if times < 1.0 { 1 } else { times.min(MAX_REPEAT_BYTES as f64) as usize };
    match s.len().checked_mul(count) {
        Some(len) if len <= MAX_REPEAT_BYTES => Ok(Value::String(s.repeat(count))),
        _ => Err(too_long()),
    }
}

fn deep_merge(mut base: Map<String, Value>, overlay: Map<String, Value>) -> Map<String, Value> {
    for (key, value) in overlay {
        let merged = match (base.remove(&key), value) {
            (Some(Value::Object(a)), Value::Object(b)) => Value::Object(deep_merge(a, b)),
            (_, v) => v,
        };
        base.insert(key, merged);
    }
    base
}

fn multiply(lhs: Value, rhs: Value) -> Result<Value, String> {
    match (lhs, rhs) {
        (Value::Number(a), Value::Number(b)) => Ok(num(
            a.as_f64().unwrap_or(f64::NAN) * b.as_f64().unwrap_or(f64::NAN),
        )),
        (Value::String(s), Value::Number(n)) | (Value::Number(n), Value::String(s)) => {
            repeat_string(&s, n.as_f64().unwrap_or(0.0))
        }
        (Value::Object(a), Value::Object(b)) => Ok(Value::Object(deep_merge(a, b))),
        (a, b) => Err(format!(
            "{} and {} cannot be multiplied",
            describe(&a),
            describe(&b)
        )),
    }
}

fn divide(lhs: Value, rhs: Value) -> Result<Value, String> {
    match (lhs, rhs) {
        (Value::Number(a), Value::Number(b)) => {
            let divisor = b.as_f64().unwrap_or(f64::NAN);
            if divisor == 0.0 {
                return Err(format!(
                    "{} and {} cannot be divided because the divisor is zero",
                    describe(&Value::Number(a)),
                    describe(&Value::Number(b))
                ));
            }
            Ok(num(a.as_f64().unwrap_or(f64::NAN) / divisor))
        }
        (Value::String(a), Value::String(b)) => Ok(split_string(&a, &b)),
        (a, b) => Err(format!(
            "{} and {} cannot be divided",
            describe(&a),
            describe(&b)
        )),
    }
}

fn modulo(lhs: Value, rhs: Value) -> Result<Value, String> {
    match (&lhs, &rhs) {
        (Value::Number(a), Value::Number(b)) => {
            let a = a.as_f64().unwrap_or(f64::NAN);
            let b = b.as_f64().unwrap_or(f64::NAN);
            if a.is_nan() || b.is_nan() {
                return Ok(Value::Null);
            }
            let divisor = b.trunc() as i64;
            if divisor == 0 {
                return Err(format!(
                    "{} and {} cannot be divided because the divisor is zero",
                    describe(&lhs),
                    describe(&rhs)
                ));
            }
            let dividend = a.trunc() as i64;
            Ok(Value::from(dividend.wrapping_rem(divisor.wrapping_abs())))
        }
        _ => Err(format!(
            "{} and {} cannot be divided",
            describe(&lhs),
            describe(&rhs)
        )),
    }
}

pub fn negate(value: Value) -> Result<Value, String> {
    match value {
        Value::Number(n) => Ok(num(-n.as_f64().unwrap_or(f64::NAN))),
        other => Err(format!("{} cannot be negated", describe(&other))),
    }
}

pub fn split_string(s: &str, sep: &str) -> Value {
    if s.is_empty() {
        return Value::Array(Vec::new());
    }
    let parts: Vec<Value> = if sep.is_empty() {
        s.chars().map(|c| Value::String(c.to_string())).collect()
    } else {
        s.split(sep).map(|p| Value::String(p.to_string())).collect()
    };
    Value::Array(parts)
}

/// Resolves a possibly negative, possibly fractional array index.
fn array_position(len: usize, index: f64) -> Option<usize> {
    let index = index.floor();
    let resolved = if index < 0.0 { len as f64 + index } else { index };
    if resolved < 0.0 || resolved >= len as f64 {
        None
    } else {
        Some(resolved as usize)
    }
}

pub fn index(target: &Value, key: &Value) -> Result<Value, String> {
    match (target, key) {
        (Value::Null, Value::String(_) | Value::Number(_) | Value::Null) => Ok(Value::Null),
        (Value::Object(map), Value::String(k)) => Ok(map.get(k).cloned().unwrap_or(Value::Null)),
        (Value::Array(items), Value::Number(n)) => {
            let position = array_position(items.len(), n.as_f64().unwrap_or(f64::NAN));
            Ok(position
                .and_then(|p| items.get(p).cloned())
                .unwrap_or(Value::Null))
        }
        (Value::Array(items), Value::Array(needle)) => Ok(subsequence_indices(items, needle)),
        (Value::Object(_), k) => Err(format!("Cannot index object with {}", type_name(k))),
        (Value::Array(_), k) => Err(format!("Cannot index array with {}", type_name(k))),
        (t, Value::String(k)) => Err(format!(
            "Cannot index {} with \"{}\"",
            type_name(t),
            k
        )),
        (t, k) => Err(format!(
            "Cannot index {} with {}",
            type_name(t),
            type_name(k)
        )),
    }
}

pub fn subsequence_indices(haystack: &[Value], needle: &[Value]) -> Value {
    if needle.is_empty() || needle.len() > haystack.len() {
        return Value::Null;
    }
    let positions = (0..=haystack.len() - needle.len())
        .filter(|&start| {
            needle
                .iter()
                .enumerate()
                .all(|(offset, n)| equals(&haystack[start + offset], n))
        })
        .map(Value::from)
        .collect();
    Value::Array(positions)
}

fn slice_position(
    len: usize,
    bound: Option<&Value>,
    default: usize,
    round_up: bool,
) -> Result<usize, String> {
    let n = match bound {
        None | Some(Value::Null) => return Ok(default),
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(other) => {
            return Err(format!(
                "Start and end indices of a slice must be numbers, got {}",
                type_name(other)
            ))
        }
    };
    let n = if round_up { n.ceil() } else { n.floor() };
    let resolved = if n < 0.0 { len as f64 + n } else { n };
    Ok(resolved.clamp(0.0, len as f64) as usize)
}

pub fn slice(target: &Value, from: Option<&Value>, to: Option<&Value>) -> Result<Value, String> {
    match target {
        Value::Null => Ok(Value::Null),
        Value::Array(items) => {
            let start = slice_position(items.len(), from, 0, false)?;
            let end = slice_position(items.len(), to, items.len(), true)?;
            Ok(Value::Array(if start < end {
                items[start..end].to_vec()
            } else {
                Vec::new()
            }))
        }
        Value::String(s) => {
            let chars: Vec<char> = s.chars().collect();
            let start = slice_position(chars.len(), from, 0, false)?;
            let end = slice_position(chars.len(), to, chars.len(), true)?;
            Ok(Value::String(if start < end {
                chars[start..end].iter().collect()
            } else {
                String::new()
            }))
        }
        other => Err(format!("Cannot index {} with object", type_name(other))),
    }
}

pub fn iterate(value: &Value) -> Result<Vec<Value>, String> {
    match value {
        Value::Array(items) => Ok(items.clone()),
        Value::Object(map) => Ok(map.values().cloned().collect()),
        other => Err(format!("Cannot iterate over {}", describe(other))),
    }
}

pub fn length(value: &Value) -> Result<Value, String> {
    match value {
        Value::Null => Ok(Value::from(0)),
        Value::Bool(_) => Err(format!("{} has no length", describe(value))),
        Value::Number(n) => Ok(num(n.as_f64().unwrap_or(0.0).abs())),
        Value::String(s) => Ok(Value::from(s.chars().count())),
        Value::Array(items) => Ok(Value::from(items.len())),
        Value::Object(map) => Ok(Value::from(map.len())),
    }
}

/// Recursive containment: substrings for strings, every element of `b`
/// contained by some element of `a` for arrays, key-wise for objects.
pub fn contains(a: &Value, b: &Value) -> Result<bool, String> {
    match (a, b) {
        (Value::Object(x), Value::Object(y)) => {
            for (key, bv) in y {
                match x.get(key) {
                    Some(av) if contains(av, bv)? => {}
                    _ => return Ok(false),
                }
            }
            Ok(true)
        }
        (Value::Array(x), Value::Array(y)) => {
            for bv in y {
                let mut found = false;
                for av in x {
                    if contains(av, bv)? {
                        found = true;
                        break;
                    }
                }
                if !found {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        (Value::String(x), Value::String(y)) => Ok(x.contains(y.as_str())),
        _ if type_rank(a) == type_rank(b)
            || matches!((a, b), (Value::Bool(_), Value::Bool(_))) =>
        {
            Ok(equals(a, b))
        }
        _ => Err(format!(
            "{} and {} cannot have their containment checked",
            describe(a),
            describe(b)
        )),
    }
}

/// Returns every path (as a JSON array) beneath `value`, pre-order,
/// excluding the empty path.
pub fn all_paths(value: &Value) -> Vec<(Vec<Value>, Value)> {
    let mut out = Vec::new();
    let mut stack: Vec<(Vec<Value>, &Value)> = vec![(Vec::new(), value)];
    while let Some((path, current)) = stack.pop() {
        if !path.is_empty() {
            out.push((path.clone(), current.clone()));
        }
        let mut children: Vec<(Vec<Value>, &Value)> = match current {
            Value::Array(items) => items
                .iter()
                .enumerate()
                .map(|(i, v)| {
                    let mut p = path.clone();
                    p.push(Value::from(i));
                    (p, v)
                })
                .collect(),
            Value::Object(map) => map
                .iter()
                .map(|(k, v)| {
                    let mut p = path.clone();
                    p.push(Value::String(k.clone()));
                    (p, v)
                })
                .collect(),
            _ => Vec::new(),
        };
        children.reverse();
        stack.extend(children);
    }
    out
}

pub fn get_path(value: &Value, path: &Value) -> Result<Value, String> {
    let Value::Array(segments) = path else {
        return Err("Path must be specified as an array".to_string());
    };
    let mut current = value.clone();
    for segment in segments {
        if current.is_null() {
            return Ok(Value::Null);
        }
        current = index(&current, segment)?;
    }
    Ok(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_num_prefers_integers() {
        assert_eq!(num(3.0), json!(3));
        assert_eq!(num(2.5), json!(2.5));
        assert_eq!(num(f64::NAN), Value::Null);
    }

    #[test]
    fn test_type_ordering() {
        let mut values = vec![
            json!({"a": 1}),
            json!([1]),
            json!("a"),
            json!(1),
            json!(true),
            json!(false),
            Value::Null,
        ];
        values.sort_by(compare);
        assert_eq!(
            values,
            vec![
                Value::Null,
                json!(false),
                json!(true),
                json!(1),
                json!("a"),
                json!([1]),
                json!({"a": 1})
            ]
        );
    }

    #[test]
    fn test_object_ordering_by_keys_then_values() {
        assert_eq!(compare(&json!({"a": 2}), &json!({"b": 1})), Ordering::Less);
        assert_eq!(compare(&json!({"a": 2}), &json!({"a": 1})), Ordering::Greater);
    }

    #[test]
    fn test_addition_rules() {
        assert_eq!(add(json!(1), json!(2)).unwrap(), json!(3));
        assert_eq!(add(Value::Null, json!("x")).unwrap(), json!("x"));
        assert_eq!(add(json!([1]), json!([2])).unwrap(), json!([1, 2]));
        assert_eq!(
            add(json!({"a": 1}), json!({"a": 2, "b": 3})).unwrap(),
            json!({"a": 2, "b": 3})
        );
        let err = add(json!(1), json!("a")).unwrap_err();
        assert_eq!(err, "number (1) and string (\"a\") cannot be added");
    }

    #[test]
    fn test_multiply_and_divide() {
        assert_eq!(
            multiply(json!({"a": {"b": 1}}), json!({"a": {"c": 2}})).unwrap(),
            json!({"a": {"b": 1, "c": 2}})
        );
        assert_eq!(multiply(json!("ab"), json!(3)).unwrap(), json!("ababab"));
        assert_eq!(multiply(json!("ab"), json!(0)).unwrap(), Value::Null);
        assert_eq!(divide(json!("a,b"), json!(",")).unwrap(), json!(["a", "b"]));
        assert!(divide(json!(1), json!(0)).is_err());
        assert_eq!(modulo(json!(-5), json!(3)).unwrap(), json!(-2));
    }

    #[test]
    fn test_depth_guard() {
        assert!(!exceeds_depth(&json!(1), 0));
        assert!(!exceeds_depth(&json!([[1]]), 2));
        assert!(exceeds_depth(&json!([[1]]), 1));
        assert!(exceeds_depth(&json!({"a": [{"b": []}]}), 2));
        assert!(!exceeds_depth(&json!([]), 1));

        let mut deep = json!(null);
        for _ in 0..MAX_VALUE_DEPTH + 1 {
            deep = Value::Array(vec![deep]);
        }
        assert!(guard_depth(deep).is_err());
        assert!(guard_depth(json!({"a": [1, 2]})).is_ok());
    }

    #[test]
    fn test_string_repeat_is_bounded() {
        for times in [json!(1e19), json!(1e11), json!(MAX_REPEAT_BYTES)] {
            let err = multiply(json!("ab"), times).unwrap_err();
            assert_eq!(err, "repeat string result too long");
        }
        assert_eq!(multiply(json!(2.5), json!("xy")).unwrap(), json!("xyxy"));
        assert_eq!(multiply(json!(""), json!(1e19)).unwrap(), json!(""));
    }

    #[test]
    fn test_indexing() {
        let arr = json!([1, 2, 3]);
        assert_eq!(index(&arr, &json!(-1)).unwrap(), json!(3));
        assert_eq!(index(&arr, &json!(10)).unwrap(), Value::Null);
        assert_eq!(index(&Value::Null, &json!("a")).unwrap(), Value::Null);
        assert_eq!(
            index(&json!("text"), &json!("a")).unwrap_err(),
            "Cannot index string with \"a\""
        );
        assert_eq!(index(&json!([1, 2, 1, 2]), &json!([1, 2])).unwrap(), json!([0, 2]));
    }

    #[test]
    fn test_slicing() {
        let arr = json!([0, 1, 2, 3, 4]);
        assert_eq!(slice(&arr, Some(&json!(1)), Some(&json!(3))).unwrap(), json!([1, 2]));
        assert_eq!(slice(&arr, Some(&json!(-2)), None).unwrap(), json!([3, 4]));
        assert_eq!(slice(&json!("hello"), None, Some(&json!(2))).unwrap(), json!("he"));
    }

    #[test]
    fn test_contains() {
        assert!(contains(&json!("foobar"), &json!("bar")).unwrap());
        assert!(contains(&json!({"a": [1, 2], "b": 3}), &json!({"a": [1]})).unwrap());
        assert!(!contains(&json!([1, 2]), &json!([3])).unwrap());
        assert!(contains(&json!(1), &json!("a")).is_err());
    }

    #[test]
    fn test_paths_are_preorder() {
        let paths: Vec<Value> = all_paths(&json!({"a": [1, {"b": 2}]}))
            .into_iter()
            .map(|(p, _)| Value::Array(p))
            .collect();
        assert_eq!(
            paths,
            vec![json!(["a"]), json!(["a", 0]), json!(["a", 1]), json!(["a", 1, "b"])]
        );
    }
}
