//! Builtin function table.
//!
//! Names are resolved once, at parse time, by `(name, arity)`. Builtins that
//! are plain compositions of other constructs are lowered into [`Expr`] trees
//! here; the rest dispatch to native implementations.

use std::cmp::Ordering;

use regex::Regex;
use serde_json::{Map, Value};

use super::ast::{CmpOp, Expr};
use super::interpreter::{raise, Env, Interpreter, Signal, Sink, Unfold};
use super::value_ops::{self, as_f64, describe, num, truthy, type_name};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeFilter {
    Arrays,
    Objects,
    Iterables,
    Booleans,
    Numbers,
    Strings,
    Nulls,
    Scalars,
}

impl TypeFilter {
    fn matches(self, value: &Value) -> bool {
        match self {
            TypeFilter::Arrays => value.is_array(),
            TypeFilter::Objects => value.is_object(),
            TypeFilter::Iterables => value.is_array() || value.is_object(),
            TypeFilter::Booleans => value.is_boolean(),
            TypeFilter::Numbers => value.is_number(),
            TypeFilter::Strings => value.is_string(),
            TypeFilter::Nulls => value.is_null(),
            TypeFilter::Scalars => !(value.is_array() || value.is_object()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    Not,
    Length,
    Utf8ByteLength,
    Keys,
    KeysUnsorted,
    Has,
    In,
    MapValues,
    Recurse,
    ToEntries,
    FromEntries,
    Add,
    Any,
    All,
    Range,
    Floor,
    Ceil,
    Round,
    Sqrt,
    Fabs,
    ToString,
    ToNumber,
    Type,
    IsType(TypeFilter),
    Sort,
    SortBy,
    GroupBy,
    Unique,
    UniqueBy,
    Min,
    Max,
    MinBy,
    MaxBy,
    Reverse,
    Contains,
    Inside,
    StartsWith,
    EndsWith,
    LtrimStr,
    RtrimStr,
    Split,
    Join,
    AsciiDowncase,
    AsciiUpcase,
    Test,
    Capture,
    Sub,
    Gsub,
    First,
    Last,
    Nth,
    Limit,
    Until,
    While,
    Repeat,
    IsEmpty,
    ToJson,
    FromJson,
    Flatten,
    Indices,
    Index,
    Rindex,
    GetPath,
    Paths,
    Error,
    Halt,
    HaltError,
    Ascii,
    Explode,
    Implode,
}

fn select_type(filter: TypeFilter) -> Expr {
    Expr::select(Expr::Call(Builtin::IsType(filter), Vec::new()))
}

fn call(builtin: Builtin, args: Vec<Expr>) -> Expr {
    Expr::Call(builtin, args)
}

/// Maps `name/arity` to an expression, or `None` when no such builtin exists.
pub fn resolve(name: &str, mut args: Vec<Expr>) -> Option<Expr> {
    use Builtin::*;

    let arity = args.len();
    let builtin = match (name, arity) {
        ("empty", 0) => return Some(Expr::Empty),
        ("map", 1) => {
            let f = args.pop()?;
            let each = Expr::pipe(Expr::Iterate(Expr::Identity.boxed()), f);
            return Some(Expr::Array(Some(each.boxed())));
        }
        ("select", 1) => return Some(Expr::select(args.pop()?)),
        ("recurse", 0) => return Some(Expr::RecurseAll),
        ("recurse", 2) => {
            let cond = args.pop()?;
            let f = args.pop()?;
            return Some(call(Recurse, vec![Expr::pipe(f, Expr::select(cond))]));
        }
        ("values", 0) => {
            let not_null = Expr::Compare(
                CmpOp::Ne,
                Expr::Identity.boxed(),
                Expr::Literal(Value::Null).boxed(),
            );
            return Some(Expr::select(not_null));
        }
        ("arrays", 0) => return Some(select_type(TypeFilter::Arrays)),
        ("objects", 0) => return Some(select_type(TypeFilter::Objects)),
        ("iterables", 0) => return Some(select_type(TypeFilter::Iterables)),
        ("booleans", 0) => return Some(select_type(TypeFilter::Booleans)),
        ("numbers", 0) => return Some(select_type(TypeFilter::Numbers)),
        ("strings", 0) => return Some(select_type(TypeFilter::Strings)),
        ("nulls", 0) => return Some(select_type(TypeFilter::Nulls)),
        ("scalars", 0) => return Some(select_type(TypeFilter::Scalars)),
        ("with_entries", 1) => {
            let f = args.pop()?;
            let mapped = resolve("map", vec![f])?;
            return Some(Expr::pipe(
                call(ToEntries, Vec::new()),
                Expr::pipe(mapped, call(FromEntries, Vec::new())),
            ));
        }
        ("first", 0) => return Some(Expr::index(Expr::Identity, Expr::Literal(Value::from(0)))),
        ("last", 0) => return Some(Expr::index(Expr::Identity, Expr::Literal(Value::from(-1)))),
        ("nth", 1) => return Some(Expr::index(Expr::Identity, args.pop()?)),
        ("leaf_paths", 0) => return Some(call(Paths, vec![select_type(TypeFilter::Scalars)])),
        ("splits", 1) | ("splits", 2) => {
            if arity == 1 {
                args.push(Expr::Literal(Value::Null));
            }
            return Some(Expr::pipe(
                call(Split, args),
                Expr::Iterate(Expr::Identity.boxed()),
            ));
        }
        ("not", 0) => Not,
        ("length", 0) => Length,
        ("utf8bytelength", 0) => Utf8ByteLength,
        ("keys", 0) => Keys,
        ("keys_unsorted", 0) => KeysUnsorted,
        ("has", 1) => Has,
        ("in", 1) => In,
        ("map_values", 1) => MapValues,
        ("recurse", 1) => Recurse,
        ("to_entries", 0) => ToEntries,
        ("from_entries", 0) => FromEntries,
        ("add", 0) => Add,
        ("any", 0..=2) => Any,
        ("all", 0..=2) => All,
        ("range", 1..=3) => Range,
        ("floor", 0) => Floor,
        ("ceil", 0) => Ceil,
        ("round", 0) => Round,
        ("sqrt", 0) => Sqrt,
        ("fabs", 0) => Fabs,
        ("tostring", 0) => ToString,
        ("tonumber", 0) => ToNumber,
        ("type", 0) => Type,
        ("sort", 0) => Sort,
        ("sort_by", 1) => SortBy,
        ("group_by", 1) => GroupBy,
        ("unique", 0) => Unique,
        ("unique_by", 1) => UniqueBy,
        ("min", 0) => Min,
        ("max", 0) => Max,
        ("min_by", 1) => MinBy,
        ("max_by", 1) => MaxBy,
        ("reverse", 0) => Reverse,
        ("contains", 1) => Contains,
        ("inside", 1) => Inside,
        ("startswith", 1) => StartsWith,
        ("endswith", 1) => EndsWith,
        ("ltrimstr", 1) => LtrimStr,
        ("rtrimstr", 1) => RtrimStr,
        ("split", 1..=2) => Split,
        ("join", 1) => Join,
        ("ascii_downcase", 0) => AsciiDowncase,
        ("ascii_upcase", 0) => AsciiUpcase,
        ("test", 1..=2) => Test,
        ("capture", 1..=2) => Capture,
        ("sub", 2..=3) => Sub,
        ("gsub", 2..=3) => Gsub,
        ("first", 1) => First,
        ("last", 1) => Last,
        ("nth", 2) => Nth,
        ("limit", 2) => Limit,
        ("until", 2) => Until,
        ("while", 2) => While,
        ("repeat", 1) => Repeat,
        ("isempty", 1) => IsEmpty,
        ("tojson", 0) => ToJson,
        ("fromjson", 0) => FromJson,
        ("flatten", 0..=1) => Flatten,
        ("indices", 1) => Indices,
        ("index", 1) => Index,
        ("rindex", 1) => Rindex,
        ("getpath", 1) => GetPath,
        ("paths", 0..=1) => Paths,
        ("error", 0..=1) => Error,
        ("halt", 0) => Halt,
        ("halt_error", 0..=1) => HaltError,
        ("ascii", 0) => Ascii,
        ("explode", 0) => Explode,
        ("implode", 0) => Implode,
        _ => return None,
    };
    Some(Expr::Call(builtin, args))
}

struct RegexSpec {
    regex: Regex,
    global: bool,
    skip_empty: bool,
}

fn compile_regex(pattern: &Value, flags: Option<&Value>) -> Result<RegexSpec, Signal> {
    let Value::String(pattern) = pattern else {
        return Err(raise(format!(
            "{} cannot be matched, as it is not a string",
            describe(pattern)
        )));
    };
    let flags = match flags {
        None | Some(Value::Null) => "",
        Some(Value::String(s)) => s.as_str(),
        Some(other) => {
            return Err(raise(format!(
                "{} is not a string",
                describe(other)
            )))
        }
    };

    let mut inline = String::new();
    let mut global = false;
    let mut skip_empty = false;
    for flag in flags.chars() {
        match flag {
            'g' => global = true,
            'i' => inline.push('i'),
            'x' => inline.push('x'),
            's' => inline.push('s'),
            'n' => skip_empty = true,
            'p' => {
                inline.push('s');
                skip_empty = true;
            }
            'l' => {}
            _ => return Err(raise(format!("{flags} is not a valid modifier string"))),
        }
    }
    let source = if inline.is_empty() {
        pattern.clone()
    } else {
        format!("(?{inline}){pattern}")
    };
    let regex = Regex::new(&source)
        .map_err(|e| raise(format!("{pattern} (at offset 0) is not a valid regex: {e}")))?;
    Ok(RegexSpec {
        regex,
        global,
        skip_empty,
    })
}

fn require_string<'v>(value: &'v Value, what: &str) -> Result<&'v str, Signal> {
    match value {
        Value::String(s) => Ok(s),
        other => Err(raise(format!(
            "{} cannot be {what}, as it is not a string",
            describe(other)
        ))),
    }
}

fn require_array<'v>(value: &'v Value, what: &str) -> Result<&'v Vec<Value>, Signal> {
    match value {
        Value::Array(items) => Ok(items),
        other => Err(raise(format!(
            "{} cannot be {what}, as it is not an array",
            describe(other)
        ))),
    }
}

fn math(value: &Value, name: &str, f: fn(f64) -> f64) -> Result<Value, Signal> {
    as_f64(value)
        .map(|n| num(f(n)))
        .ok_or_else(|| raise(format!("{} number required for {name}", describe(value))))
}

fn capture_object(regex: &Regex, caps: &regex::Captures<'_>) -> Value {
    let mut object = Map::new();
    for name in regex.capture_names().flatten() {
        let value = caps
            .name(name)
            .map(|m| Value::String(m.as_str().to_string()))
            .unwrap_or(Value::Null);
        object.insert(name.to_string(), value);
    }
    Value::Object(object)
}

fn flatten_into(items: &[Value], depth: f64, out: &mut Vec<Value>) {
    for item in items {
        match item {
            Value::Array(inner) if depth > 0.0 => flatten_into(inner, depth - 1.0, out),
            other => out.push(other.clone()),
        }
    }
}

fn indices_of(input: &Value, needle: &Value) -> Result<Value, Signal> {
    match (input, needle) {
        (Value::Null, _) | (_, Value::Null) => Ok(Value::Null),
        (Value::String(s), Value::String(n)) => {
            if n.is_empty() {
                return Ok(Value::Null);
            }
            let chars: Vec<char> = s.chars().collect();
            let pattern: Vec<char> = n.chars().collect();
            if pattern.len() > chars.len() {
                return Ok(Value::Array(Vec::new()));
            }
            let positions = (0..=chars.len() - pattern.len())
                .filter(|&i| chars[i..i + pattern.len()] == pattern[..])
                .map(Value::from)
                .collect();
            Ok(Value::Array(positions))
        }
        (Value::Array(items), Value::Array(sub)) => Ok(value_ops::subsequence_indices(items, sub)),
        (Value::Array(items), scalar) => Ok(value_ops::subsequence_indices(
            items,
            std::slice::from_ref(scalar),
        )),
        (other, n) => Err(raise(format!(
            "Cannot determine indices of {} in {}",
            describe(n),
            describe(other)
        ))),
    }
}

fn entry_key(entry: &Map<String, Value>) -> String {
    let key = ["key", "k", "name", "Name", "K", "Key"]
        .iter()
        .filter_map(|k| entry.get(*k))
        .find(|v| truthy(v))
        .or_else(|| entry.get("key"))
        .cloned()
        .unwrap_or(Value::Null);
    value_ops::to_text(&key)
}

impl Interpreter<'_> {
    fn sort_keys(
        &self,
        items: &[Value],
        f: &Expr,
        env: &Env,
    ) -> Result<Vec<(Value, Value)>, Signal> {
        let mut keyed = Vec::with_capacity(items.len());
        for item in items {
            let key = Value::Array(self.collect(f, env, item)?);
            keyed.push((key, item.clone()));
        }
        keyed.sort_by(|a, b| value_ops::compare(&a.0, &b.0));
        Ok(keyed)
    }

    fn extreme_by(
        &self,
        input: &Value,
        f: Option<&Expr>,
        env: &Env,
        want: Ordering,
    ) -> Result<Value, Signal> {
        let what = if want == Ordering::Less { "min" } else { "max" };
        let items = require_array(input, &format!("searched for {what}"))?;
        let mut best: Option<(Value, &Value)> = None;
        for item in items {
            let key = match f {
                Some(f) => Value::Array(self.collect(f, env, item)?),
                None => item.clone(),
            };
            let replace = match &best {
                None => true,
                Some((best_key, _)) => {
                    let ord = value_ops::compare(&key, best_key);
                    // first minimum wins, last maximum wins
                    if want == Ordering::Less {
                        ord == Ordering::Less
                    } else {
                        ord != Ordering::Less
                    }
                }
            };
            if replace {
                best = Some((key, item));
            }
        }
        Ok(best.map(|(_, item)| item.clone()).unwrap_or(Value::Null))
    }

    fn any_all(
        &self,
        args: &[Expr],
        env: &Env,
        input: &Value,
        want: bool,
    ) -> Result<bool, Signal> {
        let mut found = !want;
        let mut check = |v: Value| -> Result<bool, Signal> {
            if truthy(&v) == want {
                found = want;
                return Ok(false);
            }
            Ok(true)
        };
        match args {
            [] => {
                let iterate = Expr::Iterate(Expr::Identity.boxed());
                self.eval_until(&iterate, env, input, &mut check)?;
            }
            [cond] => {
                let iterate = Expr::Iterate(Expr::Identity.boxed());
                self.eval_until(&iterate, env, input, &mut |item| {
                    let mut keep_going = true;
                    self.eval_until(cond, env, &item, &mut |c| {
                        keep_going = check(c)?;
                        Ok(keep_going)
                    })?;
                    Ok(keep_going)
                })?;
            }
            [generator, cond] => {
                self.eval_until(generator, env, input, &mut |item| {
                    let mut keep_going = true;
                    self.eval_until(cond, env, &item, &mut |c| {
                        keep_going = check(c)?;
                        Ok(keep_going)
                    })?;
                    Ok(keep_going)
                })?;
            }
            _ => {}
        }
        Ok(found)
    }

    fn replace(
        &self,
        input: &Value,
        args: &[Expr],
        env: &Env,
        global: bool,
        out: &mut Sink<'_>,
    ) -> Result<(), Signal> {
        let text = require_string(input, "matched")?.to_string();
        let replacement = &args[1];
        let mut pattern_args = vec![args[0].clone()];
        if let Some(flags) = args.get(2) {
            pattern_args.push(flags.clone());
        }
        self.cartesian(&pattern_args, env, input, &mut Vec::new(), &mut |vals| {
            let compiled = compile_regex(&vals[0], vals.get(1))?;
            let global = global || compiled.global;
            let mut results = vec![String::new()];
            let mut last_end = 0;
            for caps in compiled.regex.captures_iter(&text) {
                self.check_cancel()?;
                let Some(whole) = caps.get(0) else { continue };
                if compiled.skip_empty && whole.as_str().is_empty() {
                    continue;
                }
                let context = capture_object(&compiled.regex, &caps);
                let mut replacements = Vec::new();
                for produced in self.collect(replacement, env, &context)? {
                    match produced {
                        Value::String(s) => replacements.push(s),
                        other => {
                            return Err(raise(format!(
                                "{} cannot be added to a string",
                                describe(&other)
                            )))
                        }
                    }
                }
                let segment = &text[last_end..whole.start()];
                results = results
                    .iter()
                    .flat_map(|prefix| {
                        replacements
                            .iter()
                            .map(move |r| format!("{prefix}{segment}{r}"))
                    })
                    .collect();
                last_end = whole.end();
                if !global {
                    break;
                }
            }
            for result in results {
                out(Value::String(result + &text[last_end..]))?;
            }
            Ok(())
        })
    }

    pub(super) fn call_builtin(
        &self,
        builtin: Builtin,
        args: &[Expr],
        env: &Env,
        input: &Value,
        out: &mut Sink<'_>,
    ) -> Result<(), Signal> {
        use Builtin::*;

        match builtin {
            Not => out(Value::Bool(!truthy(input))),
            Length => out(value_ops::length(input).map_err(raise)?),
            Utf8ByteLength => {
                let s = require_string(input, "measured")?;
                out(Value::from(s.len()))
            }
            Keys | KeysUnsorted => match input {
                Value::Object(map) => {
                    let keys: Vec<Value> = if builtin == Keys {
                        value_ops::sorted_keys(map)
                            .into_iter()
                            .map(|k| Value::String(k.clone()))
                            .collect()
                    } else {
                        map.keys().map(|k| Value::String(k.clone())).collect()
                    };
                    out(Value::Array(keys))
                }
                Value::Array(items) => out(Value::Array((0..items.len()).map(Value::from).collect())),
                other => Err(raise(format!("{} has no keys", describe(other)))),
            },
            Has | In => self.cartesian(args, env, input, &mut Vec::new(), &mut |vals| {
                let (container, key) = if builtin == Has {
                    (input, &vals[0])
                } else {
                    (&vals[0], input)
                };
                let present = match (container, key) {
                    (Value::Object(map), Value::String(k)) => map.contains_key(k),
                    (Value::Array(items), Value::Number(n)) => {
                        let n = n.as_f64().unwrap_or(-1.0);
                        n >= 0.0 && n < items.len() as f64
                    }
                    (c, k) => {
                        return Err(raise(format!(
                            "Cannot check whether {} has a {} key",
                            type_name(c),
                            type_name(k)
                        )))
                    }
                };
                out(Value::Bool(present))
            }),
            MapValues => {
                let f = &args[0];
                let first_of = |v: &Value| -> Result<Option<Value>, Signal> {
                    let mut first = None;
                    self.eval_until(f, env, v, &mut |produced| {
                        first = Some(produced);
                        Ok(false)
                    })?;
                    Ok(first)
                };
                match input {
                    Value::Object(map) => {
                        let mut mapped = Map::new();
                        for (key, value) in map {
                            if let Some(v) = first_of(value)? {
                                mapped.insert(key.clone(), v);
                            }
                        }
                        out(Value::Object(mapped))
                    }
                    Value::Array(items) => {
                        let mut mapped = Vec::with_capacity(items.len());
                        for item in items {
                            if let Some(v) = first_of(item)? {
                                mapped.push(v);
                            }
                        }
                        out(Value::Array(mapped))
                    }
                    other => Err(raise(format!("Cannot iterate over {}", describe(other)))),
                }
            }
            Recurse => self.unfold(Unfold::Recurse(&args[0]), env, input, out),
            Repeat => self.unfold(Unfold::Recurse(&args[0]), env, input, out),
            While => self.unfold(Unfold::While(&args[0], &args[1]), env, input, out),
            Until => self.unfold(Unfold::Until(&args[0], &args[1]), env, input, out),
            ToEntries => match input {
                Value::Object(map) => {
                    let entries = map
                        .iter()
                        .map(|(k, v)| {
                            let mut entry = Map::new();
                            entry.insert("key".into(), Value::String(k.clone()));
                            entry.insert("value".into(), v.clone());
                            Value::Object(entry)
                        })
                        .collect();
                    out(Value::Array(entries))
                }
                other => Err(raise(format!("{} has no keys", describe(other)))),
            },
            FromEntries => {
                let items = value_ops::iterate(input).map_err(raise)?;
                let mut object = Map::new();
                for item in items {
                    let Value::Object(entry) = &item else {
                        return Err(raise(format!(
                            "Cannot index {} with \"key\"",
                            type_name(&item)
                        )));
                    };
                    let key = entry_key(entry);
                    let value = if entry.contains_key("value") {
                        entry.get("value")
                    } else {
                        entry.get("v").or_else(|| entry.get("Value")).or_else(|| entry.get("V"))
                    };
                    object.insert(key, value.cloned().unwrap_or(Value::Null));
                }
                out(Value::Object(object))
            }
            Add => {
                let mut total = Value::Null;
                for item in value_ops::iterate(input).map_err(raise)? {
                    total = value_ops::add(total, item).map_err(raise)?;
                }
                out(total)
            }
            Any => out(Value::Bool(self.any_all(args, env, input, true)?)),
            All => out(Value::Bool(self.any_all(args, env, input, false)?)),
            Range => self.cartesian(args, env, input, &mut Vec::new(), &mut |vals| {
                let numbers: Vec<f64> = vals
                    .iter()
                    .map(|v| as_f64(v).ok_or_else(|| raise("Range bounds must be numeric")))
                    .collect::<Result<_, _>>()?;
                let (mut current, upto, by) = match numbers.as_slice() {
                    [upto] => (0.0, *upto, 1.0),
                    [from, upto] => (*from, *upto, 1.0),
                    [from, upto, by] => (*from, *upto, *by),
                    _ => return Ok(()),
                };
                if by == 0.0 {
                    return Ok(());
                }
                while (by > 0.0 && current < upto) || (by < 0.0 && current > upto) {
                    self.check_cancel()?;
                    out(num(current))?;
                    current += by;
                }
                Ok(())
            }),
            Floor => out(math(input, "floor", f64::floor)?),
            Ceil => out(math(input, "ceil", f64::ceil)?),
            Round => out(math(input, "round", f64::round)?),
            Sqrt => out(math(input, "sqrt", f64::sqrt)?),
            Fabs => out(math(input, "fabs", f64::abs)?),
            ToString => out(Value::String(value_ops::to_text(input))),
            ToNumber => match input {
                Value::Number(_) => out(input.clone()),
                Value::String(s) => {
                    let parsed = s.trim().parse::<f64>().map_err(|_| {
                        raise(format!("Cannot parse '{s}' as JSON"))
                    })?;
                    out(num(parsed))
                }
                other => Err(raise(format!(
                    "{} cannot be parsed as a number",
                    describe(other)
                ))),
            },
            Type => out(Value::String(type_name(input).to_string())),
            IsType(filter) => out(Value::Bool(filter.matches(input))),
            Sort => {
                let mut items = require_array(input, "sorted")?.clone();
                items.sort_by(value_ops::compare);
                out(Value::Array(items))
            }
            SortBy => {
                let items = require_array(input, "sorted")?;
                let keyed = self.sort_keys(items, &args[0], env)?;
                out(Value::Array(keyed.into_iter().map(|(_, v)| v).collect()))
            }
            GroupBy | UniqueBy => {
                let items = require_array(input, "grouped")?;
                let keyed = self.sort_keys(items, &args[0], env)?;
                let mut groups: Vec<(Value, Vec<Value>)> = Vec::new();
                for (key, item) in keyed {
                    match groups.last_mut() {
                        Some((last_key, members)) if value_ops::equals(last_key, &key) => {
                            members.push(item)
                        }
                        _ => groups.push((key, vec![item])),
                    }
                }
                let result = groups
                    .into_iter()
                    .map(|(_, mut members)| {
                        if builtin == UniqueBy {
                            members.swap_remove(0)
                        } else {
                            Value::Array(members)
                        }
                    })
                    .collect();
                out(Value::Array(result))
            }
            Unique => {
                let mut items = require_array(input, "sorted")?.clone();
                items.sort_by(value_ops::compare);
                items.dedup_by(|a, b| value_ops::equals(a, b));
                out(Value::Array(items))
            }
            Min => out(self.extreme_by(input, None, env, Ordering::Less)?),
            Max => out(self.extreme_by(input, None, env, Ordering::Greater)?),
            MinBy => out(self.extreme_by(input, Some(&args[0]), env, Ordering::Less)?),
            MaxBy => out(self.extreme_by(input, Some(&args[0]), env, Ordering::Greater)?),
            Reverse => match input {
                Value::Null => out(Value::Array(Vec::new())),
                Value::String(s) => out(Value::String(s.chars().rev().collect())),
                Value::Array(items) => out(Value::Array(items.iter().rev().cloned().collect())),
                other => Err(raise(format!("Cannot reverse {}", describe(other)))),
            },
            Contains | Inside => self.cartesian(args, env, input, &mut Vec::new(), &mut |vals| {
                let result = if builtin == Contains {
                    value_ops::contains(input, &vals[0])
                } else {
                    value_ops::contains(&vals[0], input)
                };
                out(Value::Bool(result.map_err(raise)?))
            }),
            StartsWith | EndsWith => {
                self.cartesian(args, env, input, &mut Vec::new(), &mut |vals| {
                    let (Value::String(s), Value::String(affix)) = (input, &vals[0]) else {
                        let name = if builtin == StartsWith { "startswith" } else { "endswith" };
                        return Err(raise(format!("{name}() requires string inputs")));
                    };
                    let hit = if builtin == StartsWith {
                        s.starts_with(affix.as_str())
                    } else {
                        s.ends_with(affix.as_str())
                    };
                    out(Value::Bool(hit))
                })
            }
            LtrimStr | RtrimStr => self.cartesian(args, env, input, &mut Vec::new(), &mut |vals| {
                let trimmed = match (input, &vals[0]) {
                    (Value::String(s), Value::String(affix)) => {
                        let stripped = if builtin == LtrimStr {
                            s.strip_prefix(affix.as_str())
                        } else {
                            s.strip_suffix(affix.as_str())
                        };
                        stripped.map(|rest| Value::String(rest.to_string()))
                    }
                    _ => None,
                };
                out(trimmed.unwrap_or_else(|| input.clone()))
            }),
            Split => self.cartesian(args, env, input, &mut Vec::new(), &mut |vals| {
                let s = require_string(input, "split")?;
                match vals {
                    [Value::String(sep)] => out(value_ops::split_string(s, sep)),
                    [other] => Err(raise(format!(
                        "{} cannot be used as a separator",
                        describe(other)
                    ))),
                    [pattern, flags] => {
                        let compiled = compile_regex(pattern, Some(flags))?;
                        let parts = compiled
                            .regex
                            .split(s)
                            .map(|p| Value::String(p.to_string()))
                            .collect();
                        out(Value::Array(parts))
                    }
                    _ => Ok(()),
                }
            }),
            Join => self.cartesian(args, env, input, &mut Vec::new(), &mut |vals| {
                let Value::String(sep) = &vals[0] else {
                    return Err(raise(format!(
                        "{} cannot be used as a separator",
                        describe(&vals[0])
                    )));
                };
                let mut parts = Vec::new();
                for item in value_ops::iterate(input).map_err(raise)? {
                    parts.push(match item {
                        Value::Null => String::new(),
                        Value::String(s) => s,
                        Value::Number(_) | Value::Bool(_) => value_ops::to_json(&item),
                        other => {
                            return Err(raise(format!("Cannot join with {}", describe(&other))))
                        }
                    });
                }
                out(Value::String(parts.join(sep)))
            }),
            AsciiDowncase => {
                let s = require_string(input, "lowercased")?;
                out(Value::String(s.to_ascii_lowercase()))
            }
            AsciiUpcase => {
                let s = require_string(input, "uppercased")?;
                out(Value::String(s.to_ascii_uppercase()))
            }
            Test | Capture => self.cartesian(args, env, input, &mut Vec::new(), &mut |vals| {
                let s = require_string(input, "matched")?;
                let compiled = compile_regex(&vals[0], vals.get(1))?;
                if builtin == Test {
                    return out(Value::Bool(compiled.regex.is_match(s)));
                }
                for caps in compiled.regex.captures_iter(s) {
                    if compiled.skip_empty && caps.get(0).is_some_and(|m| m.as_str().is_empty()) {
                        continue;
                    }
                    out(capture_object(&compiled.regex, &caps))?;
                    if !compiled.global {
                        break;
                    }
                }
                Ok(())
            }),
            Sub => self.replace(input, args, env, false, out),
            Gsub => self.replace(input, args, env, true, out),
            First => {
                let mut first = None;
                self.eval_until(&args[0], env, input, &mut |v| {
                    first = Some(v);
                    Ok(false)
                })?;
                match first {
                    Some(v) => out(v),
                    None => Ok(()),
                }
            }
            Last => {
                let mut last = None;
                self.eval(&args[0], env, input, &mut |v| {
                    last = Some(v);
                    Ok(())
                })?;
                match last {
                    Some(v) => out(v),
                    None => Ok(()),
                }
            }
            Nth | Limit => {
                let (count_expr, generator) = (&args[0], &args[1]);
                self.eval(count_expr, env, input, &mut |n| {
                    let n = as_f64(&n).ok_or_else(|| {
                        raise(format!("{} cannot be used as a count", describe(&n)))
                    })?;
                    if builtin == Nth && n < 0.0 {
                        return Err(raise("Out of bounds negative array index"));
                    }
                    if builtin == Limit && n <= 0.0 {
                        return Ok(());
                    }
                    let mut seen = 0.0;
                    let mut downstream = Ok(());
                    self.eval_until(generator, env, input, &mut |v| {
                        seen += 1.0;
                        if builtin == Limit {
                            downstream = out(v);
                            return Ok(downstream.is_ok() && seen < n);
                        }
                        if seen > n {
                            downstream = out(v);
                            return Ok(false);
                        }
                        Ok(true)
                    })?;
                    downstream
                })
            }
            IsEmpty => {
                let mut empty = true;
                self.eval_until(&args[0], env, input, &mut |_| {
                    empty = false;
                    Ok(false)
                })?;
                out(Value::Bool(empty))
            }
            ToJson => out(Value::String(value_ops::to_json(input))),
            FromJson => {
                let s = require_string(input, "parsed")?;
                let parsed: Value = serde_json::from_str(s)
                    .map_err(|e| raise(format!("{s} (while parsing '{s}'): {e}")))?;
                out(parsed)
            }
            Flatten => {
                let items = require_array(input, "flattened")?;
                let mut depths = Vec::new();
                if let Some(depth) = args.first() {
                    for d in self.collect(depth, env, input)? {
                        let d = as_f64(&d).ok_or_else(|| raise("flatten depth must be a number"))?;
                        if d < 0.0 {
                            return Err(raise("flatten depth must not be negative"));
                        }
                        depths.push(d);
                    }
                } else {
                    depths.push(f64::INFINITY);
                }
                for depth in depths {
                    let mut flat = Vec::new();
                    flatten_into(items, depth, &mut flat);
                    out(Value::Array(flat))?;
                }
                Ok(())
            }
            Indices | Index | Rindex => {
                self.cartesian(args, env, input, &mut Vec::new(), &mut |vals| {
                    let found = indices_of(input, &vals[0])?;
                    let result = match (builtin, found) {
                        (Indices, found) => found,
                        (Index, Value::Array(positions)) => {
                            positions.first().cloned().unwrap_or(Value::Null)
                        }
                        (_, Value::Array(positions)) => {
                            positions.last().cloned().unwrap_or(Value::Null)
                        }
                        (_, other) => other,
                    };
                    out(result)
                })
            }
            GetPath => self.cartesian(args, env, input, &mut Vec::new(), &mut |vals| {
                out(value_ops::get_path(input, &vals[0]).map_err(raise)?)
            }),
            Paths => {
                for (path, value) in value_ops::all_paths(input) {
                    self.check_cancel()?;
                    let keep = match args.first() {
                        None => true,
                        Some(f) => {
                            let mut hit = false;
                            self.eval_until(f, env, &value, &mut |v| {
                                hit = truthy(&v);
                                Ok(!hit)
                            })?;
                            hit
                        }
                    };
                    if keep {
                        out(Value::Array(path))?;
                    }
                }
                Ok(())
            }
            Error => match args.first() {
                None => Err(Signal::Error(input.clone())),
                Some(message) => self.eval(message, env, input, &mut |m| Err(Signal::Error(m))),
            },
            Halt => Err(Signal::Halt),
            HaltError => Err(Signal::HaltError(input.clone())),
            Ascii => {
                let c = as_f64(input)
                    .and_then(|n| char::from_u32(n as u32))
                    .ok_or_else(|| raise(format!("{} is not a valid codepoint", describe(input))))?;
                out(Value::String(c.to_string()))
            }
            Explode => {
                let s = require_string(input, "exploded")?;
                out(Value::Array(s.chars().map(|c| Value::from(c as u32)).collect()))
            }
            Implode => {
                let items = require_array(input, "imploded")?;
                let mut s = String::with_capacity(items.len());
                for item in items {
                    let c = as_f64(item)
                        .and_then(|n| char::from_u32(n as u32))
                        .ok_or_else(|| {
                            raise(format!("{} is not a valid codepoint", describe(item)))
                        })?;
                    s.push(c);
                }
                out(Value::String(s))
            }
        }
    }
}
