//! Continuation-passing evaluator.
//!
//! Every expression streams its results into a sink. A sink returning an
//! error aborts the producing generator, which is how early exits
//! (`first`, `limit`, `halt`) and cancellation unwind without collecting
//! intermediate results.

use std::cell::Cell;
use std::rc::Rc;

use base64::alphabet;
use base64::engine::general_purpose::STANDARD;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine as _;
use serde_json::{Map, Value};

use super::ast::{Expr, ObjectEntry, ObjectKey, StrSegment};
use super::value_ops::{self, truthy};
use super::CancelFlag;

pub(super) type Sink<'a> = dyn FnMut(Value) -> Result<(), Signal> + 'a;

#[derive(Debug)]
pub(super) enum Signal {
    /// Catchable error raised by `error` or a failing operation
    Error(Value),
    Halt,
    HaltError(Value),
    Cancelled,
    /// Early exit addressed to the generator that allocated this label
    Stop(u64),
}

pub(super) fn raise(message: impl Into<String>) -> Signal {
    Signal::Error(Value::String(message.into()))
}

#[derive(Clone, Default)]
pub(super) struct Env(Option<Rc<Frame>>);

pub(super) struct Frame {
    name: String,
    value: Value,
    parent: Env,
}

impl Env {
    pub(super) fn bind(&self, name: &str, value: Value) -> Env {
        Env(Some(Rc::new(Frame {
            name: name.to_string(),
            value,
            parent: self.clone(),
        })))
    }

    pub(super) fn get(&self, name: &str) -> Option<&Value> {
        let mut current = &self.0;
        while let Some(frame) = current {
            if frame.name == name {
                return Some(&frame.value);
            }
            current = &frame.parent.0;
        }
        None
    }
}

enum Step<'e> {
    Visit(Value),
    Emit(Value),
    Expand(Value, &'e Expr),
}

#[derive(Clone, Copy)]
pub(super) enum Unfold<'e> {
    Recurse(&'e Expr),
    While(&'e Expr, &'e Expr),
    Until(&'e Expr, &'e Expr),
}

pub(super) struct Interpreter<'c> {
    cancel: &'c CancelFlag,
    next_label: Cell<u64>,
}

impl<'c> Interpreter<'c> {
    pub(super) fn new(cancel: &'c CancelFlag) -> Self {
        Self {
            cancel,
            next_label: Cell::new(0),
        }
    }

    pub(super) fn fresh_label(&self) -> u64 {
        let label = self.next_label.get();
        self.next_label.set(label + 1);
        label
    }

    pub(super) fn check_cancel(&self) -> Result<(), Signal> {
        if self.cancel.is_cancelled() {
            Err(Signal::Cancelled)
        } else {
            Ok(())
        }
    }

    pub(super) fn collect(&self, expr: &Expr, env: &Env, input: &Value) -> Result<Vec<Value>, Signal> {
        let mut values = Vec::new();
        self.eval(expr, env, input, &mut |v| {
            values.push(v);
            Ok(())
        })?;
        Ok(values)
    }

    /// Runs `expr`, handing outputs to `out` until `out` asks to stop by
    /// returning `false`. Stops reported through the sink never escape.
    pub(super) fn eval_until(
        &self,
        expr: &Expr,
        env: &Env,
        input: &Value,
        out: &mut dyn FnMut(Value) -> Result<bool, Signal>,
    ) -> Result<(), Signal> {
        let label = self.fresh_label();
        let result = self.eval(expr, env, input, &mut |v| {
            if out(v)? {
                Ok(())
            } else {
                Err(Signal::Stop(label))
            }
        });
        match result {
            Err(Signal::Stop(l)) if l == label => Ok(()),
            other => other,
        }
    }

    /// Calls `f` once per combination of the argument outputs, first argument
    /// varying slowest.
    pub(super) fn cartesian(
        &self,
        args: &[Expr],
        env: &Env,
        input: &Value,
        acc: &mut Vec<Value>,
        f: &mut dyn FnMut(&[Value]) -> Result<(), Signal>,
    ) -> Result<(), Signal> {
        match args.split_first() {
            None => f(acc),
            Some((first, rest)) => self.eval(first, env, input, &mut |v| {
                acc.push(v);
                let result = self.cartesian(rest, env, input, acc, f);
                acc.pop();
                result
            }),
        }
    }

    pub(super) fn eval(
        &self,
        expr: &Expr,
        env: &Env,
        input: &Value,
        out: &mut Sink<'_>,
    ) -> Result<(), Signal> {
        self.check_cancel()?;
        match expr {
            Expr::Identity => out(input.clone()),
            Expr::RecurseAll => self.recurse_all(input, out),
            Expr::Empty => Ok(()),
            Expr::Literal(value) => out(value.clone()),
            Expr::Str { format, parts } => {
                self.eval_string(format.as_deref(), parts, env, input, String::new(), out)
            }
            Expr::Format(name) => out(Value::String(apply_format(name, input)?)),
            Expr::Var(name) => out(env.get(name).cloned().unwrap_or(Value::Null)),
            Expr::Index { target, key } => self.eval(key, env, input, &mut |k| {
                self.eval(target, env, input, &mut |t| {
                    out(value_ops::index(&t, &k).map_err(raise)?)
                })
            }),
            Expr::Slice { target, from, to } => {
                let from_values = match from {
                    Some(e) => self.collect(e, env, input)?,
                    None => vec![Value::Null],
                };
                let to_values = match to {
                    Some(e) => self.collect(e, env, input)?,
                    None => vec![Value::Null],
                };
                for to in &to_values {
                    for from in &from_values {
                        self.eval(target, env, input, &mut |t| {
                            out(value_ops::slice(&t, Some(from), Some(to)).map_err(raise)?)
                        })?;
                    }
                }
                Ok(())
            }
            Expr::Iterate(target) => self.eval(target, env, input, &mut |t| {
                for item in value_ops::iterate(&t).map_err(raise)? {
                    self.check_cancel()?;
                    out(item)?;
                }
                Ok(())
            }),
            Expr::Try { body, handler } => self.eval_try(body, handler.as_deref(), env, input, out),
            Expr::Pipe(lhs, rhs) => self.eval(lhs, env, input, &mut |v| self.eval(rhs, env, &v, out)),
            Expr::Comma(lhs, rhs) => {
                self.eval(lhs, env, input, out)?;
                self.eval(rhs, env, input, out)
            }
            Expr::Neg(operand) => self.eval(operand, env, input, &mut |v| {
                out(value_ops::negate(v).map_err(raise)?)
            }),
            Expr::Arith(op, lhs, rhs) => self.eval(rhs, env, input, &mut |r| {
                self.eval(lhs, env, input, &mut |l| {
                    out(value_ops::arith(*op, l, r.clone()).map_err(raise)?)
                })
            }),
            Expr::Compare(op, lhs, rhs) => self.eval(rhs, env, input, &mut |r| {
                self.eval(lhs, env, input, &mut |l| {
                    out(Value::Bool(value_ops::compare_op(*op, &l, &r)))
                })
            }),
            Expr::And(lhs, rhs) => self.eval(lhs, env, input, &mut |l| {
                if !truthy(&l) {
                    return out(Value::Bool(false));
                }
                self.eval(rhs, env, input, &mut |r| out(Value::Bool(truthy(&r))))
            }),
            Expr::Or(lhs, rhs) => self.eval(lhs, env, input, &mut |l| {
                if truthy(&l) {
                    return out(Value::Bool(true));
                }
                self.eval(rhs, env, input, &mut |r| out(Value::Bool(truthy(&r))))
            }),
            Expr::Alt(lhs, rhs) => self.eval_alternative(lhs, rhs, env, input, out),
            Expr::Array(None) => out(Value::Array(Vec::new())),
            Expr::Array(Some(inner)) => {
                let items = self.collect(inner, env, input)?;
                out(deep_checked(Value::Array(items))?)
            }
            Expr::Object(entries) => self.eval_object(entries, env, input, Map::new(), out),
            Expr::If { branches, otherwise } => {
                self.eval_if(branches, otherwise.as_deref(), env, input, out)
            }
            Expr::Reduce {
                source,
                var,
                init,
                update,
            } => self.eval(init, env, input, &mut |initial| {
                let mut acc = initial;
                self.eval(source, env, input, &mut |item| {
                    let scoped = env.bind(var, item);
                    let mut last = Value::Null;
                    self.eval(update, &scoped, &acc, &mut |next| {
                        last = next;
                        Ok(())
                    })?;
                    acc = deep_checked(last)?;
                    Ok(())
                })?;
                out(acc)
            }),
            Expr::Foreach {
                source,
                var,
                init,
                update,
                extract,
            } => self.eval(init, env, input, &mut |initial| {
                let mut state = initial;
                self.eval(source, env, input, &mut |item| {
                    let scoped = env.bind(var, item);
                    for next in self.collect(update, &scoped, &state)? {
                        let next = deep_checked(next)?;
                        state = next.clone();
                        match extract {
                            Some(extract) => self.eval(extract, &scoped, &next, out)?,
                            None => out(next)?,
                        }
                    }
                    Ok(())
                })
            }),
            Expr::Bind { source, var, body } => self.eval(source, env, input, &mut |value| {
                let scoped = env.bind(var, value);
                self.eval(body, &scoped, input, out)
            }),
            Expr::Call(builtin, args) => self.call_builtin(*builtin, args, env, input, out),
        }
    }

    fn recurse_all(&self, input: &Value, out: &mut Sink<'_>) -> Result<(), Signal> {
        let mut stack = vec![input.clone()];
        while let Some(current) = stack.pop() {
            self.check_cancel()?;
            match &current {
                Value::Array(items) => stack.extend(items.iter().rev().cloned()),
                Value::Object(map) => {
                    let children: Vec<Value> = map.values().cloned().collect();
                    stack.extend(children.into_iter().rev());
                }
                _ => {}
            }
            out(current)?;
        }
        Ok(())
    }

    /// Iterative driver for `recurse(f)`, `repeat(f)`, `while` and `until`,
    /// producing results depth-first without growing the native stack.
    pub(super) fn unfold(
        &self,
        mode: Unfold<'_>,
        env: &Env,
        input: &Value,
        out: &mut Sink<'_>,
    ) -> Result<(), Signal> {
        let mut stack = vec![Step::Visit(input.clone())];
        while let Some(step) = stack.pop() {
            self.check_cancel()?;
            let mut next = Vec::new();
            match step {
                Step::Emit(value) => {
                    out(value)?;
                    continue;
                }
                Step::Expand(value, update) => {
                    for produced in self.collect(update, env, &value)? {
                        next.push(Step::Visit(deep_checked(produced)?));
                    }
                }
                Step::Visit(value) => match mode {
                    Unfold::Recurse(f) => {
                        next.push(Step::Emit(value.clone()));
                        next.push(Step::Expand(value, f));
                    }
                    Unfold::While(cond, update) => {
                        for c in self.collect(cond, env, &value)? {
                            if truthy(&c) {
                                next.push(Step::Emit(value.clone()));
                                next.push(Step::Expand(value.clone(), update));
                            }
                        }
                    }
                    Unfold::Until(cond, update) => {
                        for c in self.collect(cond, env, &value)? {
                            if truthy(&c) {
                                next.push(Step::Emit(value.clone()));
                            } else {
                                next.push(Step::Expand(value.clone(), update));
                            }
                        }
                    }
                },
            }
            stack.extend(next.into_iter().rev());
        }
        Ok(())
    }

    /// `try` only guards its body: errors raised by downstream consumers
    /// propagate untouched, and the body is abandoned after its first error.
    fn eval_try(
        &self,
        body: &Expr,
        handler: Option<&Expr>,
        env: &Env,
        input: &Value,
        out: &mut Sink<'_>,
    ) -> Result<(), Signal> {
        let label = self.fresh_label();
        let mut downstream = None;
        let result = self.eval(body, env, input, &mut |v| {
            out(v).map_err(|err| {
                downstream = Some(err);
                Signal::Stop(label)
            })
        });
        if let Some(err) = downstream {
            return Err(err);
        }
        match result {
            Err(Signal::Error(error)) => match handler {
                Some(handler) => self.eval(handler, env, &error, out),
                None => Ok(()),
            },
            other => other,
        }
    }

    fn eval_alternative(
        &self,
        lhs: &Expr,
        rhs: &Expr,
        env: &Env,
        input: &Value,
        out: &mut Sink<'_>,
    ) -> Result<(), Signal> {
        let label = self.fresh_label();
        let mut produced = false;
        let mut downstream = None;
        let result = self.eval(lhs, env, input, &mut |v| {
            if !truthy(&v) {
                return Ok(());
            }
            produced = true;
            out(v).map_err(|err| {
                downstream = Some(err);
                Signal::Stop(label)
            })
        });
        if let Some(err) = downstream {
            return Err(err);
        }
        match result {
            Ok(()) | Err(Signal::Error(_)) => {}
            Err(other) => return Err(other),
        }
        if produced {
            Ok(())
        } else {
            self.eval(rhs, env, input, out)
        }
    }

    fn eval_if(
        &self,
        branches: &[(Expr, Expr)],
        otherwise: Option<&Expr>,
        env: &Env,
        input: &Value,
        out: &mut Sink<'_>,
    ) -> Result<(), Signal> {
        let Some(((cond, then), rest)) = branches.split_first() else {
            return match otherwise {
                Some(expr) => self.eval(expr, env, input, out),
                None => out(input.clone()),
            };
        };
        self.eval(cond, env, input, &mut |c| {
            if truthy(&c) {
                self.eval(then, env, input, out)
            } else {
                self.eval_if(rest, otherwise, env, input, out)
            }
        })
    }

    fn eval_string(
        &self,
        format: Option<&str>,
        parts: &[StrSegment],
        env: &Env,
        input: &Value,
        prefix: String,
        out: &mut Sink<'_>,
    ) -> Result<(), Signal> {
        let Some((part, rest)) = parts.split_first() else {
            return out(Value::String(prefix));
        };
        match part {
            StrSegment::Text(text) => {
                self.eval_string(format, rest, env, input, prefix + text, out)
            }
            StrSegment::Interp(expr) => self.eval(expr, env, input, &mut |v| {
                let rendered = match format {
                    Some(name) => apply_format(name, &v)?,
                    None => value_ops::to_text(&v),
                };
                self.eval_string(format, rest, env, input, format!("{prefix}{rendered}"), out)
            }),
        }
    }

    fn eval_object(
        &self,
        entries: &[ObjectEntry],
        env: &Env,
        input: &Value,
        built: Map<String, Value>,
        out: &mut Sink<'_>,
    ) -> Result<(), Signal> {
        let Some((entry, rest)) = entries.split_first() else {
            return out(deep_checked(Value::Object(built))?);
        };

        let keys: Vec<String> = match &entry.key {
            ObjectKey::Name(name) | ObjectKey::Var(name) => vec![name.clone()],
            ObjectKey::Computed(expr) => self
                .collect(expr, env, input)?
                .into_iter()
                .map(|k| match k {
                    Value::String(s) => Ok(s),
                    other => Err(raise(format!(
                        "Object keys must be strings, got {}",
                        value_ops::describe(&other)
                    ))),
                })
                .collect::<Result<_, _>>()?,
        };

        let values = match (&entry.value, &entry.key) {
            (Some(expr), _) => self.collect(expr, env, input)?,
            (None, ObjectKey::Var(name)) => vec![env.get(name).cloned().unwrap_or(Value::Null)],
            (None, ObjectKey::Name(name)) => {
                vec![value_ops::index(input, &Value::String(name.clone())).map_err(raise)?]
            }
            (None, ObjectKey::Computed(_)) => Vec::new(),
        };

        for key in &keys {
            for value in &values {
                let mut next = built.clone();
                next.insert(key.clone(), value.clone());
                self.eval_object(rest, env, input, next, out)?;
            }
        }
        Ok(())
    }
}

/// Values carried across loop iterations or wrapped by a constructor are
/// checked so no filter can build an arbitrarily deep value.
pub(super) fn deep_checked(value: Value) -> Result<Value, Signal> {
    value_ops::guard_depth(value).map_err(raise)
}

/// Accepts input with or without trailing `=` padding.
const BASE64_LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

pub(super) fn apply_format(name: &str, value: &Value) -> Result<String, Signal> {
    match name {
        "text" => Ok(value_ops::to_text(value)),
        "json" => Ok(value_ops::to_json(value)),
        "base64" => Ok(STANDARD.encode(value_ops::to_text(value))),
        "base64d" => {
            let decoded = BASE64_LENIENT
                .decode(value_ops::to_text(value).trim())
                .map_err(|_| raise(format!("{} is not valid base64 data", value_ops::describe(value))))?;
            Ok(String::from_utf8_lossy(&decoded).into_owned())
        }
        "html" => Ok(value_ops::to_text(value)
            .replace('&', "&amp;")
            .replace('<', "&lt;")
            .replace('>', "&gt;")
            .replace('\'', "&#39;")
            .replace('"', "&quot;")),
        "uri" => Ok(value_ops::to_text(value)
            .bytes()
            .map(|b| {
                if b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.' | b'~') {
                    (b as char).to_string()
                } else {
                    format!("%{b:02X}")
                }
            })
            .collect()),
        "csv" | "tsv" | "sh" => format_row(name, value),
        other => Err(raise(format!("{other} is not a valid format"))),
    }
}

fn format_row(name: &str, value: &Value) -> Result<String, Signal> {
    let items: Vec<&Value> = match (name, value) {
        (_, Value::Array(items)) => items.iter().collect(),
        ("sh", scalar) => vec![scalar],
        (_, other) => {
            return Err(raise(format!(
                "{} cannot be {}-formatted, only an array can be",
                value_ops::describe(other),
                name
            )))
        }
    };

    let mut cells = Vec::with_capacity(items.len());
    for item in items {
        let cell = match (name, item) {
            (_, Value::Array(_) | Value::Object(_)) => {
                return Err(raise(format!(
                    "{} is not valid in a {} row",
                    value_ops::describe(item),
                    name
                )))
            }
            ("csv", Value::String(s)) => format!("\"{}\"", s.replace('"', "\"\"")),
            ("tsv", Value::String(s)) => s
                .replace('\\', "\\\\")
                .replace('\t', "\\t")
                .replace('\r', "\\r")
                .replace('\n', "\\n"),
            ("sh", Value::String(s)) => format!("'{}'", s.replace('\'', "'\\''")),
            (_, Value::Null) if name != "sh" => String::new(),
            (_, other) => value_ops::to_json(other),
        };
        cells.push(cell);
    }

    let separator = match name {
        "csv" => ",",
        "tsv" => "\t",
        _ => " ",
    };
    Ok(cells.join(separator))
}
