//! JQ-family filter language: lexer, parser and a streaming evaluator.
//!
//! A [`Filter`] is parsed once (at webhook registration) and then executed
//! for every ingested payload. Parsing resolves every builtin and variable,
//! so a filter that parses can only fail at runtime on its input data.

mod ast;
mod builtins;
mod interpreter;
mod lexer;
mod parser;
mod value_ops;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;

use interpreter::{deep_checked, Env, Interpreter, Signal};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid filter at position {position}: {message}")]
pub struct FilterError {
    pub message: String,
    pub position: usize,
}

impl FilterError {
    pub(crate) fn new(message: impl Into<String>, position: usize) -> Self {
        Self {
            message: message.into(),
            position,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecError {
    #[error("{0}")]
    Raised(String),

    #[error("halted with error: {0}")]
    HaltError(String),

    #[error("filter execution cancelled")]
    Cancelled,
}

/// How a run finished when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunEnd {
    Completed,
    /// `halt` stopped the program; results emitted so far stand.
    Halted,
}

/// Shared flag polled by the evaluator between steps.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    /// Returns a guard that raises the flag when dropped, unless disarmed.
    pub fn guard(&self) -> CancelOnDrop {
        CancelOnDrop {
            flag: self.clone(),
            armed: true,
        }
    }
}

pub struct CancelOnDrop {
    flag: CancelFlag,
    armed: bool,
}

impl CancelOnDrop {
    pub fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        if self.armed {
            self.flag.cancel();
        }
    }
}

fn message_of(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => format!("{} (not a string)", value_ops::to_json(other)),
    }
}

/// A parsed, ready-to-run filter expression.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    expr: ast::Expr,
}

impl Filter {
    pub fn parse(source: &str) -> Result<Self, FilterError> {
        let expr = parser::parse(source)?;
        Ok(Self { expr })
    }

    /// Streams every result of running the filter on `input` into `sink`.
    pub fn for_each(
        &self,
        input: &Value,
        cancel: &CancelFlag,
        mut sink: impl FnMut(Value),
    ) -> Result<RunEnd, ExecError> {
        let interpreter = Interpreter::new(cancel);
        let result = interpreter.eval(&self.expr, &Env::default(), input, &mut |v| {
            sink(deep_checked(v)?);
            Ok(())
        });
        match result {
            Ok(()) => Ok(RunEnd::Completed),
            Err(Signal::Halt) => Ok(RunEnd::Halted),
            Err(Signal::Error(value)) => Err(ExecError::Raised(message_of(&value))),
            Err(Signal::HaltError(value)) => Err(ExecError::HaltError(message_of(&value))),
            Err(Signal::Cancelled) => Err(ExecError::Cancelled),
            Err(Signal::Stop(_)) => Ok(RunEnd::Completed),
        }
    }

    /// Collects every result; convenience for callers that need them all.
    pub fn run(&self, input: &Value, cancel: &CancelFlag) -> Result<(Vec<Value>, RunEnd), ExecError> {
        let mut results = Vec::new();
        let end = self.for_each(input, cancel, |v| results.push(v))?;
        Ok((results, end))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn run(filter: &str, input: Value) -> Vec<Value> {
        Filter::parse(filter)
            .unwrap_or_else(|e| panic!("{filter}: {e}"))
            .run(&input, &CancelFlag::new())
            .unwrap_or_else(|e| panic!("{filter}: {e}"))
            .0
    }

    fn one(filter: &str, input: Value) -> Value {
        let mut results = run(filter, input);
        assert_eq!(results.len(), 1, "{filter} produced {results:?}");
        results.remove(0)
    }

    fn fails(filter: &str, input: Value) -> ExecError {
        Filter::parse(filter)
            .unwrap()
            .run(&input, &CancelFlag::new())
            .expect_err(filter)
    }

    #[test]
    fn test_paths_and_iteration() {
        let doc = json!({"a": {"b": [1, 2, 3]}, "c": "x"});
        assert_eq!(one(".a.b[1]", doc.clone()), json!(2));
        assert_eq!(run(".a.b[]", doc.clone()), vec![json!(1), json!(2), json!(3)]);
        assert_eq!(one(".a.b[1:]", doc.clone()), json!([2, 3]));
        assert_eq!(one(".[\"c\"]", doc.clone()), json!("x"));
        assert_eq!(one(".missing.deeper", doc.clone()), Value::Null);
        assert_eq!(run(".c[]?", doc), Vec::<Value>::new());
    }

    #[test]
    fn test_comma_and_cartesian_arithmetic() {
        assert_eq!(
            run("(1,2) + (10,20)", Value::Null),
            vec![json!(11), json!(12), json!(21), json!(22)]
        );
        assert_eq!(one("[.[] * 2]", json!([1, 2])), json!([2, 4]));
        assert_eq!(one("10 / 4", Value::Null), json!(2.5));
        assert_eq!(one("7 % 3", Value::Null), json!(1));
    }

    #[test]
    fn test_object_construction() {
        let input = json!({"user": "ana", "id": 7, "k": "dyn"});
        assert_eq!(
            one("{user, id: .id, (.k): 1, \"lit\": true}", input.clone()),
            json!({"user": "ana", "id": 7, "dyn": 1, "lit": true})
        );
        assert_eq!(
            run("{a: (1, 2)}", Value::Null),
            vec![json!({"a": 1}), json!({"a": 2})]
        );
        assert_eq!(one(".id as $v | {$v}", input), json!({"v": 7}));
    }

    #[test]
    fn test_string_interpolation_and_formats() {
        let input = json!({"name": "ana", "n": 3});
        assert_eq!(one("\"hi \\(.name) x\\(.n)\"", input.clone()), json!("hi ana x3"));
        assert_eq!(one(".name | @base64", input.clone()), json!("YW5h"));
        assert_eq!(one("\"YW5h\" | @base64d", Value::Null), json!("ana"));
        assert_eq!(one("@json \"v=\\(.name)\"", input.clone()), json!("v=\"ana\""));
        assert_eq!(one("[1, \"a\"] | @csv", Value::Null), json!("1,\"a\""));
        assert_eq!(one("@text", json!([1])), json!("[1]"));
    }

    #[test]
    fn test_conditionals_and_alternative() {
        let branches = "if . > 1 then \"big\" elif . == 1 then \"one\" else \"small\" end";
        assert_eq!(one(branches, json!(1)), json!("one"));
        assert_eq!(one(branches, json!(0)), json!("small"));
        assert_eq!(one(".a // \"default\"", json!({})), json!("default"));
        assert_eq!(one(".a // \"default\"", json!({"a": false})), json!("default"));
        assert_eq!(run("(1, null, 2) // 3", Value::Null), vec![json!(1), json!(2)]);
        assert_eq!(one("error(\"x\") // 3", Value::Null), json!(3));
        assert_eq!(
            run("true and (1, null) | not", Value::Null),
            vec![json!(false), json!(true)]
        );
    }

    #[test]
    fn test_reduce_and_foreach() {
        assert_eq!(one("reduce .[] as $x (0; . + $x)", json!([1, 2, 3])), json!(6));
        assert_eq!(
            run("foreach .[] as $x (0; . + $x; [$x, .])", json!([1, 2])),
            vec![json!([1, 1]), json!([2, 3])]
        );
        assert_eq!(one("reduce empty as $x (5; . + 1)", Value::Null), json!(5));
    }

    #[test]
    fn test_try_catch() {
        assert_eq!(one("try error(\"boom\") catch .", Value::Null), json!("boom"));
        assert_eq!(run("try error(\"boom\")", Value::Null), Vec::<Value>::new());
        assert_eq!(run("[.[] | try tonumber]", json!(["1", "x", "3"])), vec![json!([1, 3])]);
        // the body stops at its first error
        assert_eq!(run("try (1, error(\"x\"), 2) catch .", Value::Null), vec![json!(1), json!("x")]);
    }

    #[test]
    fn test_try_does_not_catch_downstream_errors() {
        let err = fails("try (1, 2) | error(\"late\")", Value::Null);
        assert_eq!(err, ExecError::Raised("late".into()));
    }

    #[test]
    fn test_limit_first_nth_until() {
        assert_eq!(run("limit(3; range(10))", Value::Null), vec![json!(0), json!(1), json!(2)]);
        assert_eq!(one("first(range(5; 10))", Value::Null), json!(5));
        assert_eq!(one("nth(2; range(10))", Value::Null), json!(2));
        assert_eq!(one("last(range(5))", Value::Null), json!(4));
        assert_eq!(one("[limit(3; repeat(. * 2))]", json!(1)), json!([1, 2, 4]));
        assert_eq!(one("until(. > 100; . * 2)", json!(1)), json!(128));
        assert_eq!(one("[while(. < 8; . * 2)]", json!(1)), json!([1, 2, 4]));
    }

    #[test]
    fn test_deep_repeat_does_not_overflow() {
        assert_eq!(one("[limit(100000; repeat(. + 1))] | length", json!(0)), json!(100000));
        assert_eq!(one("last(limit(50000; repeat(.)))", json!("x")), json!("x"));
    }

    #[test]
    fn test_collection_builtins() {
        assert_eq!(one("keys", json!({"b": 1, "a": 2})), json!(["a", "b"]));
        assert_eq!(one("map(. + 1)", json!([1, 2])), json!([2, 3]));
        assert_eq!(one("map_values(. * 10)", json!({"a": 1})), json!({"a": 10}));
        assert_eq!(one("[.[] | select(. > 1)]", json!([1, 2, 3])), json!([2, 3]));
        assert_eq!(one("to_entries", json!({"a": 1})), json!([{"key": "a", "value": 1}]));
        assert_eq!(
            one("with_entries({key: (.key + \"x\"), value})", json!({"a": 1})),
            json!({"ax": 1})
        );
        assert_eq!(one("from_entries", json!([{"name": "a", "v": 2}])), json!({"a": 2}));
        assert_eq!(one("add", json!([1, 2, 3])), json!(6));
        assert_eq!(one("add", json!([])), Value::Null);
        assert_eq!(one("any", json!([false, 1])), json!(true));
        assert_eq!(one("all(. > 0)", json!([1, 2])), json!(true));
        assert_eq!(one("any(.[]; . == 2)", json!([1, 2])), json!(true));
        assert_eq!(one("sort_by(.n) | map(.n)", json!([{"n": 2}, {"n": 1}])), json!([1, 2]));
        assert_eq!(one("group_by(. % 2)", json!([1, 2, 3])), json!([[2], [1, 3]]));
        assert_eq!(one("unique", json!([3, 1, 3])), json!([1, 3]));
        assert_eq!(one("unique_by(length)", json!(["a", "bb", "c"])), json!(["a", "bb"]));
        assert_eq!(one("min_by(.a) | .a", json!([{"a": 2}, {"a": 1}])), json!(1));
        assert_eq!(one("max", json!([1, 3, 2])), json!(3));
        assert_eq!(one("flatten", json!([1, [2, [3]]])), json!([1, 2, 3]));
        assert_eq!(one("flatten(1)", json!([1, [2, [3]]])), json!([1, 2, [3]]));
        assert_eq!(one("reverse", json!([1, 2])), json!([2, 1]));
        assert_eq!(one("[paths]", json!({"a": [1]})), json!([["a"], ["a", 0]]));
        assert_eq!(one("[leaf_paths]", json!({"a": [1]})), json!([["a", 0]]));
        assert_eq!(one("getpath([\"a\", 0])", json!({"a": [5]})), json!(5));
        assert_eq!(one("[.. | numbers]", json!({"a": [1, {"b": 2}]})), json!([1, 2]));
        assert_eq!(
            run("has(\"a\"), (\"a\" | in({\"a\": 1}))", json!({"a": 1})),
            vec![json!(true), json!(true)]
        );
        assert_eq!(one("indices(1)", json!([1, 2, 1])), json!([0, 2]));
        assert_eq!(one("isempty(empty)", Value::Null), json!(true));
    }

    #[test]
    fn test_string_builtins() {
        assert_eq!(one("split(\",\")", json!("a,b")), json!(["a", "b"]));
        assert_eq!(one("join(\"-\")", json!(["a", 1, null])), json!("a-1-"));
        assert_eq!(one("ascii_upcase", json!("abc")), json!("ABC"));
        assert_eq!(one("ltrimstr(\"foo\")", json!("foobar")), json!("bar"));
        assert_eq!(one("startswith(\"fo\")", json!("foo")), json!(true));
        assert_eq!(one("test(\"A\"; \"i\")", json!("abc")), json!(true));
        assert_eq!(one("sub(\"o\"; \"0\")", json!("foo")), json!("f0o"));
        assert_eq!(one("gsub(\"o\"; \"0\")", json!("foo")), json!("f00"));
        assert_eq!(
            one("gsub(\"(?<d>[0-9])\"; \"<\\(.d)>\")", json!("a1b2")),
            json!("a<1>b<2>")
        );
        assert_eq!(one("[splits(\", *\")]", json!("a, b,c")), json!(["a", "b", "c"]));
        assert_eq!(one("capture(\"(?<y>\\\\d+)\")", json!("in 2024")), json!({"y": "2024"}));
        assert_eq!(one("tojson | fromjson", json!({"a": [1]})), json!({"a": [1]}));
        assert_eq!(one("tostring", json!(1)), json!("1"));
        assert_eq!(one("tonumber", json!("2.5")), json!(2.5));
        assert_eq!(one("length", json!("héllo")), json!(5));
        assert_eq!(one("utf8bytelength", json!("héllo")), json!(6));
        assert_eq!(one("explode | implode", json!("hé")), json!("hé"));
        assert_eq!(
            run("index(\"b\"), rindex(\"b\")", json!("abcb")),
            vec![json!(1), json!(3)]
        );
        assert_eq!(one("65 | ascii", Value::Null), json!("A"));
    }

    #[test]
    fn test_math_builtins() {
        assert_eq!(one("floor", json!(1.7)), json!(1));
        assert_eq!(one("ceil", json!(1.2)), json!(2));
        assert_eq!(one("round", json!(1.5)), json!(2));
        assert_eq!(one("sqrt", json!(9)), json!(3));
        assert_eq!(one("fabs", json!(-2)), json!(2));
        assert_eq!(run("range(0; 10; 4)", Value::Null), vec![json!(0), json!(4), json!(8)]);
        assert_eq!(run("range(3; 0; -1)", Value::Null), vec![json!(3), json!(2), json!(1)]);
    }

    #[test]
    fn test_errors_carry_messages() {
        assert_eq!(fails("error(\"custom\")", Value::Null), ExecError::Raised("custom".into()));
        assert_eq!(
            fails("error({\"a\": 1})", Value::Null),
            ExecError::Raised("{\"a\":1} (not a string)".into())
        );
        assert_eq!(
            fails(".a", json!("text")),
            ExecError::Raised("Cannot index string with \"a\"".into())
        );
        assert_eq!(
            fails("1 + \"a\"", Value::Null),
            ExecError::Raised("number (1) and string (\"a\") cannot be added".into())
        );
        assert!(matches!(fails("\"x\" | halt_error", Value::Null), ExecError::HaltError(_)));
    }

    #[test]
    fn test_halt_keeps_collected_results() {
        let filter = Filter::parse("1, 2, halt, 3").unwrap();
        let (results, end) = filter.run(&Value::Null, &CancelFlag::new()).unwrap();
        assert_eq!(results, vec![json!(1), json!(2)]);
        assert_eq!(end, RunEnd::Halted);
    }

    #[test]
    fn test_cancelled_flag_aborts_infinite_generator() {
        let filter = Filter::parse("repeat(.)").unwrap();
        let cancel = CancelFlag::new();
        let trigger = cancel.clone();
        let mut seen = 0;
        let result = filter.for_each(&json!(1), &cancel, |_| {
            seen += 1;
            if seen == 1000 {
                trigger.cancel();
            }
        });
        assert_eq!(result, Err(ExecError::Cancelled));
        assert_eq!(seen, 1000);
    }

    #[test]
    fn test_drop_guard_raises_flag() {
        let cancel = CancelFlag::new();
        {
            let _guard = cancel.guard();
        }
        assert!(cancel.is_cancelled());

        let cancel = CancelFlag::new();
        cancel.guard().disarm();
        assert!(!cancel.is_cancelled());
    }

    #[test]
    fn test_deep_values_are_rejected() {
        let err = fails("reduce range(.n) as $i (null; [.])", json!({"n": 200_000}));
        assert!(err.to_string().contains("nested deeper"), "{err}");

        let err = fails("[limit(100000; repeat({a: .}))] | last", json!(1));
        assert!(err.to_string().contains("nested deeper"), "{err}");

        let err = fails("last(foreach range(1000) as $i (.; {a: .}))", json!({"a": 1}));
        assert!(err.to_string().contains("nested deeper"), "{err}");

        assert_eq!(one("reduce range(3) as $i (null; [.])", json!({})), json!([[[null]]]));
    }

    #[test]
    fn test_string_repeat_overflow_is_catchable() {
        let err = fails(r#""ab" * .n"#, json!({"n": 1e19}));
        assert_eq!(err, ExecError::Raised("repeat string result too long".into()));
        assert_eq!(one(r#"try ("ab" * .n) catch "capped""#, json!({"n": 1e11})), json!("capped"));
    }

    #[test]
    fn test_parse_errors_report_position() {
        let err = Filter::parse(".a | nosuch").unwrap_err();
        assert_eq!(err.position, 5);
        assert_eq!(err.to_string(), "invalid filter at position 5: nosuch/0 is not defined");
    }
}
