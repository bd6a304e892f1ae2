//! Payload transformation through a webhook's filter expression.
//!
//! An empty filter passes the payload through untouched (it must still be
//! valid JSON). Otherwise the filter runs to completion and its results are
//! shaped by count: none is an error, one is returned as-is, several are
//! wrapped in a JSON array in production order.

use std::sync::Arc;

use once_cell::sync::Lazy;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{oneshot, Semaphore};
use tracing::debug;

pub use super::filter::{CancelFlag, ExecError, Filter, FilterError, RunEnd};

#[derive(Debug, Error)]
pub enum TransformError {
    #[error(transparent)]
    InvalidFilter(#[from] FilterError),

    #[error("payload is not valid JSON: {0}")]
    InvalidPayload(String),

    #[error("filter execution failed: {0}")]
    Execution(String),

    #[error("filter produced no results")]
    NoResults,

    #[error("transform was cancelled")]
    Cancelled,
}

impl From<ExecError> for TransformError {
    fn from(err: ExecError) -> Self {
        match err {
            ExecError::Cancelled => TransformError::Cancelled,
            other => TransformError::Execution(other.to_string()),
        }
    }
}

/// Parses `filter` without running it. Blank filters compile to `None`.
pub fn validate_filter(filter: &str) -> Result<Option<Filter>, FilterError> {
    if filter.trim().is_empty() {
        return Ok(None);
    }
    Filter::parse(filter).map(Some)
}

pub fn transform(payload: &str, filter: &str) -> Result<String, TransformError> {
    transform_with_cancel(payload, filter, &CancelFlag::new())
}

pub fn transform_with_cancel(
    payload: &str,
    filter: &str,
    cancel: &CancelFlag,
) -> Result<String, TransformError> {
    let compiled = validate_filter(filter)?;
    apply(payload, compiled.as_ref(), cancel)
}

/// Runs an already compiled filter against a raw payload.
pub fn apply(
    payload: &str,
    filter: Option<&Filter>,
    cancel: &CancelFlag,
) -> Result<String, TransformError> {
    let input: Value = serde_json::from_str(payload)
        .map_err(|e| TransformError::InvalidPayload(e.to_string()))?;

    let Some(filter) = filter else {
        return Ok(payload.to_string());
    };

    let (mut results, end) = filter.run(&input, cancel)?;
    if end == RunEnd::Halted {
        debug!(results = results.len(), "Filter halted early");
    }

    let output = match results.len() {
        0 => return Err(TransformError::NoResults),
        1 => results.remove(0),
        _ => Value::Array(results),
    };
    serde_json::to_string(&output).map_err(|e| TransformError::Execution(e.to_string()))
}

/// Stack size of a filter evaluation thread. Evaluation recurses with the
/// filter tree and the values it builds, both of which are capped well below
/// what this stack holds.
const EVAL_STACK_BYTES: usize = 64 * 1024 * 1024;

/// Evaluations allowed to run at once.
const MAX_CONCURRENT_EVALS: usize = 16;

static EVAL_SLOTS: Lazy<Arc<Semaphore>> =
    Lazy::new(|| Arc::new(Semaphore::new(MAX_CONCURRENT_EVALS)));

/// Runs [`apply`] on a dedicated evaluation thread. Dropping the returned
/// future raises the cancellation flag so an abandoned evaluation stops at
/// its next step.
pub async fn apply_blocking(
    payload: String,
    filter: Option<Arc<Filter>>,
) -> Result<String, TransformError> {
    let cancel = CancelFlag::new();
    let guard = cancel.guard();

    let permit = EVAL_SLOTS
        .clone()
        .acquire_owned()
        .await
        .map_err(|e| TransformError::Execution(format!("transform slots closed: {e}")))?;

    let (tx, rx) = oneshot::channel();
    std::thread::Builder::new()
        .name("filter-eval".into())
        .stack_size(EVAL_STACK_BYTES)
        .spawn(move || {
            let result = apply(&payload, filter.as_deref(), &cancel);
            drop(permit);
            let _ = tx.send(result);
        })
        .map_err(|e| TransformError::Execution(format!("transform thread failed: {e}")))?;

    let joined = rx.await;
    guard.disarm();

    joined.map_err(|_| TransformError::Execution("transform thread exited early".into()))?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_selection() {
        let out = transform(r#"{"foo":"bar","baz":"bat"}"#, ".foo").unwrap();
        assert_eq!(out, r#""bar""#);
    }

    #[test]
    fn test_missing_field_is_null() {
        let out = transform(r#"{"foo":"bar"}"#, ".missing").unwrap();
        assert_eq!(out, "null");
    }

    #[test]
    fn test_multiple_results_become_array() {
        let payload = r#"[{"age":30,"name":"John"},{"age":25,"name":"Jane"}]"#;
        let out = transform(payload, ".[]").unwrap();
        assert_eq!(out, r#"[{"age":30,"name":"John"},{"age":25,"name":"Jane"}]"#);
    }

    #[test]
    fn test_empty_filter_passes_payload_through() {
        let payload = "{ \"keep\" : [1, 2] }";
        assert_eq!(transform(payload, "").unwrap(), payload);
        assert_eq!(transform(payload, "   ").unwrap(), payload);
    }

    #[test]
    fn test_empty_filter_still_requires_json() {
        let err = transform("not json", "").unwrap_err();
        assert!(matches!(err, TransformError::InvalidPayload(_)));
    }

    #[test]
    fn test_zero_results_is_an_error() {
        let err = transform("[]", ".[]").unwrap_err();
        assert!(matches!(err, TransformError::NoResults));
    }

    #[test]
    fn test_invalid_filter_is_reported() {
        let err = transform("{}", ".foo |").unwrap_err();
        assert!(matches!(err, TransformError::InvalidFilter(_)));
        assert!(validate_filter("{a: }").is_err());
        assert!(validate_filter("").unwrap().is_none());
    }

    #[test]
    fn test_execution_error_discards_partial_results() {
        let err = transform("[1, \"a\"]", ".[] | . + 1").unwrap_err();
        match err {
            TransformError::Execution(message) => {
                assert!(message.contains("cannot be added"), "{message}")
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_halt_keeps_results_collected_so_far() {
        let out = transform("[1,2,3]", ".[] | if . == 3 then halt else . end").unwrap();
        assert_eq!(out, "[1,2]");
    }

    #[test]
    fn test_halt_error_fails() {
        let err = transform("{}", "\"stop\" | halt_error").unwrap_err();
        assert!(matches!(err, TransformError::Execution(_)));
    }

    #[test]
    fn test_cancelled_flag_aborts_run() {
        let cancel = CancelFlag::new();
        cancel.cancel();
        let err = transform_with_cancel("1", "repeat(.)", &cancel).unwrap_err();
        assert!(matches!(err, TransformError::Cancelled));
    }

    #[tokio::test]
    async fn test_apply_blocking_runs_compiled_filter() {
        let filter = validate_filter("{total: (.items | add)}").unwrap().map(Arc::new);
        let out = apply_blocking(r#"{"items":[1,2,3]}"#.to_string(), filter)
            .await
            .unwrap();
        assert_eq!(out, r#"{"total":6}"#);
    }

    #[tokio::test]
    async fn test_dropped_future_cancels_evaluation() {
        let filter = validate_filter("last(repeat(.))").unwrap().map(Arc::new);
        let outcome = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            apply_blocking("1".to_string(), filter),
        )
        .await;
        // the timeout drops the future; the blocking task observes the flag and exits
        assert!(outcome.is_err());
    }

    #[test]
    fn test_oversized_filter_is_rejected_before_evaluation() {
        let source = vec!["."; 200_000].join("|");
        assert!(matches!(
            transform("1", &source).unwrap_err(),
            TransformError::InvalidFilter(_)
        ));

        let nested = format!("{}.{}", "[".repeat(300), "]".repeat(300));
        assert!(validate_filter(&nested).is_err());
    }

    #[tokio::test]
    async fn test_deep_results_fail_without_crashing() {
        let filter = validate_filter("reduce range(.n) as $i (null; [.])")
            .unwrap()
            .map(Arc::new);
        let err = apply_blocking(r#"{"n":100000}"#.to_string(), filter)
            .await
            .unwrap_err();
        match err {
            TransformError::Execution(message) => {
                assert!(message.contains("nested deeper"), "{message}")
            }
            other => panic!("unexpected error {other:?}"),
        }

        let filter = validate_filter("reduce range(.n) as $i (null; [.])")
            .unwrap()
            .map(Arc::new);
        let out = apply_blocking(r#"{"n":3}"#.to_string(), filter).await.unwrap();
        assert_eq!(out, "[[[null]]]");
    }

    #[tokio::test]
    async fn test_concurrent_evaluations_all_complete() {
        let filter = validate_filter(".n * 2").unwrap().map(Arc::new);
        let runs = (0..MAX_CONCURRENT_EVALS * 2)
            .map(|n| apply_blocking(format!(r#"{{"n":{n}}}"#), filter.clone()));
        let outputs = futures::future::join_all(runs).await;
        for (n, out) in outputs.into_iter().enumerate() {
            assert_eq!(out.unwrap(), (n * 2).to_string());
        }
    }
}
