//! Asynchronous execution invariants
//!
//! Behavior pinned here:
//! - Parallel arrays reassemble results and errors in index order no
//!   matter when each element completes
//! - A suspension-free tree degrades to synchronous execution
//! - Failing or timed-out async stages fold into validation errors
//! - The await chain runs preprocess, inner, refine, transform in order

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::FutureExt;
use tokio::time::sleep;

use vetter::{
    array, compile, number, object, string, with_timeout, ErrorKind, Options, Validated, Value,
};

fn valid_output(result: Validated<Value>) -> Value {
    match result {
        Validated::Valid(v) => v,
        Validated::Invalid(errors) => panic!("expected success, got {:?}", errors),
    }
}

fn errors_of(result: Validated<Value>) -> Vec<vetter::ValidationError> {
    match result {
        Validated::Valid(v) => panic!("expected failure, got {:?}", v),
        Validated::Invalid(errors) => errors,
    }
}

/// Uppercase each string after a delay inversely proportional to its
/// length, so later indices complete first.
fn slow_uppercase() -> vetter::Schema {
    string().transform_async(|v| async move {
        let s = v.as_str().unwrap_or_default().to_string();
        let delay = 50u64.saturating_sub(s.len() as u64 * 15);
        sleep(Duration::from_millis(delay)).await;
        Ok(Value::string(s.to_uppercase()))
    })
}

// =============================================================================
// Parallel Array Ordering
// =============================================================================

/// Results keep ascending index order regardless of completion order.
#[tokio::test]
async fn test_parallel_preserves_index_order() {
    let schema = array(slow_uppercase()).parallel();
    let input = Value::array(vec![
        Value::from("a"),
        Value::from("bb"),
        Value::from("ccc"),
    ]);

    let output = valid_output(schema.validate_async(&input).await);
    let items = output.as_array().unwrap();
    assert_eq!(items[0].as_str(), Some("A"));
    assert_eq!(items[1].as_str(), Some("BB"));
    assert_eq!(items[2].as_str(), Some("CCC"));
}

/// Collected errors keep ascending index order under collect-all.
#[tokio::test]
async fn test_parallel_errors_ascending() {
    let checker = string().refine_async(
        |v| async move {
            let len = v.as_str().map(|s| s.len()).unwrap_or(0);
            // Shorter values fail later, to scramble completion order.
            sleep(Duration::from_millis(40u64.saturating_sub(len as u64 * 10))).await;
            Ok(len >= 2)
        },
        "too short",
    );
    let schema = array(checker).parallel();
    let input = Value::array(vec![
        Value::from("x"),
        Value::from("okay"),
        Value::from("y"),
    ]);

    let errors = errors_of(
        schema
            .validate_async_with(&input, &Options::collect_all())
            .await,
    );
    assert_eq!(errors.len(), 2);
    assert_eq!(errors[0].path, "[0]");
    assert_eq!(errors[1].path, "[2]");
}

/// Abort-early in parallel mode surfaces the first error in index
/// order, matching the sequential result exactly.
#[tokio::test]
async fn test_parallel_matches_sequential() {
    let checker = string().refine_async(
        |v| async move { Ok(v.as_str().map(|s| s.len() >= 2).unwrap_or(false)) },
        "too short",
    );
    let sequential = array(checker.clone());
    let parallel = array(checker).parallel();
    let input = Value::array(vec![
        Value::from("x"),
        Value::from("okay"),
        Value::from("y"),
    ]);

    for opts in [Options::default(), Options::collect_all()] {
        let seq = sequential.validate_async_with(&input, &opts).await;
        let par = parallel.validate_async_with(&input, &opts).await;
        assert_eq!(seq, par);
    }
}

// =============================================================================
// Degradation to Synchronous Execution
// =============================================================================

/// A tree without suspending work completes without ever yielding.
#[tokio::test]
async fn test_sync_tree_never_suspends() {
    let schema = object(vec![("name", string()), ("age", number())]);
    let input = Value::object([("name", Value::from("Ada")), ("age", Value::Int(36))]);

    let result = schema
        .validate_async(&input)
        .now_or_never()
        .expect("suspension-free validation must complete immediately");
    assert!(result.is_valid());
}

/// The synchronous entry point refuses to run suspending work, as a
/// well-formed error rather than a panic or a silent upgrade.
#[test]
fn test_async_stage_rejected_by_sync_validate() {
    let schema = string().refine_async(|_| async { Ok(true) }, "m");
    let errors = errors_of(schema.validate(&Value::from("x")));
    assert_eq!(errors[0].kind, ErrorKind::RefinementFailed);
    assert!(errors[0].message.contains("validate_async"));
}

// =============================================================================
// Error Folding
// =============================================================================

/// An async predicate that rejects folds into REFINEMENT_FAILED.
#[tokio::test]
async fn test_async_refine_error_folds() {
    let schema = string().refine_async(
        |_| async { Err("upstream unavailable".to_string()) },
        "unused",
    );
    let errors = errors_of(schema.validate_async(&Value::from("x")).await);
    assert_eq!(errors[0].kind, ErrorKind::RefinementFailed);
    assert_eq!(errors[0].message, "upstream unavailable");
}

/// A timed-out predicate folds into the configured message.
#[tokio::test]
async fn test_timeout_folds_into_refinement_failure() {
    let slow = |_v: Value| async {
        sleep(Duration::from_millis(250)).await;
        Ok(true)
    };
    let schema = string().refine_async(
        with_timeout(slow, Duration::from_millis(10), "verification timed out"),
        "unused",
    );

    let errors = errors_of(schema.validate_async(&Value::from("x")).await);
    assert_eq!(errors[0].kind, ErrorKind::RefinementFailed);
    assert_eq!(errors[0].message, "verification timed out");
}

/// A failing async transform folds into TRANSFORM_FAILED.
#[tokio::test]
async fn test_async_transform_error_folds() {
    let schema = string().transform_async(|_| async { Err("mapping failed".to_string()) });
    let errors = errors_of(schema.validate_async(&Value::from("x")).await);
    assert_eq!(errors[0].kind, ErrorKind::TransformFailed);
    assert_eq!(errors[0].message, "mapping failed");
}

// =============================================================================
// Await Order
// =============================================================================

/// The chain awaits preprocess, then inner validation, then refinement,
/// then transform.
#[tokio::test]
async fn test_await_order_is_fixed() {
    let log: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));

    let pre_log = log.clone();
    let refine_log = log.clone();
    let transform_log = log.clone();

    let schema = number()
        .preprocess_async(move |v| {
            let log = pre_log.clone();
            async move {
                log.lock().unwrap().push("preprocess");
                Ok(v)
            }
        })
        .refine_async(
            move |_| {
                let log = refine_log.clone();
                async move {
                    log.lock().unwrap().push("refine");
                    Ok(true)
                }
            },
            "m",
        )
        .transform_async(move |v| {
            let log = transform_log.clone();
            async move {
                log.lock().unwrap().push("transform");
                Ok(v)
            }
        });

    assert!(schema.validate_async(&Value::Int(1)).await.is_valid());
    assert_eq!(
        *log.lock().unwrap(),
        vec!["preprocess", "refine", "transform"]
    );
}

/// Refinement short-circuit holds through the async path too.
#[tokio::test]
async fn test_async_refine_short_circuit() {
    let calls = Arc::new(AtomicUsize::new(0));
    let schema = {
        let calls = calls.clone();
        string().min_len(5).refine_async(
            move |_| {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(true)
                }
            },
            "unused",
        )
    };

    let errors = errors_of(schema.validate_async(&Value::from("abc")).await);
    assert_eq!(errors[0].kind, ErrorKind::StringTooShort);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

// =============================================================================
// Compiled Async Equivalence
// =============================================================================

/// The compiled async path agrees with the interpreted async path.
#[tokio::test]
async fn test_compiled_async_equivalence() {
    let schema = object(vec![
        (
            "email",
            string().refine_async(
                |v| async move { Ok(v.as_str().is_some_and(|s| s.contains('@'))) },
                "not a known address",
            ),
        ),
        ("age", number().int()),
    ]);
    let compiled = compile(&schema);

    let inputs = vec![
        Value::object([("email", Value::from("a@b.co")), ("age", Value::Int(3))]),
        Value::object([("email", Value::from("nope")), ("age", Value::Int(3))]),
        Value::object([("email", Value::from("a@b.co")), ("age", Value::Float(0.5))]),
        Value::Int(9),
    ];
    for input in &inputs {
        let interpreted = schema.validate_async(input).await;
        let emitted = compiled.run_async(input).await;
        assert_eq!(interpreted, emitted, "disagreement on {:?}", input);
    }
}

/// Parallel mode through the compiled path keeps index order as well.
#[tokio::test]
async fn test_compiled_parallel_order() {
    let schema = array(slow_uppercase()).parallel();
    let compiled = compile(&schema);
    let input = Value::array(vec![
        Value::from("a"),
        Value::from("bb"),
        Value::from("ccc"),
    ]);

    let output = valid_output(compiled.run_async(&input).await);
    let items = output.as_array().unwrap();
    assert_eq!(items[0].as_str(), Some("A"));
    assert_eq!(items[1].as_str(), Some("BB"));
    assert_eq!(items[2].as_str(), Some("CCC"));
}
