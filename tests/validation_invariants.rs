//! Core validation invariants
//!
//! Behavior pinned here:
//! - Error paths compose root-to-leaf (`a.b`, `items[0].name`)
//! - Abort-early surfaces one error; collect-all surfaces every sibling
//!   error in deterministic walk order
//! - Untouched inputs come back pointer-identical under `strip`
//! - Unions return a single no-match verdict
//! - Absence precedence: default wins, then optional, then missing-key

use vetter::{
    array, boolean, date, discriminated_union, enumeration, integer, intersection, lazy, literal,
    number, object, record, record_with_keys, string, tuple, union, ErrorKind, Options, Schema,
    UnknownKeys, Validated, Value,
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

// =============================================================================
// Path Composition
// =============================================================================

/// Nested object errors carry the full dotted path.
#[test]
fn test_nested_object_path() {
    let schema = object(vec![("a", object(vec![("b", string().min_len(3))]))]);
    let input = Value::object([("a", Value::object([("b", Value::from("x"))]))]);

    let errors = errors_of(schema.validate(&input));
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].path, "a.b");
    assert_eq!(errors[0].kind, ErrorKind::StringTooShort);
}

/// Array elements inside objects compose bracketed segments.
#[test]
fn test_array_in_object_path() {
    let schema = object(vec![("items", array(object(vec![("name", string())])))]);
    let input = Value::object([(
        "items",
        Value::array(vec![Value::object([("name", Value::Int(1))])]),
    )]);

    let errors = errors_of(schema.validate(&input));
    assert_eq!(errors[0].path, "items[0].name");
    assert_eq!(errors[0].kind, ErrorKind::NotString);
}

/// Record keys report under `[key: <k>]`, values under the key itself.
#[test]
fn test_record_paths() {
    let schema = record_with_keys(string().min_len(2), number());
    let input = Value::object([("a", Value::from("nope"))]);

    let errors = errors_of(schema.validate_with(&input, &Options::collect_all()));
    assert_eq!(errors.len(), 2);
    assert_eq!(errors[0].path, "[key: a]");
    assert_eq!(errors[0].kind, ErrorKind::RecordInvalidKey);
    assert_eq!(errors[1].path, "a");
    assert_eq!(errors[1].kind, ErrorKind::NotNumber);
}

// =============================================================================
// Abort-Early vs Collect-All
// =============================================================================

/// Default options stop at the first failing sibling.
#[test]
fn test_abort_early_single_error() {
    let schema = object(vec![("x", number()), ("y", number())]);
    let input = Value::object([("x", Value::from("bad")), ("y", Value::from("bad"))]);

    let errors = errors_of(schema.validate(&input));
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].path, "x");
}

/// Collect-all keeps going and reports siblings in declaration order.
#[test]
fn test_collect_all_reports_both() {
    let schema = object(vec![("x", number()), ("y", number())]);
    let input = Value::object([("x", Value::from("bad")), ("y", Value::from("bad"))]);

    let errors = errors_of(schema.validate_with(&input, &Options::collect_all()));
    assert_eq!(errors.len(), 2);
    assert_eq!(errors[0].path, "x");
    assert_eq!(errors[1].path, "y");
}

/// Collect-all on arrays reports element errors in ascending index order.
#[test]
fn test_collect_all_array_ascending() {
    let schema = array(number());
    let input = Value::array(vec![Value::from("a"), Value::Int(1), Value::from("b")]);

    let errors = errors_of(schema.validate_with(&input, &Options::collect_all()));
    assert_eq!(errors.len(), 2);
    assert_eq!(errors[0].path, "[0]");
    assert_eq!(errors[1].path, "[2]");
}

// =============================================================================
// Unknown-Key Policies and Output Identity
// =============================================================================

/// With no unknown keys and no transforming fields, strip returns the
/// input object pointer-identical.
#[test]
fn test_strip_identity() {
    let schema = object(vec![("name", string()), ("age", number())]);
    let input = Value::object([("name", Value::from("Ada")), ("age", Value::Int(36))]);

    let output = valid_output(schema.validate(&input));
    assert!(Value::ptr_eq(&input, &output));
}

/// Unknown keys under strip are dropped, so the output is rebuilt.
#[test]
fn test_strip_drops_unknown_keys() {
    let schema = object(vec![("name", string())]);
    let input = Value::object([("name", Value::from("Ada")), ("extra", Value::Int(1))]);

    let output = valid_output(schema.validate(&input));
    assert!(!Value::ptr_eq(&input, &output));
    let map = output.as_object().unwrap();
    assert!(map.contains_key("name"));
    assert!(!map.contains_key("extra"));
}

/// Passthrough keeps unknown keys and preserves identity when nothing
/// changed.
#[test]
fn test_passthrough_keeps_unknown_keys() {
    let schema = object(vec![("name", string())]).passthrough();
    let input = Value::object([("name", Value::from("Ada")), ("extra", Value::Int(1))]);

    let output = valid_output(schema.validate(&input));
    assert!(Value::ptr_eq(&input, &output));
    assert!(output.as_object().unwrap().contains_key("extra"));
}

/// Strict rejects every undeclared key.
#[test]
fn test_strict_rejects_unknown_keys() {
    let schema = object(vec![("name", string())]).strict();
    let input = Value::object([
        ("name", Value::from("Ada")),
        ("x1", Value::Int(1)),
        ("x2", Value::Int(2)),
    ]);

    let errors = errors_of(schema.validate_with(&input, &Options::collect_all()));
    assert_eq!(errors.len(), 2);
    assert_eq!(errors[0].kind, ErrorKind::ObjectUnknownKey);
    assert_eq!(errors[0].path, "x1");
    assert_eq!(errors[1].path, "x2");
}

/// The option-level policy override wins over the node's own policy.
#[test]
fn test_option_policy_override() {
    let schema = object(vec![("name", string())]).passthrough();
    let input = Value::object([("name", Value::from("Ada")), ("extra", Value::Int(1))]);

    let opts = Options::default().with_unknown_keys(UnknownKeys::Strict);
    let errors = errors_of(schema.validate_with(&input, &opts));
    assert_eq!(errors[0].kind, ErrorKind::ObjectUnknownKey);
}

// =============================================================================
// Absence Precedence
// =============================================================================

/// A configured default substitutes on absence, even on an optional node.
#[test]
fn test_default_wins_over_optional() {
    let schema = object(vec![("v", string().optional().default_value("fallback"))]);
    let input = Value::object::<String>([]);

    let output = valid_output(schema.validate(&input));
    let map = output.as_object().unwrap();
    assert_eq!(map.get("v").unwrap().as_str(), Some("fallback"));
}

/// A default skips the node's own checks entirely.
#[test]
fn test_default_skips_checks() {
    let schema = object(vec![("v", string().min_len(50).default_value("short"))]);
    let input = Value::object::<String>([]);

    let output = valid_output(schema.validate(&input));
    assert_eq!(
        output.as_object().unwrap().get("v").unwrap().as_str(),
        Some("short")
    );
}

/// Optional without a default omits the field from the output.
#[test]
fn test_optional_field_omitted() {
    let schema = object(vec![("v", string().optional())]);
    let input = Value::object::<String>([]);

    let output = valid_output(schema.validate(&input));
    assert!(!output.as_object().unwrap().contains_key("v"));
}

/// A required field that is absent is the parent's missing-key error.
#[test]
fn test_missing_required_key() {
    let schema = object(vec![("name", string())]);
    let input = Value::object::<String>([]);

    let errors = errors_of(schema.validate(&input));
    assert_eq!(errors[0].kind, ErrorKind::ObjectMissingKey);
    assert_eq!(errors[0].path, "name");
}

/// Nullable accepts an explicit null and passes it through; the default
/// does not fire for null, only for absence.
#[test]
fn test_nullable_passes_null_through() {
    let schema = object(vec![("v", string().nullable().default_value("d"))]);
    let input = Value::object([("v", Value::Null)]);

    let output = valid_output(schema.validate(&input));
    assert!(output.as_object().unwrap().get("v").unwrap().is_null());
}

/// Null without nullable is a kind mismatch naming the received kind.
#[test]
fn test_null_without_nullable() {
    let errors = errors_of(string().validate(&Value::Null));
    assert_eq!(errors[0].kind, ErrorKind::NotString);
    assert_eq!(errors[0].message, "expected string, got null");
}

/// Optional chained after a decorator still accepts absence.
#[test]
fn test_optional_through_refine() {
    let field = string().optional().refine(|v| v.as_str() != Some(""), "empty");
    let schema = object(vec![("v", field)]);
    let input = Value::object::<String>([]);

    assert!(schema.validate(&input).is_valid());
}

// =============================================================================
// Unions
// =============================================================================

/// First matching member wins.
#[test]
fn test_union_first_match() {
    let schema = union(vec![literal("a"), literal("b")]);
    let output = valid_output(schema.validate(&Value::from("b")));
    assert_eq!(output.as_str(), Some("b"));
}

/// No match yields exactly one verdict, not per-member diagnostics.
#[test]
fn test_union_no_match_single_error() {
    let schema = union(vec![literal("a"), literal("b")]);
    let errors = errors_of(schema.validate(&Value::from("c")));
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].kind, ErrorKind::UnionNoMatch);
}

/// The discriminated variant surfaces the picked member's diagnostics.
#[test]
fn test_discriminated_union_precise_errors() {
    let schema = discriminated_union(
        "type",
        vec![
            (
                Value::from("circle"),
                object(vec![("type", literal("circle")), ("radius", number())]),
            ),
            (
                Value::from("square"),
                object(vec![("type", literal("square")), ("side", number())]),
            ),
        ],
    );

    let input = Value::object([("type", Value::from("circle")), ("radius", Value::from("r"))]);
    let errors = errors_of(schema.validate(&input));
    assert_eq!(errors[0].path, "radius");
    assert_eq!(errors[0].kind, ErrorKind::NotNumber);

    let missing_tag = Value::object([("radius", Value::Int(1))]);
    let errors = errors_of(schema.validate(&missing_tag));
    assert_eq!(errors[0].kind, ErrorKind::UnionNoMatch);
    assert!(errors[0].message.contains("type"));

    let unknown_tag = Value::object([("type", Value::from("hexagon"))]);
    let errors = errors_of(schema.validate(&unknown_tag));
    assert_eq!(errors[0].kind, ErrorKind::UnionNoMatch);
}

// =============================================================================
// Tuples
// =============================================================================

#[test]
fn test_tuple_exact_length() {
    let schema = tuple(vec![string(), number()]);
    assert!(schema
        .validate(&Value::array(vec![Value::from("a"), Value::Int(1)]))
        .is_valid());

    let errors = errors_of(schema.validate(&Value::array(vec![Value::from("a")])));
    assert_eq!(errors[0].kind, ErrorKind::TupleWrongLength);
}

#[test]
fn test_tuple_rest_continues_indexing() {
    let schema = tuple(vec![string()]).rest(number());
    assert!(schema
        .validate(&Value::array(vec![
            Value::from("head"),
            Value::Int(1),
            Value::Int(2)
        ]))
        .is_valid());

    let errors = errors_of(schema.validate(&Value::array(vec![
        Value::from("head"),
        Value::Int(1),
        Value::from("bad"),
    ])));
    assert_eq!(errors[0].path, "[2]");
    assert_eq!(errors[0].kind, ErrorKind::NotNumber);
}

// =============================================================================
// Arrays
// =============================================================================

#[test]
fn test_array_bounds_before_elements() {
    let schema = array(number()).min_items(2);
    // Bounds fail first; the element error is never reached.
    let errors = errors_of(schema.validate(&Value::array(vec![Value::from("bad")])));
    assert_eq!(errors[0].kind, ErrorKind::ArrayTooShort);
}

#[test]
fn test_array_unique_short_circuits() {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    let calls = Arc::new(AtomicUsize::new(0));
    let counted = {
        let calls = calls.clone();
        number().refine(
            move |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                true
            },
            "never",
        )
    };
    let schema = array(counted).unique();
    let input = Value::array(vec![Value::Int(1), Value::Int(1)]);

    let errors = errors_of(schema.validate(&input));
    assert_eq!(errors[0].kind, ErrorKind::ArrayNotUnique);
    // Uniqueness failed before any per-element validation ran.
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

// =============================================================================
// Refinements and Transforms
// =============================================================================

/// A refinement predicate never runs when inner validation failed.
#[test]
fn test_refine_short_circuit() {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    let calls = Arc::new(AtomicUsize::new(0));
    let schema = {
        let calls = calls.clone();
        string().min_len(5).refine(
            move |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                true
            },
            "unused",
        )
    };

    let errors = errors_of(schema.validate(&Value::from("abc")));
    assert_eq!(errors[0].kind, ErrorKind::StringTooShort);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_refine_failure_message() {
    let schema = string().refine(|v| v.as_str().is_some_and(|s| s.contains('@')), "needs an @");
    let errors = errors_of(schema.validate(&Value::from("nope")));
    assert_eq!(errors[0].kind, ErrorKind::RefinementFailed);
    assert_eq!(errors[0].message, "needs an @");
}

/// A failing transform folds into TRANSFORM_FAILED instead of escaping.
#[test]
fn test_transform_failure_folds() {
    let schema = string().transform(|_| Err("boom".to_string()));
    let errors = errors_of(schema.validate(&Value::from("x")));
    assert_eq!(errors[0].kind, ErrorKind::TransformFailed);
    assert_eq!(errors[0].message, "boom");
}

/// Transforms change the output, which defeats parent identity.
#[test]
fn test_transform_output_and_identity() {
    let upper = string().transform(|v| {
        Ok(Value::string(
            v.as_str().map(str::to_uppercase).unwrap_or_default(),
        ))
    });
    let schema = object(vec![("name", upper)]);
    let input = Value::object([("name", Value::from("ada"))]);

    let output = valid_output(schema.validate(&input));
    assert!(!Value::ptr_eq(&input, &output));
    assert_eq!(
        output.as_object().unwrap().get("name").unwrap().as_str(),
        Some("ADA")
    );
}

/// Preprocess runs before inner validation and can coerce kinds.
#[test]
fn test_preprocess_coercion() {
    let schema = number().preprocess(|v| match v {
        Value::Str(s) => s
            .parse::<i64>()
            .map(Value::Int)
            .map_err(|e| format!("not a number: {}", e)),
        other => Ok(other),
    });

    let output = valid_output(schema.validate(&Value::from("42")));
    assert_eq!(output.as_int(), Some(42));

    let errors = errors_of(schema.validate(&Value::from("no")));
    assert_eq!(errors[0].kind, ErrorKind::TransformFailed);
}

/// Pipe feeds the inner output into a second schema at the same root.
#[test]
fn test_pipe_chains_schemas() {
    let length = string().transform(|v| {
        Ok(Value::Int(
            v.as_str().map(|s| s.chars().count() as i64).unwrap_or(0),
        ))
    });
    let schema = length.pipe(number().min(3.0));

    assert!(schema.validate(&Value::from("long enough")).is_valid());
    let errors = errors_of(schema.validate(&Value::from("ab")));
    assert_eq!(errors[0].kind, ErrorKind::NumberTooSmall);
}

/// super_refine can attach several path-qualified issues at once.
#[test]
fn test_super_refine_multi_issue() {
    let schema = object(vec![
        ("password", string()),
        ("confirm", string()),
    ])
    .super_refine(|v, ctx| {
        let map = match v.as_object() {
            Some(m) => m,
            None => return,
        };
        if map.get("password") != map.get("confirm") {
            ctx.add_issue("password", "passwords do not match");
            ctx.add_issue("confirm", "passwords do not match");
        }
    });

    let input = Value::object([
        ("password", Value::from("one")),
        ("confirm", Value::from("two")),
    ]);
    let errors = errors_of(schema.validate(&input));
    assert_eq!(errors.len(), 2);
    assert_eq!(errors[0].path, "password");
    assert_eq!(errors[1].path, "confirm");
    assert_eq!(errors[0].kind, ErrorKind::RefinementFailed);
}

// =============================================================================
// Intersection
// =============================================================================

#[test]
fn test_intersection_merges_objects() {
    let schema = intersection(
        object(vec![("a", number())]).passthrough(),
        object(vec![("b", string())]).passthrough(),
    );
    let input = Value::object([("a", Value::Int(1)), ("b", Value::from("x"))]);

    let output = valid_output(schema.validate(&input));
    let map = output.as_object().unwrap();
    assert!(map.contains_key("a"));
    assert!(map.contains_key("b"));
}

#[test]
fn test_intersection_collects_both_sides() {
    let schema = intersection(number(), string());
    let errors = errors_of(schema.validate_with(&Value::Bool(true), &Options::collect_all()));
    assert_eq!(errors.len(), 2);
    assert_eq!(errors[0].kind, ErrorKind::NotNumber);
    assert_eq!(errors[1].kind, ErrorKind::NotString);

    // Abort-early stops after the left branch.
    let errors = errors_of(schema.validate(&Value::Bool(true)));
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].kind, ErrorKind::NotNumber);
}

// =============================================================================
// Recursive Schemas
// =============================================================================

fn category() -> Schema {
    object(vec![
        ("name", string()),
        ("children", array(lazy(category)).optional()),
    ])
}

/// A self-referential schema validates to arbitrary depth.
#[test]
fn test_recursive_schema() {
    let schema = category();
    let input = Value::object([
        ("name", Value::from("root")),
        (
            "children",
            Value::array(vec![Value::object([
                ("name", Value::from("leaf")),
                ("children", Value::array(vec![])),
            ])]),
        ),
    ]);
    assert!(schema.validate(&input).is_valid());

    let bad = Value::object([
        ("name", Value::from("root")),
        (
            "children",
            Value::array(vec![Value::object([("name", Value::Int(3))])]),
        ),
    ]);
    let errors = errors_of(schema.validate(&bad));
    assert_eq!(errors[0].path, "children[0].name");
}

// =============================================================================
// Primitives
// =============================================================================

#[test]
fn test_primitive_kind_errors_carry_received_kind() {
    let errors = errors_of(number().validate(&Value::from("x")));
    assert_eq!(errors[0].kind, ErrorKind::NotNumber);
    assert_eq!(errors[0].message, "expected number, got string");

    let errors = errors_of(boolean().validate(&Value::Int(0)));
    assert_eq!(errors[0].kind, ErrorKind::NotBoolean);

    let errors = errors_of(date().validate(&Value::from("2024-01-01")));
    assert_eq!(errors[0].kind, ErrorKind::NotDate);
}

#[test]
fn test_integer_and_bounds() {
    assert!(integer().validate(&Value::Int(5)).is_valid());
    let errors = errors_of(integer().validate(&Value::Float(1.5)));
    assert_eq!(errors[0].kind, ErrorKind::NumberNotInteger);

    let errors = errors_of(number().positive().validate(&Value::Int(0)));
    assert_eq!(errors[0].kind, ErrorKind::NumberTooSmall);
}

#[test]
fn test_enumeration() {
    let schema = enumeration(vec![Value::from("red"), Value::from("green")]);
    assert!(schema.validate(&Value::from("green")).is_valid());
    let errors = errors_of(schema.validate(&Value::from("blue")));
    assert_eq!(errors[0].kind, ErrorKind::EnumMismatch);
}

#[test]
fn test_record_value_validation() {
    let schema = record(number());
    let input = Value::object([("a", Value::Int(1)), ("b", Value::from("x"))]);
    let errors = errors_of(schema.validate(&input));
    assert_eq!(errors[0].path, "b");
    assert_eq!(errors[0].kind, ErrorKind::NotNumber);
}

// =============================================================================
// Fast Check and Parse
// =============================================================================

#[test]
fn test_is_fast_check() {
    let schema = object(vec![("name", string().min_len(2))]);
    assert!(schema.is(&Value::object([("name", Value::from("Ada"))])));
    assert!(!schema.is(&Value::object([("name", Value::from("A"))])));
    assert!(!schema.is(&Value::Int(3)));
}

#[test]
fn test_parse_summarizes_all_errors() {
    let schema = object(vec![("x", number()), ("y", number())]);
    let input = Value::object([("x", Value::from("bad")), ("y", Value::from("bad"))]);

    let failure = schema
        .validate_with(&input, &Options::collect_all())
        .into_result()
        .unwrap_err();
    assert_eq!(failure.errors.len(), 2);
    let text = failure.to_string();
    assert!(text.contains("'x'"));
    assert!(text.contains("'y'"));
}
