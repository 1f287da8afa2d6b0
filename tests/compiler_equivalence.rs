//! Compiler equivalence
//!
//! For every schema, input, and option set, the compiled closures must
//! agree with the interpreted walker on success/failure, on the output
//! value, and on the full error list in order. Compilation is a
//! performance transform, never a behavior change.

use vetter::{
    any, array, boolean, compile, compile_with, discriminated_union, enumeration, integer,
    intersection, lazy, literal, number, object, record, record_with_keys, string, tuple, union,
    Options, Schema, Value,
};

/// Assert interpreted and compiled agree for both option sets, and that
/// the boolean fast paths agree.
fn assert_equivalent(schema: &Schema, inputs: &[Value]) {
    for opts in [Options::default(), Options::collect_all()] {
        let compiled = compile_with(schema, &opts);
        for input in inputs {
            let interpreted = schema.validate_with(input, &opts);
            let emitted = compiled.run(input);
            assert_eq!(
                interpreted, emitted,
                "interpreted and compiled disagree on {:?}",
                input
            );
        }
    }
    let compiled = compile(schema);
    for input in inputs {
        assert_eq!(
            schema.is(input),
            compiled.check(input),
            "is() and check() disagree on {:?}",
            input
        );
    }
}

/// A spread of values that exercises every kind test.
fn probe_values() -> Vec<Value> {
    vec![
        Value::Null,
        Value::Bool(true),
        Value::Int(0),
        Value::Int(42),
        Value::Float(1.5),
        Value::from("short"),
        Value::from("a considerably longer string value"),
        Value::array(vec![]),
        Value::array(vec![Value::Int(1), Value::Int(2)]),
        Value::object::<String>([]),
        Value::object([("name", Value::from("Ada")), ("age", Value::Int(36))]),
    ]
}

#[test]
fn test_primitives_equivalent() {
    let schemas = [
        any(),
        boolean(),
        string(),
        string().min_len(3).max_len(10),
        string().email(),
        number(),
        number().min(0.0).max(100.0).multiple_of(2.0),
        integer(),
        literal("short"),
        enumeration(vec![Value::from("short"), Value::Int(42)]),
    ];
    for schema in &schemas {
        assert_equivalent(schema, &probe_values());
    }
}

#[test]
fn test_modifier_flags_equivalent() {
    let schemas = [
        string().nullable(),
        string().optional(),
        string().default_value("d"),
        number().nullable().optional(),
    ];
    for schema in &schemas {
        assert_equivalent(schema, &probe_values());
    }
}

#[test]
fn test_objects_equivalent() {
    let nested = object(vec![
        ("name", string().min_len(1)),
        ("age", number().int().optional()),
        (
            "address",
            object(vec![("city", string()), ("zip", string().min_len(5))]),
        ),
    ]);
    let strict = object(vec![("only", string())]).strict();
    let passthrough = object(vec![("only", string())]).passthrough();

    let inputs = vec![
        Value::object([
            ("name", Value::from("Ada")),
            (
                "address",
                Value::object([("city", Value::from("NYC")), ("zip", Value::from("10001"))]),
            ),
        ]),
        Value::object([
            ("name", Value::from("")),
            ("age", Value::from("not a number")),
            ("address", Value::object([("city", Value::Int(1))])),
        ]),
        Value::object([("only", Value::from("x")), ("extra", Value::Int(1))]),
        Value::object::<String>([]),
        Value::Int(3),
        Value::Null,
    ];

    assert_equivalent(&nested, &inputs);
    assert_equivalent(&strict, &inputs);
    assert_equivalent(&passthrough, &inputs);
}

#[test]
fn test_arrays_and_tuples_equivalent() {
    let schemas = [
        array(number()),
        array(number()).min_items(1).max_items(3),
        array(string()).unique(),
        tuple(vec![string(), number()]),
        tuple(vec![string()]).rest(number()),
    ];
    let inputs = vec![
        Value::array(vec![]),
        Value::array(vec![Value::Int(1)]),
        Value::array(vec![Value::Int(1), Value::Int(2), Value::Int(3), Value::Int(4)]),
        Value::array(vec![Value::from("a"), Value::Int(2)]),
        Value::array(vec![Value::from("a"), Value::from("a")]),
        Value::array(vec![Value::from("a"), Value::Int(1), Value::from("bad")]),
        Value::from("not an array"),
    ];
    for schema in &schemas {
        assert_equivalent(schema, &inputs);
    }
}

#[test]
fn test_unions_equivalent() {
    let plain = union(vec![literal("a"), number(), boolean()]);
    let tagged = discriminated_union(
        "kind",
        vec![
            (
                Value::from("circle"),
                object(vec![("kind", literal("circle")), ("radius", number())]),
            ),
            (
                Value::from("square"),
                object(vec![("kind", literal("square")), ("side", number())]),
            ),
        ],
    );

    let inputs = vec![
        Value::from("a"),
        Value::from("c"),
        Value::Int(2),
        Value::Bool(false),
        Value::object([("kind", Value::from("circle")), ("radius", Value::Int(3))]),
        Value::object([("kind", Value::from("circle")), ("radius", Value::from("r"))]),
        Value::object([("kind", Value::from("hexagon"))]),
        Value::object::<String>([]),
        Value::Null,
    ];
    assert_equivalent(&plain, &inputs);
    assert_equivalent(&tagged, &inputs);
}

#[test]
fn test_intersection_and_record_equivalent() {
    let both = intersection(
        object(vec![("a", number())]).passthrough(),
        object(vec![("b", string())]).passthrough(),
    );
    let rec = record(number());
    let keyed = record_with_keys(string().min_len(2), number());

    let inputs = vec![
        Value::object([("a", Value::Int(1)), ("b", Value::from("x"))]),
        Value::object([("a", Value::from("bad")), ("b", Value::Int(2))]),
        Value::object([("aa", Value::Int(1)), ("b", Value::Int(2))]),
        Value::object::<String>([]),
        Value::Int(1),
    ];
    assert_equivalent(&both, &inputs);
    assert_equivalent(&rec, &inputs);
    assert_equivalent(&keyed, &inputs);
}

#[test]
fn test_decorators_equivalent() {
    let refined = string().refine(|v| v.as_str().is_some_and(|s| s.contains('@')), "needs @");
    let transformed = string().transform(|v| {
        Ok(Value::string(
            v.as_str().map(str::to_uppercase).unwrap_or_default(),
        ))
    });
    let failing_transform = string().transform(|_| Err("always fails".to_string()));
    let preprocessed = number().preprocess(|v| match v {
        Value::Str(s) => s.parse::<i64>().map(Value::Int).map_err(|e| e.to_string()),
        other => Ok(other),
    });
    let piped = string()
        .transform(|v| {
            Ok(Value::Int(
                v.as_str().map(|s| s.chars().count() as i64).unwrap_or(0),
            ))
        })
        .pipe(number().min(3.0));
    let cross_checked = object(vec![("a", number()), ("b", number())]).super_refine(|v, ctx| {
        if let Some(map) = v.as_object() {
            if map.get("a") == map.get("b") {
                ctx.add_issue("b", "must differ from a");
            }
        }
    });

    let inputs = vec![
        Value::from("user@example.com"),
        Value::from("plain"),
        Value::from("42"),
        Value::Int(7),
        Value::object([("a", Value::Int(1)), ("b", Value::Int(1))]),
        Value::object([("a", Value::Int(1)), ("b", Value::Int(2))]),
        Value::Null,
    ];

    for schema in [
        &refined,
        &transformed,
        &failing_transform,
        &preprocessed,
        &piped,
        &cross_checked,
    ] {
        assert_equivalent(schema, &inputs);
    }
}

fn tree() -> Schema {
    object(vec![
        ("label", string()),
        ("nodes", array(lazy(tree)).optional()),
    ])
}

#[test]
fn test_recursive_schema_equivalent() {
    let schema = tree();
    let inputs = vec![
        Value::object([("label", Value::from("root"))]),
        Value::object([
            ("label", Value::from("root")),
            (
                "nodes",
                Value::array(vec![Value::object([
                    ("label", Value::from("child")),
                    ("nodes", Value::array(vec![])),
                ])]),
            ),
        ]),
        Value::object([
            ("label", Value::from("root")),
            (
                "nodes",
                Value::array(vec![Value::object([("label", Value::Int(1))])]),
            ),
        ]),
    ];
    assert_equivalent(&schema, &inputs);
}

/// Shared children compile once and still validate correctly from both
/// parents.
#[test]
fn test_shared_child_compiles_once() {
    let shared = string().min_len(2);
    let schema = object(vec![("a", shared.clone()), ("b", shared)]);
    let inputs = vec![
        Value::object([("a", Value::from("ok")), ("b", Value::from("ok"))]),
        Value::object([("a", Value::from("x")), ("b", Value::from("ok"))]),
    ];
    assert_equivalent(&schema, &inputs);
}

/// The compiled path preserves the strip-unknown identity invariant.
#[test]
fn test_compiled_strip_identity() {
    let schema = object(vec![("name", string())]);
    let input = Value::object([("name", Value::from("Ada"))]);

    let compiled = compile(&schema);
    match compiled.run(&input) {
        vetter::Validated::Valid(output) => assert!(Value::ptr_eq(&input, &output)),
        vetter::Validated::Invalid(errors) => panic!("unexpected errors: {:?}", errors),
    }
}

/// Chaining onto a node after compiling it does not disturb the
/// compiled validator.
#[test]
fn test_compiled_validator_immune_to_later_chaining() {
    let base = string();
    let compiled = compile(&base);

    // Further chaining returns new nodes; the compiled closure still
    // validates against the original rules.
    let _stricter = base.min_len(100);
    assert!(compiled.run(&Value::from("short")).is_valid());
}
