//! Asynchronous execution overlay.
//!
//! Mirrors the synchronous walker's contract exactly. A subtree without
//! suspending work never suspends: its future is computed synchronously
//! and returned ready. Suspension happens only at user-supplied
//! asynchronous refinements, transforms, and preprocessors, awaited in
//! fixed order: preprocess, inner validation, refinement, transform.
//! The only concurrency is the array `parallel` mode, which is pure
//! scheduling: results and errors keep ascending index order.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::{join_all, BoxFuture};

use crate::report::{ErrorKind, RefineCtx, Validated, ValidationError};
use crate::schema::composites::{
    check_array_bounds, check_tuple_len, check_unique, ArrayShape, DiscriminatedShape,
    ObjectShape, RecordShape, TupleShape, UnknownKeys,
};
use crate::schema::node::{Schema, SchemaKind};
use crate::value::Value;

use super::interpret::{
    expect_array, expect_object, merge_outputs, missing_value, run, run_kind, Checked, FieldInput,
};
use super::options::Options;

/// Asynchronous counterpart of `interpret::run`.
pub(crate) fn run_async<'a>(
    schema: &'a Schema,
    input: FieldInput<'a>,
    opts: &'a Options,
) -> BoxFuture<'a, Validated<Checked>> {
    if !schema.suspending() {
        // Degrade transparently to synchronous execution.
        let out = run(schema, input, opts);
        return Box::pin(std::future::ready(out));
    }
    let inner = schema.inner();
    Box::pin(async move {
        match input {
            FieldInput::Absent => {
                if let Some(default) = &inner.default {
                    return Validated::Valid(Checked::Value(default.clone()));
                }
                if inner.optional {
                    return Validated::Valid(Checked::Absent);
                }
                if inner.kind.delegates_absence() {
                    return run_kind_async(schema, FieldInput::Absent, opts).await;
                }
                Validated::invalid(missing_value())
            }
            FieldInput::Present(value) => {
                if value.is_null() && inner.nullable {
                    return Validated::Valid(Checked::Value(Value::Null));
                }
                run_kind_async(schema, input, opts).await
            }
        }
    })
}

async fn run_kind_async<'a>(
    schema: &'a Schema,
    input: FieldInput<'a>,
    opts: &'a Options,
) -> Validated<Checked> {
    match &schema.inner().kind {
        SchemaKind::Lazy(l) => run_async(l.force(), input, opts).await,
        SchemaKind::Refine(rule) => match run_async(&rule.inner, input, opts).await {
            Validated::Valid(Checked::Value(v)) => {
                if (rule.predicate)(&v) {
                    Validated::Valid(Checked::Value(v))
                } else {
                    Validated::invalid(
                        ValidationError::new(ErrorKind::RefinementFailed, rule.message.clone())
                            .with_received(&v),
                    )
                }
            }
            other => other,
        },
        SchemaKind::RefineAsync(rule) => match run_async(&rule.inner, input, opts).await {
            Validated::Valid(Checked::Value(v)) => match (rule.predicate)(v.clone()).await {
                Ok(true) => Validated::Valid(Checked::Value(v)),
                Ok(false) => Validated::invalid(
                    ValidationError::new(ErrorKind::RefinementFailed, rule.message.clone())
                        .with_received(&v),
                ),
                // A rejected or timed-out predicate folds into an error
                // instead of escaping.
                Err(msg) => {
                    Validated::invalid(ValidationError::new(ErrorKind::RefinementFailed, msg))
                }
            },
            other => other,
        },
        SchemaKind::SuperRefine(rule) => match run_async(&rule.inner, input, opts).await {
            Validated::Valid(Checked::Value(v)) => {
                let mut ctx = RefineCtx::new();
                (rule.refiner)(&v, &mut ctx);
                let issues = ctx.into_issues();
                if issues.is_empty() {
                    Validated::Valid(Checked::Value(v))
                } else {
                    Validated::invalid_all(issues)
                }
            }
            other => other,
        },
        SchemaKind::Transform(rule) => match run_async(&rule.inner, input, opts).await {
            Validated::Valid(Checked::Value(v)) => match (rule.transform)(v) {
                Ok(out) => Validated::Valid(Checked::Value(out)),
                Err(msg) => {
                    Validated::invalid(ValidationError::new(ErrorKind::TransformFailed, msg))
                }
            },
            other => other,
        },
        SchemaKind::TransformAsync(rule) => match run_async(&rule.inner, input, opts).await {
            Validated::Valid(Checked::Value(v)) => match (rule.transform)(v).await {
                Ok(out) => Validated::Valid(Checked::Value(out)),
                Err(msg) => {
                    Validated::invalid(ValidationError::new(ErrorKind::TransformFailed, msg))
                }
            },
            other => other,
        },
        SchemaKind::Preprocess(rule) => match input {
            FieldInput::Absent => run_async(&rule.inner, FieldInput::Absent, opts).await,
            FieldInput::Present(v) => match (rule.preprocess)(v.clone()) {
                Ok(pre) => run_async(&rule.inner, FieldInput::Present(&pre), opts).await,
                Err(msg) => {
                    Validated::invalid(ValidationError::new(ErrorKind::TransformFailed, msg))
                }
            },
        },
        SchemaKind::PreprocessAsync(rule) => match input {
            FieldInput::Absent => run_async(&rule.inner, FieldInput::Absent, opts).await,
            FieldInput::Present(v) => match (rule.preprocess)(v.clone()).await {
                Ok(pre) => run_async(&rule.inner, FieldInput::Present(&pre), opts).await,
                Err(msg) => {
                    Validated::invalid(ValidationError::new(ErrorKind::TransformFailed, msg))
                }
            },
        },
        SchemaKind::Pipe(rule) => match run_async(&rule.inner, input, opts).await {
            Validated::Valid(Checked::Value(v)) => {
                run_async(&rule.next, FieldInput::Present(&v), opts).await
            }
            other => other,
        },

        SchemaKind::Object(shape) => match input {
            FieldInput::Present(v) => run_object_async(shape, v, opts).await,
            FieldInput::Absent => Validated::invalid(missing_value()),
        },
        SchemaKind::Array(shape) => match input {
            FieldInput::Present(v) => run_array_async(shape, v, opts).await,
            FieldInput::Absent => Validated::invalid(missing_value()),
        },
        SchemaKind::Tuple(shape) => match input {
            FieldInput::Present(v) => run_tuple_async(shape, v, opts).await,
            FieldInput::Absent => Validated::invalid(missing_value()),
        },
        SchemaKind::Union(members) => match input {
            FieldInput::Present(v) => run_union_async(members, v, opts).await,
            FieldInput::Absent => Validated::invalid(missing_value()),
        },
        SchemaKind::DiscriminatedUnion(shape) => match input {
            FieldInput::Present(v) => run_discriminated_async(shape, v, opts).await,
            FieldInput::Absent => Validated::invalid(missing_value()),
        },
        SchemaKind::Intersection(left, right) => match input {
            FieldInput::Present(v) => run_intersection_async(left, right, v, opts).await,
            FieldInput::Absent => Validated::invalid(missing_value()),
        },
        SchemaKind::Record(shape) => match input {
            FieldInput::Present(v) => run_record_async(shape, v, opts).await,
            FieldInput::Absent => Validated::invalid(missing_value()),
        },

        // Primitive kinds never suspend; reuse the synchronous dispatch.
        _ => run_kind(schema, input, opts),
    }
}

async fn run_object_async(shape: &ObjectShape, value: &Value, opts: &Options) -> Validated<Checked> {
    let map = match expect_object(value) {
        Ok(m) => m,
        Err(e) => return Validated::invalid(e),
    };
    let policy = opts.unknown_keys.unwrap_or(shape.policy);

    let mut errors: Vec<ValidationError> = Vec::new();
    let mut outputs: Vec<(&str, Value)> = Vec::with_capacity(shape.fields.len());
    let mut changed = false;

    for (name, child) in &shape.fields {
        let field_input = match map.get(name) {
            Some(v) => FieldInput::Present(v),
            None => FieldInput::Absent,
        };
        match run_async(child, field_input, opts).await {
            Validated::Valid(Checked::Value(out)) => {
                match map.get(name) {
                    Some(original) => changed |= !Value::ptr_eq(original, &out),
                    None => changed = true,
                }
                outputs.push((name, out));
            }
            Validated::Valid(Checked::Absent) => {}
            Validated::Invalid(errs) => {
                let errs: Vec<ValidationError> =
                    errs.into_iter().map(|e| e.under_key(name)).collect();
                if opts.abort_early {
                    return Validated::invalid_all(errs);
                }
                errors.extend(errs);
            }
        }
    }

    let unknown: Vec<&String> = map.keys().filter(|k| !shape.declares(k)).collect();
    match policy {
        UnknownKeys::Strict => {
            for key in &unknown {
                let err = ValidationError::new(
                    ErrorKind::ObjectUnknownKey,
                    format!("unknown key '{}'", key),
                )
                .under_key(key);
                if opts.abort_early {
                    return Validated::invalid(err);
                }
                errors.push(err);
            }
        }
        UnknownKeys::Strip => {
            if !unknown.is_empty() {
                changed = true;
            }
        }
        UnknownKeys::Passthrough => {}
    }

    if !errors.is_empty() {
        return Validated::invalid_all(errors);
    }
    if !changed {
        return Validated::Valid(Checked::Value(value.clone()));
    }

    let mut out_map: BTreeMap<String, Value> = BTreeMap::new();
    if policy == UnknownKeys::Passthrough {
        for key in unknown {
            if let Some(v) = map.get(key) {
                out_map.insert(key.clone(), v.clone());
            }
        }
    }
    for (name, out) in outputs {
        out_map.insert(name.to_string(), out);
    }
    Validated::Valid(Checked::Value(Value::Object(Arc::new(out_map))))
}

async fn run_array_async(shape: &ArrayShape, value: &Value, opts: &Options) -> Validated<Checked> {
    let items = match expect_array(value, "array") {
        Ok(items) => items,
        Err(e) => return Validated::invalid(e),
    };
    if let Some(err) = check_array_bounds(shape.min_items, shape.max_items, items.len()) {
        return Validated::invalid(err);
    }
    if shape.unique {
        if let Some(err) = check_unique(items) {
            return Validated::invalid(err);
        }
    }

    let results: Vec<Validated<Checked>> = if shape.parallel {
        // All element validations start concurrently; join_all hands the
        // outcomes back in index order, so the combine loop below sees
        // exactly what the sequential path would.
        join_all(
            items
                .iter()
                .map(|item| run_async(&shape.element, FieldInput::Present(item), opts)),
        )
        .await
    } else {
        let mut results = Vec::with_capacity(items.len());
        for item in items.iter() {
            let out = run_async(&shape.element, FieldInput::Present(item), opts).await;
            let failed = !out.is_valid();
            results.push(out);
            if failed && opts.abort_early {
                break;
            }
        }
        results
    };

    let mut errors: Vec<ValidationError> = Vec::new();
    let mut outputs: Vec<Value> = Vec::with_capacity(items.len());
    let mut changed = false;

    for (index, (item, result)) in items.iter().zip(results).enumerate() {
        match result {
            Validated::Valid(Checked::Value(out)) => {
                changed |= !Value::ptr_eq(item, &out);
                outputs.push(out);
            }
            Validated::Valid(Checked::Absent) => outputs.push(item.clone()),
            Validated::Invalid(errs) => {
                let errs: Vec<ValidationError> =
                    errs.into_iter().map(|e| e.under_index(index)).collect();
                if opts.abort_early {
                    return Validated::invalid_all(errs);
                }
                errors.extend(errs);
            }
        }
    }

    if !errors.is_empty() {
        return Validated::invalid_all(errors);
    }
    if !changed {
        return Validated::Valid(Checked::Value(value.clone()));
    }
    Validated::Valid(Checked::Value(Value::Array(Arc::new(outputs))))
}

async fn run_tuple_async(shape: &TupleShape, value: &Value, opts: &Options) -> Validated<Checked> {
    let items = match expect_array(value, "tuple") {
        Ok(items) => items,
        Err(e) => return Validated::invalid(e),
    };
    if let Some(err) = check_tuple_len(shape.items.len(), shape.rest.is_some(), items.len()) {
        return Validated::invalid(err);
    }

    let mut errors: Vec<ValidationError> = Vec::new();
    let mut outputs: Vec<Value> = Vec::with_capacity(items.len());
    let mut changed = false;

    for (index, item) in items.iter().enumerate() {
        let child = if index < shape.items.len() {
            &shape.items[index]
        } else {
            match &shape.rest {
                Some(rest) => rest,
                None => break,
            }
        };
        match run_async(child, FieldInput::Present(item), opts).await {
            Validated::Valid(Checked::Value(out)) => {
                changed |= !Value::ptr_eq(item, &out);
                outputs.push(out);
            }
            Validated::Valid(Checked::Absent) => outputs.push(item.clone()),
            Validated::Invalid(errs) => {
                let errs: Vec<ValidationError> =
                    errs.into_iter().map(|e| e.under_index(index)).collect();
                if opts.abort_early {
                    return Validated::invalid_all(errs);
                }
                errors.extend(errs);
            }
        }
    }

    if !errors.is_empty() {
        return Validated::invalid_all(errors);
    }
    if !changed {
        return Validated::Valid(Checked::Value(value.clone()));
    }
    Validated::Valid(Checked::Value(Value::Array(Arc::new(outputs))))
}

async fn run_union_async(members: &[Schema], value: &Value, opts: &Options) -> Validated<Checked> {
    for member in members {
        if let Validated::Valid(out) = run_async(member, FieldInput::Present(value), opts).await {
            return Validated::Valid(out);
        }
    }
    let names: Vec<&'static str> = members.iter().map(|m| m.inner().kind.name()).collect();
    Validated::invalid(
        ValidationError::new(
            ErrorKind::UnionNoMatch,
            "value did not match any union member",
        )
        .with_expected(format!("one of: {}", names.join(", ")))
        .with_received(value),
    )
}

async fn run_discriminated_async(
    shape: &DiscriminatedShape,
    value: &Value,
    opts: &Options,
) -> Validated<Checked> {
    let map = match expect_object(value) {
        Ok(m) => m,
        Err(e) => return Validated::invalid(e),
    };
    let tag_value = match map.get(&shape.tag) {
        Some(v) => v,
        None => {
            return Validated::invalid(ValidationError::new(
                ErrorKind::UnionNoMatch,
                format!("missing discriminator field '{}'", shape.tag),
            ))
        }
    };
    for (tag_literal, member) in &shape.members {
        if tag_literal == tag_value {
            return run_async(member, FieldInput::Present(value), opts).await;
        }
    }
    Validated::invalid(
        ValidationError::new(
            ErrorKind::UnionNoMatch,
            format!("unrecognized value for discriminator field '{}'", shape.tag),
        )
        .with_received(tag_value),
    )
}

async fn run_intersection_async(
    left: &Schema,
    right: &Schema,
    value: &Value,
    opts: &Options,
) -> Validated<Checked> {
    let left_out = run_async(left, FieldInput::Present(value), opts).await;
    if opts.abort_early {
        if let Validated::Invalid(errs) = left_out {
            return Validated::invalid_all(errs);
        }
    }
    let right_out = run_async(right, FieldInput::Present(value), opts).await;
    match (left_out, right_out) {
        (Validated::Valid(l), Validated::Valid(r)) => Validated::Valid(merge_outputs(l, r)),
        (Validated::Invalid(mut le), Validated::Invalid(re)) => {
            le.extend(re);
            Validated::invalid_all(le)
        }
        (Validated::Invalid(le), Validated::Valid(_)) => Validated::invalid_all(le),
        (Validated::Valid(_), Validated::Invalid(re)) => Validated::invalid_all(re),
    }
}

async fn run_record_async(shape: &RecordShape, value: &Value, opts: &Options) -> Validated<Checked> {
    let map = match expect_object(value) {
        Ok(m) => m,
        Err(e) => return Validated::invalid(e),
    };

    let mut errors: Vec<ValidationError> = Vec::new();
    let mut outputs: Vec<(String, Value)> = Vec::with_capacity(map.len());
    let mut changed = false;

    for (key, entry) in map.iter() {
        if let Some(key_schema) = &shape.key {
            let key_value = Value::from(key.as_str());
            if let Validated::Invalid(key_errs) =
                run_async(key_schema, FieldInput::Present(&key_value), opts).await
            {
                let err = ValidationError::new(
                    ErrorKind::RecordInvalidKey,
                    format!("invalid key: {}", key_errs[0].message),
                )
                .with_received(&key_value)
                .under_record_key(key);
                if opts.abort_early {
                    return Validated::invalid(err);
                }
                errors.push(err);
            }
        }
        match run_async(&shape.value, FieldInput::Present(entry), opts).await {
            Validated::Valid(Checked::Value(out)) => {
                changed |= !Value::ptr_eq(entry, &out);
                outputs.push((key.clone(), out));
            }
            Validated::Valid(Checked::Absent) => outputs.push((key.clone(), entry.clone())),
            Validated::Invalid(errs) => {
                let errs: Vec<ValidationError> =
                    errs.into_iter().map(|e| e.under_key(key)).collect();
                if opts.abort_early {
                    return Validated::invalid_all(errs);
                }
                errors.extend(errs);
            }
        }
    }

    if !errors.is_empty() {
        return Validated::invalid_all(errors);
    }
    if !changed {
        return Validated::Valid(Checked::Value(value.clone()));
    }
    Validated::Valid(Checked::Value(Value::Object(Arc::new(
        outputs.into_iter().collect(),
    ))))
}

/// Wrap a suspending predicate in a deadline. An elapsed timeout folds
/// into the refinement failure `message` instead of escaping, matching
/// the contract that a rejected asynchronous refinement never surfaces
/// as anything but a validation error.
pub fn with_timeout<F, Fut>(
    predicate: F,
    deadline: Duration,
    message: impl Into<String>,
) -> impl Fn(Value) -> BoxFuture<'static, Result<bool, String>> + Send + Sync + 'static
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<bool, String>> + Send + 'static,
{
    let message = message.into();
    move |value: Value| {
        let fut = predicate(value);
        let message = message.clone();
        Box::pin(async move {
            match tokio::time::timeout(deadline, fut).await {
                Ok(result) => result,
                Err(_) => Err(message),
            }
        })
    }
}
