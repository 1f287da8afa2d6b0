//! Interpreted execution: a direct walk over the schema tree.
//!
//! This walker is the semantic reference. The compiler must reproduce
//! its Result byte-for-byte, so any rule change lands here first and the
//! shared leaf checks keep the two strategies from drifting.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::report::{ErrorKind, RefineCtx, Validated, ValidationError};
use crate::schema::composites::{
    check_array_bounds, check_tuple_len, check_unique, ArrayShape, DiscriminatedShape,
    ObjectShape, RecordShape, TupleShape, UnknownKeys,
};
use crate::schema::node::{Schema, SchemaKind};
use crate::schema::primitives::{
    check_boolean, check_date, check_enum, check_literal, check_number, check_string,
};
use crate::value::Value;

use super::options::Options;

/// A value as seen from its parent: present, or absent (missing object
/// key / missing tuple slot).
#[derive(Clone, Copy)]
pub(crate) enum FieldInput<'a> {
    Present(&'a Value),
    Absent,
}

/// Node-level outcome. `Absent` flows up only from optional nodes given
/// an absent input; the parent omits the field from its output.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Checked {
    Value(Value),
    Absent,
}

impl Checked {
    /// Collapse to a plain value at a top-level entry point, where the
    /// input is always present and `Absent` cannot occur.
    pub(crate) fn into_value(self) -> Value {
        match self {
            Checked::Value(v) => v,
            Checked::Absent => Value::Null,
        }
    }
}

pub(crate) fn missing_value() -> ValidationError {
    ValidationError::new(ErrorKind::ObjectMissingKey, "required value is missing")
}

pub(crate) fn async_refine_in_sync() -> ValidationError {
    ValidationError::new(
        ErrorKind::RefinementFailed,
        "asynchronous refinement requires validate_async",
    )
}

pub(crate) fn async_map_in_sync() -> ValidationError {
    ValidationError::new(
        ErrorKind::TransformFailed,
        "asynchronous transform requires validate_async",
    )
}

pub(crate) fn expect_object<'a>(
    value: &'a Value,
) -> Result<&'a BTreeMap<String, Value>, ValidationError> {
    value
        .as_object()
        .ok_or_else(|| ValidationError::wrong_kind(ErrorKind::NotObject, "object", value))
}

pub(crate) fn expect_array<'a>(
    value: &'a Value,
    expected: &'static str,
) -> Result<&'a [Value], ValidationError> {
    value
        .as_array()
        .ok_or_else(|| ValidationError::wrong_kind(ErrorKind::NotArray, expected, value))
}

/// Validate one node. Absence precedence runs first on every call:
/// default, then optional, then decorator delegation, then the node's
/// own kind check.
pub(crate) fn run(schema: &Schema, input: FieldInput<'_>, opts: &Options) -> Validated<Checked> {
    let inner = schema.inner();
    match input {
        FieldInput::Absent => {
            if let Some(default) = &inner.default {
                return Validated::Valid(Checked::Value(default.clone()));
            }
            if inner.optional {
                return Validated::Valid(Checked::Absent);
            }
            if inner.kind.delegates_absence() {
                return run_kind(schema, FieldInput::Absent, opts);
            }
            Validated::invalid(missing_value())
        }
        FieldInput::Present(value) => {
            if value.is_null() && inner.nullable {
                return Validated::Valid(Checked::Value(Value::Null));
            }
            run_kind(schema, input, opts)
        }
    }
}

/// Dispatch on the node kind, after absence precedence has run.
pub(crate) fn run_kind(
    schema: &Schema,
    input: FieldInput<'_>,
    opts: &Options,
) -> Validated<Checked> {
    match &schema.inner().kind {
        // Decorators and lazy handle the input marker themselves.
        SchemaKind::Lazy(l) => run(l.force(), input, opts),
        SchemaKind::Refine(rule) => match run(&rule.inner, input, opts) {
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
        SchemaKind::RefineAsync(rule) => match run(&rule.inner, input, opts) {
            Validated::Valid(Checked::Value(_)) => Validated::invalid(async_refine_in_sync()),
            other => other,
        },
        SchemaKind::SuperRefine(rule) => match run(&rule.inner, input, opts) {
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
        SchemaKind::Transform(rule) => match run(&rule.inner, input, opts) {
            Validated::Valid(Checked::Value(v)) => match (rule.transform)(v) {
                Ok(out) => Validated::Valid(Checked::Value(out)),
                Err(msg) => {
                    Validated::invalid(ValidationError::new(ErrorKind::TransformFailed, msg))
                }
            },
            other => other,
        },
        SchemaKind::TransformAsync(rule) => match run(&rule.inner, input, opts) {
            Validated::Valid(Checked::Value(_)) => Validated::invalid(async_map_in_sync()),
            other => other,
        },
        SchemaKind::Preprocess(rule) => match input {
            FieldInput::Absent => run(&rule.inner, FieldInput::Absent, opts),
            FieldInput::Present(v) => match (rule.preprocess)(v.clone()) {
                Ok(pre) => run(&rule.inner, FieldInput::Present(&pre), opts),
                Err(msg) => {
                    Validated::invalid(ValidationError::new(ErrorKind::TransformFailed, msg))
                }
            },
        },
        SchemaKind::PreprocessAsync(rule) => match input {
            FieldInput::Absent => run(&rule.inner, FieldInput::Absent, opts),
            FieldInput::Present(_) => Validated::invalid(async_map_in_sync()),
        },
        SchemaKind::Pipe(rule) => match run(&rule.inner, input, opts) {
            Validated::Valid(Checked::Value(v)) => run(&rule.next, FieldInput::Present(&v), opts),
            other => other,
        },

        // Everything below demands a present value.
        _ => {
            let value = match input {
                FieldInput::Present(v) => v,
                FieldInput::Absent => return Validated::invalid(missing_value()),
            };
            match &schema.inner().kind {
                SchemaKind::Any => Validated::Valid(Checked::Value(value.clone())),
                SchemaKind::Boolean => match check_boolean(value) {
                    Ok(()) => Validated::Valid(Checked::Value(value.clone())),
                    Err(e) => Validated::invalid(e),
                },
                SchemaKind::String(rules) => match check_string(rules, value) {
                    Ok(()) => Validated::Valid(Checked::Value(value.clone())),
                    Err(e) => Validated::invalid(e),
                },
                SchemaKind::Number(rules) => match check_number(rules, value) {
                    Ok(()) => Validated::Valid(Checked::Value(value.clone())),
                    Err(e) => Validated::invalid(e),
                },
                SchemaKind::Date(rules) => match check_date(rules, value) {
                    Ok(()) => Validated::Valid(Checked::Value(value.clone())),
                    Err(e) => Validated::invalid(e),
                },
                SchemaKind::Literal(expected) => match check_literal(expected, value) {
                    Ok(()) => Validated::Valid(Checked::Value(value.clone())),
                    Err(e) => Validated::invalid(e),
                },
                SchemaKind::Enum(options) => match check_enum(options, value) {
                    Ok(()) => Validated::Valid(Checked::Value(value.clone())),
                    Err(e) => Validated::invalid(e),
                },
                SchemaKind::Object(shape) => run_object(shape, value, opts),
                SchemaKind::Array(shape) => run_array(shape, value, opts),
                SchemaKind::Tuple(shape) => run_tuple(shape, value, opts),
                SchemaKind::Union(members) => run_union(members, value, opts),
                SchemaKind::DiscriminatedUnion(shape) => run_discriminated(shape, value, opts),
                SchemaKind::Intersection(left, right) => {
                    run_intersection(left, right, value, opts)
                }
                SchemaKind::Record(shape) => run_record(shape, value, opts),
                // Decorator kinds were dispatched above.
                _ => Validated::invalid(missing_value()),
            }
        }
    }
}

fn run_object(shape: &ObjectShape, value: &Value, opts: &Options) -> Validated<Checked> {
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
        match run(child, field_input, opts) {
            Validated::Valid(Checked::Value(out)) => {
                match map.get(name) {
                    Some(original) => changed |= !Value::ptr_eq(original, &out),
                    // A default materialized a key the input lacked.
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
        // Untouched input: hand back the same object, pointer-identical.
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

fn run_array(shape: &ArrayShape, value: &Value, opts: &Options) -> Validated<Checked> {
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

    let mut errors: Vec<ValidationError> = Vec::new();
    let mut outputs: Vec<Value> = Vec::with_capacity(items.len());
    let mut changed = false;

    for (index, item) in items.iter().enumerate() {
        match run(&shape.element, FieldInput::Present(item), opts) {
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

fn run_tuple(shape: &TupleShape, value: &Value, opts: &Options) -> Validated<Checked> {
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
            // Length was checked: past the fixed count a rest schema exists.
            match &shape.rest {
                Some(rest) => rest,
                None => break,
            }
        };
        match run(child, FieldInput::Present(item), opts) {
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

fn run_union(members: &[Schema], value: &Value, opts: &Options) -> Validated<Checked> {
    for member in members {
        if let Validated::Valid(out) = run(member, FieldInput::Present(value), opts) {
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

fn run_discriminated(
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
            // Exactly one candidate: surface its full diagnostics.
            return run(member, FieldInput::Present(value), opts);
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

fn run_intersection(
    left: &Schema,
    right: &Schema,
    value: &Value,
    opts: &Options,
) -> Validated<Checked> {
    let left_out = run(left, FieldInput::Present(value), opts);
    if opts.abort_early {
        if let Validated::Invalid(errs) = left_out {
            return Validated::invalid_all(errs);
        }
    }
    let right_out = run(right, FieldInput::Present(value), opts);
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

/// Two object outputs merge right-over-left; any other pair yields the
/// right output. Pointer-identical outputs stay identical.
pub(crate) fn merge_outputs(left: Checked, right: Checked) -> Checked {
    match (left, right) {
        (Checked::Value(Value::Object(a)), Checked::Value(Value::Object(b))) => {
            if Arc::ptr_eq(&a, &b) {
                Checked::Value(Value::Object(a))
            } else {
                let mut merged = (*a).clone();
                for (k, v) in b.iter() {
                    merged.insert(k.clone(), v.clone());
                }
                Checked::Value(Value::Object(Arc::new(merged)))
            }
        }
        (_, right) => right,
    }
}

fn run_record(shape: &RecordShape, value: &Value, opts: &Options) -> Validated<Checked> {
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
                run(key_schema, FieldInput::Present(&key_value), opts)
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
        match run(&shape.value, FieldInput::Present(entry), opts) {
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

/// Boolean fast path: kind tests, constraints, and synchronous
/// refinements on the untransformed value. Transforms and asynchronous
/// stages are not executed; `pipe` falls back to full validation of its
/// inner stage to materialize the piped value.
pub(crate) fn is_match(schema: &Schema, value: &Value) -> bool {
    let inner = schema.inner();
    if value.is_null() && inner.nullable {
        return true;
    }
    match &inner.kind {
        SchemaKind::Any => true,
        SchemaKind::Boolean => check_boolean(value).is_ok(),
        SchemaKind::String(rules) => check_string(rules, value).is_ok(),
        SchemaKind::Number(rules) => check_number(rules, value).is_ok(),
        SchemaKind::Date(rules) => check_date(rules, value).is_ok(),
        SchemaKind::Literal(expected) => check_literal(expected, value).is_ok(),
        SchemaKind::Enum(options) => check_enum(options, value).is_ok(),
        SchemaKind::Object(shape) => {
            let Some(map) = value.as_object() else {
                return false;
            };
            for (name, child) in &shape.fields {
                match map.get(name) {
                    Some(v) => {
                        if !is_match(child, v) {
                            return false;
                        }
                    }
                    None => {
                        if !child.accepts_absent() {
                            return false;
                        }
                    }
                }
            }
            if shape.policy == UnknownKeys::Strict {
                if map.keys().any(|k| !shape.declares(k)) {
                    return false;
                }
            }
            true
        }
        SchemaKind::Array(shape) => {
            let Some(items) = value.as_array() else {
                return false;
            };
            if check_array_bounds(shape.min_items, shape.max_items, items.len()).is_some() {
                return false;
            }
            if shape.unique && check_unique(items).is_some() {
                return false;
            }
            items.iter().all(|item| is_match(&shape.element, item))
        }
        SchemaKind::Tuple(shape) => {
            let Some(items) = value.as_array() else {
                return false;
            };
            if check_tuple_len(shape.items.len(), shape.rest.is_some(), items.len()).is_some() {
                return false;
            }
            for (index, item) in items.iter().enumerate() {
                let child = if index < shape.items.len() {
                    &shape.items[index]
                } else {
                    match &shape.rest {
                        Some(rest) => rest,
                        None => break,
                    }
                };
                if !is_match(child, item) {
                    return false;
                }
            }
            true
        }
        SchemaKind::Union(members) => members.iter().any(|m| is_match(m, value)),
        SchemaKind::DiscriminatedUnion(shape) => {
            let Some(map) = value.as_object() else {
                return false;
            };
            let Some(tag_value) = map.get(&shape.tag) else {
                return false;
            };
            shape
                .members
                .iter()
                .find(|(tag, _)| tag == tag_value)
                .map(|(_, member)| is_match(member, value))
                .unwrap_or(false)
        }
        SchemaKind::Intersection(left, right) => is_match(left, value) && is_match(right, value),
        SchemaKind::Record(shape) => {
            let Some(map) = value.as_object() else {
                return false;
            };
            map.iter().all(|(key, entry)| {
                let key_ok = match &shape.key {
                    Some(key_schema) => is_match(key_schema, &Value::from(key.as_str())),
                    None => true,
                };
                key_ok && is_match(&shape.value, entry)
            })
        }
        SchemaKind::Lazy(l) => is_match(l.force(), value),
        SchemaKind::Refine(rule) => is_match(&rule.inner, value) && (rule.predicate)(value),
        SchemaKind::RefineAsync(rule) => is_match(&rule.inner, value),
        SchemaKind::SuperRefine(rule) => {
            if !is_match(&rule.inner, value) {
                return false;
            }
            let mut ctx = RefineCtx::new();
            (rule.refiner)(value, &mut ctx);
            ctx.into_issues().is_empty()
        }
        SchemaKind::Transform(rule) => is_match(&rule.inner, value),
        SchemaKind::TransformAsync(rule) => is_match(&rule.inner, value),
        SchemaKind::Preprocess(rule) => match (rule.preprocess)(value.clone()) {
            Ok(pre) => is_match(&rule.inner, &pre),
            Err(_) => false,
        },
        SchemaKind::PreprocessAsync(rule) => is_match(&rule.inner, value),
        SchemaKind::Pipe(rule) => {
            match run(&rule.inner, FieldInput::Present(value), &Options::default()) {
                Validated::Valid(Checked::Value(piped)) => is_match(&rule.next, &piped),
                Validated::Valid(Checked::Absent) => true,
                Validated::Invalid(_) => false,
            }
        }
    }
}
