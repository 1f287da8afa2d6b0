//! Ahead-of-time compilation of schema trees into specialized closures.
//!
//! `compile` dispatches exhaustively on the closed kind discriminator
//! and emits one specialized procedure per node: primitives capture
//! their constraint configuration in the closure environment, composites
//! capture their children compiled once (memoized by node identity
//! within a single compile call) and iterate with explicit loops.
//!
//! The emitted closures call the same leaf checks as the interpreted
//! walker and reproduce its results exactly; compilation changes cost,
//! never behavior. The absence/null precedence is applied once here, as
//! a wrapper around each node's base closure, instead of being
//! re-evaluated structurally on every call.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, OnceLock};

use futures_util::future::join_all;

use crate::engine::interpret::{
    async_map_in_sync, async_refine_in_sync, expect_array, expect_object, merge_outputs,
    missing_value, Checked, FieldInput,
};
use crate::engine::Options;
use crate::report::{ErrorKind, RefineCtx, Validated, ValidationError};
use crate::schema::composites::{check_array_bounds, check_tuple_len, check_unique, UnknownKeys};
use crate::schema::lazy::LazySchema;
use crate::schema::node::{Schema, SchemaKind};
use crate::schema::primitives::{
    check_boolean, check_date, check_enum, check_literal, check_number, check_string,
};
use crate::value::Value;

use super::compiled::{AsyncRun, CheckFn, CompiledNode, CompiledValidator, SyncRun};

/// Compile a schema with default options.
pub fn compile(schema: &Schema) -> CompiledValidator {
    compile_with(schema, &Options::default())
}

/// Compile a schema with explicit execution options baked into the
/// emitted closures.
pub fn compile_with(schema: &Schema, opts: &Options) -> CompiledValidator {
    let mut memo: HashMap<usize, CompiledNode> = HashMap::new();
    CompiledValidator {
        node: compile_node(schema, opts, &mut memo),
    }
}

fn compile_node(
    schema: &Schema,
    opts: &Options,
    memo: &mut HashMap<usize, CompiledNode>,
) -> CompiledNode {
    if let Some(found) = memo.get(&schema.node_ptr()) {
        return found.clone();
    }
    let base = compile_kind(schema, opts, memo);
    let node = wrap_common(schema, base);
    memo.insert(schema.node_ptr(), node.clone());
    node
}

/// Apply the absence/null precedence once, around the specialized base
/// closures. Mirrors the wrapper the interpreter evaluates per call.
fn wrap_common(schema: &Schema, base: CompiledNode) -> CompiledNode {
    let inner = schema.inner();
    let optional = inner.optional;
    let nullable = inner.nullable;
    let default = inner.default.clone();
    let delegates = inner.kind.delegates_absence();

    let run: SyncRun = {
        let base_run = base.run.clone();
        let default = default.clone();
        Arc::new(move |input: FieldInput<'_>| match input {
            FieldInput::Absent => {
                if let Some(d) = &default {
                    return Validated::Valid(Checked::Value(d.clone()));
                }
                if optional {
                    return Validated::Valid(Checked::Absent);
                }
                if delegates {
                    return base_run(FieldInput::Absent);
                }
                Validated::invalid(missing_value())
            }
            FieldInput::Present(v) => {
                if v.is_null() && nullable {
                    return Validated::Valid(Checked::Value(Value::Null));
                }
                base_run(input)
            }
        })
    };

    let check: CheckFn = {
        let base_check = base.check.clone();
        Arc::new(move |v: &Value| {
            if v.is_null() && nullable {
                return true;
            }
            base_check(v)
        })
    };

    let run_async: AsyncRun = {
        let base_async = base.run_async.clone();
        Arc::new(move |input: FieldInput<'_>| match input {
            FieldInput::Absent => {
                if let Some(d) = &default {
                    let out = Validated::Valid(Checked::Value(d.clone()));
                    return Box::pin(std::future::ready(out));
                }
                if optional {
                    return Box::pin(std::future::ready(Validated::Valid(Checked::Absent)));
                }
                if delegates {
                    return base_async(FieldInput::Absent);
                }
                Box::pin(std::future::ready(Validated::invalid(missing_value())))
            }
            FieldInput::Present(v) => {
                if v.is_null() && nullable {
                    let out = Validated::Valid(Checked::Value(Value::Null));
                    return Box::pin(std::future::ready(out));
                }
                base_async(input)
            }
        })
    };

    CompiledNode { run, check, run_async }
}

/// A non-suspending node serves `run_async` by computing synchronously
/// and returning a ready future.
fn ready_async(run: SyncRun) -> AsyncRun {
    Arc::new(move |input| {
        let out = run(input);
        Box::pin(std::future::ready(out))
    })
}

fn demand_present(
    input: FieldInput<'_>,
    f: impl FnOnce(&Value) -> Validated<Checked>,
) -> Validated<Checked> {
    match input {
        FieldInput::Present(v) => f(v),
        FieldInput::Absent => Validated::invalid(missing_value()),
    }
}

/// Build a primitive node from its pre-extracted constraint check.
fn leaf_node<F>(constraint: F) -> CompiledNode
where
    F: Fn(&Value) -> Result<(), ValidationError> + Clone + Send + Sync + 'static,
{
    let for_check = constraint.clone();
    let run: SyncRun = Arc::new(move |input| {
        demand_present(input, |v| match constraint(v) {
            Ok(()) => Validated::Valid(Checked::Value(v.clone())),
            Err(e) => Validated::invalid(e),
        })
    });
    let check: CheckFn = Arc::new(move |v| for_check(v).is_ok());
    let run_async = ready_async(run.clone());
    CompiledNode { run, check, run_async }
}

fn compile_kind(
    schema: &Schema,
    opts: &Options,
    memo: &mut HashMap<usize, CompiledNode>,
) -> CompiledNode {
    match &schema.inner().kind {
        SchemaKind::Any => {
            let run: SyncRun = Arc::new(|input| {
                demand_present(input, |v| Validated::Valid(Checked::Value(v.clone())))
            });
            let check: CheckFn = Arc::new(|_| true);
            let run_async = ready_async(run.clone());
            CompiledNode { run, check, run_async }
        }
        SchemaKind::Boolean => leaf_node(check_boolean),
        SchemaKind::String(rules) => {
            let rules = rules.clone();
            leaf_node(move |v| check_string(&rules, v))
        }
        SchemaKind::Number(rules) => {
            let rules = rules.clone();
            leaf_node(move |v| check_number(&rules, v))
        }
        SchemaKind::Date(rules) => {
            let rules = rules.clone();
            leaf_node(move |v| check_date(&rules, v))
        }
        SchemaKind::Literal(expected) => {
            let expected = expected.clone();
            leaf_node(move |v| check_literal(&expected, v))
        }
        SchemaKind::Enum(options) => {
            let options = options.clone();
            leaf_node(move |v| check_enum(&options, v))
        }

        SchemaKind::Object(shape) => {
            let compiled = Arc::new(CompiledObject {
                fields: shape
                    .fields
                    .iter()
                    .map(|(name, child)| {
                        (name.clone(), compile_node(child, opts, memo), child.accepts_absent())
                    })
                    .collect(),
                policy: opts.unknown_keys.unwrap_or(shape.policy),
                own_policy: shape.policy,
                abort_early: opts.abort_early,
            });
            composite_node(schema, compiled)
        }
        SchemaKind::Array(shape) => {
            let compiled = Arc::new(CompiledArray {
                element: compile_node(&shape.element, opts, memo),
                min_items: shape.min_items,
                max_items: shape.max_items,
                unique: shape.unique,
                parallel: shape.parallel,
                abort_early: opts.abort_early,
            });
            composite_node(schema, compiled)
        }
        SchemaKind::Tuple(shape) => {
            let compiled = Arc::new(CompiledTuple {
                items: shape
                    .items
                    .iter()
                    .map(|s| compile_node(s, opts, memo))
                    .collect(),
                rest: shape.rest.as_ref().map(|s| compile_node(s, opts, memo)),
                abort_early: opts.abort_early,
            });
            composite_node(schema, compiled)
        }
        SchemaKind::Union(members) => {
            let names: Vec<&'static str> = members.iter().map(|m| m.inner().kind.name()).collect();
            let compiled = Arc::new(CompiledUnion {
                members: members
                    .iter()
                    .map(|m| compile_node(m, opts, memo))
                    .collect(),
                expected: format!("one of: {}", names.join(", ")),
            });
            composite_node(schema, compiled)
        }
        SchemaKind::DiscriminatedUnion(shape) => {
            let compiled = Arc::new(CompiledDiscriminated {
                tag: shape.tag.clone(),
                members: shape
                    .members
                    .iter()
                    .map(|(tag, m)| (tag.clone(), compile_node(m, opts, memo)))
                    .collect(),
            });
            composite_node(schema, compiled)
        }
        SchemaKind::Intersection(left, right) => {
            let compiled = Arc::new(CompiledIntersection {
                left: compile_node(left, opts, memo),
                right: compile_node(right, opts, memo),
                abort_early: opts.abort_early,
            });
            composite_node(schema, compiled)
        }
        SchemaKind::Record(shape) => {
            let compiled = Arc::new(CompiledRecord {
                key: shape.key.as_ref().map(|s| compile_node(s, opts, memo)),
                value: compile_node(&shape.value, opts, memo),
                abort_early: opts.abort_early,
            });
            composite_node(schema, compiled)
        }

        SchemaKind::Lazy(l) => {
            let compiled = Arc::new(CompiledLazy {
                cell: OnceLock::new(),
                lazy: l.clone(),
                opts: *opts,
            });
            let run: SyncRun = {
                let c = compiled.clone();
                Arc::new(move |input| (c.node().run)(input))
            };
            let check: CheckFn = {
                let c = compiled.clone();
                Arc::new(move |v| (c.node().check)(v))
            };
            let run_async: AsyncRun = {
                let c = compiled;
                Arc::new(move |input| (c.node().run_async)(input))
            };
            CompiledNode { run, check, run_async }
        }

        SchemaKind::Refine(rule) => {
            let inner = compile_node(&rule.inner, opts, memo);
            let run: SyncRun = {
                let inner = inner.clone();
                let predicate = rule.predicate.clone();
                let message = rule.message.clone();
                Arc::new(move |input| match (inner.run)(input) {
                    Validated::Valid(Checked::Value(v)) => {
                        if predicate(&v) {
                            Validated::Valid(Checked::Value(v))
                        } else {
                            Validated::invalid(
                                ValidationError::new(
                                    ErrorKind::RefinementFailed,
                                    message.clone(),
                                )
                                .with_received(&v),
                            )
                        }
                    }
                    other => other,
                })
            };
            let check: CheckFn = {
                let inner_check = inner.check.clone();
                let predicate = rule.predicate.clone();
                Arc::new(move |v| inner_check(v) && predicate(v))
            };
            let run_async: AsyncRun = if schema.suspending() {
                let inner = inner.clone();
                let predicate = rule.predicate.clone();
                let message = rule.message.clone();
                Arc::new(move |input| {
                    let inner = inner.clone();
                    let predicate = predicate.clone();
                    let message = message.clone();
                    Box::pin(async move {
                        match (inner.run_async)(input).await {
                            Validated::Valid(Checked::Value(v)) => {
                                if predicate(&v) {
                                    Validated::Valid(Checked::Value(v))
                                } else {
                                    Validated::invalid(
                                        ValidationError::new(
                                            ErrorKind::RefinementFailed,
                                            message.clone(),
                                        )
                                        .with_received(&v),
                                    )
                                }
                            }
                            other => other,
                        }
                    })
                })
            } else {
                ready_async(run.clone())
            };
            CompiledNode { run, check, run_async }
        }

        SchemaKind::RefineAsync(rule) => {
            let inner = compile_node(&rule.inner, opts, memo);
            let run: SyncRun = {
                let inner = inner.clone();
                Arc::new(move |input| match (inner.run)(input) {
                    Validated::Valid(Checked::Value(_)) => {
                        Validated::invalid(async_refine_in_sync())
                    }
                    other => other,
                })
            };
            let check: CheckFn = inner.check.clone();
            let run_async: AsyncRun = {
                let inner = inner.clone();
                let predicate = rule.predicate.clone();
                let message = rule.message.clone();
                Arc::new(move |input| {
                    let inner = inner.clone();
                    let predicate = predicate.clone();
                    let message = message.clone();
                    Box::pin(async move {
                        match (inner.run_async)(input).await {
                            Validated::Valid(Checked::Value(v)) => {
                                match predicate(v.clone()).await {
                                    Ok(true) => Validated::Valid(Checked::Value(v)),
                                    Ok(false) => Validated::invalid(
                                        ValidationError::new(
                                            ErrorKind::RefinementFailed,
                                            message.clone(),
                                        )
                                        .with_received(&v),
                                    ),
                                    Err(msg) => Validated::invalid(ValidationError::new(
                                        ErrorKind::RefinementFailed,
                                        msg,
                                    )),
                                }
                            }
                            other => other,
                        }
                    })
                })
            };
            CompiledNode { run, check, run_async }
        }

        SchemaKind::SuperRefine(rule) => {
            let inner = compile_node(&rule.inner, opts, memo);
            let run: SyncRun = {
                let inner = inner.clone();
                let refiner = rule.refiner.clone();
                Arc::new(move |input| match (inner.run)(input) {
                    Validated::Valid(Checked::Value(v)) => {
                        let mut ctx = RefineCtx::new();
                        refiner(&v, &mut ctx);
                        let issues = ctx.into_issues();
                        if issues.is_empty() {
                            Validated::Valid(Checked::Value(v))
                        } else {
                            Validated::invalid_all(issues)
                        }
                    }
                    other => other,
                })
            };
            let check: CheckFn = {
                let inner_check = inner.check.clone();
                let refiner = rule.refiner.clone();
                Arc::new(move |v| {
                    if !inner_check(v) {
                        return false;
                    }
                    let mut ctx = RefineCtx::new();
                    refiner(v, &mut ctx);
                    ctx.into_issues().is_empty()
                })
            };
            let run_async: AsyncRun = if schema.suspending() {
                let inner = inner.clone();
                let refiner = rule.refiner.clone();
                Arc::new(move |input| {
                    let inner = inner.clone();
                    let refiner = refiner.clone();
                    Box::pin(async move {
                        match (inner.run_async)(input).await {
                            Validated::Valid(Checked::Value(v)) => {
                                let mut ctx = RefineCtx::new();
                                refiner(&v, &mut ctx);
                                let issues = ctx.into_issues();
                                if issues.is_empty() {
                                    Validated::Valid(Checked::Value(v))
                                } else {
                                    Validated::invalid_all(issues)
                                }
                            }
                            other => other,
                        }
                    })
                })
            } else {
                ready_async(run.clone())
            };
            CompiledNode { run, check, run_async }
        }

        SchemaKind::Transform(rule) => {
            let inner = compile_node(&rule.inner, opts, memo);
            let run: SyncRun = {
                let inner = inner.clone();
                let transform = rule.transform.clone();
                Arc::new(move |input| match (inner.run)(input) {
                    Validated::Valid(Checked::Value(v)) => match transform(v) {
                        Ok(out) => Validated::Valid(Checked::Value(out)),
                        Err(msg) => Validated::invalid(ValidationError::new(
                            ErrorKind::TransformFailed,
                            msg,
                        )),
                    },
                    other => other,
                })
            };
            let check: CheckFn = inner.check.clone();
            let run_async: AsyncRun = if schema.suspending() {
                let inner = inner.clone();
                let transform = rule.transform.clone();
                Arc::new(move |input| {
                    let inner = inner.clone();
                    let transform = transform.clone();
                    Box::pin(async move {
                        match (inner.run_async)(input).await {
                            Validated::Valid(Checked::Value(v)) => match transform(v) {
                                Ok(out) => Validated::Valid(Checked::Value(out)),
                                Err(msg) => Validated::invalid(ValidationError::new(
                                    ErrorKind::TransformFailed,
                                    msg,
                                )),
                            },
                            other => other,
                        }
                    })
                })
            } else {
                ready_async(run.clone())
            };
            CompiledNode { run, check, run_async }
        }

        SchemaKind::TransformAsync(rule) => {
            let inner = compile_node(&rule.inner, opts, memo);
            let run: SyncRun = {
                let inner = inner.clone();
                Arc::new(move |input| match (inner.run)(input) {
                    Validated::Valid(Checked::Value(_)) => Validated::invalid(async_map_in_sync()),
                    other => other,
                })
            };
            let check: CheckFn = inner.check.clone();
            let run_async: AsyncRun = {
                let inner = inner.clone();
                let transform = rule.transform.clone();
                Arc::new(move |input| {
                    let inner = inner.clone();
                    let transform = transform.clone();
                    Box::pin(async move {
                        match (inner.run_async)(input).await {
                            Validated::Valid(Checked::Value(v)) => match transform(v).await {
                                Ok(out) => Validated::Valid(Checked::Value(out)),
                                Err(msg) => Validated::invalid(ValidationError::new(
                                    ErrorKind::TransformFailed,
                                    msg,
                                )),
                            },
                            other => other,
                        }
                    })
                })
            };
            CompiledNode { run, check, run_async }
        }

        SchemaKind::Preprocess(rule) => {
            let inner = compile_node(&rule.inner, opts, memo);
            let run: SyncRun = {
                let inner = inner.clone();
                let preprocess = rule.preprocess.clone();
                Arc::new(move |input| match input {
                    FieldInput::Absent => (inner.run)(FieldInput::Absent),
                    FieldInput::Present(v) => match preprocess(v.clone()) {
                        Ok(pre) => (inner.run)(FieldInput::Present(&pre)),
                        Err(msg) => Validated::invalid(ValidationError::new(
                            ErrorKind::TransformFailed,
                            msg,
                        )),
                    },
                })
            };
            let check: CheckFn = {
                let inner_check = inner.check.clone();
                let preprocess = rule.preprocess.clone();
                Arc::new(move |v| match preprocess(v.clone()) {
                    Ok(pre) => inner_check(&pre),
                    Err(_) => false,
                })
            };
            let run_async: AsyncRun = if schema.suspending() {
                let inner = inner.clone();
                let preprocess = rule.preprocess.clone();
                Arc::new(move |input| {
                    let inner = inner.clone();
                    let preprocess = preprocess.clone();
                    Box::pin(async move {
                        match input {
                            FieldInput::Absent => (inner.run_async)(FieldInput::Absent).await,
                            FieldInput::Present(v) => match preprocess(v.clone()) {
                                Ok(pre) => {
                                    (inner.run_async)(FieldInput::Present(&pre)).await
                                }
                                Err(msg) => Validated::invalid(ValidationError::new(
                                    ErrorKind::TransformFailed,
                                    msg,
                                )),
                            },
                        }
                    })
                })
            } else {
                ready_async(run.clone())
            };
            CompiledNode { run, check, run_async }
        }

        SchemaKind::PreprocessAsync(rule) => {
            let inner = compile_node(&rule.inner, opts, memo);
            let run: SyncRun = {
                let inner = inner.clone();
                Arc::new(move |input| match input {
                    FieldInput::Absent => (inner.run)(FieldInput::Absent),
                    FieldInput::Present(_) => Validated::invalid(async_map_in_sync()),
                })
            };
            let check: CheckFn = inner.check.clone();
            let run_async: AsyncRun = {
                let inner = inner.clone();
                let preprocess = rule.preprocess.clone();
                Arc::new(move |input| {
                    let inner = inner.clone();
                    let preprocess = preprocess.clone();
                    Box::pin(async move {
                        match input {
                            FieldInput::Absent => (inner.run_async)(FieldInput::Absent).await,
                            FieldInput::Present(v) => match preprocess(v.clone()).await {
                                Ok(pre) => {
                                    (inner.run_async)(FieldInput::Present(&pre)).await
                                }
                                Err(msg) => Validated::invalid(ValidationError::new(
                                    ErrorKind::TransformFailed,
                                    msg,
                                )),
                            },
                        }
                    })
                })
            };
            CompiledNode { run, check, run_async }
        }

        SchemaKind::Pipe(rule) => {
            let inner = compile_node(&rule.inner, opts, memo);
            let next = compile_node(&rule.next, opts, memo);
            let run: SyncRun = {
                let inner = inner.clone();
                let next = next.clone();
                Arc::new(move |input| match (inner.run)(input) {
                    Validated::Valid(Checked::Value(v)) => (next.run)(FieldInput::Present(&v)),
                    other => other,
                })
            };
            let check: CheckFn = {
                let inner = inner.clone();
                let next = next.clone();
                Arc::new(move |v| match (inner.run)(FieldInput::Present(v)) {
                    Validated::Valid(Checked::Value(piped)) => (next.check)(&piped),
                    Validated::Valid(Checked::Absent) => true,
                    Validated::Invalid(_) => false,
                })
            };
            let run_async: AsyncRun = if schema.suspending() {
                let inner = inner.clone();
                let next = next.clone();
                Arc::new(move |input| {
                    let inner = inner.clone();
                    let next = next.clone();
                    Box::pin(async move {
                        match (inner.run_async)(input).await {
                            Validated::Valid(Checked::Value(v)) => {
                                (next.run_async)(FieldInput::Present(&v)).await
                            }
                            other => other,
                        }
                    })
                })
            } else {
                ready_async(run.clone())
            };
            CompiledNode { run, check, run_async }
        }
    }
}

/// Shared closure scaffolding for the composite shapes below.
fn composite_node<C: CompiledComposite + 'static>(schema: &Schema, compiled: Arc<C>) -> CompiledNode {
    let run: SyncRun = {
        let c = compiled.clone();
        Arc::new(move |input| demand_present(input, |v| c.run(v)))
    };
    let check: CheckFn = {
        let c = compiled.clone();
        Arc::new(move |v| c.check(v))
    };
    let run_async: AsyncRun = if schema.suspending() {
        let c = compiled;
        Arc::new(move |input| {
            let c = c.clone();
            match input {
                FieldInput::Present(v) => Box::pin(async move { c.run_async(v).await }),
                FieldInput::Absent => {
                    Box::pin(std::future::ready(Validated::invalid(missing_value())))
                }
            }
        })
    } else {
        ready_async(run.clone())
    };
    CompiledNode { run, check, run_async }
}

/// Contract implemented by each precompiled composite shape.
trait CompiledComposite: Send + Sync {
    fn run(&self, value: &Value) -> Validated<Checked>;
    fn check(&self, value: &Value) -> bool;
    fn run_async<'a>(
        &'a self,
        value: &'a Value,
    ) -> futures_util::future::BoxFuture<'a, Validated<Checked>>;
}

struct CompiledObject {
    /// (field name, compiled child, child accepts absence)
    fields: Vec<(String, CompiledNode, bool)>,
    /// Effective policy for `run`, with any option override applied.
    policy: UnknownKeys,
    /// The node's own policy, used by the boolean fast path.
    own_policy: UnknownKeys,
    abort_early: bool,
}

impl CompiledObject {
    fn declares(&self, key: &str) -> bool {
        self.fields.iter().any(|(name, _, _)| name == key)
    }

    fn combine<'a>(
        &self,
        value: &Value,
        map: &BTreeMap<String, Value>,
        outputs: Vec<(&'a str, Value)>,
        errors: Vec<ValidationError>,
        mut changed: bool,
    ) -> Validated<Checked> {
        let unknown: Vec<&String> = map.keys().filter(|k| !self.declares(k)).collect();
        let mut errors = errors;
        match self.policy {
            UnknownKeys::Strict => {
                for key in &unknown {
                    let err = ValidationError::new(
                        ErrorKind::ObjectUnknownKey,
                        format!("unknown key '{}'", key),
                    )
                    .under_key(key);
                    if self.abort_early {
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
        if self.policy == UnknownKeys::Passthrough {
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
}

impl CompiledComposite for CompiledObject {
    fn run(&self, value: &Value) -> Validated<Checked> {
        let map = match expect_object(value) {
            Ok(m) => m,
            Err(e) => return Validated::invalid(e),
        };
        let mut errors: Vec<ValidationError> = Vec::new();
        let mut outputs: Vec<(&str, Value)> = Vec::with_capacity(self.fields.len());
        let mut changed = false;

        for (name, child, _) in &self.fields {
            let field_input = match map.get(name) {
                Some(v) => FieldInput::Present(v),
                None => FieldInput::Absent,
            };
            match (child.run)(field_input) {
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
                    if self.abort_early {
                        return Validated::invalid_all(errs);
                    }
                    errors.extend(errs);
                }
            }
        }

        self.combine(value, map, outputs, errors, changed)
    }

    fn check(&self, value: &Value) -> bool {
        let Some(map) = value.as_object() else {
            return false;
        };
        for (name, child, absent_ok) in &self.fields {
            match map.get(name) {
                Some(v) => {
                    if !(child.check)(v) {
                        return false;
                    }
                }
                None => {
                    if !absent_ok {
                        return false;
                    }
                }
            }
        }
        if self.own_policy == UnknownKeys::Strict {
            if map.keys().any(|k| !self.declares(k)) {
                return false;
            }
        }
        true
    }

    fn run_async<'a>(
        &'a self,
        value: &'a Value,
    ) -> futures_util::future::BoxFuture<'a, Validated<Checked>> {
        Box::pin(async move {
            let map = match expect_object(value) {
                Ok(m) => m,
                Err(e) => return Validated::invalid(e),
            };
            let mut errors: Vec<ValidationError> = Vec::new();
            let mut outputs: Vec<(&str, Value)> = Vec::with_capacity(self.fields.len());
            let mut changed = false;

            for (name, child, _) in &self.fields {
                let field_input = match map.get(name) {
                    Some(v) => FieldInput::Present(v),
                    None => FieldInput::Absent,
                };
                match (child.run_async)(field_input).await {
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
                        if self.abort_early {
                            return Validated::invalid_all(errs);
                        }
                        errors.extend(errs);
                    }
                }
            }

            self.combine(value, map, outputs, errors, changed)
        })
    }
}

struct CompiledArray {
    element: CompiledNode,
    min_items: Option<usize>,
    max_items: Option<usize>,
    unique: bool,
    parallel: bool,
    abort_early: bool,
}

impl CompiledArray {
    fn preflight<'a>(&self, value: &'a Value) -> Result<&'a [Value], ValidationError> {
        let items = expect_array(value, "array")?;
        if let Some(err) = check_array_bounds(self.min_items, self.max_items, items.len()) {
            return Err(err);
        }
        if self.unique {
            if let Some(err) = check_unique(items) {
                return Err(err);
            }
        }
        Ok(items)
    }

    fn combine(
        &self,
        value: &Value,
        items: &[Value],
        results: Vec<Validated<Checked>>,
    ) -> Validated<Checked> {
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
                    if self.abort_early {
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
}

impl CompiledComposite for CompiledArray {
    fn run(&self, value: &Value) -> Validated<Checked> {
        let items = match self.preflight(value) {
            Ok(items) => items,
            Err(e) => return Validated::invalid(e),
        };
        let mut results = Vec::with_capacity(items.len());
        for item in items.iter() {
            let out = (self.element.run)(FieldInput::Present(item));
            let failed = !out.is_valid();
            results.push(out);
            if failed && self.abort_early {
                break;
            }
        }
        self.combine(value, items, results)
    }

    fn check(&self, value: &Value) -> bool {
        let Some(items) = value.as_array() else {
            return false;
        };
        if check_array_bounds(self.min_items, self.max_items, items.len()).is_some() {
            return false;
        }
        if self.unique && check_unique(items).is_some() {
            return false;
        }
        items.iter().all(|item| (self.element.check)(item))
    }

    fn run_async<'a>(
        &'a self,
        value: &'a Value,
    ) -> futures_util::future::BoxFuture<'a, Validated<Checked>> {
        Box::pin(async move {
            let items = match self.preflight(value) {
                Ok(items) => items,
                Err(e) => return Validated::invalid(e),
            };
            let results: Vec<Validated<Checked>> = if self.parallel {
                join_all(
                    items
                        .iter()
                        .map(|item| (self.element.run_async)(FieldInput::Present(item))),
                )
                .await
            } else {
                let mut results = Vec::with_capacity(items.len());
                for item in items.iter() {
                    let out = (self.element.run_async)(FieldInput::Present(item)).await;
                    let failed = !out.is_valid();
                    results.push(out);
                    if failed && self.abort_early {
                        break;
                    }
                }
                results
            };
            self.combine(value, items, results)
        })
    }
}

struct CompiledTuple {
    items: Vec<CompiledNode>,
    rest: Option<CompiledNode>,
    abort_early: bool,
}

impl CompiledTuple {
    fn slot(&self, index: usize) -> Option<&CompiledNode> {
        if index < self.items.len() {
            Some(&self.items[index])
        } else {
            self.rest.as_ref()
        }
    }
}

impl CompiledComposite for CompiledTuple {
    fn run(&self, value: &Value) -> Validated<Checked> {
        let items = match expect_array(value, "tuple") {
            Ok(items) => items,
            Err(e) => return Validated::invalid(e),
        };
        if let Some(err) = check_tuple_len(self.items.len(), self.rest.is_some(), items.len()) {
            return Validated::invalid(err);
        }

        let mut errors: Vec<ValidationError> = Vec::new();
        let mut outputs: Vec<Value> = Vec::with_capacity(items.len());
        let mut changed = false;

        for (index, item) in items.iter().enumerate() {
            let Some(child) = self.slot(index) else {
                break;
            };
            match (child.run)(FieldInput::Present(item)) {
                Validated::Valid(Checked::Value(out)) => {
                    changed |= !Value::ptr_eq(item, &out);
                    outputs.push(out);
                }
                Validated::Valid(Checked::Absent) => outputs.push(item.clone()),
                Validated::Invalid(errs) => {
                    let errs: Vec<ValidationError> =
                        errs.into_iter().map(|e| e.under_index(index)).collect();
                    if self.abort_early {
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

    fn check(&self, value: &Value) -> bool {
        let Some(items) = value.as_array() else {
            return false;
        };
        if check_tuple_len(self.items.len(), self.rest.is_some(), items.len()).is_some() {
            return false;
        }
        for (index, item) in items.iter().enumerate() {
            let Some(child) = self.slot(index) else {
                break;
            };
            if !(child.check)(item) {
                return false;
            }
        }
        true
    }

    fn run_async<'a>(
        &'a self,
        value: &'a Value,
    ) -> futures_util::future::BoxFuture<'a, Validated<Checked>> {
        Box::pin(async move {
            let items = match expect_array(value, "tuple") {
                Ok(items) => items,
                Err(e) => return Validated::invalid(e),
            };
            if let Some(err) = check_tuple_len(self.items.len(), self.rest.is_some(), items.len())
            {
                return Validated::invalid(err);
            }

            let mut errors: Vec<ValidationError> = Vec::new();
            let mut outputs: Vec<Value> = Vec::with_capacity(items.len());
            let mut changed = false;

            for (index, item) in items.iter().enumerate() {
                let Some(child) = self.slot(index) else {
                    break;
                };
                match (child.run_async)(FieldInput::Present(item)).await {
                    Validated::Valid(Checked::Value(out)) => {
                        changed |= !Value::ptr_eq(item, &out);
                        outputs.push(out);
                    }
                    Validated::Valid(Checked::Absent) => outputs.push(item.clone()),
                    Validated::Invalid(errs) => {
                        let errs: Vec<ValidationError> =
                            errs.into_iter().map(|e| e.under_index(index)).collect();
                        if self.abort_early {
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
        })
    }
}

struct CompiledUnion {
    members: Vec<CompiledNode>,
    expected: String,
}

impl CompiledUnion {
    fn no_match(&self, value: &Value) -> Validated<Checked> {
        Validated::invalid(
            ValidationError::new(
                ErrorKind::UnionNoMatch,
                "value did not match any union member",
            )
            .with_expected(self.expected.clone())
            .with_received(value),
        )
    }
}

impl CompiledComposite for CompiledUnion {
    fn run(&self, value: &Value) -> Validated<Checked> {
        for member in &self.members {
            if let Validated::Valid(out) = (member.run)(FieldInput::Present(value)) {
                return Validated::Valid(out);
            }
        }
        self.no_match(value)
    }

    fn check(&self, value: &Value) -> bool {
        self.members.iter().any(|m| (m.check)(value))
    }

    fn run_async<'a>(
        &'a self,
        value: &'a Value,
    ) -> futures_util::future::BoxFuture<'a, Validated<Checked>> {
        Box::pin(async move {
            for member in &self.members {
                if let Validated::Valid(out) =
                    (member.run_async)(FieldInput::Present(value)).await
                {
                    return Validated::Valid(out);
                }
            }
            self.no_match(value)
        })
    }
}

struct CompiledDiscriminated {
    tag: String,
    members: Vec<(Value, CompiledNode)>,
}

impl CompiledDiscriminated {
    fn pick(&self, value: &Value) -> Result<&CompiledNode, ValidationError> {
        let map = expect_object(value)?;
        let tag_value = map.get(&self.tag).ok_or_else(|| {
            ValidationError::new(
                ErrorKind::UnionNoMatch,
                format!("missing discriminator field '{}'", self.tag),
            )
        })?;
        self.members
            .iter()
            .find(|(tag, _)| tag == tag_value)
            .map(|(_, member)| member)
            .ok_or_else(|| {
                ValidationError::new(
                    ErrorKind::UnionNoMatch,
                    format!("unrecognized value for discriminator field '{}'", self.tag),
                )
                .with_received(tag_value)
            })
    }
}

impl CompiledComposite for CompiledDiscriminated {
    fn run(&self, value: &Value) -> Validated<Checked> {
        match self.pick(value) {
            Ok(member) => (member.run)(FieldInput::Present(value)),
            Err(e) => Validated::invalid(e),
        }
    }

    fn check(&self, value: &Value) -> bool {
        match self.pick(value) {
            Ok(member) => (member.check)(value),
            Err(_) => false,
        }
    }

    fn run_async<'a>(
        &'a self,
        value: &'a Value,
    ) -> futures_util::future::BoxFuture<'a, Validated<Checked>> {
        Box::pin(async move {
            match self.pick(value) {
                Ok(member) => (member.run_async)(FieldInput::Present(value)).await,
                Err(e) => Validated::invalid(e),
            }
        })
    }
}

struct CompiledIntersection {
    left: CompiledNode,
    right: CompiledNode,
    abort_early: bool,
}

impl CompiledIntersection {
    fn combine(
        &self,
        left_out: Validated<Checked>,
        right_out: Validated<Checked>,
    ) -> Validated<Checked> {
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
}

impl CompiledComposite for CompiledIntersection {
    fn run(&self, value: &Value) -> Validated<Checked> {
        let left_out = (self.left.run)(FieldInput::Present(value));
        if self.abort_early {
            if let Validated::Invalid(errs) = left_out {
                return Validated::invalid_all(errs);
            }
        }
        let right_out = (self.right.run)(FieldInput::Present(value));
        self.combine(left_out, right_out)
    }

    fn check(&self, value: &Value) -> bool {
        (self.left.check)(value) && (self.right.check)(value)
    }

    fn run_async<'a>(
        &'a self,
        value: &'a Value,
    ) -> futures_util::future::BoxFuture<'a, Validated<Checked>> {
        Box::pin(async move {
            let left_out = (self.left.run_async)(FieldInput::Present(value)).await;
            if self.abort_early {
                if let Validated::Invalid(errs) = left_out {
                    return Validated::invalid_all(errs);
                }
            }
            let right_out = (self.right.run_async)(FieldInput::Present(value)).await;
            self.combine(left_out, right_out)
        })
    }
}

struct CompiledRecord {
    key: Option<CompiledNode>,
    value: CompiledNode,
    abort_early: bool,
}

impl CompiledComposite for CompiledRecord {
    fn run(&self, value: &Value) -> Validated<Checked> {
        let map = match expect_object(value) {
            Ok(m) => m,
            Err(e) => return Validated::invalid(e),
        };
        let mut errors: Vec<ValidationError> = Vec::new();
        let mut outputs: Vec<(String, Value)> = Vec::with_capacity(map.len());
        let mut changed = false;

        for (key, entry) in map.iter() {
            if let Some(key_node) = &self.key {
                let key_value = Value::from(key.as_str());
                if let Validated::Invalid(key_errs) =
                    (key_node.run)(FieldInput::Present(&key_value))
                {
                    let err = ValidationError::new(
                        ErrorKind::RecordInvalidKey,
                        format!("invalid key: {}", key_errs[0].message),
                    )
                    .with_received(&key_value)
                    .under_record_key(key);
                    if self.abort_early {
                        return Validated::invalid(err);
                    }
                    errors.push(err);
                }
            }
            match (self.value.run)(FieldInput::Present(entry)) {
                Validated::Valid(Checked::Value(out)) => {
                    changed |= !Value::ptr_eq(entry, &out);
                    outputs.push((key.clone(), out));
                }
                Validated::Valid(Checked::Absent) => outputs.push((key.clone(), entry.clone())),
                Validated::Invalid(errs) => {
                    let errs: Vec<ValidationError> =
                        errs.into_iter().map(|e| e.under_key(key)).collect();
                    if self.abort_early {
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

    fn check(&self, value: &Value) -> bool {
        let Some(map) = value.as_object() else {
            return false;
        };
        map.iter().all(|(key, entry)| {
            let key_ok = match &self.key {
                Some(key_node) => (key_node.check)(&Value::from(key.as_str())),
                None => true,
            };
            key_ok && (self.value.check)(entry)
        })
    }

    fn run_async<'a>(
        &'a self,
        value: &'a Value,
    ) -> futures_util::future::BoxFuture<'a, Validated<Checked>> {
        Box::pin(async move {
            let map = match expect_object(value) {
                Ok(m) => m,
                Err(e) => return Validated::invalid(e),
            };
            let mut errors: Vec<ValidationError> = Vec::new();
            let mut outputs: Vec<(String, Value)> = Vec::with_capacity(map.len());
            let mut changed = false;

            for (key, entry) in map.iter() {
                if let Some(key_node) = &self.key {
                    let key_value = Value::from(key.as_str());
                    if let Validated::Invalid(key_errs) =
                        (key_node.run_async)(FieldInput::Present(&key_value)).await
                    {
                        let err = ValidationError::new(
                            ErrorKind::RecordInvalidKey,
                            format!("invalid key: {}", key_errs[0].message),
                        )
                        .with_received(&key_value)
                        .under_record_key(key);
                        if self.abort_early {
                            return Validated::invalid(err);
                        }
                        errors.push(err);
                    }
                }
                match (self.value.run_async)(FieldInput::Present(entry)).await {
                    Validated::Valid(Checked::Value(out)) => {
                        changed |= !Value::ptr_eq(entry, &out);
                        outputs.push((key.clone(), out));
                    }
                    Validated::Valid(Checked::Absent) => {
                        outputs.push((key.clone(), entry.clone()))
                    }
                    Validated::Invalid(errs) => {
                        let errs: Vec<ValidationError> =
                            errs.into_iter().map(|e| e.under_key(key)).collect();
                        if self.abort_early {
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
        })
    }
}

/// Compile-on-first-use cell for lazy nodes. Compiling the forced child
/// eagerly would recurse forever on a self-referential schema, so the
/// child compiles when the first value reaches it, memoized per node.
struct CompiledLazy {
    cell: OnceLock<CompiledNode>,
    lazy: LazySchema,
    opts: Options,
}

impl CompiledLazy {
    fn node(&self) -> &CompiledNode {
        self.cell.get_or_init(|| {
            let mut memo: HashMap<usize, CompiledNode> = HashMap::new();
            compile_node(self.lazy.force(), &self.opts, &mut memo)
        })
    }
}
