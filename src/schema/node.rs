//! Schema nodes and the fluent combinator surface.
//!
//! A `Schema` is an immutable handle to one combinator instance: a
//! closed kind discriminator plus frozen configuration. Every fluent
//! modifier returns a new node and leaves the receiver untouched, so a
//! validator compiled from a node stays valid no matter what is chained
//! onto that node afterwards. Children are shared freely between
//! parents.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use regex::Regex;

use crate::report::RefineCtx;
use crate::value::Value;

use super::composites::{
    ArrayShape, DiscriminatedShape, ObjectShape, RecordShape, TupleShape, UnknownKeys,
};
use super::lazy::LazySchema;
use super::primitives::{Bound, DateRules, NumberRules, StringFormat, StringRules};

pub(crate) type RefineFn = Arc<dyn Fn(&Value) -> bool + Send + Sync>;
pub(crate) type SuperRefineFn = Arc<dyn Fn(&Value, &mut RefineCtx) + Send + Sync>;
pub(crate) type MapFn = Arc<dyn Fn(Value) -> Result<Value, String> + Send + Sync>;
pub(crate) type AsyncPredicateFn =
    Arc<dyn Fn(Value) -> BoxFuture<'static, Result<bool, String>> + Send + Sync>;
pub(crate) type AsyncMapFn =
    Arc<dyn Fn(Value) -> BoxFuture<'static, Result<Value, String>> + Send + Sync>;

/// One schema combinator instance.
#[derive(Clone)]
pub struct Schema {
    inner: Arc<SchemaInner>,
}

#[derive(Clone)]
pub(crate) struct SchemaInner {
    pub kind: SchemaKind,
    pub optional: bool,
    pub nullable: bool,
    pub default: Option<Value>,
    /// True when this node or any descendant holds a user-supplied
    /// asynchronous function. Lazy nodes report true because the child
    /// is unknown until first force.
    pub suspending: bool,
}

/// Closed discriminator over every combinator. The compiler matches this
/// exhaustively, so adding a variant is a compile-visible event.
#[derive(Clone)]
pub(crate) enum SchemaKind {
    Any,
    Boolean,
    String(StringRules),
    Number(NumberRules),
    Date(DateRules),
    Literal(Value),
    Enum(Vec<Value>),
    Object(ObjectShape),
    Array(ArrayShape),
    Tuple(TupleShape),
    Union(Vec<Schema>),
    DiscriminatedUnion(DiscriminatedShape),
    Intersection(Schema, Schema),
    Record(RecordShape),
    Lazy(LazySchema),
    Refine(RefineRule),
    RefineAsync(AsyncRefineRule),
    SuperRefine(SuperRefineRule),
    Transform(TransformRule),
    TransformAsync(AsyncTransformRule),
    Preprocess(PreprocessRule),
    PreprocessAsync(AsyncPreprocessRule),
    Pipe(PipeRule),
}

#[derive(Clone)]
pub(crate) struct RefineRule {
    pub inner: Schema,
    pub predicate: RefineFn,
    pub message: String,
}

#[derive(Clone)]
pub(crate) struct AsyncRefineRule {
    pub inner: Schema,
    pub predicate: AsyncPredicateFn,
    pub message: String,
}

#[derive(Clone)]
pub(crate) struct SuperRefineRule {
    pub inner: Schema,
    pub refiner: SuperRefineFn,
}

#[derive(Clone)]
pub(crate) struct TransformRule {
    pub inner: Schema,
    pub transform: MapFn,
}

#[derive(Clone)]
pub(crate) struct AsyncTransformRule {
    pub inner: Schema,
    pub transform: AsyncMapFn,
}

#[derive(Clone)]
pub(crate) struct PreprocessRule {
    pub inner: Schema,
    pub preprocess: MapFn,
}

#[derive(Clone)]
pub(crate) struct AsyncPreprocessRule {
    pub inner: Schema,
    pub preprocess: AsyncMapFn,
}

#[derive(Clone)]
pub(crate) struct PipeRule {
    pub inner: Schema,
    pub next: Schema,
}

impl SchemaKind {
    /// Short name used in union descriptors and debug output.
    pub(crate) fn name(&self) -> &'static str {
        match self {
            SchemaKind::Any => "any",
            SchemaKind::Boolean => "bool",
            SchemaKind::String(_) => "string",
            SchemaKind::Number(_) => "number",
            SchemaKind::Date(_) => "date",
            SchemaKind::Literal(_) => "literal",
            SchemaKind::Enum(_) => "enum",
            SchemaKind::Object(_) => "object",
            SchemaKind::Array(_) => "array",
            SchemaKind::Tuple(_) => "tuple",
            SchemaKind::Union(_) => "union",
            SchemaKind::DiscriminatedUnion(_) => "discriminated union",
            SchemaKind::Intersection(_, _) => "intersection",
            SchemaKind::Record(_) => "record",
            SchemaKind::Lazy(_) => "lazy",
            SchemaKind::Refine(_) => "refine",
            SchemaKind::RefineAsync(_) => "refine",
            SchemaKind::SuperRefine(_) => "refine",
            SchemaKind::Transform(_) => "transform",
            SchemaKind::TransformAsync(_) => "transform",
            SchemaKind::Preprocess(_) => "preprocess",
            SchemaKind::PreprocessAsync(_) => "preprocess",
            SchemaKind::Pipe(_) => "pipe",
        }
    }

    /// Decorator and lazy kinds forward absence handling to their inner
    /// node instead of demanding a value themselves.
    pub(crate) fn delegates_absence(&self) -> bool {
        matches!(
            self,
            SchemaKind::Lazy(_)
                | SchemaKind::Refine(_)
                | SchemaKind::RefineAsync(_)
                | SchemaKind::SuperRefine(_)
                | SchemaKind::Transform(_)
                | SchemaKind::TransformAsync(_)
                | SchemaKind::Preprocess(_)
                | SchemaKind::PreprocessAsync(_)
                | SchemaKind::Pipe(_)
        )
    }
}

impl Schema {
    fn leaf(kind: SchemaKind) -> Self {
        Self::with_suspending(kind, false)
    }

    pub(crate) fn with_suspending(kind: SchemaKind, suspending: bool) -> Self {
        Schema {
            inner: Arc::new(SchemaInner {
                kind,
                optional: false,
                nullable: false,
                default: None,
                suspending,
            }),
        }
    }

    pub(crate) fn inner(&self) -> &SchemaInner {
        &self.inner
    }

    /// Stable identity of this node, used to memoize compilation of
    /// shared children.
    pub(crate) fn node_ptr(&self) -> usize {
        Arc::as_ptr(&self.inner) as usize
    }

    pub(crate) fn suspending(&self) -> bool {
        self.inner.suspending
    }

    /// Whether an absent value succeeds for this node (directly or
    /// through a decorator chain).
    pub(crate) fn accepts_absent(&self) -> bool {
        if self.inner.default.is_some() || self.inner.optional {
            return true;
        }
        match &self.inner.kind {
            SchemaKind::Lazy(l) => l.force().accepts_absent(),
            SchemaKind::Refine(r) => r.inner.accepts_absent(),
            SchemaKind::RefineAsync(r) => r.inner.accepts_absent(),
            SchemaKind::SuperRefine(r) => r.inner.accepts_absent(),
            SchemaKind::Transform(r) => r.inner.accepts_absent(),
            SchemaKind::TransformAsync(r) => r.inner.accepts_absent(),
            SchemaKind::Preprocess(r) => r.inner.accepts_absent(),
            SchemaKind::PreprocessAsync(r) => r.inner.accepts_absent(),
            SchemaKind::Pipe(r) => r.inner.accepts_absent(),
            _ => false,
        }
    }

    fn map_inner(&self, apply: impl FnOnce(&mut SchemaInner)) -> Schema {
        let mut inner = (*self.inner).clone();
        apply(&mut inner);
        Schema { inner: Arc::new(inner) }
    }

    // ---- common modifiers ----

    /// Accept an absent value; the field is omitted from parent output.
    pub fn optional(&self) -> Schema {
        self.map_inner(|i| i.optional = true)
    }

    /// Accept an explicit null, passing it through as the output.
    pub fn nullable(&self) -> Schema {
        self.map_inner(|i| i.nullable = true)
    }

    /// Substitute `value` when the input is absent, skipping all further
    /// checks. Wins over `optional()` when both are configured.
    pub fn default_value(&self, value: impl Into<Value>) -> Schema {
        let value = value.into();
        self.map_inner(|i| i.default = Some(value))
    }

    // ---- string constraints ----

    /// Minimum length in characters.
    ///
    /// # Panics
    /// If applied to a non-string schema.
    pub fn min_len(&self, min: usize) -> Schema {
        self.map_string(|r| r.min_len = Some(min))
    }

    /// Maximum length in characters.
    ///
    /// # Panics
    /// If applied to a non-string schema.
    pub fn max_len(&self, max: usize) -> Schema {
        self.map_string(|r| r.max_len = Some(max))
    }

    /// Require the string to match `pattern`.
    ///
    /// # Panics
    /// If applied to a non-string schema.
    pub fn pattern(&self, pattern: Regex) -> Schema {
        self.map_string(|r| r.pattern = Some(pattern))
    }

    /// Require a named format.
    ///
    /// # Panics
    /// If applied to a non-string schema.
    pub fn format(&self, format: StringFormat) -> Schema {
        self.map_string(|r| r.format = Some(format))
    }

    pub fn email(&self) -> Schema {
        self.format(StringFormat::Email)
    }

    pub fn url(&self) -> Schema {
        self.format(StringFormat::Url)
    }

    pub fn uuid(&self) -> Schema {
        self.format(StringFormat::Uuid)
    }

    fn map_string(&self, apply: impl FnOnce(&mut StringRules)) -> Schema {
        self.map_inner(|i| match &mut i.kind {
            SchemaKind::String(rules) => apply(rules),
            other => panic!("string constraint applied to a {} schema", other.name()),
        })
    }

    // ---- number constraints ----

    /// Inclusive lower bound.
    ///
    /// # Panics
    /// If applied to a non-number schema.
    pub fn min(&self, min: f64) -> Schema {
        self.map_number(|r| r.min = Some(Bound { limit: min, inclusive: true }))
    }

    /// Inclusive upper bound.
    ///
    /// # Panics
    /// If applied to a non-number schema.
    pub fn max(&self, max: f64) -> Schema {
        self.map_number(|r| r.max = Some(Bound { limit: max, inclusive: true }))
    }

    /// Exclusive lower bound.
    pub fn gt(&self, limit: f64) -> Schema {
        self.map_number(|r| r.min = Some(Bound { limit, inclusive: false }))
    }

    /// Exclusive upper bound.
    pub fn lt(&self, limit: f64) -> Schema {
        self.map_number(|r| r.max = Some(Bound { limit, inclusive: false }))
    }

    /// Require a value strictly above zero.
    pub fn positive(&self) -> Schema {
        self.gt(0.0)
    }

    /// Require a value strictly below zero.
    pub fn negative(&self) -> Schema {
        self.lt(0.0)
    }

    /// Require a whole number (`Int`, or a `Float` with zero fraction).
    pub fn int(&self) -> Schema {
        self.map_number(|r| r.integer = true)
    }

    /// Require the value to be a multiple of `step`.
    pub fn multiple_of(&self, step: f64) -> Schema {
        self.map_number(|r| r.multiple_of = Some(step))
    }

    fn map_number(&self, apply: impl FnOnce(&mut NumberRules)) -> Schema {
        self.map_inner(|i| match &mut i.kind {
            SchemaKind::Number(rules) => apply(rules),
            other => panic!("number constraint applied to a {} schema", other.name()),
        })
    }

    // ---- date constraints ----

    /// Earliest accepted instant (inclusive).
    ///
    /// # Panics
    /// If applied to a non-date schema.
    pub fn min_date(&self, min: DateTime<Utc>) -> Schema {
        self.map_date(|r| r.min = Some(min))
    }

    /// Latest accepted instant (inclusive).
    ///
    /// # Panics
    /// If applied to a non-date schema.
    pub fn max_date(&self, max: DateTime<Utc>) -> Schema {
        self.map_date(|r| r.max = Some(max))
    }

    fn map_date(&self, apply: impl FnOnce(&mut DateRules)) -> Schema {
        self.map_inner(|i| match &mut i.kind {
            SchemaKind::Date(rules) => apply(rules),
            other => panic!("date constraint applied to a {} schema", other.name()),
        })
    }

    // ---- object configuration ----

    /// Reject undeclared keys with `OBJECT_UNKNOWN_KEY`.
    ///
    /// # Panics
    /// If applied to a non-object schema.
    pub fn strict(&self) -> Schema {
        self.map_object(|s| s.policy = UnknownKeys::Strict)
    }

    /// Copy undeclared keys through to the output.
    ///
    /// # Panics
    /// If applied to a non-object schema.
    pub fn passthrough(&self) -> Schema {
        self.map_object(|s| s.policy = UnknownKeys::Passthrough)
    }

    fn map_object(&self, apply: impl FnOnce(&mut ObjectShape)) -> Schema {
        self.map_inner(|i| match &mut i.kind {
            SchemaKind::Object(shape) => apply(shape),
            other => panic!("object policy applied to a {} schema", other.name()),
        })
    }

    // ---- array configuration ----

    /// Minimum element count.
    ///
    /// # Panics
    /// If applied to a non-array schema.
    pub fn min_items(&self, min: usize) -> Schema {
        self.map_array(|s| s.min_items = Some(min))
    }

    /// Maximum element count.
    ///
    /// # Panics
    /// If applied to a non-array schema.
    pub fn max_items(&self, max: usize) -> Schema {
        self.map_array(|s| s.max_items = Some(max))
    }

    /// Reject structurally duplicate elements before validating any of
    /// them.
    pub fn unique(&self) -> Schema {
        self.map_array(|s| s.unique = true)
    }

    /// Validate elements concurrently on the asynchronous entry point.
    /// Results and collected errors keep ascending index order.
    pub fn parallel(&self) -> Schema {
        self.map_array(|s| s.parallel = true)
    }

    fn map_array(&self, apply: impl FnOnce(&mut ArrayShape)) -> Schema {
        self.map_inner(|i| match &mut i.kind {
            SchemaKind::Array(shape) => apply(shape),
            other => panic!("array constraint applied to a {} schema", other.name()),
        })
    }

    // ---- tuple configuration ----

    /// Accept extra trailing elements validated against `rest`.
    ///
    /// # Panics
    /// If applied to a non-tuple schema.
    pub fn rest(&self, rest: Schema) -> Schema {
        self.map_inner(|i| match &mut i.kind {
            SchemaKind::Tuple(shape) => shape.rest = Some(rest),
            other => panic!("rest schema applied to a {} schema", other.name()),
        })
    }

    // ---- decorators ----

    /// Post-validation predicate. Runs only after inner validation
    /// succeeds; a `false` yields `REFINEMENT_FAILED` with `message`.
    pub fn refine<F>(&self, predicate: F, message: impl Into<String>) -> Schema
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        let suspending = self.suspending();
        Schema::with_suspending(
            SchemaKind::Refine(RefineRule {
                inner: self.clone(),
                predicate: Arc::new(predicate),
                message: message.into(),
            }),
            suspending,
        )
    }

    /// Suspending predicate. An `Err` (for example a caller-side
    /// timeout) folds into `REFINEMENT_FAILED` instead of escaping.
    pub fn refine_async<F, Fut>(&self, predicate: F, message: impl Into<String>) -> Schema
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<bool, String>> + Send + 'static,
    {
        let predicate: AsyncPredicateFn = Arc::new(move |v| Box::pin(predicate(v)));
        Schema::with_suspending(
            SchemaKind::RefineAsync(AsyncRefineRule {
                inner: self.clone(),
                predicate,
                message: message.into(),
            }),
            true,
        )
    }

    /// Multi-issue refinement: the refiner receives an error-collection
    /// context and may attach any number of path-qualified issues.
    pub fn super_refine<F>(&self, refiner: F) -> Schema
    where
        F: Fn(&Value, &mut RefineCtx) + Send + Sync + 'static,
    {
        let suspending = self.suspending();
        Schema::with_suspending(
            SchemaKind::SuperRefine(SuperRefineRule {
                inner: self.clone(),
                refiner: Arc::new(refiner),
            }),
            suspending,
        )
    }

    /// Map the validated output. An `Err` folds into `TRANSFORM_FAILED`
    /// instead of escaping.
    pub fn transform<F>(&self, transform: F) -> Schema
    where
        F: Fn(Value) -> Result<Value, String> + Send + Sync + 'static,
    {
        let suspending = self.suspending();
        Schema::with_suspending(
            SchemaKind::Transform(TransformRule {
                inner: self.clone(),
                transform: Arc::new(transform),
            }),
            suspending,
        )
    }

    /// Suspending output map.
    pub fn transform_async<F, Fut>(&self, transform: F) -> Schema
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, String>> + Send + 'static,
    {
        let transform: AsyncMapFn = Arc::new(move |v| Box::pin(transform(v)));
        Schema::with_suspending(
            SchemaKind::TransformAsync(AsyncTransformRule {
                inner: self.clone(),
                transform,
            }),
            true,
        )
    }

    /// Coerce or normalize the raw value before inner validation runs.
    pub fn preprocess<F>(&self, preprocess: F) -> Schema
    where
        F: Fn(Value) -> Result<Value, String> + Send + Sync + 'static,
    {
        let suspending = self.suspending();
        Schema::with_suspending(
            SchemaKind::Preprocess(PreprocessRule {
                inner: self.clone(),
                preprocess: Arc::new(preprocess),
            }),
            suspending,
        )
    }

    /// Suspending preprocessor.
    pub fn preprocess_async<F, Fut>(&self, preprocess: F) -> Schema
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, String>> + Send + 'static,
    {
        let preprocess: AsyncMapFn = Arc::new(move |v| Box::pin(preprocess(v)));
        Schema::with_suspending(
            SchemaKind::PreprocessAsync(AsyncPreprocessRule {
                inner: self.clone(),
                preprocess,
            }),
            true,
        )
    }

    /// Feed this schema's output into a second, independently defined
    /// schema.
    pub fn pipe(&self, next: Schema) -> Schema {
        let suspending = self.suspending() || next.suspending();
        Schema::with_suspending(
            SchemaKind::Pipe(PipeRule {
                inner: self.clone(),
                next,
            }),
            suspending,
        )
    }
}

impl fmt::Debug for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Schema")
            .field("kind", &self.inner.kind.name())
            .field("optional", &self.inner.optional)
            .field("nullable", &self.inner.nullable)
            .field("suspending", &self.inner.suspending)
            .finish()
    }
}

// ---- constructors ----

/// Accept any value unchanged.
pub fn any() -> Schema {
    Schema::leaf(SchemaKind::Any)
}

pub fn boolean() -> Schema {
    Schema::leaf(SchemaKind::Boolean)
}

pub fn string() -> Schema {
    Schema::leaf(SchemaKind::String(StringRules::default()))
}

pub fn number() -> Schema {
    Schema::leaf(SchemaKind::Number(NumberRules::default()))
}

/// A number schema with the integer constraint pre-set.
pub fn integer() -> Schema {
    number().int()
}

pub fn date() -> Schema {
    Schema::leaf(SchemaKind::Date(DateRules::default()))
}

/// Accept exactly `value`.
pub fn literal(value: impl Into<Value>) -> Schema {
    Schema::leaf(SchemaKind::Literal(value.into()))
}

/// Accept any of the listed scalar values.
pub fn enumeration(options: Vec<Value>) -> Schema {
    Schema::leaf(SchemaKind::Enum(options))
}

/// Keyed map with declared fields; field declaration order is the
/// validation order. Unknown keys are stripped unless reconfigured.
pub fn object<K: Into<String>>(fields: Vec<(K, Schema)>) -> Schema {
    let fields: Vec<(String, Schema)> = fields.into_iter().map(|(k, s)| (k.into(), s)).collect();
    let suspending = fields.iter().any(|(_, s)| s.suspending());
    Schema::with_suspending(
        SchemaKind::Object(ObjectShape {
            fields,
            policy: UnknownKeys::Strip,
        }),
        suspending,
    )
}

/// Ordered list with one element schema.
pub fn array(element: Schema) -> Schema {
    let suspending = element.suspending();
    Schema::with_suspending(
        SchemaKind::Array(ArrayShape {
            element,
            min_items: None,
            max_items: None,
            unique: false,
            parallel: false,
        }),
        suspending,
    )
}

/// Fixed-position list.
pub fn tuple(items: Vec<Schema>) -> Schema {
    let suspending = items.iter().any(Schema::suspending);
    Schema::with_suspending(SchemaKind::Tuple(TupleShape { items, rest: None }), suspending)
}

/// First matching member wins; no match yields one `UNION_NO_MATCH`.
pub fn union(members: Vec<Schema>) -> Schema {
    let suspending = members.iter().any(Schema::suspending);
    Schema::with_suspending(SchemaKind::Union(members), suspending)
}

/// Union that inspects `tag` first and validates only the member whose
/// tag literal matches, surfacing that member's full diagnostics.
pub fn discriminated_union(
    tag: impl Into<String>,
    members: Vec<(Value, Schema)>,
) -> Schema {
    let suspending = members.iter().any(|(_, s)| s.suspending());
    Schema::with_suspending(
        SchemaKind::DiscriminatedUnion(DiscriminatedShape {
            tag: tag.into(),
            members,
        }),
        suspending,
    )
}

/// Both schemas validate the same input; object outputs merge
/// right-over-left.
pub fn intersection(left: Schema, right: Schema) -> Schema {
    let suspending = left.suspending() || right.suspending();
    Schema::with_suspending(SchemaKind::Intersection(left, right), suspending)
}

/// Keyed map with uniform value validation.
pub fn record(value: Schema) -> Schema {
    let suspending = value.suspending();
    Schema::with_suspending(
        SchemaKind::Record(RecordShape { key: None, value }),
        suspending,
    )
}

/// Keyed map validating both keys and values.
pub fn record_with_keys(key: Schema, value: Schema) -> Schema {
    let suspending = key.suspending() || value.suspending();
    Schema::with_suspending(
        SchemaKind::Record(RecordShape { key: Some(key), value }),
        suspending,
    )
}

/// Defer child construction to a memoized thunk, enabling
/// self-referential schemas.
pub fn lazy(thunk: impl Fn() -> Schema + Send + Sync + 'static) -> Schema {
    Schema::with_suspending(SchemaKind::Lazy(LazySchema::new(thunk)), true)
}
