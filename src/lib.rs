//! vetter - A strict, composable schema validation engine
//!
//! Validates dynamically-typed values (decoded from JSON, form data, or
//! similar untrusted sources) against declaratively composed schemas,
//! producing either the validated/transformed output or a structured
//! list of path-qualified errors.
//!
//! Two equivalent execution strategies:
//!
//! 1. Interpret the schema tree directly (`Schema::validate`).
//! 2. Compile once into specialized closures (`compile`) and invoke the
//!    resulting validator many times.
//!
//! The critical design rule is semantic equivalence across the two: the
//! compiled path must produce the same observable output as the
//! interpreted walker for every schema, input, and option set.
//!
//! ```
//! use vetter::{compile, number, object, string, Value};
//!
//! let schema = object(vec![
//!     ("name", string().min_len(1)),
//!     ("age", number().int().min(0.0).optional()),
//! ]);
//!
//! let input = Value::object([
//!     ("name", Value::from("Ada")),
//!     ("age", Value::from(36i64)),
//! ]);
//!
//! assert!(schema.validate(&input).is_valid());
//!
//! let compiled = compile(&schema);
//! assert!(compiled.run(&input).is_valid());
//! ```

pub mod compile;
pub mod engine;
pub mod observability;
pub mod report;
pub mod schema;
pub mod value;

pub use compile::{compile, compile_with, CompiledCache, CompiledValidator};
pub use engine::{with_timeout, Options};
pub use report::{ErrorKind, RefineCtx, Validated, ValidationError, ValidationFailure};
pub use schema::{
    any, array, boolean, date, discriminated_union, enumeration, integer, intersection, lazy,
    literal, number, object, record, record_with_keys, string, tuple, union, Schema, StringFormat,
    UnknownKeys,
};
pub use value::{Value, ValueKind};
