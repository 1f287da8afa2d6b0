//! Schema combinators
//!
//! Declarative building blocks for validation rules: primitive leaves,
//! composite shapes, and decorator modifiers.
//!
//! # Design Principles
//!
//! - Nodes are immutable; fluent modifiers return new nodes
//! - The kind discriminator is a closed set, matched exhaustively
//! - Children are shared between parents without copying
//! - Constraint checks live here once and back both execution strategies

pub(crate) mod composites;
pub(crate) mod lazy;
pub(crate) mod node;
pub(crate) mod primitives;

pub use composites::UnknownKeys;
pub use node::{
    any, array, boolean, date, discriminated_union, enumeration, integer, intersection, lazy,
    literal, number, object, record, record_with_keys, string, tuple, union, Schema,
};
pub use primitives::StringFormat;
