//! Schema compiler
//!
//! Turns a schema tree into specialized closures once, for repeated
//! fast invocation.
//!
//! # Design Principles
//!
//! - Exhaustive dispatch over the closed kind set, no virtual dispatch
//! - Children compile once per invocation, memoized by node identity
//! - The compiled path reproduces the interpreted path's results
//!   exactly; compilation is a performance transform, never a behavior
//!   change
//! - The optional cache tolerates concurrent reads and treats racing
//!   duplicate population as waste, not corruption

mod cache;
mod compiled;
mod compiler;

pub use cache::CompiledCache;
pub use compiled::CompiledValidator;
pub use compiler::{compile, compile_with};
