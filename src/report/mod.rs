//! Validation result model
//!
//! The success/failure envelope and the error-record shape shared by
//! every validator.
//!
//! # Design Principles
//!
//! - A failure always carries at least one error
//! - Error codes form a closed, wire-stable taxonomy
//! - Paths are built root-to-leaf: keys join with `.`, indices with `[i]`
//! - All operations are pure and never panic

mod error;
mod outcome;

pub use error::{ErrorKind, RefineCtx, ValidationError};
pub use outcome::{Validated, ValidationFailure};
