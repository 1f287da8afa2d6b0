//! Observability subsystem
//!
//! Structured JSON logging for the compile and cache lifecycle.
//!
//! # Principles
//!
//! 1. Observability is read-only
//! 2. No side effects on validation results
//! 3. No async or background threads
//! 4. Deterministic output
//! 5. No global state: a `Logger` is carried explicitly by the
//!    component that logs

mod events;
mod logger;

pub use events::Event;
pub use logger::{Logger, Severity};
