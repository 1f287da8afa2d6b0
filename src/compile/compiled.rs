//! The compiled validator handle.

use std::sync::Arc;

use futures_util::future::BoxFuture;

use crate::engine::interpret::{Checked, FieldInput};
use crate::report::{Validated, ValidationFailure};
use crate::value::Value;

/// Specialized synchronous procedure for one schema node.
pub(crate) type SyncRun =
    Arc<dyn for<'a> Fn(FieldInput<'a>) -> Validated<Checked> + Send + Sync>;

/// Specialized suspending procedure for one schema node.
pub(crate) type AsyncRun =
    Arc<dyn for<'a> Fn(FieldInput<'a>) -> BoxFuture<'a, Validated<Checked>> + Send + Sync>;

/// Specialized boolean fast path for one schema node.
pub(crate) type CheckFn = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

/// One node's compiled closures. Children are compiled once and
/// captured by the parent's closures.
#[derive(Clone)]
pub(crate) struct CompiledNode {
    pub run: SyncRun,
    pub check: CheckFn,
    pub run_async: AsyncRun,
}

/// A schema compiled into reusable stateless closures.
///
/// Built once via `compile`, invoked many times; holds no per-call
/// mutable state, so a single instance may be shared across threads and
/// invoked concurrently without locking.
///
/// The compiled path reproduces the interpreted path's result exactly:
/// same success/failure, same output value, same error list in the same
/// order. Compilation is a performance transform only.
#[derive(Clone)]
pub struct CompiledValidator {
    pub(crate) node: CompiledNode,
}

impl CompiledValidator {
    /// Validate a value through the specialized closures.
    pub fn run(&self, value: &Value) -> Validated<Value> {
        (self.node.run)(FieldInput::Present(value)).map(Checked::into_value)
    }

    /// Boolean-only fast path; mirrors `Schema::is`.
    pub fn check(&self, value: &Value) -> bool {
        (self.node.check)(value)
    }

    /// Suspending mirror of `run`. Without suspending work the returned
    /// future is already complete.
    pub fn run_async<'a>(&'a self, value: &'a Value) -> BoxFuture<'a, Validated<Value>> {
        let fut = (self.node.run_async)(FieldInput::Present(value));
        Box::pin(async move { fut.await.map(Checked::into_value) })
    }

    /// `run` with exception-style control flow.
    pub fn parse(&self, value: &Value) -> Result<Value, ValidationFailure> {
        self.run(value).into_result()
    }
}
