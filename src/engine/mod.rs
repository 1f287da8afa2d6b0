//! Execution engine
//!
//! Entry points on `Schema`: interpreted validation, the boolean fast
//! check, exception-style `parse`/`assert`, and their asynchronous
//! counterparts.
//!
//! # Design Principles
//!
//! - Synchronous entry points are total functions that never suspend
//! - The asynchronous entry points degrade transparently to synchronous
//!   execution when no suspending work is present
//! - All behavior overrides travel through an explicit `Options` value

pub(crate) mod future;
pub(crate) mod interpret;
mod options;

pub use future::with_timeout;
pub use options::Options;

use futures_util::future::BoxFuture;

use crate::report::{Validated, ValidationFailure};
use crate::schema::Schema;
use crate::value::Value;

use interpret::{Checked, FieldInput};
use options::DEFAULT_OPTIONS;

impl Schema {
    /// Validate a value, producing the validated/transformed output or
    /// the collected error list. Pure and synchronous.
    pub fn validate(&self, value: &Value) -> Validated<Value> {
        self.validate_with(value, &DEFAULT_OPTIONS)
    }

    /// `validate` with explicit execution options.
    pub fn validate_with(&self, value: &Value, opts: &Options) -> Validated<Value> {
        interpret::run(self, FieldInput::Present(value), opts).map(Checked::into_value)
    }

    /// Asynchronous validation. Without suspending work this completes
    /// immediately with the synchronous result.
    pub fn validate_async<'a>(&'a self, value: &'a Value) -> BoxFuture<'a, Validated<Value>> {
        self.validate_async_with(value, &DEFAULT_OPTIONS)
    }

    /// `validate_async` with explicit execution options.
    pub fn validate_async_with<'a>(
        &'a self,
        value: &'a Value,
        opts: &'a Options,
    ) -> BoxFuture<'a, Validated<Value>> {
        let fut = future::run_async(self, FieldInput::Present(value), opts);
        Box::pin(async move { fut.await.map(Checked::into_value) })
    }

    /// Boolean fast check, cheaper than full validation: no error
    /// records and no output value are built. Transforms and
    /// asynchronous stages are not executed.
    pub fn is(&self, value: &Value) -> bool {
        interpret::is_match(self, value)
    }

    /// Validate and return the output, or a single failure summarizing
    /// every collected error with its path.
    pub fn parse(&self, value: &Value) -> Result<Value, ValidationFailure> {
        self.validate(value).into_result()
    }

    /// Validate and discard the output, raising on failure.
    pub fn assert(&self, value: &Value) -> Result<(), ValidationFailure> {
        self.validate(value).into_result().map(|_| ())
    }

    /// Asynchronous `parse`.
    pub fn parse_async<'a>(
        &'a self,
        value: &'a Value,
    ) -> BoxFuture<'a, Result<Value, ValidationFailure>> {
        let fut = self.validate_async(value);
        Box::pin(async move { fut.await.into_result() })
    }

    /// Asynchronous `assert`.
    pub fn assert_async<'a>(
        &'a self,
        value: &'a Value,
    ) -> BoxFuture<'a, Result<(), ValidationFailure>> {
        let fut = self.validate_async(value);
        Box::pin(async move { fut.await.into_result().map(|_| ()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{object, string};

    #[test]
    fn test_parse_raises_with_paths() {
        let schema = object(vec![("name", string())]);
        let err = schema
            .parse(&Value::object([("name", Value::Int(1))]))
            .unwrap_err();
        assert_eq!(err.errors.len(), 1);
        assert_eq!(err.errors[0].path, "name");
    }

    #[test]
    fn test_assert_ok_on_valid() {
        let schema = string();
        assert!(schema.assert(&Value::from("hi")).is_ok());
    }
}
