//! The success/failure envelope.

use thiserror::Error;

use super::error::ValidationError;

/// Outcome of validating one value against one schema.
///
/// Exactly one variant is populated; `Invalid` never carries an empty
/// error list.
#[derive(Debug, Clone, PartialEq)]
pub enum Validated<T> {
    Valid(T),
    Invalid(Vec<ValidationError>),
}

impl<T> Validated<T> {
    /// Wrap a success value.
    pub fn valid(value: T) -> Self {
        Validated::Valid(value)
    }

    /// Fail with a single error.
    pub fn invalid(error: ValidationError) -> Self {
        Validated::Invalid(vec![error])
    }

    /// Fail with a collected error list. The list must be non-empty.
    pub fn invalid_all(errors: Vec<ValidationError>) -> Self {
        debug_assert!(!errors.is_empty(), "failure requires at least one error");
        Validated::Invalid(errors)
    }

    pub fn is_valid(&self) -> bool {
        matches!(self, Validated::Valid(_))
    }

    /// Errors on the `Invalid` arm, if any.
    pub fn errors(&self) -> Option<&[ValidationError]> {
        match self {
            Validated::Valid(_) => None,
            Validated::Invalid(errors) => Some(errors),
        }
    }

    /// Map the success value, passing failures through.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Validated<U> {
        match self {
            Validated::Valid(v) => Validated::Valid(f(v)),
            Validated::Invalid(errors) => Validated::Invalid(errors),
        }
    }

    /// Prefix every error with an object key segment.
    pub fn under_key(self, key: &str) -> Self {
        match self {
            Validated::Valid(v) => Validated::Valid(v),
            Validated::Invalid(errors) => {
                Validated::Invalid(errors.into_iter().map(|e| e.under_key(key)).collect())
            }
        }
    }

    /// Prefix every error with an index segment.
    pub fn under_index(self, index: usize) -> Self {
        match self {
            Validated::Valid(v) => Validated::Valid(v),
            Validated::Invalid(errors) => {
                Validated::Invalid(errors.into_iter().map(|e| e.under_index(index)).collect())
            }
        }
    }

    /// Convert into the exception-style result used by `parse`/`assert`.
    pub fn into_result(self) -> Result<T, ValidationFailure> {
        match self {
            Validated::Valid(v) => Ok(v),
            Validated::Invalid(errors) => Err(ValidationFailure { errors }),
        }
    }
}

/// Summary error raised by the `parse`/`assert` entry points.
///
/// Carries every collected error with its path; `Display` renders the
/// full list so the summary is useful without unpacking.
#[derive(Debug, Clone, Error)]
#[error("validation failed with {} error(s): {}", .errors.len(), render(.errors))]
pub struct ValidationFailure {
    pub errors: Vec<ValidationError>,
}

fn render(errors: &[ValidationError]) -> String {
    let rendered: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
    rendered.join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::ErrorKind;

    #[test]
    fn test_under_key_prefixes_all_errors() {
        let out: Validated<()> = Validated::invalid_all(vec![
            ValidationError::new(ErrorKind::NotString, "a"),
            ValidationError::new(ErrorKind::NotNumber, "b").under_key("inner"),
        ])
        .under_key("outer");

        let errors = out.errors().unwrap();
        assert_eq!(errors[0].path, "outer");
        assert_eq!(errors[1].path, "outer.inner");
    }

    #[test]
    fn test_failure_display_lists_paths() {
        let failure = ValidationFailure {
            errors: vec![
                ValidationError::new(ErrorKind::NotString, "expected string, got int")
                    .under_key("name"),
            ],
        };
        let text = failure.to_string();
        assert!(text.contains("1 error(s)"));
        assert!(text.contains("NOT_STRING at 'name'"));
    }

    #[test]
    fn test_into_result() {
        assert_eq!(Validated::valid(5).into_result().unwrap(), 5);
        let err: Validated<i32> =
            Validated::invalid(ValidationError::new(ErrorKind::NotNumber, "bad"));
        assert_eq!(err.into_result().unwrap_err().errors.len(), 1);
    }
}
