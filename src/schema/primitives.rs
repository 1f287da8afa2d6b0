//! Scalar constraint rules and their leaf check functions.
//!
//! Every check returns the first violated constraint only. The same
//! functions back both the interpreted walker and the compiled closures,
//! which is what keeps the two execution strategies byte-for-byte
//! equivalent at the leaves.

use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;

use crate::report::{ErrorKind, ValidationError};
use crate::value::Value;

/// Named string formats with dedicated checkers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringFormat {
    Email,
    Url,
    Uuid,
}

impl StringFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            StringFormat::Email => "email",
            StringFormat::Url => "url",
            StringFormat::Uuid => "uuid",
        }
    }

    fn matches(&self, s: &str) -> bool {
        match self {
            StringFormat::Email => email_pattern().is_match(s),
            StringFormat::Url => url_pattern().is_match(s),
            StringFormat::Uuid => uuid::Uuid::parse_str(s).is_ok(),
        }
    }
}

fn email_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9._%+-]+@[A-Za-z0-9-]+(\.[A-Za-z0-9-]+)*\.[A-Za-z]{2,}$")
            .expect("email pattern is valid")
    })
}

fn url_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z][A-Za-z0-9+.-]*://[^\s]+$").expect("url pattern is valid")
    })
}

/// Constraints on a string schema, checked in declaration order:
/// length bounds, pattern, named format.
#[derive(Debug, Clone, Default)]
pub struct StringRules {
    pub min_len: Option<usize>,
    pub max_len: Option<usize>,
    pub pattern: Option<Regex>,
    pub format: Option<StringFormat>,
}

pub(crate) fn check_string(rules: &StringRules, value: &Value) -> Result<(), ValidationError> {
    let s = match value.as_str() {
        Some(s) => s,
        None => return Err(ValidationError::wrong_kind(ErrorKind::NotString, "string", value)),
    };

    let len = s.chars().count();
    if let Some(min) = rules.min_len {
        if len < min {
            return Err(ValidationError::new(
                ErrorKind::StringTooShort,
                format!("string length {} is below minimum {}", len, min),
            )
            .with_expected(format!("length >= {}", min))
            .with_received(value));
        }
    }
    if let Some(max) = rules.max_len {
        if len > max {
            return Err(ValidationError::new(
                ErrorKind::StringTooLong,
                format!("string length {} is above maximum {}", len, max),
            )
            .with_expected(format!("length <= {}", max))
            .with_received(value));
        }
    }
    if let Some(pattern) = &rules.pattern {
        if !pattern.is_match(s) {
            return Err(ValidationError::new(
                ErrorKind::StringPatternMismatch,
                format!("string does not match pattern {}", pattern.as_str()),
            )
            .with_expected(pattern.as_str().to_string())
            .with_received(value));
        }
    }
    if let Some(format) = rules.format {
        if !format.matches(s) {
            return Err(ValidationError::new(
                ErrorKind::StringInvalidFormat,
                format!("string is not a valid {}", format.as_str()),
            )
            .with_expected(format.as_str().to_string())
            .with_received(value));
        }
    }
    Ok(())
}

/// One end of a numeric range. Exclusive bounds back `positive()` and
/// `negative()`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bound {
    pub limit: f64,
    pub inclusive: bool,
}

/// Constraints on a number schema, checked in declaration order:
/// min, max, integer, multiple-of.
#[derive(Debug, Clone, Default)]
pub struct NumberRules {
    pub min: Option<Bound>,
    pub max: Option<Bound>,
    pub integer: bool,
    pub multiple_of: Option<f64>,
}

pub(crate) fn check_number(rules: &NumberRules, value: &Value) -> Result<(), ValidationError> {
    let n = match value.as_number() {
        Some(n) => n,
        None => return Err(ValidationError::wrong_kind(ErrorKind::NotNumber, "number", value)),
    };

    if let Some(min) = rules.min {
        let ok = if min.inclusive { n >= min.limit } else { n > min.limit };
        if !ok {
            let cmp = if min.inclusive { ">=" } else { ">" };
            return Err(ValidationError::new(
                ErrorKind::NumberTooSmall,
                format!("number {} is below minimum ({} {})", n, cmp, min.limit),
            )
            .with_expected(format!("{} {}", cmp, min.limit))
            .with_received(value));
        }
    }
    if let Some(max) = rules.max {
        let ok = if max.inclusive { n <= max.limit } else { n < max.limit };
        if !ok {
            let cmp = if max.inclusive { "<=" } else { "<" };
            return Err(ValidationError::new(
                ErrorKind::NumberTooBig,
                format!("number {} is above maximum ({} {})", n, cmp, max.limit),
            )
            .with_expected(format!("{} {}", cmp, max.limit))
            .with_received(value));
        }
    }
    if rules.integer {
        let is_integer = match value {
            Value::Int(_) => true,
            Value::Float(f) => f.is_finite() && f.fract() == 0.0,
            _ => false,
        };
        if !is_integer {
            return Err(ValidationError::new(
                ErrorKind::NumberNotInteger,
                format!("number {} is not an integer", n),
            )
            .with_expected("integer")
            .with_received(value));
        }
    }
    if let Some(step) = rules.multiple_of {
        let ok = match value {
            Value::Int(i) if step.fract() == 0.0 && step != 0.0 => i % (step as i64) == 0,
            _ => step != 0.0 && (n % step) == 0.0,
        };
        if !ok {
            return Err(ValidationError::new(
                ErrorKind::NumberNotMultipleOf,
                format!("number {} is not a multiple of {}", n, step),
            )
            .with_expected(format!("multiple of {}", step))
            .with_received(value));
        }
    }
    Ok(())
}

/// Constraints on a date schema.
#[derive(Debug, Clone, Default)]
pub struct DateRules {
    pub min: Option<DateTime<Utc>>,
    pub max: Option<DateTime<Utc>>,
}

pub(crate) fn check_date(rules: &DateRules, value: &Value) -> Result<(), ValidationError> {
    let d = match value.as_date() {
        Some(d) => d,
        None => return Err(ValidationError::wrong_kind(ErrorKind::NotDate, "date", value)),
    };

    if let Some(min) = rules.min {
        if d < min {
            return Err(ValidationError::new(
                ErrorKind::NumberTooSmall,
                format!("date {} is before minimum {}", d.to_rfc3339(), min.to_rfc3339()),
            )
            .with_expected(format!(">= {}", min.to_rfc3339()))
            .with_received(value));
        }
    }
    if let Some(max) = rules.max {
        if d > max {
            return Err(ValidationError::new(
                ErrorKind::NumberTooBig,
                format!("date {} is after maximum {}", d.to_rfc3339(), max.to_rfc3339()),
            )
            .with_expected(format!("<= {}", max.to_rfc3339()))
            .with_received(value));
        }
    }
    Ok(())
}

pub(crate) fn check_boolean(value: &Value) -> Result<(), ValidationError> {
    match value {
        Value::Bool(_) => Ok(()),
        _ => Err(ValidationError::wrong_kind(ErrorKind::NotBoolean, "bool", value)),
    }
}

pub(crate) fn check_literal(expected: &Value, value: &Value) -> Result<(), ValidationError> {
    if value == expected {
        Ok(())
    } else {
        Err(ValidationError::new(
            ErrorKind::LiteralMismatch,
            format!("expected literal {}, got {}", expected, value),
        )
        .with_expected(expected.to_string())
        .with_received(value))
    }
}

pub(crate) fn check_enum(options: &[Value], value: &Value) -> Result<(), ValidationError> {
    if options.iter().any(|o| o == value) {
        Ok(())
    } else {
        let rendered: Vec<String> = options.iter().map(|o| o.to_string()).collect();
        Err(ValidationError::new(
            ErrorKind::EnumMismatch,
            format!("value {} is not one of the allowed values", value),
        )
        .with_expected(format!("one of: {}", rendered.join(", ")))
        .with_received(value))
    }
}
