//! Explicit execution configuration.
//!
//! There is no ambient or environment-driven toggle anywhere in the
//! engine: behavior overrides travel through this value, passed to
//! `validate_with`/`compile_with`, so every call site is referentially
//! transparent and testable in isolation.

use crate::schema::UnknownKeys;

/// Per-call execution options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Options {
    /// Stop validating siblings after the first error (default true).
    /// With false, every sibling error is collected in deterministic
    /// walk order.
    pub abort_early: bool,
    /// When set, overrides every object node's own unknown-key policy.
    pub unknown_keys: Option<UnknownKeys>,
}

pub(crate) const DEFAULT_OPTIONS: Options = Options {
    abort_early: true,
    unknown_keys: None,
};

impl Default for Options {
    fn default() -> Self {
        DEFAULT_OPTIONS
    }
}

impl Options {
    /// Collect every error instead of stopping at the first.
    pub fn collect_all() -> Self {
        Options {
            abort_early: false,
            ..Default::default()
        }
    }

    /// Force an unknown-key policy onto every object node.
    pub fn with_unknown_keys(mut self, policy: UnknownKeys) -> Self {
        self.unknown_keys = Some(policy);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let opts = Options::default();
        assert!(opts.abort_early);
        assert_eq!(opts.unknown_keys, None);
    }

    #[test]
    fn test_collect_all() {
        assert!(!Options::collect_all().abort_early);
    }
}
