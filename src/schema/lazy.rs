//! Lazily-forced schema indirection.
//!
//! A lazy node's child is produced by a thunk forced and memoized on
//! first use, so a self-referential schema can be described without
//! recursing at construction time.

use std::fmt;
use std::sync::{Arc, OnceLock};

use super::node::Schema;

#[derive(Clone)]
pub(crate) struct LazySchema {
    cell: Arc<OnceLock<Schema>>,
    thunk: Arc<dyn Fn() -> Schema + Send + Sync>,
}

impl LazySchema {
    pub(crate) fn new(thunk: impl Fn() -> Schema + Send + Sync + 'static) -> Self {
        Self {
            cell: Arc::new(OnceLock::new()),
            thunk: Arc::new(thunk),
        }
    }

    /// Force the thunk, memoizing the produced child.
    pub(crate) fn force(&self) -> &Schema {
        self.cell.get_or_init(|| (self.thunk)())
    }

    /// Identity of the memoization cell, used by the structural digest.
    pub(crate) fn cell_ptr(&self) -> usize {
        Arc::as_ptr(&self.cell) as usize
    }
}

impl fmt::Debug for LazySchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazySchema")
            .field("forced", &self.cell.get().is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::string;

    #[test]
    fn test_thunk_runs_once() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        static CALLS: AtomicUsize = AtomicUsize::new(0);

        let lazy = LazySchema::new(|| {
            CALLS.fetch_add(1, Ordering::SeqCst);
            string()
        });
        assert_eq!(CALLS.load(Ordering::SeqCst), 0);
        lazy.force();
        lazy.force();
        assert_eq!(CALLS.load(Ordering::SeqCst), 1);
    }
}
