//! Observable engine events.
//!
//! Events are explicit and typed: every loggable occurrence in the
//! compile and cache lifecycle has a named member here.

use std::fmt;

/// Observable events in the compile/cache lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// Compilation of a schema begins
    CompileStart,
    /// Compilation finished; the validator is ready for reuse
    CompileComplete,
    /// A compiled validator was served from the cache
    CacheHit,
    /// No cached validator existed for the requested key
    CacheMiss,
    /// A freshly compiled validator was stored
    CacheInsert,
}

impl Event {
    /// Returns the event name string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::CompileStart => "COMPILE_START",
            Event::CompileComplete => "COMPILE_COMPLETE",
            Event::CacheHit => "CACHE_HIT",
            Event::CacheMiss => "CACHE_MISS",
            Event::CacheInsert => "CACHE_INSERT",
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
