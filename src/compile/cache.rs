//! Shared cache of compiled validators.
//!
//! Keyed by a structural digest of the schema configuration plus the
//! compile options. The cache is the engine's only shared mutable
//! resource: reads are concurrent, and when two threads race to
//! populate the same key one redundant compilation is computed and
//! discarded, which is acceptable by contract.

use std::collections::HashMap;
use std::sync::RwLock;

use sha2::{Digest, Sha256};

use crate::engine::Options;
use crate::observability::{Event, Logger, Severity};
use crate::schema::composites::UnknownKeys;
use crate::schema::node::{Schema, SchemaKind};
use crate::schema::primitives::{Bound, StringFormat};
use crate::value::Value;

use super::compiled::CompiledValidator;
use super::compiler::compile_with;

/// Cache of compiled validators keyed by schema structure.
pub struct CompiledCache {
    entries: RwLock<HashMap<[u8; 32], CompiledValidator>>,
    logger: Option<Logger>,
}

impl CompiledCache {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            logger: None,
        }
    }

    /// Emit a structured log line for every cache and compile event.
    pub fn with_logger(logger: Logger) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            logger: Some(logger),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Return the cached validator for this schema/options pair,
    /// compiling and inserting on first sight.
    pub fn get_or_compile(&self, schema: &Schema, opts: &Options) -> CompiledValidator {
        let key = schema_digest(schema, opts);
        if let Ok(entries) = self.entries.read() {
            if let Some(hit) = entries.get(&key) {
                self.log(Event::CacheHit, &key);
                return hit.clone();
            }
        }

        self.log(Event::CacheMiss, &key);
        self.log(Event::CompileStart, &key);
        let compiled = compile_with(schema, opts);
        self.log(Event::CompileComplete, &key);

        if let Ok(mut entries) = self.entries.write() {
            // A racing population may have landed first; keep the
            // existing entry and discard ours.
            let entry = entries.entry(key).or_insert_with(|| compiled.clone());
            self.log(Event::CacheInsert, &key);
            return entry.clone();
        }
        compiled
    }

    fn log(&self, event: Event, key: &[u8; 32]) {
        if let Some(logger) = &self.logger {
            let key_prefix = hex_prefix(key);
            logger.log(Severity::Trace, event.as_str(), &[("key", key_prefix.as_str())]);
        }
    }
}

impl Default for CompiledCache {
    fn default() -> Self {
        Self::new()
    }
}

fn hex_prefix(key: &[u8; 32]) -> String {
    key[..8].iter().map(|b| format!("{:02x}", b)).collect()
}

/// Digest the schema structure and options into the cache key.
///
/// Configuration hashes by content; user-supplied functions hash by
/// identity (two schemas sharing the same closure instances are the
/// same validator, two structurally-identical schemas with distinct
/// closures are not).
pub(crate) fn schema_digest(schema: &Schema, opts: &Options) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update([opts.abort_early as u8]);
    hasher.update([match opts.unknown_keys {
        None => 0u8,
        Some(UnknownKeys::Strip) => 1,
        Some(UnknownKeys::Passthrough) => 2,
        Some(UnknownKeys::Strict) => 3,
    }]);
    digest_schema(schema, &mut hasher);
    hasher.finalize().into()
}

fn update_usize(hasher: &mut Sha256, n: usize) {
    hasher.update((n as u64).to_le_bytes());
}

fn update_opt_usize(hasher: &mut Sha256, n: Option<usize>) {
    match n {
        None => hasher.update([0u8]),
        Some(n) => {
            hasher.update([1u8]);
            update_usize(hasher, n);
        }
    }
}

fn update_opt_bound(hasher: &mut Sha256, b: Option<Bound>) {
    match b {
        None => hasher.update([0u8]),
        Some(b) => {
            hasher.update([1u8]);
            hasher.update(b.limit.to_bits().to_le_bytes());
            hasher.update([b.inclusive as u8]);
        }
    }
}

fn update_str(hasher: &mut Sha256, s: &str) {
    update_usize(hasher, s.len());
    hasher.update(s.as_bytes());
}

fn update_fn_identity<T: ?Sized>(hasher: &mut Sha256, arc: &std::sync::Arc<T>) {
    let ptr = std::sync::Arc::as_ptr(arc) as *const () as usize;
    update_usize(hasher, ptr);
}

fn update_value(hasher: &mut Sha256, value: &Value) {
    crate::value::digest_into(value, hasher);
}

fn policy_byte(policy: UnknownKeys) -> u8 {
    match policy {
        UnknownKeys::Strip => 1,
        UnknownKeys::Passthrough => 2,
        UnknownKeys::Strict => 3,
    }
}

fn digest_schema(schema: &Schema, hasher: &mut Sha256) {
    let inner = schema.inner();
    hasher.update([inner.optional as u8, inner.nullable as u8]);
    match &inner.default {
        None => hasher.update([0u8]),
        Some(d) => {
            hasher.update([1u8]);
            update_value(hasher, d);
        }
    }

    match &inner.kind {
        SchemaKind::Any => hasher.update([0u8]),
        SchemaKind::Boolean => hasher.update([1u8]),
        SchemaKind::String(rules) => {
            hasher.update([2u8]);
            update_opt_usize(hasher, rules.min_len);
            update_opt_usize(hasher, rules.max_len);
            match &rules.pattern {
                None => hasher.update([0u8]),
                Some(p) => {
                    hasher.update([1u8]);
                    update_str(hasher, p.as_str());
                }
            }
            hasher.update([match rules.format {
                None => 0u8,
                Some(StringFormat::Email) => 1,
                Some(StringFormat::Url) => 2,
                Some(StringFormat::Uuid) => 3,
            }]);
        }
        SchemaKind::Number(rules) => {
            hasher.update([3u8]);
            update_opt_bound(hasher, rules.min);
            update_opt_bound(hasher, rules.max);
            hasher.update([rules.integer as u8]);
            match rules.multiple_of {
                None => hasher.update([0u8]),
                Some(step) => {
                    hasher.update([1u8]);
                    hasher.update(step.to_bits().to_le_bytes());
                }
            }
        }
        SchemaKind::Date(rules) => {
            hasher.update([4u8]);
            for bound in [rules.min, rules.max] {
                match bound {
                    None => hasher.update([0u8]),
                    Some(d) => {
                        hasher.update([1u8]);
                        hasher.update(d.timestamp().to_le_bytes());
                        hasher.update(d.timestamp_subsec_nanos().to_le_bytes());
                    }
                }
            }
        }
        SchemaKind::Literal(value) => {
            hasher.update([5u8]);
            update_value(hasher, value);
        }
        SchemaKind::Enum(options) => {
            hasher.update([6u8]);
            update_usize(hasher, options.len());
            for option in options {
                update_value(hasher, option);
            }
        }
        SchemaKind::Object(shape) => {
            hasher.update([7u8]);
            hasher.update([policy_byte(shape.policy)]);
            update_usize(hasher, shape.fields.len());
            for (name, child) in &shape.fields {
                update_str(hasher, name);
                digest_schema(child, hasher);
            }
        }
        SchemaKind::Array(shape) => {
            hasher.update([8u8]);
            update_opt_usize(hasher, shape.min_items);
            update_opt_usize(hasher, shape.max_items);
            hasher.update([shape.unique as u8, shape.parallel as u8]);
            digest_schema(&shape.element, hasher);
        }
        SchemaKind::Tuple(shape) => {
            hasher.update([9u8]);
            update_usize(hasher, shape.items.len());
            for item in &shape.items {
                digest_schema(item, hasher);
            }
            match &shape.rest {
                None => hasher.update([0u8]),
                Some(rest) => {
                    hasher.update([1u8]);
                    digest_schema(rest, hasher);
                }
            }
        }
        SchemaKind::Union(members) => {
            hasher.update([10u8]);
            update_usize(hasher, members.len());
            for member in members {
                digest_schema(member, hasher);
            }
        }
        SchemaKind::DiscriminatedUnion(shape) => {
            hasher.update([11u8]);
            update_str(hasher, &shape.tag);
            update_usize(hasher, shape.members.len());
            for (tag, member) in &shape.members {
                update_value(hasher, tag);
                digest_schema(member, hasher);
            }
        }
        SchemaKind::Intersection(left, right) => {
            hasher.update([12u8]);
            digest_schema(left, hasher);
            digest_schema(right, hasher);
        }
        SchemaKind::Record(shape) => {
            hasher.update([13u8]);
            match &shape.key {
                None => hasher.update([0u8]),
                Some(key) => {
                    hasher.update([1u8]);
                    digest_schema(key, hasher);
                }
            }
            digest_schema(&shape.value, hasher);
        }
        SchemaKind::Lazy(l) => {
            hasher.update([14u8]);
            update_usize(hasher, l.cell_ptr());
        }
        SchemaKind::Refine(rule) => {
            hasher.update([15u8]);
            update_fn_identity(hasher, &rule.predicate);
            update_str(hasher, &rule.message);
            digest_schema(&rule.inner, hasher);
        }
        SchemaKind::RefineAsync(rule) => {
            hasher.update([16u8]);
            update_fn_identity(hasher, &rule.predicate);
            update_str(hasher, &rule.message);
            digest_schema(&rule.inner, hasher);
        }
        SchemaKind::SuperRefine(rule) => {
            hasher.update([17u8]);
            update_fn_identity(hasher, &rule.refiner);
            digest_schema(&rule.inner, hasher);
        }
        SchemaKind::Transform(rule) => {
            hasher.update([18u8]);
            update_fn_identity(hasher, &rule.transform);
            digest_schema(&rule.inner, hasher);
        }
        SchemaKind::TransformAsync(rule) => {
            hasher.update([19u8]);
            update_fn_identity(hasher, &rule.transform);
            digest_schema(&rule.inner, hasher);
        }
        SchemaKind::Preprocess(rule) => {
            hasher.update([20u8]);
            update_fn_identity(hasher, &rule.preprocess);
            digest_schema(&rule.inner, hasher);
        }
        SchemaKind::PreprocessAsync(rule) => {
            hasher.update([21u8]);
            update_fn_identity(hasher, &rule.preprocess);
            digest_schema(&rule.inner, hasher);
        }
        SchemaKind::Pipe(rule) => {
            hasher.update([22u8]);
            digest_schema(&rule.inner, hasher);
            digest_schema(&rule.next, hasher);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{number, object, string};
    use crate::value::Value;

    #[test]
    fn test_structurally_equal_schemas_share_a_key() {
        let a = object(vec![("name", string().min_len(2)), ("age", number())]);
        let b = object(vec![("name", string().min_len(2)), ("age", number())]);
        let opts = Options::default();
        assert_eq!(schema_digest(&a, &opts), schema_digest(&b, &opts));
    }

    #[test]
    fn test_constraint_changes_the_key() {
        let a = string().min_len(2);
        let b = string().min_len(3);
        let opts = Options::default();
        assert_ne!(schema_digest(&a, &opts), schema_digest(&b, &opts));
    }

    #[test]
    fn test_options_change_the_key() {
        let schema = string();
        assert_ne!(
            schema_digest(&schema, &Options::default()),
            schema_digest(&schema, &Options::collect_all())
        );
    }

    #[test]
    fn test_cache_round_trip() {
        let cache = CompiledCache::new();
        let schema = object(vec![("name", string())]);
        let opts = Options::default();

        let first = cache.get_or_compile(&schema, &opts);
        assert_eq!(cache.len(), 1);
        let second = cache.get_or_compile(&schema, &opts);
        assert_eq!(cache.len(), 1);

        let input = Value::object([("name", Value::from("ok"))]);
        assert!(first.run(&input).is_valid());
        assert!(second.run(&input).is_valid());
    }

    #[test]
    fn test_cache_distinguishes_options() {
        let cache = CompiledCache::new();
        let schema = string();
        cache.get_or_compile(&schema, &Options::default());
        cache.get_or_compile(&schema, &Options::collect_all());
        assert_eq!(cache.len(), 2);
    }
}
