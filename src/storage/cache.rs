use lru::LruCache;
use serde_json::Value as JsonValue;
use std::num::NonZeroUsize;

use crate::core::CacheConfig;

/// Marker that introduces a resolved variable reference in FHIRPath.
pub const FREE_VARIABLE_MARKER: char = '%';

/// Memoized evaluator results keyed by expression text.
///
/// Expressions that reference a `%variable` are never cached: their text is
/// stable while the value bound to the variable is not.
#[derive(Debug)]
pub struct ExpressionCache {
    entries: LruCache<String, Vec<JsonValue>>,
    stats: CacheStats,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub stores: u64,
}

pub fn has_free_variable(expression: &str) -> bool {
    expression.contains(FREE_VARIABLE_MARKER)
}

impl ExpressionCache {
    pub fn new(config: &CacheConfig) -> Self {
        let capacity = NonZeroUsize::new(config.max_entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: LruCache::new(capacity),
            stats: CacheStats::default(),
        }
    }

    pub fn is_cached(&mut self, expression: &str) -> bool {
        if has_free_variable(expression) {
            return false;
        }

        let hit = self.entries.contains(expression);
        if hit {
            self.stats.hits += 1;
        } else {
            self.stats.misses += 1;
        }
        hit
    }

    pub fn store(&mut self, expression: &str, result: Vec<JsonValue>) {
        if has_free_variable(expression) {
            return;
        }

        self.entries.put(expression.to_string(), result);
        self.stats.stores += 1;
    }

    pub fn get(&mut self, expression: &str) -> Option<&Vec<JsonValue>> {
        self.entries.get(expression)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.stats = CacheStats::default();
    }

    pub fn stats(&self) -> serde_json::Value {
        let lookups = self.stats.hits + self.stats.misses;
        let hit_rate = if lookups > 0 {
            self.stats.hits as f64 / lookups as f64
        } else {
            0.0
        };

        serde_json::json!({
            "expression_cache": {
                "hits": self.stats.hits,
                "misses": self.stats.misses,
                "stores": self.stats.stores,
                "hit_rate": hit_rate,
                "entries": self.entries.len(),
                "capacity": self.entries.cap().get()
            }
        })
    }
}

impl Default for ExpressionCache {
    fn default() -> Self {
        Self::new(&CacheConfig::default())
    }
}
