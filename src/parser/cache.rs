// Copyright 2024 OctoFHIR Team
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Shared parse cache for formula text
//!
//! `update-all` and list predicates evaluate the same formula once per
//! record. Parsing is the expensive half of compilation, so parsed trees
//! are shared by source text. Binding against a scope still happens per
//! use, which keeps results identical with the cache on or off.

use super::error::ParseResult;
use super::pratt::parse_with_max_depth;
use crate::ast::ExpressionNode;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Shared AST that can be safely cloned across threads
pub type SharedAst = Arc<ExpressionNode>;

/// Statistics about the parse cache
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AstCacheStats {
    /// Number of cache hits
    pub hits: u64,
    /// Number of cache misses
    pub misses: u64,
    /// Number of entries currently cached
    pub entries: usize,
}

impl AstCacheStats {
    /// Calculate cache hit rate as a percentage
    pub fn hit_rate(&self) -> f64 {
        if self.hits + self.misses == 0 {
            0.0
        } else {
            (self.hits as f64) / ((self.hits + self.misses) as f64) * 100.0
        }
    }
}

/// Thread-safe cache of parsed formulas keyed by exact source text
#[derive(Default)]
pub struct AstCache {
    cache: DashMap<String, SharedAst>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl AstCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached tree for `formula`, parsing it on first use with
    /// the given nesting limit. Syntax errors are not cached.
    pub fn get_or_parse(&self, formula: &str, max_depth: usize) -> ParseResult<SharedAst> {
        if let Some(ast) = self.cache.get(formula) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(Arc::clone(&ast));
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let ast = Arc::new(parse_with_max_depth(formula, max_depth)?);
        let entry = self
            .cache
            .entry(formula.to_string())
            .or_insert_with(|| Arc::clone(&ast));
        Ok(Arc::clone(&entry))
    }

    /// Get cache statistics
    pub fn stats(&self) -> AstCacheStats {
        AstCacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.cache.len(),
        }
    }

    /// Clear all cached entries
    pub fn clear(&self) {
        self.cache.clear();
    }
}

static GLOBAL_AST_CACHE: Lazy<AstCache> = Lazy::new(AstCache::new);

/// Process-wide parse cache
pub fn global_cache() -> &'static AstCache {
    &GLOBAL_AST_CACHE
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::ParseError;
    use crate::parser::pratt::DEFAULT_MAX_DEPTH;

    #[test]
    fn test_identical_text_shares_one_tree() {
        let cache = AstCache::new();
        let first = cache.get_or_parse("1 + 2", DEFAULT_MAX_DEPTH).unwrap();
        let second = cache.get_or_parse("1 + 2", DEFAULT_MAX_DEPTH).unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.hit_rate(), 50.0);
    }

    #[test]
    fn test_errors_are_not_cached() {
        let cache = AstCache::new();
        assert!(cache.get_or_parse("1 +", DEFAULT_MAX_DEPTH).is_err());
        assert_eq!(cache.stats().entries, 0);
    }

    #[test]
    fn test_deep_formula_is_rejected_not_cached() {
        let cache = AstCache::new();
        let deep = format!("{}1{}", "(".repeat(50_000), ")".repeat(50_000));
        assert!(matches!(
            cache.get_or_parse(&deep, DEFAULT_MAX_DEPTH),
            Err(ParseError::TooDeep { .. })
        ));
        assert_eq!(cache.stats().entries, 0);
    }
}
