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

//! Process-wide cache of compiled patterns for `matches` and `replace`
//!
//! Entries are never evicted; loaded content uses a small, finite set of
//! patterns.

use super::error::{FormulaError, FormulaResult};
use dashmap::DashMap;
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;

/// Thread-safe get-or-add regex cache
#[derive(Default)]
pub struct RegexCache {
    cache: DashMap<String, Arc<Regex>>,
}

impl RegexCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Compiled pattern for `pattern`, compiling on first use
    pub fn get_regex(&self, pattern: &str) -> FormulaResult<Arc<Regex>> {
        if let Some(regex) = self.cache.get(pattern) {
            return Ok(Arc::clone(&regex));
        }

        let regex = Regex::new(pattern).map_err(|e| FormulaError::Regex {
            pattern: pattern.to_string(),
            message: e.to_string(),
        })?;
        let entry = self
            .cache
            .entry(pattern.to_string())
            .or_insert_with(|| Arc::new(regex));
        Ok(Arc::clone(&entry))
    }

    /// Number of cached patterns
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    /// Check for an empty cache
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

static REGEX_CACHE: Lazy<RegexCache> = Lazy::new(RegexCache::new);

/// Shared regex cache
pub fn regex_cache() -> &'static RegexCache {
    &REGEX_CACHE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_patterns_are_shared() {
        let cache = RegexCache::new();
        let a = cache.get_regex("^a+$").unwrap();
        let b = cache.get_regex("^a+$").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_invalid_pattern() {
        let err = RegexCache::new().get_regex("(").unwrap_err();
        assert!(matches!(err, FormulaError::Regex { .. }));
    }
}
