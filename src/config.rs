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

//! Patch engine configuration options

use crate::compiler::CompileOptions;
use serde::Deserialize;

/// Configuration for patch passes
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PatchConfig {
    /// Longest text the `repeat` operator may produce
    pub repeat_limit: usize,

    /// Share parsed formulas by source text
    pub cache_formulas: bool,

    /// Scalar that removes a shared variable or list element
    pub delete_sentinel: String,

    /// Contain panics inside a type pass and report them as contract errors
    pub catch_panics: bool,

    /// Maximum formula nesting depth
    pub max_formula_depth: usize,

    /// Longest a fixed-size array may grow through an index key
    pub max_array_length: usize,
}

impl Default for PatchConfig {
    fn default() -> Self {
        Self {
            repeat_limit: 2048,
            cache_formulas: true,
            delete_sentinel: "delete()".to_string(),
            catch_panics: true,
            max_formula_depth: 128,
            max_array_length: 65_536,
        }
    }
}

impl PatchConfig {
    /// Load from JSON; missing keys keep their defaults
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Configuration with the parse cache disabled
    pub fn uncached() -> Self {
        Self {
            cache_formulas: false,
            ..Self::default()
        }
    }

    /// Compiler options derived from this configuration
    pub fn compile_options(&self) -> CompileOptions {
        CompileOptions {
            repeat_limit: self.repeat_limit,
            use_parse_cache: self.cache_formulas,
            max_depth: self.max_formula_depth,
        }
    }

    /// Whether `text` is the delete sentinel (trimmed, case-insensitive)
    pub fn is_delete(&self, text: &str) -> bool {
        text.trim().eq_ignore_ascii_case(&self.delete_sentinel)
    }
}
