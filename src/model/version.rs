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

//! Semantic versions and version ranges
//!
//! Versions carry one to four numeric components plus an optional
//! pre-release tag; missing components compare as zero. Ranges accept
//! interval notation (`[1.0,2.0)`, `(,3]`, `[1.2]`), a bare version
//! (inclusive minimum), comparator sets (`>=1.0 <2.0`) and `*`.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Version parsing errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VersionError {
    /// Text is not a version
    #[error("Invalid version '{0}'")]
    InvalidVersion(String),
    /// Text is not a version range
    #[error("Invalid version range '{0}'")]
    InvalidRange(String),
}

const MAX_COMPONENTS: usize = 4;

/// Semantic version
#[derive(Debug, Clone, Eq)]
pub struct Version {
    components: [u64; MAX_COMPONENTS],
    len: usize,
    pre: Option<String>,
}

impl Version {
    /// Create a `major.minor.patch` version
    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            components: [major, minor, patch, 0],
            len: 3,
            pre: None,
        }
    }

    /// Major component
    pub fn major(&self) -> u64 {
        self.components[0]
    }

    /// Minor component
    pub fn minor(&self) -> u64 {
        self.components[1]
    }

    /// Patch component
    pub fn patch(&self) -> u64 {
        self.components[2]
    }

    /// Pre-release tag, if any
    pub fn pre_release(&self) -> Option<&str> {
        self.pre.as_deref()
    }

    /// Parse a version, tolerating a leading `v` and build metadata
    pub fn parse(text: &str) -> Result<Self, VersionError> {
        let invalid = || VersionError::InvalidVersion(text.to_string());
        let trimmed = text.trim();
        let trimmed = trimmed
            .strip_prefix('v')
            .or_else(|| trimmed.strip_prefix('V'))
            .unwrap_or(trimmed);
        let without_build = trimmed.split('+').next().unwrap_or_default();
        let (numbers, pre) = match without_build.split_once('-') {
            Some((numbers, pre)) if !pre.is_empty() => (numbers, Some(pre.to_string())),
            Some(_) => return Err(invalid()),
            None => (without_build, None),
        };

        let mut components = [0u64; MAX_COMPONENTS];
        let mut len = 0;
        for part in numbers.split('.') {
            if len == MAX_COMPONENTS || part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit())
            {
                return Err(invalid());
            }
            components[len] = part.parse().map_err(|_| invalid())?;
            len += 1;
        }

        Ok(Self {
            components,
            len,
            pre,
        })
    }

    fn compare_pre(left: Option<&str>, right: Option<&str>) -> Ordering {
        match (left, right) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Greater,
            (Some(_), None) => Ordering::Less,
            (Some(a), Some(b)) => {
                let mut a_parts = a.split('.');
                let mut b_parts = b.split('.');
                loop {
                    match (a_parts.next(), b_parts.next()) {
                        (None, None) => return Ordering::Equal,
                        (None, Some(_)) => return Ordering::Less,
                        (Some(_), None) => return Ordering::Greater,
                        (Some(x), Some(y)) => {
                            let ordering = match (x.parse::<u64>(), y.parse::<u64>()) {
                                (Ok(x), Ok(y)) => x.cmp(&y),
                                (Ok(_), Err(_)) => Ordering::Less,
                                (Err(_), Ok(_)) => Ordering::Greater,
                                (Err(_), Err(_)) => x.cmp(y),
                            };
                            if ordering != Ordering::Equal {
                                return ordering;
                            }
                        }
                    }
                }
            }
        }
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.components
            .cmp(&other.components)
            .then_with(|| Self::compare_pre(self.pre.as_deref(), other.pre.as_deref()))
    }
}

impl FromStr for Version {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Version::parse(s)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, component) in self.components[..self.len].iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            write!(f, "{component}")?;
        }
        if let Some(pre) = &self.pre {
            write!(f, "-{pre}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Bound {
    version: Version,
    inclusive: bool,
}

/// Interval of versions
#[derive(Debug, Clone, PartialEq, Default)]
pub struct VersionRange {
    lower: Option<Bound>,
    upper: Option<Bound>,
}

impl VersionRange {
    /// Range matching every version
    pub fn any() -> Self {
        Self::default()
    }

    /// Check whether `version` falls inside the range
    pub fn contains(&self, version: &Version) -> bool {
        let above = match &self.lower {
            Some(bound) if bound.inclusive => version >= &bound.version,
            Some(bound) => version > &bound.version,
            None => true,
        };
        let below = match &self.upper {
            Some(bound) if bound.inclusive => version <= &bound.version,
            Some(bound) => version < &bound.version,
            None => true,
        };
        above && below
    }

    /// Parse a range expression
    pub fn parse(text: &str) -> Result<Self, VersionError> {
        let trimmed = text.trim();
        let invalid = || VersionError::InvalidRange(text.to_string());

        if trimmed.is_empty() {
            return Err(invalid());
        }
        if trimmed == "*" {
            return Ok(Self::any());
        }
        if trimmed.starts_with('[') || trimmed.starts_with('(') {
            return Self::parse_interval(trimmed).ok_or_else(invalid);
        }
        if trimmed.starts_with(['<', '>', '=']) {
            return Self::parse_comparators(trimmed).ok_or_else(invalid);
        }

        let version = Version::parse(trimmed).map_err(|_| invalid())?;
        Ok(Self {
            lower: Some(Bound {
                version,
                inclusive: true,
            }),
            upper: None,
        })
    }

    fn parse_interval(text: &str) -> Option<Self> {
        let lower_inclusive = text.starts_with('[');
        let upper_inclusive = text.ends_with(']');
        if !(text.ends_with(']') || text.ends_with(')')) || text.len() < 2 {
            return None;
        }
        let inner = &text[1..text.len() - 1];

        let parse_side = |side: &str, inclusive: bool| -> Option<Option<Bound>> {
            let side = side.trim();
            if side.is_empty() {
                return Some(None);
            }
            Version::parse(side).ok().map(|version| Some(Bound { version, inclusive }))
        };

        match inner.split_once(',') {
            Some((low, high)) => {
                let lower = parse_side(low, lower_inclusive)?;
                let upper = parse_side(high, upper_inclusive)?;
                Some(Self { lower, upper })
            }
            None => {
                // `[1.2]` pins exactly one version
                if !(lower_inclusive && upper_inclusive) {
                    return None;
                }
                let version = Version::parse(inner.trim()).ok()?;
                Some(Self {
                    lower: Some(Bound {
                        version: version.clone(),
                        inclusive: true,
                    }),
                    upper: Some(Bound {
                        version,
                        inclusive: true,
                    }),
                })
            }
        }
    }

    fn parse_comparators(text: &str) -> Option<Self> {
        let mut range = Self::any();
        for clause in text.split([' ', ',']).filter(|c| !c.is_empty()) {
            let (op, rest) = ["<=", ">=", "<", ">", "="]
                .iter()
                .find_map(|op| clause.strip_prefix(op).map(|rest| (*op, rest)))?;
            let version = Version::parse(rest).ok()?;
            match op {
                ">=" | ">" => range.tighten_lower(Bound {
                    version,
                    inclusive: op == ">=",
                }),
                "<=" | "<" => range.tighten_upper(Bound {
                    version,
                    inclusive: op == "<=",
                }),
                _ => {
                    range.tighten_lower(Bound {
                        version: version.clone(),
                        inclusive: true,
                    });
                    range.tighten_upper(Bound {
                        version,
                        inclusive: true,
                    });
                }
            }
        }
        Some(range)
    }

    fn tighten_lower(&mut self, bound: Bound) {
        let replace = match &self.lower {
            None => true,
            Some(current) => {
                bound.version > current.version
                    || (bound.version == current.version && !bound.inclusive)
            }
        };
        if replace {
            self.lower = Some(bound);
        }
    }

    fn tighten_upper(&mut self, bound: Bound) {
        let replace = match &self.upper {
            None => true,
            Some(current) => {
                bound.version < current.version
                    || (bound.version == current.version && !bound.inclusive)
            }
        };
        if replace {
            self.upper = Some(bound);
        }
    }
}

impl FromStr for VersionRange {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        VersionRange::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn v(text: &str) -> Version {
        Version::parse(text).unwrap()
    }

    #[test]
    fn test_missing_components_compare_as_zero() {
        assert_eq!(v("1.2"), v("1.2.0"));
        assert!(v("1.10") > v("1.9.9"));
        assert_eq!(v("v2.0.1").to_string(), "2.0.1");
    }

    #[test]
    fn test_prerelease_orders_before_release() {
        assert!(v("1.0.0-alpha") < v("1.0.0"));
        assert!(v("1.0.0-alpha.1") < v("1.0.0-alpha.2"));
        assert!(v("1.0.0-alpha") < v("1.0.0-beta"));
    }

    #[test]
    fn test_invalid_versions() {
        assert!(Version::parse("").is_err());
        assert!(Version::parse("1..2").is_err());
        assert!(Version::parse("1.2.3.4.5").is_err());
        assert!(Version::parse("one").is_err());
    }

    #[rstest]
    #[case("[1.0,2.0)", "1.0", true)]
    #[case("[1.0,2.0)", "2.0", false)]
    #[case("(1.0,2.0]", "1.0", false)]
    #[case("(1.0,2.0]", "2.0", true)]
    #[case("(,3]", "0.1", true)]
    #[case("[1.2]", "1.2.0", true)]
    #[case("[1.2]", "1.2.1", false)]
    #[case("1.5", "1.4", false)]
    #[case("1.5", "9.0", true)]
    #[case(">=1.0 <2.0", "1.9.9", true)]
    #[case(">=1.0 <2.0", "2.0", false)]
    #[case("=1.1", "1.1", true)]
    #[case("*", "0.0.1", true)]
    fn test_range_membership(#[case] range: &str, #[case] version: &str, #[case] expected: bool) {
        let range = VersionRange::parse(range).unwrap();
        assert_eq!(range.contains(&v(version)), expected);
    }

    #[test]
    fn test_invalid_ranges() {
        assert!(VersionRange::parse("[1.0").is_err());
        assert!(VersionRange::parse("(1.0)").is_err());
        assert!(VersionRange::parse(">=x").is_err());
        assert!(VersionRange::parse("").is_err());
    }
}
