//! Version and requirement handling for gem dependencies.
//!
//! Gem versions are parsed into [`semver::Version`] values; version
//! requirements use gem operator syntax rather than semver range syntax,
//! so this module carries its own constraint model on top of `semver`:
//!
//! - **Exact**: `"= 1.0.0"` or bare `"1.0.0"`
//! - **Comparisons**: `">= 1.0"`, `"> 1"`, `"<= 2.1"`, `"< 2"`, `"!= 1.2"`
//! - **Pessimistic**: `"~> 1.2"` (>= 1.2, < 2.0), `"~> 1.2.3"` (>= 1.2.3, < 1.3.0)
//! - **Lists**: `">= 1.0, < 2.5"` - all constraints must hold
//!
//! Requirements render back to a normalized string form; two requirements
//! are equal exactly when their normalized forms are equal, which is the
//! comparison the convergence engine performs between declared and locked
//! dependencies.

use semver::{BuildMetadata, Prerelease, Version};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::core::BundlerError;

/// Parse a gem version string into a [`Version`].
///
/// Gem versions may have fewer than three numeric segments (`"1.0"`) -
/// missing segments are zero-filled. A trailing non-numeric segment
/// (`"1.0.0.beta1"`) becomes a prerelease identifier; numeric segments past
/// the third are folded into build metadata, which does not participate in
/// ordering.
pub fn parse_version(input: &str) -> Result<Version, BundlerError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(BundlerError::InvalidOption {
            message: "version string is empty".to_string(),
        });
    }
    let mut numeric: Vec<u64> = Vec::new();
    let mut prerelease: Option<String> = None;
    let mut build: Vec<String> = Vec::new();
    for segment in trimmed.split('.') {
        if prerelease.is_some() {
            // Everything after the first non-numeric segment stays prerelease.
            let pre = prerelease.as_mut().unwrap();
            pre.push('.');
            pre.push_str(segment);
            continue;
        }
        match segment.parse::<u64>() {
            Ok(n) if numeric.len() < 3 => numeric.push(n),
            Ok(_) => build.push(segment.to_string()),
            Err(_) => prerelease = Some(segment.to_string()),
        }
    }
    while numeric.len() < 3 {
        numeric.push(0);
    }
    let mut version = Version::new(numeric[0], numeric[1], numeric[2]);
    if let Some(pre) = prerelease {
        version.pre = Prerelease::new(&pre).map_err(BundlerError::Semver)?;
    }
    if !build.is_empty() {
        version.build = BuildMetadata::new(&build.join(".")).map_err(BundlerError::Semver)?;
    }
    Ok(version)
}

/// A single constraint operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Op {
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
    /// `~>`: at least the given version, below the next release of the
    /// second-to-last given segment.
    Pessimistic,
}

impl Op {
    fn as_str(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "!=",
            Self::Gt => ">",
            Self::Lt => "<",
            Self::Ge => ">=",
            Self::Le => "<=",
            Self::Pessimistic => "~>",
        }
    }
}

/// One operator/version pair within a requirement.
#[derive(Debug, Clone)]
struct Constraint {
    op: Op,
    version: Version,
    /// Number of numeric segments the user wrote, which fixes the
    /// pessimistic upper bound (`~> 1.2` vs `~> 1.2.0`).
    segments: usize,
    /// The version text as written, used for normalized display.
    text: String,
}

impl Constraint {
    fn matches(&self, candidate: &Version) -> bool {
        match self.op {
            Op::Eq => candidate == &self.version,
            Op::Ne => candidate != &self.version,
            Op::Gt => candidate > &self.version,
            Op::Lt => candidate < &self.version,
            Op::Ge => candidate >= &self.version,
            Op::Le => candidate <= &self.version,
            Op::Pessimistic => {
                candidate >= &self.version && candidate < &self.pessimistic_upper_bound()
            }
        }
    }

    fn pessimistic_upper_bound(&self) -> Version {
        // `~> 1.2.3` bumps the minor; `~> 1.2` and `~> 1` bump the major.
        let v = &self.version;
        if self.segments >= 3 {
            Version::new(v.major, v.minor + 1, 0)
        } else {
            Version::new(v.major + 1, 0, 0)
        }
    }
}

/// A gem version requirement: a conjunction of operator constraints.
#[derive(Debug, Clone)]
pub struct Requirement {
    constraints: Vec<Constraint>,
}

impl Requirement {
    /// The permissive default requirement, `>= 0`.
    pub fn any() -> Self {
        Self::parse(">= 0").expect("default requirement parses")
    }

    /// A `>= version` floor, used for base requirements during planning.
    pub fn at_least(version: &Version) -> Self {
        Self {
            constraints: vec![Constraint {
                op: Op::Ge,
                version: version.clone(),
                segments: 3,
                text: version.to_string(),
            }],
        }
    }

    /// An exact `= version` pin.
    pub fn exact(version: &Version) -> Self {
        Self {
            constraints: vec![Constraint {
                op: Op::Eq,
                version: version.clone(),
                segments: 3,
                text: version.to_string(),
            }],
        }
    }

    /// Parse a requirement string such as `"~> 1.0"` or `">= 1.0, < 2.5"`.
    ///
    /// A bare version (`"1.0.3"`) is an exact pin. An empty string parses
    /// as the permissive default.
    pub fn parse(input: &str) -> Result<Self, BundlerError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Ok(Self::any());
        }
        let mut constraints = Vec::new();
        for part in trimmed.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let (op, rest) = if let Some(rest) = part.strip_prefix("~>") {
                (Op::Pessimistic, rest)
            } else if let Some(rest) = part.strip_prefix(">=") {
                (Op::Ge, rest)
            } else if let Some(rest) = part.strip_prefix("<=") {
                (Op::Le, rest)
            } else if let Some(rest) = part.strip_prefix("!=") {
                (Op::Ne, rest)
            } else if let Some(rest) = part.strip_prefix('>') {
                (Op::Gt, rest)
            } else if let Some(rest) = part.strip_prefix('<') {
                (Op::Lt, rest)
            } else if let Some(rest) = part.strip_prefix('=') {
                (Op::Eq, rest)
            } else {
                (Op::Eq, part)
            };
            let text = rest.trim().to_string();
            if text.is_empty() {
                return Err(BundlerError::InvalidOption {
                    message: format!("requirement '{part}' is missing a version"),
                });
            }
            let segments = text.split('.').filter(|s| s.parse::<u64>().is_ok()).count();
            let version = parse_version(&text)?;
            constraints.push(Constraint {
                op,
                version,
                segments: segments.max(1),
                text,
            });
        }
        if constraints.is_empty() {
            return Ok(Self::any());
        }
        Ok(Self { constraints })
    }

    /// Whether `candidate` satisfies every constraint.
    pub fn matches(&self, candidate: &Version) -> bool {
        self.constraints.iter().all(|c| c.matches(candidate))
    }

    /// True for the permissive `>= 0` requirement.
    pub fn is_any(&self) -> bool {
        self.constraints.len() == 1
            && self.constraints[0].op == Op::Ge
            && self.constraints[0].version == Version::new(0, 0, 0)
    }
}

impl Default for Requirement {
    fn default() -> Self {
        Self::any()
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<String> = self
            .constraints
            .iter()
            .map(|c| format!("{} {}", c.op.as_str(), c.text))
            .collect();
        write!(f, "{}", rendered.join(", "))
    }
}

impl PartialEq for Requirement {
    fn eq(&self, other: &Self) -> bool {
        self.to_string() == other.to_string()
    }
}

impl Eq for Requirement {}

impl std::hash::Hash for Requirement {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.to_string().hash(state);
    }
}

impl FromStr for Requirement {
    type Err = BundlerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for Requirement {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Requirement {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Version {
        parse_version(s).unwrap()
    }

    #[test]
    fn pads_short_versions() {
        assert_eq!(v("1.0"), Version::new(1, 0, 0));
        assert_eq!(v("2"), Version::new(2, 0, 0));
    }

    #[test]
    fn prerelease_segments_are_preserved() {
        let version = v("1.0.0.beta1");
        assert_eq!(version.pre.as_str(), "beta1");
        assert!(version < Version::new(1, 0, 0));
    }

    #[test]
    fn pessimistic_two_segments_allows_minor_drift() {
        let req = Requirement::parse("~> 1.0").unwrap();
        assert!(req.matches(&v("1.0.3")));
        assert!(req.matches(&v("1.9.0")));
        assert!(!req.matches(&v("2.0.0")));
        assert!(!req.matches(&v("0.9.9")));
    }

    #[test]
    fn pessimistic_three_segments_pins_minor() {
        let req = Requirement::parse("~> 1.2.3").unwrap();
        assert!(req.matches(&v("1.2.9")));
        assert!(!req.matches(&v("1.3.0")));
    }

    #[test]
    fn constraint_lists_are_conjunctions() {
        let req = Requirement::parse(">= 1.0, < 2.5").unwrap();
        assert!(req.matches(&v("2.4.9")));
        assert!(!req.matches(&v("2.5.0")));
        assert!(!req.matches(&v("0.9.0")));
    }

    #[test]
    fn bare_version_is_exact() {
        let req = Requirement::parse("1.0.3").unwrap();
        assert!(req.matches(&v("1.0.3")));
        assert!(!req.matches(&v("1.0.4")));
        assert_eq!(req.to_string(), "= 1.0.3");
    }

    #[test]
    fn normalized_display_drives_equality() {
        let a = Requirement::parse("~>1.0").unwrap();
        let b = Requirement::parse("~> 1.0").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "~> 1.0");
        assert_ne!(a, Requirement::parse("~> 1.1").unwrap());
    }

    #[test]
    fn default_requirement_is_any() {
        let req = Requirement::any();
        assert!(req.is_any());
        assert_eq!(req.to_string(), ">= 0");
        assert!(req.matches(&v("0.0.1")));
    }
}
