//! Target platform identifiers.
//!
//! A platform is either the generic `ruby` platform (pure-ruby gems that
//! install anywhere) or a `cpu-os[-version]` tuple naming a specific target
//! for precompiled builds. The definition core uses platforms in three
//! places: filtering a [`SpecSet`](crate::spec_set::SpecSet) down to the
//! targets a bundle must cover, adjusting the lockfile's platform list to
//! include the machine running the resolution, and detecting when the
//! lockfile no longer covers the local machine.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// The generic platform label used in lockfiles.
pub const RUBY: &str = "ruby";

/// A target platform: the generic ruby platform or a specific cpu-os tuple.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Platform {
    /// Pure-ruby, installs on any target.
    Ruby,
    /// A specific target tuple such as `x86_64-linux` or `arm64-darwin-23`.
    Specific {
        /// CPU architecture (`x86_64`, `arm64`, ...)
        cpu: String,
        /// Operating system (`linux`, `darwin`, `mingw32`, ...)
        os: String,
        /// Optional OS version suffix (`23` in `arm64-darwin-23`)
        version: Option<String>,
    },
}

impl Platform {
    /// Parse a platform string. `"ruby"` yields [`Platform::Ruby`]; anything
    /// else is split into a cpu-os tuple with an optional version suffix.
    pub fn parse(s: &str) -> Self {
        let trimmed = s.trim();
        if trimmed.eq_ignore_ascii_case(RUBY) {
            return Self::Ruby;
        }
        let mut parts = trimmed.splitn(3, '-');
        let cpu = parts.next().unwrap_or_default().to_string();
        let os = parts.next().unwrap_or_default().to_string();
        let version = parts.next().map(str::to_string);
        Self::Specific { cpu, os, version }
    }

    /// True for the generic ruby platform.
    pub fn is_ruby(&self) -> bool {
        matches!(self, Self::Ruby)
    }

    /// Whether a spec built for `self` can run on `target`.
    ///
    /// The generic platform runs anywhere. Specific platforms match on cpu
    /// and os; a missing version on either side is a wildcard.
    pub fn matches(&self, target: &Platform) -> bool {
        match (self, target) {
            (Self::Ruby, _) => true,
            (_, Self::Ruby) => false,
            (
                Self::Specific { cpu, os, version },
                Self::Specific {
                    cpu: tcpu,
                    os: tos,
                    version: tversion,
                },
            ) => {
                cpu == tcpu
                    && os == tos
                    && match (version, tversion) {
                        (Some(a), Some(b)) => a == b,
                        _ => true,
                    }
            }
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ruby => write!(f, "{RUBY}"),
            Self::Specific { cpu, os, version } => {
                write!(f, "{cpu}-{os}")?;
                if let Some(v) = version {
                    write!(f, "-{v}")?;
                }
                Ok(())
            }
        }
    }
}

impl FromStr for Platform {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}

impl Serialize for Platform {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Platform {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        if s.trim().is_empty() {
            return Err(D::Error::custom("platform string is empty"));
        }
        Ok(Self::parse(&s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_generic_and_specific() {
        assert_eq!(Platform::parse("ruby"), Platform::Ruby);
        assert_eq!(
            Platform::parse("x86_64-linux"),
            Platform::Specific {
                cpu: "x86_64".into(),
                os: "linux".into(),
                version: None
            }
        );
        assert_eq!(
            Platform::parse("arm64-darwin-23").to_string(),
            "arm64-darwin-23"
        );
    }

    #[test]
    fn generic_matches_everything() {
        let linux = Platform::parse("x86_64-linux");
        assert!(Platform::Ruby.matches(&linux));
        assert!(!linux.matches(&Platform::Ruby));
    }

    #[test]
    fn version_is_wildcard_when_absent() {
        let darwin = Platform::parse("arm64-darwin");
        let darwin23 = Platform::parse("arm64-darwin-23");
        assert!(darwin.matches(&darwin23));
        assert!(darwin23.matches(&darwin));
        assert!(!darwin.matches(&Platform::parse("x86_64-linux")));
    }

    #[test]
    fn display_round_trips() {
        for s in ["ruby", "x86_64-linux", "arm64-darwin-23"] {
            assert_eq!(Platform::parse(s).to_string(), s);
        }
    }
}
