//! Declared gem dependencies.

use std::fmt;
use std::hash::{Hash, Hasher};

use crate::platform::Platform;
use crate::source::SourceId;
use crate::version::Requirement;

/// Whether a dependency is needed at runtime or only during development.
///
/// The type is informational: lockfiles do not record it, so it is excluded
/// from dependency equality and re-stamped from the gemfile after
/// convergence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DepType {
    /// Required when the bundle runs.
    #[default]
    Runtime,
    /// Required only while developing the gem itself.
    Development,
}

/// A declared requirement on a gem.
///
/// Dependencies come from two places with the same shape: the gemfile
/// (carrying groups, platforms and an optional explicit source) and locked
/// specs (name and requirement only). Equality covers everything except
/// [`DepType`].
#[derive(Debug, Clone)]
pub struct Dependency {
    /// Gem name.
    pub name: String,
    /// Acceptable version range.
    pub requirement: Requirement,
    /// Group labels (`default`, `test`, `development`, ...).
    pub groups: Vec<String>,
    /// Platform restrictions; empty means all platforms.
    pub platforms: Vec<Platform>,
    /// Explicitly declared source, if any. `None` routes to the default
    /// source during planning.
    pub source: Option<SourceId>,
    /// Runtime or development. Not part of equality.
    pub dep_type: DepType,
}

impl Dependency {
    /// A runtime dependency in the `default` group with no source pin.
    pub fn new(name: impl Into<String>, requirement: Requirement) -> Self {
        Self {
            name: name.into(),
            requirement,
            groups: vec!["default".to_string()],
            platforms: Vec::new(),
            source: None,
            dep_type: DepType::Runtime,
        }
    }

    /// Replace the group list.
    pub fn with_groups(mut self, groups: &[&str]) -> Self {
        self.groups = groups.iter().map(|g| (*g).to_string()).collect();
        self
    }

    /// Pin to an explicit source.
    pub fn with_source(mut self, source: SourceId) -> Self {
        self.source = Some(source);
        self
    }

    /// Restrict to specific platforms.
    pub fn with_platforms(mut self, platforms: Vec<Platform>) -> Self {
        self.platforms = platforms;
        self
    }

    /// Mark as a development-only dependency.
    pub fn development(mut self) -> Self {
        self.dep_type = DepType::Development;
        self
    }

    /// Whether this dependency belongs to any of `groups`. An empty query
    /// matches everything.
    pub fn in_groups(&self, groups: &[String]) -> bool {
        groups.is_empty() || self.groups.iter().any(|g| groups.contains(g))
    }

    /// Whether this dependency applies when bundling for `platform`.
    pub fn applies_to_platform(&self, platform: &Platform) -> bool {
        self.platforms.is_empty() || self.platforms.iter().any(|p| p.matches(platform))
    }
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.requirement)
    }
}

// Equality deliberately ignores dep_type: gemfile-declared and locked
// dependencies must compare equal when only the type differs.
impl PartialEq for Dependency {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.requirement == other.requirement
            && self.groups == other.groups
            && self.platforms == other.platforms
            && self.source == other.source
    }
}

impl Eq for Dependency {}

impl Hash for Dependency {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
        self.requirement.hash(state);
        self.groups.hash(state);
        self.platforms.hash(state);
        self.source.hash(state);
    }
}
