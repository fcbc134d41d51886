//! Resolved package specifications.

use semver::Version;
use std::fmt;

use crate::dependency::{DepType, Dependency};
use crate::platform::Platform;
use crate::source::SourceId;

/// A concrete, resolved package.
///
/// Identity is the `(name, version, platform)` triple. The spec's source is
/// a handle into the definition's source registry, never an owned value, so
/// spec sets stay cheap to clone and sources stay mutable in one place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Spec {
    /// Gem name.
    pub name: String,
    /// Resolved version.
    pub version: Version,
    /// Platform this build targets.
    pub platform: Platform,
    /// Handle of the source this spec came from.
    pub source: SourceId,
    /// Dependencies this spec requires.
    pub dependencies: Vec<Dependency>,
}

impl Spec {
    /// A pure-ruby spec with no dependencies.
    pub fn new(name: impl Into<String>, version: Version, source: SourceId) -> Self {
        Self {
            name: name.into(),
            version,
            platform: Platform::Ruby,
            source,
            dependencies: Vec::new(),
        }
    }

    /// Target a specific platform.
    pub fn for_platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    /// Attach dependencies.
    pub fn with_dependencies(mut self, dependencies: Vec<Dependency>) -> Self {
        self.dependencies = dependencies;
        self
    }

    /// Whether `other` denotes the same `(name, version, platform)`.
    pub fn same_identity(&self, other: &Spec) -> bool {
        self.name == other.name
            && self.version == other.version
            && self.platform == other.platform
    }

    /// Runtime dependencies only.
    pub fn runtime_dependencies(&self) -> impl Iterator<Item = &Dependency> {
        self.dependencies
            .iter()
            .filter(|d| d.dep_type == DepType::Runtime)
    }

    /// Canonical `name-version[-platform]` label.
    pub fn full_name(&self) -> String {
        if self.platform.is_ruby() {
            format!("{}-{}", self.name, self.version)
        } else {
            format!("{}-{}-{}", self.name, self.version, self.platform)
        }
    }

    /// Whether this build can be used on `platform`.
    pub fn installable_on(&self, platform: &Platform) -> bool {
        self.platform.matches(platform)
    }
}

impl fmt::Display for Spec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::SourceId;

    #[test]
    fn identity_spans_name_version_platform() {
        let source = SourceId::for_tests(0);
        let ruby = Spec::new("foo", Version::new(1, 0, 3), source);
        let linux = ruby.clone().for_platform(Platform::parse("x86_64-linux"));
        assert!(ruby.same_identity(&ruby.clone()));
        assert!(!ruby.same_identity(&linux));
    }

    #[test]
    fn full_name_appends_platform_when_specific() {
        let source = SourceId::for_tests(0);
        let spec = Spec::new("foo", Version::new(1, 0, 3), source);
        assert_eq!(spec.full_name(), "foo-1.0.3");
        let native = spec.for_platform(Platform::parse("x86_64-linux"));
        assert_eq!(native.full_name(), "foo-1.0.3-x86_64-linux");
    }

    #[test]
    fn ruby_specs_install_anywhere() {
        let source = SourceId::for_tests(0);
        let spec = Spec::new("foo", Version::new(1, 0, 0), source);
        assert!(spec.installable_on(&Platform::parse("arm64-darwin")));
    }
}
