//! Settings snapshot and runtime context.
//!
//! The definition core never touches process-global state: everything it
//! needs from the environment - settings, the local platform, the running
//! ruby/rubygems/bundler versions - is captured in a [`Context`] value at
//! construction and threaded through. Settings are a read-only snapshot
//! for the life of a definition.

use semver::Version;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::core::Result;
use crate::platform::Platform;
use crate::ruby::RubyVersion;

/// User-facing settings consumed by the definition core.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Forbid lockfile mutation; divergence is an error, never a write.
    pub frozen: bool,
    /// Groups excluded from materialization.
    pub without: Vec<String>,
    /// Optional groups explicitly included.
    pub with: Vec<String>,
    /// When non-empty, the only groups considered.
    pub only: Vec<String>,
    /// Resolve as if the local platform were the generic ruby platform.
    pub force_ruby_platform: bool,
    /// Prefer locally cached gem variants during planning.
    pub prefer_local: bool,
    /// Offline mode: consult locked sources instead of remote indexes.
    pub local: bool,
    /// Suppress lockfile writes entirely.
    pub no_lock: bool,
    /// Per-gem local checkout overrides, `name -> path`.
    pub local_overrides: BTreeMap<String, PathBuf>,
}

impl Settings {
    /// Load a settings snapshot from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&raw)?)
    }
}

/// Everything the core needs to know about the environment it runs in.
#[derive(Debug, Clone)]
pub struct Context {
    /// Settings snapshot.
    pub settings: Settings,
    /// The platform of the machine running the resolution.
    pub local_platform: Platform,
    /// The running ruby.
    pub ruby_version: RubyVersion,
    /// The running rubygems.
    pub rubygems_version: Version,
    /// The running bundler.
    pub bundler_version: Version,
}

impl Context {
    /// A context with the given settings and conventional defaults for the
    /// runtime fields.
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            local_platform: Platform::parse("x86_64-linux"),
            ruby_version: RubyVersion::concrete("ruby", "3.2.2", Some("53")),
            rubygems_version: Version::new(3, 4, 10),
            bundler_version: Version::new(2, 4, 10),
        }
    }

    /// Override the local platform.
    pub fn with_local_platform(mut self, platform: Platform) -> Self {
        self.local_platform = platform;
        self
    }

    /// Override the running ruby.
    pub fn with_ruby(mut self, ruby: RubyVersion) -> Self {
        self.ruby_version = ruby;
        self
    }

    /// The platform resolution should target locally, honoring
    /// `force_ruby_platform`.
    pub fn effective_local_platform(&self) -> Platform {
        if self.settings.force_ruby_platform {
            Platform::Ruby
        } else {
            self.local_platform.clone()
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new(Settings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_deserialize_with_defaults() {
        let settings: Settings = toml::from_str(
            r#"
            frozen = true
            without = ["development", "test"]
            "#,
        )
        .unwrap();
        assert!(settings.frozen);
        assert_eq!(settings.without, vec!["development", "test"]);
        assert!(!settings.no_lock);
        assert!(settings.local_overrides.is_empty());
    }

    #[test]
    fn force_ruby_platform_masks_local() {
        let mut context = Context::default();
        assert_eq!(context.effective_local_platform(), context.local_platform);
        context.settings.force_ruby_platform = true;
        assert_eq!(context.effective_local_platform(), Platform::Ruby);
    }
}
