//! Error handling for gembundle
//!
//! The error system is designed around two principles:
//! 1. **Strongly-typed errors** for precise handling in code
//! 2. **Actionable messages** for the surfaces that render them
//!
//! [`BundlerError`] enumerates every failure mode of the definition core.
//! Internal helpers use [`anyhow::Result`] with `.context(...)` for
//! propagation; the public definition surface returns typed errors wherever
//! a caller is expected to match on the failure kind.
//!
//! # Error Categories
//!
//! - **Input not found**: [`BundlerError::GemfileNotFound`]
//! - **Lock state**: [`BundlerError::LockfileError`]
//! - **Source selection**: [`BundlerError::AmbiguousSource`],
//!   [`BundlerError::PathError`], [`BundlerError::GitError`]
//! - **Resolution**: [`BundlerError::SolveFailure`],
//!   [`BundlerError::GemNotFound`]
//! - **Frozen mode**: [`BundlerError::ProductionError`] carrying a
//!   structured [`FrozenDiff`]
//! - **Runtime checks**: [`BundlerError::RubyVersionMismatch`],
//!   [`BundlerError::PlatformMismatch`]
//!
//! Standard conversions are provided for [`std::io::Error`],
//! [`toml::de::Error`] and [`semver::Error`] so `?` composes across the
//! manifest loader and version parsing.

use std::fmt;
use thiserror::Error;

/// The main error type for definition-core operations.
///
/// Each variant represents a specific failure mode and carries the context
/// needed to produce a useful message without re-deriving state.
#[derive(Error, Debug)]
pub enum BundlerError {
    /// The manifest file does not exist at the expected path.
    #[error("Could not locate gemfile at {path}")]
    GemfileNotFound {
        /// Path that was checked for the manifest
        path: String,
    },

    /// The manifest exists but its content is invalid.
    #[error("Invalid manifest file {file}: {reason}")]
    GemfileError {
        /// Path to the offending manifest
        file: String,
        /// Why the content was rejected
        reason: String,
    },

    /// A resolved or locked gem could not be materialized from any source.
    ///
    /// The message distinguishes a version removed upstream from a gem no
    /// source has ever advertised; use [`BundlerError::gem_yanked`] or
    /// [`BundlerError::gems_unknown`] to construct the right flavor.
    #[error("{message}")]
    GemNotFound {
        /// Pre-rendered description of the missing gems
        message: String,
    },

    /// The lockfile could not be parsed or is internally inconsistent.
    #[error("Your lockfile is unreadable or invalid: {reason}")]
    LockfileError {
        /// Why the lockfile was rejected
        reason: String,
    },

    /// Two explicit declarations route the same gem to different sources.
    #[error("The gem '{name}' was declared with two different sources: {first} and {second}")]
    AmbiguousSource {
        /// Gem routed to conflicting sources
        name: String,
        /// Label of the first declared source
        first: String,
        /// Label of the conflicting source
        second: String,
    },

    /// The running ruby does not satisfy the declared ruby requirement.
    ///
    /// `patchlevel` fields are compared as strings; a non-string patchlevel
    /// is a configuration error of the declaration itself.
    #[error("Your Ruby {field} is {actual}, but your gemfile specified {expected}")]
    RubyVersionMismatch {
        /// Which subfield mismatched: engine, version, engine version or patchlevel
        field: String,
        /// Declared value
        expected: String,
        /// Value of the running ruby
        actual: String,
    },

    /// Frozen-mode violation: the gemfile and lockfile have diverged.
    #[error("{diff}")]
    ProductionError {
        /// Structured gemfile/lockfile divergence
        diff: FrozenDiff,
    },

    /// The local platform is not covered by the lockfile.
    #[error(
        "Your bundle only supports platforms {supported:?} but your local platform is {local}. \
         Add the current platform to the lockfile with `add_platform` and try again."
    )]
    PlatformMismatch {
        /// Platforms recorded in the lockfile
        supported: Vec<String>,
        /// The running platform
        local: String,
    },

    /// A user-supplied option was rejected.
    #[error("{message}")]
    InvalidOption {
        /// Why the option was rejected
        message: String,
    },

    /// The resolver could not find a version satisfying all requirements.
    #[error("Could not find compatible versions for gem '{name}': {details}")]
    SolveFailure {
        /// The package that could not be satisfied
        name: String,
        /// Requirement context assembled by the resolver
        details: String,
    },

    /// A path source failed while probing its on-disk state.
    #[error("The path source at {path} could not be read: {reason}")]
    PathError {
        /// Path of the source
        path: String,
        /// Underlying failure
        reason: String,
    },

    /// A git source failed while probing or unlocking.
    #[error("Git source {uri} failed: {reason}")]
    GitError {
        /// Repository URI
        uri: String,
        /// Underlying failure
        reason: String,
    },

    /// I/O error from lockfile or manifest access.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error from the manifest loader.
    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Version parsing error.
    #[error("Version error: {0}")]
    Semver(#[from] semver::Error),
}

impl BundlerError {
    /// A locked version that its author has since removed from the source.
    pub fn gem_yanked(name: &str, version: &semver::Version, source: &str) -> Self {
        Self::GemNotFound {
            message: format!(
                "Your bundle is locked to {name} ({version}) from {source}, but that version can \
                 no longer be found in that source. That means the author of {name} ({version}) \
                 has removed it. You'll need to update your bundle to a version other than \
                 {name} ({version}) that hasn't been removed in order to install."
            ),
        }
    }

    /// Gems that no consulted source advertises, grouped by source label.
    pub fn gems_unknown(by_source: &[(String, Vec<String>)]) -> Self {
        let mut message = String::from("Could not find gem specifications:\n");
        for (source, names) in by_source {
            for name in names {
                message.push_str(&format!("  * {name} in {source}\n"));
            }
        }
        message.push_str("Either the gems are not present in the sources, or the sources are unreachable.");
        Self::GemNotFound { message }
    }
}

/// Structured gemfile/lockfile divergence reported under frozen mode.
///
/// Collected during [`ensure_equivalent_gemfile_and_lockfile`] and rendered
/// as the body of [`BundlerError::ProductionError`].
///
/// [`ensure_equivalent_gemfile_and_lockfile`]: crate::definition::Definition::ensure_equivalent_gemfile_and_lockfile
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrozenDiff {
    /// Dependencies declared in the gemfile but absent from the lockfile,
    /// rendered as `name (requirement)`.
    pub added: Vec<String>,
    /// Dependencies recorded in the lockfile but no longer declared.
    pub deleted: Vec<String>,
    /// Dependencies whose requirement or source changed, rendered as
    /// `name (was .., now ..)`.
    pub changed: Vec<String>,
    /// Platforms present locally but missing from the lockfile.
    pub platforms: Vec<String>,
    /// Source migrations, rendered as `name (moved from .. to ..)`.
    pub sources: Vec<String>,
}

impl FrozenDiff {
    /// True when the gemfile and lockfile are equivalent.
    pub fn is_empty(&self) -> bool {
        self.added.is_empty()
            && self.deleted.is_empty()
            && self.changed.is_empty()
            && self.platforms.is_empty()
            && self.sources.is_empty()
    }
}

impl fmt::Display for FrozenDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Frozen mode is set, but your lockfile and gemfile do not match. \
             Run without frozen mode, or make sure the lockfile is up to date."
        )?;
        let mut section = |label: &str, entries: &[String]| -> fmt::Result {
            if !entries.is_empty() {
                writeln!(f, "\nYou have {label}:")?;
                for entry in entries {
                    writeln!(f, "* {entry}")?;
                }
            }
            Ok(())
        };
        section("added to the Gemfile", &self.added)?;
        section("deleted from the Gemfile", &self.deleted)?;
        section("changed in the Gemfile", &self.changed)?;
        section("added platforms", &self.platforms)?;
        section("changed the source of gems", &self.sources)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frozen_diff_lists_added_deps_by_section() {
        let diff = FrozenDiff {
            added: vec!["baz (>= 0)".to_string()],
            ..FrozenDiff::default()
        };
        let rendered = diff.to_string();
        assert!(rendered.contains("added to the Gemfile"));
        assert!(rendered.contains("* baz (>= 0)"));
        assert!(!rendered.contains("deleted from the Gemfile"));
    }

    #[test]
    fn empty_diff_reports_empty() {
        assert!(FrozenDiff::default().is_empty());
    }

    #[test]
    fn yanked_message_names_author_and_version() {
        let version = semver::Version::new(1, 0, 3);
        let err = BundlerError::gem_yanked("foo", &version, "rubygems repository https://gems.example");
        let message = err.to_string();
        assert!(message.contains("author of foo (1.0.3) has removed it"));
    }

    #[test]
    fn unknown_gems_grouped_by_source() {
        let err = BundlerError::gems_unknown(&[(
            "rubygems repository https://gems.example".to_string(),
            vec!["foo".to_string(), "bar".to_string()],
        )]);
        let message = err.to_string();
        assert!(message.contains("* foo in rubygems repository https://gems.example"));
        assert!(message.contains("* bar in"));
    }
}
