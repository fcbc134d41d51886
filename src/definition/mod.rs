//! The definition facade.
//!
//! A [`Definition`] reconciles three independently evolving inputs - the
//! declared manifest, the recorded lockfile, and the source universe -
//! under strict determinism and frozen-mode safety rules. Construction
//! runs the convergence engine (which mutates locked state toward gemfile
//! truth and raises change flags) followed by lockfile validation; the
//! convergence phase is the only point where locked state mutates.
//! `resolve` then consults the flags: an unchanged bundle reuses the
//! locked specs without ever invoking the resolver.
//!
//! ```no_run
//! use gembundle::context::Context;
//! use gembundle::definition::{Definition, UnlockInput};
//! use std::path::Path;
//!
//! # fn main() -> anyhow::Result<()> {
//! let mut definition = Definition::build(
//!     Path::new("gemfile.toml"),
//!     Some(Path::new("gems.lock")),
//!     UnlockInput::None,
//!     Context::default(),
//! )?;
//! let specs = definition.resolve()?;
//! definition.lock(Path::new("gems.lock"), true)?;
//! # Ok(())
//! # }
//! ```

pub mod convergence;
pub mod driver;
pub mod planner;
pub mod unlock;
pub mod validation;

pub use unlock::{UnlockInput, UnlockRequest};

use semver::Version;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, error};

use crate::context::Context;
use crate::core::{BundlerError, FrozenDiff, Result};
use crate::dependency::Dependency;
use crate::lockfile::{self, io, LockfileContents, ParsedLockfile};
use crate::manifest::Manifest;
use crate::platform::Platform;
use crate::ruby::RubyVersion;
use crate::source::{SourceId, SourceList, BUNDLER};
use crate::spec_set::SpecSet;

/// Flags raised during convergence and validation. Monotonic within a
/// construction: a flag can be set, never cleared.
#[derive(Debug, Clone, Default)]
pub struct ChangeFlags {
    /// A source was unlocked or a declared source diverged from the lock.
    pub source_changes: bool,
    /// A declared dependency differs from its locked counterpart.
    pub dependency_changes: bool,
    /// A path source's on-disk state diverged from the lock.
    pub path_changes: bool,
    /// A local override changed a source.
    pub local_changes: bool,
    /// The local platform was added to the platform list.
    pub new_platform: bool,
    /// Name of the first locked spec whose transitive dep is absent from
    /// the lock, or of the first declared dep with no locked spec.
    pub missing_lockfile_dep: Option<String>,
    /// A locked spec's dep has no satisfying locked version.
    pub invalid_lockfile_dep: bool,
    /// Bundler itself is being updated.
    pub unlocking_bundler: bool,
}

impl ChangeFlags {
    /// True when no flag is raised.
    pub fn nothing_changed(&self) -> bool {
        !self.source_changes
            && !self.dependency_changes
            && !self.path_changes
            && !self.local_changes
            && !self.new_platform
            && self.missing_lockfile_dep.is_none()
            && !self.invalid_lockfile_dep
            && !self.unlocking_bundler
    }
}

/// The lockfile snapshot as progressively mutated by convergence.
#[derive(Debug, Clone, Default)]
pub struct LockedState {
    /// Locked sources, as registry handles.
    pub sources: Vec<SourceId>,
    /// Locked dependencies by name.
    pub dependencies: BTreeMap<String, Dependency>,
    /// Locked specs.
    pub specs: SpecSet,
}

/// The definition: all state for one reconcile/resolve/lock cycle.
#[derive(Debug)]
pub struct Definition {
    pub(crate) context: Context,
    pub(crate) sources: SourceList,
    /// Handles of the sources declared by the manifest, in declaration
    /// order; everything after these in the registry came from the
    /// lockfile or planning.
    pub(crate) manifest_source_ids: Vec<SourceId>,
    pub(crate) dependencies: Vec<Dependency>,
    pub(crate) ruby_version: Option<RubyVersion>,
    pub(crate) unlock: UnlockRequest,
    pub(crate) locked: LockedState,
    /// Pre-mutation snapshot of the locked specs, kept as the resolver
    /// hint and for base-requirement floors.
    pub(crate) original_locked_specs: SpecSet,
    pub(crate) locked_ruby_version: Option<RubyVersion>,
    pub(crate) locked_bundler_version: Option<Version>,
    pub(crate) platforms: Vec<Platform>,
    pub(crate) flags: ChangeFlags,
    pub(crate) unknown_sections: Vec<String>,
    pub(crate) may_include_redundant_platform_specific_gems: bool,
    pub(crate) removed_platform: bool,
    pub(crate) resolved: Option<SpecSet>,
    pub(crate) resolved_bundler_version: Option<Version>,
}

impl Definition {
    /// Construct from files on disk. Fails with
    /// [`BundlerError::GemfileNotFound`] when the manifest is missing; a
    /// missing lockfile is a fresh bundle, not an error.
    pub fn build(
        gemfile: &Path,
        lockfile: Option<&Path>,
        unlock: UnlockInput,
        context: Context,
    ) -> Result<Self> {
        let manifest = Manifest::load(gemfile)?;
        let lockfile_text = match lockfile {
            Some(path) => io::read_lockfile(path).map_err(|e| BundlerError::LockfileError {
                reason: e.to_string(),
            })?,
            None => None,
        };
        Self::from_parts(manifest, lockfile_text, unlock, context)
    }

    /// Construct from an in-memory manifest and optional lockfile text.
    pub fn from_parts(
        manifest: Manifest,
        lockfile_text: Option<String>,
        unlock: UnlockInput,
        context: Context,
    ) -> Result<Self> {
        let Manifest {
            path: _,
            mut sources,
            dependencies,
            ruby_version,
        } = manifest;
        let manifest_source_ids: Vec<SourceId> = sources.iter().map(|(id, _)| id).collect();

        let mut unlock = UnlockRequest::from_input(unlock);

        // Unlocking everything discards the locked state entirely.
        let parsed = match (&lockfile_text, unlock.all) {
            (Some(text), false) => Some(ParsedLockfile::parse(text, &mut sources)?),
            _ => None,
        };

        let (locked, platforms, meta) = match parsed {
            Some(parsed) => {
                let ParsedLockfile {
                    sources: locked_sources,
                    specs,
                    dependencies: locked_deps,
                    platforms,
                    ruby_version: locked_ruby,
                    bundler_version,
                    unknown_sections,
                    crlf: _,
                    may_include_redundant_platform_specific_gems,
                } = parsed;
                let locked = LockedState {
                    sources: locked_sources,
                    dependencies: locked_deps
                        .iter()
                        .map(|d| (d.name.clone(), d.clone()))
                        .collect(),
                    specs,
                };
                (
                    locked,
                    platforms,
                    (
                        locked_ruby,
                        bundler_version,
                        unknown_sections,
                        may_include_redundant_platform_specific_gems,
                    ),
                )
            }
            None => (
                LockedState::default(),
                Vec::new(),
                (None, None, Vec::new(), false),
            ),
        };
        let (locked_ruby_version, locked_bundler_version, unknown_sections, redundant) = meta;

        // The ruby pin unlocks when only one side declares it, or both do
        // and the declaration no longer covers the locked ruby.
        unlock.ruby = unlock.ruby || ruby_pin_diverged(ruby_version.as_ref(), locked_ruby_version.as_ref());

        let mut definition = Self {
            context,
            sources,
            manifest_source_ids,
            dependencies,
            ruby_version,
            unlock,
            original_locked_specs: locked.specs.clone(),
            locked,
            locked_ruby_version,
            locked_bundler_version,
            platforms,
            flags: ChangeFlags::default(),
            unknown_sections,
            may_include_redundant_platform_specific_gems: redundant,
            removed_platform: false,
            resolved: None,
            resolved_bundler_version: None,
        };
        definition.flags.unlocking_bundler = definition.unlock.bundler.is_some();

        definition.converge()?;
        definition.validate_lockfile();
        debug!(
            nothing_changed = definition.nothing_changed(),
            reason = %definition.change_reason(),
            "definition constructed"
        );
        Ok(definition)
    }

    /// True when convergence and validation found the gemfile and lockfile
    /// in agreement.
    pub fn nothing_changed(&self) -> bool {
        self.flags.nothing_changed()
    }

    /// The change flags raised during construction.
    pub fn flags(&self) -> &ChangeFlags {
        &self.flags
    }

    /// Whether anything was asked to unlock.
    pub fn unlocking(&self) -> bool {
        self.unlock.unlocking()
    }

    /// Declared dependencies.
    pub fn dependencies(&self) -> &[Dependency] {
        &self.dependencies
    }

    /// The platform set after convergence.
    pub fn platforms(&self) -> &[Platform] {
        &self.platforms
    }

    /// The source registry.
    pub fn sources(&self) -> &SourceList {
        &self.sources
    }

    /// The locked specs as converged so far.
    pub fn locked_specs(&self) -> &SpecSet {
        &self.locked.specs
    }

    /// The normalized unlock request, including names added by expansion
    /// through the locked graph.
    pub fn unlock_request(&self) -> &UnlockRequest {
        &self.unlock
    }

    /// Mutable source registry access, for wiring source indexes.
    pub fn sources_mut(&mut self) -> &mut SourceList {
        &mut self.sources
    }

    /// Human-readable summary of why re-resolution is needed; empty when
    /// nothing changed and nothing is unlocking.
    pub fn change_reason(&self) -> String {
        let mut reasons: Vec<String> = Vec::new();
        if self.unlock.unlocking() {
            let mut what: Vec<String> = Vec::new();
            if self.unlock.all {
                what.push("everything".to_string());
            }
            if !self.unlock.gems.is_empty() {
                what.push(format!(
                    "gems: [{}]",
                    self.unlock.gems.iter().cloned().collect::<Vec<_>>().join(", ")
                ));
            }
            if !self.unlock.sources.is_empty() {
                what.push(format!(
                    "sources: [{}]",
                    self.unlock.sources.iter().cloned().collect::<Vec<_>>().join(", ")
                ));
            }
            if self.unlock.ruby {
                what.push("ruby".to_string());
            }
            if let Some(bundler) = &self.unlock.bundler {
                what.push(format!("bundler: {bundler}"));
            }
            reasons.push(format!("bundler is unlocking {}", what.join(", ")));
        }
        if self.flags.dependency_changes {
            reasons.push("the dependencies in your gemfile changed".to_string());
        }
        if self.flags.source_changes {
            reasons.push("the list of sources changed".to_string());
        }
        if self.flags.path_changes {
            reasons.push("the gemspecs for path gems changed".to_string());
        }
        if self.flags.local_changes {
            reasons.push("the gemspecs for git local gems changed".to_string());
        }
        if self.flags.new_platform {
            reasons.push("you added a new platform to your gemfile".to_string());
        }
        if let Some(name) = &self.flags.missing_lockfile_dep {
            reasons.push(format!("your lock file is missing \"{name}\""));
        }
        if self.flags.invalid_lockfile_dep {
            reasons.push("your lock file includes invalid dependencies".to_string());
        }
        if self.flags.unlocking_bundler {
            reasons.push("an update to the version of bundler itself was requested".to_string());
        }
        reasons.join(", ")
    }

    /// Materialized specs for the requested dependency groups.
    pub fn specs(&mut self) -> Result<SpecSet> {
        let deps = self.requested_dependencies();
        self.materialize_specs(&deps)
    }

    /// Materialized specs filtered to `groups`; empty means all groups.
    pub fn specs_for(&mut self, groups: &[String]) -> Result<SpecSet> {
        let deps: Vec<Dependency> = self
            .dependencies
            .iter()
            .filter(|d| d.in_groups(groups))
            .cloned()
            .collect();
        self.materialize_specs(&deps)
    }

    /// Probe: would materialization report missing specs? Resolution
    /// errors answer `true` and reset the memoized resolve so a later call
    /// can retry with refreshed sources.
    pub fn missing_specs(&mut self) -> bool {
        let deps = self.requested_dependencies();
        match self.materialize_specs(&deps) {
            Ok(_) => false,
            Err(err) => {
                debug!(error = %err, "materialization probe failed");
                self.resolved = None;
                true
            }
        }
    }

    /// Declared dependencies after applying the group settings
    /// (`only` / `without` / `with`).
    pub fn requested_dependencies(&self) -> Vec<Dependency> {
        let settings = &self.context.settings;
        self.dependencies
            .iter()
            .filter(|dep| {
                if !settings.only.is_empty() {
                    return dep.in_groups(&settings.only);
                }
                let excluded = dep.groups.iter().all(|g| {
                    settings.without.contains(g) && !settings.with.contains(g)
                });
                !excluded
            })
            .cloned()
            .collect()
    }

    /// Locked dependencies that are no longer declared.
    pub(crate) fn deleted_deps(&self) -> Vec<&Dependency> {
        self.locked
            .dependencies
            .values()
            .filter(|locked| !self.dependencies.iter().any(|d| d.name == locked.name))
            .collect()
    }

    /// Render the lockfile text for the current (resolved) state.
    pub fn to_lock(&mut self, preserve_unknown: bool) -> Result<String> {
        let specs = self.resolve()?;
        let bundler_version = self
            .resolved_bundler_version
            .clone()
            .or_else(|| self.locked_bundler_version.clone())
            .unwrap_or_else(|| self.context.bundler_version.clone());
        // An unlock invalidates carried-over unknown sections.
        let keep_unknown = preserve_unknown && !self.unlock.unlocking();
        let ruby = self.ruby_version.clone().or_else(|| self.locked_ruby_version.clone());
        let contents = LockfileContents {
            sources: &self.sources,
            specs: &specs,
            dependencies: &self.dependencies,
            platforms: &self.platforms,
            ruby_version: ruby.as_ref(),
            bundler_version: Some(&bundler_version),
            unknown_sections: &self.unknown_sections,
        };
        Ok(contents.render(keep_unknown))
    }

    /// Write the lockfile to `path`.
    ///
    /// No-ops when `no_lock` is set or the content is semantically
    /// unchanged. Under frozen mode a content change is logged as an error
    /// and not written; this method never raises for the frozen case.
    pub fn lock(&mut self, path: &Path, preserve_unknown: bool) -> Result<()> {
        if self.context.settings.no_lock {
            debug!("lockfile writing is disabled by settings");
            return Ok(());
        }
        let mut contents = self.to_lock(preserve_unknown)?;
        let existing = io::read_lockfile(path).map_err(|e| BundlerError::LockfileError {
            reason: e.to_string(),
        })?;
        if let Some(existing) = &existing {
            if lockfile::semantically_equal(existing, &contents) {
                debug!(path = %path.display(), "lockfile is unchanged");
                return Ok(());
            }
        }
        if self.context.settings.frozen {
            error!(
                path = %path.display(),
                "cannot write a changed lockfile while frozen; run without frozen mode to update it"
            );
            return Ok(());
        }
        if existing.as_deref().map(lockfile::has_crlf).unwrap_or(false) {
            contents = lockfile::to_crlf(&contents);
        }
        io::atomic_write(path, contents.as_bytes()).map_err(|e| BundlerError::LockfileError {
            reason: e.to_string(),
        })?;
        debug!(path = %path.display(), "lockfile written");
        Ok(())
    }

    /// Frozen-mode equivalence check: raises
    /// [`BundlerError::ProductionError`] with the structured diff when the
    /// gemfile and lockfile have diverged.
    pub fn ensure_equivalent_gemfile_and_lockfile(&self) -> Result<()> {
        let mut diff = FrozenDiff::default();

        for dep in &self.dependencies {
            match self.locked.dependencies.get(&dep.name) {
                None => diff.added.push(format!("{} ({})", dep.name, dep.requirement)),
                Some(locked) => {
                    if locked.requirement != dep.requirement {
                        diff.changed.push(format!(
                            "{} (was {}, now {})",
                            dep.name, locked.requirement, dep.requirement
                        ));
                    } else if locked.source != dep.source {
                        let from = locked
                            .source
                            .map(|id| self.sources.get(id).to_gemfile())
                            .unwrap_or_else(|| "the default source".to_string());
                        let to = dep
                            .source
                            .map(|id| self.sources.get(id).to_gemfile())
                            .unwrap_or_else(|| "the default source".to_string());
                        diff.sources.push(format!("{} (moved from {from} to {to})", dep.name));
                    }
                }
            }
        }
        for locked in self.deleted_deps() {
            diff.deleted.push(format!("{} ({})", locked.name, locked.requirement));
        }
        if self.flags.new_platform {
            diff.platforms.push(self.context.effective_local_platform().to_string());
        }

        if diff.is_empty() {
            Ok(())
        } else {
            Err(BundlerError::ProductionError { diff })
        }
    }

    /// Validate the running ruby against the declared pin and check that
    /// the local platform is covered by the lockfile's platforms.
    pub fn validate_runtime(&self) -> Result<()> {
        if let Some(declared) = &self.ruby_version {
            declared.check(&self.context.ruby_version)?;
        }
        let local = self.context.effective_local_platform();
        let covered = self
            .platforms
            .iter()
            .any(|p| *p == local || (p.is_ruby() && local.is_ruby()) || p.matches(&local));
        if !covered {
            return Err(BundlerError::PlatformMismatch {
                supported: self.platforms.iter().map(ToString::to_string).collect(),
                local: local.to_string(),
            });
        }
        Ok(())
    }

    /// Add a platform to the bundle.
    pub fn add_platform(&mut self, platform: Platform) {
        if !self.platforms.contains(&platform) {
            self.platforms.push(platform);
            self.flags.new_platform = true;
            self.resolved = None;
        }
    }

    /// Remove a platform; fails with [`BundlerError::InvalidOption`] when
    /// it is not in the bundle.
    pub fn remove_platform(&mut self, platform: &Platform) -> Result<()> {
        if let Some(index) = self.platforms.iter().position(|p| p == platform) {
            self.platforms.remove(index);
            self.removed_platform = true;
            self.resolved = None;
            return Ok(());
        }
        Err(BundlerError::InvalidOption {
            message: format!(
                "Unable to remove the platform `{platform}` since the only platforms are {}",
                self.platforms
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
        })
    }

    /// The bundler version that will be recorded in the lockfile.
    pub fn bundler_version_to_lock(&self) -> Version {
        self.resolved_bundler_version
            .clone()
            .or_else(|| self.locked_bundler_version.clone())
            .unwrap_or_else(|| self.context.bundler_version.clone())
    }

    /// The metadata pseudo-gem name for bundler.
    pub fn bundler_name() -> &'static str {
        BUNDLER
    }
}

/// Whether the ruby pin diverged between gemfile and lockfile: presence
/// differs, or both are present and the declaration no longer covers the
/// locked ruby.
fn ruby_pin_diverged(declared: Option<&RubyVersion>, locked: Option<&RubyVersion>) -> bool {
    match (declared, locked) {
        (None, None) => false,
        (Some(declared), Some(locked)) => declared.diff(locked).is_some(),
        _ => true,
    }
}
