//! The convergence engine: reconciling gemfile truth with lockfile truth.
//!
//! Convergence executes a fixed seven-step sequence during definition
//! construction. Each step may raise change flags and mutate the locked
//! state; steps run in order and flags are monotonic, so the outcome does
//! not depend on dependency iteration order. Source probe failures during
//! change detection are swallowed and treated as "not changed" - the fetch
//! is retried during resolution, where a real error is raised.

use std::path::PathBuf;
use tracing::debug;

use crate::core::Result;
use crate::dependency::Dependency;
use crate::platform::Platform;
use crate::source::{Source, SourceId};
use crate::version::Requirement;

use super::Definition;

impl Definition {
    /// Run convergence steps 1-7.
    pub(crate) fn converge(&mut self) -> Result<()> {
        self.promote_path_sources_to_gemspec();
        self.detect_path_changes();
        self.converge_sources();
        self.expand_unlocked_gems();
        self.converge_dependencies();
        self.apply_local_overrides();
        self.adjust_platforms();
        Ok(())
    }

    /// Step 1: a locked bare path source whose directory the manifest now
    /// declares as a gemspec source is rewritten to the gemspec variant -
    /// uniformly across locked sources, spec back-references, and locked
    /// dependency back-references. Gemspec sources are path sources plus
    /// metadata; the manifest's view wins.
    fn promote_path_sources_to_gemspec(&mut self) {
        let mut remap: Vec<(SourceId, SourceId)> = Vec::new();
        for &locked_id in &self.locked.sources {
            let Source::Path(path) = self.sources.get(locked_id) else {
                continue;
            };
            let directory = path.path.clone();
            let promoted = self.manifest_source_ids.iter().copied().find(|&id| {
                matches!(self.sources.get(id), Source::Gemspec(g) if g.path == directory)
            });
            if let Some(gemspec_id) = promoted {
                remap.push((locked_id, gemspec_id));
            }
        }
        for (from, to) in remap {
            debug!(?from, ?to, "promoting locked path source to gemspec");
            for id in &mut self.locked.sources {
                if *id == from {
                    *id = to;
                }
            }
            for spec in self.locked.specs.iter_mut() {
                if spec.source == from {
                    spec.source = to;
                }
            }
            for dep in self.locked.dependencies.values_mut() {
                if dep.source == Some(from) {
                    dep.source = Some(to);
                }
            }
        }
    }

    /// Step 2: flag `path_changes` when any manifest path or gemspec
    /// source diverged from its locked counterpart.
    fn detect_path_changes(&mut self) {
        let ids: Vec<SourceId> = self
            .manifest_source_ids
            .iter()
            .copied()
            .filter(|&id| self.sources.get(id).is_path_source())
            .collect();
        let mut changed = false;
        for id in ids {
            changed |= self.specs_changed(id);
        }
        if changed {
            self.flags.path_changes = true;
        }
    }

    /// Whether a source's state diverged from the lock: the lock lacks the
    /// source, the dependency list routed to it differs, or its spec index
    /// no longer matches the locked projection. Probe errors are treated
    /// as unchanged.
    pub(crate) fn specs_changed(&self, id: SourceId) -> bool {
        match self.try_specs_changed(id) {
            Ok(changed) => changed,
            Err(err) => {
                debug!(error = %err, "source probe failed; treating as unchanged");
                false
            }
        }
    }

    fn try_specs_changed(&self, id: SourceId) -> Result<bool> {
        if !self.locked.sources.contains(&id) {
            return Ok(true);
        }

        let mut declared: Vec<&str> = self
            .dependencies
            .iter()
            .filter(|d| d.source == Some(id))
            .map(|d| d.name.as_str())
            .collect();
        declared.sort_unstable();
        declared.dedup();
        let mut locked: Vec<&str> = self
            .locked
            .dependencies
            .values()
            .filter(|d| d.source == Some(id))
            .map(|d| d.name.as_str())
            .collect();
        locked.sort_unstable();
        locked.dedup();
        if declared != locked {
            return Ok(true);
        }

        let index = self.sources.get(id).own_specs().cloned().unwrap_or_default();
        let mut current: Vec<String> = index.iter().map(|s| s.full_name()).collect();
        current.sort_unstable();
        let mut projection: Vec<String> = self
            .locked
            .specs
            .iter()
            .filter(|s| s.source == id)
            .map(|s| s.full_name())
            .collect();
        projection.sort_unstable();
        Ok(current != projection)
    }

    /// Step 3: equal manifest and lockfile sources were already merged at
    /// parse time with locked revisions preserved; what remains is to
    /// unlock every unlockable source the request names.
    fn converge_sources(&mut self) {
        let ids: Vec<SourceId> = self.sources.iter().map(|(id, _)| id).collect();
        for id in ids {
            let named = {
                let source = self.sources.get(id);
                source.supports_unlock() && self.unlock.names_source(source)
            };
            if named {
                self.sources.get_mut(id).unlock();
                self.flags.source_changes = true;
            }
        }
    }

    /// Step 4: conservative mode unlocks exactly the declared names;
    /// otherwise requested names are expanded through the locked graph so
    /// unlocking a gem also unlocks everything reachable from it.
    fn expand_unlocked_gems(&mut self) {
        if self.unlock.conservative {
            let declared: Vec<String> = self.dependencies.iter().map(|d| d.name.clone()).collect();
            self.unlock.gems.extend(declared);
            return;
        }
        if self.unlock.gems.is_empty() {
            return;
        }
        let roots: Vec<Dependency> = self
            .unlock
            .gems
            .iter()
            .map(|name| {
                self.dependencies
                    .iter()
                    .find(|d| d.name == *name)
                    .cloned()
                    .unwrap_or_else(|| Dependency::new(name.clone(), Requirement::any()))
            })
            .collect();
        let reachable = self
            .locked
            .specs
            .for_dependencies(&roots, false, &self.platforms);
        self.unlock.gems.extend(reachable.into_iter().map(|s| s.name));
    }

    /// Step 5: flag `dependency_changes` when a declared dependency has no
    /// locked counterpart or its requirement or source moved. Skipped when
    /// unlocking everything - there is no locked state to compare against.
    ///
    /// The dependency type is not compared: lockfiles do not record it, so
    /// equality between declared and locked dependencies excludes it by
    /// construction.
    fn converge_dependencies(&mut self) {
        if self.unlock.all {
            return;
        }
        let mut changed = false;
        for dep in &self.dependencies {
            match self.locked.dependencies.get(&dep.name) {
                None => changed = true,
                Some(locked) => {
                    if locked.requirement != dep.requirement || locked.source != dep.source {
                        changed = true;
                    }
                }
            }
        }
        if changed {
            self.flags.dependency_changes = true;
        }
    }

    /// Step 6: apply user-configured local overrides. The named gem's
    /// source is unlocked when the gem is in the unlock set, then the
    /// override is applied; `local_changes` is raised when any override
    /// changed a source or the overridden source's specs diverged.
    fn apply_local_overrides(&mut self) {
        let overrides: Vec<(String, PathBuf)> = self
            .context
            .settings
            .local_overrides
            .iter()
            .map(|(name, path)| (name.clone(), path.clone()))
            .collect();
        let mut changed = false;
        for (name, path) in overrides {
            let source_id = self
                .dependencies
                .iter()
                .find(|d| d.name == name)
                .and_then(|d| d.source)
                .or_else(|| self.locked.specs.get(&name).first().map(|s| s.source));
            let Some(id) = source_id else {
                debug!(gem = %name, "local override names a gem with no known source");
                continue;
            };
            if !self.sources.get(id).supports_local_override() {
                continue;
            }
            if self.unlock.gems.contains(&name) {
                self.sources.get_mut(id).unlock();
            }
            let overridden = self.sources.get_mut(id).set_local_override(&path);
            changed |= overridden || self.specs_changed(id);
        }
        if changed {
            self.flags.local_changes = true;
        }
    }

    /// Step 7: ensure the local platform is covered, and retire a stale
    /// generic platform.
    ///
    /// When not frozen and no recorded platform covers the local one, the
    /// local platform is added and `new_platform` raised. Conversely, when
    /// the generic ruby platform is recorded but the bundle is running on
    /// a specific platform and the locked set has gems with no generic
    /// build, the generic platform is dropped in favor of the local one.
    fn adjust_platforms(&mut self) {
        if self.context.settings.frozen {
            return;
        }
        let local = self.context.effective_local_platform();
        let covered = self.platforms.iter().any(|p| *p == local || p.matches(&local));
        if !covered {
            self.platforms.push(local.clone());
            self.flags.new_platform = true;
        }

        if !local.is_ruby() && self.platforms.contains(&Platform::Ruby) {
            let generic_is_stale = !self.locked.specs.is_empty()
                && self
                    .locked
                    .specs
                    .names()
                    .iter()
                    .any(|name| {
                        self.locked
                            .specs
                            .get(name)
                            .iter()
                            .all(|s| !s.platform.is_ruby())
                    });
            if generic_is_stale {
                debug!("locked set has no generic builds; replacing ruby platform with local");
                self.platforms.retain(|p| !p.is_ruby());
                self.removed_platform = true;
                if !self.platforms.contains(&local) {
                    self.platforms.push(local);
                }
            }
        }
    }
}
