//! The resolver driver: resolve gating and materialization.
//!
//! `resolve` decides among three outcomes - reuse the locked set verbatim,
//! reuse a filtered subset, or run the resolver - based on the change
//! flags and the unlock request. `materialize` turns the resolved set into
//! concrete, source-verified specs, looping while the result contains
//! platform-incomplete specs: each iteration deletes the incomplete names
//! from the plan and re-resolves, so the loop either strictly shrinks or
//! raises on the first repeat.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, info};

use crate::core::{BundlerError, Result};
use crate::dependency::Dependency;
use crate::resolver::Resolver;
use crate::source::{Source, BUNDLER};
use crate::spec::Spec;
use crate::spec_set::{Materialized, SpecSet};
use crate::version::Requirement;

use super::Definition;

impl Definition {
    /// Resolve the definition to a spec set. Memoized: the second call
    /// returns the same set without re-running anything.
    pub fn resolve(&mut self) -> Result<SpecSet> {
        if let Some(resolved) = &self.resolved {
            return Ok(resolved.clone());
        }
        let result = if self.context.settings.frozen {
            debug!("frozen mode: using locked specs verbatim");
            self.locked.specs.clone()
        } else if !self.resolution_needed() {
            if !self.deleted_deps().is_empty()
                || self.removed_platform
                || self.may_include_redundant_platform_specific_gems
            {
                debug!("nothing changed; reusing a filtered subset of the locked specs");
                SpecSet::from_specs(self.locked.specs.for_dependencies(
                    &self.dependencies,
                    false,
                    &self.platforms,
                ))
            } else {
                debug!("nothing changed; reusing locked specs verbatim");
                self.locked.specs.clone()
            }
        } else {
            info!(reason = %self.change_reason(), "resolving dependencies");
            self.start_resolution()?
        };
        self.resolved = Some(result.clone());
        Ok(result)
    }

    /// Whether the resolver must run: something changed, or an unlock
    /// bypasses the no-op optimization.
    fn resolution_needed(&self) -> bool {
        self.unlock.unlocking() || !self.flags.nothing_changed()
    }

    /// Run the resolver over a fresh plan and filter the result down to
    /// the declared dependency closure.
    pub(crate) fn start_resolution(&mut self) -> Result<SpecSet> {
        let plan = self.resolution_plan()?;
        let raw = {
            let resolver = Resolver::new(&plan, &self.sources);
            resolver.start()?
        };
        if let Some(bundler) = raw.iter().find(|s| s.name == BUNDLER) {
            self.resolved_bundler_version = Some(bundler.version.clone());
        }
        let set = SpecSet::from_specs(raw);
        Ok(SpecSet::from_specs(set.for_dependencies(
            &self.dependencies,
            false,
            &self.platforms,
        )))
    }

    /// Materialize `deps` into concrete specs.
    ///
    /// Missing specs fail with [`BundlerError::GemNotFound`], telling a
    /// locked-then-removed version apart from a gem no source knows.
    /// Platform-incomplete specs drive the delete-and-re-resolve loop;
    /// two identical consecutive incomplete sets raise through the
    /// resolver. The bundler pseudo-spec is injected into the final set.
    pub(crate) fn materialize_specs(&mut self, deps: &[Dependency]) -> Result<SpecSet> {
        let resolved = self.resolve()?;
        let mut materialized = resolved.materialize(deps, &self.platforms);
        self.verify_against_sources(&mut materialized);
        self.fail_on_missing(&materialized)?;

        let mut previous: Option<BTreeSet<String>> = None;
        while !materialized.incomplete.is_empty() {
            let names: BTreeSet<String> =
                materialized.incomplete.iter().map(|s| s.name.clone()).collect();
            if previous.as_ref() == Some(&names) {
                let first = names.iter().next().expect("non-empty incomplete set");
                let plan = self.resolution_plan()?;
                let resolver = Resolver::new(&plan, &self.sources);
                return Err(resolver.not_found_error(first));
            }
            debug!(incomplete = ?names, "re-resolving for platform-incomplete specs");
            previous = Some(names.clone());

            // Delete the incomplete entries from the plan inputs so the
            // next pass re-derives them for every platform.
            let doomed: Vec<String> = names.into_iter().collect();
            self.locked.specs.delete_names(&doomed);
            self.original_locked_specs.delete_names(&doomed);

            let resolved = self.start_resolution()?;
            self.resolved = Some(resolved.clone());
            materialized = resolved.materialize(deps, &self.platforms);
            self.verify_against_sources(&mut materialized);
            self.fail_on_missing(&materialized)?;
        }

        let mut specs = materialized.specs;
        let metadata = self.sources.metadata_source();
        specs.push(Spec::new(BUNDLER, self.bundler_version_to_lock(), metadata));
        Ok(specs)
    }

    /// Confirm each materialized spec still exists in its source's index;
    /// specs that vanished move to the missing list. Sources with empty
    /// indexes have not been consulted and are skipped, as is the
    /// synthetic metadata source.
    fn verify_against_sources(&self, materialized: &mut Materialized) {
        let mut vanished: Vec<Spec> = Vec::new();
        for spec in materialized.specs.iter() {
            if matches!(self.sources.get(spec.source), Source::Metadata(_)) {
                continue;
            }
            let index = self.sources.specs(spec.source);
            if index.is_empty() {
                continue;
            }
            if index.find(&spec.name, &spec.version, &spec.platform).is_none() {
                vanished.push(spec.clone());
            }
        }
        for spec in vanished {
            debug!(spec = %spec.full_name(), "locked spec is gone from its source");
            let mut dep = Dependency::new(spec.name.clone(), Requirement::exact(&spec.version));
            dep.source = Some(spec.source);
            materialized.specs.delete(&[spec]);
            materialized.missing.push(dep);
        }
    }

    /// Turn a non-empty missing list into the right [`GemNotFound`]
    /// flavor.
    ///
    /// [`GemNotFound`]: BundlerError::GemNotFound
    fn fail_on_missing(&self, materialized: &Materialized) -> Result<()> {
        if materialized.missing.is_empty() {
            return Ok(());
        }
        if !self.context.settings.local {
            // A locked version that the source used to have: the author
            // removed it.
            for dep in &materialized.missing {
                let locked = self
                    .original_locked_specs
                    .get(&dep.name)
                    .into_iter()
                    .find(|s| dep.requirement.matches(&s.version));
                if let Some(locked) = locked {
                    return Err(BundlerError::gem_yanked(
                        &dep.name,
                        &locked.version,
                        &self.sources.get(locked.source).to_gemfile(),
                    ));
                }
            }
        }
        let mut by_source: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for dep in &materialized.missing {
            let label = dep
                .source
                .map(|id| self.sources.get(id).to_gemfile())
                .or_else(|| {
                    self.sources
                        .default_source()
                        .map(|id| self.sources.get(id).to_gemfile())
                })
                .unwrap_or_else(|| "any of the sources".to_string());
            by_source
                .entry(label)
                .or_default()
                .push(format!("{} ({})", dep.name, dep.requirement));
        }
        let grouped: Vec<(String, Vec<String>)> = by_source.into_iter().collect();
        Err(BundlerError::gems_unknown(&grouped))
    }
}
