//! Resolution planning: assembling resolver inputs.
//!
//! The planner turns converged definition state into a [`ResolutionPlan`]:
//! the per-package source routing, the expanded dependency list with
//! synthetic runtime metadata deps, base-version floors for specs dropped
//! during convergence, the platform set, the final unlock set, and the
//! pre-mutation locked snapshot as a resolver hint.

use std::collections::{BTreeSet, HashMap};

use tracing::debug;

use crate::core::Result;
use crate::dependency::Dependency;
use crate::platform::Platform;
use crate::source::map::SourceMap;
use crate::source::{
    AggregateSource, Source, SourceId, BUNDLER, RUBYGEMS_METADATA, RUBY_METADATA,
};
use crate::spec::Spec;
use crate::spec_set::SpecSet;
use crate::version::{parse_version, Requirement};

use super::Definition;

/// Everything the resolver needs for one resolution pass.
#[derive(Debug, Clone)]
pub struct ResolutionPlan {
    /// Per-package source routing; packages not listed fall back to
    /// `default_source`.
    pub source_requirements: HashMap<String, SourceId>,
    /// Fallback source for unrouted packages.
    pub default_source: SourceId,
    /// The natural source for bundler itself, recorded so the resolver
    /// can fall back to the best available version.
    pub default_bundler: SourceId,
    /// Declared dependencies plus synthetic metadata deps, and a bundler
    /// constraint when bundler itself is unlocking.
    pub dependencies: Vec<Dependency>,
    /// `>= locked_version` floors for specs dropped during convergence.
    pub base_requirements: HashMap<String, Requirement>,
    /// Platforms the resolution must cover.
    pub platforms: Vec<Platform>,
    /// Final (expanded) unlock set.
    pub unlock_gems: BTreeSet<String>,
    /// The pre-mutation locked snapshot, used to hold versions of gems
    /// that are not unlocking.
    pub locked_specs: SpecSet,
    /// Prefer locally cached variants when picking versions.
    pub prefer_local: bool,
}

impl Definition {
    /// Build the resolver inputs for the current state.
    pub(crate) fn resolution_plan(&mut self) -> Result<ResolutionPlan> {
        let metadata_id = self.prepare_metadata_source();

        let (mut source_requirements, default_source) = self.plan_source_requirements()?;
        let default_bundler = default_source;
        source_requirements.insert(BUNDLER.to_string(), metadata_id);
        source_requirements.insert(RUBY_METADATA.to_string(), metadata_id);
        source_requirements.insert(RUBYGEMS_METADATA.to_string(), metadata_id);

        let dependencies = self.expanded_dependencies()?;
        let base_requirements = self.base_requirements();

        debug!(
            routed = source_requirements.len(),
            deps = dependencies.len(),
            unlocking = self.unlock.gems.len(),
            "resolution plan assembled"
        );
        Ok(ResolutionPlan {
            source_requirements,
            default_source,
            default_bundler,
            dependencies,
            base_requirements,
            platforms: self.platforms.clone(),
            unlock_gems: self.unlock.gems.clone(),
            locked_specs: self.original_locked_specs.clone(),
            prefer_local: self.context.settings.prefer_local,
        })
    }

    /// Source routing. When every non-default rubygems source exposes the
    /// dependency API, fine-grained per-name routing is used; otherwise an
    /// aggregate over all rubygems remotes becomes the default and only
    /// explicit declarations stay routed. Offline mode overlays the locked
    /// routing on top.
    fn plan_source_requirements(&mut self) -> Result<(HashMap<String, SourceId>, SourceId)> {
        let default = self.sources.default_source();
        let aggregate_present = self
            .sources
            .iter()
            .any(|(_, s)| matches!(s, Source::Aggregate(_)));
        let fine_grained = !aggregate_present
            && self.sources.rubygems_sources().into_iter().all(|id| {
                if Some(id) == default {
                    return true;
                }
                matches!(self.sources.get(id), Source::Rubygems(s) if s.dependency_api)
            });

        let (mut requirements, default_source) = {
            let map = SourceMap::new(&self.sources, &self.dependencies, &self.locked.specs);
            if fine_grained {
                let all = map.all_requirements()?;
                (all, None)
            } else {
                (map.direct_requirements()?, Some(self.aggregate_members()))
            }
        };

        if self.context.settings.local {
            let map = SourceMap::new(&self.sources, &self.dependencies, &self.locked.specs);
            for (name, source) in map.locked_requirements() {
                requirements.insert(name, source);
            }
        }

        let default_source = match default_source {
            Some(members) => self.sources.add(Source::Aggregate(AggregateSource { members })),
            None => default.unwrap_or_else(|| self.sources.metadata_source()),
        };
        Ok((requirements, default_source))
    }

    fn aggregate_members(&self) -> Vec<SourceId> {
        self.sources.rubygems_sources()
    }

    /// Declared dependencies plus the synthetic runtime metadata deps, with
    /// a bundler constraint prepended when bundler itself is unlocking.
    fn expanded_dependencies(&self) -> Result<Vec<Dependency>> {
        let mut deps = self.dependencies.clone();

        let ruby = self
            .context
            .ruby_version
            .versions
            .first()
            .map(|v| parse_version(v))
            .transpose()?
            .unwrap_or_else(|| semver::Version::new(0, 0, 0));
        deps.push(Dependency::new(RUBY_METADATA, Requirement::exact(&ruby)));
        deps.push(Dependency::new(
            RUBYGEMS_METADATA,
            Requirement::exact(&self.context.rubygems_version),
        ));

        if let Some(target) = &self.unlock.bundler {
            deps.insert(0, Dependency::new(BUNDLER, Requirement::parse(target)?));
        }
        Ok(deps)
    }

    /// Floors for specs that were locked before convergence but are gone
    /// now: unrelated transitive deps must not silently downgrade. Path
    /// sources are skipped - their versions track the filesystem.
    fn base_requirements(&self) -> HashMap<String, Requirement> {
        let mut floors = HashMap::new();
        for spec in self.original_locked_specs.iter() {
            if self.sources.get(spec.source).is_path_source() {
                continue;
            }
            if self.locked.specs.get(&spec.name).is_empty() {
                floors
                    .entry(spec.name.clone())
                    .or_insert_with(|| Requirement::at_least(&spec.version));
            }
        }
        floors
    }

    /// Populate the metadata source with pseudo-specs for the running
    /// ruby, rubygems, and bundler (plus the requested bundler version
    /// when one is being targeted).
    fn prepare_metadata_source(&mut self) -> SourceId {
        let ruby = self
            .context
            .ruby_version
            .versions
            .first()
            .and_then(|v| parse_version(v).ok())
            .unwrap_or_else(|| semver::Version::new(0, 0, 0));
        let rubygems = self.context.rubygems_version.clone();
        let bundler = self.context.bundler_version.clone();
        let target_bundler = self
            .unlock
            .bundler
            .as_deref()
            .and_then(|v| parse_version(v).ok());

        let id = self.sources.metadata_source();
        if let Some(specs) = self.sources.get_mut(id).own_specs_mut() {
            *specs = SpecSet::new();
            specs.push(Spec::new(RUBY_METADATA, ruby, id));
            specs.push(Spec::new(RUBYGEMS_METADATA, rubygems, id));
            specs.push(Spec::new(BUNDLER, bundler, id));
            if let Some(version) = target_bundler {
                specs.push(Spec::new(BUNDLER, version, id));
            }
        }
        id
    }
}
