//! Deterministic version resolution.
//!
//! The driver hands the resolver a [`ResolutionPlan`] and expects back a
//! consistent spec list. Resolution here is deliberately simple - collect
//! requirements, pick the best satisfying version per name, restart when a
//! later-discovered requirement invalidates an earlier choice - because
//! the definition core only depends on the interface: `start` returns
//! specs or a [`BundlerError::SolveFailure`] naming the offending package.
//!
//! Choice order per package:
//! 1. The locked version, when the package is not being unlocked and the
//!    locked version still satisfies every requirement.
//! 2. Otherwise the highest satisfying version, honoring base-requirement
//!    floors recorded by the planner.
//!
//! Every platform variant of the chosen version that is installable on one
//! of the plan's platforms is emitted, so the materialization step can pick
//! per-platform builds.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use semver::Version;
use tracing::debug;

use crate::core::{BundlerError, Result};
use crate::definition::planner::ResolutionPlan;
use crate::source::{SourceId, SourceList};
use crate::spec::Spec;
use crate::version::Requirement;

/// Upper bound on constraint-discovery restarts. Each restart adds at
/// least one constraint, so hitting this means a requirement cycle the
/// simple strategy cannot satisfy.
const MAX_ROUNDS: usize = 64;

/// Resolver over a plan and the definition's source registry.
pub struct Resolver<'a> {
    plan: &'a ResolutionPlan,
    sources: &'a SourceList,
}

impl<'a> Resolver<'a> {
    /// Create a resolver for one resolution pass.
    pub fn new(plan: &'a ResolutionPlan, sources: &'a SourceList) -> Self {
        Self { plan, sources }
    }

    /// Run resolution to completion.
    pub fn start(&self) -> Result<Vec<Spec>> {
        let mut constraints: BTreeMap<String, Vec<Requirement>> = BTreeMap::new();
        for dep in &self.plan.dependencies {
            constraints
                .entry(dep.name.clone())
                .or_default()
                .push(dep.requirement.clone());
        }

        for round in 0..MAX_ROUNDS {
            match self.attempt(&constraints)? {
                Attempt::Complete(specs) => {
                    debug!(round, specs = specs.len(), "resolution complete");
                    return Ok(specs);
                }
                Attempt::Retry(extra) => {
                    for (name, requirement) in extra {
                        let entry = constraints.entry(name).or_default();
                        if !entry.contains(&requirement) {
                            entry.push(requirement);
                        }
                    }
                }
            }
        }
        Err(BundlerError::SolveFailure {
            name: "(bundle)".to_string(),
            details: "constraint discovery did not converge".to_string(),
        })
    }

    /// The error the driver raises when materialization cannot make
    /// progress on `name`.
    pub fn not_found_error(&self, name: &str) -> BundlerError {
        let source = self.source_for(name);
        BundlerError::SolveFailure {
            name: display_name(name).to_string(),
            details: format!(
                "no version satisfying {} could be found in {}",
                self.requirement_summary(name),
                self.sources.get(source).to_gemfile()
            ),
        }
    }

    fn requirement_summary(&self, name: &str) -> String {
        let reqs: Vec<String> = self
            .plan
            .dependencies
            .iter()
            .filter(|d| d.name == name)
            .map(|d| d.requirement.to_string())
            .collect();
        if reqs.is_empty() {
            Requirement::any().to_string()
        } else {
            reqs.join(" and ")
        }
    }

    fn source_for(&self, name: &str) -> SourceId {
        self.plan
            .source_requirements
            .get(name)
            .copied()
            .unwrap_or(self.plan.default_source)
    }

    fn attempt(&self, constraints: &BTreeMap<String, Vec<Requirement>>) -> Result<Attempt> {
        let mut queue: VecDeque<String> = self.plan.dependencies.iter().map(|d| d.name.clone()).collect();
        let mut handled: HashSet<String> = HashSet::new();
        let mut chosen_versions: HashMap<String, Version> = HashMap::new();
        let mut result: Vec<Spec> = Vec::new();
        let mut discovered: Vec<(String, Requirement)> = Vec::new();

        while let Some(name) = queue.pop_front() {
            if !handled.insert(name.clone()) {
                continue;
            }
            let requirements: Vec<Requirement> = constraints.get(&name).cloned().unwrap_or_default();
            let picked = self.choose(&name, &requirements)?;
            chosen_versions.insert(name.clone(), picked[0].version.clone());
            for spec in &picked {
                for dep in spec.runtime_dependencies() {
                    if let Some(version) = chosen_versions.get(&dep.name) {
                        if !dep.requirement.matches(version) {
                            // A later requirement invalidates an earlier
                            // choice; restart with it recorded.
                            discovered.push((dep.name.clone(), dep.requirement.clone()));
                            continue;
                        }
                    }
                    let known = constraints
                        .get(&dep.name)
                        .map(|reqs| reqs.contains(&dep.requirement))
                        .unwrap_or(false);
                    if !known {
                        discovered.push((dep.name.clone(), dep.requirement.clone()));
                    }
                    queue.push_back(dep.name.clone());
                }
            }
            result.extend(picked);
        }

        if discovered.is_empty() {
            Ok(Attempt::Complete(result))
        } else {
            Ok(Attempt::Retry(discovered))
        }
    }

    /// Pick the version of `name` to use and return every platform variant
    /// of it that the plan's platforms can install.
    ///
    /// Bundler itself gets a second chance: when the metadata source has
    /// no satisfying version, the natural default source is consulted for
    /// the best available one.
    fn choose(&self, name: &str, requirements: &[Requirement]) -> Result<Vec<Spec>> {
        let source = self.source_for(name);
        match self.choose_from(name, requirements, source) {
            Ok(specs) => Ok(specs),
            Err(err) if name == crate::source::BUNDLER && source != self.plan.default_bundler => {
                self.choose_from(name, requirements, self.plan.default_bundler)
                    .map_err(|_| err)
            }
            Err(err) => Err(err),
        }
    }

    fn choose_from(
        &self,
        name: &str,
        requirements: &[Requirement],
        source: SourceId,
    ) -> Result<Vec<Spec>> {
        let index = self.sources.specs(source);
        let mut candidates: Vec<&Spec> = index.get(name);

        if self.plan.prefer_local {
            if let crate::source::Source::Rubygems(gems) = self.sources.get(source) {
                if !gems.local_specs.get(name).is_empty() {
                    let local: Vec<&Spec> = candidates
                        .iter()
                        .copied()
                        .filter(|s| {
                            gems.local_specs
                                .find(&s.name, &s.version, &s.platform)
                                .is_some()
                        })
                        .collect();
                    if !local.is_empty() {
                        candidates = local;
                    }
                }
            }
        }

        let floor = self.plan.base_requirements.get(name);
        let satisfies = |version: &Version| {
            requirements.iter().all(|r| r.matches(version))
                && floor.map(|f| f.matches(version)).unwrap_or(true)
        };

        let mut versions: Vec<Version> = candidates
            .iter()
            .map(|s| s.version.clone())
            .filter(|v| satisfies(v))
            .collect();
        versions.sort();
        versions.dedup();

        let version = if versions.is_empty() {
            return Err(self.unsatisfiable(name, requirements, source));
        } else if !self.plan.unlock_gems.contains(name) {
            // Hold the locked version when it still satisfies.
            let locked = self
                .plan
                .locked_specs
                .get(name)
                .first()
                .map(|s| s.version.clone());
            match locked {
                Some(locked_version) if versions.contains(&locked_version) => locked_version,
                _ => versions.pop().expect("non-empty versions"),
            }
        } else {
            versions.pop().expect("non-empty versions")
        };

        let variants: Vec<Spec> = candidates
            .iter()
            .filter(|s| s.version == version)
            .filter(|s| {
                self.plan.platforms.is_empty()
                    || self.plan.platforms.iter().any(|p| s.installable_on(p))
            })
            .map(|s| (*s).clone())
            .collect();
        if variants.is_empty() {
            return Err(self.unsatisfiable(name, requirements, source));
        }
        Ok(variants)
    }

    fn unsatisfiable(
        &self,
        name: &str,
        requirements: &[Requirement],
        source: SourceId,
    ) -> BundlerError {
        let rendered: Vec<String> = requirements.iter().map(ToString::to_string).collect();
        BundlerError::SolveFailure {
            name: display_name(name).to_string(),
            details: format!(
                "required {} but no such version exists in {}",
                if rendered.is_empty() {
                    Requirement::any().to_string()
                } else {
                    rendered.join(", ")
                },
                self.sources.get(source).to_gemfile()
            ),
        }
    }
}

enum Attempt {
    Complete(Vec<Spec>),
    Retry(Vec<(String, Requirement)>),
}

/// Strip the NUL marker from synthetic metadata package names for display.
fn display_name(name: &str) -> &str {
    name.trim_end_matches('\0')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::planner::ResolutionPlan;
    use crate::dependency::Dependency;
    use crate::platform::Platform;
    use crate::source::{RubygemsSource, Source, SourceList};
    use crate::spec_set::SpecSet;
    use crate::version::parse_version;
    use std::collections::BTreeSet;

    fn setup(specs: Vec<Spec>) -> (SourceList, SourceId) {
        let mut sources = SourceList::new();
        let id = sources.add(Source::Rubygems(RubygemsSource {
            remotes: vec!["https://gems.example".into()],
            ..RubygemsSource::default()
        }));
        for spec in specs {
            sources.get_mut(id).own_specs_mut().unwrap().push(spec);
        }
        (sources, id)
    }

    fn plan(deps: Vec<Dependency>, default_source: SourceId) -> ResolutionPlan {
        ResolutionPlan {
            source_requirements: HashMap::new(),
            default_source,
            default_bundler: default_source,
            dependencies: deps,
            base_requirements: HashMap::new(),
            platforms: vec![Platform::Ruby],
            unlock_gems: BTreeSet::new(),
            locked_specs: SpecSet::new(),
            prefer_local: false,
        }
    }

    fn gem(name: &str, version: &str, source: SourceId) -> Spec {
        Spec::new(name, parse_version(version).unwrap(), source)
    }

    #[test]
    fn picks_highest_satisfying_version() {
        let (sources, id) = setup(vec![]);
        let (sources, id) = {
            let mut s = sources;
            for v in ["1.0.3", "1.0.4", "2.0.0"] {
                s.get_mut(id).own_specs_mut().unwrap().push(gem("foo", v, id));
            }
            (s, id)
        };
        let plan = plan(
            vec![Dependency::new("foo", Requirement::parse("~> 1.0").unwrap())],
            id,
        );
        let result = Resolver::new(&plan, &sources).start().unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].version, Version::new(1, 0, 4));
    }

    #[test]
    fn holds_locked_version_unless_unlocked() {
        let (sources, id) = setup(vec![]);
        let (sources, id) = {
            let mut s = sources;
            for v in ["1.0.3", "1.0.4"] {
                s.get_mut(id).own_specs_mut().unwrap().push(gem("foo", v, id));
            }
            (s, id)
        };
        let mut p = plan(vec![Dependency::new("foo", Requirement::any())], id);
        p.locked_specs.push(gem("foo", "1.0.3", id));

        let held = Resolver::new(&p, &sources).start().unwrap();
        assert_eq!(held[0].version, Version::new(1, 0, 3));

        p.unlock_gems.insert("foo".to_string());
        let unlocked = Resolver::new(&p, &sources).start().unwrap();
        assert_eq!(unlocked[0].version, Version::new(1, 0, 4));
    }

    #[test]
    fn transitive_requirements_narrow_earlier_choices() {
        let (sources, id) = setup(vec![]);
        let (sources, id) = {
            let mut s = sources;
            let specs = s.get_mut(id).own_specs_mut().unwrap();
            specs.push(gem("lib", "2.0.0", id));
            specs.push(gem("lib", "1.5.0", id));
            specs.push(
                gem("app", "1.0.0", id).with_dependencies(vec![Dependency::new(
                    "lib",
                    Requirement::parse("< 2.0").unwrap(),
                )]),
            );
            (s, id)
        };
        let plan = plan(
            vec![
                Dependency::new("lib", Requirement::any()),
                Dependency::new("app", Requirement::any()),
            ],
            id,
        );
        let result = Resolver::new(&plan, &sources).start().unwrap();
        let lib = result.iter().find(|s| s.name == "lib").unwrap();
        assert_eq!(lib.version, Version::new(1, 5, 0));
    }

    #[test]
    fn base_requirement_floors_prevent_downgrades() {
        let (sources, id) = setup(vec![]);
        let (sources, id) = {
            let mut s = sources;
            for v in ["0.9.0", "1.2.0"] {
                s.get_mut(id).own_specs_mut().unwrap().push(gem("foo", v, id));
            }
            (s, id)
        };
        let mut p = plan(vec![Dependency::new("foo", Requirement::any())], id);
        p.base_requirements.insert(
            "foo".to_string(),
            Requirement::at_least(&Version::new(1, 0, 0)),
        );
        let result = Resolver::new(&p, &sources).start().unwrap();
        assert_eq!(result[0].version, Version::new(1, 2, 0));
    }

    #[test]
    fn unsatisfiable_requirement_is_a_solve_failure() {
        let (sources, id) = setup(vec![]);
        let (sources, id) = {
            let mut s = sources;
            s.get_mut(id).own_specs_mut().unwrap().push(gem("foo", "1.0.0", id));
            (s, id)
        };
        let plan = plan(
            vec![Dependency::new("foo", Requirement::parse(">= 9.0").unwrap())],
            id,
        );
        let err = Resolver::new(&plan, &sources).start().unwrap_err();
        match err {
            BundlerError::SolveFailure { name, .. } => assert_eq!(name, "foo"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn emits_all_installable_platform_variants() {
        let linux = Platform::parse("x86_64-linux");
        let (sources, id) = setup(vec![]);
        let (sources, id) = {
            let mut s = sources;
            let specs = s.get_mut(id).own_specs_mut().unwrap();
            specs.push(gem("nokogiri", "1.15.0", id));
            specs.push(gem("nokogiri", "1.15.0", id).for_platform(linux.clone()));
            specs.push(gem("nokogiri", "1.15.0", id).for_platform(Platform::parse("arm64-darwin")));
            (s, id)
        };
        let mut p = plan(vec![Dependency::new("nokogiri", Requirement::any())], id);
        p.platforms = vec![Platform::Ruby, linux];
        let result = Resolver::new(&p, &sources).start().unwrap();
        assert_eq!(result.len(), 2);
    }
}
