//! Ordered, queryable sets of resolved specs.
//!
//! [`SpecSet`] is the container the whole definition core trades in: the
//! lockfile parses into one, the resolver produces one, and materialization
//! filters one down to the specs a bundle actually needs. Within a set the
//! `(name, version, platform)` triple is unique; a name may appear several
//! times with different versions or platform builds.

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{HashMap, HashSet, VecDeque};

use crate::dependency::Dependency;
use crate::platform::Platform;
use crate::spec::Spec;

/// An ordered collection of [`Spec`]s with set algebra and platform-aware
/// queries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpecSet {
    specs: Vec<Spec>,
}

/// Result of materializing a dependency list against a [`SpecSet`].
#[derive(Debug, Clone, Default)]
pub struct Materialized {
    /// Concrete specs in dependency order.
    pub specs: SpecSet,
    /// Dependencies for which no spec of that name exists at all.
    pub missing: Vec<Dependency>,
    /// Specs that exist but not for a platform the bundle must cover.
    pub incomplete: Vec<Spec>,
}

impl SpecSet {
    /// An empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a list, dropping later duplicates of the same identity.
    pub fn from_specs(specs: Vec<Spec>) -> Self {
        let mut set = Self::new();
        for spec in specs {
            set.push(spec);
        }
        set
    }

    /// Insert a spec unless an identical `(name, version, platform)` is
    /// already present.
    pub fn push(&mut self, spec: Spec) {
        if !self.specs.iter().any(|s| s.same_identity(&spec)) {
            self.specs.push(spec);
        }
    }

    /// All specs sharing `name`, in insertion order.
    pub fn get(&self, name: &str) -> Vec<&Spec> {
        self.specs.iter().filter(|s| s.name == name).collect()
    }

    /// The spec with an exact identity, if present.
    pub fn find(&self, name: &str, version: &semver::Version, platform: &Platform) -> Option<&Spec> {
        self.specs
            .iter()
            .find(|s| s.name == name && &s.version == version && &s.platform == platform)
    }

    /// Iterate in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Spec> {
        self.specs.iter()
    }

    /// Mutable iteration, for source-handle rewrites during convergence.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Spec> {
        self.specs.iter_mut()
    }

    /// Number of specs.
    pub fn len(&self) -> usize {
        self.specs.len()
    }

    /// True when no specs are present.
    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// Distinct names, in first-appearance order.
    pub fn names(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.specs
            .iter()
            .filter(|s| seen.insert(s.name.clone()))
            .map(|s| s.name.clone())
            .collect()
    }

    /// Specs in `self` whose identity is absent from `other`.
    pub fn difference(&self, other: &SpecSet) -> SpecSet {
        SpecSet::from_specs(
            self.specs
                .iter()
                .filter(|s| !other.specs.iter().any(|o| o.same_identity(s)))
                .cloned()
                .collect(),
        )
    }

    /// Union, keeping `self`'s entry on identity collisions.
    pub fn merge(&self, other: &SpecSet) -> SpecSet {
        let mut merged = self.clone();
        for spec in &other.specs {
            merged.push(spec.clone());
        }
        merged
    }

    /// Remove every spec whose name is in `names`.
    pub fn delete_names(&mut self, names: &[String]) {
        self.specs.retain(|s| !names.contains(&s.name));
    }

    /// Remove specs by identity.
    pub fn delete(&mut self, doomed: &[Spec]) {
        self.specs.retain(|s| !doomed.iter().any(|d| d.same_identity(s)));
    }

    /// The transitive closure of `dependencies`, constrained to
    /// `platforms`, in dependency order (dependencies before dependents).
    ///
    /// Development dependencies of reached specs are followed only when
    /// `include_development` is set. Names with no spec in the set are
    /// skipped; [`SpecSet::materialize`] is the operation that reports
    /// them.
    pub fn for_dependencies(
        &self,
        dependencies: &[Dependency],
        include_development: bool,
        platforms: &[Platform],
    ) -> Vec<Spec> {
        let mut queue: VecDeque<String> = dependencies
            .iter()
            .filter(|d| platforms.is_empty() || platforms.iter().any(|p| d.applies_to_platform(p)))
            .map(|d| d.name.clone())
            .collect();
        let mut handled: HashSet<String> = HashSet::new();
        let mut picked: Vec<Spec> = Vec::new();

        while let Some(name) = queue.pop_front() {
            if !handled.insert(name.clone()) {
                continue;
            }
            for spec in self.get(&name) {
                let usable = platforms.is_empty()
                    || platforms.iter().any(|p| spec.installable_on(p));
                if !usable {
                    continue;
                }
                if !picked.iter().any(|s| s.same_identity(spec)) {
                    picked.push(spec.clone());
                }
                for dep in &spec.dependencies {
                    if include_development
                        || dep.dep_type == crate::dependency::DepType::Runtime
                    {
                        queue.push_back(dep.name.clone());
                    }
                }
            }
        }

        self.in_dependency_order(picked)
    }

    /// Topologically order `specs` so dependencies precede dependents.
    /// Cycles fall back to collection order.
    fn in_dependency_order(&self, specs: Vec<Spec>) -> Vec<Spec> {
        let mut graph: DiGraph<usize, ()> = DiGraph::new();
        let mut nodes: Vec<NodeIndex> = Vec::with_capacity(specs.len());
        let mut by_name: HashMap<&str, Vec<usize>> = HashMap::new();
        for (i, spec) in specs.iter().enumerate() {
            nodes.push(graph.add_node(i));
            by_name.entry(spec.name.as_str()).or_default().push(i);
        }
        for (i, spec) in specs.iter().enumerate() {
            for dep in &spec.dependencies {
                for &j in by_name.get(dep.name.as_str()).map(Vec::as_slice).unwrap_or(&[]) {
                    if i != j {
                        graph.add_edge(nodes[j], nodes[i], ());
                    }
                }
            }
        }
        match toposort(&graph, None) {
            Ok(order) => order.into_iter().map(|n| specs[graph[n]].clone()).collect(),
            Err(_) => specs,
        }
    }

    /// Materialize `dependencies` into concrete specs for every platform in
    /// `platforms`, retaining what could not be satisfied.
    ///
    /// A dependency whose name has no spec at all is **missing**; a name
    /// whose specs cover none of a required platform is **incomplete**
    /// (the present-but-unusable specs are retained for the caller).
    pub fn materialize(&self, dependencies: &[Dependency], platforms: &[Platform]) -> Materialized {
        let mut result = Materialized::default();
        let mut queue: VecDeque<Dependency> = dependencies.iter().cloned().collect();
        let mut handled: HashSet<String> = HashSet::new();
        let mut picked: Vec<Spec> = Vec::new();

        while let Some(dep) = queue.pop_front() {
            if !handled.insert(dep.name.clone()) {
                continue;
            }
            let candidates = self.get(&dep.name);
            if candidates.is_empty() {
                result.missing.push(dep);
                continue;
            }
            let applicable: Vec<&Platform> = platforms
                .iter()
                .filter(|p| dep.applies_to_platform(p))
                .collect();
            for platform in applicable {
                match best_for_platform(&candidates, platform) {
                    Some(spec) => {
                        if !picked.iter().any(|s| s.same_identity(spec)) {
                            picked.push(spec.clone());
                            for sub in spec.runtime_dependencies() {
                                queue.push_back(sub.clone());
                            }
                        }
                    }
                    None => {
                        for spec in &candidates {
                            if !result.incomplete.iter().any(|s| s.same_identity(spec)) {
                                result.incomplete.push((*spec).clone());
                            }
                        }
                    }
                }
            }
        }

        result.specs = SpecSet::from_specs(self.in_dependency_order(picked));
        result
    }
}

/// The best build of `candidates` for `platform`: highest version first,
/// then the most specific platform (an exact tuple beats the generic ruby
/// build).
fn best_for_platform<'a>(candidates: &[&'a Spec], platform: &Platform) -> Option<&'a Spec> {
    candidates
        .iter()
        .filter(|s| s.installable_on(platform))
        .max_by(|a, b| {
            a.version
                .cmp(&b.version)
                .then_with(|| a.platform.is_ruby().cmp(&b.platform.is_ruby()).reverse())
        })
        .copied()
}

impl FromIterator<Spec> for SpecSet {
    fn from_iter<I: IntoIterator<Item = Spec>>(iter: I) -> Self {
        Self::from_specs(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::SourceId;
    use crate::version::Requirement;

    fn src() -> SourceId {
        SourceId::for_tests(0)
    }

    fn spec(name: &str, version: &str) -> Spec {
        Spec::new(name, crate::version::parse_version(version).unwrap(), src())
    }

    fn dep(name: &str) -> Dependency {
        Dependency::new(name, Requirement::any())
    }

    #[test]
    fn identity_is_unique_within_a_set() {
        let mut set = SpecSet::new();
        set.push(spec("foo", "1.0.3"));
        set.push(spec("foo", "1.0.3"));
        set.push(spec("foo", "1.0.4"));
        assert_eq!(set.len(), 2);
        assert_eq!(set.get("foo").len(), 2);
    }

    #[test]
    fn closure_returns_dependencies_before_dependents() {
        let mut set = SpecSet::new();
        set.push(spec("app", "1.0.0").with_dependencies(vec![dep("lib")]));
        set.push(spec("lib", "2.0.0").with_dependencies(vec![dep("base")]));
        set.push(spec("base", "0.5.0"));
        set.push(spec("unrelated", "9.0.0"));

        let ordered = set.for_dependencies(&[dep("app")], false, &[Platform::Ruby]);
        let names: Vec<&str> = ordered.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["base", "lib", "app"]);
    }

    #[test]
    fn closure_respects_platform_restrictions() {
        let linux = Platform::parse("x86_64-linux");
        let darwin = Platform::parse("arm64-darwin");
        let mut set = SpecSet::new();
        set.push(spec("native", "1.0.0").for_platform(linux.clone()));

        assert_eq!(set.for_dependencies(&[dep("native")], false, &[linux]).len(), 1);
        assert!(set.for_dependencies(&[dep("native")], false, &[darwin]).is_empty());
    }

    #[test]
    fn materialize_reports_missing() {
        let set = SpecSet::from_specs(vec![spec("foo", "1.0.3")]);
        let result = set.materialize(&[dep("foo"), dep("ghost")], &[Platform::Ruby]);
        assert_eq!(result.specs.len(), 1);
        assert_eq!(result.missing.len(), 1);
        assert_eq!(result.missing[0].name, "ghost");
        assert!(result.incomplete.is_empty());
    }

    #[test]
    fn materialize_reports_incomplete_platforms() {
        let linux = Platform::parse("x86_64-linux");
        let darwin = Platform::parse("arm64-darwin");
        let set = SpecSet::from_specs(vec![spec("native", "1.0.0").for_platform(linux.clone())]);
        let result = set.materialize(&[dep("native")], &[linux, darwin]);
        assert_eq!(result.incomplete.len(), 1);
        assert_eq!(result.incomplete[0].name, "native");
        assert!(result.missing.is_empty());
    }

    #[test]
    fn platform_specific_build_preferred_over_generic() {
        let linux = Platform::parse("x86_64-linux");
        let mut set = SpecSet::new();
        set.push(spec("nokogiri", "1.15.0"));
        set.push(spec("nokogiri", "1.15.0").for_platform(linux.clone()));
        let result = set.materialize(&[dep("nokogiri")], &[linux.clone()]);
        assert_eq!(result.specs.len(), 1);
        assert_eq!(result.specs.iter().next().unwrap().platform, linux);
    }

    #[test]
    fn difference_and_merge_by_identity() {
        let a = SpecSet::from_specs(vec![spec("foo", "1.0.0"), spec("bar", "1.0.0")]);
        let b = SpecSet::from_specs(vec![spec("foo", "1.0.0")]);
        assert_eq!(a.difference(&b).names(), vec!["bar".to_string()]);
        assert_eq!(b.merge(&a).len(), 2);
    }
}
