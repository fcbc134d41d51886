//! Per-package source authority.
//!
//! The source map answers "which source owns which gem name" at three
//! strengths: names explicitly pinned in the gemfile, every name any
//! consulted index advertises, and names as recorded by the lockfile (used
//! when running offline). Precedence when a name could come from several
//! places: explicit declaration, then locked source, then default source.

use std::collections::HashMap;

use crate::core::{BundlerError, Result};
use crate::dependency::Dependency;
use crate::source::{SourceId, SourceList};
use crate::spec_set::SpecSet;

/// Index of per-package source authority.
pub struct SourceMap<'a> {
    sources: &'a SourceList,
    dependencies: &'a [Dependency],
    locked_specs: &'a SpecSet,
}

impl<'a> SourceMap<'a> {
    /// Build a map over the definition's registry, declared dependencies
    /// and locked specs.
    pub fn new(
        sources: &'a SourceList,
        dependencies: &'a [Dependency],
        locked_specs: &'a SpecSet,
    ) -> Self {
        Self {
            sources,
            dependencies,
            locked_specs,
        }
    }

    /// Source for every explicitly declared dependency.
    ///
    /// Fails with [`BundlerError::AmbiguousSource`] when two declarations
    /// of the same name disagree.
    pub fn direct_requirements(&self) -> Result<HashMap<String, SourceId>> {
        let mut map: HashMap<String, SourceId> = HashMap::new();
        for dep in self.dependencies {
            let Some(source) = dep.source else { continue };
            if let Some(&existing) = map.get(&dep.name) {
                if existing != source {
                    return Err(BundlerError::AmbiguousSource {
                        name: dep.name.clone(),
                        first: self.sources.get(existing).to_gemfile(),
                        second: self.sources.get(source).to_gemfile(),
                    });
                }
            } else {
                map.insert(dep.name.clone(), source);
            }
        }
        Ok(map)
    }

    /// Direct requirements extended with every indirect name any source
    /// index advertises. Locked sources win over advertising sources for
    /// names the lockfile already places; the default source is never
    /// recorded here (it is the planner's fallback).
    pub fn all_requirements(&self) -> Result<HashMap<String, SourceId>> {
        let mut map = self.direct_requirements()?;
        for (name, source) in self.locked_requirements() {
            map.entry(name).or_insert(source);
        }
        let default = self.sources.default_source();
        for (id, source) in self.sources.iter() {
            if Some(id) == default {
                continue;
            }
            let Some(specs) = source.own_specs() else { continue };
            for name in specs.names() {
                map.entry(name).or_insert(id);
            }
        }
        Ok(map)
    }

    /// Source per name as recorded by the locked specs.
    pub fn locked_requirements(&self) -> HashMap<String, SourceId> {
        let mut map = HashMap::new();
        for spec in self.locked_specs.iter() {
            map.entry(spec.name.clone()).or_insert(spec.source);
        }
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{GitSource, RubygemsSource, Source};
    use crate::spec::Spec;
    use crate::version::Requirement;
    use semver::Version;

    fn registry() -> (SourceList, SourceId, SourceId) {
        let mut list = SourceList::new();
        let gems = list.add(Source::Rubygems(RubygemsSource {
            remotes: vec!["https://gems.example".into()],
            ..RubygemsSource::default()
        }));
        let git = list.add(Source::Git(GitSource {
            uri: "https://git.example/repo.git".into(),
            reference: "main".into(),
            revision: None,
            local_override: None,
            specs: SpecSet::new(),
        }));
        (list, gems, git)
    }

    #[test]
    fn explicit_declarations_take_precedence() {
        let (mut list, _gems, git) = registry();
        let extra = list.add(Source::Rubygems(RubygemsSource {
            remotes: vec!["https://extra.example".into()],
            ..RubygemsSource::default()
        }));
        if let Some(specs) = list.get_mut(extra).own_specs_mut() {
            specs.push(Spec::new("foo", Version::new(1, 0, 0), extra));
        }
        let deps = vec![Dependency::new("foo", Requirement::any()).with_source(git)];
        let locked = SpecSet::new();
        let map = SourceMap::new(&list, &deps, &locked);
        assert_eq!(map.all_requirements().unwrap().get("foo"), Some(&git));
    }

    #[test]
    fn conflicting_declarations_are_ambiguous() {
        let (list, gems, git) = registry();
        let deps = vec![
            Dependency::new("foo", Requirement::any()).with_source(git),
            Dependency::new("foo", Requirement::any()).with_source(gems),
        ];
        let locked = SpecSet::new();
        let map = SourceMap::new(&list, &deps, &locked);
        match map.direct_requirements() {
            Err(BundlerError::AmbiguousSource { name, .. }) => assert_eq!(name, "foo"),
            other => panic!("expected ambiguity, got {other:?}"),
        }
    }

    #[test]
    fn locked_source_wins_over_advertising_index() {
        let (mut list, gems, git) = registry();
        if let Some(specs) = list.get_mut(git).own_specs_mut() {
            specs.push(Spec::new("shared", Version::new(2, 0, 0), git));
        }
        let locked = SpecSet::from_specs(vec![Spec::new("shared", Version::new(1, 0, 0), gems)]);
        let deps = Vec::new();
        let map = SourceMap::new(&list, &deps, &locked);
        assert_eq!(map.all_requirements().unwrap().get("shared"), Some(&gems));
    }

    #[test]
    fn indirect_names_map_to_advertising_source() {
        let (mut list, _gems, git) = registry();
        if let Some(specs) = list.get_mut(git).own_specs_mut() {
            specs.push(Spec::new("git-only", Version::new(0, 1, 0), git));
        }
        let locked = SpecSet::new();
        let deps = Vec::new();
        let map = SourceMap::new(&list, &deps, &locked);
        assert_eq!(map.all_requirements().unwrap().get("git-only"), Some(&git));
    }
}
