//! Common fixtures for gembundle integration tests.

// These helpers are shared across test files; not every file uses all of
// them.
#![allow(dead_code)]

use gembundle::context::{Context, Settings};
use gembundle::dependency::Dependency;
use gembundle::manifest::Manifest;
use gembundle::platform::Platform;
use gembundle::source::{GitSource, RubygemsSource, Source, SourceId, SourceList};
use gembundle::spec::Spec;
use gembundle::spec_set::SpecSet;
use gembundle::version::{parse_version, Requirement};

/// Remote shared by manifests and lockfiles so interning merges them.
pub const GEMS_REMOTE: &str = "https://gems.example/";

/// A context pinned to x86_64-linux with default settings.
pub fn context() -> Context {
    Context::new(Settings::default()).with_local_platform(Platform::parse("x86_64-linux"))
}

/// The default rubygems source used across tests.
pub fn rubygems() -> Source {
    Source::Rubygems(RubygemsSource {
        remotes: vec![GEMS_REMOTE.to_string()],
        dependency_api: true,
        specs: SpecSet::new(),
        local_specs: SpecSet::new(),
    })
}

/// A git source at the given uri, tracking `main`.
pub fn git(uri: &str) -> Source {
    Source::Git(GitSource {
        uri: uri.to_string(),
        reference: "main".to_string(),
        revision: None,
        local_override: None,
        specs: SpecSet::new(),
    })
}

/// Parse a requirement, panicking on bad fixtures.
pub fn req(s: &str) -> Requirement {
    Requirement::parse(s).expect("fixture requirement parses")
}

/// A runtime dependency in the default group.
pub fn dep(name: &str, requirement: &str) -> Dependency {
    Dependency::new(name, req(requirement))
}

/// Register a gem version in a source's index.
pub fn add_gem(sources: &mut SourceList, id: SourceId, name: &str, version: &str) {
    let spec = Spec::new(name, parse_version(version).expect("fixture version"), id);
    sources.get_mut(id).own_specs_mut().expect("indexed source").push(spec);
}

/// Register a gem version with dependencies in a source's index.
pub fn add_gem_with_deps(
    sources: &mut SourceList,
    id: SourceId,
    name: &str,
    version: &str,
    deps: &[(&str, &str)],
) {
    let dependencies = deps.iter().map(|(n, r)| dep(n, r)).collect();
    let spec = Spec::new(name, parse_version(version).expect("fixture version"), id)
        .with_dependencies(dependencies);
    sources.get_mut(id).own_specs_mut().expect("indexed source").push(spec);
}

/// Register a platform-specific build in a source's index.
pub fn add_platform_gem(
    sources: &mut SourceList,
    id: SourceId,
    name: &str,
    version: &str,
    platform: &str,
) {
    let spec = Spec::new(name, parse_version(version).expect("fixture version"), id)
        .for_platform(Platform::parse(platform));
    sources.get_mut(id).own_specs_mut().expect("indexed source").push(spec);
}

/// A manifest with the default rubygems source and the given dependencies.
pub fn manifest_with(deps: &[Dependency]) -> (Manifest, SourceId) {
    let mut manifest = Manifest::new();
    let gems = manifest.add_source(rubygems());
    for dep in deps {
        manifest.add_dependency(dep.clone());
    }
    (manifest, gems)
}

/// The names of a spec set, sorted, for compact assertions.
pub fn names(specs: &SpecSet) -> Vec<String> {
    let mut names = specs.names();
    names.sort();
    names
}
