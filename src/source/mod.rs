//! Package sources and the source registry.
//!
//! A [`Source`] is an origin of package specs: a rubygems index (possibly
//! with several remotes), a git repository pinned to a revision, a local
//! path, a gemspec-derived path source, the synthetic metadata source that
//! hosts ruby/bundler pseudo-specs, or an aggregate over several rubygems
//! sources.
//!
//! Not every variant supports every capability - only git sources can be
//! unlocked or locally overridden - so callers check the probes
//! ([`Source::supports_unlock`], [`Source::supports_local_override`])
//! instead of dispatching to methods that may not exist for a variant.
//!
//! All sources live in one [`SourceList`] registry owned by the definition.
//! Specs and dependencies refer to their source by [`SourceId`] handle; no
//! back-pointers, so the spec/source reference cycle never materializes.

pub mod map;

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::spec::Spec;
use crate::spec_set::SpecSet;

/// Synthetic dependency name for the running ruby, resolved against the
/// metadata source. The NUL byte keeps it out of any real gem namespace.
pub const RUBY_METADATA: &str = "Ruby\0";
/// Synthetic dependency name for the running rubygems.
pub const RUBYGEMS_METADATA: &str = "RubyGems\0";
/// The bundler pseudo-gem, always routed to the metadata source.
pub const BUNDLER: &str = "bundler";

/// Handle into a [`SourceList`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceId(usize);

impl SourceId {
    /// Construct an arbitrary handle for unit tests that never dereference
    /// it through a registry.
    pub fn for_tests(index: usize) -> Self {
        Self(index)
    }
}

/// A rubygems index source, possibly spanning multiple remotes.
#[derive(Debug, Clone, Default)]
pub struct RubygemsSource {
    /// Remote index URLs.
    pub remotes: Vec<String>,
    /// Whether the remote exposes the fine-grained dependency API.
    pub dependency_api: bool,
    /// The advertised spec index.
    pub specs: SpecSet,
    /// Specs available from the local gem cache, consulted under
    /// `prefer_local`.
    pub local_specs: SpecSet,
}

/// A git repository source.
#[derive(Debug, Clone)]
pub struct GitSource {
    /// Repository URI.
    pub uri: String,
    /// Requested ref (branch, tag, or revision expression).
    pub reference: String,
    /// Pinned revision from the lockfile; `None` once unlocked.
    pub revision: Option<String>,
    /// Local checkout overriding the remote, if the user configured one.
    pub local_override: Option<PathBuf>,
    /// The spec index of the checkout.
    pub specs: SpecSet,
}

/// A plain local path source.
#[derive(Debug, Clone)]
pub struct PathSource {
    /// Directory containing the gem(s).
    pub path: PathBuf,
    /// The spec index found at the path.
    pub specs: SpecSet,
}

/// A path source derived from a gemspec file: a [`PathSource`] plus the
/// gemspec metadata. The manifest's gemspec view wins over a bare locked
/// path for the same directory.
#[derive(Debug, Clone)]
pub struct GemspecSource {
    /// Directory containing the gemspec.
    pub path: PathBuf,
    /// The gemspec file itself.
    pub gemspec_file: PathBuf,
    /// The spec index derived from the gemspec.
    pub specs: SpecSet,
}

/// The synthetic source hosting ruby/rubygems/bundler pseudo-specs.
#[derive(Debug, Clone, Default)]
pub struct MetadataSource {
    /// Pseudo-specs describing the runtime.
    pub specs: SpecSet,
}

/// Several rubygems sources merged into one resolution scope.
#[derive(Debug, Clone, Default)]
pub struct AggregateSource {
    /// The constituent rubygems sources.
    pub members: Vec<SourceId>,
}

/// A package origin.
#[derive(Debug, Clone)]
pub enum Source {
    /// Remote gem index.
    Rubygems(RubygemsSource),
    /// Git repository.
    Git(GitSource),
    /// Local directory.
    Path(PathSource),
    /// Gemspec-derived path source.
    Gemspec(GemspecSource),
    /// Synthetic runtime metadata.
    Metadata(MetadataSource),
    /// Merged rubygems sources.
    Aggregate(AggregateSource),
}

impl Source {
    /// Structural equality that ignores pinned state (git revisions, local
    /// overrides) - the comparison source convergence uses when deciding
    /// whether a locked source is "the same source" as a declared one.
    pub fn equivalent(&self, other: &Source) -> bool {
        match (self, other) {
            (Self::Rubygems(a), Self::Rubygems(b)) => {
                let left: BTreeSet<&String> = a.remotes.iter().collect();
                let right: BTreeSet<&String> = b.remotes.iter().collect();
                left == right
            }
            (Self::Git(a), Self::Git(b)) => a.uri == b.uri && a.reference == b.reference,
            (Self::Path(a), Self::Path(b)) => a.path == b.path,
            (Self::Gemspec(a), Self::Gemspec(b)) => {
                a.path == b.path && a.gemspec_file == b.gemspec_file
            }
            (Self::Metadata(_), Self::Metadata(_)) => true,
            (Self::Aggregate(a), Self::Aggregate(b)) => a.members == b.members,
            _ => false,
        }
    }

    /// Source containment for multi-remote rubygems sources: whether every
    /// remote of `other` is served by `self`.
    pub fn includes(&self, other: &Source) -> bool {
        match (self, other) {
            (Self::Rubygems(a), Self::Rubygems(b)) => {
                b.remotes.iter().all(|r| a.remotes.contains(r))
            }
            _ => self.equivalent(other),
        }
    }

    /// Whether this source supports dropping its pinned state.
    pub fn supports_unlock(&self) -> bool {
        matches!(self, Self::Git(_))
    }

    /// Drop pinned state. No-op for variants without any.
    pub fn unlock(&mut self) {
        if let Self::Git(git) = self {
            git.revision = None;
        }
    }

    /// Whether this source supports a local checkout override.
    pub fn supports_local_override(&self) -> bool {
        matches!(self, Self::Git(_))
    }

    /// Set a local override; returns whether anything changed.
    pub fn set_local_override(&mut self, path: &Path) -> bool {
        match self {
            Self::Git(git) => {
                let changed = git.local_override.as_deref() != Some(path);
                git.local_override = Some(path.to_path_buf());
                changed
            }
            _ => false,
        }
    }

    /// The source's own spec index, when it carries one directly.
    /// Aggregates expose their merged index via [`SourceList::specs`].
    pub fn own_specs(&self) -> Option<&SpecSet> {
        match self {
            Self::Rubygems(s) => Some(&s.specs),
            Self::Git(s) => Some(&s.specs),
            Self::Path(s) => Some(&s.specs),
            Self::Gemspec(s) => Some(&s.specs),
            Self::Metadata(s) => Some(&s.specs),
            Self::Aggregate(_) => None,
        }
    }

    /// Mutable spec index, for test setup and source refresh.
    pub fn own_specs_mut(&mut self) -> Option<&mut SpecSet> {
        match self {
            Self::Rubygems(s) => Some(&mut s.specs),
            Self::Git(s) => Some(&mut s.specs),
            Self::Path(s) => Some(&mut s.specs),
            Self::Gemspec(s) => Some(&mut s.specs),
            Self::Metadata(s) => Some(&mut s.specs),
            Self::Aggregate(_) => None,
        }
    }

    /// Whether this is a path-backed source (plain path or gemspec).
    pub fn is_path_source(&self) -> bool {
        matches!(self, Self::Path(_) | Self::Gemspec(_))
    }

    /// The directory of a path-backed source.
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::Path(s) => Some(&s.path),
            Self::Gemspec(s) => Some(&s.path),
            _ => None,
        }
    }

    /// Human label, as it would appear in a gemfile or error message.
    pub fn to_gemfile(&self) -> String {
        match self {
            Self::Rubygems(s) => {
                format!("rubygems repository {}", s.remotes.join(", "))
            }
            Self::Git(s) => match &s.revision {
                Some(rev) => format!("{} (at {}@{})", s.uri, s.reference, &rev[..rev.len().min(7)]),
                None => format!("{} (at {})", s.uri, s.reference),
            },
            Self::Path(s) => format!("source at `{}`", s.path.display()),
            Self::Gemspec(s) => format!("gemspec at `{}`", s.path.display()),
            Self::Metadata(_) => "the local ruby installation".to_string(),
            Self::Aggregate(_) => "any of the sources".to_string(),
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_gemfile())
    }
}

/// The registry of every source a definition knows about.
///
/// Appending is the only growth operation, so a [`SourceId`] stays valid
/// for the life of the definition that owns the list.
#[derive(Debug, Clone, Default)]
pub struct SourceList {
    sources: Vec<Source>,
    default_source: Option<SourceId>,
    metadata_source: Option<SourceId>,
}

impl SourceList {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a source, interning by [`Source::equivalent`]: adding a
    /// source equivalent to an existing one returns the existing handle.
    pub fn add(&mut self, source: Source) -> SourceId {
        if let Some(existing) = self.find_equivalent(&source) {
            return existing;
        }
        let id = SourceId(self.sources.len());
        if self.default_source.is_none() {
            if let Source::Rubygems(_) = source {
                self.default_source = Some(id);
            }
        }
        if let Source::Metadata(_) = source {
            self.metadata_source = Some(id);
        }
        self.sources.push(source);
        id
    }

    /// Handle of an equivalent source already in the registry.
    pub fn find_equivalent(&self, source: &Source) -> Option<SourceId> {
        self.sources
            .iter()
            .position(|s| s.equivalent(source))
            .map(SourceId)
    }

    /// Adopt a source parsed from the lockfile: when an equivalent source
    /// is already registered, its pinned state (git revision) is preserved
    /// from the locked copy and the existing handle returned.
    pub fn adopt_locked(&mut self, locked: Source) -> SourceId {
        if let Some(id) = self.find_equivalent(&locked) {
            if let (Source::Git(existing), Source::Git(from_lock)) =
                (&mut self.sources[id.0], &locked)
            {
                if existing.revision.is_none() {
                    existing.revision = from_lock.revision.clone();
                }
            }
            return id;
        }
        self.add(locked)
    }

    /// Borrow a source.
    pub fn get(&self, id: SourceId) -> &Source {
        &self.sources[id.0]
    }

    /// Mutably borrow a source.
    pub fn get_mut(&mut self, id: SourceId) -> &mut Source {
        &mut self.sources[id.0]
    }

    /// Iterate `(handle, source)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (SourceId, &Source)> {
        self.sources.iter().enumerate().map(|(i, s)| (SourceId(i), s))
    }

    /// The default (global rubygems) source, when one exists.
    pub fn default_source(&self) -> Option<SourceId> {
        self.default_source
    }

    /// Force a particular default source.
    pub fn set_default(&mut self, id: SourceId) {
        self.default_source = Some(id);
    }

    /// The metadata source, creating it on first use.
    pub fn metadata_source(&mut self) -> SourceId {
        match self.metadata_source {
            Some(id) => id,
            None => self.add(Source::Metadata(MetadataSource::default())),
        }
    }

    /// The spec index visible through a source; aggregates merge their
    /// members' indexes.
    pub fn specs(&self, id: SourceId) -> SpecSet {
        match self.get(id) {
            Source::Aggregate(agg) => {
                let mut merged = SpecSet::new();
                for member in &agg.members {
                    if let Some(specs) = self.get(*member).own_specs() {
                        merged = merged.merge(specs);
                    }
                }
                merged
            }
            other => other.own_specs().cloned().unwrap_or_default(),
        }
    }

    /// Whether `owner` is entitled to lock `spec`: the spec's source is
    /// the owner itself, or a member the owner aggregates or includes.
    pub fn can_lock(&self, owner: SourceId, spec: &Spec) -> bool {
        if owner == spec.source {
            return true;
        }
        match self.get(owner) {
            Source::Aggregate(agg) => agg.members.contains(&spec.source),
            other => other.includes(self.get(spec.source)),
        }
    }

    /// Handles of all rubygems sources.
    pub fn rubygems_sources(&self) -> Vec<SourceId> {
        self.iter()
            .filter(|(_, s)| matches!(s, Source::Rubygems(_)))
            .map(|(id, _)| id)
            .collect()
    }

    /// Handles of all path-backed sources (plain path and gemspec).
    pub fn path_sources(&self) -> Vec<SourceId> {
        self.iter()
            .filter(|(_, s)| s.is_path_source())
            .map(|(id, _)| id)
            .collect()
    }

    /// Number of registered sources.
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    /// True when no sources are registered.
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rubygems(remote: &str) -> Source {
        Source::Rubygems(RubygemsSource {
            remotes: vec![remote.to_string()],
            ..RubygemsSource::default()
        })
    }

    fn git(uri: &str, reference: &str, revision: Option<&str>) -> Source {
        Source::Git(GitSource {
            uri: uri.to_string(),
            reference: reference.to_string(),
            revision: revision.map(str::to_string),
            local_override: None,
            specs: SpecSet::new(),
        })
    }

    #[test]
    fn interning_dedupes_equivalent_sources() {
        let mut list = SourceList::new();
        let a = list.add(rubygems("https://gems.example"));
        let b = list.add(rubygems("https://gems.example"));
        assert_eq!(a, b);
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn git_equivalence_ignores_revision() {
        let unpinned = git("https://git.example/repo.git", "main", None);
        let pinned = git("https://git.example/repo.git", "main", Some("abc123"));
        assert!(unpinned.equivalent(&pinned));
        assert!(!unpinned.equivalent(&git("https://git.example/repo.git", "v2", None)));
    }

    #[test]
    fn adopt_locked_preserves_revision() {
        let mut list = SourceList::new();
        let id = list.add(git("https://git.example/repo.git", "main", None));
        let adopted = list.adopt_locked(git("https://git.example/repo.git", "main", Some("abc123")));
        assert_eq!(id, adopted);
        match list.get(id) {
            Source::Git(g) => assert_eq!(g.revision.as_deref(), Some("abc123")),
            _ => panic!("expected git source"),
        }
    }

    #[test]
    fn unlock_drops_revision_only_for_git() {
        let mut source = git("https://git.example/repo.git", "main", Some("abc123"));
        assert!(source.supports_unlock());
        source.unlock();
        match &source {
            Source::Git(g) => assert!(g.revision.is_none()),
            _ => unreachable!(),
        }
        let mut gems = rubygems("https://gems.example");
        assert!(!gems.supports_unlock());
        gems.unlock();
    }

    #[test]
    fn local_override_reports_change() {
        let mut source = git("https://git.example/repo.git", "main", None);
        assert!(source.set_local_override(Path::new("/tmp/checkout")));
        assert!(!source.set_local_override(Path::new("/tmp/checkout")));
        assert!(source.set_local_override(Path::new("/tmp/other")));
    }

    #[test]
    fn rubygems_containment_by_remotes() {
        let both = Source::Rubygems(RubygemsSource {
            remotes: vec!["https://a.example".into(), "https://b.example".into()],
            ..RubygemsSource::default()
        });
        let one = rubygems("https://a.example");
        assert!(both.includes(&one));
        assert!(!one.includes(&both));
    }

    #[test]
    fn first_rubygems_source_becomes_default() {
        let mut list = SourceList::new();
        list.add(git("https://git.example/repo.git", "main", None));
        let gems = list.add(rubygems("https://gems.example"));
        assert_eq!(list.default_source(), Some(gems));
    }
}
