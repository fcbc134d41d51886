//! What the user asked to update.
//!
//! An update request arrives as raw option input and normalizes into an
//! [`UnlockRequest`]: the set of gems and sources allowed to move, whether
//! the ruby pin and bundler itself are unlocking, and whether the update is
//! conservative (everything declared unlocks, nothing transitive). The
//! sentinel "unlock everything" form discards locked state entirely.

use std::collections::BTreeSet;

use crate::source::Source;

/// Raw unlock input, as the caller provides it.
#[derive(Debug, Clone, Default)]
pub enum UnlockInput {
    /// No unlock requested.
    #[default]
    None,
    /// Unlock everything; locked state is discarded.
    All,
    /// A structured request.
    Set {
        /// Gem names allowed to change version.
        gems: Vec<String>,
        /// Sources (by uri, path, or repository name) allowed to drop
        /// their pinned revision.
        sources: Vec<String>,
        /// Unlock the ruby pin.
        ruby: bool,
        /// Update bundler itself to this version.
        bundler: Option<String>,
        /// Conservative mode: unlock declared gems only, without
        /// expanding through the locked graph.
        conservative: bool,
    },
}

/// The normalized unlock model the definition works with.
///
/// `gems` grows during convergence: requested names are expanded through
/// the locked dependency graph so that unlocking a gem also unlocks what
/// it pulls in.
#[derive(Debug, Clone, Default)]
pub struct UnlockRequest {
    /// Unlock everything.
    pub all: bool,
    /// Gems allowed to change version.
    pub gems: BTreeSet<String>,
    /// Sources allowed to drop pinned state.
    pub sources: BTreeSet<String>,
    /// Whether the ruby pin is unlocked. Auto-set when the declared and
    /// locked ruby differ or only one of them exists.
    pub ruby: bool,
    /// Target version when bundler itself is being updated.
    pub bundler: Option<String>,
    /// Conservative mode.
    pub conservative: bool,
}

impl UnlockRequest {
    /// Normalize raw input.
    pub fn from_input(input: UnlockInput) -> Self {
        match input {
            UnlockInput::None => Self::default(),
            UnlockInput::All => Self {
                all: true,
                ..Self::default()
            },
            UnlockInput::Set {
                gems,
                sources,
                ruby,
                bundler,
                conservative,
            } => Self {
                all: false,
                gems: gems.into_iter().collect(),
                sources: sources.into_iter().collect(),
                ruby,
                bundler,
                conservative,
            },
        }
    }

    /// Whether anything at all was asked to unlock.
    pub fn unlocking(&self) -> bool {
        self.all
            || !self.gems.is_empty()
            || !self.sources.is_empty()
            || self.ruby
            || self.bundler.is_some()
    }

    /// Whether `source` is named by this request. Git sources match on
    /// their uri or repository basename; path sources on their path.
    pub fn names_source(&self, source: &Source) -> bool {
        self.sources.iter().any(|requested| match source {
            Source::Git(git) => {
                git.uri == *requested
                    || git
                        .uri
                        .rsplit('/')
                        .next()
                        .map(|base| base.trim_end_matches(".git") == requested)
                        .unwrap_or(false)
            }
            Source::Path(path) => path.path.display().to_string() == *requested,
            Source::Gemspec(spec) => spec.path.display().to_string() == *requested,
            _ => false,
        })
    }
}
