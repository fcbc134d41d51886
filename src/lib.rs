//! gembundle - the dependency definition core of a gem-style bundler
//!
//! This crate reconciles a declared manifest of dependencies (the gemfile
//! model) with a previously recorded lockfile, decides whether
//! re-resolution is required, and - when it is - drives a version resolver
//! to produce a consistent, reproducible dependency set.
//!
//! # Architecture Overview
//!
//! gembundle follows a manifest/lockfile model where:
//! - the manifest defines desired dependencies, sources, and version
//!   requirements
//! - the lockfile records exact resolved versions for reproducible
//!   installations
//! - a [`definition::Definition`] merges the two under strict determinism
//!   and frozen-mode safety rules
//!
//! The flow through a definition:
//!
//! 1. **Convergence** - diff declared sources, paths, local overrides, and
//!    dependencies against the lockfile; classify each change and mutate
//!    locked state toward gemfile truth.
//! 2. **Validation** - detect missing or invalid transitive dependencies
//!    in the locked specs and drop them before planning.
//! 3. **Resolution gating** - reuse the locked set verbatim, reuse a
//!    filtered subset, or invoke the resolver, depending on what changed
//!    and what the user asked to unlock.
//! 4. **Materialization** - turn resolved specs into concrete,
//!    source-verified specs, re-resolving while the result contains
//!    platform-incomplete entries.
//!
//! # Core Modules
//!
//! - [`definition`] - the facade plus convergence, validation, planning,
//!   driving, and the unlock model
//! - [`spec_set`] - ordered, queryable sets of resolved specs
//! - [`source`] - source variants, capability probes, and the registry
//! - [`manifest`] - the declared gemfile model and its TOML loader
//! - [`lockfile`] - lockfile parsing, generation, and atomic IO
//! - [`resolver`] - deterministic version resolution
//! - [`version`] - gem-flavored requirement parsing
//!
//! # Supporting Modules
//!
//! - [`context`] - settings snapshot and runtime info, passed through
//!   construction instead of process-global state
//! - [`core`] - error types shared across the crate
//! - [`dependency`], [`spec`], [`platform`], [`ruby`] - the data model
//!
//! # Example
//!
//! ```no_run
//! use gembundle::context::{Context, Settings};
//! use gembundle::definition::{Definition, UnlockInput};
//! use std::path::Path;
//!
//! # fn main() -> anyhow::Result<()> {
//! let context = Context::new(Settings::default());
//! let mut definition = Definition::build(
//!     Path::new("gemfile.toml"),
//!     Some(Path::new("gems.lock")),
//!     UnlockInput::None,
//!     context,
//! )?;
//!
//! if definition.nothing_changed() {
//!     println!("bundle is up to date");
//! } else {
//!     println!("re-resolving: {}", definition.change_reason());
//! }
//! let specs = definition.specs()?;
//! for spec in specs.iter() {
//!     println!("  {spec}");
//! }
//! definition.lock(Path::new("gems.lock"), true)?;
//! # Ok(())
//! # }
//! ```

pub mod context;
pub mod core;
pub mod definition;
pub mod dependency;
pub mod lockfile;
pub mod manifest;
pub mod platform;
pub mod resolver;
pub mod ruby;
pub mod source;
pub mod spec;
pub mod spec_set;
pub mod version;

pub use crate::core::{BundlerError, FrozenDiff};
pub use crate::definition::{Definition, UnlockInput, UnlockRequest};
pub use crate::manifest::Manifest;
pub use crate::spec_set::SpecSet;
