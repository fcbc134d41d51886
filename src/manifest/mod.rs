//! The declared manifest (gemfile model).
//!
//! The manifest is the parsed, declarative view of what a bundle should
//! contain: sources, dependencies with groups and platform restrictions,
//! and an optional ruby pin. The core consumes this model; the gemfile DSL
//! itself is parsed elsewhere. A TOML loader is provided for the model's
//! on-disk form:
//!
//! ```toml
//! [registry]
//! remotes = ["https://rubygems.org"]
//!
//! [sources]
//! repo = { type = "git", uri = "https://git.example/widget.git", ref = "main" }
//! local = { type = "path", path = "../widget" }
//!
//! [dependencies]
//! foo = "~> 1.0"
//! widget = { requirement = ">= 0", source = "repo" }
//! debugger = { requirement = ">= 2.0", groups = ["development"], type = "development" }
//!
//! [ruby]
//! versions = ["~> 3.2"]
//! ```
//!
//! Dependencies accept the same string-or-detailed shapes as the rest of
//! the manifest: a bare string is a version requirement in the `default`
//! group.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::core::{BundlerError, Result};
use crate::dependency::{DepType, Dependency};
use crate::platform::Platform;
use crate::ruby::RubyVersion;
use crate::source::{
    GemspecSource, GitSource, PathSource, RubygemsSource, Source, SourceId, SourceList,
};
use crate::spec_set::SpecSet;
use crate::version::Requirement;

/// The parsed manifest a definition is built from.
#[derive(Debug, Clone, Default)]
pub struct Manifest {
    /// Where the manifest was loaded from, when it came from disk.
    pub path: Option<PathBuf>,
    /// Declared sources. The definition adopts this registry wholesale.
    pub sources: SourceList,
    /// Declared dependencies, in declaration order.
    pub dependencies: Vec<Dependency>,
    /// Optional ruby pin.
    pub ruby_version: Option<RubyVersion>,
}

impl Manifest {
    /// An empty manifest for programmatic construction.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a manifest from disk. A missing file is
    /// [`BundlerError::GemfileNotFound`].
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(BundlerError::GemfileNotFound {
                path: path.display().to_string(),
            });
        }
        let raw = std::fs::read_to_string(path)?;
        let mut manifest = Self::from_toml(&raw).map_err(|e| match e {
            BundlerError::Toml(inner) => BundlerError::GemfileError {
                file: path.display().to_string(),
                reason: inner.to_string(),
            },
            other => other,
        })?;
        manifest.path = Some(path.to_path_buf());
        Ok(manifest)
    }

    /// Parse the TOML model from a string.
    pub fn from_toml(raw: &str) -> Result<Self> {
        let parsed: RawManifest = toml::from_str(raw)?;
        let mut manifest = Self::new();

        if let Some(registry) = parsed.registry {
            manifest.sources.add(Source::Rubygems(RubygemsSource {
                remotes: registry.remotes,
                dependency_api: registry.dependency_api,
                specs: SpecSet::new(),
                local_specs: SpecSet::new(),
            }));
        }

        let mut named: BTreeMap<String, SourceId> = BTreeMap::new();
        for (name, raw_source) in parsed.sources {
            let source = raw_source.into_source();
            let id = manifest.sources.add(source);
            named.insert(name, id);
        }

        for (name, raw_dep) in parsed.dependencies {
            let dep = raw_dep.into_dependency(&name, &named)?;
            manifest.dependencies.push(dep);
        }

        manifest.ruby_version = parsed.ruby;
        Ok(manifest)
    }

    /// Register a source programmatically.
    pub fn add_source(&mut self, source: Source) -> SourceId {
        self.sources.add(source)
    }

    /// Declare a dependency programmatically.
    pub fn add_dependency(&mut self, dependency: Dependency) -> &mut Self {
        self.dependencies.push(dependency);
        self
    }

    /// Pin the expected ruby.
    pub fn set_ruby(&mut self, ruby: RubyVersion) -> &mut Self {
        self.ruby_version = Some(ruby);
        self
    }

    /// The declared dependency with `name`, if any.
    pub fn dependency(&self, name: &str) -> Option<&Dependency> {
        self.dependencies.iter().find(|d| d.name == name)
    }
}

#[derive(Debug, Deserialize)]
struct RawManifest {
    #[serde(default)]
    registry: Option<RawRegistry>,
    #[serde(default)]
    sources: BTreeMap<String, RawSource>,
    #[serde(default)]
    dependencies: BTreeMap<String, RawDependency>,
    #[serde(default)]
    ruby: Option<RubyVersion>,
}

#[derive(Debug, Deserialize)]
struct RawRegistry {
    remotes: Vec<String>,
    #[serde(default = "default_true")]
    dependency_api: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum RawSource {
    Rubygems {
        remotes: Vec<String>,
        #[serde(default = "default_true")]
        dependency_api: bool,
    },
    Git {
        uri: String,
        #[serde(default = "default_ref", rename = "ref")]
        reference: String,
    },
    Path {
        path: PathBuf,
    },
    Gemspec {
        path: PathBuf,
        #[serde(default)]
        gemspec: Option<PathBuf>,
    },
}

fn default_ref() -> String {
    "main".to_string()
}

impl RawSource {
    fn into_source(self) -> Source {
        match self {
            Self::Rubygems {
                remotes,
                dependency_api,
            } => Source::Rubygems(RubygemsSource {
                remotes,
                dependency_api,
                specs: SpecSet::new(),
                local_specs: SpecSet::new(),
            }),
            Self::Git { uri, reference } => Source::Git(GitSource {
                uri,
                reference,
                revision: None,
                local_override: None,
                specs: SpecSet::new(),
            }),
            Self::Path { path } => Source::Path(PathSource {
                path,
                specs: SpecSet::new(),
            }),
            Self::Gemspec { path, gemspec } => {
                let gemspec_file =
                    gemspec.unwrap_or_else(|| path.join("gemspec"));
                Source::Gemspec(GemspecSource {
                    path,
                    gemspec_file,
                    specs: SpecSet::new(),
                })
            }
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawDependency {
    Requirement(String),
    Detailed {
        #[serde(default)]
        requirement: Option<String>,
        #[serde(default)]
        groups: Vec<String>,
        #[serde(default)]
        platforms: Vec<Platform>,
        #[serde(default)]
        source: Option<String>,
        #[serde(default, rename = "type")]
        dep_type: Option<String>,
    },
}

impl RawDependency {
    fn into_dependency(
        self,
        name: &str,
        named_sources: &BTreeMap<String, SourceId>,
    ) -> Result<Dependency> {
        match self {
            Self::Requirement(req) => {
                Ok(Dependency::new(name, Requirement::parse(&req)?))
            }
            Self::Detailed {
                requirement,
                groups,
                platforms,
                source,
                dep_type,
            } => {
                let requirement = match requirement {
                    Some(req) => Requirement::parse(&req)?,
                    None => Requirement::any(),
                };
                let mut dep = Dependency::new(name, requirement);
                if !groups.is_empty() {
                    dep.groups = groups;
                }
                dep.platforms = platforms;
                if let Some(source_name) = source {
                    let id = named_sources.get(&source_name).ok_or_else(|| {
                        BundlerError::GemfileError {
                            file: String::new(),
                            reason: format!(
                                "dependency '{name}' references undefined source '{source_name}'"
                            ),
                        }
                    })?;
                    dep.source = Some(*id);
                }
                match dep_type.as_deref() {
                    None | Some("runtime") => {}
                    Some("development") => dep.dep_type = DepType::Development,
                    Some(other) => {
                        return Err(BundlerError::GemfileError {
                            file: String::new(),
                            reason: format!("dependency '{name}' has unknown type '{other}'"),
                        })
                    }
                }
                Ok(dep)
            }
        }
    }
}
