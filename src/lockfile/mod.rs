//! Lockfile parsing and generation.
//!
//! The lockfile is newline-delimited text with labeled sections:
//!
//! ```text
//! GIT
//!   remote: https://git.example/widget.git
//!   revision: abc123
//!   ref: main
//!   specs:
//!     widget (0.1.0)
//!       foo (>= 1.0)
//!
//! GEM
//!   remote: https://gems.example/
//!   specs:
//!     foo (1.0.3)
//!       bar (~> 2.0)
//!     bar (2.1.0)
//!
//! PLATFORMS
//!   ruby
//!
//! DEPENDENCIES
//!   foo (~> 1.0)
//!   widget!
//!
//! RUBY VERSION
//!    ruby 3.2.2p53
//!
//! BUNDLED WITH
//!    2.4.10
//! ```
//!
//! Parsing interns each source block into the definition's registry (so a
//! locked git source equal to a declared one contributes its pinned
//! revision instead of a duplicate entry) and produces a [`ParsedLockfile`]
//! snapshot. Generation is the inverse, with three wire-level duties the
//! core must honor: CRLF is preserved when the existing file used it,
//! unknown sections survive a rewrite when `preserve_unknown` is set, and
//! semantic comparison ignores the RUBY VERSION and BUNDLED WITH sections
//! so a ruby upgrade alone never dirties a frozen bundle.

pub mod io;

use semver::Version;
use std::path::PathBuf;

use crate::core::{BundlerError, Result};
use crate::dependency::Dependency;
use crate::platform::Platform;
use crate::ruby::RubyVersion;
use crate::source::{GitSource, PathSource, RubygemsSource, Source, SourceId, SourceList};
use crate::spec::Spec;
use crate::spec_set::SpecSet;
use crate::version::{parse_version, Requirement};

const GEM: &str = "GEM";
const GIT: &str = "GIT";
const PATH: &str = "PATH";
const PLATFORMS: &str = "PLATFORMS";
const DEPENDENCIES: &str = "DEPENDENCIES";
const RUBY_VERSION: &str = "RUBY VERSION";
const BUNDLED_WITH: &str = "BUNDLED WITH";

/// A parsed lockfile snapshot.
#[derive(Debug, Clone, Default)]
pub struct ParsedLockfile {
    /// Locked sources, as registry handles, in file order.
    pub sources: Vec<SourceId>,
    /// All locked specs.
    pub specs: SpecSet,
    /// The DEPENDENCIES section.
    pub dependencies: Vec<Dependency>,
    /// The PLATFORMS section.
    pub platforms: Vec<Platform>,
    /// RUBY VERSION, when recorded.
    pub ruby_version: Option<RubyVersion>,
    /// BUNDLED WITH, when recorded.
    pub bundler_version: Option<Version>,
    /// Sections this version of the format does not understand, verbatim.
    pub unknown_sections: Vec<String>,
    /// Whether the file used CRLF line endings.
    pub crlf: bool,
    /// Whether the lock carries platform-specific specs shadowed by an
    /// equivalent generic spec, in which case a reused locked set must be
    /// re-filtered.
    pub may_include_redundant_platform_specific_gems: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockKind {
    Gem,
    Git,
    Path,
}

#[derive(Debug)]
struct SourceBlock {
    kind: BlockKind,
    remotes: Vec<String>,
    revision: Option<String>,
    reference: Option<String>,
    specs: Vec<RawSpec>,
}

#[derive(Debug)]
struct RawSpec {
    name: String,
    version: Version,
    platform: Platform,
    dependencies: Vec<Dependency>,
}

impl ParsedLockfile {
    /// Parse lockfile text, interning sources into `registry`.
    pub fn parse(text: &str, registry: &mut SourceList) -> Result<Self> {
        let crlf = text.contains("\r\n");
        let normalized = text.replace("\r\n", "\n");

        let mut lockfile = Self {
            crlf,
            ..Self::default()
        };
        let mut blocks: Vec<SourceBlock> = Vec::new();
        let mut pinned_names: Vec<String> = Vec::new();
        let mut section: Option<String> = None;

        for line in normalized.lines() {
            if line.trim().is_empty() {
                continue;
            }
            if !line.starts_with(' ') {
                let header = line.trim_end().to_string();
                match header.as_str() {
                    GEM => blocks.push(SourceBlock::new(BlockKind::Gem)),
                    GIT => blocks.push(SourceBlock::new(BlockKind::Git)),
                    PATH => blocks.push(SourceBlock::new(BlockKind::Path)),
                    PLATFORMS | DEPENDENCIES | RUBY_VERSION | BUNDLED_WITH => {}
                    _ => lockfile.unknown_sections.push(header.clone()),
                }
                section = Some(header);
                continue;
            }
            let Some(current) = section.as_deref() else {
                return Err(BundlerError::LockfileError {
                    reason: format!("unexpected indented line before any section: '{line}'"),
                });
            };
            match current {
                GEM | GIT | PATH => {
                    let block = blocks.last_mut().expect("section opened a block");
                    block.consume(line)?;
                }
                PLATFORMS => lockfile.platforms.push(Platform::parse(line.trim())),
                DEPENDENCIES => {
                    let (dep, pinned) = parse_dependency_line(line.trim())?;
                    if pinned {
                        pinned_names.push(dep.name.clone());
                    }
                    lockfile.dependencies.push(dep);
                }
                RUBY_VERSION => {
                    lockfile.ruby_version = Some(RubyVersion::from_lock_line(line.trim())?);
                }
                BUNDLED_WITH => {
                    lockfile.bundler_version = Some(parse_version(line.trim())?);
                }
                _ => {
                    let unknown = lockfile
                        .unknown_sections
                        .last_mut()
                        .expect("unknown header recorded");
                    unknown.push('\n');
                    unknown.push_str(line);
                }
            }
        }

        for block in blocks {
            let source = block.into_source()?;
            let (source, raw_specs) = source;
            let id = registry.adopt_locked(source);
            lockfile.sources.push(id);
            for raw in raw_specs {
                lockfile.specs.push(Spec {
                    name: raw.name,
                    version: raw.version,
                    platform: raw.platform,
                    source: id,
                    dependencies: raw.dependencies,
                });
            }
        }

        for name in pinned_names {
            let source = lockfile.specs.get(&name).first().map(|s| s.source);
            if let Some(source) = source {
                for dep in &mut lockfile.dependencies {
                    if dep.name == name {
                        dep.source = Some(source);
                    }
                }
            }
        }

        lockfile.may_include_redundant_platform_specific_gems =
            detect_redundant_platform_specs(&lockfile.specs);
        Ok(lockfile)
    }

    /// Load and parse a lockfile from disk; `Ok(None)` when absent.
    pub fn load(path: &std::path::Path, registry: &mut SourceList) -> Result<Option<Self>> {
        let Some(raw) = io::read_lockfile(path).map_err(|e| BundlerError::LockfileError {
            reason: e.to_string(),
        })?
        else {
            return Ok(None);
        };
        Ok(Some(Self::parse(&raw, registry)?))
    }
}

impl SourceBlock {
    fn new(kind: BlockKind) -> Self {
        Self {
            kind,
            remotes: Vec::new(),
            revision: None,
            reference: None,
            specs: Vec::new(),
        }
    }

    fn consume(&mut self, line: &str) -> Result<()> {
        if let Some(subdep) = line.strip_prefix("      ") {
            let spec = self.specs.last_mut().ok_or_else(|| BundlerError::LockfileError {
                reason: format!("dependency line without a spec: '{line}'"),
            })?;
            let (dep, _) = parse_dependency_line(subdep.trim())?;
            spec.dependencies.push(dep);
            return Ok(());
        }
        if let Some(spec_line) = line.strip_prefix("    ") {
            self.specs.push(parse_spec_line(spec_line.trim())?);
            return Ok(());
        }
        let trimmed = line.trim();
        if let Some(remote) = trimmed.strip_prefix("remote: ") {
            self.remotes.push(remote.trim().to_string());
        } else if let Some(revision) = trimmed.strip_prefix("revision: ") {
            self.revision = Some(revision.trim().to_string());
        } else if let Some(reference) = trimmed.strip_prefix("ref: ") {
            self.reference = Some(reference.trim().to_string());
        } else if trimmed == "specs:" || trimmed.ends_with(':') || trimmed.contains(": ") {
            // Marker or an attribute this version does not track.
        } else {
            return Err(BundlerError::LockfileError {
                reason: format!("unrecognized source attribute: '{trimmed}'"),
            });
        }
        Ok(())
    }

    fn into_source(self) -> Result<(Source, Vec<RawSpec>)> {
        let source = match self.kind {
            BlockKind::Gem => Source::Rubygems(RubygemsSource {
                remotes: self.remotes,
                dependency_api: true,
                specs: SpecSet::new(),
                local_specs: SpecSet::new(),
            }),
            BlockKind::Git => {
                let uri = self.remotes.into_iter().next().ok_or_else(|| {
                    BundlerError::LockfileError {
                        reason: "GIT section is missing its remote".to_string(),
                    }
                })?;
                Source::Git(GitSource {
                    uri,
                    reference: self.reference.unwrap_or_else(|| "main".to_string()),
                    revision: self.revision,
                    local_override: None,
                    specs: SpecSet::new(),
                })
            }
            BlockKind::Path => {
                let path = self.remotes.into_iter().next().ok_or_else(|| {
                    BundlerError::LockfileError {
                        reason: "PATH section is missing its remote".to_string(),
                    }
                })?;
                Source::Path(PathSource {
                    path: PathBuf::from(path),
                    specs: SpecSet::new(),
                })
            }
        };
        Ok((source, self.specs))
    }
}

/// Parse `name (1.0.3)` / `name (1.15.0-x86_64-linux)` spec lines.
fn parse_spec_line(line: &str) -> Result<RawSpec> {
    let (name, inner) = match line.split_once(" (") {
        Some((name, rest)) => {
            let inner = rest.strip_suffix(')').ok_or_else(|| BundlerError::LockfileError {
                reason: format!("malformed spec line: '{line}'"),
            })?;
            (name, inner)
        }
        None => {
            return Err(BundlerError::LockfileError {
                reason: format!("spec line has no version: '{line}'"),
            })
        }
    };
    // Gem versions never contain dashes, so anything after the first dash
    // is a platform suffix.
    let (version, platform) = match inner.split_once('-') {
        Some((version_part, platform_part)) => {
            (parse_version(version_part)?, Platform::parse(platform_part))
        }
        None => (parse_version(inner)?, Platform::Ruby),
    };
    Ok(RawSpec {
        name: name.to_string(),
        version,
        platform,
        dependencies: Vec::new(),
    })
}

/// Parse `name`, `name (req)`, `name!`, `name (req)!` dependency lines.
/// Returns the dependency and whether it was pinned to its locked source.
fn parse_dependency_line(line: &str) -> Result<(Dependency, bool)> {
    let (body, pinned) = match line.strip_suffix('!') {
        Some(body) => (body.trim_end(), true),
        None => (line, false),
    };
    let (name, requirement) = match body.split_once(" (") {
        Some((name, rest)) => {
            let inner = rest.strip_suffix(')').ok_or_else(|| BundlerError::LockfileError {
                reason: format!("malformed dependency line: '{line}'"),
            })?;
            (name, Requirement::parse(inner)?)
        }
        None => (body, Requirement::any()),
    };
    Ok((Dependency::new(name, requirement), pinned))
}

/// A platform-specific spec is redundant when the same name and version is
/// also locked as a generic ruby spec.
fn detect_redundant_platform_specs(specs: &SpecSet) -> bool {
    specs.iter().any(|spec| {
        !spec.platform.is_ruby()
            && specs
                .iter()
                .any(|other| {
                    other.name == spec.name
                        && other.version == spec.version
                        && other.platform.is_ruby()
                })
    })
}

/// Everything needed to render a lockfile.
pub struct LockfileContents<'a> {
    /// The source registry.
    pub sources: &'a SourceList,
    /// Specs to record.
    pub specs: &'a SpecSet,
    /// Declared dependencies for the DEPENDENCIES section.
    pub dependencies: &'a [Dependency],
    /// Platforms the bundle covers.
    pub platforms: &'a [Platform],
    /// Ruby pin, when declared.
    pub ruby_version: Option<&'a RubyVersion>,
    /// The bundler that produced this lock.
    pub bundler_version: Option<&'a Version>,
    /// Unknown sections carried over from the previous lockfile.
    pub unknown_sections: &'a [String],
}

impl LockfileContents<'_> {
    /// Render the lockfile text, LF-terminated.
    pub fn render(&self, preserve_unknown: bool) -> String {
        let mut out = String::new();

        let mut git_ids = Vec::new();
        let mut path_ids = Vec::new();
        let mut gem_ids = Vec::new();
        for (id, source) in self.sources.iter() {
            if self.specs.iter().all(|s| s.source != id) && !matches!(source, Source::Rubygems(_)) {
                continue;
            }
            match source {
                Source::Git(_) => git_ids.push(id),
                Source::Path(_) | Source::Gemspec(_) => path_ids.push(id),
                Source::Rubygems(_) => gem_ids.push(id),
                Source::Metadata(_) | Source::Aggregate(_) => {}
            }
        }

        for id in git_ids {
            if let Source::Git(git) = self.sources.get(id) {
                out.push_str("GIT\n");
                out.push_str(&format!("  remote: {}\n", git.uri));
                if let Some(revision) = &git.revision {
                    out.push_str(&format!("  revision: {revision}\n"));
                }
                out.push_str(&format!("  ref: {}\n", git.reference));
                self.render_specs_for(&mut out, id);
                out.push('\n');
            }
        }
        for id in path_ids {
            let path = self.sources.get(id).path().expect("path-backed source");
            out.push_str("PATH\n");
            out.push_str(&format!("  remote: {}\n", path.display()));
            self.render_specs_for(&mut out, id);
            out.push('\n');
        }
        for id in gem_ids {
            if let Source::Rubygems(gems) = self.sources.get(id) {
                out.push_str("GEM\n");
                for remote in &gems.remotes {
                    out.push_str(&format!("  remote: {remote}\n"));
                }
                self.render_specs_for(&mut out, id);
                out.push('\n');
            }
        }

        out.push_str("PLATFORMS\n");
        let mut platforms: Vec<String> = self.platforms.iter().map(|p| p.to_string()).collect();
        platforms.sort();
        platforms.dedup();
        for platform in platforms {
            out.push_str(&format!("  {platform}\n"));
        }
        out.push('\n');

        out.push_str("DEPENDENCIES\n");
        let mut deps: Vec<&Dependency> = self.dependencies.iter().collect();
        deps.sort_by(|a, b| a.name.cmp(&b.name));
        for dep in deps {
            let pin = if dep.source.is_some() { "!" } else { "" };
            if dep.requirement.is_any() {
                out.push_str(&format!("  {}{pin}\n", dep.name));
            } else {
                out.push_str(&format!("  {} ({}){pin}\n", dep.name, dep.requirement));
            }
        }

        if preserve_unknown {
            for section in self.unknown_sections {
                out.push('\n');
                out.push_str(section);
                out.push('\n');
            }
        }

        if let Some(ruby) = self.ruby_version {
            out.push('\n');
            out.push_str("RUBY VERSION\n");
            out.push_str(&format!("   {}\n", ruby.to_lock_line()));
        }

        if let Some(bundler) = self.bundler_version {
            out.push('\n');
            out.push_str("BUNDLED WITH\n");
            out.push_str(&format!("   {bundler}\n"));
        }

        out
    }

    fn render_specs_for(&self, out: &mut String, id: SourceId) {
        out.push_str("  specs:\n");
        let mut specs: Vec<&Spec> = self.specs.iter().filter(|s| s.source == id).collect();
        specs.sort_by(|a, b| {
            a.name
                .cmp(&b.name)
                .then_with(|| a.version.cmp(&b.version))
                .then_with(|| a.platform.cmp(&b.platform))
        });
        for spec in specs {
            if spec.platform.is_ruby() {
                out.push_str(&format!("    {} ({})\n", spec.name, spec.version));
            } else {
                out.push_str(&format!(
                    "    {} ({}-{})\n",
                    spec.name, spec.version, spec.platform
                ));
            }
            let mut deps: Vec<&Dependency> = spec.dependencies.iter().collect();
            deps.sort_by(|a, b| a.name.cmp(&b.name));
            for dep in deps {
                if dep.requirement.is_any() {
                    out.push_str(&format!("      {}\n", dep.name));
                } else {
                    out.push_str(&format!("      {} ({})\n", dep.name, dep.requirement));
                }
            }
        }
    }
}

/// Whether `text` uses CRLF line endings.
pub fn has_crlf(text: &str) -> bool {
    text.contains("\r\n")
}

/// Convert LF text to CRLF.
pub fn to_crlf(text: &str) -> String {
    text.replace('\n', "\r\n")
}

/// Drop the RUBY VERSION and BUNDLED WITH sections and normalize line
/// endings, for semantic-no-op comparison.
pub fn strip_ignored_sections(text: &str) -> String {
    let normalized = text.replace("\r\n", "\n");
    let mut out = String::new();
    let mut skipping = false;
    for line in normalized.lines() {
        if !line.starts_with(' ') && !line.trim().is_empty() {
            skipping = matches!(line.trim_end(), RUBY_VERSION | BUNDLED_WITH);
        }
        if !skipping {
            out.push_str(line);
            out.push('\n');
        }
    }
    // Collapse runs of blank lines left by removed sections.
    let mut collapsed = String::new();
    let mut blank = false;
    for line in out.lines() {
        if line.trim().is_empty() {
            if !blank {
                collapsed.push('\n');
            }
            blank = true;
        } else {
            collapsed.push_str(line);
            collapsed.push('\n');
            blank = false;
        }
    }
    collapsed.trim_end().to_string()
}

/// Whether two lockfile texts are equivalent ignoring the RUBY VERSION and
/// BUNDLED WITH sections and line endings.
pub fn semantically_equal(a: &str, b: &str) -> bool {
    strip_ignored_sections(a) == strip_ignored_sections(b)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
GIT
  remote: https://git.example/widget.git
  revision: abc123def
  ref: main
  specs:
    widget (0.1.0)
      foo (>= 1.0)

GEM
  remote: https://gems.example/
  specs:
    bar (2.1.0)
    foo (1.0.3)
      bar (~> 2.0)

PLATFORMS
  ruby

DEPENDENCIES
  foo (~> 1.0)
  widget!

RUBY VERSION
   ruby 3.2.2p53

BUNDLED WITH
   2.4.10
";

    #[test]
    fn parses_sources_specs_and_dependencies() {
        let mut registry = SourceList::new();
        let lock = ParsedLockfile::parse(SAMPLE, &mut registry).unwrap();

        assert_eq!(lock.sources.len(), 2);
        assert_eq!(lock.specs.len(), 3);
        assert_eq!(lock.dependencies.len(), 2);
        assert_eq!(lock.platforms, vec![Platform::Ruby]);
        assert_eq!(lock.bundler_version, Some(Version::new(2, 4, 10)));

        let foo = &lock.specs.get("foo")[0];
        assert_eq!(foo.version, Version::new(1, 0, 3));
        assert_eq!(foo.dependencies.len(), 1);
        assert_eq!(foo.dependencies[0].requirement.to_string(), "~> 2.0");

        // widget! pins the dependency to the git source.
        let widget_dep = lock.dependencies.iter().find(|d| d.name == "widget").unwrap();
        assert_eq!(widget_dep.source, Some(lock.specs.get("widget")[0].source));

        match registry.get(lock.sources[0]) {
            Source::Git(git) => {
                assert_eq!(git.revision.as_deref(), Some("abc123def"));
                assert_eq!(git.reference, "main");
            }
            other => panic!("expected git source, got {other:?}"),
        }
    }

    #[test]
    fn parse_adopts_revision_into_declared_source() {
        let mut registry = SourceList::new();
        let declared = registry.add(Source::Git(GitSource {
            uri: "https://git.example/widget.git".into(),
            reference: "main".into(),
            revision: None,
            local_override: None,
            specs: SpecSet::new(),
        }));
        let lock = ParsedLockfile::parse(SAMPLE, &mut registry).unwrap();
        assert_eq!(lock.sources[0], declared);
        match registry.get(declared) {
            Source::Git(git) => assert_eq!(git.revision.as_deref(), Some("abc123def")),
            _ => unreachable!(),
        }
    }

    #[test]
    fn platform_specific_spec_lines_round_trip() {
        let raw = parse_spec_line("nokogiri (1.15.0-x86_64-linux)").unwrap();
        assert_eq!(raw.name, "nokogiri");
        assert_eq!(raw.version, Version::new(1, 15, 0));
        assert_eq!(raw.platform, Platform::parse("x86_64-linux"));
    }

    #[test]
    fn render_reproduces_parsed_content() {
        let mut registry = SourceList::new();
        let lock = ParsedLockfile::parse(SAMPLE, &mut registry).unwrap();
        let contents = LockfileContents {
            sources: &registry,
            specs: &lock.specs,
            dependencies: &lock.dependencies,
            platforms: &lock.platforms,
            ruby_version: lock.ruby_version.as_ref(),
            bundler_version: lock.bundler_version.as_ref(),
            unknown_sections: &lock.unknown_sections,
        };
        let rendered = contents.render(true);
        assert!(semantically_equal(SAMPLE, &rendered));
        let mut registry2 = SourceList::new();
        let reparsed = ParsedLockfile::parse(&rendered, &mut registry2).unwrap();
        assert_eq!(reparsed.specs.len(), lock.specs.len());
        assert_eq!(reparsed.dependencies.len(), lock.dependencies.len());
    }

    #[test]
    fn unknown_sections_are_retained_verbatim() {
        let text = format!("{SAMPLE}\nCHECKSUMS\n  foo (1.0.3) sha256=abc\n");
        let mut registry = SourceList::new();
        let lock = ParsedLockfile::parse(&text, &mut registry).unwrap();
        assert_eq!(lock.unknown_sections.len(), 1);
        assert!(lock.unknown_sections[0].starts_with("CHECKSUMS"));
        assert!(lock.unknown_sections[0].contains("sha256=abc"));
    }

    #[test]
    fn semantic_comparison_ignores_ruby_and_bundled_sections() {
        let without_ruby = SAMPLE
            .replace("RUBY VERSION\n   ruby 3.2.2p53\n", "")
            .replace("BUNDLED WITH\n   2.4.10\n", "");
        assert!(semantically_equal(SAMPLE, &without_ruby));
        let with_different_dep = SAMPLE.replace("foo (~> 1.0)", "foo (~> 2.0)");
        assert!(!semantically_equal(SAMPLE, &with_different_dep));
    }

    #[test]
    fn crlf_detected_and_convertible() {
        let crlf = to_crlf(SAMPLE);
        assert!(has_crlf(&crlf));
        let mut registry = SourceList::new();
        let lock = ParsedLockfile::parse(&crlf, &mut registry).unwrap();
        assert!(lock.crlf);
        assert_eq!(lock.specs.len(), 3);
    }

    #[test]
    fn redundant_platform_specs_detected() {
        let mut registry = SourceList::new();
        let text = "\
GEM
  remote: https://gems.example/
  specs:
    nokogiri (1.15.0)
    nokogiri (1.15.0-x86_64-linux)

PLATFORMS
  ruby
  x86_64-linux

DEPENDENCIES
  nokogiri
";
        let lock = ParsedLockfile::parse(text, &mut registry).unwrap();
        assert!(lock.may_include_redundant_platform_specific_gems);
    }
}
