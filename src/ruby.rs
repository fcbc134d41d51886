//! Ruby version declarations and runtime checks.
//!
//! A gemfile may pin the ruby the bundle expects; the lockfile records the
//! ruby that produced it. Both are modeled by [`RubyVersion`], which also
//! describes the running interpreter when validating at runtime. Declared
//! versions are requirement strings (`"~> 3.1"` is valid in a gemfile);
//! locked and running versions are concrete.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::core::{BundlerError, Result};
use crate::version::{parse_version, Requirement};

/// A ruby version declaration or concrete runtime description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RubyVersion {
    /// Interpreter engine (`ruby`, `jruby`, `truffleruby`).
    #[serde(default = "default_engine")]
    pub engine: String,
    /// Version requirements (declared) or a single concrete version
    /// (locked / running).
    pub versions: Vec<String>,
    /// Patchlevel as a string; compared verbatim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patchlevel: Option<String>,
    /// Engine version for non-MRI engines.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engine_version: Option<String>,
}

fn default_engine() -> String {
    "ruby".to_string()
}

impl RubyVersion {
    /// A concrete version, as used for the running interpreter.
    pub fn concrete(engine: &str, version: &str, patchlevel: Option<&str>) -> Self {
        Self {
            engine: engine.to_string(),
            versions: vec![version.to_string()],
            patchlevel: patchlevel.map(str::to_string),
            engine_version: None,
        }
    }

    /// Parse the lockfile RUBY VERSION line, e.g. `ruby 3.1.4p223`.
    pub fn from_lock_line(line: &str) -> Result<Self> {
        let mut words = line.split_whitespace();
        let engine = words
            .next()
            .ok_or_else(|| BundlerError::LockfileError {
                reason: "RUBY VERSION section is empty".to_string(),
            })?
            .to_string();
        let rest = words.next().ok_or_else(|| BundlerError::LockfileError {
            reason: format!("RUBY VERSION line '{line}' has no version"),
        })?;
        let (version, patchlevel) = match rest.split_once('p') {
            Some((v, p)) if p.chars().all(|c| c.is_ascii_digit()) && !p.is_empty() => {
                (v.to_string(), Some(p.to_string()))
            }
            _ => (rest.to_string(), None),
        };
        Ok(Self {
            engine,
            versions: vec![version],
            patchlevel,
            engine_version: None,
        })
    }

    /// Render in lockfile form: `ruby 3.1.4p223`.
    pub fn to_lock_line(&self) -> String {
        let mut out = format!("{} {}", self.engine, self.versions.join(", "));
        if let Some(p) = &self.patchlevel {
            out.push('p');
            out.push_str(p);
        }
        out
    }

    /// The first mismatching subfield between this declaration and a
    /// concrete `running` ruby, as `(field, expected, actual)`.
    ///
    /// Fields are checked in order: engine, version, engine version,
    /// patchlevel. `None` means the declaration is satisfied.
    pub fn diff(&self, running: &Self) -> Option<(String, String, String)> {
        if self.engine != running.engine {
            return Some(("engine".into(), self.engine.clone(), running.engine.clone()));
        }
        let running_version = running.versions.first()?;
        let concrete = parse_version(running_version).ok()?;
        let satisfied = self.versions.iter().all(|req| {
            Requirement::parse(req).map(|r| r.matches(&concrete)).unwrap_or(false)
        });
        if !satisfied {
            return Some((
                "version".into(),
                self.versions.join(", "),
                running_version.clone(),
            ));
        }
        if self.engine != "ruby" {
            if let (Some(expected), Some(actual)) =
                (&self.engine_version, &running.engine_version)
            {
                if expected != actual {
                    return Some(("engine version".into(), expected.clone(), actual.clone()));
                }
            }
        }
        if let Some(expected) = &self.patchlevel {
            let actual = running.patchlevel.clone().unwrap_or_else(|| "unknown".into());
            if *expected != actual {
                return Some(("patchlevel".into(), expected.clone(), actual));
            }
        }
        None
    }

    /// Validate a concrete running ruby against this declaration.
    pub fn check(&self, running: &Self) -> Result<()> {
        match self.diff(running) {
            None => Ok(()),
            Some((field, expected, actual)) => Err(BundlerError::RubyVersionMismatch {
                field,
                expected,
                actual,
            }),
        }
    }
}

impl fmt::Display for RubyVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_lock_line())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_line_round_trips() {
        let ruby = RubyVersion::from_lock_line("ruby 3.1.4p223").unwrap();
        assert_eq!(ruby.engine, "ruby");
        assert_eq!(ruby.versions, vec!["3.1.4".to_string()]);
        assert_eq!(ruby.patchlevel.as_deref(), Some("223"));
        assert_eq!(ruby.to_lock_line(), "ruby 3.1.4p223");
    }

    #[test]
    fn requirement_style_declaration_matches_running() {
        let declared = RubyVersion {
            engine: "ruby".into(),
            versions: vec!["~> 3.1".into()],
            patchlevel: None,
            engine_version: None,
        };
        let running = RubyVersion::concrete("ruby", "3.1.4", Some("223"));
        assert!(declared.diff(&running).is_none());
        declared.check(&running).unwrap();
    }

    #[test]
    fn engine_mismatch_reported_first() {
        let declared = RubyVersion {
            engine: "jruby".into(),
            versions: vec!["9.4.0".into()],
            patchlevel: None,
            engine_version: Some("9.4.0.0".into()),
        };
        let running = RubyVersion::concrete("ruby", "3.1.4", None);
        let (field, expected, actual) = declared.diff(&running).unwrap();
        assert_eq!(field, "engine");
        assert_eq!(expected, "jruby");
        assert_eq!(actual, "ruby");
    }

    #[test]
    fn patchlevel_compared_as_string() {
        let declared = RubyVersion {
            engine: "ruby".into(),
            versions: vec!["3.1.4".into()],
            patchlevel: Some("223".into()),
            engine_version: None,
        };
        let running = RubyVersion::concrete("ruby", "3.1.4", Some("111"));
        let err = declared.check(&running).unwrap_err();
        match err {
            BundlerError::RubyVersionMismatch { field, .. } => assert_eq!(field, "patchlevel"),
            other => panic!("unexpected error: {other}"),
        }
    }
}
