//! Lockfile validation: missing and invalid transitive dependencies.
//!
//! Runs after convergence. A locked spec whose dependency names a gem with
//! no locked spec at all is *missing*; one whose dependency has locked
//! specs but none satisfying the requirement is *invalid*. Offenders are
//! deleted from the locked set before planning, so resolution re-derives
//! them instead of trusting a corrupt lock.

use tracing::debug;

use crate::spec::Spec;

use super::Definition;

impl Definition {
    /// Scan locked specs for missing/invalid transitive deps, delete the
    /// offenders, and raise the corresponding flags.
    pub(crate) fn validate_lockfile(&mut self) {
        let mut missing: Vec<Spec> = Vec::new();
        let mut invalid: Vec<Spec> = Vec::new();

        for spec in self.locked.specs.iter() {
            for dep in &spec.dependencies {
                let candidates = self.locked.specs.get(&dep.name);
                if candidates.is_empty() {
                    missing.push(spec.clone());
                    break;
                }
                if !candidates.iter().any(|c| dep.requirement.matches(&c.version)) {
                    invalid.push(spec.clone());
                    break;
                }
            }
        }

        if !missing.is_empty() {
            debug!(count = missing.len(), "locked specs with missing deps removed");
            self.locked.specs.delete(&missing);
            self.flags.missing_lockfile_dep = Some(missing[0].name.clone());
        } else if !self.flags.dependency_changes {
            // No spec-level gaps: check that every declared dep (other
            // than bundler itself) has a locked spec.
            let unlocked_declared = self
                .dependencies
                .iter()
                .find(|d| d.name != crate::source::BUNDLER && self.locked.specs.get(&d.name).is_empty());
            if let Some(dep) = unlocked_declared {
                self.flags.missing_lockfile_dep = Some(dep.name.clone());
            }
        }

        if !invalid.is_empty() {
            debug!(count = invalid.len(), "locked specs with invalid deps removed");
            self.locked.specs.delete(&invalid);
            self.flags.invalid_lockfile_dep = true;
        }
    }
}
