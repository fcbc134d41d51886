//! Lockfile writing behavior: atomic writes, frozen-mode refusal, CRLF
//! preservation, unknown-section handling, and full build round-trips.

mod common;

use common::*;
use gembundle::core::BundlerError;
use gembundle::definition::{Definition, UnlockInput};
use gembundle::lockfile;
use std::fs;
use tempfile::TempDir;

const SIMPLE_LOCK: &str = "\
GEM
  remote: https://gems.example/
  specs:
    foo (1.0.3)

PLATFORMS
  ruby

DEPENDENCIES
  foo (~> 1.0)
";

#[test]
fn lock_writes_a_parseable_lockfile() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("gems.lock");

    let (mut manifest, gems) = manifest_with(&[dep("foo", "~> 1.0"), dep("bar", "~> 2")]);
    add_gem_with_deps(&mut manifest.sources, gems, "foo", "1.0.3", &[("bar", ">= 2.0")]);
    add_gem(&mut manifest.sources, gems, "bar", "2.1.0");

    let mut definition =
        Definition::from_parts(manifest, None, UnlockInput::None, context()).unwrap();
    definition.lock(&path, true).unwrap();

    let written = fs::read_to_string(&path).unwrap();
    assert!(written.contains("GEM"));
    assert!(written.contains("    foo (1.0.3)"));
    assert!(written.contains("      bar (>= 2.0)"));
    assert!(written.contains("  bar (~> 2)"));
    assert!(written.contains("BUNDLED WITH"));

    // The written lockfile reads back as an unchanged bundle.
    let (mut manifest, gems) = manifest_with(&[dep("foo", "~> 1.0"), dep("bar", "~> 2")]);
    add_gem_with_deps(&mut manifest.sources, gems, "foo", "1.0.3", &[("bar", ">= 2.0")]);
    add_gem(&mut manifest.sources, gems, "bar", "2.1.0");
    let reread =
        Definition::from_parts(manifest, Some(written), UnlockInput::None, context()).unwrap();
    assert!(reread.nothing_changed(), "reason: {}", reread.change_reason());
}

#[test]
fn lock_is_a_noop_when_content_is_semantically_unchanged() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("gems.lock");

    let (mut manifest, gems) = manifest_with(&[dep("foo", "~> 1.0")]);
    add_gem(&mut manifest.sources, gems, "foo", "1.0.3");
    let mut definition =
        Definition::from_parts(manifest, Some(SIMPLE_LOCK.into()), UnlockInput::None, context())
            .unwrap();

    definition.lock(&path, true).unwrap();
    let first = fs::read_to_string(&path).unwrap();
    definition.lock(&path, true).unwrap();
    let second = fs::read_to_string(&path).unwrap();
    assert_eq!(first, second);
}

#[test]
fn frozen_mode_refuses_to_write_a_changed_lockfile() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("gems.lock");
    fs::write(&path, SIMPLE_LOCK).unwrap();

    let (mut manifest, gems) = manifest_with(&[dep("foo", "~> 1.0"), dep("baz", ">= 0")]);
    add_gem(&mut manifest.sources, gems, "foo", "1.0.3");
    add_gem(&mut manifest.sources, gems, "baz", "0.9.0");

    let mut ctx = context();
    ctx.settings.frozen = true;
    let mut definition =
        Definition::from_parts(manifest, Some(SIMPLE_LOCK.into()), UnlockInput::None, ctx).unwrap();

    // Never raises: the refusal is logged and the file left untouched.
    definition.lock(&path, true).unwrap();
    assert_eq!(fs::read_to_string(&path).unwrap(), SIMPLE_LOCK);
}

#[test]
fn no_lock_setting_suppresses_writes() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("gems.lock");

    let (mut manifest, gems) = manifest_with(&[dep("foo", "~> 1.0")]);
    add_gem(&mut manifest.sources, gems, "foo", "1.0.3");
    let mut ctx = context();
    ctx.settings.no_lock = true;
    let mut definition = Definition::from_parts(manifest, None, UnlockInput::None, ctx).unwrap();

    definition.lock(&path, true).unwrap();
    assert!(!path.exists());
}

#[test]
fn crlf_line_endings_are_preserved() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("gems.lock");
    fs::write(&path, lockfile::to_crlf(SIMPLE_LOCK)).unwrap();

    // An added dependency forces a rewrite.
    let (mut manifest, gems) = manifest_with(&[dep("foo", "~> 1.0"), dep("bar", "~> 2")]);
    add_gem(&mut manifest.sources, gems, "foo", "1.0.3");
    add_gem(&mut manifest.sources, gems, "bar", "2.1.0");

    let existing = fs::read_to_string(&path).unwrap();
    let mut definition =
        Definition::from_parts(manifest, Some(existing), UnlockInput::None, context()).unwrap();
    definition.lock(&path, true).unwrap();

    let written = fs::read_to_string(&path).unwrap();
    assert!(lockfile::has_crlf(&written));
    assert!(written.contains("bar (~> 2)"));
}

#[test]
fn unknown_sections_survive_rewrites_unless_unlocking() {
    let with_unknown = format!("{SIMPLE_LOCK}\nCHECKSUMS\n  foo (1.0.3) sha256=abc\n");

    let build = |unlock: UnlockInput| {
        let (mut manifest, gems) = manifest_with(&[dep("foo", ">= 0")]);
        add_gem(&mut manifest.sources, gems, "foo", "1.0.3");
        add_gem(&mut manifest.sources, gems, "foo", "1.0.4");
        Definition::from_parts(manifest, Some(with_unknown.clone()), unlock, context()).unwrap()
    };

    // Requirement loosened vs the lock, so a resolve happens either way;
    // without an unlock the unknown section is carried over.
    let mut kept = build(UnlockInput::None);
    let rendered = kept.to_lock(true).unwrap();
    assert!(rendered.contains("CHECKSUMS"), "got: {rendered}");

    let mut dropped = build(UnlockInput::Set {
        gems: vec!["foo".to_string()],
        sources: vec![],
        ruby: false,
        bundler: None,
        conservative: false,
    });
    let rendered = dropped.to_lock(true).unwrap();
    assert!(!rendered.contains("CHECKSUMS"), "got: {rendered}");
}

#[test]
fn build_reads_manifest_and_lockfile_from_disk() {
    let dir = TempDir::new().unwrap();
    let gemfile = dir.path().join("gemfile.toml");
    let lockfile_path = dir.path().join("gems.lock");

    fs::write(
        &gemfile,
        r#"
        [registry]
        remotes = ["https://gems.example/"]

        [dependencies]
        foo = "~> 1.0"
        "#,
    )
    .unwrap();
    fs::write(&lockfile_path, SIMPLE_LOCK).unwrap();

    let mut definition = Definition::build(
        &gemfile,
        Some(&lockfile_path),
        UnlockInput::None,
        context(),
    )
    .unwrap();
    assert!(definition.nothing_changed());

    // The sources were built fresh from the manifest, so the index is
    // empty; reuse of the locked set still works without consulting it.
    let specs = definition.resolve().unwrap();
    assert_eq!(names(&specs), vec!["foo"]);
}

#[test]
fn build_without_manifest_is_gemfile_not_found() {
    let dir = TempDir::new().unwrap();
    let err = Definition::build(
        &dir.path().join("missing.toml"),
        None,
        UnlockInput::None,
        context(),
    )
    .unwrap_err();
    assert!(matches!(err, BundlerError::GemfileNotFound { .. }));
}
