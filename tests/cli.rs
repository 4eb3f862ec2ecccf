// tests/cli.rs

//! CLI smoke tests
//!
//! Every test runs against its own formula directory, cellar, cache and
//! receipt database inside a temp dir. The only network-free resource URLs
//! are `file://`, so installs here build from local tarballs with `sh`.

mod common;

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use common::source_tarball;
use formulary::hash::sha256;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

/// Temp layout with formula dir and command builder
struct Workspace {
    root: TempDir,
}

impl Workspace {
    fn new() -> Self {
        let root = TempDir::new().unwrap();
        fs::create_dir_all(root.path().join("formulas")).unwrap();
        Self { root }
    }

    fn path(&self) -> &Path {
        self.root.path()
    }

    fn add_formula(&self, name: &str, toml: &str) {
        fs::write(self.path().join("formulas").join(format!("{name}.toml")), toml).unwrap();
    }

    /// Local tarball for `name` 1.0; returns (file URL, sha256)
    fn add_tarball(&self, name: &str, files: &[(&str, &str)]) -> (String, String) {
        let data = source_tarball(&format!("{name}-1.0"), files);
        let path = self.path().join(format!("{name}-1.0.tar.gz"));
        fs::write(&path, &data).unwrap();
        let url = url::Url::from_file_path(&path).unwrap().to_string();
        (url, sha256(&data))
    }

    fn cmd(&self) -> Command {
        let mut cmd = cargo_bin_cmd!("formulary");
        cmd.arg("--formula-dir")
            .arg(self.path().join("formulas"))
            .arg("--prefix")
            .arg(self.path().join("cellar"))
            .arg("--cache")
            .arg(self.path().join("cache"))
            .arg("--db")
            .arg(self.path().join("receipts.db"))
            .arg("--timeout")
            .arg("60");
        cmd
    }
}

const HELLO_SCRIPT: &str = "#!/bin/sh\necho hello from formulary\n";

fn hello_formula(url: &str, digest: &str) -> String {
    format!(
        r#"
name = "hello"
desc = "Prints a greeting"
license = "MIT"

[resource]
url = "{url}"
sha256 = "{digest}"

[install]
commands = [
    ["sh", "-c", "mkdir -p %(prefix)s/bin && cp hello.sh %(prefix)s/bin/hello && chmod +x %(prefix)s/bin/hello"],
]

[test]
commands = [
    ["sh", "-c", "hello > out.txt"],
    ["grep", "-q", "hello from formulary", "out.txt"],
]
"#
    )
}

fn failing_formula(url: &str, digest: &str) -> String {
    format!(
        r#"
name = "broken"

[resource]
url = "{url}"
sha256 = "{digest}"

[install]
commands = [
    ["sh", "-c", "echo configuring; exit 3"],
    ["sh", "-c", "touch %(prefix)s/never"],
]
"#
    )
}

// =============================================================================
// Help & Version
// =============================================================================

#[test]
fn help_lists_commands() {
    cargo_bin_cmd!("formulary")
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Usage"))
        .stdout(predicate::str::contains("install"))
        .stdout(predicate::str::contains("livecheck"));
}

#[test]
fn version_flag_works() {
    cargo_bin_cmd!("formulary")
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn livecheck_requires_a_formula() {
    cargo_bin_cmd!("formulary").arg("livecheck").assert().failure();
}

// =============================================================================
// Queries
// =============================================================================

#[test]
fn list_and_info_read_formula_dir() {
    let ws = Workspace::new();
    let (url, digest) = ws.add_tarball("hello", &[("hello.sh", HELLO_SCRIPT)]);
    ws.add_formula("hello", &hello_formula(&url, &digest));

    ws.cmd()
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("hello 1.0"));

    ws.cmd()
        .args(["info", "hello"])
        .assert()
        .success()
        .stdout(predicate::str::contains("hello: 1.0"))
        .stdout(predicate::str::contains("License: MIT"))
        .stdout(predicate::str::contains("Not installed"));
}

#[test]
fn list_survives_unparsable_formula() {
    let ws = Workspace::new();
    let (url, digest) = ws.add_tarball("hello", &[("hello.sh", HELLO_SCRIPT)]);
    ws.add_formula("hello", &hello_formula(&url, &digest));
    ws.add_formula("broken", "name = [not toml");

    ws.cmd()
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("broken ?"))
        .stdout(predicate::str::contains("hello 1.0"))
        .stderr(predicate::str::contains("Skipping version of broken"));
}

#[test]
fn deps_prints_resolution_order() {
    let ws = Workspace::new();
    let (url, digest) = ws.add_tarball("hello", &[("hello.sh", HELLO_SCRIPT)]);
    ws.add_formula("hello", &hello_formula(&url, &digest));
    ws.add_formula(
        "app",
        &format!(
            "name = \"app\"\nversion = \"2.0\"\n[resource]\nurl = \"{url}\"\nsha256 = \"{digest}\"\n\n[[requirements]]\nname = \"hello\"\nkind = \"build\"\n"
        ),
    );

    ws.cmd()
        .args(["deps", "app"])
        .assert()
        .success()
        .stdout(predicate::str::is_match(r"1\. hello\s+2\. app").unwrap());
}

#[test]
fn unknown_formula_is_resolution_error() {
    let ws = Workspace::new();

    ws.cmd()
        .args(["info", "nope"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("no formula named 'nope'"));
}

#[test]
fn cycle_is_resolution_error() {
    let ws = Workspace::new();
    let (url, digest) = ws.add_tarball("a", &[("README", "a\n")]);
    for (name, other) in [("a", "b"), ("b", "a")] {
        ws.add_formula(
            name,
            &format!(
                "name = \"{name}\"\nversion = \"1.0\"\n[resource]\nurl = \"{url}\"\nsha256 = \"{digest}\"\n\n[[requirements]]\nname = \"{other}\"\n"
            ),
        );
    }

    ws.cmd()
        .args(["install", "a"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("cyclic dependency: a -> b -> a"));
}

// =============================================================================
// Lifecycle
// =============================================================================

#[test]
fn test_before_install_fails() {
    let ws = Workspace::new();
    let (url, digest) = ws.add_tarball("hello", &[("hello.sh", HELLO_SCRIPT)]);
    ws.add_formula("hello", &hello_formula(&url, &digest));

    ws.cmd()
        .args(["test", "hello"])
        .assert()
        .code(6)
        .stderr(predicate::str::contains("not installed"));
}

#[test]
fn install_then_test() {
    let ws = Workspace::new();
    let (url, digest) = ws.add_tarball("hello", &[("hello.sh", HELLO_SCRIPT)]);
    ws.add_formula("hello", &hello_formula(&url, &digest));

    ws.cmd()
        .args(["install", "hello"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Installed hello 1.0"));
    assert!(ws.path().join("cellar/hello/1.0/bin/hello").is_file());

    ws.cmd()
        .args(["install", "hello"])
        .assert()
        .success()
        .stdout(predicate::str::contains("already installed"));

    ws.cmd()
        .args(["test", "hello"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[OK] hello 1.0 passed"));

    ws.cmd()
        .args(["list", "--installed"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[installed 1.0]"));
}

#[test]
fn checksum_mismatch_is_verification_error() {
    let ws = Workspace::new();
    let (url, _) = ws.add_tarball("hello", &[("hello.sh", HELLO_SCRIPT)]);
    ws.add_formula("hello", &hello_formula(&url, &sha256(b"something else")));

    ws.cmd()
        .args(["install", "hello"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("checksum mismatch"));
    assert!(!ws.path().join("cellar/hello").join("1.0").exists());
}

#[test]
fn failing_stage_is_stage_error() {
    let ws = Workspace::new();
    let (url, digest) = ws.add_tarball("broken", &[("README", "broken\n")]);
    ws.add_formula("broken", &failing_formula(&url, &digest));

    ws.cmd()
        .args(["install", "broken"])
        .assert()
        .code(4)
        .stderr(predicate::str::contains("exit status 3"))
        .stderr(predicate::str::contains("configuring"));
    assert!(!ws.path().join("cellar/broken/1.0").exists());

    ws.cmd()
        .args(["list", "--installed"])
        .assert()
        .success()
        .stdout(predicate::str::is_empty());
}

#[test]
fn fetch_populates_cache() {
    let ws = Workspace::new();
    let (url, digest) = ws.add_tarball("hello", &[("hello.sh", HELLO_SCRIPT)]);
    ws.add_formula("hello", &hello_formula(&url, &digest));

    ws.cmd()
        .args(["fetch", "hello"])
        .assert()
        .success()
        .stdout(predicate::str::contains("1 artifact(s) verified"));
    assert!(ws.path().join("cache").join(format!("sha256_{digest}")).is_file());
}
