use assert_cmd::Command;
use predicates::prelude::*;
use serial_test::serial;
use std::fs;
use tempfile::TempDir;

fn aisec(root: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("aisec").unwrap();
    cmd.env("AISEC_ROOT", root.path())
        .env_remove("AISEC_MANIFEST")
        .env("NO_COLOR", "1");
    cmd
}

#[test]
fn test_help_lists_subcommands() {
    let temp = TempDir::new().unwrap();
    aisec(&temp)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("apply"))
        .stdout(predicate::str::contains("plan"))
        .stdout(predicate::str::contains("check"));
}

#[test]
#[serial]
fn test_check_embedded_manifest() {
    let temp = TempDir::new().unwrap();
    aisec(&temp)
        .arg("check")
        .assert()
        .success()
        .stdout(predicate::str::contains("<embedded>"))
        .stdout(predicate::str::contains("(1 required)"));
}

#[test]
#[serial]
fn test_check_prefers_host_manifest_under_root() {
    let temp = TempDir::new().unwrap();
    let host_manifest = temp.path().join("etc/aisec/manifest.toml");
    fs::create_dir_all(host_manifest.parent().unwrap()).unwrap();
    fs::write(
        &host_manifest,
        r#"
[runtime]
package = "nodejs"
major = 20
setup_url = "https://deb.nodesource.com/setup_20.x"

[python]
libraries = ["garak"]

[menu]
id = "aisec"
name = "AI Security"
tag = "AISecurity"
"#,
    )
    .unwrap();

    aisec(&temp)
        .arg("check")
        .assert()
        .success()
        .stdout(predicate::str::contains("etc/aisec/manifest.toml"));
}

#[test]
#[serial]
fn test_check_reports_duplicates() {
    let temp = TempDir::new().unwrap();
    let manifest = temp.path().join("manifest.toml");
    fs::write(
        &manifest,
        r#"
[packages]
install = ["git", "git"]

[runtime]
package = "nodejs"
major = 20
setup_url = "https://deb.nodesource.com/setup_20.x"

[python]
libraries = ["garak"]

[menu]
id = "aisec"
name = "AI Security"
tag = "AISecurity"
"#,
    )
    .unwrap();

    aisec(&temp)
        .arg("check")
        .arg("--manifest")
        .arg(&manifest)
        .assert()
        .failure()
        .stderr(predicate::str::contains("[packages.install] git"))
        .stderr(predicate::str::contains("Manifest validation failed"));
}

#[test]
#[serial]
fn test_apply_requires_root() {
    if nix::unistd::geteuid().is_root() {
        eprintln!("skipping: test process runs as root");
        return;
    }

    let temp = TempDir::new().unwrap();
    aisec(&temp)
        .arg("apply")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("must be run as root"));

    assert_eq!(fs::read_dir(temp.path()).unwrap().count(), 0);
}

#[test]
#[serial]
fn test_bare_invocation_applies() {
    if nix::unistd::geteuid().is_root() {
        eprintln!("skipping: test process runs as root");
        return;
    }

    let temp = TempDir::new().unwrap();
    aisec(&temp)
        .assert()
        .code(1)
        .stderr(predicate::str::contains("must be run as root"));
}

#[test]
#[serial]
fn test_plan_is_read_only() {
    let temp = TempDir::new().unwrap();
    aisec(&temp)
        .arg("plan")
        .env("PATH", temp.path().join("empty-path"))
        .assert()
        .success()
        .stdout(predicate::str::contains("Would apply"))
        .stdout(predicate::str::contains("wrapper garak"))
        .stdout(predicate::str::contains("Plan"));

    assert_eq!(fs::read_dir(temp.path()).unwrap().count(), 0);
}

#[test]
#[serial]
fn test_plan_recalls_last_failures() {
    let temp = TempDir::new().unwrap();
    let state = temp.path().join("var/lib/aisec");
    fs::create_dir_all(&state).unwrap();
    fs::write(
        state.join("receipt.toml"),
        r#"version = 1

[metadata]
run_at = "2026-01-05T09:30:00+00:00"
manifest = "<embedded>"
aisec_version = "0.1.0"

[[actions]]
name = "nltk corpus"
policy = "best-effort"
outcome = "failed"
detail = "offline"
"#,
    )
    .unwrap();

    aisec(&temp)
        .arg("plan")
        .env("PATH", temp.path().join("empty-path"))
        .assert()
        .success()
        .stdout(predicate::str::contains("Last apply: 2026-01-05T09:30:00+00:00"))
        .stderr(predicate::str::contains("nltk corpus failed on the last apply: offline"));
}
