#![allow(deprecated)] // cargo_bin! macro doesn't exist yet in assert_cmd 2.1

use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

const TEST_PASSWORD: &str = "test-password-123";

/// Exit code for unresolved conflicts.
const CONFLICTS: i32 = 7;
const AUTH_FAILED: i32 = 3;
const DIRECTORY_INVALID: i32 = 4;

struct Workspace {
    temp: TempDir,
}

impl Workspace {
    fn new() -> Self {
        Workspace {
            temp: TempDir::new().expect("Failed to create temp dir"),
        }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.temp.path().join(name)
    }

    fn config_dir(&self) -> PathBuf {
        self.path("config")
    }

    fn helix(&self) -> Command {
        let mut cmd = self.helix_no_password();
        cmd.env("HELIX_PASSWORD", TEST_PASSWORD);
        cmd
    }

    fn helix_no_password(&self) -> Command {
        let mut cmd = Command::cargo_bin("helix").unwrap();
        cmd.env("HELIX_CONFIG_DIR", self.config_dir());
        cmd.env_remove("HELIX_PASSWORD");
        cmd.env_remove("RUST_LOG");
        cmd
    }

    /// `helix init` with cheap key derivation.
    fn init(&self, encrypted: &Path) {
        self.helix()
            .arg("init")
            .arg(encrypted)
            .args(["--file-version", "unit-test"])
            .assert()
            .success();
    }

    fn sync(&self, decrypted: &Path, encrypted: &Path) -> assert_cmd::assert::Assert {
        self.helix().arg("sync").arg(decrypted).arg(encrypted).assert()
    }
}

fn write(path: &Path, content: &str) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

#[test]
fn test_help() {
    Workspace::new()
        .helix_no_password()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("encrypted mirror"))
        .stdout(predicate::str::contains("sync"))
        .stdout(predicate::str::contains("status"))
        .stdout(predicate::str::contains("inspect"));
}

#[test]
fn test_version() {
    Workspace::new()
        .helix_no_password()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("helix"));
}

#[test]
fn test_init_creates_header() {
    let ws = Workspace::new();
    let encrypted = ws.path("encr");
    ws.helix()
        .arg("init")
        .arg(&encrypted)
        .args(["--file-version", "unit-test"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Initialized encrypted directory"));
    assert!(encrypted.join("helix.hx").is_file());
}

#[test]
fn test_init_refuses_existing_directory() {
    let ws = Workspace::new();
    let encrypted = ws.path("encr");
    ws.init(&encrypted);
    ws.helix()
        .arg("init")
        .arg(&encrypted)
        .args(["--file-version", "unit-test"])
        .assert()
        .code(DIRECTORY_INVALID);
}

#[test]
fn test_sync_requires_initialized_directory() {
    let ws = Workspace::new();
    ws.sync(&ws.path("plain"), &ws.path("encr"))
        .code(DIRECTORY_INVALID)
        .stderr(predicate::str::contains("not an initialized encrypted directory"));
}

#[test]
fn test_sync_round_trip_between_replicas() {
    let ws = Workspace::new();
    let encrypted = ws.path("encr");
    ws.init(&encrypted);
    write(&ws.path("a/notes/today.md"), "remember the milk");

    ws.sync(&ws.path("a"), &encrypted)
        .success()
        .stdout(predicate::str::contains("+ => notes/today.md"))
        .stdout(predicate::str::contains("2 synced, 0 conflicts, 0 failed"));

    ws.sync(&ws.path("b"), &encrypted)
        .success()
        .stdout(predicate::str::contains("+ <= notes/today.md"));
    assert_eq!(fs::read_to_string(ws.path("b/notes/today.md")).unwrap(), "remember the milk");

    ws.sync(&ws.path("b"), &encrypted)
        .success()
        .stdout(predicate::str::contains("0 synced"));
}

#[test]
fn test_sync_init_flag_creates_directory() {
    let ws = Workspace::new();
    write(&ws.path("a/file.txt"), "x");
    ws.helix()
        .arg("sync")
        .arg("--init")
        .args(["--file-version", "unit-test"])
        .arg(ws.path("a"))
        .arg(ws.path("encr"))
        .assert()
        .success();
    assert!(ws.path("encr/helix.hx").is_file());
}

#[test]
fn test_what_if_changes_nothing() {
    let ws = Workspace::new();
    let encrypted = ws.path("encr");
    ws.init(&encrypted);
    write(&ws.path("a/file.txt"), "x");

    ws.helix()
        .arg("sync")
        .arg("--what-if")
        .arg(ws.path("a"))
        .arg(&encrypted)
        .assert()
        .success()
        .stdout(predicate::str::contains("What-if: 1 synced"));
    assert_eq!(fs::read_dir(&encrypted).unwrap().count(), 1);
}

#[test]
fn test_status_lists_pending_changes() {
    let ws = Workspace::new();
    let encrypted = ws.path("encr");
    ws.init(&encrypted);
    write(&ws.path("a/pending.txt"), "x");

    ws.helix()
        .arg("status")
        .arg(ws.path("a"))
        .arg(&encrypted)
        .assert()
        .success()
        .stdout(predicate::str::contains("pending.txt"));

    ws.sync(&ws.path("a"), &encrypted).success();
    ws.helix()
        .arg("status")
        .arg(ws.path("a"))
        .arg(&encrypted)
        .assert()
        .success()
        .stdout(predicate::str::contains("Up to date"));
}

#[test]
fn test_status_json() {
    let ws = Workspace::new();
    let encrypted = ws.path("encr");
    ws.init(&encrypted);
    write(&ws.path("a/pending.txt"), "x");

    let output = ws
        .helix()
        .arg("status")
        .arg("--json")
        .arg(ws.path("a"))
        .arg(&encrypted)
        .output()
        .unwrap();
    assert!(output.status.success());
    let rows: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(rows[0]["name"], "pending.txt");
    assert_eq!(rows[0]["operation"], "add");
}

#[test]
fn test_wrong_password_exit_code() {
    let ws = Workspace::new();
    let encrypted = ws.path("encr");
    ws.init(&encrypted);

    ws.helix_no_password()
        .args(["--password", "not-the-password"])
        .arg("sync")
        .arg(ws.path("a"))
        .arg(&encrypted)
        .assert()
        .code(AUTH_FAILED);
}

#[test]
fn test_conflict_exit_code_and_resolution() {
    let ws = Workspace::new();
    let encrypted = ws.path("encr");
    ws.init(&encrypted);
    write(&ws.path("a/shared.txt"), "base");
    ws.sync(&ws.path("a"), &encrypted).success();
    ws.sync(&ws.path("b"), &encrypted).success();

    write(&ws.path("a/shared.txt"), "edited on a");
    ws.sync(&ws.path("a"), &encrypted).success();
    write(&ws.path("b/shared.txt"), "edited on b, differently");

    ws.sync(&ws.path("b"), &encrypted)
        .code(CONFLICTS)
        .stderr(predicate::str::contains("conflict: shared.txt"));

    ws.helix()
        .arg("sync")
        .args(["--resolve", "encrypted"])
        .arg(ws.path("b"))
        .arg(&encrypted)
        .assert()
        .success();
    assert_eq!(fs::read_to_string(ws.path("b/shared.txt")).unwrap(), "edited on a");
}

#[test]
fn test_alias_from_config() {
    let ws = Workspace::new();
    let encrypted = ws.path("encr");
    ws.init(&encrypted);
    write(&ws.path("a/aliased.txt"), "x");
    fs::create_dir_all(ws.config_dir()).unwrap();
    fs::write(
        ws.config_dir().join("config.toml"),
        format!(
            "[pairs.docs]\ndecrypted = {:?}\nencrypted = {:?}\n",
            ws.path("a").display().to_string(),
            encrypted.display().to_string()
        ),
    )
    .unwrap();

    ws.helix()
        .args(["sync", "@docs"])
        .assert()
        .success()
        .stdout(predicate::str::contains("aliased.txt"));

    ws.helix()
        .args(["sync", "@missing"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown pair alias @missing"));
}

#[test]
fn test_inspect_shows_entry() {
    let ws = Workspace::new();
    let encrypted = ws.path("encr");
    ws.init(&encrypted);
    write(&ws.path("a/inspect-me.txt"), "12345");
    ws.sync(&ws.path("a"), &encrypted).success();

    let file = fs::read_dir(&encrypted)
        .unwrap()
        .map(|e| e.unwrap().path())
        .find(|p| p.file_name().is_some_and(|n| n != "helix.hx"))
        .unwrap();

    ws.helix()
        .arg("inspect")
        .arg("--json")
        .arg(&file)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"name\": \"inspect-me.txt\""))
        .stdout(predicate::str::contains("\"length\": 5"));
}

#[test]
fn test_cleanup_removes_staged_files() {
    let ws = Workspace::new();
    write(&ws.path("plain/doc.txt.~hx-st"), "partial");
    write(&ws.path("plain/keep.txt"), "keep");

    ws.helix_no_password()
        .arg("cleanup")
        .arg(ws.path("plain"))
        .assert()
        .success()
        .stdout(predicate::str::contains("removed 1 staged"));
    assert!(!ws.path("plain/doc.txt.~hx-st").exists());
    assert!(ws.path("plain/keep.txt").exists());
}
