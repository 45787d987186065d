//! Integration tests for the `shapeplan` CLI binary.
//!
//! Every test works inside its own temp directory: documents, config,
//! state and bus output never touch the user's real locations.
#![allow(clippy::unwrap_used)]

use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use tempfile::TempDir;

// ── Helpers ─────────────────────────────────────────────────────────

const HEADER: &str = "Circuit ID,Circuit Name,Device ID,Device Name,Parent Node,MAC,IPv4,IPv6,\
Download Min Mbps,Upload Min Mbps,Download Max Mbps,Upload Max Mbps,Comment\n";

const NETWORK: &str = r#"{
    "Site_A": {
        "downloadBandwidthMbps": 100,
        "uploadBandwidthMbps": 100,
        "children": {
            "AP_A": {"downloadBandwidthMbps": 50, "uploadBandwidthMbps": 50}
        }
    }
}"#;

/// Build a [`Command`] for the `shapeplan` binary with env isolation.
fn shapeplan_cmd() -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("shapeplan");
    cmd.env("HOME", "/tmp/shapeplan-cli-test-nonexistent")
        .env("XDG_CONFIG_HOME", "/tmp/shapeplan-cli-test-nonexistent")
        .env("XDG_DATA_HOME", "/tmp/shapeplan-cli-test-nonexistent")
        .env_remove("SHAPEPLAN_CONFIG")
        .env_remove("SHAPEPLAN_OUTPUT")
        .env_remove("SHAPEPLAN_BOOT_ID")
        .env_remove("RUST_LOG");
    cmd
}

/// Concatenate stdout + stderr from a command output for flexible matching.
fn combined_output(output: &std::process::Output) -> String {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    format!("{stdout}{stderr}")
}

fn row(id: &str, parent: &str, ip: &str) -> String {
    format!("{id},Circuit {id},d{id},Device {id},{parent},,{ip},,1,1,10,10,\n")
}

/// A workspace with documents, a config path, a state dir and a bus dir.
struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn new(rows: &[String]) -> Self {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("network.json"), NETWORK).unwrap();
        fs::write(dir.path().join("circuits.csv"), format!("{HEADER}{}", rows.concat())).unwrap();
        Self { dir }
    }

    fn valid() -> Self {
        Self::new(&[
            row("c1", "AP_A", "100.64.0.1"),
            row("c2", "AP_A", "100.64.0.2"),
            row("c3", "none", "100.64.0.3"),
        ])
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// Command wired to this workspace's files, with four queues.
    fn cmd(&self) -> assert_cmd::Command {
        let mut cmd = shapeplan_cmd();
        cmd.arg("--config")
            .arg(self.path("config.toml"))
            .arg("--network")
            .arg(self.path("network.json"))
            .arg("--circuits")
            .arg(self.path("circuits.csv"))
            .arg("--state-dir")
            .arg(self.path("state"))
            .args(["--queues", "4"]);
        cmd
    }

    fn reload(&self, boot_id: &str) -> assert_cmd::assert::Assert {
        self.cmd()
            .args(["-o", "plain", "reload", "--boot-id", boot_id, "--output-dir"])
            .arg(self.path("out"))
            .assert()
    }
}

fn read(path: &Path) -> String {
    fs::read_to_string(path).unwrap()
}

// ── Basic invocation ────────────────────────────────────────────────

#[test]
fn test_no_args_shows_help() {
    let output = shapeplan_cmd().output().unwrap();
    assert_eq!(output.status.code(), Some(2), "Expected exit code 2");
    let text = combined_output(&output);
    assert!(text.contains("Usage"), "Expected 'Usage' in output:\n{text}");
}

#[test]
fn test_help_flag() {
    shapeplan_cmd().arg("--help").assert().success().stdout(
        predicate::str::contains("queue")
            .and(predicate::str::contains("validate"))
            .and(predicate::str::contains("reload"))
            .and(predicate::str::contains("shards")),
    );
}

#[test]
fn test_version_flag() {
    shapeplan_cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("shapeplan"));
}

// ── Shell completions ───────────────────────────────────────────────

#[test]
fn test_completions_bash() {
    shapeplan_cmd()
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::is_empty().not());
}

#[test]
fn test_completions_zsh() {
    shapeplan_cmd()
        .args(["completions", "zsh"])
        .assert()
        .success()
        .stdout(predicate::str::contains("#compdef"));
}

// ── Error cases ─────────────────────────────────────────────────────

#[test]
fn test_invalid_subcommand() {
    let output = shapeplan_cmd().arg("foobar").output().unwrap();
    assert!(!output.status.success(), "Expected failure for invalid subcommand");
    let text = combined_output(&output);
    assert!(
        text.contains("unrecognized") || text.contains("foobar"),
        "Expected error mentioning invalid subcommand:\n{text}"
    );
}

#[test]
fn test_missing_documents() {
    let ws = Workspace::valid();
    let output = shapeplan_cmd()
        .arg("--config")
        .arg(ws.path("config.toml"))
        .arg("--network")
        .arg(ws.path("missing.json"))
        .arg("validate")
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));
    let text = combined_output(&output);
    assert!(text.contains("missing.json"), "Expected path in error:\n{text}");
}

// ── Config ──────────────────────────────────────────────────────────

#[test]
fn test_config_path_honours_flag() {
    let ws = Workspace::valid();
    shapeplan_cmd()
        .arg("--config")
        .arg(ws.path("config.toml"))
        .args(["config", "path"])
        .assert()
        .success()
        .stdout(predicate::str::contains("config.toml"));
}

#[test]
fn test_config_init_then_show() {
    let ws = Workspace::valid();
    let path = ws.path("nested/config.toml");

    shapeplan_cmd()
        .arg("--config")
        .arg(&path)
        .args(["config", "init"])
        .assert()
        .success();
    assert!(read(&path).contains("[interfaces]"));

    shapeplan_cmd()
        .arg("--config")
        .arg(&path)
        .args(["config", "init"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("--force"));

    shapeplan_cmd()
        .arg("--config")
        .arg(&path)
        .args(["config", "init", "--force"])
        .assert()
        .success();

    shapeplan_cmd()
        .arg("--config")
        .arg(&path)
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("download = \"eth1\""));
}

#[test]
fn test_invalid_config_is_a_usage_error() {
    let ws = Workspace::valid();
    fs::write(
        ws.path("config.toml"),
        "[shaping]\ncommitted_bandwidth_multiplier = 1.5\n",
    )
    .unwrap();
    ws.cmd()
        .arg("validate")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("committed_bandwidth_multiplier"));
}

// ── Validate ────────────────────────────────────────────────────────

#[test]
fn test_validate_clean_documents() {
    let ws = Workspace::valid();
    ws.cmd()
        .arg("validate")
        .assert()
        .success()
        .stderr(predicate::str::contains("3 circuit(s)").and(predicate::str::contains("0 warning(s)")));
}

#[test]
fn test_validate_duplicate_ip_fails() {
    let ws = Workspace::new(&[
        row("c1", "AP_A", "100.64.0.1"),
        row("c2", "AP_A", "100.64.0.1"),
    ]);
    let output = ws.cmd().args(["-o", "plain", "validate"]).output().unwrap();
    assert_eq!(output.status.code(), Some(3));
    let text = combined_output(&output);
    assert!(text.contains("100.64.0.1"), "Expected duplicate IP in output:\n{text}");
}

// ── Compile ─────────────────────────────────────────────────────────

#[test]
fn test_compile_batch_json() {
    let ws = Workspace::valid();
    let output = ws.cmd().args(["-o", "json", "compile", "--batch"]).output().unwrap();
    assert!(output.status.success(), "{}", combined_output(&output));

    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["queues"], 4);
    assert_eq!(json["sharded"], 1);
    assert!(!json["batch"]["operations"].as_array().unwrap().is_empty());
    assert_eq!(json["batch"]["ipMappings"].as_array().unwrap().len(), 3);
}

#[test]
fn test_compile_plan_lists_circuits() {
    let ws = Workspace::valid();
    ws.cmd()
        .args(["-o", "plain", "compile"])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("Site_A")
                .and(predicate::str::contains("c1"))
                .and(predicate::str::contains("c3")),
        );
    assert!(!ws.path("state").join("planner_state.json").exists());
}

#[test]
fn test_compile_with_one_queue_is_an_environment_error() {
    let ws = Workspace::valid();
    ws.cmd()
        .args(["--queues", "1", "compile"])
        .assert()
        .code(5);
}

// ── Reload ──────────────────────────────────────────────────────────

#[test]
fn test_reload_full_then_noop() {
    let ws = Workspace::valid();
    ws.reload("boot-1").success().stdout(predicate::str::diff("full\n"));
    assert!(ws.path("out/full.json").exists());
    assert!(ws.path("state/reload_state.json").exists());

    ws.reload("boot-1").success().stdout(predicate::str::diff("no_op\n"));
}

#[test]
fn test_reload_patches_bandwidth_change() {
    let ws = Workspace::valid();
    ws.reload("boot-1").success();

    let changed = format!(
        "{HEADER}{}{}{}",
        "c1,Circuit c1,dc1,Device c1,AP_A,,100.64.0.1,,1,1,20,20,\n",
        row("c2", "AP_A", "100.64.0.2"),
        row("c3", "none", "100.64.0.3"),
    );
    fs::write(ws.path("circuits.csv"), changed).unwrap();

    ws.reload("boot-1").success().stdout(predicate::str::diff("incremental\n"));
    assert!(ws.path("out/patch-000001.json").exists());
}

#[test]
fn test_reload_invalid_documents_keep_running_queues() {
    let ws = Workspace::valid();
    ws.reload("boot-1").success();
    let applied = read(&ws.path("out/full.json"));

    fs::write(
        ws.path("circuits.csv"),
        format!(
            "{HEADER}{}{}",
            row("c1", "AP_A", "100.64.0.1"),
            row("c2", "AP_A", "100.64.0.1")
        ),
    )
    .unwrap();
    ws.reload("boot-1").code(3);
    assert_eq!(read(&ws.path("out/full.json")), applied);
}

// ── Import ──────────────────────────────────────────────────────────

#[test]
fn test_import_writes_both_documents() {
    let ws = Workspace::valid();
    fs::write(
        ws.path("graph.json"),
        r#"{"nodes": [
            {"id": "s", "displayName": "Site", "type": "site", "downloadMbps": 500, "uploadMbps": 500},
            {"id": "a", "displayName": "AP", "type": "ap", "parentId": "s", "downloadMbps": 200, "uploadMbps": 200},
            {"id": "cust", "displayName": "Customer", "type": "client", "parentId": "a", "downloadMbps": 100, "uploadMbps": 20},
            {"id": "cpe", "displayName": "CPE", "type": "device", "parentId": "cust", "ipv4": ["100.64.9.1"]}
        ]}"#,
    )
    .unwrap();

    ws.cmd()
        .arg("import")
        .arg(ws.path("graph.json"))
        .arg("--network-out")
        .arg(ws.path("imported/network.json"))
        .arg("--circuits-out")
        .arg(ws.path("imported/circuits.csv"))
        .assert()
        .success()
        .stdout(predicate::str::contains("1 circuit row(s)"));

    let table = read(&ws.path("imported/circuits.csv"));
    assert!(table.starts_with("Circuit ID,"));
    assert!(table.contains("cust"));
    assert!(table.contains("100.64.9.1"));
    let network: serde_json::Value =
        serde_json::from_str(&read(&ws.path("imported/network.json"))).unwrap();
    assert!(network.as_object().is_some_and(|o| o.len() == 1));
}

// ── Shards ──────────────────────────────────────────────────────────

#[test]
fn test_shards_without_state() {
    let ws = Workspace::valid();
    ws.cmd()
        .arg("shards")
        .assert()
        .success()
        .stderr(predicate::str::contains("No planner state"));
}

#[test]
fn test_shards_after_reload() {
    let ws = Workspace::valid();
    ws.reload("boot-1").success();
    ws.cmd()
        .args(["-o", "plain", "shards"])
        .assert()
        .success()
        .stdout(predicate::str::starts_with("c3\t"));
}
