//! CLI integration tests for the Conduit command-line interface.
//!
//! These tests verify:
//! - Help text is displayed correctly
//! - Configuration files are loaded and listed
//! - Invalid inputs are rejected with appropriate messages
//!
//! Note: These tests do not need Docker or any MCP server.

use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

const SAMPLE: &str = r#"
[[servers]]
name = "fetch"
transport = "uvx"
command = "uvx"
args = ["mcp-server-fetch", "--api-key", "sk-secret"]

[[servers]]
name = "db"
transport = "docker"
image = "mcp/sqlite"
container_args = ["--rm", "-i"]

[[servers]]
name = "remote"
transport = "http"
url = "https://mcp.example.com/rpc?token=abc"
enabled = false
"#;

/// Get a command for the conduit binary, with logs kept inside `home`.
fn conduit(home: &Path) -> Command {
    let mut cmd = Command::cargo_bin("conduit").unwrap();
    cmd.env("XDG_CONFIG_HOME", home)
        .env("HOME", home)
        .env_remove("CONDUIT_CONFIG")
        .env_remove("DOCKER_HOST");
    cmd
}

fn write_config(dir: &TempDir) -> std::path::PathBuf {
    let path = dir.path().join("servers.toml");
    std::fs::write(&path, SAMPLE).unwrap();
    path
}

// ─────────────────────────────────────────────────────────────────────────────
// Help and Version Tests
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_help_displays() {
    let home = TempDir::new().unwrap();
    conduit(home.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Conduit"))
        .stdout(predicate::str::contains("MCP servers"));
}

#[test]
fn test_version_displays() {
    let home = TempDir::new().unwrap();
    conduit(home.path())
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("conduit"));
}

#[test]
fn test_help_lists_subcommands() {
    let home = TempDir::new().unwrap();
    conduit(home.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("servers"))
        .stdout(predicate::str::contains("tools"))
        .stdout(predicate::str::contains("call"))
        .stdout(predicate::str::contains("check"))
        .stdout(predicate::str::contains("docker-hosts"));
}

#[test]
fn test_unknown_subcommand_fails() {
    let home = TempDir::new().unwrap();
    conduit(home.path()).arg("frobnicate").assert().failure();
}

// ─────────────────────────────────────────────────────────────────────────────
// Servers
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_servers_table_redacts() {
    let home = TempDir::new().unwrap();
    let config = write_config(&home);
    conduit(home.path())
        .args(["--config", config.to_str().unwrap(), "servers", "--all"])
        .assert()
        .success()
        .stdout(predicate::str::contains("fetch"))
        .stdout(predicate::str::contains("docker"))
        .stdout(predicate::str::contains("remote"))
        .stdout(predicate::str::contains("sk-secret").not())
        .stdout(predicate::str::contains("token=abc").not());
}

#[test]
fn test_servers_json_hides_disabled() {
    let home = TempDir::new().unwrap();
    let config = write_config(&home);
    let output = conduit(home.path())
        .args(["--json", "--config", config.to_str().unwrap(), "servers"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let servers: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let names: Vec<&str> = servers
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["fetch", "db"]);
}

#[test]
fn test_config_from_env() {
    let home = TempDir::new().unwrap();
    let config = write_config(&home);
    conduit(home.path())
        .env("CONDUIT_CONFIG", &config)
        .arg("servers")
        .assert()
        .success()
        .stdout(predicate::str::contains("fetch"));
}

#[test]
fn test_missing_config_fails() {
    let home = TempDir::new().unwrap();
    conduit(home.path())
        .args(["--config", "/nonexistent/servers.toml", "servers"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to load"));
}

#[test]
fn test_invalid_config_fails() {
    let home = TempDir::new().unwrap();
    let path = home.path().join("servers.toml");
    std::fs::write(&path, "[[servers]]\nname = \"x\"\ntransport = \"carrier-pigeon\"\n").unwrap();
    conduit(home.path())
        .args(["--config", path.to_str().unwrap(), "servers"])
        .assert()
        .failure();
}

// ─────────────────────────────────────────────────────────────────────────────
// Call / Check
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_call_rejects_bad_arguments() {
    let home = TempDir::new().unwrap();
    let config = write_config(&home);
    conduit(home.path())
        .args([
            "--config",
            config.to_str().unwrap(),
            "call",
            "fetch",
            "fetch",
            "--args",
            "not json",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid --args JSON"));
}

#[test]
fn test_check_unknown_server() {
    let home = TempDir::new().unwrap();
    let config = write_config(&home);
    conduit(home.path())
        .args(["--config", config.to_str().unwrap(), "check", "nope"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found"));
}

// ─────────────────────────────────────────────────────────────────────────────
// Docker hosts
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_docker_hosts_lists_explicit_host_first() {
    let home = TempDir::new().unwrap();
    let output = conduit(home.path())
        .args([
            "--json",
            "docker-hosts",
            "--no-connect",
            "--host",
            "tcp://127.0.0.1:2375",
        ])
        .output()
        .unwrap();
    assert!(output.status.success());

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let candidates = report["candidates"].as_array().unwrap();
    assert_eq!(candidates[0]["endpoint"], "tcp://127.0.0.1:2375");
    assert_eq!(candidates[0]["source"], "config");
    assert_eq!(candidates.last().unwrap()["source"], "default");
}

#[test]
fn test_docker_hosts_rejects_bad_host() {
    let home = TempDir::new().unwrap();
    conduit(home.path())
        .args(["docker-hosts", "--no-connect", "--host", "ssh://box"])
        .assert()
        .failure();
}
