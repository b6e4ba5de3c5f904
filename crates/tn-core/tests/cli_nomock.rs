//! No-mock CLI tests for tn-node.
//!
//! Every test runs the real binary against a temp volume and an explicit
//! config file. The uplink is always `--offline` so no test touches the
//! network.

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tn_core::exit_codes::ExitCode;

struct Node {
    _root: TempDir,
    volume: PathBuf,
    config: PathBuf,
}

impl Node {
    /// A mounted volume and a config that points at it.
    fn new() -> Self {
        Self::with_config(|_| {})
    }

    fn with_config(edit: impl FnOnce(&mut Value)) -> Self {
        let root = TempDir::new().expect("create temp root");
        let volume = root.path().join("card");
        fs::create_dir(&volume).expect("create volume");
        let mut config = serde_json::json!({
            "schema_version": "1.0.0",
            "device_id": "buoy-7",
            "storage": { "volume": volume },
            "operating": { "period_ms": 1000, "accumulation": 1 },
            "sensors": ["temperature", "battery_percent"],
        });
        edit(&mut config);
        let config_path = root.path().join("node.json");
        fs::write(&config_path, config.to_string()).expect("write config");
        Node {
            _root: root,
            volume,
            config: config_path,
        }
    }

    fn cmd(&self) -> Command {
        let mut cmd = Command::cargo_bin("tn-node").expect("tn-node binary should exist");
        cmd.env_remove("TELENODE_CONFIG")
            .env_remove("TELENODE_CONFIG_DIR")
            .env_remove("TELENODE_VOLUME")
            .env_remove("RUST_LOG")
            .env("TN_LOG", "error")
            .arg("--config")
            .arg(&self.config);
        cmd
    }

    fn offline_cycle(&self) -> assert_cmd::assert::Assert {
        self.cmd()
            .args(["cycle", "--offline", "--no-wait", "--seed", "7"])
            .assert()
    }

    fn status_json(&self, extra: &[&str]) -> Value {
        let output = self
            .cmd()
            .args(["--format", "json", "status"])
            .args(extra)
            .output()
            .expect("run status");
        assert!(output.status.success(), "status failed: {:?}", output);
        serde_json::from_slice(&output.stdout).expect("status output is JSON")
    }
}

fn lines(path: &Path) -> Vec<String> {
    fs::read_to_string(path)
        .unwrap_or_default()
        .lines()
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

#[test]
fn offline_cycle_defers_and_keeps_record_pending() {
    let node = Node::new();

    node.offline_cycle().code(ExitCode::Deferred.as_i32());

    let pending = lines(&node.volume.join("pending.log"));
    assert_eq!(pending.len(), 1);
    assert!(pending[0].starts_with("1;"), "{}", pending[0]);
    assert_eq!(pending[0].split(';').count(), 4);

    let status = node.status_json(&[]);
    assert_eq!(status["pending"], 1);
    assert_eq!(status["sent"], 0);
    assert_eq!(status["last_record_id"], 1);
    assert_eq!(status["device_id"], "buoy-7");
}

#[test]
fn record_ids_keep_growing_across_invocations() {
    let node = Node::new();
    for _ in 0..3 {
        node.offline_cycle().code(ExitCode::Deferred.as_i32());
    }

    let status = node.status_json(&["--id", "2", "--lines"]);
    assert_eq!(status["pending"], 3);
    assert_eq!(status["last_record_id"], 3);
    assert_eq!(status["record"]["status"], "pending");
    let ids: Vec<&str> = status["pending_lines"]
        .as_array()
        .expect("pending lines")
        .iter()
        .filter_map(|l| l.as_str()?.split(';').next())
        .collect();
    assert_eq!(ids, vec!["1", "2", "3"]);
}

#[test]
fn cycle_json_reports_outcome() {
    let node = Node::new();
    let output = node
        .cmd()
        .args(["--format", "json", "cycle", "--offline", "--no-wait"])
        .output()
        .expect("run cycle");
    assert_eq!(output.status.code(), Some(ExitCode::Deferred.as_i32()));

    let report: Value = serde_json::from_slice(&output.stdout).expect("cycle output is JSON");
    assert_eq!(report["command"], "cycle");
    assert_eq!(report["exit_code"], "OK_DEFERRED");
    assert_eq!(report["outcome"]["queued"], 1);
    assert_eq!(report["outcome"]["deferred"], true);
    assert_eq!(report["outcome"]["immediate_sent"], false);
}

#[test]
fn critical_battery_exits_with_shutdown_and_leaves_volume_untouched() {
    let node = Node::with_config(|c| {
        c["power"] = serde_json::json!({ "critical_battery_percent": 100.0 });
    });

    node.offline_cycle().code(ExitCode::Shutdown.as_i32());

    assert!(!node.volume.join("pending.log").exists());
    assert!(!node.volume.join("sent.log").exists());
    assert!(!node.volume.join("counter").exists());
}

#[test]
fn drain_with_critical_battery_exits_with_shutdown() {
    let node = Node::new();
    node.offline_cycle().code(ExitCode::Deferred.as_i32());
    let pending_before = fs::read(node.volume.join("pending.log")).expect("read pending");

    let critical = Node::with_config(|c| {
        c["storage"]["volume"] = Value::from(node.volume.to_string_lossy().into_owned());
        c["power"] = serde_json::json!({ "critical_battery_percent": 100.0 });
    });
    critical
        .cmd()
        .args(["drain", "--offline", "--no-wait"])
        .assert()
        .code(ExitCode::Shutdown.as_i32());

    assert_eq!(fs::read(node.volume.join("pending.log")).expect("read pending"), pending_before);
    assert!(!node.volume.join("sent.log").exists());
}

#[test]
fn accumulation_limit_too_large_for_a_record_is_a_config_error() {
    let node = Node::with_config(|c| {
        c["sensors"] = serde_json::json!([
            "temperature", "conductivity", "dissolved_oxygen",
            "battery_percent", "battery_voltage", "signal"
        ]);
        c["limits"] = serde_json::json!({ "max_period_ms": 86400000, "max_accumulation": 32 });
    });

    node.cmd()
        .arg("status")
        .assert()
        .code(ExitCode::ConfigError.as_i32())
        .stderr(predicate::str::contains("limits.max_accumulation"));
}

#[test]
fn drain_on_empty_queue_is_clean() {
    let node = Node::new();
    node.cmd()
        .args(["drain", "--offline", "--no-wait"])
        .assert()
        .code(ExitCode::Clean.as_i32());
}

#[test]
fn run_stops_after_requested_cycles() {
    let node = Node::new();
    node.cmd()
        .args(["run", "--offline", "--no-wait", "--cycles", "2"])
        .assert()
        .code(ExitCode::Deferred.as_i32())
        .stdout(predicate::str::contains("cycles:   2"));
    assert_eq!(lines(&node.volume.join("pending.log")).len(), 2);
}

#[test]
fn missing_volume_is_storage_unavailable() {
    let node = Node::with_config(|c| {
        c["storage"]["volume"] = Value::from("/nonexistent/telenode-card");
    });

    node.cmd()
        .arg("status")
        .assert()
        .code(ExitCode::StorageUnavailable.as_i32())
        .stderr(predicate::str::contains("volume not mounted"));
    node.offline_cycle().code(ExitCode::StorageUnavailable.as_i32());
    node.cmd()
        .arg("check")
        .assert()
        .code(ExitCode::StorageUnavailable.as_i32());
}

#[test]
fn volume_flag_overrides_config() {
    let node = Node::new();
    let other = TempDir::new().expect("create other volume");

    node.cmd()
        .arg("--volume")
        .arg(other.path())
        .args(["cycle", "--offline", "--no-wait"])
        .assert()
        .code(ExitCode::Deferred.as_i32());

    assert_eq!(lines(&other.path().join("pending.log")).len(), 1);
    assert!(!node.volume.join("pending.log").exists());
}

#[test]
fn invalid_config_exits_with_config_error() {
    let node = Node::with_config(|c| {
        c["queue"] = serde_json::json!({ "max_retries": 0 });
    });

    node.cmd()
        .arg("status")
        .assert()
        .code(ExitCode::ConfigError.as_i32())
        .stderr(predicate::str::contains("queue.max_retries"));
}

#[test]
fn malformed_config_exits_with_config_error() {
    let node = Node::new();
    fs::write(&node.config, "{ not json").expect("overwrite config");

    node.offline_cycle().code(ExitCode::ConfigError.as_i32());
    node.cmd()
        .args(["--format", "json", "check"])
        .assert()
        .code(ExitCode::ConfigError.as_i32())
        .stdout(predicate::str::contains("\"status\": \"error\""));
}

#[test]
fn check_passes_on_mounted_volume() {
    let node = Node::new();
    let output = node
        .cmd()
        .args(["--format", "json", "check"])
        .output()
        .expect("run check");
    assert_eq!(output.status.code(), Some(ExitCode::Clean.as_i32()));

    let report: Value = serde_json::from_slice(&output.stdout).expect("check output is JSON");
    let checks = report["checks"].as_array().expect("checks array");
    assert!(checks.iter().all(|c| c["status"] == "ok"));
    let sensors = checks.iter().find(|c| c["check"] == "sensors").expect("sensors check");
    assert_eq!(sensors["fields"], serde_json::json!(["temperature", "battery_percent"]));
}

#[test]
fn config_default_is_valid_json() {
    let node = Node::new();
    let output = node.cmd().args(["config", "default"]).output().expect("run config default");
    assert!(output.status.success());

    let config: Value = serde_json::from_slice(&output.stdout).expect("default config is JSON");
    assert_eq!(config["schema_version"], "1.0.0");
    assert_eq!(config["queue"]["max_retries"], 5);
}

#[test]
fn config_show_reflects_file_and_overrides() {
    let node = Node::new();
    let output = node
        .cmd()
        .args(["--volume", "/mnt/override", "config", "show"])
        .output()
        .expect("run config show");
    assert!(output.status.success());

    let config: Value = serde_json::from_slice(&output.stdout).expect("config is JSON");
    assert_eq!(config["device_id"], "buoy-7");
    assert_eq!(config["storage"]["volume"], "/mnt/override");
    assert_eq!(config["operating"]["period_ms"], 1000);
}

#[test]
fn unknown_command_is_an_args_error() {
    let node = Node::new();
    node.cmd()
        .arg("nonexistent-command")
        .assert()
        .code(ExitCode::ArgsError.as_i32())
        .stderr(predicate::str::contains("error"));
}
