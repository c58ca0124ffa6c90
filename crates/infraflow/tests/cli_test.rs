#![allow(deprecated)]

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

const CONFIG: &str = r#"
networks:
  vpc:
    cidr: 10.0.0.0/16
  zones:
    - name: eu-central-1a
      workers: 10.0.0.0/19
    - name: eu-central-1b
      workers: 10.0.32.0/19
      natGateway:
        eipAllocationId: eip-external
"#;

const TERRAFORM_STATE: &str = r#"{
    "outputs": {
        "vpc_id": {"value": "v-1"},
        "sg_id": {"value": "sg-1"}
    },
    "resources": [
        {"mode": "managed", "type": "alicloud_vswitch", "name": "vsw_z0",
         "instances": [{"attributes": {"id": "sw-1"}}]}
    ]
}"#;

fn infraflow() -> Command {
    Command::cargo_bin("infraflow").unwrap()
}

#[test]
fn test_cli_help() {
    infraflow()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("migrate"))
        .stdout(predicate::str::contains("state"))
        .stdout(predicate::str::contains("config"));
}

#[test]
fn test_cli_version() {
    infraflow()
        .arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains("infraflow"));
}

#[test]
fn test_invalid_command() {
    infraflow().arg("invalid-command").assert().failure();
}

#[test]
fn test_config_validate() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("infra.yaml");
    fs::write(&path, CONFIG).unwrap();

    infraflow()
        .args(["config", "validate"])
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("Configuration is valid"))
        .stdout(predicate::str::contains("eu-central-1b"))
        .stdout(predicate::str::contains("eip-external"));
}

#[test]
fn test_config_validate_rejects_duplicate_zones() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("infra.yaml");
    fs::write(&path, CONFIG.replace("eu-central-1b", "eu-central-1a")).unwrap();

    infraflow()
        .args(["config", "validate"])
        .arg(&path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("configured twice"));
}

#[test]
fn test_migrate_to_stdout() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("infra.yaml");
    let legacy = dir.path().join("terraform.tfstate");
    fs::write(&config, CONFIG).unwrap();
    fs::write(&legacy, TERRAFORM_STATE).unwrap();

    infraflow()
        .arg("migrate")
        .arg("--terraform-state")
        .arg(&legacy)
        .arg("--config")
        .arg(&config)
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""version": "v1""#))
        .stdout(predicate::str::contains(r#""VPC": "v-1""#))
        .stdout(predicate::str::contains(
            r#""Zones/eu-central-1a/VSwitch": "sw-1""#,
        ))
        .stdout(predicate::str::contains(r#""MigratedFromTerraform": "true""#));
}

#[test]
fn test_migrate_to_file_then_show() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("infra.yaml");
    let legacy = dir.path().join("terraform.tfstate");
    let output = dir.path().join("state").join("infraflow.json");
    fs::write(&config, CONFIG).unwrap();
    fs::write(&legacy, TERRAFORM_STATE).unwrap();

    infraflow()
        .arg("migrate")
        .arg("--terraform-state")
        .arg(&legacy)
        .arg("--config")
        .arg(&config)
        .arg("--output")
        .arg(&output)
        .assert()
        .success();
    assert!(output.exists());

    infraflow()
        .args(["state", "show"])
        .arg(&output)
        .assert()
        .success()
        .stdout(predicate::str::contains("v1"))
        .stdout(predicate::str::contains("NodesSecurityGroup"))
        .stdout(predicate::str::contains("Zones/eu-central-1a/Suffix"));
}

#[test]
fn test_migrate_without_vpc_fails() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("infra.yaml");
    let legacy = dir.path().join("terraform.tfstate");
    fs::write(&config, CONFIG).unwrap();
    fs::write(&legacy, r#"{"outputs": {}, "resources": []}"#).unwrap();

    infraflow()
        .arg("migrate")
        .arg("--terraform-state")
        .arg(&legacy)
        .arg("--config")
        .arg(&config)
        .assert()
        .failure()
        .stderr(predicate::str::contains("vpc_id"));
}

#[test]
fn test_state_show_marks_tombstones_and_bad_versions() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("state.json");
    fs::write(
        &path,
        r#"{"version": "v1", "data": {"VPC": "<deleted>", "NatGateway": "ngw-1"}}"#,
    )
    .unwrap();

    infraflow()
        .args(["state", "show"])
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("deleted"))
        .stdout(predicate::str::contains("ngw-1"));

    fs::write(&path, r#"{"version": "v0", "data": {}}"#).unwrap();
    infraflow()
        .args(["state", "show"])
        .arg(&path)
        .assert()
        .failure()
        .stdout(predicate::str::contains("unsupported"));
}
