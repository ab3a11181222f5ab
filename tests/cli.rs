#![cfg(unix)]

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

const FAKE_VAGRANT: &str = r#"#!/bin/sh
case "$1" in
  box)
    if [ "$2" = "list" ]; then
      echo "1413220015,,box-name,trusty64"
      echo "1413220015,,box-provider,virtualbox"
    fi
    ;;
  up)
    echo "machine booted"
    echo "warming up" 1>&2
    ;;
  halt)
    echo "halt failed" 1>&2
    exit 1
    ;;
  destroy)
    echo "destroying"
    ;;
esac
"#;

const FAKE_PROVISION: &str = r#"#!/bin/sh
mkdir -p "$VM_DIR"
echo "provisioning $VM_BOX at $VM_IP with $VM_RAM MB / $VM_CPUS cpu"
"#;

fn vagabond() -> assert_cmd::Command {
    cargo_bin_cmd!("vagabond").into()
}

struct Env {
    dir: tempfile::TempDir,
    config: PathBuf,
}

impl Env {
    fn state(&self) -> PathBuf {
        self.dir.path().join("state")
    }

    fn cmd(&self) -> assert_cmd::Command {
        let mut cmd = vagabond();
        cmd.arg("--config").arg(&self.config);
        cmd
    }
}

fn write_script(path: &Path, body: &str) {
    std::fs::write(path, body).unwrap();
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
}

fn test_env() -> Env {
    let dir = tempfile::tempdir().unwrap();
    let tool = dir.path().join("vagrant");
    let provision = dir.path().join("provision.sh");
    write_script(&tool, FAKE_VAGRANT);
    write_script(&provision, FAKE_PROVISION);

    let config = dir.path().join("vagabond.toml");
    std::fs::write(
        &config,
        format!(
            "tool = '{}'\nstate_dir = '{}'\nprovision_script = '{}'\n",
            tool.display(),
            dir.path().join("state").display(),
            provision.display(),
        ),
    )
    .unwrap();

    Env { dir, config }
}

#[test]
fn help_works() {
    vagabond()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Provision and manage local Vagrant instances"));
}

#[test]
fn missing_config_shows_error() {
    vagabond()
        .args(["--config", "/nonexistent/vagabond.toml", "list"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to load config"));
}

#[test]
fn invalid_config_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("vagabond.toml");
    std::fs::write(&config, "[defaults]\ncpus = 0\n").unwrap();

    vagabond()
        .arg("--config")
        .arg(&config)
        .arg("list")
        .assert()
        .failure()
        .stderr(predicate::str::contains("cpus must be at least 1"));
}

#[test]
fn list_empty_state_dir() {
    let env = test_env();
    env.cmd()
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("No instances."));
}

#[test]
fn list_shows_instances() {
    let env = test_env();
    std::fs::create_dir_all(env.state().join("192.168.22.10")).unwrap();
    std::fs::create_dir_all(env.state().join("192.168.22.11")).unwrap();

    env.cmd()
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("192.168.22.10"))
        .stdout(predicate::str::contains("192.168.22.11"))
        .stdout(predicate::str::contains("2 instance(s)"));
}

#[test]
fn images_lists_known_and_importable() {
    let env = test_env();
    env.cmd()
        .arg("images")
        .assert()
        .success()
        .stdout(predicate::str::contains("  trusty64"))
        .stdout(predicate::str::contains("precise64"));
}

#[test]
fn create_provisions_at_first_free_address() {
    let env = test_env();
    let key = env.dir.path().join("id.pub");
    std::fs::write(&key, "ssh-rsa AAAA test\n").unwrap();
    std::fs::create_dir_all(env.state().join("192.168.22.10")).unwrap();

    env.cmd()
        .args(["create", "--name", "web", "--ssh-key"])
        .arg(&key)
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "web: provisioning trusty64 at 192.168.22.11 with 512 MB / 1 cpu",
        ))
        .stdout(predicate::str::contains("Instance 'web' created at 192.168.22.11"));

    assert!(env.state().join("192.168.22.11").is_dir());
}

#[test]
fn create_unknown_image_is_fatal() {
    let env = test_env();
    let key = env.dir.path().join("id.pub");
    std::fs::write(&key, "ssh-rsa AAAA test\n").unwrap();

    env.cmd()
        .args(["create", "--name", "web", "--image", "jessie64", "--ssh-key"])
        .arg(&key)
        .assert()
        .failure()
        .stderr(predicate::str::contains("jessie64"))
        .stderr(predicate::str::contains("not found"));

    assert!(!env.state().exists());
}

#[test]
fn create_rejects_bad_name() {
    let env = test_env();
    env.cmd()
        .args(["create", "--name", "has space"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("instance name must match"));
}

#[test]
fn start_streams_prefixed_output() {
    let env = test_env();
    std::fs::create_dir_all(env.state().join("192.168.22.10")).unwrap();

    env.cmd()
        .args(["start", "192.168.22.10"])
        .assert()
        .success()
        .stdout(predicate::str::contains("192.168.22.10: machine booted"))
        .stdout(predicate::str::contains("192.168.22.10: warming up"))
        .stdout(predicate::str::contains("Instance 192.168.22.10 started."));
}

#[test]
fn start_missing_instance_fails() {
    let env = test_env();
    env.cmd()
        .args(["start", "192.168.22.99"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no instance at 192.168.22.99"));
}

#[test]
fn failed_stop_is_reported_per_instance() {
    let env = test_env();
    std::fs::create_dir_all(env.state().join("192.168.22.10")).unwrap();
    std::fs::create_dir_all(env.state().join("192.168.22.11")).unwrap();

    env.cmd()
        .args(["stop", "192.168.22.10", "192.168.22.11"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("192.168.22.10: halt failed"))
        .stdout(predicate::str::contains("192.168.22.11: halt failed"))
        .stderr(predicate::str::contains("2 of 2 operations failed"));
}

#[test]
fn destroy_removes_instance_state() {
    let env = test_env();
    let dir = env.state().join("192.168.22.10");
    std::fs::create_dir_all(dir.join(".vagrant")).unwrap();

    env.cmd()
        .args(["destroy", "192.168.22.10"])
        .assert()
        .success()
        .stdout(predicate::str::contains("192.168.22.10: destroying"))
        .stdout(predicate::str::contains("Instance 192.168.22.10 destroyed."));

    assert!(!dir.exists());
}

#[test]
fn destroy_twice_succeeds() {
    let env = test_env();
    let dir = env.state().join("192.168.22.10");
    std::fs::create_dir_all(&dir).unwrap();

    env.cmd().args(["destroy", "192.168.22.10"]).assert().success();
    assert!(!dir.exists());

    env.cmd()
        .args(["destroy", "192.168.22.10"])
        .assert()
        .success()
        .stdout(predicate::str::contains("192.168.22.10: destroying").not())
        .stdout(predicate::str::contains("Instance 192.168.22.10 destroyed."))
        .stderr(predicate::str::contains("already destroyed"));
}
