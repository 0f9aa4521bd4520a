use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::io::Write;

/// `vmclone` with config and data dirs pointed away from the real home.
fn vmclone(home: &tempfile::TempDir) -> assert_cmd::Command {
    let mut cmd: assert_cmd::Command = cargo_bin_cmd!("vmclone").into();
    cmd.env("XDG_CONFIG_HOME", home.path().join("config"))
        .env("XDG_DATA_HOME", home.path().join("data"))
        .env_remove("RUST_LOG");
    cmd
}

/// Config whose tools do not exist, so every host query fails to spawn.
fn write_missing_tools_config(dir: &tempfile::TempDir) -> std::path::PathBuf {
    let config_path = dir.path().join("vmclone.toml");
    let mut f = std::fs::File::create(&config_path).unwrap();
    write!(
        f,
        r#"
connection = "session"

[tools]
virsh = "/nonexistent/virsh"
virt_clone = "/nonexistent/virt-clone"
df = "/nonexistent/df"
cp = "/nonexistent/cp"
rm = "/nonexistent/rm"
"#
    )
    .unwrap();
    config_path
}

#[test]
fn help_works() {
    let home = tempfile::tempdir().unwrap();
    vmclone(&home)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Clone libvirt VMs"));
}

#[test]
fn clone_rejects_blank_name() {
    let home = tempfile::tempdir().unwrap();
    let config_path = write_missing_tools_config(&home);

    vmclone(&home)
        .args(["--config", config_path.to_str().unwrap()])
        .args(["clone", "foo", "--name", "   "])
        .assert()
        .failure()
        .stderr(predicate::str::contains("name must not be empty"));
}

#[test]
fn missing_config_shows_error() {
    let home = tempfile::tempdir().unwrap();
    vmclone(&home)
        .args(["--config", "/nonexistent/vmclone.toml", "probe", "foo"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to load config"));
}

#[test]
fn invalid_connection_in_config() {
    let home = tempfile::tempdir().unwrap();
    let config_path = home.path().join("vmclone.toml");
    std::fs::write(&config_path, "connection = \"remote\"\n").unwrap();

    vmclone(&home)
        .args(["--config", config_path.to_str().unwrap(), "probe", "foo"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("connection must be"));
}

#[test]
fn probe_degrades_when_tools_are_missing() {
    let home = tempfile::tempdir().unwrap();
    let config_path = write_missing_tools_config(&home);

    vmclone(&home)
        .args(["--config", config_path.to_str().unwrap(), "probe", "foo"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Disk: none found"))
        .stdout(predicate::str::contains("Filesystem: unknown"))
        .stdout(predicate::str::contains("Reflink: not supported"));
}

#[test]
fn probe_json_output() {
    let home = tempfile::tempdir().unwrap();
    let config_path = write_missing_tools_config(&home);

    vmclone(&home)
        .args(["--config", config_path.to_str().unwrap(), "-o", "json", "probe", "foo"])
        .assert()
        .success()
        .stdout(predicate::str::contains("has_reflink"))
        .stdout(predicate::str::contains("session"));
}

#[test]
fn log_without_history() {
    let home = tempfile::tempdir().unwrap();
    vmclone(&home)
        .args(["log", "--all"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No clone logs found"));
}
