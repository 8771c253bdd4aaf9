//! End-to-end tests of the `hd` binary
//!
//! Every test points temp, preference and data directories at its own
//! TempDir, so runs never see a real instance.

use std::path::{Path, PathBuf};
use std::process::{Child, Command as StdCommand, Stdio};
use std::time::{Duration, Instant};

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn isolated(temp: &TempDir) -> StdCommand {
    let root = temp.path();
    let mut cmd = StdCommand::new(assert_cmd::cargo::cargo_bin("hd"));
    cmd.env("TMPDIR", root)
        .env("IJ_PREFS_DIR", root.join("prefs"))
        .env("XDG_DATA_HOME", root.join("data"))
        .env("XDG_CONFIG_HOME", root.join("config"))
        .env("HOME", root.join("home"))
        .current_dir(root);
    cmd
}

fn hd(temp: &TempDir) -> Command {
    Command::from_std(isolated(temp))
}

fn stub_files(dir: &Path) -> Vec<PathBuf> {
    std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok().map(|e| e.path()))
                .filter(|p| p.extension().is_some_and(|ext| ext == "stub"))
                .collect()
        })
        .unwrap_or_default()
}

fn wait_for_stub(dir: &Path) -> PathBuf {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        if let Some(stub) = stub_files(dir).into_iter().next() {
            return stub;
        }
        assert!(Instant::now() < deadline, "instance never published a rendezvous file");
        std::thread::sleep(Duration::from_millis(50));
    }
}

fn spawn_instance(temp: &TempDir) -> Child {
    isolated(temp)
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("Failed to spawn hd")
}

#[test]
fn test_help_mentions_launch_arguments() {
    let temp = TempDir::new().unwrap();
    hd(&temp)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--batch"))
        .stdout(predicate::str::contains("Logs are written to"));
}

#[test]
fn test_ping_without_instance() {
    let temp = TempDir::new().unwrap();
    hd(&temp)
        .arg("--ping")
        .assert()
        .success()
        .stdout(predicate::str::contains("No running instance"));
}

#[test]
fn test_batch_applies_arguments_locally_and_cleans_up() {
    let temp = TempDir::new().unwrap();
    hd(&temp)
        .args(["--batch", "-run", "Blobs", "a.png"])
        .assert()
        .success()
        .stdout(predicate::str::contains("run: Blobs"))
        .stdout(predicate::str::contains("open: a.png"));

    assert!(stub_files(temp.path()).is_empty());
}

// macOS ignores the preference
#[cfg(not(target_os = "macos"))]
#[test]
fn test_disabled_preference_skips_rendezvous() {
    let temp = TempDir::new().unwrap();
    let prefs = temp.path().join("prefs");
    std::fs::create_dir_all(&prefs).unwrap();
    std::fs::write(prefs.join("IJ_Prefs.txt"), "prefs.options=0\n").unwrap();

    hd(&temp)
        .args(["--batch", "a.png"])
        .assert()
        .success()
        .stdout(predicate::str::contains("open: a.png"));

    assert!(stub_files(temp.path()).is_empty());
}

#[cfg(unix)]
#[test]
fn test_second_launch_hands_off_to_running_instance() {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    let temp = TempDir::new().unwrap();
    let instance = spawn_instance(&temp);
    let stub = wait_for_stub(temp.path());

    hd(&temp)
        .arg("--ping")
        .assert()
        .success()
        .stdout(predicate::str::contains("Instance is alive"))
        .stdout(predicate::str::contains(format!("PID: {}", instance.id())));

    // Delegated launches print nothing themselves
    hd(&temp)
        .args(["-run", "Blobs", "a.png"])
        .assert()
        .success()
        .stdout(predicate::str::is_empty());

    kill(Pid::from_raw(instance.id() as i32), Signal::SIGTERM).expect("Failed to signal instance");
    let output = instance.wait_with_output().expect("Failed to wait for instance");
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success());
    let cwd = temp.path().canonicalize().unwrap();
    assert!(stdout.contains(&format!("user.dir: {}", cwd.display())), "stdout: {}", stdout);
    assert!(stdout.contains("run: Blobs"), "stdout: {}", stdout);
    assert!(
        stdout.contains(&format!("open: {}", cwd.join("a.png").display())),
        "stdout: {}",
        stdout
    );
    assert!(!stub.exists());
}

#[cfg(unix)]
#[test]
fn test_hangup_removes_rendezvous_file() {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    let temp = TempDir::new().unwrap();
    let instance = spawn_instance(&temp);
    let stub = wait_for_stub(temp.path());

    kill(Pid::from_raw(instance.id() as i32), Signal::SIGHUP).expect("Failed to signal instance");
    let output = instance.wait_with_output().expect("Failed to wait for instance");

    assert!(output.status.success());
    assert!(!stub.exists());
}
