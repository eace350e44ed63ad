//! CLI tests for the `tap-harness` binary.
//!
//! Spawns the binary and verifies the TAP it prints and its exit codes.

use std::process::Command;

use tap_harness::exit_codes;

fn harness() -> Command {
    Command::new(env!("CARGO_BIN_EXE_tap-harness"))
}

#[test]
fn no_matches_prints_ok_plan_and_exits_ok() {
    let temp = tempfile::tempdir().expect("tempdir");

    let output = harness()
        .current_dir(temp.path())
        .arg("missing/*.js")
        .output()
        .expect("tap-harness");

    assert_eq!(output.status.code(), Some(exit_codes::OK));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("1..0\n"), "stdout: {stdout}");
    assert!(stdout.ends_with("# ok\n"), "stdout: {stdout}");
}

#[test]
fn missing_root_is_a_usage_error() {
    let status = harness().status().expect("tap-harness");
    assert_eq!(status.code(), Some(exit_codes::ERROR));
}

#[test]
fn invalid_config_is_an_error() {
    let temp = tempfile::tempdir().expect("tempdir");
    std::fs::write(temp.path().join("tap-harness.toml"), "timeout_secs = -1\n").expect("write");

    let output = harness()
        .current_dir(temp.path())
        .arg("t")
        .output()
        .expect("tap-harness");

    assert_eq!(output.status.code(), Some(exit_codes::ERROR));
    assert!(String::from_utf8_lossy(&output.stderr).contains("timeout_secs"));
}

#[test]
fn explicit_config_must_exist() {
    let temp = tempfile::tempdir().expect("tempdir");

    let status = harness()
        .current_dir(temp.path())
        .args(["--config", "nope.toml", "t"])
        .status()
        .expect("tap-harness");

    assert_eq!(status.code(), Some(exit_codes::ERROR));
}

#[cfg(unix)]
#[test]
fn failing_file_exits_failed_with_diagnostics() {
    use tap_harness::test_support::write_script;

    let temp = tempfile::tempdir().expect("tempdir");
    write_script(temp.path(), "t/pass", "echo 'ok 1 - fine'");
    write_script(temp.path(), "t/fail", "echo 'not ok 1 - broken'\nexit 1");

    let output = harness()
        .current_dir(temp.path())
        .args(["--timeout", "10", "t"])
        .output()
        .expect("tap-harness");

    assert_eq!(output.status.code(), Some(exit_codes::FAILED));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("not ok 2 t/fail\n  ---\n    exit: 1\n"), "stdout: {stdout}");
    assert!(stdout.contains("ok 4 t/pass\n"), "stdout: {stdout}");
    assert!(stdout.ends_with("# not ok\n"), "stdout: {stdout}");
}

#[cfg(unix)]
#[test]
fn bailout_exits_failed() {
    use tap_harness::test_support::write_script;

    let temp = tempfile::tempdir().expect("tempdir");
    write_script(temp.path(), "t/a", "echo 'Bail out! stop'\nexec sleep 30");
    write_script(temp.path(), "t/b", "exit 0");

    let output = harness()
        .current_dir(temp.path())
        .arg("t")
        .output()
        .expect("tap-harness");

    assert_eq!(output.status.code(), Some(exit_codes::FAILED));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Bail out! stop\n"), "stdout: {stdout}");
    assert!(!stdout.contains("t/b"), "stdout: {stdout}");
}
