use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn help_lists_documented_flags() {
    let mut cmd = Command::cargo_bin("soto").unwrap();
    cmd.arg("--help");
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("--dev"))
        .stdout(predicate::str::contains("--rate"))
        .stdout(predicate::str::contains("--minprio"))
        .stdout(predicate::str::contains("--show-spectrum"))
        .stdout(predicate::str::contains("--show-signal"))
        .stdout(predicate::str::contains("--buffer-scale"))
        .stdout(predicate::str::contains("--run-for"));
}

#[test]
fn rejects_garbage_rate() {
    let mut cmd = Command::cargo_bin("soto").unwrap();
    cmd.args(["--rate", "not-a-number"]);
    cmd.assert().failure();
}

#[test]
fn version_flag_is_recognized() {
    let mut cmd = Command::cargo_bin("soto").unwrap();
    cmd.arg("--version");
    cmd.assert().success();
}
