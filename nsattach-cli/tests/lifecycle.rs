use predicates::prelude::*;

mod common;

#[test]
fn test_create_and_info() {
    let mut ctx = common::nsattach();

    ctx.cmd
        .args(["create", "web"])
        .assert()
        .success()
        .stdout("web\n");

    ctx.new_cmd()
        .args(["info", "web"])
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""state": "STOPPED""#))
        .stdout(predicate::str::contains(r#""hostname": "web""#));

    ctx.new_cmd()
        .args(["create", "web"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));
}

#[test]
fn test_start_stop() {
    let ctx = common::nsattach();
    ctx.running("web");

    ctx.new_cmd()
        .args(["info", "web"])
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""state": "RUNNING""#))
        .stdout(predicate::str::contains(r#""pid""#));

    ctx.new_cmd()
        .args(["stop", "web"])
        .assert()
        .success()
        .stdout(predicate::str::contains("web"));

    ctx.new_cmd()
        .args(["info", "web"])
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""state": "STOPPED""#));
}

#[test]
fn test_stop_unknown() {
    let mut ctx = common::nsattach();
    ctx.cmd.args(["stop", "non-existent"]);
    ctx.cmd
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found"));
}

#[test]
fn test_stop_multiple_reports_each_failure() {
    let ctx = common::nsattach();
    ctx.running("one");
    ctx.new_cmd().args(["create", "two"]).assert().success();

    ctx.new_cmd()
        .args(["stop", "one", "two", "three"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("one"))
        .stderr(predicate::str::contains("Failed to stop 2 of 3 container(s)"))
        .stderr(predicate::str::contains("three: not found"));
}

#[test]
fn test_destroy_running_needs_force() {
    let ctx = common::nsattach();
    ctx.running("web");

    ctx.new_cmd()
        .args(["destroy", "web"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to destroy container"));

    ctx.new_cmd()
        .args(["destroy", "--force", "web"])
        .assert()
        .success()
        .stdout("web\n");

    assert!(!ctx.lxc.path().join("web").exists());
}

#[test]
fn test_clone() {
    let ctx = common::nsattach();
    ctx.new_cmd().args(["create", "base"]).assert().success();

    ctx.new_cmd()
        .args(["clone", "base", "copy"])
        .assert()
        .success()
        .stdout("copy\n");

    ctx.new_cmd()
        .args(["config", "get", "copy", "uts.name"])
        .assert()
        .success()
        .stdout("copy\n");

    ctx.new_cmd()
        .args(["clone", "base", "copy"])
        .assert()
        .failure();
}

#[test]
fn test_version() {
    let mut ctx = common::nsattach();
    ctx.cmd
        .arg("version")
        .assert()
        .success()
        .stdout(predicate::str::starts_with("nsattach "));
}
