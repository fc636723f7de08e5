// Regression tests: CLI surface of the `weft` binary.
// Requires: assert_cmd, predicates crates in [dev-dependencies]

use std::fs;

use assert_cmd::Command;
use predicates::prelude::PredicateBooleanExt;
use predicates::str::contains;

fn weft() -> Command {
    Command::cargo_bin("weft").unwrap()
}

#[test]
fn run_reads_stdin_when_no_files_are_given() {
    weft()
        .arg("run")
        .write_stdin("#+MACRO foo FOO\nhello [[[foo]]]\n")
        .assert()
        .success()
        .stdout("hello FOO\n");
}

#[test]
fn run_preserves_a_missing_final_newline() {
    weft()
        .arg("run")
        .write_stdin("hello world")
        .assert()
        .success()
        .stdout("hello world");
}

#[test]
fn run_concatenates_files_and_stdin() {
    let dir = std::env::temp_dir().join("weft-cli-concat-test");
    fs::create_dir_all(&dir).unwrap();
    let defs = dir.join("defs.weft");
    let body = dir.join("body.weft");
    fs::write(&defs, "#+MACRO greet Hello, $1!\n").unwrap();
    fs::write(&body, "[[[greet(world)]]]\n").unwrap();

    weft()
        .arg("run")
        .arg(&defs)
        .arg("-")
        .arg(&body)
        .write_stdin("[[[greet(stdin)]]]\n")
        .assert()
        .success()
        .stdout("Hello, stdin!\nHello, world!\n");

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn quiet_suppresses_output() {
    weft()
        .args(["run", "--quiet"])
        .write_stdin("hello world\n")
        .assert()
        .success()
        .stdout("");
}

#[test]
fn missing_file_reports_a_diagnostic_and_fails() {
    weft()
        .args(["run", "definitely-not-a-file.weft"])
        .assert()
        .failure()
        .stderr(contains("failed to read").and(contains("definitely-not-a-file.weft")));
}

#[test]
fn script_diagnostics_go_to_stderr() {
    weft()
        .arg("run")
        .write_stdin("[[[__LUA__(return 1 + ;)]]]\n")
        .assert()
        .success()
        .stdout("unexpected symbol near ';'\n")
        .stderr(contains("script load failed"));
}

#[test]
fn macros_subcommand_dumps_global_definitions_as_json() {
    let assert = weft()
        .arg("macros")
        .write_stdin(concat!(
            "#+MACRO greet Hello, $1!\n",
            "#+LOCAL_MACRO hidden nope\n",
            "#+MACRO_BEGIN banner\n",
            "===\n",
            "===\n",
            "#+MACRO_END\n"
        ))
        .assert()
        .success();

    let stdout = String::from_utf8(assert.get_output().stdout.clone()).unwrap();
    let dump: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    let entries = dump.as_array().unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0]["name"], "banner");
    assert_eq!(entries[0]["multiline"], true);
    assert_eq!(entries[1]["name"], "greet");
    assert_eq!(entries[1]["body"], "Hello, $1!");
}
