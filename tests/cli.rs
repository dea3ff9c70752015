//! Blackbox checks of the command-line interface.

use std::fs;

use assert_cmd::Command;

fn write_temp(name: &str, contents: &str) -> std::path::PathBuf {
    let path = std::env::temp_dir().join(name);
    fs::write(&path, contents).unwrap();
    path
}

#[test]
fn no_args_prints_info() {
    Command::cargo_bin("b33").unwrap().assert().success();
}

#[test]
fn check_accepts_valid_source() {
    let path = write_temp(
        "b33_cli_check_ok.asm",
        "start\n    LDA #$05\n    STA $2000\n    END start\n",
    );
    Command::cargo_bin("b33")
        .unwrap()
        .arg("check")
        .arg(&path)
        .assert()
        .success();
}

#[test]
fn check_rejects_undefined_label() {
    let path = write_temp("b33_cli_check_bad.asm", "    JMP nowhere\n");
    Command::cargo_bin("b33")
        .unwrap()
        .arg("check")
        .arg(&path)
        .assert()
        .failure();
}

#[test]
fn build_then_run_binary() {
    let src = write_temp(
        "b33_cli_build.asm",
        "start\n    LDA #$05\n    STA $2000\n    END start\n",
    );
    let out = std::env::temp_dir().join("b33_cli_build.b33");
    Command::cargo_bin("b33")
        .unwrap()
        .arg("build")
        .arg(&src)
        .arg(&out)
        .assert()
        .success();

    // The emitted file begins with the B33 magic.
    let bytes = fs::read(&out).unwrap();
    assert_eq!(&bytes[..3], b"B33");

    Command::cargo_bin("b33")
        .unwrap()
        .arg("run")
        .arg(&out)
        .assert()
        .success();
}

#[test]
fn run_rejects_file_without_magic() {
    let path = write_temp("b33_cli_not_magic.b33", "this is not a binary");
    Command::cargo_bin("b33")
        .unwrap()
        .arg("run")
        .arg(&path)
        .assert()
        .failure();
}
