use assert_cmd::Command;
use assert_fs::prelude::*;
use predicates::prelude::*;

fn trellis() -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("trellis"));
    cmd.env_remove("TRELLIS_BSP_PROGRAM")
        .env_remove("TRELLIS_BSP_ARGS")
        .env_remove("RUST_LOG");
    cmd
}

#[test]
fn help_lists_subcommands() {
    trellis()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("sync"))
        .stdout(predicate::str::contains("targets"))
        .stdout(predicate::str::contains("compile"));
}

#[test]
fn compile_requires_a_target() {
    trellis().arg("compile").assert().failure();
}

#[test]
fn missing_root_is_reported() {
    let temp = assert_fs::TempDir::new().unwrap();

    trellis()
        .arg("--root")
        .arg(temp.path().join("does-not-exist"))
        .arg("sync")
        .assert()
        .code(2)
        .stderr(predicate::str::contains("does not exist"));
}

#[test]
fn sync_without_a_build_server_fails() {
    let temp = assert_fs::TempDir::new().unwrap();

    trellis()
        .arg("--root")
        .arg(temp.path())
        .arg("sync")
        .assert()
        .code(2)
        .stderr(predicate::str::contains(
            "no build server connection is configured",
        ));
}

#[test]
fn unlaunchable_servers_are_reported() {
    let temp = assert_fs::TempDir::new().unwrap();

    trellis()
        .arg("--root")
        .arg(temp.path())
        .arg("targets")
        .env("TRELLIS_BSP_PROGRAM", "trellis-no-such-bsp-server")
        .assert()
        .code(2)
        .stderr(predicate::str::contains(
            "failed to spawn BSP server `trellis-no-such-bsp-server`",
        ));
}

#[cfg(unix)]
#[test]
fn servers_that_exit_fail_the_handshake() {
    let temp = assert_fs::TempDir::new().unwrap();
    temp.child(".bsp/quitter.json")
        .write_str(r#"{ "name": "quitter", "argv": ["true"] }"#)
        .unwrap();

    trellis()
        .arg("--root")
        .arg(temp.path())
        .arg("sync")
        .assert()
        .code(2)
        .stderr(predicate::str::contains(
            "failed to initialize the build server",
        ));
}
