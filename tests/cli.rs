#![cfg(unix)]

use std::{
    fs,
    path::Path,
    process::{Command, Output},
};

fn run(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_nowplaying-obs"))
        .args(args)
        .env("RUST_LOG", "info")
        .env_remove("OBS_PASSWORD")
        .output()
        .expect("binary should start")
}

fn write_config(dir: &Path, status: &str) -> String {
    let script = dir.join("sp.sh");
    fs::write(
        &script,
        format!(
            "case \"$1\" in\n  status) echo {status} ;;\n  current) printf 'Title  Song\\nArtist  Band\\nAlbum  Record\\n' ;;\nesac\n"
        ),
    )
    .unwrap();

    let config = dir.join("config.toml");
    fs::write(
        &config,
        format!(
            "obsUrl = \"ws://127.0.0.1:1\"\ncallTimeout = 2000\nreloadDelay = 0\nplayerCommand = \"sh {}\"\ncacheFile = \"{}\"\n",
            script.display(),
            dir.join("song.json").display()
        ),
    )
    .unwrap();
    config.to_string_lossy().into_owned()
}

#[test]
fn single_check_survives_unreachable_obs() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), "Playing");

    let output = run(&["--once", "--config", &config]);

    assert!(output.status.success(), "{output:?}");
    // The reload never connected, so the change stays pending.
    assert!(!dir.path().join("song.json").exists());
}

#[test]
fn single_check_while_paused_exits_cleanly() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), "Paused");

    let output = run(&["--once", "--config", &config]);

    assert!(output.status.success(), "{output:?}");
    assert!(!dir.path().join("song.json").exists());
}

#[test]
fn bad_config_fails_startup() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("config.toml");
    fs::write(&config, "reloadDelay = \"soon\"\n").unwrap();

    let output = run(&["--once", "--config", config.to_str().unwrap()]);

    assert!(!output.status.success());
}

#[test]
fn conflicting_modes_are_rejected() {
    let output = run(&["--once", "--force"]);
    assert!(!output.status.success());
}
