//! Startup behaviour of the relay binary.
//!
//! These run the compiled binary with a controlled environment and never
//! reach the network: every case fails during configuration.

use std::process::{Command, Output};

fn run(env: &[(&str, &str)]) -> Output {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_medic-relay"));
    cmd.env_clear();
    for (key, value) in env {
        cmd.env(key, value);
    }
    cmd.output().expect("failed to run medic-relay")
}

#[test]
fn test_missing_token_exits_with_status_1() {
    let output = run(&[
        ("GAME_CHAT_CHANNEL_ID", "111111111111"),
        ("MEDICS_CHANNEL_ID", "222222222222"),
    ]);
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("[FATAL]"), "stderr: {stderr}");
    assert!(stderr.contains("BOT_TOKEN"), "stderr: {stderr}");
}

#[test]
fn test_missing_channel_exits_with_status_1() {
    let output = run(&[("BOT_TOKEN", "not-a-real-token"), ("GAME_CHAT_CHANNEL_ID", "111111111111")]);
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("MEDICS_CHANNEL_ID"), "stderr: {stderr}");
}

#[test]
fn test_invalid_pattern_exits_with_status_1() {
    let output = run(&[
        ("BOT_TOKEN", "not-a-real-token"),
        ("GAME_CHAT_CHANNEL_ID", "111111111111"),
        ("MEDICS_CHANNEL_ID", "222222222222"),
        ("FORWARD_PATTERN", "(unclosed"),
    ]);
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("invalid regex"), "stderr: {stderr}");
    assert!(!stderr.contains("not-a-real-token"), "token leaked: {stderr}");
}

#[test]
fn test_missing_config_file_exits_with_status_1() {
    let output = {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_medic-relay"));
        cmd.env_clear().arg("/nonexistent/relay.json");
        cmd.output().expect("failed to run medic-relay")
    };
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("failed to read config file"), "stderr: {stderr}");
}
