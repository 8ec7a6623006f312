use std::process::Command;

fn combined_output(output: &std::process::Output) -> String {
    let mut combined = String::new();
    combined.push_str(&String::from_utf8_lossy(&output.stdout));
    combined.push_str(&String::from_utf8_lossy(&output.stderr));
    combined
}

fn voicebridge_bin() -> &'static str {
    option_env!("CARGO_BIN_EXE_voicebridge").expect("voicebridge test binary not built")
}

#[test]
fn help_mentions_the_pipes() {
    let output = Command::new(voicebridge_bin())
        .arg("--help")
        .output()
        .expect("run voicebridge --help");
    assert!(output.status.success());
    let combined = combined_output(&output);
    assert!(combined.contains("--speaker-pipe"));
    assert!(combined.contains("--listener-pipe"));
}

#[test]
fn missing_token_without_loopback_fails_with_json_error() {
    let output = Command::new(voicebridge_bin())
        .env_remove("VOICEBRIDGE_TOKEN")
        .output()
        .expect("run voicebridge");
    assert!(!output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(
        stdout.contains(r#""event":"error""#),
        "expected an error lifecycle event, got: {stdout}"
    );
}

#[test]
fn identical_pipe_paths_are_rejected() {
    let output = Command::new(voicebridge_bin())
        .args([
            "--loopback",
            "--speaker-pipe",
            "/tmp/voicebridge_same.pcm",
            "--listener-pipe",
            "/tmp/voicebridge_same.pcm",
        ])
        .output()
        .expect("run voicebridge");
    assert!(!output.status.success());
    let combined = combined_output(&output);
    assert!(combined.contains("distinct"));
}
