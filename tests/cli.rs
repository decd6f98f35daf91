mod common;

use common::chartpilot_bin;

#[test]
fn version_flag_prints_version() {
    let output = chartpilot_bin().arg("--version").output().unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains(&format!("chartpilot {}", env!("CARGO_PKG_VERSION"))));
}

#[test]
fn help_lists_commands() {
    let output = chartpilot_bin().arg("--help").output().unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("serve"));
    assert!(stdout.contains("run"));
    assert!(stdout.contains("--config"));
}

#[test]
fn unknown_argument_fails() {
    let output = chartpilot_bin().arg("--bogus").output().unwrap();
    assert_eq!(output.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&output.stderr).contains("Unknown argument"));
}

#[test]
fn run_without_trigger_file_fails_before_browser() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("config.toml");
    let trigger_path = dir.path().join("missing.json");
    std::fs::write(
        &config_path,
        format!("[trigger]\npath = {:?}\n", trigger_path.display().to_string()),
    )
    .unwrap();

    let output = chartpilot_bin()
        .current_dir(dir.path())
        .args(["--config", config_path.to_str().unwrap(), "run"])
        .output()
        .unwrap();
    assert!(!output.status.success());
}
